use std::{io, net::SocketAddr, time::Instant};

use litewire_protocol::Packet;

use crate::events::NetEvent;

/// Services a peer needs from its owner (the host or a test harness).
///
/// Implementations are shared between the receive and the logic context, so every
/// method takes `&self`. None of them may call back into the peer.
pub trait PeerContext: Send + Sync {
    /// Returns a zeroed packet of at least `size` bytes, preferably from a pool.
    fn alloc(&self, size: usize) -> Packet;

    /// Hands a packet that is no longer referenced back to the pool.
    fn recycle(&self, packet: Packet);

    /// Sends raw datagram bytes.
    fn send_raw(&self, data: &[u8], address: &SocketAddr) -> io::Result<usize>;

    /// Publishes an event.
    fn raise_event(&self, event: NetEvent);

    /// Current monotonic time, used for resend and ping timing.
    fn now(&self) -> Instant;
}
