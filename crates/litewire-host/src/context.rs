use std::{
    io,
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
    time::Instant,
};

use crossbeam_channel::Sender;
use litewire_core::{packet_pool::PacketPool, time::Clock, transport::Transport};
use litewire_peer::{NetEvent, PeerContext};
use litewire_protocol::Packet;

/// The services the host lends to its peers: buffer pool, socket, event queue and clock.
pub(crate) struct HostContext {
    transport: Arc<dyn Transport>,
    pool: PacketPool,
    events: Sender<NetEvent>,
    clock: Arc<dyn Clock>,
    /// Destinations the socket reported as unreachable, handled outside peer locks
    unreachable: Mutex<Vec<(SocketAddr, io::ErrorKind)>>,
}

impl HostContext {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        pool_size: usize,
        events: Sender<NetEvent>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { transport, pool: PacketPool::new(pool_size), events, clock, unreachable: Mutex::new(Vec::new()) }
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub(crate) fn pool(&self) -> &PacketPool {
        &self.pool
    }

    /// Takes the unreachable destinations recorded since the last call.
    pub(crate) fn take_unreachable(&self) -> Vec<(SocketAddr, io::ErrorKind)> {
        std::mem::take(&mut *self.unreachable.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl PeerContext for HostContext {
    fn alloc(&self, size: usize) -> Packet {
        Packet::from_buffer(self.pool.acquire(size), size)
    }

    fn recycle(&self, packet: Packet) {
        self.pool.release(packet.into_buffer());
    }

    fn send_raw(&self, data: &[u8], address: &SocketAddr) -> io::Result<usize> {
        let result = self.transport.send_to(data, address);
        if let Err(e) = &result {
            if matches!(e.kind(), io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable) {
                self.raise_event(NetEvent::socket_error(Some(*address), e));
                self.unreachable.lock().unwrap_or_else(PoisonError::into_inner).push((*address, e.kind()));
            }
        }
        result
    }

    fn raise_event(&self, event: NetEvent) {
        // The host keeps a receiver for its whole lifetime.
        let _ = self.events.send(event);
    }

    fn now(&self) -> Instant {
        self.clock.now()
    }
}
