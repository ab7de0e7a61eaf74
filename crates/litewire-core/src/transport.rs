//! Transport abstraction for pluggable I/O.

use std::{io::Result, net::SocketAddr, time::Duration};

/// Low-level datagram socket abstraction.
///
/// This trait allows various transports (UDP, in-memory pipes, etc.) to be plugged
/// into the host without coupling to a concrete implementation. Methods take `&self`
/// so one transport can be shared by the receive and the logic context.
pub trait Transport: Send + Sync {
    /// Sends a single datagram.
    fn send_to(&self, payload: &[u8], addr: &SocketAddr) -> Result<usize>;

    /// Receives a single datagram into `buffer`.
    fn recv_from(&self, buffer: &mut [u8]) -> Result<(usize, SocketAddr)>;

    /// Returns the socket address that this transport is bound to.
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Switches between non-blocking reads and blocking reads bounded by `timeout`.
    fn set_read_mode(&self, blocking: bool, timeout: Option<Duration>) -> Result<()>;
}
