//! UDP implementation of the datagram transport.

use std::{
    io,
    net::{SocketAddr, ToSocketAddrs, UdpSocket},
    time::Duration,
};

use litewire_core::{config::Config, transport::Transport};
use socket2::{Domain, Protocol, Socket, Type};

/// Creates a UDP socket with the options from `config` applied, bound to `address`.
fn bind_socket(address: SocketAddr, config: &Config) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(address), Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_reuse_address(config.reuse_address)?;

    if let Some(size) = config.socket_recv_buffer_size {
        socket.set_recv_buffer_size(size)?;
    }

    if let Some(size) = config.socket_send_buffer_size {
        socket.set_send_buffer_size(size)?;
    }

    if address.is_ipv4() {
        if let Some(ttl) = config.socket_ttl {
            socket.set_ttl(ttl)?;
        }
        socket.set_broadcast(true)?;
    }

    socket.bind(&address.into())?;
    Ok(socket.into())
}

/// A [`Transport`] over a standard UDP socket.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Binds a new socket to the first address `addresses` resolves to.
    pub fn bind<A: ToSocketAddrs>(addresses: A, config: &Config) -> io::Result<Self> {
        let address = addresses
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no address to bind to"))?;
        let socket = bind_socket(address, config)?;
        socket.set_nonblocking(!config.blocking_mode)?;
        Ok(Self { socket })
    }

    /// Wraps an already bound socket.
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self { socket }
    }
}

impl Transport for UdpTransport {
    fn send_to(&self, payload: &[u8], addr: &SocketAddr) -> io::Result<usize> {
        self.socket.send_to(payload, addr)
    }

    fn recv_from(&self, buffer: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buffer)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn set_read_mode(&self, blocking: bool, timeout: Option<Duration>) -> io::Result<()> {
        self.socket.set_nonblocking(!blocking)?;
        if blocking {
            self.socket.set_read_timeout(timeout)?;
        }
        Ok(())
    }
}
