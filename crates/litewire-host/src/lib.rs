#![warn(missing_docs)]

//! litewire-host: UDP socket, peer table and dispatch loop driving litewire peers.

mod connection_request;
mod context;
mod dispatch;
mod peer_table;
/// The host handle.
pub mod socket;
/// UDP transport with socket options applied through `socket2`.
pub mod transport;

pub use connection_request::encode_key;
pub use socket::Host;
pub use transport::UdpTransport;
