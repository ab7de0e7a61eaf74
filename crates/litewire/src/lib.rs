#![warn(missing_docs)]

//! litewire: a small public API facade for the workspace.
//!
//! This crate re-exports the types needed to build reliable UDP applications:
//!
//! - Host and events (`Host`, `NetEvent`)
//! - Delivery methods and tokens (`DeliveryMethod`, `DeliveryToken`)
//! - Peers and their state (`Peer`, `ConnectionState`, `DisconnectReason`)
//! - Core configuration (`Config`)
//!
//! Example
//! ```ignore
//! use std::time::Instant;
//! use litewire::prelude::*;
//!
//! let server = Host::bind_any().unwrap();
//! let client = Host::bind_any().unwrap();
//! let peer = client.connect(server.local_addr().unwrap(), b"hello").unwrap();
//!
//! loop {
//!     server.manual_poll(Instant::now());
//!     client.manual_poll(Instant::now());
//!     while let Some(event) = server.recv() {
//!         if let NetEvent::ConnectionRequest { address, .. } = event {
//!             server.accept(address);
//!         }
//!     }
//!     if peer.state() == ConnectionState::Connected {
//!         client.send(peer.id(), b"ping", 0, DeliveryMethod::ReliableOrdered).unwrap();
//!         break;
//!     }
//! }
//! ```

// Core config and errors
pub use litewire_core::{
    config::Config,
    error::{ErrorKind, Result},
};
// Host: socket, peer table and event queue
pub use litewire_host::{encode_key, Host, UdpTransport};
// Peer: connection state machine and events
pub use litewire_peer::{ConnectionState, DisconnectReason, NetEvent, Peer, PeerRef, PeerStatistics};
// Protocol: delivery guarantees
pub use litewire_protocol::{DeliveryMethod, DeliveryToken};

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{
        encode_key, Config, ConnectionState, DeliveryMethod, DeliveryToken, DisconnectReason, ErrorKind, Host,
        NetEvent, Peer, PeerRef, Result,
    };
}
