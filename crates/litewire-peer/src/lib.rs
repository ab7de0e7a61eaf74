#![warn(missing_docs)]

//! litewire-peer: channels and the connection state machine of a single remote endpoint.

use std::sync::{Mutex, MutexGuard, PoisonError};

mod channel;
/// Services a peer consumes from its owner.
pub mod context;
/// Application events and operation results.
pub mod events;
mod fragment_buffer;
mod peer;
mod peer_state;
mod pmtu_discovery;
/// Traffic counters.
pub mod statistics;

pub use context::PeerContext;
pub use events::{
    ConnectRequestResult, DisconnectReason, DisconnectResult, NetEvent, PeerRef, ShutdownResult,
};
pub use peer::Peer;
pub use peer_state::ConnectionState;
pub use statistics::PeerStatistics;

/// Locks a mutex, recovering the data when another thread panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
