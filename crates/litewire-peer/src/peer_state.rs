/// Connection lifecycle of a peer.
///
/// `Outgoing -> Connected -> ShutdownRequested -> Disconnected`; a forced disconnect jumps
/// to `Disconnected` from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Connect request sent, waiting for the accept.
    Outgoing = 0,
    /// Handshake done, user data flows.
    Connected = 1,
    /// Disconnect sent, waiting for `ShutdownOk` or the timeout.
    ShutdownRequested = 2,
    /// Terminal state.
    Disconnected = 3,
}

impl ConnectionState {
    /// Returns true while the connection accepts protocol packets.
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Outgoing | ConnectionState::Connected)
    }

    /// Returns true once a shutdown started or finished.
    pub fn is_disconnecting(&self) -> bool {
        matches!(self, ConnectionState::ShutdownRequested | ConnectionState::Disconnected)
    }

    pub(crate) fn from_u8(value: u8) -> ConnectionState {
        match value {
            0 => ConnectionState::Outgoing,
            1 => ConnectionState::Connected,
            2 => ConnectionState::ShutdownRequested,
            _ => ConnectionState::Disconnected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trips_through_u8() {
        for state in [
            ConnectionState::Outgoing,
            ConnectionState::Connected,
            ConnectionState::ShutdownRequested,
            ConnectionState::Disconnected,
        ] {
            assert_eq!(ConnectionState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn test_state_predicates() {
        assert!(ConnectionState::Outgoing.is_active());
        assert!(ConnectionState::Connected.is_active());
        assert!(!ConnectionState::ShutdownRequested.is_active());
        assert!(ConnectionState::Disconnected.is_disconnecting());
        assert!(!ConnectionState::Connected.is_disconnecting());
    }
}
