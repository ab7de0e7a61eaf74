//! Path MTU discovery.
//!
//! The MTU starts at the smallest entry of `POSSIBLE_MTU`. Every `MTU_CHECK_DELAY_MS`
//! a probe sized to the next candidate is sent; the remote side echoes well-formed probes
//! back. An echo of exactly the next candidate raises the MTU one step. After
//! `MAX_MTU_CHECK_ATTEMPTS` probe rounds, or once the largest candidate is confirmed,
//! discovery stops and the MTU stays where it is.

use litewire_core::constants::{MAX_MTU_CHECK_ATTEMPTS, MTU_CHECK_DELAY_MS, POSSIBLE_MTU};

/// MTU probing state of one peer.
#[derive(Debug, Clone)]
pub(crate) struct MtuDiscovery {
    index: usize,
    mtu: usize,
    finished: bool,
    check_attempts: u32,
    check_timer: u64,
}

impl Default for MtuDiscovery {
    fn default() -> Self {
        Self { index: 0, mtu: POSSIBLE_MTU[0], finished: false, check_attempts: 0, check_timer: 0 }
    }
}

impl MtuDiscovery {
    /// Current confirmed MTU.
    pub(crate) fn mtu(&self) -> usize {
        self.mtu
    }

    /// Returns true once probing stopped.
    pub(crate) fn is_finished(&self) -> bool {
        self.finished
    }

    /// Drops back to the minimal MTU and starts probing again.
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    /// Advances the probe timer. Returns the size of the probe to send, if one is due.
    pub(crate) fn tick(&mut self, delta_ms: u64) -> Option<usize> {
        if self.finished {
            return None;
        }

        self.check_timer += delta_ms;
        if self.check_timer < MTU_CHECK_DELAY_MS {
            return None;
        }

        self.check_timer = 0;
        self.check_attempts += 1;
        if self.check_attempts >= MAX_MTU_CHECK_ATTEMPTS {
            self.finished = true;
            return None;
        }

        POSSIBLE_MTU.get(self.index + 1).copied()
    }

    /// A probe could not be sent; stop probing.
    pub(crate) fn probe_failed(&mut self) {
        self.finished = true;
    }

    /// The remote side is probing us, which proves the path is alive.
    pub(crate) fn probe_received(&mut self) {
        self.check_attempts = 0;
    }

    /// Handles a probe echo of `value` bytes. Returns true when it raised the MTU.
    pub(crate) fn confirm(&mut self, value: usize) -> bool {
        if value <= self.mtu || self.finished {
            return false;
        }
        if POSSIBLE_MTU.get(self.index + 1) != Some(&value) {
            return false;
        }

        self.index += 1;
        self.mtu = value;
        if self.index == POSSIBLE_MTU.len() - 1 {
            self.finished = true;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_minimal_mtu() {
        let discovery = MtuDiscovery::default();
        assert_eq!(discovery.mtu(), 508);
        assert!(!discovery.is_finished());
    }

    #[test]
    fn test_probe_schedule() {
        let mut discovery = MtuDiscovery::default();
        assert_eq!(discovery.tick(999), None);
        assert_eq!(discovery.tick(1), Some(1024));
        assert!(discovery.confirm(1024));
        assert_eq!(discovery.mtu(), 1024);
        assert_eq!(discovery.tick(1000), Some(1164));
    }

    #[test]
    fn test_unanswered_probes_freeze_mtu() {
        let mut discovery = MtuDiscovery::default();
        assert_eq!(discovery.tick(1000), Some(1024));
        assert!(discovery.confirm(1024));
        assert_eq!(discovery.tick(1000), Some(1164));
        assert_eq!(discovery.tick(1000), Some(1164));
        assert_eq!(discovery.tick(1000), None);

        assert!(discovery.is_finished());
        assert_eq!(discovery.mtu(), 1024);
        assert_eq!(discovery.tick(5000), None);
        assert!(!discovery.confirm(1164));
    }

    #[test]
    fn test_only_next_candidate_is_accepted() {
        let mut discovery = MtuDiscovery::default();
        assert!(!discovery.confirm(1164));
        assert!(!discovery.confirm(508));
        assert!(discovery.confirm(1024));
        assert!(!discovery.confirm(1024));
    }

    #[test]
    fn test_remote_probe_resets_attempts() {
        let mut discovery = MtuDiscovery::default();
        for _ in 0..3 {
            discovery.tick(1000);
        }
        discovery.probe_received();
        assert_eq!(discovery.tick(1000), Some(1024));
    }

    #[test]
    fn test_finishes_at_largest_candidate() {
        let mut discovery = MtuDiscovery::default();
        for value in &POSSIBLE_MTU[1..] {
            assert!(discovery.confirm(*value));
        }
        assert!(discovery.is_finished());
        assert_eq!(discovery.mtu(), 1432);
    }

    #[test]
    fn test_reset() {
        let mut discovery = MtuDiscovery::default();
        discovery.confirm(1024);
        discovery.probe_failed();
        discovery.reset();
        assert_eq!(discovery.mtu(), 508);
        assert!(!discovery.is_finished());
    }
}
