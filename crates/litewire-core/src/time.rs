//! Time sources.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Abstraction over a time source to improve testability.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current time instant.
    fn now(&self) -> Instant;
}

/// System clock using `Instant::now()`.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Number of 100 ns ticks in one millisecond.
pub const TICKS_PER_MILLISECOND: i64 = 10_000;

/// Current wall-clock time as 100 ns ticks since the Unix epoch.
///
/// Used for connect times and pong timestamps, which only need to be comparable
/// between the two ends of one connection.
pub fn unix_ticks() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => (elapsed.as_nanos() / 100) as i64,
        Err(_) => 0,
    }
}
