//! Deterministic clock for tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chronik_core::Clock;

/// 2024-01-01T00:00:00.000Z, the epoch all journal tests start at.
pub const TEST_EPOCH: u64 = 1_704_067_200_000;

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FakeClock(AtomicU64);

impl FakeClock {
    /// Creates a clock set to [`TEST_EPOCH`].
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::at(TEST_EPOCH)
    }

    /// Creates a clock set to an arbitrary timestamp.
    #[must_use]
    pub fn at(ts: u64) -> Arc<Self> {
        Arc::new(Self(AtomicU64::new(ts)))
    }

    /// Current timestamp in milliseconds.
    #[must_use]
    pub fn now_ts(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    /// Sets the clock to an absolute timestamp.
    pub fn set(&self, ts: u64) {
        self.0.store(ts, Ordering::Relaxed);
    }

    /// Moves the clock forward.
    pub fn advance(&self, d: Duration) {
        self.0.fetch_add(d.as_millis() as u64, Ordering::Relaxed);
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        self.now_ts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_test_epoch() {
        let clock = FakeClock::new();
        assert_eq!(clock.now_ts(), TEST_EPOCH);
        assert_eq!(
            chronik_core::timestamp::format_compact(clock.now_ts()),
            "20240101T000000000"
        );
    }

    #[test]
    fn advance_moves_forward() {
        let clock = FakeClock::new();
        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.now_ts(), TEST_EPOCH + 1_000);
        clock.advance(Duration::from_millis(25));
        assert_eq!(clock.now_ts(), TEST_EPOCH + 1_025);
    }
}
