//! Time sources.
//!
//! Engine time is expressed as [`RelTime`]: whole seconds elapsed since the
//! engine started. Deletion timestamps and purge ages are both measured on
//! this scale, so the purge policy never depends on the wall clock.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Seconds since engine start.
pub type RelTime = u32;

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Source of the engine's relative time.
pub trait TimeSource: Send + Sync {
    /// Current relative time in seconds.
    fn now(&self) -> RelTime;
}

/// Monotonic clock counting seconds from its own creation.
#[derive(Debug)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    /// Create a clock whose epoch is "now".
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemClock {
    fn now(&self) -> RelTime {
        RelTime::try_from(self.start.elapsed().as_secs()).unwrap_or(RelTime::MAX)
    }
}

/// Manually driven clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU32,
}

impl ManualClock {
    /// Create a clock reading `start`.
    #[must_use]
    pub const fn new(start: RelTime) -> Self {
        Self {
            now: AtomicU32::new(start),
        }
    }

    /// Jump to an absolute relative time.
    pub fn set(&self, now: RelTime) {
        self.now.store(now, Ordering::Release);
    }

    /// Move the clock forward by `secs`, saturating at `RelTime::MAX`.
    pub fn advance(&self, secs: RelTime) {
        let _ = self
            .now
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |t| {
                Some(t.saturating_add(secs))
            });
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> RelTime {
        self.now.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_set_and_advance() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now(), 100);
        clock.advance(50);
        assert_eq!(clock.now(), 150);
        clock.set(10);
        assert_eq!(clock.now(), 10);
    }

    #[test]
    fn test_manual_clock_saturates() {
        let clock = ManualClock::new(RelTime::MAX - 1);
        clock.advance(10);
        assert_eq!(clock.now(), RelTime::MAX);
    }

    #[test]
    fn test_system_clock_starts_at_zero() {
        let clock = SystemClock::new();
        assert_eq!(clock.now(), 0);
        assert!(now_ms() > 0);
    }
}
