//! Injected time sources.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// A source of wall-clock time in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same instant, so a test or simulation can hold one handle
/// and advance the time seen by the controller.
///
/// # Examples
///
/// ```
/// use capacity_planner::clock::{Clock, ManualClock};
///
/// let clock = ManualClock::new(1_000);
/// let handle = clock.clone();
/// handle.advance_ms(500);
/// assert_eq!(clock.now_ms(), 1_500);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    pub fn set_ms(&self, at_ms: i64) {
        self.now.store(at_ms, Ordering::SeqCst);
    }

    /// Moves the clock forward and returns the new instant.
    pub fn advance_ms(&self, delta_ms: i64) -> i64 {
        self.now.fetch_add(delta_ms, Ordering::SeqCst) + delta_ms
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(10);
        assert_eq!(clock.advance_ms(5), 15);
        assert_eq!(clock.now_ms(), 15);
        clock.set_ms(100);
        assert_eq!(clock.now_ms(), 100);
    }

    #[test]
    fn clones_share_time() {
        let clock = ManualClock::new(0);
        let other = clock.clone();
        other.advance_ms(3_000);
        assert_eq!(clock.now_ms(), 3_000);
    }

    #[test]
    fn system_clock_is_millis() {
        // anything after 2001-09-09 is above 1e12 ms
        assert!(SystemClock.now_ms() > 1_000_000_000_000);
    }
}
