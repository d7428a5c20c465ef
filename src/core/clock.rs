//! Time source for every due-date and accrual comparison.

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;

/// Source of the current time.
///
/// The engine never reads the wall clock directly; all schedule and
/// interest math goes through one injected `Clock`.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// # Examples
///
/// ```
/// use installment_engine::core::clock::{Clock, ManualClock};
/// use chrono::Duration;
///
/// let clock = ManualClock::at_epoch(1_700_000_000);
/// let start = clock.now();
/// clock.advance(Duration::days(30));
/// assert_eq!(clock.now() - start, Duration::days(30));
/// ```
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    /// Start at the given unix timestamp (seconds). Out-of-range values
    /// fall back to the unix epoch.
    pub fn at_epoch(secs: i64) -> Self {
        let start = Utc
            .timestamp_opt(secs, 0)
            .single()
            .unwrap_or_default();
        Self::new(start)
    }

    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock();
        *current += by;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.current.lock() = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::at_epoch(0);
        assert_eq!(clock.now().timestamp(), 0);
        clock.advance(Duration::seconds(90));
        assert_eq!(clock.now().timestamp(), 90);
    }

    #[test]
    fn test_manual_clock_set() {
        let clock = ManualClock::at_epoch(0);
        let target = Utc.timestamp_opt(1_000, 0).unwrap();
        clock.set(target);
        assert_eq!(clock.now(), target);
    }
}
