//! Time source injected into every store
//!
//! Freshness, trends and refresh advice all depend on "now". Components take
//! it from a [`Clock`] so tests can move time forward without sleeping.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex, PoisonError};

/// Source of the current time
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    /// Current instant in UTC
    fn now(&self) -> DateTime<Utc>;
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replays
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward (or backward for a negative duration)
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_manual_clock_advance() {
        let start = Utc.with_ymd_and_hms(2025, 1, 2, 9, 30, 0).unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::hours(25));
        assert_eq!(clock.now(), start + Duration::hours(25));

        let shared = clock.clone();
        shared.advance(Duration::minutes(1));
        assert_eq!(clock.now(), start + Duration::minutes(1501));
    }

    #[test]
    fn test_manual_clock_set() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        let later = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        clock.set(later);
        assert_eq!(clock.now(), later);
    }

    #[test]
    fn test_mock_clock_as_shared() {
        let fixed = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        let mut mock = MockClock::new();
        mock.expect_now().times(2).return_const(fixed);

        let clock: SharedClock = Arc::new(mock);
        assert_eq!(clock.now(), fixed);
        assert_eq!(clock.now(), fixed);
    }
}
