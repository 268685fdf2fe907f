//! A settable [`Clock`] for deterministic tests.
//!
//! Resolution is one second, matching the resolution of token timestamps.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, Utc};

use crate::time::clock::Clock;

/// A [`Clock`] that returns an instant controlled by the caller.
///
/// # Example
/// ```
/// use chrono::Duration;
/// use wzs_csrf::time::clock::Clock;
/// use wzs_csrf::time::fixed_clock::FixedClock;
///
/// let clock = FixedClock::at_unix(0);
/// clock.advance(Duration::seconds(500));
/// assert_eq!(clock.now().timestamp(), 500);
/// ```
#[derive(Debug, Default)]
pub struct FixedClock {
    unix_secs: AtomicI64,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self::at_unix(at.timestamp())
    }

    /// Creates a clock positioned at the given UNIX timestamp (seconds).
    pub fn at_unix(secs: i64) -> Self {
        Self {
            unix_secs: AtomicI64::new(secs),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.unix_secs.store(at.timestamp(), Ordering::SeqCst);
    }

    /// Moves the clock forward (or backward, for negative durations).
    pub fn advance(&self, by: Duration) {
        self.unix_secs.fetch_add(by.num_seconds(), Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.unix_secs.load(Ordering::SeqCst), 0).unwrap_or_default()
    }
}
