use chrono::{DateTime, Utc};

use crate::time::clock::Clock;

/// A [`Clock`] implementation backed by the system clock.
///
/// Token timestamps are always UTC, so unlike calendar-facing clocks there
/// is no timezone to configure.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
