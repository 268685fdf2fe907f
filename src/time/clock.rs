use chrono::{DateTime, Utc};

/// A port that provides the **current instant** to token signing and
/// verification.
///
/// # Purpose
/// This trait abstracts access to "now" so that:
///
/// - Token issuance and expiry checks do **not** read system time directly
/// - Implementations can be swapped (system clock, fixed clock, mock, etc.)
/// - Tests can move time forward deterministically to exercise expiry
///   and rotation grace windows
///
/// # Typical Implementations
/// - [`SystemClock`](crate::time::system_clock::SystemClock): the OS clock in UTC
/// - [`FixedClock`](crate::time::fixed_clock::FixedClock): a settable instant (for testing)
pub trait Clock: Send + Sync {
    /// Returns the current instant in UTC.
    fn now(&self) -> DateTime<Utc>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct StaticClock {
        at: DateTime<Utc>,
    }

    impl Clock for StaticClock {
        fn now(&self) -> DateTime<Utc> {
            self.at
        }
    }

    #[test]
    fn static_clock_returns_given_instant() {
        let at = Utc.with_ymd_and_hms(2025, 10, 2, 12, 0, 0).unwrap();
        let clock = StaticClock { at };

        assert_eq!(clock.now(), at);
    }

    #[test]
    fn clock_trait_object_works() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let clock: Box<dyn Clock> = Box::new(StaticClock { at });

        assert_eq!(clock.now(), at);
    }
}
