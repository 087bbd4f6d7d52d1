//! Exponential backoff between failed sync ticks.

use std::time::Duration;

/// Delay schedule after consecutive transport failures.
///
/// The first failure waits `initial`, every further failure doubles the wait
/// up to `max`. A success resets the schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    failures: u32,
}

impl Backoff {
    pub const fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            failures: 0,
        }
    }

    /// Record a failure and return how long to wait before the next attempt
    pub fn fail(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.current()
    }

    pub fn succeed(&mut self) {
        self.failures = 0;
    }

    pub const fn failures(&self) -> u32 {
        self.failures
    }

    /// Wait implied by the failures recorded so far; zero after a success
    pub fn current(&self) -> Duration {
        if self.failures == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(self.failures - 1).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let minute = Duration::from_secs(60);
        let mut backoff = Backoff::new(10 * minute, 80 * minute);

        assert_eq!(backoff.current(), Duration::ZERO);
        assert_eq!(backoff.fail(), 10 * minute);
        assert_eq!(backoff.fail(), 20 * minute);
        assert_eq!(backoff.fail(), 40 * minute);
        assert_eq!(backoff.fail(), 80 * minute);
        assert_eq!(backoff.fail(), 80 * minute);
        assert_eq!(backoff.failures(), 5);

        backoff.succeed();
        assert_eq!(backoff.current(), Duration::ZERO);
        assert_eq!(backoff.fail(), 10 * minute);
    }

    #[test]
    fn test_many_failures_do_not_overflow() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        for _ in 0..100 {
            backoff.fail();
        }
        assert_eq!(backoff.current(), Duration::from_secs(30));
    }
}
