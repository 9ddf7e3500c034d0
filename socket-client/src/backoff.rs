//! Reconnection controller
//!
//! Capped exponential backoff over one disconnect episode. The counter only
//! moves on failed attempts and is reset by a successful connection.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReconnectionController {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
    failures: u32,
}

impl ReconnectionController {
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
            failures: 0,
        }
    }

    /// Delay before the next attempt: `base * 2^failures`, capped.
    pub fn next_delay(&self) -> Duration {
        let factor = 2u32.checked_pow(self.failures).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.cap, |delay| delay.min(self.cap))
    }

    /// 1-based number of the attempt that `next_delay()` schedules.
    pub fn next_attempt(&self) -> u32 {
        self.failures + 1
    }

    /// Record a failed attempt and return the new failure count.
    pub fn record_failure(&mut self) -> u32 {
        self.failures = self.failures.saturating_add(1);
        self.failures
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.failures >= self.max_attempts
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> ReconnectionController {
        ReconnectionController::new(Duration::from_millis(1000), Duration::from_millis(30000), 10)
    }

    #[test]
    fn test_delay_doubles_per_failure() {
        let mut ctl = controller();
        let mut delays = Vec::new();
        for _ in 0..3 {
            delays.push(ctl.next_delay());
            ctl.record_failure();
        }
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000),
            ]
        );
        assert_eq!(ctl.next_attempt(), 4);
    }

    #[test]
    fn test_delay_is_capped() {
        let mut ctl = controller();
        for _ in 0..5 {
            ctl.record_failure();
        }
        assert_eq!(ctl.next_delay(), Duration::from_millis(30000));

        for _ in 0..100 {
            ctl.record_failure();
        }
        assert_eq!(ctl.next_delay(), Duration::from_millis(30000));
    }

    #[test]
    fn test_reset_starts_from_base() {
        let mut ctl = controller();
        for _ in 0..3 {
            ctl.record_failure();
        }
        assert_eq!(ctl.next_delay(), Duration::from_millis(8000));

        ctl.reset();
        assert_eq!(ctl.failures(), 0);
        assert_eq!(ctl.next_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn test_exhausted_after_max_attempts() {
        let mut ctl = ReconnectionController::new(Duration::from_millis(10), Duration::from_millis(100), 3);
        assert!(!ctl.is_exhausted());
        ctl.record_failure();
        ctl.record_failure();
        assert!(!ctl.is_exhausted());
        assert_eq!(ctl.record_failure(), 3);
        assert!(ctl.is_exhausted());
    }
}
