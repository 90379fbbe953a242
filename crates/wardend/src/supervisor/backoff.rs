//! Exponential backoff between worker restarts

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first restart
    pub initial: Duration,
    /// Upper bound for any delay
    pub max: Duration,
    /// Growth factor per consecutive failure
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackoffState {
    config: BackoffConfig,
    failures: u32,
}

impl BackoffState {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: 0,
        }
    }

    /// Delay to wait before the next restart; grows on every call.
    pub fn next_delay(&mut self) -> Duration {
        let exponent = self.failures.min(i32::MAX as u32) as i32;
        let factor = self.config.multiplier.max(1.0).powi(exponent);
        self.failures = self.failures.saturating_add(1);

        // Scale in f64 so a huge initial delay saturates at max instead of
        // overflowing Duration
        let secs = self.config.initial.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.config.max.as_secs_f64() {
            return self.config.max;
        }
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.config.max)
            .min(self.config.max)
    }

    /// Forget earlier failures after a healthy run
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double_until_capped() {
        let mut state = BackoffState::new(BackoffConfig {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(500),
            multiplier: 2.0,
        });

        assert_eq!(state.next_delay(), Duration::from_millis(100));
        assert_eq!(state.next_delay(), Duration::from_millis(200));
        assert_eq!(state.next_delay(), Duration::from_millis(400));
        assert_eq!(state.next_delay(), Duration::from_millis(500));
        assert_eq!(state.next_delay(), Duration::from_millis(500));
        assert_eq!(state.failures(), 5);
    }

    #[test]
    fn test_reset_starts_over() {
        let mut state = BackoffState::new(BackoffConfig::default());
        state.next_delay();
        state.next_delay();
        state.reset();
        assert_eq!(state.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_many_failures_do_not_overflow() {
        let mut state = BackoffState::new(BackoffConfig::default());
        for _ in 0..200 {
            assert!(state.next_delay() <= Duration::from_secs(60));
        }
    }

    #[test]
    fn test_huge_initial_delay_is_capped() {
        let mut state = BackoffState::new(BackoffConfig {
            initial: Duration::from_secs(u64::MAX / 2),
            max: Duration::from_secs(60),
            multiplier: 1e6,
        });
        for _ in 0..5 {
            assert_eq!(state.next_delay(), Duration::from_secs(60));
        }
    }
}
