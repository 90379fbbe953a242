//! Poller - one tick per fixed interval, forever

use super::TriggerSource;
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use warden_common::{TriggerError, TriggerEvent};

/// Default poll period in seconds
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

pub struct Poller {
    label: String,
    interval: Interval,
}

impl Poller {
    /// The first tick fires one full period after creation.
    pub fn new(label: &str, period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let mut interval = interval_at(Instant::now() + period, period);
        // A long remediation must not cause a burst of catch-up ticks
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            label: label.to_string(),
            interval,
        }
    }
}

#[async_trait]
impl TriggerSource for Poller {
    fn label(&self) -> &str {
        &self.label
    }

    async fn next_event(&mut self) -> Result<TriggerEvent, TriggerError> {
        self.interval.tick().await;
        Ok(TriggerEvent::Tick { at: Utc::now() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_once_per_period() {
        let start = Instant::now();
        let mut poller = Poller::new("service-poll", Duration::from_secs(10));

        assert!(poller.next_event().await.unwrap().is_tick());
        assert_eq!(start.elapsed(), Duration::from_secs(10));

        assert!(poller.next_event().await.unwrap().is_tick());
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_cycle_does_not_burst() {
        let start = Instant::now();
        let mut poller = Poller::new("service-poll", Duration::from_secs(10));
        poller.next_event().await.unwrap();

        // Simulate a 35 second remediation between ticks
        tokio::time::sleep(Duration::from_secs(35)).await;
        poller.next_event().await.unwrap();
        let after_late_tick = start.elapsed();
        poller.next_event().await.unwrap();

        assert_eq!(start.elapsed() - after_late_tick, Duration::from_secs(10));
    }
}
