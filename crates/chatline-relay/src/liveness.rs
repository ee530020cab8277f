use chatline_protocol::config::LimitsConfig;
use std::time::{Duration, Instant};
use tokio::time::{self, Interval, MissedTickBehavior};

/// Per-session idle check: ticks at half the threshold and reports when the session
/// has been silent for longer than the threshold. Any inbound line counts as activity.
#[derive(Debug)]
pub struct IdleMonitor {
    threshold: Duration,
    ticker: Interval,
}

impl IdleMonitor {
    pub fn new(limits: &LimitsConfig) -> Self {
        let period = limits.idle_check_interval();
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            threshold: limits.idle_timeout(),
            ticker,
        }
    }

    pub async fn tick(&mut self) {
        self.ticker.tick().await;
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn is_expired(&self, last_activity: Instant, now: Instant) -> bool {
        now.saturating_duration_since(last_activity) > self.threshold
    }
}
