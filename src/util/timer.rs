use std::time::Duration;

use tokio::time::{interval, sleep_until, Instant, Interval, MissedTickBehavior};

/// A point in time a fixed timeout after the most recent (re)start. This serves as the receiver's
///  inactivity watchdog and as the sender's terminal grace period.
///
/// Waiting for expiry does not consume the deadline, so it can be polled in a `select!` loop
///  and reset in between.
#[derive(Debug)]
pub struct Deadline {
    timeout: Duration,
    at: Instant,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Deadline {
        Deadline {
            timeout,
            at: Instant::now() + timeout,
        }
    }

    pub fn reset(&mut self) {
        self.at = Instant::now() + self.timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    pub async fn expired(&self) {
        sleep_until(self.at).await
    }
}

/// Waits for an optional deadline - never completes for `None`
pub async fn expiry(deadline: Option<&Deadline>) {
    match deadline {
        Some(deadline) => deadline.expired().await,
        None => std::future::pending().await,
    }
}

/// Periodic trigger for retransmissions. The period can be replaced on the fly, restarting the
///  cadence with an immediate first tick.
#[derive(Debug)]
pub struct RetryTicker {
    period: Duration,
    interval: Interval,
}

impl RetryTicker {
    /// NB: panics for a zero period - [crate::config::TransferConfig::validate] rules that out
    pub fn new(period: Duration) -> RetryTicker {
        RetryTicker {
            period,
            interval: Self::create_interval(period),
        }
    }

    fn create_interval(period: Duration) -> Interval {
        let mut result = interval(period);
        // a burst of catch-up ticks would only duplicate retransmissions
        result.set_missed_tick_behavior(MissedTickBehavior::Delay);
        result
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn replace(&mut self, period: Duration) {
        self.period = period;
        self.interval = Self::create_interval(period);
    }

    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }
}
