use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

/// Fixed-interval poll scheduler
///
/// The interval is measured from the end of one cycle to the start of the
/// next, so cycles never overlap.
pub struct PollingScheduler {
    interval: Duration,
}

impl PollingScheduler {
    /// Create a new polling scheduler
    ///
    /// # Arguments
    /// * `interval_secs` - Polling interval in seconds
    pub fn new(interval_secs: u64) -> Self {
        Self {
            interval: Duration::from_secs(interval_secs),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sleep until the next poll or until shutdown is requested
    ///
    /// Returns `false` if shutdown was requested.
    pub async fn sleep_until_next_poll(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        if *shutdown.borrow() {
            return false;
        }

        tracing::debug!(
            "Sleeping for {} seconds until next poll",
            self.interval.as_secs()
        );

        let changed = tokio::select! {
            _ = sleep(self.interval) => return true,
            changed = shutdown.changed() => changed,
        };

        // A dropped sender also ends the loop
        changed.is_ok() && !*shutdown.borrow()
    }

    /// Time of the next poll if one started now
    pub fn next_poll_time(&self) -> DateTime<Utc> {
        let interval = chrono::Duration::from_std(self.interval).unwrap_or(chrono::Duration::zero());
        Utc::now() + interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polling_scheduler_creates_with_correct_interval() {
        let scheduler = PollingScheduler::new(30);
        assert_eq!(scheduler.interval(), Duration::from_secs(30));
    }

    #[test]
    fn polling_scheduler_next_poll_time_is_in_future() {
        let scheduler = PollingScheduler::new(30);
        let now = Utc::now();
        let next = scheduler.next_poll_time();

        assert!(next > now);
        assert!(next <= now + chrono::Duration::seconds(31));
    }

    #[tokio::test]
    async fn sleep_completes_after_interval() {
        let scheduler = PollingScheduler::new(0);
        let (_tx, mut rx) = watch::channel(false);

        assert!(scheduler.sleep_until_next_poll(&mut rx).await);
    }

    #[tokio::test]
    async fn shutdown_interrupts_sleep() {
        let scheduler = PollingScheduler::new(3600);
        let (tx, mut rx) = watch::channel(false);

        let handle = tokio::spawn(async move { scheduler.sleep_until_next_poll(&mut rx).await });
        tx.send(true).unwrap();

        assert!(!handle.await.unwrap());
    }

    #[tokio::test]
    async fn already_requested_shutdown_returns_immediately() {
        let scheduler = PollingScheduler::new(3600);
        let (_tx, mut rx) = watch::channel(true);

        assert!(!scheduler.sleep_until_next_poll(&mut rx).await);
    }
}
