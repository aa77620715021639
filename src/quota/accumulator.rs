use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::controller::ClientSample;
use crate::quota::error::{Result, store_call};
use crate::quota::scheduler::ActiveBlock;
use crate::quota::state::{BlockUsage, UsageKey};
use crate::store::Store;

/// Default minimum traffic per poll for the poll to count as activity
pub const DEFAULT_ACTIVITY_MIN_BYTES: u64 = 1024;

/// Turns cumulative session counters into per-window usage
pub struct UsageAccumulator {
    store: Arc<dyn Store>,
    poll_interval: Duration,
    activity_min_bytes: u64,
    call_timeout: Duration,
}

impl UsageAccumulator {
    pub fn new(
        store: Arc<dyn Store>,
        poll_interval: Duration,
        activity_min_bytes: u64,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            poll_interval,
            activity_min_bytes,
            call_timeout,
        }
    }

    /// Minutes credited for one active poll: the interval rounded up, at least 1
    pub fn active_minutes_per_poll(&self) -> u32 {
        let minutes = self.poll_interval.as_secs().div_ceil(60).max(1);
        u32::try_from(minutes).unwrap_or(u32::MAX)
    }

    /// Charge a live sample to the usage record of the active window
    pub async fn record_sample(
        &self,
        mac: &str,
        sample: &ClientSample,
        date: NaiveDate,
        active: &ActiveBlock,
    ) -> Result<BlockUsage> {
        let key = UsageKey::new(mac, date, active.index);
        let mut usage = store_call(
            self.call_timeout,
            "get_or_create_block_usage",
            self.store.get_or_create_block_usage(&key, &active.block),
        )
        .await?;

        self.apply_sample(&mut usage, sample);

        store_call(
            self.call_timeout,
            "update_block_usage",
            self.store.update_block_usage(&usage),
        )
        .await?;

        Ok(usage)
    }

    /// Update `usage` in place from a sample; no I/O
    pub fn apply_sample(&self, usage: &mut BlockUsage, sample: &ClientSample) {
        let current_total = sample.total_bytes();

        match traffic_delta(usage.last_total(), current_total) {
            None => {
                debug!(
                    "{}: baseline {} bytes for block {}",
                    usage.mac, current_total, usage.block_index
                );
            }
            Some(delta) => {
                usage.used_bytes = usage.used_bytes.saturating_add(delta);

                if delta > self.activity_min_bytes {
                    usage.used_minutes = usage
                        .used_minutes
                        .saturating_add(self.active_minutes_per_poll());
                }

                debug!(
                    "{}: +{} bytes, block {} now {} min / {} bytes",
                    usage.mac, delta, usage.block_index, usage.used_minutes, usage.used_bytes
                );
            }
        }

        usage.last_tx_bytes = sample.tx_bytes;
        usage.last_rx_bytes = sample.rx_bytes;
        usage.last_updated = Utc::now();
    }
}

/// Bytes transferred since the previous sample
///
/// `None` on the first observation of a window (`last_total == 0`): the
/// counters only become the baseline. A total lower than the previous one
/// means the controller reset the session counters, and the new total is
/// charged as the delta.
pub fn traffic_delta(last_total: u64, current_total: u64) -> Option<u64> {
    if last_total == 0 {
        None
    } else if current_total < last_total {
        Some(current_total)
    } else {
        Some(current_total - last_total)
    }
}
