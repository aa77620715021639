use anyhow::Result;
use chrono::{NaiveDateTime, Timelike};
use serde::Serialize;

use crate::quota::config::DeviceConfig;
use crate::quota::scheduler::{ScheduleResolver, parse_clock};
use crate::quota::state::{BlockUsage, DeviceState};
use crate::store::Store;

/// Position of a recorded window relative to now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockPhase {
    Active,
    Completed,
    Upcoming,
}

/// One recorded window of the day
#[derive(Debug, Clone, Serialize)]
pub struct BlockSummary {
    pub phase: BlockPhase,
    pub usage: BlockUsage,
}

/// Today's usage of one device
#[derive(Debug, Clone, Serialize)]
pub struct UsageSummary {
    pub mac: String,
    pub name: String,
    pub enabled: bool,
    pub device_state: DeviceState,
    pub total_minutes: u64,
    pub total_bytes: u64,
    /// Record of the window in force, if any
    pub current: Option<BlockUsage>,
    pub blocks: Vec<BlockSummary>,
}

impl UsageSummary {
    /// Build the summary for `config` as of `at`
    pub async fn build(store: &dyn Store, config: &DeviceConfig, at: NaiveDateTime) -> Result<Self> {
        let mac = config.normalized_mac();
        let active = ScheduleResolver::active_block(&config.schedules, at)?;
        let records = store.list_block_usage(&mac, at.date()).await?;
        let device_state = store.get_device_state(&mac).await?;
        let now = at.hour() * 60 + at.minute();

        let mut summary = Self {
            mac,
            name: config.display_name().to_string(),
            enabled: config.enabled,
            device_state,
            total_minutes: 0,
            total_bytes: 0,
            current: None,
            blocks: Vec::with_capacity(records.len()),
        };

        for usage in records {
            summary.total_minutes += u64::from(usage.used_minutes);
            summary.total_bytes = summary.total_bytes.saturating_add(usage.used_bytes);

            let phase = if active.as_ref().is_some_and(|a| a.index == usage.block_index) {
                summary.current = Some(usage.clone());
                BlockPhase::Active
            } else if parse_clock(&usage.end).is_ok_and(|end| now >= end) {
                BlockPhase::Completed
            } else {
                BlockPhase::Upcoming
            };

            summary.blocks.push(BlockSummary { phase, usage });
        }

        Ok(summary)
    }
}
