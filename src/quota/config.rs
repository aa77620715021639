use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::quota::accumulator::DEFAULT_ACTIVITY_MIN_BYTES;
use crate::quota::scheduler::parse_clock;

/// Quota configuration for a single managed device
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Hardware address, compared case-insensitively
    pub mac: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Disabled devices are neither tracked nor enforced
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Block the device whenever no time block is active
    #[serde(default, alias = "block_outside_time_blocks")]
    pub block_outside: bool,

    /// Schedules in priority order (first match wins)
    #[serde(default, alias = "daily_schedules")]
    pub schedules: Vec<DaySchedule>,
}

impl DeviceConfig {
    /// Normalized (lowercase) hardware address
    pub fn normalized_mac(&self) -> String {
        normalize_mac(&self.mac)
    }

    /// Name for log lines and CLI output
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.mac } else { &self.name }
    }
}

/// Time blocks that apply on a set of days
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DaySchedule {
    /// `weekdays`, `weekends` or lowercase day names (`monday`, ...)
    pub days: Vec<String>,

    #[serde(default)]
    pub time_blocks: Vec<TimeBlock>,
}

/// A half-open wall-clock window `[start, end)` with optional limits
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TimeBlock {
    /// Local time, `HH:MM`
    #[serde(alias = "start_time")]
    pub start: String,

    /// Local time, `HH:MM`; `24:00` closes the block at midnight
    #[serde(alias = "end_time")]
    pub end: String,

    /// Active minutes allowed in this block; `None` = unlimited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_minutes: Option<u32>,

    /// Bytes allowed in this block; `None` = unlimited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_bytes: Option<u64>,
}

/// Polling and accounting settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Seconds between polls of the controller
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Traffic per poll above which the poll counts as active time
    #[serde(default = "default_activity_min_bytes")]
    pub activity_min_bytes: u64,

    /// Deadline for each store or controller call
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            activity_min_bytes: default_activity_min_bytes(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl TrackerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            anyhow::bail!("tracker.poll_interval_secs must be at least 1");
        }
        if self.call_timeout_secs == 0 {
            anyhow::bail!("tracker.call_timeout_secs must be at least 1");
        }
        Ok(())
    }
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_activity_min_bytes() -> u64 {
    DEFAULT_ACTIVITY_MIN_BYTES
}

fn default_call_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

/// Canonical form of a hardware address
pub fn normalize_mac(mac: &str) -> String {
    mac.trim().to_lowercase()
}

/// Check that a hardware address looks like `aa:bb:cc:dd:ee:ff`
pub fn is_valid_mac(mac: &str) -> bool {
    let parts: Vec<&str> = mac.trim().split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}

const DAY_SELECTORS: &[&str] = &[
    "weekdays", "weekends", "monday", "tuesday", "wednesday", "thursday", "friday", "saturday",
    "sunday",
];

/// Validate a list of device configurations
pub fn validate_devices(devices: &[DeviceConfig]) -> Result<()> {
    let mut macs = std::collections::HashSet::new();
    for device in devices {
        if !macs.insert(device.normalized_mac()) {
            anyhow::bail!("Duplicate device MAC: {}", device.mac);
        }

        validate_device(device)
            .with_context(|| format!("Invalid device '{}'", device.display_name()))?;
    }

    Ok(())
}

/// Validate a single device configuration
pub fn validate_device(device: &DeviceConfig) -> Result<()> {
    if !is_valid_mac(&device.mac) {
        anyhow::bail!("Invalid MAC address: {}", device.mac);
    }

    for schedule in &device.schedules {
        if schedule.days.is_empty() {
            anyhow::bail!("Schedule must specify at least one day");
        }

        for day in &schedule.days {
            if !DAY_SELECTORS.contains(&day.to_lowercase().as_str()) {
                anyhow::bail!("Invalid day selector: {}", day);
            }
        }

        for block in &schedule.time_blocks {
            let start = parse_clock(&block.start)?;
            let end = parse_clock(&block.end)?;
            if start >= end {
                anyhow::bail!(
                    "Time block start must be before end (got {}-{})",
                    block.start,
                    block.end
                );
            }
        }
    }

    Ok(())
}
