//! Persistent storage for device configurations, usage accounting and
//! blocking state
//!
//! The quota engine only talks to the [`Store`] trait; [`JsonStore`] is the
//! bundled implementation backed by a single JSON document.

mod json;

pub use json::{JsonStore, get_default_store_path};

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::quota::config::{DeviceConfig, TimeBlock};
use crate::quota::state::{BlockUsage, DeviceState, UsageKey};

/// Record store consumed by the quota engine
#[async_trait]
pub trait Store: Send + Sync {
    /// Device configuration by (case-insensitive) MAC
    async fn get_device_config(&self, mac: &str) -> Result<Option<DeviceConfig>>;

    /// All device configurations, enabled or not
    async fn list_device_configs(&self) -> Result<Vec<DeviceConfig>>;

    /// Insert or replace a device configuration
    async fn save_device_config(&self, config: &DeviceConfig) -> Result<()>;

    /// Remove a device configuration; usage history is kept
    async fn delete_device_config(&self, mac: &str) -> Result<()>;

    /// Fetch the usage record for `key`, creating it from `seed` if missing
    async fn get_or_create_block_usage(&self, key: &UsageKey, seed: &TimeBlock) -> Result<BlockUsage>;

    /// Persist an existing usage record
    async fn update_block_usage(&self, usage: &BlockUsage) -> Result<()>;

    /// Usage records of one device on one date, ordered by block index
    async fn list_block_usage(&self, mac: &str, date: NaiveDate) -> Result<Vec<BlockUsage>>;

    /// Current blocking state; defaulted to unblocked when absent
    async fn get_device_state(&self, mac: &str) -> Result<DeviceState>;

    /// Persist the blocking state of a device
    async fn save_device_state(&self, state: &DeviceState) -> Result<()>;

    /// Per-day usage totals for the last `days` days up to `today`, newest first
    async fn usage_history(&self, mac: &str, days: u32, today: NaiveDate) -> Result<Vec<HistoryEntry>>;
}

/// Raw usage sums for one day
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub date: NaiveDate,
    pub total_minutes: u64,
    pub total_bytes: u64,
    pub blocks: Vec<BlockUsage>,
}
