use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::sync::{Mutex, MutexGuard};

use super::{HistoryEntry, Store};
use crate::quota::config::{DeviceConfig, TimeBlock, normalize_mac};
use crate::quota::state::{BlockUsage, DeviceState, UsageKey};

/// Current store format version
const STORE_VERSION: &str = "1.0";

/// On-disk document holding every record
#[derive(Debug, Clone, Deserialize, Serialize)]
struct StoreData {
    version: String,
    #[serde(default)]
    devices: BTreeMap<String, DeviceConfig>,
    #[serde(default)]
    usage: Vec<BlockUsage>,
    #[serde(default)]
    states: BTreeMap<String, DeviceState>,
    /// File modification time and size when last read or written
    #[serde(skip)]
    modified: Option<(SystemTime, u64)>,
}

impl StoreData {
    fn new() -> Self {
        Self {
            version: STORE_VERSION.to_string(),
            devices: BTreeMap::new(),
            usage: Vec::new(),
            states: BTreeMap::new(),
            modified: None,
        }
    }
}

/// JSON-file backed store; every mutation is written atomically
pub struct JsonStore {
    path: Option<PathBuf>,
    data: Mutex<StoreData>,
}

impl JsonStore {
    /// Open (or create) a store file
    ///
    /// Changes made to the file by another process (the CLI while the
    /// daemon runs) are picked up before the next operation.
    pub fn open(path: &Path) -> Result<Self> {
        let data = if path.exists() {
            read_store_file(path)?
        } else {
            StoreData::new()
        };

        tracing::debug!(
            "Opened store {} ({} devices, {} usage records)",
            path.display(),
            data.devices.len(),
            data.usage.len()
        );

        Ok(Self {
            path: Some(path.to_path_buf()),
            data: Mutex::new(data),
        })
    }

    /// Store that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: Mutex::new(StoreData::new()),
        }
    }

    /// Lock the data, reloading it first if the file changed underneath
    ///
    /// File I/O runs on the blocking pool so a caller's timeout can fire
    /// while it is in progress.
    async fn lock(&self) -> Result<MutexGuard<'_, StoreData>> {
        let mut data = self.data.lock().await;

        if let Some(path) = &self.path {
            let modified = current_stamp(path).await;
            if modified.is_some() && modified != data.modified {
                let source = path.clone();
                *data = tokio::task::spawn_blocking(move || read_store_file(&source))
                    .await
                    .context("Store reload task failed")??;
                tracing::debug!("Reloaded store {} after external change", path.display());
            }
        }

        Ok(data)
    }

    async fn persist(&self, data: &mut StoreData) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let content = serde_json::to_vec_pretty(&*data).context("Failed to serialize store")?;

        // Until the new stamp is recorded, the next lock re-reads the file
        data.modified = None;

        let target = path.clone();
        tokio::task::spawn_blocking(move || {
            crate::platform::common::atomic_write(&target, &content)
        })
        .await
        .context("Store write task failed")?
        .with_context(|| format!("Failed to write store file: {}", path.display()))?;

        data.modified = current_stamp(path).await;
        Ok(())
    }
}

fn read_store_file(path: &Path) -> Result<StoreData> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read store file: {}", path.display()))?;

    let mut data: StoreData = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse store file: {}", path.display()))?;

    if data.version != STORE_VERSION {
        anyhow::bail!(
            "Store file version mismatch (expected {}, got {}): {}",
            STORE_VERSION,
            data.version,
            path.display()
        );
    }

    data.modified = file_modified(path);
    Ok(data)
}

fn file_modified(path: &Path) -> Option<(SystemTime, u64)> {
    stamp(&std::fs::metadata(path).ok()?)
}

async fn current_stamp(path: &Path) -> Option<(SystemTime, u64)> {
    stamp(&tokio::fs::metadata(path).await.ok()?)
}

fn stamp(metadata: &std::fs::Metadata) -> Option<(SystemTime, u64)> {
    Some((metadata.modified().ok()?, metadata.len()))
}

#[async_trait]
impl Store for JsonStore {
    async fn get_device_config(&self, mac: &str) -> Result<Option<DeviceConfig>> {
        let data = self.lock().await?;
        Ok(data.devices.get(&normalize_mac(mac)).cloned())
    }

    async fn list_device_configs(&self) -> Result<Vec<DeviceConfig>> {
        let data = self.lock().await?;
        Ok(data.devices.values().cloned().collect())
    }

    async fn save_device_config(&self, config: &DeviceConfig) -> Result<()> {
        let mut data = self.lock().await?;
        let mac = config.normalized_mac();
        let mut config = config.clone();
        config.mac = mac.clone();
        data.devices.insert(mac, config);
        self.persist(&mut data).await
    }

    async fn delete_device_config(&self, mac: &str) -> Result<()> {
        let mut data = self.lock().await?;
        if data.devices.remove(&normalize_mac(mac)).is_some() {
            self.persist(&mut data).await?;
        }
        Ok(())
    }

    async fn get_or_create_block_usage(&self, key: &UsageKey, seed: &TimeBlock) -> Result<BlockUsage> {
        let mut data = self.lock().await?;
        let key = UsageKey::new(&normalize_mac(&key.mac), key.date, key.block_index);

        if let Some(existing) = data.usage.iter().find(|u| u.matches(&key)) {
            return Ok(existing.clone());
        }

        let usage = BlockUsage::new(&key, seed);
        data.usage.push(usage.clone());
        self.persist(&mut data).await?;

        Ok(usage)
    }

    async fn update_block_usage(&self, usage: &BlockUsage) -> Result<()> {
        let mut data = self.lock().await?;
        let key = UsageKey::new(&normalize_mac(&usage.mac), usage.date, usage.block_index);

        let record = data
            .usage
            .iter_mut()
            .find(|u| u.matches(&key))
            .with_context(|| {
                format!(
                    "Usage record not found: {} {} block {}",
                    key.mac, key.date, key.block_index
                )
            })?;

        *record = usage.clone();
        record.mac = key.mac;
        record.last_updated = Utc::now();

        self.persist(&mut data).await
    }

    async fn list_block_usage(&self, mac: &str, date: NaiveDate) -> Result<Vec<BlockUsage>> {
        let data = self.lock().await?;
        let mac = normalize_mac(mac);

        let mut records: Vec<BlockUsage> = data
            .usage
            .iter()
            .filter(|u| u.mac == mac && u.date == date)
            .cloned()
            .collect();
        records.sort_by_key(|u| u.block_index);

        Ok(records)
    }

    async fn get_device_state(&self, mac: &str) -> Result<DeviceState> {
        let data = self.lock().await?;
        let mac = normalize_mac(mac);
        Ok(data
            .states
            .get(&mac)
            .cloned()
            .unwrap_or_else(|| DeviceState::new(&mac)))
    }

    async fn save_device_state(&self, state: &DeviceState) -> Result<()> {
        let mut data = self.lock().await?;
        let mac = normalize_mac(&state.mac);
        let mut state = state.clone();
        state.mac = mac.clone();
        data.states.insert(mac, state);
        self.persist(&mut data).await
    }

    async fn usage_history(&self, mac: &str, days: u32, today: NaiveDate) -> Result<Vec<HistoryEntry>> {
        let data = self.lock().await?;
        let mac = normalize_mac(mac);
        let earliest = today
            .checked_sub_signed(Duration::days(i64::from(days.saturating_sub(1))))
            .unwrap_or(NaiveDate::MIN);

        let mut by_date: BTreeMap<NaiveDate, Vec<BlockUsage>> = BTreeMap::new();
        for usage in data
            .usage
            .iter()
            .filter(|u| u.mac == mac && u.date >= earliest && u.date <= today)
        {
            by_date.entry(usage.date).or_default().push(usage.clone());
        }

        Ok(by_date
            .into_iter()
            .rev()
            .map(|(date, mut blocks)| {
                blocks.sort_by_key(|u| u.block_index);
                HistoryEntry {
                    date,
                    total_minutes: blocks.iter().map(|b| u64::from(b.used_minutes)).sum(),
                    total_bytes: blocks.iter().map(|b| b.used_bytes).sum(),
                    blocks,
                }
            })
            .collect())
    }
}

/// Get the platform-specific store file path
pub fn get_default_store_path() -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        Ok(PathBuf::from("/var/lib/netquota/store.json"))
    }

    #[cfg(target_os = "macos")]
    {
        Ok(PathBuf::from("/Library/Application Support/netquota/store.json"))
    }

    #[cfg(target_os = "windows")]
    {
        let mut path = PathBuf::from(
            std::env::var("ProgramData").unwrap_or_else(|_| "C:\\ProgramData".to_string()),
        );
        path.push("netquota");
        path.push("store.json");
        Ok(path)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        anyhow::bail!("Unsupported operating system");
    }
}
