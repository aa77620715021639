//! Network access controller integration
//!
//! The quota engine blocks and unblocks devices through the
//! [`DeviceControl`] trait. [`UnifiClient`] implements it against the UniFi
//! Network controller API.

mod unifi;

#[cfg(test)]
pub mod fake;

pub use unifi::{ControllerConfig, UnifiClient};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A connected client as reported by the controller
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ClientSample {
    pub mac: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    /// Cumulative bytes sent during the current session
    #[serde(default)]
    pub tx_bytes: u64,
    /// Cumulative bytes received during the current session
    #[serde(default)]
    pub rx_bytes: u64,
    #[serde(default)]
    pub blocked: bool,
}

impl ClientSample {
    pub fn total_bytes(&self) -> u64 {
        self.tx_bytes.saturating_add(self.rx_bytes)
    }

    /// Best human-readable label
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or(self.hostname.as_deref())
            .unwrap_or(&self.mac)
    }
}

/// Physical block/unblock capability of the controller
#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// Currently connected clients with their session counters
    async fn list_connected_clients(&self) -> Result<Vec<ClientSample>>;

    /// Deny network access to a client
    async fn block_client(&self, mac: &str) -> Result<()>;

    /// Restore network access to a client
    async fn unblock_client(&self, mac: &str) -> Result<()>;
}
