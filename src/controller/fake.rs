use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{ClientSample, DeviceControl};

/// A recorded block/unblock call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCall {
    Block(String),
    Unblock(String),
}

/// In-process controller that records every command
#[derive(Default)]
pub struct FakeController {
    clients: Mutex<Vec<ClientSample>>,
    calls: Mutex<Vec<ControlCall>>,
    fail_commands: AtomicBool,
    fail_listing: AtomicBool,
}

impl FakeController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the connected client list
    pub fn set_clients(&self, clients: Vec<ClientSample>) {
        *self.clients.lock().unwrap() = clients;
    }

    /// Report one client with the given cumulative counters
    pub fn set_counters(&self, mac: &str, tx_bytes: u64, rx_bytes: u64) {
        self.set_clients(vec![sample(mac, tx_bytes, rx_bytes)]);
    }

    pub fn calls(&self) -> Vec<ControlCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_commands(&self, fail: bool) {
        self.fail_commands.store(fail, Ordering::SeqCst);
    }

    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    fn record(&self, call: ControlCall) -> Result<()> {
        if self.fail_commands.load(Ordering::SeqCst) {
            anyhow::bail!("controller unreachable");
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl DeviceControl for FakeController {
    async fn list_connected_clients(&self) -> Result<Vec<ClientSample>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            anyhow::bail!("controller unreachable");
        }
        Ok(self.clients.lock().unwrap().clone())
    }

    async fn block_client(&self, mac: &str) -> Result<()> {
        self.record(ControlCall::Block(mac.to_string()))
    }

    async fn unblock_client(&self, mac: &str) -> Result<()> {
        self.record(ControlCall::Unblock(mac.to_string()))
    }
}

/// Client sample with only counters set
pub fn sample(mac: &str, tx_bytes: u64, rx_bytes: u64) -> ClientSample {
    ClientSample {
        mac: mac.to_string(),
        name: None,
        hostname: None,
        ip: None,
        tx_bytes,
        rx_bytes,
        blocked: false,
    }
}
