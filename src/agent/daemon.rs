use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;

use super::PollingScheduler;
use crate::config::Config;
use crate::controller::UnifiClient;
use crate::quota::{CycleReport, DeviceConfig, Enforcer, Poller};
use crate::store::{JsonStore, Store};

/// Current local wall-clock time, as schedules are written
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Open the store configured in `config`
pub fn open_store(config: &Config) -> Result<Arc<JsonStore>> {
    let path = config.store.resolve_path()?;

    if let Some(parent) = path.parent() {
        crate::platform::common::ensure_directory_exists(parent)?;
    }

    let store = JsonStore::open(&path)
        .with_context(|| format!("Failed to open store: {}", path.display()))?;
    Ok(Arc::new(store))
}

/// Create a controller client and log in
pub async fn connect_controller(config: &Config) -> Result<Arc<UnifiClient>> {
    let client = UnifiClient::new(config.controller.clone())?;
    client
        .login()
        .await
        .with_context(|| format!("Failed to log in to controller at {}", config.controller.url))?;
    Ok(Arc::new(client))
}

/// Run the quota daemon until Ctrl-C or SIGTERM
pub async fn run_daemon(config: Config) -> Result<()> {
    tracing::info!("Starting netquota daemon");
    tracing::info!("Controller: {} (site {})", config.controller.url, config.controller.site);
    tracing::info!(
        "Poll interval: {} seconds, activity threshold: {} bytes",
        config.tracker.poll_interval_secs,
        config.tracker.activity_min_bytes
    );

    let store = open_store(&config)?;
    let controller = connect_controller(&config).await?;
    let poller = Poller::new(store.clone(), controller, &config.tracker);

    let (saved, removed) = sync_device_configs(store.as_ref(), poller.enforcer(), &config.devices).await?;
    tracing::info!("Managing {} devices ({} removed from config)", saved, removed);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("Shutdown requested, finishing current cycle");
        let _ = shutdown_tx.send(true);
    });

    let scheduler = PollingScheduler::new(config.tracker.poll_interval_secs);
    let cycles = run_poll_loop(&poller, &scheduler, shutdown_rx).await;

    tracing::info!("Daemon stopped after {} cycles", cycles);
    Ok(())
}

/// Run cycles until shutdown; returns the number of cycles run
///
/// The first cycle starts immediately. Shutdown never interrupts a cycle.
pub async fn run_poll_loop(
    poller: &Poller,
    scheduler: &PollingScheduler,
    mut shutdown: watch::Receiver<bool>,
) -> usize {
    let mut cycles = 0;

    loop {
        match poller.run_cycle(local_now()).await {
            Ok(report) => {
                tracing::trace!("Cycle report: {:?}", report);
            }
            Err(e) if e.is_transient() => {
                tracing::warn!("Poll cycle skipped: {}", e);
            }
            Err(e) => {
                tracing::error!("Poll cycle failed: {}", e);
            }
        }
        cycles += 1;

        if !scheduler.sleep_until_next_poll(&mut shutdown).await {
            return cycles;
        }

        tracing::debug!("Next poll at: {}", scheduler.next_poll_time().format("%Y-%m-%d %H:%M:%S %Z"));
    }
}

/// Run a single cycle against the configured controller
pub async fn run_once(config: &Config) -> Result<CycleReport> {
    let store = open_store(config)?;
    let controller = connect_controller(config).await?;
    let poller = Poller::new(store.clone(), controller, &config.tracker);

    sync_device_configs(store.as_ref(), poller.enforcer(), &config.devices).await?;

    let report = poller.run_cycle(local_now()).await?;
    Ok(report)
}

/// Make the store's device list match `devices`
///
/// Devices no longer configured are removed and unblocked. Returns the
/// number of devices saved and removed.
pub async fn sync_device_configs(
    store: &dyn Store,
    enforcer: &Enforcer,
    devices: &[DeviceConfig],
) -> Result<(usize, usize)> {
    let wanted: HashSet<String> = devices.iter().map(|d| d.normalized_mac()).collect();

    for device in devices {
        store
            .save_device_config(device)
            .await
            .with_context(|| format!("Failed to save device '{}'", device.display_name()))?;
    }

    let mut removed = 0;
    for stale in store.list_device_configs().await? {
        let mac = stale.normalized_mac();
        if wanted.contains(&mac) {
            continue;
        }

        match enforcer.remove_device(&mac).await {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!("Failed to remove device {}: {}", stale.display_name(), e),
        }
    }

    Ok((devices.len(), removed))
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::fake::{ControlCall, FakeController};
    use crate::quota::{DaySchedule, EnforcementState, TimeBlock, TrackerConfig};
    use std::time::Duration;

    fn make_test_device(mac: &str) -> DeviceConfig {
        DeviceConfig {
            mac: mac.to_string(),
            name: String::new(),
            enabled: true,
            block_outside: false,
            schedules: vec![DaySchedule {
                days: vec!["weekends".to_string()],
                time_blocks: vec![TimeBlock {
                    start: "10:00".to_string(),
                    end: "12:00".to_string(),
                    limit_minutes: Some(60),
                    limit_bytes: None,
                }],
            }],
        }
    }

    #[tokio::test]
    async fn sync_saves_and_removes_devices() {
        let store = Arc::new(JsonStore::in_memory());
        let control = Arc::new(FakeController::new());
        let enforcer = Enforcer::new(store.clone(), control.clone(), Duration::from_secs(5));

        let stale = make_test_device("aa:bb:cc:00:00:01");
        store.save_device_config(&stale).await.unwrap();
        enforcer.manual_block(&stale.mac).await.unwrap();

        let devices = vec![make_test_device("AA:BB:CC:00:00:02")];
        let (saved, removed) = sync_device_configs(store.as_ref(), &enforcer, &devices)
            .await
            .unwrap();

        assert_eq!((saved, removed), (1, 1));
        let configs = store.list_device_configs().await.unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].mac, "aa:bb:cc:00:00:02");

        let state = store.get_device_state("aa:bb:cc:00:00:01").await.unwrap();
        assert_eq!(state.state, EnforcementState::Unblocked);
        assert_eq!(
            control.calls().last(),
            Some(&ControlCall::Unblock("aa:bb:cc:00:00:01".to_string()))
        );
    }

    #[tokio::test]
    async fn sync_keeps_stale_device_when_unblock_fails() {
        let store = Arc::new(JsonStore::in_memory());
        let control = Arc::new(FakeController::new());
        let enforcer = Enforcer::new(store.clone(), control.clone(), Duration::from_secs(5));

        let stale = make_test_device("aa:bb:cc:00:00:01");
        store.save_device_config(&stale).await.unwrap();
        enforcer.manual_block(&stale.mac).await.unwrap();

        control.fail_commands(true);
        let (_, removed) = sync_device_configs(store.as_ref(), &enforcer, &[]).await.unwrap();
        assert_eq!(removed, 0);
        assert!(store.get_device_config(&stale.mac).await.unwrap().is_some());

        control.fail_commands(false);
        let (_, removed) = sync_device_configs(store.as_ref(), &enforcer, &[]).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.list_device_configs().await.unwrap().is_empty());
        assert!(!store.get_device_state(&stale.mac).await.unwrap().is_blocked());
    }

    #[tokio::test]
    async fn poll_loop_finishes_cycle_then_stops() {
        let store = Arc::new(JsonStore::in_memory());
        let control = Arc::new(FakeController::new());
        let poller = Poller::new(store, control, &TrackerConfig::default());
        let scheduler = PollingScheduler::new(3600);

        let (_tx, rx) = watch::channel(true);
        assert_eq!(run_poll_loop(&poller, &scheduler, rx).await, 1);
    }

    #[tokio::test]
    async fn poll_loop_survives_controller_outage() {
        let store = Arc::new(JsonStore::in_memory());
        store
            .save_device_config(&make_test_device("aa:bb:cc:00:00:01"))
            .await
            .unwrap();
        let control = Arc::new(FakeController::new());
        control.fail_listing(true);
        let poller = Poller::new(store, control, &TrackerConfig::default());
        let scheduler = PollingScheduler::new(3600);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { run_poll_loop(&poller, &scheduler, rx).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        assert_eq!(handle.await.unwrap(), 1);
    }
}
