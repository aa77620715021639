use chrono::NaiveDateTime;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::controller::{ClientSample, DeviceControl};
use crate::quota::accumulator::UsageAccumulator;
use crate::quota::config::{DeviceConfig, TrackerConfig, normalize_mac};
use crate::quota::enforcement::Enforcer;
use crate::quota::error::{QuotaError, Result, control_call, store_call};
use crate::quota::scheduler::ScheduleResolver;
use crate::store::Store;

/// Outcome of one poll cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Enabled devices
    pub managed: usize,
    /// Managed devices reported as connected
    pub observed: usize,
    /// Devices skipped because of an error
    pub failed: usize,
    /// Block/unblock calls issued
    pub transitions: usize,
}

/// Runs poll cycles: sample once, then account and enforce per device
pub struct Poller {
    store: Arc<dyn Store>,
    control: Arc<dyn DeviceControl>,
    accumulator: UsageAccumulator,
    enforcer: Enforcer,
    call_timeout: Duration,
}

impl Poller {
    pub fn new(store: Arc<dyn Store>, control: Arc<dyn DeviceControl>, tracker: &TrackerConfig) -> Self {
        let call_timeout = tracker.call_timeout();

        Self {
            accumulator: UsageAccumulator::new(
                store.clone(),
                tracker.poll_interval(),
                tracker.activity_min_bytes,
                call_timeout,
            ),
            enforcer: Enforcer::new(store.clone(), control.clone(), call_timeout),
            store,
            control,
            call_timeout,
        }
    }

    pub fn enforcer(&self) -> &Enforcer {
        &self.enforcer
    }

    /// Run one cycle at local time `at`
    ///
    /// Fails only when device configs or the client list cannot be loaded;
    /// per-device failures are logged and counted.
    pub async fn run_cycle(&self, at: NaiveDateTime) -> Result<CycleReport> {
        let configs = store_call(
            self.call_timeout,
            "list_device_configs",
            self.store.list_device_configs(),
        )
        .await?;

        let managed: BTreeMap<String, DeviceConfig> = configs
            .into_iter()
            .filter(|config| config.enabled)
            .map(|config| (config.normalized_mac(), config))
            .collect();

        let mut report = CycleReport {
            managed: managed.len(),
            ..CycleReport::default()
        };

        if managed.is_empty() {
            debug!("No managed devices, skipping poll");
            return Ok(report);
        }

        let clients = control_call(
            self.call_timeout,
            "list_connected_clients",
            self.control.list_connected_clients(),
        )
        .await?;

        let mut seen = HashSet::new();
        for sample in &clients {
            let mac = normalize_mac(&sample.mac);
            let Some(config) = managed.get(&mac) else {
                continue;
            };
            if !seen.insert(mac) {
                continue;
            }

            report.observed += 1;
            let outcome = self.process_client(config, sample, at).await;
            record_outcome(&mut report, config, outcome);
        }

        // Blocked clients drop off the controller's list, so offline devices
        // are re-evaluated too.
        for (mac, config) in &managed {
            if seen.contains(mac) {
                continue;
            }

            let outcome = self.enforcer.check_and_enforce(config, at).await;
            record_outcome(&mut report, config, outcome);
        }

        if report.transitions > 0 || report.failed > 0 {
            info!(
                "Poll complete: {} managed, {} online, {} transitions, {} failed",
                report.managed, report.observed, report.transitions, report.failed
            );
        } else {
            debug!(
                "Poll complete: {} managed, {} online",
                report.managed, report.observed
            );
        }

        Ok(report)
    }

    async fn process_client(&self, config: &DeviceConfig, sample: &ClientSample, at: NaiveDateTime) -> Result<bool> {
        match ScheduleResolver::active_block(&config.schedules, at)? {
            Some(active) => {
                let mut usage = self
                    .accumulator
                    .record_sample(&config.normalized_mac(), sample, at.date(), &active)
                    .await?;
                self.enforcer.enforce_window(config, &mut usage).await
            }
            None => self.enforcer.enforce_outside_window(config).await,
        }
    }
}

fn record_outcome(report: &mut CycleReport, config: &DeviceConfig, outcome: Result<bool>) {
    match outcome {
        Ok(true) => report.transitions += 1,
        Ok(false) => {}
        Err(err) => {
            report.failed += 1;
            log_device_error(config, &err);
        }
    }
}

fn log_device_error(config: &DeviceConfig, err: &QuotaError) {
    if err.is_transient() {
        warn!("Skipping {} this cycle: {}", config.display_name(), err);
    } else {
        error!("Failed to process {}: {}", config.display_name(), err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::fake::{ControlCall, FakeController, sample};
    use crate::quota::config::{DaySchedule, TimeBlock};
    use crate::quota::state::EnforcementState;
    use crate::store::JsonStore;
    use chrono::NaiveDate;

    const MAC: &str = "aa:bb:cc:00:11:22";
    const OTHER: &str = "aa:bb:cc:00:11:33";

    fn make_test_device(mac: &str, block_outside: bool) -> DeviceConfig {
        DeviceConfig {
            mac: mac.to_string(),
            name: String::new(),
            enabled: true,
            block_outside,
            schedules: vec![DaySchedule {
                days: vec!["weekdays".to_string()],
                time_blocks: vec![TimeBlock {
                    start: "08:00".to_string(),
                    end: "09:00".to_string(),
                    limit_minutes: Some(60),
                    limit_bytes: Some(100_000_000),
                }],
            }],
        }
    }

    // Monday
    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 11, 17)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    async fn make_test_poller(devices: &[DeviceConfig]) -> (Poller, Arc<JsonStore>, Arc<FakeController>) {
        let store = Arc::new(JsonStore::in_memory());
        for device in devices {
            store.save_device_config(device).await.unwrap();
        }
        let control = Arc::new(FakeController::new());
        let poller = Poller::new(store.clone(), control.clone(), &TrackerConfig::default());
        (poller, store, control)
    }

    #[tokio::test]
    async fn test_end_to_end_data_limit() {
        let (poller, store, control) = make_test_poller(&[make_test_device(MAC, false)]).await;
        let date = at(8, 0).date();

        control.set_counters(MAC, 1_000_000, 9_000_000);
        poller.run_cycle(at(8, 4)).await.unwrap();

        control.set_counters(MAC, 1_000_000, 59_000_000);
        let report = poller.run_cycle(at(8, 5)).await.unwrap();
        assert_eq!(report.observed, 1);
        assert_eq!(report.transitions, 0);

        let usage = store.list_block_usage(MAC, date).await.unwrap();
        assert_eq!(usage[0].used_bytes, 50_000_000);
        assert_eq!(usage[0].used_minutes, 1);
        assert!(!store.get_device_state(MAC).await.unwrap().is_blocked());
        assert!(control.calls().is_empty());

        control.set_counters(MAC, 1_000_000, 110_000_000);
        let report = poller.run_cycle(at(8, 6)).await.unwrap();
        assert_eq!(report.transitions, 1);

        let usage = store.list_block_usage(MAC, date).await.unwrap();
        assert_eq!(usage[0].used_bytes, 101_000_000);
        assert_eq!(usage[0].state, EnforcementState::BlockedByData);
        assert_eq!(
            store.get_device_state(MAC).await.unwrap().state,
            EnforcementState::BlockedByData
        );
        assert_eq!(control.calls(), vec![ControlCall::Block(MAC.to_string())]);

        // Still over the limit on the next poll: no further calls
        poller.run_cycle(at(8, 7)).await.unwrap();
        assert_eq!(control.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_offline_device_blocked_outside_hours() {
        let (poller, store, control) = make_test_poller(&[
            make_test_device(MAC, true),
            make_test_device(OTHER, false),
        ])
        .await;

        let report = poller.run_cycle(at(21, 0)).await.unwrap();
        assert_eq!(report.managed, 2);
        assert_eq!(report.observed, 0);
        assert_eq!(report.transitions, 1);
        assert_eq!(
            store.get_device_state(MAC).await.unwrap().state,
            EnforcementState::BlockedOutsideHours
        );
        assert!(!store.get_device_state(OTHER).await.unwrap().is_blocked());

        // Window opens while the device is still off the client list
        poller.run_cycle(at(8, 0)).await.unwrap();
        assert_eq!(
            control.calls(),
            vec![
                ControlCall::Block(MAC.to_string()),
                ControlCall::Unblock(MAC.to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_device_failure_does_not_abort_cycle() {
        let mut broken = make_test_device(OTHER, false);
        broken.schedules[0].time_blocks[0].end = "late".to_string();
        let (poller, store, control) =
            make_test_poller(&[make_test_device(MAC, true), broken]).await;

        control.set_clients(vec![sample(OTHER, 10, 10), sample(MAC, 10, 10)]);
        let report = poller.run_cycle(at(22, 0)).await.unwrap();

        assert_eq!(report.observed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.transitions, 1);
        assert!(store.get_device_state(MAC).await.unwrap().is_blocked());
    }

    #[tokio::test]
    async fn test_controller_failure_counts_device() {
        let (poller, store, control) = make_test_poller(&[make_test_device(MAC, true)]).await;
        control.fail_commands(true);

        let report = poller.run_cycle(at(22, 0)).await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(!store.get_device_state(MAC).await.unwrap().is_blocked());

        control.fail_commands(false);
        let report = poller.run_cycle(at(22, 1)).await.unwrap();
        assert_eq!(report.failed, 0);
        assert_eq!(report.transitions, 1);
    }

    #[tokio::test]
    async fn test_listing_failure_aborts_cycle() {
        let (poller, store, control) = make_test_poller(&[make_test_device(MAC, true)]).await;
        control.fail_listing(true);

        let err = poller.run_cycle(at(22, 0)).await.unwrap_err();
        assert!(err.is_transient());
        assert!(!store.get_device_state(MAC).await.unwrap().is_blocked());
        assert!(control.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unmanaged_and_disabled_clients_ignored() {
        let mut disabled = make_test_device(OTHER, true);
        disabled.enabled = false;
        let (poller, store, control) = make_test_poller(&[disabled]).await;

        control.set_clients(vec![sample(OTHER, 10, 10), sample("00:11:22:33:44:55", 5, 5)]);
        let report = poller.run_cycle(at(22, 0)).await.unwrap();

        assert_eq!(report, CycleReport::default());
        assert!(!store.get_device_state(OTHER).await.unwrap().is_blocked());
        assert!(control.calls().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_samples_use_first() {
        let (poller, store, control) = make_test_poller(&[make_test_device(MAC, false)]).await;

        control.set_clients(vec![sample(MAC, 100, 100), sample("AA:BB:CC:00:11:22", 9_000, 9_000)]);
        let report = poller.run_cycle(at(8, 10)).await.unwrap();
        assert_eq!(report.observed, 1);

        let usage = store.list_block_usage(MAC, at(8, 0).date()).await.unwrap();
        assert_eq!(usage[0].last_total(), 200);
    }
}
