use chrono::NaiveDateTime;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::controller::DeviceControl;
use crate::quota::config::{DeviceConfig, normalize_mac};
use crate::quota::error::{QuotaError, Result, control_call, store_call};
use crate::quota::scheduler::{ActiveBlock, ScheduleResolver};
use crate::quota::state::{BlockUsage, DeviceState, EnforcementState, UsageKey};
use crate::store::Store;

/// Operator-granted extension of the active window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bonus {
    pub minutes: u32,
    pub bytes: u64,
}

impl Bonus {
    pub fn minutes(minutes: u32) -> Self {
        Self { minutes, bytes: 0 }
    }

    pub fn bytes(bytes: u64) -> Self {
        Self { minutes: 0, bytes }
    }

    pub fn is_empty(&self) -> bool {
        self.minutes == 0 && self.bytes == 0
    }
}

/// Target state for a window from its usage and bonus-adjusted limits
pub fn window_target(usage: &BlockUsage) -> EnforcementState {
    if usage
        .effective_limit_minutes()
        .is_some_and(|limit| usage.used_minutes >= limit)
    {
        return EnforcementState::BlockedByTime;
    }

    if usage
        .effective_limit_bytes()
        .is_some_and(|limit| usage.used_bytes >= limit)
    {
        return EnforcementState::BlockedByData;
    }

    EnforcementState::Unblocked
}

/// Target state for a device while none of its windows is active
pub fn outside_window_target(config: &DeviceConfig) -> EnforcementState {
    if config.block_outside {
        EnforcementState::BlockedOutsideHours
    } else {
        EnforcementState::Unblocked
    }
}

/// Decides and applies the blocking posture of devices
///
/// Every decision is recomputed from stored usage; the controller is only
/// called when the target differs from the persisted [`DeviceState`].
pub struct Enforcer {
    store: Arc<dyn Store>,
    control: Arc<dyn DeviceControl>,
    call_timeout: Duration,
}

impl Enforcer {
    pub fn new(store: Arc<dyn Store>, control: Arc<dyn DeviceControl>, call_timeout: Duration) -> Self {
        Self {
            store,
            control,
            call_timeout,
        }
    }

    /// Resolve the active window at `at` and enforce its limits
    ///
    /// Usage is read, not accumulated; returns whether the controller was
    /// called.
    pub async fn check_and_enforce(&self, config: &DeviceConfig, at: NaiveDateTime) -> Result<bool> {
        let mac = config.normalized_mac();

        match ScheduleResolver::active_block(&config.schedules, at)? {
            Some(active) => {
                let mut usage = self.window_usage(&mac, at, &active).await?;
                self.enforce_window(config, &mut usage).await
            }
            None => self.enforce_outside_window(config).await,
        }
    }

    /// Enforce the limits of an already up-to-date window record
    pub async fn enforce_window(&self, config: &DeviceConfig, usage: &mut BlockUsage) -> Result<bool> {
        let mac = config.normalized_mac();
        let target = window_target(usage);

        match target {
            EnforcementState::BlockedByTime => debug!(
                "{} reached time limit ({}/{} minutes)",
                config.display_name(),
                usage.used_minutes,
                usage.effective_limit_minutes().unwrap_or_default()
            ),
            EnforcementState::BlockedByData => debug!(
                "{} reached data limit ({}/{} bytes)",
                config.display_name(),
                usage.used_bytes,
                usage.effective_limit_bytes().unwrap_or_default()
            ),
            _ => {}
        }

        self.enforce_automatic(&mac, target, Some(usage)).await
    }

    /// Apply the outside-hours policy
    pub async fn enforce_outside_window(&self, config: &DeviceConfig) -> Result<bool> {
        let mac = config.normalized_mac();
        self.enforce_automatic(&mac, outside_window_target(config), None)
            .await
    }

    /// Block with the given reason; a no-op if already blocked for it
    pub async fn block_device(&self, mac: &str, state: EnforcementState) -> Result<bool> {
        self.transition_to(&normalize_mac(mac), state, None).await
    }

    /// Unblock; a no-op if not blocked
    pub async fn unblock_device(&self, mac: &str) -> Result<bool> {
        self.transition_to(&normalize_mac(mac), EnforcementState::Unblocked, None)
            .await
    }

    /// Block until explicitly unblocked by an operator
    pub async fn manual_block(&self, mac: &str) -> Result<bool> {
        let mac = normalize_mac(mac);
        info!("Manual block requested for {}", mac);
        self.transition_to(&mac, EnforcementState::BlockedManual, None)
            .await
    }

    /// Clear any block, including a manual one
    ///
    /// The active window's record is reset to unblocked as well. Usage is
    /// untouched, so a window that is still over its limit blocks again on
    /// the next cycle.
    pub async fn manual_unblock(&self, mac: &str, at: NaiveDateTime) -> Result<bool> {
        let mac = normalize_mac(mac);
        info!("Manual unblock requested for {}", mac);

        let config = store_call(
            self.call_timeout,
            "get_device_config",
            self.store.get_device_config(&mac),
        )
        .await?;

        let mut usage = match config {
            Some(config) => match ScheduleResolver::active_block(&config.schedules, at)? {
                Some(active) => Some(self.window_usage(&mac, at, &active).await?),
                None => None,
            },
            None => None,
        };

        self.transition_to(&mac, EnforcementState::Unblocked, usage.as_mut())
            .await
    }

    /// Add a bonus to the active window and re-enforce
    pub async fn grant_bonus(&self, mac: &str, bonus: Bonus, at: NaiveDateTime) -> Result<BlockUsage> {
        let mac = normalize_mac(mac);

        let config = store_call(
            self.call_timeout,
            "get_device_config",
            self.store.get_device_config(&mac),
        )
        .await?
        .ok_or_else(|| QuotaError::DeviceNotFound(mac.clone()))?;

        let active = ScheduleResolver::active_block(&config.schedules, at)?
            .ok_or_else(|| QuotaError::NoActiveWindow(mac.clone()))?;

        let mut usage = self.window_usage(&mac, at, &active).await?;
        usage.bonus_minutes = usage.bonus_minutes.saturating_add(bonus.minutes);
        usage.bonus_bytes = usage.bonus_bytes.saturating_add(bonus.bytes);

        store_call(
            self.call_timeout,
            "update_block_usage",
            self.store.update_block_usage(&usage),
        )
        .await?;

        info!(
            "Granted {} minutes / {} bytes bonus to {} ({}-{})",
            bonus.minutes, bonus.bytes, mac, usage.start, usage.end
        );

        self.enforce_window(&config, &mut usage).await?;
        Ok(usage)
    }

    /// Restore a device's access, then forget it
    pub async fn remove_device(&self, mac: &str) -> Result<()> {
        let mac = normalize_mac(mac);

        let config = store_call(
            self.call_timeout,
            "get_device_config",
            self.store.get_device_config(&mac),
        )
        .await?;
        if config.is_none() {
            return Err(QuotaError::DeviceNotFound(mac));
        }

        // The config stays until the unblock succeeds, so a failed removal
        // can be retried
        self.transition_to(&mac, EnforcementState::Unblocked, None)
            .await?;

        store_call(
            self.call_timeout,
            "delete_device_config",
            self.store.delete_device_config(&mac),
        )
        .await?;

        info!("Removed device {}", mac);
        Ok(())
    }

    /// Persisted blocking state
    pub async fn is_device_blocked(&self, mac: &str) -> Result<DeviceState> {
        self.device_state(&normalize_mac(mac)).await
    }

    /// Move a device to `target`, calling the controller only on change
    ///
    /// A controller failure aborts the transition before anything is
    /// written. On success the device state is persisted and mirrored into
    /// `usage` when given.
    pub async fn transition_to(
        &self,
        mac: &str,
        target: EnforcementState,
        usage: Option<&mut BlockUsage>,
    ) -> Result<bool> {
        let current = self.device_state(mac).await?;
        self.apply(current, target, usage).await
    }

    /// Transition unless an operator block is in force
    async fn enforce_automatic(
        &self,
        mac: &str,
        target: EnforcementState,
        usage: Option<&mut BlockUsage>,
    ) -> Result<bool> {
        let current = self.device_state(mac).await?;

        if current.state.is_manual() {
            debug!("{} is manually blocked, keeping block (computed {})", mac, target);
            return Ok(false);
        }

        self.apply(current, target, usage).await
    }

    async fn apply(
        &self,
        mut current: DeviceState,
        target: EnforcementState,
        usage: Option<&mut BlockUsage>,
    ) -> Result<bool> {
        let mac = current.mac.clone();
        let changed = current.state != target;

        if changed {
            if target.is_blocked() {
                control_call(self.call_timeout, "block_client", self.control.block_client(&mac))
                    .await?;
                info!("Blocked {} ({})", mac, target);
            } else {
                control_call(
                    self.call_timeout,
                    "unblock_client",
                    self.control.unblock_client(&mac),
                )
                .await?;
                info!("Unblocked {} (was {})", mac, current.state);
            }

            current.transition(target);
            store_call(
                self.call_timeout,
                "save_device_state",
                self.store.save_device_state(&current),
            )
            .await?;
        }

        if let Some(usage) = usage.filter(|usage| usage.state != target) {
            usage.state = target;
            store_call(
                self.call_timeout,
                "update_block_usage",
                self.store.update_block_usage(usage),
            )
            .await?;
        }

        Ok(changed)
    }

    async fn device_state(&self, mac: &str) -> Result<DeviceState> {
        store_call(
            self.call_timeout,
            "get_device_state",
            self.store.get_device_state(mac),
        )
        .await
    }

    async fn window_usage(&self, mac: &str, at: NaiveDateTime, active: &ActiveBlock) -> Result<BlockUsage> {
        let key = UsageKey::new(mac, at.date(), active.index);
        store_call(
            self.call_timeout,
            "get_or_create_block_usage",
            self.store.get_or_create_block_usage(&key, &active.block),
        )
        .await
    }
}
