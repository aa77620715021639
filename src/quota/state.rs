use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::quota::config::TimeBlock;

/// Blocking posture of a device
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub enum EnforcementState {
    #[default]
    #[serde(rename = "unblocked")]
    Unblocked,
    #[serde(rename = "time_limit")]
    BlockedByTime,
    #[serde(rename = "data_limit")]
    BlockedByData,
    #[serde(rename = "outside_hours")]
    BlockedOutsideHours,
    /// Set by an operator; never cleared by automatic enforcement
    #[serde(rename = "manual")]
    BlockedManual,
}

impl EnforcementState {
    pub fn is_blocked(self) -> bool {
        self != Self::Unblocked
    }

    pub fn is_manual(self) -> bool {
        self == Self::BlockedManual
    }

    /// Reason code as persisted and shown to operators
    pub fn reason(self) -> &'static str {
        match self {
            Self::Unblocked => "unblocked",
            Self::BlockedByTime => "time_limit",
            Self::BlockedByData => "data_limit",
            Self::BlockedOutsideHours => "outside_hours",
            Self::BlockedManual => "manual",
        }
    }
}

impl std::fmt::Display for EnforcementState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason())
    }
}

/// Identity of one quota window: device, calendar date, block index
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsageKey {
    pub mac: String,
    pub date: NaiveDate,
    pub block_index: usize,
}

impl UsageKey {
    pub fn new(mac: &str, date: NaiveDate, block_index: usize) -> Self {
        Self {
            mac: mac.to_string(),
            date,
            block_index,
        }
    }
}

/// Usage accounting for one time block on one day
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct BlockUsage {
    pub mac: String,
    pub date: NaiveDate,
    pub block_index: usize,
    pub start: String,
    pub end: String,
    pub used_minutes: u32,
    pub used_bytes: u64,
    pub limit_minutes: Option<u32>,
    pub limit_bytes: Option<u64>,
    #[serde(default)]
    pub state: EnforcementState,
    #[serde(default)]
    pub bonus_minutes: u32,
    #[serde(default)]
    pub bonus_bytes: u64,
    /// Raw cumulative counters from the last sample, for delta computation
    #[serde(default)]
    pub last_tx_bytes: u64,
    #[serde(default)]
    pub last_rx_bytes: u64,
    pub last_updated: DateTime<Utc>,
}

impl BlockUsage {
    /// Fresh record seeded with the limits of `block`
    pub fn new(key: &UsageKey, block: &TimeBlock) -> Self {
        Self {
            mac: key.mac.clone(),
            date: key.date,
            block_index: key.block_index,
            start: block.start.clone(),
            end: block.end.clone(),
            used_minutes: 0,
            used_bytes: 0,
            limit_minutes: block.limit_minutes,
            limit_bytes: block.limit_bytes,
            state: EnforcementState::Unblocked,
            bonus_minutes: 0,
            bonus_bytes: 0,
            last_tx_bytes: 0,
            last_rx_bytes: 0,
            last_updated: Utc::now(),
        }
    }

    pub fn key(&self) -> UsageKey {
        UsageKey::new(&self.mac, self.date, self.block_index)
    }

    pub fn matches(&self, key: &UsageKey) -> bool {
        self.mac == key.mac && self.date == key.date && self.block_index == key.block_index
    }

    /// Sum of the stored raw counters
    pub fn last_total(&self) -> u64 {
        self.last_tx_bytes.saturating_add(self.last_rx_bytes)
    }

    pub fn effective_limit_minutes(&self) -> Option<u32> {
        effective_limit(self.limit_minutes, self.bonus_minutes)
    }

    pub fn effective_limit_bytes(&self) -> Option<u64> {
        effective_limit(self.limit_bytes, self.bonus_bytes)
    }

    pub fn remaining_minutes(&self) -> Option<u32> {
        self.effective_limit_minutes()
            .map(|limit| limit.saturating_sub(self.used_minutes))
    }

    pub fn remaining_bytes(&self) -> Option<u64> {
        self.effective_limit_bytes()
            .map(|limit| limit.saturating_sub(self.used_bytes))
    }
}

/// Base limit plus bonus; an unset limit stays unset
pub fn effective_limit<T>(base: Option<T>, bonus: T) -> Option<T>
where
    T: SaturatingAdd,
{
    base.map(|limit| limit.saturating_add_to(bonus))
}

/// Saturating addition for the limit types
pub trait SaturatingAdd: Copy {
    fn saturating_add_to(self, other: Self) -> Self;
}

impl SaturatingAdd for u32 {
    fn saturating_add_to(self, other: Self) -> Self {
        self.saturating_add(other)
    }
}

impl SaturatingAdd for u64 {
    fn saturating_add_to(self, other: Self) -> Self {
        self.saturating_add(other)
    }
}

/// Current blocking state of a device, independent of any window
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DeviceState {
    pub mac: String,
    #[serde(default)]
    pub state: EnforcementState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unblocked_at: Option<DateTime<Utc>>,
}

impl DeviceState {
    /// Default state for a device never seen before
    pub fn new(mac: &str) -> Self {
        Self {
            mac: mac.to_string(),
            state: EnforcementState::Unblocked,
            blocked_at: None,
            unblocked_at: None,
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.state.is_blocked()
    }

    /// Record a transition to `state`
    pub fn transition(&mut self, state: EnforcementState) {
        if state.is_blocked() {
            self.blocked_at = Some(Utc::now());
        } else {
            self.unblocked_at = Some(Utc::now());
        }
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_usage() -> BlockUsage {
        let key = UsageKey::new(
            "aa:bb:cc:00:11:22",
            NaiveDate::from_ymd_opt(2025, 11, 17).unwrap(),
            0,
        );
        BlockUsage::new(
            &key,
            &TimeBlock {
                start: "08:00".to_string(),
                end: "09:00".to_string(),
                limit_minutes: Some(60),
                limit_bytes: None,
            },
        )
    }

    #[test]
    fn test_effective_limit_unset_stays_unset() {
        assert_eq!(effective_limit::<u32>(None, 0), None);
        assert_eq!(effective_limit::<u32>(None, 30), None);
        assert_eq!(effective_limit::<u64>(None, u64::MAX), None);
    }

    #[test]
    fn test_effective_limit_adds_bonus() {
        assert_eq!(effective_limit(Some(60u32), 15), Some(75));
        assert_eq!(effective_limit(Some(0u64), 0), Some(0));
        assert_eq!(effective_limit(Some(u64::MAX), 1), Some(u64::MAX));
    }

    #[test]
    fn test_new_usage_seeds_limits() {
        let usage = make_test_usage();
        assert_eq!(usage.limit_minutes, Some(60));
        assert_eq!(usage.limit_bytes, None);
        assert_eq!(usage.last_total(), 0);
        assert_eq!(usage.state, EnforcementState::Unblocked);
    }

    #[test]
    fn test_remaining_never_negative() {
        let mut usage = make_test_usage();
        usage.used_minutes = 90;
        assert_eq!(usage.remaining_minutes(), Some(0));
        usage.bonus_minutes = 45;
        assert_eq!(usage.remaining_minutes(), Some(15));
        assert_eq!(usage.remaining_bytes(), None);
    }

    #[test]
    fn test_state_reason_codes() {
        assert_eq!(EnforcementState::BlockedByTime.reason(), "time_limit");
        assert_eq!(EnforcementState::BlockedOutsideHours.to_string(), "outside_hours");
        assert!(!EnforcementState::Unblocked.is_blocked());
        assert!(EnforcementState::BlockedManual.is_manual());

        let json = serde_json::to_string(&EnforcementState::BlockedByData).unwrap();
        assert_eq!(json, "\"data_limit\"");
    }

    #[test]
    fn test_device_state_transition_stamps_times() {
        let mut state = DeviceState::new("aa:bb:cc:00:11:22");
        assert!(!state.is_blocked());

        state.transition(EnforcementState::BlockedManual);
        assert!(state.is_blocked());
        assert!(state.blocked_at.is_some());
        assert!(state.unblocked_at.is_none());

        state.transition(EnforcementState::Unblocked);
        assert!(!state.is_blocked());
        assert!(state.unblocked_at.is_some());
    }
}
