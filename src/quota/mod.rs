//! Per-device network quota tracking and enforcement
//!
//! This module provides functionality to:
//! - Resolve which time block applies to a device at a given moment
//! - Turn cumulative controller traffic counters into per-block usage
//! - Block and unblock devices idempotently as limits are reached
//! - Support operator overrides (manual blocks, bonus time and data)

pub mod accumulator;
pub mod config;
pub mod enforcement;
pub mod error;
pub mod poller;
pub mod scheduler;
pub mod state;
pub mod summary;

pub use accumulator::UsageAccumulator;
pub use config::{DaySchedule, DeviceConfig, TimeBlock, TrackerConfig};
pub use enforcement::{Bonus, Enforcer};
pub use error::QuotaError;
pub use poller::{CycleReport, Poller};
pub use scheduler::{ActiveBlock, ScheduleResolver};
pub use state::{BlockUsage, DeviceState, EnforcementState, UsageKey};
pub use summary::{BlockPhase, UsageSummary};
