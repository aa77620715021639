use std::future::Future;
use std::time::Duration;

/// Failures of the quota engine, scoped to one device in one cycle
#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[error("storage operation '{operation}' failed: {cause:#}")]
    Store {
        operation: &'static str,
        cause: anyhow::Error,
    },

    #[error("controller operation '{operation}' failed: {cause:#}")]
    Controller {
        operation: &'static str,
        cause: anyhow::Error,
    },

    #[error("'{operation}' timed out after {after_secs}s")]
    Timeout {
        operation: &'static str,
        after_secs: u64,
    },

    #[error("invalid schedule: {detail}")]
    InvalidSchedule { detail: String },

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("no active time block for device {0}")]
    NoActiveWindow(String),
}

impl QuotaError {
    /// Unreachable or slow collaborators; the next cycle retries
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Store { .. } | Self::Controller { .. } | Self::Timeout { .. }
        )
    }
}

pub type Result<T, E = QuotaError> = std::result::Result<T, E>;

/// Run a store call under a deadline
pub(crate) async fn store_call<T, F>(limit: Duration, operation: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(|cause| QuotaError::Store { operation, cause }),
        Err(_) => Err(QuotaError::Timeout {
            operation,
            after_secs: limit.as_secs(),
        }),
    }
}

/// Run a device-control call under a deadline
pub(crate) async fn control_call<T, F>(limit: Duration, operation: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(|cause| QuotaError::Controller { operation, cause }),
        Err(_) => Err(QuotaError::Timeout {
            operation,
            after_secs: limit.as_secs(),
        }),
    }
}
