use anyhow::{Context, Result};
use chrono::Duration;
use std::future::Future;
use std::path::Path;

use crate::config::{self, Config};

/// Initialize logging
///
/// `RUST_LOG` wins over `--verbose`, which wins over the configured level.
pub fn init_logging(verbose: bool, level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let level = if verbose { "debug" } else { level };

    // Ignore a second initialisation (tests)
    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level)))
        .try_init();
}

/// Load the configuration file and start logging with its level
pub fn load_config_and_init_logging(path: &Path, verbose: bool) -> Result<Config> {
    let config = config::load_config(path)
        .with_context(|| format!("Failed to load configuration. Run 'netquota init' to create {}", path.display()))?;
    init_logging(verbose, &config.logging.level);
    Ok(config)
}

/// Run a future on a fresh multi-threaded runtime
pub fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    Ok(runtime.block_on(future))
}

/// Format a byte count with binary units
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{:.1} {}", value, UNITS[unit])
}

/// Format `used / limit` for minutes; unset limits print as unlimited
pub fn format_minutes_usage(used: u32, limit: Option<u32>) -> String {
    match limit {
        Some(limit) => format!("{}/{} min", used, limit),
        None => format!("{} min (unlimited)", used),
    }
}

/// Format `used / limit` for bytes; unset limits print as unlimited
pub fn format_bytes_usage(used: u64, limit: Option<u64>) -> String {
    match limit {
        Some(limit) => format!("{}/{}", format_bytes(used), format_bytes(limit)),
        None => format!("{} (unlimited)", format_bytes(used)),
    }
}

/// Format duration for display
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.num_seconds();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_uses_binary_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(100 * 1024 * 1024), "100.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn usage_formatting_handles_unlimited() {
        assert_eq!(format_minutes_usage(12, Some(60)), "12/60 min");
        assert_eq!(format_minutes_usage(12, None), "12 min (unlimited)");
        assert_eq!(format_bytes_usage(2048, None), "2.0 KB (unlimited)");
        assert_eq!(format_bytes_usage(0, Some(1024)), "0 B/1.0 KB");
    }

    #[test]
    fn format_duration_picks_largest_unit() {
        assert_eq!(format_duration(Duration::seconds(42)), "42s");
        assert_eq!(format_duration(Duration::minutes(5)), "5m");
        assert_eq!(format_duration(Duration::hours(3)), "3h");
        assert_eq!(format_duration(Duration::days(2)), "2d");
    }
}
