use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::agent;
use crate::config::EXAMPLE_CONFIG;
use crate::platform::common::write_private;

use super::utils::{block_on, init_logging, load_config_and_init_logging};

/// Write the example configuration file
pub fn init(config_path: &Path, output: Option<PathBuf>, force: bool, verbose: bool) -> Result<()> {
    init_logging(verbose, "info");

    let output_path = output.unwrap_or_else(|| config_path.to_path_buf());

    if output_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            output_path.display()
        );
    }

    write_private(&output_path, EXAMPLE_CONFIG.as_bytes())
        .with_context(|| format!("Failed to write config file: {}", output_path.display()))?;

    println!("✓ Example configuration written to: {}", output_path.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the controller credentials and devices");
    println!("  2. Check the connection:");
    println!("     netquota --config {} clients", output_path.display());
    println!("  3. Start the daemon:");
    println!("     netquota --config {} run", output_path.display());

    Ok(())
}

/// Run the daemon in the foreground
pub fn run(config_path: &Path, verbose: bool) -> Result<()> {
    let config = load_config_and_init_logging(config_path, verbose)?;

    println!("Starting netquota in foreground mode...");
    println!("Press Ctrl+C to stop");
    println!();

    block_on(agent::run_daemon(config))?
}

/// Run one poll cycle and print its report
pub fn check_now(config_path: &Path, verbose: bool) -> Result<()> {
    let config = load_config_and_init_logging(config_path, verbose)?;

    println!("Polling controller...");

    let report = block_on(agent::run_once(&config))?.context("Poll cycle failed")?;

    println!("✓ Poll complete");
    println!("  Managed devices:  {}", report.managed);
    println!("  Online:           {}", report.observed);
    println!("  Blocks/unblocks:  {}", report.transitions);
    if report.failed > 0 {
        println!("  Failed:           {} (see log)", report.failed);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("netquota.yaml");
        std::fs::write(&path, "existing").unwrap();

        assert!(init(&path, None, false, false).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "existing");
    }
}
