use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;

use crate::agent::{self, local_now};
use crate::cli::DataUnit;
use crate::config::Config;
use crate::controller::DeviceControl;
use crate::quota::{BlockPhase, Bonus, DeviceState, Enforcer, UsageSummary};
use crate::store::Store;

use super::utils::{
    block_on, format_bytes, format_bytes_usage, format_duration, format_minutes_usage,
    load_config_and_init_logging,
};

/// Open the store and controller and make the configured devices known
async fn connect_enforcer(config: &Config) -> Result<Enforcer> {
    let store = agent::open_store(config)?;
    let controller = agent::connect_controller(config).await?;

    for device in &config.devices {
        store.save_device_config(device).await?;
    }

    Ok(Enforcer::new(store, controller, config.tracker.call_timeout()))
}

/// Show device states and today's usage
pub fn status(config_path: &Path, verbose: bool) -> Result<()> {
    let config = load_config_and_init_logging(config_path, verbose)?;

    println!("netquota status");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if config.devices.is_empty() {
        println!("No devices configured");
        return Ok(());
    }

    let summaries = block_on(async {
        let store = agent::open_store(&config)?;
        let now = local_now();

        let mut summaries = Vec::with_capacity(config.devices.len());
        for device in &config.devices {
            summaries.push(UsageSummary::build(store.as_ref(), device, now).await?);
        }
        Ok::<_, anyhow::Error>(summaries)
    })??;

    for summary in &summaries {
        print_summary(summary);
    }

    Ok(())
}

fn print_summary(summary: &UsageSummary) {
    println!();
    println!("{} ({})", summary.name, summary.mac);

    if !summary.enabled {
        println!("  Tracking:    disabled");
    }

    println!("  State:       {}", describe_state(&summary.device_state));

    match &summary.current {
        Some(current) => {
            println!(
                "  Current:     {}-{}  {}, {}",
                current.start,
                current.end,
                format_minutes_usage(current.used_minutes, current.effective_limit_minutes()),
                format_bytes_usage(current.used_bytes, current.effective_limit_bytes())
            );
            if current.bonus_minutes > 0 || current.bonus_bytes > 0 {
                println!(
                    "  Bonus:       {} min, {}",
                    current.bonus_minutes,
                    format_bytes(current.bonus_bytes)
                );
            }
            let remaining_minutes = current
                .remaining_minutes()
                .map(|m| format!("{} min", m))
                .unwrap_or_else(|| "unlimited".to_string());
            let remaining_bytes = current
                .remaining_bytes()
                .map(format_bytes)
                .unwrap_or_else(|| "unlimited".to_string());
            println!("  Remaining:   {}, {}", remaining_minutes, remaining_bytes);
        }
        None => println!("  Current:     outside time blocks"),
    }

    println!(
        "  Today:       {} min, {}",
        summary.total_minutes,
        format_bytes(summary.total_bytes)
    );

    for block in &summary.blocks {
        let marker = match block.phase {
            BlockPhase::Active => "▶",
            BlockPhase::Completed => "✓",
            BlockPhase::Upcoming => " ",
        };
        println!(
            "    {} {}-{}  {} min, {}",
            marker,
            block.usage.start,
            block.usage.end,
            block.usage.used_minutes,
            format_bytes(block.usage.used_bytes)
        );
    }
}

fn describe_state(state: &DeviceState) -> String {
    if state.is_blocked() {
        match state.blocked_at {
            Some(at) => format!("blocked ({}) for {}", state.state, format_duration(Utc::now() - at)),
            None => format!("blocked ({})", state.state),
        }
    } else {
        "unblocked".to_string()
    }
}

/// Show daily usage totals for a device
pub fn history(config_path: &Path, mac: &str, days: u32, verbose: bool) -> Result<()> {
    let config = load_config_and_init_logging(config_path, verbose)?;

    let entries = block_on(async {
        let store = agent::open_store(&config)?;
        store.usage_history(mac, days, local_now().date()).await
    })??;

    println!("Usage history for {} (last {} days)", mac, days);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if entries.is_empty() {
        println!("No usage recorded");
        return Ok(());
    }

    for entry in &entries {
        println!(
            "{}  {:>5} min  {:>10}  ({} blocks)",
            entry.date,
            entry.total_minutes,
            format_bytes(entry.total_bytes),
            entry.blocks.len()
        );
    }

    Ok(())
}

/// Block a device until manually unblocked
pub fn block(config_path: &Path, mac: &str, verbose: bool) -> Result<()> {
    let config = load_config_and_init_logging(config_path, verbose)?;

    let changed = block_on(async {
        let enforcer = connect_enforcer(&config).await?;
        enforcer.manual_block(mac).await.context("Failed to block device")
    })??;

    if changed {
        println!("✓ {} blocked", mac);
    } else {
        println!("✓ {} was already blocked manually", mac);
    }

    Ok(())
}

/// Remove any block from a device
pub fn unblock(config_path: &Path, mac: &str, verbose: bool) -> Result<()> {
    let config = load_config_and_init_logging(config_path, verbose)?;

    let changed = block_on(async {
        let enforcer = connect_enforcer(&config).await?;
        enforcer
            .manual_unblock(mac, local_now())
            .await
            .context("Failed to unblock device")
    })??;

    if changed {
        println!("✓ {} unblocked", mac);
        println!("  It is blocked again on the next poll if its time block is still over its limit.");
    } else {
        println!("✓ {} was not blocked", mac);
    }

    Ok(())
}

/// Grant bonus minutes in the current time block
pub fn add_time(config_path: &Path, mac: &str, minutes: u32, verbose: bool) -> Result<()> {
    grant(config_path, mac, Bonus::minutes(minutes), verbose)
}

/// Grant bonus data in the current time block
pub fn add_data(config_path: &Path, mac: &str, amount: u64, unit: DataUnit, verbose: bool) -> Result<()> {
    let bytes = unit
        .to_bytes(amount)
        .with_context(|| format!("Amount too large: {} {:?}", amount, unit))?;
    grant(config_path, mac, Bonus::bytes(bytes), verbose)
}

fn grant(config_path: &Path, mac: &str, bonus: Bonus, verbose: bool) -> Result<()> {
    if bonus.is_empty() {
        anyhow::bail!("Bonus must be greater than zero");
    }

    let config = load_config_and_init_logging(config_path, verbose)?;

    let usage = block_on(async {
        let enforcer = connect_enforcer(&config).await?;
        enforcer
            .grant_bonus(mac, bonus, local_now())
            .await
            .context("Failed to grant bonus")
    })??;

    println!("✓ Bonus granted for {} ({}-{})", mac, usage.start, usage.end);
    println!(
        "  Time:  {}",
        format_minutes_usage(usage.used_minutes, usage.effective_limit_minutes())
    );
    println!(
        "  Data:  {}",
        format_bytes_usage(usage.used_bytes, usage.effective_limit_bytes())
    );
    if usage.state.is_blocked() {
        println!("  Still blocked: {}", usage.state);
    }

    Ok(())
}

/// List clients connected to the controller
pub fn clients(config_path: &Path, verbose: bool) -> Result<()> {
    let config = load_config_and_init_logging(config_path, verbose)?;

    let clients = block_on(async {
        let controller = agent::connect_controller(&config).await?;
        controller.list_connected_clients().await
    })??;

    let managed: HashMap<String, &str> = config
        .devices
        .iter()
        .map(|d| (d.normalized_mac(), d.display_name()))
        .collect();

    println!("Connected clients ({})", clients.len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    for client in &clients {
        let mac = client.mac.to_lowercase();
        let tag = match managed.get(&mac) {
            Some(name) => format!("managed as {}", name),
            None => String::new(),
        };
        println!(
            "{}  {:<24} {:<15} {:>10}  {}{}",
            mac,
            client.label(),
            client.ip.as_deref().unwrap_or("-"),
            format_bytes(client.total_bytes()),
            if client.blocked { "BLOCKED " } else { "" },
            tag
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::EnforcementState;

    #[test]
    fn describe_state_shows_reason() {
        let mut state = DeviceState::new("aa:bb:cc:00:11:22");
        assert_eq!(describe_state(&state), "unblocked");

        state.transition(EnforcementState::BlockedByData);
        assert!(describe_state(&state).starts_with("blocked (data_limit) for "));
    }
}
