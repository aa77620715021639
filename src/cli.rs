use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Network quota enforcer for UniFi networks
///
/// Tracks per-device active time and data usage through the UniFi
/// controller and blocks devices that exceed their daily time-block limits.
#[derive(Parser, Debug)]
#[command(name = "netquota")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "netquota.yaml", global = true)]
    pub config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write an example configuration file
    Init {
        /// Output path (defaults to --config)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Run the quota daemon in the foreground
    Run,
    /// Run a single poll cycle now
    CheckNow,
    /// Show device states and today's usage
    Status,
    /// Show daily usage totals for a device
    History {
        /// Device MAC address
        mac: String,

        /// Number of days to show
        #[arg(long, default_value = "30")]
        days: u32,
    },
    /// Block a device until it is manually unblocked
    Block {
        /// Device MAC address
        mac: String,
    },
    /// Remove any block from a device
    Unblock {
        /// Device MAC address
        mac: String,
    },
    /// Grant bonus minutes in the device's current time block
    AddTime {
        /// Device MAC address
        mac: String,

        /// Minutes to add
        minutes: u32,
    },
    /// Grant bonus data in the device's current time block
    AddData {
        /// Device MAC address
        mac: String,

        /// Amount to add
        amount: u64,

        /// Unit of the amount
        #[arg(long, value_enum, ignore_case = true, default_value = "mb")]
        unit: DataUnit,
    },
    /// List clients connected to the controller
    Clients,
}

/// Data size units (powers of 1024)
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DataUnit {
    Bytes,
    Kb,
    Mb,
    Gb,
}

impl DataUnit {
    pub fn multiplier(self) -> u64 {
        match self {
            Self::Bytes => 1,
            Self::Kb => 1024,
            Self::Mb => 1024 * 1024,
            Self::Gb => 1024 * 1024 * 1024,
        }
    }

    /// Convert `amount` of this unit to bytes, `None` on overflow
    pub fn to_bytes(self, amount: u64) -> Option<u64> {
        amount.checked_mul(self.multiplier())
    }
}
