pub mod daemon;
pub mod devices;
pub mod utils;

use anyhow::Result;

use crate::cli::{Args, Commands};

/// Dispatch a parsed command line
pub fn run_command(args: Args) -> Result<()> {
    let config = args.config.as_path();
    let verbose = args.verbose;

    match args.command {
        Commands::Init { output, force } => daemon::init(config, output, force, verbose),
        Commands::Run => daemon::run(config, verbose),
        Commands::CheckNow => daemon::check_now(config, verbose),
        Commands::Status => devices::status(config, verbose),
        Commands::History { mac, days } => devices::history(config, &mac, days, verbose),
        Commands::Block { mac } => devices::block(config, &mac, verbose),
        Commands::Unblock { mac } => devices::unblock(config, &mac, verbose),
        Commands::AddTime { mac, minutes } => devices::add_time(config, &mac, minutes, verbose),
        Commands::AddData { mac, amount, unit } => {
            devices::add_data(config, &mac, amount, unit, verbose)
        }
        Commands::Clients => devices::clients(config, verbose),
    }
}
