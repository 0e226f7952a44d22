use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use cli::{Args, Commands};
use commands::utils::init_logging;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config_path = args.config.as_deref();

    match args.command {
        Commands::Run => commands::run::run_foreground(config_path, args.dry_run),
        Commands::Monitor => commands::run::run_monitor(config_path, args.dry_run),
        Commands::Status { json } => commands::control::status(config_path, json),
        Commands::SetSchedule { bedtime, wake } => {
            commands::control::set_schedule(config_path, args.dry_run, &bedtime, &wake)
        }
        Commands::Unlock => commands::control::unlock(config_path, args.dry_run),
        Commands::ResetUnlock => commands::control::reset_unlock(config_path, args.dry_run),
        Commands::TimezoneChanged => commands::control::timezone_changed(config_path, args.dry_run),
        Commands::Select {
            apps,
            categories,
            domains,
        } => commands::control::select(config_path, args.dry_run, apps, categories, domains),
        Commands::Init { output, force } => commands::init::init(output, force),
    }
}
