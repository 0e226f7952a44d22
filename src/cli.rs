use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Bedtime Shield
///
/// Applies device restriction during a nightly bedtime window unless today
/// has been unlocked. Runs as a foreground process (`run`) and as a
/// periodically triggered monitor (`monitor`) that share one state file.
#[derive(Parser, Debug)]
#[command(name = "bedtime-shield")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file (defaults to the platform location)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log restrictor calls instead of running the helper
    #[arg(short = 'n', long, global = true)]
    pub dry_run: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the foreground process, evaluating on an interval until Ctrl-C
    Run,
    /// Evaluate once as the background monitor and exit
    Monitor,
    /// Show the current bedtime and unlock state
    Status {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Save a new bedtime schedule
    SetSchedule {
        /// Start of the bedtime window (HH:MM)
        #[arg(long)]
        bedtime: String,

        /// End of the bedtime window (HH:MM)
        #[arg(long)]
        wake: String,
    },
    /// Record a successful daylight verification for today
    Unlock,
    /// Clear today's unlock
    ResetUnlock,
    /// Check for a system timezone or clock change
    TimezoneChanged,
    /// Choose what is restricted during bedtime
    Select {
        /// Application identifier (repeatable)
        #[arg(long = "app")]
        apps: Vec<String>,

        /// Application category (repeatable)
        #[arg(long = "category")]
        categories: Vec<String>,

        /// Web domain (repeatable)
        #[arg(long = "domain")]
        domains: Vec<String>,
    },
    /// Create a configuration file with example settings
    Init {
        /// Output path (defaults to the platform config location)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}
