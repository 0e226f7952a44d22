use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use bedtime_shield::bedtime::{
    BedtimeEngine, CommandRestrictor, Condition, DryRunRestrictor, Evaluation, ExecutionContext,
    Restrictor, SystemClock, TableSunriseProvider,
};
use bedtime_shield::config::{self, EngineConfig};
use bedtime_shield::platform;
use bedtime_shield::store::{FileStore, KeyValueStore};

/// Initialize logging
pub fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let level = if verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
}

/// Load the engine config from `path`, or from the platform location
///
/// An explicitly named file must exist; the platform file is optional.
pub fn load_engine_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => config::load_config(path),
        None => {
            let path = platform::get_config_path()?;
            config::load_config_or_default(&path)
        }
    }
}

/// Build an engine wired to the shared state file and the system clock
pub fn build_engine(
    config_path: Option<&Path>,
    context: ExecutionContext,
    dry_run: bool,
) -> Result<BedtimeEngine> {
    let config = load_engine_config(config_path).context("Failed to load configuration")?;

    let store_path = match &config.store_path {
        Some(path) => path.clone(),
        None => platform::get_default_store_path()?,
    };
    tracing::debug!("Using state file {}", store_path.display());
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(store_path));

    let restrictor: Arc<dyn Restrictor> = match (&config.restrictor, dry_run) {
        (_, true) => Arc::new(DryRunRestrictor::new()),
        (Some(restrictor), false) => Arc::new(CommandRestrictor::from_config(restrictor)),
        (None, false) => {
            let restrictor = DryRunRestrictor::new();
            restrictor.set_unavailable(Some("no restrictor configured"));
            Arc::new(restrictor)
        }
    };

    let sunrise = (!config.sunrise.is_empty())
        .then(|| Arc::new(TableSunriseProvider::new(config.sunrise.clone())));

    let engine = BedtimeEngine::new(context, config, store, Arc::new(SystemClock), restrictor);

    Ok(match sunrise {
        Some(provider) => engine.with_sunrise_provider(provider),
        None => engine,
    })
}

pub fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

/// Print the outcome of an evaluation
pub fn print_evaluation(evaluation: &Evaluation) {
    println!("  In bedtime:     {}", yes_no(evaluation.in_bedtime));
    println!("  Unlocked today: {}", yes_no(evaluation.unlocked));

    if evaluation.applied() {
        println!("✓ Restriction {}", evaluation.restriction);
    } else {
        println!("  Restriction:    {} (wanted {})", evaluation.restriction, evaluation.target);
    }

    print_conditions(&evaluation.conditions);
}

pub fn print_conditions(conditions: &[Condition]) {
    if conditions.is_empty() {
        return;
    }

    println!();
    println!("Conditions:");
    for condition in conditions {
        println!("  ! {}", condition);
    }
}
