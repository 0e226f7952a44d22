use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bedtime::schedule::{DEFAULT_BEDTIME, DEFAULT_WAKE, ScheduleConfig, TimeOfDay};

/// Longest allowed evaluation interval; longer makes transitions feel late
pub const MAX_TICK_INTERVAL_SECS: u64 = 60;

/// Longest allowed debounce window
pub const MAX_DEBOUNCE_MILLIS: u64 = 5_000;

/// Engine configuration, shared by the foreground process and the monitor
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Shared state file (defaults to the platform data directory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,

    /// Seconds between periodic evaluations
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Window for coalescing bursts of triggers
    #[serde(default = "default_debounce")]
    pub debounce_millis: u64,

    /// When a day-unlock stops counting
    #[serde(default)]
    pub rollover: RolloverPolicy,

    /// What to do when the device clock jumps backwards
    #[serde(default)]
    pub clock_rollback: ClockRollbackPolicy,

    /// Backward jumps smaller than this are ignored
    #[serde(default = "default_rollback_tolerance")]
    pub clock_rollback_tolerance_secs: u64,

    /// Schedule used until the user saves one
    #[serde(default)]
    pub default_schedule: DefaultSchedule,

    /// External helper that enforces restriction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restrictor: Option<RestrictorConfig>,

    /// Wake time per timezone, consulted after a timezone change
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub sunrise: HashMap<String, TimeOfDay>,
}

fn default_tick_interval() -> u64 {
    30
}

fn default_debounce() -> u64 {
    250
}

fn default_rollback_tolerance() -> u64 {
    120
}

impl EngineConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_millis)
    }

    pub fn default_schedule(&self) -> ScheduleConfig {
        ScheduleConfig::new(self.default_schedule.bedtime, self.default_schedule.wake)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            tick_interval_secs: default_tick_interval(),
            debounce_millis: default_debounce(),
            rollover: RolloverPolicy::default(),
            clock_rollback: ClockRollbackPolicy::default(),
            clock_rollback_tolerance_secs: default_rollback_tolerance(),
            default_schedule: DefaultSchedule::default(),
            restrictor: None,
            sunrise: HashMap::new(),
        }
    }
}

/// When an unlock granted earlier in the day stops suppressing restriction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloverPolicy {
    /// Expire when a new bedtime period begins, even on the same calendar day
    #[default]
    BedtimeBoundary,
    /// Expire only when the calendar day changes
    CalendarDay,
}

/// Reaction to the device clock moving backwards
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockRollbackPolicy {
    /// Drop the day-unlock, as for a timezone change
    #[default]
    Invalidate,
    /// Keep the day-unlock
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct DefaultSchedule {
    pub bedtime: TimeOfDay,
    pub wake: TimeOfDay,
}

impl Default for DefaultSchedule {
    fn default() -> Self {
        Self {
            bedtime: DEFAULT_BEDTIME,
            wake: DEFAULT_WAKE,
        }
    }
}

/// External restrictor helper
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RestrictorConfig {
    /// Executable path or name on PATH
    pub command: PathBuf,

    /// Arguments placed before the mode and targets
    #[serde(default)]
    pub args: Vec<String>,
}

/// Load configuration from a YAML file
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: EngineConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse YAML config file: {}", path.display()))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load configuration, using defaults when the file does not exist
pub fn load_config_or_default(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        tracing::debug!("No config at {}, using defaults", path.display());
        return Ok(EngineConfig::default());
    }

    load_config(path)
}

/// Validate configuration
pub fn validate_config(config: &EngineConfig) -> Result<()> {
    if config.tick_interval_secs == 0 || config.tick_interval_secs > MAX_TICK_INTERVAL_SECS {
        anyhow::bail!(
            "tick_interval_secs must be between 1 and {}, got {}",
            MAX_TICK_INTERVAL_SECS,
            config.tick_interval_secs
        );
    }

    if config.debounce_millis > MAX_DEBOUNCE_MILLIS {
        anyhow::bail!(
            "debounce_millis must be at most {}, got {}",
            MAX_DEBOUNCE_MILLIS,
            config.debounce_millis
        );
    }

    if let Some(restrictor) = &config.restrictor {
        if restrictor.command.as_os_str().is_empty() {
            anyhow::bail!("restrictor.command cannot be empty");
        }
    }

    if config.sunrise.keys().any(|tz| tz.trim().is_empty()) {
        anyhow::bail!("sunrise entries must name a timezone");
    }

    Ok(())
}

/// Example configuration file content
pub const EXAMPLE_CONFIG: &str = include_str!("../example-config.yaml");
