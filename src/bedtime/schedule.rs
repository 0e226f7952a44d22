use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Minutes in a day; minutes-since-midnight values are in `0..MINUTES_PER_DAY`
pub const MINUTES_PER_DAY: u16 = 24 * 60;

/// Default bedtime used when no schedule has been saved
pub const DEFAULT_BEDTIME: TimeOfDay = TimeOfDay { hour: 22, minute: 0 };

/// Default wake time used when no schedule has been saved
pub const DEFAULT_WAKE: TimeOfDay = TimeOfDay { hour: 7, minute: 0 };

/// A date-free wall-clock time with minute precision
///
/// Serialized as `HH:MM`, which is also the format used in the state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    /// Create a time of day, rejecting out-of-range values
    pub fn new(hour: u8, minute: u8) -> Result<Self> {
        if hour > 23 {
            anyhow::bail!("Hour must be between 0 and 23, got {}", hour);
        }
        if minute > 59 {
            anyhow::bail!("Minute must be between 0 and 59, got {}", minute);
        }
        Ok(Self { hour, minute })
    }

    /// Build from minutes since midnight (wraps modulo one day)
    pub fn from_minutes(minutes: u16) -> Self {
        let minutes = minutes % MINUTES_PER_DAY;
        Self {
            hour: (minutes / 60) as u8,
            minute: (minutes % 60) as u8,
        }
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    /// Minutes since midnight (0-1439)
    pub fn minutes(&self) -> u16 {
        self.hour as u16 * 60 + self.minute as u16
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (hour, minute) = s
            .trim()
            .split_once(':')
            .with_context(|| format!("Invalid time '{}', expected HH:MM", s))?;

        let hour: u8 = hour
            .parse()
            .with_context(|| format!("Invalid hour in time '{}'", s))?;
        let minute: u8 = minute
            .parse()
            .with_context(|| format!("Invalid minute in time '{}'", s))?;

        Self::new(hour, minute)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

/// Persisted bedtime schedule
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ScheduleConfig {
    /// Start of the bedtime window (inclusive)
    pub bedtime: TimeOfDay,

    /// End of the bedtime window (exclusive)
    pub wake: TimeOfDay,

    /// Timezone identifier active when the schedule was last saved
    #[serde(default)]
    pub timezone_id: Option<String>,
}

impl ScheduleConfig {
    pub fn new(bedtime: TimeOfDay, wake: TimeOfDay) -> Self {
        Self {
            bedtime,
            wake,
            timezone_id: None,
        }
    }

    /// Whether the window wraps past midnight
    pub fn crosses_midnight(&self) -> bool {
        self.bedtime.minutes() > self.wake.minutes()
    }

    /// A schedule whose bedtime equals its wake time never activates
    pub fn is_degenerate(&self) -> bool {
        self.bedtime == self.wake
    }

    /// Check the schedule and return warnings for the configuration layer
    ///
    /// Warnings never block saving; a degenerate schedule is stored as-is and
    /// evaluates as permanently inactive.
    pub fn validate(&self) -> Vec<ScheduleWarning> {
        let mut warnings = Vec::new();
        if self.is_degenerate() {
            warnings.push(ScheduleWarning::Degenerate { at: self.bedtime });
        }
        warnings
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BEDTIME, DEFAULT_WAKE)
    }
}

/// Non-blocking problems found in a schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleWarning {
    /// Bedtime equals wake time; the window is never active
    Degenerate { at: TimeOfDay },
}

impl fmt::Display for ScheduleWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Degenerate { at } => write!(
                f,
                "bedtime and wake time are both {}; restriction will never activate",
                at
            ),
        }
    }
}
