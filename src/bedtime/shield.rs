use anyhow::Result;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::bedtime::restrictor::{Authorization, Restrictor, Selection, ShieldMode};
use crate::bedtime::status::Condition;

/// Derived restriction state; recomputed on every evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RestrictionState {
    #[default]
    Unknown,
    Shielded,
    Cleared,
}

impl RestrictionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Shielded => "shielded",
            Self::Cleared => "cleared",
        }
    }

    fn mode(&self) -> Option<ShieldMode> {
        match self {
            Self::Shielded => Some(ShieldMode::Shield),
            Self::Cleared => Some(ShieldMode::Clear),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for RestrictionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RestrictionState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "unknown" => Ok(Self::Unknown),
            "shielded" => Ok(Self::Shielded),
            "cleared" => Ok(Self::Cleared),
            other => anyhow::bail!("Invalid restriction state: {}", other),
        }
    }
}

/// Which independently scheduled runtime is evaluating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionContext {
    /// The long-running foreground process
    Foreground,
    /// The OS-triggered background monitor
    Monitor,
}

impl ExecutionContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Foreground => "foreground",
            Self::Monitor => "monitor",
        }
    }
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionContext {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "foreground" => Ok(Self::Foreground),
            "monitor" => Ok(Self::Monitor),
            other => anyhow::bail!("Invalid execution context: {}", other),
        }
    }
}

/// Most recent successful restrictor application by any context
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMarker {
    pub state: RestrictionState,
    pub context: ExecutionContext,
    pub at: DateTime<FixedOffset>,
}

impl AppliedMarker {
    /// Another context applied a different decision close to `at`
    ///
    /// Both contexts run the same code on the same store, so this only
    /// happens around a boundary instant and heals on the next tick.
    pub fn diverges_from(
        &self,
        context: ExecutionContext,
        state: RestrictionState,
        at: &DateTime<FixedOffset>,
        window: chrono::Duration,
    ) -> bool {
        self.context != context
            && self.state != state
            && (*at - self.at).abs() <= window
    }
}

/// Result of handing a decision to the restrictor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Skipped(Condition),
    Failed(Condition),
}

/// Decides Shielded/Cleared and drives the restrictor
///
/// The restrictor is called on every evaluation, even when the decision
/// matches what was applied last time. Redundant calls are harmless and
/// recover from missed or out-of-order events in either context.
#[derive(Debug, Default)]
pub struct ShieldController {
    state: RestrictionState,
    last_applied_at: Option<DateTime<FixedOffset>>,
}

impl ShieldController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shield iff inside the window and not unlocked
    pub fn decide(in_bedtime: bool, unlocked: bool) -> RestrictionState {
        if in_bedtime && !unlocked {
            RestrictionState::Shielded
        } else {
            RestrictionState::Cleared
        }
    }

    pub fn state(&self) -> RestrictionState {
        self.state
    }

    pub fn last_applied_at(&self) -> Option<DateTime<FixedOffset>> {
        self.last_applied_at
    }

    /// Hand `target` to the restrictor
    ///
    /// With no selection or no authorization the restrictor is not called and
    /// the controller falls back to Unknown. Failures also leave it Unknown;
    /// the next evaluation retries.
    pub fn apply(
        &mut self,
        restrictor: &dyn Restrictor,
        selection: &Selection,
        target: RestrictionState,
        now: DateTime<FixedOffset>,
    ) -> ApplyOutcome {
        let mode = match target.mode() {
            Some(mode) => mode,
            None => {
                // Unknown is never a decision; nothing to apply
                self.state = RestrictionState::Unknown;
                return ApplyOutcome::Skipped(Condition::NoSelection);
            }
        };

        if selection.is_empty() {
            tracing::debug!("No restriction targets selected, skipping restrictor");
            self.state = RestrictionState::Unknown;
            return ApplyOutcome::Skipped(Condition::NoSelection);
        }

        if let Authorization::Unavailable(detail) = restrictor.authorization() {
            tracing::warn!("Restrictor unavailable: {}", detail);
            self.state = RestrictionState::Unknown;
            return ApplyOutcome::Skipped(Condition::AuthorizationUnavailable { detail });
        }

        match restrictor.apply(selection, mode) {
            Ok(()) => {
                if self.state != target {
                    tracing::info!("Restriction {} -> {}", self.state, target);
                }
                self.state = target;
                self.last_applied_at = Some(now);
                ApplyOutcome::Applied
            }
            Err(e) => {
                tracing::error!("Failed to {} selection: {:#}", mode, e);
                self.state = RestrictionState::Unknown;
                ApplyOutcome::Failed(Condition::RestrictorFailed {
                    detail: format!("{:#}", e),
                })
            }
        }
    }
}
