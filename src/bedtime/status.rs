use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use std::fmt;

use crate::bedtime::schedule::ScheduleConfig;
use crate::bedtime::shield::{AppliedMarker, ExecutionContext, RestrictionState};

/// Non-fatal problems surfaced to the status display
///
/// None of these stop the engine; each degrades toward "cleared" or
/// "retry on the next tick".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// No schedule saved yet; built-in defaults are in effect
    ConfigurationMissing,

    /// The shared store could not be read or held corrupt data
    PersistenceUnavailable { detail: String },

    /// The restrictor cannot be invoked
    AuthorizationUnavailable { detail: String },

    /// Nothing has been selected for restriction
    NoSelection,

    /// The last restrictor call failed; it is retried on the next tick
    RestrictorFailed { detail: String },

    /// Another context recently applied a different state
    StateDivergence {
        other_context: ExecutionContext,
        other_state: RestrictionState,
    },

    /// Bedtime equals wake time, so the window never activates
    DegenerateSchedule,
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigurationMissing => write!(f, "no schedule saved, using defaults"),
            Self::PersistenceUnavailable { detail } => {
                write!(f, "state store unavailable: {}", detail)
            }
            Self::AuthorizationUnavailable { detail } => {
                write!(f, "restrictor not authorized: {}", detail)
            }
            Self::NoSelection => write!(f, "no apps, categories or domains selected"),
            Self::RestrictorFailed { detail } => write!(f, "restrictor failed: {}", detail),
            Self::StateDivergence {
                other_context,
                other_state,
            } => write!(
                f,
                "{} context recently applied {}",
                other_context, other_state
            ),
            Self::DegenerateSchedule => write!(f, "bedtime equals wake time"),
        }
    }
}

/// Answer to a status query
#[derive(Debug, Clone, Serialize)]
pub struct BedtimeStatus {
    pub in_bedtime: bool,
    pub unlocked_today: bool,

    /// State this context last applied (Unknown before the first
    /// successful application)
    pub restriction: RestrictionState,

    pub last_applied_at: Option<DateTime<FixedOffset>>,

    /// Latest application by any context, from the shared store
    pub last_applied: Option<AppliedMarker>,

    pub schedule: ScheduleConfig,
    pub timezone_id: String,
    pub conditions: Vec<Condition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_serializes_with_kind_tag() {
        let json = serde_json::to_string(&Condition::NoSelection).unwrap();
        assert_eq!(json, r#"{"kind":"no_selection"}"#);

        let json = serde_json::to_string(&Condition::StateDivergence {
            other_context: ExecutionContext::Monitor,
            other_state: RestrictionState::Cleared,
        })
        .unwrap();
        assert!(json.contains(r#""kind":"state_divergence""#));
        assert!(json.contains(r#""other_context":"monitor""#));
    }

    #[test]
    fn test_condition_display() {
        let condition = Condition::RestrictorFailed {
            detail: "exit 3".to_string(),
        };
        assert_eq!(condition.to_string(), "restrictor failed: exit 3");
    }
}
