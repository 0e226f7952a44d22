// Outbound interface to whatever enforces restriction at the OS level
//
// The engine decides *whether* to shield; a Restrictor does the shielding.
// Calls are repeated on every evaluation, so implementations must treat a
// redundant Shield or Clear as a no-op.

mod command;

pub use command::CommandRestrictor;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;

/// What to restrict
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Selection {
    #[serde(default)]
    pub applications: Vec<String>,

    #[serde(default)]
    pub categories: Vec<String>,

    #[serde(default)]
    pub web_domains: Vec<String>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.applications.is_empty() && self.categories.is_empty() && self.web_domains.is_empty()
    }

    /// Total number of targets
    pub fn len(&self) -> usize {
        self.applications.len() + self.categories.len() + self.web_domains.len()
    }
}

/// Direction of a Restrictor call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShieldMode {
    Shield,
    Clear,
}

impl ShieldMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shield => "shield",
            Self::Clear => "clear",
        }
    }
}

impl fmt::Display for ShieldMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the Restrictor may currently be invoked
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Granted,
    Unavailable(String),
}

/// Enforces or lifts restriction
pub trait Restrictor: Send + Sync {
    /// Check authorization without side effects
    fn authorization(&self) -> Authorization;

    /// Apply `mode` to `selection`; must be safe to call redundantly
    fn apply(&self, selection: &Selection, mode: ShieldMode) -> Result<()>;
}

/// A call recorded by [`DryRunRestrictor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedCall {
    pub selection: Selection,
    pub mode: ShieldMode,
}

/// Restrictor that only logs and records calls
///
/// Used by `--dry-run` and as a test double. Failure and missing
/// authorization can be simulated.
#[derive(Debug, Default)]
pub struct DryRunRestrictor {
    calls: Mutex<Vec<AppliedCall>>,
    fail_next: Mutex<u32>,
    unavailable: Mutex<Option<String>>,
}

impl DryRunRestrictor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<AppliedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn last_mode(&self) -> Option<ShieldMode> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .map(|c| c.mode)
    }

    /// Make the next `count` calls fail
    pub fn fail_next(&self, count: u32) {
        *self.fail_next.lock().unwrap_or_else(|e| e.into_inner()) = count;
    }

    /// Report authorization as unavailable (or restore it with `None`)
    pub fn set_unavailable(&self, reason: Option<&str>) {
        *self.unavailable.lock().unwrap_or_else(|e| e.into_inner()) = reason.map(str::to_string);
    }
}

impl Restrictor for DryRunRestrictor {
    fn authorization(&self) -> Authorization {
        match self.unavailable.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            Some(reason) => Authorization::Unavailable(reason.clone()),
            None => Authorization::Granted,
        }
    }

    fn apply(&self, selection: &Selection, mode: ShieldMode) -> Result<()> {
        {
            let mut fail_next = self.fail_next.lock().unwrap_or_else(|e| e.into_inner());
            if *fail_next > 0 {
                *fail_next -= 1;
                anyhow::bail!("Simulated restrictor failure");
            }
        }

        tracing::info!("[dry-run] Would {} {} target(s)", mode, selection.len());
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(AppliedCall {
                selection: selection.clone(),
                mode,
            });
        Ok(())
    }
}
