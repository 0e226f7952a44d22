use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

use super::{Authorization, Restrictor, Selection, ShieldMode};
use crate::config::RestrictorConfig;

/// Restrictor that delegates to an external helper program
///
/// The helper is invoked as
/// `<command> [args...] <shield|clear> [--app ID]... [--category ID]... [--domain NAME]...`
/// and must exit successfully when the requested state is (already) in effect.
#[derive(Debug, Clone)]
pub struct CommandRestrictor {
    command: PathBuf,
    args: Vec<String>,
}

impl CommandRestrictor {
    pub fn new(command: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    pub fn from_config(config: &RestrictorConfig) -> Self {
        Self::new(&config.command, config.args.clone())
    }

    /// Full argument list for one call
    fn build_args(&self, selection: &Selection, mode: ShieldMode) -> Vec<String> {
        let mut args = self.args.clone();
        args.push(mode.as_str().to_string());

        for app in &selection.applications {
            args.push("--app".to_string());
            args.push(app.clone());
        }
        for category in &selection.categories {
            args.push("--category".to_string());
            args.push(category.clone());
        }
        for domain in &selection.web_domains {
            args.push("--domain".to_string());
            args.push(domain.clone());
        }

        args
    }
}

impl Restrictor for CommandRestrictor {
    fn authorization(&self) -> Authorization {
        match resolve_executable(&self.command) {
            Some(_) => Authorization::Granted,
            None => Authorization::Unavailable(format!(
                "restrictor helper not found: {}",
                self.command.display()
            )),
        }
    }

    fn apply(&self, selection: &Selection, mode: ShieldMode) -> Result<()> {
        let args = self.build_args(selection, mode);

        let output = Command::new(&self.command)
            .args(&args)
            .output()
            .with_context(|| format!("Failed to run restrictor helper: {}", self.command.display()))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "Restrictor helper {} exited with {}: {}",
                self.command.display(),
                output.status,
                stderr.trim()
            )
        }
    }
}

/// Find an executable by path, or by name on `PATH`
fn resolve_executable(command: &Path) -> Option<PathBuf> {
    if command.as_os_str().is_empty() {
        return None;
    }

    if command.components().count() > 1 || command.is_absolute() {
        return command.is_file().then(|| command.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .flat_map(|dir| {
            let candidate = dir.join(command);
            #[cfg(windows)]
            let candidates = vec![candidate.with_extension("exe"), candidate];
            #[cfg(not(windows))]
            let candidates = vec![candidate];
            candidates
        })
        .find(|candidate| candidate.is_file())
}
