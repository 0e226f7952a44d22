use anyhow::{Context, Result};
use std::path::PathBuf;

use bedtime_shield::config::EXAMPLE_CONFIG;
use bedtime_shield::platform;
use bedtime_shield::platform::common::ensure_directory_exists;

/// Write the example configuration file
pub fn init(output: Option<PathBuf>, force: bool) -> Result<()> {
    let output_path = match output {
        Some(path) => path,
        None => platform::get_config_path()?,
    };

    if output_path.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists: {}\nUse --force to overwrite",
            output_path.display()
        );
    }

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_directory_exists(parent)?;
        }
    }

    std::fs::write(&output_path, EXAMPLE_CONFIG)
        .with_context(|| format!("Failed to write config file: {}", output_path.display()))?;

    println!("✓ Created configuration file: {}", output_path.display());
    println!("\nEdit this file to set the restrictor helper and default schedule.");
    println!("Use the same file for both `bedtime-shield run` and `bedtime-shield monitor`.");

    Ok(())
}
