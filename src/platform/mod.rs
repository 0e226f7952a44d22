pub mod common;

use anyhow::Result;
use std::path::PathBuf;

const APP_DIR: &str = "bedtime-shield";

/// Get the platform-specific engine config file path
pub fn get_config_path() -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        Ok(PathBuf::from("/etc/bedtime-shield/config.yaml"))
    }

    #[cfg(target_os = "macos")]
    {
        Ok(PathBuf::from(
            "/Library/Application Support/bedtime-shield/config.yaml",
        ))
    }

    #[cfg(target_os = "windows")]
    {
        let mut path = PathBuf::from(
            std::env::var("ProgramData")
                .unwrap_or_else(|_| "C:\\ProgramData".to_string()),
        );
        path.push(APP_DIR);
        path.push("config.yaml");
        Ok(path)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        anyhow::bail!("Unsupported operating system");
    }
}

/// Get the default path of the shared state file
///
/// Prefers a system-wide location when it exists so that a monitor running
/// as a service and the foreground process see the same file; falls back to
/// the per-user data directory.
pub fn get_default_store_path() -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let system_path = PathBuf::from("/var/lib/bedtime-shield/state.json");
        if system_path.parent().map(|p| p.exists()).unwrap_or(false) {
            return Ok(system_path);
        }
    }

    #[cfg(target_os = "macos")]
    {
        let system_path = PathBuf::from("/Library/Application Support/bedtime-shield/state.json");
        if system_path.parent().map(|p| p.exists()).unwrap_or(false) {
            return Ok(system_path);
        }
    }

    if let Some(dirs) = directories::ProjectDirs::from("", "", APP_DIR) {
        let mut path = dirs.data_local_dir().to_path_buf();
        path.push("state.json");
        return Ok(path);
    }

    anyhow::bail!("Could not determine state file location")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_store_path_is_json_file() {
        let path = get_default_store_path().unwrap();
        assert_eq!(path.file_name().and_then(|n| n.to_str()), Some("state.json"));
    }

    #[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
    #[test]
    fn test_config_path_is_yaml() {
        let path = get_config_path().unwrap();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("yaml"));
    }
}
