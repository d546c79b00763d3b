mod config;

pub use config::{Config, DeviceConfig, HistoryConfig, NotificationsConfig, SyncConfig};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/jobtimer[-dev]/` based on JOBTIMER_ENV.
///
/// Set JOBTIMER_ENV=dev to use the development data directory.
/// JOBTIMER_HOME overrides the location entirely.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("JOBTIMER_HOME") {
        Some(home) => PathBuf::from(home),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("JOBTIMER_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("jobtimer-dev")
            } else {
                base_dir.join("jobtimer")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
