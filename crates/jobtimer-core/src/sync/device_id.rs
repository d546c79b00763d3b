// Device identity stamped on every timer this installation writes.
// Stored form: "jobtimer-<uuid>", one line in device_id.txt.

use std::fs;
use std::path::Path;

use uuid::Uuid;

use crate::storage::{data_dir, Config};

const DEVICE_ID_FILE: &str = "device_id.txt";
const DEVICE_ID_PREFIX: &str = "jobtimer-";

#[derive(Debug, thiserror::Error)]
pub enum DeviceIdError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid device ID format: {0}")]
    InvalidFormat(String),

    #[error("Data directory unavailable: {0}")]
    NoDataDir(String),
}

fn is_valid(device_id: &str) -> bool {
    device_id
        .strip_prefix(DEVICE_ID_PREFIX)
        .is_some_and(|rest| Uuid::parse_str(rest).is_ok())
}

/// Read the device id kept in `dir`, creating one on first use.
pub fn get_or_create_device_id_at(dir: &Path) -> Result<String, DeviceIdError> {
    let file = dir.join(DEVICE_ID_FILE);

    match fs::read_to_string(&file) {
        Ok(content) => {
            let stored = content.trim();
            if is_valid(stored) {
                Ok(stored.to_string())
            } else {
                Err(DeviceIdError::InvalidFormat(stored.to_string()))
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let device_id = format!("{DEVICE_ID_PREFIX}{}", Uuid::new_v4());
            fs::create_dir_all(dir)?;
            fs::write(&file, format!("{device_id}\n"))?;
            tracing::info!(device_id = %device_id, "new device id created");
            Ok(device_id)
        }
        Err(e) => Err(e.into()),
    }
}

/// Device id from the jobtimer data directory.
pub fn get_or_create_device_id() -> Result<String, DeviceIdError> {
    let dir = data_dir().map_err(|e| DeviceIdError::NoDataDir(e.to_string()))?;
    get_or_create_device_id_at(&dir)
}

/// The id pinned in `[device] device_id`, else the stored one.
///
/// A pinned id may be any non-blank string so several machines can share
/// one identity on purpose.
pub fn resolve_device_id(config: &Config, dir: &Path) -> Result<String, DeviceIdError> {
    match config.device.device_id.as_deref().map(str::trim) {
        Some("") => Err(DeviceIdError::InvalidFormat(String::new())),
        Some(pinned) => Ok(pinned.to_string()),
        None => get_or_create_device_id_at(dir),
    }
}

/// Fresh id for one timer session on this device.
pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}
