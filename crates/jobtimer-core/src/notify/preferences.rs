//! Notification preferences and their persistence.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{ConfigError, Result};

/// Storage key for the preferences document.
pub const PREFERENCES_KEY: &str = "timer-notification-preferences";

/// Independent toggles for each notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationPreferences {
    pub browser_notifications: bool,
    pub audio_alerts: bool,
    pub visual_indicators: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            browser_notifications: true,
            audio_alerts: true,
            visual_indicators: true,
        }
    }
}

impl NotificationPreferences {
    /// Stored toggles laid over the defaults one key at a time. Missing,
    /// unknown or non-boolean entries keep their default.
    pub fn from_stored(stored: &Map<String, Value>) -> Self {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| match stored.get(key) {
            Some(Value::Bool(value)) => *value,
            Some(other) => {
                warn!(key, value = %other, "ignoring non-boolean preference");
                default
            }
            None => default,
        };
        Self {
            browser_notifications: flag("browserNotifications", defaults.browser_notifications),
            audio_alerts: flag("audioAlerts", defaults.audio_alerts),
            visual_indicators: flag("visualIndicators", defaults.visual_indicators),
        }
    }

    /// Set one toggle by name (snake_case or camelCase).
    ///
    /// # Errors
    /// Unknown key or a value that is not a boolean.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let flag = value
            .parse::<bool>()
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected true or false, got '{value}'"),
            })?;
        match key {
            "browser_notifications" | "browserNotifications" => self.browser_notifications = flag,
            "audio_alerts" | "audioAlerts" => self.audio_alerts = flag,
            "visual_indicators" | "visualIndicators" => self.visual_indicators = flag,
            _ => return Err(ConfigError::UnknownKey(key.to_string()).into()),
        }
        Ok(())
    }
}

/// Key-value persistence for preferences.
pub trait PreferenceStore: Send + Sync {
    /// Stored preferences merged over the defaults. Never fails.
    fn load(&self) -> NotificationPreferences;

    fn save(&self, prefs: &NotificationPreferences) -> Result<()>;
}

/// Preferences kept as `<dir>/timer-notification-preferences.json`.
#[derive(Debug, Clone)]
pub struct FilePreferenceStore {
    path: PathBuf,
}

impl FilePreferenceStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(format!("{PREFERENCES_KEY}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn load(&self) -> NotificationPreferences {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "no stored preferences, using defaults");
                return NotificationPreferences::default();
            }
        };
        match serde_json::from_str::<Map<String, Value>>(&content) {
            Ok(stored) => NotificationPreferences::from_stored(&stored),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "unreadable preferences, using defaults");
                NotificationPreferences::default()
            }
        }
    }

    fn save(&self, prefs: &NotificationPreferences) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(prefs)?)?;
        Ok(())
    }
}

/// In-memory preference store.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    stored: Mutex<Option<NotificationPreferences>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn load(&self) -> NotificationPreferences {
        let stored = self.stored.lock().unwrap_or_else(|e| e.into_inner());
        (*stored).unwrap_or_default()
    }

    fn save(&self, prefs: &NotificationPreferences) -> Result<()> {
        *self.stored.lock().unwrap_or_else(|e| e.into_inner()) = Some(*prefs);
        Ok(())
    }
}
