pub mod config;
pub mod prefs;
pub mod sync;
pub mod timer;

use std::sync::Arc;

use jobtimer_core::notify::{FilePreferenceStore, TimerNotifier, TracingSink};
use jobtimer_core::store::SqliteStore;
use jobtimer_core::sync::{resolve_device_id, RetryQueue};
use jobtimer_core::{data_dir, Config, PersistenceOptions, TimerPersistence};

const RETRY_QUEUE_FILE: &str = "retry_queue.json";

/// Everything a timer or sync command needs, opened from the data directory.
pub struct Session {
    pub config: Config,
    pub persistence: TimerPersistence,
    pub notifier: TimerNotifier<TracingSink>,
}

impl Session {
    pub fn open() -> Result<Self, Box<dyn std::error::Error>> {
        let config = Config::load()?;
        let dir = data_dir()?;
        let device_id = resolve_device_id(&config, &dir)?;

        let mut queue = RetryQueue::with_path(config.sync.retry_policy(), dir.join(RETRY_QUEUE_FILE));
        queue.load()?;

        let store = Arc::new(SqliteStore::open()?);
        let persistence =
            TimerPersistence::new(store, PersistenceOptions::from_config(&config, device_id))
                .with_retry_queue(queue);
        let notifier = TimerNotifier::new(TracingSink, Box::new(FilePreferenceStore::new(&dir)));
        tracing::debug!(
            data_dir = %dir.display(),
            pending_retries = persistence.pending_retries(),
            "session opened"
        );

        Ok(Self {
            config,
            persistence,
            notifier,
        })
    }

    /// Persist the retry queue and release listeners.
    pub fn close(mut self) {
        self.persistence.shutdown();
    }
}

/// Parse a snake_case enum name with the type's serde representation.
pub fn parse_enum<T: serde::de::DeserializeOwned>(
    field: &str,
    value: &str,
) -> Result<T, Box<dyn std::error::Error>> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| format!("invalid {field}: {value}").into())
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
