use clap::Subcommand;
use jobtimer_core::Config;
use serde_json::json;

use super::print_json;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Get a config value
    Get {
        /// Config key (e.g. "sync.strategy", "history.max_entries")
        key: String,
    },
    /// Set a config value
    Set {
        /// Config key
        key: String,
        /// New value
        value: String,
    },
    /// List all config values
    List,
    /// Show the effective sync policy derived from the config
    Policy,
    /// Reset config to defaults
    Reset,
}

pub fn run(action: ConfigAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config
                .get(&key)
                .ok_or_else(|| format!("unknown config key: {key}"))?;
            println!("{value}");
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            print_json(&json!({ "key": key, "value": config.get(&key) }))?;
        }
        ConfigAction::List => print_json(&Config::load()?)?,
        ConfigAction::Policy => {
            let config = Config::load()?;
            let retry = config.sync.retry_policy();
            print_json(&json!({
                "strategy": config.sync.strategy,
                "drift_threshold_secs": config.sync.conflict_policy().drift_threshold_secs,
                "max_retries": retry.max_retries,
                "retry_delay_ms": retry.retry_delay.as_millis() as u64,
                "max_retry_delay_ms": retry.max_delay.as_millis() as u64,
            }))?;
        }
        ConfigAction::Reset => {
            Config::default().save()?;
            print_json(&json!({ "reset": true }))?;
        }
    }
    Ok(())
}
