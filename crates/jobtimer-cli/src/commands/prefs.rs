use clap::Subcommand;
use jobtimer_core::data_dir;
use jobtimer_core::notify::{FilePreferenceStore, PreferenceStore};

use super::print_json;

#[derive(Subcommand)]
pub enum PrefsAction {
    /// Show notification preferences
    Show,
    /// Toggle one channel
    Set {
        /// browser_notifications, audio_alerts or visual_indicators
        key: String,
        /// true or false
        value: String,
    },
}

pub fn run(action: PrefsAction) -> Result<(), Box<dyn std::error::Error>> {
    let store = FilePreferenceStore::new(&data_dir()?);
    match action {
        PrefsAction::Show => print_json(&store.load())?,
        PrefsAction::Set { key, value } => {
            let mut prefs = store.load();
            prefs.set(&key, &value)?;
            store.save(&prefs)?;
            print_json(&prefs)?;
        }
    }
    Ok(())
}
