use std::collections::BTreeMap;

use clap::Subcommand;
use tally_core::storage::SettingsError;
use tally_core::Settings;

use super::{print_json, CmdResult};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Get a config value
    Get {
        /// Dot-separated key (e.g. "notifications.webhook_url")
        key: String,
    },
    /// Set a config value
    Set {
        /// Dot-separated key
        key: String,
        /// New value; lists are comma-separated
        value: String,
    },
    /// List all config values
    List,
    /// Show where the config file and data live
    Path,
}

pub fn run(action: ConfigAction, mut settings: Settings) -> CmdResult {
    match action {
        ConfigAction::Get { key } => {
            let value = settings.get(&key).ok_or(SettingsError::UnknownKey(key))?;
            println!("{value}");
        }
        ConfigAction::Set { key, value } => {
            settings.set(&key, &value)?;
            settings.save()?;
            tracing::info!(%key, "setting changed");
            println!("ok");
        }
        ConfigAction::List => {
            let entries: BTreeMap<String, String> = settings.entries().into_iter().collect();
            print_json(&entries)?;
        }
        ConfigAction::Path => {
            print_json(&serde_json::json!({
                "config": Settings::path()?,
                "data_dir": settings.data_dir()?,
            }))?;
        }
    }
    Ok(())
}
