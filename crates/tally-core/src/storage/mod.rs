mod settings;
mod space;
pub mod store;

pub use settings::{LogSettings, NotificationSettings, Settings, SettingsError, StorageSettings};
pub use space::{SpaceProbe, SysinfoProbe};
pub use store::{is_not_found, KeyValueStore, OpenOptions, Store, StoreError, Txn, DATABASE_FILE};

use std::path::PathBuf;

pub(crate) const MIB: u64 = 1024 * 1024;

/// Returns the tally data directory, creating it if needed.
///
/// `TALLY_HOME` overrides the location. Otherwise it is
/// `~/.config/tally`, or `~/.config/tally-dev` when `TALLY_ENV=dev`.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> std::io::Result<PathBuf> {
    let dir = match std::env::var_os("TALLY_HOME") {
        Some(home) if !home.is_empty() => PathBuf::from(home),
        _ => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("TALLY_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("tally-dev")
            } else {
                base_dir.join("tally")
            }
        }
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
