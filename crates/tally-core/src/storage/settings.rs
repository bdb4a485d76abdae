//! TOML-based application settings.
//!
//! Stores:
//! - Storage location and disk-space thresholds
//! - Webhook notification endpoint and retry schedule
//! - Default log level
//!
//! Settings live at `<data dir>/config.toml`. They are loaded once at
//! startup and passed by reference to the components that need them.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::{data_dir, MIB};
use super::store::OpenOptions;
use crate::error::ErrorCode;
use crate::notify::RetryPolicy;

/// Settings-specific errors.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write settings to {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse settings in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("unknown configuration key: {0}")]
    UnknownKey(String),

    #[error("invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

impl SettingsError {
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            SettingsError::UnknownKey(_) => Some(ErrorCode::UnknownSetting),
            SettingsError::InvalidValue { key, .. } if key == "notifications.webhook_url" => {
                Some(ErrorCode::InvalidWebhookUrl)
            }
            SettingsError::InvalidValue { .. } | SettingsError::Parse { .. } => {
                Some(ErrorCode::InvalidSetting)
            }
            _ => None,
        }
    }
}

/// Where data lives and how much free space writes require.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Overrides the default data directory when non-empty.
    #[serde(default)]
    pub data_dir: String,
    #[serde(default = "default_min_free_mb")]
    pub min_free_mb: u64,
    #[serde(default = "default_warn_free_mb")]
    pub warn_free_mb: u64,
}

/// Webhook delivery and retry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub webhook_url: String,
    /// HMAC secret used to sign payloads. Empty disables signing.
    #[serde(default)]
    pub secret: String,
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    #[serde(default = "default_delivery_timeout_secs")]
    pub delivery_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSettings {
    /// Filter directive used when `TALLY_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Application settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub notifications: NotificationSettings,
    #[serde(default)]
    pub log: LogSettings,
}

fn default_min_free_mb() -> u64 {
    50
}
fn default_warn_free_mb() -> u64 {
    500
}
fn default_check_interval_secs() -> u64 {
    30
}
fn default_delivery_timeout_secs() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    5
}
fn default_backoff_secs() -> Vec<u64> {
    vec![5, 30, 120, 300, 900]
}
fn default_log_level() -> String {
    "warn".into()
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: String::new(),
            min_free_mb: default_min_free_mb(),
            warn_free_mb: default_warn_free_mb(),
        }
    }
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: String::new(),
            secret: String::new(),
            check_interval_secs: default_check_interval_secs(),
            delivery_timeout_secs: default_delivery_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Settings {
    /// Default settings file location.
    pub fn path() -> Result<PathBuf, SettingsError> {
        let dir = data_dir().map_err(|source| SettingsError::Read {
            path: PathBuf::from("config.toml"),
            source,
        })?;
        Ok(dir.join("config.toml"))
    }

    /// Load from the default location, writing defaults if the file is missing.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be parsed or is
    /// invalid, or if the default file cannot be written.
    pub fn load() -> Result<Self, SettingsError> {
        let path = Self::path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            let settings = Self::default();
            settings.save_to(&path)?;
            Ok(settings)
        }
    }

    /// Load from `path`. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(SettingsError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let settings: Settings = toml::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self) -> Result<(), SettingsError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reject combinations the storage and notification layers cannot use.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let invalid = |key: &str, message: &str| SettingsError::InvalidValue {
            key: key.to_string(),
            message: message.to_string(),
        };

        if self.storage.warn_free_mb < self.storage.min_free_mb {
            return Err(invalid(
                "storage.warn_free_mb",
                "must be at least storage.min_free_mb",
            ));
        }
        let n = &self.notifications;
        if n.max_attempts == 0 {
            return Err(invalid("notifications.max_attempts", "must be at least 1"));
        }
        if n.backoff_secs.is_empty() {
            return Err(invalid("notifications.backoff_secs", "needs at least one delay"));
        }
        if n.check_interval_secs == 0 {
            return Err(invalid("notifications.check_interval_secs", "must be positive"));
        }
        if n.delivery_timeout_secs == 0 {
            return Err(invalid("notifications.delivery_timeout_secs", "must be positive"));
        }
        if !n.webhook_url.is_empty() {
            let url = url::Url::parse(&n.webhook_url)
                .map_err(|e| invalid("notifications.webhook_url", &e.to_string()))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(invalid("notifications.webhook_url", "scheme must be http or https"));
            }
        }
        if n.enabled && n.webhook_url.is_empty() {
            return Err(invalid("notifications.enabled", "set notifications.webhook_url first"));
        }
        Ok(())
    }

    /// Read a value by dot-separated key, rendered as a string.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        lookup(&json, key).map(render)
    }

    /// Set a value by dot-separated key. The key must already exist and the
    /// value must parse as the existing value's type. Does not save.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        let invalid = |message: String| SettingsError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut json = serde_json::to_value(&*self).map_err(|e| invalid(e.to_string()))?;
        let slot = lookup_mut(&mut json, key).ok_or_else(|| SettingsError::UnknownKey(key.into()))?;
        let new_value = match &*slot {
            Value::Bool(_) => Value::Bool(value.parse().map_err(|_| invalid(format!("'{value}' is not true or false")))?),
            Value::Number(_) => Value::Number(
                value
                    .parse::<u64>()
                    .map_err(|_| invalid(format!("'{value}' is not a whole number")))?
                    .into(),
            ),
            Value::Array(_) => {
                let list = value.trim();
                let list = list
                    .strip_prefix('[')
                    .and_then(|rest| rest.strip_suffix(']'))
                    .unwrap_or(list);
                let items = list
                    .split(',')
                    .map(|s| s.trim().parse::<u64>().map(Value::from))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|_| invalid(format!("'{value}' is not a comma-separated list of numbers")))?;
                Value::Array(items)
            }
            Value::String(_) => Value::String(value.to_string()),
            _ => return Err(SettingsError::UnknownKey(key.into())),
        };
        *slot = new_value;

        let updated: Settings = serde_json::from_value(json).map_err(|e| invalid(e.to_string()))?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Every leaf key with its current value, sorted by key.
    pub fn entries(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        if let Ok(json) = serde_json::to_value(self) {
            flatten("", &json, &mut out);
        }
        out
    }

    /// Data directory: the configured override or the default location.
    pub fn data_dir(&self) -> io::Result<PathBuf> {
        if self.storage.data_dir.is_empty() {
            data_dir()
        } else {
            Ok(PathBuf::from(&self.storage.data_dir))
        }
    }

    pub fn open_options(&self) -> io::Result<OpenOptions> {
        Ok(OpenOptions::persistent(self.data_dir()?).with_thresholds(
            self.storage.min_free_mb * MIB,
            self.storage.warn_free_mb * MIB,
        ))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let n = &self.notifications;
        RetryPolicy {
            check_interval: Duration::from_secs(n.check_interval_secs),
            delivery_timeout: Duration::from_secs(n.delivery_timeout_secs),
            max_attempts: n.max_attempts,
            backoff: n.backoff_secs.iter().copied().map(Duration::from_secs).collect(),
        }
    }

    /// Whether webhook delivery is switched on and has somewhere to go.
    pub fn webhook_enabled(&self) -> bool {
        self.notifications.enabled && !self.notifications.webhook_url.is_empty()
    }
}

fn lookup<'a>(root: &'a Value, key: &str) -> Option<&'a Value> {
    if key.is_empty() {
        return None;
    }
    key.split('.').try_fold(root, |node, part| node.get(part))
}

fn lookup_mut<'a>(root: &'a mut Value, key: &str) -> Option<&'a mut Value> {
    if key.is_empty() {
        return None;
    }
    key.split('.').try_fold(root, |node, part| node.get_mut(part))
}

fn flatten(prefix: &str, node: &Value, out: &mut Vec<(String, String)>) {
    match node {
        Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten(&key, v, out);
            }
        }
        leaf => out.push((prefix.to_string(), render(leaf))),
    }
}

/// Leaf values in the form `set` accepts back: lists are comma-joined.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(render).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_roundtrip_through_toml() {
        let settings = Settings::default();
        let text = toml::to_string_pretty(&settings).unwrap();
        let parsed: Settings = toml::from_str(&text).unwrap();
        assert_eq!(parsed, settings);
        assert_eq!(parsed.notifications.backoff_secs, vec![5, 30, 120, 300, 900]);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let parsed: Settings = toml::from_str("[notifications]\nmax_attempts = 3\n").unwrap();
        assert_eq!(parsed.notifications.max_attempts, 3);
        assert_eq!(parsed.notifications.check_interval_secs, 30);
        assert_eq!(parsed.storage.min_free_mb, 50);
    }

    #[test]
    fn get_by_dot_path() {
        let settings = Settings::default();
        assert_eq!(settings.get("notifications.max_attempts").as_deref(), Some("5"));
        assert_eq!(settings.get("log.level").as_deref(), Some("warn"));
        assert!(settings.get("notifications.nope").is_none());
        assert!(settings.get("").is_none());
    }

    #[test]
    fn set_parses_by_existing_type() {
        let mut settings = Settings::default();
        settings.set("notifications.max_attempts", "7").unwrap();
        settings.set("notifications.backoff_secs", "1, 2, 3").unwrap();
        settings.set("log.level", "debug").unwrap();
        assert_eq!(settings.notifications.max_attempts, 7);
        assert_eq!(settings.notifications.backoff_secs, vec![1, 2, 3]);
        assert_eq!(settings.log.level, "debug");
    }

    #[test]
    fn set_rejects_unknown_key_and_bad_value() {
        let mut settings = Settings::default();
        assert!(matches!(
            settings.set("ui.theme", "dark"),
            Err(SettingsError::UnknownKey(_))
        ));
        assert!(matches!(
            settings.set("notifications.max_attempts", "many"),
            Err(SettingsError::InvalidValue { .. })
        ));
        assert!(matches!(
            settings.set("notifications.max_attempts", "0"),
            Err(SettingsError::InvalidValue { .. })
        ));
        assert_eq!(settings.notifications.max_attempts, 5);
    }

    #[test]
    fn get_output_feeds_back_into_set() {
        let mut settings = Settings::default();
        let backoff = settings.get("notifications.backoff_secs").unwrap();
        assert_eq!(backoff, "5,30,120,300,900");
        settings.set("notifications.backoff_secs", &backoff).unwrap();
        assert_eq!(settings, Settings::default());

        settings.set("notifications.backoff_secs", "[1, 2]").unwrap();
        assert_eq!(settings.notifications.backoff_secs, vec![1, 2]);
        let listed = settings.entries();
        assert!(listed
            .iter()
            .any(|(k, v)| k == "notifications.backoff_secs" && v == "1,2"));
    }

    #[test]
    fn webhook_url_must_be_http() {
        let mut settings = Settings::default();
        let err = settings
            .set("notifications.webhook_url", "ftp://example.com/hook")
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::InvalidWebhookUrl));
        settings
            .set("notifications.webhook_url", "https://example.com/hook")
            .unwrap();
        settings.set("notifications.enabled", "true").unwrap();
        assert!(settings.webhook_enabled());
    }

    #[test]
    fn save_and_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut settings = Settings::default();
        settings.set("storage.min_free_mb", "10").unwrap();
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded.storage.min_free_mb, 10);
        assert_eq!(
            Settings::load_from(&dir.path().join("missing.toml")).unwrap(),
            Settings::default()
        );
    }

    #[test]
    fn retry_policy_reflects_settings() {
        let policy = Settings::default().retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.check_interval, Duration::from_secs(30));
        assert_eq!(policy.backoff[2], Duration::from_secs(120));
    }

    #[test]
    fn open_options_scale_thresholds_to_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.storage.data_dir = dir.path().display().to_string();
        let options = settings.open_options().unwrap();
        assert_eq!(options.path.as_deref(), Some(dir.path()));
        assert_eq!(options.min_free_bytes, OpenOptions::default().min_free_bytes);
        assert_eq!(options.warn_free_bytes, OpenOptions::default().warn_free_bytes);
        assert_eq!(options.min_free_bytes, 50 * 1024 * 1024);
    }

    #[test]
    fn entries_list_every_leaf() {
        let entries = Settings::default().entries();
        assert!(entries.iter().any(|(k, v)| k == "storage.min_free_mb" && v == "50"));
        assert!(entries.iter().any(|(k, _)| k == "notifications.backoff_secs"));
    }
}
