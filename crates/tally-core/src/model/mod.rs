//! Persistent record types and their key schema.
//!
//! Keys follow `<prefix>:<natural id>`. Projects and goals use the
//! project SID, tasks the composite `<project sid>:<task sid>`, blocks a
//! generated suffix. The singletons use the fixed keys `config` and
//! `active`.

mod block;
mod goal;
mod project;
mod singleton;

pub use block::{Block, BlockFilter};
pub use goal::{Goal, GoalProgress, GoalType};
pub use project::{Project, Task};
pub use singleton::{ActiveBlock, Config, ACTIVE_KEY, CONFIG_KEY};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ErrorCode, UserError};

/// A record stored under `<PREFIX>:<id>`.
pub trait Entity: Serialize + DeserializeOwned {
    const PREFIX: &'static str;

    /// Whether creation must refuse to overwrite an existing key.
    const UNIQUE: bool = true;

    /// Error code reported when a unique create collides.
    const EXISTS_CODE: ErrorCode = ErrorCode::RecordExists;

    /// Full store key.
    fn key(&self) -> &str;
}

/// Store key for the natural id `id` of entity type `E`.
pub fn entity_key<E: Entity>(id: &str) -> String {
    format!("{}:{id}", E::PREFIX)
}

/// Prefix shared by every key of entity type `E`.
pub fn entity_prefix<E: Entity>() -> String {
    format!("{}:", E::PREFIX)
}

/// Check a user-typed identifier. SIDs become key segments, so the
/// separator and whitespace are not allowed.
pub fn validate_sid(field: &str, sid: &str) -> Result<(), UserError> {
    if sid.is_empty() || sid.contains(':') || sid.chars().any(char::is_whitespace) {
        return Err(UserError::from_code(ErrorCode::InvalidSid)
            .with_detail(format!("{field} '{sid}'"))
            .with_field(field, sid));
    }
    Ok(())
}

const PALETTE: [&str; 8] = [
    "#3b82f6", "#ef4444", "#10b981", "#f59e0b", "#8b5cf6", "#ec4899", "#14b8a6", "#f97316",
];

/// Default color for a new project or task, stable per identifier.
pub fn default_color(sid: &str) -> String {
    let sum = sid.bytes().fold(0usize, |acc, b| acc.wrapping_add(b as usize));
    PALETTE[sum % PALETTE.len()].to_string()
}

/// Serde adapter storing a `chrono::Duration` as whole seconds.
pub(crate) mod duration_secs {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(value.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = i64::deserialize(deserializer)?;
        Duration::try_seconds(secs).ok_or_else(|| serde::de::Error::custom("duration out of range"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sid_validation() {
        assert!(validate_sid("project", "website").is_ok());
        assert!(validate_sid("project", "web-site_2").is_ok());
        for bad in ["", "a:b", "two words", "tab\there"] {
            let err = validate_sid("project", bad).unwrap_err();
            assert_eq!(err.code, Some(ErrorCode::InvalidSid));
            assert_eq!(err.value.as_deref(), Some(bad));
        }
    }

    #[test]
    fn default_color_is_stable() {
        assert_eq!(default_color("website"), default_color("website"));
        assert!(PALETTE.contains(&default_color("anything").as_str()));
    }
}
