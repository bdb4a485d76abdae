use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CONFIG_KEY: &str = "config";
pub const ACTIVE_KEY: &str = "active";

/// Per-installation record, created on first access and never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub key: String,
    /// Owner recorded on every block.
    pub user_key: String,
}

impl Config {
    pub fn generate() -> Self {
        Self {
            key: CONFIG_KEY.to_string(),
            user_key: Uuid::new_v4().to_string(),
        }
    }
}

/// Pointers to the running block and the one tracked before it.
///
/// Empty strings mean "none". A single record holds the active key, so
/// at most one block is active at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveBlock {
    pub key: String,
    #[serde(default)]
    pub active_block_key: String,
    #[serde(default)]
    pub previous_block_key: String,
}

impl Default for ActiveBlock {
    fn default() -> Self {
        Self {
            key: ACTIVE_KEY.to_string(),
            active_block_key: String::new(),
            previous_block_key: String::new(),
        }
    }
}

impl ActiveBlock {
    pub fn is_tracking(&self) -> bool {
        !self.active_block_key.is_empty()
    }

    /// Install `block_key` as active. A running block becomes the previous one.
    pub fn activate(&mut self, block_key: &str) {
        if self.is_tracking() {
            self.previous_block_key = std::mem::take(&mut self.active_block_key);
        }
        self.active_block_key = block_key.to_string();
    }

    /// Move the active block into the previous slot. Returns `false`, and
    /// leaves the previous pointer alone, when nothing is active.
    pub fn clear(&mut self) -> bool {
        if !self.is_tracking() {
            return false;
        }
        self.previous_block_key = std::mem::take(&mut self.active_block_key);
        true
    }
}
