//! SQLite-backed key/value store.
//!
//! All durable state lives in one `kv` table keyed by text, with opaque
//! byte values. SQLite serializes writers across processes, so an
//! interactive command and the background notifier can share a data
//! directory. Multi-step operations that must not interleave go through
//! [`Store::transaction`].

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use thiserror::Error;

use super::space::{DiskGuard, SpaceProbe};
use super::MIB;

/// File name of the database inside the data directory.
pub const DATABASE_FILE: &str = "tally.db";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// How to open a [`Store`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOptions {
    /// Data directory for persistent mode.
    pub path: Option<PathBuf>,
    /// Keep everything in memory. Wins over `path`.
    pub in_memory: bool,
    /// Writes fail below this many free bytes.
    pub min_free_bytes: u64,
    /// Writes log a warning below this many free bytes.
    pub warn_free_bytes: u64,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            path: None,
            in_memory: false,
            min_free_bytes: 50 * MIB,
            warn_free_bytes: 500 * MIB,
        }
    }
}

impl OpenOptions {
    pub fn persistent(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn in_memory() -> Self {
        Self {
            in_memory: true,
            ..Self::default()
        }
    }

    pub fn with_thresholds(mut self, min_free_bytes: u64, warn_free_bytes: u64) -> Self {
        self.min_free_bytes = min_free_bytes;
        self.warn_free_bytes = warn_free_bytes;
        self
    }
}

/// Storage-specific errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key not found: {key}")]
    NotFound { key: String },

    #[error("key already exists: {key}")]
    KeyExists { key: String },

    #[error(
        "not enough free disk space at {}: {available} bytes available, {required} required",
        path.display()
    )]
    InsufficientSpace {
        path: PathBuf,
        available: u64,
        required: u64,
    },

    #[error("no data directory configured for a persistent store")]
    MissingPath,

    #[error("failed to open store at {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("storage engine error: {0}")]
    Engine(#[from] rusqlite::Error),

    #[error("record {key} could not be encoded or decoded: {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store connection lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Whether `err`, or anything in its cause chain, is a missing-key error.
pub fn is_not_found(err: &(dyn std::error::Error + 'static)) -> bool {
    crate::classify::chain(err).any(|e| {
        e.downcast_ref::<StoreError>()
            .is_some_and(StoreError::is_not_found)
    })
}

/// Point operations shared by the store and an open transaction.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Insert only if `key` is absent; fails with [`StoreError::KeyExists`].
    fn insert_new(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Remove `key`. Missing keys are not an error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Keys starting with `prefix`, in lexicographic order.
    fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Key/value pairs starting with `prefix`, in lexicographic key order.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;
}

/// Embedded key/value store.
pub struct Store {
    conn: Mutex<Connection>,
    dir: Option<PathBuf>,
    guard: Option<DiskGuard>,
}

impl Store {
    /// Open a store. `in_memory` overrides `path` and never touches disk.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created, the database
    /// cannot be opened, or the schema cannot be applied.
    pub fn open(options: OpenOptions) -> Result<Self, StoreError> {
        if options.in_memory {
            let conn = Connection::open_in_memory()?;
            migrate(&conn)?;
            tracing::debug!("opened in-memory store");
            return Ok(Self {
                conn: Mutex::new(conn),
                dir: None,
                guard: None,
            });
        }

        let dir = options.path.ok_or(StoreError::MissingPath)?;
        std::fs::create_dir_all(&dir)?;
        let file = dir.join(DATABASE_FILE);
        let conn = Connection::open(&file).map_err(|source| StoreError::Open {
            path: file.clone(),
            source,
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        migrate(&conn)?;
        tracing::debug!(path = %file.display(), "opened store");

        let guard = DiskGuard::new(dir.clone(), options.min_free_bytes, options.warn_free_bytes);
        Ok(Self {
            conn: Mutex::new(conn),
            dir: Some(dir),
            guard: Some(guard),
        })
    }

    /// Open an in-memory store (tests and dry runs).
    pub fn open_memory() -> Result<Self, StoreError> {
        Self::open(OpenOptions::in_memory())
    }

    /// Replace the free-space probe. No effect on in-memory stores.
    pub fn with_space_probe(mut self, probe: impl SpaceProbe + 'static) -> Self {
        if let Some(guard) = self.guard.as_mut() {
            guard.set_probe(Box::new(probe));
        }
        self
    }

    /// Data directory, or `None` for an in-memory store.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Flush the write-ahead log and release the connection.
    pub fn close(self) -> Result<(), StoreError> {
        let conn = self.conn.into_inner().map_err(|_| StoreError::Poisoned)?;
        if self.dir.is_some() {
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        }
        conn.close().map_err(|(_, e)| StoreError::Engine(e))
    }

    /// Run `f` inside one immediate transaction.
    ///
    /// The transaction commits when `f` returns `Ok` and rolls back
    /// otherwise. Free space is checked once, up front.
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Txn<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        self.check_space()?;
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let out = f(&Txn { conn: &tx })?;
        tx.commit().map_err(StoreError::from)?;
        Ok(out)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn check_space(&self) -> Result<(), StoreError> {
        match &self.guard {
            Some(guard) => guard.check().map(drop),
            None => Ok(()),
        }
    }
}

impl KeyValueStore for Store {
    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        read(&*self.lock()?, key)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.check_space()?;
        write(&*self.lock()?, key, value)
    }

    fn insert_new(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.check_space()?;
        insert(&*self.lock()?, key, value)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check_space()?;
        remove(&*self.lock()?, key)
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        contains(&*self.lock()?, key)
    }

    fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        keys(&*self.lock()?, prefix)
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        scan(&*self.lock()?, prefix)
    }
}

/// Handle to an open transaction; see [`Store::transaction`].
pub struct Txn<'t> {
    conn: &'t Connection,
}

impl KeyValueStore for Txn<'_> {
    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        read(self.conn, key)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        write(self.conn, key, value)
    }

    fn insert_new(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        insert(self.conn, key, value)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        remove(self.conn, key)
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        contains(self.conn, key)
    }

    fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        keys(self.conn, prefix)
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        scan(self.conn, prefix)
    }
}

fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS kv (
            key   TEXT PRIMARY KEY NOT NULL,
            value BLOB NOT NULL
        ) WITHOUT ROWID;",
    )
}

fn read(conn: &Connection, key: &str) -> Result<Vec<u8>, StoreError> {
    conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
        row.get::<_, Vec<u8>>(0)
    })
    .optional()?
    .ok_or_else(|| StoreError::NotFound {
        key: key.to_string(),
    })
}

fn write(conn: &Connection, key: &str, value: &[u8]) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO kv (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    tracing::trace!(key, bytes = value.len(), "set");
    Ok(())
}

fn insert(conn: &Connection, key: &str, value: &[u8]) -> Result<(), StoreError> {
    match conn.execute(
        "INSERT INTO kv (key, value) VALUES (?1, ?2)",
        params![key, value],
    ) {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            Err(StoreError::KeyExists {
                key: key.to_string(),
            })
        }
        Err(e) => Err(e.into()),
    }
}

fn remove(conn: &Connection, key: &str) -> Result<(), StoreError> {
    conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
    Ok(())
}

fn contains(conn: &Connection, key: &str) -> Result<bool, StoreError> {
    let found = conn
        .query_row("SELECT 1 FROM kv WHERE key = ?1", params![key], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

fn keys(conn: &Connection, prefix: &str) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT key FROM kv
         WHERE key >= ?1 AND substr(key, 1, length(?1)) = ?1
         ORDER BY key",
    )?;
    let rows = stmt.query_map(params![prefix], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn scan(conn: &Connection, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT key, value FROM kv
         WHERE key >= ?1 AND substr(key, 1, length(?1)) = ?1
         ORDER BY key",
    )?;
    let rows = stmt.query_map(params![prefix], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
