//! Local durable key-value store.
//!
//! The snapshot lives under two keys, one for settings and one for the
//! session log, written back to back in one logical save. A crash between
//! the two writes can leave them out of step; the remote document, when
//! there is one, carries both halves together.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::data_dir;
use crate::error::{CoreError, StorageError};
use crate::model::{PersistedSnapshot, SessionLog, Settings};

pub const SETTINGS_KEY: &str = "pomodoroSettings";
pub const TASKS_KEY: &str = "pomodoroTasks";

/// Synchronous string key-value store.
pub trait LocalStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Canonical serialization of a snapshot, one string per local key.
///
/// Equality of two encodings is the dirty check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSnapshot {
    pub settings: String,
    pub tasks: String,
}

impl EncodedSnapshot {
    pub fn encode(snapshot: &PersistedSnapshot) -> Result<Self, serde_json::Error> {
        Ok(Self {
            settings: serde_json::to_string(&snapshot.settings)?,
            tasks: serde_json::to_string(&snapshot.tasks)?,
        })
    }

    pub fn decode(&self) -> Result<PersistedSnapshot, StorageError> {
        Ok(PersistedSnapshot {
            settings: decode_settings(&self.settings)?,
            tasks: decode_key(TASKS_KEY, &self.tasks)?,
        })
    }

    /// Read both keys back. `None` unless both are present.
    pub fn read_from<L: LocalStore + ?Sized>(store: &L) -> Result<Option<Self>, StorageError> {
        let settings = store.get(SETTINGS_KEY)?;
        let tasks = store.get(TASKS_KEY)?;
        Ok(settings.zip(tasks).map(|(settings, tasks)| Self { settings, tasks }))
    }

    /// Whether the store already holds exactly this encoding.
    pub fn is_stored_in<L: LocalStore + ?Sized>(&self, store: &L) -> Result<bool, StorageError> {
        Ok(store.get(SETTINGS_KEY)?.as_deref() == Some(self.settings.as_str())
            && store.get(TASKS_KEY)?.as_deref() == Some(self.tasks.as_str()))
    }

    pub fn write_to<L: LocalStore + ?Sized>(&self, store: &L) -> Result<(), StorageError> {
        store.set(SETTINGS_KEY, &self.settings)?;
        store.set(TASKS_KEY, &self.tasks)?;
        debug!(
            settings_len = self.settings.len(),
            tasks_len = self.tasks.len(),
            "local snapshot written"
        );
        Ok(())
    }
}

/// Whatever the local store holds; each half may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalSnapshot {
    pub settings: Option<Settings>,
    pub tasks: Option<SessionLog>,
}

impl LocalSnapshot {
    pub fn load<L: LocalStore + ?Sized>(store: &L) -> Result<Self, StorageError> {
        let settings = store
            .get(SETTINGS_KEY)?
            .map(|raw| decode_settings(&raw))
            .transpose()?;
        let tasks = store
            .get(TASKS_KEY)?
            .map(|raw| decode_key(TASKS_KEY, &raw))
            .transpose()?;
        Ok(Self { settings, tasks })
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_none() && self.tasks.is_none()
    }

    /// Overlay the halves that exist onto `snapshot`.
    pub fn apply_to(self, snapshot: &mut PersistedSnapshot) {
        if let Some(settings) = self.settings {
            snapshot.settings = settings;
        }
        if let Some(tasks) = self.tasks {
            snapshot.tasks = tasks;
        }
    }
}

fn decode_key<T: serde::de::DeserializeOwned>(key: &str, raw: &str) -> Result<T, StorageError> {
    serde_json::from_str(raw).map_err(|source| StorageError::Corrupt {
        key: key.to_string(),
        source,
    })
}

/// Stored settings must pass the same validation as user input.
fn decode_settings(raw: &str) -> Result<Settings, StorageError> {
    let settings: Settings = decode_key(SETTINGS_KEY, raw)?;
    settings.validate().map_err(|e| StorageError::Corrupt {
        key: SETTINGS_KEY.to_string(),
        source: serde::de::Error::custom(e),
    })?;
    Ok(settings)
}

/// SQLite-backed local store.
///
/// Keeps a single `kv` table at `~/.config/tomato/tomato.db`.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open the store in the data directory.
    ///
    /// # Errors
    /// Returns an error if the data directory or database cannot be opened.
    pub fn open() -> Result<Self, CoreError> {
        let path = data_dir()?.join("tomato.db");
        Ok(Self::open_at(&path)?)
    }

    pub fn open_at(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path).map_err(|source| StorageError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory store (for tests).
    pub fn open_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(())
    }
}

impl LocalStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.conn
            .execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(|e| match StorageError::from(e) {
                StorageError::QuotaExceeded { .. } => StorageError::QuotaExceeded {
                    key: key.to_string(),
                },
                other => other,
            })?;
        Ok(())
    }
}

/// In-memory store shared between clones; counts writes and can be told
/// to fail them as if the quota were exhausted.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
    writes: Arc<AtomicUsize>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `set` calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::QuotaExceeded {
                key: key.to_string(),
            });
        }
        self.entries().insert(key.to_string(), value.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
