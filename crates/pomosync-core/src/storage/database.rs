//! SQLite-based local persistence.
//!
//! Provides durable storage for:
//! - The solo mode mapping
//! - Daily completion statistics
//! - The solo countdown state and the last joined session code
//!
//! Everything lives in a single key-value table as JSON values.

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::data_dir;
use super::local::LocalStore;
use crate::error::{CoreError, DatabaseError};
use crate::session::SessionId;
use crate::stats::DailyStats;
use crate::timer::{LocalState, ModeMap};

pub const DATABASE_FILE: &str = "pomosync.db";

const KEY_SETTINGS: &str = "settings";
const KEY_DAILY_STATS: &str = "daily_stats";
const KEY_SOLO_STATE: &str = "solo_state";
const KEY_LAST_SESSION: &str = "last_session";

/// SQLite database for client-local state.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the database at `<data_dir>/pomosync.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the data directory cannot be prepared or the
    /// database cannot be opened or migrated.
    pub fn open() -> Result<Self, CoreError> {
        let path = data_dir()?.join(DATABASE_FILE);
        Ok(Self::open_at(&path)?)
    }

    pub fn open_at(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self, DatabaseError> {
        let db = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        db.migrate()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn migrate(&self) -> Result<(), DatabaseError> {
        self.conn().execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Get a value from the kv store.
    pub fn kv_get(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let value = self
            .conn()
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Set a value in the kv store.
    pub fn kv_set(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.conn().execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn kv_delete(&self, key: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, DatabaseError> {
        match self.kv_get(key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| DatabaseError::CorruptValue {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), DatabaseError> {
        let raw = serde_json::to_string(value).map_err(|e| DatabaseError::CorruptValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        self.kv_set(key, &raw)
    }
}

impl LocalStore for Database {
    fn load_settings(&self) -> Result<Option<ModeMap>, DatabaseError> {
        self.get_json(KEY_SETTINGS)
    }

    fn save_settings(&self, modes: &ModeMap) -> Result<(), DatabaseError> {
        self.set_json(KEY_SETTINGS, modes)
    }

    fn load_stats(&self) -> Result<Option<DailyStats>, DatabaseError> {
        self.get_json(KEY_DAILY_STATS)
    }

    fn save_stats(&self, stats: &DailyStats) -> Result<(), DatabaseError> {
        self.set_json(KEY_DAILY_STATS, stats)
    }

    fn load_solo_state(&self) -> Result<Option<LocalState>, DatabaseError> {
        self.get_json(KEY_SOLO_STATE)
    }

    fn save_solo_state(&self, state: &LocalState) -> Result<(), DatabaseError> {
        self.set_json(KEY_SOLO_STATE, state)
    }

    fn load_last_session(&self) -> Result<Option<SessionId>, DatabaseError> {
        self.kv_get(KEY_LAST_SESSION)
    }

    fn save_last_session(&self, id: Option<&str>) -> Result<(), DatabaseError> {
        match id {
            Some(id) => self.kv_set(KEY_LAST_SESSION, id),
            None => self.kv_delete(KEY_LAST_SESSION),
        }
    }
}
