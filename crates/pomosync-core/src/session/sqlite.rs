//! SQLite-backed session store.
//!
//! Several processes can open the same database file and act as separate
//! participants of one session. Each record carries a `revision` that is
//! bumped on every update; subscriptions poll the row and push the record
//! whenever the revision advances.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use super::record::{generate_code, NewSession, SessionId, SessionPatch, SessionRecord};
use super::store::{SessionStore, Subscription};
use crate::error::StoreError;

const MAX_CODE_ATTEMPTS: u32 = 16;
const BUSY_TIMEOUT: Duration = Duration::from_secs(2);

pub struct SqliteSessionStore {
    conn: Arc<Mutex<Connection>>,
    poll_interval: Duration,
}

impl SqliteSessionStore {
    /// Open (or create) the store at `path`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: &Path, poll_interval: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, poll_interval)
    }

    /// Open a private in-memory store.
    pub fn open_memory(poll_interval: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, poll_interval)
    }

    fn from_connection(conn: Connection, poll_interval: Duration) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                id         TEXT PRIMARY KEY,
                revision   INTEGER NOT NULL DEFAULT 0,
                record     TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            poll_interval,
        })
    }

    /// Current revision of a session, if it exists.
    pub fn revision(&self, id: &str) -> Result<Option<u64>, StoreError> {
        let conn = self.conn.lock()?;
        Ok(load(&conn, id)?.map(|(rev, _)| rev))
    }
}

fn load(conn: &Connection, id: &str) -> Result<Option<(u64, SessionRecord)>, StoreError> {
    let row = conn
        .query_row(
            "SELECT revision, record FROM sessions WHERE id = ?1",
            params![id],
            |row| Ok((row.get::<_, u64>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()?;
    match row {
        Some((rev, json)) => Ok(Some((rev, serde_json::from_str(&json)?))),
        None => Ok(None),
    }
}

fn poll_once(
    conn: &Mutex<Connection>,
    id: &str,
) -> Result<Option<(u64, SessionRecord)>, StoreError> {
    let conn = conn.lock()?;
    load(&conn, id)
}

impl SessionStore for SqliteSessionStore {
    fn create(&self, new: NewSession) -> Result<SessionId, StoreError> {
        let conn = self.conn.lock()?;
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = generate_code();
            let now = Utc::now();
            let record = SessionRecord::from_new(code.clone(), new.clone(), now);
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO sessions (id, revision, record, updated_at)
                 VALUES (?1, 0, ?2, ?3)",
                params![code, serde_json::to_string(&record)?, now.to_rfc3339()],
            )?;
            if inserted == 1 {
                tracing::debug!(session = %code, "created sqlite session");
                return Ok(code);
            }
        }
        Err(StoreError::CodeExhausted {
            attempts: MAX_CODE_ATTEMPTS,
        })
    }

    fn fetch(&self, id: &str) -> Result<Option<SessionRecord>, StoreError> {
        let conn = self.conn.lock()?;
        Ok(load(&conn, id)?.map(|(_, rec)| rec))
    }

    /// Must be called from within a tokio runtime: the poller is a spawned task.
    fn subscribe(&self, id: &str) -> Result<Subscription, StoreError> {
        let start = self
            .revision(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Arc::clone(&self.conn);
        let session_id = id.to_string();
        let period = self.poll_interval;

        let poller = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut last_seen = start;
            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }
                // The connection lock and busy timeout block, keep them off the runtime.
                let (poll_conn, poll_id) = (Arc::clone(&conn), session_id.clone());
                let polled =
                    tokio::task::spawn_blocking(move || poll_once(&poll_conn, &poll_id)).await;
                match polled {
                    Ok(Ok(Some((rev, record)))) if rev > last_seen => {
                        last_seen = rev;
                        if tx.send(record).is_err() {
                            break;
                        }
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(session = %session_id, error = %e, "session poll failed");
                    }
                    Err(e) => {
                        tracing::warn!(session = %session_id, error = %e, "session poll task failed");
                    }
                }
            }
        });

        Ok(Subscription::with_poller(id.to_string(), rx, poller))
    }

    fn update(&self, id: &str, patch: &SessionPatch) -> Result<(), StoreError> {
        let mut conn = self.conn.lock()?;
        let tx = conn.transaction()?;
        let (_, mut record) = load(&tx, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.apply(patch);
        tx.execute(
            "UPDATE sessions
             SET record = ?2, revision = revision + 1, updated_at = ?3
             WHERE id = ?1",
            params![id, serde_json::to_string(&record)?, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        Ok(())
    }
}
