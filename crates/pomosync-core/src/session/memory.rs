//! In-process session store.
//!
//! Every participant in the same process shares one store; updates are
//! echoed to every subscriber of the session, the writer included.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

use super::record::{generate_code, NewSession, SessionId, SessionPatch, SessionRecord};
use super::store::{SessionStore, Subscription};
use crate::error::StoreError;

const MAX_CODE_ATTEMPTS: u32 = 16;

struct Entry {
    record: SessionRecord,
    subscribers: Vec<mpsc::UnboundedSender<SessionRecord>>,
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<SessionId, Entry>>,
    fail_writes: AtomicBool,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `update` fail, simulating an unreachable store.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl SessionStore for InMemorySessionStore {
    fn create(&self, new: NewSession) -> Result<SessionId, StoreError> {
        let mut sessions = self.sessions.lock()?;
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = generate_code();
            if sessions.contains_key(&code) {
                continue;
            }
            let record = SessionRecord::from_new(code.clone(), new, Utc::now());
            sessions.insert(
                code.clone(),
                Entry {
                    record,
                    subscribers: Vec::new(),
                },
            );
            tracing::debug!(session = %code, "created in-memory session");
            return Ok(code);
        }
        Err(StoreError::CodeExhausted {
            attempts: MAX_CODE_ATTEMPTS,
        })
    }

    fn fetch(&self, id: &str) -> Result<Option<SessionRecord>, StoreError> {
        let sessions = self.sessions.lock()?;
        Ok(sessions.get(id).map(|e| e.record.clone()))
    }

    fn subscribe(&self, id: &str) -> Result<Subscription, StoreError> {
        let mut sessions = self.sessions.lock()?;
        let entry = sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        entry.subscribers.push(tx);
        Ok(Subscription::new(id.to_string(), rx))
    }

    fn update(&self, id: &str, patch: &SessionPatch) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("store unreachable".into()));
        }
        let mut sessions = self.sessions.lock()?;
        let entry = sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        entry.record.apply(patch);
        let snapshot = entry.record.clone();
        entry
            .subscribers
            .retain(|tx| tx.send(snapshot.clone()).is_ok());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;
    use crate::timer::ModeMap;

    fn new_session() -> NewSession {
        NewSession {
            host_id: "client-a".into(),
            mode: "pomodoro".into(),
            remaining: 1500,
            settings: ModeMap::default_modes(),
        }
    }

    #[test]
    fn create_then_fetch() {
        let store = InMemorySessionStore::new();
        let id = store.create(new_session()).unwrap();
        let rec = store.fetch(&id).unwrap().unwrap();
        assert_eq!(rec.id, id);
        assert_eq!(rec.host_id, "client-a");
        assert_eq!(rec.status, SessionStatus::Paused);
        assert!(store.fetch("NOPE00").unwrap().is_none());
    }

    #[test]
    fn update_echoes_to_every_subscriber() {
        let store = InMemorySessionStore::new();
        let id = store.create(new_session()).unwrap();
        let mut a = store.subscribe(&id).unwrap();
        let mut b = store.subscribe(&id).unwrap();

        store.update(&id, &SessionPatch::pause(99)).unwrap();

        assert_eq!(a.try_recv().unwrap().remaining, 99);
        assert_eq!(b.try_recv().unwrap().remaining, 99);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let store = InMemorySessionStore::new();
        let id = store.create(new_session()).unwrap();
        let sub = store.subscribe(&id).unwrap();
        sub.unsubscribe();
        store.update(&id, &SessionPatch::pause(1)).unwrap();
        let sessions = store.sessions.lock().unwrap();
        assert!(sessions[&id].subscribers.is_empty());
    }

    #[test]
    fn update_unknown_session_is_not_found() {
        let store = InMemorySessionStore::new();
        let err = store.update("NOPE00", &SessionPatch::pause(1)).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn injected_write_failure_leaves_record_untouched() {
        let store = InMemorySessionStore::new();
        let id = store.create(new_session()).unwrap();
        store.set_fail_writes(true);
        assert!(store.update(&id, &SessionPatch::pause(3)).is_err());
        assert_eq!(store.fetch(&id).unwrap().unwrap().remaining, 1500);
    }
}
