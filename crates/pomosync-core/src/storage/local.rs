//! Local durable state consumed by the runtime.

use std::sync::Mutex;

use crate::error::DatabaseError;
use crate::session::SessionId;
use crate::stats::DailyStats;
use crate::timer::{LocalState, ModeMap};

/// Client-local persistence.
///
/// Settings are only read and written while solo; a bound session carries
/// its own settings snapshot.
pub trait LocalStore: Send + Sync {
    fn load_settings(&self) -> Result<Option<ModeMap>, DatabaseError>;
    fn save_settings(&self, modes: &ModeMap) -> Result<(), DatabaseError>;

    fn load_stats(&self) -> Result<Option<DailyStats>, DatabaseError>;
    fn save_stats(&self, stats: &DailyStats) -> Result<(), DatabaseError>;

    /// Solo countdown state, so a restarted process resumes where it left off.
    fn load_solo_state(&self) -> Result<Option<LocalState>, DatabaseError>;
    fn save_solo_state(&self, state: &LocalState) -> Result<(), DatabaseError>;

    /// Code of the session this client is bound to, if any.
    fn load_last_session(&self) -> Result<Option<SessionId>, DatabaseError>;
    fn save_last_session(&self, id: Option<&str>) -> Result<(), DatabaseError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    settings: Option<ModeMap>,
    stats: Option<DailyStats>,
    solo: Option<LocalState>,
    last_session: Option<SessionId>,
}

/// Volatile [`LocalStore`] for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    state: Mutex<MemoryState>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(modes: ModeMap) -> Self {
        let store = Self::default();
        store.lock().settings = Some(modes);
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl LocalStore for MemoryLocalStore {
    fn load_settings(&self) -> Result<Option<ModeMap>, DatabaseError> {
        Ok(self.lock().settings.clone())
    }

    fn save_settings(&self, modes: &ModeMap) -> Result<(), DatabaseError> {
        self.lock().settings = Some(modes.clone());
        Ok(())
    }

    fn load_stats(&self) -> Result<Option<DailyStats>, DatabaseError> {
        Ok(self.lock().stats.clone())
    }

    fn save_stats(&self, stats: &DailyStats) -> Result<(), DatabaseError> {
        self.lock().stats = Some(stats.clone());
        Ok(())
    }

    fn load_solo_state(&self) -> Result<Option<LocalState>, DatabaseError> {
        Ok(self.lock().solo.clone())
    }

    fn save_solo_state(&self, state: &LocalState) -> Result<(), DatabaseError> {
        self.lock().solo = Some(state.clone());
        Ok(())
    }

    fn load_last_session(&self) -> Result<Option<SessionId>, DatabaseError> {
        Ok(self.lock().last_session.clone())
    }

    fn save_last_session(&self, id: Option<&str>) -> Result<(), DatabaseError> {
        self.lock().last_session = id.map(str::to_string);
        Ok(())
    }
}
