use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timer::{ModeId, ModeMap};

/// Every state change of the engine produces an Event.
/// The runtime acts on them (stats, persistence, completion hook) and the
/// CLI prints them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    TimerStarted {
        mode: ModeId,
        remaining_secs: u64,
        synced: bool,
        at: DateTime<Utc>,
    },
    TimerPaused {
        mode: ModeId,
        remaining_secs: u64,
        synced: bool,
        at: DateTime<Utc>,
    },
    /// A countdown reached zero. Emitted exactly once per expiry.
    TimerCompleted {
        mode: ModeId,
        synced: bool,
        at: DateTime<Utc>,
    },
    ModeChanged {
        mode: ModeId,
        duration_secs: u64,
        synced: bool,
        at: DateTime<Utc>,
    },
    SettingsChanged {
        modes: ModeMap,
        synced: bool,
        at: DateTime<Utc>,
    },
    /// The displayed value was corrected to match the authoritative source.
    Snapped {
        from_secs: u64,
        to_secs: u64,
        at: DateTime<Utc>,
    },
    SessionBound {
        session_id: String,
        at: DateTime<Utc>,
    },
    SessionUnbound {
        session_id: String,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn is_completion(&self) -> bool {
        matches!(self, Event::TimerCompleted { .. })
    }
}
