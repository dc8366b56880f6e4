//! Time source resolution.
//!
//! The engine's source of truth is a tagged union: either purely local
//! state ([`TimeSource::Solo`]) or a bound session record
//! ([`TimeSource::Synced`]). Remaining time is always derived from that
//! source; a running countdown with a deadline is resolved from the deadline,
//! never accumulated by subtraction, so missed ticks and suspended processes
//! cannot make it drift.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::modes::{ModeId, MAX_DURATION_SECS};
use crate::session::{SessionId, SessionRecord};

/// Local countdown state used while no session is bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalState {
    pub mode: ModeId,
    pub running: bool,
    /// Last known remaining seconds. This is the fallback value kept when a
    /// session is left; it is never reset to a full duration behind the
    /// user's back.
    pub remaining: u64,
    /// Local absolute deadline while running on the deadline clock.
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

impl LocalState {
    /// A paused countdown at `remaining` seconds.
    pub fn paused(mode: impl Into<ModeId>, remaining: u64) -> Self {
        Self {
            mode: mode.into(),
            running: false,
            remaining,
            deadline: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncedState {
    pub session_id: SessionId,
    pub record: SessionRecord,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TimeSource {
    Solo(LocalState),
    Synced(SyncedState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Solo,
    Synced,
}

impl TimeSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            TimeSource::Solo(_) => SourceKind::Solo,
            TimeSource::Synced(_) => SourceKind::Synced,
        }
    }

    pub fn is_synced(&self) -> bool {
        matches!(self, TimeSource::Synced(_))
    }

    /// Solo uses the local flag; synced derives from the record status.
    pub fn is_running(&self) -> bool {
        match self {
            TimeSource::Solo(local) => local.running,
            TimeSource::Synced(synced) => synced.record.is_running(),
        }
    }

    pub fn mode(&self) -> &str {
        match self {
            TimeSource::Solo(local) => &local.mode,
            TimeSource::Synced(synced) => &synced.record.mode,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            TimeSource::Solo(_) => None,
            TimeSource::Synced(synced) => Some(&synced.session_id),
        }
    }
}

/// Whole seconds from `now` until `deadline`, floored, never negative and
/// never more than [`MAX_DURATION_SECS`].
pub fn seconds_until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let ms = (deadline - now).num_milliseconds();
    if ms <= 0 {
        0
    } else {
        ((ms / 1000) as u64).min(MAX_DURATION_SECS)
    }
}

/// Remaining seconds according to a session record.
///
/// Running records resolve from `end_time`; paused records report
/// `remaining` verbatim. A running record without a deadline is malformed
/// and falls back to `remaining`.
pub fn resolve_record(record: &SessionRecord, now: DateTime<Utc>) -> u64 {
    match record.deadline() {
        Some(end) => seconds_until(end, now),
        None => record.remaining,
    }
}

/// Remaining seconds according to local state.
pub fn resolve_local(local: &LocalState, now: DateTime<Utc>) -> u64 {
    match (local.running, local.deadline) {
        (true, Some(deadline)) => seconds_until(deadline, now),
        _ => local.remaining,
    }
}

pub fn resolve(source: &TimeSource, now: DateTime<Utc>) -> u64 {
    match source {
        TimeSource::Solo(local) => resolve_local(local, now),
        TimeSource::Synced(synced) => resolve_record(&synced.record, now),
    }
}

/// Whether a newly resolved value should replace the displayed one.
///
/// Differences within `tolerance` seconds are latency and skew noise.
pub fn should_snap(displayed: u64, resolved: u64, tolerance: u64) -> bool {
    displayed.abs_diff(resolved) > tolerance
}
