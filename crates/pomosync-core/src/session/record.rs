//! The shared session record and the merge-patch used to mutate it.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};

use crate::timer::{ModeId, ModeMap};

/// Short opaque session code, e.g. `"K3Z9QX"`.
pub type SessionId = String;

const CODE_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
pub const CODE_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Paused,
}

/// Remote state of one synchronized timer.
///
/// `status` decides which of `remaining` / `end_time` is authoritative:
/// running records are resolved from `end_time`, paused ones from `remaining`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub host_id: String,
    pub mode: ModeId,
    pub status: SessionStatus,
    /// Seconds left. Only meaningful while paused.
    pub remaining: u64,
    /// Absolute deadline. Only meaningful while running.
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub settings: ModeMap,
    pub created_at: DateTime<Utc>,
}

impl SessionRecord {
    /// A freshly created record is always paused.
    pub fn from_new(id: SessionId, new: NewSession, now: DateTime<Utc>) -> Self {
        Self {
            id,
            host_id: new.host_id,
            mode: new.mode,
            status: SessionStatus::Paused,
            remaining: new.remaining,
            end_time: None,
            settings: new.settings,
            created_at: now,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }

    /// The deadline, if this record is running toward one.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        match self.status {
            SessionStatus::Running => self.end_time,
            SessionStatus::Paused => None,
        }
    }

    /// Merge `patch` into this record. Absent fields are left untouched.
    pub fn apply(&mut self, patch: &SessionPatch) {
        if let Some(mode) = &patch.mode {
            self.mode = mode.clone();
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(remaining) = patch.remaining {
            self.remaining = remaining;
        }
        if let Some(end_time) = patch.end_time {
            self.end_time = end_time;
        }
        if let Some(settings) = &patch.settings {
            self.settings = settings.clone();
        }
    }
}

/// Fields needed to create a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSession {
    pub host_id: String,
    pub mode: ModeId,
    pub remaining: u64,
    pub settings: ModeMap,
}

/// Partial update of a [`SessionRecord`].
///
/// `end_time` is doubly optional: `None` leaves it alone, `Some(None)`
/// clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ModeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub end_time: Option<Option<DateTime<Utc>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<ModeMap>,
}

impl SessionPatch {
    pub fn start(end_time: DateTime<Utc>) -> Self {
        Self {
            status: Some(SessionStatus::Running),
            end_time: Some(Some(end_time)),
            ..Self::default()
        }
    }

    pub fn pause(remaining: u64) -> Self {
        Self {
            status: Some(SessionStatus::Paused),
            remaining: Some(remaining),
            end_time: Some(None),
            ..Self::default()
        }
    }

    pub fn change_mode(mode: impl Into<ModeId>, remaining: u64) -> Self {
        Self {
            mode: Some(mode.into()),
            ..Self::pause(remaining)
        }
    }

    pub fn settings(settings: ModeMap, remaining: u64) -> Self {
        Self {
            settings: Some(settings),
            ..Self::pause(remaining)
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Random upper-case base-36 session code.
pub fn generate_code() -> SessionId {
    let mut rng = rand::thread_rng();
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Codes are typed by humans: ignore surrounding whitespace and case.
pub fn normalize_code(input: &str) -> SessionId {
    input.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> SessionRecord {
        SessionRecord::from_new(
            "ABC123".into(),
            NewSession {
                host_id: "client-a".into(),
                mode: "pomodoro".into(),
                remaining: 1500,
                settings: ModeMap::default_modes(),
            },
            Utc::now(),
        )
    }

    #[test]
    fn new_record_is_paused_without_deadline() {
        let rec = record();
        assert_eq!(rec.status, SessionStatus::Paused);
        assert_eq!(rec.end_time, None);
        assert_eq!(rec.deadline(), None);
    }

    #[test]
    fn pause_patch_clears_end_time() {
        let mut rec = record();
        let end = Utc::now();
        rec.apply(&SessionPatch::start(end));
        assert_eq!(rec.deadline(), Some(end));

        rec.apply(&SessionPatch::pause(42));
        assert_eq!(rec.status, SessionStatus::Paused);
        assert_eq!(rec.remaining, 42);
        assert_eq!(rec.end_time, None);
    }

    #[test]
    fn start_patch_leaves_remaining_alone() {
        let mut rec = record();
        rec.apply(&SessionPatch::start(Utc::now()));
        assert_eq!(rec.remaining, 1500);
    }

    #[test]
    fn patch_json_distinguishes_null_from_absent() {
        let clear: SessionPatch =
            serde_json::from_value(json!({ "status": "paused", "end_time": null })).unwrap();
        assert_eq!(clear.end_time, Some(None));

        let untouched: SessionPatch = serde_json::from_value(json!({ "remaining": 5 })).unwrap();
        assert_eq!(untouched.end_time, None);
        assert_eq!(untouched.remaining, Some(5));

        let out = serde_json::to_value(SessionPatch::pause(0)).unwrap();
        assert_eq!(out, json!({ "status": "paused", "remaining": 0, "end_time": null }));
    }

    #[test]
    fn generated_codes_are_six_upper_alnum() {
        for _ in 0..50 {
            let code = generate_code();
            assert_eq!(code.len(), CODE_LEN);
            assert!(code
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn normalize_code_trims_and_uppercases() {
        assert_eq!(normalize_code("  k3z9qx \n"), "K3Z9QX");
    }
}
