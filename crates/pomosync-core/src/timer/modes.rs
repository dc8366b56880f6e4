//! Named timer modes and the registry that decides which mapping is in effect.
//!
//! A [`ModeMap`] is insertion-ordered: the order modes were defined in is the
//! order they are displayed and cycled through. Every mode has a strictly
//! positive duration of at most [`MAX_DURATION_SECS`];
//! [`ModeMap::validate`] enforces that before a mapping is accepted anywhere.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::resolver::TimeSource;
use crate::error::SettingsError;

/// Longest accepted mode duration: one day.
pub const MAX_DURATION_SECS: u64 = 24 * 60 * 60;

/// Identifier of a mode, e.g. `"pomodoro"`.
pub type ModeId = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mode {
    pub label: String,
    /// Duration in seconds.
    pub time: u64,
}

impl Mode {
    pub fn new(label: impl Into<String>, secs: u64) -> Self {
        Self {
            label: label.into(),
            time: secs,
        }
    }

    /// Uses saturating arithmetic so absurd minute counts cannot overflow.
    pub fn from_minutes(label: impl Into<String>, minutes: u64) -> Self {
        Self::new(label, minutes.saturating_mul(60))
    }

    pub fn duration_secs(&self) -> u64 {
        self.time
    }
}

/// Insertion-ordered mapping of mode id to [`Mode`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModeMap(IndexMap<ModeId, Mode>);

impl ModeMap {
    /// Pomodoro 25 min, short break 5 min, long break 15 min.
    pub fn default_modes() -> Self {
        [
            ("pomodoro", Mode::from_minutes("Pomodoro", 25)),
            ("short", Mode::from_minutes("Short Break", 5)),
            ("long", Mode::from_minutes("Long Break", 15)),
        ]
        .into_iter()
        .map(|(id, mode)| (id.to_string(), mode))
        .collect()
    }

    pub fn empty() -> Self {
        Self(IndexMap::new())
    }

    pub fn insert(&mut self, id: impl Into<ModeId>, mode: Mode) {
        self.0.insert(id.into(), mode);
    }

    pub fn get(&self, id: &str) -> Option<&Mode> {
        self.0.get(id)
    }

    pub fn duration_of(&self, id: &str) -> Option<u64> {
        self.get(id).map(Mode::duration_secs)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Mode)> {
        self.0.iter().map(|(id, mode)| (id.as_str(), mode))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn first_id(&self) -> Option<&str> {
        self.0.keys().next().map(String::as_str)
    }

    /// The mode following `id` in display order, wrapping around.
    pub fn next_after(&self, id: &str) -> Option<&str> {
        let idx = self.0.get_index_of(id)?;
        let next = (idx + 1) % self.0.len();
        self.0.get_index(next).map(|(k, _)| k.as_str())
    }

    /// Every mode must have a duration in `1..=MAX_DURATION_SECS` and the
    /// mapping must not be empty.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.is_empty() {
            return Err(SettingsError::Empty);
        }
        for (id, mode) in self.iter() {
            if mode.time == 0 {
                return Err(SettingsError::NonPositiveDuration {
                    mode: id.to_string(),
                    value: mode.time.to_string(),
                });
            }
            if mode.time > MAX_DURATION_SECS {
                return Err(SettingsError::TooLong {
                    mode: id.to_string(),
                    secs: mode.time,
                    max: MAX_DURATION_SECS,
                });
            }
        }
        Ok(())
    }

    /// Copy with every duration capped at [`MAX_DURATION_SECS`]. Used for
    /// mappings that arrive from other participants and cannot be rejected.
    pub fn capped(&self) -> Self {
        self.iter()
            .map(|(id, mode)| {
                let mut mode = mode.clone();
                mode.time = mode.time.min(MAX_DURATION_SECS);
                (id.to_string(), mode)
            })
            .collect()
    }

    /// Copy of this mapping with one mode's duration replaced.
    pub fn with_duration(&self, id: &str, secs: u64) -> Result<Self, SettingsError> {
        let mut next = self.clone();
        let mode = next
            .0
            .get_mut(id)
            .ok_or_else(|| SettingsError::UnknownMode(id.to_string()))?;
        mode.time = secs;
        Ok(next)
    }

    /// Build a mapping from loosely-typed JSON, e.g. a settings form payload.
    ///
    /// Non-numeric, negative, fractional or zero durations are rejected with
    /// the offending mode named; nothing is partially accepted.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, SettingsError> {
        let obj = value
            .as_object()
            .ok_or_else(|| SettingsError::Malformed("expected an object of modes".into()))?;

        let mut modes = Self::empty();
        for (id, entry) in obj {
            let label = entry
                .get("label")
                .and_then(|l| l.as_str())
                .unwrap_or(id.as_str())
                .to_string();
            let raw = entry
                .get("time")
                .ok_or_else(|| SettingsError::Malformed(format!("mode '{id}' has no time")))?;
            let secs = match raw {
                serde_json::Value::Number(n) => match n.as_u64() {
                    Some(secs) => secs,
                    None => {
                        return Err(SettingsError::NonPositiveDuration {
                            mode: id.clone(),
                            value: n.to_string(),
                        })
                    }
                },
                other => {
                    return Err(SettingsError::NonNumericDuration {
                        mode: id.clone(),
                        value: other.to_string(),
                    })
                }
            };
            modes.insert(id.clone(), Mode::new(label, secs));
        }
        modes.validate()?;
        Ok(modes)
    }
}

impl Default for ModeMap {
    fn default() -> Self {
        Self::default_modes()
    }
}

impl FromIterator<(ModeId, Mode)> for ModeMap {
    fn from_iter<I: IntoIterator<Item = (ModeId, Mode)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Parse a `mode=minutes` override as typed on the command line.
///
/// Returns the mode id and the duration in seconds.
pub fn parse_minutes_override(input: &str) -> Result<(ModeId, u64), SettingsError> {
    let (id, minutes) = input
        .split_once('=')
        .ok_or_else(|| SettingsError::Malformed(format!("expected mode=minutes, got '{input}'")))?;
    let id = id.trim();
    let minutes = minutes.trim();
    if id.is_empty() {
        return Err(SettingsError::Malformed(format!("missing mode id in '{input}'")));
    }
    let value: i64 = minutes
        .parse()
        .map_err(|_| SettingsError::NonNumericDuration {
            mode: id.to_string(),
            value: minutes.to_string(),
        })?;
    if value <= 0 {
        return Err(SettingsError::NonPositiveDuration {
            mode: id.to_string(),
            value: minutes.to_string(),
        });
    }
    let secs = (value as u64).saturating_mul(60);
    if secs > MAX_DURATION_SECS {
        return Err(SettingsError::TooLong {
            mode: id.to_string(),
            secs,
            max: MAX_DURATION_SECS,
        });
    }
    Ok((id.to_string(), secs))
}

/// Resolves which mode mapping is in effect.
///
/// Synced: the session record's settings snapshot. Solo: the locally
/// persisted (or default) mapping held here.
#[derive(Debug, Clone)]
pub struct ModeRegistry {
    local: ModeMap,
}

impl ModeRegistry {
    pub fn new(local: ModeMap) -> Self {
        Self { local }
    }

    pub fn local(&self) -> &ModeMap {
        &self.local
    }

    pub fn effective<'a>(&'a self, source: &'a TimeSource) -> &'a ModeMap {
        match source {
            TimeSource::Synced(synced) => &synced.record.settings,
            TimeSource::Solo(_) => &self.local,
        }
    }

    /// Check a proposed mapping against the currently selected mode.
    ///
    /// The current mode must survive the change, otherwise there is no
    /// duration to reset to.
    pub fn validate_proposal(proposed: &ModeMap, current_mode: &str) -> Result<(), SettingsError> {
        proposed.validate()?;
        if !proposed.contains(current_mode) {
            return Err(SettingsError::UnknownMode(current_mode.to_string()));
        }
        Ok(())
    }

    pub fn replace_local(&mut self, modes: ModeMap) {
        self.local = modes;
    }
}
