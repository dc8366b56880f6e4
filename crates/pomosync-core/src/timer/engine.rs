//! Timer engine implementation.
//!
//! The engine is a clock-injected state machine with no internal thread and
//! no I/O. Every operation takes the current instant and returns a
//! [`Transition`]: at most one outgoing session write plus the events it
//! produced. The runtime executes the write and reacts to the events.
//!
//! ## Phases
//!
//! ```text
//! Idle --toggle--> Ticking --tick(remaining = 0)--> Expired --> Idle
//!   ^                 |
//!   +-----toggle------+
//! ```
//!
//! Exactly two autonomous event sources drive it: [`TimerEngine::tick`]
//! (the periodic scheduler) and [`TimerEngine::apply_remote`] (the session
//! subscription). User actions are the third input.
//!
//! ## Usage
//!
//! ```ignore
//! let mut engine = TimerEngine::new(ModeMap::default_modes(), EngineSettings::default(), client_id);
//! let t = engine.toggle(Utc::now());
//! // In a loop, once per second:
//! let t = engine.tick(Utc::now()); // t.events contains TimerCompleted on expiry
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::modes::{ModeId, ModeMap, ModeRegistry, MAX_DURATION_SECS};
use super::resolver::{
    resolve, resolve_local, resolve_record, should_snap, LocalState, SourceKind, SyncedState,
    TimeSource,
};
use crate::error::SettingsError;
use crate::events::Event;
use crate::session::{SessionPatch, SessionRecord};

/// How a solo countdown advances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoloClock {
    /// Keep a local absolute deadline and resolve like a synced session.
    /// Survives sleep and suspend.
    #[default]
    Deadline,
    /// Decrement by one second per tick.
    Tick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Remote values within this many seconds of the displayed value are ignored.
    pub snap_tolerance_secs: u64,
    pub solo_clock: SoloClock,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            snap_tolerance_secs: 1,
            solo_clock: SoloClock::Deadline,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerPhase {
    Idle,
    Ticking,
    /// Running record whose expiry was already handled; waiting for the
    /// session to converge to paused.
    Expired,
}

/// Outcome of one engine operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transition {
    /// The single session store write this transition requires, if any.
    pub write: Option<SessionPatch>,
    pub events: Vec<Event>,
}

impl Transition {
    fn none() -> Self {
        Self::default()
    }

    fn event(event: Event) -> Self {
        Self {
            write: None,
            events: vec![event],
        }
    }

    fn write(patch: SessionPatch, event: Event) -> Self {
        Self {
            write: Some(patch),
            events: vec![event],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.write.is_none() && self.events.is_empty()
    }

    /// Whether this transition contains the completion event.
    pub fn completed(&self) -> bool {
        self.events.iter().any(Event::is_completion)
    }
}

/// Snapshot for presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerView {
    pub source: SourceKind,
    pub session_id: Option<String>,
    pub mode: ModeId,
    pub mode_label: String,
    pub remaining_secs: u64,
    pub clock: String,
    pub running: bool,
    pub phase: TimerPhase,
    pub is_host: bool,
    pub modes: ModeMap,
}

/// `now + secs`, or `None` when the sum leaves chrono's range.
fn deadline_after(now: DateTime<Utc>, secs: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(secs).ok()?;
    now.checked_add_signed(Duration::try_seconds(secs)?)
}

/// Cap a record received from the store to durations this engine can run.
fn bounded(mut record: SessionRecord) -> SessionRecord {
    record.remaining = record.remaining.min(MAX_DURATION_SECS);
    record.settings = record.settings.capped();
    record
}

/// `MM:SS`, minutes unbounded.
pub fn format_clock(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// Core synchronization engine.
#[derive(Debug, Clone)]
pub struct TimerEngine {
    source: TimeSource,
    registry: ModeRegistry,
    /// The single value rendered to the user.
    displayed: u64,
    settings: EngineSettings,
    client_id: String,
    /// Deadline whose expiry has already been handled.
    expired_deadline: Option<DateTime<Utc>>,
}

impl TimerEngine {
    /// Create a solo engine, paused at the first mode's full duration.
    pub fn new(local_modes: ModeMap, settings: EngineSettings, client_id: impl Into<String>) -> Self {
        let local_modes = if local_modes.validate().is_ok() {
            local_modes
        } else {
            tracing::warn!("local modes invalid, falling back to defaults");
            ModeMap::default_modes()
        };
        let (mode, duration) = local_modes
            .iter()
            .next()
            .map(|(id, m)| (id.to_string(), m.duration_secs()))
            .unwrap_or_else(|| ("pomodoro".to_string(), 25 * 60));
        Self {
            source: TimeSource::Solo(LocalState::paused(mode, duration)),
            registry: ModeRegistry::new(local_modes),
            displayed: duration,
            settings,
            client_id: client_id.into(),
            expired_deadline: None,
        }
    }

    /// Resume a persisted solo state. Falls back to [`TimerEngine::new`]
    /// when the saved mode no longer exists.
    pub fn restore(
        local_modes: ModeMap,
        local: LocalState,
        settings: EngineSettings,
        client_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut engine = Self::new(local_modes, settings, client_id);
        if engine.registry.local().contains(&local.mode) {
            engine.displayed = resolve_local(&local, now);
            engine.source = TimeSource::Solo(local);
        }
        engine
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// The mode mapping currently in effect.
    pub fn modes(&self) -> &ModeMap {
        self.registry.effective(&self.source)
    }

    pub fn local_modes(&self) -> &ModeMap {
        self.registry.local()
    }

    pub fn current_mode(&self) -> &str {
        self.source.mode()
    }

    pub fn current_mode_label(&self) -> &str {
        self.modes()
            .get(self.current_mode())
            .map(|m| m.label.as_str())
            .unwrap_or_else(|| self.current_mode())
    }

    pub fn displayed_remaining(&self) -> u64 {
        self.displayed
    }

    pub fn is_running(&self) -> bool {
        self.source.is_running()
    }

    pub fn is_synced(&self) -> bool {
        self.source.is_synced()
    }

    pub fn source(&self) -> &TimeSource {
        &self.source
    }

    pub fn session_id(&self) -> Option<&str> {
        self.source.session_id()
    }

    pub fn record(&self) -> Option<&SessionRecord> {
        match &self.source {
            TimeSource::Synced(synced) => Some(&synced.record),
            TimeSource::Solo(_) => None,
        }
    }

    pub fn local_state(&self) -> Option<&LocalState> {
        match &self.source {
            TimeSource::Solo(local) => Some(local),
            TimeSource::Synced(_) => None,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    /// Whether this client created the bound session.
    pub fn is_host(&self) -> bool {
        self.record()
            .map(|rec| rec.host_id == self.client_id)
            .unwrap_or(false)
    }

    /// Solo users always may; in a session only the host may.
    pub fn can_edit_settings(&self) -> bool {
        !self.is_synced() || self.is_host()
    }

    /// Remaining seconds according to the authoritative source.
    pub fn resolve(&self, now: DateTime<Utc>) -> u64 {
        resolve(&self.source, now)
    }

    pub fn phase(&self) -> TimerPhase {
        if !self.is_running() {
            return TimerPhase::Idle;
        }
        match self.record().and_then(SessionRecord::deadline) {
            Some(end) if self.expired_deadline == Some(end) => TimerPhase::Expired,
            _ => TimerPhase::Ticking,
        }
    }

    pub fn view(&self) -> TimerView {
        TimerView {
            source: self.source.kind(),
            session_id: self.session_id().map(str::to_string),
            mode: self.current_mode().to_string(),
            mode_label: self.current_mode_label().to_string(),
            remaining_secs: self.displayed,
            clock: format_clock(self.displayed),
            running: self.is_running(),
            phase: self.phase(),
            is_host: self.is_host(),
            modes: self.modes().clone(),
        }
    }

    fn current_duration(&self) -> Option<u64> {
        self.modes().duration_of(self.current_mode())
    }

    // ── User actions ─────────────────────────────────────────────────

    /// Start when idle, pause when running.
    pub fn toggle(&mut self, now: DateTime<Utc>) -> Transition {
        if self.is_running() {
            self.pause(now)
        } else {
            self.start(now)
        }
    }

    fn start(&mut self, now: DateTime<Utc>) -> Transition {
        if self.displayed == 0 {
            // A finished countdown restarts from the mode's full duration.
            if let Some(full) = self.current_duration() {
                self.displayed = full;
            }
        }
        let remaining = self.displayed.min(MAX_DURATION_SECS);
        let Some(deadline) = deadline_after(now, remaining) else {
            tracing::warn!(remaining, %now, "deadline out of range, timer not started");
            return Transition::none();
        };
        self.displayed = remaining;

        match &mut self.source {
            TimeSource::Solo(local) => {
                local.remaining = remaining;
                local.deadline = match self.settings.solo_clock {
                    SoloClock::Deadline => Some(deadline),
                    SoloClock::Tick => None,
                };
                local.running = true;
                tracing::debug!(mode = %local.mode, remaining, "solo timer started");
                Transition::event(Event::TimerStarted {
                    mode: local.mode.clone(),
                    remaining_secs: remaining,
                    synced: false,
                    at: now,
                })
            }
            TimeSource::Synced(synced) => {
                let patch = SessionPatch::start(deadline);
                synced.record.apply(&patch);
                tracing::debug!(session = %synced.session_id, %deadline, "synced timer started");
                Transition::write(
                    patch,
                    Event::TimerStarted {
                        mode: synced.record.mode.clone(),
                        remaining_secs: remaining,
                        synced: true,
                        at: now,
                    },
                )
            }
        }
    }

    fn pause(&mut self, now: DateTime<Utc>) -> Transition {
        // Capture the live value, not a stale counter.
        let remaining = self.resolve(now);
        self.displayed = remaining;

        match &mut self.source {
            TimeSource::Solo(local) => {
                local.running = false;
                local.deadline = None;
                local.remaining = remaining;
                tracing::debug!(mode = %local.mode, remaining, "solo timer paused");
                Transition::event(Event::TimerPaused {
                    mode: local.mode.clone(),
                    remaining_secs: remaining,
                    synced: false,
                    at: now,
                })
            }
            TimeSource::Synced(synced) => {
                let patch = SessionPatch::pause(remaining);
                synced.record.apply(&patch);
                tracing::debug!(session = %synced.session_id, remaining, "synced timer paused");
                Transition::write(
                    patch,
                    Event::TimerPaused {
                        mode: synced.record.mode.clone(),
                        remaining_secs: remaining,
                        synced: true,
                        at: now,
                    },
                )
            }
        }
    }

    /// Switch mode. Always stops the timer and loads the mode's full duration.
    pub fn change_mode(&mut self, mode: &str, now: DateTime<Utc>) -> Result<Transition, SettingsError> {
        let duration = self
            .modes()
            .duration_of(mode)
            .ok_or_else(|| SettingsError::UnknownMode(mode.to_string()))?;

        let synced = match &mut self.source {
            TimeSource::Solo(local) => {
                // stop, then set time, then update the mode reference
                local.running = false;
                local.deadline = None;
                local.remaining = duration;
                self.displayed = duration;
                local.mode = mode.to_string();
                None
            }
            TimeSource::Synced(synced) => {
                let patch = SessionPatch::change_mode(mode, duration);
                synced.record.apply(&patch);
                self.displayed = duration;
                Some(patch)
            }
        };

        tracing::debug!(mode, duration, "mode changed");
        let event = Event::ModeChanged {
            mode: mode.to_string(),
            duration_secs: duration,
            synced: synced.is_some(),
            at: now,
        };
        Ok(match synced {
            Some(patch) => Transition::write(patch, event),
            None => Transition::event(event),
        })
    }

    /// Replace the mode mapping.
    ///
    /// Rejected mappings leave every piece of state untouched. In a session
    /// the change pauses and resets the countdown to the current mode's new
    /// duration. Solo, the countdown is only stopped and reset when the
    /// current mode's duration actually changed.
    pub fn set_settings(
        &mut self,
        modes: ModeMap,
        now: DateTime<Utc>,
    ) -> Result<Transition, SettingsError> {
        ModeRegistry::validate_proposal(&modes, self.current_mode())?;
        let duration = modes
            .duration_of(self.current_mode())
            .ok_or_else(|| SettingsError::UnknownMode(self.current_mode().to_string()))?;

        match &mut self.source {
            TimeSource::Synced(synced) => {
                let patch = SessionPatch::settings(modes.clone(), duration);
                synced.record.apply(&patch);
                self.displayed = duration;
                tracing::debug!(session = %synced.session_id, duration, "session settings replaced");
                Ok(Transition::write(
                    patch,
                    Event::SettingsChanged {
                        modes,
                        synced: true,
                        at: now,
                    },
                ))
            }
            TimeSource::Solo(local) => {
                let changed = self.registry.local().duration_of(&local.mode) != Some(duration);
                self.registry.replace_local(modes.clone());
                if changed {
                    // clear the running flag before the displayed value moves
                    local.running = false;
                    local.deadline = None;
                    local.remaining = duration;
                    self.displayed = duration;
                }
                tracing::debug!(changed, duration, "local settings replaced");
                Ok(Transition::event(Event::SettingsChanged {
                    modes,
                    synced: false,
                    at: now,
                }))
            }
        }
    }

    // ── Event sources ────────────────────────────────────────────────

    /// Periodic recomputation. Synced and deadline-clock solo timers
    /// re-derive the remaining time; tick-clock solo timers decrement by one.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Transition {
        match &mut self.source {
            TimeSource::Solo(local) => {
                if !local.running {
                    return Transition::none();
                }
                let remaining = match (self.settings.solo_clock, local.deadline) {
                    (SoloClock::Deadline, Some(_)) => resolve_local(local, now),
                    _ => local.remaining.saturating_sub(1),
                };
                local.remaining = remaining;
                self.displayed = remaining;
                if remaining > 0 {
                    return Transition::none();
                }
                // Stamp the instant the countdown ended, not when it was noticed.
                let ended = local.deadline.map_or(now, |end| end.min(now));
                local.running = false;
                local.deadline = None;
                tracing::debug!(mode = %local.mode, %ended, "solo timer expired");
                Transition::event(Event::TimerCompleted {
                    mode: local.mode.clone(),
                    synced: false,
                    at: ended,
                })
            }
            TimeSource::Synced(synced) => {
                if !synced.record.is_running() {
                    return Transition::none();
                }
                let remaining = resolve_record(&synced.record, now);
                self.displayed = remaining;
                if remaining > 0 {
                    return Transition::none();
                }
                let deadline = synced.record.deadline();
                if deadline.is_some() && self.expired_deadline == deadline {
                    return Transition::none();
                }
                self.expired_deadline = deadline;
                let ended = deadline.map_or(now, |end| end.min(now));
                let patch = SessionPatch::pause(0);
                synced.record.apply(&patch);
                tracing::debug!(session = %synced.session_id, %ended, "synced timer expired");
                Transition::write(
                    patch,
                    Event::TimerCompleted {
                        mode: synced.record.mode.clone(),
                        synced: true,
                        at: ended,
                    },
                )
            }
        }
    }

    /// Reconcile against a record pushed by the session subscription.
    ///
    /// The displayed value only moves when the record's resolved time differs
    /// by more than the snap tolerance, or when the mode or status changed.
    /// A remote move from running to paused at zero is the expiry of the
    /// current countdown and completes it here too, unless already handled.
    pub fn apply_remote(&mut self, record: SessionRecord, now: DateTime<Utc>) -> Transition {
        let TimeSource::Synced(synced) = &mut self.source else {
            tracing::debug!(session = %record.id, "remote record ignored while solo");
            return Transition::none();
        };
        if record.id != synced.session_id {
            tracing::debug!(session = %record.id, "remote record for another session ignored");
            return Transition::none();
        }

        let previous = std::mem::replace(&mut synced.record, bounded(record));
        let current = &synced.record;
        let mut events = Vec::new();

        if previous.settings != current.settings {
            events.push(Event::SettingsChanged {
                modes: current.settings.clone(),
                synced: true,
                at: now,
            });
        }
        if previous.mode != current.mode {
            events.push(Event::ModeChanged {
                mode: current.mode.clone(),
                duration_secs: current.remaining,
                synced: true,
                at: now,
            });
        }

        let remote_expiry = match previous.deadline() {
            Some(end)
                if !current.is_running()
                    && current.remaining == 0
                    && previous.mode == current.mode
                    && self.expired_deadline != Some(end) =>
            {
                Some(end)
            }
            _ => None,
        };
        // A late echo of a start whose expiry was already handled.
        let stale_echo =
            current.deadline().is_some() && current.deadline() == self.expired_deadline;
        if let Some(end) = remote_expiry {
            self.expired_deadline = Some(end);
            events.push(Event::TimerCompleted {
                mode: current.mode.clone(),
                synced: true,
                at: end.min(now),
            });
        } else if previous.status != current.status && !stale_echo {
            let remaining_secs = resolve_record(current, now);
            events.push(if current.is_running() {
                Event::TimerStarted {
                    mode: current.mode.clone(),
                    remaining_secs,
                    synced: true,
                    at: now,
                }
            } else {
                Event::TimerPaused {
                    mode: current.mode.clone(),
                    remaining_secs,
                    synced: true,
                    at: now,
                }
            });
        }

        let structural = previous.mode != current.mode || previous.status != current.status;
        let resolved = resolve_record(current, now);
        if resolved != self.displayed
            && (structural
                || should_snap(self.displayed, resolved, self.settings.snap_tolerance_secs))
        {
            events.push(Event::Snapped {
                from_secs: self.displayed,
                to_secs: resolved,
                at: now,
            });
            self.displayed = resolved;
        }

        Transition {
            write: None,
            events,
        }
    }

    // ── Source transitions ───────────────────────────────────────────

    /// Bind to a session (join or create) and recompute immediately.
    ///
    /// A running record whose deadline has already passed is treated as
    /// handled: no completion fires, and a converging pause is written.
    pub fn bind_session(&mut self, record: SessionRecord, now: DateTime<Utc>) -> Transition {
        let mut record = bounded(record);
        let session_id = record.id.clone();
        let resolved = resolve_record(&record, now);
        let mut write = None;
        if let Some(end) = record.deadline() {
            if resolved == 0 {
                self.expired_deadline = Some(end);
                let patch = SessionPatch::pause(0);
                record.apply(&patch);
                write = Some(patch);
            }
        }

        tracing::info!(session = %session_id, remaining = resolved, "bound to session");
        self.source = TimeSource::Synced(SyncedState {
            session_id: session_id.clone(),
            record,
        });
        self.displayed = resolved;

        Transition {
            write,
            events: vec![Event::SessionBound {
                session_id,
                at: now,
            }],
        }
    }

    /// Leave the bound session and continue from local state.
    ///
    /// The countdown carries over: a running session keeps counting toward
    /// the same deadline locally, a paused one stays paused at its value.
    pub fn unbind_session(&mut self, now: DateTime<Utc>) -> Transition {
        let TimeSource::Synced(synced) = &self.source else {
            return Transition::none();
        };
        let session_id = synced.session_id.clone();
        let record = &synced.record;
        let remaining = resolve_record(record, now);
        let running = record.is_running() && remaining > 0;

        let mode = if self.registry.local().contains(&record.mode) {
            record.mode.clone()
        } else {
            self.registry
                .local()
                .first_id()
                .unwrap_or(record.mode.as_str())
                .to_string()
        };
        let deadline = match (running, self.settings.solo_clock) {
            (true, SoloClock::Deadline) => record.end_time,
            _ => None,
        };

        tracing::info!(session = %session_id, remaining, running, "left session");
        self.source = TimeSource::Solo(LocalState {
            mode,
            running,
            remaining,
            deadline,
        });
        self.displayed = remaining;

        Transition::event(Event::SessionUnbound {
            session_id,
            at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{NewSession, SessionStatus};
    use crate::timer::Mode;

    const CLIENT: &str = "client-a";

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + Duration::seconds(secs)
    }

    fn solo(clock: SoloClock) -> TimerEngine {
        TimerEngine::new(
            ModeMap::default_modes(),
            EngineSettings {
                solo_clock: clock,
                ..EngineSettings::default()
            },
            CLIENT,
        )
    }

    fn session_record(host: &str) -> SessionRecord {
        SessionRecord::from_new(
            "ROOM01".into(),
            NewSession {
                host_id: host.into(),
                mode: "pomodoro".into(),
                remaining: 1500,
                settings: ModeMap::default_modes(),
            },
            t0(),
        )
    }

    fn synced() -> TimerEngine {
        let mut engine = solo(SoloClock::Deadline);
        engine.bind_session(session_record(CLIENT), t0());
        engine
    }

    fn ticks(engine: &mut TimerEngine, from: i64, to: i64) -> Vec<Transition> {
        (from..=to).map(|s| engine.tick(at(s))).collect()
    }

    #[test]
    fn new_engine_is_idle_at_first_mode() {
        let engine = solo(SoloClock::Deadline);
        assert_eq!(engine.current_mode(), "pomodoro");
        assert_eq!(engine.displayed_remaining(), 1500);
        assert!(!engine.is_running());
        assert_eq!(engine.phase(), TimerPhase::Idle);
        assert!(engine.can_edit_settings());
    }

    #[test]
    fn solo_pause_resume_round_trip_both_clocks() {
        for clock in [SoloClock::Deadline, SoloClock::Tick] {
            let mut engine = solo(clock);
            engine.toggle(at(0));
            ticks(&mut engine, 1, 5);
            engine.toggle(at(5));
            assert_eq!(engine.displayed_remaining(), 1495, "{clock:?}");
            assert!(!engine.is_running());
            assert_eq!(engine.local_state().unwrap().remaining, 1495);
        }
    }

    #[test]
    fn deadline_clock_survives_missed_ticks() {
        let mut engine = solo(SoloClock::Deadline);
        engine.toggle(at(0));
        // process slept for ten minutes
        engine.tick(at(600));
        assert_eq!(engine.displayed_remaining(), 900);
    }

    #[test]
    fn tick_clock_decrements_per_tick() {
        let mut engine = solo(SoloClock::Tick);
        engine.toggle(at(0));
        engine.tick(at(600));
        assert_eq!(engine.displayed_remaining(), 1499);
    }

    #[test]
    fn solo_completion_fires_once() {
        let mut engine = solo(SoloClock::Deadline);
        engine.set_settings(
            ModeMap::default_modes().with_duration("pomodoro", 3).unwrap(),
            at(0),
        )
        .unwrap();
        engine.toggle(at(0));
        let fired: usize = ticks(&mut engine, 1, 6)
            .iter()
            .filter(|t| t.completed())
            .count();
        assert_eq!(fired, 1);
        assert!(!engine.is_running());
        assert_eq!(engine.displayed_remaining(), 0);
    }

    #[test]
    fn start_at_zero_restarts_full_duration() {
        let mut engine = solo(SoloClock::Deadline);
        engine.set_settings(
            ModeMap::default_modes().with_duration("pomodoro", 2).unwrap(),
            at(0),
        )
        .unwrap();
        engine.toggle(at(0));
        engine.tick(at(2));
        assert_eq!(engine.displayed_remaining(), 0);

        engine.toggle(at(10));
        assert!(engine.is_running());
        assert_eq!(engine.displayed_remaining(), 2);
    }

    #[test]
    fn change_mode_resets_and_stops_solo() {
        let mut engine = solo(SoloClock::Deadline);
        engine.toggle(at(0));
        let t = engine.change_mode("short", at(10)).unwrap();
        assert!(t.write.is_none());
        assert_eq!(engine.displayed_remaining(), 300);
        assert!(!engine.is_running());
        assert_eq!(engine.current_mode(), "short");
    }

    #[test]
    fn change_mode_unknown_is_rejected_without_side_effects() {
        let mut engine = solo(SoloClock::Deadline);
        engine.toggle(at(0));
        let err = engine.change_mode("nap", at(1)).unwrap_err();
        assert_eq!(err, SettingsError::UnknownMode("nap".into()));
        assert!(engine.is_running());
        assert_eq!(engine.current_mode(), "pomodoro");
    }

    #[test]
    fn solo_settings_reset_only_when_current_duration_changes() {
        let mut engine = solo(SoloClock::Deadline);
        engine.toggle(at(0));
        engine.tick(at(10));

        // Only the short break changed: keep counting.
        let modes = ModeMap::default_modes().with_duration("short", 120).unwrap();
        engine.set_settings(modes.clone(), at(10)).unwrap();
        assert!(engine.is_running());
        assert_eq!(engine.displayed_remaining(), 1490);

        // Current mode changed: stop and reset.
        let modes = modes.with_duration("pomodoro", 600).unwrap();
        let t = engine.set_settings(modes, at(11)).unwrap();
        assert!(!engine.is_running());
        assert_eq!(engine.displayed_remaining(), 600);
        assert!(matches!(t.events[0], Event::SettingsChanged { synced: false, .. }));
        assert_eq!(engine.local_modes().duration_of("pomodoro"), Some(600));
    }

    #[test]
    fn invalid_settings_leave_state_untouched() {
        let mut engine = synced();
        engine.toggle(at(0));
        let before = engine.record().cloned();
        let bad = ModeMap::default_modes().with_duration("long", 0).unwrap();
        assert!(engine.set_settings(bad, at(5)).is_err());
        assert_eq!(engine.record().cloned(), before);
        assert!(engine.is_running());
    }

    #[test]
    fn synced_start_writes_deadline() {
        let mut engine = synced();
        let t = engine.toggle(at(0));
        let patch = t.write.unwrap();
        assert_eq!(patch.status, Some(SessionStatus::Running));
        assert_eq!(patch.end_time, Some(Some(at(1500))));
        assert!(engine.is_running());
    }

    #[test]
    fn synced_pause_captures_live_value() {
        let mut engine = synced();
        engine.toggle(at(0));
        // no ticks at all between start and pause
        let t = engine.toggle(at(5));
        assert_eq!(t.write, Some(SessionPatch::pause(1495)));
        assert_eq!(engine.displayed_remaining(), 1495);
        assert!(!engine.is_running());
    }

    #[test]
    fn synced_tick_recomputes_from_deadline() {
        let mut engine = synced();
        engine.toggle(at(0));
        engine.tick(at(1));
        engine.tick(at(40));
        assert_eq!(engine.displayed_remaining(), 1460);
    }

    #[test]
    fn synced_completion_fires_once_and_converges() {
        let mut engine = synced();
        engine.set_settings(
            ModeMap::default_modes().with_duration("pomodoro", 1).unwrap(),
            at(0),
        )
        .unwrap();
        engine.toggle(at(0));

        let out = ticks(&mut engine, 1, 3);
        assert_eq!(out.iter().filter(|t| t.completed()).count(), 1);
        let writes: Vec<_> = out.iter().filter_map(|t| t.write.clone()).collect();
        assert_eq!(writes, vec![SessionPatch::pause(0)]);

        let rec = engine.record().unwrap();
        assert_eq!(rec.status, SessionStatus::Paused);
        assert_eq!(rec.remaining, 0);
        assert_eq!(rec.end_time, None);
    }

    #[test]
    fn stale_running_echo_after_expiry_does_not_refire() {
        let mut engine = synced();
        engine.toggle(at(0));
        let running = engine.record().cloned().unwrap();

        let t = engine.tick(at(1500));
        assert!(t.completed());

        // The echo of the earlier start arrives late.
        let echo = engine.apply_remote(running, at(1500));
        assert!(echo
            .events
            .iter()
            .all(|e| !matches!(e, Event::TimerStarted { .. } | Event::TimerCompleted { .. })));
        assert_eq!(engine.phase(), TimerPhase::Expired);
        let again = engine.tick(at(1501));
        assert!(again.is_empty());

        // Then the echo of the pause.
        let mut paused = engine.record().cloned().unwrap();
        paused.apply(&SessionPatch::pause(0));
        let t = engine.apply_remote(paused, at(1501));
        assert!(!t.completed());
        assert_eq!(engine.phase(), TimerPhase::Idle);
    }

    #[test]
    fn late_detected_expiry_is_stamped_at_the_deadline() {
        let start = DateTime::parse_from_rfc3339("2026-03-02T23:59:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let deadline = start + Duration::seconds(30);
        let noticed = start + Duration::hours(9);

        let modes = ModeMap::default_modes().with_duration("pomodoro", 30).unwrap();
        let mut engine = TimerEngine::new(modes, EngineSettings::default(), CLIENT);
        engine.toggle(start);
        let t = engine.tick(noticed);
        assert_eq!(
            t.events,
            vec![Event::TimerCompleted {
                mode: "pomodoro".into(),
                synced: false,
                at: deadline,
            }]
        );

        let mut engine = synced();
        engine.toggle(at(0));
        let t = engine.tick(at(1500 + 9 * 3600));
        assert!(t.events.iter().any(|e| matches!(
            e,
            Event::TimerCompleted { at: stamp, .. } if *stamp == at(1500)
        )));
    }

    #[test]
    fn remote_expiry_is_stamped_at_the_deadline() {
        let mut engine = synced();
        engine.toggle(at(0));
        let mut rec = engine.record().cloned().unwrap();
        rec.apply(&SessionPatch::pause(0));
        let t = engine.apply_remote(rec, at(4000));
        assert!(t.events.iter().any(|e| matches!(
            e,
            Event::TimerCompleted { at: stamp, .. } if *stamp == at(1500)
        )));
    }

    #[test]
    fn oversized_remote_durations_are_capped_before_starting() {
        let mut engine = solo(SoloClock::Deadline);
        let mut rec = session_record("client-b");
        rec.remaining = u64::MAX;
        rec.settings = ModeMap::default_modes()
            .with_duration("pomodoro", 10_000_000_000_000)
            .unwrap();
        engine.bind_session(rec, t0());
        assert_eq!(engine.displayed_remaining(), MAX_DURATION_SECS);
        assert!(engine.modes().validate().is_ok());

        let t = engine.toggle(at(0));
        assert!(t.write.is_some());
        assert!(engine.is_running());
        assert_eq!(
            engine.record().unwrap().end_time,
            Some(at(MAX_DURATION_SECS as i64))
        );

        engine.change_mode("pomodoro", at(1)).unwrap();
        assert_eq!(engine.displayed_remaining(), MAX_DURATION_SECS);
    }

    #[test]
    fn start_at_the_end_of_time_is_refused() {
        let mut engine = solo(SoloClock::Deadline);
        let t = engine.toggle(DateTime::<Utc>::MAX_UTC);
        assert!(t.is_empty());
        assert!(!engine.is_running());
        assert_eq!(deadline_after(t0(), u64::MAX), None);
    }

    #[test]
    fn remote_expiry_completes_once() {
        let mut engine = synced();
        engine.toggle(at(0));
        engine.tick(at(1498));

        // Another participant expired first and wrote the pause.
        let mut rec = engine.record().cloned().unwrap();
        rec.apply(&SessionPatch::pause(0));
        let t = engine.apply_remote(rec.clone(), at(1499));
        assert!(t.completed());
        assert_eq!(engine.displayed_remaining(), 0);

        let t = engine.apply_remote(rec, at(1499));
        assert!(!t.completed());
    }

    #[test]
    fn own_echo_is_a_no_op() {
        let mut engine = synced();
        engine.toggle(at(0));
        let echo = engine.record().cloned().unwrap();
        engine.tick(at(3));
        let t = engine.apply_remote(echo, at(3));
        assert!(t.is_empty());
        assert_eq!(engine.displayed_remaining(), 1497);
    }

    #[test]
    fn remote_jitter_within_tolerance_is_ignored() {
        let mut engine = synced();
        engine.toggle(at(0));
        engine.tick(at(10));
        assert_eq!(engine.displayed_remaining(), 1490);

        // Same running record, deadline one second later (skewed writer).
        let mut rec = engine.record().cloned().unwrap();
        rec.end_time = Some(at(1501));
        engine.apply_remote(rec.clone(), at(10));
        assert_eq!(engine.displayed_remaining(), 1490);

        // Deadline five seconds later snaps.
        rec.end_time = Some(at(1505));
        let t = engine.apply_remote(rec, at(10));
        assert_eq!(engine.displayed_remaining(), 1495);
        assert!(matches!(t.events.last(), Some(Event::Snapped { from_secs: 1490, to_secs: 1495, .. })));
    }

    #[test]
    fn remote_status_change_snaps_even_within_tolerance() {
        let mut engine = synced();
        engine.toggle(at(0));
        engine.tick(at(10));
        let mut rec = engine.record().cloned().unwrap();
        rec.apply(&SessionPatch::pause(1491));
        let t = engine.apply_remote(rec, at(10));
        assert!(!engine.is_running());
        assert_eq!(engine.displayed_remaining(), 1491);
        assert!(matches!(t.events[0], Event::TimerPaused { .. }));
    }

    #[test]
    fn remote_mode_change_resets_display() {
        let mut engine = synced();
        engine.toggle(at(0));
        let mut rec = engine.record().cloned().unwrap();
        rec.apply(&SessionPatch::change_mode("long", 900));
        engine.apply_remote(rec, at(20));
        assert_eq!(engine.current_mode(), "long");
        assert_eq!(engine.displayed_remaining(), 900);
        assert!(!engine.is_running());
    }

    #[test]
    fn synced_change_mode_is_immediate() {
        let mut engine = synced();
        engine.toggle(at(0));
        let t = engine.change_mode("short", at(30)).unwrap();
        assert_eq!(t.write, Some(SessionPatch::change_mode("short", 300)));
        assert_eq!(engine.displayed_remaining(), 300);
        assert!(!engine.is_running());
        assert_eq!(engine.current_mode(), "short");
    }

    #[test]
    fn synced_settings_while_running_pause_and_reset() {
        let mut engine = synced();
        engine.toggle(at(0));
        engine.tick(at(1320)); // 3:00 left
        assert_eq!(engine.displayed_remaining(), 180);

        let modes = ModeMap::default_modes().with_duration("pomodoro", 600).unwrap();
        let t = engine.set_settings(modes.clone(), at(1320)).unwrap();
        let patch = t.write.unwrap();
        assert_eq!(patch, SessionPatch::settings(modes.clone(), 600));

        let rec = engine.record().unwrap();
        assert_eq!(rec.status, SessionStatus::Paused);
        assert_eq!(rec.remaining, 600);
        assert_eq!(rec.end_time, None);
        assert_eq!(engine.modes(), &modes);
        // local settings are not touched by a session change
        assert_eq!(engine.local_modes().duration_of("pomodoro"), Some(1500));
    }

    #[test]
    fn bind_forces_recompute_without_tolerance() {
        let mut engine = solo(SoloClock::Deadline);
        let mut rec = session_record("client-b");
        rec.apply(&SessionPatch::pause(1499));
        engine.bind_session(rec, at(0));
        assert_eq!(engine.displayed_remaining(), 1499);
        assert!(engine.is_synced());
        assert!(!engine.is_host());
        assert!(!engine.can_edit_settings());
    }

    #[test]
    fn bind_to_already_expired_session_converges_without_completion() {
        let mut engine = solo(SoloClock::Deadline);
        let mut rec = session_record("client-b");
        rec.apply(&SessionPatch::start(at(-30)));
        let t = engine.bind_session(rec, at(0));
        assert!(!t.completed());
        assert_eq!(t.write, Some(SessionPatch::pause(0)));
        assert!(ticks(&mut engine, 1, 3).iter().all(|t| !t.completed()));
    }

    #[test]
    fn unbind_keeps_running_countdown() {
        let mut engine = synced();
        engine.toggle(at(0));
        engine.tick(at(100));
        engine.unbind_session(at(100));

        assert!(!engine.is_synced());
        assert!(engine.is_running());
        assert_eq!(engine.displayed_remaining(), 1400);
        engine.tick(at(110));
        assert_eq!(engine.displayed_remaining(), 1390);
    }

    #[test]
    fn unbind_paused_keeps_value_not_full_duration() {
        let mut engine = synced();
        engine.toggle(at(0));
        engine.toggle(at(200));
        engine.unbind_session(at(300));
        assert!(!engine.is_running());
        assert_eq!(engine.displayed_remaining(), 1300);
        assert_eq!(engine.local_state().unwrap().remaining, 1300);
    }

    #[test]
    fn unbind_falls_back_to_local_mode_when_unknown() {
        let mut engine = solo(SoloClock::Deadline);
        let mut settings = ModeMap::empty();
        settings.insert("deep", Mode::from_minutes("Deep Work", 90));
        let mut rec = session_record("client-b");
        rec.mode = "deep".into();
        rec.settings = settings;
        rec.remaining = 5400;
        engine.bind_session(rec, at(0));
        engine.unbind_session(at(0));
        assert_eq!(engine.current_mode(), "pomodoro");
        assert_eq!(engine.displayed_remaining(), 5400);
    }

    #[test]
    fn remote_record_ignored_while_solo() {
        let mut engine = solo(SoloClock::Deadline);
        let t = engine.apply_remote(session_record(CLIENT), at(0));
        assert!(t.is_empty());
        assert!(!engine.is_synced());
    }

    #[test]
    fn restore_resumes_running_solo_state() {
        let local = LocalState {
            mode: "short".into(),
            running: true,
            remaining: 300,
            deadline: Some(at(300)),
        };
        let engine = TimerEngine::restore(
            ModeMap::default_modes(),
            local,
            EngineSettings::default(),
            CLIENT,
            at(100),
        );
        assert_eq!(engine.current_mode(), "short");
        assert_eq!(engine.displayed_remaining(), 200);
        assert!(engine.is_running());
    }

    #[test]
    fn view_formats_clock() {
        let engine = synced();
        let view = engine.view();
        assert_eq!(view.clock, "25:00");
        assert_eq!(view.source, SourceKind::Synced);
        assert_eq!(view.session_id.as_deref(), Some("ROOM01"));
        assert!(view.is_host);
        assert_eq!(format_clock(3599), "59:59");
        assert_eq!(format_clock(6000), "100:00");
    }
}
