mod engine;
mod modes;
mod resolver;

pub use engine::{
    format_clock, EngineSettings, SoloClock, TimerEngine, TimerPhase, TimerView, Transition,
};
pub use modes::{parse_minutes_override, Mode, ModeId, ModeMap, ModeRegistry, MAX_DURATION_SECS};
pub use resolver::{
    resolve, resolve_local, resolve_record, seconds_until, should_snap, LocalState, SourceKind,
    SyncedState, TimeSource,
};
