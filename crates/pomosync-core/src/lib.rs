//! # Pomosync Core Library
//!
//! This library provides the synchronization engine for a shared countdown
//! timer. A client counts down on its own ("solo") or binds to a shared
//! session record, in which case every participant derives the remaining time
//! from the record's absolute deadline and converges on the same value.
//!
//! ## Architecture
//!
//! - **Timer Engine**: A clock-injected state machine. Every operation takes
//!   "now" and returns a [`Transition`] (at most one session write plus events)
//! - **Session Store**: Shared records keyed by a six-character code, with an
//!   in-process and a SQLite-file backend
//! - **Runtime**: A tokio task that drives the engine from ticks, session
//!   updates and user commands
//! - **Storage**: SQLite key-value persistence and TOML-based configuration
//!
//! ## Key Components
//!
//! - [`TimerEngine`]: Core timer state machine
//! - [`SyncRuntime`] / [`RuntimeHandle`]: Async driver and its control surface
//! - [`SessionStore`]: Contract for the shared record store
//! - [`Database`]: Local settings, solo state and statistics persistence
//! - [`Config`]: Application configuration management

pub mod clock;
pub mod error;
pub mod events;
pub mod runtime;
pub mod session;
pub mod stats;
pub mod storage;
pub mod timer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ConfigError, CoreError, DatabaseError, SettingsError, StoreError};
pub use events::Event;
pub use runtime::{
    load_engine, Completion, CompletionHook, NoopHook, RuntimeHandle, RuntimeOptions, SyncRuntime,
};
pub use session::{
    InMemorySessionStore, SessionId, SessionPatch, SessionRecord, SessionStatus, SessionStore,
    SqliteSessionStore,
};
pub use stats::DailyStats;
pub use storage::{Config, Database, LocalStore, MemoryLocalStore};
pub use timer::{
    EngineSettings, Mode, ModeMap, SoloClock, TimerEngine, TimerPhase, TimerView, Transition,
};
