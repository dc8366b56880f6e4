//! Async driver around [`TimerEngine`].
//!
//! One tokio task owns the engine together with its three event sources:
//! the session subscription, user commands from a [`RuntimeHandle`], and the
//! tick interval. A fourth, optional source periodically re-fetches the bound
//! session so a silently stalled subscription still converges.
//!
//! Store writes are fire-and-forget. A failed write is logged and the local
//! optimistic state is kept; the next remote record reconciles it.

use chrono::{DateTime, Local, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::clock::{Clock, SystemClock};
use crate::error::{CoreError, Result, StoreError};
use crate::events::Event;
use crate::session::{normalize_code, NewSession, SessionId, SessionRecord, SessionStore, Subscription};
use crate::stats::DailyStats;
use crate::storage::{Config, LocalStore};
use crate::timer::{EngineSettings, ModeId, ModeMap, TimerEngine, TimerView, Transition};

const COMMAND_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 64;

/// What a completion hook is told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub mode: ModeId,
    /// Whether the countdown belonged to a shared session.
    pub synced: bool,
    pub at: DateTime<Utc>,
}

pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Side effect run once per completed countdown (notification, sound, ...).
///
/// Failures are logged and otherwise ignored.
pub trait CompletionHook: Send + Sync {
    fn on_complete(&self, completion: &Completion) -> std::result::Result<(), HookError>;
}

impl<F> CompletionHook for F
where
    F: Fn(&Completion) -> std::result::Result<(), HookError> + Send + Sync,
{
    fn on_complete(&self, completion: &Completion) -> std::result::Result<(), HookError> {
        self(completion)
    }
}

/// Hook that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

impl CompletionHook for NoopHook {
    fn on_complete(&self, _: &Completion) -> std::result::Result<(), HookError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeOptions {
    pub tick_interval: Duration,
    /// `None` disables the periodic re-fetch.
    pub refetch_interval: Option<Duration>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            refetch_interval: Some(Duration::from_secs(30)),
        }
    }
}

impl From<&Config> for RuntimeOptions {
    fn from(config: &Config) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            refetch_interval: config.refetch_interval(),
        }
    }
}

/// Build an engine from local persistence.
///
/// Missing or invalid settings fall back to the default modes; a saved solo
/// countdown is resumed when its mode still exists.
pub fn load_engine(
    local: &dyn LocalStore,
    settings: EngineSettings,
    client_id: &str,
    now: DateTime<Utc>,
) -> TimerEngine {
    let modes = match local.load_settings() {
        Ok(Some(modes)) if modes.validate().is_ok() => modes,
        Ok(Some(_)) => {
            tracing::warn!("stored settings are invalid, using defaults");
            ModeMap::default_modes()
        }
        Ok(None) => ModeMap::default_modes(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            ModeMap::default_modes()
        }
    };
    match local.load_solo_state() {
        Ok(Some(state)) => TimerEngine::restore(modes, state, settings, client_id, now),
        Ok(None) => TimerEngine::new(modes, settings, client_id),
        Err(e) => {
            tracing::warn!(error = %e, "failed to load solo state");
            TimerEngine::new(modes, settings, client_id)
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    Tick(Reply<TimerView>),
    Toggle(Reply<TimerView>),
    ChangeMode(ModeId, Reply<TimerView>),
    SetSettings(ModeMap, Reply<TimerView>),
    CreateSession(Reply<SessionId>),
    JoinSession(String, Reply<bool>),
    LeaveSession(Reply<TimerView>),
    Shutdown,
}

/// Owns the engine and its collaborators until [`SyncRuntime::spawn`].
pub struct SyncRuntime {
    engine: TimerEngine,
    store: Arc<dyn SessionStore>,
    local: Arc<dyn LocalStore>,
    hook: Arc<dyn CompletionHook>,
    clock: Arc<dyn Clock>,
    options: RuntimeOptions,
    subscription: Option<Subscription>,
    view_tx: watch::Sender<TimerView>,
    events_tx: broadcast::Sender<Event>,
}

impl SyncRuntime {
    pub fn new(
        engine: TimerEngine,
        store: Arc<dyn SessionStore>,
        local: Arc<dyn LocalStore>,
    ) -> Self {
        let (view_tx, _) = watch::channel(engine.view());
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            engine,
            store,
            local,
            hook: Arc::new(NoopHook),
            clock: Arc::new(SystemClock),
            options: RuntimeOptions::default(),
            subscription: None,
            view_tx,
            events_tx,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn CompletionHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_options(mut self, options: RuntimeOptions) -> Self {
        self.options = options;
        self
    }

    /// Start the driver task. Must be called inside a tokio runtime.
    pub fn spawn(self) -> RuntimeHandle {
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        let view = self.view_tx.subscribe();
        let events = self.events_tx.clone();
        let task = tokio::spawn(self.run(rx));
        RuntimeHandle {
            commands,
            view,
            events,
            task,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let mut ticker = tokio::time::interval(self.options.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let refetch_period = self.options.refetch_interval;
        let idle = Duration::from_secs(3600);
        let mut refetch = tokio::time::interval_at(
            Instant::now() + refetch_period.unwrap_or(idle),
            refetch_period.unwrap_or(idle),
        );
        refetch.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(client = %self.engine.client_id(), "timer runtime started");
        self.publish();

        loop {
            tokio::select! {
                biased;

                record = next_record(&mut self.subscription) => match record {
                    Some(record) => {
                        let now = self.clock.now();
                        let transition = self.engine.apply_remote(record, now);
                        self.commit(transition);
                    }
                    None => {
                        tracing::warn!(session = ?self.engine.session_id(), "session subscription closed");
                        self.subscription = None;
                    }
                },

                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },

                _ = ticker.tick() => {
                    let now = self.clock.now();
                    let transition = self.engine.tick(now);
                    self.commit(transition);
                }

                _ = refetch.tick(), if refetch_period.is_some() && self.engine.is_synced() => {
                    self.refetch();
                }
            }
        }

        self.persist_solo_state();
        self.subscription = None;
        tracing::debug!("timer runtime stopped");
    }

    fn handle(&mut self, command: Command) {
        let now = self.clock.now();
        match command {
            Command::Tick(reply) => {
                let transition = self.engine.tick(now);
                self.commit(transition);
                let _ = reply.send(Ok(self.engine.view()));
            }
            Command::Toggle(reply) => {
                let transition = self.engine.toggle(now);
                self.commit(transition);
                let _ = reply.send(Ok(self.engine.view()));
            }
            Command::ChangeMode(mode, reply) => {
                let result = self
                    .engine
                    .change_mode(&mode, now)
                    .map(|t| self.commit(t))
                    .map(|()| self.engine.view())
                    .map_err(CoreError::from);
                let _ = reply.send(result);
            }
            Command::SetSettings(modes, reply) => {
                let result = self
                    .engine
                    .set_settings(modes, now)
                    .map(|t| self.commit(t))
                    .map(|()| self.engine.view())
                    .map_err(CoreError::from);
                let _ = reply.send(result);
            }
            Command::CreateSession(reply) => {
                let _ = reply.send(self.create_session());
            }
            Command::JoinSession(code, reply) => {
                let _ = reply.send(self.join_session(&code));
            }
            Command::LeaveSession(reply) => {
                self.leave_session();
                let _ = reply.send(Ok(self.engine.view()));
            }
            Command::Shutdown => {}
        }
    }

    /// Run the side effects of one transition: events first, then the single
    /// store write, then publish the new view.
    fn commit(&mut self, transition: Transition) {
        if transition.is_empty() {
            self.publish();
            return;
        }

        for event in &transition.events {
            self.react(event);
            let _ = self.events_tx.send(event.clone());
        }

        if let Some(patch) = &transition.write {
            if let Some(id) = self.engine.session_id() {
                if let Err(e) = self.store.update(id, patch) {
                    tracing::warn!(session = %id, error = %e, "session write failed; keeping local state");
                }
            }
        }

        self.persist_solo_state();
        self.publish();
    }

    fn react(&self, event: &Event) {
        match event {
            Event::TimerCompleted { mode, synced, at } => {
                self.record_completion(*synced, *at);
                let completion = Completion {
                    mode: mode.clone(),
                    synced: *synced,
                    at: *at,
                };
                if let Err(e) = self.hook.on_complete(&completion) {
                    tracing::warn!(error = %e, "completion hook failed");
                }
            }
            Event::SettingsChanged {
                modes,
                synced: false,
                ..
            } => {
                if let Err(e) = self.local.save_settings(modes) {
                    tracing::warn!(error = %e, "failed to persist settings");
                }
            }
            _ => {}
        }
    }

    fn record_completion(&self, synced: bool, at: DateTime<Utc>) {
        let today = at.with_timezone(&Local).date_naive();
        let mut stats = match self.local.load_stats() {
            Ok(stats) => stats.unwrap_or_else(|| DailyStats::new(today)),
            Err(e) => {
                tracing::warn!(error = %e, "failed to load daily stats");
                DailyStats::new(today)
            }
        };
        stats.record(synced, today);
        if let Err(e) = self.local.save_stats(&stats) {
            tracing::warn!(error = %e, "failed to persist daily stats");
        }
    }

    fn persist_solo_state(&self) {
        if let Some(state) = self.engine.local_state() {
            if let Err(e) = self.local.save_solo_state(state) {
                tracing::warn!(error = %e, "failed to persist solo state");
            }
        }
    }

    fn publish(&self) {
        let view = self.engine.view();
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }

    fn create_session(&mut self) -> Result<SessionId> {
        let mode = self.engine.current_mode().to_string();
        let settings = self.engine.local_modes().clone();
        let remaining = settings
            .duration_of(&mode)
            .or_else(|| self.engine.modes().duration_of(&mode))
            .unwrap_or_else(|| self.engine.displayed_remaining());
        let id = self.store.create(NewSession {
            host_id: self.engine.client_id().to_string(),
            mode,
            remaining,
            settings,
        })?;
        self.bind(&id)?;
        Ok(id)
    }

    fn join_session(&mut self, code: &str) -> Result<bool> {
        let code = normalize_code(code);
        match self.bind(&code) {
            Ok(()) => Ok(true),
            Err(CoreError::SessionNotFound(_)) | Err(CoreError::Store(StoreError::NotFound(_))) => {
                tracing::info!(session = %code, "no such session");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Subscribe first, then fetch, so no update falls between the two.
    fn bind(&mut self, id: &str) -> Result<()> {
        let subscription = self.store.subscribe(id)?;
        let record = self
            .store
            .fetch(id)?
            .ok_or_else(|| CoreError::SessionNotFound(id.to_string()))?;
        self.subscription = Some(subscription);
        let now = self.clock.now();
        let transition = self.engine.bind_session(record, now);
        self.commit(transition);
        if let Err(e) = self.local.save_last_session(Some(id)) {
            tracing::warn!(error = %e, "failed to remember session");
        }
        Ok(())
    }

    fn leave_session(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        let now = self.clock.now();
        let transition = self.engine.unbind_session(now);
        self.commit(transition);
        if let Err(e) = self.local.save_last_session(None) {
            tracing::warn!(error = %e, "failed to forget session");
        }
    }

    fn refetch(&mut self) {
        let Some(id) = self.engine.session_id().map(str::to_string) else {
            return;
        };
        match self.store.fetch(&id) {
            Ok(Some(record)) => {
                let now = self.clock.now();
                let transition = self.engine.apply_remote(record, now);
                self.commit(transition);
            }
            Ok(None) => tracing::warn!(session = %id, "bound session no longer exists"),
            Err(e) => tracing::warn!(session = %id, error = %e, "session refetch failed"),
        }
    }
}

async fn next_record(subscription: &mut Option<Subscription>) -> Option<SessionRecord> {
    match subscription {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}

/// Control surface of a spawned runtime.
pub struct RuntimeHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<TimerView>,
    events: broadcast::Sender<Event>,
    task: JoinHandle<()>,
}

impl RuntimeHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| CoreError::RuntimeClosed)?;
        rx.await.map_err(|_| CoreError::RuntimeClosed)?
    }

    /// Recompute now instead of waiting for the next scheduled tick.
    pub async fn tick(&self) -> Result<TimerView> {
        self.request(Command::Tick).await
    }

    pub async fn toggle(&self) -> Result<TimerView> {
        self.request(Command::Toggle).await
    }

    pub async fn change_mode(&self, mode: impl Into<ModeId>) -> Result<TimerView> {
        let mode = mode.into();
        self.request(|reply| Command::ChangeMode(mode, reply)).await
    }

    pub async fn set_settings(&self, modes: ModeMap) -> Result<TimerView> {
        self.request(|reply| Command::SetSettings(modes, reply)).await
    }

    /// Create a session hosted by this client and bind to it.
    pub async fn create_session(&self) -> Result<SessionId> {
        self.request(Command::CreateSession).await
    }

    /// Bind to an existing session. `Ok(false)` when the code is unknown.
    pub async fn join_session(&self, code: &str) -> Result<bool> {
        let code = code.to_string();
        self.request(|reply| Command::JoinSession(code, reply)).await
    }

    pub async fn leave_session(&self) -> Result<TimerView> {
        self.request(Command::LeaveSession).await
    }

    /// Latest published snapshot.
    pub fn view(&self) -> TimerView {
        self.view.borrow().clone()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<TimerView> {
        self.view.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Stop the driver task and wait for it to finish.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.commands.send(Command::Shutdown).await;
        self.task.await.map_err(|e| {
            tracing::warn!(error = %e, "timer runtime task failed");
            CoreError::RuntimeClosed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::session::InMemorySessionStore;
    use crate::storage::MemoryLocalStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn runtime(
        store: Arc<InMemorySessionStore>,
        local: Arc<MemoryLocalStore>,
        clock: &ManualClock,
        client: &str,
    ) -> SyncRuntime {
        let engine = load_engine(local.as_ref(), EngineSettings::default(), client, clock.now());
        SyncRuntime::new(engine, store, local)
            .with_clock(Arc::new(clock.clone()))
            .with_options(RuntimeOptions {
                tick_interval: Duration::from_millis(100),
                refetch_interval: None,
            })
    }

    async fn wait_for(rx: &mut watch::Receiver<TimerView>, pred: impl Fn(&TimerView) -> bool) {
        for _ in 0..100 {
            if pred(&rx.borrow_and_update()) {
                return;
            }
            let _ = tokio::time::timeout(Duration::from_millis(200), rx.changed()).await;
        }
        panic!("view never matched: {:?}", *rx.borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn solo_toggle_and_tick() {
        let clock = ManualClock::new(start());
        let local = Arc::new(MemoryLocalStore::new());
        let handle = runtime(Arc::new(InMemorySessionStore::new()), local.clone(), &clock, "client-a").spawn();

        let view = handle.toggle().await.unwrap();
        assert!(view.running);

        clock.advance_secs(60);
        let mut rx = handle.subscribe_view();
        wait_for(&mut rx, |v| v.remaining_secs == 1440).await;

        handle.shutdown().await.unwrap();
        let saved = local.load_solo_state().unwrap().unwrap();
        assert!(saved.running);
        assert!(saved.deadline.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn completion_runs_hook_and_records_stats() {
        let clock = ManualClock::new(start());
        let local = Arc::new(MemoryLocalStore::with_settings(
            ModeMap::default_modes().with_duration("pomodoro", 5).unwrap(),
        ));
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let hook = move |c: &Completion| -> std::result::Result<(), HookError> {
            assert!(!c.synced);
            counter.fetch_add(1, Ordering::SeqCst);
            Err("speaker unplugged".into())
        };
        let handle = runtime(Arc::new(InMemorySessionStore::new()), local.clone(), &clock, "client-a")
            .with_hook(Arc::new(hook))
            .spawn();

        handle.toggle().await.unwrap();
        clock.advance_secs(10);
        let mut rx = handle.subscribe_view();
        wait_for(&mut rx, |v| !v.running && v.remaining_secs == 0).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        let stats = local.load_stats().unwrap().unwrap();
        assert_eq!((stats.solo, stats.group), (1, 0));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn overnight_expiry_counts_toward_the_day_it_ended() {
        let begin = DateTime::parse_from_rfc3339("2026-03-02T23:59:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let clock = ManualClock::new(begin);
        let local = Arc::new(MemoryLocalStore::with_settings(
            ModeMap::default_modes().with_duration("pomodoro", 30).unwrap(),
        ));
        let handle = runtime(Arc::new(InMemorySessionStore::new()), local.clone(), &clock, "client-a").spawn();

        handle.toggle().await.unwrap();
        clock.advance_secs(9 * 3600);
        let view = handle.tick().await.unwrap();
        assert!(!view.running);

        let ended = (begin + chrono::Duration::seconds(30))
            .with_timezone(&Local)
            .date_naive();
        let stats = local.load_stats().unwrap().unwrap();
        assert_eq!(stats.date, ended);
        assert_eq!(stats.solo, 1);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn two_clients_share_a_session() {
        let clock = ManualClock::new(start());
        let store = Arc::new(InMemorySessionStore::new());
        let a = runtime(store.clone(), Arc::new(MemoryLocalStore::new()), &clock, "client-a").spawn();
        let b = runtime(store.clone(), Arc::new(MemoryLocalStore::new()), &clock, "client-b").spawn();

        let code = a.create_session().await.unwrap();
        assert!(b.join_session(&code.to_lowercase()).await.unwrap());
        assert!(a.view().is_host);
        assert!(!b.view().is_host);

        a.toggle().await.unwrap();
        let mut rx = b.subscribe_view();
        wait_for(&mut rx, |v| v.running).await;

        clock.advance_secs(30);
        wait_for(&mut rx, |v| v.remaining_secs == 1470).await;

        b.change_mode("short").await.unwrap();
        let mut rx = a.subscribe_view();
        wait_for(&mut rx, |v| v.mode == "short" && !v.running && v.remaining_secs == 300).await;

        a.shutdown().await.unwrap();
        b.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn join_unknown_code_returns_false() {
        let clock = ManualClock::new(start());
        let handle = runtime(
            Arc::new(InMemorySessionStore::new()),
            Arc::new(MemoryLocalStore::new()),
            &clock,
            "client-a",
        )
        .spawn();
        assert!(!handle.join_session("zzzzzz").await.unwrap());
        assert!(handle.view().session_id.is_none());
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_keeps_local_state() {
        let clock = ManualClock::new(start());
        let store = Arc::new(InMemorySessionStore::new());
        let handle = runtime(store.clone(), Arc::new(MemoryLocalStore::new()), &clock, "client-a").spawn();
        let code = handle.create_session().await.unwrap();

        store.set_fail_writes(true);
        let view = handle.toggle().await.unwrap();
        assert!(view.running);
        assert_eq!(store.fetch(&code).unwrap().unwrap().status, crate::session::SessionStatus::Paused);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_settings_are_rejected() {
        let clock = ManualClock::new(start());
        let local = Arc::new(MemoryLocalStore::new());
        let handle = runtime(Arc::new(InMemorySessionStore::new()), local.clone(), &clock, "client-a").spawn();
        let err = handle.set_settings(ModeMap::empty()).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidSettings(_)));
        assert!(local.load_settings().unwrap().is_none());
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn commands_after_shutdown_fail() {
        let clock = ManualClock::new(start());
        let handle = runtime(
            Arc::new(InMemorySessionStore::new()),
            Arc::new(MemoryLocalStore::new()),
            &clock,
            "client-a",
        )
        .spawn();
        let commands = handle.commands.clone();
        handle.shutdown().await.unwrap();
        let (tx, _rx) = oneshot::channel();
        assert!(commands.send(Command::Toggle(tx)).await.is_err());
    }
}
