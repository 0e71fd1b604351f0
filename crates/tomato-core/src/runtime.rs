//! Session runtime.
//!
//! A [`Session`] owns the timer engine, the in-memory snapshot and the sync
//! coordinator. Ticks, remote pushes, write completions and commands are
//! all funnelled onto one task and handled to completion one at a time, so
//! none of the state needs a lock.
//!
//! ## Usage
//!
//! ```ignore
//! let (mut session, mut events) = Session::new(store, remote, clock, notifier);
//! session.load_local()?;
//! session.set_pending_task("Write report", "");
//! session.toggle();
//! session.run(commands).await;
//! ```

use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use crate::error::CoreError;
use crate::events::{Event, ReplaceSource};
use crate::model::{PersistedSnapshot, Settings};
use crate::notify::{announce_phase_end, Notifier};
use crate::storage::{transfer, LocalStore};
use crate::sync::{
    Identity, RemoteApply, RemoteEvent, RemoteStore, RemoteWrite, SyncCoordinator, SyncError,
    SyncStatus,
};
use crate::timer::{Clock, Ticker, TimerEngine};

/// User commands accepted by [`Session::run`].
#[derive(Debug, Clone)]
pub enum Command {
    Toggle,
    Reset,
    SetPendingTask { title: String, notes: String },
    UpdateSettings(Settings),
    SignIn(Identity),
    SignOut,
    Import(String),
    Snapshot,
    Shutdown,
}

/// Internal wake-ups.
#[derive(Debug)]
enum Signal {
    /// Tagged with the arming generation it was produced under.
    Tick(u64),
    WriteFinished {
        identity: Identity,
        result: Result<(), SyncError>,
    },
}

pub struct Session<L> {
    engine: TimerEngine,
    state: PersistedSnapshot,
    sync: SyncCoordinator<L>,
    clock: Arc<dyn Clock>,
    notifier: Box<dyn Notifier>,
    ticker: Ticker,
    tick_generation: u64,
    published_status: SyncStatus,
    signals_tx: UnboundedSender<Signal>,
    signals_rx: UnboundedReceiver<Signal>,
    remote_tx: UnboundedSender<RemoteEvent>,
    remote_rx: UnboundedReceiver<RemoteEvent>,
    events: UnboundedSender<Event>,
}

impl<L: LocalStore> Session<L> {
    /// Build a session with default settings and an empty log. Call
    /// [`Session::load_local`] to pick up persisted state.
    pub fn new(
        local: L,
        remote: Option<Arc<dyn RemoteStore>>,
        clock: Arc<dyn Clock>,
        notifier: Box<dyn Notifier>,
    ) -> (Self, UnboundedReceiver<Event>) {
        let state = PersistedSnapshot::default();
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let session = Self {
            engine: TimerEngine::new(&state.settings),
            state,
            sync: SyncCoordinator::new(local, remote),
            clock,
            notifier,
            ticker: Ticker::default(),
            tick_generation: 0,
            published_status: SyncStatus::Synced,
            signals_tx,
            signals_rx,
            remote_tx,
            remote_rx,
            events,
        };
        (session, events_rx)
    }

    /// Replace the tick source; tests use a shorter period.
    pub fn with_ticker(mut self, ticker: Ticker) -> Self {
        self.ticker = ticker;
        self
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn engine(&self) -> &TimerEngine {
        &self.engine
    }

    pub fn state(&self) -> &PersistedSnapshot {
        &self.state
    }

    pub fn settings(&self) -> &Settings {
        &self.state.settings
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.sync.status()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.sync.identity()
    }

    pub fn coordinator(&self) -> &SyncCoordinator<L> {
        &self.sync
    }

    pub fn snapshot_event(&self) -> Event {
        self.engine.snapshot(&self.state.settings)
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Overlay whatever the local store holds onto the in-memory state.
    pub fn load_local(&mut self) -> Result<(), CoreError> {
        let local = self.sync.load_local()?;
        if local.is_empty() {
            debug!("local store empty, keeping defaults");
            return Ok(());
        }
        let mut state = self.state.clone();
        local.apply_to(&mut state);
        self.replace_state(state, ReplaceSource::LocalLoad);
        Ok(())
    }

    /// Arm or disarm. Returns `false` when arming was refused.
    pub fn toggle(&mut self) -> bool {
        let Some(event) = self.engine.toggle() else {
            debug!("arm refused: focus phase needs a task");
            return false;
        };
        if self.engine.is_armed() {
            self.arm_ticker();
        } else {
            self.disarm_ticker();
        }
        self.emit(event);
        true
    }

    pub fn reset(&mut self) {
        if let Some(event) = self.engine.reset(&self.state.settings) {
            self.emit(event);
        }
    }

    pub fn set_pending_task(&mut self, title: impl Into<String>, notes: impl Into<String>) {
        self.engine.set_pending_task(title, notes);
    }

    pub fn update_settings(&mut self, settings: Settings) -> Result<(), CoreError> {
        settings.validate()?;
        self.state.settings = settings;
        self.engine.apply_settings(&settings);
        self.emit(Event::SettingsChanged {
            settings,
            at: self.clock.now(),
        });
        self.persist()
    }

    /// Attach the remote subscription for `identity`.
    pub fn sign_in(&mut self, identity: Identity) -> Result<(), CoreError> {
        self.sync.attach(identity, self.remote_tx.clone())?;
        Ok(())
    }

    /// Write to `identity` without subscribing to its pushes.
    pub fn bind_identity(&mut self, identity: Identity) -> Result<(), CoreError> {
        self.sync.bind(identity)?;
        Ok(())
    }

    /// Detach from the remote and fall back to the local store.
    pub fn sign_out(&mut self) -> Result<(), CoreError> {
        if self.sync.identity().is_none() {
            return Ok(());
        }
        self.sync.detach();
        info!("signed out, persistence is local-only");
        self.load_local()
    }

    /// Replace settings and log from a transfer payload. Nothing changes
    /// when the payload is rejected.
    pub fn import(&mut self, payload: &str) -> Result<(), CoreError> {
        let snapshot = transfer::import(payload)?;
        self.replace_state(snapshot, ReplaceSource::Import);
        self.persist()
    }

    pub fn export(&self) -> Result<String, CoreError> {
        Ok(transfer::export(&self.state)?)
    }

    /// Send the in-memory snapshot to the remote even if nothing changed.
    pub fn push(&mut self) -> Result<(), CoreError> {
        let now = self.clock.now();
        if let Some(write) = self.sync.push(&self.state, now)? {
            self.spawn_write(write);
        }
        self.publish_status();
        Ok(())
    }

    /// Handle one command. `Shutdown` is handled by [`Session::run`].
    pub fn handle_command(&mut self, command: Command) -> Result<(), CoreError> {
        match command {
            Command::Toggle => {
                self.toggle();
            }
            Command::Reset => self.reset(),
            Command::SetPendingTask { title, notes } => self.set_pending_task(title, notes),
            Command::UpdateSettings(settings) => self.update_settings(settings)?,
            Command::SignIn(identity) => self.sign_in(identity)?,
            Command::SignOut => self.sign_out()?,
            Command::Import(payload) => self.import(&payload)?,
            Command::Snapshot => self.emit(self.snapshot_event()),
            Command::Shutdown => {}
        }
        Ok(())
    }

    // ── Event loop ───────────────────────────────────────────────────

    /// Wait for the next tick, remote event or write completion and
    /// handle it. Returns `false` once no further input can arrive.
    pub async fn step(&mut self) -> bool {
        let signal = tokio::select! {
            biased;
            Some(signal) = self.signals_rx.recv() => signal,
            Some(event) = self.remote_rx.recv() => {
                self.on_remote_event(event);
                return true;
            }
            else => return false,
        };
        self.handle_signal(signal);
        true
    }

    /// Drain input until no remote write is in flight and nothing is
    /// left queued.
    pub async fn settle(&mut self) {
        loop {
            while self.sync.is_in_flight() {
                if !self.step().await {
                    return;
                }
            }
            self.drain_ready();
            if !self.sync.is_in_flight() {
                return;
            }
        }
    }

    /// Handle everything already queued without waiting.
    fn drain_ready(&mut self) {
        loop {
            if let Ok(signal) = self.signals_rx.try_recv() {
                self.handle_signal(signal);
            } else if let Ok(event) = self.remote_rx.try_recv() {
                self.on_remote_event(event);
            } else {
                return;
            }
        }
    }

    /// Run until `Shutdown` arrives or the command channel closes, then
    /// disarm, let the last write settle and detach.
    pub async fn run(&mut self, mut commands: UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                biased;
                Some(signal) = self.signals_rx.recv() => self.handle_signal(signal),
                Some(event) = self.remote_rx.recv() => self.on_remote_event(event),
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => {
                        if let Err(e) = self.handle_command(command) {
                            warn!("command failed: {e}");
                        }
                    }
                },
            }
        }
        self.shutdown().await;
    }

    pub async fn shutdown(&mut self) {
        self.disarm_ticker();
        self.settle().await;
        self.sync.detach();
        debug!("session shut down");
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn arm_ticker(&mut self) {
        self.tick_generation += 1;
        let generation = self.tick_generation;
        self.ticker
            .arm(self.signals_tx.clone(), move || Signal::Tick(generation));
    }

    /// Ticks already queued by the cancelled task are dropped on arrival.
    fn disarm_ticker(&mut self) {
        self.tick_generation += 1;
        self.ticker.disarm();
    }

    fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Tick(generation) if generation == self.tick_generation => self.tick(),
            Signal::Tick(generation) => {
                debug!(generation, current = self.tick_generation, "dropping stale tick");
            }
            Signal::WriteFinished { identity, result } => {
                let now = self.clock.now();
                if let Some(write) = self.sync.on_write_complete(&identity, result, now) {
                    self.spawn_write(write);
                }
                self.publish_status();
            }
        }
    }

    fn tick(&mut self) {
        let now = self.clock.now();
        let Some(event) = self.engine.tick(&self.state.settings, &mut self.state.tasks, now) else {
            return;
        };
        if let Event::PhaseCompleted { from, .. } = &event {
            announce_phase_end(self.notifier.as_mut(), *from);
        }
        self.emit(event);
        if let Err(e) = self.persist() {
            error!("persist after phase change failed: {e}");
        }
    }

    fn on_remote_event(&mut self, event: RemoteEvent) {
        match self.sync.on_remote_event(event) {
            Some(RemoteApply::Overwrite(snapshot)) => {
                self.replace_state(snapshot, ReplaceSource::Remote);
            }
            Some(RemoteApply::Fallback(local)) => {
                let mut state = self.state.clone();
                local.apply_to(&mut state);
                self.replace_state(state, ReplaceSource::LocalFallback);
            }
            None => {}
        }
        self.publish_status();
    }

    fn replace_state(&mut self, state: PersistedSnapshot, source: ReplaceSource) {
        self.state = state;
        self.engine.apply_settings(&self.state.settings);
        self.emit(Event::StateReplaced {
            source,
            task_count: self.state.tasks.len(),
            at: self.clock.now(),
        });
    }

    fn persist(&mut self) -> Result<(), CoreError> {
        let now = self.clock.now();
        let write = self.sync.persist(&self.state, now)?;
        if let Some(write) = write {
            self.spawn_write(write);
        }
        self.publish_status();
        Ok(())
    }

    fn spawn_write(&self, write: RemoteWrite) {
        let Some(remote) = self.sync.remote() else {
            return;
        };
        let tx = self.signals_tx.clone();
        tokio::spawn(async move {
            let RemoteWrite { identity, document } = write;
            let result = remote.save(&identity, &document).await;
            let _ = tx.send(Signal::WriteFinished { identity, result });
        });
    }

    fn publish_status(&mut self) {
        let status = self.sync.status();
        if status != self.published_status {
            self.published_status = status;
            self.emit(Event::SyncStatusChanged {
                status,
                at: self.clock.now(),
            });
        }
    }

    fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::model::{SessionLog, TaskRecord};
    use crate::notify::SilentNotifier;
    use crate::storage::MemoryStore;
    use crate::sync::InMemoryRemote;
    use crate::timer::{ManualClock, Phase};
    use chrono::{TimeZone, Utc};

    fn session(
        local: MemoryStore,
        remote: Option<InMemoryRemote>,
    ) -> (Session<MemoryStore>, UnboundedReceiver<Event>) {
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
        let remote = remote.map(|r| Arc::new(r) as Arc<dyn RemoteStore>);
        Session::new(local, remote, clock, Box::new(SilentNotifier))
    }

    fn drain(events: &mut UnboundedReceiver<Event>) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn load_local_overlays_stored_halves() {
        let local = MemoryStore::new();
        let mut tasks = SessionLog::new();
        tasks.push(TaskRecord::new("old", "", Utc::now()));
        crate::storage::EncodedSnapshot::encode(&PersistedSnapshot::new(
            Settings::new(50, 10).unwrap(),
            tasks,
        ))
        .unwrap()
        .write_to(&local)
        .unwrap();

        let (mut s, mut events) = session(local, None);
        s.load_local().unwrap();
        assert_eq!(s.settings().focus_time, 50);
        assert_eq!(s.engine().remaining_secs(), 50 * 60);
        assert!(matches!(
            drain(&mut events).as_slice(),
            [Event::StateReplaced { source: ReplaceSource::LocalLoad, task_count: 1, .. }]
        ));
    }

    #[tokio::test]
    async fn load_local_rejects_stored_zero_duration() {
        let local = MemoryStore::new();
        local
            .set(crate::storage::local::SETTINGS_KEY, r#"{"focusTime":0,"breakTime":5}"#)
            .unwrap();

        let (mut s, _events) = session(local, None);
        let err = s.load_local().unwrap_err();
        assert!(matches!(err, CoreError::Storage(StorageError::Corrupt { .. })));
        assert_eq!(s.settings(), &Settings::default());
        assert_eq!(s.engine().remaining_secs(), 25 * 60);
    }

    #[tokio::test]
    async fn toggle_without_task_is_refused() {
        let (mut s, mut events) = session(MemoryStore::new(), None);
        assert!(!s.toggle());
        assert!(drain(&mut events).is_empty());
        s.set_pending_task("Write", "");
        assert!(s.toggle());
        assert!(s.engine().is_armed());
        assert!(s.toggle());
        assert!(!s.engine().is_armed());
    }

    #[tokio::test]
    async fn toggling_does_not_persist() {
        let local = MemoryStore::new();
        let (mut s, _events) = session(local.clone(), None);
        s.set_pending_task("Write", "");
        s.toggle();
        s.toggle();
        s.reset();
        assert_eq!(local.write_count(), 0);
    }

    #[tokio::test]
    async fn malformed_import_changes_nothing() {
        let local = MemoryStore::new();
        let (mut s, mut events) = session(local.clone(), None);
        let before = s.state().clone();
        let err = s.import("{not json").unwrap_err();
        assert!(err.to_string().starts_with("invalid format"));
        assert_eq!(s.state(), &before);
        assert_eq!(local.write_count(), 0);
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn settings_change_while_signed_in_reaches_remote() {
        let remote = InMemoryRemote::new();
        let (mut s, mut events) = session(MemoryStore::new(), Some(remote.clone()));
        let alice = Identity::new("alice");
        s.sign_in(alice.clone()).unwrap();
        s.update_settings(Settings::new(40, 10).unwrap()).unwrap();
        assert_eq!(s.sync_status(), SyncStatus::Syncing);
        s.settle().await;

        assert_eq!(s.sync_status(), SyncStatus::Synced);
        assert_eq!(remote.document(&alice).unwrap().snapshot.settings.focus_time, 40);
        let statuses: Vec<_> = drain(&mut events)
            .into_iter()
            .filter_map(|e| match e {
                Event::SyncStatusChanged { status, .. } => Some(status),
                _ => None,
            })
            .collect();
        assert_eq!(statuses, vec![SyncStatus::Syncing, SyncStatus::Synced]);
    }

    #[tokio::test]
    async fn command_dispatch_and_shutdown() {
        let (mut s, mut events) = session(MemoryStore::new(), None);
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Command::SetPendingTask {
            title: "Write".into(),
            notes: String::new(),
        })
        .unwrap();
        tx.send(Command::Toggle).unwrap();
        tx.send(Command::Snapshot).unwrap();
        tx.send(Command::Shutdown).unwrap();
        s.run(rx).await;

        let events = drain(&mut events);
        assert!(matches!(events[0], Event::TimerArmed { phase: Phase::Focus, .. }));
        assert!(matches!(events[1], Event::StateSnapshot { armed: true, .. }));
    }
}
