//! # Tomato Core Library
//!
//! Core logic for the Tomato focus/break timer. The `tomato` CLI is a thin
//! layer over this crate.
//!
//! ## Architecture
//!
//! - **Timer Engine**: a tick-driven state machine; the caller delivers
//!   one `tick()` per second while armed
//! - **Storage**: a local key-value store (SQLite) holding settings and the
//!   session log, plus TOML configuration and the backup format
//! - **Sync**: mirrors the snapshot into a remote document per identity and
//!   applies remote pushes back, with at most one write in flight
//! - **Runtime**: the single-task event loop that interleaves ticks, remote
//!   events, write completions and user commands
//!
//! ## Key Components
//!
//! - [`TimerEngine`]: phase state machine
//! - [`SyncCoordinator`]: dirty checking and remote write serialization
//! - [`Session`]: owns engine, state and coordinator
//! - [`Config`]: application configuration

pub mod error;
pub mod events;
pub mod model;
pub mod notify;
pub mod runtime;
pub mod storage;
pub mod sync;
pub mod timer;

pub use error::{ConfigError, CoreError, Result, StorageError, TransferError, ValidationError};
pub use events::{Event, ReplaceSource};
pub use model::{PersistedSnapshot, SessionLog, Settings, TaskRecord};
pub use notify::{Notifier, SilentNotifier, TerminalNotifier};
pub use runtime::{Command, Session};
pub use storage::{Config, LocalStore, MemoryStore, SqliteStore};
pub use sync::{
    HttpRemote, Identity, InMemoryRemote, RemoteStore, SyncCoordinator, SyncError, SyncStatus,
};
pub use timer::{Clock, ManualClock, Phase, SystemClock, Ticker, TimerEngine};
