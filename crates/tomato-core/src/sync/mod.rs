//! Remote synchronization layer.
//!
//! Mirrors the persisted snapshot into one remote document per identity
//! and applies pushed changes back. The local store stays authoritative
//! while signed out; the remote document wins whenever it pushes.

pub mod coordinator;
pub mod http;
pub mod memory;
pub mod remote;
pub mod types;

pub use coordinator::{RemoteApply, RemoteWrite, SyncCoordinator};
pub use http::HttpRemote;
pub use memory::InMemoryRemote;
pub use remote::{RemoteSink, RemoteStore, Subscription};
pub use types::{Identity, RemoteDocument, RemoteEvent, RemoteEventKind, SyncError, SyncStatus};
