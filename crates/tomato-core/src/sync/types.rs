//! Core types for remote synchronization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::model::{millis_timestamp, PersistedSnapshot};

/// Outcome of the most recent remote interaction. Process-local.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Synced,
    Syncing,
    Error,
}

impl SyncStatus {
    /// Short label for display.
    pub fn label(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Syncing => "syncing...",
            SyncStatus::Error => "sync failed",
        }
    }
}

/// An authenticated user; owns exactly one remote document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The remote document: the whole snapshot plus the write time.
///
/// `last_updated` is for observability only; nothing resolves conflicts
/// with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDocument {
    #[serde(flatten)]
    pub snapshot: PersistedSnapshot,
    #[serde(with = "millis_timestamp")]
    pub last_updated: DateTime<Utc>,
}

impl RemoteDocument {
    pub fn new(snapshot: PersistedSnapshot, last_updated: DateTime<Utc>) -> Self {
        Self {
            snapshot,
            last_updated,
        }
    }
}

/// Pushed by a subscription.
#[derive(Debug, Clone)]
pub struct RemoteEvent {
    /// Identity the subscription was opened for.
    pub identity: Identity,
    pub kind: RemoteEventKind,
}

#[derive(Debug, Clone)]
pub enum RemoteEventKind {
    /// The document changed; includes echoes of our own writes.
    Changed(PersistedSnapshot),
    /// The subscription failed and will deliver nothing further.
    Failed(String),
}

/// Sync error types.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Remote store returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Permission denied for {0}")]
    PermissionDenied(Identity),

    #[error("No remote store configured")]
    RemoteUnavailable,

    #[error("Invalid remote endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Remote write rejected: {0}")]
    Rejected(String),

    #[error("Invalid remote document: {0}")]
    InvalidDocument(#[source] ValidationError),
}
