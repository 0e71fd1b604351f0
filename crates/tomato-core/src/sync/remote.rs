//! Remote document store contract.
//!
//! Implementations are asynchronous and fallible. Subscriptions push
//! [`RemoteEvent`]s into a channel owned by the caller and are released
//! through the returned [`Subscription`] handle.

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use super::types::{Identity, RemoteDocument, RemoteEvent, SyncError};

pub type RemoteSink = UnboundedSender<RemoteEvent>;

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Replace the identity's document.
    async fn save(&self, identity: &Identity, document: &RemoteDocument) -> Result<(), SyncError>;

    /// Start pushing changes of the identity's document into `sink`.
    ///
    /// Must be called from within a tokio runtime.
    fn subscribe(&self, identity: &Identity, sink: RemoteSink) -> Subscription;
}

/// Live subscription. Dropping it or calling [`Subscription::close`]
/// stops further deliveries.
#[must_use = "dropping a Subscription closes it"]
pub struct Subscription {
    identity: Identity,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(identity: Identity, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            identity,
            release: Some(Box::new(release)),
        }
    }

    /// Subscription backed by a spawned task; closing aborts the task.
    pub fn from_task(identity: Identity, task: JoinHandle<()>) -> Self {
        Self::new(identity, move || task.abort())
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn close(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("identity", &self.identity)
            .field("open", &self.release.is_some())
            .finish()
    }
}
