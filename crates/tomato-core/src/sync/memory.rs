//! In-memory remote document store.
//!
//! Behaves like a push-based document database with last-write-wins per
//! document: every save is delivered to all live subscribers of that
//! identity, including the writer itself. Knobs for failing saves,
//! holding saves in flight, and breaking subscriptions make it the stand-in
//! for the real backend in tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use super::remote::{RemoteSink, RemoteStore, Subscription};
use super::types::{Identity, RemoteDocument, RemoteEvent, RemoteEventKind, SyncError};
use crate::model::PersistedSnapshot;

struct Subscriber {
    id: u64,
    identity: Identity,
    sink: RemoteSink,
}

#[derive(Default)]
struct Inner {
    documents: HashMap<Identity, RemoteDocument>,
    subscribers: Vec<Subscriber>,
    next_id: u64,
    saves: usize,
    fail_saves: Option<String>,
    denied: HashSet<Identity>,
}

impl Inner {
    fn store_and_push(&mut self, identity: &Identity, document: RemoteDocument) {
        let snapshot = document.snapshot.clone();
        self.documents.insert(identity.clone(), document);
        self.subscribers.retain(|sub| {
            if &sub.identity != identity {
                return true;
            }
            sub.sink
                .send(RemoteEvent {
                    identity: identity.clone(),
                    kind: RemoteEventKind::Changed(snapshot.clone()),
                })
                .is_ok()
        });
    }
}

#[derive(Clone)]
pub struct InMemoryRemote {
    inner: Arc<Mutex<Inner>>,
    paused: Arc<watch::Sender<bool>>,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            paused: Arc::new(paused),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn document(&self, identity: &Identity) -> Option<RemoteDocument> {
        self.lock().documents.get(identity).cloned()
    }

    /// Number of saves that reached the store.
    pub fn save_count(&self) -> usize {
        self.lock().saves
    }

    pub fn subscriber_count(&self, identity: &Identity) -> usize {
        self.lock()
            .subscribers
            .iter()
            .filter(|sub| &sub.identity == identity && !sub.sink.is_closed())
            .count()
    }

    /// Make every save fail with `reason` until cleared with `None`.
    pub fn fail_saves(&self, reason: Option<&str>) {
        self.lock().fail_saves = reason.map(str::to_string);
    }

    /// Reject saves for `identity` as a permission error.
    pub fn deny(&self, identity: &Identity) {
        self.lock().denied.insert(identity.clone());
    }

    /// While paused, saves stay in flight until [`InMemoryRemote::resume_saves`].
    pub fn pause_saves(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume_saves(&self) {
        self.paused.send_replace(false);
    }

    /// A write made by another session.
    pub fn write_external(&self, identity: &Identity, snapshot: PersistedSnapshot, at: DateTime<Utc>) {
        self.lock()
            .store_and_push(identity, RemoteDocument::new(snapshot, at));
    }

    /// Break every subscription for `identity`. Each gets one `Failed`
    /// event and is then dropped.
    pub fn break_subscriptions(&self, identity: &Identity, reason: &str) {
        self.lock().subscribers.retain(|sub| {
            if &sub.identity != identity {
                return true;
            }
            let _ = sub.sink.send(RemoteEvent {
                identity: identity.clone(),
                kind: RemoteEventKind::Failed(reason.to_string()),
            });
            false
        });
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn save(&self, identity: &Identity, document: &RemoteDocument) -> Result<(), SyncError> {
        let mut paused = self.paused.subscribe();
        let _ = paused.wait_for(|paused| !*paused).await;

        let mut inner = self.lock();
        if let Some(reason) = inner.fail_saves.clone() {
            return Err(SyncError::Rejected(reason));
        }
        if inner.denied.contains(identity) {
            return Err(SyncError::PermissionDenied(identity.clone()));
        }
        inner.saves += 1;
        inner.store_and_push(identity, document.clone());
        Ok(())
    }

    fn subscribe(&self, identity: &Identity, sink: RemoteSink) -> Subscription {
        let id = {
            let mut inner = self.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            if let Some(doc) = inner.documents.get(identity) {
                let _ = sink.send(RemoteEvent {
                    identity: identity.clone(),
                    kind: RemoteEventKind::Changed(doc.snapshot.clone()),
                });
            }
            inner.subscribers.push(Subscriber {
                id,
                identity: identity.clone(),
                sink,
            });
            id
        };

        let inner = Arc::clone(&self.inner);
        Subscription::new(identity.clone(), move || {
            if let Ok(mut inner) = inner.lock() {
                inner.subscribers.retain(|sub| sub.id != id);
            }
        })
    }
}
