//! Sync coordinator: keeps the local store and the remote document
//! eventually consistent with the in-memory snapshot.
//!
//! The coordinator never awaits. `persist` writes the local store and
//! hands back at most one [`RemoteWrite`] for the caller to run; the
//! caller reports the outcome through [`SyncCoordinator::on_write_complete`].
//! That split is what enforces the at-most-one-in-flight rule.
//!
//! Remote pushes are applied last-write-wins with no merge: every
//! `Changed` event, echoes of our own writes included, overwrites memory.
//! A local edit made while a push is in transit can be lost.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::remote::{RemoteSink, RemoteStore, Subscription};
use super::types::{Identity, RemoteDocument, RemoteEvent, RemoteEventKind, SyncError, SyncStatus};
use crate::error::{CoreError, StorageError};
use crate::model::PersistedSnapshot;
use crate::storage::{EncodedSnapshot, LocalSnapshot, LocalStore};

/// A remote write the caller must run and report back.
#[derive(Debug, Clone)]
pub struct RemoteWrite {
    pub identity: Identity,
    pub document: RemoteDocument,
}

/// What the caller should do with its in-memory state after a remote event.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteApply {
    /// Replace settings and log with the pushed snapshot.
    Overwrite(PersistedSnapshot),
    /// Subscription failed; overlay whatever the local store holds.
    Fallback(LocalSnapshot),
}

struct InFlight {
    identity: Identity,
    encoded: EncodedSnapshot,
}

pub struct SyncCoordinator<L> {
    local: L,
    remote: Option<Arc<dyn RemoteStore>>,
    identity: Option<Identity>,
    subscription: Option<Subscription>,
    status: SyncStatus,
    in_flight: Option<InFlight>,
    /// A dirty persist was skipped remotely while a write was in flight.
    deferred: bool,
}

impl<L: LocalStore> SyncCoordinator<L> {
    pub fn new(local: L, remote: Option<Arc<dyn RemoteStore>>) -> Self {
        Self {
            local,
            remote,
            identity: None,
            subscription: None,
            status: SyncStatus::Synced,
            in_flight: None,
            deferred: false,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn remote(&self) -> Option<Arc<dyn RemoteStore>> {
        self.remote.clone()
    }

    pub fn local(&self) -> &L {
        &self.local
    }

    /// Read whatever the local store holds.
    pub fn load_local(&self) -> Result<LocalSnapshot, StorageError> {
        LocalSnapshot::load(&self.local)
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Persist `snapshot` if it differs from what the local store holds.
    ///
    /// Returns the remote write to start, if any. Local write failures are
    /// returned as errors and nothing remote is attempted.
    pub fn persist(
        &mut self,
        snapshot: &PersistedSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Option<RemoteWrite>, CoreError> {
        let encoded = EncodedSnapshot::encode(snapshot)?;
        if encoded.is_stored_in(&self.local)? {
            debug!("persist skipped: snapshot unchanged");
            return Ok(None);
        }

        encoded.write_to(&self.local).map_err(|e| {
            error!("local save failed: {e}");
            e
        })?;

        let Some(identity) = self.identity.clone() else {
            return Ok(None);
        };
        if self.remote.is_none() {
            return Ok(None);
        }
        if self.in_flight.is_some() {
            debug!(%identity, "remote write in flight, deferring");
            self.deferred = true;
            return Ok(None);
        }
        Ok(Some(self.begin_write(identity, encoded, snapshot.clone(), now)))
    }

    /// Send `snapshot` to the remote regardless of the dirty check.
    ///
    /// `None` when signed out or while another write is in flight.
    pub fn push(
        &mut self,
        snapshot: &PersistedSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Option<RemoteWrite>, CoreError> {
        let Some(identity) = self.identity.clone() else {
            return Ok(None);
        };
        if self.remote.is_none() || self.in_flight.is_some() {
            return Ok(None);
        }
        let encoded = EncodedSnapshot::encode(snapshot)?;
        Ok(Some(self.begin_write(identity, encoded, snapshot.clone(), now)))
    }

    /// Record the outcome of the in-flight write.
    ///
    /// On success, returns a follow-up write when a persist was deferred
    /// meanwhile and the local store still differs from what was sent.
    /// Failures are not retried.
    pub fn on_write_complete(
        &mut self,
        identity: &Identity,
        result: Result<(), SyncError>,
        now: DateTime<Utc>,
    ) -> Option<RemoteWrite> {
        let in_flight = self.in_flight.take()?;
        if &in_flight.identity != identity {
            warn!(%identity, expected = %in_flight.identity, "completion for unexpected write");
        }
        let deferred = std::mem::take(&mut self.deferred);

        if let Err(e) = result {
            warn!(%identity, "remote save failed: {e}");
            self.status = SyncStatus::Error;
            return None;
        }
        self.status = SyncStatus::Synced;
        debug!(%identity, "remote save acknowledged");

        if !deferred || self.identity.as_ref() != Some(&in_flight.identity) {
            return None;
        }
        let latest = match EncodedSnapshot::read_from(&self.local) {
            Ok(Some(latest)) if latest != in_flight.encoded => latest,
            Ok(_) => return None,
            Err(e) => {
                error!("local read for deferred write failed: {e}");
                return None;
            }
        };
        match latest.decode() {
            Ok(snapshot) => Some(self.begin_write(in_flight.identity, latest, snapshot, now)),
            Err(e) => {
                error!("deferred write dropped: {e}");
                None
            }
        }
    }

    fn begin_write(
        &mut self,
        identity: Identity,
        encoded: EncodedSnapshot,
        snapshot: PersistedSnapshot,
        now: DateTime<Utc>,
    ) -> RemoteWrite {
        self.status = SyncStatus::Syncing;
        self.in_flight = Some(InFlight {
            identity: identity.clone(),
            encoded,
        });
        RemoteWrite {
            identity,
            document: RemoteDocument::new(snapshot, now),
        }
    }

    // ── Remote pushes ────────────────────────────────────────────────

    /// Handle a subscription event. Events for an identity other than the
    /// attached one are dropped.
    pub fn on_remote_event(&mut self, event: RemoteEvent) -> Option<RemoteApply> {
        if self.identity.as_ref() != Some(&event.identity) {
            debug!(identity = %event.identity, "dropping event for stale identity");
            return None;
        }
        match event.kind {
            RemoteEventKind::Changed(snapshot) => {
                if let Err(e) = snapshot.settings.validate() {
                    return self.fail_subscription(&event.identity, &e.to_string());
                }
                // An in-flight write still decides the status.
                if self.in_flight.is_none() {
                    self.status = SyncStatus::Synced;
                }
                // New dirty-check baseline.
                if let Err(e) = self.adopt_baseline(&snapshot) {
                    error!("failed to cache remote snapshot locally: {e}");
                }
                Some(RemoteApply::Overwrite(snapshot))
            }
            RemoteEventKind::Failed(reason) => self.fail_subscription(&event.identity, &reason),
        }
    }

    fn fail_subscription(&mut self, identity: &Identity, reason: &str) -> Option<RemoteApply> {
        warn!(%identity, "remote subscription failed: {reason}");
        self.status = SyncStatus::Error;
        // At most one fallback per subscription.
        self.subscription = None;
        match self.load_local() {
            Ok(local) => Some(RemoteApply::Fallback(local)),
            Err(e) => {
                error!("fallback load failed: {e}");
                None
            }
        }
    }

    fn adopt_baseline(&self, snapshot: &PersistedSnapshot) -> Result<(), CoreError> {
        let encoded = EncodedSnapshot::encode(snapshot)?;
        if !encoded.is_stored_in(&self.local)? {
            encoded.write_to(&self.local)?;
        }
        Ok(())
    }

    // ── Identity ─────────────────────────────────────────────────────

    /// Attach a remote subscription for `identity`. In-memory state is
    /// left alone until the first event arrives.
    pub fn attach(&mut self, identity: Identity, sink: RemoteSink) -> Result<(), SyncError> {
        if self.identity.as_ref() == Some(&identity) && self.subscription.is_some() {
            return Ok(());
        }
        let remote = self.remote.clone().ok_or(SyncError::RemoteUnavailable)?;
        self.detach();
        info!(%identity, "attaching remote subscription");
        self.subscription = Some(remote.subscribe(&identity, sink));
        self.identity = Some(identity);
        Ok(())
    }

    /// Write-only binding: remote writes go to `identity` but no pushes are
    /// received. For one-shot sessions that exit once their writes settle.
    pub fn bind(&mut self, identity: Identity) -> Result<(), SyncError> {
        if self.remote.is_none() {
            return Err(SyncError::RemoteUnavailable);
        }
        self.detach();
        debug!(%identity, "bound remote identity without subscription");
        self.identity = Some(identity);
        Ok(())
    }

    /// Tear down the subscription; persistence becomes local-only.
    pub fn detach(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            info!(identity = %subscription.identity(), "closing remote subscription");
            subscription.close();
        }
        self.identity = None;
        self.deferred = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SessionLog, Settings, TaskRecord};
    use crate::storage::MemoryStore;
    use crate::sync::InMemoryRemote;
    use tokio::sync::mpsc;

    fn snapshot(focus: u32) -> PersistedSnapshot {
        PersistedSnapshot::new(Settings::new(focus, 5).unwrap(), SessionLog::new())
    }

    fn setup() -> (SyncCoordinator<MemoryStore>, MemoryStore, InMemoryRemote) {
        let local = MemoryStore::new();
        let remote = InMemoryRemote::new();
        let coordinator = SyncCoordinator::new(local.clone(), Some(Arc::new(remote.clone())));
        (coordinator, local, remote)
    }

    #[test]
    fn signed_out_persist_is_local_only() {
        let (mut c, local, _) = setup();
        assert!(c.persist(&snapshot(30), Utc::now()).unwrap().is_none());
        assert_eq!(local.write_count(), 2);
        assert_eq!(c.status(), SyncStatus::Synced);
    }

    #[test]
    fn unchanged_snapshot_is_not_rewritten() {
        let (mut c, local, _) = setup();
        c.persist(&snapshot(30), Utc::now()).unwrap();
        c.persist(&snapshot(30), Utc::now()).unwrap();
        assert_eq!(local.write_count(), 2);
    }

    #[tokio::test]
    async fn signed_in_persist_starts_one_write() {
        let (mut c, _, _) = setup();
        let (tx, _rx) = mpsc::unbounded_channel();
        c.attach(Identity::new("alice"), tx).unwrap();

        let write = c.persist(&snapshot(30), Utc::now()).unwrap().unwrap();
        assert_eq!(write.identity, Identity::new("alice"));
        assert_eq!(write.document.snapshot, snapshot(30));
        assert_eq!(c.status(), SyncStatus::Syncing);
        assert!(c.persist(&snapshot(30), Utc::now()).unwrap().is_none());
    }

    #[tokio::test]
    async fn dirty_persist_during_flight_is_deferred_until_success() {
        let (mut c, local, _) = setup();
        let (tx, _rx) = mpsc::unbounded_channel();
        let alice = Identity::new("alice");
        c.attach(alice.clone(), tx).unwrap();

        let first = c.persist(&snapshot(30), Utc::now()).unwrap();
        assert!(first.is_some());
        assert!(c.persist(&snapshot(40), Utc::now()).unwrap().is_none());
        assert_eq!(local.write_count(), 4);

        let follow_up = c.on_write_complete(&alice, Ok(()), Utc::now()).unwrap();
        assert_eq!(follow_up.document.snapshot, snapshot(40));
        assert_eq!(c.status(), SyncStatus::Syncing);

        assert!(c.on_write_complete(&alice, Ok(()), Utc::now()).is_none());
        assert_eq!(c.status(), SyncStatus::Synced);
        assert!(!c.is_in_flight());
    }

    #[tokio::test]
    async fn deferred_write_is_skipped_when_local_matches_sent() {
        let (mut c, _, _) = setup();
        let (tx, _rx) = mpsc::unbounded_channel();
        let alice = Identity::new("alice");
        c.attach(alice.clone(), tx).unwrap();

        c.persist(&snapshot(30), Utc::now()).unwrap();
        c.persist(&snapshot(40), Utc::now()).unwrap();
        c.persist(&snapshot(30), Utc::now()).unwrap();
        assert!(c.on_write_complete(&alice, Ok(()), Utc::now()).is_none());
    }

    #[tokio::test]
    async fn failed_write_sets_error_and_is_not_retried() {
        let (mut c, _, _) = setup();
        let (tx, _rx) = mpsc::unbounded_channel();
        let alice = Identity::new("alice");
        c.attach(alice.clone(), tx).unwrap();

        c.persist(&snapshot(30), Utc::now()).unwrap();
        c.persist(&snapshot(40), Utc::now()).unwrap();
        let next = c.on_write_complete(
            &alice,
            Err(SyncError::Rejected("offline".into())),
            Utc::now(),
        );
        assert!(next.is_none());
        assert_eq!(c.status(), SyncStatus::Error);

        // Unchanged: still nothing. A new change: a fresh attempt.
        assert!(c.persist(&snapshot(40), Utc::now()).unwrap().is_none());
        assert!(c.persist(&snapshot(50), Utc::now()).unwrap().is_some());
    }

    #[test]
    fn local_failure_is_reported_and_skips_remote() {
        let (mut c, local, _) = setup();
        local.fail_writes(true);
        let err = c.persist(&snapshot(30), Utc::now()).unwrap_err();
        assert!(matches!(err, CoreError::Storage(StorageError::QuotaExceeded { .. })));
        assert!(!c.is_in_flight());
    }

    #[tokio::test]
    async fn remote_change_overwrites_and_becomes_baseline() {
        let (mut c, local, _) = setup();
        let (tx, _rx) = mpsc::unbounded_channel();
        let alice = Identity::new("alice");
        c.attach(alice.clone(), tx).unwrap();

        let mut pushed = snapshot(50);
        pushed.tasks.push(TaskRecord::new("remote task", "", Utc::now()));
        let apply = c.on_remote_event(RemoteEvent {
            identity: alice,
            kind: RemoteEventKind::Changed(pushed.clone()),
        });
        assert_eq!(apply, Some(RemoteApply::Overwrite(pushed.clone())));
        assert_eq!(c.status(), SyncStatus::Synced);

        let writes = local.write_count();
        assert!(c.persist(&pushed, Utc::now()).unwrap().is_none());
        assert_eq!(local.write_count(), writes);
    }

    #[tokio::test]
    async fn subscription_failure_falls_back_once() {
        let (mut c, _, _) = setup();
        c.persist(&snapshot(35), Utc::now()).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let alice = Identity::new("alice");
        c.attach(alice.clone(), tx).unwrap();

        let failed = || RemoteEvent {
            identity: alice.clone(),
            kind: RemoteEventKind::Failed("permission-denied".into()),
        };
        match c.on_remote_event(failed()) {
            Some(RemoteApply::Fallback(local)) => {
                assert_eq!(local.settings.unwrap().focus_time, 35);
            }
            other => panic!("Expected Fallback, got {other:?}"),
        }
        assert_eq!(c.status(), SyncStatus::Error);
        assert!(!c.is_subscribed());
    }

    #[tokio::test]
    async fn zero_duration_push_is_treated_as_failure() {
        let (mut c, local, _) = setup();
        c.persist(&snapshot(35), Utc::now()).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let alice = Identity::new("alice");
        c.attach(alice.clone(), tx).unwrap();

        let pushed = PersistedSnapshot::new(
            Settings {
                focus_time: 0,
                break_time: 0,
            },
            SessionLog::new(),
        );
        let writes = local.write_count();
        let apply = c.on_remote_event(RemoteEvent {
            identity: alice,
            kind: RemoteEventKind::Changed(pushed),
        });
        match apply {
            Some(RemoteApply::Fallback(local)) => {
                assert_eq!(local.settings.unwrap().focus_time, 35);
            }
            other => panic!("Expected Fallback, got {other:?}"),
        }
        assert_eq!(c.status(), SyncStatus::Error);
        assert!(!c.is_subscribed());
        assert_eq!(local.write_count(), writes);
    }

    #[tokio::test]
    async fn stale_identity_events_are_ignored() {
        let (mut c, _, _) = setup();
        let (tx, _rx) = mpsc::unbounded_channel();
        c.attach(Identity::new("bob"), tx).unwrap();

        let apply = c.on_remote_event(RemoteEvent {
            identity: Identity::new("alice"),
            kind: RemoteEventKind::Changed(snapshot(99)),
        });
        assert!(apply.is_none());
    }

    #[tokio::test]
    async fn attach_replaces_previous_subscription() {
        let (mut c, _, remote) = setup();
        let alice = Identity::new("alice");
        let bob = Identity::new("bob");
        let (tx, _rx) = mpsc::unbounded_channel();
        c.attach(alice.clone(), tx.clone()).unwrap();
        c.attach(alice.clone(), tx.clone()).unwrap();
        assert_eq!(remote.subscriber_count(&alice), 1);

        c.attach(bob.clone(), tx).unwrap();
        assert_eq!(remote.subscriber_count(&alice), 0);
        assert_eq!(remote.subscriber_count(&bob), 1);

        c.detach();
        assert_eq!(remote.subscriber_count(&bob), 0);
        assert!(c.identity().is_none());
    }

    #[test]
    fn bound_identity_writes_without_subscribing() {
        let (mut c, _, remote) = setup();
        let alice = Identity::new("alice");
        c.bind(alice.clone()).unwrap();
        assert!(!c.is_subscribed());
        assert_eq!(remote.subscriber_count(&alice), 0);

        let write = c.persist(&snapshot(30), Utc::now()).unwrap();
        assert_eq!(write.unwrap().identity, alice);
        // In flight: an explicit push waits too.
        assert!(c.push(&snapshot(30), Utc::now()).unwrap().is_none());
        c.on_write_complete(&alice, Ok(()), Utc::now());
        assert!(c.push(&snapshot(30), Utc::now()).unwrap().is_some());
    }

    #[test]
    fn attach_without_backend_fails() {
        let mut c = SyncCoordinator::new(MemoryStore::new(), None);
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(
            c.attach(Identity::new("alice"), tx),
            Err(SyncError::RemoteUnavailable)
        ));
    }
}
