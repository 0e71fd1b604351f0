//! HTTP document store client.
//!
//! Documents live at `<endpoint>/users/<identity>`. `PUT` replaces the
//! document; changes are observed by polling `GET` and comparing the
//! document's `lastUpdated`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};
use url::Url;

use super::remote::{RemoteSink, RemoteStore, Subscription};
use super::types::{Identity, RemoteDocument, RemoteEvent, RemoteEventKind, SyncError};
use crate::storage::RemoteConfig;

#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base: Url,
    token: Option<String>,
    poll_interval: Duration,
}

impl HttpRemote {
    pub fn new(
        endpoint: &str,
        token: Option<String>,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self, SyncError> {
        let base = Url::parse(endpoint).map_err(|e| SyncError::InvalidEndpoint(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(SyncError::InvalidEndpoint(endpoint.to_string()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base,
            token,
            poll_interval,
        })
    }

    /// Build from config; `None` when no endpoint is configured.
    pub fn from_config(config: &RemoteConfig) -> Result<Option<Self>, SyncError> {
        let Some(endpoint) = config.endpoint.as_deref() else {
            return Ok(None);
        };
        Self::new(
            endpoint,
            config.token.clone(),
            Duration::from_secs(config.timeout_secs),
            Duration::from_secs(config.poll_interval_secs.max(1)),
        )
        .map(Some)
    }

    pub fn document_url(&self, identity: &Identity) -> Result<Url, SyncError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::InvalidEndpoint(self.base.to_string()))?
            .pop_if_empty()
            .push("users")
            .push(identity.as_str());
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Fetch the current document; `Ok(None)` if it does not exist yet.
    pub async fn fetch(&self, identity: &Identity) -> Result<Option<RemoteDocument>, SyncError> {
        let url = self.document_url(identity)?;
        let response = self.authorize(self.client.get(url)).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let document: RemoteDocument = response.json().await?;
                document
                    .snapshot
                    .settings
                    .validate()
                    .map_err(SyncError::InvalidDocument)?;
                Ok(Some(document))
            }
            status => Err(status_error(identity, status, response).await),
        }
    }
}

async fn status_error(identity: &Identity, status: StatusCode, response: reqwest::Response) -> SyncError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return SyncError::PermissionDenied(identity.clone());
    }
    let message = response.text().await.unwrap_or_default();
    SyncError::Http {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn save(&self, identity: &Identity, document: &RemoteDocument) -> Result<(), SyncError> {
        let url = self.document_url(identity)?;
        let response = self
            .authorize(self.client.put(url))
            .json(document)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(identity, status, response).await);
        }
        debug!(%identity, "remote document saved");
        Ok(())
    }

    fn subscribe(&self, identity: &Identity, sink: RemoteSink) -> Subscription {
        let this = self.clone();
        let watched = identity.clone();
        let task = tokio::spawn(async move {
            let mut interval = time::interval(this.poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut seen: Option<DateTime<Utc>> = None;
            loop {
                interval.tick().await;
                let kind = match this.fetch(&watched).await {
                    Ok(Some(doc)) if seen != Some(doc.last_updated) => {
                        seen = Some(doc.last_updated);
                        RemoteEventKind::Changed(doc.snapshot)
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(identity = %watched, "remote subscription failed: {e}");
                        RemoteEventKind::Failed(e.to_string())
                    }
                };
                let failed = matches!(kind, RemoteEventKind::Failed(_));
                let delivered = sink
                    .send(RemoteEvent {
                        identity: watched.clone(),
                        kind,
                    })
                    .is_ok();
                if failed || !delivered {
                    break;
                }
            }
        });
        Subscription::from_task(identity.clone(), task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PersistedSnapshot, Settings};
    use chrono::TimeZone;
    use tokio::sync::mpsc;

    fn remote(url: &str) -> HttpRemote {
        HttpRemote::new(
            url,
            Some("secret".into()),
            Duration::from_secs(5),
            Duration::from_millis(20),
        )
        .unwrap()
    }

    fn doc_json(focus: u32, updated: &str) -> String {
        format!(
            r#"{{"settings":{{"focusTime":{focus},"breakTime":5}},"tasks":[],"lastUpdated":"{updated}"}}"#
        )
    }

    #[test]
    fn document_url_encodes_identity() {
        let r = remote("https://docs.example.com/api/");
        let url = r.document_url(&Identity::new("a b/c")).unwrap();
        assert_eq!(url.as_str(), "https://docs.example.com/api/users/a%20b%2Fc");
    }

    #[test]
    fn from_config_without_endpoint_is_none() {
        assert!(HttpRemote::from_config(&RemoteConfig::default()).unwrap().is_none());
        assert!(HttpRemote::new("not a url", None, Duration::from_secs(1), Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn save_puts_document_with_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/users/alice")
            .match_header("authorization", "Bearer secret")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "settings": { "focusTime": 30, "breakTime": 5 },
                "tasks": [],
                "lastUpdated": "2024-01-01T00:00:00.000Z"
            })))
            .with_status(200)
            .create_async()
            .await;

        let document = RemoteDocument::new(
            PersistedSnapshot::new(Settings::new(30, 5).unwrap(), Default::default()),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        );
        remote(&server.url())
            .save(&Identity::new("alice"), &document)
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn save_maps_forbidden_to_permission_denied() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", "/users/alice")
            .with_status(403)
            .create_async()
            .await;

        let err = remote(&server.url())
            .save(
                &Identity::new("alice"),
                &RemoteDocument::new(PersistedSnapshot::default(), Utc::now()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn fetch_treats_404_as_missing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/users/alice")
            .with_status(404)
            .create_async()
            .await;
        assert!(remote(&server.url())
            .fetch(&Identity::new("alice"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn fetch_rejects_zero_durations() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/users/alice")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(doc_json(0, "2024-01-01T00:00:00.000Z"))
            .create_async()
            .await;
        let err = remote(&server.url())
            .fetch(&Identity::new("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidDocument(_)));
    }

    #[tokio::test]
    async fn subscription_pushes_document_once_per_version() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/users/alice")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(doc_json(45, "2024-01-01T00:00:00.000Z"))
            .expect_at_least(2)
            .create_async()
            .await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = remote(&server.url()).subscribe(&Identity::new("alice"), tx);

        let first = time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match first.kind {
            RemoteEventKind::Changed(snapshot) => assert_eq!(snapshot.settings.focus_time, 45),
            other => panic!("Expected Changed, got {other:?}"),
        }

        // Same lastUpdated on later polls: nothing new is pushed.
        time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn subscription_reports_failure_once_and_stops() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/users/alice")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = remote(&server.url()).subscribe(&Identity::new("alice"), tx);

        let event = time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event.kind, RemoteEventKind::Failed(ref msg) if msg.contains("500")));
        // Sender dropped with the finished task.
        assert!(time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .is_none());
    }
}
