//! Periodic notification polling.
//!
//! The poll is the second, slower source of notifications next to the push
//! channel. Each successful fetch is reconciled into the hub's collection.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use taskwire_core::Notification;
use taskwire_protocol::{NotificationPayload, NotificationScope};
use taskwire_transport::Credential;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::PollError;
use crate::hub::Notifications;
use crate::metrics;

/// Default poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Source of the authoritative notification list.
#[async_trait]
pub trait NotificationSource: Send + Sync {
    /// Fetch the current list.
    ///
    /// # Errors
    ///
    /// Returns an error if the list could not be fetched or decoded.
    async fn fetch(&self, credential: &Credential) -> Result<Vec<Notification>, PollError>;
}

/// Fetches notifications from a REST endpoint.
#[derive(Debug, Clone)]
pub struct HttpNotificationSource {
    client: reqwest::Client,
    url: String,
}

impl HttpNotificationSource {
    /// Create a source for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    /// Create a source sharing an existing HTTP client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationSource for HttpNotificationSource {
    async fn fetch(&self, credential: &Credential) -> Result<Vec<Notification>, PollError> {
        let response = self
            .client
            .get(&self.url)
            .bearer_auth(credential.expose())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PollError::Status(status.as_u16()));
        }

        let body: Value = response.json().await?;
        parse_notification_list(body)
    }
}

/// Decode a notification list response.
///
/// Accepts a bare array or an object wrapping the array in `notifications`
/// or `data`. Items that do not decode are skipped.
///
/// # Errors
///
/// Returns an error if the body holds no list at all.
pub fn parse_notification_list(body: Value) -> Result<Vec<Notification>, PollError> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(mut map) => match map
            .remove("notifications")
            .or_else(|| map.remove("data"))
        {
            Some(Value::Array(items)) => items,
            _ => return Err(not_a_list()),
        },
        _ => return Err(not_a_list()),
    };

    let notifications = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<NotificationPayload>(item) {
            Ok(payload) => Some(Notification::from_payload(payload, NotificationScope::User)),
            Err(e) => {
                warn!(error = %e, "Skipping undecodable notification");
                None
            }
        })
        .collect();
    Ok(notifications)
}

fn not_a_list() -> PollError {
    PollError::Decode(<serde_json::Error as serde::de::Error>::custom(
        "expected a notification array",
    ))
}

/// Spawn a task that polls `source` every `interval` until `cancel` fires.
///
/// The first poll runs immediately. Failed polls are logged and skipped.
pub fn spawn_poller(
    notifications: Notifications,
    source: Arc<dyn NotificationSource>,
    credential: Credential,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Notification poller stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                fetched = source.fetch(&credential) => fetched,
            };

            match fetched {
                Ok(list) => {
                    let outcome = notifications.apply_poll(list);
                    debug!(
                        added = outcome.added,
                        removed = outcome.removed,
                        conflicts = outcome.conflicts,
                        "Notification poll applied"
                    );
                }
                Err(e) => {
                    metrics::record_poll_error();
                    warn!(error = %e, "Notification poll failed");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Hub;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use taskwire_transport::MemoryTransport;

    /// Replays scripted fetch results, then empty lists.
    struct ScriptedSource {
        results: Mutex<VecDeque<Result<Vec<Notification>, PollError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(results: impl IntoIterator<Item = Result<Vec<Notification>, PollError>>) -> Self {
            Self {
                results: Mutex::new(results.into_iter().collect()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl NotificationSource for ScriptedSource {
        async fn fetch(&self, _credential: &Credential) -> Result<Vec<Notification>, PollError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results.lock().pop_front().unwrap_or(Ok(Vec::new()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_skips_failures_and_stops_on_cancel() {
        let list = parse_notification_list(json!([{"id": "n1", "title": "One"}])).unwrap();
        let source = Arc::new(ScriptedSource::new([Err(PollError::Status(503)), Ok(list)]));
        let (transport, _peers) = MemoryTransport::new();
        let hub = Hub::new(Arc::new(transport));
        let cancel = CancellationToken::new();

        let handle = spawn_poller(
            hub.notifications(),
            source.clone(),
            Credential::new("token").unwrap(),
            Duration::from_secs(30),
            cancel.clone(),
        );

        // The first poll runs right away and fails.
        time::sleep(Duration::from_millis(1)).await;
        assert_eq!(source.calls(), 1);
        assert!(hub.notifications().all().is_empty());

        // The loop survived the failure and applies the next tick.
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.calls(), 2);
        assert_eq!(hub.notifications().all().len(), 1);
        assert!(hub.notifications().get("n1").is_some());

        cancel.cancel();
        time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("poller did not stop")
            .unwrap();
        assert_eq!(source.calls(), 2);
    }

    #[test]
    fn test_parse_bare_array() {
        let list = parse_notification_list(json!([
            {"_id": "n1", "title": "One", "createdAt": "2024-05-01T10:00:00Z"},
            {"id": 2, "title": "Two", "read": true}
        ]))
        .unwrap();

        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, "n1");
        assert_eq!(list[0].kind, "general");
        assert_eq!(list[1].id, "2");
        assert!(list[1].read);
    }

    #[test]
    fn test_parse_wrapped_list_skips_bad_items() {
        let list = parse_notification_list(json!({
            "notifications": [{"id": "n1"}, {"title": "no id"}]
        }))
        .unwrap();
        assert_eq!(list.len(), 1);

        let list = parse_notification_list(json!({"data": []})).unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn test_parse_rejects_non_list() {
        assert!(matches!(
            parse_notification_list(json!({"status": "ok"})),
            Err(PollError::Decode(_))
        ));
        assert!(parse_notification_list(json!("nope")).is_err());
    }
}
