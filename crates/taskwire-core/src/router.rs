//! Topic router for Taskwire.
//!
//! The router fans every event out to the handlers subscribed to its topic.
//! Handlers run synchronously, in registration order, on the task that
//! publishes. A failing or panicking handler is logged and counted but never
//! stops the rest of the fan-out.

use dashmap::DashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::event::{topics, Event};

/// Maximum topic name length.
pub const MAX_TOPIC_NAME_LENGTH: usize = 256;

/// Reserved topics a consumer may subscribe to.
const RESERVED_TOPICS: &[&str] = &[
    topics::CONNECTION,
    topics::TYPING,
    topics::PRESENCE,
    topics::NOTIFICATIONS,
    topics::NOTIFICATION_RECEIVED,
    topics::DASHBOARD,
];

/// Validate a topic name for subscription.
///
/// # Errors
///
/// Returns an error message if the topic name is invalid.
pub fn validate_topic_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Topic name cannot be empty");
    }
    if name.len() > MAX_TOPIC_NAME_LENGTH {
        return Err("Topic name too long");
    }
    if name.starts_with('$') && !RESERVED_TOPICS.contains(&name) {
        return Err("Unknown reserved topic");
    }
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Topic name contains invalid characters");
    }
    Ok(())
}

/// Router errors.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Invalid topic name.
    #[error("Invalid topic name: {0}")]
    InvalidTopic(&'static str),

    /// Maximum subscribers reached for a topic.
    #[error("Maximum subscribers reached for topic: {0}")]
    MaxSubscribersReached(String),
}

/// Error returned by a subscriber handler.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// The handler reported a failure.
    #[error("Handler failed: {0}")]
    Failed(String),

    /// The handler panicked.
    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Create a failure from any message.
    pub fn failed(reason: impl Into<String>) -> Self {
        HandlerError::Failed(reason.into())
    }
}

/// Result type of subscriber handlers.
pub type HandlerResult = Result<(), HandlerError>;

type Handler = dyn Fn(&Event) -> HandlerResult + Send + Sync;

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Maximum number of handlers on a single topic.
    pub max_subscribers_per_topic: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_subscribers_per_topic: 1024,
        }
    }
}

struct Subscriber {
    id: u64,
    active: Arc<AtomicBool>,
    handler: Box<Handler>,
}

struct RouterInner {
    /// Handlers indexed by topic, in registration order.
    topics: DashMap<String, Vec<Arc<Subscriber>>>,
    config: RouterConfig,
    next_id: AtomicU64,
    published: AtomicU64,
    handler_failures: AtomicU64,
}

impl RouterInner {
    fn remove(&self, topic: &str, id: u64) {
        if let Some(mut handlers) = self.topics.get_mut(topic) {
            handlers.retain(|s| s.id != id);
            debug!(topic = %topic, subscribers = handlers.len(), "Unsubscribed");
        }
        self.topics.remove_if(topic, |_, handlers| handlers.is_empty());
    }
}

/// The central event router.
///
/// Cloning a router yields another handle to the same subscriber table.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Router {
    /// Create a new router with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    /// Create a new router with custom configuration.
    #[must_use]
    pub fn with_config(config: RouterConfig) -> Self {
        info!("Creating router with config: {:?}", config);
        Self {
            inner: Arc::new(RouterInner {
                topics: DashMap::new(),
                config,
                next_id: AtomicU64::new(1),
                published: AtomicU64::new(0),
                handler_failures: AtomicU64::new(0),
            }),
        }
    }

    /// Register a handler for a topic.
    ///
    /// The handler stays registered until the returned [`Subscription`] is
    /// unsubscribed or dropped. Subscribe to [`topics::WILDCARD`] to receive
    /// every event.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic name is invalid or the topic already has
    /// the maximum number of handlers.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> Result<Subscription, RouterError>
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        validate_topic_name(topic).map_err(RouterError::InvalidTopic)?;

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));

        let mut handlers = self.inner.topics.entry(topic.to_string()).or_default();
        if handlers.len() >= self.inner.config.max_subscribers_per_topic {
            return Err(RouterError::MaxSubscribersReached(topic.to_string()));
        }
        handlers.push(Arc::new(Subscriber {
            id,
            active: Arc::clone(&active),
            handler: Box::new(handler),
        }));

        debug!(topic = %topic, subscriber = id, subscribers = handlers.len(), "Subscribed");

        Ok(Subscription {
            topic: topic.to_string(),
            id,
            active,
            router: Arc::downgrade(&self.inner),
        })
    }

    /// Subscribe with a channel instead of a callback.
    ///
    /// Every event on the topic is cloned into the returned receiver. Dropping
    /// the receiver makes the handler a no-op; dropping the subscription
    /// closes the channel.
    ///
    /// # Errors
    ///
    /// Returns an error under the same conditions as [`Router::subscribe`].
    pub fn subscribe_channel(
        &self,
        topic: &str,
    ) -> Result<(Subscription, mpsc::UnboundedReceiver<Event>), RouterError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(topic, move |event| {
            if tx.send(event.clone()).is_err() {
                trace!(topic = %event.topic(), "Channel subscriber gone");
            }
            Ok(())
        })?;
        Ok((subscription, rx))
    }

    /// Fan an event out to its topic's handlers, then to wildcard handlers.
    ///
    /// Returns the number of handlers invoked.
    pub fn publish(&self, event: &Event) -> usize {
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        let topic = event.topic();

        let mut invoked = self.fan_out(topic, event);
        if topic != topics::WILDCARD {
            invoked += self.fan_out(topics::WILDCARD, event);
        }

        trace!(topic = %topic, recipients = invoked, "Published event");
        invoked
    }

    fn fan_out(&self, topic: &str, event: &Event) -> usize {
        // Snapshot so handlers may subscribe or unsubscribe while running.
        let handlers: Vec<Arc<Subscriber>> = match self.inner.topics.get(topic) {
            Some(entry) => entry.value().clone(),
            None => return 0,
        };

        let mut invoked = 0;
        for subscriber in handlers {
            if !subscriber.active.load(Ordering::Acquire) {
                continue;
            }
            invoked += 1;

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (subscriber.handler)(event)))
                .unwrap_or_else(|payload| Err(HandlerError::Panicked(panic_message(&*payload))));

            if let Err(e) = outcome {
                self.inner.handler_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    topic = %event.topic(),
                    subscriber = subscriber.id,
                    error = %e,
                    "Subscriber handler failed"
                );
            }
        }
        invoked
    }

    /// Get the number of handlers registered on a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .topics
            .get(topic)
            .map(|handlers| handlers.len())
            .unwrap_or(0)
    }

    /// Check if any handler is registered on a topic.
    #[must_use]
    pub fn has_subscribers(&self, topic: &str) -> bool {
        self.subscriber_count(topic) > 0
    }

    /// Get all topics that currently have handlers.
    #[must_use]
    pub fn topic_names(&self) -> Vec<String> {
        self.inner.topics.iter().map(|e| e.key().clone()).collect()
    }

    /// Get router statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            topic_count: self.inner.topics.len(),
            subscriber_count: self.inner.topics.iter().map(|e| e.len()).sum(),
            events_published: self.inner.published.load(Ordering::Relaxed),
            handler_failures: self.inner.handler_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router").field("stats", &self.stats()).finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Handle to a registered handler.
///
/// Dropping the handle unsubscribes the handler.
#[derive(Debug)]
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    topic: String,
    id: u64,
    active: Arc<AtomicBool>,
    router: Weak<RouterInner>,
}

impl Subscription {
    /// Topic this subscription listens on.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Check whether the handler is still registered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Remove the handler. Calling this more than once has no effect.
    ///
    /// The handler is not invoked again, even by a fan-out that is already
    /// in progress.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(router) = self.router.upgrade() {
            router.remove(&self.topic, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Router statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterStats {
    /// Number of topics with at least one handler.
    pub topic_count: usize,
    /// Total number of registered handlers.
    pub subscriber_count: usize,
    /// Number of events published.
    pub events_published: u64,
    /// Number of handler invocations that failed or panicked.
    pub handler_failures: u64,
}
