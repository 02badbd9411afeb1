//! The hub facade.
//!
//! A [`Hub`] owns one logical connection to the server and everything that
//! hangs off it: the router consumers subscribe on, the ephemeral registries,
//! and the notification collection. Consumers never touch the connection;
//! they subscribe to topics and send commands through [`Commands`].

use parking_lot::{Mutex, ReentrantMutex};
use serde_json::Value;
use std::sync::Arc;
use taskwire_core::{
    ConnectionState, DesktopNotifier, DispatchConfig, Dispatcher, Event, HandlerResult,
    MetricEntry, NoopNotifier, Notification, PollOutcome, Router, RouterConfig, RouterError,
    RouterStats, Subscription, TypingEntry,
};
use taskwire_protocol::{topics as wire, Frame, MetricKind};
use taskwire_transport::{Credential, Transport};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::commands::{Commands, Memberships};
use crate::controller::{self, ReconnectPolicy};
use crate::error::HubError;
use crate::metrics;

/// Hub configuration.
#[derive(Debug, Clone, Default)]
pub struct HubOptions {
    /// Retry policy of the connection.
    pub reconnect: ReconnectPolicy,
    /// Registry and notification settings.
    pub dispatch: DispatchConfig,
    /// Router limits.
    pub router: RouterConfig,
}

/// Outbound side of a running session.
struct Session {
    outbound: mpsc::UnboundedSender<Frame>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct SessionSlot {
    /// Bumped on every start and stop; drivers of older epochs go quiet.
    epoch: u64,
    active: Option<Session>,
}

pub(crate) struct Inner {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) policy: ReconnectPolicy,
    pub(crate) memberships: Mutex<Memberships>,
    state_tx: watch::Sender<ConnectionState>,
    session: Mutex<SessionSlot>,
    /// Held while a frame is applied and while a session is torn down, so a
    /// frame never lands after the reset of its session. Reentrant because
    /// handlers may stop or restart the hub from inside a dispatch.
    gate: ReentrantMutex<()>,
}

impl Inner {
    /// Move to `state` on behalf of the driver of `epoch`.
    ///
    /// Returns `false` if that driver has been superseded.
    pub(crate) fn set_state(&self, epoch: u64, state: ConnectionState) -> bool {
        {
            let slot = self.session.lock();
            if slot.epoch != epoch {
                debug!(epoch, current = slot.epoch, ?state, "Ignoring state from stale session");
                return false;
            }
            self.state_tx.send_replace(state);
        }
        self.announce(state);
        true
    }

    fn announce(&self, state: ConnectionState) {
        info!(state = %state, "Connection state changed");
        metrics::set_connection_state(state);
        self.dispatcher.publish_connection(state);
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Queue a frame for the live connection.
    pub(crate) fn enqueue(&self, frame: Frame) -> bool {
        let slot = self.session.lock();
        match &slot.active {
            Some(session) => session.outbound.send(frame).is_ok(),
            None => false,
        }
    }

    /// Apply a frame received by the driver of `epoch`.
    ///
    /// Returns `false` without touching hub state if that driver has been
    /// superseded.
    pub(crate) fn dispatch(&self, epoch: u64, frame: Frame) -> bool {
        let _gate = self.gate.lock();
        let current = self.session.lock().epoch;
        if current != epoch {
            debug!(epoch, current, event = %frame.event, "Dropping frame from stale session");
            return false;
        }

        if frame.event == wire::NEW_NOTIFICATION || frame.event == wire::PROJECT_NOTIFICATION {
            metrics::record_notifications("push", 1);
        }
        self.dispatcher.dispatch(frame, Instant::now());
        true
    }

    /// Forget everything tied to the previous session.
    fn reset_session(&self) {
        self.memberships.lock().clear();
        self.dispatcher.reset_session();
    }
}

/// Real-time event hub.
///
/// Cloning a hub yields another handle to the same session.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<Inner>,
}

impl Hub {
    /// Create a hub with default options.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_options(transport, HubOptions::default())
    }

    /// Create a hub with custom options.
    #[must_use]
    pub fn with_options(transport: Arc<dyn Transport>, options: HubOptions) -> Self {
        Self::with_notifier(transport, options, Arc::new(NoopNotifier))
    }

    /// Create a hub that raises desktop alerts through `notifier`.
    #[must_use]
    pub fn with_notifier(
        transport: Arc<dyn Transport>,
        options: HubOptions,
        notifier: Arc<dyn DesktopNotifier>,
    ) -> Self {
        let router = Router::with_config(options.router);
        let dispatcher = Dispatcher::new(router, options.dispatch).with_notifier(notifier);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            inner: Arc::new(Inner {
                transport,
                dispatcher,
                policy: options.reconnect,
                memberships: Mutex::new(Memberships::default()),
                state_tx,
                session: Mutex::new(SessionSlot::default()),
                gate: ReentrantMutex::new(()),
            }),
        }
    }

    /// Start a session with a bearer credential.
    ///
    /// Any previous session is torn down first. Must be called from within a
    /// Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::MissingCredential`] for an empty or blank
    /// credential and [`HubError::NoRuntime`] outside a runtime.
    pub fn start(&self, token: &str) -> Result<(), HubError> {
        let credential = Credential::new(token).ok_or(HubError::MissingCredential)?;
        let runtime = Handle::try_current().map_err(|_| HubError::NoRuntime)?;

        let (outbound, queue) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let _gate = self.inner.gate.lock();
        let (epoch, replaced) = {
            let mut slot = self.inner.session.lock();
            slot.epoch += 1;
            let replaced = slot.active.take();
            if let Some(previous) = &replaced {
                previous.cancel.cancel();
            }
            slot.active = Some(Session {
                outbound,
                cancel: cancel.clone(),
            });
            self.inner.state_tx.send_replace(ConnectionState::Connecting);
            (slot.epoch, replaced.is_some())
        };

        if replaced {
            debug!(epoch, "Replacing previous session");
            self.inner.reset_session();
        }
        info!(epoch, transport = self.inner.transport.name(), "Starting session");
        self.inner.announce(ConnectionState::Connecting);

        runtime.spawn(controller::drive(
            Arc::clone(&self.inner),
            epoch,
            credential,
            queue,
            cancel,
        ));
        Ok(())
    }

    /// End the session.
    ///
    /// Closes the connection, clears typing indicators, rosters and room
    /// memberships. Notifications are kept.
    pub fn stop(&self) {
        let _gate = self.inner.gate.lock();
        let previous = {
            let mut slot = self.inner.session.lock();
            slot.epoch += 1;
            let previous = slot.active.take();
            if let Some(session) = &previous {
                session.cancel.cancel();
            }
            self.inner.state_tx.send_replace(ConnectionState::Disconnected);
            previous
        };

        if previous.is_some() {
            info!("Session stopped");
        }
        self.inner.reset_session();
        self.inner.announce(ConnectionState::Disconnected);
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Watch connection state changes.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Register a handler for a topic.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic name is invalid or the topic is full.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> Result<Subscription, RouterError>
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.dispatcher.router().subscribe(topic, handler)
    }

    /// Receive a topic's events through a channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic name is invalid or the topic is full.
    pub fn subscribe_channel(
        &self,
        topic: &str,
    ) -> Result<(Subscription, mpsc::UnboundedReceiver<Event>), RouterError> {
        self.inner.dispatcher.router().subscribe_channel(topic)
    }

    /// Outbound command facade.
    #[must_use]
    pub fn commands(&self) -> Commands {
        Commands::new(Arc::clone(&self.inner))
    }

    /// Notification collection.
    #[must_use]
    pub fn notifications(&self) -> Notifications {
        Notifications {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Users currently typing in a room.
    #[must_use]
    pub fn typing(&self, room_id: &str) -> Vec<TypingEntry> {
        self.inner.dispatcher.typing().entries(room_id)
    }

    /// Online roster of a room.
    #[must_use]
    pub fn roster(&self, room_id: &str) -> Vec<String> {
        self.inner.dispatcher.presence().roster(room_id)
    }

    /// Check if a user is online in a room.
    #[must_use]
    pub fn is_online(&self, room_id: &str, user_id: &str) -> bool {
        self.inner.dispatcher.presence().is_online(room_id, user_id)
    }

    /// Latest value of a dashboard metric.
    #[must_use]
    pub fn metric(&self, kind: &MetricKind) -> Option<MetricEntry> {
        self.inner.dispatcher.dashboard().get(kind)
    }

    /// Dashboard activity feed, newest first.
    #[must_use]
    pub fn activity_feed(&self) -> Vec<Value> {
        self.inner.dispatcher.dashboard().activity_feed()
    }

    /// Router statistics.
    #[must_use]
    pub fn router_stats(&self) -> RouterStats {
        self.inner.dispatcher.router().stats()
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("state", &self.state())
            .field("transport", &self.inner.transport.name())
            .finish_non_exhaustive()
    }
}

/// Handle to the hub's notification collection.
///
/// Local actions apply immediately and publish `$notifications` when they
/// change something.
#[derive(Clone)]
pub struct Notifications {
    inner: Arc<Inner>,
}

impl Notifications {
    /// Reconcile with a polled list.
    pub fn apply_poll(&self, polled: Vec<Notification>) -> PollOutcome {
        metrics::record_notifications("poll", polled.len());
        self.inner.dispatcher.apply_poll(polled)
    }

    /// Mark one notification read.
    pub fn mark_read(&self, id: &str) -> bool {
        self.inner.dispatcher.mark_read(id)
    }

    /// Mark every notification read.
    pub fn mark_all_read(&self) -> usize {
        self.inner.dispatcher.mark_all_read()
    }

    /// Remove one notification.
    pub fn remove(&self, id: &str) -> bool {
        self.inner.dispatcher.remove_notification(id)
    }

    /// Remove every notification.
    pub fn clear(&self) -> bool {
        self.inner.dispatcher.clear_notifications()
    }

    /// All notifications, newest first.
    #[must_use]
    pub fn all(&self) -> Vec<Notification> {
        self.inner.dispatcher.notifications()
    }

    /// Get a notification by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Notification> {
        self.inner.dispatcher.notification(id)
    }

    /// Number of unread notifications.
    #[must_use]
    pub fn unread_count(&self) -> usize {
        self.inner.dispatcher.unread_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskwire_transport::MemoryTransport;

    fn hub() -> Hub {
        let (transport, _peers) = MemoryTransport::new();
        Hub::new(Arc::new(transport))
    }

    #[test]
    fn test_start_requires_credential() {
        let hub = hub();
        assert!(matches!(hub.start("   "), Err(HubError::MissingCredential)));
        assert_eq!(hub.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_start_requires_runtime() {
        let hub = hub();
        assert!(matches!(hub.start("token"), Err(HubError::NoRuntime)));
    }

    fn roster_frame() -> Frame {
        Frame::new(
            "userJoinedProject",
            serde_json::json!({"projectId": "p-1", "onlineUsers": ["a"]}),
        )
    }

    #[tokio::test]
    async fn test_frames_from_stale_session_are_dropped() {
        let hub = hub();
        let stale = hub.inner.session.lock().epoch;
        hub.stop();

        assert!(!hub.inner.dispatch(stale, roster_frame()));
        assert!(hub.roster("p-1").is_empty());

        let current = hub.inner.session.lock().epoch;
        assert!(hub.inner.dispatch(current, roster_frame()));
        assert_eq!(hub.roster("p-1"), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_handler_may_stop_hub_during_dispatch() {
        let hub = hub();
        let handle = hub.clone();
        let stopper = hub
            .subscribe(taskwire_core::topics::PRESENCE, move |_| {
                handle.stop();
                Ok(())
            })
            .unwrap();

        let epoch = hub.inner.session.lock().epoch;
        assert!(hub.inner.dispatch(epoch, roster_frame()));

        assert!(hub.roster("p-1").is_empty());
        assert!(!hub.inner.dispatch(epoch, roster_frame()));
        stopper.unsubscribe();
    }

    #[test]
    fn test_stop_when_idle() {
        let hub = hub();
        hub.stop();
        assert_eq!(hub.state(), ConnectionState::Disconnected);
    }
}
