//! Inbound frame dispatch.
//!
//! The dispatcher is the only writer of hub state. For every inbound frame it
//! first forwards the raw frame on its own topic, then feeds the typed view to
//! the registries and publishes a derived event for each state change. No
//! lock is held while handlers run.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use taskwire_protocol::{Frame, Inbound, MetricKind};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::dashboard::{DashboardCache, DEFAULT_ACTIVITY_CAPACITY};
use crate::event::{ConnectionState, Event};
use crate::notifications::{
    DesktopNotifier, NoopNotifier, Notification, NotificationReconciler, Permission, PollOutcome,
    DEFAULT_MAX_NOTIFICATIONS,
};
use crate::presence::PresenceRegistry;
use crate::router::Router;
use crate::typing::TypingRegistry;

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// How long a typing signal keeps its user visible.
    pub typing_ttl: Duration,
    /// Maximum activity feed length.
    pub activity_capacity: usize,
    /// Maximum number of notifications kept.
    pub max_notifications: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            typing_ttl: Duration::from_secs(3),
            activity_capacity: DEFAULT_ACTIVITY_CAPACITY,
            max_notifications: DEFAULT_MAX_NOTIFICATIONS,
        }
    }
}

/// Routes inbound frames into hub state and onto the router.
pub struct Dispatcher {
    router: Router,
    typing: TypingRegistry,
    presence: PresenceRegistry,
    dashboard: DashboardCache,
    notifications: Mutex<NotificationReconciler>,
    notifier: Arc<dyn DesktopNotifier>,
    /// Room a roster without its own room id belongs to.
    current_room: RwLock<Option<String>>,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Create a dispatcher publishing on `router`.
    #[must_use]
    pub fn new(router: Router, config: DispatchConfig) -> Self {
        Self {
            router,
            typing: TypingRegistry::new(),
            presence: PresenceRegistry::new(),
            dashboard: DashboardCache::new(config.activity_capacity),
            notifications: Mutex::new(NotificationReconciler::new(config.max_notifications)),
            notifier: Arc::new(NoopNotifier),
            current_room: RwLock::new(None),
            config,
        }
    }

    /// Use `notifier` for desktop alerts.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn DesktopNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Handle one inbound frame.
    pub fn dispatch(&self, frame: Frame, now: Instant) {
        self.router.publish(&Event::Inbound {
            topic: frame.event.clone(),
            payload: frame.data.clone(),
        });

        let inbound = match Inbound::parse(&frame) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(topic = %frame.event, error = %e, "Ignoring malformed payload");
                return;
            }
        };

        match inbound {
            Inbound::Notification { payload, scope } => {
                self.push_notification(Notification::from_payload(payload, scope));
            }
            Inbound::Typing(typing) => {
                let changed = self.typing.on_signal(
                    &typing.room_id,
                    &typing.user_id,
                    &typing.user_name,
                    now,
                    self.config.typing_ttl,
                );
                if changed {
                    self.publish_typing(&typing.room_id, now);
                }
            }
            Inbound::StoppedTyping(stop) => {
                if self.typing.on_stop(&stop.room_id, &stop.user_id) {
                    self.publish_typing(&stop.room_id, now);
                }
            }
            Inbound::Roster(roster) => {
                let Some(room_id) = roster.project_id.clone().or_else(|| self.current_room())
                else {
                    debug!(topic = %frame.event, "Roster for an unknown room ignored");
                    return;
                };
                if self.presence.set_roster(&room_id, roster.user_ids()) {
                    self.publish_presence(&room_id);
                }
            }
            Inbound::Metric { kind, payload } => {
                let entry = self.dashboard.set(kind.clone(), payload);
                self.router.publish(&Event::Dashboard { kind, entry });
            }
            Inbound::Activity(item) => {
                let entry = self.dashboard.push_activity(item);
                self.router.publish(&Event::Dashboard {
                    kind: MetricKind::ActivityFeed,
                    entry,
                });
            }
            Inbound::RefreshRequested | Inbound::Passthrough => {
                trace!(topic = %frame.event, "Forwarded only");
            }
        }
    }

    /// Add a pushed notification.
    ///
    /// Returns `false` for a duplicate.
    pub fn push_notification(&self, notification: Notification) -> bool {
        if !self.notifications.lock().apply_push(notification.clone()) {
            return false;
        }

        // Handlers of the first event may change the collection; snapshot after them.
        self.router
            .publish(&Event::NotificationReceived(notification.clone()));
        self.publish_notifications();

        if notification.is_high_priority() && self.notifier.permission() == Permission::Granted {
            if let Err(e) = self.notifier.show(&notification) {
                warn!(id = %notification.id, error = %e, "Desktop notification failed");
            }
        }
        true
    }

    /// Reconcile with a polled notification list.
    pub fn apply_poll(&self, polled: Vec<Notification>) -> PollOutcome {
        let outcome = self.notifications.lock().apply_poll(polled);
        if outcome.changed {
            self.publish_notifications();
        }
        outcome
    }

    /// Mark one notification read.
    pub fn mark_read(&self, id: &str) -> bool {
        let changed = self.notifications.lock().mark_read(id);
        if changed {
            self.publish_notifications();
        }
        changed
    }

    /// Mark every notification read.
    pub fn mark_all_read(&self) -> usize {
        let changed = self.notifications.lock().mark_all_read();
        if changed > 0 {
            self.publish_notifications();
        }
        changed
    }

    /// Remove one notification.
    pub fn remove_notification(&self, id: &str) -> bool {
        let removed = self.notifications.lock().remove(id);
        if removed {
            self.publish_notifications();
        }
        removed
    }

    /// Remove every notification.
    pub fn clear_notifications(&self) -> bool {
        let cleared = self.notifications.lock().clear();
        if cleared {
            self.publish_notifications();
        }
        cleared
    }

    /// All notifications, newest first.
    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().all()
    }

    /// Get a notification by id.
    #[must_use]
    pub fn notification(&self, id: &str) -> Option<Notification> {
        self.notifications.lock().get(id).cloned()
    }

    /// Number of unread notifications.
    #[must_use]
    pub fn unread_count(&self) -> usize {
        self.notifications.lock().unread_count()
    }

    /// Evict expired typing entries and publish the rooms that changed.
    pub fn sweep(&self, now: Instant) {
        for room_id in self.typing.sweep(now) {
            self.publish_typing(&room_id, now);
        }
    }

    /// Earliest typing deadline.
    #[must_use]
    pub fn next_expiry(&self) -> Option<Instant> {
        self.typing.next_expiry()
    }

    /// Set the room that rosters without a room id apply to.
    pub fn set_current_room(&self, room_id: Option<String>) {
        *self.current_room.write() = room_id;
    }

    /// Room that rosters without a room id apply to.
    #[must_use]
    pub fn current_room(&self) -> Option<String> {
        self.current_room.read().clone()
    }

    /// Drop session-scoped state: typing indicators, rosters and the
    /// current room.
    pub fn reset_session(&self) {
        self.set_current_room(None);
        let now = Instant::now();
        for room_id in self.typing.clear() {
            self.publish_typing(&room_id, now);
        }
        for room_id in self.presence.clear() {
            self.publish_presence(&room_id);
        }
    }

    /// Announce a connection state change.
    pub fn publish_connection(&self, state: ConnectionState) {
        self.router.publish(&Event::Connection(state));
    }

    fn publish_typing(&self, room_id: &str, now: Instant) {
        let entries = self.typing.entries_at(room_id, now);
        self.router.publish(&Event::Typing {
            room_id: room_id.to_string(),
            entries,
        });
    }

    fn publish_presence(&self, room_id: &str) {
        let user_ids = self.presence.roster(room_id);
        self.router.publish(&Event::Presence {
            room_id: room_id.to_string(),
            user_ids,
        });
    }

    fn publish_notifications(&self) {
        let (items, unread, revision) = {
            let reconciler = self.notifications.lock();
            (reconciler.all(), reconciler.unread_count(), reconciler.revision())
        };
        self.router.publish(&Event::Notifications {
            items,
            unread,
            revision,
        });
    }

    /// The router events are published on.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Typing registry.
    #[must_use]
    pub fn typing(&self) -> &TypingRegistry {
        &self.typing
    }

    /// Presence registry.
    #[must_use]
    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    /// Dashboard metric cache.
    #[must_use]
    pub fn dashboard(&self) -> &DashboardCache {
        &self.dashboard
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::topics;
    use crate::notifications::NotifyError;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Router::new(), DispatchConfig::default())
    }

    fn drain(rx: &mut UnboundedReceiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[derive(Default)]
    struct CountingNotifier {
        shown: AtomicUsize,
    }

    impl DesktopNotifier for CountingNotifier {
        fn permission(&self) -> Permission {
            Permission::Granted
        }

        fn show(&self, _notification: &Notification) -> Result<(), NotifyError> {
            self.shown.fetch_add(1, Ordering::SeqCst);
            Err(NotifyError::Display("no display".into()))
        }
    }

    #[test]
    fn test_raw_frame_forwarded_before_derived_event() {
        let dispatcher = dispatcher();
        let (_sub, mut rx) = dispatcher.router().subscribe_channel(topics::WILDCARD).unwrap();

        dispatcher.dispatch(
            Frame::new("userJoinedProject", json!({"projectId": "p-1", "onlineUsers": ["a"]})),
            Instant::now(),
        );

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].topic(), "userJoinedProject");
        assert_eq!(
            events[1],
            Event::Presence {
                room_id: "p-1".into(),
                user_ids: vec!["a".into()],
            }
        );
    }

    #[test]
    fn test_unknown_topic_forwarded_verbatim() {
        let dispatcher = dispatcher();
        let (_sub, mut rx) = dispatcher.router().subscribe_channel("member_update").unwrap();

        let payload = json!({"projectId": "p-1", "member": {"id": "u1"}});
        dispatcher.dispatch(Frame::new("member_update", payload.clone()), Instant::now());

        assert_eq!(
            drain(&mut rx),
            vec![Event::Inbound {
                topic: "member_update".into(),
                payload,
            }]
        );
    }

    #[test]
    fn test_malformed_payload_forwarded_without_state_change() {
        let dispatcher = dispatcher();
        let (_sub, mut rx) = dispatcher.router().subscribe_channel(topics::WILDCARD).unwrap();

        dispatcher.dispatch(Frame::new("userTyping", json!({"roomId": "d-1"})), Instant::now());

        assert_eq!(drain(&mut rx).len(), 1);
        assert!(dispatcher.typing().rooms().is_empty());
    }

    #[test]
    fn test_bare_roster_applies_to_current_room() {
        let dispatcher = dispatcher();
        dispatcher.set_current_room(Some("p-7".into()));
        let (_sub, mut rx) = dispatcher.router().subscribe_channel(topics::PRESENCE).unwrap();

        dispatcher.dispatch(
            Frame::new("userJoinedProject", json!({"onlineUsers": ["a", "b"]})),
            Instant::now(),
        );

        assert_eq!(dispatcher.presence().roster("p-7"), vec!["a", "b"]);
        assert_eq!(
            drain(&mut rx),
            vec![Event::Presence {
                room_id: "p-7".into(),
                user_ids: vec!["a".into(), "b".into()],
            }]
        );
    }

    #[test]
    fn test_explicit_room_wins_over_current_room() {
        let dispatcher = dispatcher();
        dispatcher.set_current_room(Some("p-7".into()));
        dispatcher.dispatch(
            Frame::new("userJoinedProject", json!({"roomId": "p-1", "onlineUsers": ["a"]})),
            Instant::now(),
        );
        assert_eq!(dispatcher.presence().rooms(), vec!["p-1".to_string()]);
    }

    #[test]
    fn test_bare_roster_without_current_room_is_ignored() {
        let dispatcher = dispatcher();
        let (_sub, mut rx) = dispatcher.router().subscribe_channel(topics::PRESENCE).unwrap();
        dispatcher.dispatch(
            Frame::new("userLeftProject", json!({"onlineUsers": ["a"]})),
            Instant::now(),
        );
        assert!(dispatcher.presence().rooms().is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_typing_refresh_does_not_republish() {
        let dispatcher = dispatcher();
        let (_sub, mut rx) = dispatcher.router().subscribe_channel(topics::TYPING).unwrap();
        let start = Instant::now();
        let signal = json!({"roomId": "d-1", "userId": "u1", "userName": "Ana"});

        dispatcher.dispatch(Frame::new("userTyping", signal.clone()), start);
        dispatcher.dispatch(
            Frame::new("userTyping", signal),
            start + Duration::from_secs(1),
        );
        assert_eq!(drain(&mut rx).len(), 1);

        dispatcher.sweep(start + Duration::from_secs(3));
        assert!(drain(&mut rx).is_empty());

        dispatcher.sweep(start + Duration::from_secs(4));
        match drain(&mut rx).as_slice() {
            [Event::Typing { room_id, entries }] => {
                assert_eq!(room_id, "d-1");
                assert!(entries.is_empty());
            }
            other => panic!("Expected one typing event, got {:?}", other),
        }
    }

    #[test]
    fn test_stop_typing_publishes() {
        let dispatcher = dispatcher();
        let now = Instant::now();
        dispatcher.dispatch(
            Frame::new("userTyping", json!({"discussionId": "d-1", "userId": "u1"})),
            now,
        );

        let (_sub, mut rx) = dispatcher.router().subscribe_channel(topics::TYPING).unwrap();
        dispatcher.dispatch(
            Frame::new("userStoppedTyping", json!({"roomId": "d-1", "userId": "u1"})),
            now,
        );
        assert_eq!(drain(&mut rx).len(), 1);
        assert!(dispatcher.typing().entries_at("d-1", now).is_empty());
    }

    #[test]
    fn test_duplicate_push_published_once() {
        let dispatcher = dispatcher();
        let (_sub, mut rx) = dispatcher
            .router()
            .subscribe_channel(topics::NOTIFICATION_RECEIVED)
            .unwrap();
        let frame = Frame::new("new_notification", json!({"id": "n1", "title": "Hello"}));

        dispatcher.dispatch(frame.clone(), Instant::now());
        dispatcher.dispatch(frame, Instant::now());

        assert_eq!(drain(&mut rx).len(), 1);
        assert_eq!(dispatcher.notifications().len(), 1);
        assert_eq!(dispatcher.unread_count(), 1);
    }

    #[test]
    fn test_push_snapshot_follows_handler_changes() {
        let dispatcher = Arc::new(dispatcher());
        let weak = Arc::downgrade(&dispatcher);
        let _auto_read = dispatcher
            .router()
            .subscribe(topics::NOTIFICATION_RECEIVED, move |event| {
                if let (Some(dispatcher), Event::NotificationReceived(n)) = (weak.upgrade(), event) {
                    dispatcher.mark_read(&n.id);
                }
                Ok(())
            })
            .unwrap();
        let (_sub, mut rx) = dispatcher
            .router()
            .subscribe_channel(topics::NOTIFICATIONS)
            .unwrap();

        dispatcher.dispatch(
            Frame::new("new_notification", json!({"id": "n1"})),
            Instant::now(),
        );

        let snapshots: Vec<(usize, u64)> = drain(&mut rx)
            .into_iter()
            .map(|event| match event {
                Event::Notifications {
                    unread, revision, ..
                } => (unread, revision),
                other => panic!("Expected notifications event, got {:?}", other),
            })
            .collect();
        assert_eq!(dispatcher.unread_count(), 0);
        assert_eq!(snapshots.last(), Some(&(0, 2)));
        assert!(snapshots.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn test_high_priority_push_shows_desktop_alert() {
        let notifier = Arc::new(CountingNotifier::default());
        let dispatcher = Dispatcher::new(Router::new(), DispatchConfig::default())
            .with_notifier(notifier.clone());

        dispatcher.dispatch(
            Frame::new("new_notification", json!({"id": "n1", "priority": "high"})),
            Instant::now(),
        );
        dispatcher.dispatch(
            Frame::new("project_notification", json!({"id": "n2", "priority": "low"})),
            Instant::now(),
        );

        assert_eq!(notifier.shown.load(Ordering::SeqCst), 1);
        // The failed alert did not block the state update.
        assert_eq!(dispatcher.notifications().len(), 2);
        assert_eq!(dispatcher.notification("n2").unwrap().kind, "project");
    }

    #[test]
    fn test_metrics_and_activity() {
        let dispatcher = dispatcher();
        let (_sub, mut rx) = dispatcher.router().subscribe_channel(topics::DASHBOARD).unwrap();
        let now = Instant::now();

        dispatcher.dispatch(
            Frame::new("task_stats_update", json!({"stats": {"open": 2}})),
            now,
        );
        dispatcher.dispatch(
            Frame::new("dashboard_update", json!({"type": "projectStats", "data": {"active": 1}})),
            now,
        );
        dispatcher.dispatch(
            Frame::new("activity_update", json!({"activity": {"kind": "comment"}})),
            now,
        );

        assert_eq!(drain(&mut rx).len(), 3);
        let dashboard = dispatcher.dashboard();
        assert_eq!(
            dashboard.get(&MetricKind::TaskStats).unwrap().payload,
            json!({"open": 2})
        );
        assert_eq!(
            dashboard.get(&MetricKind::ProjectStats).unwrap().payload,
            json!({"active": 1})
        );
        assert_eq!(dashboard.activity_feed(), vec![json!({"kind": "comment"})]);
    }

    #[test]
    fn test_reset_session_clears_typing_and_presence() {
        let dispatcher = dispatcher();
        dispatcher.set_current_room(Some("p-1".into()));
        let now = Instant::now();
        dispatcher.dispatch(
            Frame::new("userTyping", json!({"roomId": "d-1", "userId": "u1"})),
            now,
        );
        dispatcher.dispatch(
            Frame::new("userJoinedProject", json!({"projectId": "p-1", "onlineUsers": ["a"]})),
            now,
        );
        dispatcher.dispatch(
            Frame::new("new_notification", json!({"id": "n1"})),
            now,
        );

        let (_sub, mut rx) = dispatcher.router().subscribe_channel(topics::WILDCARD).unwrap();
        dispatcher.reset_session();

        assert_eq!(drain(&mut rx).len(), 2);
        assert!(dispatcher.typing().rooms().is_empty());
        assert!(dispatcher.presence().roster("p-1").is_empty());
        assert_eq!(dispatcher.notifications().len(), 1);
        assert_eq!(dispatcher.current_room(), None);
    }

    #[test]
    fn test_local_notification_actions_publish_on_change() {
        let dispatcher = dispatcher();
        dispatcher.dispatch(
            Frame::new("new_notification", json!({"id": "n1"})),
            Instant::now(),
        );
        let (_sub, mut rx) = dispatcher
            .router()
            .subscribe_channel(topics::NOTIFICATIONS)
            .unwrap();

        assert!(dispatcher.mark_read("n1"));
        assert!(!dispatcher.mark_read("n1"));
        assert_eq!(dispatcher.mark_all_read(), 0);
        assert!(dispatcher.remove_notification("n1"));
        assert!(!dispatcher.clear_notifications());

        assert_eq!(drain(&mut rx).len(), 2);
    }
}
