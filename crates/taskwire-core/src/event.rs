//! Events delivered to subscribers.
//!
//! Raw inbound frames are delivered on their own topic. State derived by the
//! hub is delivered on reserved topics whose names start with `$`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::dashboard::MetricEntry;
use crate::notifications::Notification;
use crate::typing::TypingEntry;
use taskwire_protocol::MetricKind;

/// Reserved topic names for derived events.
pub mod topics {
    pub const CONNECTION: &str = "$connection";
    pub const TYPING: &str = "$typing";
    pub const PRESENCE: &str = "$presence";
    pub const NOTIFICATIONS: &str = "$notifications";
    pub const NOTIFICATION_RECEIVED: &str = "$notification_received";
    pub const DASHBOARD: &str = "$dashboard";

    /// Subscribing to this topic receives every event.
    pub const WILDCARD: &str = "*";
}

/// Connection state of the hub.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    /// Check whether outbound commands are accepted.
    #[must_use]
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }

    /// Check whether the hub is trying to reach the server.
    #[must_use]
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting
        )
    }

    /// Numeric code, used for the state gauge.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Reconnecting => 3,
            ConnectionState::Failed => 4,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// An event fanned out by the router.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A frame from the server, forwarded verbatim on its own topic.
    Inbound { topic: String, payload: Value },
    /// The connection state changed.
    Connection(ConnectionState),
    /// The visible typers of a room changed.
    Typing {
        room_id: String,
        entries: Vec<TypingEntry>,
    },
    /// The online roster of a room changed.
    Presence {
        room_id: String,
        user_ids: Vec<String>,
    },
    /// A new notification arrived by push.
    NotificationReceived(Notification),
    /// The notification collection changed.
    ///
    /// `revision` grows with every change. Polls are applied off the driver
    /// task, so a consumer that already saw a higher revision can discard
    /// this snapshot.
    Notifications {
        items: Vec<Notification>,
        unread: usize,
        revision: u64,
    },
    /// A dashboard metric was updated.
    Dashboard { kind: MetricKind, entry: MetricEntry },
}

impl Event {
    /// Topic this event is delivered on.
    #[must_use]
    pub fn topic(&self) -> &str {
        match self {
            Event::Inbound { topic, .. } => topic,
            Event::Connection(_) => topics::CONNECTION,
            Event::Typing { .. } => topics::TYPING,
            Event::Presence { .. } => topics::PRESENCE,
            Event::NotificationReceived(_) => topics::NOTIFICATION_RECEIVED,
            Event::Notifications { .. } => topics::NOTIFICATIONS,
            Event::Dashboard { .. } => topics::DASHBOARD,
        }
    }

    /// Check whether this event was derived by the hub.
    #[must_use]
    pub fn is_derived(&self) -> bool {
        !matches!(self, Event::Inbound { .. })
    }
}
