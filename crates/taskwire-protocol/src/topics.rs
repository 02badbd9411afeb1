//! Inbound topic catalogue.
//!
//! The server pushes events on named topics. A handful of them feed hub
//! state and get typed payloads here; everything else is passed through
//! untouched so that unknown topics keep working.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

use crate::codec::ProtocolError;
use crate::frames::Frame;

pub const NEW_NOTIFICATION: &str = "new_notification";
pub const PROJECT_NOTIFICATION: &str = "project_notification";
pub const USER_TYPING: &str = "userTyping";
pub const USER_STOPPED_TYPING: &str = "userStoppedTyping";
pub const USER_JOINED_PROJECT: &str = "userJoinedProject";
pub const USER_LEFT_PROJECT: &str = "userLeftProject";
pub const DASHBOARD_UPDATE: &str = "dashboard_update";
pub const TASK_STATS_UPDATE: &str = "task_stats_update";
pub const PROJECT_STATS_UPDATE: &str = "project_stats_update";
pub const SYSTEM_STATS_UPDATE: &str = "system_stats_update";
pub const ACTIVITY_UPDATE: &str = "activity_update";
pub const DASHBOARD_REFRESH_REQUESTED: &str = "dashboard_refresh_requested";

/// Domain topics that carry no hub state and are only forwarded.
pub const DOMAIN_TOPICS: &[&str] = &[
    "taskUpdated",
    "projectUpdated",
    "newDiscussionMessage",
    "task_status_changed",
    "new_task_comment",
    "member_update",
];

/// Notification priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    #[serde(alias = "normal")]
    Medium,
    High,
    /// Any priority this build does not know about.
    #[serde(other)]
    Unknown,
}

/// Where a pushed notification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationScope {
    /// Addressed to the user (`new_notification`).
    User,
    /// Broadcast to a project room (`project_notification`).
    Project,
}

impl NotificationScope {
    /// Kind assigned when the payload does not name one.
    #[must_use]
    pub fn default_kind(self) -> &'static str {
        match self {
            NotificationScope::User => "general",
            NotificationScope::Project => "project",
        }
    }
}

/// Dashboard metric identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MetricKind {
    TaskStats,
    ProjectStats,
    SystemStats,
    ActivityFeed,
    /// Metric types added on the server side later.
    Custom(String),
}

impl MetricKind {
    /// Wire name of the metric.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            MetricKind::TaskStats => "taskStats",
            MetricKind::ProjectStats => "projectStats",
            MetricKind::SystemStats => "systemStats",
            MetricKind::ActivityFeed => "activityFeed",
            MetricKind::Custom(name) => name,
        }
    }
}

impl From<String> for MetricKind {
    fn from(name: String) -> Self {
        match name.as_str() {
            "taskStats" => MetricKind::TaskStats,
            "projectStats" => MetricKind::ProjectStats,
            "systemStats" => MetricKind::SystemStats,
            "activityFeed" | "activity" => MetricKind::ActivityFeed,
            _ => MetricKind::Custom(name),
        }
    }
}

impl From<&str> for MetricKind {
    fn from(name: &str) -> Self {
        MetricKind::from(name.to_string())
    }
}

impl From<MetricKind> for String {
    fn from(kind: MetricKind) -> String {
        kind.as_str().to_string()
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of `new_notification` / `project_notification`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    #[serde(alias = "_id", deserialize_with = "id_string")]
    pub id: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub project_id: Option<String>,
    #[serde(default, deserialize_with = "opt_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read: bool,
}

/// Payload of `userTyping`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    #[serde(alias = "discussionId", deserialize_with = "id_string")]
    pub room_id: String,
    #[serde(deserialize_with = "id_string")]
    pub user_id: String,
    #[serde(default, alias = "displayName")]
    pub user_name: String,
}

/// Payload of `userStoppedTyping`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopTypingPayload {
    #[serde(alias = "discussionId", deserialize_with = "id_string")]
    pub room_id: String,
    #[serde(deserialize_with = "id_string")]
    pub user_id: String,
}

/// Payload of `userJoinedProject` / `userLeftProject`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterPayload {
    #[serde(default, alias = "roomId", deserialize_with = "opt_id_string")]
    pub project_id: Option<String>,
    #[serde(default)]
    pub online_users: Vec<Value>,
}

impl RosterPayload {
    /// User ids in the roster.
    ///
    /// Entries may be bare ids or user objects; objects contribute their
    /// `userId`, `_id` or `id` field. Anything else is skipped.
    #[must_use]
    pub fn user_ids(&self) -> Vec<String> {
        self.online_users.iter().filter_map(value_id).collect()
    }
}

/// Payload of `dashboard_update`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DashboardUpdatePayload {
    #[serde(rename = "type")]
    pub kind: MetricKind,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Deserialize)]
struct StatsPayload {
    #[serde(default)]
    stats: Value,
}

#[derive(Debug, Deserialize)]
struct ActivityPayload {
    activity: Value,
}

/// A decoded inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A pushed notification.
    Notification {
        payload: NotificationPayload,
        scope: NotificationScope,
    },
    /// Someone is typing in a room.
    Typing(TypingPayload),
    /// Someone stopped typing.
    StoppedTyping(StopTypingPayload),
    /// Authoritative online roster for a room.
    Roster(RosterPayload),
    /// Latest value of a dashboard metric.
    Metric { kind: MetricKind, payload: Value },
    /// One new activity feed item.
    Activity(Value),
    /// The server asks dashboards to refresh.
    RefreshRequested,
    /// Any other topic; forwarded without touching hub state.
    Passthrough,
}

impl Inbound {
    /// Decode the typed view of a frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidPayload`] if a known topic carries a
    /// payload of the wrong shape.
    pub fn parse(frame: &Frame) -> Result<Self, ProtocolError> {
        let inbound = match frame.event.as_str() {
            NEW_NOTIFICATION => Inbound::Notification {
                payload: payload(frame)?,
                scope: NotificationScope::User,
            },
            PROJECT_NOTIFICATION => Inbound::Notification {
                payload: payload(frame)?,
                scope: NotificationScope::Project,
            },
            USER_TYPING => Inbound::Typing(payload(frame)?),
            USER_STOPPED_TYPING => Inbound::StoppedTyping(payload(frame)?),
            USER_JOINED_PROJECT | USER_LEFT_PROJECT => Inbound::Roster(payload(frame)?),
            DASHBOARD_UPDATE => {
                let update: DashboardUpdatePayload = payload(frame)?;
                Inbound::Metric {
                    kind: update.kind,
                    payload: update.data,
                }
            }
            TASK_STATS_UPDATE => stats(frame, MetricKind::TaskStats)?,
            PROJECT_STATS_UPDATE => stats(frame, MetricKind::ProjectStats)?,
            SYSTEM_STATS_UPDATE => stats(frame, MetricKind::SystemStats)?,
            ACTIVITY_UPDATE => {
                let update: ActivityPayload = payload(frame)?;
                Inbound::Activity(update.activity)
            }
            DASHBOARD_REFRESH_REQUESTED => Inbound::RefreshRequested,
            _ => Inbound::Passthrough,
        };
        Ok(inbound)
    }
}

fn payload<T: for<'de> Deserialize<'de>>(frame: &Frame) -> Result<T, ProtocolError> {
    T::deserialize(&frame.data).map_err(|e| ProtocolError::InvalidPayload {
        topic: frame.event.clone(),
        reason: e.to_string(),
    })
}

fn stats(frame: &Frame, kind: MetricKind) -> Result<Inbound, ProtocolError> {
    let update: StatsPayload = payload(frame)?;
    Ok(Inbound::Metric {
        kind,
        payload: update.stats,
    })
}

fn value_id(value: &Value) -> Option<String> {
    match value {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => ["userId", "_id", "id"]
            .iter()
            .find_map(|key| map.get(*key))
            .and_then(value_id),
        _ => None,
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Text(String),
    Number(serde_json::Number),
}

impl From<IdRepr> for String {
    fn from(id: IdRepr) -> String {
        match id {
            IdRepr::Text(text) => text,
            IdRepr::Number(n) => n.to_string(),
        }
    }
}

fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    IdRepr::deserialize(deserializer).map(String::from)
}

fn opt_id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<IdRepr>::deserialize(deserializer)?.map(String::from))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TimestampRepr {
    Millis(i64),
    Text(String),
}

fn opt_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    use serde::de::Error;

    match Option::<TimestampRepr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(TimestampRepr::Millis(ms)) => DateTime::from_timestamp_millis(ms)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {ms}"))),
        Some(TimestampRepr::Text(text)) => DateTime::parse_from_rfc3339(&text)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(D::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_notification() {
        let frame = Frame::new(
            NEW_NOTIFICATION,
            json!({
                "id": 42,
                "title": "Assigned",
                "message": "You were assigned to T-1",
                "priority": "high",
                "createdAt": "2024-05-01T10:00:00Z"
            }),
        );

        let Inbound::Notification { payload, scope } = Inbound::parse(&frame).unwrap() else {
            panic!("expected notification");
        };
        assert_eq!(scope, NotificationScope::User);
        assert_eq!(payload.id, "42");
        assert_eq!(payload.priority, Priority::High);
        assert!(payload.created_at.is_some());
        assert!(!payload.read);
    }

    #[test]
    fn test_parse_project_notification_with_millis() {
        let frame = Frame::new(
            PROJECT_NOTIFICATION,
            json!({"id": "n-1", "projectId": 7, "createdAt": 1_714_557_600_000_i64}),
        );

        let Inbound::Notification { payload, scope } = Inbound::parse(&frame).unwrap() else {
            panic!("expected notification");
        };
        assert_eq!(scope, NotificationScope::Project);
        assert_eq!(payload.project_id.as_deref(), Some("7"));
        assert_eq!(payload.priority, Priority::Medium);
        assert_eq!(
            payload.created_at.map(|t| t.timestamp_millis()),
            Some(1_714_557_600_000)
        );
    }

    #[test]
    fn test_typing_accepts_discussion_id() {
        let frame = Frame::new(
            USER_TYPING,
            json!({"discussionId": "d-9", "userId": "u-1", "userName": "Ana"}),
        );

        let Inbound::Typing(typing) = Inbound::parse(&frame).unwrap() else {
            panic!("expected typing");
        };
        assert_eq!(typing.room_id, "d-9");
        assert_eq!(typing.user_name, "Ana");
    }

    #[test]
    fn test_roster_user_ids() {
        let frame = Frame::new(
            USER_JOINED_PROJECT,
            json!({
                "projectId": "p-1",
                "onlineUsers": ["u-1", {"userId": "u-2", "name": "Bo"}, {"_id": 3}, null]
            }),
        );

        let Inbound::Roster(roster) = Inbound::parse(&frame).unwrap() else {
            panic!("expected roster");
        };
        assert_eq!(roster.project_id.as_deref(), Some("p-1"));
        assert_eq!(roster.user_ids(), vec!["u-1", "u-2", "3"]);
    }

    #[test]
    fn test_dashboard_topics() {
        let update = Frame::new(
            DASHBOARD_UPDATE,
            json!({"type": "systemStats", "data": {"cpu": 0.4}}),
        );
        assert_eq!(
            Inbound::parse(&update).unwrap(),
            Inbound::Metric {
                kind: MetricKind::SystemStats,
                payload: json!({"cpu": 0.4}),
            }
        );

        let stats = Frame::new(TASK_STATS_UPDATE, json!({"stats": {"open": 3}}));
        assert_eq!(
            Inbound::parse(&stats).unwrap(),
            Inbound::Metric {
                kind: MetricKind::TaskStats,
                payload: json!({"open": 3}),
            }
        );

        let custom = Frame::new(DASHBOARD_UPDATE, json!({"type": "burndown", "data": []}));
        let Inbound::Metric { kind, .. } = Inbound::parse(&custom).unwrap() else {
            panic!("expected metric");
        };
        assert_eq!(kind, MetricKind::Custom("burndown".into()));
    }

    #[test]
    fn test_unknown_and_domain_topics_pass_through() {
        for topic in DOMAIN_TOPICS.iter().copied().chain(["brandNewTopic"]) {
            let frame = Frame::new(topic, json!({"anything": true}));
            assert_eq!(Inbound::parse(&frame).unwrap(), Inbound::Passthrough);
        }
        assert_eq!(
            Inbound::parse(&Frame::signal(DASHBOARD_REFRESH_REQUESTED)).unwrap(),
            Inbound::RefreshRequested
        );
    }

    #[test]
    fn test_invalid_payload_names_topic() {
        let frame = Frame::new(USER_STOPPED_TYPING, json!({"roomId": "r-1"}));
        match Inbound::parse(&frame) {
            Err(ProtocolError::InvalidPayload { topic, .. }) => {
                assert_eq!(topic, USER_STOPPED_TYPING)
            }
            other => panic!("Expected InvalidPayload, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_priority() {
        let priority: Priority = serde_json::from_value(json!("critical")).unwrap();
        assert_eq!(priority, Priority::Unknown);
    }
}
