//! Outbound command catalogue.
//!
//! Commands are fire-and-forget: each one maps to exactly one frame and the
//! server's reaction, if any, arrives later on an inbound topic.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::frames::Frame;

pub const JOIN_PROJECT: &str = "joinProject";
pub const LEAVE_PROJECT: &str = "leaveProject";
pub const TASK_UPDATE: &str = "taskUpdate";
pub const DISCUSSION_MESSAGE: &str = "discussionMessage";
pub const PROJECT_UPDATE: &str = "projectUpdate";
pub const TYPING: &str = "typing";
pub const STOP_TYPING: &str = "stopTyping";
pub const JOIN_DASHBOARD: &str = "join_dashboard";
pub const LEAVE_DASHBOARD: &str = "leave_dashboard";
pub const REFRESH_DASHBOARD: &str = "refresh_dashboard";
pub const DASHBOARD_ACTIVITY: &str = "dashboard_activity";

/// A command sent from the hub to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    JoinProject { project_id: String },
    LeaveProject { project_id: String },
    TaskUpdate(Value),
    DiscussionMessage(Value),
    ProjectUpdate(Value),
    Typing { room_id: String },
    StopTyping { room_id: String },
    JoinDashboard,
    LeaveDashboard,
    RefreshDashboard,
    DashboardActivity {
        activity: Value,
        timestamp: DateTime<Utc>,
    },
}

impl Command {
    /// Wire name of the command.
    #[must_use]
    pub fn event(&self) -> &'static str {
        match self {
            Command::JoinProject { .. } => JOIN_PROJECT,
            Command::LeaveProject { .. } => LEAVE_PROJECT,
            Command::TaskUpdate(_) => TASK_UPDATE,
            Command::DiscussionMessage(_) => DISCUSSION_MESSAGE,
            Command::ProjectUpdate(_) => PROJECT_UPDATE,
            Command::Typing { .. } => TYPING,
            Command::StopTyping { .. } => STOP_TYPING,
            Command::JoinDashboard => JOIN_DASHBOARD,
            Command::LeaveDashboard => LEAVE_DASHBOARD,
            Command::RefreshDashboard => REFRESH_DASHBOARD,
            Command::DashboardActivity { .. } => DASHBOARD_ACTIVITY,
        }
    }

    /// Build the frame for this command.
    #[must_use]
    pub fn into_frame(self) -> Frame {
        let event = self.event();
        let data = match self {
            Command::JoinProject { project_id } | Command::LeaveProject { project_id } => {
                Value::String(project_id)
            }
            Command::TaskUpdate(data)
            | Command::DiscussionMessage(data)
            | Command::ProjectUpdate(data) => data,
            Command::Typing { room_id } | Command::StopTyping { room_id } => {
                json!({ "roomId": room_id })
            }
            Command::JoinDashboard | Command::LeaveDashboard | Command::RefreshDashboard => {
                Value::Null
            }
            Command::DashboardActivity {
                activity,
                timestamp,
            } => json!({ "activity": activity, "timestamp": timestamp.to_rfc3339() }),
        };
        Frame::new(event, data)
    }
}
