//! Outbound command facade.
//!
//! Every helper serializes one user action into an outbound frame and hands
//! it to the session's driver task. Nothing waits for a server
//! acknowledgement. While the hub is not connected every command fails with
//! [`CommandError::NotConnected`].

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use taskwire_protocol::{Command, Frame};
use tracing::debug;

use crate::error::CommandError;
use crate::hub::Inner;
use crate::metrics;

/// Rooms joined through the facade during the current session.
#[derive(Debug, Default)]
pub(crate) struct Memberships {
    projects: Vec<String>,
    dashboard: bool,
}

impl Memberships {
    /// A repeated join makes the project current again.
    fn join_project(&mut self, project_id: &str) {
        self.projects.retain(|p| p != project_id);
        self.projects.push(project_id.to_string());
    }

    fn leave_project(&mut self, project_id: &str) {
        self.projects.retain(|p| p != project_id);
    }

    /// Most recently joined project still joined.
    pub(crate) fn current_project(&self) -> Option<String> {
        self.projects.last().cloned()
    }

    pub(crate) fn clear(&mut self) {
        self.projects.clear();
        self.dashboard = false;
    }

    /// Frames that re-establish every membership on a new connection.
    pub(crate) fn replay_frames(&self) -> Vec<Frame> {
        let mut frames: Vec<Frame> = self
            .projects
            .iter()
            .map(|project_id| {
                Command::JoinProject {
                    project_id: project_id.clone(),
                }
                .into_frame()
            })
            .collect();
        if self.dashboard {
            frames.push(Command::JoinDashboard.into_frame());
        }
        frames
    }
}

/// Typed helpers for outbound commands.
#[derive(Clone)]
pub struct Commands {
    inner: Arc<Inner>,
}

impl Commands {
    pub(crate) fn new(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    /// Join a project room.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub is not connected.
    pub fn join_project(&self, project_id: &str) -> Result<(), CommandError> {
        self.send(Command::JoinProject {
            project_id: project_id.to_string(),
        })?;
        let mut memberships = self.inner.memberships.lock();
        memberships.join_project(project_id);
        self.inner
            .dispatcher
            .set_current_room(memberships.current_project());
        Ok(())
    }

    /// Leave a project room.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub is not connected.
    pub fn leave_project(&self, project_id: &str) -> Result<(), CommandError> {
        self.send(Command::LeaveProject {
            project_id: project_id.to_string(),
        })?;
        let mut memberships = self.inner.memberships.lock();
        memberships.leave_project(project_id);
        self.inner
            .dispatcher
            .set_current_room(memberships.current_project());
        Ok(())
    }

    /// Broadcast a task change.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub is not connected.
    pub fn task_update(&self, data: Value) -> Result<(), CommandError> {
        self.send(Command::TaskUpdate(data))
    }

    /// Post a discussion message.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub is not connected.
    pub fn discussion_message(&self, data: Value) -> Result<(), CommandError> {
        self.send(Command::DiscussionMessage(data))
    }

    /// Broadcast a project change.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub is not connected.
    pub fn project_update(&self, data: Value) -> Result<(), CommandError> {
        self.send(Command::ProjectUpdate(data))
    }

    /// Signal that the user is typing in a room.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub is not connected.
    pub fn typing(&self, room_id: &str) -> Result<(), CommandError> {
        self.send(Command::Typing {
            room_id: room_id.to_string(),
        })
    }

    /// Signal that the user stopped typing in a room.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub is not connected.
    pub fn stop_typing(&self, room_id: &str) -> Result<(), CommandError> {
        self.send(Command::StopTyping {
            room_id: room_id.to_string(),
        })
    }

    /// Subscribe to dashboard updates.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub is not connected.
    pub fn join_dashboard(&self) -> Result<(), CommandError> {
        self.send(Command::JoinDashboard)?;
        self.inner.memberships.lock().dashboard = true;
        Ok(())
    }

    /// Unsubscribe from dashboard updates.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub is not connected.
    pub fn leave_dashboard(&self) -> Result<(), CommandError> {
        self.send(Command::LeaveDashboard)?;
        self.inner.memberships.lock().dashboard = false;
        Ok(())
    }

    /// Ask the server to push fresh dashboard metrics.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub is not connected.
    pub fn refresh_dashboard(&self) -> Result<(), CommandError> {
        self.send(Command::RefreshDashboard)
    }

    /// Report a dashboard activity, stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub is not connected.
    pub fn dashboard_activity(&self, activity: Value) -> Result<(), CommandError> {
        self.send(Command::DashboardActivity {
            activity,
            timestamp: Utc::now(),
        })
    }

    fn send(&self, command: Command) -> Result<(), CommandError> {
        let state = self.inner.state();
        if !state.is_connected() {
            debug!(command = command.event(), state = %state, "Command rejected");
            metrics::record_command_rejected();
            return Err(CommandError::NotConnected(state));
        }

        if !self.inner.enqueue(command.into_frame()) {
            return Err(CommandError::ChannelClosed);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Commands {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Commands")
            .field("state", &self.inner.state())
            .finish()
    }
}
