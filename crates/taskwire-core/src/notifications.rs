//! Notification reconciliation.
//!
//! Notifications reach the client twice: pushed over the live connection and
//! listed by a periodic poll. The reconciler merges both sources into one
//! collection with these rules:
//!
//! - an id appears at most once;
//! - a poll is authoritative for the entries it lists, except that it never
//!   turns a locally read entry back to unread;
//! - pushed entries the server has not listed yet survive a poll that lacks
//!   them;
//! - entries are kept newest first and the collection is bounded.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use taskwire_protocol::{NotificationPayload, NotificationScope, Priority};
use thiserror::Error;
use tracing::{debug, info};

/// Default maximum number of notifications kept.
pub const DEFAULT_MAX_NOTIFICATIONS: usize = 100;

/// A notification as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

impl Notification {
    /// Build a notification from a wire payload.
    ///
    /// A missing `type` falls back to the scope's default kind and a missing
    /// timestamp to the current time.
    #[must_use]
    pub fn from_payload(payload: NotificationPayload, scope: NotificationScope) -> Self {
        Self {
            id: payload.id,
            kind: payload
                .kind
                .unwrap_or_else(|| scope.default_kind().to_string()),
            title: payload.title,
            message: payload.message,
            priority: payload.priority,
            project_id: payload.project_id,
            created_at: payload.created_at.unwrap_or_else(Utc::now),
            read: payload.read,
        }
    }

    /// Check whether the notification asks for a desktop alert.
    #[must_use]
    pub fn is_high_priority(&self) -> bool {
        self.priority == Priority::High
    }

    /// Compare everything except the read flag.
    fn same_content(&self, other: &Notification) -> bool {
        self.kind == other.kind
            && self.title == other.title
            && self.message == other.message
            && self.priority == other.priority
            && self.project_id == other.project_id
            && self.created_at == other.created_at
    }
}

/// Summary of one poll reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOutcome {
    /// Ids listed by the poll that were not held before.
    pub added: usize,
    /// Entries dropped because the poll no longer lists them.
    pub removed: usize,
    /// Held entries whose content the poll overwrote.
    pub conflicts: usize,
    /// Whether the visible collection changed.
    pub changed: bool,
}

/// Merges pushed and polled notifications.
#[derive(Debug)]
pub struct NotificationReconciler {
    /// Newest first.
    entries: Vec<Notification>,
    /// Ids the user read locally that no poll has confirmed as read.
    locally_read: HashSet<String>,
    /// Pushed ids no poll has listed yet.
    unconfirmed: HashSet<String>,
    max_entries: usize,
    /// Bumped on every change to the visible collection.
    revision: u64,
}

impl NotificationReconciler {
    /// Create a reconciler keeping at most `max_entries` notifications.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Vec::new(),
            locally_read: HashSet::new(),
            unconfirmed: HashSet::new(),
            max_entries: max_entries.max(1),
            revision: 0,
        }
    }

    /// Add a pushed notification.
    ///
    /// Returns `false` if the id is already held; the duplicate is ignored.
    pub fn apply_push(&mut self, notification: Notification) -> bool {
        if self.contains(&notification.id) {
            debug!(id = %notification.id, "Duplicate notification push ignored");
            return false;
        }

        self.unconfirmed.insert(notification.id.clone());
        self.entries.insert(0, notification);
        self.enforce_limit();
        self.revision += 1;
        true
    }

    /// Reconcile with a freshly polled list.
    pub fn apply_poll(&mut self, polled: Vec<Notification>) -> PollOutcome {
        let mut outcome = PollOutcome::default();
        let mut listed = HashSet::with_capacity(polled.len());
        let mut incoming = Vec::with_capacity(polled.len());

        for mut notification in polled {
            if !listed.insert(notification.id.clone()) {
                continue;
            }

            if notification.read {
                self.locally_read.remove(&notification.id);
            } else if self.locally_read.contains(&notification.id) {
                notification.read = true;
            }

            match self.get(&notification.id) {
                Some(existing) if !existing.same_content(&notification) => {
                    outcome.conflicts += 1;
                    debug!(id = %notification.id, "Poll overrides notification content");
                }
                Some(_) => {}
                None => outcome.added += 1,
            }

            self.unconfirmed.remove(&notification.id);
            incoming.push(notification);
        }

        let before = self.entries.clone();
        let mut merged = Vec::with_capacity(self.entries.len() + incoming.len());
        for entry in &self.entries {
            if listed.contains(&entry.id) {
                continue;
            }
            if self.unconfirmed.contains(&entry.id) {
                merged.push(entry.clone());
            } else {
                outcome.removed += 1;
            }
        }
        merged.extend(incoming);
        merged.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let retained: HashSet<&str> = merged.iter().map(|n| n.id.as_str()).collect();
        self.locally_read.retain(|id| retained.contains(id.as_str()));

        self.entries = merged;
        self.enforce_limit();
        outcome.changed = self.entries != before;
        if outcome.changed {
            self.revision += 1;
        }

        debug!(
            added = outcome.added,
            removed = outcome.removed,
            conflicts = outcome.conflicts,
            total = self.entries.len(),
            "Notifications reconciled"
        );
        outcome
    }

    /// Mark one notification read.
    ///
    /// Returns `true` if it was unread.
    pub fn mark_read(&mut self, id: &str) -> bool {
        match self.entries.iter_mut().find(|n| n.id == id) {
            Some(entry) if !entry.read => {
                entry.read = true;
                self.locally_read.insert(id.to_string());
                self.revision += 1;
                true
            }
            _ => false,
        }
    }

    /// Mark every notification read.
    ///
    /// Returns the number of entries that changed.
    pub fn mark_all_read(&mut self) -> usize {
        let mut changed = 0;
        for entry in self.entries.iter_mut().filter(|n| !n.read) {
            entry.read = true;
            self.locally_read.insert(entry.id.clone());
            changed += 1;
        }
        if changed > 0 {
            self.revision += 1;
        }
        changed
    }

    /// Remove one notification.
    ///
    /// Returns `true` if it was held.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|n| n.id != id);
        self.locally_read.remove(id);
        self.unconfirmed.remove(id);
        let removed = self.entries.len() != before;
        if removed {
            self.revision += 1;
        }
        removed
    }

    /// Remove every notification.
    ///
    /// Returns `true` if anything was held.
    pub fn clear(&mut self) -> bool {
        let had_entries = !self.entries.is_empty();
        self.entries.clear();
        self.locally_read.clear();
        self.unconfirmed.clear();
        if had_entries {
            self.revision += 1;
        }
        had_entries
    }

    /// All notifications, newest first.
    #[must_use]
    pub fn all(&self) -> Vec<Notification> {
        self.entries.clone()
    }

    /// Get a notification by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Notification> {
        self.entries.iter().find(|n| n.id == id)
    }

    /// Check if a notification id is held.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Number of unread notifications.
    #[must_use]
    pub fn unread_count(&self) -> usize {
        self.entries.iter().filter(|n| !n.read).count()
    }

    /// Revision of the collection; grows with every change.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Number of notifications held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no notification is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn enforce_limit(&mut self) {
        if self.entries.len() <= self.max_entries {
            return;
        }
        for evicted in self.entries.drain(self.max_entries..) {
            self.locally_read.remove(&evicted.id);
            self.unconfirmed.remove(&evicted.id);
        }
    }
}

impl Default for NotificationReconciler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_NOTIFICATIONS)
    }
}

/// Permission state of the desktop notification facility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
    /// The user has not decided yet.
    Default,
}

/// Desktop notification errors.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The facility is not available on this host.
    #[error("Desktop notifications unavailable: {0}")]
    Unavailable(String),

    /// The alert could not be shown.
    #[error("Failed to display notification: {0}")]
    Display(String),
}

/// Shows desktop alerts for high-priority notifications.
pub trait DesktopNotifier: Send + Sync {
    /// Current permission state.
    fn permission(&self) -> Permission;

    /// Display one notification.
    ///
    /// # Errors
    ///
    /// Returns an error if the alert could not be shown.
    fn show(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Notifier that never shows anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl DesktopNotifier for NoopNotifier {
    fn permission(&self) -> Permission {
        Permission::Denied
    }

    fn show(&self, _notification: &Notification) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Notifier that writes alerts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl DesktopNotifier for LogNotifier {
    fn permission(&self) -> Permission {
        Permission::Granted
    }

    fn show(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            id = %notification.id,
            title = %notification.title,
            "{}",
            notification.message
        );
        Ok(())
    }
}
