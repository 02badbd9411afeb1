//! Typing indicators.
//!
//! Each `(room, user)` pair is visible until its deadline passes. Every new
//! typing signal pushes the deadline to `now + ttl`, so a user who keeps
//! typing stays visible without gaps. Expired entries are evicted by
//! [`TypingRegistry::sweep`], which the hub runs at [`TypingRegistry::next_expiry`].

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// One user typing in one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingEntry {
    /// User id.
    pub user_id: String,
    /// Name shown next to the indicator.
    pub display_name: String,
    /// When the current typing streak began.
    pub started_at: Instant,
    /// When the entry stops being visible unless refreshed.
    pub expires_at: Instant,
}

impl TypingEntry {
    /// Check whether the entry is visible at `now`.
    #[must_use]
    pub fn is_visible(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Per-room typing state.
#[derive(Debug, Default)]
pub struct TypingRegistry {
    /// Entries per room, ordered by first signal.
    rooms: DashMap<String, Vec<TypingEntry>>,
}

impl TypingRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a typing signal.
    ///
    /// Returns `true` if the visible set of the room changed. A signal that
    /// only extends the deadline of a visible entry returns `false`.
    pub(crate) fn on_signal(
        &self,
        room_id: &str,
        user_id: &str,
        display_name: &str,
        now: Instant,
        ttl: Duration,
    ) -> bool {
        let expires_at = now + ttl;
        let mut entries = self.rooms.entry(room_id.to_string()).or_default();

        if let Some(pos) = entries.iter().position(|e| e.user_id == user_id) {
            let entry = &mut entries[pos];
            if entry.is_visible(now) {
                entry.expires_at = expires_at;
                if entry.display_name == display_name {
                    trace!(room = %room_id, user = %user_id, "Typing refreshed");
                    return false;
                }
                entry.display_name = display_name.to_string();
                return true;
            }
            // Expired but not yet swept: a new streak starts at the back.
            entries.remove(pos);
        }

        debug!(room = %room_id, user = %user_id, "User started typing");
        entries.push(TypingEntry {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            started_at: now,
            expires_at,
        });
        true
    }

    /// Record an explicit stop signal.
    ///
    /// Returns `true` if an entry was removed.
    pub(crate) fn on_stop(&self, room_id: &str, user_id: &str) -> bool {
        let removed = match self.rooms.get_mut(room_id) {
            Some(mut entries) => {
                let before = entries.len();
                entries.retain(|e| e.user_id != user_id);
                entries.len() != before
            }
            None => false,
        };
        self.rooms.remove_if(room_id, |_, entries| entries.is_empty());

        if removed {
            debug!(room = %room_id, user = %user_id, "User stopped typing");
        }
        removed
    }

    /// Evict every entry whose deadline has passed.
    ///
    /// Returns the rooms whose visible set changed.
    pub(crate) fn sweep(&self, now: Instant) -> Vec<String> {
        let mut changed = Vec::new();
        for mut room in self.rooms.iter_mut() {
            let before = room.len();
            room.retain(|e| e.is_visible(now));
            if room.len() != before {
                changed.push(room.key().clone());
            }
        }
        self.rooms.retain(|_, entries| !entries.is_empty());

        if !changed.is_empty() {
            debug!(rooms = changed.len(), "Typing entries expired");
        }
        changed
    }

    /// Remove all entries.
    ///
    /// Returns the rooms that had entries.
    pub(crate) fn clear(&self) -> Vec<String> {
        let rooms: Vec<String> = self.rooms.iter().map(|r| r.key().clone()).collect();
        self.rooms.clear();
        rooms
    }

    /// Visible typers of a room, in the order they started typing.
    #[must_use]
    pub fn entries(&self, room_id: &str) -> Vec<TypingEntry> {
        self.entries_at(room_id, Instant::now())
    }

    /// Typers of a room visible at `now`.
    #[must_use]
    pub fn entries_at(&self, room_id: &str, now: Instant) -> Vec<TypingEntry> {
        self.rooms
            .get(room_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.is_visible(now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Check whether a user is shown as typing in a room.
    #[must_use]
    pub fn is_typing(&self, room_id: &str, user_id: &str) -> bool {
        let now = Instant::now();
        self.rooms
            .get(room_id)
            .map(|entries| {
                entries
                    .iter()
                    .any(|e| e.user_id == user_id && e.is_visible(now))
            })
            .unwrap_or(false)
    }

    /// Earliest deadline among all entries.
    #[must_use]
    pub fn next_expiry(&self) -> Option<Instant> {
        self.rooms
            .iter()
            .filter_map(|room| room.iter().map(|e| e.expires_at).min())
            .min()
    }

    /// Rooms that currently hold entries.
    #[must_use]
    pub fn rooms(&self) -> Vec<String> {
        self.rooms.iter().map(|r| r.key().clone()).collect()
    }
}
