//! Presence tracking for Taskwire.
//!
//! The server sends the complete online roster of a project room whenever
//! someone joins or leaves. Each roster replaces the previous one wholesale.

use dashmap::DashMap;
use std::collections::HashSet;
use tracing::debug;

/// Online rosters per room.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    /// Ordered, de-duplicated user ids per room.
    rosters: DashMap<String, Vec<String>>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the roster of a room.
    ///
    /// Duplicate ids collapse to their first occurrence. Returns `true` if
    /// the stored roster changed.
    pub(crate) fn set_roster(&self, room_id: &str, user_ids: Vec<String>) -> bool {
        let mut seen = HashSet::with_capacity(user_ids.len());
        let roster: Vec<String> = user_ids
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();

        let mut current = self.rosters.entry(room_id.to_string()).or_default();
        if *current == roster {
            return false;
        }

        debug!(
            room = %room_id,
            before = current.len(),
            after = roster.len(),
            "Roster replaced"
        );
        *current = roster;
        true
    }

    /// Forget every roster.
    ///
    /// Returns the rooms that had a non-empty roster.
    pub(crate) fn clear(&self) -> Vec<String> {
        let rooms = self
            .rosters
            .iter()
            .filter(|r| !r.is_empty())
            .map(|r| r.key().clone())
            .collect();
        self.rosters.clear();
        rooms
    }

    /// Online users of a room, in roster order.
    #[must_use]
    pub fn roster(&self, room_id: &str) -> Vec<String> {
        self.rosters
            .get(room_id)
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Check if a user is online in a room.
    #[must_use]
    pub fn is_online(&self, room_id: &str, user_id: &str) -> bool {
        self.rosters
            .get(room_id)
            .map(|r| r.iter().any(|id| id == user_id))
            .unwrap_or(false)
    }

    /// Get the number of online users in a room.
    #[must_use]
    pub fn count(&self, room_id: &str) -> usize {
        self.rosters.get(room_id).map(|r| r.len()).unwrap_or(0)
    }

    /// Rooms with a known roster.
    #[must_use]
    pub fn rooms(&self) -> Vec<String> {
        self.rosters.iter().map(|r| r.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_roster_replaces_wholesale() {
        let presence = PresenceRegistry::new();

        assert!(presence.set_roster("p-1", ids(&["a", "b"])));
        assert!(presence.set_roster("p-1", ids(&["c"])));
        assert_eq!(presence.roster("p-1"), ids(&["c"]));
        assert!(!presence.is_online("p-1", "a"));
        assert!(presence.is_online("p-1", "c"));
    }

    #[test]
    fn test_roster_deduplicates_in_order() {
        let presence = PresenceRegistry::new();

        presence.set_roster("p-1", ids(&["b", "a", "b", "c", "a"]));
        assert_eq!(presence.roster("p-1"), ids(&["b", "a", "c"]));
        assert_eq!(presence.count("p-1"), 3);
    }

    #[test]
    fn test_identical_roster_is_not_a_change() {
        let presence = PresenceRegistry::new();

        assert!(presence.set_roster("p-1", ids(&["a", "b"])));
        assert!(!presence.set_roster("p-1", ids(&["a", "b", "a"])));
        assert!(presence.set_roster("p-1", ids(&["b", "a"])));
    }

    #[test]
    fn test_empty_roster() {
        let presence = PresenceRegistry::new();

        assert!(!presence.set_roster("p-1", Vec::new()));
        presence.set_roster("p-1", ids(&["a"]));
        assert!(presence.set_roster("p-1", Vec::new()));
        assert!(presence.roster("p-1").is_empty());
        assert!(presence.roster("unknown").is_empty());
    }

    #[test]
    fn test_clear() {
        let presence = PresenceRegistry::new();

        presence.set_roster("p-1", ids(&["a"]));
        presence.set_roster("p-2", Vec::new());

        assert_eq!(presence.clear(), ids(&["p-1"]));
        assert!(presence.rooms().is_empty());
    }
}
