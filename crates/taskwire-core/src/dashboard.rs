//! Dashboard metric cache.
//!
//! Holds the latest value of every dashboard metric the server pushes, plus
//! a bounded activity feed (newest first).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use taskwire_protocol::MetricKind;
use tracing::trace;

/// Default number of activity items kept.
pub const DEFAULT_ACTIVITY_CAPACITY: usize = 20;

/// Latest value of one metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricEntry {
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

/// Latest-wins metric cache.
#[derive(Debug)]
pub struct DashboardCache {
    metrics: DashMap<MetricKind, MetricEntry>,
    activity: RwLock<VecDeque<Value>>,
    activity_capacity: usize,
}

impl DashboardCache {
    /// Create a cache keeping up to `activity_capacity` feed items.
    #[must_use]
    pub fn new(activity_capacity: usize) -> Self {
        Self {
            metrics: DashMap::new(),
            activity: RwLock::new(VecDeque::with_capacity(activity_capacity)),
            activity_capacity: activity_capacity.max(1),
        }
    }

    /// Store the latest value of a metric.
    ///
    /// An `activityFeed` update carrying an array replaces the whole feed.
    pub(crate) fn set(&self, kind: MetricKind, payload: Value) -> MetricEntry {
        if kind == MetricKind::ActivityFeed {
            match payload {
                Value::Array(items) => {
                    let mut feed = self.activity.write();
                    feed.clear();
                    feed.extend(items.into_iter().take(self.activity_capacity));
                    drop(feed);
                    return self.store_feed();
                }
                item => return self.push_activity(item),
            }
        }

        trace!(metric = %kind, "Metric updated");
        let entry = MetricEntry {
            payload,
            received_at: Utc::now(),
        };
        self.metrics.insert(kind, entry.clone());
        entry
    }

    /// Prepend one item to the activity feed, evicting the oldest.
    pub(crate) fn push_activity(&self, item: Value) -> MetricEntry {
        {
            let mut feed = self.activity.write();
            feed.push_front(item);
            feed.truncate(self.activity_capacity);
        }
        self.store_feed()
    }

    fn store_feed(&self) -> MetricEntry {
        let entry = MetricEntry {
            payload: Value::Array(self.activity_feed()),
            received_at: Utc::now(),
        };
        self.metrics.insert(MetricKind::ActivityFeed, entry.clone());
        entry
    }

    /// Latest value of a metric.
    #[must_use]
    pub fn get(&self, kind: &MetricKind) -> Option<MetricEntry> {
        self.metrics.get(kind).map(|e| e.clone())
    }

    /// Activity feed, newest first.
    #[must_use]
    pub fn activity_feed(&self) -> Vec<Value> {
        self.activity.read().iter().cloned().collect()
    }

    /// Metric kinds with a cached value.
    #[must_use]
    pub fn kinds(&self) -> Vec<MetricKind> {
        self.metrics.iter().map(|e| e.key().clone()).collect()
    }

    /// Maximum activity feed length.
    #[must_use]
    pub fn activity_capacity(&self) -> usize {
        self.activity_capacity
    }
}

impl Default for DashboardCache {
    fn default() -> Self {
        Self::new(DEFAULT_ACTIVITY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_latest_wins() {
        let cache = DashboardCache::default();

        cache.set(MetricKind::TaskStats, json!({"open": 3}));
        cache.set(MetricKind::TaskStats, json!({"open": 4}));

        let entry = cache.get(&MetricKind::TaskStats).unwrap();
        assert_eq!(entry.payload, json!({"open": 4}));
        assert!(cache.get(&MetricKind::ProjectStats).is_none());
    }

    #[test]
    fn test_custom_metric() {
        let cache = DashboardCache::default();
        let kind = MetricKind::from("burndown");

        cache.set(kind.clone(), json!([1, 2, 3]));
        assert_eq!(cache.get(&kind).unwrap().payload, json!([1, 2, 3]));
        assert_eq!(cache.kinds(), vec![kind]);
    }

    #[test]
    fn test_activity_feed_is_bounded_newest_first() {
        let cache = DashboardCache::new(3);

        for i in 0..5 {
            cache.push_activity(json!({"seq": i}));
        }

        let feed = cache.activity_feed();
        assert_eq!(feed, vec![json!({"seq": 4}), json!({"seq": 3}), json!({"seq": 2})]);
        assert_eq!(
            cache.get(&MetricKind::ActivityFeed).unwrap().payload,
            Value::Array(feed)
        );
    }

    #[test]
    fn test_activity_feed_snapshot_replaces() {
        let cache = DashboardCache::new(2);
        cache.push_activity(json!("old"));

        cache.set(MetricKind::ActivityFeed, json!(["a", "b", "c"]));
        assert_eq!(cache.activity_feed(), vec![json!("a"), json!("b")]);

        cache.set(MetricKind::ActivityFeed, json!("d"));
        assert_eq!(cache.activity_feed(), vec![json!("d"), json!("a")]);
    }
}
