// src/seen.rs
use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Ids of messages this node has already displayed and forwarded.
///
/// Without a retention window the set only grows. With one, `prune` drops ids
/// older than the window; a message whose id was pruned will be accepted
/// again if it ever resurfaces.
#[derive(Debug, Default)]
pub struct SeenSet {
    inner: Mutex<HashMap<String, Instant>>,
    retention: Option<Duration>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            retention: Some(retention),
        }
    }

    pub fn retention(&self) -> Option<Duration> {
        self.retention
    }

    /// Record `id`. Returns `true` if it was not already present; the check and
    /// the insert happen under one lock so two racing copies of a message
    /// cannot both win.
    pub fn insert(&self, id: &str) -> bool {
        let mut guard = self.inner.lock();
        if guard.contains_key(id) {
            return false;
        }
        guard.insert(id.to_string(), Instant::now());
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Evict ids older than the retention window. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let Some(retention) = self.retention else {
            return 0;
        };
        self.prune_older_than(Instant::now(), retention)
    }

    fn prune_older_than(&self, now: Instant, retention: Duration) -> usize {
        let mut guard = self.inner.lock();
        let before = guard.len();
        guard.retain(|_, inserted| now.saturating_duration_since(*inserted) < retention);
        before - guard.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn insert_reports_first_sighting_only() {
        let seen = SeenSet::new();
        assert!(seen.insert("a"));
        assert!(!seen.insert("a"));
        assert!(seen.insert("b"));
        assert_eq!(seen.len(), 2);
        assert!(seen.contains("a"));
        assert!(!seen.contains("c"));
    }

    #[test]
    fn unbounded_set_never_prunes() {
        let seen = SeenSet::new();
        seen.insert("a");
        assert_eq!(seen.prune(), 0);
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn expired_ids_are_evicted() {
        let seen = SeenSet::with_retention(Duration::from_secs(10));
        seen.insert("old");
        let later = Instant::now() + Duration::from_secs(11);
        assert_eq!(seen.prune_older_than(later, Duration::from_secs(10)), 1);
        assert!(seen.insert("old"));
    }

    #[test]
    fn fresh_ids_survive_prune() {
        let seen = SeenSet::with_retention(Duration::from_secs(60));
        seen.insert("new");
        assert_eq!(seen.prune(), 0);
        assert!(seen.contains("new"));
    }

    #[test]
    fn concurrent_inserts_admit_exactly_one_winner() {
        let seen = Arc::new(SeenSet::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seen = seen.clone();
                std::thread::spawn(move || seen.insert("same"))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
