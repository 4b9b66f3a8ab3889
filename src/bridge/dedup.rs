//! Bounded, insertion-ordered collections backing the at-most-once logic.
//!
//! Both structures trim oldest-first once over capacity. The history poll
//! only ever returns the newest records, so evicting old ids is safe: an
//! evicted id can no longer appear in a poll response.

use std::collections::{HashMap, HashSet, VecDeque};

/// Set of message ids the bridge has already processed.
pub struct SeenIds {
    cap: usize,
    set: HashSet<String>,
    order: VecDeque<String>,
}

impl SeenIds {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            set: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.set.contains(id)
    }

    /// Insert an id; returns false when it was already present.
    pub fn insert(&mut self, id: String) -> bool {
        if !self.set.insert(id.clone()) {
            return false;
        }
        self.order.push_back(id);
        while self.order.len() > self.cap {
            if let Some(oldest) = self.order.pop_front() {
                self.set.remove(&oldest);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

/// WhatsApp message id → forwarded Telegram message id, bounded the same way.
pub struct ForwardMap {
    cap: usize,
    map: HashMap<String, i64>,
    order: VecDeque<String>,
}

impl ForwardMap {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn insert(&mut self, wa_id: String, tg_id: i64) {
        if self.map.insert(wa_id.clone(), tg_id).is_none() {
            self.order.push_back(wa_id);
        }
        while self.order.len() > self.cap {
            if let Some(oldest) = self.order.pop_front() {
                self.map.remove(&oldest);
            }
        }
    }

    pub fn get(&self, wa_id: &str) -> Option<i64> {
        self.map.get(wa_id).copied()
    }

    pub fn remove(&mut self, wa_id: &str) -> Option<i64> {
        // The order queue keeps a stale entry; it is skipped at trim time
        // because the map lookup is what matters.
        self.map.remove(wa_id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seen_ids_reports_duplicates() {
        let mut seen = SeenIds::new(8);
        assert!(seen.insert("a".into()));
        assert!(!seen.insert("a".into()));
        assert!(seen.contains("a"));
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn seen_ids_trims_oldest_first() {
        let mut seen = SeenIds::new(3);
        for id in ["a", "b", "c", "d"] {
            seen.insert(id.to_string());
        }
        assert!(!seen.contains("a"), "oldest id should be evicted");
        assert!(seen.contains("b"));
        assert!(seen.contains("d"));
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn forward_map_round_trips_and_evicts() {
        let mut map = ForwardMap::new(2);
        map.insert("w1".into(), 11);
        map.insert("w2".into(), 22);
        map.insert("w3".into(), 33);

        assert_eq!(map.get("w1"), None, "oldest mapping should be evicted");
        assert_eq!(map.get("w2"), Some(22));
        assert_eq!(map.get("w3"), Some(33));
    }

    #[test]
    fn forward_map_remove_clears_mapping() {
        let mut map = ForwardMap::new(4);
        map.insert("w1".into(), 11);
        assert_eq!(map.remove("w1"), Some(11));
        assert_eq!(map.get("w1"), None);
        assert_eq!(map.remove("w1"), None);
    }

    #[test]
    fn forward_map_reinsert_updates_value() {
        let mut map = ForwardMap::new(4);
        map.insert("w1".into(), 11);
        map.insert("w1".into(), 12);
        assert_eq!(map.get("w1"), Some(12));
        assert_eq!(map.len(), 1);
    }
}
