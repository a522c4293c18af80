//! Event-id dedup cache.
//!
//! Feishu redelivers events it believes went unanswered, so the same
//! event id can arrive more than once. Ids are remembered for a TTL and
//! repeats inside the window are suppressed.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How long an event id is remembered.
pub const DEDUP_TTL: Duration = Duration::from_secs(5 * 60);

/// How often expired entries are evicted.
pub const EVICT_INTERVAL: Duration = Duration::from_secs(60);

pub struct DedupCache {
    seen: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl DedupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Record `id`. Returns `true` when it was not already present within
    /// the TTL — i.e. the caller should process the event.
    pub fn insert(&self, id: &str) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock().unwrap();
        match seen.get(id) {
            Some(at) if now.duration_since(*at) < self.ttl => false,
            _ => {
                seen.insert(id.to_string(), now);
                true
            }
        }
    }

    /// Drop entries older than the TTL. Runs from a minutely cleaner task.
    pub fn evict_expired(&self) {
        let now = Instant::now();
        let mut seen = self.seen.lock().unwrap();
        seen.retain(|_, at| now.duration_since(*at) < self.ttl);
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEDUP_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_observation_is_suppressed() {
        let cache = DedupCache::default();
        assert!(cache.insert("E1"));
        assert!(!cache.insert("E1"));
        assert!(cache.insert("E2"));
    }

    #[test]
    fn expired_entry_is_accepted_again() {
        let cache = DedupCache::new(Duration::from_millis(0));
        assert!(cache.insert("E1"));
        // TTL of zero: instantly expired.
        assert!(cache.insert("E1"));
    }

    #[test]
    fn eviction_drops_expired_entries() {
        let cache = DedupCache::new(Duration::from_millis(0));
        cache.insert("E1");
        cache.insert("E2");
        cache.evict_expired();
        assert!(cache.is_empty());
    }
}
