use std::hash::Hash;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// A concurrent key-value cache whose entries expire after a fixed time-to-live.
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: DashMap<K, (Instant, V)>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        TtlCache {
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    fn get_at(&self, key: &K, now: Instant) -> Option<V> {
        let fresh = {
            let entry = self.entries.get(key)?;
            let (stored_at, value) = entry.value();
            if now.duration_since(*stored_at) < self.ttl {
                Some(value.clone())
            } else {
                None
            }
        };

        if fresh.is_none() {
            self.evict_stale(key, now);
        }
        fresh
    }

    /// Another thread may have stored a fresh value since the stale one was read.
    fn evict_stale(&self, key: &K, now: Instant) {
        let ttl = self.ttl;
        self.entries
            .remove_if(key, |_, (stored_at, _)| now.duration_since(*stored_at) >= ttl);
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(key, (Instant::now(), value));
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    /// Removes the entry only when `matches` accepts its value.
    pub fn invalidate_if<F>(&self, key: &K, matches: F)
    where
        F: FnOnce(&V) -> bool,
    {
        self.entries.remove_if(key, |_, (_, value)| matches(value));
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_fresh_entries() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert(1, "a");
        assert_eq!(cache.get(&1), Some("a"));
        assert_eq!(cache.get(&2), None);
    }

    #[test]
    fn drops_expired_entries() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert(1, "a");
        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(cache.get_at(&1, later), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn eviction_spares_values_stored_after_the_stale_read() {
        let cache = TtlCache::new(Duration::from_secs(60));
        let stale_seen_at = Instant::now();
        cache.insert(1, "fresh");

        cache.evict_stale(&1, stale_seen_at);
        assert_eq!(cache.get(&1), Some("fresh"));

        cache.evict_stale(&1, Instant::now() + Duration::from_secs(61));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn conditional_invalidation_leaves_other_values() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert(1, 10);
        cache.invalidate_if(&1, |v| *v == 11);
        assert_eq!(cache.get(&1), Some(10));
        cache.invalidate_if(&1, |v| *v == 10);
        assert_eq!(cache.get(&1), None);
    }

    #[test]
    fn invalidates_single_keys_and_everything() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert(1, 10);
        cache.insert(2, 20);
        cache.invalidate(&1);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&2), Some(20));
        cache.clear();
        assert_eq!(cache.len(), 0);
    }
}
