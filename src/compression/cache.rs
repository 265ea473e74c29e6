//! Fixed-capacity LRU cache for compressed payloads.
//!
//! Access order is tracked with a logical clock: every hit or insert stamps the
//! entry with the next tick, and the smallest tick is the eviction victim.
//! The cache is not internally synchronized; the engine wraps it in a mutex.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Cache key: message type plus content hash. Equal hashes are treated as
/// equal content; a collision returns the first payload's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub message_type: String,
    pub content_hash: u64,
}

impl CacheKey {
    pub fn new(message_type: impl Into<String>, content_hash: u64) -> Self {
        Self {
            message_type: message_type.into(),
            content_hash,
        }
    }
}

/// Content hash used for cache keys: payload length in the high word,
/// CRC32 in the low word.
pub fn content_hash(data: &[u8]) -> u64 {
    ((data.len() as u64) << 32) | u64::from(crc32fast::hash(data))
}

#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: usize,
    tick: u64,
    entries: HashMap<K, (V, u64)>,
    order: BTreeMap<u64, K>,
}

impl<K: Clone + Eq + Hash, V: Clone> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tick: 0,
            entries: HashMap::with_capacity(capacity),
            order: BTreeMap::new(),
        }
    }

    /// Look up and promote to most recently used.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let tick = self.next_tick();
        let (value, stamp) = self.entries.get_mut(key)?;
        let previous = std::mem::replace(stamp, tick);
        let value = value.clone();
        self.order.remove(&previous);
        self.order.insert(tick, key.clone());
        Some(value)
    }

    /// Insert or replace, evicting the least recently used entry when full.
    /// Returns the evicted key, if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<K> {
        let tick = self.next_tick();
        if let Some((_, previous)) = self.entries.insert(key.clone(), (value, tick)) {
            self.order.remove(&previous);
            self.order.insert(tick, key);
            return None;
        }
        self.order.insert(tick, key);

        if self.entries.len() > self.capacity {
            if let Some((_, victim)) = self.order.pop_first() {
                self.entries.remove(&victim);
                return Some(victim);
            }
        }
        None
    }

    /// Membership test that does not affect recency.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.insert("c", 3), Some("a"));
        assert!(!cache.contains(&"a"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_get_promotes_entry() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.insert("c", 3), Some("b"));
        assert!(cache.contains(&"a"));
    }

    #[test]
    fn test_replacing_does_not_evict() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.insert("a", 10), None);
        assert_eq!(cache.get(&"a"), Some(10));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_content_hash_distinguishes_length() {
        assert_ne!(content_hash(b"abc"), content_hash(b"abcd"));
        assert_eq!(content_hash(b"abc"), content_hash(b"abc"));
    }
}
