//! Capacity- and TTL-bounded LRU cache.
//!
//! Maps logical keys to value bytes. One mutex protects the whole cache;
//! the access-order list is a plain vector with O(n) reposition, which is
//! fine at the configured capacities. Expired entries are dropped lazily
//! on access.
//!
//! The cache is strictly a read optimization: every mutation of a key
//! must call [`LruCache::delete`] (or overwrite via [`LruCache::set`]),
//! and any write error invalidates, so stale bytes are never served.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

struct Inner {
    map: HashMap<Vec<u8>, Entry>,
    /// LRU at the front, MRU at the back.
    order: Vec<Vec<u8>>,
}

impl Inner {
    fn touch(&mut self, key: &[u8]) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos);
            self.order.push(k);
        }
    }
}

/// Bounded TTL LRU.
pub struct LruCache {
    inner: Mutex<Inner>,
    capacity: usize,
    ttl: Duration,
}

impl LruCache {
    /// Create a cache holding at most `capacity` entries, each live for
    /// `ttl` after insertion.
    pub fn new(capacity: usize, ttl: Duration) -> LruCache {
        LruCache {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: Vec::new(),
            }),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Fetch a copy of a live entry and mark it most-recently-used.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock();
        let state = inner
            .map
            .get(key)
            .map(|entry| (entry.expires_at <= Instant::now(), entry.value.clone()));
        match state {
            None => None,
            Some((true, _)) => {
                // Expired: drop lazily.
                inner.map.remove(key);
                if let Some(pos) = inner.order.iter().position(|k| k == key) {
                    inner.order.remove(pos);
                }
                None
            }
            Some((false, value)) => {
                inner.touch(key);
                Some(value)
            }
        }
    }

    /// Upsert an entry, mark it MRU, and evict the LRU entry if the cache
    /// is over capacity.
    pub fn set(&self, key: &[u8], value: Vec<u8>) {
        let mut inner = self.inner.lock();
        let expires_at = Instant::now() + self.ttl;
        if inner.map.insert(key.to_vec(), Entry { value, expires_at }).is_some() {
            inner.touch(key);
        } else {
            inner.order.push(key.to_vec());
        }
        while inner.map.len() > self.capacity {
            let lru = inner.order.remove(0);
            inner.map.remove(&lru);
        }
    }

    /// Remove an entry.
    pub fn delete(&self, key: &[u8]) {
        let mut inner = self.inner.lock();
        if inner.map.remove(key).is_some() {
            if let Some(pos) = inner.order.iter().position(|k| k == key) {
                inner.order.remove(pos);
            }
        }
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.order.clear();
    }

    /// Live entry count (expired entries still pending lazy drop included).
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn cache(cap: usize) -> LruCache {
        LruCache::new(cap, Duration::from_secs(60))
    }

    #[test]
    fn test_get_returns_copy() {
        let c = cache(4);
        c.set(b"k", b"v".to_vec());
        assert_eq!(c.get(b"k"), Some(b"v".to_vec()));
        assert_eq!(c.get(b"missing"), None);
    }

    #[test]
    fn test_capacity_evicts_lru() {
        let c = cache(3);
        c.set(b"a", vec![1]);
        c.set(b"b", vec![2]);
        c.set(b"c", vec![3]);
        // Touch `a` so `b` is now least recent.
        assert!(c.get(b"a").is_some());
        c.set(b"d", vec![4]);
        assert_eq!(c.len(), 3);
        assert_eq!(c.get(b"b"), None);
        assert!(c.get(b"a").is_some());
        assert!(c.get(b"c").is_some());
        assert!(c.get(b"d").is_some());
    }

    #[test]
    fn test_over_capacity_inserts_keep_most_recent() {
        let c = cache(5);
        for i in 0..20u8 {
            c.set(&[i], vec![i]);
        }
        assert_eq!(c.len(), 5);
        for i in 15..20u8 {
            assert_eq!(c.get(&[i]), Some(vec![i]));
        }
    }

    #[test]
    fn test_ttl_expiry_dropped_lazily() {
        let c = LruCache::new(4, Duration::from_millis(10));
        c.set(b"k", b"v".to_vec());
        thread::sleep(Duration::from_millis(20));
        assert_eq!(c.get(b"k"), None);
        assert_eq!(c.len(), 0);
    }

    #[test]
    fn test_delete_and_clear() {
        let c = cache(4);
        c.set(b"a", vec![1]);
        c.set(b"b", vec![2]);
        c.delete(b"a");
        assert_eq!(c.get(b"a"), None);
        assert!(c.get(b"b").is_some());
        c.clear();
        assert!(c.is_empty());
    }

    #[test]
    fn test_overwrite_updates_value_and_recency() {
        let c = cache(2);
        c.set(b"a", vec![1]);
        c.set(b"b", vec![2]);
        c.set(b"a", vec![9]);
        c.set(b"c", vec![3]); // evicts b, the least recent
        assert_eq!(c.get(b"a"), Some(vec![9]));
        assert_eq!(c.get(b"b"), None);
    }
}
