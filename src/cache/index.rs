//! Bounded record of list keys issued by this process.
//!
//! The underlying store has no wildcard delete, so list invalidation needs to
//! know which filtered/sorted variants exist. Keys are tracked in LRU order;
//! once the limit is reached the least recently issued key is forgotten and
//! only expires through its TTL.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

use super::lock::mutex_lock;

const LOCK_TARGET: &str = "cache::index";

pub struct ListKeyIndex {
    keys: Mutex<LruCache<String, ()>>,
}

impl ListKeyIndex {
    pub fn new(limit: NonZeroUsize) -> Self {
        Self {
            keys: Mutex::new(LruCache::new(limit)),
        }
    }

    /// Record (or refresh) a list key.
    pub fn record(&self, key: &str) {
        let mut keys = mutex_lock(&self.keys, LOCK_TARGET, "record");
        if keys.get(key).is_none() {
            keys.put(key.to_string(), ());
        }
    }

    /// Take every tracked key, leaving the index empty.
    pub fn drain(&self) -> Vec<String> {
        let mut keys = mutex_lock(&self.keys, LOCK_TARGET, "drain");
        let drained = keys.iter().map(|(key, _)| key.clone()).collect();
        keys.clear();
        drained
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.keys, LOCK_TARGET, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
