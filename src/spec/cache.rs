//! Fixed-capacity least-recently-used cache.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Thread-safe LRU cache.
///
/// Lookups and inserts move the key to the most-recent end; inserting past capacity
/// evicts from the least-recent end. Capacity 0 disables caching.
pub struct LruCache<K, V> {
    capacity: usize,
    inner: Mutex<LruInner<K, V>>,
}

struct LruInner<K, V> {
    entries: HashMap<K, V>,
    /// Least recently used at the front.
    order: VecDeque<K>,
}

impl<K, V> LruCache<K, V>
where
    K: Clone + Hash + Eq,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(LruInner {
                entries: HashMap::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
            }),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let value = inner.entries.get(key).cloned()?;
        inner.touch(key);
        Some(value)
    }

    /// Inserts or replaces; returns the evicted key, if any.
    pub fn put(&self, key: K, value: V) -> Option<K> {
        if self.capacity == 0 {
            return None;
        }
        let mut inner = self.inner.lock();
        if inner.entries.insert(key.clone(), value).is_some() {
            inner.touch(&key);
            return None;
        }
        inner.order.push_back(key);
        if inner.order.len() > self.capacity {
            let evicted = inner.order.pop_front()?;
            inner.entries.remove(&evicted);
            return Some(evicted);
        }
        None
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let value = inner.entries.remove(key)?;
        inner.order.retain(|k| k != key);
        Some(value)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<K: Eq, V> LruInner<K, V> {
    fn touch(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|k| k == key)
            && let Some(k) = self.order.remove(pos)
        {
            self.order.push_back(k);
        }
    }
}
