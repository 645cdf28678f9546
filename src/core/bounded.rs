//! Size-capped collections with auto-close on eviction.
//!
//! Session registries must never grow without bound; these containers
//! enforce the fleet caps and guarantee evicted values are torn down.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Mutex;

use super::resources::Closeable;

/// Map capped at `capacity` entries. Inserting a new key at capacity
/// evicts the oldest-inserted entry (FIFO) and closes its value.
/// Updating an existing key closes the old value in place, no eviction.
pub struct BoundedMap<K, V> {
    inner: Mutex<BoundedMapInner<K, V>>,
    capacity: usize,
}

struct BoundedMapInner<K, V> {
    entries: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K, V> BoundedMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Closeable,
{
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "BoundedMap capacity must be non-zero");
        Self {
            inner: Mutex::new(BoundedMapInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity,
        }
    }

    /// Inserts or replaces. Returns the key that was evicted, if any.
    pub fn insert(&self, key: K, value: V) -> Option<K> {
        let mut inner = match self.inner.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        if let Some(old) = inner.entries.insert(key.clone(), value) {
            // Update in place: the old value goes away, order is kept.
            if let Err(e) = old.close() {
                log::warn!("bounded map: close of replaced value failed: {e}");
            }
            return None;
        }
        inner.order.push_back(key);
        if inner.entries.len() > self.capacity {
            if let Some(victim) = inner.order.pop_front() {
                if let Some(evicted) = inner.entries.remove(&victim) {
                    if let Err(e) = evicted.close() {
                        log::warn!("bounded map: close of evicted value failed: {e}");
                    }
                }
                return Some(victim);
            }
        }
        None
    }

    /// Removes and returns the value without closing it; the caller owns
    /// the teardown.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = match self.inner.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        let value = inner.entries.remove(key)?;
        inner.order.retain(|k| k != key);
        Some(value)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        match self.inner.lock() {
            Ok(g) => g.entries.contains_key(key),
            Err(e) => e.into_inner().entries.contains_key(key),
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(g) => g.entries.len(),
            Err(e) => e.into_inner().entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<K> {
        match self.inner.lock() {
            Ok(g) => g.entries.keys().cloned().collect(),
            Err(e) => e.into_inner().entries.keys().cloned().collect(),
        }
    }

    /// Runs `f` against the value for `key` while the lock is held.
    pub fn with<R>(&self, key: &K, f: impl FnOnce(&V) -> R) -> Option<R> {
        let inner = match self.inner.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        inner.entries.get(key).map(f)
    }

    /// Drains every entry, closing all values. Used for cascade teardown.
    pub fn close_all(&self) {
        let drained: Vec<V> = {
            let mut inner = match self.inner.lock() {
                Ok(g) => g,
                Err(e) => e.into_inner(),
            };
            inner.order.clear();
            inner.entries.drain().map(|(_, v)| v).collect()
        };
        for value in drained {
            if let Err(e) = value.close() {
                log::warn!("bounded map: close failed during drain: {e}");
            }
        }
    }
}

/// Append-only slice capped at `capacity`; exceeding it trims from the
/// head. Readers get cloned snapshots.
pub struct BoundedVec<T> {
    inner: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T: Clone> BoundedVec<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "BoundedVec capacity must be non-zero");
        Self {
            inner: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn push(&self, value: T) {
        let mut inner = match self.inner.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        inner.push_back(value);
        while inner.len() > self.capacity {
            inner.pop_front();
        }
    }

    pub fn snapshot(&self) -> Vec<T> {
        match self.inner.lock() {
            Ok(g) => g.iter().cloned().collect(),
            Err(e) => e.into_inner().iter().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(g) => g.len(),
            Err(e) => e.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Trims a plain `Vec` to the bounded-slice contract: keep the newest
/// `capacity` items by dropping from the head.
pub fn trim_head<T>(items: &mut Vec<T>, capacity: usize) {
    if items.len() > capacity {
        items.drain(..items.len() - capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::CoreResult;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct Tracked {
        id: u32,
        closed: Arc<AtomicU32>,
    }

    impl Closeable for Tracked {
        fn close(&self) -> CoreResult<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn tracked(id: u32, closed: &Arc<AtomicU32>) -> Tracked {
        Tracked {
            id,
            closed: closed.clone(),
        }
    }

    #[test]
    fn insert_at_capacity_evicts_fifo_and_closes() {
        let closed = Arc::new(AtomicU32::new(0));
        let map = BoundedMap::new(2);
        map.insert("a", tracked(1, &closed));
        map.insert("b", tracked(2, &closed));
        let evicted = map.insert("c", tracked(3, &closed));
        assert_eq!(evicted, Some("a"));
        assert_eq!(map.len(), 2);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(!map.contains_key(&"a"));
        assert!(map.contains_key(&"c"));
    }

    #[test]
    fn update_in_place_closes_old_without_eviction() {
        let closed = Arc::new(AtomicU32::new(0));
        let map = BoundedMap::new(2);
        map.insert("a", tracked(1, &closed));
        map.insert("b", tracked(2, &closed));
        let evicted = map.insert("a", tracked(3, &closed));
        assert_eq!(evicted, None);
        assert_eq!(map.len(), 2);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(map.with(&"a", |v| v.id), Some(3));
    }

    #[test]
    fn remove_does_not_close() {
        let closed = Arc::new(AtomicU32::new(0));
        let map = BoundedMap::new(2);
        map.insert("a", tracked(1, &closed));
        let value = map.remove(&"a").unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 0);
        value.close().unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn bounded_vec_trims_from_head() {
        let v = BoundedVec::new(3);
        for i in 0..5 {
            v.push(i);
        }
        assert_eq!(v.snapshot(), vec![2, 3, 4]);
    }

    #[test]
    fn trim_head_keeps_newest() {
        let mut items = vec![1, 2, 3, 4, 5];
        trim_head(&mut items, 2);
        assert_eq!(items, vec![4, 5]);
    }
}
