//! Generic bounded LRU cache
//!
//! Shared by the schema cache and the session manager. A hash map gives
//! O(1) lookup; an intrusive doubly-linked list (indices into a slab,
//! not pointers) gives O(1) promote-to-MRU and O(1) eviction of the
//! least-recently-used entry. Everything lives behind one `RwLock` —
//! the hit path promotes under a single write-lock acquisition rather
//! than a read-then-upgrade pattern, so there is no window in which
//! another writer can move an entry between the promote check and the
//! promote itself.

#![allow(dead_code)]

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;

const NIL: usize = usize::MAX;

struct Node<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

struct Inner<K, V> {
    nodes: Vec<Option<Node<K, V>>>,
    index: HashMap<K, usize>,
    head: usize, // most-recently-used
    tail: usize, // least-recently-used
    free: Vec<usize>,
    hits: u64,
    misses: u64,
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone,
{
    fn new() -> Self {
        Inner {
            nodes: Vec::new(),
            index: HashMap::new(),
            head: NIL,
            tail: NIL,
            free: Vec::new(),
            hits: 0,
            misses: 0,
        }
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = {
            let node = self.nodes[slot].as_ref().expect("unlink of freed slot");
            (node.prev, node.next)
        };
        if prev != NIL {
            self.nodes[prev].as_mut().unwrap().next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.nodes[next].as_mut().unwrap().prev = prev;
        } else {
            self.tail = prev;
        }
    }

    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        {
            let node = self.nodes[slot].as_mut().unwrap();
            node.prev = NIL;
            node.next = old_head;
        }
        if old_head != NIL {
            self.nodes[old_head].as_mut().unwrap().prev = slot;
        }
        self.head = slot;
        if self.tail == NIL {
            self.tail = slot;
        }
    }

    fn promote(&mut self, slot: usize) {
        if self.head == slot {
            return;
        }
        self.unlink(slot);
        self.push_front(slot);
    }

    fn evict_tail(&mut self) -> Option<K> {
        let tail = self.tail;
        if tail == NIL {
            return None;
        }
        self.unlink(tail);
        let node = self.nodes[tail].take().expect("evict of freed slot");
        self.index.remove(&node.key);
        self.free.push(tail);
        Some(node.key)
    }
}

/// Snapshot of hit/miss/size counters, taken under the same lock that
/// guards the cache contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

/// A thread-safe, capacity-bounded key-value store with LRU eviction.
///
/// `capacity = 0` is a valid configuration: every `put` is immediately
/// evicted and every `get` is a guaranteed miss, i.e. the cache behaves
/// as a pass-through with zero retention.
pub struct BoundedLruCache<K, V> {
    capacity: usize,
    inner: RwLock<Inner<K, V>>,
}

impl<K, V> BoundedLruCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        BoundedLruCache {
            capacity,
            inner: RwLock::new(Inner::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up `key`, promoting it to most-recently-used on a hit.
    /// Acquires the write lock once for the whole operation so the
    /// promote cannot race with a concurrent writer.
    pub fn get(&self, key: &K) -> Option<V> {
        if self.capacity == 0 {
            let mut inner = self.inner.write().expect("lru lock poisoned");
            inner.misses += 1;
            return None;
        }
        let mut inner = self.inner.write().expect("lru lock poisoned");
        match inner.index.get(key).copied() {
            Some(slot) => {
                inner.promote(slot);
                inner.hits += 1;
                Some(inner.nodes[slot].as_ref().unwrap().value.clone())
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Insert or replace `key`'s value, evicting the least-recently-used
    /// entry if the cache is now over capacity.
    pub fn put(&self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.inner.write().expect("lru lock poisoned");
        if let Some(&slot) = inner.index.get(&key) {
            inner.nodes[slot].as_mut().unwrap().value = value;
            inner.promote(slot);
            return;
        }

        let slot = if let Some(slot) = inner.free.pop() {
            inner.nodes[slot] = Some(Node {
                key: key.clone(),
                value,
                prev: NIL,
                next: NIL,
            });
            slot
        } else {
            inner.nodes.push(Some(Node {
                key: key.clone(),
                value,
                prev: NIL,
                next: NIL,
            }));
            inner.nodes.len() - 1
        };
        inner.index.insert(key, slot);
        inner.push_front(slot);

        while inner.index.len() > self.capacity {
            inner.evict_tail();
        }
    }

    /// Remove `key`, returning its value if present.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.write().expect("lru lock poisoned");
        let slot = inner.index.remove(key)?;
        inner.unlink(slot);
        let node = inner.nodes[slot].take().unwrap();
        inner.free.push(slot);
        Some(node.value)
    }

    /// Remove every entry for which `keep` returns `false`, without
    /// disturbing LRU order among the entries that remain. Used by the
    /// session sweeper to evict expired sessions without walking the
    /// whole cache under the public `get`/`put` API.
    pub fn retain<F>(&self, mut keep: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        let mut inner = self.inner.write().expect("lru lock poisoned");
        let mut to_remove = Vec::new();
        for (key, &slot) in inner.index.iter() {
            let node = inner.nodes[slot].as_ref().expect("indexed slot is freed");
            if !keep(key, &node.value) {
                to_remove.push(key.clone());
            }
        }
        for key in to_remove {
            if let Some(slot) = inner.index.remove(&key) {
                inner.unlink(slot);
                inner.nodes[slot] = None;
                inner.free.push(slot);
            }
        }
    }

    /// Drop every entry. Idempotent: calling `clear` twice in a row has
    /// the same observable effect as calling it once.
    pub fn clear(&self) {
        let mut inner = self.inner.write().expect("lru lock poisoned");
        inner.nodes.clear();
        inner.index.clear();
        inner.free.clear();
        inner.head = NIL;
        inner.tail = NIL;
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.read().expect("lru lock poisoned");
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            size: inner.index.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("lru lock poisoned").index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eviction_scenario_matches_spec_counters() {
        let cache: BoundedLruCache<&str, i32> = BoundedLruCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.get(&"a"), Some(1)); // promote a to MRU
        cache.put("c", 3); // evicts b

        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"c"), Some(3));
        assert_eq!(cache.get(&"b"), None);

        let stats = cache.stats();
        assert_eq!(stats.size, 2);
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn zero_capacity_is_pass_through() {
        let cache: BoundedLruCache<&str, i32> = BoundedLruCache::new(0);
        cache.put("a", 1);
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn clear_is_idempotent() {
        let cache: BoundedLruCache<&str, i32> = BoundedLruCache::new(4);
        cache.put("a", 1);
        cache.clear();
        cache.clear();
        assert_eq!(cache.stats().size, 0);
        assert_eq!(cache.get(&"a"), None);
    }

    #[test]
    fn retain_drops_only_entries_failing_the_predicate() {
        let cache: BoundedLruCache<&str, i32> = BoundedLruCache::new(4);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("c", 3);
        cache.retain(|_, v| *v != 2);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"c"), Some(3));
        assert_eq!(cache.stats().size, 2);
    }

    #[test]
    fn size_never_exceeds_capacity_under_churn() {
        let cache: BoundedLruCache<i32, i32> = BoundedLruCache::new(3);
        for i in 0..100 {
            cache.put(i, i * 10);
            assert!(cache.stats().size <= 3);
        }
    }

    #[test]
    fn put_replacing_existing_key_promotes_without_growing() {
        let cache: BoundedLruCache<&str, i32> = BoundedLruCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("a", 10); // replace + promote, must not evict b
        assert_eq!(cache.get(&"b"), Some(2));
        assert_eq!(cache.get(&"a"), Some(10));
        assert_eq!(cache.stats().size, 2);
    }

    #[test]
    fn remove_drops_entry_and_frees_its_slot_for_reuse() {
        let cache: BoundedLruCache<&str, i32> = BoundedLruCache::new(2);
        cache.put("a", 1);
        assert_eq!(cache.remove(&"a"), Some(1));
        assert_eq!(cache.remove(&"a"), None);
        cache.put("b", 2);
        cache.put("c", 3);
        assert_eq!(cache.stats().size, 2);
    }
}
