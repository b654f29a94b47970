//! Clock-sweep cache: constant-time approximate LRU
//!
//! Lookups vastly outnumber inserts on the catalog path, so eviction is
//! done with a clock hand instead of per-access list surgery: `get` sets
//! a referenced bit, `insert` advances circularly through entries
//! clearing bits, and the first entry whose bit is already clear is the
//! victim. The hand position persists across calls.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

struct Entry<K, V> {
    key: K,
    value: V,
    size: u64,
    referenced: bool,
}

struct Inner<K, V> {
    entries: Vec<Entry<K, V>>,
    index: HashMap<K, usize>,
    hand: usize,
    used_bytes: u64,
}

/// Bounded associative cache with clock-sweep eviction.
///
/// Bounded by entry count and, optionally, by total entry bytes.
/// Concurrent `get` and `insert` are safe.
pub struct ClockCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    max_entries: usize,
    max_bytes: Option<u64>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Hit/miss/eviction counters, sampled without locking the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl<K, V> ClockCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Cache bounded by entry count only.
    pub fn with_max(max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: Vec::with_capacity(max_entries.min(1024)),
                index: HashMap::with_capacity(max_entries.min(1024)),
                hand: 0,
                used_bytes: 0,
            }),
            max_entries,
            max_bytes: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Cache bounded by entry count and a total byte budget.
    pub fn with_max_bytes(max_entries: usize, max_bytes: u64) -> Self {
        let mut cache = Self::with_max(max_entries);
        cache.max_bytes = Some(max_bytes);
        cache
    }

    /// Look up `key`, marking the entry recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        match inner.index.get(key).copied() {
            Some(slot) => {
                let entry = &mut inner.entries[slot];
                entry.referenced = true;
                let value = entry.value.clone();
                drop(inner);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                drop(inner);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert `key -> value`, accounting `size` bytes against the budget.
    ///
    /// An entry whose size alone exceeds the byte budget is rejected
    /// outright rather than evicting the cache to empty; evicting every
    /// hot entry for an item that cannot improve hit rates is worse than
    /// not caching it. Inserting an already-present key refreshes its
    /// value and marks it referenced.
    pub fn insert(&self, key: K, value: V, size: u64) {
        if self.max_entries == 0 {
            return;
        }
        if let Some(max_bytes) = self.max_bytes {
            if size > max_bytes {
                return;
            }
        }

        let mut inner = self.inner.lock();
        if let Some(slot) = inner.index.get(&key).copied() {
            let old_size = inner.entries[slot].size;
            inner.used_bytes = inner.used_bytes - old_size + size;
            let entry = &mut inner.entries[slot];
            entry.value = value;
            entry.size = size;
            entry.referenced = true;
            return;
        }

        let mut evicted = 0u64;
        while inner.entries.len() >= self.max_entries {
            let victim = Self::sweep(&mut inner);
            Self::remove_slot(&mut inner, victim);
            evicted += 1;
        }
        if let Some(max_bytes) = self.max_bytes {
            while inner.used_bytes + size > max_bytes && !inner.entries.is_empty() {
                let victim = Self::sweep(&mut inner);
                Self::remove_slot(&mut inner, victim);
                evicted += 1;
            }
        }

        let slot = inner.entries.len();
        inner.index.insert(key.clone(), slot);
        inner.entries.push(Entry {
            key,
            value,
            size,
            referenced: false,
        });
        inner.used_bytes += size;
        drop(inner);

        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes accounted against the budget.
    pub fn used_bytes(&self) -> u64 {
        self.inner.lock().used_bytes
    }

    pub fn stats(&self) -> ClockCacheStats {
        ClockCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Advance the clock hand to the next victim slot, clearing
    /// referenced bits along the way. The hand survives into later calls.
    fn sweep(inner: &mut Inner<K, V>) -> usize {
        loop {
            if inner.hand >= inner.entries.len() {
                inner.hand = 0;
            }
            let slot = inner.hand;
            if inner.entries[slot].referenced {
                inner.entries[slot].referenced = false;
                inner.hand += 1;
            } else {
                inner.hand += 1;
                return slot;
            }
        }
    }

    fn remove_slot(inner: &mut Inner<K, V>, slot: usize) {
        let entry = inner.entries.swap_remove(slot);
        inner.used_bytes -= entry.size;
        inner.index.remove(&entry.key);
        // swap_remove moved the former tail into `slot`; fix its index.
        if slot < inner.entries.len() {
            let moved_key = inner.entries[slot].key.clone();
            inner.index.insert(moved_key, slot);
        }
        if inner.hand > inner.entries.len() {
            inner.hand = 0;
        }
    }
}
