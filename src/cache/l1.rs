//! L1 Cache - In-Process Volatile Cache
//!
//! Bounded, recency-ordered key/value store with per-entry TTL.
//!
//! # Design
//!
//! - One `parking_lot::Mutex` around the map and its recency index
//! - LRU eviction by entry count; `get` and `set` both refresh recency
//! - Lazy expiry: an expired entry is dropped by the `get` that finds it

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::entry::CacheEntry;
use super::key::CacheKey;
use super::DEFAULT_L1_CAPACITY;

/// L1 Cache configuration
#[derive(Debug, Clone)]
pub struct L1Config {
    /// Maximum number of entries
    pub capacity: usize,
}

impl Default for L1Config {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_L1_CAPACITY,
        }
    }
}

struct Slot {
    entry: CacheEntry,
    tick: u64,
}

#[derive(Default)]
struct LruState {
    slots: HashMap<CacheKey, Slot>,
    /// tick -> key, oldest first
    order: BTreeMap<u64, CacheKey>,
    next_tick: u64,
}

impl LruState {
    fn touch(&mut self, key: &CacheKey) {
        let tick = self.next_tick;
        if let Some(slot) = self.slots.get_mut(key) {
            self.order.remove(&slot.tick);
            slot.tick = tick;
            self.order.insert(tick, key.clone());
            self.next_tick += 1;
        }
    }

    fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let slot = self.slots.remove(key)?;
        self.order.remove(&slot.tick);
        Some(slot.entry)
    }

    fn pop_oldest(&mut self) -> Option<CacheKey> {
        let (_, key) = self.order.pop_first()?;
        self.slots.remove(&key);
        Some(key)
    }
}

/// L1 Cache - in-process volatile tier
pub struct VolatileLocalCache {
    state: Mutex<LruState>,
    config: L1Config,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl VolatileLocalCache {
    /// Create a new L1 cache with default configuration
    pub fn new() -> Self {
        Self::with_config(L1Config::default())
    }

    /// Create a new L1 cache holding at most `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_config(L1Config { capacity })
    }

    /// Create a new L1 cache with custom configuration
    pub fn with_config(config: L1Config) -> Self {
        Self {
            state: Mutex::new(LruState::default()),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Get an entry, refreshing its recency
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let mut state = self.state.lock();

        let expired = match state.slots.get(key) {
            Some(slot) => slot.entry.is_expired(),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if expired {
            state.remove(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        state.touch(key);
        self.hits.fetch_add(1, Ordering::Relaxed);
        state.slots.get(key).map(|slot| {
            slot.entry.record_access();
            slot.entry.clone()
        })
    }

    /// Insert or replace an entry, evicting the least recently used on overflow
    pub fn set(&self, key: CacheKey, entry: CacheEntry) {
        if self.config.capacity == 0 {
            return;
        }

        let mut state = self.state.lock();
        let tick = state.next_tick;
        state.next_tick += 1;

        if let Some(old) = state.slots.insert(key.clone(), Slot { entry, tick }) {
            state.order.remove(&old.tick);
        }
        state.order.insert(tick, key);

        while state.slots.len() > self.config.capacity {
            if state.pop_oldest().is_none() {
                break;
            }
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remove an entry
    pub fn remove(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.state.lock().remove(key)
    }

    /// Remove every entry of a namespace, returning how many were dropped
    pub fn remove_namespace(&self, namespace: &str) -> usize {
        let mut state = self.state.lock();
        let doomed: Vec<CacheKey> = state
            .slots
            .keys()
            .filter(|k| k.namespace() == namespace)
            .cloned()
            .collect();
        for key in &doomed {
            state.remove(key);
        }
        doomed.len()
    }

    /// Check presence without touching recency or expiry
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.state.lock().slots.contains_key(key)
    }

    /// Number of entries (expired entries count until touched)
    pub fn size(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    /// Clear the cache
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.slots.clear();
        state.order.clear();
    }

    /// Get cache statistics
    pub fn stats(&self) -> L1Stats {
        L1Stats {
            entries: self.size(),
            capacity: self.capacity(),
            hits: self.hits(),
            misses: self.misses(),
            evictions: self.evictions(),
            expirations: self.expirations(),
        }
    }
}

impl Default for VolatileLocalCache {
    fn default() -> Self {
        Self::new()
    }
}

/// L1 cache statistics
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct L1Stats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

// =============================================================================
// Tests
// =============================================================================
