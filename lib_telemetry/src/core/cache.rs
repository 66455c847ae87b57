//! # Bounded Telemetry Cache
//!
//! Per-entity snapshot store bounded by capacity and age.
//!
//! ## Eviction policy
//! Eviction is by **insertion order** (capacity-bound FIFO), not access order:
//! reading an entry never protects it. When a new key arrives at capacity the
//! entry with the earliest insertion time is dropped. Writing an existing key
//! (through `set` or `update`) re-stamps its insertion time, moving it to the
//! back of the line.
//!
//! ## Expiry
//! Expiry is lazy. An entry older than `max_age` is only removed when a `get`
//! finds it, and that lookup counts as a miss.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::configs::CacheConfig;

/// Latest known state of an entity: a JSON object.
pub type Snapshot = Map<String, Value>;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Snapshot,
    inserted_at: Instant,
    update_count: u64,
    /// Position in the insertion order.
    seq: u64,
}

/// Counters exposed by [`TelemetryCache::metrics`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    /// Number of writes (`set`, including those issued by `update`).
    pub updates: u64,
    pub hit_rate: f64,
    pub current_size: usize,
    pub capacity: usize,
}

/// Insertion-ordered, TTL-checked snapshot cache.
#[derive(Debug)]
pub struct TelemetryCache {
    entries: HashMap<String, CacheEntry>,
    order: BTreeMap<u64, String>,
    next_seq: u64,
    capacity: usize,
    max_age: Duration,
    hits: u64,
    misses: u64,
    updates: u64,
}

impl TelemetryCache {
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
            capacity,
            max_age,
            hits: 0,
            misses: 0,
            updates: 0,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity, Duration::from_millis(config.max_age_ms))
    }

    pub fn set(&mut self, id: &str, value: Snapshot) {
        self.set_at(id, value, Instant::now());
    }

    /// Inserts or overwrites `id`, evicting the oldest insertion first when
    /// the cache is full.
    pub fn set_at(&mut self, id: &str, value: Snapshot, now: Instant) {
        self.store(id, value, 0, now);
    }

    pub fn get(&mut self, id: &str) -> Option<Snapshot> {
        self.get_at(id, Instant::now())
    }

    /// Returns the snapshot if present and not older than `max_age`.
    pub fn get_at(&mut self, id: &str, now: Instant) -> Option<Snapshot> {
        let fresh = match self.entries.get(id) {
            None => {
                self.misses += 1;
                return None;
            }
            Some(entry) => now.saturating_duration_since(entry.inserted_at) <= self.max_age,
        };

        if !fresh {
            self.remove(id);
            self.misses += 1;
            return None;
        }

        self.hits += 1;
        self.entries.get(id).map(|entry| entry.value.clone())
    }

    pub fn update(&mut self, id: &str, partial: Snapshot) {
        self.update_at(id, partial, Instant::now());
    }

    /// Shallow-merges `partial` over the existing snapshot, or stores it as the
    /// full value when `id` is absent. Expired entries are merged too: expiry
    /// only applies to reads.
    pub fn update_at(&mut self, id: &str, partial: Snapshot, now: Instant) {
        match self.entries.get(id) {
            Some(existing) => {
                let mut merged = existing.value.clone();
                let update_count = existing.update_count + 1;
                merged.extend(partial);
                self.store(id, merged, update_count, now);
            }
            None => self.store(id, partial, 0, now),
        }
    }

    /// How many times `id` has been merged into since it was last `set`.
    pub fn update_count(&self, id: &str) -> Option<u64> {
        self.entries.get(id).map(|entry| entry.update_count)
    }

    pub fn metrics(&self) -> CacheMetrics {
        let lookups = self.hits + self.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        };
        CacheMetrics {
            hits: self.hits,
            misses: self.misses,
            updates: self.updates,
            hit_rate,
            current_size: self.entries.len(),
            capacity: self.capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Drops every entry; counters are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn store(&mut self, id: &str, value: Snapshot, update_count: u64, now: Instant) {
        // At capacity even an overwrite drops the oldest entry first, which
        // may be `id` itself.
        if self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        self.remove(id);

        if self.capacity == 0 {
            return;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, id.to_string());
        self.entries.insert(
            id.to_string(),
            CacheEntry {
                value,
                inserted_at: now,
                update_count,
                seq,
            },
        );
        self.updates += 1;
    }

    fn evict_oldest(&mut self) {
        if let Some((_, oldest)) = self.order.pop_first() {
            log::debug!("Cache at capacity {}; evicting '{}'", self.capacity, oldest);
            self.entries.remove(&oldest);
        }
    }

    fn remove(&mut self, id: &str) {
        if let Some(entry) = self.entries.remove(id) {
            self.order.remove(&entry.seq);
        }
    }
}
