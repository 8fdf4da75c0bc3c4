use crate::{Cache, CacheError, DurableStore, MappingRecord, StoreError};
use core::time::Duration;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::{Instant, sleep};

/// Point-in-time call counters for a [`MemoryStore`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// `insert_batch` calls, successful or not.
    pub insert_calls: usize,
    /// `find_by_id` calls.
    pub find_calls: usize,
    /// `delete_by_ids` calls.
    pub delete_calls: usize,
}

/// In-process [`DurableStore`] keyed by identifier.
///
/// Batches are all-or-nothing: a batch colliding with an existing row, or with
/// itself, is rejected with [`StoreError::Conflict`] and nothing is written.
/// An optional per-call latency simulates a remote store so that concurrent
/// callers actually overlap.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<HashMap<String, String>>,
    latency: Duration,
    insert_calls: AtomicUsize,
    find_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every call by `latency` before touching the rows.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            insert_calls: self.insert_calls.load(Ordering::Relaxed),
            find_calls: self.find_calls.load(Ordering::Relaxed),
            delete_calls: self.delete_calls.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
    }
}

impl DurableStore for MemoryStore {
    async fn insert_batch(&self, records: &[MappingRecord]) -> Result<(), StoreError> {
        self.insert_calls.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;

        let mut rows = self.rows.write();
        let mut seen = HashSet::with_capacity(records.len());
        for record in records {
            if rows.contains_key(&record.id) || !seen.insert(record.id.as_str()) {
                return Err(StoreError::Conflict {
                    id: record.id.clone(),
                });
            }
        }
        rows.extend(
            records
                .iter()
                .map(|record| (record.id.clone(), record.target.clone())),
        );
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<MappingRecord>, StoreError> {
        self.find_calls.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;

        Ok(self
            .rows
            .read()
            .get(id)
            .map(|target| MappingRecord::new(id, target.as_str())))
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<(), StoreError> {
        self.delete_calls.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;

        let mut rows = self.rows.write();
        for id in ids {
            rows.remove(id);
        }
        Ok(())
    }
}

// Writes between two sweeps of expired entries.
const SWEEP_INTERVAL: usize = 1024;

#[derive(Debug, Default)]
struct CacheEntries {
    map: HashMap<String, (String, Instant)>,
    writes_since_sweep: usize,
}

/// In-process [`Cache`] with per-entry expiry.
///
/// An expired entry is evicted when its key is read, and every
/// `SWEEP_INTERVAL` writes the whole map is swept, so keys that are never
/// read again do not accumulate.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<CacheEntries>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().map.is_empty()
    }
}

impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        match entries.map.get(key) {
            Some((value, expires_at)) if Instant::now() < *expires_at => Some(value.clone()),
            Some(_) => {
                entries.map.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries
            .map
            .insert(key.to_owned(), (value.to_owned(), now + ttl));

        entries.writes_since_sweep += 1;
        if entries.writes_since_sweep >= SWEEP_INTERVAL {
            entries.writes_since_sweep = 0;
            entries.map.retain(|_, (_, expires_at)| now < *expires_at);
        }
    }

    async fn delete(&self, keys: &[String]) -> Result<(), CacheError> {
        let mut entries = self.entries.lock();
        for key in keys {
            entries.map.remove(key);
        }
        Ok(())
    }
}

/// A [`Cache`] that stores nothing and always misses.
///
/// Useful to disable caching, which sends every resolution through the read
/// coalescer.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullCache;

impl Cache for NullCache {
    async fn get(&self, _key: &str) -> Option<String> {
        None
    }

    async fn set_with_ttl(&self, _key: &str, _value: &str, _ttl: Duration) {}

    async fn delete(&self, _keys: &[String]) -> Result<(), CacheError> {
        Ok(())
    }
}
