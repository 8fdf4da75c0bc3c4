//! Test doubles shared by the unit tests.

use crate::{
    Cache, CacheError, DurableStore, IdGenerator, MappingRecord, MemoryCache, MemoryStore,
    ShortId, StoreError, StoreStats,
};
use core::time::Duration;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// A [`MemoryStore`] with scripted failures and an insert log.
#[derive(Debug, Default)]
pub(crate) struct ScriptedStore {
    inner: MemoryStore,
    failing_inserts: AtomicUsize,
    failing_finds: AtomicBool,
    failed_finds: AtomicUsize,
    panicking_inserts: AtomicUsize,
    panicking_finds: AtomicUsize,
    failing_deletes: AtomicBool,
    attempts: Mutex<Vec<Vec<MappingRecord>>>,
}

impl ScriptedStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_latency(latency: Duration) -> Self {
        Self {
            inner: MemoryStore::with_latency(latency),
            ..Self::default()
        }
    }

    /// Makes the next `count` inserts fail with [`StoreError::Unavailable`].
    pub(crate) fn fail_next_inserts(&self, count: usize) {
        self.failing_inserts.store(count, Ordering::SeqCst);
    }

    pub(crate) fn fail_finds(&self, fail: bool) {
        self.failing_finds.store(fail, Ordering::SeqCst);
    }

    /// Makes the next `count` inserts panic inside the calling worker.
    pub(crate) fn panic_next_inserts(&self, count: usize) {
        self.panicking_inserts.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` lookups panic inside the calling worker.
    pub(crate) fn panic_next_finds(&self, count: usize) {
        self.panicking_finds.store(count, Ordering::SeqCst);
    }

    pub(crate) fn fail_deletes(&self, fail: bool) {
        self.failing_deletes.store(fail, Ordering::SeqCst);
    }

    /// Every batch passed to `insert_batch`, in call order.
    pub(crate) fn attempts(&self) -> Vec<Vec<MappingRecord>> {
        self.attempts.lock().clone()
    }

    /// Calls counted by the wrapped store plus the scripted failures.
    pub(crate) fn stats(&self) -> StoreStats {
        let mut stats = self.inner.stats();
        stats.insert_calls = self.attempts.lock().len();
        stats.find_calls += self.failed_finds.load(Ordering::SeqCst);
        stats
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }

    fn take_insert_failure(&self) -> bool {
        take_one(&self.failing_inserts)
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl DurableStore for ScriptedStore {
    async fn insert_batch(&self, records: &[MappingRecord]) -> Result<(), StoreError> {
        self.attempts.lock().push(records.to_vec());
        if take_one(&self.panicking_inserts) {
            panic!("scripted insert panic");
        }
        if self.take_insert_failure() {
            return Err(StoreError::Unavailable {
                reason: "scripted insert failure".to_string(),
            });
        }
        self.inner.insert_batch(records).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<MappingRecord>, StoreError> {
        if take_one(&self.panicking_finds) {
            panic!("scripted lookup panic");
        }
        if self.failing_finds.load(Ordering::SeqCst) {
            self.failed_finds.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            return Err(StoreError::Unavailable {
                reason: "scripted lookup failure".to_string(),
            });
        }
        self.inner.find_by_id(id).await
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<(), StoreError> {
        if self.failing_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                reason: "scripted delete failure".to_string(),
            });
        }
        self.inner.delete_by_ids(ids).await
    }
}

/// A [`MemoryCache`] whose invalidations always fail.
#[derive(Debug, Default)]
pub(crate) struct BrokenDeleteCache {
    pub(crate) inner: MemoryCache,
}

impl Cache for BrokenDeleteCache {
    async fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).await
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) {
        self.inner.set_with_ttl(key, value, ttl).await;
    }

    async fn delete(&self, _keys: &[String]) -> Result<(), CacheError> {
        Err(CacheError::new("cache node unreachable"))
    }
}

/// An [`IdGenerator`] that always returns the same identifier.
#[derive(Debug)]
pub(crate) struct FixedGenerator(pub(crate) &'static str);

impl IdGenerator for FixedGenerator {
    fn next_id(&self) -> ShortId {
        self.0.to_string()
    }
}
