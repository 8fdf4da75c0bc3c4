//! Storage collaborators.
//!
//! The engine never talks to a concrete database or cache. It depends on the
//! two narrow traits defined here:
//!
//! - [`DurableStore`] - the system of record for [`MappingRecord`]s.
//! - [`Cache`] - a TTL key/value cache used for cache-aside reads.
//!
//! Both are shared by every worker through an `Arc`, so implementations must
//! be safe for concurrent use. Connection pooling is their concern.
//!
//! In-process implementations ([`MemoryStore`], [`MemoryCache`],
//! [`NullCache`]) live in [`memory`] and back the tests, benches and the load
//! driver.

mod memory;

pub use memory::*;

use crate::{CacheError, MappingRecord, StoreError};
use core::future::Future;
use core::time::Duration;

/// The durable system of record.
pub trait DurableStore: Send + Sync + 'static {
    /// Persists every record in one transaction.
    ///
    /// Either all records become durable or none do. A primary-key collision
    /// should be reported as [`StoreError::Conflict`].
    fn insert_batch(
        &self,
        records: &[MappingRecord],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Looks up a single record by its identifier.
    fn find_by_id(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<MappingRecord>, StoreError>> + Send;

    /// Removes every record whose identifier is in `ids`. Unknown identifiers
    /// are ignored.
    fn delete_by_ids(&self, ids: &[String]) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// A TTL key/value cache.
///
/// Lookups and population are infallible from the engine's point of view: a
/// cache that cannot answer is treated as a miss, and a failed population is
/// simply not cached.
pub trait Cache: Send + Sync + 'static {
    fn get(&self, key: &str) -> impl Future<Output = Option<String>> + Send;

    fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = ()> + Send;

    fn delete(&self, keys: &[String]) -> impl Future<Output = Result<(), CacheError>> + Send;
}
