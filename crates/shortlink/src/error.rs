//! Error types for the short-link engine.
//!
//! This module defines the central [`Error`] enum, which captures every
//! recoverable and reportable failure a caller of the engine can observe, and
//! the narrower [`StoreError`] / [`CacheError`] types the storage
//! collaborators report back to the engine.
//!
//! ## Error Cases
//! - `InvalidRequest`: the input was rejected before entering the engine.
//! - `WriteFailed`: a batch exhausted its insert attempts.
//! - `LookupFailed`: the durable store failed during a coalesced read.
//! - `Timeout`: the caller gave up waiting.
//! - `Store`: a durable-store failure on the delete path.
//! - `ChannelError`: a worker dropped a request without completing it.
//! - `ServiceShutdown`: a request arrived while the engine was shutting down.
//! - `InvalidConfig`: the engine refused to start with the given settings.
//!
//! A missing identifier is not an error: resolution returns `Ok(None)`.

use core::time::Duration;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the short-link engine.
///
/// `Error` is `Clone` so a single lookup outcome can be fanned out to every
/// caller waiting on the same in-flight lookup.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// The request was malformed and never reached a worker.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Every insert attempt for the batch carrying this request failed.
    #[error("Write failed after {attempts} attempts: {source}")]
    WriteFailed {
        attempts: usize,
        #[source]
        source: StoreError,
    },

    /// The durable store failed while resolving `id`.
    #[error("Lookup of {id:?} failed: {source}")]
    LookupFailed {
        id: String,
        #[source]
        source: StoreError,
    },

    /// The caller stopped waiting. The underlying work is not cancelled.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The durable store rejected a request outside of the batch path.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Internal channel send/receive failure (closed queue or dropped
    /// completion).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The engine is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,

    /// The engine configuration is unusable.
    #[error("Invalid config: {reason}")]
    InvalidConfig { reason: String },
}

/// Failure reported by a [`DurableStore`](crate::DurableStore).
///
/// Errors are opaque to the engine except for [`StoreError::Conflict`], which
/// marks a primary-key collision inside a bulk insert.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    /// A record with this identifier already exists.
    #[error("duplicate identifier {id:?}")]
    Conflict { id: String },

    /// The store could not be reached or refused the request.
    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },

    /// Any other backend-specific failure.
    #[error("{0}")]
    Backend(String),
}

impl StoreError {
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Failure reported by a [`Cache`](crate::Cache) invalidation.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
#[error("cache error: {reason}")]
pub struct CacheError {
    pub reason: String,
}

impl CacheError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}
