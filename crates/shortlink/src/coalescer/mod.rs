//! Single-flight read coalescing.
//!
//! [`ReadCoalescer`] collapses concurrent cache misses for the same
//! identifier into one store lookup. Every caller receives the same outcome,
//! and a successful lookup warms the cache for whoever comes next.
//!
//! ```text
//! resolve("k") ──┐                   ┌─ leader:   cache probe ─> find_by_id ─> set_with_ttl
//! resolve("k") ──┼──> bounded queue ─┤
//! resolve("k") ──┘                   └─ follower: park on the leader's entry
//! ```
//!
//! ## Structure
//!
//! - [`registry`] - identifier to in-flight lookup map.
//! - [`request`] - the queued [`PendingRead`](request::PendingRead).
//! - [`worker`] - worker loop and the leader's lookup.

mod registry;
mod request;
mod worker;

use crate::{
    Cache, DurableStore, ElasticPool, Error, PoolConfig, QueueDepth, Result, SharedReceiver,
};
use core::time::Duration;
use registry::LookupRegistry;
use request::PendingRead;
use std::sync::Arc;
use tokio::{sync::mpsc, time::timeout};
use tokio_util::sync::CancellationToken;
use worker::{ReadShared, read_worker_loop};

/// Tuning for a [`ReadCoalescer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LookupConfig {
    /// Upper bound on a single `resolve`, queueing included.
    pub resolve_timeout: Duration,
    /// TTL applied when a store hit is written back to the cache.
    pub cache_ttl: Duration,
    /// Pause after a lookup before its entry is retired, widening the window
    /// in which late arrivals still join it. Zero disables it.
    pub stagger: Duration,
    /// Capacity of the queue between callers and workers.
    pub queue_capacity: usize,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            resolve_timeout: Duration::from_millis(3500),
            cache_ttl: Duration::from_secs(5 * 60),
            stagger: Duration::ZERO,
            queue_capacity: 5000,
        }
    }
}

impl LookupConfig {
    pub fn validate(&self) -> Result<()> {
        if self.resolve_timeout.is_zero() {
            return Err(Error::InvalidConfig {
                reason: "resolve_timeout must be non-zero".to_string(),
            });
        }
        if self.cache_ttl.is_zero() {
            return Err(Error::InvalidConfig {
                reason: "cache_ttl must be non-zero".to_string(),
            });
        }
        if self.stagger >= self.resolve_timeout {
            return Err(Error::InvalidConfig {
                reason: format!(
                    "stagger ({:?}) must be shorter than resolve_timeout ({:?})",
                    self.stagger, self.resolve_timeout
                ),
            });
        }
        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig {
                reason: "queue_capacity must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Resolves identifiers through the store with at most one lookup per
/// identifier in flight.
///
/// Intended for cache misses: the caller probes the cache first and only
/// falls back to [`resolve`](Self::resolve) when it misses.
pub struct ReadCoalescer {
    queue: mpsc::Sender<PendingRead>,
    pending: Arc<SharedReceiver<PendingRead>>,
    registry: Arc<LookupRegistry>,
    pool: ElasticPool,
    resolve_timeout: Duration,
}

impl ReadCoalescer {
    /// Creates the queue and starts the read worker pool.
    ///
    /// Must be called from within a Tokio runtime. `config` is assumed to be
    /// valid (see [`LookupConfig::validate`]).
    pub fn start<S, C>(
        store: Arc<S>,
        cache: Arc<C>,
        config: LookupConfig,
        pool_config: PoolConfig,
        shutdown_token: CancellationToken,
    ) -> Self
    where
        S: DurableStore,
        C: Cache,
    {
        let (queue, rx) = mpsc::channel(config.queue_capacity);
        let pending = Arc::new(SharedReceiver::new(rx));
        let registry = Arc::new(LookupRegistry::new());
        let resolve_timeout = config.resolve_timeout;

        let shared = Arc::new(ReadShared {
            pending: Arc::clone(&pending),
            registry: Arc::clone(&registry),
            store,
            cache,
            config,
        });

        let pool = ElasticPool::start(
            "read",
            pool_config,
            QueueDepth::new(&queue),
            shutdown_token,
            move |worker_id, token| read_worker_loop(worker_id, Arc::clone(&shared), token),
        );

        Self {
            queue,
            pending,
            registry,
            pool,
            resolve_timeout,
        }
    }

    /// Looks up the target for `id`, sharing the lookup with any concurrent
    /// caller asking for the same identifier.
    ///
    /// Returns `Ok(None)` when no such mapping exists.
    ///
    /// # Errors
    ///
    /// - [`Error::LookupFailed`] if the store lookup failed. Every caller
    ///   sharing that lookup receives it.
    /// - [`Error::Timeout`] if `resolve_timeout` elapsed first. The lookup
    ///   keeps running and still warms the cache.
    /// - [`Error::ServiceShutdown`] if the coalescer is shutting down.
    /// - [`Error::ChannelError`] if the lookup was abandoned.
    pub async fn resolve(&self, id: &str) -> Result<Option<String>> {
        if self.pool.is_shutdown() {
            return Err(Error::ServiceShutdown);
        }

        let (pending, completion) = PendingRead::new(id.to_owned());
        let wait = async {
            self.queue
                .send(pending)
                .await
                .map_err(|_| Error::ServiceShutdown)?;

            completion.await.map_err(|_| Error::ChannelError {
                context: "read worker dropped the lookup".to_string(),
            })?
        };

        timeout(self.resolve_timeout, wait)
            .await
            .map_err(|_| Error::Timeout {
                operation: "resolve",
                after: self.resolve_timeout,
            })?
    }

    /// Distinct identifiers currently being looked up.
    pub fn inflight_lookups(&self) -> usize {
        self.registry.len()
    }

    /// Read workers currently running.
    pub fn active_workers(&self) -> usize {
        self.pool.active_workers()
    }

    /// Stops the workers, then fails queued and abandoned lookups.
    ///
    /// Queued callers receive [`Error::ServiceShutdown`]; callers parked on a
    /// lookup whose leader was aborted receive [`Error::ChannelError`].
    pub async fn shutdown(&self) -> Result<()> {
        self.pool.shutdown().await?;

        let drained = self.pending.close_and_drain().await;
        let _abandoned = self.registry.abandon_all();
        #[cfg(feature = "tracing")]
        {
            if !drained.is_empty() || _abandoned > 0 {
                tracing::warn!(
                    "Rejecting {} queued and {_abandoned} in-flight lookups during shutdown",
                    drained.len()
                );
            }
        }
        for request in drained {
            let _ = request.completion.send(Err(Error::ServiceShutdown));
        }
        Ok(())
    }
}
