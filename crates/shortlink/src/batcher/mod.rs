//! Write-coalescing batch persistence.
//!
//! [`WriteBatcher`] converts a stream of individual create requests into a
//! small number of bulk inserts while still answering every caller with its
//! own identifier.
//!
//! ```text
//! submit() ──┐
//! submit() ──┼──> bounded queue ──> write workers ──> insert_batch ──> complete each
//! submit() ──┘                      (size / timer)     (retry, fresh ids)
//! ```
//!
//! ## Structure
//!
//! - [`request`] - the queued [`PendingWrite`](request::PendingWrite).
//! - [`worker`] - worker loop and batch flushing.

mod request;
mod worker;

use crate::{
    DurableStore, ElasticPool, Error, IdGenerator, PoolConfig, QueueDepth, Result,
    SharedReceiver, ShortId, telemetry::increment_writes_submitted,
};
use core::time::Duration;
use request::PendingWrite;
use std::sync::Arc;
use tokio::{sync::mpsc, time::timeout};
use tokio_util::sync::CancellationToken;
use worker::{WriteShared, write_worker_loop};

/// Tuning for a [`WriteBatcher`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchConfig {
    /// Records per batch before a flush is forced.
    pub max_batch_size: usize,
    /// Period of each worker's flush timer. Bounds straggler latency at low
    /// load.
    pub flush_interval: Duration,
    /// Bulk insert attempts per batch, including the first.
    pub max_attempts: usize,
    /// Delay after the first failed attempt; doubled after each retry.
    pub retry_backoff: Duration,
    /// Capacity of the queue between callers and workers.
    pub queue_capacity: usize,
    /// Upper bound on how long `submit` waits. `None` waits indefinitely.
    pub submit_timeout: Option<Duration>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 200,
            flush_interval: Duration::from_millis(5),
            max_attempts: 5,
            retry_backoff: Duration::from_millis(10),
            queue_capacity: 5000,
            submit_timeout: Some(Duration::from_secs(10)),
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(Error::InvalidConfig {
                reason: "max_batch_size must be greater than 0".to_string(),
            });
        }
        if self.flush_interval.is_zero() {
            return Err(Error::InvalidConfig {
                reason: "flush_interval must be non-zero".to_string(),
            });
        }
        if self.max_attempts == 0 {
            return Err(Error::InvalidConfig {
                reason: "max_attempts must be greater than 0".to_string(),
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

/// Batches create requests into bulk inserts.
///
/// Owns the request queue and an [`ElasticPool`] of write workers. Callers
/// suspend on a private one-shot completion until the batch carrying their
/// request is flushed.
pub struct WriteBatcher {
    queue: mpsc::Sender<PendingWrite>,
    pending: Arc<SharedReceiver<PendingWrite>>,
    pool: ElasticPool,
    submit_timeout: Option<Duration>,
}

impl WriteBatcher {
    /// Creates the queue and starts the write worker pool.
    ///
    /// Must be called from within a Tokio runtime. `config` is assumed to be
    /// valid (see [`BatchConfig::validate`]).
    pub fn start<S, G>(
        store: Arc<S>,
        generator: Arc<G>,
        config: BatchConfig,
        pool_config: PoolConfig,
        shutdown_token: CancellationToken,
    ) -> Self
    where
        S: DurableStore,
        G: IdGenerator,
    {
        let (queue, rx) = mpsc::channel(config.queue_capacity);
        let pending = Arc::new(SharedReceiver::new(rx));
        let submit_timeout = config.submit_timeout;

        let shared = Arc::new(WriteShared {
            pending: Arc::clone(&pending),
            store,
            generator,
            config,
        });

        let pool = ElasticPool::start(
            "write",
            pool_config,
            QueueDepth::new(&queue),
            shutdown_token,
            move |worker_id, token| write_worker_loop(worker_id, Arc::clone(&shared), token),
        );

        Self {
            queue,
            pending,
            pool,
            submit_timeout,
        }
    }

    /// Queues `target` for persistence and waits for its identifier.
    ///
    /// `target` is stored as given; validation belongs to the caller.
    ///
    /// # Errors
    ///
    /// - [`Error::WriteFailed`] if the batch exhausted its attempts.
    /// - [`Error::Timeout`] if `submit_timeout` elapsed first. The record may
    ///   still be persisted afterwards.
    /// - [`Error::ServiceShutdown`] if the batcher is shutting down.
    /// - [`Error::ChannelError`] if the worker holding the request died.
    pub async fn submit(&self, target: String) -> Result<ShortId> {
        if self.pool.is_shutdown() {
            return Err(Error::ServiceShutdown);
        }

        let (pending, completion) = PendingWrite::new(target);
        let wait = async {
            self.queue
                .send(pending)
                .await
                .map_err(|_| Error::ServiceShutdown)?;
            increment_writes_submitted();

            completion.await.map_err(|_| Error::ChannelError {
                context: "write worker dropped the request".to_string(),
            })?
        };

        match self.submit_timeout {
            Some(after) => timeout(after, wait).await.map_err(|_| Error::Timeout {
                operation: "submit",
                after,
            })?,
            None => wait.await,
        }
    }

    /// Requests currently waiting in the queue.
    pub fn queue_depth(&self) -> usize {
        self.queue.max_capacity() - self.queue.capacity()
    }

    /// Write workers currently running.
    pub fn active_workers(&self) -> usize {
        self.pool.active_workers()
    }

    /// Stops the workers, letting each flush its buffer, then fails whatever
    /// is still queued with [`Error::ServiceShutdown`].
    pub async fn shutdown(&self) -> Result<()> {
        self.pool.shutdown().await?;

        let drained = self.pending.close_and_drain().await;
        #[cfg(feature = "tracing")]
        {
            if !drained.is_empty() {
                tracing::warn!("Rejecting {} queued writes during shutdown", drained.len());
            }
        }
        for request in drained {
            request.complete(Err(Error::ServiceShutdown));
        }
        Ok(())
    }
}
