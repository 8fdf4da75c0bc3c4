use super::{BatchConfig, request::PendingWrite};
use crate::{
    DurableStore, Error, IdGenerator, MappingRecord, SharedReceiver, StoreError,
    telemetry::{increment_batch_failures, increment_flush_retries, record_batch_size},
};
use std::sync::Arc;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tokio_util::sync::CancellationToken;

/// State shared by every write worker of one batcher.
pub(crate) struct WriteShared<S, G> {
    pub(crate) pending: Arc<SharedReceiver<PendingWrite>>,
    pub(crate) store: Arc<S>,
    pub(crate) generator: Arc<G>,
    pub(crate) config: BatchConfig,
}

/// Worker task that turns queued [`PendingWrite`]s into bulk inserts.
///
/// Each worker owns its batch buffer and a periodic flush timer, and competes
/// with its siblings for the shared queue. The buffer is flushed when it
/// reaches `max_batch_size` or when the timer fires with a non-empty buffer.
/// The buffer is swapped out before the store call, so no lock is held across
/// it.
///
/// On cancellation the worker flushes what it already holds and exits.
pub(crate) async fn write_worker_loop<S, G>(
    worker_id: usize,
    shared: Arc<WriteShared<S, G>>,
    shutdown_token: CancellationToken,
) where
    S: DurableStore,
    G: IdGenerator,
{
    #[cfg(feature = "tracing")]
    tracing::trace!("Write worker {worker_id} started");

    let max_batch_size = shared.config.max_batch_size;
    let mut buffer = Vec::with_capacity(max_batch_size);
    let mut ticker = interval(shared.config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = shutdown_token.cancelled() => break,
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    let batch = std::mem::replace(&mut buffer, Vec::with_capacity(max_batch_size));
                    flush_batch(worker_id, &shared, batch).await;
                }
            }
            pending = shared.pending.recv() => match pending {
                Some(pending) => {
                    buffer.push(pending);
                    if buffer.len() >= max_batch_size {
                        let batch = std::mem::replace(&mut buffer, Vec::with_capacity(max_batch_size));
                        flush_batch(worker_id, &shared, batch).await;
                    }
                }
                None => break,
            }
        }
    }

    if !buffer.is_empty() {
        flush_batch(worker_id, &shared, buffer).await;
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Write worker {worker_id} stopped");
}

/// Persists one batch and completes every request in it exactly once.
///
/// Every attempt draws fresh identifiers for the whole batch, because a failed
/// bulk insert does not say which row collided. Attempts are separated by an
/// exponential backoff starting at `retry_backoff`. When every attempt fails,
/// each request is completed with [`Error::WriteFailed`].
pub(crate) async fn flush_batch<S, G>(
    _worker_id: usize,
    shared: &WriteShared<S, G>,
    batch: Vec<PendingWrite>,
) where
    S: DurableStore,
    G: IdGenerator,
{
    let config = &shared.config;
    let mut backoff = config.retry_backoff;
    let mut last_error = None;
    record_batch_size(batch.len());

    for attempt in 1..=config.max_attempts {
        let records: Vec<MappingRecord> = batch
            .iter()
            .map(|pending| MappingRecord::new(shared.generator.next_id(), pending.target.as_str()))
            .collect();

        match shared.store.insert_batch(&records).await {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    "Write worker {_worker_id} persisted {} records on attempt {attempt}",
                    records.len()
                );
                for (pending, record) in batch.into_iter().zip(records) {
                    pending.complete(Ok(record.id));
                }
                return;
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Write worker {_worker_id} batch insert failed on attempt {attempt}/{}: {e}",
                    config.max_attempts
                );
                last_error = Some(e);
                if attempt < config.max_attempts {
                    increment_flush_retries();
                    sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
            }
        }
    }

    let source = last_error.unwrap_or_else(|| StoreError::Backend("no insert attempted".to_string()));
    increment_batch_failures();
    #[cfg(feature = "tracing")]
    tracing::error!(
        "Write worker {_worker_id} dropping batch of {} after {} attempts: {source}",
        batch.len(),
        config.max_attempts
    );

    for pending in batch {
        pending.complete(Err(Error::WriteFailed {
            attempts: config.max_attempts,
            source: source.clone(),
        }));
    }
}
