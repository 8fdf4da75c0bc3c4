use super::{
    LookupConfig,
    registry::{LeaderGuard, LookupRegistry, Role},
    request::{LookupOutcome, PendingRead},
};
use crate::{
    Cache, DurableStore, Error, SharedReceiver,
    telemetry::{increment_coalesced_reads, increment_store_lookups},
};
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// State shared by every read worker of one coalescer.
pub(crate) struct ReadShared<S, C> {
    pub(crate) pending: Arc<SharedReceiver<PendingRead>>,
    pub(crate) registry: Arc<LookupRegistry>,
    pub(crate) store: Arc<S>,
    pub(crate) cache: Arc<C>,
    pub(crate) config: LookupConfig,
}

/// Worker task that resolves queued cache misses.
///
/// A request for an identifier that is already being looked up only parks its
/// completion and costs nothing further. Otherwise the worker leads the
/// lookup itself and answers every request parked on it in the meantime.
pub(crate) async fn read_worker_loop<S, C>(
    worker_id: usize,
    shared: Arc<ReadShared<S, C>>,
    shutdown_token: CancellationToken,
) where
    S: DurableStore,
    C: Cache,
{
    #[cfg(feature = "tracing")]
    tracing::trace!("Read worker {worker_id} started");

    loop {
        let PendingRead { id, completion } = tokio::select! {
            biased;
            () = shutdown_token.cancelled() => break,
            pending = shared.pending.recv() => match pending {
                Some(pending) => pending,
                None => break,
            },
        };

        match shared.registry.join_or_lead(&id, completion) {
            Role::Follower => increment_coalesced_reads(),
            Role::Leader(lookup) => {
                let leader = LeaderGuard::new(&shared.registry, &id, lookup);
                let outcome = lead_lookup(worker_id, &shared, &id).await;
                if !shared.config.stagger.is_zero() {
                    sleep(shared.config.stagger).await;
                }
                let _notified = leader.finish(&outcome);

                #[cfg(feature = "tracing")]
                tracing::trace!("Read worker {worker_id} answered {_notified} callers for {id}");
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Read worker {worker_id} stopped");
}

/// Resolves `id` on behalf of every caller waiting on it.
///
/// The cache is probed again first, because a lookup that finished after the
/// caller's own probe may already have warmed it. A store hit is written back
/// with the configured TTL before it is returned.
async fn lead_lookup<S, C>(
    _worker_id: usize,
    shared: &ReadShared<S, C>,
    id: &str,
) -> LookupOutcome
where
    S: DurableStore,
    C: Cache,
{
    if let Some(target) = shared.cache.get(id).await {
        return Ok(Some(target));
    }

    increment_store_lookups();
    match shared.store.find_by_id(id).await {
        Ok(Some(record)) => {
            shared
                .cache
                .set_with_ttl(id, &record.target, shared.config.cache_ttl)
                .await;
            Ok(Some(record.target))
        }
        Ok(None) => Ok(None),
        Err(source) => {
            #[cfg(feature = "tracing")]
            tracing::warn!("Read worker {_worker_id} lookup for {id} failed: {source}");
            Err(Error::LookupFailed {
                id: id.to_owned(),
                source,
            })
        }
    }
}
