//! Load phases and their report.
//!
//! The driver replays the traffic a short-link service sees in production:
//! a burst of creates from many clients, then a storm of resolutions for one
//! freshly created (and therefore uncached) link, then a round of deletes
//! whose links must no longer resolve.

use crate::config::LoadConfig;
use core::fmt;
use core::time::Duration;
use futures::stream::{self, StreamExt};
use shortlink::{Cache, MemoryStore, ShortId, ShortLinkService, StoreStats};
use std::time::Instant;

// Identifiers per delete call.
const DELETE_CHUNK: usize = 50;

/// Outcome of one phase.
#[derive(Debug, Clone)]
pub struct PhaseReport {
    pub name: &'static str,
    pub requests: usize,
    pub failures: usize,
    pub elapsed: Duration,
    /// Store calls issued by this phase.
    pub store_calls: usize,
}

impl PhaseReport {
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.requests as f64 / secs
    }
}

impl fmt::Display for PhaseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<10} {:>8} requests {:>6} failed {:>10.0} req/s {:>8} store calls in {:?}",
            self.name,
            self.requests,
            self.failures,
            self.throughput(),
            self.store_calls,
            self.elapsed
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub phases: Vec<PhaseReport>,
}

impl LoadReport {
    pub fn failures(&self) -> usize {
        self.phases.iter().map(|phase| phase.failures).sum()
    }
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for phase in &self.phases {
            writeln!(f, "{phase}")?;
        }
        Ok(())
    }
}

/// Runs every phase in order and collects their reports.
pub async fn run<C: Cache>(
    service: &ShortLinkService<MemoryStore, C>,
    store: &MemoryStore,
    config: &LoadConfig,
) -> anyhow::Result<LoadReport> {
    let mut report = LoadReport::default();

    let (phase, created) = create_burst(service, store, config).await;
    report.phases.push(phase);
    let Some((hot_id, hot_target)) = created.first().cloned() else {
        anyhow::bail!("create burst produced no short links");
    };

    if config.hot_key_requests > 0 {
        report
            .phases
            .push(hot_key_storm(service, store, config, &hot_id, &hot_target).await);
    }

    if config.deletes > 0 {
        let ids: Vec<ShortId> = created
            .iter()
            .rev()
            .take(config.deletes)
            .map(|(id, _)| id.clone())
            .collect();
        report.phases.push(delete_round(service, store, config, ids).await);
    }

    Ok(report)
}

async fn create_burst<C: Cache>(
    service: &ShortLinkService<MemoryStore, C>,
    store: &MemoryStore,
    config: &LoadConfig,
) -> (PhaseReport, Vec<(ShortId, String)>) {
    let before = store.stats();
    let start = Instant::now();

    let results: Vec<_> = stream::iter(0..config.creates)
        .map(|i| async move {
            let target = format!("https://example.com/load/{i}");
            let result = service.create_short_link(&target).await;
            (result, target)
        })
        .buffer_unordered(config.concurrency)
        .collect()
        .await;

    let elapsed = start.elapsed();
    let mut created = Vec::with_capacity(results.len());
    let mut failures = 0;
    for (result, target) in results {
        match result {
            Ok(id) => created.push((id, target)),
            Err(_e) => {
                failures += 1;
                #[cfg(feature = "tracing")]
                tracing::warn!("Create failed: {_e}");
            }
        }
    }

    let phase = PhaseReport {
        name: "create",
        requests: config.creates,
        failures,
        elapsed,
        store_calls: calls_since(&before, &store.stats()),
    };
    (phase, created)
}

async fn hot_key_storm<C: Cache>(
    service: &ShortLinkService<MemoryStore, C>,
    store: &MemoryStore,
    config: &LoadConfig,
    id: &str,
    target: &str,
) -> PhaseReport {
    let before = store.stats();
    let start = Instant::now();

    let failures = stream::iter(0..config.hot_key_requests)
        .map(|_| service.resolve_short_link(id))
        .buffer_unordered(config.concurrency)
        .filter(|result| {
            let failed = !matches!(result, Ok(Some(resolved)) if resolved == target);
            #[cfg(feature = "tracing")]
            {
                if failed {
                    tracing::warn!("Unexpected resolution of {id}: {result:?}");
                }
            }
            futures::future::ready(failed)
        })
        .count()
        .await;

    PhaseReport {
        name: "hot-key",
        requests: config.hot_key_requests,
        failures,
        elapsed: start.elapsed(),
        store_calls: calls_since(&before, &store.stats()),
    }
}

async fn delete_round<C: Cache>(
    service: &ShortLinkService<MemoryStore, C>,
    store: &MemoryStore,
    config: &LoadConfig,
    ids: Vec<ShortId>,
) -> PhaseReport {
    let before = store.stats();
    let start = Instant::now();
    let mut failures = 0;

    for chunk in ids.chunks(DELETE_CHUNK) {
        if let Err(_e) = service.delete_short_links(chunk).await {
            failures += chunk.len();
            #[cfg(feature = "tracing")]
            tracing::warn!("Delete of {} links failed: {_e}", chunk.len());
        }
    }

    let lingering = stream::iter(&ids)
        .map(|id| service.resolve_short_link(id))
        .buffer_unordered(config.concurrency)
        .filter(|result| futures::future::ready(!matches!(result, Ok(None))))
        .count()
        .await;

    PhaseReport {
        name: "delete",
        requests: ids.len(),
        failures: failures.max(lingering),
        elapsed: start.elapsed(),
        store_calls: calls_since(&before, &store.stats()),
    }
}

fn calls_since(before: &StoreStats, after: &StoreStats) -> usize {
    let total = |stats: &StoreStats| stats.insert_calls + stats.find_calls + stats.delete_calls;
    total(after).saturating_sub(total(before))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shortlink::{MemoryCache, NullCache, PoolConfig, ServiceConfig};
    use std::sync::Arc;

    fn load_config(use_cache: bool) -> LoadConfig {
        let pool = PoolConfig {
            min_workers: 2,
            max_workers: 4,
            ..PoolConfig::default()
        };
        LoadConfig {
            service: ServiceConfig {
                write_pool: pool.clone(),
                read_pool: pool,
                ..ServiceConfig::default()
            },
            creates: 500,
            hot_key_requests: 500,
            deletes: 40,
            concurrency: 64,
            store_latency: Duration::from_millis(2),
            use_cache,
        }
    }

    async fn run_with<C: Cache>(cache: C, config: &LoadConfig) -> LoadReport {
        let store = Arc::new(MemoryStore::with_latency(config.store_latency));
        let service =
            ShortLinkService::new(Arc::clone(&store), Arc::new(cache), config.service.clone())
                .unwrap();
        let report = run(&service, &store, config).await.unwrap();
        service.shutdown().await.unwrap();
        report
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_phase_succeeds_with_a_cache() {
        let config = load_config(true);
        let report = run_with(MemoryCache::new(), &config).await;

        let names: Vec<_> = report.phases.iter().map(|phase| phase.name).collect();
        assert_eq!(names, ["create", "hot-key", "delete"]);
        assert_eq!(report.failures(), 0);

        let create = &report.phases[0];
        assert!(
            create.store_calls < config.creates,
            "creates should be batched, saw {} inserts",
            create.store_calls
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn hot_key_storm_is_coalesced_without_a_cache() {
        let config = load_config(false);
        let report = run_with(NullCache, &config).await;

        assert_eq!(report.failures(), 0);
        let storm = &report.phases[1];
        assert!(
            storm.store_calls < config.hot_key_requests,
            "resolutions should be coalesced, saw {} lookups",
            storm.store_calls
        );
    }
}
