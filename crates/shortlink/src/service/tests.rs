use super::*;
use crate::{
    BatchConfig, Cache, DEFAULT_ID_LEN, DurableStore, Error, LookupConfig, MemoryCache,
    PoolConfig, ShortId, ShortLinkService, StoreError,
    test_util::{BrokenDeleteCache, ScriptedStore},
};
use core::time::Duration;
use futures::future::join_all;
use std::{collections::HashSet, sync::Arc};
use tokio::time::sleep;

type TestService = ShortLinkService<ScriptedStore, MemoryCache>;

fn pool(workers: usize) -> PoolConfig {
    PoolConfig {
        min_workers: workers,
        max_workers: workers,
        ..PoolConfig::default()
    }
}

fn test_config() -> ServiceConfig {
    ServiceConfig {
        batch: BatchConfig {
            max_batch_size: 2,
            flush_interval: Duration::from_millis(50),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(1),
            queue_capacity: 1024,
            submit_timeout: Some(Duration::from_secs(5)),
        },
        lookup: LookupConfig {
            queue_capacity: 1024,
            ..LookupConfig::default()
        },
        write_pool: pool(1),
        read_pool: pool(4),
        max_target_len: 64,
    }
}

fn start(store: &Arc<ScriptedStore>, config: ServiceConfig) -> (TestService, Arc<MemoryCache>) {
    let cache = Arc::new(MemoryCache::new());
    let service = ShortLinkService::new(Arc::clone(store), Arc::clone(&cache), config).unwrap();
    (service, cache)
}

#[tokio::test]
async fn invalid_config_is_rejected_at_start() {
    let config = ServiceConfig {
        read_pool: PoolConfig {
            min_workers: 8,
            max_workers: 2,
            ..PoolConfig::default()
        },
        ..ServiceConfig::default()
    };

    let result = ShortLinkService::new(
        Arc::new(ScriptedStore::new()),
        Arc::new(MemoryCache::new()),
        config,
    );
    assert!(matches!(result, Err(Error::InvalidConfig { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_get_unique_ids_that_resolve() {
    let store = Arc::new(ScriptedStore::new());
    let config = ServiceConfig {
        batch: BatchConfig {
            max_batch_size: 16,
            flush_interval: Duration::from_millis(5),
            ..test_config().batch
        },
        write_pool: pool(4),
        ..test_config()
    };
    let (service, _cache) = start(&store, config);

    let targets: Vec<String> = (0..100).map(|i| format!("https://example.com/{i}")).collect();
    let ids: Vec<ShortId> = join_all(targets.iter().map(|t| service.create_short_link(t)))
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    let unique: HashSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), targets.len());
    for (id, target) in ids.iter().zip(&targets) {
        assert!(!id.is_empty());
        assert_eq!(
            service.resolve_short_link(id).await.unwrap().as_deref(),
            Some(target.as_str())
        );
    }

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cold_cache_burst_hits_the_store_once() {
    let store = Arc::new(ScriptedStore::with_latency(Duration::from_millis(100)));
    let (service, _cache) = start(&store, test_config());
    let id = service
        .create_short_link("https://example.com/hot")
        .await
        .unwrap();

    let results = join_all((0..100).map(|_| service.resolve_short_link(&id))).await;

    for result in results {
        assert_eq!(result.unwrap().as_deref(), Some("https://example.com/hot"));
    }
    assert_eq!(store.stats().find_calls, 1);

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn second_resolve_is_served_from_cache() {
    let store = Arc::new(ScriptedStore::new());
    let (service, cache) = start(&store, test_config());
    let id = service
        .create_short_link("https://example.com/a")
        .await
        .unwrap();
    assert!(cache.is_empty());

    let first = service.resolve_short_link(&id).await.unwrap();
    let second = service.resolve_short_link(&id).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.as_deref(), Some("https://example.com/a"));
    assert_eq!(store.stats().find_calls, 1);

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn invalid_targets_never_reach_the_store() {
    let store = Arc::new(ScriptedStore::new());
    let (service, _cache) = start(&store, test_config());
    let too_long = format!("https://example.com/{}", "x".repeat(64));

    for target in ["", "   ", "https://example.com/\u{7}bell", too_long.as_str()] {
        assert!(
            matches!(
                service.create_short_link(target).await,
                Err(Error::InvalidRequest { .. })
            ),
            "{target:?} should be rejected"
        );
    }

    sleep(Duration::from_millis(100)).await;
    assert_eq!(store.stats().insert_calls, 0);
    assert_eq!(service.pending_writes(), 0);

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn targets_are_trimmed_before_storing() {
    let store = Arc::new(ScriptedStore::new());
    let (service, _cache) = start(&store, test_config());

    let id = service
        .create_short_link("  https://example.com/padded \n")
        .await
        .unwrap();

    assert_eq!(
        service.resolve_short_link(&id).await.unwrap().as_deref(),
        Some("https://example.com/padded")
    );

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn three_creates_fit_in_two_batches() {
    let store = Arc::new(ScriptedStore::new());
    let (service, _cache) = start(&store, test_config());
    let targets = ["https://a.example", "https://b.example", "https://c.example"];

    let ids: Vec<ShortId> = join_all(targets.iter().map(|t| service.create_short_link(t)))
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    let unique: HashSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), 3);
    assert!(ids.iter().all(|id| id.len() == DEFAULT_ID_LEN));
    assert!(store.stats().insert_calls <= 2);
    for (id, target) in ids.iter().zip(targets) {
        assert_eq!(
            service.resolve_short_link(id).await.unwrap().as_deref(),
            Some(target)
        );
    }

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn missing_id_burst_shares_one_lookup() {
    let store = Arc::new(ScriptedStore::with_latency(Duration::from_millis(100)));
    let (service, cache) = start(&store, test_config());

    let results = join_all((0..50).map(|_| service.resolve_short_link("missing-id"))).await;

    assert!(results.into_iter().all(|result| result.unwrap().is_none()));
    assert_eq!(store.stats().find_calls, 1);
    assert!(cache.is_empty());

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_batch_does_not_poison_the_next_one() {
    let store = Arc::new(ScriptedStore::new());
    let (service, _cache) = start(&store, test_config());
    store.fail_next_inserts(3);

    let failed = join_all(
        ["https://a.example", "https://b.example"]
            .iter()
            .map(|t| service.create_short_link(t)),
    )
    .await;
    for result in failed {
        assert!(matches!(
            result,
            Err(Error::WriteFailed { attempts: 3, .. })
        ));
    }
    assert_eq!(store.len(), 0);

    let id = service
        .create_short_link("https://c.example")
        .await
        .unwrap();
    assert_eq!(
        service.resolve_short_link(&id).await.unwrap().as_deref(),
        Some("https://c.example")
    );

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn resolve_timeout_still_warms_the_cache() {
    let store = Arc::new(ScriptedStore::with_latency(Duration::from_millis(300)));
    let config = ServiceConfig {
        lookup: LookupConfig {
            resolve_timeout: Duration::from_millis(50),
            ..test_config().lookup
        },
        ..test_config()
    };
    let (service, cache) = start(&store, config);
    let id = service
        .create_short_link("https://example.com/slow")
        .await
        .unwrap();

    assert!(matches!(
        service.resolve_short_link(&id).await,
        Err(Error::Timeout {
            operation: "resolve",
            ..
        })
    ));

    sleep(Duration::from_millis(500)).await;
    assert_eq!(
        cache.get(&id).await.as_deref(),
        Some("https://example.com/slow")
    );

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delete_invalidates_cache_and_store() {
    let store = Arc::new(ScriptedStore::new());
    let (service, cache) = start(&store, test_config());
    let id = service
        .create_short_link("https://example.com/gone")
        .await
        .unwrap();
    service.resolve_short_link(&id).await.unwrap();
    assert!(cache.get(&id).await.is_some());

    service
        .delete_short_links(&[id.clone(), "unknown".to_string()])
        .await
        .unwrap();

    assert!(cache.get(&id).await.is_none());
    assert!(store.find_by_id(&id).await.unwrap().is_none());
    assert_eq!(service.resolve_short_link(&id).await.unwrap(), None);

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delete_tolerates_cache_failure() {
    let store = Arc::new(ScriptedStore::new());
    let cache = Arc::new(BrokenDeleteCache::default());
    let service =
        ShortLinkService::new(Arc::clone(&store), Arc::clone(&cache), test_config()).unwrap();
    let id = service
        .create_short_link("https://example.com/stale")
        .await
        .unwrap();
    service.resolve_short_link(&id).await.unwrap();

    service
        .delete_short_links(std::slice::from_ref(&id))
        .await
        .unwrap();

    assert_eq!(store.len(), 0);
    // The entry outlives the row until its TTL runs out.
    assert_eq!(
        cache.inner.get(&id).await.as_deref(),
        Some("https://example.com/stale")
    );

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delete_surfaces_store_failure() {
    let store = Arc::new(ScriptedStore::new());
    let (service, cache) = start(&store, test_config());
    let id = service
        .create_short_link("https://example.com/kept")
        .await
        .unwrap();
    service.resolve_short_link(&id).await.unwrap();
    store.fail_deletes(true);

    let err = service
        .delete_short_links(std::slice::from_ref(&id))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Store(StoreError::Unavailable { .. })
    ));
    assert_eq!(store.len(), 1);
    // The cache was invalidated before the store refused.
    assert!(cache.get(&id).await.is_none());

    store.fail_deletes(false);
    service
        .delete_short_links(std::slice::from_ref(&id))
        .await
        .unwrap();
    assert_eq!(store.len(), 0);

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn malformed_ids_are_rejected() {
    let store = Arc::new(ScriptedStore::new());
    let (service, _cache) = start(&store, test_config());

    assert!(matches!(
        service.resolve_short_link("").await,
        Err(Error::InvalidRequest { .. })
    ));
    assert!(matches!(
        service.delete_short_links(&[]).await,
        Err(Error::InvalidRequest { .. })
    ));
    assert!(matches!(
        service
            .delete_short_links(&["abc123".to_string(), String::new()])
            .await,
        Err(Error::InvalidRequest { .. })
    ));
    assert_eq!(store.stats().find_calls, 0);
    assert_eq!(store.stats().delete_calls, 0);

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_fails_new_requests() {
    let store = Arc::new(ScriptedStore::new());
    let (service, _cache) = start(&store, test_config());
    let handle = service.clone();

    service.shutdown().await.unwrap();

    assert!(handle.is_shutdown());
    assert!(matches!(
        handle.create_short_link("https://example.com").await,
        Err(Error::ServiceShutdown)
    ));
    assert!(matches!(
        handle.resolve_short_link("abc123").await,
        Err(Error::ServiceShutdown)
    ));
    assert!(matches!(
        handle.delete_short_links(&["abc123".to_string()]).await,
        Err(Error::ServiceShutdown)
    ));
    assert_eq!(handle.write_workers(), 0);
    assert_eq!(handle.read_workers(), 0);
}
