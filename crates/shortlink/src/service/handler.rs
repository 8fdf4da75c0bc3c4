use super::ServiceConfig;
use crate::{
    AlphanumericGenerator, Cache, DurableStore, Error, IdGenerator, ReadCoalescer, Result,
    ShortId, WriteBatcher, telemetry::record_cache_lookup,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct Inner<S, C> {
    store: Arc<S>,
    cache: Arc<C>,
    batcher: WriteBatcher,
    coalescer: ReadCoalescer,
    max_target_len: usize,
    shutdown_token: CancellationToken,
}

/// Creates, resolves and deletes short links.
///
/// Cheap to clone; every clone drives the same worker pools. Writes go
/// through the batcher, reads probe the cache before falling back to the
/// coalescer, and deletes invalidate the cache before the store.
pub struct ShortLinkService<S, C> {
    inner: Arc<Inner<S, C>>,
}

impl<S, C> Clone for ShortLinkService<S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, C> core::fmt::Debug for ShortLinkService<S, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ShortLinkService")
            .field("write_workers", &self.inner.batcher.active_workers())
            .field("read_workers", &self.inner.coalescer.active_workers())
            .field("max_target_len", &self.inner.max_target_len)
            .finish_non_exhaustive()
    }
}

impl<S, C> ShortLinkService<S, C>
where
    S: DurableStore,
    C: Cache,
{
    /// Starts a service issuing identifiers from [`AlphanumericGenerator`].
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` does not validate.
    pub fn new(store: Arc<S>, cache: Arc<C>, config: ServiceConfig) -> Result<Self> {
        Self::with_generator(store, cache, AlphanumericGenerator::default(), config)
    }

    /// Like [`new`](Self::new), with a caller-supplied identifier generator.
    pub fn with_generator<G>(
        store: Arc<S>,
        cache: Arc<C>,
        generator: G,
        config: ServiceConfig,
    ) -> Result<Self>
    where
        G: IdGenerator,
    {
        config.validate()?;

        let shutdown_token = CancellationToken::new();
        let batcher = WriteBatcher::start(
            Arc::clone(&store),
            Arc::new(generator),
            config.batch,
            config.write_pool,
            shutdown_token.child_token(),
        );
        let coalescer = ReadCoalescer::start(
            Arc::clone(&store),
            Arc::clone(&cache),
            config.lookup,
            config.read_pool,
            shutdown_token.child_token(),
        );

        #[cfg(feature = "tracing")]
        tracing::info!("Short link service started");

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                cache,
                batcher,
                coalescer,
                max_target_len: config.max_target_len,
                shutdown_token,
            }),
        })
    }

    /// Persists `target` and returns its new identifier.
    ///
    /// Surrounding whitespace is trimmed before storing. New mappings are not
    /// cached; the first resolution warms the cache.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] if `target` is empty, contains control
    ///   characters, or exceeds `max_target_len` bytes.
    /// - Any error of [`WriteBatcher::submit`].
    pub async fn create_short_link(&self, target: &str) -> Result<ShortId> {
        let target = self.validate_target(target)?;
        self.inner.batcher.submit(target.to_owned()).await
    }

    /// Returns the target mapped to `id`, or `None` if there is none.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] if `id` is empty.
    /// - Any error of [`ReadCoalescer::resolve`].
    pub async fn resolve_short_link(&self, id: &str) -> Result<Option<String>> {
        if id.is_empty() {
            return Err(Error::InvalidRequest {
                reason: "id must not be empty".to_string(),
            });
        }
        if self.inner.shutdown_token.is_cancelled() {
            return Err(Error::ServiceShutdown);
        }

        if let Some(target) = self.inner.cache.get(id).await {
            record_cache_lookup(true);
            return Ok(Some(target));
        }
        record_cache_lookup(false);

        self.inner.coalescer.resolve(id).await
    }

    /// Removes the mappings for `ids`. Unknown identifiers are ignored.
    ///
    /// The cache is invalidated first on a best-effort basis: a failure there
    /// is logged and the store deletion still runs.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] if `ids` is empty or contains an empty id.
    /// - [`Error::Store`] if the store deletion failed.
    pub async fn delete_short_links(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Err(Error::InvalidRequest {
                reason: "at least one id is required".to_string(),
            });
        }
        if ids.iter().any(String::is_empty) {
            return Err(Error::InvalidRequest {
                reason: "ids must not be empty".to_string(),
            });
        }
        if self.inner.shutdown_token.is_cancelled() {
            return Err(Error::ServiceShutdown);
        }

        if let Err(_e) = self.inner.cache.delete(ids).await {
            #[cfg(feature = "tracing")]
            tracing::warn!("Cache invalidation of {} ids failed: {_e}", ids.len());
        }
        self.inner.store.delete_by_ids(ids).await?;

        #[cfg(feature = "tracing")]
        tracing::debug!("Deleted {} short links", ids.len());
        Ok(())
    }

    /// Stops both worker pools. Buffered writes are flushed; queued requests
    /// fail with [`Error::ServiceShutdown`], as does every later call.
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.shutdown_token.cancel();
        futures::future::try_join(
            self.inner.batcher.shutdown(),
            self.inner.coalescer.shutdown(),
        )
        .await?;

        #[cfg(feature = "tracing")]
        tracing::info!("Short link service stopped");
        Ok(())
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown_token.is_cancelled()
    }

    pub fn write_workers(&self) -> usize {
        self.inner.batcher.active_workers()
    }

    pub fn read_workers(&self) -> usize {
        self.inner.coalescer.active_workers()
    }

    /// Create requests waiting for a write worker.
    pub fn pending_writes(&self) -> usize {
        self.inner.batcher.queue_depth()
    }

    fn validate_target<'a>(&self, target: &'a str) -> Result<&'a str> {
        let target = target.trim();
        if target.is_empty() {
            return Err(Error::InvalidRequest {
                reason: "target must not be empty".to_string(),
            });
        }
        if target.chars().any(char::is_control) {
            return Err(Error::InvalidRequest {
                reason: "target must not contain control characters".to_string(),
            });
        }
        if target.len() > self.inner.max_target_len {
            return Err(Error::InvalidRequest {
                reason: format!(
                    "target is {} bytes, limit is {}",
                    target.len(),
                    self.inner.max_target_len
                ),
            });
        }
        Ok(target)
    }
}
