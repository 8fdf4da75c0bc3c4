use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use shortlink::{BatchConfig, LookupConfig, PoolConfig, ServiceConfig};

/// Runtime configuration for the `shortlink-load` binary.
///
/// Every value can be set by flag or environment variable, and `.env` is
/// loaded first. Defaults mirror a production deployment, scaled down to run
/// on a laptop in a few seconds.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "shortlink-load",
    version,
    about = "Drives create bursts and hot-key resolve storms through the shortlink core"
)]
pub struct CliArgs {
    /// Short links created during the create burst.
    ///
    /// Environment variable: `CREATES`
    #[arg(long, env = "CREATES", default_value_t = 20_000)]
    pub creates: usize,

    /// Resolutions of a single identifier during the hot-key storm. Zero
    /// skips the phase.
    ///
    /// Environment variable: `HOT_KEY_REQUESTS`
    #[arg(long, env = "HOT_KEY_REQUESTS", default_value_t = 20_000)]
    pub hot_key_requests: usize,

    /// Short links deleted (and checked to be gone) after the storm.
    ///
    /// Environment variable: `DELETES`
    #[arg(long, env = "DELETES", default_value_t = 500)]
    pub deletes: usize,

    /// Requests kept in flight at once by the simulated clients.
    ///
    /// Environment variable: `CONCURRENCY`
    #[arg(long, env = "CONCURRENCY", default_value_t = 512)]
    pub concurrency: usize,

    /// Simulated round trip of every durable store call, in milliseconds.
    ///
    /// Environment variable: `STORE_LATENCY_MS`
    #[arg(long, env = "STORE_LATENCY_MS", default_value_t = 5)]
    pub store_latency_ms: u64,

    /// Disable the cache so every resolution goes through the coalescer.
    #[arg(long, env = "NO_CACHE", default_value_t = false)]
    pub no_cache: bool,

    /// Records per bulk insert before a flush is forced.
    ///
    /// Environment variable: `MAX_BATCH_SIZE`
    #[arg(long, env = "MAX_BATCH_SIZE", default_value_t = 200)]
    pub max_batch_size: usize,

    /// Flush timer period of each write worker, in milliseconds.
    ///
    /// Environment variable: `FLUSH_INTERVAL_MS`
    #[arg(long, env = "FLUSH_INTERVAL_MS", default_value_t = 5)]
    pub flush_interval_ms: u64,

    /// Bulk insert attempts per batch.
    ///
    /// Environment variable: `MAX_ATTEMPTS`
    #[arg(long, env = "MAX_ATTEMPTS", default_value_t = 5)]
    pub max_attempts: usize,

    /// Capacity of the write and read queues.
    ///
    /// Environment variable: `QUEUE_CAPACITY`
    #[arg(long, env = "QUEUE_CAPACITY", default_value_t = 5000)]
    pub queue_capacity: usize,

    /// Upper bound on a single resolution, in milliseconds.
    ///
    /// Environment variable: `RESOLVE_TIMEOUT_MS`
    #[arg(long, env = "RESOLVE_TIMEOUT_MS", default_value_t = 3500)]
    pub resolve_timeout_ms: u64,

    /// TTL of cache entries written by the read path, in seconds.
    ///
    /// Environment variable: `CACHE_TTL_SECS`
    #[arg(long, env = "CACHE_TTL_SECS", default_value_t = 300)]
    pub cache_ttl_secs: u64,

    /// Worker loops each pool starts with.
    ///
    /// Environment variable: `MIN_WORKERS`
    #[arg(long, env = "MIN_WORKERS", default_value_t = 2)]
    pub min_workers: usize,

    /// Ceiling for each pool. Defaults to twice the number of CPUs.
    ///
    /// Environment variable: `MAX_WORKERS`
    #[arg(long, env = "MAX_WORKERS")]
    pub max_workers: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct LoadConfig {
    pub service: ServiceConfig,
    pub creates: usize,
    pub hot_key_requests: usize,
    pub deletes: usize,
    pub concurrency: usize,
    pub store_latency: Duration,
    pub use_cache: bool,
}

impl TryFrom<CliArgs> for LoadConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.creates == 0 {
            bail!("CREATES must be greater than 0");
        }
        if args.concurrency == 0 {
            bail!("CONCURRENCY must be greater than 0");
        }
        if args.deletes > args.creates {
            bail!(
                "DELETES ({}) exceeds CREATES ({})",
                args.deletes,
                args.creates
            );
        }

        let max_workers = args
            .max_workers
            .unwrap_or_else(|| num_cpus::get() * 2)
            .max(args.min_workers);
        let pool = PoolConfig {
            min_workers: args.min_workers,
            max_workers,
            ..PoolConfig::default()
        };

        let service = ServiceConfig {
            batch: BatchConfig {
                max_batch_size: args.max_batch_size,
                flush_interval: Duration::from_millis(args.flush_interval_ms),
                max_attempts: args.max_attempts,
                queue_capacity: args.queue_capacity,
                ..BatchConfig::default()
            },
            lookup: LookupConfig {
                resolve_timeout: Duration::from_millis(args.resolve_timeout_ms),
                cache_ttl: Duration::from_secs(args.cache_ttl_secs),
                queue_capacity: args.queue_capacity,
                ..LookupConfig::default()
            },
            write_pool: pool.clone(),
            read_pool: pool,
            ..ServiceConfig::default()
        };
        if let Err(e) = service.validate() {
            bail!("invalid service configuration: {e}");
        }

        Ok(Self {
            service,
            creates: args.creates,
            hot_key_requests: args.hot_key_requests,
            deletes: args.deletes,
            concurrency: args.concurrency,
            store_latency: Duration::from_millis(args.store_latency_ms),
            use_cache: !args.no_cache,
        })
    }
}
