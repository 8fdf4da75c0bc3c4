#![doc = include_str!("../README.md")]

mod config;
mod telemetry;
mod workload;

use clap::Parser;
use config::{CliArgs, LoadConfig};
use shortlink::{Cache, MemoryCache, MemoryStore, NullCache, ShortLinkService};
use std::sync::Arc;
use telemetry::init_telemetry;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = LoadConfig::try_from(args)?;

    let providers = init_telemetry()?;
    log_startup_info(&config);

    let store = Arc::new(MemoryStore::with_latency(config.store_latency));
    let result = if config.use_cache {
        drive(store, Arc::new(MemoryCache::new()), &config).await
    } else {
        drive(store, Arc::new(NullCache), &config).await
    };

    providers.shutdown();
    result
}

async fn drive<C: Cache>(
    store: Arc<MemoryStore>,
    cache: Arc<C>,
    config: &LoadConfig,
) -> anyhow::Result<()> {
    let service = ShortLinkService::new(Arc::clone(&store), cache, config.service.clone())?;

    let outcome = tokio::select! {
        report = workload::run(&service, &store, config) => Some(report),
        () = shutdown_signal() => None,
    };

    #[cfg(feature = "tracing")]
    tracing::info!("Shutting down, terminating gracefully...");
    if let Err(_e) = service.shutdown().await {
        #[cfg(feature = "tracing")]
        tracing::error!("Error during service shutdown: {:?}", _e);
    }

    let Some(report) = outcome else {
        return Ok(());
    };
    let report = report?;
    println!("{report}");
    println!("store rows remaining: {}", store.len());

    if report.failures() > 0 {
        anyhow::bail!("{} requests failed", report.failures());
    }
    Ok(())
}

fn log_startup_info(_config: &LoadConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!("Starting load run with full config: {:#?}", _config);
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting load run: {} creates, {} hot-key resolutions, {} clients",
            _config.creates,
            _config.hot_key_requests,
            _config.concurrency
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Failed to install SIGTERM handler: {_e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(_e) = signal::ctrl_c().await {
            #[cfg(feature = "tracing")]
            tracing::warn!("Failed to install Ctrl+C handler: {_e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }
}
