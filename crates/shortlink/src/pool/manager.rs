//! Elastic pool of asynchronous worker loops.
//!
//! This module defines [`ElasticPool`], a supervisor task that keeps a number
//! of identical worker loops running in proportion to the backlog of the queue
//! they drain. It:
//!
//! - Starts `min_workers` loops immediately.
//! - Samples the queue every `monitor_interval` and starts one more loop when
//!   the queue is more than half full and fewer than `max_workers` are alive.
//! - Restarts any loop that panics. Requests owned by the dead loop observe a
//!   dropped completion instead of hanging.
//! - Coordinates shutdown through a [`CancellationToken`] shared with every
//!   loop, waiting up to `shutdown_timeout` for them to drain.
//!
//! Workers are never retired while the pool is running.

use crate::{
    Error, Result,
    telemetry::{increment_workers_restarted, increment_workers_spawned},
};
use core::future::Future;
use core::time::Duration;
use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tokio::{
    sync::mpsc,
    task::{JoinHandle, JoinSet},
    time::{MissedTickBehavior, interval, sleep, timeout},
};
use tokio_util::sync::CancellationToken;

/// Delay before a panicked worker loop is started again.
const RESTART_DELAY: Duration = Duration::from_millis(100);

/// Sizing and pacing for an [`ElasticPool`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// Worker loops started immediately and kept alive.
    pub min_workers: usize,
    /// Upper bound on concurrently running worker loops.
    pub max_workers: usize,
    /// How often the backlog is sampled.
    pub monitor_interval: Duration,
    /// How long shutdown waits for worker loops to drain.
    pub shutdown_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 2,
            max_workers: 16,
            monitor_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(3),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self, pool: &str) -> Result<()> {
        if self.min_workers == 0 {
            return Err(Error::InvalidConfig {
                reason: format!("{pool}: min_workers must be greater than 0"),
            });
        }
        if self.max_workers < self.min_workers {
            return Err(Error::InvalidConfig {
                reason: format!(
                    "{pool}: max_workers ({}) is below min_workers ({})",
                    self.max_workers, self.min_workers
                ),
            });
        }
        if self.monitor_interval.is_zero() {
            return Err(Error::InvalidConfig {
                reason: format!("{pool}: monitor_interval must be non-zero"),
            });
        }
        Ok(())
    }
}

/// A queue whose fill level drives scaling decisions.
pub trait Backlog: Send + Sync + 'static {
    /// Items currently waiting.
    fn occupancy(&self) -> usize;
    /// Maximum number of items the queue can hold.
    fn capacity(&self) -> usize;
}

/// [`Backlog`] view of a bounded Tokio MPSC queue.
///
/// Holds a weak sender so observing the queue never keeps it open.
pub struct QueueDepth<T> {
    sender: mpsc::WeakSender<T>,
    capacity: usize,
}

impl<T> QueueDepth<T> {
    pub fn new(sender: &mpsc::Sender<T>) -> Self {
        Self {
            sender: sender.downgrade(),
            capacity: sender.max_capacity(),
        }
    }
}

impl<T: Send + 'static> Backlog for QueueDepth<T> {
    fn occupancy(&self) -> usize {
        self.sender
            .upgrade()
            .map_or(0, |sender| sender.max_capacity() - sender.capacity())
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Scaling policy: add a worker when the queue is more than half full and the
/// pool is below its ceiling.
pub const fn should_scale_up(
    occupancy: usize,
    capacity: usize,
    active: usize,
    max_workers: usize,
) -> bool {
    active < max_workers && occupancy > capacity / 2
}

/// A supervised, backlog-driven set of worker loops.
///
/// The pool owns a supervisor task. Worker loops are produced by a factory
/// receiving the worker's numeric id (for logs) and the pool's
/// [`CancellationToken`]; a loop is expected to return once the token is
/// cancelled.
pub struct ElasticPool {
    name: &'static str,
    shutdown_token: CancellationToken,
    active: Arc<AtomicUsize>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl ElasticPool {
    /// Starts the supervisor and `config.min_workers` worker loops.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<B, F, Fut>(
        name: &'static str,
        config: PoolConfig,
        backlog: B,
        shutdown_token: CancellationToken,
        spawn_worker: F,
    ) -> Self
    where
        B: Backlog,
        F: Fn(usize, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let active = Arc::new(AtomicUsize::new(0));
        let supervisor = tokio::spawn(supervise(
            name,
            config,
            backlog,
            shutdown_token.clone(),
            Arc::clone(&active),
            Arc::new(spawn_worker),
        ));

        Self {
            name,
            shutdown_token,
            active,
            supervisor: Mutex::new(Some(supervisor)),
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Number of worker loops currently alive.
    pub fn active_workers(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Cancels every worker loop and waits for the supervisor to finish
    /// draining them. Subsequent calls return immediately.
    pub async fn shutdown(&self) -> Result<()> {
        #[cfg(feature = "tracing")]
        tracing::info!("Shutting down {} pool", self.name);
        self.shutdown_token.cancel();

        let supervisor = self.supervisor.lock().take();
        if let Some(supervisor) = supervisor {
            if let Err(e) = supervisor.await {
                return Err(Error::ChannelError {
                    context: format!("{} pool supervisor failed: {e}", self.name),
                });
            }
        }

        #[cfg(feature = "tracing")]
        tracing::info!("{} pool shutdown complete", self.name);
        Ok(())
    }
}

impl Drop for ElasticPool {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

async fn supervise<B, F, Fut>(
    name: &'static str,
    config: PoolConfig,
    backlog: B,
    shutdown_token: CancellationToken,
    active: Arc<AtomicUsize>,
    spawn_worker: Arc<F>,
) where
    B: Backlog,
    F: Fn(usize, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut workers = JoinSet::new();
    let mut next_worker_id = 0;

    for _ in 0..config.min_workers {
        spawn_worker_task(
            name,
            &mut workers,
            &mut next_worker_id,
            &spawn_worker,
            &shutdown_token,
            Duration::ZERO,
        );
    }
    active.store(workers.len(), Ordering::Relaxed);

    let mut monitor = interval(config.monitor_interval);
    monitor.set_missed_tick_behavior(MissedTickBehavior::Delay);
    monitor.reset();

    loop {
        tokio::select! {
            () = shutdown_token.cancelled() => break,
            _ = monitor.tick() => {
                let occupancy = backlog.occupancy();
                let capacity = backlog.capacity();
                if should_scale_up(occupancy, capacity, workers.len(), config.max_workers) {
                    #[cfg(feature = "tracing")]
                    tracing::info!(
                        "{name} backlog at {occupancy}/{capacity}, scaling to {} workers",
                        workers.len() + 1
                    );
                    spawn_worker_task(
                        name,
                        &mut workers,
                        &mut next_worker_id,
                        &spawn_worker,
                        &shutdown_token,
                        Duration::ZERO,
                    );
                }
            }
            Some(joined) = workers.join_next() => {
                match joined {
                    Err(_e) if _e.is_panic() => {
                        #[cfg(feature = "tracing")]
                        tracing::error!("{name} worker loop panicked, restarting: {_e}");
                        increment_workers_restarted(name);
                        spawn_worker_task(
                            name,
                            &mut workers,
                            &mut next_worker_id,
                            &spawn_worker,
                            &shutdown_token,
                            RESTART_DELAY,
                        );
                    }
                    Ok(()) | Err(_) => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!("{name} worker loop exited");
                    }
                }
            }
        }
        active.store(workers.len(), Ordering::Relaxed);
    }

    #[cfg(feature = "tracing")]
    tracing::debug!("Draining {} {name} workers", workers.len());

    let drained = timeout(config.shutdown_timeout, async {
        while workers.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        #[cfg(feature = "tracing")]
        tracing::warn!(
            "{name} drain timed out ({} workers still active), aborting",
            workers.len()
        );
        workers.abort_all();
        while workers.join_next().await.is_some() {}
    }
    active.store(0, Ordering::Relaxed);
}

fn spawn_worker_task<F, Fut>(
    name: &'static str,
    workers: &mut JoinSet<()>,
    next_worker_id: &mut usize,
    spawn_worker: &Arc<F>,
    shutdown_token: &CancellationToken,
    delay: Duration,
) where
    F: Fn(usize, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let worker_id = *next_worker_id;
    *next_worker_id += 1;

    let spawn_worker = Arc::clone(spawn_worker);
    let shutdown_token = shutdown_token.clone();
    // The factory runs inside the task so a panicking factory is contained
    // like a panicking loop.
    workers.spawn(async move {
        if !delay.is_zero() {
            tokio::select! {
                () = shutdown_token.cancelled() => return,
                () = sleep(delay) => {}
            }
        }
        spawn_worker(worker_id, shutdown_token).await;
    });

    increment_workers_spawned(name);
    #[cfg(feature = "tracing")]
    tracing::trace!("{name} worker {worker_id} spawned");
}
