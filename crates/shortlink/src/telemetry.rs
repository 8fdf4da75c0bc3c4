//! # Metric hooks
//!
//! Convenience functions the worker loops call to record engine activity.
//! They compile to no-ops unless the `metrics` feature is enabled, in which
//! case they record OpenTelemetry instruments registered by
//! [`init_metric_handles`]. Exporters and providers are owned by the binary;
//! this crate only needs a [`Meter`](opentelemetry::metrics::Meter).

#[cfg(feature = "metrics")]
use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram, Meter},
};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(feature = "metrics")]
static WRITES_SUBMITTED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static BATCH_SIZE: OnceLock<Histogram<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static FLUSH_RETRIES: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static BATCH_FAILURES: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static STORE_LOOKUPS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static COALESCED_READS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static CACHE_LOOKUPS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static WORKERS_SPAWNED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static WORKERS_RESTARTED: OnceLock<Counter<u64>> = OnceLock::new();

/// Registers every instrument on `meter`. Calling it more than once keeps the
/// first registration.
#[cfg(feature = "metrics")]
pub fn init_metric_handles(meter: Meter) {
    let _ = WRITES_SUBMITTED.set(
        meter
            .u64_counter("writes_submitted")
            .with_description("Create requests accepted by the write batcher")
            .build(),
    );

    let _ = BATCH_SIZE.set(
        meter
            .u64_histogram("batch_size")
            .with_description("Records per flushed batch")
            .build(),
    );

    let _ = FLUSH_RETRIES.set(
        meter
            .u64_counter("flush_retries")
            .with_description("Bulk insert attempts that had to be retried")
            .build(),
    );

    let _ = BATCH_FAILURES.set(
        meter
            .u64_counter("batch_failures")
            .with_description("Batches dropped after exhausting their attempts")
            .build(),
    );

    let _ = STORE_LOOKUPS.set(
        meter
            .u64_counter("store_lookups")
            .with_description("Lookups that reached the durable store")
            .build(),
    );

    let _ = COALESCED_READS.set(
        meter
            .u64_counter("coalesced_reads")
            .with_description("Reads that joined an in-flight lookup")
            .build(),
    );

    let _ = CACHE_LOOKUPS.set(
        meter
            .u64_counter("cache_lookups")
            .with_description("Cache probes on the resolve path, by outcome")
            .build(),
    );

    let _ = WORKERS_SPAWNED.set(
        meter
            .u64_counter("workers_spawned")
            .with_description("Worker loops started, by pool")
            .build(),
    );

    let _ = WORKERS_RESTARTED.set(
        meter
            .u64_counter("workers_restarted")
            .with_description("Worker loops restarted after a panic, by pool")
            .build(),
    );
}

#[cfg(feature = "metrics")]
pub fn increment_writes_submitted() {
    if let Some(counter) = WRITES_SUBMITTED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_writes_submitted() {}

#[cfg(feature = "metrics")]
pub fn record_batch_size(size: usize) {
    if let Some(histogram) = BATCH_SIZE.get() {
        histogram.record(size as u64, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_batch_size(_size: usize) {}

#[cfg(feature = "metrics")]
pub fn increment_flush_retries() {
    if let Some(counter) = FLUSH_RETRIES.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_flush_retries() {}

#[cfg(feature = "metrics")]
pub fn increment_batch_failures() {
    if let Some(counter) = BATCH_FAILURES.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_batch_failures() {}

#[cfg(feature = "metrics")]
pub fn increment_store_lookups() {
    if let Some(counter) = STORE_LOOKUPS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_store_lookups() {}

#[cfg(feature = "metrics")]
pub fn increment_coalesced_reads() {
    if let Some(counter) = COALESCED_READS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_coalesced_reads() {}

#[cfg(feature = "metrics")]
pub fn record_cache_lookup(hit: bool) {
    if let Some(counter) = CACHE_LOOKUPS.get() {
        counter.add(1, &[KeyValue::new("hit", hit)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_cache_lookup(_hit: bool) {}

#[cfg(feature = "metrics")]
pub fn increment_workers_spawned(pool: &'static str) {
    if let Some(counter) = WORKERS_SPAWNED.get() {
        counter.add(1, &[KeyValue::new("pool", pool)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_workers_spawned(_pool: &'static str) {}

#[cfg(feature = "metrics")]
pub fn increment_workers_restarted(pool: &'static str) {
    if let Some(counter) = WORKERS_RESTARTED.get() {
        counter.add(1, &[KeyValue::new("pool", pool)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_workers_restarted(_pool: &'static str) {}
