//! Metric names and recording helpers.
//!
//! Each helper records through the `metrics` facade and into the
//! process-wide [`MetricsStore`].

use std::sync::OnceLock;
use std::time::Duration;

use super::store::{MetricsSnapshot, MetricsStore};

pub const CACHE_HITS: &str = "studio_cache_hits_total";
pub const CACHE_MISSES: &str = "studio_cache_misses_total";
pub const CACHE_EVICTIONS: &str = "studio_cache_evictions_total";
pub const CACHE_RESIDENT: &str = "studio_cache_resident_models";
pub const MODEL_LOAD_FAILURES: &str = "studio_model_load_failures_total";
pub const MODEL_LOAD_SECONDS: &str = "studio_model_load_seconds";
pub const MEMORY_RECLAIMS: &str = "studio_memory_reclaims_total";
pub const GENERATIONS: &str = "studio_generations_total";
pub const GENERATION_SECONDS: &str = "studio_generation_seconds";

static STORE: OnceLock<MetricsStore> = OnceLock::new();

fn store() -> &'static MetricsStore {
    STORE.get_or_init(MetricsStore::new)
}

/// Register metric descriptions with the installed recorder, if any.
pub fn init_metrics() {
    metrics::describe_counter!(CACHE_HITS, "Acquisitions served from the model cache");
    metrics::describe_counter!(CACHE_MISSES, "Acquisitions that required a pipeline load");
    metrics::describe_counter!(CACHE_EVICTIONS, "Pipelines removed from the model cache");
    metrics::describe_gauge!(CACHE_RESIDENT, "Pipelines currently resident");
    metrics::describe_counter!(MODEL_LOAD_FAILURES, "Pipeline loads that failed");
    metrics::describe_histogram!(MODEL_LOAD_SECONDS, "Pipeline load duration in seconds");
    metrics::describe_counter!(MEMORY_RECLAIMS, "Device memory reclamation passes");
    metrics::describe_counter!(GENERATIONS, "Generation requests by outcome");
    metrics::describe_histogram!(GENERATION_SECONDS, "End-to-end generation duration in seconds");
}

/// Snapshot of the process-wide store.
pub fn metrics_snapshot() -> MetricsSnapshot {
    store().snapshot()
}

pub fn record_cache_hit() {
    metrics::counter!(CACHE_HITS).increment(1);
    store().increment_counter(CACHE_HITS, 1);
}

pub fn record_cache_miss() {
    metrics::counter!(CACHE_MISSES).increment(1);
    store().increment_counter(CACHE_MISSES, 1);
}

pub fn record_evictions(count: u64) {
    metrics::counter!(CACHE_EVICTIONS).increment(count);
    store().increment_counter(CACHE_EVICTIONS, count);
}

pub fn set_resident_models(count: usize) {
    metrics::gauge!(CACHE_RESIDENT).set(count as f64);
    store().set_gauge(CACHE_RESIDENT, count as f64);
}

pub fn record_model_load(elapsed: Duration, success: bool) {
    if success {
        metrics::histogram!(MODEL_LOAD_SECONDS).record(elapsed.as_secs_f64());
        store().record_histogram(MODEL_LOAD_SECONDS, elapsed.as_secs_f64());
    } else {
        metrics::counter!(MODEL_LOAD_FAILURES).increment(1);
        store().increment_counter(MODEL_LOAD_FAILURES, 1);
    }
}

pub fn record_reclaim() {
    metrics::counter!(MEMORY_RECLAIMS).increment(1);
    store().increment_counter(MEMORY_RECLAIMS, 1);
}

/// `status` is `"ok"` or the failing phase.
pub fn record_generation(elapsed: Duration, status: &'static str) {
    metrics::counter!(GENERATIONS, "status" => status).increment(1);
    metrics::histogram!(GENERATION_SECONDS).record(elapsed.as_secs_f64());
    store().increment_counter(&format!("{GENERATIONS}{{status=\"{status}\"}}"), 1);
    store().record_histogram(GENERATION_SECONDS, elapsed.as_secs_f64());
}
