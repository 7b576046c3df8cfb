//! Telemetry: structured logging, request spans and metrics.

mod logging;
mod metrics;
mod spans;
mod store;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use metrics::{
    init_metrics, metrics_snapshot, record_cache_hit, record_cache_miss, record_evictions,
    record_generation, record_model_load, record_reclaim, set_resident_models,
};
pub use metrics::{
    CACHE_EVICTIONS, CACHE_HITS, CACHE_MISSES, CACHE_RESIDENT, GENERATIONS, GENERATION_SECONDS,
    MEMORY_RECLAIMS, MODEL_LOAD_FAILURES, MODEL_LOAD_SECONDS,
};
pub use spans::{RequestSpan, SpanExt};
pub use store::{HistogramSummary, MetricsSnapshot, MetricsStore};
