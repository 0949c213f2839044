//! Prometheus metrics for the shard-dao layer.
//!
//! All metrics follow the naming convention: `shard_<component>_<metric>_<unit>`

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Locking executor chains by outcome (committed, vetoed, rolled_back)
    pub static ref CHAINS_EXECUTED: CounterVec = CounterVec::new(
        Opts::new("shard_executor_chains_total", "Locking executor chains by outcome"),
        &["outcome"]
    ).expect("metric creation failed");

    /// Time from executor construction to commit or rollback
    pub static ref CHAIN_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "shard_executor_chain_duration_seconds",
            "Time a locking executor holds its transaction"
        ).buckets(exponential_buckets(0.0001, 2.0, 16).expect("valid buckets"))
    ).expect("metric creation failed");

    /// Row lock waits that hit the configured timeout
    pub static ref LOCK_WAIT_TIMEOUTS: Counter = Counter::new(
        "shard_storage_lock_wait_timeouts_total",
        "Row lock acquisitions that exceeded the lock-wait timeout"
    ).expect("metric creation failed");

    /// Inserts rejected by a uniqueness constraint
    pub static ref UNIQUENESS_CONFLICTS: Counter = Counter::new(
        "shard_storage_uniqueness_conflicts_total",
        "Inserts rejected by a unique key constraint"
    ).expect("metric creation failed");
}

/// Handle for the metrics registry
pub struct MetricsHandle {
    _registry: Arc<Registry>,
}

/// Register all metrics with the global registry.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(CHAINS_EXECUTED.clone()),
        Box::new(CHAIN_DURATION.clone()),
        Box::new(LOCK_WAIT_TIMEOUTS.clone()),
        Box::new(UNIQUENESS_CONFLICTS.clone()),
    ];

    for metric in metrics {
        REGISTRY
            .register(metric)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }

    Ok(MetricsHandle {
        _registry: Arc::new(REGISTRY.clone()),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}
