//! Run metrics

use prometheus::{
    register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_vec_with_registry, Counter, CounterVec, HistogramVec, Opts, Registry,
};
use once_cell::sync::Lazy;
use std::sync::Arc;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| {
    Arc::new(Metrics::new().expect("Failed to initialize metrics"))
});

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // Row driver metrics
    pub rows_processed: CounterVec,

    // Generation metrics
    pub stage_duration: HistogramVec,

    // Token budget metrics
    pub prompt_truncations: Counter,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let rows_processed = register_counter_vec_with_registry!(
            Opts::new("pipeline_rows_processed_total", "Dataset rows processed"),
            &["status"],
            registry
        )?;

        let stage_duration = register_histogram_vec_with_registry!(
            "pipeline_stage_duration_seconds",
            "Generation latency per prompting stage in seconds",
            &["method"],
            registry
        )?;

        let prompt_truncations = register_counter_with_registry!(
            Opts::new("pipeline_prompt_truncations_total", "Placeholder values truncated to fit the input window"),
            registry
        )?;

        Ok(Self {
            registry,
            rows_processed,
            stage_duration,
            prompt_truncations,
        })
    }

    /// Get the metrics registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a finished row
    pub fn record_row(&self, success: bool) {
        let status = if success { "success" } else { "error" };
        self.rows_processed.with_label_values(&[status]).inc();
    }

    /// Record the latency of one generation call
    pub fn record_stage(&self, method: &str, seconds: f64) {
        self.stage_duration.with_label_values(&[method]).observe(seconds);
    }

    /// Record a truncated placeholder value
    pub fn record_truncation(&self) {
        self.prompt_truncations.inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }

        String::from_utf8(buffer).unwrap_or_default()
    }
}
