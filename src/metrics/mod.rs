//! Metrics collection for observability

use prometheus::{
    register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_with_registry, Counter, CounterVec, Histogram, HistogramOpts, Opts,
    Registry,
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

    // Packing metrics
    pub packs_total: CounterVec,
    pub packed_items: CounterVec,
    pub dropped_items: Counter,
    pub pack_tokens_used: Histogram,
    pub pack_duration: Histogram,

    // Provider metrics
    pub provider_failures: CounterVec,
    pub cache_lookups: CounterVec,
}

impl Metrics {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let packs_total = register_counter_vec_with_registry!(
            Opts::new("focus_packs_total", "Total packing calls"),
            &["status"],
            registry
        )?;

        let packed_items = register_counter_vec_with_registry!(
            Opts::new("focus_packed_items_total", "Packed messages by tier"),
            &["tier"],
            registry
        )?;

        let dropped_items = register_counter_with_registry!(
            Opts::new("focus_dropped_items_total", "Messages dropped for lack of budget"),
            registry
        )?;

        let pack_tokens_used = register_histogram_with_registry!(
            HistogramOpts::new("focus_pack_tokens_used", "Tokens charged per pack").buckets(
                vec![64.0, 256.0, 1024.0, 2048.0, 4096.0, 8192.0, 16384.0, 32768.0]
            ),
            registry
        )?;

        let pack_duration = register_histogram_with_registry!(
            "focus_pack_duration_seconds",
            "Packing call duration in seconds",
            registry
        )?;

        let provider_failures = register_counter_vec_with_registry!(
            Opts::new("focus_provider_failures_total", "Absorbed provider failures"),
            &["provider", "kind"],
            registry
        )?;

        let cache_lookups = register_counter_vec_with_registry!(
            Opts::new("focus_cache_lookups_total", "Per-message cache lookups"),
            &["cache", "result"],
            registry
        )?;

        Ok(Self {
            registry,
            packs_total,
            packed_items,
            dropped_items,
            pack_tokens_used,
            pack_duration,
            provider_failures,
            cache_lookups,
        })
    }

    /// Get the metrics registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a finished packing call
    pub fn record_pack(
        &self,
        used: usize,
        full: usize,
        compressed: usize,
        stubbed: usize,
        dropped: usize,
        seconds: f64,
    ) {
        self.packs_total.with_label_values(&["success"]).inc();
        self.packed_items.with_label_values(&["full"]).inc_by(full as f64);
        self.packed_items.with_label_values(&["compressed"]).inc_by(compressed as f64);
        self.packed_items.with_label_values(&["placeholder"]).inc_by(stubbed as f64);
        self.dropped_items.inc_by(dropped as f64);
        self.pack_tokens_used.observe(used as f64);
        self.pack_duration.observe(seconds);
    }

    /// Record a packing call rejected by validation
    pub fn record_rejected_pack(&self) {
        self.packs_total.with_label_values(&["rejected"]).inc();
    }

    /// Record a provider failure that was absorbed by a fallback
    pub fn record_provider_failure(&self, provider: &str, kind: &str) {
        self.provider_failures.with_label_values(&[provider, kind]).inc();
    }

    /// Record a per-message cache lookup
    pub fn record_cache_lookup(&self, cache: &str, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_lookups.with_label_values(&[cache, result]).inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();

        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        let metrics = Metrics::new();
        assert!(metrics.is_ok());
    }

    #[test]
    fn test_record_pack_is_exported() {
        let metrics = Metrics::new().unwrap();
        metrics.record_pack(420, 3, 1, 2, 0, 0.01);
        metrics.record_provider_failure("llm", "timeout");
        metrics.record_cache_lookup("compression", true);

        let text = metrics.export_prometheus();
        assert!(text.contains("focus_packs_total"));
        assert!(text.contains("focus_packed_items_total"));
        assert!(text.contains("focus_provider_failures_total"));
    }
}
