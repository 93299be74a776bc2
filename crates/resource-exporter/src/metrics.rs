//! Internal metrics for the exporter itself.

use prometheus_client::{
    metrics::histogram::{exponential_buckets, Histogram},
    registry::Unit,
};
use resource_metrics::Registry;

use std::time::Duration;

const LATENCY_BUCKETS: [f64; 11] = [
    0.001, 0.002, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0,
];

/// Scrape latency and payload size of the exporter.
///
/// Instances are cheap to clone; clones share the underlying histograms.
#[derive(Debug, Clone)]
pub struct ExporterMetrics {
    scrape_duration: Histogram,
    scrape_size: Histogram,
}

impl Default for ExporterMetrics {
    fn default() -> Self {
        Self {
            scrape_duration: Histogram::new(LATENCY_BUCKETS.into_iter()),
            // 1 KiB .. 4 MiB
            scrape_size: Histogram::new(exponential_buckets(1_024.0, 4.0, 7)),
        }
    }
}

impl ExporterMetrics {
    /// Registers these metrics in `registry` as `{namespace}_scrape_duration_seconds`
    /// and `{namespace}_scrape_size_bytes`.
    pub fn register(&self, registry: &mut Registry, namespace: &str) {
        registry.register_metric(
            &format!("{namespace}_scrape_duration"),
            "Latency of rendering scraped metrics",
            Some(Unit::Seconds),
            self.scrape_duration.clone(),
        );
        registry.register_metric(
            &format!("{namespace}_scrape_size"),
            "Size of the rendered metrics payload",
            Some(Unit::Bytes),
            self.scrape_size.clone(),
        );
    }

    #[allow(clippy::cast_precision_loss)] // OK for reporting
    pub(crate) fn observe_scrape(&self, latency: Duration, size: usize) {
        self.scrape_duration.observe(latency.as_secs_f64());
        self.scrape_size.observe(size as f64);
    }
}
