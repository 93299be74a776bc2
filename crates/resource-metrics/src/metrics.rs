//! Process-level metrics shared by all collectors.

use prometheus_client::metrics::counter::Counter;

use std::sync::Arc;

use crate::{
    collector::ScrapeSource,
    descriptors::{MetricDescriptor, MetricSample},
};

/// Counters of upstream API calls and observed errors.
///
/// A single instance is created at startup and shared (via `Arc`) by the cloud client facade
/// and all collectors; tests create their own instances. Counters are incremented concurrently,
/// each increment is atomic.
#[derive(Debug)]
pub struct ProcessMetrics {
    requests: Counter,
    errors: Counter,
    requests_descriptor: Arc<MetricDescriptor>,
    errors_descriptor: Arc<MetricDescriptor>,
}

impl ProcessMetrics {
    /// Creates counters named `{namespace}_api_requests` and `{namespace}_api_errors`.
    pub fn new(namespace: &str) -> Self {
        Self::with_const_labels(namespace, [] as [(&str, &str); 0])
    }

    /// Same as [`Self::new()`], but attaches constant labels to both counters.
    pub fn with_const_labels<I, K, V>(namespace: &str, const_labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let const_labels: Vec<(String, String)> = const_labels
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();
        let requests_descriptor = MetricDescriptor::counter(
            format!("{namespace}_api_requests"),
            "Number of calls made to upstream APIs",
        )
        .with_const_labels(const_labels.clone())
        .build();
        let errors_descriptor = MetricDescriptor::counter(
            format!("{namespace}_api_errors"),
            "Number of errors observed while collecting metrics",
        )
        .with_const_labels(const_labels)
        .build();

        Self {
            requests: Counter::default(),
            errors: Counter::default(),
            requests_descriptor,
            errors_descriptor,
        }
    }

    /// Records a single upstream call.
    pub fn record_request(&self) {
        self.requests.inc();
    }

    /// Records a single error.
    pub fn record_error(&self) {
        self.errors.inc();
    }

    /// Returns the total number of recorded requests.
    pub fn requests(&self) -> u64 {
        self.requests.get()
    }

    /// Returns the total number of recorded errors.
    pub fn errors(&self) -> u64 {
        self.errors.get()
    }
}

impl ScrapeSource for ProcessMetrics {
    fn describe(&self) -> Vec<Arc<MetricDescriptor>> {
        vec![
            Arc::clone(&self.requests_descriptor),
            Arc::clone(&self.errors_descriptor),
        ]
    }

    #[allow(clippy::cast_precision_loss)] // OK for reporting
    fn snapshot(&self) -> Vec<MetricSample> {
        let no_labels = [] as [&str; 0];
        vec![
            self.requests_descriptor
                .sample(self.requests() as f64, no_labels),
            self.errors_descriptor.sample(self.errors() as f64, no_labels),
        ]
    }
}
