//! Wrapper around metrics registry.

use prometheus_client::{
    encoding::text,
    registry::{Metric, Registry as RegistryInner, Unit},
};

use std::{fmt, sync::Arc};

use crate::{
    collector::{ScrapeSource, SourceCollector},
    format::{Format, PrometheusWrapper},
};

/// Metrics registry: a set of [`ScrapeSource`]s and plain `prometheus-client` metrics
/// encoded together on each scrape.
pub struct Registry {
    inner: RegistryInner,
    source_count: usize,
    descriptor_count: usize,
}

impl fmt::Debug for Registry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Registry")
            .field("source_count", &self.source_count)
            .field("descriptor_count", &self.descriptor_count)
            .finish_non_exhaustive()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::empty()
    }
}

impl Registry {
    /// Creates an empty registry.
    pub fn empty() -> Self {
        Self {
            inner: RegistryInner::default(),
            source_count: 0,
            descriptor_count: 0,
        }
    }

    /// Registers a scrape source. Source descriptors are obtained once, during this call.
    pub fn register_source(&mut self, source: Arc<dyn ScrapeSource>) {
        let collector = SourceCollector::new(source);
        let descriptors = collector.descriptors();
        tracing::debug!(
            descriptor_count = descriptors.len(),
            "Registered scrape source with metrics {:?}",
            descriptors
                .iter()
                .map(|descriptor| descriptor.name())
                .collect::<Vec<_>>()
        );
        self.source_count += 1;
        self.descriptor_count += descriptors.len();
        self.inner.register_collector(Box::new(collector));
    }

    /// Registers a single `prometheus-client` metric (e.g., a histogram) updated outside
    /// of scrape sources.
    pub fn register_metric(
        &mut self,
        name: &str,
        help: &str,
        unit: Option<Unit>,
        metric: impl Metric,
    ) {
        if let Some(unit) = unit {
            self.inner.register_with_unit(name, help, unit, metric);
        } else {
            self.inner.register(name, help, metric);
        }
        self.descriptor_count += 1;
    }

    /// Returns the number of registered scrape sources.
    pub fn source_count(&self) -> usize {
        self.source_count
    }

    /// Returns the total number of described metric families.
    pub fn descriptor_count(&self) -> usize {
        self.descriptor_count
    }

    /// Encodes all metrics in this registry to the specified text format.
    ///
    /// # Errors
    ///
    /// Proxies formatting errors of the provided `writer`.
    pub fn encode<W: fmt::Write>(&self, writer: &mut W, format: Format) -> fmt::Result {
        match format {
            Format::OpenMetrics => text::encode(writer, &self.inner),
            Format::Prometheus | Format::OpenMetricsForPrometheus => {
                let remove_eof_terminator = matches!(format, Format::Prometheus);
                let mut wrapper = PrometheusWrapper::new(writer, remove_eof_terminator);
                text::encode(&mut wrapper, &self.inner)?;
                wrapper.flush()
            }
        }
    }
}
