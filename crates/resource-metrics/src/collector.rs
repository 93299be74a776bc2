//! Scrape-facing surface of collectors.

use prometheus_client::{
    collector::Collector as CollectorTrait,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{counter::ConstCounter, gauge::ConstGauge},
};

use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    descriptors::{MetricDescriptor, MetricKind, MetricSample},
    MetricCache,
};

/// Source of metrics that can be scraped: a fixed set of descriptors and a snapshot
/// of current samples.
///
/// Implementations must not block on anything but short-lived locks; in particular,
/// [`Self::snapshot()`] must never wait for upstream APIs.
pub trait ScrapeSource: fmt::Debug + Send + Sync + 'static {
    /// Returns descriptors of all metrics this source can produce. Called once on registration.
    fn describe(&self) -> Vec<Arc<MetricDescriptor>>;

    /// Returns current samples. Called on each scrape.
    fn snapshot(&self) -> Vec<MetricSample>;
}

/// Simplest [`ScrapeSource`]: a fixed descriptor set backed by a [`MetricCache`].
#[derive(Debug)]
pub struct CachedSource {
    descriptors: Vec<Arc<MetricDescriptor>>,
    cache: Arc<MetricCache>,
}

impl CachedSource {
    /// Creates a source from descriptors and a cache.
    pub fn new(descriptors: Vec<Arc<MetricDescriptor>>, cache: Arc<MetricCache>) -> Self {
        Self { descriptors, cache }
    }
}

impl ScrapeSource for CachedSource {
    fn describe(&self) -> Vec<Arc<MetricDescriptor>> {
        self.descriptors.clone()
    }

    fn snapshot(&self) -> Vec<MetricSample> {
        self.cache.snapshot()
    }
}

/// Adapter between a [`ScrapeSource`] and the `prometheus-client` collector interface.
#[derive(Debug)]
pub(crate) struct SourceCollector {
    descriptors: Vec<Arc<MetricDescriptor>>,
    source: Arc<dyn ScrapeSource>,
}

impl SourceCollector {
    pub(crate) fn new(source: Arc<dyn ScrapeSource>) -> Self {
        Self {
            descriptors: source.describe(),
            source,
        }
    }

    pub(crate) fn descriptors(&self) -> &[Arc<MetricDescriptor>] {
        &self.descriptors
    }

    /// Groups samples by metric families. Families are ordered as described; families
    /// not mentioned in descriptors go last, ordered by name. Samples inside a family
    /// are ordered by label values so that the output is stable.
    fn group_samples(&self, samples: Vec<MetricSample>) -> Vec<Vec<MetricSample>> {
        let mut families: HashMap<String, Vec<MetricSample>> = HashMap::new();
        for sample in samples {
            families
                .entry(sample.descriptor().name().to_owned())
                .or_default()
                .push(sample);
        }

        let mut grouped = Vec::with_capacity(families.len());
        for descriptor in &self.descriptors {
            if let Some(family) = families.remove(descriptor.name()) {
                grouped.push(family);
            }
        }
        let mut undescribed: Vec<_> = families.into_iter().collect();
        undescribed.sort_unstable_by(|(name, _), (other_name, _)| name.cmp(other_name));
        grouped.extend(undescribed.into_iter().map(|(_, family)| family));

        for family in &mut grouped {
            family.sort_by(|sample, other| sample.label_values().cmp(other.label_values()));
        }
        grouped
    }
}

impl CollectorTrait for SourceCollector {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> fmt::Result {
        let samples = self.source.snapshot();
        for family in self.group_samples(samples) {
            let Some(first) = family.first() else {
                continue;
            };
            let descriptor = Arc::clone(first.descriptor());
            let kind = descriptor.kind();
            let mut family_encoder = encoder.encode_descriptor(
                descriptor.name(),
                descriptor.help(),
                None,
                kind.metric_type(),
            )?;

            for sample in &family {
                let labels = sample.label_pairs();
                let metric_encoder = family_encoder.encode_family(&labels)?;
                match kind {
                    MetricKind::Gauge => ConstGauge::new(sample.value()).encode(metric_encoder)?,
                    MetricKind::Counter => {
                        ConstCounter::new(sample.value()).encode(metric_encoder)?;
                    }
                }
            }
        }
        Ok(())
    }
}
