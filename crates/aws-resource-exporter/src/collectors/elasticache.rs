//! Cache clusters inventory.

use async_trait::async_trait;
use resource_metrics::{MetricDescriptor, MetricSample, ScrapeSource};

use std::sync::Arc;

use super::{Collector, CollectorBase, CollectorContext, REGION_LABEL};
use crate::{
    cloud::CloudClient,
    config::{CollectorSettings, Service},
};

/// Collects an info metric for every cache cluster.
#[derive(Debug)]
pub struct ElasticacheCollector {
    base: CollectorBase,
    cluster_info: Arc<MetricDescriptor>,
}

impl ElasticacheCollector {
    /// Creates a collector.
    pub fn new(context: &CollectorContext, settings: &CollectorSettings) -> Self {
        Self {
            base: CollectorBase::new(Service::Elasticache, context, settings),
            cluster_info: context.descriptors().gauge(
                "elasticache_cluster_info",
                "Information about a cache cluster",
                &[REGION_LABEL, "replication_group_id", "engine", "engine_version"],
            ),
        }
    }
}

impl ScrapeSource for ElasticacheCollector {
    fn describe(&self) -> Vec<Arc<MetricDescriptor>> {
        vec![self.cluster_info.clone()]
    }

    fn snapshot(&self) -> Vec<MetricSample> {
        self.base.cache().snapshot()
    }
}

#[async_trait]
impl Collector for ElasticacheCollector {
    fn base(&self) -> &CollectorBase {
        &self.base
    }

    async fn collect_region(&self, client: &CloudClient) {
        let region = client.region();
        let clusters = match client.describe_cache_clusters().await {
            Ok(clusters) => clusters,
            Err(err) => {
                tracing::warn!(region, %err, "Failed describing cache clusters");
                return;
            }
        };

        let samples = clusters.iter().map(|cluster| {
            let replication_group_id = cluster.replication_group_id.as_deref().unwrap_or("");
            self.cluster_info.sample(
                1.0,
                [
                    region,
                    replication_group_id,
                    cluster.engine.as_str(),
                    cluster.engine_version.as_str(),
                ],
            )
        });
        self.base.cache().add_metrics(samples);
    }
}
