//! Transit gateway quota and usage.

use async_trait::async_trait;
use resource_metrics::{MetricDescriptor, MetricSample, ScrapeSource};

use std::sync::Arc;

use super::{Collector, CollectorBase, CollectorContext, QuotaMetric, REGION_LABEL};
use crate::{
    cloud::CloudClient,
    config::{CollectorSettings, Service},
};

const TRANSIT_GATEWAYS_QUOTA: (&str, &str) = ("ec2", "L-A2478D36");

/// Collects the transit gateways quota and the number of transit gateways per region.
#[derive(Debug)]
pub struct Ec2Collector {
    base: CollectorBase,
    transit_gateways_quota: QuotaMetric,
    transit_gateways_usage: Arc<MetricDescriptor>,
}

impl Ec2Collector {
    /// Creates a collector.
    pub fn new(context: &CollectorContext, settings: &CollectorSettings) -> Self {
        let descriptors = context.descriptors();
        Self {
            base: CollectorBase::new(Service::Ec2, context, settings),
            transit_gateways_quota: QuotaMetric::new(
                descriptors,
                "ec2_transitgatewaysperregion_quota",
                "Quota for maximum number of Transit Gateways in this account",
                &[REGION_LABEL],
                TRANSIT_GATEWAYS_QUOTA,
            ),
            transit_gateways_usage: descriptors.gauge(
                "ec2_transitgatewaysperregion_usage",
                "Number of Transit Gateways in the AWS account",
                &[REGION_LABEL],
            ),
        }
    }
}

impl ScrapeSource for Ec2Collector {
    fn describe(&self) -> Vec<Arc<MetricDescriptor>> {
        vec![
            self.transit_gateways_quota.descriptor.clone(),
            self.transit_gateways_usage.clone(),
        ]
    }

    fn snapshot(&self) -> Vec<MetricSample> {
        self.base.cache().snapshot()
    }
}

#[async_trait]
impl Collector for Ec2Collector {
    fn base(&self) -> &CollectorBase {
        &self.base
    }

    async fn collect_region(&self, client: &CloudClient) {
        let region = client.region();
        let region_labels = [region];
        let quota = self
            .transit_gateways_quota
            .collect(&self.base, client, &region_labels);
        let usage = async {
            match client.describe_transit_gateways().await {
                Ok(gateways) => {
                    let sample = self
                        .transit_gateways_usage
                        .sample(gateways.len() as f64, [region]);
                    self.base.cache().add_metric(sample);
                }
                Err(err) => {
                    tracing::warn!(region, %err, "Failed describing transit gateways");
                }
            }
        };
        tokio::join!(quota, usage);
    }
}
