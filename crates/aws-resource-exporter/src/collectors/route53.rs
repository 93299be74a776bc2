//! Hosted zones quota and per-zone record limits.

use async_trait::async_trait;
use futures::{stream, StreamExt};
use resource_metrics::{MetricDescriptor, MetricSample, ScrapeSource};

use std::sync::Arc;

use super::{Collector, CollectorBase, CollectorContext, QuotaMetric, NO_LABELS};
use crate::{
    cloud::{CloudClient, HostedZone, HostedZoneLimitKind},
    config::{CollectorSettings, Service},
};

const HOSTED_ZONES_QUOTA: (&str, &str) = ("route53", "L-4EA4796A");
const RECORDS_PER_ZONE_QUOTA: (&str, &str) = ("route53", "L-E209CC9F");
/// Max number of concurrent per-zone limit requests.
const ZONE_LIMITS_CONCURRENCY: usize = 5;

/// Collects the hosted zones quota and usage, and record limits / usage of every zone.
#[derive(Debug)]
pub struct Route53Collector {
    base: CollectorBase,
    hosted_zones_quota: QuotaMetric,
    hosted_zones_usage: Arc<MetricDescriptor>,
    records_quota: Arc<MetricDescriptor>,
    records_usage: Arc<MetricDescriptor>,
}

impl Route53Collector {
    /// Creates a collector. Only the first region of `settings` is used.
    pub fn new(context: &CollectorContext, settings: &CollectorSettings) -> Self {
        let descriptors = context.descriptors();
        let zone_labels = ["hostedzoneid", "hostedzonename"];
        let (service_code, quota_code) = RECORDS_PER_ZONE_QUOTA;
        Self {
            base: CollectorBase::new(Service::Route53, context, settings),
            hosted_zones_quota: QuotaMetric::new(
                descriptors,
                "route53_hostedzonesperaccount_quota",
                "Quota for maximum number of Route53 hosted zones in an account",
                &[],
                HOSTED_ZONES_QUOTA,
            ),
            hosted_zones_usage: descriptors.gauge(
                "route53_hostedzonesperaccount_usage",
                "Number of Route53 hosted zones in an account",
                &[],
            ),
            records_quota: descriptors.quota_gauge(
                "route53_recordsperhostedzone_quota",
                "Quota for maximum number of records in a Route53 hosted zone",
                &zone_labels,
                service_code,
                quota_code,
            ),
            records_usage: descriptors.gauge(
                "route53_recordsperhostedzone_usage",
                "Number of records in a Route53 hosted zone",
                &zone_labels,
            ),
        }
    }

    async fn collect_zone_limits(&self, client: &CloudClient, zone: &HostedZone) {
        let zone_id = zone.short_id();
        let limit = client
            .get_hosted_zone_limit(zone_id, HostedZoneLimitKind::MaxRrsetsByZone)
            .await;
        match limit {
            Ok(limit) => {
                let labels = [zone_id, zone.name.as_str()];
                self.base.cache().add_metrics([
                    self.records_quota.sample(limit.limit as f64, labels),
                    self.records_usage.sample(limit.current as f64, labels),
                ]);
            }
            Err(err) => {
                tracing::warn!(
                    zone_id,
                    zone_name = %zone.name,
                    %err,
                    "Failed getting hosted zone limit"
                );
            }
        }
    }
}

impl ScrapeSource for Route53Collector {
    fn describe(&self) -> Vec<Arc<MetricDescriptor>> {
        vec![
            self.hosted_zones_quota.descriptor.clone(),
            self.hosted_zones_usage.clone(),
            self.records_quota.clone(),
            self.records_usage.clone(),
        ]
    }

    fn snapshot(&self) -> Vec<MetricSample> {
        self.base.cache().snapshot()
    }
}

#[async_trait]
impl Collector for Route53Collector {
    fn base(&self) -> &CollectorBase {
        &self.base
    }

    async fn collect_region(&self, client: &CloudClient) {
        let zones = async {
            let zones = match client.list_hosted_zones().await {
                Ok(zones) => zones,
                Err(err) => {
                    tracing::warn!(%err, "Failed listing hosted zones");
                    return;
                }
            };
            tracing::debug!(count = zones.len(), "Listed hosted zones");
            let usage = self
                .hosted_zones_usage
                .sample(zones.len() as f64, NO_LABELS);
            self.base.cache().add_metric(usage);

            stream::iter(&zones)
                .for_each_concurrent(ZONE_LIMITS_CONCURRENCY, |zone| {
                    self.collect_zone_limits(client, zone)
                })
                .await;
        };
        let quota = self.hosted_zones_quota.collect(&self.base, client, &[]);
        tokio::join!(zones, quota);
    }
}
