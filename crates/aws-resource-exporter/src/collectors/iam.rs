//! Identity: roles usage and quota from the account summary.

use async_trait::async_trait;
use resource_metrics::{MetricDescriptor, MetricSample, ScrapeSource};

use std::sync::Arc;

use super::{Collector, CollectorBase, CollectorContext, NO_LABELS};
use crate::{
    cloud::CloudClient,
    config::{CollectorSettings, Service},
};

const ROLES_QUOTA: (&str, &str) = ("iam", "L-FE177D64");
const ROLES_KEY: &str = "Roles";
const ROLES_QUOTA_KEY: &str = "RolesQuota";

/// Collects the number of IAM roles and the corresponding quota from the account summary.
#[derive(Debug)]
pub struct IamCollector {
    base: CollectorBase,
    roles_used: Arc<MetricDescriptor>,
    roles_quota: Arc<MetricDescriptor>,
}

impl IamCollector {
    /// Creates a collector. Only the first region of `settings` is used.
    pub fn new(context: &CollectorContext, settings: &CollectorSettings) -> Self {
        let descriptors = context.descriptors();
        let (service_code, quota_code) = ROLES_QUOTA;
        Self {
            base: CollectorBase::new(Service::Iam, context, settings),
            roles_used: descriptors.gauge("iam_roles_used", "IAM roles used", &[]),
            roles_quota: descriptors.quota_gauge(
                "iam_roles_quota",
                "IAM roles quota",
                &[],
                service_code,
                quota_code,
            ),
        }
    }
}

impl ScrapeSource for IamCollector {
    fn describe(&self) -> Vec<Arc<MetricDescriptor>> {
        vec![self.roles_used.clone(), self.roles_quota.clone()]
    }

    fn snapshot(&self) -> Vec<MetricSample> {
        self.base.cache().snapshot()
    }
}

#[async_trait]
impl Collector for IamCollector {
    fn base(&self) -> &CollectorBase {
        &self.base
    }

    async fn collect_region(&self, client: &CloudClient) {
        let summary = match client.get_account_summary().await {
            Ok(summary) => summary,
            Err(err) => {
                tracing::warn!(region = client.region(), %err, "Failed getting account summary");
                return;
            }
        };

        let get = |key: &str| f64::from(summary.get(key).copied().unwrap_or(0));
        self.base.cache().add_metrics([
            self.roles_used.sample(get(ROLES_KEY), NO_LABELS),
            self.roles_quota.sample(get(ROLES_QUOTA_KEY), NO_LABELS),
        ]);
    }
}

#[cfg(test)]
mod tests {
    use resource_metrics::{Format, ProcessMetrics, Registry};

    use super::*;
    use crate::{cloud::MockCloudApi, collectors::collect_pass};

    fn collector(api: MockCloudApi, metrics: &Arc<ProcessMetrics>) -> Arc<IamCollector> {
        let context =
            CollectorContext::new("123456789012", metrics.clone()).with_api(Arc::new(api));
        Arc::new(IamCollector::new(
            &context,
            &CollectorSettings::new(["us-east-1"]),
        ))
    }

    #[tokio::test]
    async fn collecting_roles() {
        let api = MockCloudApi::new("us-east-1")
            .with_account_summary([("Roles", 87), ("RolesQuota", 1_000), ("Users", 3)]);
        let metrics = Arc::new(ProcessMetrics::new("test"));
        let collector = collector(api, &metrics);
        collect_pass(&collector).await;

        let mut registry = Registry::empty();
        registry.register_source(collector.clone());
        let mut buffer = String::new();
        registry.encode(&mut buffer, Format::Prometheus).unwrap();
        assert!(
            buffer.contains(
                r#"aws_resources_exporter_iam_roles_used{aws_account_id="123456789012"} 87.0"#
            ),
            "{buffer}"
        );
        assert!(
            buffer.contains(r#"quota_code="L-FE177D64""#),
            "{buffer}"
        );
        assert_eq!(metrics.requests(), 1);
    }

    #[tokio::test]
    async fn missing_summary_keys_are_zeros() {
        let api = MockCloudApi::new("us-east-1").with_account_summary([("Users", 3)]);
        let metrics = Arc::new(ProcessMetrics::new("test"));
        let collector = collector(api, &metrics);
        collect_pass(&collector).await;

        let samples = collector.snapshot();
        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|sample| sample.value() == 0.0));
        assert_eq!(metrics.errors(), 0);
    }
}
