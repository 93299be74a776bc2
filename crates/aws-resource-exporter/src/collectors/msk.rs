//! End-of-life status of streaming clusters.

use async_trait::async_trait;
use chrono::Utc;
use resource_metrics::{MetricDescriptor, MetricSample, ScrapeSource};

use std::sync::Arc;

use super::{Collector, CollectorBase, CollectorContext, REGION_LABEL};
use crate::{
    cloud::CloudClient,
    config::{CollectorSettings, Service},
    eol::{classify, EolTable, Threshold},
};

const NO_EOL_DATE: &str = "no-eol-date";
const UNKNOWN_STATUS: &str = "unknown";

/// Collects EOL info for streaming clusters. Unlike databases, clusters with a version
/// missing from the EOL table are reported with the `unknown` status.
#[derive(Debug)]
pub struct MskCollector {
    base: CollectorBase,
    eol_table: EolTable,
    thresholds: Vec<Threshold>,
    eol_info: Arc<MetricDescriptor>,
}

impl MskCollector {
    /// Creates a collector.
    pub fn new(
        context: &CollectorContext,
        settings: &CollectorSettings,
        eol_table: EolTable,
        thresholds: Vec<Threshold>,
    ) -> Self {
        Self {
            base: CollectorBase::new(Service::Msk, context, settings),
            eol_table,
            thresholds,
            eol_info: context.descriptors().gauge(
                "msk_eol_info",
                "EOL date and status of the cluster version",
                &[REGION_LABEL, "cluster_name", "msk_version", "eol_date", "eol_status"],
            ),
        }
    }
}

impl ScrapeSource for MskCollector {
    fn describe(&self) -> Vec<Arc<MetricDescriptor>> {
        vec![self.eol_info.clone()]
    }

    fn snapshot(&self) -> Vec<MetricSample> {
        self.base.cache().snapshot()
    }
}

#[async_trait]
impl Collector for MskCollector {
    fn base(&self) -> &CollectorBase {
        &self.base
    }

    async fn collect_region(&self, client: &CloudClient) {
        let region = client.region();
        let clusters = match client.list_streaming_clusters().await {
            Ok(clusters) => clusters,
            Err(err) => {
                tracing::warn!(region, %err, "Failed listing streaming clusters");
                return;
            }
        };

        let now = Utc::now();
        for cluster in &clusters {
            let (eol_date, eol_status) = match self.eol_table.find_by_version(&cluster.version) {
                Some(eol_date) => match classify(eol_date, &self.thresholds, now) {
                    Ok(status) => (eol_date, status),
                    Err(err) => {
                        tracing::warn!(
                            region,
                            cluster = %cluster.name,
                            version = %cluster.version,
                            %err,
                            "Failed classifying EOL date"
                        );
                        self.base.record_error();
                        continue;
                    }
                },
                None => (NO_EOL_DATE, UNKNOWN_STATUS.to_owned()),
            };

            let sample = self.eol_info.sample(
                1.0,
                [
                    region,
                    cluster.name.as_str(),
                    cluster.version.as_str(),
                    eol_date,
                    eol_status.as_str(),
                ],
            );
            self.base.cache().add_metric(sample);
        }
    }
}
