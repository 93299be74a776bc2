//! Database instances: inventory, log files, pending maintenance and EOL status.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use resource_metrics::{MetricDescriptor, MetricSample, ScrapeSource, TtlMemo};
use tokio::sync::Semaphore;

use std::{collections::HashSet, error, fmt, sync::Arc};

use super::{Collector, CollectorBase, CollectorContext, REGION_LABEL};
use crate::{
    cloud::{CloudClient, DbInstance, LogFile, MaintenanceAction},
    config::{CollectorSettings, Service},
    env::LogsMetricsSettings,
    eol::{classify, EolTable, Threshold},
    max_connections::MaxConnectionsTable,
};

const INSTANCE_LABEL: &str = "dbinstance_identifier";
const BYTES_IN_GIB: i64 = 1 << 30;
/// Index of the resource ID in a colon-delimited ARN.
const ARN_RESOURCE_ID_INDEX: usize = 6;

/// ARN without a resource ID segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArnError {
    arn: String,
}

impl fmt::Display for ArnError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "ARN `{}` has fewer than {} segments",
            self.arn,
            ARN_RESOURCE_ID_INDEX + 1
        )
    }
}

impl error::Error for ArnError {}

/// Extracts the instance ID from an ARN like `arn:aws:rds:us-east-1:123456789012:db:my-db`.
///
/// # Errors
///
/// Returns an error if the ARN has too few segments.
pub fn instance_id_from_arn(arn: &str) -> Result<&str, ArnError> {
    arn.split(':')
        .nth(ARN_RESOURCE_ID_INDEX)
        .ok_or_else(|| ArnError {
            arn: arn.to_owned(),
        })
}

/// Memoized summary of instance log files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogFilesSummary {
    /// Number of log files.
    pub count: usize,
    /// Total size of log files in bytes.
    pub total_size: i64,
}

impl LogFilesSummary {
    fn new(files: &[LogFile]) -> Self {
        Self {
            count: files.len(),
            total_size: files.iter().map(|file| file.size).sum(),
        }
    }
}

/// Options of [`RdsCollector`].
#[derive(Debug, Clone, Default)]
pub struct RdsOptions {
    /// Log file collection settings.
    pub logs: LogsMetricsSettings,
    /// Max connections per instance class.
    pub max_connections: MaxConnectionsTable,
    /// EOL dates of engine versions.
    pub eol_table: EolTable,
    /// EOL classification thresholds.
    pub thresholds: Vec<Threshold>,
    /// Memo for log file lookups. If not set, the collector creates its own memo.
    pub memo: Option<Arc<TtlMemo<LogFilesSummary>>>,
}

#[derive(Debug)]
struct RdsDescriptors {
    allocated_storage: Arc<MetricDescriptor>,
    instance_status: Arc<MetricDescriptor>,
    engine_version: Arc<MetricDescriptor>,
    instance_class: Arc<MetricDescriptor>,
    publicly_accessible: Arc<MetricDescriptor>,
    storage_encrypted: Arc<MetricDescriptor>,
    latest_restorable_time: Arc<MetricDescriptor>,
    max_connections: Arc<MetricDescriptor>,
    max_connections_mapping_error: Arc<MetricDescriptor>,
    logs_amount: Arc<MetricDescriptor>,
    logs_storage_size: Arc<MetricDescriptor>,
    pending_maintenance: Arc<MetricDescriptor>,
    eol_info: Arc<MetricDescriptor>,
}

impl RdsDescriptors {
    fn new(context: &CollectorContext) -> Self {
        let descriptors = context.descriptors();
        let per_instance = [REGION_LABEL, INSTANCE_LABEL];
        Self {
            allocated_storage: descriptors.gauge(
                "rds_allocatedstorage",
                "The amount of allocated storage in bytes",
                &per_instance,
            ),
            instance_status: descriptors.gauge(
                "rds_dbinstancestatus",
                "The instance status",
                &[REGION_LABEL, INSTANCE_LABEL, "instance_status"],
            ),
            engine_version: descriptors.gauge(
                "rds_engineversion",
                "The database engine type and version",
                &[REGION_LABEL, INSTANCE_LABEL, "engine", "engine_version"],
            ),
            instance_class: descriptors.gauge(
                "rds_dbinstanceclass",
                "The instance class",
                &[REGION_LABEL, INSTANCE_LABEL, "instance_class"],
            ),
            publicly_accessible: descriptors.gauge(
                "rds_publicly_accessible",
                "Indicates if the instance is publicly accessible",
                &per_instance,
            ),
            storage_encrypted: descriptors.gauge(
                "rds_storage_encrypted",
                "Indicates if the instance storage is encrypted",
                &per_instance,
            ),
            latest_restorable_time: descriptors.counter(
                "rds_latestrestorabletime",
                "Latest restorable time as a Unix timestamp",
                &per_instance,
            ),
            max_connections: descriptors.gauge(
                "rds_maxconnections",
                "The max connections of the instance",
                &per_instance,
            ),
            max_connections_mapping_error: descriptors.gauge(
                "rds_maxconnections_mapping_error",
                "Indicates that max connections are unknown for the instance class",
                &[REGION_LABEL, INSTANCE_LABEL, "instance_class"],
            ),
            logs_amount: descriptors.gauge(
                "rds_logs_amount",
                "The number of log files of the instance",
                &per_instance,
            ),
            logs_storage_size: descriptors.gauge(
                "rds_logsstorage_size_bytes",
                "The total size of log files of the instance in bytes",
                &per_instance,
            ),
            pending_maintenance: descriptors.gauge(
                "rds_pendingmaintenanceactions",
                "Pending maintenance actions of the instance",
                &[
                    REGION_LABEL,
                    INSTANCE_LABEL,
                    "action",
                    "auto_apply_after",
                    "current_apply_date",
                    "description",
                ],
            ),
            eol_info: descriptors.gauge(
                "rds_eol_info",
                "EOL date and status of the engine version",
                &[
                    REGION_LABEL,
                    INSTANCE_LABEL,
                    "engine",
                    "engine_version",
                    "eol_date",
                    "eol_status",
                ],
            ),
        }
    }

    fn all(&self) -> Vec<Arc<MetricDescriptor>> {
        [
            &self.allocated_storage,
            &self.instance_status,
            &self.engine_version,
            &self.instance_class,
            &self.publicly_accessible,
            &self.storage_encrypted,
            &self.latest_restorable_time,
            &self.max_connections,
            &self.max_connections_mapping_error,
            &self.logs_amount,
            &self.logs_storage_size,
            &self.pending_maintenance,
            &self.eol_info,
        ]
        .into_iter()
        .cloned()
        .collect()
    }
}

fn format_date(date: Option<DateTime<Utc>>) -> String {
    date.map(|date| date.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

/// Collects database instance metrics.
#[derive(Debug)]
pub struct RdsCollector {
    base: CollectorBase,
    descriptors: RdsDescriptors,
    logs: LogsMetricsSettings,
    max_connections: MaxConnectionsTable,
    eol_table: EolTable,
    thresholds: Vec<Threshold>,
    memo: Arc<TtlMemo<LogFilesSummary>>,
}

impl RdsCollector {
    /// Creates a collector.
    pub fn new(
        context: &CollectorContext,
        settings: &CollectorSettings,
        options: RdsOptions,
    ) -> Self {
        Self {
            base: CollectorBase::new(Service::Rds, context, settings),
            descriptors: RdsDescriptors::new(context),
            logs: options.logs,
            max_connections: options.max_connections,
            eol_table: options.eol_table,
            thresholds: options.thresholds,
            memo: options.memo.unwrap_or_default(),
        }
    }

    fn collect_inventory(&self, region: &str, instances: &[DbInstance]) {
        let now = Utc::now();
        for instance in instances {
            self.collect_instance(region, instance, now);
        }
    }

    fn collect_instance(&self, region: &str, instance: &DbInstance, now: DateTime<Utc>) {
        let descriptors = &self.descriptors;
        let id = instance.identifier.as_str();
        let labels = [region, id];
        let allocated_storage = i64::from(instance.allocated_storage_gb) * BYTES_IN_GIB;

        let mut samples = vec![
            descriptors
                .allocated_storage
                .sample(allocated_storage as f64, labels),
            descriptors
                .instance_status
                .sample(1.0, [region, id, instance.status.as_str()]),
            descriptors.engine_version.sample(
                1.0,
                [
                    region,
                    id,
                    instance.engine.as_str(),
                    instance.engine_version.as_str(),
                ],
            ),
            descriptors
                .instance_class
                .sample(1.0, [region, id, instance.instance_class.as_str()]),
            descriptors
                .publicly_accessible
                .sample(flag(instance.publicly_accessible), labels),
            descriptors
                .storage_encrypted
                .sample(flag(instance.storage_encrypted), labels),
        ];

        if let Some(time) = instance.latest_restorable_time {
            let timestamp = time.timestamp() as f64;
            samples.push(descriptors.latest_restorable_time.sample(timestamp, labels));
        }

        let class_labels = [region, id, instance.instance_class.as_str()];
        let max_connections = self
            .max_connections
            .lookup(&instance.instance_class, instance.parameter_group.as_deref());
        if let Some(max_connections) = max_connections {
            samples.push(
                descriptors
                    .max_connections
                    .sample(max_connections as f64, labels),
            );
            samples.push(
                descriptors
                    .max_connections_mapping_error
                    .sample(0.0, class_labels),
            );
        } else {
            tracing::debug!(
                region,
                instance = id,
                class = %instance.instance_class,
                "Max connections are unknown for instance class"
            );
            samples.push(
                descriptors
                    .max_connections_mapping_error
                    .sample(1.0, class_labels),
            );
        }

        if let Some(sample) = self.eol_sample(region, instance, now) {
            samples.push(sample);
        }
        self.base.cache().add_metrics(samples);
    }

    fn eol_sample(
        &self,
        region: &str,
        instance: &DbInstance,
        now: DateTime<Utc>,
    ) -> Option<MetricSample> {
        let eol_date = self
            .eol_table
            .find(&instance.engine, &instance.engine_version)?;
        let status = match classify(eol_date, &self.thresholds, now) {
            Ok(status) => status,
            Err(err) => {
                tracing::warn!(
                    region,
                    instance = %instance.identifier,
                    engine = %instance.engine,
                    version = %instance.engine_version,
                    %err,
                    "Failed classifying EOL date"
                );
                self.base.record_error();
                return None;
            }
        };
        Some(self.descriptors.eol_info.sample(
            1.0,
            [
                region,
                instance.identifier.as_str(),
                instance.engine.as_str(),
                instance.engine_version.as_str(),
                eol_date,
                status.as_str(),
            ],
        ))
    }

    async fn collect_log_files(&self, client: &CloudClient, instances: &[DbInstance]) {
        let semaphore = Semaphore::new(self.logs.workers);
        let lookups = instances
            .iter()
            .map(|instance| self.collect_instance_logs(client, &semaphore, &instance.identifier));
        futures::future::join_all(lookups).await;
    }

    async fn collect_instance_logs(
        &self,
        client: &CloudClient,
        semaphore: &Semaphore,
        instance_id: &str,
    ) {
        let region = client.region();
        let memo_key = format!("{region}-{instance_id}-logfiles");
        let summary = match self.memo.get(&memo_key) {
            Ok(summary) => summary,
            Err(miss) => {
                tracing::debug!(region, instance = instance_id, %miss, "Fetching log files");
                let files = {
                    // The semaphore is local and never closed.
                    let Ok(_permit) = semaphore.acquire().await else {
                        return;
                    };
                    client.describe_db_log_files(instance_id).await
                };
                match files {
                    Ok(files) => {
                        let summary = LogFilesSummary::new(&files);
                        self.memo.store(memo_key, summary, self.logs.ttl_secs);
                        summary
                    }
                    Err(err) => {
                        tracing::warn!(
                            region,
                            instance = instance_id,
                            %err,
                            "Failed describing log files"
                        );
                        return;
                    }
                }
            }
        };

        let labels = [region, instance_id];
        self.base.cache().add_metrics([
            self.descriptors
                .logs_amount
                .sample(summary.count as f64, labels),
            self.descriptors
                .logs_storage_size
                .sample(summary.total_size as f64, labels),
        ]);
    }

    fn maintenance_sample(
        &self,
        region: &str,
        instance_id: &str,
        action: &MaintenanceAction,
    ) -> MetricSample {
        let auto_apply_after = format_date(action.auto_apply_after);
        let current_apply_date = format_date(action.current_apply_date);
        self.descriptors.pending_maintenance.sample(
            1.0,
            [
                region,
                instance_id,
                action.action.as_str(),
                auto_apply_after.as_str(),
                current_apply_date.as_str(),
                action.description.as_str(),
            ],
        )
    }

    async fn collect_pending_maintenance(&self, client: &CloudClient, instances: &[DbInstance]) {
        let region = client.region();
        let pending = match client.describe_pending_maintenance_actions().await {
            Ok(pending) => pending,
            Err(err) => {
                tracing::warn!(region, %err, "Failed describing pending maintenance actions");
                return;
            }
        };

        let mut instances_with_actions = HashSet::new();
        let mut samples = vec![];
        for resource in &pending {
            let instance_id = match instance_id_from_arn(&resource.resource_arn) {
                Ok(id) => id,
                Err(err) => {
                    tracing::warn!(
                        region,
                        arn = %resource.resource_arn,
                        %err,
                        "Malformed resource ARN in pending maintenance actions"
                    );
                    self.base.record_error();
                    continue;
                }
            };

            for action in &resource.actions {
                samples.push(self.maintenance_sample(region, instance_id, action));
            }
            if !resource.actions.is_empty() {
                instances_with_actions.insert(instance_id);
            }
        }

        let without_actions = instances
            .iter()
            .filter(|instance| !instances_with_actions.contains(instance.identifier.as_str()));
        for instance in without_actions {
            let labels = [region, instance.identifier.as_str(), "", "", "", ""];
            samples.push(self.descriptors.pending_maintenance.sample(0.0, labels));
        }
        self.base.cache().add_metrics(samples);
    }
}

impl ScrapeSource for RdsCollector {
    fn describe(&self) -> Vec<Arc<MetricDescriptor>> {
        self.descriptors.all()
    }

    fn snapshot(&self) -> Vec<MetricSample> {
        self.base.cache().snapshot()
    }
}

#[async_trait]
impl Collector for RdsCollector {
    fn base(&self) -> &CollectorBase {
        &self.base
    }

    async fn collect_region(&self, client: &CloudClient) {
        let region = client.region();
        let instances = match client.describe_db_instances().await {
            Ok(instances) => instances,
            Err(err) => {
                tracing::warn!(region, %err, "Failed describing database instances");
                return;
            }
        };
        tracing::debug!(region, count = instances.len(), "Described database instances");

        self.collect_inventory(region, &instances);
        tokio::join!(
            self.collect_log_files(client, &instances),
            self.collect_pending_maintenance(client, &instances),
        );
    }
}

#[cfg(test)]
mod tests;
