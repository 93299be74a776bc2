//! Per-service periodic collectors.
//!
//! Every collector owns a [`MetricCache`], a set of descriptors and one [`CloudClient`] per region.
//! Its background loop ([`run_collector()`]) runs collection passes: each pass fans out to
//! per-region tasks and is bounded by the configured timeout. Scrapes read the cache only.

use async_trait::async_trait;
use resource_metrics::{
    MetricCache, MetricDescriptor, ProcessMetrics, Registry, ScrapeSource, TtlMemo,
};
use tokio::{
    sync::watch,
    task::{JoinHandle, JoinSet},
    time::Instant,
};

use std::{collections::HashMap, sync::Arc, time::Duration};

use crate::{
    cloud::{CloudApi, CloudClient},
    config::{CollectorSettings, Config, ConfigError, Service, ServiceConfig},
    env::LogsMetricsSettings,
    eol::default_thresholds,
    max_connections::MaxConnectionsTable,
};

pub use self::{
    ec2::Ec2Collector, elasticache::ElasticacheCollector, iam::IamCollector, msk::MskCollector,
    rds::{instance_id_from_arn, ArnError, LogFilesSummary, RdsCollector, RdsOptions},
    route53::Route53Collector,
    vpc::VpcCollector,
};

mod ec2;
mod elasticache;
mod iam;
mod msk;
mod rds;
mod route53;
mod vpc;

/// Prefix of all exported metric names.
pub const NAMESPACE: &str = "aws_resources_exporter";
/// Constant label with the account ID attached to all metrics.
pub const ACCOUNT_ID_LABEL: &str = "aws_account_id";
const REGION_LABEL: &str = "aws_region";

/// Creates descriptors with the common name prefix and constant labels.
#[derive(Debug, Clone)]
pub struct DescriptorFactory {
    account_id: String,
}

impl DescriptorFactory {
    /// Creates a factory for the specified account.
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
        }
    }

    /// Returns the account ID.
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Creates a gauge descriptor named `{NAMESPACE}_{name}`.
    pub fn gauge(&self, name: &str, help: &str, labels: &[&str]) -> Arc<MetricDescriptor> {
        MetricDescriptor::gauge(format!("{NAMESPACE}_{name}"), help)
            .with_labels(labels.iter().copied())
            .with_const_label(ACCOUNT_ID_LABEL, &self.account_id)
            .build()
    }

    /// Creates a counter descriptor named `{NAMESPACE}_{name}`.
    pub fn counter(&self, name: &str, help: &str, labels: &[&str]) -> Arc<MetricDescriptor> {
        MetricDescriptor::counter(format!("{NAMESPACE}_{name}"), help)
            .with_labels(labels.iter().copied())
            .with_const_label(ACCOUNT_ID_LABEL, &self.account_id)
            .build()
    }

    /// Creates a gauge descriptor for a service quota, with `service_code` and `quota_code`
    /// constant labels.
    pub fn quota_gauge(
        &self,
        name: &str,
        help: &str,
        labels: &[&str],
        service_code: &str,
        quota_code: &str,
    ) -> Arc<MetricDescriptor> {
        MetricDescriptor::gauge(format!("{NAMESPACE}_{name}"), help)
            .with_labels(labels.iter().copied())
            .with_const_label(ACCOUNT_ID_LABEL, &self.account_id)
            .with_const_label("service_code", service_code)
            .with_const_label("quota_code", quota_code)
            .build()
    }
}

const NO_LABELS: [&str; 0] = [];

/// Gauge populated from a single service quota.
#[derive(Debug)]
struct QuotaMetric {
    service_code: &'static str,
    quota_code: &'static str,
    descriptor: Arc<MetricDescriptor>,
}

impl QuotaMetric {
    fn new(
        descriptors: &DescriptorFactory,
        name: &str,
        help: &str,
        labels: &[&str],
        (service_code, quota_code): (&'static str, &'static str),
    ) -> Self {
        Self {
            service_code,
            quota_code,
            descriptor: descriptors.quota_gauge(name, help, labels, service_code, quota_code),
        }
    }

    async fn collect(&self, base: &CollectorBase, client: &CloudClient, label_values: &[&str]) {
        match client
            .get_service_quota(self.service_code, self.quota_code)
            .await
        {
            Ok(value) => {
                let sample = self.descriptor.sample(value, label_values.iter().copied());
                base.cache().add_metric(sample);
            }
            Err(err) => {
                tracing::warn!(
                    service = %base.service(),
                    region = client.region(),
                    quota_code = self.quota_code,
                    %err,
                    "Failed getting service quota"
                );
            }
        }
    }
}

/// Dependencies shared by all collectors: descriptor factory, process metrics and
/// per-region cloud APIs.
#[derive(Debug)]
pub struct CollectorContext {
    descriptors: DescriptorFactory,
    process_metrics: Arc<ProcessMetrics>,
    apis: HashMap<String, Arc<dyn CloudApi>>,
}

impl CollectorContext {
    /// Creates a context without any APIs.
    pub fn new(account_id: &str, process_metrics: Arc<ProcessMetrics>) -> Self {
        Self {
            descriptors: DescriptorFactory::new(account_id),
            process_metrics,
            apis: HashMap::new(),
        }
    }

    /// Adds an API; its region is taken from [`CloudApi::region()`].
    #[must_use]
    pub fn with_api(mut self, api: Arc<dyn CloudApi>) -> Self {
        self.apis.insert(api.region().to_owned(), api);
        self
    }

    /// Returns the descriptor factory.
    pub fn descriptors(&self) -> &DescriptorFactory {
        &self.descriptors
    }

    /// Returns shared process metrics.
    pub fn process_metrics(&self) -> &Arc<ProcessMetrics> {
        &self.process_metrics
    }

    fn clients(&self, service: Service, regions: &[String]) -> Vec<CloudClient> {
        regions
            .iter()
            .filter_map(|region| {
                let api = self.apis.get(region);
                if api.is_none() {
                    tracing::warn!(
                        %service,
                        region = region.as_str(),
                        "No cloud API configured for region; skipping"
                    );
                }
                let api = Arc::clone(api?);
                Some(CloudClient::new(api, Arc::clone(&self.process_metrics)))
            })
            .collect()
    }
}

/// State common to all collectors.
#[derive(Debug)]
pub struct CollectorBase {
    service: Service,
    interval: Duration,
    timeout: Duration,
    clients: Vec<CloudClient>,
    cache: MetricCache,
    process_metrics: Arc<ProcessMetrics>,
}

impl CollectorBase {
    fn new(service: Service, context: &CollectorContext, settings: &CollectorSettings) -> Self {
        Self {
            service,
            interval: settings.interval,
            timeout: settings.timeout,
            clients: context.clients(service, &settings.regions),
            cache: MetricCache::new(settings.cache_ttl),
            process_metrics: Arc::clone(&context.process_metrics),
        }
    }

    /// Returns the service of the collector.
    pub fn service(&self) -> Service {
        self.service
    }

    /// Returns the interval between pass starts.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the pass timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns per-region clients.
    pub fn clients(&self) -> &[CloudClient] {
        &self.clients
    }

    /// Returns the cache with collected samples.
    pub fn cache(&self) -> &MetricCache {
        &self.cache
    }

    /// Records an error not surfaced by a [`CloudClient`] (e.g., a domain validation failure).
    pub fn record_error(&self) {
        self.process_metrics.record_error();
    }
}

/// Periodic collector of a single service.
#[async_trait]
pub trait Collector: ScrapeSource {
    /// Returns the common collector state.
    fn base(&self) -> &CollectorBase;

    /// Collects metrics for a single region and writes them to the cache. Must not panic
    /// on upstream errors; errors are logged and counted instead.
    async fn collect_region(&self, client: &CloudClient);
}

async fn collect_all_regions<C: Collector + ?Sized>(collector: &Arc<C>) {
    let service = collector.base().service();
    let mut tasks = JoinSet::new();
    for client in collector.base().clients() {
        let collector = Arc::clone(collector);
        let client = client.clone();
        tasks.spawn(async move {
            collector.collect_region(&client).await;
        });
    }

    while let Some(result) = tasks.join_next().await {
        if let Err(err) = result {
            if err.is_panic() {
                tracing::error!(%service, %err, "Region collection task panicked");
                collector.base().record_error();
            }
        }
    }
}

/// Runs a single collection pass bounded by the collector timeout. Returns `false`
/// if the pass has timed out; in this case, in-flight calls are cancelled and a single
/// error is recorded.
pub async fn collect_pass<C: Collector + ?Sized>(collector: &Arc<C>) -> bool {
    let base = collector.base();
    let service = base.service();
    let started_at = Instant::now();
    let pass = tokio::time::timeout(base.timeout(), collect_all_regions(collector));
    if pass.await.is_ok() {
        let elapsed = started_at.elapsed();
        tracing::debug!(%service, ?elapsed, "Finished collection pass in {elapsed:?}");
        true
    } else {
        tracing::warn!(
            %service,
            timeout = ?base.timeout(),
            "Collection pass timed out after {:?}",
            base.timeout()
        );
        base.record_error();
        false
    }
}

/// Runs collection passes until `stop_receiver` is signalled. Passes start every `interval`
/// (or immediately after the previous one if it took longer).
pub async fn run_collector<C: Collector + ?Sized>(
    collector: Arc<C>,
    mut stop_receiver: watch::Receiver<bool>,
) {
    let service = collector.base().service();
    let regions: Vec<_> = collector
        .base()
        .clients()
        .iter()
        .map(CloudClient::region)
        .collect();
    tracing::info!(%service, ?regions, "Starting collector");

    while !*stop_receiver.borrow() {
        let started_at = Instant::now();
        collect_pass(&collector).await;

        let sleep = collector
            .base()
            .interval()
            .saturating_sub(started_at.elapsed());
        tokio::select! {
            () = tokio::time::sleep(sleep) => {}
            res = stop_receiver.changed() => {
                if res.is_err() {
                    break; // stop sender is dropped
                }
            }
        }
    }
    tracing::info!(%service, "Collector stopped");
}

/// Options for building collectors from configuration.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Settings of database log-file collection.
    pub logs: LogsMetricsSettings,
    /// Max connections lookup table.
    pub max_connections: MaxConnectionsTable,
    /// Process-wide memo of database log file summaries. If not set, the database collector
    /// creates its own memo.
    pub memo: Option<Arc<TtlMemo<LogFilesSummary>>>,
}

/// Set of collectors, each both a scrape source and a background task.
#[derive(Debug, Default)]
pub struct CollectorSet {
    collectors: Vec<Arc<dyn Collector>>,
    sources: Vec<Arc<dyn ScrapeSource>>,
}

impl CollectorSet {
    /// Builds collectors for all enabled services in `config`.
    ///
    /// # Errors
    ///
    /// Returns configuration validation errors.
    pub fn from_config(
        config: &Config,
        context: &CollectorContext,
        options: BuildOptions,
    ) -> Result<Self, ConfigError> {
        let mut set = Self::default();
        for service in Service::ALL {
            let Some(settings) = config.settings(service)? else {
                tracing::info!(%service, "Service is disabled");
                continue;
            };
            let section = config.service(service);
            let eol_table = section.map(ServiceConfig::eol_table).unwrap_or_default();
            let thresholds = section.map_or_else(default_thresholds, ServiceConfig::thresholds);
            match service {
                Service::Rds => {
                    let options = RdsOptions {
                        logs: options.logs,
                        max_connections: options.max_connections.clone(),
                        eol_table,
                        thresholds,
                        memo: options.memo.clone(),
                    };
                    set.push(RdsCollector::new(context, &settings, options));
                }
                Service::Vpc => set.push(VpcCollector::new(context, &settings)),
                Service::Ec2 => set.push(Ec2Collector::new(context, &settings)),
                Service::Route53 => set.push(Route53Collector::new(context, &settings)),
                Service::Elasticache => set.push(ElasticacheCollector::new(context, &settings)),
                Service::Msk => set.push(MskCollector::new(
                    context,
                    &settings,
                    eol_table,
                    thresholds,
                )),
                Service::Iam => set.push(IamCollector::new(context, &settings)),
            }
        }
        Ok(set)
    }

    /// Adds a collector.
    pub fn push<C: Collector>(&mut self, collector: C) {
        let collector = Arc::new(collector);
        self.sources.push(collector.clone());
        self.collectors.push(collector);
    }

    /// Returns the number of collectors.
    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    /// Checks whether this set is empty.
    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    /// Returns services of all collectors in this set.
    pub fn services(&self) -> Vec<Service> {
        self.collectors
            .iter()
            .map(|collector| collector.base().service())
            .collect()
    }

    /// Registers all collectors as scrape sources.
    pub fn register(&self, registry: &mut Registry) {
        for source in &self.sources {
            registry.register_source(Arc::clone(source));
        }
    }

    /// Runs a single pass of every collector concurrently.
    pub async fn collect_once(&self) {
        let passes = self.collectors.iter().map(collect_pass);
        futures::future::join_all(passes).await;
    }

    /// Spawns background loops of all collectors.
    pub fn spawn(&self, stop_receiver: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        self.collectors
            .iter()
            .map(|collector| tokio::spawn(run_collector(collector.clone(), stop_receiver.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests;
