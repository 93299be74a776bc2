//! Tests for the collection loop.

use resource_metrics::{Format, MetricSample};
use tokio::sync::Mutex;

use std::sync::atomic::{AtomicUsize, Ordering};

use super::*;
use crate::cloud::{mock::Operation, DbInstance, LogFile, MockCloudApi};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Succeed,
    Hang,
    Panic,
}

/// Collector writing a single sample per region with a scriptable behavior per region.
#[derive(Debug)]
struct TestCollector {
    base: CollectorBase,
    descriptor: Arc<MetricDescriptor>,
    behaviors: HashMap<String, Behavior>,
    passes: AtomicUsize,
    pass_starts: Mutex<Vec<Instant>>,
}

impl TestCollector {
    fn new(
        settings: &CollectorSettings,
        behaviors: &[(&str, Behavior)],
    ) -> (Self, Arc<ProcessMetrics>) {
        let metrics = Arc::new(ProcessMetrics::new("test"));
        let mut context = CollectorContext::new("123456789012", metrics.clone());
        for &(region, _) in behaviors {
            context = context.with_api(Arc::new(MockCloudApi::new(region)));
        }
        let descriptor = context
            .descriptors()
            .gauge("test_region_info", "Region info", &[REGION_LABEL]);
        let this = Self {
            base: CollectorBase::new(Service::Ec2, &context, settings),
            descriptor,
            behaviors: behaviors
                .iter()
                .map(|&(region, behavior)| (region.to_owned(), behavior))
                .collect(),
            passes: AtomicUsize::new(0),
            pass_starts: Mutex::default(),
        };
        (this, metrics)
    }
}

impl ScrapeSource for TestCollector {
    fn describe(&self) -> Vec<Arc<MetricDescriptor>> {
        vec![self.descriptor.clone()]
    }

    fn snapshot(&self) -> Vec<MetricSample> {
        self.base.cache().snapshot()
    }
}

#[async_trait]
impl Collector for TestCollector {
    fn base(&self) -> &CollectorBase {
        &self.base
    }

    async fn collect_region(&self, client: &CloudClient) {
        let region = client.region();
        if region == "us-east-1" {
            // Only the first region tracks passes.
            self.passes.fetch_add(1, Ordering::SeqCst);
            self.pass_starts.lock().await.push(Instant::now());
        }
        match self.behaviors[region] {
            Behavior::Succeed => {}
            Behavior::Hang => tokio::time::sleep(Duration::from_secs(3_600)).await,
            Behavior::Panic => panic!("region task panicked"),
        }
        self.base
            .cache()
            .add_metric(self.descriptor.sample(1.0, [region]));
    }
}

#[tokio::test(start_paused = true)]
async fn pass_collects_all_regions() {
    let settings = CollectorSettings::new(["us-east-1", "eu-west-1"]);
    let behaviors = [("us-east-1", Behavior::Succeed), ("eu-west-1", Behavior::Succeed)];
    let (collector, metrics) = TestCollector::new(&settings, &behaviors);
    let collector = Arc::new(collector);

    assert!(collect_pass(&collector).await);
    let mut regions: Vec<_> = collector
        .snapshot()
        .iter()
        .map(|sample| sample.label(REGION_LABEL).unwrap().to_owned())
        .collect();
    regions.sort_unstable();
    assert_eq!(regions, ["eu-west-1", "us-east-1"]);
    assert_eq!(metrics.errors(), 0);
}

#[tokio::test(start_paused = true)]
async fn timed_out_pass_counts_single_error() {
    let settings = CollectorSettings::new(["us-east-1", "eu-west-1", "ap-south-1"]);
    let behaviors = [
        ("us-east-1", Behavior::Succeed),
        ("eu-west-1", Behavior::Hang),
        ("ap-south-1", Behavior::Hang),
    ];
    let (collector, metrics) = TestCollector::new(&settings, &behaviors);
    let collector = Arc::new(collector);

    let started_at = Instant::now();
    assert!(!collect_pass(&collector).await);
    let elapsed = started_at.elapsed();
    assert!(elapsed >= settings.timeout && elapsed < settings.timeout * 2, "{elapsed:?}");
    assert_eq!(metrics.errors(), 1);
    // Results of the completed region are preserved.
    let samples = collector.snapshot();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].label(REGION_LABEL), Some("us-east-1"));
}

#[tokio::test(start_paused = true)]
async fn panicked_region_is_counted_and_isolated() {
    let settings = CollectorSettings::new(["us-east-1", "eu-west-1"]);
    let behaviors = [("us-east-1", Behavior::Succeed), ("eu-west-1", Behavior::Panic)];
    let (collector, metrics) = TestCollector::new(&settings, &behaviors);
    let collector = Arc::new(collector);

    assert!(collect_pass(&collector).await);
    assert_eq!(metrics.errors(), 1);
    assert_eq!(collector.snapshot().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn collector_loop_respects_interval_and_stops() {
    let mut settings = CollectorSettings::new(["us-east-1"]);
    settings.interval = Duration::from_secs(15);
    let (collector, _) = TestCollector::new(&settings, &[("us-east-1", Behavior::Succeed)]);
    let collector = Arc::new(collector);

    let (stop_sender, stop_receiver) = watch::channel(false);
    let loop_task = tokio::spawn(run_collector(collector.clone(), stop_receiver));
    tokio::time::sleep(Duration::from_secs(50)).await;
    stop_sender.send_replace(true);
    loop_task.await.unwrap();

    // Passes at 0s, 15s, 30s and 45s.
    assert_eq!(collector.passes.load(Ordering::SeqCst), 4);
    let starts = collector.pass_starts.lock().await;
    for window in starts.windows(2) {
        let between_passes = window[1] - window[0];
        let max_drift = Duration::from_millis(10);
        assert!(between_passes >= settings.interval, "{between_passes:?}");
        assert!(between_passes <= settings.interval + max_drift, "{between_passes:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn collector_loop_stops_when_sender_is_dropped() {
    let settings = CollectorSettings::new(["us-east-1"]);
    let (collector, _) = TestCollector::new(&settings, &[("us-east-1", Behavior::Succeed)]);
    let (stop_sender, stop_receiver) = watch::channel(false);
    let loop_task = tokio::spawn(run_collector(Arc::new(collector), stop_receiver));
    drop(stop_sender);
    tokio::time::timeout(Duration::from_secs(60), loop_task)
        .await
        .expect("collector loop has not stopped")
        .unwrap();
}

#[test]
fn clients_are_created_only_for_known_regions() {
    let metrics = Arc::new(ProcessMetrics::new("test"));
    let context = CollectorContext::new("123456789012", metrics)
        .with_api(Arc::new(MockCloudApi::new("us-east-1")));
    let settings = CollectorSettings::new(["us-east-1", "eu-west-1"]);
    let base = CollectorBase::new(Service::Vpc, &context, &settings);
    assert_eq!(base.clients().len(), 1);
    assert_eq!(base.clients()[0].region(), "us-east-1");
}

#[test]
fn descriptors_have_common_constant_labels() {
    let factory = DescriptorFactory::new("123456789012");
    let gauge = factory.gauge("vpc_vpcsperregion_usage", "VPCs", &[REGION_LABEL]);
    assert_eq!(gauge.name(), "aws_resources_exporter_vpc_vpcsperregion_usage");
    assert_eq!(
        gauge.const_labels(),
        [(ACCOUNT_ID_LABEL.to_owned(), "123456789012".to_owned())]
    );

    let quota =
        factory.quota_gauge("vpc_vpcsperregion_quota", "VPCs quota", &[], "vpc", "L-F678F1CE");
    let const_labels = quota.const_labels();
    assert_eq!(const_labels.len(), 3);
    assert!(const_labels.contains(&("service_code".to_owned(), "vpc".to_owned())));
    assert!(const_labels.contains(&("quota_code".to_owned(), "L-F678F1CE".to_owned())));
}

const CONFIG: &str = r#"
rds:
  enabled: true
  regions: ["us-east-1", "eu-west-1"]
vpc:
  enabled: true
  region: eu-west-1
iam:
  enabled: true
msk:
  enabled: false
  region: us-east-1
"#;

#[tokio::test]
async fn building_collectors_from_config() {
    let config = Config::from_yaml(CONFIG).unwrap();
    let metrics = Arc::new(ProcessMetrics::new(NAMESPACE));
    let context = CollectorContext::new("123456789012", metrics.clone())
        .with_api(Arc::new(MockCloudApi::new("us-east-1")))
        .with_api(Arc::new(MockCloudApi::new("eu-west-1")));
    let collectors = CollectorSet::from_config(&config, &context, BuildOptions::default()).unwrap();
    assert_eq!(
        collectors.services(),
        [Service::Rds, Service::Vpc, Service::Iam]
    );

    let mut registry = Registry::empty();
    registry.register_source(metrics);
    collectors.register(&mut registry);
    assert_eq!(registry.source_count(), 4);

    collectors.collect_once().await;
    let mut buffer = String::new();
    registry.encode(&mut buffer, Format::Prometheus).unwrap();
    assert!(
        buffer.contains("# TYPE aws_resources_exporter_vpc_vpcsperregion_usage gauge"),
        "{buffer}"
    );
    assert!(
        buffer.contains(
            r#"aws_resources_exporter_vpc_vpcsperregion_usage{aws_account_id="123456789012",aws_region="eu-west-1"} 0.0"#
        ),
        "{buffer}"
    );
    // Quotas are not configured in mocks, so all 6 VPC quota lookups have failed.
    assert!(buffer.contains("aws_resources_exporter_api_errors 6.0"), "{buffer}");
}

#[tokio::test]
async fn log_files_memo_is_shared_via_build_options() {
    let config = Config::from_yaml("rds:\n  enabled: true\n  region: us-east-1\n").unwrap();
    let instance = DbInstance {
        identifier: "db-1".to_owned(),
        ..DbInstance::default()
    };
    let log_file = LogFile {
        name: "error/postgresql.log".to_owned(),
        size: 512,
    };
    let api = Arc::new(
        MockCloudApi::new("us-east-1")
            .with_db_instances([instance])
            .with_log_files("db-1", vec![log_file]),
    );
    let memo = Arc::new(TtlMemo::new());
    let options = BuildOptions {
        memo: Some(memo.clone()),
        ..BuildOptions::default()
    };

    // Two collector sets built from the same options share the memo.
    for _ in 0..2 {
        let metrics = Arc::new(ProcessMetrics::new(NAMESPACE));
        let context = CollectorContext::new("123456789012", metrics).with_api(api.clone());
        let collectors = CollectorSet::from_config(&config, &context, options.clone()).unwrap();
        collectors.collect_once().await;
    }

    assert_eq!(api.call_count(Operation::DescribeDbLogFiles), 1);
    let summary = memo.get("us-east-1-db-1-logfiles").unwrap();
    assert_eq!(summary.count, 1);
    assert_eq!(summary.total_size, 512);
}
