use assert_matches::assert_matches;
use chrono::TimeZone;
use resource_metrics::ProcessMetrics;
use tracing::subscriber::Subscriber;
use tracing_capture::{CaptureLayer, SharedStorage};
use tracing_subscriber::layer::SubscriberExt;

use std::time::Duration;

use super::*;
use crate::{
    cloud::{mock::Operation, ApiError, MockCloudApi, PendingMaintenance},
    collectors::collect_pass,
    eol::{default_thresholds, EolInfo},
};

const REGION: &str = "us-east-1";

fn instance(id: &str) -> DbInstance {
    DbInstance {
        identifier: id.to_owned(),
        allocated_storage_gb: 20,
        status: "available".to_owned(),
        engine: "postgres".to_owned(),
        engine_version: "13.7".to_owned(),
        instance_class: "db.t3.micro".to_owned(),
        publicly_accessible: false,
        storage_encrypted: true,
        latest_restorable_time: None,
        parameter_group: Some("default.postgres13".to_owned()),
    }
}

fn max_connections() -> MaxConnectionsTable {
    MaxConnectionsTable::from_json(
        r#"{ "db.t3.micro": { "default": 112, "default.postgres13": 81 } }"#,
    )
    .unwrap()
}

fn arn(id: &str) -> String {
    format!("arn:aws:rds:{REGION}:123456789012:db:{id}")
}

struct Setup {
    api: Arc<MockCloudApi>,
    metrics: Arc<ProcessMetrics>,
    collector: Arc<RdsCollector>,
}

impl Setup {
    fn new(api: MockCloudApi, options: RdsOptions) -> Self {
        let api = Arc::new(api);
        let metrics = Arc::new(ProcessMetrics::new("test"));
        let context = CollectorContext::new("123456789012", metrics.clone()).with_api(api.clone());
        let collector = Arc::new(RdsCollector::new(
            &context,
            &CollectorSettings::new([REGION]),
            options,
        ));
        Self {
            api,
            metrics,
            collector,
        }
    }

    fn samples(&self, name: &str) -> Vec<MetricSample> {
        let name = format!("aws_resources_exporter_{name}");
        let mut samples: Vec<_> = self
            .collector
            .snapshot()
            .into_iter()
            .filter(|sample| sample.descriptor().name() == name)
            .collect();
        samples.sort_by(|a, b| a.label_values().cmp(b.label_values()));
        samples
    }
}

fn default_options() -> RdsOptions {
    RdsOptions {
        max_connections: max_connections(),
        thresholds: default_thresholds(),
        ..RdsOptions::default()
    }
}

#[test]
fn extracting_instance_id_from_arn() {
    assert_eq!(instance_id_from_arn(&arn("db-1")).unwrap(), "db-1");
    let err = instance_id_from_arn("arn:aws:rds:us-east-1:123456789012").unwrap_err();
    assert!(err.to_string().contains("fewer than 7 segments"), "{err}");
}

#[tokio::test]
async fn collecting_inventory() {
    let restorable_at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let primary = DbInstance {
        latest_restorable_time: Some(restorable_at),
        publicly_accessible: true,
        ..instance("primary")
    };
    let exotic = DbInstance {
        instance_class: "db.x99.huge".to_owned(),
        allocated_storage_gb: 4_096,
        ..instance("exotic")
    };
    let api = MockCloudApi::new(REGION).with_db_instances([primary, exotic]);
    let setup = Setup::new(api, default_options());
    collect_pass(&setup.collector).await;

    let storage = setup.samples("rds_allocatedstorage");
    assert_eq!(storage.len(), 2);
    assert_eq!(storage[0].label_values(), [REGION, "exotic"]);
    assert_eq!(storage[0].value(), 4_398_046_511_104.0);
    assert_eq!(storage[1].value(), 21_474_836_480.0);

    let status = setup.samples("rds_dbinstancestatus");
    assert_eq!(status[1].label_values(), [REGION, "primary", "available"]);
    let versions = setup.samples("rds_engineversion");
    assert_eq!(versions[1].label_values(), [REGION, "primary", "postgres", "13.7"]);

    let public = setup.samples("rds_publicly_accessible");
    assert_eq!(public[0].value(), 0.0);
    assert_eq!(public[1].value(), 1.0);
    let encrypted = setup.samples("rds_storage_encrypted");
    assert!(encrypted.iter().all(|sample| sample.value() == 1.0));

    let restorable = setup.samples("rds_latestrestorabletime");
    assert_eq!(restorable.len(), 1);
    assert_eq!(restorable[0].value(), restorable_at.timestamp() as f64);

    let max_connections = setup.samples("rds_maxconnections");
    assert_eq!(max_connections.len(), 1);
    assert_eq!(max_connections[0].label("dbinstance_identifier"), Some("primary"));
    assert_eq!(max_connections[0].value(), 81.0);
    let mapping_errors = setup.samples("rds_maxconnections_mapping_error");
    assert_eq!(mapping_errors.len(), 2);
    assert_eq!(mapping_errors[0].label_values(), [REGION, "exotic", "db.x99.huge"]);
    assert_eq!(mapping_errors[0].value(), 1.0);
    assert_eq!(mapping_errors[1].value(), 0.0);

    // No EOL table is configured.
    assert!(setup.samples("rds_eol_info").is_empty());
    assert_eq!(setup.metrics.errors(), 0);
}

#[tokio::test]
async fn pending_maintenance_is_zero_filled() {
    let action = MaintenanceAction {
        action: "system-update".to_owned(),
        auto_apply_after: Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()),
        current_apply_date: None,
        description: "New Operating System update is available".to_owned(),
    };
    let api = MockCloudApi::new(REGION)
        .with_db_instances([instance("i1"), instance("i2"), instance("i3")])
        .with_pending_maintenance(vec![PendingMaintenance {
            resource_arn: arn("i2"),
            actions: vec![action],
        }]);
    let setup = Setup::new(api, default_options());
    collect_pass(&setup.collector).await;

    let samples = setup.samples("rds_pendingmaintenanceactions");
    assert_eq!(samples.len(), 3);
    assert_eq!(samples[0].label_values(), [REGION, "i1", "", "", "", ""]);
    assert_eq!(samples[0].value(), 0.0);
    assert_eq!(
        samples[1].label_values(),
        [
            REGION,
            "i2",
            "system-update",
            "2024-05-01T00:00:00Z",
            "",
            "New Operating System update is available"
        ]
    );
    assert_eq!(samples[1].value(), 1.0);
    assert_eq!(samples[2].label_values(), [REGION, "i3", "", "", "", ""]);
    assert_eq!(samples[2].value(), 0.0);
}

fn tracing_subscriber(storage: &SharedStorage) -> impl Subscriber {
    tracing_subscriber::fmt()
        .pretty()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .finish()
        .with(CaptureLayer::new(storage))
}

#[tokio::test]
async fn malformed_arn_is_logged_and_counted() {
    let tracing_storage = SharedStorage::default();
    let _guard = tracing::subscriber::set_default(tracing_subscriber(&tracing_storage));

    let api = MockCloudApi::new(REGION)
        .with_db_instances([instance("i1")])
        .with_pending_maintenance(vec![PendingMaintenance {
            resource_arn: "arn:aws:rds:us-east-1".to_owned(),
            actions: vec![MaintenanceAction::default()],
        }]);
    let setup = Setup::new(api, default_options());
    collect_pass(&setup.collector).await;

    assert_eq!(setup.metrics.errors(), 1);
    // The instance is still reported without actions.
    let samples = setup.samples("rds_pendingmaintenanceactions");
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].value(), 0.0);

    let storage = tracing_storage.lock();
    let warning = storage
        .all_events()
        .find(|event| {
            event
                .message()
                .is_some_and(|message| message.starts_with("Malformed resource ARN"))
        })
        .expect("no warning logged");
    assert_eq!(*warning.metadata().level(), tracing::Level::WARN);
    assert_eq!(
        warning.value("region").and_then(|value| value.as_str()),
        Some(REGION)
    );
}

#[tokio::test]
async fn instances_failure_short_circuits_region() {
    let api = MockCloudApi::new(REGION).with_db_instances([instance("i1")]);
    let setup = Setup::new(api, default_options());
    setup.api.fail_always(
        Operation::DescribeDbInstances,
        ApiError::with_code("AccessDenied", "denied"),
    );
    collect_pass(&setup.collector).await;

    assert!(setup.collector.snapshot().is_empty());
    assert_eq!(setup.metrics.requests(), 1);
    assert_eq!(setup.metrics.errors(), 1);
    assert_eq!(setup.api.call_count(Operation::DescribeDbLogFiles), 0);
    assert_eq!(
        setup.api.call_count(Operation::DescribePendingMaintenanceActions),
        0
    );
}

#[tokio::test(start_paused = true)]
async fn log_files_are_memoized() {
    let files = vec![
        LogFile {
            name: "error/postgresql.log.2024-03-01-10".to_owned(),
            size: 1_024,
        },
        LogFile {
            name: "error/postgresql.log.2024-03-01-11".to_owned(),
            size: 2_048,
        },
    ];
    let api = MockCloudApi::new(REGION)
        .with_db_instances([instance("i1"), instance("i2")])
        .with_log_files("i1", files);
    let options = RdsOptions {
        logs: LogsMetricsSettings {
            workers: 1,
            ttl_secs: 60,
        },
        ..default_options()
    };
    let memo = Arc::new(TtlMemo::new());
    let options = RdsOptions {
        memo: Some(memo.clone()),
        ..options
    };
    let setup = Setup::new(api, options);

    collect_pass(&setup.collector).await;
    assert_eq!(setup.api.call_count(Operation::DescribeDbLogFiles), 2);
    let amounts = setup.samples("rds_logs_amount");
    assert_eq!(amounts.len(), 2);
    assert_eq!(amounts[0].value(), 2.0);
    assert_eq!(amounts[1].value(), 0.0);
    let sizes = setup.samples("rds_logsstorage_size_bytes");
    assert_eq!(sizes[0].value(), 3_072.0);
    assert_matches!(
        memo.get("us-east-1-i1-logfiles"),
        Ok(LogFilesSummary {
            count: 2,
            total_size: 3_072
        })
    );

    tokio::time::advance(Duration::from_secs(30)).await;
    collect_pass(&setup.collector).await;
    assert_eq!(setup.api.call_count(Operation::DescribeDbLogFiles), 2);

    tokio::time::advance(Duration::from_secs(31)).await;
    collect_pass(&setup.collector).await;
    assert_eq!(setup.api.call_count(Operation::DescribeDbLogFiles), 4);
}

#[tokio::test]
async fn log_files_failure_is_isolated() {
    let api = MockCloudApi::new(REGION).with_db_instances([instance("i1")]);
    let setup = Setup::new(api, default_options());
    setup.api.fail_always(
        Operation::DescribeDbLogFiles,
        ApiError::with_code("Throttling", "Rate exceeded"),
    );
    collect_pass(&setup.collector).await;

    assert!(setup.samples("rds_logs_amount").is_empty());
    assert_eq!(setup.samples("rds_allocatedstorage").len(), 1);
    assert_eq!(setup.samples("rds_pendingmaintenanceactions").len(), 1);
    // Log file lookups are not retried.
    assert_eq!(setup.api.call_count(Operation::DescribeDbLogFiles), 1);
    assert_eq!(setup.metrics.errors(), 1);
}

#[tokio::test]
async fn eol_status_is_reported_for_known_versions() {
    let eol_info = |engine: &str, version: &str, eol: &str| EolInfo {
        engine: engine.to_owned(),
        version: version.to_owned(),
        eol: eol.to_owned(),
    };
    let legacy = DbInstance {
        engine_version: "9.6.1".to_owned(),
        ..instance("legacy")
    };
    let mysql = DbInstance {
        engine: "mysql".to_owned(),
        ..instance("mysql")
    };
    let broken = DbInstance {
        engine_version: "11.1".to_owned(),
        ..instance("broken")
    };
    let api = MockCloudApi::new(REGION)
        .with_db_instances([instance("current"), legacy, mysql, broken]);
    let options = RdsOptions {
        eol_table: EolTable::new(vec![
            eol_info("postgres", "13.7", "2999-11-13"),
            eol_info("postgres", "9.6.1", "2021-11-11"),
            eol_info("postgres", "11.1", "11/09/2023"),
        ]),
        ..default_options()
    };
    let setup = Setup::new(api, options);
    collect_pass(&setup.collector).await;

    let samples = setup.samples("rds_eol_info");
    assert_eq!(samples.len(), 2);
    assert_eq!(
        samples[0].label_values(),
        [REGION, "current", "postgres", "13.7", "2999-11-13", "green"]
    );
    assert_eq!(
        samples[1].label_values(),
        [REGION, "legacy", "postgres", "9.6.1", "2021-11-11", "red"]
    );
    // Malformed date for `broken`; `mysql` has no EOL entry, which is not an error.
    assert_eq!(setup.metrics.errors(), 1);
}
