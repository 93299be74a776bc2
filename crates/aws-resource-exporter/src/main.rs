//! Exporter binary: loads configuration, discovers the account, spawns collectors and serves
//! metrics until a termination signal is received.

use anyhow::Context as _;
use aws_resource_exporter::{
    cloud::{fetch_account_id, AwsApi},
    collectors::{BuildOptions, CollectorContext, NAMESPACE},
    config::{Config, DEFAULT_GLOBAL_REGION},
    env::LogsMetricsSettings,
    max_connections::MaxConnectionsTable,
    App,
};
use clap::{Parser, ValueEnum};
use resource_metrics::{Format, ProcessMetrics, TtlMemo};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use std::{
    net::{AddrParseError, SocketAddr},
    sync::Arc,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    /// Single-line human-readable logs.
    Text,
    /// Multi-line human-readable logs.
    Pretty,
}

/// Prometheus exporter for AWS resource quotas, usage and inventory.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Address to listen on for web interface and telemetry. `:PORT` listens on all interfaces.
    #[arg(
        long = "web.listen-address",
        default_value = ":9115",
        value_parser = parse_listen_address
    )]
    listen_address: SocketAddr,
    /// Path under which to expose metrics.
    #[arg(long = "web.telemetry-path", default_value = "/metrics")]
    telemetry_path: String,
    /// Exposition format: `prometheus` or `openmetrics`.
    #[arg(long = "web.format", default_value = "prometheus")]
    format: Format,
    /// Log level directive; ignored if `RUST_LOG` is set.
    #[arg(long = "log.level", default_value = "info")]
    log_level: String,
    /// Log output format.
    #[arg(long = "log.format", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn parse_listen_address(address: &str) -> Result<SocketAddr, AddrParseError> {
    if address.starts_with(':') {
        format!("0.0.0.0{address}").parse()
    } else {
        address.parse()
    }
}

fn init_tracing(args: &Args) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .with_context(|| format!("invalid log level `{}`", args.log_level))?;
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match args.log_format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Pretty => subscriber.pretty().init(),
    }
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(%err, "Cannot listen to Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::warn!(%err, "Cannot listen to SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C"),
        () = terminate => tracing::info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args)?;

    let config_path = Config::path_from_env();
    let config = Config::load(&config_path)
        .with_context(|| format!("cannot load configuration from `{}`", config_path.display()))?;
    config.validate().context("invalid configuration")?;
    let logs = LogsMetricsSettings::from_env()?;
    let max_connections =
        MaxConnectionsTable::embedded().context("embedded max connections table is malformed")?;

    let regions = config.all_regions();
    let identity_region = regions.first().map_or(DEFAULT_GLOBAL_REGION, String::as_str);
    let account_id = fetch_account_id(identity_region)
        .await
        .context("cannot get AWS account ID")?;
    tracing::info!(%account_id, ?regions, "Starting exporter");

    let process_metrics = Arc::new(ProcessMetrics::new(NAMESPACE));
    let mut context = CollectorContext::new(&account_id, process_metrics);
    for region in &regions {
        context = context.with_api(Arc::new(AwsApi::new(region).await));
    }
    let options = BuildOptions {
        logs,
        max_connections,
        memo: Some(Arc::new(TtlMemo::new())),
    };
    let app = App::new(&config, context, options)?;

    let (stop_sender, stop_receiver) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        stop_sender.send_replace(true);
    });
    let collector_tasks = app.collectors().spawn(&stop_receiver);

    let mut exporter_stop_receiver = stop_receiver.clone();
    let server = app
        .exporter()
        .with_format(args.format)
        .with_telemetry_path(&args.telemetry_path)
        .with_graceful_shutdown(async move {
            exporter_stop_receiver.wait_for(|&stop| stop).await.ok();
        })
        .bind(args.listen_address)
        .await
        .with_context(|| format!("cannot bind to `{}`", args.listen_address))?;
    tracing::info!(
        address = %server.local_addr(),
        telemetry_path = %args.telemetry_path,
        "Serving metrics"
    );
    server.start().await.context("metrics server failed")?;

    for result in futures::future::join_all(collector_tasks).await {
        if let Err(err) = result {
            tracing::error!(%err, "Collector task failed");
        }
    }
    tracing::info!("Exporter stopped");
    Ok(())
}
