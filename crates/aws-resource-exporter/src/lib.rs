//! Prometheus exporter for AWS resource quotas, usage and inventory.
//!
//! # Overview
//!
//! - [`cloud`] is a narrow facade over AWS APIs. [`CloudApi`](cloud::CloudApi) is implemented
//!   on top of the AWS SDK ([`AwsApi`](cloud::AwsApi)) and by a scriptable mock
//!   ([`MockCloudApi`](cloud::MockCloudApi)); collectors access it through
//!   [`CloudClient`](cloud::CloudClient), which counts requests and errors.
//! - [`collectors`] contains one periodic collector per service. Each collector polls its regions
//!   in the background and writes samples into its own TTL cache.
//! - [`App`] wires configured collectors, process metrics and exporter metrics into a single
//!   registry served by [`MetricsExporter`](resource_exporter::MetricsExporter).
//!
//! # Examples
//!
//! ```
//! use aws_resource_exporter::{
//!     cloud::MockCloudApi,
//!     collectors::{BuildOptions, CollectorContext, NAMESPACE},
//!     config::Config,
//!     App,
//! };
//! use resource_metrics::{Format, ProcessMetrics};
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::from_yaml("ec2:\n  enabled: true\n  region: eu-west-1\n")?;
//! let api = MockCloudApi::new("eu-west-1").with_transit_gateways(["tgw-1"]);
//! let context = CollectorContext::new("123456789012", Arc::new(ProcessMetrics::new(NAMESPACE)))
//!     .with_api(Arc::new(api));
//! let app = App::new(&config, context, BuildOptions::default())?;
//! app.collectors().collect_once().await;
//!
//! let mut buffer = String::new();
//! app.registry().encode(&mut buffer, Format::Prometheus)?;
//! assert!(buffer.contains("aws_resources_exporter_ec2_transitgatewaysperregion_usage"));
//! # Ok(())
//! # }
//! ```

// Linter settings.
#![warn(missing_debug_implementations, missing_docs, bare_trait_objects)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
    clippy::cast_precision_loss,
    clippy::missing_panics_doc
)]

use resource_exporter::{ExporterMetrics, MetricsExporter};
use resource_metrics::Registry;

use std::sync::Arc;

use crate::{
    collectors::{BuildOptions, CollectorContext, CollectorSet, NAMESPACE},
    config::{Config, ConfigError},
};

pub mod cidr;
pub mod cloud;
pub mod collectors;
pub mod config;
pub mod env;
pub mod eol;
pub mod max_connections;

/// Configured collectors together with the registry exposing them.
#[derive(Debug)]
pub struct App {
    collectors: CollectorSet,
    registry: Arc<Registry>,
    exporter_metrics: ExporterMetrics,
}

impl App {
    /// Builds collectors for all enabled services and registers them together with process
    /// metrics from `context` and exporter metrics.
    ///
    /// # Errors
    ///
    /// Returns configuration validation errors.
    pub fn new(
        config: &Config,
        context: CollectorContext,
        options: BuildOptions,
    ) -> Result<Self, ConfigError> {
        let collectors = CollectorSet::from_config(config, &context, options)?;
        if collectors.is_empty() {
            tracing::warn!("No services are enabled; only process metrics will be exported");
        }

        let mut registry = Registry::empty();
        registry.register_source(context.process_metrics().clone());
        collectors.register(&mut registry);
        let exporter_metrics = ExporterMetrics::default();
        exporter_metrics.register(&mut registry, NAMESPACE);
        tracing::info!(
            services = ?collectors.services(),
            descriptors = registry.descriptor_count(),
            "Registered metrics"
        );

        Ok(Self {
            collectors,
            registry: Arc::new(registry),
            exporter_metrics,
        })
    }

    /// Returns configured collectors.
    pub fn collectors(&self) -> &CollectorSet {
        &self.collectors
    }

    /// Returns the registry with all metrics.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Creates an exporter serving the registry.
    pub fn exporter<'a>(&self) -> MetricsExporter<'a> {
        MetricsExporter::new(self.registry.clone()).with_metrics(self.exporter_metrics.clone())
    }
}
