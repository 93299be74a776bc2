//! HTTP exporter for [`resource_metrics`] registries based on the `hyper` web server.
//!
//! The exporter serves a registry on a configurable telemetry path and a small landing page
//! on `/`. Scrapes never wait on upstream APIs: all scrape sources read from in-memory caches.
//!
//! # Examples
//!
//! ```no_run
//! use resource_exporter::{ExporterMetrics, MetricsExporter};
//! use resource_metrics::{Format, Registry};
//! use std::{net::Ipv4Addr, sync::Arc};
//!
//! # async fn run() -> std::io::Result<()> {
//! let mut registry = Registry::empty();
//! let exporter_metrics = ExporterMetrics::default();
//! exporter_metrics.register(&mut registry, "my_exporter");
//!
//! let (stop_sender, stop_receiver) = tokio::sync::oneshot::channel::<()>();
//! let exporter = MetricsExporter::new(Arc::new(registry))
//!     .with_format(Format::OpenMetrics)
//!     .with_telemetry_path("/metrics")
//!     .with_metrics(exporter_metrics)
//!     .with_graceful_shutdown(async {
//!         stop_receiver.await.ok();
//!     });
//! let server = exporter.bind((Ipv4Addr::LOCALHOST, 9115).into()).await?;
//! println!("Serving metrics on {}", server.local_addr());
//! server.start().await
//! # }
//! ```

// Linter settings.
#![warn(missing_debug_implementations, missing_docs, bare_trait_objects)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

mod exporter;
mod metrics;

pub use crate::{
    exporter::{MetricsExporter, MetricsServer},
    metrics::ExporterMetrics,
};
