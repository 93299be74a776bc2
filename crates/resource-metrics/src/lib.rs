//! Metric caching and exposition for polling exporters, based on the `prometheus-client` crate.
//!
//! # Overview
//!
//! - A metric family is identified by a [`MetricDescriptor`]: name, help, ordered variable labels
//!   and constant labels. Descriptors are created once and produce immutable [`MetricSample`]s.
//! - Samples are written into a [`MetricCache`] keyed by a stable [`fingerprint`] (descriptor
//!   identity + variable label values). Samples expire after the cache TTL unless refreshed;
//!   eviction happens lazily when the cache is snapshotted.
//! - [`TtlMemo`] is a smaller value-typed TTL map for memoizing results of rate-limited calls.
//! - Anything that can be scraped implements [`ScrapeSource`] (describe + snapshot) and is
//!   registered in a [`Registry`], which encodes all sources in one of the supported text
//!   [`Format`]s.
//! - [`ProcessMetrics`] counts upstream requests and errors across all collectors.
//!
//! # Examples
//!
//! ```
//! use resource_metrics::{CachedSource, Format, MetricCache, MetricDescriptor, Registry};
//! use std::{sync::Arc, time::Duration};
//!
//! let usage = MetricDescriptor::gauge("my_app_vpc_usage", "Number of VPCs")
//!     .with_labels(["aws_region"])
//!     .with_const_label("aws_account_id", "123456789012")
//!     .build();
//! let cache = Arc::new(MetricCache::new(Duration::from_secs(35)));
//! cache.add_metric(usage.sample(3.0, ["us-east-1"]));
//!
//! let mut registry = Registry::empty();
//! registry.register_source(Arc::new(CachedSource::new(vec![usage], cache)));
//! let mut buffer = String::new();
//! registry.encode(&mut buffer, Format::Prometheus)?;
//! assert!(buffer.contains(r#"my_app_vpc_usage{aws_account_id="123456789012",aws_region="us-east-1"} 3.0"#));
//! # Ok::<_, std::fmt::Error>(())
//! ```

// Linter settings.
#![warn(missing_debug_implementations, missing_docs, bare_trait_objects)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

mod cache;
mod collector;
mod descriptors;
mod format;
mod memo;
mod metrics;
mod registry;

pub use crate::{
    cache::{fingerprint, MetricCache},
    collector::{CachedSource, ScrapeSource},
    descriptors::{DescriptorBuilder, MetricDescriptor, MetricKind, MetricSample},
    format::{Format, UnknownFormat},
    memo::{MemoMiss, TtlMemo},
    metrics::ProcessMetrics,
    registry::Registry,
};

