//! Metric descriptors and samples.

use prometheus_client::metrics::MetricType;

use std::{fmt, sync::Arc};

/// Kind of values reported for a metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Value that can go up or down.
    Gauge,
    /// Monotonically increasing value.
    Counter,
}

impl MetricKind {
    pub(crate) fn metric_type(self) -> MetricType {
        match self {
            Self::Gauge => MetricType::Gauge,
            Self::Counter => MetricType::Counter,
        }
    }
}

/// Identity of a metric family: fully qualified name, help, ordered variable label names
/// and a fixed set of constant labels.
///
/// Descriptors are immutable and are created once per collector, typically with [`Self::gauge()`]
/// or [`Self::counter()`] followed by builder-style calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDescriptor {
    name: String,
    help: String,
    kind: MetricKind,
    variable_labels: Vec<String>,
    const_labels: Vec<(String, String)>,
}

impl MetricDescriptor {
    /// Starts building a gauge descriptor.
    pub fn gauge(name: impl Into<String>, help: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder::new(name.into(), help.into(), MetricKind::Gauge)
    }

    /// Starts building a counter descriptor.
    pub fn counter(name: impl Into<String>, help: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder::new(name.into(), help.into(), MetricKind::Counter)
    }

    /// Fully qualified metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Help text exported with the metric.
    pub fn help(&self) -> &str {
        &self.help
    }

    /// Kind of the metric.
    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// Names of variable labels in declaration order.
    pub fn variable_labels(&self) -> &[String] {
        &self.variable_labels
    }

    /// Constant labels attached to every sample of the metric.
    pub fn const_labels(&self) -> &[(String, String)] {
        &self.const_labels
    }

    /// Creates a sample of this metric. `label_values` must be specified in the order
    /// of [variable labels](Self::variable_labels()).
    pub fn sample<I>(self: &Arc<Self>, value: f64, label_values: I) -> MetricSample
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let label_values: Vec<String> = label_values.into_iter().map(Into::into).collect();
        debug_assert_eq!(
            label_values.len(),
            self.variable_labels.len(),
            "Label values {label_values:?} do not match labels of `{}`",
            self.name
        );
        MetricSample {
            descriptor: Arc::clone(self),
            value,
            label_values,
        }
    }
}

/// Canonical descriptor string used as a part of sample fingerprints.
impl fmt::Display for MetricDescriptor {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "Desc{{fqName: {:?}, help: {:?}, constLabels: {{",
            self.name, self.help
        )?;
        for (i, (name, value)) in self.const_labels.iter().enumerate() {
            let separator = if i == 0 { "" } else { "," };
            write!(formatter, "{separator}{name}={value:?}")?;
        }
        formatter.write_str("}, variableLabels: [")?;
        for (i, name) in self.variable_labels.iter().enumerate() {
            let separator = if i == 0 { "" } else { " " };
            write!(formatter, "{separator}{name}")?;
        }
        formatter.write_str("]}")
    }
}

/// Builder for [`MetricDescriptor`]s.
#[derive(Debug)]
#[must_use = "Descriptor must be `build()`"]
pub struct DescriptorBuilder {
    inner: MetricDescriptor,
}

impl DescriptorBuilder {
    fn new(name: String, help: String, kind: MetricKind) -> Self {
        Self {
            inner: MetricDescriptor {
                name,
                help,
                kind,
                variable_labels: vec![],
                const_labels: vec![],
            },
        }
    }

    /// Sets variable labels for the metric.
    pub fn with_labels<I>(mut self, labels: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.inner.variable_labels = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a constant label. If a label with the same name is already present, its value
    /// is overwritten.
    pub fn with_const_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        if let Some(existing) = self
            .inner
            .const_labels
            .iter_mut()
            .find(|(existing_name, _)| *existing_name == name)
        {
            existing.1 = value;
        } else {
            self.inner.const_labels.push((name, value));
        }
        self
    }

    /// Adds multiple constant labels.
    pub fn with_const_labels<I, K, V>(self, labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        labels
            .into_iter()
            .fold(self, |builder, (name, value)| builder.with_const_label(name, value))
    }

    /// Finalizes the descriptor.
    pub fn build(self) -> Arc<MetricDescriptor> {
        Arc::new(self.inner)
    }
}

/// Single immutable sample of a metric: value together with variable label values.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    descriptor: Arc<MetricDescriptor>,
    value: f64,
    label_values: Vec<String>,
}

impl MetricSample {
    /// Descriptor of the sampled metric.
    pub fn descriptor(&self) -> &Arc<MetricDescriptor> {
        &self.descriptor
    }

    /// Kind of the sample (same as the descriptor kind).
    pub fn kind(&self) -> MetricKind {
        self.descriptor.kind
    }

    /// Sampled value.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Variable label values in the declaration order.
    pub fn label_values(&self) -> &[String] {
        &self.label_values
    }

    /// Returns the value of the variable label with the specified name.
    pub fn label(&self, name: &str) -> Option<&str> {
        let idx = self
            .descriptor
            .variable_labels
            .iter()
            .position(|label| label == name)?;
        self.label_values.get(idx).map(String::as_str)
    }

    /// Returns all labels of the sample, constant labels first.
    pub fn label_pairs(&self) -> Vec<(String, String)> {
        let const_labels = self.descriptor.const_labels.iter().cloned();
        let variable_labels = self
            .descriptor
            .variable_labels
            .iter()
            .cloned()
            .zip(self.label_values.iter().cloned());
        const_labels.chain(variable_labels).collect()
    }
}
