//! Support for metrics exposition formats.

use std::{error, fmt, mem, str::FromStr};

/// Metrics export format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Format {
    /// [OpenMetrics text format][om] as produced by `prometheus-client`.
    ///
    /// [om]: https://github.com/OpenObservability/OpenMetrics/blob/main/specification/OpenMetrics.md
    OpenMetrics,
    /// [Prometheus text format][prom], obtained by a streaming transform of the OpenMetrics encoding
    /// that removes `_total` suffixes from counter samples and drops the `# EOF` terminator.
    ///
    /// [prom]: https://prometheus.io/docs/instrumenting/exposition_formats/
    Prometheus,
    /// OpenMetrics text format with counter samples named the Prometheus way (no `_total` suffix).
    OpenMetricsForPrometheus,
}

impl Format {
    /// Content type for the Prometheus text format.
    pub const PROMETHEUS_CONTENT_TYPE: &'static str = "text/plain; version=0.0.4; charset=utf-8";
    /// Content type for the OpenMetrics text format.
    pub const OPEN_METRICS_CONTENT_TYPE: &'static str =
        "application/openmetrics-text; version=1.0.0; charset=utf-8";

    /// Returns the HTTP content type for this format.
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Prometheus => Self::PROMETHEUS_CONTENT_TYPE,
            Self::OpenMetrics | Self::OpenMetricsForPrometheus => Self::OPEN_METRICS_CONTENT_TYPE,
        }
    }
}

/// Error parsing [`Format`] from a string.
#[derive(Debug)]
pub struct UnknownFormat(String);

impl fmt::Display for UnknownFormat {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "unknown metrics format `{}`; expected one of `prometheus`, `openmetrics`",
            self.0
        )
    }
}

impl error::Error for UnknownFormat {}

impl FromStr for Format {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prometheus" => Ok(Self::Prometheus),
            "openmetrics" => Ok(Self::OpenMetrics),
            "openmetrics-for-prometheus" => Ok(Self::OpenMetricsForPrometheus),
            _ => Err(UnknownFormat(s.to_owned())),
        }
    }
}

#[derive(Debug)]
struct CounterFamily {
    name: String,
}

impl CounterFamily {
    /// Parses the contents of a `# TYPE` line; returns `None` for non-counter families.
    fn parse(type_def: &str) -> Result<Option<Self>, fmt::Error> {
        let (name, ty) = type_def
            .trim()
            .split_once(|ch: char| ch.is_ascii_whitespace())
            .ok_or(fmt::Error)?;
        Ok((ty == "counter").then(|| Self {
            name: name.to_owned(),
        }))
    }

    /// Strips `_total` from a counter sample line belonging to this family.
    fn transform(&self, line: &str) -> Option<String> {
        let name_end_pos = line.find(|ch: char| ch == '{' || ch.is_ascii_whitespace())?;
        let (name, rest) = line.split_at(name_end_pos);
        (name.strip_suffix("_total") == Some(self.name.as_str()))
            .then(|| format!("{}{rest}", self.name))
    }
}

/// Line-buffering writer translating OpenMetrics output to the Prometheus flavor.
#[must_use = "Must be `flush()`ed to not lose the last line"]
#[derive(Debug)]
pub(crate) struct PrometheusWrapper<'a, W> {
    writer: &'a mut W,
    remove_eof_terminator: bool,
    current_counter: Option<CounterFamily>,
    pending_line: String,
}

impl<'a, W: fmt::Write> PrometheusWrapper<'a, W> {
    pub(crate) fn new(writer: &'a mut W, remove_eof_terminator: bool) -> Self {
        Self {
            writer,
            remove_eof_terminator,
            current_counter: None,
            pending_line: String::new(),
        }
    }

    fn handle_line(&mut self) -> fmt::Result {
        let line = mem::take(&mut self.pending_line);
        if self.remove_eof_terminator && line == "# EOF" {
            return Ok(());
        }

        if let Some(type_def) = line.strip_prefix("# TYPE ") {
            self.current_counter = CounterFamily::parse(type_def)?;
        } else if !line.starts_with('#') {
            if line.find(|ch: char| ch == '{' || ch.is_ascii_whitespace()).is_none() {
                return Err(fmt::Error);
            }
            let transformed = self
                .current_counter
                .as_ref()
                .and_then(|counter| counter.transform(&line));
            if let Some(transformed) = transformed {
                return writeln!(self.writer, "{transformed}");
            }
        }
        writeln!(self.writer, "{line}")
    }

    pub(crate) fn flush(mut self) -> fmt::Result {
        if self.pending_line.is_empty() {
            Ok(())
        } else {
            self.handle_line()
        }
    }
}

impl<W: fmt::Write> fmt::Write for PrometheusWrapper<'_, W> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let mut chunks = s.split('\n').peekable();
        while let Some(chunk) = chunks.next() {
            self.pending_line.push_str(chunk);
            if chunks.peek().is_some() {
                // `chunk` was terminated by a newline
                self.handle_line()?;
            }
        }
        Ok(())
    }
}
