//! End-of-life (EOL) tables and classification of days left until EOL.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use std::{error, fmt};

/// Error classifying an EOL date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EolError {
    /// EOL date is not a `YYYY-MM-DD` date.
    InvalidDateFormat(String),
    /// No thresholds to classify against.
    EmptyThresholds,
}

impl fmt::Display for EolError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDateFormat(date) => write!(formatter, "invalid date format: `{date}`"),
            Self::EmptyThresholds => formatter.write_str("empty thresholds"),
        }
    }
}

impl error::Error for EolError {}

/// EOL date of an engine version.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EolInfo {
    /// Engine name. Optional for streaming clusters.
    #[serde(default)]
    pub engine: String,
    /// Engine version.
    pub version: String,
    /// EOL date in the `YYYY-MM-DD` format.
    pub eol: String,
}

/// Named bucket of days left until EOL.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Threshold {
    /// Classification name (e.g., `red`).
    pub name: String,
    /// Upper bound of days left for this classification.
    pub days: i64,
}

impl Threshold {
    fn new(name: &str, days: i64) -> Self {
        Self {
            name: name.to_owned(),
            days,
        }
    }
}

/// Returns thresholds used if none are configured: red (90 days), yellow (180), green (365).
pub fn default_thresholds() -> Vec<Threshold> {
    vec![
        Threshold::new("red", 90),
        Threshold::new("yellow", 180),
        Threshold::new("green", 365),
    ]
}

/// Number of whole days from `now` until the start of `eol_date` (UTC); negative for past dates.
pub fn days_until(eol_date: NaiveDate, now: DateTime<Utc>) -> i64 {
    let eol = eol_date.and_time(chrono::NaiveTime::MIN).and_utc();
    (eol - now).num_hours().div_euclid(24)
}

/// Classifies an EOL date against thresholds: returns the name of the first threshold
/// (in the ascending `days` order) whose `days` is not less than the days left until EOL,
/// or the name of the last threshold if there is no such threshold.
///
/// # Errors
///
/// Returns an error if the date is malformed or `thresholds` is empty.
pub fn classify(
    eol_date: &str,
    thresholds: &[Threshold],
    now: DateTime<Utc>,
) -> Result<String, EolError> {
    let date = NaiveDate::parse_from_str(eol_date, "%Y-%m-%d")
        .map_err(|_| EolError::InvalidDateFormat(eol_date.to_owned()))?;
    if thresholds.is_empty() {
        return Err(EolError::EmptyThresholds);
    }

    let days_left = days_until(date, now);
    let mut sorted: Vec<_> = thresholds.iter().collect();
    sorted.sort_by_key(|threshold| threshold.days);
    let matching = sorted
        .iter()
        .find(|threshold| threshold.days >= days_left)
        .or(sorted.last());
    Ok(matching.map(|threshold| threshold.name.clone()).unwrap_or_default())
}

/// Table of EOL dates.
#[derive(Debug, Clone, Default)]
pub struct EolTable {
    entries: Vec<EolInfo>,
}

impl EolTable {
    /// Creates a table from entries.
    pub fn new(entries: Vec<EolInfo>) -> Self {
        Self { entries }
    }

    /// Finds the EOL date for the exact `(engine, version)` pair.
    pub fn find(&self, engine: &str, version: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|info| info.engine == engine && info.version == version)
            .map(|info| info.eol.as_str())
    }

    /// Finds the EOL date by `version` only, ignoring engines.
    pub fn find_by_version(&self, version: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|info| info.version == version)
            .map(|info| info.eol.as_str())
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Checks whether this table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
