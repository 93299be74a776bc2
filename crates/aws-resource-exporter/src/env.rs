//! Integer settings read from environment variables.

use std::{env, error, fmt};

/// Env variable with the number of concurrent log-file lookups per database region.
pub const LOGS_METRICS_WORKERS_VAR: &str = "LOGS_METRICS_WORKERS";
/// Env variable with the TTL (in seconds) of memoized log-file lookups.
pub const LOGS_METRICS_TTL_VAR: &str = "LOGS_METRICS_TTL";

const DEFAULT_LOGS_WORKERS: usize = 10;
const DEFAULT_LOGS_TTL_SECS: u64 = 300;

/// Error reading an integer env variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvError {
    /// Value is not a (non-negative) integer.
    NotAnInteger {
        /// Variable name.
        name: String,
        /// Variable value.
        value: String,
    },
    /// Value is out of the allowed range.
    OutOfRange {
        /// Variable name.
        name: String,
        /// Parsed value.
        value: u64,
    },
}

impl fmt::Display for EnvError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnInteger { name, value } => {
                write!(formatter, "env variable {name}={value:?} is not an integer")
            }
            Self::OutOfRange { name, value } => {
                write!(formatter, "env variable {name}={value} is out of range")
            }
        }
    }
}

impl error::Error for EnvError {}

/// Reads an unsigned integer using `lookup`, falling back to `default` if the variable is unset
/// or empty.
///
/// # Errors
///
/// Returns an error if the value is set, but is not an integer.
pub fn int_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
) -> Result<u64, EnvError> {
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => {
            value
                .trim()
                .parse()
                .map_err(|_| EnvError::NotAnInteger {
                    name: name.to_owned(),
                    value,
                })
        }
        _ => Ok(default),
    }
}

/// Settings of the database log-file collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogsMetricsSettings {
    /// Max number of concurrent log-file lookups in a region.
    pub workers: usize,
    /// TTL of memoized lookups in seconds.
    pub ttl_secs: u64,
}

impl Default for LogsMetricsSettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_LOGS_WORKERS,
            ttl_secs: DEFAULT_LOGS_TTL_SECS,
        }
    }
}

impl LogsMetricsSettings {
    /// Reads settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the variables is set to a non-integer value or the number
    /// of workers is zero.
    pub fn from_env() -> Result<Self, EnvError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Reads settings using the provided variable lookup.
    ///
    /// # Errors
    ///
    /// See [`Self::from_env()`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, EnvError> {
        let workers = int_from_lookup(
            &lookup,
            LOGS_METRICS_WORKERS_VAR,
            DEFAULT_LOGS_WORKERS as u64,
        )?;
        let workers = usize::try_from(workers)
            .ok()
            .filter(|&workers| workers >= 1)
            .ok_or_else(|| EnvError::OutOfRange {
                name: LOGS_METRICS_WORKERS_VAR.to_owned(),
                value: workers,
            })?;
        let ttl_secs = int_from_lookup(&lookup, LOGS_METRICS_TTL_VAR, DEFAULT_LOGS_TTL_SECS)?;
        Ok(Self { workers, ttl_secs })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use std::collections::HashMap;

    use super::*;

    fn lookup<'a>(
        vars: &'a HashMap<&'static str, &'static str>,
    ) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| vars.get(name).map(|&value| value.to_owned())
    }

    #[test]
    fn defaults_are_used_for_unset_variables() {
        let vars = HashMap::new();
        let settings = LogsMetricsSettings::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(settings, LogsMetricsSettings::default());
        assert_eq!(settings.workers, 10);
        assert_eq!(settings.ttl_secs, 300);
    }

    #[test]
    fn reading_configured_variables() {
        let vars = HashMap::from([("LOGS_METRICS_WORKERS", "4"), ("LOGS_METRICS_TTL", " 600 ")]);
        let settings = LogsMetricsSettings::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(settings.workers, 4);
        assert_eq!(settings.ttl_secs, 600);
    }

    #[test]
    fn non_integer_values_are_rejected() {
        let vars = HashMap::from([("LOGS_METRICS_TTL", "5m")]);
        let err = LogsMetricsSettings::from_lookup(lookup(&vars)).unwrap_err();
        assert_matches!(
            &err,
            EnvError::NotAnInteger { name, value } if name == "LOGS_METRICS_TTL" && value == "5m"
        );
        assert_eq!(
            err.to_string(),
            "env variable LOGS_METRICS_TTL=\"5m\" is not an integer"
        );

        let vars = HashMap::from([("LOGS_METRICS_WORKERS", "0")]);
        let err = LogsMetricsSettings::from_lookup(lookup(&vars)).unwrap_err();
        assert_matches!(err, EnvError::OutOfRange { value: 0, .. });
    }
}
