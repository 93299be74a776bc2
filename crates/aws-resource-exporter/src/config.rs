//! YAML configuration of collectors.

use config::{File, FileFormat};
use serde::Deserialize;

use std::{
    env, error, fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::eol::{default_thresholds, EolInfo, EolTable, Threshold};

/// Env variable with the path to the configuration file.
pub const CONFIG_FILE_VAR: &str = "AWS_RESOURCE_EXPORTER_CONFIG_FILE";
/// Configuration file path used if [`CONFIG_FILE_VAR`] is not set.
pub const DEFAULT_CONFIG_FILE: &str = "./aws-resource-exporter-config.yaml";
/// Region used by globally scoped services if none is configured.
pub const DEFAULT_GLOBAL_REGION: &str = "us-east-1";

const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(35);

/// Service domain with a dedicated collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// Relational databases.
    Rds,
    /// Networking.
    Vpc,
    /// Compute (transit gateways).
    Ec2,
    /// DNS hosted zones.
    Route53,
    /// In-memory caches.
    Elasticache,
    /// Streaming clusters.
    Msk,
    /// Identity.
    Iam,
}

impl Service {
    /// All services in the order they are configured.
    pub const ALL: [Self; 7] = [
        Self::Rds,
        Self::Vpc,
        Self::Ec2,
        Self::Route53,
        Self::Elasticache,
        Self::Msk,
        Self::Iam,
    ];

    /// Returns the configuration key of this service.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rds => "rds",
            Self::Vpc => "vpc",
            Self::Ec2 => "ec2",
            Self::Route53 => "route53",
            Self::Elasticache => "elasticache",
            Self::Msk => "msk",
            Self::Iam => "iam",
        }
    }

    /// Checks whether this service is globally scoped, i.e. only uses a single region.
    pub fn is_global(self) -> bool {
        matches!(self, Self::Route53 | Self::Iam)
    }
}

impl fmt::Display for Service {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Error loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// File cannot be read or deserialized.
    Load(config::ConfigError),
    /// Non-global service is enabled, but has no regions.
    NoRegions {
        /// Misconfigured service.
        service: Service,
    },
    /// A duration setting is zero.
    ZeroDuration {
        /// Misconfigured service.
        service: Service,
        /// Name of the setting.
        field: &'static str,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load(err) => write!(formatter, "failed loading configuration: {err}"),
            Self::NoRegions { service } => {
                write!(formatter, "service `{service}` is enabled, but has no regions")
            }
            Self::ZeroDuration { service, field } => {
                write!(formatter, "`{service}.{field}` must be greater than 0")
            }
        }
    }
}

impl error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Load(err) => Some(err),
            Self::NoRegions { .. } | Self::ZeroDuration { .. } => None,
        }
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        Self::Load(err)
    }
}

/// Configuration of a single service as written in the file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Whether the collector is enabled.
    pub enabled: bool,
    /// Single region; ignored if `regions` is non-empty.
    pub region: Option<String>,
    /// Regions to collect from.
    pub regions: Vec<String>,
    /// Interval between collection passes.
    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,
    /// Timeout of a single collection pass.
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    /// TTL of collected samples.
    #[serde(default, with = "humantime_serde")]
    pub cache_ttl: Option<Duration>,
    /// EOL dates (databases and streaming clusters only).
    pub eol_info: Vec<EolInfo>,
    /// EOL classification thresholds (databases and streaming clusters only).
    pub thresholds: Vec<Threshold>,
}

/// Resolved schedule and regions of a collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorSettings {
    /// Regions to collect from; a single region for globally scoped services.
    pub regions: Vec<String>,
    /// Interval between the starts of consecutive passes.
    pub interval: Duration,
    /// Timeout of a single pass.
    pub timeout: Duration,
    /// TTL of collected samples.
    pub cache_ttl: Duration,
}

impl CollectorSettings {
    /// Creates settings with default timings for the specified regions.
    pub fn new<S: Into<String>>(regions: impl IntoIterator<Item = S>) -> Self {
        Self {
            regions: regions.into_iter().map(Into::into).collect(),
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

impl ServiceConfig {
    fn configured_regions(&self) -> Vec<String> {
        if !self.regions.is_empty() {
            self.regions.clone()
        } else {
            self.region.iter().cloned().collect()
        }
    }

    /// Resolves collector settings for `service`. Returns `Ok(None)` if the service is disabled.
    ///
    /// # Errors
    ///
    /// Returns an error if a non-global service is enabled without regions.
    pub fn settings(&self, service: Service) -> Result<Option<CollectorSettings>, ConfigError> {
        if !self.enabled {
            return Ok(None);
        }

        let mut regions = self.configured_regions();
        if service.is_global() {
            regions.truncate(1);
            if regions.is_empty() {
                regions.push(DEFAULT_GLOBAL_REGION.to_owned());
            }
        } else if regions.is_empty() {
            return Err(ConfigError::NoRegions { service });
        }

        let durations = [
            ("interval", self.interval),
            ("timeout", self.timeout),
            ("cache_ttl", self.cache_ttl),
        ];
        for (field, duration) in durations {
            if duration == Some(Duration::ZERO) {
                return Err(ConfigError::ZeroDuration { service, field });
            }
        }

        let settings = CollectorSettings {
            regions,
            interval: self.interval.unwrap_or(DEFAULT_INTERVAL),
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            cache_ttl: self.cache_ttl.unwrap_or(DEFAULT_CACHE_TTL),
        };
        if settings.cache_ttl <= settings.interval {
            tracing::warn!(
                %service,
                cache_ttl = ?settings.cache_ttl,
                interval = ?settings.interval,
                "Cache TTL does not exceed the collection interval; samples may flicker"
            );
        }
        if settings.timeout > settings.interval {
            tracing::warn!(
                %service,
                timeout = ?settings.timeout,
                interval = ?settings.interval,
                "Pass timeout exceeds the collection interval"
            );
        }
        Ok(Some(settings))
    }

    /// Returns the EOL table of this service.
    pub fn eol_table(&self) -> EolTable {
        EolTable::new(self.eol_info.clone())
    }

    /// Returns EOL thresholds, or the default ones if none are configured.
    pub fn thresholds(&self) -> Vec<Threshold> {
        if self.thresholds.is_empty() {
            default_thresholds()
        } else {
            self.thresholds.clone()
        }
    }
}

/// Exporter configuration: one optional section per service. A missing section means
/// that the service is disabled.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Relational databases.
    pub rds: Option<ServiceConfig>,
    /// Networking.
    pub vpc: Option<ServiceConfig>,
    /// Transit gateways.
    pub ec2: Option<ServiceConfig>,
    /// DNS hosted zones.
    pub route53: Option<ServiceConfig>,
    /// In-memory caches.
    pub elasticache: Option<ServiceConfig>,
    /// Streaming clusters.
    pub msk: Option<ServiceConfig>,
    /// Identity.
    pub iam: Option<ServiceConfig>,
}

impl Config {
    /// Returns the configuration file path: [`CONFIG_FILE_VAR`] if set, or [`DEFAULT_CONFIG_FILE`].
    pub fn path_from_env() -> PathBuf {
        env::var_os(CONFIG_FILE_VAR)
            .filter(|path| !path.is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from)
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or has an unexpected structure.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        tracing::info!(path = %path.display(), "Loading configuration");
        let source = File::from(path).format(FileFormat::Yaml).required(true);
        Self::build(source)
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML has an unexpected structure.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Self::build(File::from_str(yaml, FileFormat::Yaml))
    }

    fn build<S>(source: S) -> Result<Self, ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config = config::Config::builder().add_source(source).build()?;
        Ok(config.try_deserialize()?)
    }

    /// Returns the section of `service`.
    pub fn service(&self, service: Service) -> Option<&ServiceConfig> {
        match service {
            Service::Rds => self.rds.as_ref(),
            Service::Vpc => self.vpc.as_ref(),
            Service::Ec2 => self.ec2.as_ref(),
            Service::Route53 => self.route53.as_ref(),
            Service::Elasticache => self.elasticache.as_ref(),
            Service::Msk => self.msk.as_ref(),
            Service::Iam => self.iam.as_ref(),
        }
    }

    /// Resolves settings of `service`. Returns `Ok(None)` if the service is disabled
    /// or not configured.
    ///
    /// # Errors
    ///
    /// Propagates validation errors.
    pub fn settings(&self, service: Service) -> Result<Option<CollectorSettings>, ConfigError> {
        match self.service(service) {
            Some(section) => section.settings(service),
            None => Ok(None),
        }
    }

    /// Validates all enabled services.
    ///
    /// # Errors
    ///
    /// Returns the first validation error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for service in Service::ALL {
            self.settings(service)?;
        }
        Ok(())
    }

    /// Returns all regions used by enabled services, deduplicated in first-use order.
    pub fn all_regions(&self) -> Vec<String> {
        let mut regions: Vec<String> = vec![];
        for service in Service::ALL {
            if let Ok(Some(settings)) = self.settings(service) {
                for region in settings.regions {
                    if !regions.contains(&region) {
                        regions.push(region);
                    }
                }
            }
        }
        regions
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use std::io::Write as _;

    use super::*;

    const EXAMPLE_CONFIG: &str = r#"
rds:
  enabled: true
  regions:
    - "us-east-1"
    - "eu-west-1"
  interval: 1m
  timeout: 30s
  cache_ttl: 2m30s
  eol_info:
    - engine: postgres
      version: "13.7"
      eol: "2025-02-28"
  thresholds:
    - name: urgent
      days: 30
    - name: soon
      days: 120
vpc:
  enabled: true
  region: "eu-central-1"
route53:
  enabled: true
  regions: ["eu-west-1", "us-east-1"]
iam:
  enabled: true
msk:
  enabled: false
  regions: ["us-east-1"]
"#;

    #[test]
    fn parsing_example_config() {
        let config = Config::from_yaml(EXAMPLE_CONFIG).unwrap();

        let rds = config.settings(Service::Rds).unwrap().unwrap();
        assert_eq!(rds.regions, ["us-east-1", "eu-west-1"]);
        assert_eq!(rds.interval, Duration::from_secs(60));
        assert_eq!(rds.timeout, Duration::from_secs(30));
        assert_eq!(rds.cache_ttl, Duration::from_secs(150));

        let rds_section = config.service(Service::Rds).unwrap();
        assert_eq!(rds_section.eol_table().find("postgres", "13.7"), Some("2025-02-28"));
        let thresholds = rds_section.thresholds();
        assert_eq!(thresholds.len(), 2);
        assert_eq!(thresholds[0].name, "urgent");

        let vpc = config.settings(Service::Vpc).unwrap().unwrap();
        assert_eq!(vpc.regions, ["eu-central-1"]);
        assert_eq!(vpc.interval, DEFAULT_INTERVAL);
        assert_eq!(vpc.timeout, DEFAULT_TIMEOUT);
        assert_eq!(vpc.cache_ttl, DEFAULT_CACHE_TTL);

        // Global services use only the first region.
        let route53 = config.settings(Service::Route53).unwrap().unwrap();
        assert_eq!(route53.regions, ["eu-west-1"]);
        let iam = config.settings(Service::Iam).unwrap().unwrap();
        assert_eq!(iam.regions, [DEFAULT_GLOBAL_REGION]);

        assert_eq!(config.settings(Service::Msk).unwrap(), None);
        assert_eq!(config.settings(Service::Ec2).unwrap(), None);
        assert_eq!(
            config.all_regions(),
            ["us-east-1", "eu-west-1", "eu-central-1"]
        );
        config.validate().unwrap();
    }

    #[test]
    fn regions_take_precedence_over_region() {
        let config = Config::from_yaml(
            "ec2:\n  enabled: true\n  region: us-west-2\n  regions: [eu-north-1]\n",
        )
        .unwrap();
        let ec2 = config.settings(Service::Ec2).unwrap().unwrap();
        assert_eq!(ec2.regions, ["eu-north-1"]);
    }

    #[test]
    fn default_thresholds_are_used_if_unset() {
        let config = Config::from_yaml("msk:\n  enabled: true\n  region: us-east-1\n").unwrap();
        let thresholds = config.service(Service::Msk).unwrap().thresholds();
        assert_eq!(thresholds, default_thresholds());
    }

    #[test]
    fn enabled_service_without_regions_is_an_error() {
        let config = Config::from_yaml("elasticache:\n  enabled: true\n").unwrap();
        let err = config.validate().unwrap_err();
        assert_matches!(
            err,
            ConfigError::NoRegions {
                service: Service::Elasticache
            }
        );
    }

    #[test]
    fn invalid_duration_is_an_error() {
        let err = Config::from_yaml("vpc:\n  enabled: true\n  region: us-east-1\n  interval: 15\n")
            .unwrap_err();
        assert_matches!(err, ConfigError::Load(_));
        let err = Config::from_yaml("vpc:\n  enabled: true\n  region: us-east-1\n  timeout: 1x\n")
            .unwrap_err();
        assert_matches!(err, ConfigError::Load(_));
    }

    #[test]
    fn parsing_duration_units() {
        let config = Config::from_yaml(
            "vpc:\n  enabled: true\n  region: us-east-1\n  interval: 1h 30m\n  \
             timeout: 1500000us\n  cache_ttl: 2m30s\n",
        )
        .unwrap();
        let vpc = config.settings(Service::Vpc).unwrap().unwrap();
        assert_eq!(vpc.interval, Duration::from_secs(5_400));
        assert_eq!(vpc.timeout, Duration::from_millis(1_500));
        assert_eq!(vpc.cache_ttl, Duration::from_secs(150));
    }

    #[test]
    fn zero_duration_is_an_error() {
        let config =
            Config::from_yaml("ec2:\n  enabled: true\n  region: us-east-1\n  interval: 0s\n")
                .unwrap();
        let err = config.validate().unwrap_err();
        assert_matches!(
            &err,
            ConfigError::ZeroDuration {
                service: Service::Ec2,
                field: "interval",
            }
        );
        assert_eq!(err.to_string(), "`ec2.interval` must be greater than 0");
    }

    #[test]
    fn loading_config_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(EXAMPLE_CONFIG.as_bytes()).unwrap();
        file.flush().unwrap();

        let config = Config::load(file.path()).unwrap();
        assert!(config.rds.as_ref().is_some_and(|rds| rds.enabled));

        let missing = file.path().with_extension("missing.yaml");
        let err = Config::load(&missing).unwrap_err();
        assert_matches!(err, ConfigError::Load(_));
    }
}
