//! Cloud client facade: a narrow set of per-region operations collectors depend on.
//!
//! [`CloudApi`] is the raw capability set, implemented by [`AwsApi`] on top of the AWS SDK and
//! by [`MockCloudApi`] in tests. Collectors never call it directly; they go through
//! [`CloudClient`], which counts requests and errors in [`ProcessMetrics`] and retries
//! throttled calls where this is allowed.
//!
//! [`ProcessMetrics`]: resource_metrics::ProcessMetrics

use async_trait::async_trait;

use std::{collections::HashMap, error, fmt};

mod aws;
mod client;
pub mod mock;
mod model;

pub use self::{
    aws::{fetch_account_id, AwsApi},
    client::{CloudClient, RetryPolicy},
    mock::MockCloudApi,
    model::{
        CacheCluster, CidrAssociation, DbInstance, HostedZone, HostedZoneLimit,
        HostedZoneLimitKind, HostedZonesPage, LogFile, MaintenanceAction, PendingMaintenance,
        RouteTable, StreamingCluster, Subnet, TransitGateway, Vpc, VpcEndpoint,
    },
};

/// Error codes the provider uses to signal throttling.
const THROTTLING_CODES: &[&str] = &["Throttling", "ThrottlingException"];

/// Raw upstream failure as reported by a [`CloudApi`] implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    code: Option<String>,
    message: String,
}

impl ApiError {
    /// Creates an error with the provider-assigned `code` (if any).
    pub fn new(code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Creates an error with the specified provider code.
    pub fn with_code(code: &str, message: impl Into<String>) -> Self {
        Self::new(Some(code.to_owned()), message)
    }

    /// Returns the provider error code.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Checks whether this error is a throttling refusal that may be retried.
    pub fn is_throttling(&self) -> bool {
        self.code
            .as_deref()
            .is_some_and(|code| THROTTLING_CODES.contains(&code))
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = &self.code {
            write!(formatter, "{code}: {}", self.message)
        } else {
            formatter.write_str(&self.message)
        }
    }
}

impl error::Error for ApiError {}

/// Failure surfaced by [`CloudClient`]. Every value of this type has already been counted
/// as an error in process metrics.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum CloudError {
    /// Upstream call failed.
    Api(ApiError),
    /// Service quota response did not contain a value.
    QuotaValueMissing {
        /// Service code of the quota.
        service_code: String,
        /// Quota code.
        quota_code: String,
    },
}

impl CloudError {
    /// Checks whether this error is a throttling refusal.
    pub fn is_throttling(&self) -> bool {
        matches!(self, Self::Api(err) if err.is_throttling())
    }
}

impl From<ApiError> for CloudError {
    fn from(err: ApiError) -> Self {
        Self::Api(err)
    }
}

impl fmt::Display for CloudError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Api(err) => write!(formatter, "upstream API error: {err}"),
            Self::QuotaValueMissing {
                service_code,
                quota_code,
            } => write!(
                formatter,
                "quota value missing for service `{service_code}`, quota `{quota_code}`"
            ),
        }
    }
}

impl error::Error for CloudError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Api(err) => Some(err),
            Self::QuotaValueMissing { .. } => None,
        }
    }
}

/// Result of a raw [`CloudApi`] call.
pub type ApiResult<T> = Result<T, ApiError>;

/// Raw per-region operations over the provider SDK.
///
/// List operations return fully materialized sequences; pagination is handled by implementations.
/// The only exception is [`Self::list_hosted_zones_page()`], which is paged by the caller so that
/// each page can be retried on throttling separately.
#[async_trait]
pub trait CloudApi: fmt::Debug + Send + Sync {
    /// Region this API is scoped to.
    fn region(&self) -> &str;

    /// Lists all database instances.
    async fn describe_db_instances(&self) -> ApiResult<Vec<DbInstance>>;
    /// Lists log files of the specified database instance.
    async fn describe_db_log_files(&self, instance_id: &str) -> ApiResult<Vec<LogFile>>;
    /// Lists pending maintenance actions for all resources.
    async fn describe_pending_maintenance_actions(&self) -> ApiResult<Vec<PendingMaintenance>>;

    /// Lists all VPCs.
    async fn describe_vpcs(&self) -> ApiResult<Vec<Vpc>>;
    /// Lists subnets, optionally restricted to a single VPC.
    async fn describe_subnets(&self, vpc_id: Option<&str>) -> ApiResult<Vec<Subnet>>;
    /// Lists route tables, optionally restricted to a single VPC.
    async fn describe_route_tables(&self, vpc_id: Option<&str>) -> ApiResult<Vec<RouteTable>>;
    /// Lists VPC endpoints, optionally restricted to a single VPC.
    async fn describe_vpc_endpoints(&self, vpc_id: Option<&str>) -> ApiResult<Vec<VpcEndpoint>>;
    /// Lists all transit gateways.
    async fn describe_transit_gateways(&self) -> ApiResult<Vec<TransitGateway>>;
    /// Lists IPv4 CIDR block associations of a VPC.
    async fn describe_vpc_cidr_associations(&self, vpc_id: &str)
        -> ApiResult<Vec<CidrAssociation>>;

    /// Lists all cache clusters.
    async fn describe_cache_clusters(&self) -> ApiResult<Vec<CacheCluster>>;
    /// Lists all streaming clusters.
    async fn list_streaming_clusters(&self) -> ApiResult<Vec<StreamingCluster>>;

    /// Returns a single page of hosted zones starting from `marker`.
    async fn list_hosted_zones_page(&self, marker: Option<&str>) -> ApiResult<HostedZonesPage>;
    /// Returns a per-zone limit together with its current usage.
    async fn get_hosted_zone_limit(
        &self,
        zone_id: &str,
        kind: HostedZoneLimitKind,
    ) -> ApiResult<HostedZoneLimit>;

    /// Returns the applied value of a service quota. `Ok(None)` means that the quota exists,
    /// but its value is absent in the response.
    async fn get_service_quota(
        &self,
        service_code: &str,
        quota_code: &str,
    ) -> ApiResult<Option<f64>>;
    /// Returns the account summary map (e.g., `Roles`, `RolesQuota`).
    async fn get_account_summary(&self) -> ApiResult<HashMap<String, i32>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttling_codes() {
        assert!(ApiError::with_code("Throttling", "Rate exceeded").is_throttling());
        assert!(ApiError::with_code("ThrottlingException", "Rate exceeded").is_throttling());
        assert!(!ApiError::with_code("AccessDenied", "nope").is_throttling());
        assert!(!ApiError::new(None, "dispatch failure").is_throttling());

        let err = CloudError::from(ApiError::with_code("Throttling", "Rate exceeded"));
        assert!(err.is_throttling());
        assert_eq!(err.to_string(), "upstream API error: Throttling: Rate exceeded");
    }

    #[test]
    fn quota_value_missing_display() {
        let err = CloudError::QuotaValueMissing {
            service_code: "vpc".to_owned(),
            quota_code: "L-F678F1CE".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "quota value missing for service `vpc`, quota `L-F678F1CE`"
        );
    }
}
