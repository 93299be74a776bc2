//! Counting wrapper around [`CloudApi`].

use resource_metrics::ProcessMetrics;

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use super::{
    ApiResult, CacheCluster, CidrAssociation, CloudApi, CloudError, DbInstance,
    HostedZone, HostedZoneLimit, HostedZoneLimitKind, LogFile, PendingMaintenance, RouteTable,
    StreamingCluster, Subnet, TransitGateway, Vpc, VpcEndpoint,
};

/// Bounded exponential backoff for throttled calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Max number of attempts including the first one.
    pub max_attempts: u32,
    /// Delay after the first throttled attempt. Doubles after each subsequent attempt.
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
        }
    }
}

/// Region-scoped cloud client used by collectors.
///
/// Each call increments the request counter of the shared [`ProcessMetrics`]; each surfaced
/// failure increments the error counter. Collectors must not count errors returned from
/// this client again.
#[derive(Debug, Clone)]
pub struct CloudClient {
    api: Arc<dyn CloudApi>,
    metrics: Arc<ProcessMetrics>,
    retry_policy: RetryPolicy,
}

impl CloudClient {
    /// Wraps the provided API.
    pub fn new(api: Arc<dyn CloudApi>, metrics: Arc<ProcessMetrics>) -> Self {
        Self {
            api,
            metrics,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Sets the retry policy for throttled DNS calls.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Returns the region of this client.
    pub fn region(&self) -> &str {
        self.api.region()
    }

    /// Returns process metrics updated by this client.
    pub fn process_metrics(&self) -> &ProcessMetrics {
        &self.metrics
    }

    async fn counted<T>(&self, call: impl Future<Output = ApiResult<T>>) -> Result<T, CloudError> {
        self.metrics.record_request();
        call.await.map_err(|err| {
            self.metrics.record_error();
            CloudError::Api(err)
        })
    }

    /// Calls `call` until it succeeds, fails with a non-throttling error, or the attempt bound
    /// is reached. Each attempt counts as a request; only the surfaced error is counted.
    async fn counted_with_retries<T, F, Fut>(&self, mut call: F) -> Result<T, CloudError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let mut delay = self.retry_policy.initial_delay;
        let mut attempt = 1;
        loop {
            self.metrics.record_request();
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_throttling() && attempt < self.retry_policy.max_attempts => {
                    tracing::debug!(
                        region = self.region(),
                        attempt,
                        ?delay,
                        %err,
                        "Throttled by upstream API, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(err) => {
                    self.metrics.record_error();
                    return Err(err.into());
                }
            }
        }
    }

    /// Lists all database instances.
    ///
    /// # Errors
    ///
    /// Returns an upstream error.
    pub async fn describe_db_instances(&self) -> Result<Vec<DbInstance>, CloudError> {
        self.counted(self.api.describe_db_instances()).await
    }

    /// Lists log files of a database instance.
    ///
    /// # Errors
    ///
    /// Returns an upstream error.
    pub async fn describe_db_log_files(
        &self,
        instance_id: &str,
    ) -> Result<Vec<LogFile>, CloudError> {
        self.counted(self.api.describe_db_log_files(instance_id)).await
    }

    /// Lists pending maintenance actions.
    ///
    /// # Errors
    ///
    /// Returns an upstream error.
    pub async fn describe_pending_maintenance_actions(
        &self,
    ) -> Result<Vec<PendingMaintenance>, CloudError> {
        self.counted(self.api.describe_pending_maintenance_actions())
            .await
    }

    /// Lists all VPCs.
    ///
    /// # Errors
    ///
    /// Returns an upstream error.
    pub async fn describe_vpcs(&self) -> Result<Vec<Vpc>, CloudError> {
        self.counted(self.api.describe_vpcs()).await
    }

    /// Lists subnets, optionally of a single VPC.
    ///
    /// # Errors
    ///
    /// Returns an upstream error.
    pub async fn describe_subnets(&self, vpc_id: Option<&str>) -> Result<Vec<Subnet>, CloudError> {
        self.counted(self.api.describe_subnets(vpc_id)).await
    }

    /// Lists route tables, optionally of a single VPC.
    ///
    /// # Errors
    ///
    /// Returns an upstream error.
    pub async fn describe_route_tables(
        &self,
        vpc_id: Option<&str>,
    ) -> Result<Vec<RouteTable>, CloudError> {
        self.counted(self.api.describe_route_tables(vpc_id)).await
    }

    /// Lists VPC endpoints, optionally of a single VPC.
    ///
    /// # Errors
    ///
    /// Returns an upstream error.
    pub async fn describe_vpc_endpoints(
        &self,
        vpc_id: Option<&str>,
    ) -> Result<Vec<VpcEndpoint>, CloudError> {
        self.counted(self.api.describe_vpc_endpoints(vpc_id)).await
    }

    /// Lists transit gateways.
    ///
    /// # Errors
    ///
    /// Returns an upstream error.
    pub async fn describe_transit_gateways(&self) -> Result<Vec<TransitGateway>, CloudError> {
        self.counted(self.api.describe_transit_gateways()).await
    }

    /// Lists IPv4 CIDR associations of a VPC.
    ///
    /// # Errors
    ///
    /// Returns an upstream error.
    pub async fn describe_vpc_cidr_associations(
        &self,
        vpc_id: &str,
    ) -> Result<Vec<CidrAssociation>, CloudError> {
        self.counted(self.api.describe_vpc_cidr_associations(vpc_id))
            .await
    }

    /// Lists cache clusters.
    ///
    /// # Errors
    ///
    /// Returns an upstream error.
    pub async fn describe_cache_clusters(&self) -> Result<Vec<CacheCluster>, CloudError> {
        self.counted(self.api.describe_cache_clusters()).await
    }

    /// Lists streaming clusters.
    ///
    /// # Errors
    ///
    /// Returns an upstream error.
    pub async fn list_streaming_clusters(&self) -> Result<Vec<StreamingCluster>, CloudError> {
        self.counted(self.api.list_streaming_clusters()).await
    }

    /// Lists all hosted zones, walking through all pages. Each page is a separate request
    /// retried on throttling.
    ///
    /// # Errors
    ///
    /// Returns an upstream error for the first page that could not be fetched.
    pub async fn list_hosted_zones(&self) -> Result<Vec<HostedZone>, CloudError> {
        let mut zones = vec![];
        let mut marker: Option<String> = None;
        loop {
            let page = self
                .counted_with_retries(|| self.api.list_hosted_zones_page(marker.as_deref()))
                .await?;
            zones.extend(page.zones);
            match page.next_marker {
                Some(next_marker) if page.is_truncated => marker = Some(next_marker),
                _ => break,
            }
        }
        Ok(zones)
    }

    /// Gets a per-zone limit with its current usage, retrying on throttling.
    ///
    /// # Errors
    ///
    /// Returns an upstream error.
    pub async fn get_hosted_zone_limit(
        &self,
        zone_id: &str,
        kind: HostedZoneLimitKind,
    ) -> Result<HostedZoneLimit, CloudError> {
        self.counted_with_retries(|| self.api.get_hosted_zone_limit(zone_id, kind))
            .await
    }

    /// Gets the value of a service quota.
    ///
    /// # Errors
    ///
    /// Returns an upstream error, or [`CloudError::QuotaValueMissing`] if the response
    /// has no value.
    pub async fn get_service_quota(
        &self,
        service_code: &str,
        quota_code: &str,
    ) -> Result<f64, CloudError> {
        let value = self
            .counted(self.api.get_service_quota(service_code, quota_code))
            .await?;
        value.ok_or_else(|| {
            self.metrics.record_error();
            CloudError::QuotaValueMissing {
                service_code: service_code.to_owned(),
                quota_code: quota_code.to_owned(),
            }
        })
    }

    /// Gets the account summary map.
    ///
    /// # Errors
    ///
    /// Returns an upstream error.
    pub async fn get_account_summary(&self) -> Result<HashMap<String, i32>, CloudError> {
        self.counted(self.api.get_account_summary()).await
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::cloud::{mock::Operation, ApiError, HostedZonesPage, MockCloudApi};

    fn client(api: MockCloudApi) -> (CloudClient, Arc<MockCloudApi>) {
        let api = Arc::new(api);
        let metrics = Arc::new(ProcessMetrics::new("test"));
        (CloudClient::new(api.clone(), metrics), api)
    }

    fn zone(id: &str) -> HostedZone {
        HostedZone {
            id: format!("/hostedzone/{id}"),
            name: format!("{id}.example.com."),
        }
    }

    #[tokio::test]
    async fn requests_and_errors_are_counted_once() {
        let api = MockCloudApi::new("us-east-1").with_vpcs(["vpc-1", "vpc-2"]);
        api.fail_always(
            Operation::DescribeTransitGateways,
            ApiError::with_code("AccessDenied", "not allowed"),
        );
        let (client, _) = client(api);

        let vpcs = client.describe_vpcs().await.unwrap();
        assert_eq!(vpcs.len(), 2);
        let err = client.describe_transit_gateways().await.unwrap_err();
        assert_matches!(err, CloudError::Api(err) if err.code() == Some("AccessDenied"));

        assert_eq!(client.process_metrics().requests(), 2);
        assert_eq!(client.process_metrics().errors(), 1);
    }

    #[tokio::test]
    async fn missing_quota_value_is_a_counted_error() {
        let api = MockCloudApi::new("us-east-1")
            .with_quota("vpc", "L-F678F1CE", Some(5.0))
            .with_quota("vpc", "L-407747CB", None);
        let (client, _) = client(api);

        let value = client.get_service_quota("vpc", "L-F678F1CE").await.unwrap();
        assert_eq!(value, 5.0);
        let err = client
            .get_service_quota("vpc", "L-407747CB")
            .await
            .unwrap_err();
        assert_matches!(
            err,
            CloudError::QuotaValueMissing { quota_code, .. } if quota_code == "L-407747CB"
        );
        assert_eq!(client.process_metrics().requests(), 2);
        assert_eq!(client.process_metrics().errors(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_zone_limit_is_retried() {
        let api = MockCloudApi::new("us-east-1").with_zone_limit(
            "Z1",
            HostedZoneLimit {
                current: 42,
                limit: 10_000,
            },
        );
        api.fail_next(
            Operation::GetHostedZoneLimit,
            ApiError::with_code("Throttling", "Rate exceeded"),
            3,
        );
        let (client, api) = client(api);

        let started_at = tokio::time::Instant::now();
        let limit = client
            .get_hosted_zone_limit("Z1", HostedZoneLimitKind::MaxRrsetsByZone)
            .await
            .unwrap();
        assert_eq!(limit.current, 42);
        // 1s + 2s + 4s of backoff
        assert_eq!(started_at.elapsed(), Duration::from_secs(7));

        assert_eq!(api.call_count(Operation::GetHostedZoneLimit), 4);
        assert_eq!(client.process_metrics().requests(), 4);
        assert_eq!(client.process_metrics().errors(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn throttling_retries_are_bounded() {
        let api = MockCloudApi::new("us-east-1");
        api.fail_always(
            Operation::ListHostedZones,
            ApiError::with_code("Throttling", "Rate exceeded"),
        );
        let (client, api) = client(api);
        let client = client.with_retry_policy(RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
        });

        let err = client.list_hosted_zones().await.unwrap_err();
        assert!(err.is_throttling());
        assert_eq!(api.call_count(Operation::ListHostedZones), 3);
        assert_eq!(client.process_metrics().requests(), 3);
        assert_eq!(client.process_metrics().errors(), 1);
    }

    #[tokio::test]
    async fn non_throttling_errors_are_not_retried() {
        let api = MockCloudApi::new("us-east-1");
        api.fail_next(
            Operation::GetHostedZoneLimit,
            ApiError::with_code("NoSuchHostedZone", "gone"),
            1,
        );
        let (client, api) = client(api);

        let err = client
            .get_hosted_zone_limit("Z1", HostedZoneLimitKind::MaxRrsetsByZone)
            .await
            .unwrap_err();
        assert!(!err.is_throttling());
        assert_eq!(api.call_count(Operation::GetHostedZoneLimit), 1);
        assert_eq!(client.process_metrics().errors(), 1);
    }

    #[tokio::test]
    async fn hosted_zones_are_concatenated_in_page_order() {
        let api = MockCloudApi::new("us-east-1").with_hosted_zone_pages(vec![
            vec![zone("Z1"), zone("Z2")],
            vec![zone("Z3")],
            vec![zone("Z4")],
        ]);
        let (client, api) = client(api);

        let zones = client.list_hosted_zones().await.unwrap();
        let ids: Vec<_> = zones.iter().map(HostedZone::short_id).collect();
        assert_eq!(ids, ["Z1", "Z2", "Z3", "Z4"]);
        assert_eq!(api.call_count(Operation::ListHostedZones), 3);
        assert_eq!(client.process_metrics().requests(), 3);
    }

    #[tokio::test]
    async fn fully_consumed_listing_stops() {
        let api = MockCloudApi::new("us-east-1");
        let (client, api) = client(api);
        let page = api.list_hosted_zones_page(Some("page-100")).await.unwrap();
        assert_eq!(page, HostedZonesPage::default());

        let zones = client.list_hosted_zones().await.unwrap();
        assert!(zones.is_empty());
        assert_eq!(client.process_metrics().requests(), 1);
    }
}
