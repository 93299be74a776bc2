//! Scriptable in-memory [`CloudApi`] implementation for tests.

use async_trait::async_trait;
use parking_lot::Mutex;

use std::collections::{HashMap, VecDeque};

use super::{
    ApiError, ApiResult, CacheCluster, CidrAssociation, CloudApi, DbInstance, HostedZone,
    HostedZoneLimit, HostedZoneLimitKind, HostedZonesPage, LogFile, PendingMaintenance,
    RouteTable, StreamingCluster, Subnet, TransitGateway, Vpc, VpcEndpoint,
};

/// Operation of [`CloudApi`], used to inject failures and inspect calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Operation {
    DescribeDbInstances,
    DescribeDbLogFiles,
    DescribePendingMaintenanceActions,
    DescribeVpcs,
    DescribeSubnets,
    DescribeRouteTables,
    DescribeVpcEndpoints,
    DescribeTransitGateways,
    DescribeVpcCidrAssociations,
    DescribeCacheClusters,
    ListStreamingClusters,
    ListHostedZones,
    GetHostedZoneLimit,
    GetServiceQuota,
    GetAccountSummary,
}

#[derive(Debug, Default)]
struct MockState {
    db_instances: Vec<DbInstance>,
    log_files: HashMap<String, Vec<LogFile>>,
    pending_maintenance: Vec<PendingMaintenance>,
    vpcs: Vec<Vpc>,
    subnets: Vec<Subnet>,
    route_tables: Vec<RouteTable>,
    vpc_endpoints: Vec<VpcEndpoint>,
    transit_gateways: Vec<TransitGateway>,
    cidr_associations: HashMap<String, Vec<CidrAssociation>>,
    cache_clusters: Vec<CacheCluster>,
    streaming_clusters: Vec<StreamingCluster>,
    hosted_zone_pages: Vec<Vec<HostedZone>>,
    zone_limits: HashMap<String, HostedZoneLimit>,
    quotas: HashMap<(String, String), Option<f64>>,
    account_summary: HashMap<String, i32>,

    queued_failures: HashMap<Operation, VecDeque<ApiError>>,
    persistent_failures: HashMap<Operation, ApiError>,
    calls: Vec<(Operation, Option<String>)>,
}

/// Scriptable [`CloudApi`]: returns configured resources, records calls, and fails on demand.
///
/// Unconfigured list operations return empty lists. Unconfigured quotas and zone limits
/// fail with a not-found error.
#[derive(Debug)]
pub struct MockCloudApi {
    region: String,
    state: Mutex<MockState>,
}

impl MockCloudApi {
    /// Creates an empty mock scoped to `region`.
    pub fn new(region: &str) -> Self {
        Self {
            region: region.to_owned(),
            state: Mutex::default(),
        }
    }

    /// Sets database instances.
    #[must_use]
    pub fn with_db_instances(self, instances: impl IntoIterator<Item = DbInstance>) -> Self {
        self.state.lock().db_instances = instances.into_iter().collect();
        self
    }

    /// Sets log files of a database instance.
    #[must_use]
    pub fn with_log_files(self, instance_id: &str, files: Vec<LogFile>) -> Self {
        self.state
            .lock()
            .log_files
            .insert(instance_id.to_owned(), files);
        self
    }

    /// Sets pending maintenance actions.
    #[must_use]
    pub fn with_pending_maintenance(self, pending: Vec<PendingMaintenance>) -> Self {
        self.state.lock().pending_maintenance = pending;
        self
    }

    /// Sets VPCs by their IDs.
    #[must_use]
    pub fn with_vpcs<'a>(self, ids: impl IntoIterator<Item = &'a str>) -> Self {
        self.state.lock().vpcs = ids
            .into_iter()
            .map(|id| Vpc { id: id.to_owned() })
            .collect();
        self
    }

    /// Adds a subnet.
    #[must_use]
    pub fn with_subnet(self, subnet: Subnet) -> Self {
        self.state.lock().subnets.push(subnet);
        self
    }

    /// Adds a route table.
    #[must_use]
    pub fn with_route_table(self, vpc_id: &str, table_id: &str, route_count: usize) -> Self {
        self.state.lock().route_tables.push(RouteTable {
            id: table_id.to_owned(),
            vpc_id: Some(vpc_id.to_owned()),
            route_count,
        });
        self
    }

    /// Adds a VPC endpoint.
    #[must_use]
    pub fn with_vpc_endpoint(self, vpc_id: &str, endpoint_id: &str) -> Self {
        self.state.lock().vpc_endpoints.push(VpcEndpoint {
            id: endpoint_id.to_owned(),
            vpc_id: Some(vpc_id.to_owned()),
        });
        self
    }

    /// Sets transit gateways by their IDs.
    #[must_use]
    pub fn with_transit_gateways<'a>(self, ids: impl IntoIterator<Item = &'a str>) -> Self {
        self.state.lock().transit_gateways = ids
            .into_iter()
            .map(|id| TransitGateway { id: id.to_owned() })
            .collect();
        self
    }

    /// Sets IPv4 CIDR blocks associated with a VPC.
    #[must_use]
    pub fn with_cidr_blocks<'a>(
        self,
        vpc_id: &str,
        blocks: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let associations = blocks
            .into_iter()
            .enumerate()
            .map(|(i, block)| CidrAssociation {
                association_id: format!("{vpc_id}-cidr-assoc-{i}"),
                cidr_block: block.to_owned(),
            })
            .collect();
        self.state
            .lock()
            .cidr_associations
            .insert(vpc_id.to_owned(), associations);
        self
    }

    /// Sets cache clusters.
    #[must_use]
    pub fn with_cache_clusters(self, clusters: Vec<CacheCluster>) -> Self {
        self.state.lock().cache_clusters = clusters;
        self
    }

    /// Sets streaming clusters as `(name, version)` pairs.
    #[must_use]
    pub fn with_streaming_clusters<'a>(
        self,
        clusters: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        self.state.lock().streaming_clusters = clusters
            .into_iter()
            .map(|(name, version)| StreamingCluster {
                name: name.to_owned(),
                version: version.to_owned(),
            })
            .collect();
        self
    }

    /// Sets hosted zones split into pages. Page `i > 0` is requested with marker `page-{i}`.
    #[must_use]
    pub fn with_hosted_zone_pages(self, pages: Vec<Vec<HostedZone>>) -> Self {
        self.state.lock().hosted_zone_pages = pages;
        self
    }

    /// Sets the records-per-zone limit of a zone (keyed by the ID without `/hostedzone/`).
    #[must_use]
    pub fn with_zone_limit(self, zone_id: &str, limit: HostedZoneLimit) -> Self {
        self.state
            .lock()
            .zone_limits
            .insert(zone_id.to_owned(), limit);
        self
    }

    /// Sets a service quota value. `None` emulates a response without a value.
    #[must_use]
    pub fn with_quota(self, service_code: &str, quota_code: &str, value: Option<f64>) -> Self {
        self.state
            .lock()
            .quotas
            .insert((service_code.to_owned(), quota_code.to_owned()), value);
        self
    }

    /// Sets the account summary.
    #[must_use]
    pub fn with_account_summary<'a>(
        self,
        entries: impl IntoIterator<Item = (&'a str, i32)>,
    ) -> Self {
        self.state.lock().account_summary = entries
            .into_iter()
            .map(|(key, value)| (key.to_owned(), value))
            .collect();
        self
    }

    /// Makes the next `times` calls of `operation` fail with `err`.
    pub fn fail_next(&self, operation: Operation, err: ApiError, times: usize) {
        let mut state = self.state.lock();
        let queue = state.queued_failures.entry(operation).or_default();
        queue.extend(std::iter::repeat(err).take(times));
    }

    /// Makes all calls of `operation` fail with `err` (after queued failures are exhausted).
    pub fn fail_always(&self, operation: Operation, err: ApiError) {
        self.state.lock().persistent_failures.insert(operation, err);
    }

    /// Removes all injected failures.
    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.queued_failures.clear();
        state.persistent_failures.clear();
    }

    /// Returns the number of calls of `operation` made so far.
    pub fn call_count(&self, operation: Operation) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(op, _)| *op == operation)
            .count()
    }

    /// Returns arguments of all calls of `operation` in call order.
    pub fn call_args(&self, operation: Operation) -> Vec<Option<String>> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(op, _)| *op == operation)
            .map(|(_, arg)| arg.clone())
            .collect()
    }

    fn begin(&self, operation: Operation, arg: Option<&str>) -> ApiResult<()> {
        let mut state = self.state.lock();
        state.calls.push((operation, arg.map(str::to_owned)));
        if let Some(err) = state
            .queued_failures
            .get_mut(&operation)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        match state.persistent_failures.get(&operation) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

fn matches_vpc(resource_vpc: Option<&String>, filter: Option<&str>) -> bool {
    filter.map_or(true, |vpc_id| resource_vpc.map(String::as_str) == Some(vpc_id))
}

#[async_trait]
impl CloudApi for MockCloudApi {
    fn region(&self) -> &str {
        &self.region
    }

    async fn describe_db_instances(&self) -> ApiResult<Vec<DbInstance>> {
        self.begin(Operation::DescribeDbInstances, None)?;
        Ok(self.state.lock().db_instances.clone())
    }

    async fn describe_db_log_files(&self, instance_id: &str) -> ApiResult<Vec<LogFile>> {
        self.begin(Operation::DescribeDbLogFiles, Some(instance_id))?;
        let state = self.state.lock();
        Ok(state.log_files.get(instance_id).cloned().unwrap_or_default())
    }

    async fn describe_pending_maintenance_actions(&self) -> ApiResult<Vec<PendingMaintenance>> {
        self.begin(Operation::DescribePendingMaintenanceActions, None)?;
        Ok(self.state.lock().pending_maintenance.clone())
    }

    async fn describe_vpcs(&self) -> ApiResult<Vec<Vpc>> {
        self.begin(Operation::DescribeVpcs, None)?;
        Ok(self.state.lock().vpcs.clone())
    }

    async fn describe_subnets(&self, vpc_id: Option<&str>) -> ApiResult<Vec<Subnet>> {
        self.begin(Operation::DescribeSubnets, vpc_id)?;
        let state = self.state.lock();
        let subnets = state.subnets.iter();
        Ok(subnets
            .filter(|subnet| matches_vpc(subnet.vpc_id.as_ref(), vpc_id))
            .cloned()
            .collect())
    }

    async fn describe_route_tables(&self, vpc_id: Option<&str>) -> ApiResult<Vec<RouteTable>> {
        self.begin(Operation::DescribeRouteTables, vpc_id)?;
        let state = self.state.lock();
        let tables = state.route_tables.iter();
        Ok(tables
            .filter(|table| matches_vpc(table.vpc_id.as_ref(), vpc_id))
            .cloned()
            .collect())
    }

    async fn describe_vpc_endpoints(&self, vpc_id: Option<&str>) -> ApiResult<Vec<VpcEndpoint>> {
        self.begin(Operation::DescribeVpcEndpoints, vpc_id)?;
        let state = self.state.lock();
        let endpoints = state.vpc_endpoints.iter();
        Ok(endpoints
            .filter(|endpoint| matches_vpc(endpoint.vpc_id.as_ref(), vpc_id))
            .cloned()
            .collect())
    }

    async fn describe_transit_gateways(&self) -> ApiResult<Vec<TransitGateway>> {
        self.begin(Operation::DescribeTransitGateways, None)?;
        Ok(self.state.lock().transit_gateways.clone())
    }

    async fn describe_vpc_cidr_associations(
        &self,
        vpc_id: &str,
    ) -> ApiResult<Vec<CidrAssociation>> {
        self.begin(Operation::DescribeVpcCidrAssociations, Some(vpc_id))?;
        let state = self.state.lock();
        Ok(state
            .cidr_associations
            .get(vpc_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn describe_cache_clusters(&self) -> ApiResult<Vec<CacheCluster>> {
        self.begin(Operation::DescribeCacheClusters, None)?;
        Ok(self.state.lock().cache_clusters.clone())
    }

    async fn list_streaming_clusters(&self) -> ApiResult<Vec<StreamingCluster>> {
        self.begin(Operation::ListStreamingClusters, None)?;
        Ok(self.state.lock().streaming_clusters.clone())
    }

    async fn list_hosted_zones_page(&self, marker: Option<&str>) -> ApiResult<HostedZonesPage> {
        self.begin(Operation::ListHostedZones, marker)?;
        let page_idx = match marker {
            None => 0,
            Some(marker) => marker
                .strip_prefix("page-")
                .and_then(|idx| idx.parse::<usize>().ok())
                .ok_or_else(|| ApiError::with_code("InvalidPaginationToken", marker))?,
        };

        let state = self.state.lock();
        let Some(zones) = state.hosted_zone_pages.get(page_idx) else {
            return Ok(HostedZonesPage::default());
        };
        let is_truncated = page_idx + 1 < state.hosted_zone_pages.len();
        Ok(HostedZonesPage {
            zones: zones.clone(),
            next_marker: is_truncated.then(|| format!("page-{}", page_idx + 1)),
            is_truncated,
        })
    }

    async fn get_hosted_zone_limit(
        &self,
        zone_id: &str,
        kind: HostedZoneLimitKind,
    ) -> ApiResult<HostedZoneLimit> {
        self.begin(Operation::GetHostedZoneLimit, Some(zone_id))?;
        if kind != HostedZoneLimitKind::MaxRrsetsByZone {
            return Err(ApiError::with_code("InvalidInput", kind.as_str()));
        }
        let state = self.state.lock();
        state
            .zone_limits
            .get(zone_id)
            .copied()
            .ok_or_else(|| ApiError::with_code("NoSuchHostedZone", zone_id))
    }

    async fn get_service_quota(
        &self,
        service_code: &str,
        quota_code: &str,
    ) -> ApiResult<Option<f64>> {
        self.begin(Operation::GetServiceQuota, Some(quota_code))?;
        let state = self.state.lock();
        let key = (service_code.to_owned(), quota_code.to_owned());
        state.quotas.get(&key).copied().ok_or_else(|| {
            ApiError::with_code(
                "NoSuchResourceException",
                format!("quota {service_code}/{quota_code} is not configured"),
            )
        })
    }

    async fn get_account_summary(&self) -> ApiResult<HashMap<String, i32>> {
        self.begin(Operation::GetAccountSummary, None)?;
        Ok(self.state.lock().account_summary.clone())
    }
}
