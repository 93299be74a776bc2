//! VPC quotas and their usage.

use async_trait::async_trait;
use resource_metrics::{MetricDescriptor, MetricSample, ScrapeSource};

use std::sync::Arc;

use super::{Collector, CollectorBase, CollectorContext, QuotaMetric, REGION_LABEL};
use crate::{
    cidr::{subnet_capacity, subnet_usage},
    cloud::{CloudClient, Subnet, Vpc},
    config::{CollectorSettings, Service},
};

const SERVICE_CODE: &str = "vpc";
const VPCS_PER_REGION_QUOTA: &str = "L-F678F1CE";
const SUBNETS_PER_VPC_QUOTA: &str = "L-407747CB";
const ROUTES_PER_ROUTE_TABLE_QUOTA: &str = "L-93826ACB";
const INTERFACE_ENDPOINTS_PER_VPC_QUOTA: &str = "L-29B6F2EB";
const ROUTE_TABLES_PER_VPC_QUOTA: &str = "L-589F43AA";
const IPV4_BLOCKS_PER_VPC_QUOTA: &str = "L-83CA0A9D";

const VPC_ID_LABEL: &str = "vpcid";

#[derive(Debug)]
struct VpcQuotas {
    vpcs_per_region: QuotaMetric,
    subnets_per_vpc: QuotaMetric,
    routes_per_route_table: QuotaMetric,
    interface_endpoints_per_vpc: QuotaMetric,
    route_tables_per_vpc: QuotaMetric,
    ipv4_blocks_per_vpc: QuotaMetric,
}

impl VpcQuotas {
    fn new(context: &CollectorContext) -> Self {
        let descriptors = context.descriptors();
        let quota = |name: &str, help: &str, quota_code: &'static str| {
            QuotaMetric::new(
                descriptors,
                name,
                help,
                &[REGION_LABEL],
                (SERVICE_CODE, quota_code),
            )
        };

        Self {
            vpcs_per_region: quota(
                "vpc_vpcsperregion_quota",
                "The quota of VPCs per region",
                VPCS_PER_REGION_QUOTA,
            ),
            subnets_per_vpc: quota(
                "vpc_subnetspervpc_quota",
                "The quota of subnets per VPC",
                SUBNETS_PER_VPC_QUOTA,
            ),
            routes_per_route_table: quota(
                "vpc_routesperroutetable_quota",
                "The quota of routes per route table",
                ROUTES_PER_ROUTE_TABLE_QUOTA,
            ),
            interface_endpoints_per_vpc: quota(
                "vpc_interfacevpcendpointspervpc_quota",
                "The quota of interface VPC endpoints per VPC",
                INTERFACE_ENDPOINTS_PER_VPC_QUOTA,
            ),
            route_tables_per_vpc: quota(
                "vpc_routetablespervpc_quota",
                "The quota of route tables per VPC",
                ROUTE_TABLES_PER_VPC_QUOTA,
            ),
            ipv4_blocks_per_vpc: quota(
                "vpc_ipv4blockspervpc_quota",
                "The quota of IPv4 blocks per VPC",
                IPV4_BLOCKS_PER_VPC_QUOTA,
            ),
        }
    }

    fn all(&self) -> [&QuotaMetric; 6] {
        [
            &self.vpcs_per_region,
            &self.subnets_per_vpc,
            &self.routes_per_route_table,
            &self.interface_endpoints_per_vpc,
            &self.route_tables_per_vpc,
            &self.ipv4_blocks_per_vpc,
        ]
    }
}

/// Collects VPC quotas and usage: VPCs per region, subnets / endpoints / route tables /
/// IPv4 blocks per VPC, routes per route table, and IPv4 capacity and usage of subnets.
#[derive(Debug)]
pub struct VpcCollector {
    base: CollectorBase,
    quotas: VpcQuotas,
    vpcs_per_region_usage: Arc<MetricDescriptor>,
    subnets_per_vpc_usage: Arc<MetricDescriptor>,
    routes_per_route_table_usage: Arc<MetricDescriptor>,
    interface_endpoints_per_vpc_usage: Arc<MetricDescriptor>,
    route_tables_per_vpc_usage: Arc<MetricDescriptor>,
    ipv4_blocks_per_vpc_usage: Arc<MetricDescriptor>,
    subnet_ipv4_capacity: Arc<MetricDescriptor>,
    subnet_ipv4_usage: Arc<MetricDescriptor>,
}

impl VpcCollector {
    /// Creates a collector.
    pub fn new(context: &CollectorContext, settings: &CollectorSettings) -> Self {
        let descriptors = context.descriptors();
        let per_vpc = [REGION_LABEL, VPC_ID_LABEL];
        let per_subnet = [REGION_LABEL, VPC_ID_LABEL, "subnetid"];
        Self {
            base: CollectorBase::new(Service::Vpc, context, settings),
            quotas: VpcQuotas::new(context),
            vpcs_per_region_usage: descriptors.gauge(
                "vpc_vpcsperregion_usage",
                "The usage of VPCs per region",
                &[REGION_LABEL],
            ),
            subnets_per_vpc_usage: descriptors.gauge(
                "vpc_subnetspervpc_usage",
                "The usage of subnets per VPC",
                &per_vpc,
            ),
            routes_per_route_table_usage: descriptors.gauge(
                "vpc_routesperroutetable_usage",
                "The usage of routes per route table",
                &[REGION_LABEL, VPC_ID_LABEL, "routetableid"],
            ),
            interface_endpoints_per_vpc_usage: descriptors.gauge(
                "vpc_interfacevpcendpointspervpc_usage",
                "The usage of interface endpoints per VPC",
                &per_vpc,
            ),
            route_tables_per_vpc_usage: descriptors.gauge(
                "vpc_routetablespervpc_usage",
                "The usage of route tables per VPC",
                &per_vpc,
            ),
            ipv4_blocks_per_vpc_usage: descriptors.gauge(
                "vpc_ipv4blockspervpc_usage",
                "The usage of IPv4 blocks per VPC",
                &per_vpc,
            ),
            subnet_ipv4_capacity: descriptors.gauge(
                "vpc_subnet_ipv4_capacity",
                "Number of usable IPv4 addresses in a subnet",
                &per_subnet,
            ),
            subnet_ipv4_usage: descriptors.gauge(
                "vpc_subnet_ipv4_usage",
                "Number of used IPv4 addresses in a subnet",
                &per_subnet,
            ),
        }
    }

    async fn collect_quotas(&self, client: &CloudClient) {
        let region_labels = [client.region()];
        let quotas = self
            .quotas
            .all()
            .map(|quota| quota.collect(&self.base, client, &region_labels));
        futures::future::join_all(quotas).await;
    }

    async fn collect_vpcs(&self, client: &CloudClient) {
        let region = client.region();
        let vpcs = match client.describe_vpcs().await {
            Ok(vpcs) => vpcs,
            Err(err) => {
                tracing::warn!(region, %err, "Failed describing VPCs");
                return;
            }
        };
        let sample = self.vpcs_per_region_usage.sample(vpcs.len() as f64, [region]);
        self.base.cache().add_metric(sample);

        for vpc in &vpcs {
            tokio::join!(
                self.collect_subnets(client, vpc),
                self.collect_interface_endpoints(client, vpc),
                self.collect_route_tables(client, vpc),
                self.collect_ipv4_blocks(client, vpc),
            );
        }
    }

    async fn collect_subnets(&self, client: &CloudClient, vpc: &Vpc) {
        let region = client.region();
        let vpc_id = vpc.id.as_str();
        let subnets = match client.describe_subnets(Some(vpc_id)).await {
            Ok(subnets) => subnets,
            Err(err) => {
                tracing::warn!(region, vpc_id, %err, "Failed describing subnets");
                return;
            }
        };
        let sample = self
            .subnets_per_vpc_usage
            .sample(subnets.len() as f64, [region, vpc_id]);
        self.base.cache().add_metric(sample);

        for subnet in &subnets {
            self.collect_subnet_capacity(region, vpc_id, subnet);
        }
    }

    fn collect_subnet_capacity(&self, region: &str, vpc_id: &str, subnet: &Subnet) {
        let (Some(subnet_id), Some(cidr_block), Some(available)) = (
            subnet.id.as_deref(),
            subnet.cidr_block.as_deref(),
            subnet.available_ip_address_count,
        ) else {
            tracing::warn!(
                region,
                vpc_id,
                ?subnet,
                "Subnet description is incomplete; skipping"
            );
            self.base.record_error();
            return;
        };

        let capacity = match subnet_capacity(cidr_block) {
            Ok(capacity) => capacity,
            Err(err) => {
                tracing::warn!(region, vpc_id, subnet_id, %err, "Cannot compute subnet capacity");
                self.base.record_error();
                return;
            }
        };
        let usage = subnet_usage(capacity, available);
        let labels = [region, vpc_id, subnet_id];
        self.base.cache().add_metrics([
            self.subnet_ipv4_capacity.sample(capacity as f64, labels),
            self.subnet_ipv4_usage.sample(usage as f64, labels),
        ]);
    }

    async fn collect_interface_endpoints(&self, client: &CloudClient, vpc: &Vpc) {
        let region = client.region();
        let vpc_id = vpc.id.as_str();
        match client.describe_vpc_endpoints(Some(vpc_id)).await {
            Ok(endpoints) => {
                let sample = self
                    .interface_endpoints_per_vpc_usage
                    .sample(endpoints.len() as f64, [region, vpc_id]);
                self.base.cache().add_metric(sample);
            }
            Err(err) => {
                tracing::warn!(region, vpc_id, %err, "Failed describing VPC endpoints");
            }
        }
    }

    async fn collect_route_tables(&self, client: &CloudClient, vpc: &Vpc) {
        let region = client.region();
        let vpc_id = vpc.id.as_str();
        match client.describe_route_tables(Some(vpc_id)).await {
            Ok(tables) => {
                let sample = self
                    .route_tables_per_vpc_usage
                    .sample(tables.len() as f64, [region, vpc_id]);
                self.base.cache().add_metric(sample);
            }
            Err(err) => {
                tracing::warn!(region, vpc_id, %err, "Failed describing route tables");
            }
        }
    }

    async fn collect_ipv4_blocks(&self, client: &CloudClient, vpc: &Vpc) {
        let region = client.region();
        let vpc_id = vpc.id.as_str();
        match client.describe_vpc_cidr_associations(vpc_id).await {
            Ok(associations) => {
                let sample = self
                    .ipv4_blocks_per_vpc_usage
                    .sample(associations.len() as f64, [region, vpc_id]);
                self.base.cache().add_metric(sample);
            }
            Err(err) => {
                tracing::warn!(region, vpc_id, %err, "Failed describing VPC CIDR blocks");
            }
        }
    }

    async fn collect_routes(&self, client: &CloudClient) {
        let region = client.region();
        let tables = match client.describe_route_tables(None).await {
            Ok(tables) => tables,
            Err(err) => {
                tracing::warn!(region, %err, "Failed describing route tables");
                return;
            }
        };

        let samples = tables.iter().map(|table| {
            let vpc_id = table.vpc_id.as_deref().unwrap_or("");
            self.routes_per_route_table_usage
                .sample(table.route_count as f64, [region, vpc_id, table.id.as_str()])
        });
        self.base.cache().add_metrics(samples);
    }
}

impl ScrapeSource for VpcCollector {
    fn describe(&self) -> Vec<Arc<MetricDescriptor>> {
        let quotas = self.quotas.all().map(|quota| quota.descriptor.clone());
        let usages = [
            &self.vpcs_per_region_usage,
            &self.subnets_per_vpc_usage,
            &self.routes_per_route_table_usage,
            &self.interface_endpoints_per_vpc_usage,
            &self.route_tables_per_vpc_usage,
            &self.ipv4_blocks_per_vpc_usage,
            &self.subnet_ipv4_capacity,
            &self.subnet_ipv4_usage,
        ];
        quotas.into_iter().chain(usages.into_iter().cloned()).collect()
    }

    fn snapshot(&self) -> Vec<MetricSample> {
        self.base.cache().snapshot()
    }
}

#[async_trait]
impl Collector for VpcCollector {
    fn base(&self) -> &CollectorBase {
        &self.base
    }

    async fn collect_region(&self, client: &CloudClient) {
        tokio::join!(
            self.collect_quotas(client),
            self.collect_vpcs(client),
            self.collect_routes(client),
        );
    }
}

#[cfg(test)]
mod tests {
    use resource_metrics::ProcessMetrics;

    use super::*;
    use crate::{
        cloud::{mock::Operation, ApiError, MockCloudApi},
        collectors::collect_pass,
    };

    fn subnet(id: &str, vpc_id: &str, cidr_block: &str, available: i32) -> Subnet {
        Subnet {
            id: Some(id.to_owned()),
            vpc_id: Some(vpc_id.to_owned()),
            cidr_block: Some(cidr_block.to_owned()),
            available_ip_address_count: Some(available),
        }
    }

    fn mock_api() -> MockCloudApi {
        let mut api = MockCloudApi::new("eu-central-1")
            .with_vpcs(["vpc-a", "vpc-b"])
            .with_subnet(subnet("subnet-a1", "vpc-a", "10.0.0.0/24", 200))
            .with_subnet(subnet("subnet-a2", "vpc-a", "10.0.16.0/20", 4_000))
            .with_subnet(subnet("subnet-b1", "vpc-b", "10.1.0.0/29", 1))
            .with_subnet(Subnet {
                id: Some("subnet-b2".to_owned()),
                vpc_id: Some("vpc-b".to_owned()),
                ..Subnet::default()
            })
            .with_route_table("vpc-a", "rtb-a1", 4)
            .with_route_table("vpc-a", "rtb-a2", 2)
            .with_route_table("vpc-b", "rtb-b1", 1)
            .with_vpc_endpoint("vpc-a", "vpce-a1")
            .with_cidr_blocks("vpc-a", ["10.0.0.0/16", "10.100.0.0/16"])
            .with_cidr_blocks("vpc-b", ["10.1.0.0/16"]);
        let quotas = [
            (VPCS_PER_REGION_QUOTA, 5.0),
            (SUBNETS_PER_VPC_QUOTA, 200.0),
            (ROUTES_PER_ROUTE_TABLE_QUOTA, 50.0),
            (INTERFACE_ENDPOINTS_PER_VPC_QUOTA, 50.0),
            (ROUTE_TABLES_PER_VPC_QUOTA, 200.0),
            (IPV4_BLOCKS_PER_VPC_QUOTA, 5.0),
        ];
        for (code, value) in quotas {
            api = api.with_quota(SERVICE_CODE, code, Some(value));
        }
        api
    }

    fn find<'a>(
        samples: &'a [MetricSample],
        name: &str,
        labels: &[&str],
    ) -> Option<&'a MetricSample> {
        let name = format!("aws_resources_exporter_{name}");
        samples
            .iter()
            .find(|sample| sample.descriptor().name() == name && sample.label_values() == labels)
    }

    #[tokio::test]
    async fn collecting_vpc_metrics() {
        let metrics = Arc::new(ProcessMetrics::new("test"));
        let context = CollectorContext::new("123456789012", metrics.clone())
            .with_api(Arc::new(mock_api()));
        let collector = Arc::new(VpcCollector::new(
            &context,
            &CollectorSettings::new(["eu-central-1"]),
        ));
        collect_pass(&collector).await;
        let samples = collector.snapshot();

        let region = "eu-central-1";
        let value = |name: &str, labels: &[&str]| {
            find(&samples, name, labels)
                .unwrap_or_else(|| panic!("no sample {name} {labels:?}: {samples:#?}"))
                .value()
        };
        assert_eq!(value("vpc_vpcsperregion_quota", &[region]), 5.0);
        assert_eq!(value("vpc_ipv4blockspervpc_quota", &[region]), 5.0);
        assert_eq!(value("vpc_vpcsperregion_usage", &[region]), 2.0);
        assert_eq!(value("vpc_subnetspervpc_usage", &[region, "vpc-a"]), 2.0);
        assert_eq!(value("vpc_subnetspervpc_usage", &[region, "vpc-b"]), 2.0);
        assert_eq!(
            value("vpc_interfacevpcendpointspervpc_usage", &[region, "vpc-a"]),
            1.0
        );
        assert_eq!(
            value("vpc_interfacevpcendpointspervpc_usage", &[region, "vpc-b"]),
            0.0
        );
        assert_eq!(value("vpc_routetablespervpc_usage", &[region, "vpc-a"]), 2.0);
        assert_eq!(value("vpc_ipv4blockspervpc_usage", &[region, "vpc-a"]), 2.0);
        assert_eq!(
            value("vpc_routesperroutetable_usage", &[region, "vpc-a", "rtb-a1"]),
            4.0
        );
        assert_eq!(
            value("vpc_routesperroutetable_usage", &[region, "vpc-b", "rtb-b1"]),
            1.0
        );

        let subnet_a1 = [region, "vpc-a", "subnet-a1"];
        assert_eq!(value("vpc_subnet_ipv4_capacity", &subnet_a1), 251.0);
        assert_eq!(value("vpc_subnet_ipv4_usage", &subnet_a1), 51.0);
        let subnet_a2 = [region, "vpc-a", "subnet-a2"];
        assert_eq!(value("vpc_subnet_ipv4_capacity", &subnet_a2), 4_091.0);
        assert_eq!(value("vpc_subnet_ipv4_usage", &subnet_a2), 91.0);
        // `/29` is out of range and `subnet-b2` has no CIDR block.
        let labels = [region, "vpc-b", "subnet-b1"];
        assert!(find(&samples, "vpc_subnet_ipv4_capacity", &labels).is_none());
        let labels = [region, "vpc-b", "subnet-b2"];
        assert!(find(&samples, "vpc_subnet_ipv4_capacity", &labels).is_none());
        assert_eq!(metrics.errors(), 2);
    }

    #[tokio::test]
    async fn failed_quotas_do_not_affect_usage() {
        let api = Arc::new(mock_api());
        api.fail_always(
            Operation::GetServiceQuota,
            ApiError::with_code("AccessDeniedException", "denied"),
        );
        let metrics = Arc::new(ProcessMetrics::new("test"));
        let context = CollectorContext::new("123456789012", metrics.clone()).with_api(api.clone());
        let collector = Arc::new(VpcCollector::new(
            &context,
            &CollectorSettings::new(["eu-central-1"]),
        ));
        collect_pass(&collector).await;

        let samples = collector.snapshot();
        assert!(samples
            .iter()
            .all(|sample| !sample.descriptor().name().ends_with("_quota")));
        assert!(find(&samples, "vpc_vpcsperregion_usage", &["eu-central-1"]).is_some());
        assert_eq!(api.call_count(Operation::GetServiceQuota), 6);
        // 6 failed quotas + 2 invalid subnets
        assert_eq!(metrics.errors(), 8);
    }
}
