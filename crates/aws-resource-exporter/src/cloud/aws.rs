//! [`CloudApi`] implementation based on the AWS SDK.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_ec2::types::Filter;
use aws_sdk_rds::primitives::DateTime as SdkDateTime;
use aws_sdk_route53::types::HostedZoneLimitType;
use aws_sdk_sts::{
    config::Region,
    error::{DisplayErrorContext, ProvideErrorMetadata},
};
use chrono::{DateTime, Utc};

use std::{collections::HashMap, error, fmt};

use super::{
    ApiError, ApiResult, CacheCluster, CidrAssociation, CloudApi, DbInstance, HostedZone,
    HostedZoneLimit, HostedZoneLimitKind, HostedZonesPage, LogFile, MaintenanceAction,
    PendingMaintenance, RouteTable, StreamingCluster, Subnet, TransitGateway, Vpc, VpcEndpoint,
};

fn api_error<E>(err: E) -> ApiError
where
    E: ProvideErrorMetadata + error::Error,
{
    let code = err.code().map(str::to_owned);
    ApiError::new(code, DisplayErrorContext(&err).to_string())
}

fn to_chrono(timestamp: &SdkDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp.secs(), timestamp.subsec_nanos())
}

fn vpc_filter(vpc_id: Option<&str>) -> Option<Vec<Filter>> {
    vpc_id.map(|vpc_id| vec![Filter::builder().name("vpc-id").values(vpc_id).build()])
}

/// Loads the shared SDK configuration (credentials chain, retry settings) for `region`.
pub async fn load_sdk_config(region: &str) -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_owned()))
        .load()
        .await
}

/// Returns the account ID of the caller via `sts:GetCallerIdentity`.
///
/// # Errors
///
/// Returns an upstream error, or an error if the response contains no account.
pub async fn fetch_account_id(region: &str) -> ApiResult<String> {
    let config = load_sdk_config(region).await;
    let sts = aws_sdk_sts::Client::new(&config);
    let identity = sts.get_caller_identity().send().await.map_err(api_error)?;
    identity
        .account()
        .map(str::to_owned)
        .ok_or_else(|| ApiError::new(None, "caller identity contains no account ID"))
}

/// AWS SDK clients scoped to a single region.
pub struct AwsApi {
    region: String,
    rds: aws_sdk_rds::Client,
    ec2: aws_sdk_ec2::Client,
    service_quotas: aws_sdk_servicequotas::Client,
    route53: aws_sdk_route53::Client,
    elasticache: aws_sdk_elasticache::Client,
    kafka: aws_sdk_kafka::Client,
    iam: aws_sdk_iam::Client,
}

impl fmt::Debug for AwsApi {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AwsApi")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl AwsApi {
    /// Creates clients for `region` using the default credentials chain.
    pub async fn new(region: &str) -> Self {
        let config = load_sdk_config(region).await;
        Self::from_config(region, &config)
    }

    /// Creates clients from an already loaded SDK configuration.
    pub fn from_config(region: &str, config: &SdkConfig) -> Self {
        Self {
            region: region.to_owned(),
            rds: aws_sdk_rds::Client::new(config),
            ec2: aws_sdk_ec2::Client::new(config),
            service_quotas: aws_sdk_servicequotas::Client::new(config),
            route53: aws_sdk_route53::Client::new(config),
            elasticache: aws_sdk_elasticache::Client::new(config),
            kafka: aws_sdk_kafka::Client::new(config),
            iam: aws_sdk_iam::Client::new(config),
        }
    }
}

#[async_trait]
impl CloudApi for AwsApi {
    fn region(&self) -> &str {
        &self.region
    }

    async fn describe_db_instances(&self) -> ApiResult<Vec<DbInstance>> {
        let mut instances = vec![];
        let mut pages = self.rds.describe_db_instances().into_paginator().send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(api_error)?;
            instances.extend(page.db_instances().iter().map(|instance| DbInstance {
                identifier: instance
                    .db_instance_identifier()
                    .unwrap_or_default()
                    .to_owned(),
                allocated_storage_gb: instance.allocated_storage().unwrap_or_default(),
                status: instance.db_instance_status().unwrap_or_default().to_owned(),
                engine: instance.engine().unwrap_or_default().to_owned(),
                engine_version: instance.engine_version().unwrap_or_default().to_owned(),
                instance_class: instance.db_instance_class().unwrap_or_default().to_owned(),
                publicly_accessible: instance.publicly_accessible().unwrap_or_default(),
                storage_encrypted: instance.storage_encrypted().unwrap_or_default(),
                latest_restorable_time: instance.latest_restorable_time().and_then(to_chrono),
                parameter_group: instance
                    .db_parameter_groups()
                    .first()
                    .and_then(|group| group.db_parameter_group_name())
                    .map(str::to_owned),
            }));
        }
        Ok(instances)
    }

    async fn describe_db_log_files(&self, instance_id: &str) -> ApiResult<Vec<LogFile>> {
        let mut files = vec![];
        let mut pages = self
            .rds
            .describe_db_log_files()
            .db_instance_identifier(instance_id)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(api_error)?;
            files.extend(page.describe_db_log_files().iter().map(|file| LogFile {
                name: file.log_file_name().unwrap_or_default().to_owned(),
                size: file.size().unwrap_or_default(),
            }));
        }
        Ok(files)
    }

    async fn describe_pending_maintenance_actions(&self) -> ApiResult<Vec<PendingMaintenance>> {
        let mut pending = vec![];
        let mut pages = self
            .rds
            .describe_pending_maintenance_actions()
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(api_error)?;
            for resource in page.pending_maintenance_actions() {
                let actions = resource.pending_maintenance_action_details().iter();
                let actions = actions.map(|details| MaintenanceAction {
                    action: details.action().unwrap_or_default().to_owned(),
                    auto_apply_after: details.auto_applied_after_date().and_then(to_chrono),
                    current_apply_date: details.current_apply_date().and_then(to_chrono),
                    description: details.description().unwrap_or_default().to_owned(),
                });
                pending.push(PendingMaintenance {
                    resource_arn: resource.resource_identifier().unwrap_or_default().to_owned(),
                    actions: actions.collect(),
                });
            }
        }
        Ok(pending)
    }

    async fn describe_vpcs(&self) -> ApiResult<Vec<Vpc>> {
        let mut vpcs = vec![];
        let mut pages = self.ec2.describe_vpcs().into_paginator().send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(api_error)?;
            vpcs.extend(page.vpcs().iter().filter_map(|vpc| {
                Some(Vpc {
                    id: vpc.vpc_id()?.to_owned(),
                })
            }));
        }
        Ok(vpcs)
    }

    async fn describe_subnets(&self, vpc_id: Option<&str>) -> ApiResult<Vec<Subnet>> {
        let mut subnets = vec![];
        let mut pages = self
            .ec2
            .describe_subnets()
            .set_filters(vpc_filter(vpc_id))
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(api_error)?;
            subnets.extend(page.subnets().iter().map(|subnet| Subnet {
                id: subnet.subnet_id().map(str::to_owned),
                vpc_id: subnet.vpc_id().map(str::to_owned),
                cidr_block: subnet.cidr_block().map(str::to_owned),
                available_ip_address_count: subnet.available_ip_address_count(),
            }));
        }
        Ok(subnets)
    }

    async fn describe_route_tables(&self, vpc_id: Option<&str>) -> ApiResult<Vec<RouteTable>> {
        let mut tables = vec![];
        let mut pages = self
            .ec2
            .describe_route_tables()
            .set_filters(vpc_filter(vpc_id))
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(api_error)?;
            tables.extend(page.route_tables().iter().filter_map(|table| {
                Some(RouteTable {
                    id: table.route_table_id()?.to_owned(),
                    vpc_id: table.vpc_id().map(str::to_owned),
                    route_count: table.routes().len(),
                })
            }));
        }
        Ok(tables)
    }

    async fn describe_vpc_endpoints(&self, vpc_id: Option<&str>) -> ApiResult<Vec<VpcEndpoint>> {
        let mut endpoints = vec![];
        let mut pages = self
            .ec2
            .describe_vpc_endpoints()
            .set_filters(vpc_filter(vpc_id))
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(api_error)?;
            endpoints.extend(page.vpc_endpoints().iter().filter_map(|endpoint| {
                Some(VpcEndpoint {
                    id: endpoint.vpc_endpoint_id()?.to_owned(),
                    vpc_id: endpoint.vpc_id().map(str::to_owned),
                })
            }));
        }
        Ok(endpoints)
    }

    async fn describe_transit_gateways(&self) -> ApiResult<Vec<TransitGateway>> {
        let mut gateways = vec![];
        let mut pages = self.ec2.describe_transit_gateways().into_paginator().send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(api_error)?;
            gateways.extend(page.transit_gateways().iter().filter_map(|gateway| {
                Some(TransitGateway {
                    id: gateway.transit_gateway_id()?.to_owned(),
                })
            }));
        }
        Ok(gateways)
    }

    async fn describe_vpc_cidr_associations(
        &self,
        vpc_id: &str,
    ) -> ApiResult<Vec<CidrAssociation>> {
        let output = self
            .ec2
            .describe_vpcs()
            .vpc_ids(vpc_id)
            .send()
            .await
            .map_err(api_error)?;
        let associations = output
            .vpcs()
            .iter()
            .flat_map(|vpc| vpc.cidr_block_association_set())
            .map(|association| CidrAssociation {
                association_id: association.association_id().unwrap_or_default().to_owned(),
                cidr_block: association.cidr_block().unwrap_or_default().to_owned(),
            });
        Ok(associations.collect())
    }

    async fn describe_cache_clusters(&self) -> ApiResult<Vec<CacheCluster>> {
        let mut clusters = vec![];
        let mut pages = self
            .elasticache
            .describe_cache_clusters()
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(api_error)?;
            clusters.extend(page.cache_clusters().iter().map(|cluster| CacheCluster {
                id: cluster.cache_cluster_id().unwrap_or_default().to_owned(),
                replication_group_id: cluster.replication_group_id().map(str::to_owned),
                engine: cluster.engine().unwrap_or_default().to_owned(),
                engine_version: cluster.engine_version().unwrap_or_default().to_owned(),
            }));
        }
        Ok(clusters)
    }

    async fn list_streaming_clusters(&self) -> ApiResult<Vec<StreamingCluster>> {
        let mut clusters = vec![];
        let mut pages = self.kafka.list_clusters().into_paginator().send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(api_error)?;
            clusters.extend(page.cluster_info_list().iter().map(|cluster| {
                let version = cluster
                    .current_broker_software_info()
                    .and_then(|info| info.kafka_version());
                StreamingCluster {
                    name: cluster.cluster_name().unwrap_or_default().to_owned(),
                    version: version.unwrap_or_default().to_owned(),
                }
            }));
        }
        Ok(clusters)
    }

    async fn list_hosted_zones_page(&self, marker: Option<&str>) -> ApiResult<HostedZonesPage> {
        let output = self
            .route53
            .list_hosted_zones()
            .set_marker(marker.map(str::to_owned))
            .send()
            .await
            .map_err(api_error)?;
        let zones = output.hosted_zones().iter().map(|zone| HostedZone {
            id: zone.id().to_owned(),
            name: zone.name().to_owned(),
        });
        Ok(HostedZonesPage {
            zones: zones.collect(),
            next_marker: output.next_marker().map(str::to_owned),
            is_truncated: output.is_truncated(),
        })
    }

    async fn get_hosted_zone_limit(
        &self,
        zone_id: &str,
        kind: HostedZoneLimitKind,
    ) -> ApiResult<HostedZoneLimit> {
        let limit_type = match kind {
            HostedZoneLimitKind::MaxRrsetsByZone => HostedZoneLimitType::MaxRrsetsByZone,
            HostedZoneLimitKind::MaxVpcsAssociatedByZone => {
                HostedZoneLimitType::MaxVpcsAssociatedByZone
            }
        };
        let output = self
            .route53
            .get_hosted_zone_limit()
            .r#type(limit_type)
            .hosted_zone_id(zone_id)
            .send()
            .await
            .map_err(api_error)?;
        Ok(HostedZoneLimit {
            current: output.count(),
            limit: output.limit().map_or(0, |limit| limit.value()),
        })
    }

    async fn get_service_quota(
        &self,
        service_code: &str,
        quota_code: &str,
    ) -> ApiResult<Option<f64>> {
        let output = self
            .service_quotas
            .get_service_quota()
            .service_code(service_code)
            .quota_code(quota_code)
            .send()
            .await
            .map_err(api_error)?;
        Ok(output.quota().and_then(|quota| quota.value()))
    }

    async fn get_account_summary(&self) -> ApiResult<HashMap<String, i32>> {
        let output = self
            .iam
            .get_account_summary()
            .send()
            .await
            .map_err(api_error)?;
        let summary = output.summary_map().into_iter().flatten();
        Ok(summary
            .map(|(key, value)| (key.as_str().to_owned(), *value))
            .collect())
    }
}
