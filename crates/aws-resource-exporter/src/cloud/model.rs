//! Provider-neutral records returned by the cloud facade.

use chrono::{DateTime, Utc};

/// Database instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DbInstance {
    /// Instance identifier.
    pub identifier: String,
    /// Allocated storage in GiB.
    pub allocated_storage_gb: i32,
    /// Instance status (e.g., `available`).
    pub status: String,
    /// Database engine (e.g., `postgres`).
    pub engine: String,
    /// Engine version.
    pub engine_version: String,
    /// Instance class (e.g., `db.t3.micro`).
    pub instance_class: String,
    /// Whether the instance is publicly accessible.
    pub publicly_accessible: bool,
    /// Whether instance storage is encrypted.
    pub storage_encrypted: bool,
    /// Latest time to which the instance can be restored.
    pub latest_restorable_time: Option<DateTime<Utc>>,
    /// Name of the first attached parameter group.
    pub parameter_group: Option<String>,
}

/// Database log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    /// File name.
    pub name: String,
    /// File size in bytes.
    pub size: i64,
}

/// Pending maintenance actions of a single resource.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMaintenance {
    /// ARN of the resource the actions apply to.
    pub resource_arn: String,
    /// Pending actions.
    pub actions: Vec<MaintenanceAction>,
}

/// Single pending maintenance action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaintenanceAction {
    /// Action type (e.g., `system-update`).
    pub action: String,
    /// Date after which the action is applied automatically.
    pub auto_apply_after: Option<DateTime<Utc>>,
    /// Effective apply date.
    pub current_apply_date: Option<DateTime<Utc>>,
    /// Human-readable description.
    pub description: String,
}

/// Virtual private cloud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vpc {
    /// VPC ID.
    pub id: String,
}

/// Subnet. All fields are optional in provider responses; collectors skip incomplete subnets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subnet {
    /// Subnet ID.
    pub id: Option<String>,
    /// ID of the VPC the subnet belongs to.
    pub vpc_id: Option<String>,
    /// IPv4 CIDR block, e.g. `10.0.0.0/24`.
    pub cidr_block: Option<String>,
    /// Number of unused IPv4 addresses.
    pub available_ip_address_count: Option<i32>,
}

/// Route table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTable {
    /// Route table ID.
    pub id: String,
    /// ID of the VPC the table belongs to.
    pub vpc_id: Option<String>,
    /// Number of routes in the table.
    pub route_count: usize,
}

/// VPC endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpcEndpoint {
    /// Endpoint ID.
    pub id: String,
    /// ID of the VPC the endpoint belongs to.
    pub vpc_id: Option<String>,
}

/// Transit gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitGateway {
    /// Gateway ID.
    pub id: String,
}

/// IPv4 CIDR block associated with a VPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidrAssociation {
    /// Association ID.
    pub association_id: String,
    /// Associated CIDR block.
    pub cidr_block: String,
}

/// In-memory cache cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheCluster {
    /// Cluster ID.
    pub id: String,
    /// Replication group the cluster belongs to, if any.
    pub replication_group_id: Option<String>,
    /// Cache engine (`redis` / `memcached`).
    pub engine: String,
    /// Engine version.
    pub engine_version: String,
}

/// Streaming (Kafka) cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingCluster {
    /// Cluster name.
    pub name: String,
    /// Current broker software version.
    pub version: String,
}

/// DNS hosted zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedZone {
    /// Zone ID as returned by the provider (e.g., `/hostedzone/Z123`).
    pub id: String,
    /// Zone domain name.
    pub name: String,
}

impl HostedZone {
    /// Returns the zone ID without the `/hostedzone/` prefix.
    pub fn short_id(&self) -> &str {
        self.id
            .strip_prefix("/hostedzone/")
            .unwrap_or(&self.id)
    }
}

/// Page of hosted zones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostedZonesPage {
    /// Zones on this page.
    pub zones: Vec<HostedZone>,
    /// Marker of the next page.
    pub next_marker: Option<String>,
    /// Whether more pages are available.
    pub is_truncated: bool,
}

/// Kind of a per-zone limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostedZoneLimitKind {
    /// Max number of resource record sets in a zone.
    MaxRrsetsByZone,
    /// Max number of VPCs associated with a private zone.
    MaxVpcsAssociatedByZone,
}

impl HostedZoneLimitKind {
    /// Returns the provider name of this limit.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MaxRrsetsByZone => "MAX_RRSETS_BY_ZONE",
            Self::MaxVpcsAssociatedByZone => "MAX_VPCS_ASSOCIATED_BY_ZONE",
        }
    }
}

/// Per-zone limit with current usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostedZoneLimit {
    /// Current usage.
    pub current: i64,
    /// Limit value.
    pub limit: i64,
}
