//! Third-generation property payloads.

use serde::{Deserialize, Serialize};

/// Networking of the cluster, network and subnet properly separated.
///
/// An empty `network_id` means the network was created alongside the cluster
/// and must be deleted with it; a non-empty one references a pre-existing
/// network the cluster merely borrowed.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClusterNetworkV3 {
    pub network_id: String,
    pub subnet_id: String,
    pub cidr: String,
    /// Primary gateway host
    pub gateway_id: String,
    pub gateway_ip: String,
    /// Secondary gateway host; empty when failover is off
    pub secondary_gateway_id: String,
    pub secondary_gateway_ip: String,
    pub primary_public_ip: String,
    pub secondary_public_ip: String,
    /// IP the subnet routes through by default
    pub default_route_ip: String,
    /// IP the outside world reaches the cluster at
    pub endpoint_ip: String,
    pub domain: String,
}

impl ClusterNetworkV3 {
    /// True when a secondary gateway exists (gateway failover on)
    pub fn has_secondary_gateway(&self) -> bool {
        !self.secondary_gateway_id.is_empty()
    }
}
