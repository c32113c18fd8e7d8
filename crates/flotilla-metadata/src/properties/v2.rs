//! Second-generation property payloads.

use serde::{Deserialize, Serialize};

use flotilla_common::model::SizingRequirements;

/// Default sizings expressed as full requirement ranges.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClusterDefaultsV2 {
    pub gateway_sizing: SizingRequirements,
    pub master_sizing: SizingRequirements,
    pub node_sizing: SizingRequirements,
    /// Image hosts boot from when the request does not name one
    pub image: String,
}

/// A member host of the cluster.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClusterNodeV2 {
    /// Provider-side host ID
    pub id: String,
    /// Monotonic, never-reused index across all nodes of the cluster
    pub numerical_id: u32,
    /// Hostname (`<cluster>-<role>-<index>`)
    pub name: String,
    pub private_ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
}

/// Node bookkeeping.
///
/// List order is creation order and is significant: shrink removes from the
/// tail. The three indexes are monotonic and never reused.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClusterNodesV2 {
    pub masters: Vec<ClusterNodeV2>,
    pub private_nodes: Vec<ClusterNodeV2>,
    /// Source of `numerical_id` for every new node
    pub global_last_index: u32,
    /// Source of the index in master hostnames
    pub master_last_index: u32,
    /// Source of the index in worker hostnames
    pub private_last_index: u32,
}

/// Transitional network property.
///
/// `network_id` of this version actually holds the *subnet* ID; the v3
/// migrator straightens this out.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClusterNetworkV2 {
    pub network_id: String,
    pub cidr: String,
    pub gateway_id: String,
    pub gateway_ip: String,
    pub secondary_gateway_id: String,
    pub secondary_gateway_ip: String,
    pub primary_public_ip: String,
    pub secondary_public_ip: String,
    pub default_route_ip: String,
    pub endpoint_ip: String,
    pub domain: String,
}
