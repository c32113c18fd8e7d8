//! First-generation property payloads.
//!
//! Everything here is still readable so that clusters written by old releases
//! load correctly; the migrators in [`super::migrate`] lift these payloads to
//! the current versions on load.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use flotilla_common::model::ClusterState;

/// Feature bookkeeping: which default features are installed or disabled.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClusterFeaturesV1 {
    /// Features installed on the cluster
    pub installed: BTreeSet<String>,
    /// Default features explicitly left uninstalled
    pub disabled: BTreeSet<String>,
}

/// Persisted cluster state and the collection cadence.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClusterStateV1 {
    /// Last known lifecycle state
    pub state: ClusterState,
    /// Seconds between two forced state collections
    pub state_collect_interval_secs: u64,
}

impl Default for ClusterStateV1 {
    fn default() -> Self {
        Self {
            state: ClusterState::Unknown,
            state_collect_interval_secs: 60,
        }
    }
}

/// Tenants participating in the cluster (a single entry today).
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClusterCompositeV1 {
    /// Participating tenants, in joining order
    pub tenants: Vec<String>,
}

/// Legacy host sizing: single values instead of min/max ranges.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HostSizeV1 {
    pub cores: u32,
    pub ram_gb: f32,
    pub disk_gb: u32,
    pub gpu_count: i32,
    pub cpu_freq: f32,
}

/// Legacy default sizings.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClusterDefaultsV1 {
    pub gateway_sizing: HostSizeV1,
    pub master_sizing: HostSizeV1,
    pub node_sizing: HostSizeV1,
    pub image: String,
}

/// Legacy network property: single gateway, network and subnet conflated.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClusterNetworkV1 {
    /// ID of the (single) network the cluster was built on
    pub network_id: String,
    pub cidr: String,
    pub gateway_id: String,
    pub gateway_ip: String,
    /// Public IP of the gateway
    pub public_ip: String,
}

/// Legacy node record: no numerical ID yet.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClusterNodeV1 {
    pub id: String,
    pub name: String,
    pub private_ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
}

/// Legacy node bookkeeping.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClusterNodesV1 {
    pub masters: Vec<ClusterNodeV1>,
    pub private_nodes: Vec<ClusterNodeV1>,
    pub master_last_index: u32,
    pub private_last_index: u32,
}

/// Optional control-plane metadata (virtual IP of the control plane, when the
/// flavor sets one up). Opaque to the lifecycle controller.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClusterControlplaneV1 {
    /// Flavor-defined payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub virtual_ip: Option<serde_json::Value>,
}
