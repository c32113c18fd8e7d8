//! Cluster-level domain types: flavor, complexity, state, creation request.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::model::sizing::SizingRequirements;
use crate::Result;

/// Kind of cluster to provision.
///
/// The flavor selects the maker hook table: sizing defaults, configure, join
/// and leave behaviors.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ClusterFlavor {
    /// Bag of hosts: provisioned machines, no cluster-wide software
    #[default]
    Boh,
    /// Kubernetes cluster
    Kubernetes,
    /// Docker Swarm cluster
    Swarm,
}

impl fmt::Display for ClusterFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterFlavor::Boh => write!(f, "boh"),
            ClusterFlavor::Kubernetes => write!(f, "kubernetes"),
            ClusterFlavor::Swarm => write!(f, "swarm"),
        }
    }
}

/// Redundancy level of the cluster.
///
/// Chiefly controls the default master count and whether gateway failover is
/// provisioned.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClusterComplexity {
    /// Single gateway, minimal control plane
    #[default]
    Small,
    /// HA gateways, replicated control plane
    Normal,
    /// HA gateways, large control plane
    Large,
}

impl fmt::Display for ClusterComplexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterComplexity::Small => write!(f, "small"),
            ClusterComplexity::Normal => write!(f, "normal"),
            ClusterComplexity::Large => write!(f, "large"),
        }
    }
}

/// Lifecycle state of a cluster, persisted in the State property.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClusterState {
    /// State has never been collected
    #[default]
    Unknown,
    /// Creation pipeline is running
    Creating,
    /// All members are up
    Nominal,
    /// Some members are down but the cluster answers
    Degraded,
    /// Start transition in progress
    Starting,
    /// Stop transition in progress
    Stopping,
    /// All members are stopped
    Stopped,
    /// Deletion has begun; the cluster is no longer usable
    Removed,
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClusterState::Unknown => "unknown",
            ClusterState::Creating => "creating",
            ClusterState::Nominal => "nominal",
            ClusterState::Degraded => "degraded",
            ClusterState::Starting => "starting",
            ClusterState::Stopping => "stopping",
            ClusterState::Stopped => "stopped",
            ClusterState::Removed => "removed",
        };
        write!(f, "{}", s)
    }
}

/// Role of a host inside the cluster; drives hostname generation and the
/// per-role requirement installation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// Network ingress host
    Gateway,
    /// Control-plane member
    Master,
    /// Data-plane member
    Node,
}

impl NodeKind {
    /// Label used in hostnames (`<cluster>-<label>-<index>`) and logs
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Gateway => "gateway",
            NodeKind::Master => "master",
            NodeKind::Node => "node",
        }
    }
}

/// An SSH key pair created by the provider.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct KeyPair {
    /// Provider-side identifier
    pub id: String,
    /// Key pair name
    pub name: String,
    /// Public key, OpenSSH format
    pub public_key: String,
    /// Private key, PEM
    pub private_key: String,
}

/// Request accepted by the lifecycle controller to create a cluster.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ClusterRequest {
    /// Cluster name; unique per tenant, lowercased on admission
    pub name: String,
    /// Cluster kind
    pub flavor: ClusterFlavor,
    /// Redundancy level
    pub complexity: ClusterComplexity,
    /// CIDR of the cluster subnet
    pub cidr: String,
    /// Existing network to place the subnet in; when absent, a network is
    /// created alongside the cluster and deleted with it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,
    /// Sizing for gateway hosts
    #[serde(default)]
    pub gateways_def: SizingRequirements,
    /// Sizing for master hosts
    #[serde(default)]
    pub masters_def: SizingRequirements,
    /// Sizing for worker hosts
    #[serde(default)]
    pub nodes_def: SizingRequirements,
    /// Number of masters to create; 0 falls back to the flavor minimum
    #[serde(default)]
    pub master_count: u32,
    /// Number of workers to create; 0 falls back to the flavor minimum
    #[serde(default)]
    pub node_count: u32,
    /// Default features to leave uninstalled
    #[serde(default)]
    pub disabled_default_features: BTreeSet<String>,
    /// When true, failed creations leave provider resources in place for
    /// forensic recovery
    #[serde(default)]
    pub keep_on_failure: bool,
    /// Owning tenant; selects the metadata bucket
    pub tenant: String,
}

impl ClusterRequest {
    /// Validate the request before any resource is touched.
    pub fn validate(&self) -> Result<()> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(Error::invalid_request("cluster name cannot be empty"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(Error::invalid_request(format!(
                "cluster name '{}' must be lowercase alphanumeric with dashes",
                name
            )));
        }
        if self.tenant.trim().is_empty() {
            return Err(Error::invalid_request("tenant cannot be empty"));
        }
        validate_cidr(&self.cidr)?;
        Ok(())
    }

    /// The request name, trimmed and lowercased
    pub fn normalized_name(&self) -> String {
        self.name.trim().to_lowercase()
    }
}

fn validate_cidr(cidr: &str) -> Result<()> {
    let invalid = || Error::invalid_request(format!("'{}' is not a valid CIDR", cidr));
    let (addr, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
    let addr: std::net::IpAddr = addr.parse().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    if prefix > max {
        return Err(invalid());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_request() -> ClusterRequest {
        ClusterRequest {
            name: "c1".to_string(),
            cidr: "192.168.200.0/24".to_string(),
            tenant: "ovh-test".to_string(),
            ..Default::default()
        }
    }

    /// Story: validation catches misconfigurations before provisioning
    #[test]
    fn story_validation_prevents_invalid_requests() {
        assert!(minimal_request().validate().is_ok());

        let mut req = minimal_request();
        req.name = "My Cluster!".to_string();
        assert!(req.validate().is_err());

        let mut req = minimal_request();
        req.name = String::new();
        assert!(req.validate().is_err());

        let mut req = minimal_request();
        req.cidr = "192.168.200.0".to_string();
        assert!(req.validate().is_err());

        let mut req = minimal_request();
        req.cidr = "192.168.200.0/40".to_string();
        assert!(req.validate().is_err());

        let mut req = minimal_request();
        req.tenant = String::new();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_normalized_name() {
        let mut req = minimal_request();
        req.name = "  c1 ".to_string();
        assert_eq!(req.normalized_name(), "c1");
    }

    #[test]
    fn test_state_serialization_round_trip() {
        for state in [
            ClusterState::Unknown,
            ClusterState::Creating,
            ClusterState::Nominal,
            ClusterState::Degraded,
            ClusterState::Starting,
            ClusterState::Stopping,
            ClusterState::Stopped,
            ClusterState::Removed,
        ] {
            let json = serde_json::to_string(&state).expect("serialize");
            let back: ClusterState = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(state, back);
        }
    }

    #[test]
    fn test_node_kind_labels() {
        assert_eq!(NodeKind::Gateway.label(), "gateway");
        assert_eq!(NodeKind::Master.label(), "master");
        assert_eq!(NodeKind::Node.label(), "node");
    }
}
