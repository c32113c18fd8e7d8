//! Versioned cluster properties.
//!
//! Each property tag is a tagged union with one variant per schema version;
//! only the latest version is authoritative. Loading runs [`ClusterProperties::upgrade`]
//! so that every property present is at its latest version before the
//! controller touches it; the typed accessors refuse obsolete versions with an
//! inconsistency error rather than guessing.

pub mod migrate;
pub mod v1;
pub mod v2;
pub mod v3;

use serde::{Deserialize, Serialize};

use flotilla_common::{Error, Result};

use v1::{
    ClusterCompositeV1, ClusterControlplaneV1, ClusterDefaultsV1, ClusterFeaturesV1,
    ClusterNetworkV1, ClusterNodesV1, ClusterStateV1,
};
use v2::{ClusterDefaultsV2, ClusterNetworkV2, ClusterNodesV2};
use v3::ClusterNetworkV3;

/// Feature bookkeeping property.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "version", content = "payload")]
pub enum FeaturesProperty {
    /// Current version
    #[serde(rename = "v1")]
    V1(ClusterFeaturesV1),
}

/// Cluster state property.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "version", content = "payload")]
pub enum StateProperty {
    /// Current version
    #[serde(rename = "v1")]
    V1(ClusterStateV1),
}

/// Default sizing property.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "version", content = "payload")]
pub enum DefaultsProperty {
    /// Legacy single-value sizings
    #[serde(rename = "v1")]
    V1(ClusterDefaultsV1),
    /// Current version
    #[serde(rename = "v2")]
    V2(ClusterDefaultsV2),
}

/// Tenant composition property.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "version", content = "payload")]
pub enum CompositeProperty {
    /// Current version
    #[serde(rename = "v1")]
    V1(ClusterCompositeV1),
}

/// Networking property.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "version", content = "payload")]
pub enum NetworkProperty {
    /// Legacy, network/subnet conflated, single gateway
    #[serde(rename = "v1")]
    V1(ClusterNetworkV1),
    /// Transitional, HA fields but subnet ID stored as network ID
    #[serde(rename = "v2")]
    V2(ClusterNetworkV2),
    /// Current version
    #[serde(rename = "v3")]
    V3(ClusterNetworkV3),
}

/// Node bookkeeping property.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "version", content = "payload")]
pub enum NodesProperty {
    /// Legacy, no numerical IDs
    #[serde(rename = "v1")]
    V1(ClusterNodesV1),
    /// Current version
    #[serde(rename = "v2")]
    V2(ClusterNodesV2),
}

/// Control-plane property.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "version", content = "payload")]
pub enum ControlplaneProperty {
    /// Current version
    #[serde(rename = "v1")]
    V1(ClusterControlplaneV1),
}

/// The ordered property map of a cluster aggregate.
///
/// Absent properties read as their zero value; they materialize on first
/// mutation.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClusterProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<FeaturesProperty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<StateProperty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defaults: Option<DefaultsProperty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub composite: Option<CompositeProperty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkProperty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<NodesProperty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controlplane: Option<ControlplaneProperty>,
}

fn obsolete(tag: &str, found: &str) -> Error {
    Error::inconsistent(format!(
        "property '{}' is at obsolete version {}; the aggregate was not upgraded on load",
        tag, found
    ))
}

impl ClusterProperties {
    /// Cloned view of the features property (zero value when absent)
    pub fn features(&self) -> ClusterFeaturesV1 {
        match &self.features {
            None => ClusterFeaturesV1::default(),
            Some(FeaturesProperty::V1(f)) => f.clone(),
        }
    }

    /// Mutable access to the features property, created on first use
    pub fn features_mut(&mut self) -> &mut ClusterFeaturesV1 {
        let FeaturesProperty::V1(f) = self
            .features
            .get_or_insert_with(|| FeaturesProperty::V1(ClusterFeaturesV1::default()));
        f
    }

    /// Cloned view of the state property (zero value when absent)
    pub fn state(&self) -> ClusterStateV1 {
        match &self.state {
            None => ClusterStateV1::default(),
            Some(StateProperty::V1(s)) => s.clone(),
        }
    }

    /// Mutable access to the state property, created on first use
    pub fn state_mut(&mut self) -> &mut ClusterStateV1 {
        let StateProperty::V1(s) = self
            .state
            .get_or_insert_with(|| StateProperty::V1(ClusterStateV1::default()));
        s
    }

    /// Cloned view of the composite property (zero value when absent)
    pub fn composite(&self) -> ClusterCompositeV1 {
        match &self.composite {
            None => ClusterCompositeV1::default(),
            Some(CompositeProperty::V1(c)) => c.clone(),
        }
    }

    /// Mutable access to the composite property, created on first use
    pub fn composite_mut(&mut self) -> &mut ClusterCompositeV1 {
        let CompositeProperty::V1(c) = self
            .composite
            .get_or_insert_with(|| CompositeProperty::V1(ClusterCompositeV1::default()));
        c
    }

    /// Cloned view of the defaults property at its latest version.
    ///
    /// Refuses an obsolete version; the load path upgrades before access.
    pub fn defaults(&self) -> Result<ClusterDefaultsV2> {
        match &self.defaults {
            None => Ok(ClusterDefaultsV2::default()),
            Some(DefaultsProperty::V2(d)) => Ok(d.clone()),
            Some(DefaultsProperty::V1(_)) => Err(obsolete("defaults", "v1")),
        }
    }

    /// Mutable access to the defaults property at its latest version
    pub fn defaults_mut(&mut self) -> Result<&mut ClusterDefaultsV2> {
        if matches!(self.defaults, Some(DefaultsProperty::V1(_))) {
            return Err(obsolete("defaults", "v1"));
        }
        let prop = self
            .defaults
            .get_or_insert_with(|| DefaultsProperty::V2(ClusterDefaultsV2::default()));
        match prop {
            DefaultsProperty::V2(d) => Ok(d),
            DefaultsProperty::V1(_) => unreachable!("v1 rejected above"),
        }
    }

    /// Cloned view of the network property at its latest version
    pub fn network(&self) -> Result<ClusterNetworkV3> {
        match &self.network {
            None => Ok(ClusterNetworkV3::default()),
            Some(NetworkProperty::V3(n)) => Ok(n.clone()),
            Some(NetworkProperty::V2(_)) => Err(obsolete("network", "v2")),
            Some(NetworkProperty::V1(_)) => Err(obsolete("network", "v1")),
        }
    }

    /// Mutable access to the network property at its latest version
    pub fn network_mut(&mut self) -> Result<&mut ClusterNetworkV3> {
        match self.network {
            Some(NetworkProperty::V1(_)) => return Err(obsolete("network", "v1")),
            Some(NetworkProperty::V2(_)) => return Err(obsolete("network", "v2")),
            _ => {}
        }
        let prop = self
            .network
            .get_or_insert_with(|| NetworkProperty::V3(ClusterNetworkV3::default()));
        match prop {
            NetworkProperty::V3(n) => Ok(n),
            _ => unreachable!("older versions rejected above"),
        }
    }

    /// Cloned view of the nodes property at its latest version
    pub fn nodes(&self) -> Result<ClusterNodesV2> {
        match &self.nodes {
            None => Ok(ClusterNodesV2::default()),
            Some(NodesProperty::V2(n)) => Ok(n.clone()),
            Some(NodesProperty::V1(_)) => Err(obsolete("nodes", "v1")),
        }
    }

    /// Mutable access to the nodes property at its latest version
    pub fn nodes_mut(&mut self) -> Result<&mut ClusterNodesV2> {
        if matches!(self.nodes, Some(NodesProperty::V1(_))) {
            return Err(obsolete("nodes", "v1"));
        }
        let prop = self
            .nodes
            .get_or_insert_with(|| NodesProperty::V2(ClusterNodesV2::default()));
        match prop {
            NodesProperty::V2(n) => Ok(n),
            NodesProperty::V1(_) => unreachable!("v1 rejected above"),
        }
    }

    /// Cloned view of the control-plane property (zero value when absent)
    pub fn controlplane(&self) -> ClusterControlplaneV1 {
        match &self.controlplane {
            None => ClusterControlplaneV1::default(),
            Some(ControlplaneProperty::V1(c)) => c.clone(),
        }
    }

    /// Mutable access to the control-plane property, created on first use
    pub fn controlplane_mut(&mut self) -> &mut ClusterControlplaneV1 {
        let ControlplaneProperty::V1(c) = self
            .controlplane
            .get_or_insert_with(|| ControlplaneProperty::V1(ClusterControlplaneV1::default()));
        c
    }

    /// Upgrade every property present to its latest schema version.
    ///
    /// Returns true when something changed, so the caller knows to persist
    /// the aggregate. Running it on an already-current aggregate is a no-op.
    pub fn upgrade(&mut self) -> bool {
        let mut changed = false;

        if let Some(NodesProperty::V1(old)) = &self.nodes {
            let upgraded = migrate::upgrade_nodes_v1(old);
            self.nodes = Some(NodesProperty::V2(upgraded));
            changed = true;
        }

        match &self.network {
            Some(NetworkProperty::V1(old)) => {
                let upgraded = migrate::upgrade_network_v1(old);
                self.network = Some(NetworkProperty::V3(upgraded));
                changed = true;
            }
            Some(NetworkProperty::V2(old)) => {
                let upgraded = migrate::upgrade_network_v2(old);
                self.network = Some(NetworkProperty::V3(upgraded));
                changed = true;
            }
            _ => {}
        }

        if let Some(DefaultsProperty::V1(old)) = &self.defaults {
            let upgraded = migrate::upgrade_defaults_v1(old);
            self.defaults = Some(DefaultsProperty::V2(upgraded));
            changed = true;
        }

        changed
    }
}

#[cfg(test)]
mod tests {
    use super::v1::ClusterNodeV1;
    use super::*;
    use flotilla_common::model::ClusterState;

    #[test]
    fn test_serialized_shape_carries_version_and_payload() {
        let mut props = ClusterProperties::default();
        props.state_mut().state = ClusterState::Nominal;

        let json = serde_json::to_value(&props).expect("serialize");
        assert_eq!(json["state"]["version"], "v1");
        assert_eq!(json["state"]["payload"]["state"], "nominal");
        // Absent properties are not serialized at all.
        assert!(json.get("nodes").is_none());
    }

    #[test]
    fn test_absent_properties_read_as_zero_values() {
        let props = ClusterProperties::default();
        assert!(props.features().disabled.is_empty());
        assert_eq!(props.state().state, ClusterState::Unknown);
        assert!(props.nodes().expect("nodes").masters.is_empty());
        assert_eq!(props.network().expect("network").subnet_id, "");
    }

    /// Story: the controller refuses to touch a payload it did not upgrade
    #[test]
    fn test_obsolete_version_is_refused_by_typed_access() {
        let mut props = ClusterProperties {
            nodes: Some(NodesProperty::V1(ClusterNodesV1::default())),
            ..Default::default()
        };
        assert!(props.nodes().is_err());
        assert!(props.nodes_mut().is_err());
    }

    /// Story: legacy metadata upgrades once, then loading is a no-op (S5)
    #[test]
    fn test_upgrade_is_idempotent() {
        let mut props = ClusterProperties {
            nodes: Some(NodesProperty::V1(ClusterNodesV1 {
                masters: vec![ClusterNodeV1 {
                    id: "h-1".into(),
                    name: "old-master-1".into(),
                    private_ip: "10.0.0.1".into(),
                    public_ip: None,
                }],
                master_last_index: 1,
                ..Default::default()
            })),
            network: Some(NetworkProperty::V1(ClusterNetworkV1 {
                network_id: "n-1".into(),
                gateway_ip: "10.0.0.254".into(),
                public_ip: "203.0.113.1".into(),
                ..Default::default()
            })),
            ..Default::default()
        };

        assert!(props.upgrade());
        let nodes = props.nodes().expect("nodes after upgrade");
        assert_eq!(nodes.masters[0].numerical_id, 1);
        let network = props.network().expect("network after upgrade");
        assert_eq!(network.subnet_id, "n-1");
        assert_eq!(network.endpoint_ip, "203.0.113.1");

        // Second pass changes nothing.
        assert!(!props.upgrade());
    }

    #[test]
    fn test_round_trip_preserves_everything() {
        let mut props = ClusterProperties::default();
        props.features_mut().disabled.insert("proxycache".into());
        props.state_mut().state = ClusterState::Creating;
        let nodes = props.nodes_mut().expect("nodes");
        nodes.global_last_index = 2;
        nodes.master_last_index = 1;

        let bytes = serde_json::to_vec(&props).expect("serialize");
        let back: ClusterProperties = serde_json::from_slice(&bytes).expect("deserialize");
        assert_eq!(props, back);

        let again = serde_json::to_vec(&back).expect("re-serialize");
        assert_eq!(bytes, again);
    }
}
