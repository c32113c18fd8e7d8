//! Pure payload migrations between property schema versions.
//!
//! Each function maps an older payload to the latest one without touching
//! storage; [`super::ClusterProperties::upgrade`] applies them in place on
//! load. Keeping them pure makes the mapping rules testable in isolation.

use flotilla_common::model::SizingRequirements;

use super::v1::{ClusterDefaultsV1, ClusterNetworkV1, ClusterNodesV1, HostSizeV1};
use super::v2::{ClusterDefaultsV2, ClusterNetworkV2, ClusterNodeV2, ClusterNodesV2};
use super::v3::ClusterNetworkV3;

/// Lift node bookkeeping from v1 to v2.
///
/// Every node gets a fresh sequential `numerical_id` (masters first, then
/// workers, in list order); `{id, name, private_ip, public_ip}` and the two
/// hostname indexes carry over unchanged. List order is preserved.
pub fn upgrade_nodes_v1(old: &ClusterNodesV1) -> ClusterNodesV2 {
    let mut nodes = ClusterNodesV2 {
        master_last_index: old.master_last_index,
        private_last_index: old.private_last_index,
        ..Default::default()
    };

    for master in &old.masters {
        nodes.global_last_index += 1;
        nodes.masters.push(ClusterNodeV2 {
            id: master.id.clone(),
            numerical_id: nodes.global_last_index,
            name: master.name.clone(),
            private_ip: master.private_ip.clone(),
            public_ip: master.public_ip.clone(),
        });
    }
    for node in &old.private_nodes {
        nodes.global_last_index += 1;
        nodes.private_nodes.push(ClusterNodeV2 {
            id: node.id.clone(),
            numerical_id: nodes.global_last_index,
            name: node.name.clone(),
            private_ip: node.private_ip.clone(),
            public_ip: node.public_ip.clone(),
        });
    }
    nodes
}

/// Lift the network property from v1 to v3.
///
/// v1 predates the network/subnet split: its `network_id` becomes the subnet
/// ID, the gateway IP doubles as default route, and the gateway's public IP
/// becomes the endpoint. `network_id` of the result stays empty, meaning the
/// network was created with the cluster and must be deleted with it.
pub fn upgrade_network_v1(old: &ClusterNetworkV1) -> ClusterNetworkV3 {
    ClusterNetworkV3 {
        subnet_id: old.network_id.clone(),
        cidr: old.cidr.clone(),
        gateway_id: old.gateway_id.clone(),
        gateway_ip: old.gateway_ip.clone(),
        default_route_ip: old.gateway_ip.clone(),
        endpoint_ip: old.public_ip.clone(),
        ..Default::default()
    }
}

/// Lift the network property from v2 to v3.
///
/// v2's `network_id` actually held the subnet ID; it moves to `subnet_id` and
/// `network_id` is left empty. The HA gateway and public IP fields carry over.
pub fn upgrade_network_v2(old: &ClusterNetworkV2) -> ClusterNetworkV3 {
    ClusterNetworkV3 {
        network_id: String::new(),
        subnet_id: old.network_id.clone(),
        cidr: old.cidr.clone(),
        gateway_id: old.gateway_id.clone(),
        gateway_ip: old.gateway_ip.clone(),
        secondary_gateway_id: old.secondary_gateway_id.clone(),
        secondary_gateway_ip: old.secondary_gateway_ip.clone(),
        primary_public_ip: old.primary_public_ip.clone(),
        secondary_public_ip: old.secondary_public_ip.clone(),
        default_route_ip: old.default_route_ip.clone(),
        endpoint_ip: old.endpoint_ip.clone(),
        domain: old.domain.clone(),
    }
}

/// Lift default sizings from v1 to v2: single values become minimums.
pub fn upgrade_defaults_v1(old: &ClusterDefaultsV1) -> ClusterDefaultsV2 {
    ClusterDefaultsV2 {
        gateway_sizing: sizing_from_v1(&old.gateway_sizing),
        master_sizing: sizing_from_v1(&old.master_sizing),
        node_sizing: sizing_from_v1(&old.node_sizing),
        image: old.image.clone(),
    }
}

fn sizing_from_v1(old: &HostSizeV1) -> SizingRequirements {
    SizingRequirements {
        min_cores: old.cores,
        min_ram_gb: old.ram_gb,
        min_disk_gb: old.disk_gb,
        min_gpu: old.gpu_count,
        min_cpu_freq: old.cpu_freq,
        ..Default::default()
    }
}
