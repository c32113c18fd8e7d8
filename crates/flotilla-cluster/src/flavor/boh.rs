//! Bag-of-hosts flavor: provisioned machines, no cluster-wide software.

use futures::FutureExt;

use flotilla_common::model::{ClusterComplexity, SizingRequirements};

use crate::controller::Cluster;

use super::Makers;

pub(super) fn makers() -> Makers {
    Makers {
        minimum_required_servers: Some(minimum_required_servers),
        default_gateway_sizing: Some(default_gateway_sizing),
        default_master_sizing: Some(default_master_sizing),
        default_node_sizing: Some(default_node_sizing),
        get_state: Some(|ctx, cluster| super::state_from_host_liveness(ctx, cluster).boxed()),
        ..Default::default()
    }
}

fn minimum_required_servers(cluster: &Cluster) -> (u32, u32, u32) {
    match cluster.complexity() {
        ClusterComplexity::Small => (1, 1, 0),
        ClusterComplexity::Normal => (2, 3, 0),
        ClusterComplexity::Large => (3, 7, 0),
    }
}

fn default_gateway_sizing() -> SizingRequirements {
    SizingRequirements {
        min_cores: 2,
        max_cores: 4,
        min_ram_gb: 7.0,
        max_ram_gb: 16.0,
        min_disk_gb: 50,
        min_gpu: -1,
        ..Default::default()
    }
}

fn default_master_sizing() -> SizingRequirements {
    SizingRequirements {
        min_cores: 4,
        max_cores: 8,
        min_ram_gb: 15.0,
        max_ram_gb: 32.0,
        min_disk_gb: 100,
        min_gpu: -1,
        ..Default::default()
    }
}

fn default_node_sizing() -> SizingRequirements {
    SizingRequirements {
        min_cores: 4,
        max_cores: 8,
        min_ram_gb: 15.0,
        max_ram_gb: 32.0,
        min_disk_gb: 100,
        min_gpu: -1,
        ..Default::default()
    }
}
