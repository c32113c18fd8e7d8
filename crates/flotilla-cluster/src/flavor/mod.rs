//! Per-flavor customization hooks.
//!
//! A flavor is a plain record of optional function values bound once at
//! [`bootstrap`]. An absent hook means "no-op": the controller null-checks
//! before invoking, and a reader never sees a missing-hook error. Hooks that
//! touch hosts are `fn` pointers returning boxed futures, so the table stays
//! a plain value (`Copy`) with no trait objects to thread around.

mod boh;
mod kubernetes;
mod swarm;

use futures::future::BoxFuture;

use flotilla_common::model::{ClusterFlavor, ClusterState, SizingRequirements};
use flotilla_common::Result;
use flotilla_infra::Host;
use flotilla_provider::HostState;
use flotilla_task::TaskContext;

use crate::controller::Cluster;

/// Cluster-wide hook (`configure_cluster`).
pub type ClusterHook = for<'a> fn(&'a TaskContext, &'a Cluster) -> BoxFuture<'a, Result<()>>;

/// Hook over one host (`configure_gateway`, joins, `unconfigure_master`).
pub type HostHook =
    for<'a> fn(&'a TaskContext, &'a Cluster, &'a Host) -> BoxFuture<'a, Result<()>>;

/// Hook over one indexed host (`configure_master`, `configure_node`).
pub type IndexedHostHook =
    for<'a> fn(&'a TaskContext, &'a Cluster, u32, &'a Host) -> BoxFuture<'a, Result<()>>;

/// Hook over one host with an optional helper master (`unconfigure_node`,
/// `leave_node_from_cluster`).
pub type HostWithMasterHook = for<'a> fn(
    &'a TaskContext,
    &'a Cluster,
    &'a Host,
    Option<&'a Host>,
) -> BoxFuture<'a, Result<()>>;

/// State collection hook.
pub type StateHook =
    for<'a> fn(&'a TaskContext, &'a Cluster) -> BoxFuture<'a, Result<ClusterState>>;

/// The hook table of one flavor.
#[derive(Clone, Copy, Default)]
pub struct Makers {
    /// Minimum `(masters, private nodes, public nodes)` for the complexity
    pub minimum_required_servers: Option<fn(&Cluster) -> (u32, u32, u32)>,
    /// Default gateway sizing
    pub default_gateway_sizing: Option<fn() -> SizingRequirements>,
    /// Default master sizing
    pub default_master_sizing: Option<fn() -> SizingRequirements>,
    /// Default worker sizing
    pub default_node_sizing: Option<fn() -> SizingRequirements>,
    /// Image the flavor prefers when the request names none
    pub default_image: Option<fn() -> &'static str>,
    /// Configure the cluster as a whole, after all members exist
    pub configure_cluster: Option<ClusterHook>,
    /// Configure one gateway
    pub configure_gateway: Option<HostHook>,
    /// Configure one master
    pub configure_master: Option<IndexedHostHook>,
    /// Configure one worker
    pub configure_node: Option<IndexedHostHook>,
    /// Undo master configuration before removal
    pub unconfigure_master: Option<HostHook>,
    /// Undo worker configuration before removal
    pub unconfigure_node: Option<HostWithMasterHook>,
    /// Join one master to the cluster
    pub join_master_to_cluster: Option<HostHook>,
    /// Join one worker to the cluster
    pub join_node_to_cluster: Option<HostHook>,
    /// Make one worker leave the cluster
    pub leave_node_from_cluster: Option<HostWithMasterHook>,
    /// Collect the cluster state
    pub get_state: Option<StateHook>,
}

/// Resolve the hook table for a flavor. Called once per cluster handle.
pub fn bootstrap(flavor: ClusterFlavor) -> Makers {
    match flavor {
        ClusterFlavor::Boh => boh::makers(),
        ClusterFlavor::Kubernetes => kubernetes::makers(),
        ClusterFlavor::Swarm => swarm::makers(),
    }
}

/// State collection shared by all bundled flavors: derive the cluster state
/// from member host power states.
pub(crate) async fn state_from_host_liveness(
    ctx: &TaskContext,
    cluster: &Cluster,
) -> Result<ClusterState> {
    ctx.check_aborted()?;

    let mut ids: Vec<String> = Vec::new();
    let network = cluster.network_config().await?;
    if !network.gateway_id.is_empty() {
        ids.push(network.gateway_id.clone());
    }
    if !network.secondary_gateway_id.is_empty() {
        ids.push(network.secondary_gateway_id.clone());
    }
    for master in cluster.list_masters().await? {
        ids.push(master.id);
    }
    for node in cluster.list_nodes().await? {
        ids.push(node.id);
    }
    if ids.is_empty() {
        return Ok(ClusterState::Unknown);
    }

    let provider = cluster.services().provider.clone();
    let mut up = 0usize;
    let mut down = 0usize;
    for id in &ids {
        match provider.host_state(id).await {
            Ok(HostState::Started) => up += 1,
            Ok(_) => down += 1,
            Err(e) if e.is_not_found() => down += 1,
            Err(e) => return Err(e),
        }
    }

    Ok(if down == 0 {
        ClusterState::Nominal
    } else if up == 0 {
        ClusterState::Stopped
    } else {
        ClusterState::Degraded
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_flavor_resolves_a_table() {
        for flavor in [
            ClusterFlavor::Boh,
            ClusterFlavor::Kubernetes,
            ClusterFlavor::Swarm,
        ] {
            let makers = bootstrap(flavor);
            // Sizing defaults and state collection exist for every flavor.
            assert!(makers.minimum_required_servers.is_some());
            assert!(makers.default_master_sizing.is_some());
            assert!(makers.get_state.is_some());
        }
    }

    #[test]
    fn test_boh_has_no_configuration_hooks() {
        let makers = bootstrap(ClusterFlavor::Boh);
        assert!(makers.configure_cluster.is_none());
        assert!(makers.configure_master.is_none());
        assert!(makers.configure_node.is_none());
        assert!(makers.join_node_to_cluster.is_none());
    }

    #[test]
    fn test_swarm_has_join_and_leave_hooks() {
        let makers = bootstrap(ClusterFlavor::Swarm);
        assert!(makers.join_node_to_cluster.is_some());
        assert!(makers.join_master_to_cluster.is_some());
        assert!(makers.leave_node_from_cluster.is_some());
    }
}
