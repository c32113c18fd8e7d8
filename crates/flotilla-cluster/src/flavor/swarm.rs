//! Docker Swarm flavor: swarm init on the first master, token-based joins.

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, info};

use flotilla_common::model::{ClusterComplexity, SizingRequirements};
use flotilla_common::{temporal, Error, Result};
use flotilla_infra::Host;
use flotilla_task::TaskContext;

use crate::controller::Cluster;

use super::Makers;

pub(super) fn makers() -> Makers {
    Makers {
        minimum_required_servers: Some(minimum_required_servers),
        default_gateway_sizing: Some(default_gateway_sizing),
        default_master_sizing: Some(default_master_sizing),
        default_node_sizing: Some(default_node_sizing),
        configure_cluster: Some(configure_cluster),
        join_master_to_cluster: Some(join_master_to_cluster),
        join_node_to_cluster: Some(join_node_to_cluster),
        leave_node_from_cluster: Some(leave_node_from_cluster),
        get_state: Some(|ctx, cluster| super::state_from_host_liveness(ctx, cluster).boxed()),
        ..Default::default()
    }
}

fn minimum_required_servers(cluster: &Cluster) -> (u32, u32, u32) {
    match cluster.complexity() {
        ClusterComplexity::Small => (1, 1, 0),
        ClusterComplexity::Normal => (3, 3, 0),
        ClusterComplexity::Large => (5, 6, 0),
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

async fn join_token(ctx: &TaskContext, master: &Host, role: &str) -> Result<String> {
    let output = master
        .run_checked(
            ctx,
            &format!("docker swarm join-token -q {}", role),
            temporal::execution_timeout(),
        )
        .await?;
    let token = output.stdout.trim().to_string();
    if token.is_empty() {
        return Err(Error::provisioning(
            master.name(),
            format!("empty swarm {} join token", role),
        ));
    }
    Ok(token)
}

async fn join(ctx: &TaskContext, master: &Host, host: &Host, role: &str) -> Result<()> {
    let token = join_token(ctx, master, role).await?;
    host.run_checked(
        ctx,
        &format!(
            "docker swarm join --token {} {}:2377",
            token,
            master.private_ip()
        ),
        temporal::execution_timeout(),
    )
    .await?;
    Ok(())
}

/// Init the swarm on the first master, enroll the other masters as managers,
/// then join every worker.
fn configure_cluster<'a>(
    ctx: &'a TaskContext,
    cluster: &'a Cluster,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let masters = cluster.master_hosts(ctx).await?;
        let first = masters
            .first()
            .ok_or_else(|| Error::not_available("swarm cluster has no master to init on"))?;

        info!(cluster = %cluster.name(), master = %first.name(), "initializing swarm");
        first
            .run_checked(
                ctx,
                &format!(
                    "docker swarm init --advertise-addr {}",
                    first.private_ip()
                ),
                temporal::execution_timeout(),
            )
            .await?;

        // Too many simultaneous joins trip swarm's raft membership, so joins
        // stay sequential.
        for master in &masters[1..] {
            debug!(master = %master.name(), "joining swarm as manager");
            join(ctx, first, master, "manager").await?;
        }
        for node in &cluster.node_hosts(ctx).await? {
            debug!(node = %node.name(), "joining swarm as worker");
            join(ctx, first, node, "worker").await?;
        }
        Ok(())
    }
    .boxed()
}

fn join_master_to_cluster<'a>(
    ctx: &'a TaskContext,
    cluster: &'a Cluster,
    host: &'a Host,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let master = cluster.find_available_master(ctx).await?;
        join(ctx, &master, host, "manager").await
    }
    .boxed()
}

fn join_node_to_cluster<'a>(
    ctx: &'a TaskContext,
    cluster: &'a Cluster,
    host: &'a Host,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let master = cluster.find_available_master(ctx).await?;
        join(ctx, &master, host, "worker").await
    }
    .boxed()
}

fn leave_node_from_cluster<'a>(
    ctx: &'a TaskContext,
    cluster: &'a Cluster,
    host: &'a Host,
    master: Option<&'a Host>,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let owned;
        let master = match master {
            Some(m) => m,
            None => {
                owned = cluster.find_available_master(ctx).await?;
                &owned
            }
        };
        host.run_checked(ctx, "docker swarm leave", temporal::execution_timeout())
            .await?;
        master
            .run_checked(
                ctx,
                &format!("docker node rm --force {}", host.name()),
                temporal::execution_timeout(),
            )
            .await?;
        Ok(())
    }
    .boxed()
}
