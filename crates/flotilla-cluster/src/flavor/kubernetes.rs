//! Kubernetes flavor: kubeadm-driven control plane and node membership.

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, info};

use flotilla_common::model::{ClusterComplexity, SizingRequirements};
use flotilla_common::{temporal, Error, Result};
use flotilla_infra::Host;
use flotilla_task::TaskContext;

use crate::controller::Cluster;

use super::Makers;

const POD_NETWORK_CIDR: &str = "10.244.0.0/16";

pub(super) fn makers() -> Makers {
    Makers {
        minimum_required_servers: Some(minimum_required_servers),
        default_gateway_sizing: Some(default_gateway_sizing),
        default_master_sizing: Some(default_master_sizing),
        default_node_sizing: Some(default_node_sizing),
        default_image: Some(|| "Ubuntu 20.04"),
        configure_cluster: Some(configure_cluster),
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

/// Bring up the control plane on the first master, enroll the remaining
/// masters, then join every worker.
fn configure_cluster<'a>(
    ctx: &'a TaskContext,
    cluster: &'a Cluster,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let masters = cluster.master_hosts(ctx).await?;
        let first = masters
            .first()
            .ok_or_else(|| Error::not_available("kubernetes cluster has no master to init on"))?;

        info!(cluster = %cluster.name(), master = %first.name(), "initializing control plane");
        first
            .run_checked(
                ctx,
                &format!(
                    "sudo kubeadm init --pod-network-cidr={} --apiserver-advertise-address={} \
                     && mkdir -p $HOME/.kube \
                     && sudo cp -f /etc/kubernetes/admin.conf $HOME/.kube/config \
                     && sudo chown $(id -u):$(id -g) $HOME/.kube/config \
                     && kubectl apply -f /opt/flotilla/manifests/cni-flannel.yaml",
                    POD_NETWORK_CIDR,
                    first.private_ip()
                ),
                temporal::execution_timeout(),
            )
            .await?;

        // Control-plane joins are sequential: etcd member addition does not
        // tolerate concurrent joiners.
        if masters.len() > 1 {
            let cert_key = first
                .run_checked(
                    ctx,
                    "sudo kubeadm init phase upload-certs --upload-certs | tail -1",
                    temporal::execution_timeout(),
                )
                .await?;
            let join = control_plane_join_command(ctx, first, cert_key.stdout.trim()).await?;
            for master in &masters[1..] {
                debug!(master = %master.name(), "joining control plane");
                master
                    .run_checked(ctx, &join, temporal::execution_timeout())
                    .await?;
            }
        }

        for (i, node) in cluster.node_hosts(ctx).await?.iter().enumerate() {
            debug!(index = i + 1, node = %node.name(), "joining worker");
            join_worker(ctx, first, node).await?;
        }
        Ok(())
    }
    .boxed()
}

async fn control_plane_join_command(
    ctx: &TaskContext,
    master: &Host,
    certificate_key: &str,
) -> Result<String> {
    let base = worker_join_command(ctx, master).await?;
    Ok(format!(
        "{} --control-plane --certificate-key {}",
        base, certificate_key
    ))
}

async fn worker_join_command(ctx: &TaskContext, master: &Host) -> Result<String> {
    let output = master
        .run_checked(
            ctx,
            "sudo kubeadm token create --print-join-command",
            temporal::execution_timeout(),
        )
        .await?;
    let cmd = output.stdout.trim();
    if cmd.is_empty() {
        return Err(Error::provisioning(
            master.name(),
            "kubeadm returned an empty join command",
        ));
    }
    Ok(format!("sudo {}", cmd))
}

async fn join_worker(ctx: &TaskContext, master: &Host, node: &Host) -> Result<()> {
    let join = worker_join_command(ctx, master).await?;
    node.run_checked(ctx, &join, temporal::execution_timeout())
        .await?;
    Ok(())
}

fn join_node_to_cluster<'a>(
    ctx: &'a TaskContext,
    cluster: &'a Cluster,
    host: &'a Host,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let master = cluster.find_available_master(ctx).await?;
        join_worker(ctx, &master, host).await
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
        master
            .run_checked(
                ctx,
                &format!(
                    "kubectl drain {} --ignore-daemonsets --delete-emptydir-data --force \
                     && kubectl delete node {}",
                    host.name(),
                    host.name()
                ),
                temporal::execution_timeout(),
            )
            .await?;
        host.run_checked(ctx, "sudo kubeadm reset -f", temporal::execution_timeout())
            .await?;
        Ok(())
    }
    .boxed()
}
