//! Baseline software installation on cluster members.
//!
//! These are the flavor-independent requirements: docker on everything, the
//! proxycache client/server pair (when the feature is not disabled), the
//! operator account, and the gateway/master comfort features. All of it runs
//! through the host agent; a non-zero exit is a provisioning failure of that
//! host.

use tracing::debug;

use flotilla_common::model::NodeKind;
use flotilla_common::{temporal, Result, PROXYCACHE_FEATURE};
use flotilla_infra::Host;
use flotilla_task::TaskContext;

use crate::controller::Cluster;

const REMOTE_DESKTOP_FEATURE: &str = "remotedesktop";
const REVERSE_PROXY_FEATURE: &str = "reverseproxy";

async fn feature_disabled(cluster: &Cluster, feature: &str) -> Result<bool> {
    let features = cluster
        .inspect(|aggregate| Ok(aggregate.properties.features()))
        .await?;
    Ok(features.disabled.contains(feature))
}

/// Install docker and docker compose. Mandatory on every member.
pub(crate) async fn install_docker(ctx: &TaskContext, host: &Host, label: &str) -> Result<()> {
    debug!(host = label, "installing docker");
    host.run_checked(
        ctx,
        "sudo apt-get update -qq && sudo apt-get install -qqy docker.io docker-compose-plugin \
         && sudo systemctl enable --now docker",
        temporal::execution_timeout(),
    )
    .await?;
    Ok(())
}

/// Install the proxycache client, unless the feature is disabled (it is on
/// every cluster today).
pub(crate) async fn install_proxycache_client(
    ctx: &TaskContext,
    cluster: &Cluster,
    host: &Host,
    label: &str,
) -> Result<()> {
    if feature_disabled(cluster, PROXYCACHE_FEATURE).await? {
        debug!(host = label, "proxycache disabled, skipping client");
        return Ok(());
    }
    debug!(host = label, "installing proxycache client");
    host.run_checked(
        ctx,
        "sudo bash /opt/flotilla/features/proxycache-client.sh",
        temporal::execution_timeout(),
    )
    .await?;
    Ok(())
}

/// Install the proxycache server on a gateway, unless disabled.
pub(crate) async fn install_proxycache_server(
    ctx: &TaskContext,
    cluster: &Cluster,
    host: &Host,
    label: &str,
) -> Result<()> {
    if feature_disabled(cluster, PROXYCACHE_FEATURE).await? {
        debug!(host = label, "proxycache disabled, skipping server");
        return Ok(());
    }
    debug!(host = label, "installing proxycache server");
    host.run_checked(
        ctx,
        "sudo bash /opt/flotilla/features/proxycache-server.sh",
        temporal::execution_timeout(),
    )
    .await?;
    Ok(())
}

/// Create the cluster admin account and per-role baseline on a member.
pub(crate) async fn install_node_requirements(
    ctx: &TaskContext,
    cluster: &Cluster,
    kind: NodeKind,
    host: &Host,
    label: &str,
) -> Result<()> {
    debug!(host = label, role = kind.label(), "installing node requirements");
    let identity = cluster.identity().await?;
    let operator = cluster
        .services()
        .provider
        .configuration_options()
        .operator_username;

    host.run_checked(
        ctx,
        &format!(
            "sudo useradd -m -s /bin/bash -G docker,{} cladm 2>/dev/null || true \
             && echo 'cladm:{}' | sudo chpasswd \
             && sudo mkdir -p /opt/flotilla/etc \
             && echo 'role={}' | sudo tee /opt/flotilla/etc/member.conf >/dev/null",
            operator,
            identity.admin_password,
            kind.label()
        ),
        temporal::execution_timeout(),
    )
    .await?;
    Ok(())
}

/// Install the reverse proxy on the gateway(s), unless disabled.
pub(crate) async fn install_reverse_proxy(ctx: &TaskContext, cluster: &Cluster) -> Result<()> {
    if feature_disabled(cluster, REVERSE_PROXY_FEATURE).await? {
        debug!(cluster = %cluster.name(), "reverseproxy disabled, skipping");
        return Ok(());
    }
    for gateway in cluster.gateway_hosts(ctx).await? {
        debug!(gateway = %gateway.name(), "installing reverse proxy");
        gateway
            .run_checked(
                ctx,
                "sudo bash /opt/flotilla/features/reverseproxy.sh",
                temporal::execution_timeout(),
            )
            .await?;
    }
    Ok(())
}

/// Install remote desktop on every master, unless disabled.
pub(crate) async fn install_remote_desktop(ctx: &TaskContext, cluster: &Cluster) -> Result<()> {
    if feature_disabled(cluster, REMOTE_DESKTOP_FEATURE).await? {
        debug!(cluster = %cluster.name(), "remotedesktop disabled, skipping");
        return Ok(());
    }
    for master in cluster.master_hosts(ctx).await? {
        debug!(master = %master.name(), "installing remote desktop");
        master
            .run_checked(
                ctx,
                "sudo bash /opt/flotilla/features/remotedesktop.sh",
                temporal::execution_timeout(),
            )
            .await?;
    }
    Ok(())
}
