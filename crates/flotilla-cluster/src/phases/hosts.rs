//! Stage 3: the concurrent host creation and configuration protocol.
//!
//! Six steps over one fan-out: gateway installation, master creation and node
//! creation start together; waits establish the ordering the configuration
//! steps need. A failure reaps every sibling first (abort-and-wait), then
//! deletes whatever members were already recorded, so the stage either
//! completes or leaves no hosts behind (unless `keep_on_failure`).

use tracing::{debug, info, warn};

use flotilla_common::model::SizingRequirements;
use flotilla_common::{Error, Result};
use flotilla_infra::{Host, Subnet};
use flotilla_task::{TaskContext, TaskHandle};

use crate::controller::Cluster;
use crate::tasks;

pub(crate) async fn create_host_resources(
    ctx: &TaskContext,
    cluster: &Cluster,
    subnet: &Subnet,
    masters_def: &SizingRequirements,
    nodes_def: &SizingRequirements,
    master_count: u32,
    node_count: u32,
    keep_on_failure: bool,
) -> Result<()> {
    ctx.check_aborted()?;

    let primary_gateway = subnet.gateway(ctx, true).await?;
    let secondary_gateway = match subnet.gateway(ctx, false).await {
        Ok(gateway) => Some(gateway),
        // Not having a secondary gateway is a valid state.
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(e),
    };

    subnet.wait_gateways_ready(ctx).await?;

    info!(
        cluster = %cluster.name(),
        masters = master_count,
        nodes = node_count,
        "creating and configuring hosts"
    );

    // Step 1: gateway installation, master creation and node creation all
    // start at once.
    let mut primary_install = Some(start_gateway_install(ctx, cluster, &primary_gateway));
    let mut secondary_install = secondary_gateway
        .as_ref()
        .map(|gateway| start_gateway_install(ctx, cluster, gateway));

    let mut masters_task = Some({
        let cluster = cluster.clone();
        let def = masters_def.clone();
        ctx.start(move |t| async move {
            cluster
                .task_create_masters(t, master_count, def, keep_on_failure)
                .await
        })
    });
    let mut nodes_task = Some({
        let cluster = cluster.clone();
        let def = nodes_def.clone();
        ctx.start(move |t| async move {
            cluster
                .task_create_nodes(t, node_count, def, keep_on_failure)
                .await
        })
    });

    // Step 2: gateways must be installed before anything is configured.
    if let Err(mut e) = primary_install.take().expect("primary install started").wait().await {
        fail_stage(
            cluster,
            keep_on_failure,
            &mut e,
            secondary_install.take(),
            masters_task.take(),
            nodes_task.take(),
        )
        .await;
        return Err(e);
    }
    if let Some(task) = secondary_install.take() {
        if let Err(mut e) = task.wait().await {
            fail_stage(
                cluster,
                keep_on_failure,
                &mut e,
                None,
                masters_task.take(),
                nodes_task.take(),
            )
            .await;
            return Err(e);
        }
    }

    // Step 3: gateway configuration starts while nodes may still be creating.
    let mut primary_configure = Some(start_gateway_configure(ctx, cluster, &primary_gateway));
    let mut secondary_configure = secondary_gateway
        .as_ref()
        .map(|gateway| start_gateway_configure(ctx, cluster, gateway));

    // Step 4: wait gateway configuration, then master creation, then
    // configure the masters (fan-out inside).
    if let Err(mut e) = primary_configure.take().expect("primary configure started").wait().await {
        if let Some(task) = secondary_configure.take() {
            task.abort();
            reap_unit(task, &mut e).await;
        }
        fail_stage(
            cluster,
            keep_on_failure,
            &mut e,
            None,
            masters_task.take(),
            nodes_task.take(),
        )
        .await;
        return Err(e);
    }
    if let Some(task) = secondary_configure.take() {
        if let Err(mut e) = task.wait().await {
            fail_stage(
                cluster,
                keep_on_failure,
                &mut e,
                None,
                masters_task.take(),
                nodes_task.take(),
            )
            .await;
            return Err(e);
        }
    }

    if let Err(mut e) = masters_task.take().expect("masters task started").wait().await {
        // A master failure cancels the pending node creations.
        fail_stage(
            cluster,
            keep_on_failure,
            &mut e,
            None,
            None,
            nodes_task.take(),
        )
        .await;
        return Err(e);
    }

    if let Err(mut e) = cluster.task_configure_masters(ctx.clone()).await {
        fail_stage(cluster, keep_on_failure, &mut e, None, None, nodes_task.take()).await;
        return Err(e);
    }

    // Step 5: nodes were creating all along; their failure cancels nothing,
    // the hosts already created must simply be cleaned up with the rest.
    if let Err(mut e) = nodes_task.take().expect("nodes task started").wait().await {
        fail_stage(cluster, keep_on_failure, &mut e, None, None, None).await;
        return Err(e);
    }

    // Step 6: configure the nodes (fan-out inside).
    if let Err(mut e) = cluster.task_configure_nodes(ctx.clone()).await {
        fail_stage(cluster, keep_on_failure, &mut e, None, None, None).await;
        return Err(e);
    }

    debug!(cluster = %cluster.name(), "hosts created and configured");
    Ok(())
}

fn start_gateway_install(
    ctx: &TaskContext,
    cluster: &Cluster,
    gateway: &Host,
) -> TaskHandle<()> {
    let cluster = cluster.clone();
    let gateway = gateway.clone();
    ctx.start(move |t| async move { cluster.task_install_gateway(t, gateway).await })
}

fn start_gateway_configure(
    ctx: &TaskContext,
    cluster: &Cluster,
    gateway: &Host,
) -> TaskHandle<()> {
    let cluster = cluster.clone();
    let gateway = gateway.clone();
    ctx.start(move |t| async move { cluster.task_configure_gateway(t, gateway).await })
}

/// Abort-and-wait every remaining sibling, then delete the member hosts
/// already recorded in metadata. All secondary failures attach to `primary`.
async fn fail_stage(
    cluster: &Cluster,
    keep_on_failure: bool,
    primary: &mut Error,
    gateway_install: Option<TaskHandle<()>>,
    masters_task: Option<TaskHandle<()>>,
    nodes_task: Option<TaskHandle<Vec<Host>>>,
) {
    if let Some(task) = gateway_install {
        task.abort();
        reap_unit(task, primary).await;
    }
    if let Some(task) = masters_task {
        task.abort();
        reap_unit(task, primary).await;
    }
    if let Some(task) = nodes_task {
        task.abort();
        if let Err(e) = task.wait().await {
            if !e.is_aborted() {
                primary.add_consequence(e);
            }
        }
    }

    if keep_on_failure {
        return;
    }
    warn!(cluster = %cluster.name(), "cleaning up hosts after stage failure");
    if let Err(e) = tasks::delete_all_member_hosts(cluster).await {
        if !e.is_aborted() {
            primary.add_consequence(e);
        }
    }
}

async fn reap_unit(task: TaskHandle<()>, primary: &mut Error) {
    if let Err(e) = task.wait().await {
        if !e.is_aborted() {
            primary.add_consequence(e);
        }
    }
}
