//! The node worker pool: per-member subtasks behind the lifecycle controller.
//!
//! Creation fan-outs allocate hostnames and append member records under the
//! aggregate lock, so sibling subtasks never collide on an index. Removal
//! reserves the record out of metadata first and restores it when the
//! teardown of the host fails, so the member list always reflects reality.

use tracing::{debug, info, warn};

use flotilla_common::model::{NodeKind, SizingRequirements};
use flotilla_common::{temporal, Error, Result};
use flotilla_infra::{Host, Subnet};
use flotilla_metadata::properties::v2::ClusterNodeV2;
use flotilla_provider::HostRequest;
use flotilla_task::{TaskContext, TaskGroup};

use crate::controller::Cluster;
use crate::install;

impl Cluster {
    // -- gateway subtasks --------------------------------------------------

    /// Install the baseline on one gateway: wait for SSH, docker, proxycache
    /// server, gateway requirements.
    pub(crate) async fn task_install_gateway(&self, ctx: TaskContext, host: Host) -> Result<()> {
        ctx.check_aborted()?;
        let label = host.name().to_string();
        debug!(host = %label, "starting gateway installation");

        host.wait_ssh_ready(&ctx, temporal::host_timeout()).await?;
        install::install_docker(&ctx, &host, &label).await?;
        install::install_proxycache_server(&ctx, self, &host, &label).await?;
        install::install_node_requirements(&ctx, self, NodeKind::Gateway, &host, &label).await?;

        debug!(host = %label, "gateway preparation successful");
        Ok(())
    }

    /// Run the flavor's gateway configuration, when it defines one.
    pub(crate) async fn task_configure_gateway(&self, ctx: TaskContext, host: Host) -> Result<()> {
        ctx.check_aborted()?;
        debug!(host = %host.name(), "starting gateway configuration");
        if let Some(hook) = self.makers().configure_gateway {
            hook(&ctx, self, &host).await?;
        }
        debug!(host = %host.name(), "gateway configuration successful");
        Ok(())
    }

    // -- creation fan-outs -------------------------------------------------

    /// Create `count` masters in parallel subtasks.
    pub(crate) async fn task_create_masters(
        &self,
        ctx: TaskContext,
        count: u32,
        sizing: SizingRequirements,
        keep_on_failure: bool,
    ) -> Result<()> {
        if count == 0 {
            debug!(cluster = %self.name(), "no masters to create");
            return Ok(());
        }
        info!(cluster = %self.name(), count = count, "creating master(s)");

        let mut group = TaskGroup::new(&ctx);
        for i in 1..=count {
            let cluster = self.clone();
            let sizing = sizing.clone();
            group.start(move |t| async move {
                cluster
                    .task_create_master(t, i, sizing, keep_on_failure)
                    .await
            });
        }
        match group.wait_group().await {
            Ok(_) => {
                debug!(cluster = %self.name(), "masters creation successful");
                Ok(())
            }
            Err(e) => Err(Error::internal(
                "cluster",
                format!("failed to create master(s) of cluster '{}'", self.name()),
            )
            .with_consequence(e)),
        }
    }

    /// Create one master: hostname allocation, host creation, metadata
    /// append, baseline installation. Failures past host creation undo both
    /// the host and the metadata unless `keep_on_failure`.
    async fn task_create_master(
        &self,
        ctx: TaskContext,
        index: u32,
        sizing: SizingRequirements,
        keep_on_failure: bool,
    ) -> Result<()> {
        ctx.check_aborted()?;
        if index < 1 {
            return Err(Error::invalid_parameter("index", "must be greater than 0"));
        }
        debug!(master = index, "starting host creation");

        let host = self
            .create_member_host(&ctx, NodeKind::Master, &sizing, keep_on_failure)
            .await?;

        let label = format!("master #{} ({})", index, host.name());
        let installed: Result<()> = async {
            install::install_proxycache_client(&ctx, self, &host, &label).await?;
            install::install_node_requirements(&ctx, self, NodeKind::Master, &host, &label).await
        }
        .await;

        if let Err(mut e) = installed {
            if !keep_on_failure {
                self.undo_member_creation(&host, NodeKind::Master, &mut e).await;
            }
            return Err(e);
        }

        debug!(host = %label, "host creation successful");
        Ok(())
    }

    /// Create `count` workers in parallel subtasks, returning their facades.
    pub(crate) async fn task_create_nodes(
        &self,
        ctx: TaskContext,
        count: u32,
        sizing: SizingRequirements,
        keep_on_failure: bool,
    ) -> Result<Vec<Host>> {
        if count == 0 {
            debug!(cluster = %self.name(), "no nodes to create");
            return Ok(Vec::new());
        }
        info!(cluster = %self.name(), count = count, "creating node(s)");

        let mut group = TaskGroup::new(&ctx);
        for i in 1..=count {
            let cluster = self.clone();
            let sizing = sizing.clone();
            group.start(move |t| async move {
                cluster.task_create_node(t, i, sizing, keep_on_failure).await
            });
        }
        match group.wait_group().await {
            Ok(hosts) => {
                debug!(cluster = %self.name(), count = count, "nodes creation successful");
                Ok(hosts)
            }
            Err(e) => Err(Error::internal(
                "cluster",
                format!("failed to create node(s) of cluster '{}'", self.name()),
            )
            .with_consequence(e)),
        }
    }

    /// Create one worker. Same shape as master creation, and returns the
    /// facade for the expansion path.
    pub(crate) async fn task_create_node(
        &self,
        ctx: TaskContext,
        index: u32,
        sizing: SizingRequirements,
        keep_on_failure: bool,
    ) -> Result<Host> {
        ctx.check_aborted()?;
        if index < 1 {
            return Err(Error::invalid_parameter("index", "must be greater than 0"));
        }
        debug!(node = index, "starting host creation");

        let host = self
            .create_member_host(&ctx, NodeKind::Node, &sizing, keep_on_failure)
            .await?;

        let label = format!("node #{} ({})", index, host.name());
        let installed: Result<()> = async {
            install::install_proxycache_client(&ctx, self, &host, &label).await?;
            install::install_node_requirements(&ctx, self, NodeKind::Node, &host, &label).await
        }
        .await;

        if let Err(mut e) = installed {
            if !keep_on_failure {
                self.undo_member_creation(&host, NodeKind::Node, &mut e).await;
            }
            return Err(e);
        }

        debug!(host = %label, "host creation successful");
        Ok(host)
    }

    /// Shared member-creation path: hostname under one alter, host through
    /// the facade, record appended under a second alter.
    async fn create_member_host(
        &self,
        ctx: &TaskContext,
        kind: NodeKind,
        sizing: &SizingRequirements,
        keep_on_failure: bool,
    ) -> Result<Host> {
        let network = self.network_config().await?;
        let services = self.services();
        let subnet = Subnet::load(
            ctx,
            services.provider.clone(),
            services.agent.clone(),
            services.subnets.clone(),
            &network.subnet_id,
        )
        .await?;

        let hostname = self.build_hostname(kind).await?;
        let keypair_name = self.identity().await?.keypair.name;
        let security_group = subnet.inspect(|record| Ok(record.security_group_id.clone()))?;

        let host = Host::create(
            ctx,
            services.provider.clone(),
            services.agent.clone(),
            HostRequest {
                resource_name: hostname,
                subnet_id: network.subnet_id.clone(),
                default_route_ip: network.default_route_ip.clone(),
                public_ip: false,
                image: sizing.image.clone(),
                key_pair_name: keypair_name,
            },
            sizing,
            Some(security_group.as_str()),
        )
        .await?;

        // Track the member before anything else can fail, so cleanup always
        // sees it.
        let record = ClusterNodeV2 {
            id: host.id().to_string(),
            numerical_id: 0,
            name: host.name().to_string(),
            private_ip: host.private_ip().to_string(),
            public_ip: host.public_ip().ok().map(String::from),
        };
        let appended = self
            .alter(move |aggregate| {
                let nodes = aggregate.properties.nodes_mut()?;
                nodes.global_last_index += 1;
                let mut record = record;
                record.numerical_id = nodes.global_last_index;
                match kind {
                    NodeKind::Master => nodes.masters.push(record),
                    NodeKind::Node => nodes.private_nodes.push(record),
                    NodeKind::Gateway => {
                        return Err(Error::invalid_parameter(
                            "kind",
                            "gateways are not cluster members",
                        ))
                    }
                }
                Ok(())
            })
            .await;

        if let Err(mut e) = appended {
            if !keep_on_failure {
                if let Err(derr) = host.delete(ctx).await {
                    if !derr.is_not_found() {
                        e.add_consequence(derr);
                    }
                }
            }
            return Err(e);
        }
        Ok(host)
    }

    /// Undo a half-created member: drop its record, delete its host.
    async fn undo_member_creation(&self, host: &Host, kind: NodeKind, primary: &mut Error) {
        let id = host.id().to_string();
        let removed = self
            .alter(move |aggregate| {
                let nodes = aggregate.properties.nodes_mut()?;
                let list = match kind {
                    NodeKind::Master => &mut nodes.masters,
                    _ => &mut nodes.private_nodes,
                };
                list.retain(|n| n.id != id);
                Ok(())
            })
            .await;
        if let Err(derr) = removed {
            primary.add_consequence(derr);
        }
        let scope = TaskContext::root();
        if let Err(derr) = host.delete(&scope).await {
            if !derr.is_not_found() {
                primary.add_consequence(derr);
            }
        }
    }

    // -- configuration fan-outs --------------------------------------------

    /// Configure every master; errors are collected, never short-circuited.
    pub(crate) async fn task_configure_masters(&self, ctx: TaskContext) -> Result<()> {
        let masters = self.list_masters().await?;
        if masters.is_empty() {
            return Ok(());
        }
        info!(cluster = %self.name(), "configuring masters");

        let mut errors = Vec::new();
        let mut group = TaskGroup::new(&ctx);
        for (i, record) in masters.into_iter().enumerate() {
            let cluster = self.clone();
            let index = (i + 1) as u32;
            let host = match self.load_host(&ctx, &record.id).await {
                Ok(host) => host,
                Err(e) => {
                    warn!(master = %record.name, error = %e, "failed to load master");
                    errors.push(e);
                    continue;
                }
            };
            group.start(move |t| async move {
                cluster.task_configure_master(t, index, host).await
            });
        }
        if let Err(e) = group.wait_group().await {
            errors.push(e);
        }
        if errors.is_empty() {
            debug!(cluster = %self.name(), "masters configuration successful");
            Ok(())
        } else {
            Err(Error::list(errors))
        }
    }

    async fn task_configure_master(&self, ctx: TaskContext, index: u32, host: Host) -> Result<()> {
        ctx.check_aborted()?;
        let label = format!("master #{} ({})", index, host.name());
        debug!(host = %label, "starting configuration");

        install::install_docker(&ctx, &host, &label).await?;

        if let Some(hook) = self.makers().configure_master {
            hook(&ctx, self, index, &host).await?;
        }
        debug!(host = %label, "configuration successful");
        Ok(())
    }

    /// Configure every worker; errors are collected, never short-circuited.
    pub(crate) async fn task_configure_nodes(&self, ctx: TaskContext) -> Result<()> {
        let nodes = self.list_nodes().await?;
        if nodes.is_empty() {
            debug!(cluster = %self.name(), "no nodes to configure");
            return Ok(());
        }
        info!(cluster = %self.name(), "configuring nodes");

        let mut errors = Vec::new();
        let mut group = TaskGroup::new(&ctx);
        for (i, record) in nodes.into_iter().enumerate() {
            let cluster = self.clone();
            let index = (i + 1) as u32;
            let host = match self.load_host(&ctx, &record.id).await {
                Ok(host) => host,
                Err(e) => {
                    errors.push(Error::internal(
                        "cluster",
                        format!("failed to get metadata of host '{}': {}", record.id, e),
                    ));
                    continue;
                }
            };
            group.start(move |t| async move { cluster.task_configure_node(t, index, host).await });
        }
        if let Err(e) = group.wait_group().await {
            errors.push(e);
        }
        if errors.is_empty() {
            debug!(cluster = %self.name(), "nodes configuration successful");
            Ok(())
        } else {
            Err(Error::list(errors))
        }
    }

    async fn task_configure_node(&self, ctx: TaskContext, index: u32, host: Host) -> Result<()> {
        ctx.check_aborted()?;
        let label = format!("node #{} ({})", index, host.name());
        debug!(host = %label, "starting configuration");

        // Docker is mandatory on every worker.
        install::install_docker(&ctx, &host, &label).await?;

        let Some(hook) = self.makers().configure_node else {
            return Ok(());
        };
        hook(&ctx, self, index, &host).await?;
        debug!(host = %label, "configuration successful");
        Ok(())
    }

    /// Configure the given workers (expansion path).
    pub(crate) async fn configure_nodes_from_list(
        &self,
        ctx: &TaskContext,
        hosts: &[Host],
    ) -> Result<()> {
        let mut group = TaskGroup::new(ctx);
        for (i, host) in hosts.iter().enumerate() {
            let cluster = self.clone();
            let host = host.clone();
            let index = (i + 1) as u32;
            group.start(move |t| async move { cluster.task_configure_node(t, index, host).await });
        }
        group.wait_group().await.map(|_| ())
    }

    /// Join the given workers to the cluster, one at a time: some flavors'
    /// join protocol is not parallel-safe.
    pub(crate) async fn join_nodes_from_list(&self, ctx: &TaskContext, hosts: &[Host]) -> Result<()> {
        let makers = self.makers();
        let Some(join) = makers.join_node_to_cluster else {
            // Without a join protocol, cluster-wide configuration is the
            // flavor's way of absorbing new members.
            if let Some(configure) = makers.configure_cluster {
                return configure(ctx, self).await;
            }
            return Ok(());
        };

        debug!(cluster = %self.name(), "joining nodes to cluster");
        for host in hosts {
            join(ctx, self, host).await?;
        }
        Ok(())
    }

    /// Make the given workers leave the cluster, one at a time.
    pub(crate) async fn leave_nodes_from_list(
        &self,
        ctx: &TaskContext,
        hosts: &[Host],
        master: Option<&Host>,
    ) -> Result<()> {
        let Some(leave) = self.makers().leave_node_from_cluster else {
            return Ok(());
        };
        debug!(cluster = %self.name(), "instructing nodes to leave cluster");
        for host in hosts {
            leave(ctx, self, host, master).await?;
        }
        Ok(())
    }

    // -- removal -----------------------------------------------------------

    /// Leave + unconfigure + delete one worker host. Metadata is untouched;
    /// the callers own the record lifecycle.
    pub(crate) async fn remove_node_resources(
        &self,
        ctx: &TaskContext,
        host: &Host,
        master: Option<&Host>,
    ) -> Result<()> {
        self.leave_nodes_from_list(ctx, std::slice::from_ref(host), master)
            .await?;
        if let Some(hook) = self.makers().unconfigure_node {
            hook(ctx, self, host, master).await?;
        }

        // Detach the subnet security group before the host goes away.
        if let Ok(network) = self.network_config().await {
            if !network.subnet_id.is_empty() {
                let services = self.services();
                if let Ok(subnet) = Subnet::load(
                    ctx,
                    services.provider.clone(),
                    services.agent.clone(),
                    services.subnets.clone(),
                    &network.subnet_id,
                )
                .await
                {
                    match services
                        .provider
                        .unbind_security_group(host.id(), subnet.security_group_id())
                        .await
                    {
                        Ok(()) => {}
                        Err(e) if e.is_not_found() => {}
                        Err(e) => {
                            warn!(host = %host.name(), error = %e, "failed to unbind security group")
                        }
                    }
                }
            }
        }

        match host.delete(ctx).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Delete one worker: reserve its record out of metadata, tear the host
    /// down, and restore the record if that fails.
    pub(crate) async fn delete_node_inner(
        &self,
        ctx: &TaskContext,
        host: &Host,
        master: Option<&Host>,
    ) -> Result<()> {
        let host_id = host.id().to_string();
        let host_name = host.name().to_string();
        debug!(node = %host_name, "deleting node");

        let removed = self
            .alter(|aggregate| {
                let nodes = aggregate.properties.nodes_mut()?;
                let idx = nodes
                    .private_nodes
                    .iter()
                    .position(|n| n.id == host_id)
                    .ok_or_else(|| Error::not_found("node of cluster", host_name.as_str()))?;
                Ok(nodes.private_nodes.remove(idx))
            })
            .await?;

        if let Err(mut e) = self.remove_node_resources(ctx, host, master).await {
            let restore = self
                .alter(move |aggregate| {
                    aggregate.properties.nodes_mut()?.private_nodes.push(removed);
                    Ok(())
                })
                .await;
            if let Err(derr) = restore {
                warn!(node = %host.name(), "failed to restore node record after failed deletion");
                e.add_consequence(derr);
            }
            return Err(e);
        }

        debug!(node = %host.name(), "node deleted");
        Ok(())
    }

    /// Delete one master, with the same reserve-and-restore discipline.
    pub(crate) async fn delete_master_inner(&self, ctx: &TaskContext, host: &Host) -> Result<()> {
        let host_id = host.id().to_string();
        let host_name = host.name().to_string();
        debug!(master = %host_name, "deleting master");

        let removed = self
            .alter(|aggregate| {
                let nodes = aggregate.properties.nodes_mut()?;
                let idx = nodes
                    .masters
                    .iter()
                    .position(|n| n.id == host_id)
                    .ok_or_else(|| Error::not_found("master of cluster", host_name.as_str()))?;
                Ok(nodes.masters.remove(idx))
            })
            .await?;

        let result: Result<()> = async {
            if let Some(hook) = self.makers().unconfigure_master {
                hook(ctx, self, host).await?;
            }
            match host.delete(ctx).await {
                Ok(()) => Ok(()),
                Err(e) if e.is_not_found() => Ok(()),
                Err(e) => Err(e),
            }
        }
        .await;

        if let Err(mut e) = result {
            let restore = self
                .alter(move |aggregate| {
                    aggregate.properties.nodes_mut()?.masters.push(removed);
                    Ok(())
                })
                .await;
            if let Err(derr) = restore {
                warn!(master = %host.name(), "failed to restore master record after failed deletion");
                e.add_consequence(derr);
            }
            return Err(e);
        }

        debug!(master = %host.name(), "master deleted");
        Ok(())
    }
}

/// Delete a host during failure cleanup; a host already gone is a success.
pub(crate) async fn delete_host_on_failure(ctx: &TaskContext, host: &Host) -> Result<()> {
    debug!(host = %host.name(), "cleaning up on failure, deleting host");
    match host.delete(ctx).await {
        Ok(()) => {
            debug!(host = %host.name(), "successfully deleted host");
            Ok(())
        }
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => {
            warn!(host = %host.name(), error = %e, "failed to delete host");
            Err(e)
        }
    }
}

/// Remove every member record and delete every member host, in parallel,
/// bounded by the long-operation timeout. Compensation path of the create
/// pipeline.
pub(crate) async fn delete_all_member_hosts(cluster: &Cluster) -> Result<()> {
    let (masters, nodes) = cluster
        .alter(|aggregate| {
            let nodes = aggregate.properties.nodes_mut()?;
            Ok((
                std::mem::take(&mut nodes.masters),
                std::mem::take(&mut nodes.private_nodes),
            ))
        })
        .await?;

    if masters.is_empty() && nodes.is_empty() {
        return Ok(());
    }
    debug!(
        cluster = %cluster.name(),
        masters = masters.len(),
        nodes = nodes.len(),
        "cleaning up on failure, deleting member hosts"
    );

    // Compensations run on their own scope: the failing parent task may
    // already be cancelled, and cleanup must still proceed.
    let scope = TaskContext::root();
    let mut group = TaskGroup::new(&scope);
    for record in masters.into_iter().chain(nodes) {
        let cluster = cluster.clone();
        group.start(move |t| async move {
            match cluster.load_host(&t, &record.id).await {
                Ok(host) => delete_host_on_failure(&t, &host).await,
                Err(e) if e.is_not_found() => Ok(()),
                Err(e) => Err(e),
            }
        });
    }
    group
        .wait_group_for(temporal::long_operation_timeout())
        .await
        .map(|_| ())
}
