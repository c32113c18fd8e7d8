//! The cluster lifecycle controller.
//!
//! [`Cluster`] is the handle over one cluster aggregate: it owns the staged
//! create pipeline, the start/stop/expand/shrink/delete operations, and the
//! read surface over the metadata. All external effects go through the
//! services bundled in [`Context`]; all concurrency goes through
//! [`flotilla_task`] scopes handed in by the caller.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, info, warn};

use flotilla_common::model::{
    complement_host_definition, ClusterComplexity, ClusterFlavor, ClusterRequest, ClusterState,
    NodeKind, SizingRequirements,
};
use flotilla_common::retry::retry_every_5s;
use flotilla_common::{temporal, Error, Result};
use flotilla_infra::{Host, Subnet, SubnetRecord};
use flotilla_metadata::properties::v2::ClusterNodeV2;
use flotilla_metadata::properties::v3::ClusterNetworkV3;
use flotilla_metadata::{ClusterAggregate, ClusterIdentity, ClusterStore, FolderStore};
use flotilla_provider::{HostAgent, HostState, ObjectStorage, ProviderService};
use flotilla_task::{TaskContext, TaskGroup};

use crate::flavor::{self, Makers};
use crate::install;
use crate::phases;
use crate::rollback::RollbackStack;
use crate::tasks;

/// The services a controller drives: provider, agent, and metadata stores.
#[derive(Clone)]
pub struct Context {
    /// IaaS driver
    pub provider: Arc<dyn ProviderService>,
    /// SSH host agent
    pub agent: Arc<dyn HostAgent>,
    /// Cluster aggregate store
    pub clusters: Arc<ClusterStore>,
    /// Subnet record store
    pub subnets: Arc<FolderStore<SubnetRecord>>,
}

impl Context {
    /// Start building a context.
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").finish_non_exhaustive()
    }
}

/// Builder for [`Context`].
#[derive(Default)]
pub struct ContextBuilder {
    provider: Option<Arc<dyn ProviderService>>,
    agent: Option<Arc<dyn HostAgent>>,
    storage: Option<Arc<dyn ObjectStorage>>,
    tenant: Option<String>,
}

impl ContextBuilder {
    /// Set the IaaS driver.
    pub fn provider(mut self, provider: Arc<dyn ProviderService>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the SSH host agent.
    pub fn agent(mut self, agent: Arc<dyn HostAgent>) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Set the metadata backend.
    pub fn storage(mut self, storage: Arc<dyn ObjectStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the owning tenant (selects the metadata bucket).
    pub fn tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    /// Assemble the context.
    ///
    /// The metadata bucket name honors the provider's
    /// `metadata_bucket_name` override when present, and otherwise derives
    /// from the tenant.
    pub fn build(self) -> Result<Context> {
        let provider = self
            .provider
            .ok_or_else(|| Error::invalid_parameter("provider", "is required"))?;
        let agent = self
            .agent
            .ok_or_else(|| Error::invalid_parameter("agent", "is required"))?;
        let storage = self
            .storage
            .ok_or_else(|| Error::invalid_parameter("storage", "is required"))?;
        let tenant = self
            .tenant
            .ok_or_else(|| Error::invalid_parameter("tenant", "is required"))?;

        let options = provider.configuration_options();
        let (clusters, subnets) = match options.metadata_bucket_name {
            Some(bucket) => (
                FolderStore::with_bucket(storage.clone(), bucket.clone()),
                FolderStore::with_bucket(storage.clone(), bucket),
            ),
            None => (
                FolderStore::new(storage.clone(), &tenant),
                FolderStore::new(storage.clone(), &tenant),
            ),
        };

        Ok(Context {
            provider,
            agent,
            clusters: Arc::new(clusters),
            subnets: Arc::new(subnets),
        })
    }
}

pub(crate) struct ClusterInner {
    name: String,
    flavor: ClusterFlavor,
    complexity: ClusterComplexity,
    services: Context,
    makers: Makers,
}

/// Handle over one cluster.
///
/// Cloning is cheap and clones observe the same aggregate; all persistent
/// state lives in the metadata store, serialized per cluster by the
/// alter/inspect discipline.
#[derive(Clone)]
pub struct Cluster {
    inner: Arc<ClusterInner>,
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("name", &self.inner.name)
            .finish()
    }
}

impl Cluster {
    fn with_identity(services: Context, identity: &ClusterIdentity) -> Self {
        Self {
            inner: Arc::new(ClusterInner {
                name: identity.name.clone(),
                flavor: identity.flavor,
                complexity: identity.complexity,
                services,
                makers: flavor::bootstrap(identity.flavor),
            }),
        }
    }

    // -- construction ------------------------------------------------------

    /// Create a cluster: first metadata, sizing, networking, hosts, then
    /// cluster-wide configuration.
    ///
    /// On failure every compensating action registered so far runs in reverse
    /// order (unless `keep_on_failure` is set), and compensation failures are
    /// attached to the primary error as consequences.
    pub async fn create(ctx: &TaskContext, services: Context, req: ClusterRequest) -> Result<Cluster> {
        ctx.check_aborted()?;
        let mut req = req;
        req.name = req.normalized_name();
        req.validate()?;

        info!(cluster = %req.name, flavor = %req.flavor, complexity = %req.complexity,
              "starting creation of cluster infrastructure");

        // Stage 0: first metadata write. Nothing to compensate if it fails.
        let identity = phases::first_light(&services, &req).await?;
        let cluster = Cluster::with_identity(services.clone(), &identity);

        let mut rollback = RollbackStack::new();
        {
            let services = services.clone();
            let name = req.name.clone();
            rollback.push("delete cluster metadata", move || {
                async move {
                    match services.clusters.delete(&name).await {
                        Err(e) if !e.is_not_found() => Err(e),
                        _ => Ok(()),
                    }
                }
                .boxed()
            });
        }

        match cluster.create_pipeline(ctx, &req, &mut rollback).await {
            Ok(()) => {
                rollback.disarm();
                info!(cluster = %req.name, "cluster creation successful");
                Ok(cluster)
            }
            Err(mut e) => {
                warn!(cluster = %req.name, error = %e, "cluster creation failed");
                if req.keep_on_failure {
                    rollback.disarm();
                } else {
                    rollback.unwind(&mut e).await;
                }
                Err(e)
            }
        }
    }

    async fn create_pipeline(
        &self,
        ctx: &TaskContext,
        req: &ClusterRequest,
        rollback: &mut RollbackStack,
    ) -> Result<()> {
        // Stage 1: sizing.
        let (gateways_def, masters_def, nodes_def) =
            phases::determine_sizing_requirements(self, req).await?;

        // Stage 2: networking.
        let outcome = phases::create_networking_resources(ctx, self, req, &gateways_def).await?;
        {
            let subnet = outcome.subnet.clone();
            let network = outcome.created_network.clone();
            rollback.push("delete subnet and network", move || {
                async move {
                    let scope = TaskContext::root();
                    subnet.delete(&scope).await?;
                    if let Some(network) = network {
                        match network.delete(&scope).await {
                            Err(e) if !e.is_not_found() => return Err(e),
                            _ => {}
                        }
                    }
                    Ok(())
                }
                .boxed()
            });
        }

        // Stage 3: hosts. Internal failures clean up their own hosts; the
        // entry pushed afterwards covers the final configuration stage.
        let (master_count, node_count) = self.required_member_counts(req);
        phases::create_host_resources(
            ctx,
            self,
            &outcome.subnet,
            &masters_def,
            &nodes_def,
            master_count,
            node_count,
            req.keep_on_failure,
        )
        .await?;
        {
            let cluster = self.clone();
            rollback.push("delete member hosts", move || {
                async move { tasks::delete_all_member_hosts(&cluster).await }.boxed()
            });
        }

        // Final stage: cluster-wide configuration, then the state flips to
        // nominal.
        self.configure_cluster_stage(ctx).await?;
        self.set_state(ClusterState::Nominal).await
    }

    fn required_member_counts(&self, req: &ClusterRequest) -> (u32, u32) {
        let (min_masters, min_nodes, _public) = self
            .inner
            .makers
            .minimum_required_servers
            .map(|hook| hook(self))
            .unwrap_or((0, 0, 0));
        let masters = if req.master_count > 0 {
            req.master_count
        } else {
            min_masters
        };
        let nodes = if req.node_count > 0 {
            req.node_count
        } else {
            min_nodes
        };
        (masters, nodes)
    }

    async fn configure_cluster_stage(&self, ctx: &TaskContext) -> Result<()> {
        info!(cluster = %self.name(), "configuring cluster");
        install::install_reverse_proxy(ctx, self).await?;
        install::install_remote_desktop(ctx, self).await?;
        if let Some(hook) = self.inner.makers.configure_cluster {
            hook(ctx, self).await?;
        }
        Ok(())
    }

    /// Load an existing cluster, upgrading legacy properties in place.
    pub async fn load(ctx: &TaskContext, services: Context, name: &str) -> Result<Cluster> {
        ctx.check_aborted()?;
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::invalid_parameter("name", "cannot be empty"));
        }

        let aggregate = services.clusters.read(name).await?;

        // Upgrade-on-load: rewrite once when anything was at an old version.
        let mut probe = aggregate.properties.clone();
        if probe.upgrade() {
            debug!(cluster = %name, "upgrading legacy properties");
            services
                .clusters
                .alter(name, |agg| {
                    agg.properties.upgrade();
                    Ok(())
                })
                .await?;
        }

        Ok(Cluster::with_identity(services, &aggregate.identity))
    }

    /// Iterate the identities of every cluster of the tenant.
    pub async fn browse(
        services: &Context,
        mut cb: impl FnMut(&ClusterIdentity) -> Result<()>,
    ) -> Result<()> {
        services
            .clusters
            .browse(|aggregate: ClusterAggregate| cb(&aggregate.identity))
            .await
    }

    // -- read surface ------------------------------------------------------

    /// Cluster name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Cluster kind
    pub fn flavor(&self) -> ClusterFlavor {
        self.inner.flavor
    }

    /// Redundancy level
    pub fn complexity(&self) -> ClusterComplexity {
        self.inner.complexity
    }

    pub(crate) fn services(&self) -> &Context {
        &self.inner.services
    }

    pub(crate) fn makers(&self) -> &Makers {
        &self.inner.makers
    }

    pub(crate) async fn alter<R>(
        &self,
        mutator: impl FnOnce(&mut ClusterAggregate) -> Result<R>,
    ) -> Result<R> {
        self.inner
            .services
            .clusters
            .alter(&self.inner.name, mutator)
            .await
    }

    pub(crate) async fn inspect<R>(
        &self,
        viewer: impl FnOnce(&ClusterAggregate) -> Result<R>,
    ) -> Result<R> {
        self.inner
            .services
            .clusters
            .inspect(&self.inner.name, viewer)
            .await
    }

    /// The identity record (cloned view).
    pub async fn identity(&self) -> Result<ClusterIdentity> {
        self.inspect(|aggregate| Ok(aggregate.identity.clone())).await
    }

    /// Generated password of the cluster admin account.
    pub async fn admin_password(&self) -> Result<String> {
        Ok(self.identity().await?.admin_password)
    }

    /// The networking property at its latest version.
    pub async fn network_config(&self) -> Result<ClusterNetworkV3> {
        self.inspect(|aggregate| aggregate.properties.network()).await
    }

    /// Masters, in creation order.
    pub async fn list_masters(&self) -> Result<Vec<ClusterNodeV2>> {
        self.inspect(|aggregate| Ok(aggregate.properties.nodes()?.masters))
            .await
    }

    /// Workers, in creation order.
    pub async fn list_nodes(&self) -> Result<Vec<ClusterNodeV2>> {
        self.inspect(|aggregate| Ok(aggregate.properties.nodes()?.private_nodes))
            .await
    }

    /// Master host IDs indexed by numerical ID.
    pub async fn list_master_ids(&self) -> Result<BTreeMap<u32, String>> {
        Ok(self
            .list_masters()
            .await?
            .into_iter()
            .map(|n| (n.numerical_id, n.id))
            .collect())
    }

    /// Master hostnames indexed by numerical ID.
    pub async fn list_master_names(&self) -> Result<BTreeMap<u32, String>> {
        Ok(self
            .list_masters()
            .await?
            .into_iter()
            .map(|n| (n.numerical_id, n.name))
            .collect())
    }

    /// Master private IPs indexed by numerical ID.
    pub async fn list_master_ips(&self) -> Result<BTreeMap<u32, String>> {
        Ok(self
            .list_masters()
            .await?
            .into_iter()
            .map(|n| (n.numerical_id, n.private_ip))
            .collect())
    }

    /// Worker host IDs indexed by numerical ID.
    pub async fn list_node_ids(&self) -> Result<BTreeMap<u32, String>> {
        Ok(self
            .list_nodes()
            .await?
            .into_iter()
            .map(|n| (n.numerical_id, n.id))
            .collect())
    }

    /// Worker hostnames indexed by numerical ID.
    pub async fn list_node_names(&self) -> Result<BTreeMap<u32, String>> {
        Ok(self
            .list_nodes()
            .await?
            .into_iter()
            .map(|n| (n.numerical_id, n.name))
            .collect())
    }

    /// Worker private IPs indexed by numerical ID.
    pub async fn list_node_ips(&self) -> Result<BTreeMap<u32, String>> {
        Ok(self
            .list_nodes()
            .await?
            .into_iter()
            .map(|n| (n.numerical_id, n.private_ip))
            .collect())
    }

    /// Number of workers.
    pub async fn count_nodes(&self) -> Result<u32> {
        Ok(self.list_nodes().await?.len() as u32)
    }

    /// True when a worker with this ID or name exists.
    pub async fn lookup_node(&self, reference: &str) -> Result<bool> {
        Ok(self
            .list_nodes()
            .await?
            .iter()
            .any(|n| n.id == reference || n.name == reference))
    }

    /// Load the facade of a member worker by host ID.
    pub async fn get_node_by_id(&self, ctx: &TaskContext, host_id: &str) -> Result<Host> {
        if !self.lookup_node(host_id).await? {
            return Err(Error::not_found("node of cluster", host_id));
        }
        self.load_host(ctx, host_id).await
    }

    pub(crate) async fn load_host(&self, ctx: &TaskContext, id: &str) -> Result<Host> {
        Host::load(
            ctx,
            self.inner.services.provider.clone(),
            self.inner.services.agent.clone(),
            id,
        )
        .await
    }

    /// First master answering over SSH.
    pub async fn find_available_master(&self, ctx: &TaskContext) -> Result<Host> {
        let mut last_error: Option<Error> = None;
        for record in self.list_masters().await? {
            let host = self.load_host(ctx, &record.id).await?;
            match host.wait_ssh_ready(ctx, temporal::connect_ssh_timeout()).await {
                Ok(()) => return Ok(host),
                Err(e) if e.is_timeout() => {
                    last_error = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        let mut err = Error::not_available(format!(
            "failed to find an available master in cluster '{}'",
            self.name()
        ));
        if let Some(last) = last_error {
            err.add_consequence(last);
        }
        Err(err)
    }

    /// First worker answering over SSH.
    pub async fn find_available_node(&self, ctx: &TaskContext) -> Result<Host> {
        let mut last_error: Option<Error> = None;
        for record in self.list_nodes().await? {
            let host = self.load_host(ctx, &record.id).await?;
            match host.wait_ssh_ready(ctx, temporal::connect_ssh_timeout()).await {
                Ok(()) => return Ok(host),
                Err(e) if e.is_timeout() => {
                    last_error = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        let mut err = Error::not_available(format!(
            "failed to find an available node in cluster '{}'",
            self.name()
        ));
        if let Some(last) = last_error {
            err.add_consequence(last);
        }
        Err(err)
    }

    pub(crate) async fn master_hosts(&self, ctx: &TaskContext) -> Result<Vec<Host>> {
        let mut hosts = Vec::new();
        for record in self.list_masters().await? {
            hosts.push(self.load_host(ctx, &record.id).await?);
        }
        Ok(hosts)
    }

    pub(crate) async fn node_hosts(&self, ctx: &TaskContext) -> Result<Vec<Host>> {
        let mut hosts = Vec::new();
        for record in self.list_nodes().await? {
            hosts.push(self.load_host(ctx, &record.id).await?);
        }
        Ok(hosts)
    }

    pub(crate) async fn gateway_hosts(&self, ctx: &TaskContext) -> Result<Vec<Host>> {
        let network = self.network_config().await?;
        let mut hosts = Vec::new();
        for id in [&network.gateway_id, &network.secondary_gateway_id] {
            if !id.is_empty() {
                hosts.push(self.load_host(ctx, id).await?);
            }
        }
        Ok(hosts)
    }

    // -- state -------------------------------------------------------------

    /// The state as last persisted; gating decisions use this.
    pub async fn persisted_state(&self) -> Result<ClusterState> {
        self.inspect(|aggregate| Ok(aggregate.properties.state().state))
            .await
    }

    /// Collect the current state through the flavor hook (falling back to the
    /// persisted state when the flavor defines none) and persist it.
    pub async fn get_state(&self, ctx: &TaskContext) -> Result<ClusterState> {
        let Some(hook) = self.inner.makers.get_state else {
            return self.persisted_state().await;
        };
        let state = hook(ctx, self).await?;
        self.set_state(state).await?;
        Ok(state)
    }

    pub(crate) async fn set_state(&self, state: ClusterState) -> Result<()> {
        self.alter(|aggregate| {
            aggregate.properties.state_mut().state = state;
            Ok(())
        })
        .await
    }

    /// Allocate the next hostname of the given role.
    ///
    /// The index comes from the role's monotonic counter, incremented under
    /// the aggregate lock so concurrent creations never collide.
    pub(crate) async fn build_hostname(&self, kind: NodeKind) -> Result<String> {
        let index = self
            .alter(|aggregate| {
                let nodes = aggregate.properties.nodes_mut()?;
                let index = match kind {
                    NodeKind::Master => {
                        nodes.master_last_index += 1;
                        nodes.master_last_index
                    }
                    NodeKind::Node => {
                        nodes.private_last_index += 1;
                        nodes.private_last_index
                    }
                    NodeKind::Gateway => {
                        return Err(Error::invalid_parameter(
                            "kind",
                            "gateways are named by their subnet",
                        ))
                    }
                };
                Ok(index)
            })
            .await?;
        Ok(format!("{}-{}-{}", self.name(), kind.label(), index))
    }

    // -- start / stop ------------------------------------------------------

    /// Start every host of the cluster.
    ///
    /// No-op when already nominal or degraded; waits for an in-flight start
    /// to settle; refuses non-stopped states otherwise.
    pub async fn start(&self, ctx: &TaskContext) -> Result<()> {
        ctx.check_aborted()?;
        match self.persisted_state().await? {
            ClusterState::Nominal | ClusterState::Degraded => return Ok(()),
            ClusterState::Starting => {
                return self
                    .wait_for_state(ctx, &[ClusterState::Nominal, ClusterState::Degraded], "start")
                    .await;
            }
            ClusterState::Stopped => {}
            state => {
                return Err(Error::not_available(format!(
                    "failed to start cluster '{}' because of its current state: {}",
                    self.name(),
                    state
                )))
            }
        }

        self.set_state(ClusterState::Starting).await?;

        let (gateway_ids, masters, nodes) = self.member_host_ids().await?;
        let mut group = TaskGroup::new(ctx);
        for id in gateway_ids.into_iter().chain(masters).chain(nodes) {
            let provider = self.inner.services.provider.clone();
            group.start(move |t| async move {
                t.check_aborted()?;
                provider.start_host(&id).await?;
                provider
                    .wait_host_state(&id, HostState::Started, temporal::host_timeout())
                    .await
            });
        }
        group.wait_group().await?;

        self.set_state(ClusterState::Nominal).await
    }

    /// Stop every host of the cluster: workers first, then masters, then the
    /// gateways.
    pub async fn stop(&self, ctx: &TaskContext) -> Result<()> {
        ctx.check_aborted()?;
        match self.persisted_state().await? {
            ClusterState::Stopped => return Ok(()),
            ClusterState::Stopping => {
                return self
                    .wait_for_state(ctx, &[ClusterState::Stopped], "stop")
                    .await;
            }
            ClusterState::Nominal | ClusterState::Degraded => {}
            state => {
                return Err(Error::not_available(format!(
                    "failed to stop cluster '{}' because of its current state: {}",
                    self.name(),
                    state
                )))
            }
        }

        self.set_state(ClusterState::Stopping).await?;

        let (gateway_ids, masters, nodes) = self.member_host_ids().await?;
        let mut group = TaskGroup::new(ctx);
        for id in nodes.into_iter().chain(masters).chain(gateway_ids) {
            let provider = self.inner.services.provider.clone();
            group.start(move |t| async move {
                t.check_aborted()?;
                provider.stop_host(&id).await?;
                provider
                    .wait_host_state(&id, HostState::Stopped, temporal::host_timeout())
                    .await
            });
        }
        group.wait_group().await?;

        self.set_state(ClusterState::Stopped).await
    }

    async fn wait_for_state(
        &self,
        ctx: &TaskContext,
        targets: &[ClusterState],
        operation: &str,
    ) -> Result<()> {
        let cluster = self.clone();
        let task_ctx = ctx.clone();
        let targets: Vec<ClusterState> = targets.to_vec();
        let result = retry_every_5s(
            &format!("wait for cluster '{}' to finish {}", self.name(), operation),
            temporal::transition_timeout(),
            move || {
                let cluster = cluster.clone();
                let task_ctx = task_ctx.clone();
                let targets = targets.clone();
                async move {
                    task_ctx.check_aborted()?;
                    let state = cluster.get_state(&task_ctx).await?;
                    if targets.contains(&state) {
                        Ok(())
                    } else {
                        Err(Error::not_available(format!(
                            "current state of cluster is '{}'",
                            state
                        )))
                    }
                }
            },
        )
        .await;
        result.map_err(|e| {
            if e.is_timeout() {
                Error::timeout(
                    format!("waiting for cluster '{}' to become {}", self.name(), operation),
                    temporal::transition_timeout(),
                )
            } else {
                e
            }
        })
    }

    async fn member_host_ids(&self) -> Result<(Vec<String>, Vec<String>, Vec<String>)> {
        self.inspect(|aggregate| {
            let network = aggregate.properties.network()?;
            let nodes = aggregate.properties.nodes()?;
            let mut gateways = Vec::new();
            if !network.gateway_id.is_empty() {
                gateways.push(network.gateway_id.clone());
            }
            if !network.secondary_gateway_id.is_empty() {
                gateways.push(network.secondary_gateway_id.clone());
            }
            Ok((
                gateways,
                nodes.masters.iter().map(|n| n.id.clone()).collect(),
                nodes.private_nodes.iter().map(|n| n.id.clone()).collect(),
            ))
        })
        .await
    }

    // -- expand ------------------------------------------------------------

    /// Add one worker.
    pub async fn add_node(&self, ctx: &TaskContext, def: SizingRequirements) -> Result<Host> {
        let mut hosts = self.add_nodes(ctx, 1, def).await?;
        Ok(hosts.remove(0))
    }

    /// Add `count` workers: parallel creation, parallel configuration, then
    /// sequential joins (some flavors' join protocol is not parallel-safe).
    pub async fn add_nodes(
        &self,
        ctx: &TaskContext,
        count: u32,
        def: SizingRequirements,
    ) -> Result<Vec<Host>> {
        ctx.check_aborted()?;
        if count == 0 {
            return Err(Error::invalid_parameter("count", "must be greater than 0"));
        }

        let defaults = self
            .inspect(|aggregate| aggregate.properties.defaults())
            .await?;
        let mut node_def = complement_host_definition(&def, &defaults.node_sizing);
        if node_def.image.is_empty() {
            node_def.image = defaults.image.clone();
        }

        info!(cluster = %self.name(), count = count, "adding node(s)");

        // Failed subtasks clean up after themselves; the survivors are
        // collected here and rolled back as a batch if anything went wrong.
        let mut handles = Vec::with_capacity(count as usize);
        for i in 1..=count {
            let cluster = self.clone();
            let def = node_def.clone();
            handles.push(ctx.start(move |t| async move {
                cluster.task_create_node(t, i, def, false).await
            }));
        }

        let mut created = Vec::new();
        let mut errors = Vec::new();
        for handle in handles {
            match handle.wait().await {
                Ok(host) => created.push(host),
                Err(e) => errors.push(e),
            }
        }
        if !errors.is_empty() {
            let mut e = Error::internal(
                "cluster",
                format!(
                    "errors occurred on node addition to cluster '{}'",
                    self.name()
                ),
            )
            .with_consequence(Error::list(errors));
            if let Err(derr) = self.remove_created_nodes(&created).await {
                e.add_consequence(derr);
            }
            return Err(e);
        }

        let outcome: Result<()> = async {
            self.configure_nodes_from_list(ctx, &created).await?;
            self.join_nodes_from_list(ctx, &created).await
        }
        .await;

        match outcome {
            Ok(()) => Ok(created),
            Err(mut e) => {
                warn!(cluster = %self.name(), error = %e, "node addition failed, cleaning up");
                if let Err(derr) = self.remove_created_nodes(&created).await {
                    e.add_consequence(derr);
                }
                Err(e)
            }
        }
    }

    /// Remove the metadata records and hosts of a failed expansion.
    async fn remove_created_nodes(&self, created: &[Host]) -> Result<()> {
        let ids: Vec<String> = created.iter().map(|h| h.id().to_string()).collect();
        self.alter(|aggregate| {
            let nodes = aggregate.properties.nodes_mut()?;
            nodes.private_nodes.retain(|n| !ids.contains(&n.id));
            Ok(())
        })
        .await?;

        let scope = TaskContext::root();
        let mut group = TaskGroup::new(&scope);
        for host in created {
            let host = host.clone();
            group.start(move |t| async move { tasks::delete_host_on_failure(&t, &host).await });
        }
        group
            .wait_group_for(temporal::long_operation_timeout())
            .await
            .map(|_| ())
    }

    // -- shrink ------------------------------------------------------------

    /// Remove the last `count` workers, LIFO.
    ///
    /// The whole batch is reserved out of metadata in one alter; on any
    /// deletion failure the batch is restored so the worker list is left
    /// unchanged.
    pub async fn shrink(&self, ctx: &TaskContext, count: u32) -> Result<Vec<ClusterNodeV2>> {
        ctx.check_aborted()?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let removed = self
            .alter(|aggregate| {
                let nodes = aggregate.properties.nodes_mut()?;
                let length = nodes.private_nodes.len() as u32;
                if length < count {
                    return Err(Error::invalid_request(format!(
                        "cannot shrink by {} node(s), only {} node(s) available",
                        count, length
                    )));
                }
                Ok(nodes.private_nodes.split_off((length - count) as usize))
            })
            .await?;

        info!(cluster = %self.name(), count = count, "shrinking cluster");

        let selected_master = self.find_available_master(ctx).await.ok();
        let mut group = TaskGroup::new(ctx);
        for record in removed.iter().rev().cloned() {
            let cluster = self.clone();
            let master = selected_master.clone();
            group.start(move |t| async move {
                let host = match cluster.load_host(&t, &record.id).await {
                    Ok(host) => host,
                    Err(e) if e.is_not_found() => return Ok(()),
                    Err(e) => return Err(e),
                };
                cluster
                    .remove_node_resources(&t, &host, master.as_ref())
                    .await
            });
        }

        match group.wait_group().await {
            Ok(_) => Ok(removed),
            Err(mut e) => {
                let restore = self
                    .alter(|aggregate| {
                        aggregate
                            .properties
                            .nodes_mut()?
                            .private_nodes
                            .extend(removed.iter().cloned());
                        Ok(())
                    })
                    .await;
                if let Err(derr) = restore {
                    warn!(cluster = %self.name(), "failed to restore removed nodes in metadata");
                    e.add_consequence(derr);
                }
                Err(e)
            }
        }
    }

    /// Remove the most recently added worker and return its record.
    pub async fn delete_last_node(&self, ctx: &TaskContext) -> Result<ClusterNodeV2> {
        ctx.check_aborted()?;
        let node = self
            .inspect(|aggregate| Ok(aggregate.properties.nodes()?.private_nodes.last().cloned()))
            .await?
            .ok_or_else(|| Error::not_found("last node of cluster", self.name()))?;

        let master = self.find_available_master(ctx).await?;
        let host = self.load_host(ctx, &node.id).await?;
        self.delete_node_inner(ctx, &host, Some(&master)).await?;
        Ok(node)
    }

    /// Remove one worker by host ID, using `selected_master_id` for the leave
    /// protocol when given.
    pub async fn delete_specific_node(
        &self,
        ctx: &TaskContext,
        host_id: &str,
        selected_master_id: Option<&str>,
    ) -> Result<()> {
        ctx.check_aborted()?;
        let host_id = host_id.trim();
        if host_id.is_empty() {
            return Err(Error::invalid_parameter("host_id", "cannot be empty"));
        }

        let master = match selected_master_id {
            Some(id) if !id.is_empty() => self.load_host(ctx, id).await?,
            _ => self.find_available_master(ctx).await?,
        };
        let host = self.load_host(ctx, host_id).await?;
        self.delete_node_inner(ctx, &host, Some(&master)).await
    }

    // -- delete ------------------------------------------------------------

    /// Destroy the cluster: workers, masters, subnet, network (when created
    /// with the cluster), then the metadata.
    ///
    /// Individual failures are reported but never abort the sweep; the caller
    /// receives them all in one aggregate error.
    pub async fn delete(&self, ctx: &TaskContext) -> Result<()> {
        ctx.check_aborted()?;
        let state = self.persisted_state().await?;
        if state == ClusterState::Creating || state == ClusterState::Removed {
            return Err(Error::not_available(format!(
                "cannot delete cluster '{}' in state {}",
                self.name(),
                state
            )));
        }

        self.set_state(ClusterState::Removed).await?;
        info!(cluster = %self.name(), "deleting cluster");

        let mut cleaning_errors: Vec<Error> = Vec::new();

        // Workers first: their leave protocol may need a master.
        match self.list_nodes().await {
            Ok(nodes) if !nodes.is_empty() => {
                let master = self.find_available_master(ctx).await.ok();
                let mut group = TaskGroup::new(ctx);
                for record in nodes {
                    let cluster = self.clone();
                    let master = master.clone();
                    group.start(move |t| async move {
                        let host = match cluster.load_host(&t, &record.id).await {
                            Ok(host) => host,
                            Err(e) if e.is_not_found() => return Ok(()),
                            Err(e) => return Err(e),
                        };
                        cluster.delete_node_inner(&t, &host, master.as_ref()).await
                    });
                }
                if let Err(e) = group.wait_group().await {
                    cleaning_errors.push(e);
                }
            }
            Ok(_) => {}
            Err(e) => cleaning_errors.push(e),
        }

        // Then masters.
        match self.list_masters().await {
            Ok(masters) if !masters.is_empty() => {
                let mut group = TaskGroup::new(ctx);
                for record in masters {
                    let cluster = self.clone();
                    group.start(move |t| async move {
                        let host = match cluster.load_host(&t, &record.id).await {
                            Ok(host) => host,
                            Err(e) if e.is_not_found() => return Ok(()),
                            Err(e) => return Err(e),
                        };
                        cluster.delete_master_inner(&t, &host).await
                    });
                }
                if let Err(e) = group.wait_group().await {
                    cleaning_errors.push(e);
                }
            }
            Ok(_) => {}
            Err(e) => cleaning_errors.push(e),
        }

        // Networking: subnet (with its gateways), then the network the
        // cluster created, if any.
        match self.network_config().await {
            Ok(network) => {
                if let Err(e) = self.delete_networking(ctx, &network).await {
                    cleaning_errors.push(e);
                }
            }
            Err(e) => cleaning_errors.push(e),
        }

        // Metadata last.
        match self.inner.services.clusters.delete(self.name()).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => cleaning_errors.push(e),
        }

        if cleaning_errors.is_empty() {
            info!(cluster = %self.name(), "cluster deleted");
            Ok(())
        } else {
            Err(Error::list(cleaning_errors))
        }
    }

    async fn delete_networking(&self, ctx: &TaskContext, network: &ClusterNetworkV3) -> Result<()> {
        if network.subnet_id.is_empty() {
            return Ok(());
        }
        let services = self.services();
        let subnet = match Subnet::load(
            ctx,
            services.provider.clone(),
            services.agent.clone(),
            services.subnets.clone(),
            &network.subnet_id,
        )
        .await
        {
            Ok(subnet) => subnet,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        // An empty network_id in the property means the network was created
        // with the cluster and goes away with it.
        let owned_network_id = if network.network_id.is_empty() {
            Some(subnet.network_id().to_string()).filter(|id| !id.is_empty())
        } else {
            None
        };

        let subnet_for_retry = subnet.clone();
        let retry_ctx = ctx.clone();
        let subnet_result = retry_every_5s(
            &format!("delete subnet '{}'", subnet.name()),
            temporal::host_timeout(),
            move || {
                let subnet = subnet_for_retry.clone();
                let ctx = retry_ctx.clone();
                async move { subnet.delete(&ctx).await }
            },
        )
        .await;
        match subnet_result {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        if let Some(network_id) = owned_network_id {
            let provider = services.provider.clone();
            let result = retry_every_5s(
                &format!("delete network '{}'", network_id),
                temporal::host_timeout(),
                move || {
                    let provider = provider.clone();
                    let network_id = network_id.clone();
                    async move { provider.delete_network(&network_id).await }
                },
            )
            .await;
            match result {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_builder_requires_everything() {
        let err = Context::builder().build().unwrap_err();
        assert!(err.to_string().contains("provider"));
    }
}
