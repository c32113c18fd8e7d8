//! Subnet facade: the cluster-side view of a subnet and its gateway hosts.
//!
//! Creating a subnet also provisions its gateway host(s): one, or two when HA
//! is requested. The gateway carries the subnet's public face, so its record
//! (IDs, route and endpoint IPs) is persisted in the `subnets/` metadata
//! folder for later loads.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use flotilla_common::model::SizingRequirements;
use flotilla_common::{temporal, Error, Result};
use flotilla_metadata::{FolderStore, Record};
use flotilla_provider::{HostAgent, HostRequest, ProviderService, SubnetRequest};
use flotilla_task::TaskContext;

use crate::host::Host;

/// Persisted description of a subnet and its gateways.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SubnetRecord {
    pub id: String,
    pub name: String,
    pub network_id: String,
    pub cidr: String,
    pub security_group_id: String,
    /// Primary gateway host ID
    pub gateway_id: String,
    /// Secondary gateway host ID; empty without HA
    pub secondary_gateway_id: String,
    /// IP the subnet routes through by default
    pub default_route_ip: String,
    /// IP the outside world reaches the subnet at
    pub endpoint_ip: String,
}

impl Record for SubnetRecord {
    const KIND: &'static str = "subnet";
    const FOLDER: &'static str = "subnets";

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Everything needed to create a subnet with its gateways.
#[derive(Clone, Debug, Default)]
pub struct SubnetSpec {
    pub name: String,
    pub network_id: String,
    pub cidr: String,
    /// Provision a secondary gateway for failover
    pub ha: bool,
    /// Image the gateways boot from
    pub image: String,
    /// Key pair installed on the gateways
    pub key_pair_name: String,
    pub dns_servers: Vec<String>,
}

/// The subnet facade.
#[derive(Clone)]
pub struct Subnet {
    provider: Arc<dyn ProviderService>,
    agent: Arc<dyn HostAgent>,
    store: Arc<FolderStore<SubnetRecord>>,
    record: SubnetRecord,
}

impl Subnet {
    /// Create the subnet and its gateway host(s).
    ///
    /// On any failure the partially created gateways and the subnet are
    /// deleted before the error is surfaced, with deletion failures attached
    /// as consequences.
    pub async fn create(
        ctx: &TaskContext,
        provider: Arc<dyn ProviderService>,
        agent: Arc<dyn HostAgent>,
        store: Arc<FolderStore<SubnetRecord>>,
        spec: SubnetSpec,
        gateway_sizing: &SizingRequirements,
    ) -> Result<Subnet> {
        ctx.check_aborted()?;
        debug!(subnet = %spec.name, ha = spec.ha, "creating subnet");

        let info = provider
            .create_subnet(&SubnetRequest {
                name: spec.name.clone(),
                network_id: spec.network_id.clone(),
                cidr: spec.cidr.clone(),
                dns_servers: spec.dns_servers.clone(),
            })
            .await?;

        let mut created_gateways: Vec<Host> = Vec::new();
        let gateway_count = if spec.ha { 2 } else { 1 };

        for i in 0..gateway_count {
            let gw_name = if i == 0 {
                format!("gw-{}", spec.name)
            } else {
                format!("gw2-{}", spec.name)
            };
            // A gateway never gets its own subnet's security group bound: the
            // group routes through the gateway, binding would deadlock.
            let result = Host::create(
                ctx,
                provider.clone(),
                agent.clone(),
                HostRequest {
                    resource_name: gw_name,
                    subnet_id: info.id.clone(),
                    default_route_ip: String::new(),
                    public_ip: true,
                    image: spec.image.clone(),
                    key_pair_name: spec.key_pair_name.clone(),
                },
                gateway_sizing,
                None,
            )
            .await;

            match result {
                Ok(host) => created_gateways.push(host),
                Err(mut e) => {
                    warn!(subnet = %spec.name, error = %e, "gateway creation failed, rolling back subnet");
                    for gw in &created_gateways {
                        if let Err(derr) = gw.delete(ctx).await {
                            if !derr.is_not_found() {
                                e.add_consequence(derr);
                            }
                        }
                    }
                    if let Err(derr) = provider.delete_subnet(&info.id).await {
                        if !derr.is_not_found() {
                            e.add_consequence(derr);
                        }
                    }
                    return Err(e);
                }
            }
        }

        let primary = &created_gateways[0];
        let record = SubnetRecord {
            id: info.id.clone(),
            name: spec.name.clone(),
            network_id: spec.network_id.clone(),
            cidr: spec.cidr.clone(),
            security_group_id: info.security_group_id.clone(),
            gateway_id: primary.id().to_string(),
            secondary_gateway_id: created_gateways
                .get(1)
                .map(|g| g.id().to_string())
                .unwrap_or_default(),
            default_route_ip: primary.private_ip().to_string(),
            endpoint_ip: primary.public_ip().unwrap_or_default().to_string(),
        };
        store.create(&record).await?;

        Ok(Subnet {
            provider,
            agent,
            store,
            record,
        })
    }

    /// Load a subnet by metadata name or provider ID.
    pub async fn load(
        ctx: &TaskContext,
        provider: Arc<dyn ProviderService>,
        agent: Arc<dyn HostAgent>,
        store: Arc<FolderStore<SubnetRecord>>,
        reference: &str,
    ) -> Result<Subnet> {
        ctx.check_aborted()?;
        let record = match store.read(reference).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => store.read_by_id(reference).await?,
            Err(e) => return Err(e),
        };
        Ok(Subnet {
            provider,
            agent,
            store,
            record,
        })
    }

    /// Provider-side identifier
    pub fn id(&self) -> &str {
        &self.record.id
    }

    /// Subnet name
    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// Run a viewer over the subnet record.
    pub fn inspect<R>(&self, viewer: impl FnOnce(&SubnetRecord) -> Result<R>) -> Result<R> {
        viewer(&self.record)
    }

    /// Network the subnet was carved from
    pub fn network_id(&self) -> &str {
        &self.record.network_id
    }

    /// Security group created with the subnet
    pub fn security_group_id(&self) -> &str {
        &self.record.security_group_id
    }

    /// IP the subnet routes through by default
    pub fn default_route_ip(&self) -> &str {
        &self.record.default_route_ip
    }

    /// IP the outside world reaches the subnet at
    pub fn endpoint_ip(&self) -> &str {
        &self.record.endpoint_ip
    }

    /// Load a gateway host; not-found when asking for an absent secondary.
    pub async fn gateway(&self, ctx: &TaskContext, primary: bool) -> Result<Host> {
        let id = if primary {
            &self.record.gateway_id
        } else {
            &self.record.secondary_gateway_id
        };
        if id.is_empty() {
            return Err(Error::not_found(
                if primary {
                    "gateway of subnet"
                } else {
                    "secondary gateway of subnet"
                },
                self.record.name.as_str(),
            ));
        }
        Host::load(ctx, self.provider.clone(), self.agent.clone(), id).await
    }

    /// Delete the gateways, the subnet, and its metadata record.
    ///
    /// A missing gateway or subnet counts as already deleted; real failures
    /// abort the deletion so the caller can retry.
    pub async fn delete(&self, ctx: &TaskContext) -> Result<()> {
        ctx.check_aborted()?;

        // Cut traffic first where the provider supports it, so hosts going
        // down do not flap the security group.
        if self.provider.capabilities().can_disable_security_group
            && !self.record.security_group_id.is_empty()
        {
            match self
                .provider
                .disable_security_group(&self.record.security_group_id)
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(subnet = %self.record.name, error = %e, "failed to disable security group"),
            }
        }

        for id in [
            self.record.gateway_id.as_str(),
            self.record.secondary_gateway_id.as_str(),
        ] {
            if id.is_empty() {
                continue;
            }
            match self.provider.delete_host(id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        match self.provider.delete_subnet(&self.record.id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        match self.store.delete(&self.record.name).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Wait until both gateways answer over SSH.
    pub async fn wait_gateways_ready(&self, ctx: &TaskContext) -> Result<()> {
        let primary = self.gateway(ctx, true).await?;
        primary
            .wait_ssh_ready(ctx, temporal::execution_timeout())
            .await?;
        match self.gateway(ctx, false).await {
            Ok(secondary) => {
                secondary
                    .wait_ssh_ready(ctx, temporal::execution_timeout())
                    .await
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for Subnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subnet")
            .field("id", &self.record.id)
            .field("name", &self.record.name)
            .field("ha", &!self.record.secondary_gateway_id.is_empty())
            .finish()
    }
}
