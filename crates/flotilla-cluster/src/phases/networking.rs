//! Stage 2: networking resources (network, subnet, gateways).

use tracing::{debug, info};

use flotilla_common::model::{ClusterComplexity, ClusterRequest, SizingRequirements};
use flotilla_common::{Error, Result, GATEWAY_FAILOVER_FEATURE};
use flotilla_infra::{Network, Subnet, SubnetSpec};
use flotilla_metadata::ClusterIdentity;
use flotilla_provider::NetworkRequest;
use flotilla_task::TaskContext;

use crate::controller::Cluster;

/// What stage 2 hands to the rest of the pipeline.
pub(crate) struct NetworkingOutcome {
    /// The subnet carrying the cluster
    pub subnet: Subnet,
    /// The network allocated for the cluster, when the request did not name
    /// an existing one. It must be deleted with the cluster.
    pub created_network: Option<Network>,
}

/// Load or create the network, create the subnet (HA gateways unless
/// complexity is small, the provider has no private VIP support, or failover
/// was explicitly disabled), and persist the networking property.
pub(crate) async fn create_networking_resources(
    ctx: &TaskContext,
    cluster: &Cluster,
    req: &ClusterRequest,
    gateways_def: &SizingRequirements,
) -> Result<NetworkingOutcome> {
    ctx.check_aborted()?;
    let services = cluster.services();

    let capabilities = services.provider.capabilities();
    let gw_failover_disabled = req.complexity == ClusterComplexity::Small
        || !capabilities.private_virtual_ip
        || req
            .disabled_default_features
            .contains(GATEWAY_FAILOVER_FEATURE);

    // Network: reuse the one named in the request, or create one that will
    // live and die with the cluster.
    let (network_id, created_network) = match req.network_id.as_deref() {
        Some(id) if !id.is_empty() => {
            let network = Network::load(ctx, services.provider.clone(), id)
                .await
                .map_err(|e| {
                    Error::invalid_request(format!(
                        "failed to use network '{}' to contain the cluster subnet",
                        id
                    ))
                    .with_consequence(e)
                })?;
            (network.id().to_string(), None)
        }
        _ => {
            debug!(cluster = %req.name, "creating network");
            let network = Network::create(
                ctx,
                services.provider.clone(),
                NetworkRequest {
                    name: req.name.clone(),
                    cidr: req.cidr.clone(),
                },
            )
            .await?;
            (network.id().to_string(), Some(network))
        }
    };

    debug!(cluster = %req.name, ha = !gw_failover_disabled, "creating subnet");
    let spec = SubnetSpec {
        name: req.name.clone(),
        network_id,
        cidr: req.cidr.clone(),
        ha: !gw_failover_disabled,
        image: gateways_def.image.clone(),
        key_pair_name: ClusterIdentity::keypair_name(&req.name),
        dns_servers: services.provider.configuration_options().dns_servers,
    };
    let subnet = match Subnet::create(
        ctx,
        services.provider.clone(),
        services.agent.clone(),
        services.subnets.clone(),
        spec,
        gateways_def,
    )
    .await
    {
        Ok(subnet) => subnet,
        Err(mut e) => {
            if let (Some(network), false) = (&created_network, req.keep_on_failure) {
                if let Err(derr) = network.delete(ctx).await {
                    if !derr.is_not_found() {
                        e.add_consequence(derr);
                    }
                }
            }
            return Err(e);
        }
    };

    // Record the networking layout in the aggregate. From here on the
    // pipeline reads gateways and routes from metadata only.
    let persisted = persist_network_property(ctx, cluster, req, &subnet, gw_failover_disabled).await;
    if let Err(mut e) = persisted {
        if !req.keep_on_failure {
            if let Err(derr) = subnet.delete(ctx).await {
                e.add_consequence(derr);
            }
            if let Some(network) = &created_network {
                if let Err(derr) = network.delete(ctx).await {
                    if !derr.is_not_found() {
                        e.add_consequence(derr);
                    }
                }
            }
        }
        return Err(e);
    }

    info!(cluster = %req.name, subnet = %subnet.name(), "networking resources created");
    Ok(NetworkingOutcome {
        subnet,
        created_network,
    })
}

async fn persist_network_property(
    ctx: &TaskContext,
    cluster: &Cluster,
    req: &ClusterRequest,
    subnet: &Subnet,
    gw_failover_disabled: bool,
) -> Result<()> {
    let primary = subnet.gateway(ctx, true).await?;
    let secondary = if gw_failover_disabled {
        None
    } else {
        Some(subnet.gateway(ctx, false).await?)
    };

    let subnet_id = subnet.id().to_string();
    let existing_network_id = req.network_id.clone().unwrap_or_default();
    let cidr = req.cidr.clone();
    let default_route_ip = subnet.default_route_ip().to_string();
    let endpoint_ip = subnet.endpoint_ip().to_string();
    let primary_id = primary.id().to_string();
    let primary_ip = primary.private_ip().to_string();
    let primary_public_ip = primary.public_ip().unwrap_or_default().to_string();
    let secondary_id = secondary.as_ref().map(|g| g.id().to_string());
    let secondary_ip = secondary.as_ref().map(|g| g.private_ip().to_string());
    let secondary_public_ip = secondary
        .as_ref()
        .map(|g| g.public_ip().unwrap_or_default().to_string());

    cluster
        .alter(move |aggregate| {
            let network = aggregate.properties.network_mut()?;
            network.subnet_id = subnet_id;
            // An empty network_id marks the network as cluster-owned.
            network.network_id = existing_network_id;
            network.cidr = cidr;
            network.gateway_id = primary_id;
            network.gateway_ip = primary_ip;
            network.primary_public_ip = primary_public_ip;
            network.default_route_ip = default_route_ip;
            network.endpoint_ip = endpoint_ip;
            if let (Some(id), Some(ip)) = (secondary_id, secondary_ip) {
                network.secondary_gateway_id = id;
                network.secondary_gateway_ip = ip;
                network.secondary_public_ip = secondary_public_ip.unwrap_or_default();
            }
            Ok(())
        })
        .await
}
