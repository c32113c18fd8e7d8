//! Stage 1: resolve the sizing of gateways, masters and workers.

use tracing::debug;

use flotilla_common::model::{complement_sizing, ClusterRequest, SizingRequirements};
use flotilla_common::Result;

use crate::controller::Cluster;

const FALLBACK_IMAGE: &str = "Ubuntu 18.04";

fn fallback_gateway_sizing() -> SizingRequirements {
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

fn fallback_member_sizing() -> SizingRequirements {
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

/// Merge request, flavor defaults and hard fallbacks into the effective
/// sizings, resolve the boot image (request, then flavor, then provider, then
/// the stock default), and persist the result as the cluster defaults.
pub(crate) async fn determine_sizing_requirements(
    cluster: &Cluster,
    req: &ClusterRequest,
) -> Result<(SizingRequirements, SizingRequirements, SizingRequirements)> {
    let makers = cluster.makers();

    let mut image = req.nodes_def.image.clone();
    if image.is_empty() {
        if let Some(hook) = makers.default_image {
            image = hook().to_string();
        }
    }
    if image.is_empty() {
        image = cluster
            .services()
            .provider
            .configuration_options()
            .default_image;
    }
    if image.is_empty() {
        image = FALLBACK_IMAGE.to_string();
    }

    let gateways_default = makers
        .default_gateway_sizing
        .map(|hook| hook())
        .unwrap_or_else(fallback_gateway_sizing);
    let mut gateways_def = complement_sizing(Some(&req.gateways_def), &gateways_default);
    gateways_def.image = image.clone();

    let masters_default = makers
        .default_master_sizing
        .map(|hook| hook())
        .unwrap_or_else(fallback_member_sizing);
    let mut masters_def = complement_sizing(Some(&req.masters_def), &masters_default);
    masters_def.image = image.clone();

    let nodes_default = makers
        .default_node_sizing
        .map(|hook| hook())
        .unwrap_or_else(fallback_member_sizing);
    let mut nodes_def = complement_sizing(Some(&req.nodes_def), &nodes_default);
    nodes_def.image = image.clone();

    debug!(cluster = %cluster.name(), image = %image, "sizing requirements resolved");

    let (g, m, n) = (
        gateways_def.clone(),
        masters_def.clone(),
        nodes_def.clone(),
    );
    cluster
        .alter(move |aggregate| {
            let defaults = aggregate.properties.defaults_mut()?;
            defaults.gateway_sizing = g;
            defaults.master_sizing = m;
            defaults.node_sizing = n;
            defaults.image = image;
            Ok(())
        })
        .await?;

    Ok((gateways_def, masters_def, nodes_def))
}
