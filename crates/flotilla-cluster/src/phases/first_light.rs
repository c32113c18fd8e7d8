//! Stage 0: the first metadata write of a new cluster.

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::debug;

use flotilla_common::model::{ClusterRequest, ClusterState};
use flotilla_common::{Result, PROXYCACHE_FEATURE};
use flotilla_metadata::{ClusterAggregate, ClusterIdentity};

use crate::controller::Context;

const ADMIN_PASSWORD_LENGTH: usize = 24;

/// Create the cluster identity and its initial properties in one write:
/// proxycache disabled, state creating, requested sizings persisted, tenant
/// recorded, key pair and admin password generated.
///
/// A name collision surfaces as a duplicate error on the metadata write. The
/// key pair is created just before it and is then the only provider resource
/// left behind.
pub(crate) async fn first_light(
    services: &Context,
    req: &ClusterRequest,
) -> Result<ClusterIdentity> {
    debug!(cluster = %req.name, "writing first metadata");

    let keypair = services
        .provider
        .create_key_pair(&ClusterIdentity::keypair_name(&req.name))
        .await?;

    let identity = ClusterIdentity {
        name: req.name.clone(),
        flavor: req.flavor,
        complexity: req.complexity,
        admin_password: generate_password(ADMIN_PASSWORD_LENGTH),
        keypair,
    };

    let mut aggregate = ClusterAggregate::new(identity.clone());
    let properties = &mut aggregate.properties;

    let features = properties.features_mut();
    features.disabled.insert(PROXYCACHE_FEATURE.to_string());
    for feature in &req.disabled_default_features {
        features.disabled.insert(feature.clone());
    }

    properties.state_mut().state = ClusterState::Creating;

    let defaults = properties.defaults_mut()?;
    defaults.gateway_sizing = req.gateways_def.clone();
    defaults.master_sizing = req.masters_def.clone();
    defaults.node_sizing = req.nodes_def.clone();
    defaults.image = req.nodes_def.image.clone();

    properties.composite_mut().tenants = vec![req.tenant.clone()];

    services.clusters.create(&aggregate).await?;
    Ok(identity)
}

fn generate_password(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_passwords_are_long_and_distinct() {
        let a = generate_password(ADMIN_PASSWORD_LENGTH);
        let b = generate_password(ADMIN_PASSWORD_LENGTH);
        assert!(a.len() >= 16);
        assert_ne!(a, b);
    }
}
