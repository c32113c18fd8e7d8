//! Network facade.

use std::sync::Arc;

use tracing::debug;

use flotilla_common::Result;
use flotilla_provider::{NetworkInfo, NetworkRequest, ProviderService};
use flotilla_task::TaskContext;

/// The cluster-side view of a provider network.
#[derive(Clone)]
pub struct Network {
    provider: Arc<dyn ProviderService>,
    info: NetworkInfo,
}

impl Network {
    /// Create a network.
    pub async fn create(
        ctx: &TaskContext,
        provider: Arc<dyn ProviderService>,
        req: NetworkRequest,
    ) -> Result<Network> {
        ctx.check_aborted()?;
        debug!(network = %req.name, cidr = %req.cidr, "creating network");
        let info = provider.create_network(&req).await?;
        Ok(Network { provider, info })
    }

    /// Load an existing network by provider ID.
    pub async fn load(
        ctx: &TaskContext,
        provider: Arc<dyn ProviderService>,
        id: &str,
    ) -> Result<Network> {
        ctx.check_aborted()?;
        let info = provider.inspect_network(id).await?;
        Ok(Network { provider, info })
    }

    /// Provider-side identifier
    pub fn id(&self) -> &str {
        &self.info.id
    }

    /// Network name
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Delete the network from the provider.
    pub async fn delete(&self, ctx: &TaskContext) -> Result<()> {
        ctx.check_aborted()?;
        self.provider.delete_network(&self.info.id).await
    }
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("id", &self.info.id)
            .field("name", &self.info.name)
            .finish()
    }
}
