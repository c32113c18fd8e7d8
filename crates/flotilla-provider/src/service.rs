//! The IaaS provider surface the orchestrator drives.

use std::time::Duration;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use flotilla_common::model::{KeyPair, SizingRequirements};
use flotilla_common::Result;

use crate::types::{
    Capabilities, ConfigurationOptions, HostInfo, HostRequest, HostState, NetworkInfo,
    NetworkRequest, SubnetInfo, SubnetRequest,
};

/// Opaque IaaS driver.
///
/// Implementations talk to a real cloud; tests substitute mocks or the
/// in-memory fake. Every method may block on network I/O and must be safe to
/// call from subtasks. The driver is assumed thread-safe; the orchestrator
/// never issues overlapping mutations to the same resource.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProviderService: Send + Sync {
    /// Create a host matching `req` and `sizing`
    async fn create_host(&self, req: &HostRequest, sizing: &SizingRequirements)
        -> Result<HostInfo>;

    /// Delete a host; not-found is an error the caller decides how to treat
    async fn delete_host(&self, id: &str) -> Result<()>;

    /// Fetch the current description of a host
    async fn inspect_host(&self, id: &str) -> Result<HostInfo>;

    /// Power a host on
    async fn start_host(&self, id: &str) -> Result<()>;

    /// Power a host off
    async fn stop_host(&self, id: &str) -> Result<()>;

    /// Block until the host reaches `state` or `timeout` elapses
    async fn wait_host_state(&self, id: &str, state: HostState, timeout: Duration) -> Result<()>;

    /// Current power state of a host
    async fn host_state(&self, id: &str) -> Result<HostState>;

    /// Create a named SSH key pair
    async fn create_key_pair(&self, name: &str) -> Result<KeyPair>;

    /// Create a network
    async fn create_network(&self, req: &NetworkRequest) -> Result<NetworkInfo>;

    /// Delete a network
    async fn delete_network(&self, id: &str) -> Result<()>;

    /// Fetch the current description of a network
    async fn inspect_network(&self, id: &str) -> Result<NetworkInfo>;

    /// Create a subnet (and its security group) inside a network
    async fn create_subnet(&self, req: &SubnetRequest) -> Result<SubnetInfo>;

    /// Delete a subnet
    async fn delete_subnet(&self, id: &str) -> Result<()>;

    /// Attach a security group to a host
    async fn bind_security_group(&self, host_id: &str, group_id: &str) -> Result<()>;

    /// Detach a security group from a host
    async fn unbind_security_group(&self, host_id: &str, group_id: &str) -> Result<()>;

    /// Re-enable a disabled security group; only valid when
    /// [`Capabilities::can_disable_security_group`] is set
    async fn enable_security_group(&self, group_id: &str) -> Result<()>;

    /// Disable a security group without unbinding it; capability-gated
    async fn disable_security_group(&self, group_id: &str) -> Result<()>;

    /// Driver configuration the orchestrator reads
    fn configuration_options(&self) -> ConfigurationOptions;

    /// Feature switches of this driver
    fn capabilities(&self) -> Capabilities;
}
