//! Value types crossing the provider boundary.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Power state of a host as reported by the provider.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HostState {
    /// State could not be determined
    #[default]
    Unknown,
    /// Boot in progress
    Starting,
    /// Up and running
    Started,
    /// Shutdown in progress
    Stopping,
    /// Halted
    Stopped,
    /// Provider reports the host in error
    Error,
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HostState::Unknown => "unknown",
            HostState::Starting => "starting",
            HostState::Started => "started",
            HostState::Stopping => "stopping",
            HostState::Stopped => "stopped",
            HostState::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// What a provider knows about a host.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct HostInfo {
    /// Provider-side identifier
    pub id: String,
    /// Resource name (the hostname)
    pub name: String,
    /// IP on the cluster subnet
    pub private_ip: String,
    /// Public IP, when one was allocated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
    /// Last observed power state
    #[serde(default)]
    pub state: HostState,
}

/// Request to create a host.
#[derive(Clone, Debug, Default)]
pub struct HostRequest {
    /// Hostname; must be unique within the tenant
    pub resource_name: String,
    /// Subnet to attach the host to
    pub subnet_id: String,
    /// IP of the default route the host should use
    pub default_route_ip: String,
    /// Allocate a public IP
    pub public_ip: bool,
    /// Image to boot from
    pub image: String,
    /// Name of the key pair to install for the operator user
    pub key_pair_name: String,
}

/// What a provider knows about a network.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct NetworkInfo {
    /// Provider-side identifier
    pub id: String,
    /// Network name
    pub name: String,
    /// Address range
    pub cidr: String,
}

/// Request to create a network.
#[derive(Clone, Debug, Default)]
pub struct NetworkRequest {
    /// Network name
    pub name: String,
    /// Address range
    pub cidr: String,
}

/// What a provider knows about a subnet.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct SubnetInfo {
    /// Provider-side identifier
    pub id: String,
    /// Subnet name
    pub name: String,
    /// Owning network
    pub network_id: String,
    /// Address range
    pub cidr: String,
    /// Security group created alongside the subnet
    pub security_group_id: String,
}

/// Request to create a subnet.
#[derive(Clone, Debug, Default)]
pub struct SubnetRequest {
    /// Subnet name
    pub name: String,
    /// Network to carve the subnet from
    pub network_id: String,
    /// Address range
    pub cidr: String,
    /// DNS servers pushed to hosts on the subnet
    pub dns_servers: Vec<String>,
}

/// Provider feature switches the controller adapts to.
#[derive(Clone, Copy, Debug, Default)]
pub struct Capabilities {
    /// Provider supports private virtual IPs; gates gateway failover
    pub private_virtual_ip: bool,
    /// Provider supports disabling a security group without unbinding it
    pub can_disable_security_group: bool,
}

/// Read-only configuration exposed by the provider driver.
#[derive(Clone, Debug, Default)]
pub struct ConfigurationOptions {
    /// Image used when neither request nor flavor names one
    pub default_image: String,
    /// Login of the operator account created on hosts
    pub operator_username: String,
    /// Override of the computed metadata bucket name
    pub metadata_bucket_name: Option<String>,
    /// DNS servers pushed to created subnets
    pub dns_servers: Vec<String>,
    /// Route outbound traffic of gateway-less hosts through a NAT service
    pub use_nat_service: bool,
}

/// Output of a remote command run through the host agent.
#[derive(Clone, Debug, Default)]
pub struct CommandOutput {
    /// Process exit code
    pub exit_code: i32,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

/// How the agent handles the output of a remote command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputMode {
    /// Capture stdout/stderr and return them
    Collect,
    /// Discard output; only the exit code matters
    Discard,
}
