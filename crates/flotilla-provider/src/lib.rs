//! External interfaces of the orchestrator.
//!
//! The cluster subsystem drives three opaque collaborators, each captured here
//! as a trait plus its value types:
//!
//! - [`ProviderService`]: the IaaS driver (hosts, networks, subnets, security
//!   groups, key pairs)
//! - [`HostAgent`]: SSH command execution and file transfer on hosts
//! - [`ObjectStorage`]: the metadata backend

pub mod agent;
pub mod service;
pub mod storage;
pub mod types;

pub use agent::HostAgent;
pub use service::ProviderService;
pub use storage::{MemoryStorage, ObjectStorage};
pub use types::{
    Capabilities, CommandOutput, ConfigurationOptions, HostInfo, HostRequest, HostState,
    NetworkInfo, NetworkRequest, OutputMode, SubnetInfo, SubnetRequest,
};
