//! Cluster-side facades over provider resources.
//!
//! Facades are thin: they hold the provider/agent handles plus the cached
//! description of one resource, and implement the retry discipline the
//! controller relies on (5-second SSH polling, transfer retries, not-found
//! tolerance on delete paths). Every operation takes the calling task's
//! [`flotilla_task::TaskContext`] and observes cancellation before I/O.

pub mod host;
pub mod network;
pub mod subnet;

pub use host::Host;
pub use network::Network;
pub use subnet::{Subnet, SubnetRecord, SubnetSpec};
