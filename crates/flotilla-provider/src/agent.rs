//! The SSH-based host agent surface.

use std::time::Duration;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use flotilla_common::Result;

use crate::types::{CommandOutput, OutputMode};

/// Remote execution and file transfer on a provisioned host.
///
/// The agent addresses hosts by provider ID; connection management, key
/// handling and tunneling through gateways are implementation concerns.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HostAgent: Send + Sync {
    /// Run a command on the host.
    ///
    /// A non-zero exit code is returned in the output, not as an error;
    /// callers classify it (a failed bring-up script is a provisioning
    /// failure, a failed probe is a retry).
    async fn run(
        &self,
        host_id: &str,
        cmd: &str,
        mode: OutputMode,
        connect_timeout: Duration,
        exec_timeout: Duration,
    ) -> Result<CommandOutput>;

    /// Copy a local file onto the host and set ownership and mode.
    ///
    /// Returns the transfer exit code; retry classification is the caller's
    /// job (see the host facade's push policy).
    async fn push(
        &self,
        host_id: &str,
        local: &str,
        remote: &str,
        owner: &str,
        mode: &str,
        timeout: Duration,
    ) -> Result<i32>;

    /// Block until the host reports the given provisioning phase complete
    /// (e.g. "ready"), or `timeout` elapses.
    async fn wait_server_ready(&self, host_id: &str, phase: &str, timeout: Duration) -> Result<()>;
}
