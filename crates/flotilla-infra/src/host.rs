//! Host facade: the cluster-side view of one provider host.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use flotilla_common::retry::retry_every_5s;
use flotilla_common::{temporal, Error, Result};
use flotilla_provider::{
    CommandOutput, HostAgent, HostInfo, HostRequest, OutputMode, ProviderService,
};
use flotilla_common::model::SizingRequirements;
use flotilla_task::TaskContext;

/// SSH/SCP transport exit codes that mean "the channel died", not "the
/// command failed". Retrying the same transfer on a dead channel is useless;
/// the surrounding operation decides whether to re-establish and start over.
const TRANSPORT_EXIT_CODES: [i32; 2] = [255, 127];

/// A provisioned host, addressed through the provider and the SSH agent.
///
/// The facade caches the immutable description returned at creation; power
/// state is never cached.
#[derive(Clone)]
pub struct Host {
    provider: Arc<dyn ProviderService>,
    agent: Arc<dyn HostAgent>,
    info: HostInfo,
}

impl Host {
    /// Create a host and bind it to `security_group` when one is given.
    ///
    /// The security group of a gateway-bearing subnet must not be bound to its
    /// own gateway; callers pass `None` in that case.
    pub async fn create(
        ctx: &TaskContext,
        provider: Arc<dyn ProviderService>,
        agent: Arc<dyn HostAgent>,
        req: HostRequest,
        sizing: &SizingRequirements,
        security_group: Option<&str>,
    ) -> Result<Host> {
        ctx.check_aborted()?;
        debug!(host = %req.resource_name, "creating host");
        let info = provider.create_host(&req, sizing).await?;

        if let Some(group_id) = security_group {
            if let Err(e) = provider.bind_security_group(&info.id, group_id).await {
                // The host exists but is not secured; undo and surface.
                let mut err = e;
                if let Err(derr) = provider.delete_host(&info.id).await {
                    if !derr.is_not_found() {
                        err.add_consequence(derr);
                    }
                }
                return Err(err);
            }
        }

        Ok(Host {
            provider,
            agent,
            info,
        })
    }

    /// Load an existing host by provider ID.
    pub async fn load(
        ctx: &TaskContext,
        provider: Arc<dyn ProviderService>,
        agent: Arc<dyn HostAgent>,
        id: &str,
    ) -> Result<Host> {
        ctx.check_aborted()?;
        let info = provider.inspect_host(id).await?;
        Ok(Host {
            provider,
            agent,
            info,
        })
    }

    /// Provider-side identifier
    pub fn id(&self) -> &str {
        &self.info.id
    }

    /// Hostname
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// IP on the cluster subnet
    pub fn private_ip(&self) -> &str {
        &self.info.private_ip
    }

    /// Public IP; not-found when none was allocated
    pub fn public_ip(&self) -> Result<&str> {
        self.info
            .public_ip
            .as_deref()
            .ok_or_else(|| Error::not_found("public IP of host", self.info.name.as_str()))
    }

    /// Delete the host from the provider.
    pub async fn delete(&self, ctx: &TaskContext) -> Result<()> {
        ctx.check_aborted()?;
        self.provider.delete_host(&self.info.id).await
    }

    /// Power the host on.
    pub async fn start(&self, ctx: &TaskContext) -> Result<()> {
        ctx.check_aborted()?;
        self.provider.start_host(&self.info.id).await
    }

    /// Power the host off.
    pub async fn stop(&self, ctx: &TaskContext) -> Result<()> {
        ctx.check_aborted()?;
        self.provider.stop_host(&self.info.id).await
    }

    /// Wait until the host agent reports the host ready over SSH, probing
    /// every 5 seconds up to `timeout`.
    pub async fn wait_ssh_ready(&self, ctx: &TaskContext, timeout: Duration) -> Result<()> {
        ctx.check_aborted()?;
        let host_id = self.info.id.clone();
        let agent = self.agent.clone();
        retry_every_5s(
            &format!("wait for ssh on '{}'", self.info.name),
            timeout,
            move || {
                let agent = agent.clone();
                let host_id = host_id.clone();
                let ctx = ctx.clone();
                async move {
                    ctx.check_aborted()?;
                    agent
                        .wait_server_ready(&host_id, "ready", temporal::connect_ssh_timeout())
                        .await
                }
            },
        )
        .await
    }

    /// Run a command on the host, collecting its output.
    pub async fn run(
        &self,
        ctx: &TaskContext,
        cmd: &str,
        exec_timeout: Duration,
    ) -> Result<CommandOutput> {
        ctx.check_aborted()?;
        self.agent
            .run(
                &self.info.id,
                cmd,
                OutputMode::Collect,
                temporal::connect_ssh_timeout(),
                exec_timeout,
            )
            .await
    }

    /// Run a command and require a zero exit code; anything else is a
    /// provisioning failure of this host.
    pub async fn run_checked(
        &self,
        ctx: &TaskContext,
        cmd: &str,
        exec_timeout: Duration,
    ) -> Result<CommandOutput> {
        let output = self.run(ctx, cmd, exec_timeout).await?;
        if output.exit_code != 0 {
            return Err(Error::provisioning(
                &self.info.name,
                format!(
                    "command exited with {}: {}",
                    output.exit_code,
                    output.stderr.trim()
                ),
            ));
        }
        Ok(output)
    }

    /// Copy a local file onto the host.
    ///
    /// Transfer policy: exit 0 succeeds; exit 1 deletes the half-written
    /// remote target and retries; a dead transport terminates the attempts and
    /// surfaces a transient failure; any other exit code fails immediately as
    /// a provisioning error.
    pub async fn push(
        &self,
        ctx: &TaskContext,
        local: &str,
        remote: &str,
        owner: &str,
        mode: &str,
        timeout: Duration,
    ) -> Result<()> {
        const MAX_ATTEMPTS: u32 = 3;

        for attempt in 1..=MAX_ATTEMPTS {
            ctx.check_aborted()?;
            let code = self
                .agent
                .push(&self.info.id, local, remote, owner, mode, timeout)
                .await?;

            match code {
                0 => return Ok(()),
                1 => {
                    warn!(
                        host = %self.info.name,
                        remote = remote,
                        attempt = attempt,
                        "transfer left a partial file, deleting and retrying"
                    );
                    let _ = self
                        .agent
                        .run(
                            &self.info.id,
                            &format!("sudo rm -f {}", remote),
                            OutputMode::Discard,
                            temporal::connect_ssh_timeout(),
                            Duration::from_secs(30),
                        )
                        .await;
                }
                code if TRANSPORT_EXIT_CODES.contains(&code) => {
                    return Err(Error::internal(
                        "scp",
                        format!(
                            "transport to '{}' failed with exit {}",
                            self.info.name, code
                        ),
                    ));
                }
                code => {
                    return Err(Error::provisioning(
                        &self.info.name,
                        format!("failed to push '{}': exit {}", remote, code),
                    ));
                }
            }
        }

        Err(Error::provisioning(
            &self.info.name,
            format!("failed to push '{}' after {} attempts", remote, MAX_ATTEMPTS),
        ))
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("id", &self.info.id)
            .field("name", &self.info.name)
            .finish()
    }
}
