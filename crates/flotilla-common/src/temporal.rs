//! Operation timeouts.
//!
//! Timeouts are per-operation, not per-cluster. Each can be overridden through
//! an environment variable carrying a number of seconds, so operators can adapt
//! the orchestrator to slow providers without a rebuild.

use std::time::Duration;

fn from_env_secs(var: &str, default: Duration) -> Duration {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

/// Timeout governing a single-host operation (create, delete, wait-SSH).
///
/// Override with `FLOTILLA_HOST_TIMEOUT` (seconds).
pub fn host_timeout() -> Duration {
    from_env_secs("FLOTILLA_HOST_TIMEOUT", Duration::from_secs(10 * 60))
}

/// Timeout governing task-group waits over many hosts (fan-out creation,
/// rollback deletion sweeps).
///
/// Override with `FLOTILLA_LONG_OPERATION_TIMEOUT` (seconds).
pub fn long_operation_timeout() -> Duration {
    from_env_secs(
        "FLOTILLA_LONG_OPERATION_TIMEOUT",
        Duration::from_secs(30 * 60),
    )
}

/// Timeout for remote command execution through the host agent.
///
/// Override with `FLOTILLA_EXECUTION_TIMEOUT` (seconds).
pub fn execution_timeout() -> Duration {
    from_env_secs("FLOTILLA_EXECUTION_TIMEOUT", Duration::from_secs(6 * 60))
}

/// Timeout for establishing an SSH session to a host.
///
/// Override with `FLOTILLA_CONNECT_SSH_TIMEOUT` (seconds).
pub fn connect_ssh_timeout() -> Duration {
    from_env_secs("FLOTILLA_CONNECT_SSH_TIMEOUT", Duration::from_secs(3 * 60))
}

/// Cap on waiting for an in-flight state transition (a `Start` issued while
/// the cluster is already `Starting` waits this long for it to settle).
pub fn transition_timeout() -> Duration {
    from_env_secs("FLOTILLA_TRANSITION_TIMEOUT", Duration::from_secs(5 * 60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_ordered() {
        // Single-host work must fit inside a group wait.
        assert!(host_timeout() < long_operation_timeout());
        assert!(connect_ssh_timeout() <= host_timeout());
    }
}
