//! Error types for the Flotilla orchestrator
//!
//! Errors are structured with fields to aid debugging in production, and every
//! error can carry *consequences*: secondary errors produced while handling the
//! primary one (typically by compensating actions on failure paths). The
//! consequence list is appended to, never replaces, the primary error.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Classification of a Flotilla error.
///
/// Implements the exit taxonomy surfaced to callers; the [`Error`] wrapper adds
/// the consequence list on top.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// The request itself is malformed or violates a precondition
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Description of what's invalid
        message: String,
    },

    /// A caller-supplied parameter is unusable
    #[error("invalid parameter '{parameter}': {message}")]
    InvalidParameter {
        /// Name of the offending parameter
        parameter: String,
        /// Description of what's wrong with it
        message: String,
    },

    /// A referenced resource does not exist
    #[error("failed to find {resource} '{name}'")]
    NotFound {
        /// Kind of resource (cluster, host, subnet, ...)
        resource: String,
        /// Name or ID of the missing resource
        name: String,
    },

    /// A resource with the same name already exists
    #[error("{resource} '{name}' already exists")]
    Duplicate {
        /// Kind of resource
        resource: String,
        /// Conflicting name
        name: String,
    },

    /// The operation cannot run in the current state
    #[error("not available: {message}")]
    NotAvailable {
        /// Why the operation is refused
        message: String,
    },

    /// The requested behavior is not implemented
    #[error("not implemented: {feature}")]
    NotImplemented {
        /// Missing capability
        feature: String,
    },

    /// A retry ceiling was hit
    #[error("operation '{operation}' timed out after {}s", duration.as_secs())]
    Timeout {
        /// Name of the operation that timed out
        operation: String,
        /// The ceiling that was exhausted
        duration: Duration,
    },

    /// Cooperative cancellation was observed
    #[error("operation aborted")]
    Aborted,

    /// A host was created but its bring-up failed
    #[error("provisioning of host '{host}' failed: {message}")]
    Provisioning {
        /// Host that failed to come up
        host: String,
        /// Description of the failure
        message: String,
    },

    /// A metadata payload does not have the expected shape or version
    #[error("inconsistent metadata: {message}")]
    Inconsistent {
        /// Description of the mismatch
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Context where the error occurred (e.g., "task", "store")
        context: String,
        /// Description of what failed
        message: String,
    },

    /// Aggregate of sibling failures from a fan-out
    #[error("{}", format_list(errors))]
    List {
        /// The collected failures
        errors: Vec<Error>,
    },
}

fn format_list(errors: &[Error]) -> String {
    let rendered: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    format!(
        "{} error{} occurred:\n{}",
        errors.len(),
        if errors.len() == 1 { "" } else { "s" },
        rendered.join("\n")
    )
}

/// Main error type for Flotilla operations.
///
/// Wraps an [`ErrorKind`] and the list of consequences accumulated while the
/// primary error was being handled.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    consequences: Vec<Error>,
}

impl Error {
    /// Create an error from a kind, with no consequences
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            consequences: Vec::new(),
        }
    }

    /// Create an invalid-request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest {
            message: msg.into(),
        })
    }

    /// Create an invalid-parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParameter {
            parameter: parameter.into(),
            message: msg.into(),
        })
    }

    /// Create a not-found error
    pub fn not_found(resource: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound {
            resource: resource.into(),
            name: name.into(),
        })
    }

    /// Create a duplicate error
    pub fn duplicate(resource: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ErrorKind::Duplicate {
            resource: resource.into(),
            name: name.into(),
        })
    }

    /// Create a not-available error (wrong state for the operation)
    pub fn not_available(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotAvailable {
            message: msg.into(),
        })
    }

    /// Create a not-implemented error
    pub fn not_implemented(feature: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotImplemented {
            feature: feature.into(),
        })
    }

    /// Create a timeout error carrying the operation name
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::new(ErrorKind::Timeout {
            operation: operation.into(),
            duration,
        })
    }

    /// Create an aborted error
    pub fn aborted() -> Self {
        Self::new(ErrorKind::Aborted)
    }

    /// Create a provisioning error for a host
    pub fn provisioning(host: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Provisioning {
            host: host.into(),
            message: msg.into(),
        })
    }

    /// Create an inconsistent-metadata error
    pub fn inconsistent(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Inconsistent {
            message: msg.into(),
        })
    }

    /// Create an internal error with context
    pub fn internal(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal {
            context: context.into(),
            message: msg.into(),
        })
    }

    /// Build an aggregate error from sibling failures.
    ///
    /// A single entry is unwrapped rather than wrapped in a one-element list.
    /// Panics in debug builds if `errors` is empty; callers must only build a
    /// list when at least one failure occurred.
    pub fn list(mut errors: Vec<Error>) -> Self {
        debug_assert!(!errors.is_empty(), "error list cannot be empty");
        if errors.len() == 1 {
            errors.remove(0)
        } else {
            Self::new(ErrorKind::List { errors })
        }
    }

    /// The kind of this error
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Consequences accumulated while handling this error
    pub fn consequences(&self) -> &[Error] {
        &self.consequences
    }

    /// Attach a consequence produced while handling this error
    pub fn add_consequence(&mut self, consequence: Error) {
        self.consequences.push(consequence);
    }

    /// Builder-style variant of [`Error::add_consequence`]
    pub fn with_consequence(mut self, consequence: Error) -> Self {
        self.consequences.push(consequence);
        self
    }

    /// True if the error is a not-found condition.
    ///
    /// Delete paths treat not-found as success.
    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, ErrorKind::NotFound { .. })
    }

    /// True if the error reports observed cancellation
    pub fn is_aborted(&self) -> bool {
        matches!(self.kind, ErrorKind::Aborted)
    }

    /// True if the error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout { .. })
    }

    /// True if retrying the operation may succeed.
    ///
    /// Caller-side violations, duplicates, provisioning failures and metadata
    /// inconsistencies require intervention and must not be retried.
    pub fn is_transient(&self) -> bool {
        match &self.kind {
            ErrorKind::Timeout { .. } | ErrorKind::Internal { .. } => true,
            ErrorKind::NotAvailable { .. } => true,
            ErrorKind::List { errors } => errors.iter().all(Error::is_transient),
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        for consequence in &self.consequences {
            write!(f, "\nwith consequence: {}", consequence)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: delete paths tolerate missing resources
    ///
    /// When a compensating action deletes a host that is already gone, the
    /// not-found condition is detected and treated as a success.
    #[test]
    fn story_not_found_is_detectable_on_delete_paths() {
        let err = Error::not_found("host", "c1-node-2");
        assert!(err.is_not_found());
        assert!(err.to_string().contains("c1-node-2"));

        let err = Error::provisioning("c1-node-2", "cloud-init failed");
        assert!(!err.is_not_found());
    }

    /// Story: compensation failures become consequences, never mask the primary
    ///
    /// A failed master creation triggers cleanup; if cleanup itself fails, the
    /// caller still sees the creation failure first, with the cleanup failure
    /// attached.
    #[test]
    fn story_consequences_are_appended_not_substituted() {
        let mut primary = Error::provisioning("k1-master-2", "ssh never came up");
        primary.add_consequence(Error::timeout("delete host", Duration::from_secs(120)));
        primary.add_consequence(Error::not_found("subnet", "k1"));

        assert_eq!(primary.consequences().len(), 2);
        let rendered = primary.to_string();
        assert!(rendered.starts_with("provisioning of host 'k1-master-2'"));
        assert!(rendered.contains("with consequence: operation 'delete host' timed out"));
        assert!(rendered.contains("with consequence: failed to find subnet 'k1'"));
    }

    /// Story: fan-outs aggregate sibling failures into one error
    #[test]
    fn story_fan_out_failures_aggregate_into_list() {
        let err = Error::list(vec![
            Error::provisioning("c1-node-1", "disk quota exceeded"),
            Error::timeout("create host", Duration::from_secs(600)),
        ]);
        assert!(matches!(err.kind(), ErrorKind::List { errors } if errors.len() == 2));
        assert!(err.to_string().contains("2 errors occurred"));
    }

    /// Story: a single-entry list collapses to the entry itself
    #[test]
    fn story_single_entry_list_unwraps() {
        let err = Error::list(vec![Error::duplicate("cluster", "c1")]);
        assert!(matches!(err.kind(), ErrorKind::Duplicate { .. }));
    }

    /// Story: transient classification drives facade retries
    #[test]
    fn story_transient_classification() {
        assert!(Error::timeout("ssh", Duration::from_secs(5)).is_transient());
        assert!(Error::internal("store", "connection reset").is_transient());
        assert!(!Error::invalid_request("bad cidr").is_transient());
        assert!(!Error::duplicate("cluster", "c1").is_transient());
        assert!(!Error::provisioning("h", "script exit 3").is_transient());
    }

    #[test]
    fn test_aborted_detection() {
        assert!(Error::aborted().is_aborted());
        assert!(!Error::aborted().is_transient());
    }

    #[test]
    fn test_invalid_parameter_message() {
        let err = Error::invalid_parameter("count", "must be greater than 0");
        assert!(err.to_string().contains("'count'"));
        assert!(err.to_string().contains("greater than 0"));
    }
}
