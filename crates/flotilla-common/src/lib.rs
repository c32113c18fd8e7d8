//! Common types for Flotilla: errors, retry, timeouts, and the domain model.

#![deny(missing_docs)]

pub mod error;
pub mod model;
pub mod retry;
pub mod telemetry;
pub mod temporal;

pub use error::{Error, ErrorKind};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Prefix of the per-tenant metadata bucket (`<prefix>-<tenant>`)
pub const METADATA_BUCKET_PREFIX: &str = "0.flotilla";

/// Feature disabled on every cluster until explicitly re-enabled
pub const PROXYCACHE_FEATURE: &str = "proxycache";

/// Request flag / feature name disabling the secondary gateway
pub const GATEWAY_FAILOVER_FEATURE: &str = "gateway-failover";
