//! Cluster metadata: the versioned property model and its transactional store.
//!
//! A cluster is persisted as one aggregate document (identity + property map)
//! in a per-tenant bucket. Properties are versioned per tag; loading upgrades
//! every property to its latest schema in place, exactly once.

pub mod aggregate;
pub mod properties;
pub mod store;

pub use aggregate::{ClusterAggregate, ClusterIdentity};
pub use store::{FolderStore, Record};

/// Store specialization holding cluster aggregates.
pub type ClusterStore = FolderStore<ClusterAggregate>;
