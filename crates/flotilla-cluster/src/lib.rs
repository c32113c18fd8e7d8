//! Cluster lifecycle orchestration.
//!
//! This crate drives heterogeneous collections of gateway, master and worker
//! hosts through a staged create/configure/expand/shrink/delete pipeline,
//! with partial-failure rollback, versioned metadata, and per-flavor
//! customization hooks.
//!
//! Entry point is [`Cluster`]: build a [`Context`] over your provider, agent
//! and metadata storage, then `Cluster::create` / `Cluster::load` and drive
//! the lifecycle from there.

pub mod controller;
pub mod flavor;
mod install;
mod phases;
pub mod rollback;
mod tasks;

pub use controller::{Cluster, Context, ContextBuilder};
pub use flavor::{bootstrap, Makers};
pub use rollback::RollbackStack;

pub use flotilla_common::{Error, ErrorKind, Result};
