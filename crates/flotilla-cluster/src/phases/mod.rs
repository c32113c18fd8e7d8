//! Stages of the cluster creation pipeline.
//!
//! Each stage is a dedicated module so the pipeline stays readable and each
//! stage testable: metadata first light, sizing resolution, networking, and
//! the concurrent host protocol.

mod first_light;
mod hosts;
mod networking;
mod sizing;

pub(crate) use first_light::first_light;
pub(crate) use hosts::create_host_resources;
pub(crate) use networking::{create_networking_resources, NetworkingOutcome};
pub(crate) use sizing::determine_sizing_requirements;
