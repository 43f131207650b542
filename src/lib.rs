//! sluice: typed, checkpointed dataflow pipelines.
//!
//! Umbrella crate over the workspace members. Most users want
//! [`Pipeline::parse`] and [`Engine::run`].

pub use sluice_core as core;
pub use sluice_exec as exec;
pub use sluice_io as io;
pub use sluice_operators as operators;
pub use sluice_planner as planner;

pub use sluice_core::config::EngineConfig;
pub use sluice_exec::{Engine, RunFailure, RunOutcome};
pub use sluice_operators::Registry;
pub use sluice_planner::{optimize, parse_yaml_pipeline, Pipeline};
