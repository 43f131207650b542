#![forbid(unsafe_code)]
//! sluice-planner: from pipeline text, spec lists, or YAML documents to a
//! type-checked, optimized operator chain.
//!
//! Design:
//! - A [`Pipeline`] owns its operators and knows whether it is closed (starts
//!   at a source) or an open fragment.
//! - The optimizer runs a back-to-front pushdown pass followed by local
//!   fusion rules, repeated until the spec list stops changing.
//! - Nothing here runs operators; `sluice-exec` takes the optimized pipeline.

pub mod dsl;
pub mod error;
pub mod optimizer;
pub mod pipeline;
pub mod rules;

pub use dsl::yaml::{parse_yaml_pipeline, to_yaml, ParsedPipeline};
pub use error::{PlanError, Result};
pub use optimizer::{optimize, OptimizedPipeline};
pub use pipeline::{Pipeline, PipelineState};
