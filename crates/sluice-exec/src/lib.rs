#![forbid(unsafe_code)]
//! sluice-exec: stage scheduler, backpressured edges, checkpoint
//! coordination, and run manifests.
//!
//! Every operator of a closed pipeline runs as its own stage task. Adjacent
//! stages share one bounded channel; checkpoint barriers travel in-band
//! through the same channels and are committed once the last stage has
//! snapshotted.

pub mod channel;
pub mod checkpoint;
pub mod collect;
pub mod control;
pub mod error;
pub mod failpoints;
pub mod metrics;
pub mod replay;
pub mod runtime;
pub mod scheduler;
pub mod stage;

#[cfg(test)]
mod testing;

pub use checkpoint::{CheckpointCoordinator, CheckpointSummary};
pub use error::{ExecError, Result};
pub use metrics::EdgeGauge;
pub use runtime::{Engine, RunFailure, RunOutcome};
pub use stage::StageStatus;
