//! Run manifest for audit and resume.
//!
//! The executor emits a manifest after every run, successful or not. It ties
//! the run id used for checkpoint correlation to the fingerprint of the
//! optimized pipeline that actually executed.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hash::Hash256;
use crate::id::{CheckpointSeq, PipelineRunId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestId(pub Uuid);

/// Buffering observed on the channel between two adjacent stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeStats {
    pub from: String,
    pub to: String,
    pub capacity: usize,
    /// Most elements ever buffered at once.
    pub high_water: usize,
    pub elements: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub id: ManifestId,

    pub run_id: PipelineRunId,

    /// Fingerprint of the optimized pipeline that ran.
    pub pipeline_hash: Hash256,

    /// Engine version string for provenance.
    pub engine_version: String,

    /// Checkpoint this run resumed from, if any.
    pub resumed_from: Option<CheckpointSeq>,

    pub checkpoints_committed: u64,

    pub succeeded: bool,

    pub edges: Vec<EdgeStats>,

    /// Milliseconds since Unix epoch (UTC).
    pub started_ms: u64,
    pub finished_ms: u64,
}

impl RunManifest {
    pub fn new(run_id: PipelineRunId, pipeline_hash: Hash256, started_ms: u64) -> Self {
        Self {
            id: ManifestId(Uuid::new_v4()),
            run_id,
            pipeline_hash,
            engine_version: crate::VERSION.to_string(),
            resumed_from: None,
            checkpoints_committed: 0,
            succeeded: false,
            edges: Vec::new(),
            started_ms,
            finished_ms: started_ms,
        }
    }

    pub fn finish(mut self, finished_ms: u64, succeeded: bool) -> Self {
        self.finished_ms = finished_ms;
        self.succeeded = succeeded;
        self
    }

    pub fn duration_ms(&self) -> u64 {
        self.finished_ms.saturating_sub(self.started_ms)
    }
}
