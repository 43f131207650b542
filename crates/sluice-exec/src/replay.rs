//! Resume decisions.
//!
//! A run id with a committed checkpoint resumes from it, but only when the
//! checkpoint was taken by the same optimized pipeline. Anything else starts
//! from scratch.

use tracing::{debug, info};

use sluice_core::hash::Hash256;
use sluice_core::id::{CheckpointSeq, PipelineRunId};
use sluice_io::{Checkpoint, CheckpointStore};

use crate::error::Result;

#[derive(Debug)]
pub enum ResumePoint {
    Fresh,
    Resume(Checkpoint),
    /// A checkpoint exists but belongs to a different pipeline.
    Mismatch { seq: CheckpointSeq },
}

pub async fn resume_point(
    store: &CheckpointStore,
    run_id: PipelineRunId,
    fingerprint: Hash256,
    stages: usize,
) -> Result<ResumePoint> {
    let Some(checkpoint) = store.latest(run_id).await? else {
        debug!(%run_id, "no committed checkpoint");
        return Ok(ResumePoint::Fresh);
    };
    if checkpoint.pipeline_hash != fingerprint || checkpoint.blobs.len() != stages {
        return Ok(ResumePoint::Mismatch {
            seq: checkpoint.seq,
        });
    }
    info!(%run_id, seq = checkpoint.seq.get(), "resuming from checkpoint");
    Ok(ResumePoint::Resume(checkpoint))
}
