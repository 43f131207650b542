use thiserror::Error;

use sluice_operators::OpError;
use sluice_planner::PlanError;

pub type Result<T> = std::result::Result<T, ExecError>;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("stage {stage} ('{operator}') failed: {source}")]
    Stage {
        stage: usize,
        operator: String,
        #[source]
        source: OpError,
    },

    #[error("pipeline does not start with a source (input is {0})")]
    NotClosed(String),

    #[error("io error: {0}")]
    Io(#[from] sluice_io::Error),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("stage task failed: {0}")]
    Join(String),

    #[error("failpoint triggered: {0}")]
    Failpoint(String),

    #[error("run cancelled")]
    Cancelled,

    #[error(transparent)]
    Core(#[from] sluice_core::Error),
}

impl ExecError {
    /// Fallout of another failure, not a cause of its own.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            ExecError::Cancelled
                | ExecError::Stage {
                    source: OpError::Cancelled,
                    ..
                }
        )
    }
}
