//! Shared fixtures for unit tests.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use sluice_core::config::EngineConfig;
use sluice_core::diagnostic::CollectingSink;
use sluice_core::id::{PipelineRunId, StageId};

use crate::control::{RunContext, StageControlPlane};

pub(crate) fn run_context() -> RunContext {
    RunContext {
        run_id: PipelineRunId::new(),
        config: Arc::new(EngineConfig::default()),
        diagnostics: Arc::new(CollectingSink::new()),
        cancel: CancellationToken::new(),
        fs: None,
    }
}

pub(crate) fn null_control() -> StageControlPlane {
    StageControlPlane::new(StageId::new(0), "test", run_context())
}
