//! The control plane a stage hands to its generator.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use sluice_core::config::EngineConfig;
use sluice_core::diagnostic::{Diagnostic, DiagnosticSink, Severity};
use sluice_core::id::{PipelineRunId, StageId};
use sluice_io::FsHandle;
use sluice_operators::ControlPlane;

/// Shared, per-run resources every stage sees.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: PipelineRunId,
    pub config: Arc<EngineConfig>,
    pub diagnostics: Arc<dyn DiagnosticSink>,
    pub cancel: CancellationToken,
    pub fs: Option<FsHandle>,
}

pub struct StageControlPlane {
    stage: StageId,
    operator: &'static str,
    run: RunContext,
    notify: Arc<Notify>,
    /// Outstanding external requests. Dropping the set aborts them.
    tasks: JoinSet<()>,
    waiting: bool,
}

impl StageControlPlane {
    pub fn new(stage: StageId, operator: &'static str, run: RunContext) -> Self {
        Self {
            stage,
            operator,
            run,
            notify: Arc::new(Notify::new()),
            tasks: JoinSet::new(),
            waiting: false,
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.run.cancel
    }

    pub fn operator(&self) -> &'static str {
        self.operator
    }
}

impl ControlPlane for StageControlPlane {
    fn emit(&mut self, diagnostic: Diagnostic) {
        let stage = self.stage.get();
        match diagnostic.severity {
            Severity::Error => error!(stage, operator = self.operator, "{}", diagnostic.message),
            Severity::Warning => warn!(stage, operator = self.operator, "{}", diagnostic.message),
            Severity::Note => info!(stage, operator = self.operator, "{}", diagnostic.message),
        }
        self.run.diagnostics.emit(diagnostic);
    }

    fn set_waiting(&mut self, waiting: bool) {
        self.waiting = waiting;
    }

    fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    fn is_cancelled(&self) -> bool {
        self.run.cancel.is_cancelled()
    }

    fn spawn(&mut self, fut: BoxFuture<'static, ()>) {
        while self.tasks.try_join_next().is_some() {}
        self.tasks.spawn(fut);
    }

    fn fs(&self) -> Option<FsHandle> {
        self.run.fs.clone()
    }

    fn stage(&self) -> StageId {
        self.stage
    }

    fn run_id(&self) -> PipelineRunId {
        self.run.run_id
    }

    fn config(&self) -> &EngineConfig {
        &self.run.config
    }
}
