//! Runtime: optimize a pipeline, run it as a chain of stages, and emit a
//! [`RunManifest`].
//!
//! - The optimized pipeline's fingerprint ties the run to its checkpoints.
//! - A run id with a matching committed checkpoint resumes from it.
//! - Pipelines that end in events or bytes get an implicit collector whose
//!   elements are returned in [`RunOutcome::output`].

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use sluice_core::config::EngineConfig;
use sluice_core::diagnostic::{CollectingSink, Diagnostic, DiagnosticSink};
use sluice_core::element::{Element, ElementType};
use sluice_core::id::PipelineRunId;
use sluice_core::manifest::RunManifest;
use sluice_io::{CheckpointStore, FilesystemActor, FsHandle, FsStorage};
use sluice_operators::InstantiateContext;
use sluice_planner::{optimize, Pipeline};

use crate::checkpoint::CheckpointCoordinator;
use crate::collect::{Collector, COLLECT};
use crate::control::RunContext;
use crate::error::ExecError;
use crate::replay::{resume_point, ResumePoint};
use crate::scheduler::{supervise, wire, StageSpec};
use crate::stage::StageStatus;

/// Result of a successful run.
#[derive(Debug)]
pub struct RunOutcome {
    pub manifest: RunManifest,
    /// Everything reported during the run, warnings and notes included.
    pub diagnostics: Vec<Diagnostic>,
    /// Elements that reached the end of a pipeline not ending in a sink.
    pub output: Vec<Element>,
    pub stage_statuses: Vec<(String, StageStatus)>,
}

/// A failed run: the first error, plus whatever was reported before it.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunFailure {
    #[source]
    pub error: ExecError,
    pub diagnostics: Vec<Diagnostic>,
    /// Present once execution started.
    pub manifest: Option<RunManifest>,
}

impl RunFailure {
    fn before_start(error: ExecError, mut diagnostics: Vec<Diagnostic>) -> Self {
        match &error {
            ExecError::Plan(e) => diagnostics.extend(e.diagnostics()),
            other => diagnostics.push(Diagnostic::error(other.to_string())),
        }
        Self {
            error,
            diagnostics,
            manifest: None,
        }
    }
}

/// Engine owns the configuration and the filesystem actor used by loaders,
/// savers and checkpoints.
pub struct Engine {
    config: EngineConfig,
    fs: Option<FsHandle>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config, fs: None }
    }

    /// Use an existing filesystem actor instead of starting a local one per run.
    pub fn with_fs(mut self, fs: FsHandle) -> Self {
        self.fs = Some(fs);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run under a fresh run id.
    pub async fn run(&self, pipeline: Pipeline) -> Result<RunOutcome, RunFailure> {
        self.execute(pipeline, PipelineRunId::new(), false).await
    }

    /// Run under `run_id`, resuming from its latest committed checkpoint if it
    /// was taken by the same optimized pipeline.
    pub async fn run_with_id(
        &self,
        pipeline: Pipeline,
        run_id: PipelineRunId,
    ) -> Result<RunOutcome, RunFailure> {
        self.execute(pipeline, run_id, true).await
    }

    async fn execute(
        &self,
        pipeline: Pipeline,
        run_id: PipelineRunId,
        resume: bool,
    ) -> Result<RunOutcome, RunFailure> {
        let span = info_span!("run", %run_id);
        self.execute_inner(pipeline, run_id, resume)
            .instrument(span)
            .await
    }

    async fn execute_inner(
        &self,
        pipeline: Pipeline,
        run_id: PipelineRunId,
        resume: bool,
    ) -> Result<RunOutcome, RunFailure> {
        let started_ms = now_millis();
        let sink = Arc::new(CollectingSink::new());

        if let Err(e) = self.config.validate() {
            return Err(RunFailure::before_start(e.into(), sink.take()));
        }

        let optimized = optimize(pipeline, &self.config)
            .map_err(|e| RunFailure::before_start(e.into(), sink.take()))?;
        debug!(
            iterations = optimized.iterations,
            pipeline = %optimized.pipeline,
            "optimized"
        );
        let pipeline = optimized.pipeline;
        if !pipeline.is_closed() {
            return Err(RunFailure::before_start(
                ExecError::NotClosed(pipeline.input_type().to_string()),
                sink.take(),
            ));
        }
        let fingerprint = pipeline
            .fingerprint()
            .map_err(|e| RunFailure::before_start(e.into(), sink.take()))?;

        let (fs, _actor) = match &self.fs {
            Some(fs) => (fs.clone(), None),
            None => {
                let (fs, join) = FilesystemActor::spawn(Box::new(FsStorage::new()));
                (fs, Some(join))
            }
        };
        let store = CheckpointStore::new(
            fs.clone(),
            self.config.checkpoint_dir.clone(),
            self.config.checkpoint_codec,
        );

        // Instantiate every operator, threading the element type through.
        let output_type = pipeline.output_type();
        let mut specs = Vec::with_capacity(pipeline.len() + 1);
        let mut input_type = ElementType::Void;
        for op in pipeline.operators() {
            let ctx = InstantiateContext {
                input_type,
                config: &self.config,
            };
            let stage_error = |source| {
                RunFailure::before_start(
                    ExecError::Stage {
                        stage: specs.len(),
                        operator: op.name().to_string(),
                        source,
                    },
                    sink.take(),
                )
            };
            let generator = op.instantiate(&ctx).map_err(stage_error)?;
            input_type = op.infer_type(input_type).map_err(stage_error)?;
            specs.push(StageSpec {
                operator: op.name(),
                generator,
            });
        }
        let collected = if output_type == ElementType::Void {
            None
        } else {
            let (collector, rx) = Collector::new();
            specs.push(StageSpec {
                operator: COLLECT,
                generator: Box::new(collector),
            });
            Some(rx)
        };
        let stage_count = specs.len();

        let mut manifest = RunManifest::new(run_id, fingerprint, started_ms);
        let resume_from = if resume {
            match resume_point(&store, run_id, fingerprint, stage_count).await {
                Ok(ResumePoint::Resume(cp)) => Some(cp),
                Ok(ResumePoint::Fresh) => None,
                Ok(ResumePoint::Mismatch { seq }) => {
                    warn!(seq = seq.get(), "checkpoint belongs to a different pipeline");
                    sink.emit(Diagnostic::warning(format!(
                        "checkpoint {} of run {run_id} was taken by a different pipeline; starting fresh",
                        seq.get()
                    )));
                    None
                }
                Err(e) => {
                    return Err(RunFailure {
                        error: e,
                        diagnostics: sink.take(),
                        manifest: Some(manifest.finish(now_millis(), false)),
                    })
                }
            }
        } else {
            None
        };

        let cancel = CancellationToken::new();
        let run = RunContext {
            run_id,
            config: Arc::new(self.config.clone()),
            diagnostics: sink.clone(),
            cancel: cancel.clone(),
            fs: Some(fs),
        };
        let checkpointing = self.config.checkpointing_enabled();
        let mut wiring = wire(
            specs,
            &run,
            checkpointing.then_some(self.config.checkpoints_in_flight),
        );

        if let Some(cp) = &resume_from {
            manifest.resumed_from = Some(cp.seq);
            for (stage, blob) in wiring.stages.iter_mut().zip(&cp.blobs) {
                if let Some(state) = blob {
                    if let Err(error) = stage.restore(state) {
                        return Err(RunFailure {
                            error,
                            diagnostics: sink.take(),
                            manifest: Some(manifest.finish(now_millis(), false)),
                        });
                    }
                }
            }
        }

        let coordinator = match (wiring.barrier_requests.take(), wiring.reports.take()) {
            (Some(requests), Some(reports)) => {
                let interval =
                    Duration::from_millis(self.config.checkpoint_interval_ms.unwrap_or(1000));
                let mut c = CheckpointCoordinator::new(
                    store.clone(),
                    run_id,
                    fingerprint,
                    stage_count,
                    interval,
                    self.config.checkpoints_in_flight,
                    requests,
                    sink.clone(),
                );
                if let Some(cp) = &resume_from {
                    c = c.starting_after(cp.seq);
                }
                Some(tokio::spawn(c.run(reports, cancel.clone())))
            }
            _ => None,
        };

        info!(stages = stage_count, resumed = resume_from.is_some(), "run started");
        let supervised = supervise(wiring.stages, cancel.clone()).await;
        // Every report sender is gone once the stages are, so this ends.
        let summary = match coordinator {
            Some(task) => task.await.unwrap_or_else(|e| {
                warn!(error = %e, "checkpoint coordinator failed");
                Default::default()
            }),
            None => Default::default(),
        };

        manifest.checkpoints_committed = summary.committed;
        manifest.edges = wiring.gauges.iter().map(|g| g.stats()).collect();

        let output = match collected {
            Some(mut rx) => {
                let mut out = Vec::new();
                while let Ok(element) = rx.try_recv() {
                    out.push(element);
                }
                out
            }
            None => Vec::new(),
        };

        if let Some(error) = supervised.error {
            let manifest = manifest.finish(now_millis(), false);
            info!(duration_ms = manifest.duration_ms(), error = %error, "run failed");
            return Err(RunFailure {
                error,
                diagnostics: sink.take(),
                manifest: Some(manifest),
            });
        }

        if summary.committed > 0 || resume_from.is_some() {
            if self.config.retain_checkpoints {
                debug!("retaining checkpoints");
            } else if let Err(e) = store.erase_run(run_id).await {
                warn!(error = %e, "could not erase checkpoints of a finished run");
            }
        }

        let manifest = manifest.finish(now_millis(), true);
        info!(
            duration_ms = manifest.duration_ms(),
            checkpoints = manifest.checkpoints_committed,
            "run finished"
        );
        Ok(RunOutcome {
            manifest,
            diagnostics: sink.take(),
            output,
            stage_statuses: supervised.statuses,
        })
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_io::MemoryStorage;
    use sluice_operators::registry::Registry;

    fn engine() -> Engine {
        let (fs, _join) = FilesystemActor::spawn(Box::new(MemoryStorage::new()));
        Engine::new(EngineConfig::default()).with_fs(fs)
    }

    fn parse(text: &str) -> Pipeline {
        Pipeline::parse(text, &Registry::builtin()).unwrap()
    }

    #[tokio::test]
    async fn collects_output_of_an_unsealed_pipeline() {
        let outcome = engine()
            .run(parse(r#"rows [{"a":1},{"a":2},{"a":3}] | where a > 1"#))
            .await
            .unwrap();
        let rows: usize = outcome.output.iter().map(Element::len).sum();
        assert_eq!(rows, 2);
        assert!(outcome.manifest.succeeded);
        assert_eq!(outcome.manifest.edges.len(), 1);
        assert_eq!(
            outcome.stage_statuses.last().map(|(n, _)| n.as_str()),
            Some(COLLECT)
        );
    }

    #[tokio::test]
    async fn sealed_pipeline_returns_no_output() {
        let outcome = engine()
            .run(parse(r#"rows [{"a":1}] | discard"#))
            .await
            .unwrap();
        assert!(outcome.output.is_empty());
        assert!(outcome
            .stage_statuses
            .iter()
            .all(|(_, s)| *s == StageStatus::Completed));
    }

    #[tokio::test]
    async fn refuses_an_open_pipeline() {
        let registry = Registry::builtin();
        let fragment = Pipeline::parse("where a > 1", &registry).unwrap();
        let failure = engine().run(fragment).await.unwrap_err();
        assert!(matches!(failure.error, ExecError::NotClosed(_)));
        assert!(failure.manifest.is_none());
        assert!(failure.diagnostics.iter().any(Diagnostic::is_error));
    }
}
