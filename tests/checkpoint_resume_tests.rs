//! Checkpointing across runs: a failed run leaves committed checkpoints
//! behind, and a second run under the same id continues from the latest one.

mod common;

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use sluice::core::diagnostic::Severity;
use sluice::core::element::{Element, ElementType};
use sluice::core::id::PipelineRunId;
use sluice::core::slice::TableSlice;
use sluice::exec::ExecError;
use sluice::io::{MemoryStorage, Storage};
use sluice::operators::traits::{decode_state, encode_state};
use sluice::operators::{
    parse_pipeline, ControlPlane, Generator, Input, InstantiateContext, OpError, OpResult,
    Operator, OperatorSpec, Resume,
};
use sluice::{EngineConfig, Pipeline, Registry};

use common::memory_engine;

const ROWS: u64 = 60;
const OUT: &str = "paced.jsonl";

/// Source that emits `{"i": n}` once per tick. `fail_at` is left
/// out of `to_spec` so a failing and a healthy run share one fingerprint.
#[derive(Debug, Clone)]
struct Paced {
    rows: u64,
    tick: Duration,
    fail_at: Option<u64>,
}

impl Operator for Paced {
    fn name(&self) -> &'static str {
        "paced"
    }

    fn infer_type(&self, input: ElementType) -> OpResult<ElementType> {
        match input {
            ElementType::Void => Ok(ElementType::Events),
            other => Err(OpError::Type(format!("'paced' is a source, got {other}"))),
        }
    }

    fn instantiate(&self, _ctx: &InstantiateContext<'_>) -> OpResult<Box<dyn Generator>> {
        Ok(Box::new(PacedGen {
            op: self.clone(),
            next: 0,
            ticking: None,
        }))
    }

    fn to_spec(&self) -> OpResult<OperatorSpec> {
        Ok(OperatorSpec::new("paced", json!({ "rows": self.rows })))
    }

    fn box_clone(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct PacedGen {
    op: Paced,
    next: u64,
    ticking: Option<Arc<AtomicBool>>,
}

impl Generator for PacedGen {
    fn resume(&mut self, _input: &mut dyn Input, ctrl: &mut dyn ControlPlane) -> OpResult<Resume> {
        if self.next == self.op.rows {
            return Ok(Resume::Done);
        }
        if self.op.fail_at == Some(self.next) {
            return Err(OpError::Exec("injected failure".into()));
        }
        match &self.ticking {
            None => {
                let fired = Arc::new(AtomicBool::new(false));
                let notify = ctrl.notifier();
                let tick = self.op.tick;
                let flag = Arc::clone(&fired);
                ctrl.spawn(Box::pin(async move {
                    tokio::time::sleep(tick).await;
                    flag.store(true, Ordering::SeqCst);
                    notify.notify_one();
                }));
                self.ticking = Some(fired);
                Ok(Resume::Wait)
            }
            Some(fired) if !fired.load(Ordering::SeqCst) => Ok(Resume::Wait),
            Some(_) => {
                self.ticking = None;
                let slice = TableSlice::from_json_rows("paced", &[json!({ "i": self.next })])?
                    .into_iter()
                    .next()
                    .ok_or_else(|| OpError::Exec("empty slice".into()))?;
                self.next += 1;
                Ok(Resume::Yield(Element::Events(slice)))
            }
        }
    }

    fn snapshot(&self) -> OpResult<Option<Vec<u8>>> {
        encode_state(&self.next).map(Some)
    }

    fn restore(&mut self, state: &[u8]) -> OpResult<()> {
        self.next = decode_state(state)?;
        Ok(())
    }
}

fn paced_pipeline(fail_at: Option<u64>, sink: &str) -> Pipeline {
    let mut ops: Vec<Box<dyn Operator>> = vec![Box::new(Paced {
        rows: ROWS,
        tick: Duration::from_millis(4),
        fail_at,
    })];
    let tail = parse_pipeline(sink, &Registry::builtin()).expect("tail parses");
    ops.extend(tail);
    Pipeline::new(ops).expect("pipeline type-checks")
}

fn checkpointing() -> EngineConfig {
    EngineConfig {
        checkpoint_interval_ms: Some(15),
        checkpoints_in_flight: 1,
        checkpoint_dir: "cp".into(),
        ..EngineConfig::default()
    }
}

fn written_indices(storage: &MemoryStorage) -> Vec<u64> {
    let raw = storage.read(OUT).expect("output written");
    String::from_utf8(raw)
        .unwrap()
        .lines()
        .map(|line| {
            let v: serde_json::Value = serde_json::from_str(line).unwrap();
            v["i"].as_u64().unwrap()
        })
        .collect()
}

#[tokio::test]
async fn resumed_run_completes_output_exactly_once() {
    let (engine, storage) = memory_engine(checkpointing());
    let run_id = PipelineRunId::new();
    let sink = format!("write json | save file {OUT}");

    let failure = engine
        .run_with_id(paced_pipeline(Some(40), &sink), run_id)
        .await
        .expect_err("first run fails");
    assert!(matches!(
        &failure.error,
        ExecError::Stage { stage: 0, source: OpError::Exec(_), .. }
    ));
    let manifest = failure.manifest.expect("manifest of a started run");
    assert!(!manifest.succeeded);
    assert!(manifest.checkpoints_committed >= 1);
    assert!(!storage.contains(OUT));
    assert!(!storage.list("cp/").unwrap().is_empty());

    let outcome = engine
        .run_with_id(paced_pipeline(None, &sink), run_id)
        .await
        .expect("second run succeeds");
    assert!(outcome.manifest.succeeded);
    assert!(outcome.manifest.resumed_from.is_some());
    assert_eq!(written_indices(&storage), (0..ROWS).collect::<Vec<_>>());
    assert!(
        storage.list("cp/").unwrap().is_empty(),
        "checkpoints are erased after success"
    );
}

#[tokio::test]
async fn changed_pipeline_ignores_old_checkpoints() {
    let (engine, storage) = memory_engine(checkpointing());
    let run_id = PipelineRunId::new();

    engine
        .run_with_id(
            paced_pipeline(Some(30), &format!("write json | save file {OUT}")),
            run_id,
        )
        .await
        .expect_err("first run fails");

    let outcome = engine
        .run_with_id(
            paced_pipeline(None, &format!("where i >= 0 | write json | save file {OUT}")),
            run_id,
        )
        .await
        .expect("second run succeeds");
    assert!(outcome.manifest.resumed_from.is_none());
    assert!(outcome
        .diagnostics
        .iter()
        .any(|d| d.severity == Severity::Warning && d.message.contains("checkpoint")));
    assert_eq!(written_indices(&storage), (0..ROWS).collect::<Vec<_>>());
}

#[tokio::test]
async fn retained_checkpoints_survive_success() {
    let config = EngineConfig {
        retain_checkpoints: true,
        ..checkpointing()
    };
    let (engine, storage) = memory_engine(config);

    let outcome = engine
        .run(paced_pipeline(None, &format!("write json | save file {OUT}")))
        .await
        .expect("run succeeds");
    assert!(outcome.manifest.checkpoints_committed >= 1);
    assert!(!storage.list("cp/").unwrap().is_empty());
}

#[tokio::test]
async fn zero_in_flight_disables_checkpointing() {
    let config = EngineConfig {
        checkpoints_in_flight: 0,
        ..checkpointing()
    };
    let (engine, storage) = memory_engine(config);

    let outcome = engine
        .run(paced_pipeline(None, &format!("write json | save file {OUT}")))
        .await
        .expect("run succeeds");
    assert_eq!(outcome.manifest.checkpoints_committed, 0);
    assert!(storage.list("cp/").unwrap().is_empty());
    assert_eq!(written_indices(&storage).len(), ROWS as usize);
}
