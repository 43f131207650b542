//! Minimal stage stand-ins for unit-testing generators without an executor.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::Notify;

use sluice_core::config::EngineConfig;
use sluice_core::diagnostic::Diagnostic;
use sluice_core::element::{Element, ElementType};
use sluice_core::id::{PipelineRunId, StageId};
use sluice_core::slice::TableSlice;
use sluice_io::FsHandle;

use crate::traits::{
    ControlPlane, Generator, Input, InstantiateContext, OpError, OpResult, Operator, Pull, Resume,
};

pub(crate) struct TestControl {
    pub diagnostics: Vec<Diagnostic>,
    pub waiting: bool,
    pub fs: Option<FsHandle>,
    config: EngineConfig,
    notify: Arc<Notify>,
    run_id: PipelineRunId,
}

impl TestControl {
    pub fn new() -> Self {
        Self {
            diagnostics: Vec::new(),
            waiting: false,
            fs: None,
            config: EngineConfig::default(),
            notify: Arc::new(Notify::new()),
            run_id: PipelineRunId::new(),
        }
    }

    pub fn with_fs(fs: FsHandle) -> Self {
        Self {
            fs: Some(fs),
            ..Self::new()
        }
    }
}

impl ControlPlane for TestControl {
    fn emit(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    fn set_waiting(&mut self, waiting: bool) {
        self.waiting = waiting;
    }

    fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    fn is_cancelled(&self) -> bool {
        false
    }

    fn spawn(&mut self, fut: BoxFuture<'static, ()>) {
        tokio::spawn(fut);
    }

    fn fs(&self) -> Option<FsHandle> {
        self.fs.clone()
    }

    fn stage(&self) -> StageId {
        StageId::new(0)
    }

    fn run_id(&self) -> PipelineRunId {
        self.run_id
    }

    fn config(&self) -> &EngineConfig {
        &self.config
    }
}

/// Hands out one element per `NeedInput`, like a stage with a one-slot inbox.
pub(crate) struct FeedInput {
    slot: Option<Element>,
    remaining: VecDeque<Element>,
    closed: bool,
}

impl FeedInput {
    pub fn new(elements: Vec<Element>) -> Self {
        Self {
            slot: None,
            remaining: elements.into(),
            closed: false,
        }
    }

    /// Move the next element into the slot. Returns false once exhausted.
    fn refill(&mut self) -> bool {
        match self.remaining.pop_front() {
            Some(e) => {
                self.slot = Some(e);
                true
            }
            None => {
                self.closed = true;
                false
            }
        }
    }
}

impl Input for FeedInput {
    fn try_next(&mut self) -> Pull {
        match self.slot.take() {
            Some(e) => Pull::Item(e),
            None if self.closed => Pull::Closed,
            None => Pull::Empty,
        }
    }
}

/// Drive a generator until it is done. Fails on `Wait`.
pub(crate) fn drive(
    generator: &mut dyn Generator,
    inputs: Vec<Element>,
    ctrl: &mut TestControl,
) -> OpResult<Vec<Element>> {
    let mut input = FeedInput::new(inputs);
    let mut out = Vec::new();
    loop {
        match generator.resume(&mut input, ctrl)? {
            Resume::Yield(e) => out.push(e),
            Resume::NeedInput => {
                if input.closed {
                    return Err(OpError::Exec("input requested after close".into()));
                }
                input.refill();
            }
            Resume::Wait => return Err(OpError::Exec("unexpected wait".into())),
            Resume::Done => return Ok(out),
        }
    }
}

/// Like [`drive`], but honors `Wait` by awaiting the notifier.
pub(crate) async fn drive_async(
    generator: &mut dyn Generator,
    inputs: Vec<Element>,
    ctrl: &mut TestControl,
) -> OpResult<Vec<Element>> {
    let mut input = FeedInput::new(inputs);
    let mut out = Vec::new();
    loop {
        match generator.resume(&mut input, ctrl)? {
            Resume::Yield(e) => out.push(e),
            Resume::NeedInput => {
                if input.closed {
                    return Err(OpError::Exec("input requested after close".into()));
                }
                input.refill();
            }
            Resume::Wait => ctrl.notifier().notified().await,
            Resume::Done => return Ok(out),
        }
    }
}

/// Instantiate `op` with default config and drive it synchronously.
pub(crate) fn run_op(
    op: &dyn Operator,
    input_type: ElementType,
    inputs: Vec<Element>,
) -> OpResult<(Vec<Element>, Vec<Diagnostic>)> {
    let config = EngineConfig::default();
    let mut generator = op.instantiate(&InstantiateContext {
        input_type,
        config: &config,
    })?;
    let mut ctrl = TestControl::new();
    let out = drive(generator.as_mut(), inputs, &mut ctrl)?;
    Ok((out, ctrl.diagnostics))
}

/// One events element from a JSON array of objects with a uniform shape.
pub(crate) fn events(rows: serde_json::Value) -> Element {
    let rows = rows.as_array().cloned().unwrap_or_default();
    let mut slices = TableSlice::from_json_rows("test", &rows).unwrap();
    assert_eq!(slices.len(), 1, "rows must share one shape");
    Element::Events(slices.remove(0))
}

/// Flatten events elements back to JSON rows.
pub(crate) fn rows_of(elements: &[Element]) -> Vec<serde_json::Value> {
    elements
        .iter()
        .flat_map(|e| match e {
            Element::Events(s) => s.to_json_rows(),
            Element::Bytes(_) => panic!("expected events"),
        })
        .collect()
}
