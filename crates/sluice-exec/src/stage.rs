//! Execution stages.
//!
//! A stage owns one generator and drives it: it reserves room downstream,
//! resumes the generator, and routes whatever comes back. Suspension happens
//! only at the await points of this loop (waiting for input, waiting for a
//! free output slot, waiting on an external response), and each of them
//! also watches the run's cancellation token.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, trace, Instrument};

use sluice_core::diagnostic::Diagnostic;
use sluice_core::element::Element;
use sluice_core::id::CheckpointSeq;
use sluice_operators::{ControlPlane, Generator, Input, OpError, Pull, Resume};

use crate::channel::{EdgePermit, EdgeReceiver, EdgeSender, Message};
use crate::control::StageControlPlane;
use crate::error::{ExecError, Result};
use crate::fail_point;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum StageStatus {
    Idle = 0,
    Running = 1,
    WaitingForInput = 2,
    WaitingForOutput = 3,
    /// Waiting on an external response the generator requested.
    Waiting = 4,
    Completed = 5,
    Failed = 6,
}

impl StageStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => StageStatus::Running,
            2 => StageStatus::WaitingForInput,
            3 => StageStatus::WaitingForOutput,
            4 => StageStatus::Waiting,
            5 => StageStatus::Completed,
            6 => StageStatus::Failed,
            _ => StageStatus::Idle,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Failed)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageStatus::Idle => "idle",
            StageStatus::Running => "running",
            StageStatus::WaitingForInput => "waiting-for-input",
            StageStatus::WaitingForOutput => "waiting-for-output",
            StageStatus::Waiting => "waiting",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Shared view of a stage's status, readable while the stage runs.
#[derive(Debug, Clone, Default)]
pub struct StatusCell(Arc<AtomicU8>);

impl StatusCell {
    pub fn get(&self) -> StageStatus {
        StageStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, status: StageStatus) {
        self.0.store(status as u8, Ordering::Release);
    }
}

/// One stage's contribution to checkpoint `seq`.
#[derive(Debug)]
pub struct StageReport {
    pub stage: usize,
    pub seq: CheckpointSeq,
    pub state: Option<Vec<u8>>,
}

/// One-element inbox between the channel and the generator.
#[derive(Debug)]
struct Inbox {
    slot: Option<Element>,
    closed: bool,
}

impl Input for Inbox {
    fn try_next(&mut self) -> Pull {
        match self.slot.take() {
            Some(element) => Pull::Item(element),
            None if self.closed => Pull::Closed,
            None => Pull::Empty,
        }
    }
}

pub struct ExecutionStage {
    index: usize,
    generator: Box<dyn Generator>,
    ctrl: StageControlPlane,
    input: Option<EdgeReceiver>,
    output: Option<EdgeSender>,
    /// Checkpoint requests from the coordinator; sources only.
    barrier_requests: Option<mpsc::Receiver<CheckpointSeq>>,
    reports: Option<mpsc::UnboundedSender<StageReport>>,
    status: StatusCell,
}

impl ExecutionStage {
    pub fn new(index: usize, generator: Box<dyn Generator>, ctrl: StageControlPlane) -> Self {
        Self {
            index,
            generator,
            ctrl,
            input: None,
            output: None,
            barrier_requests: None,
            reports: None,
            status: StatusCell::default(),
        }
    }

    pub fn with_input(mut self, input: EdgeReceiver) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_output(mut self, output: EdgeSender) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_barrier_requests(mut self, requests: mpsc::Receiver<CheckpointSeq>) -> Self {
        self.barrier_requests = Some(requests);
        self
    }

    pub fn with_reports(mut self, reports: mpsc::UnboundedSender<StageReport>) -> Self {
        self.reports = Some(reports);
        self
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn operator(&self) -> &'static str {
        self.ctrl.operator()
    }

    pub fn status(&self) -> StatusCell {
        self.status.clone()
    }

    /// Restore generator state from a checkpoint blob before the first resume.
    pub fn restore(&mut self, state: &[u8]) -> Result<()> {
        self.generator
            .restore(state)
            .map_err(|e| self.stage_error(e))
    }

    /// Drive the generator to completion. On failure the run is cancelled
    /// before this stage's channels close, so neighbours never mistake the
    /// failure for end of input.
    pub async fn run(mut self) -> Result<()> {
        let span = debug_span!("stage", stage = self.index, operator = self.operator());
        async move {
            debug!("stage started");
            self.status.set(StageStatus::Running);
            let result = self.drive().await;
            match &result {
                Ok(()) => {
                    self.status.set(StageStatus::Completed);
                    debug!("stage completed");
                }
                Err(e) if e.is_cancellation() => {
                    self.status.set(StageStatus::Failed);
                    debug!("stage cancelled");
                }
                Err(e) => {
                    self.status.set(StageStatus::Failed);
                    self.ctrl.emit(Diagnostic::error(e.to_string()));
                    self.ctrl.cancel_token().cancel();
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn drive(&mut self) -> Result<()> {
        let cancel = self.ctrl.cancel_token().clone();
        let mut inbox = Inbox {
            slot: None,
            closed: self.input.is_none(),
        };
        let mut permit: Option<EdgePermit> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(ExecError::Cancelled);
            }
            fail_point!(format!("stage-{}-resume", self.index));

            if let Some(seq) = self.poll_barrier_request() {
                if !self.pass_barrier(seq, &mut permit, &cancel).await? {
                    return Ok(());
                }
            }
            if permit.is_none() {
                if let Some(output) = &self.output {
                    match reserve(output, &self.status, &cancel).await? {
                        Some(p) => permit = Some(p),
                        // Consumer finished early; nothing more is wanted.
                        None => return Ok(()),
                    }
                }
            }

            self.status.set(StageStatus::Running);
            let resumed = self
                .generator
                .resume(&mut inbox, &mut self.ctrl)
                .map_err(|e| self.stage_error(e))?;

            match resumed {
                Resume::Yield(element) => match permit.take() {
                    Some(p) => {
                        trace!(len = element.len(), "yield");
                        p.send(Message::Data(element));
                    }
                    None => trace!("terminal stage yielded; element dropped"),
                },
                Resume::NeedInput => {
                    if inbox.closed {
                        return Err(self.stage_error(OpError::Exec(
                            "input requested after upstream closed".into(),
                        )));
                    }
                    self.status.set(StageStatus::WaitingForInput);
                    match self.next_message(&cancel).await? {
                        Some(Message::Data(element)) => inbox.slot = Some(element),
                        Some(Message::Barrier(seq)) => {
                            if !self.pass_barrier(seq, &mut permit, &cancel).await? {
                                return Ok(());
                            }
                        }
                        None => inbox.closed = true,
                    }
                }
                Resume::Wait => {
                    if self.ctrl.is_waiting() {
                        self.status.set(StageStatus::Waiting);
                    }
                    let notify = self.ctrl.notifier();
                    tokio::select! {
                        _ = notify.notified() => {}
                        _ = cancel.cancelled() => return Err(ExecError::Cancelled),
                    }
                }
                Resume::Done => return Ok(()),
            }
        }
    }

    fn poll_barrier_request(&mut self) -> Option<CheckpointSeq> {
        self.barrier_requests.as_mut()?.try_recv().ok()
    }

    async fn next_message(&mut self, cancel: &CancellationToken) -> Result<Option<Message>> {
        let Some(input) = self.input.as_mut() else {
            return Ok(None);
        };
        let message = tokio::select! {
            m = input.recv() => m,
            _ = cancel.cancelled() => return Err(ExecError::Cancelled),
        };
        // A closed input during cancellation is a failed neighbour, not an end.
        if message.is_none() && cancel.is_cancelled() {
            return Err(ExecError::Cancelled);
        }
        Ok(message)
    }

    /// Snapshot, report, forward. Returns `false` if the consumer is gone.
    async fn pass_barrier(
        &mut self,
        seq: CheckpointSeq,
        permit: &mut Option<EdgePermit>,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let state = self
            .generator
            .snapshot()
            .map_err(|e| self.stage_error(e))?;
        trace!(seq = seq.get(), bytes = state.as_ref().map_or(0, Vec::len), "snapshot");
        if let Some(reports) = &self.reports {
            let _ = reports.send(StageReport {
                stage: self.index,
                seq,
                state,
            });
        }
        if let Some(output) = &self.output {
            let p = match permit.take() {
                Some(p) => p,
                None => match reserve(output, &self.status, cancel).await? {
                    Some(p) => p,
                    None => return Ok(false),
                },
            };
            p.send(Message::Barrier(seq));
        }
        Ok(true)
    }

    fn stage_error(&self, source: OpError) -> ExecError {
        ExecError::Stage {
            stage: self.index,
            operator: self.operator().to_string(),
            source,
        }
    }
}

async fn reserve(
    output: &EdgeSender,
    status: &StatusCell,
    cancel: &CancellationToken,
) -> Result<Option<EdgePermit>> {
    status.set(StageStatus::WaitingForOutput);
    let permit = tokio::select! {
        p = output.reserve() => p,
        _ = cancel.cancelled() => return Err(ExecError::Cancelled),
    };
    if permit.is_none() && cancel.is_cancelled() {
        return Err(ExecError::Cancelled);
    }
    Ok(permit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::edge;
    use crate::metrics::EdgeGauge;
    use crate::testing::run_context;
    use sluice_core::config::EngineConfig;
    use sluice_core::element::ElementType;
    use sluice_core::id::StageId;
    use sluice_operators::source::Rows;
    use sluice_operators::{InstantiateContext, Operator};

    fn rows_generator(n: usize) -> Box<dyn Generator> {
        let data = (0..n).map(|i| serde_json::json!({ "i": i })).collect();
        Rows::new(data)
            .with_batch_size(1)
            .instantiate(&InstantiateContext {
                input_type: ElementType::Void,
                config: &EngineConfig::default(),
            })
            .unwrap()
    }

    #[tokio::test]
    async fn source_stage_streams_then_closes() {
        let ctx = run_context();
        let gauge = EdgeGauge::new("rows", "test", 2);
        let (tx, mut rx) = edge(gauge.clone());
        let stage = ExecutionStage::new(
            0,
            rows_generator(5),
            StageControlPlane::new(StageId::new(0), "rows", ctx),
        )
        .with_output(tx);
        let status = stage.status();
        let handle = tokio::spawn(stage.run());

        let mut received = 0;
        while let Some(message) = rx.recv().await {
            assert!(matches!(message, Message::Data(_)));
            received += 1;
        }
        handle.await.unwrap().unwrap();
        assert_eq!(received, 5);
        assert_eq!(status.get(), StageStatus::Completed);
        assert!(gauge.high_water() <= 2);
    }

    #[tokio::test]
    async fn barrier_request_is_reported_and_forwarded() {
        let ctx = run_context();
        let (tx, mut rx) = edge(EdgeGauge::new("rows", "test", 4));
        let (req_tx, req_rx) = mpsc::channel(1);
        let (rep_tx, mut rep_rx) = mpsc::unbounded_channel();
        req_tx.send(CheckpointSeq::new(1)).await.unwrap();

        let stage = ExecutionStage::new(
            0,
            rows_generator(2),
            StageControlPlane::new(StageId::new(0), "rows", ctx),
        )
        .with_output(tx)
        .with_barrier_requests(req_rx)
        .with_reports(rep_tx);
        tokio::spawn(stage.run());

        assert!(matches!(rx.recv().await, Some(Message::Barrier(s)) if s.get() == 1));
        let report = rep_rx.recv().await.unwrap();
        assert_eq!(report.stage, 0);
        assert!(report.state.is_some());
        assert!(matches!(rx.recv().await, Some(Message::Data(_))));
    }

    #[tokio::test]
    async fn dropped_consumer_ends_producer() {
        let ctx = run_context();
        let (tx, rx) = edge(EdgeGauge::new("rows", "test", 1));
        drop(rx);
        let stage = ExecutionStage::new(
            0,
            rows_generator(100),
            StageControlPlane::new(StageId::new(0), "rows", ctx),
        )
        .with_output(tx);
        stage.run().await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_stops_a_blocked_stage() {
        let ctx = run_context();
        let cancel = ctx.cancel.clone();
        let (tx, _rx) = edge(EdgeGauge::new("rows", "test", 1));
        let stage = ExecutionStage::new(
            0,
            rows_generator(100),
            StageControlPlane::new(StageId::new(0), "rows", ctx),
        )
        .with_output(tx);
        let handle = tokio::spawn(stage.run());
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        cancel.cancel();
        let err = handle.await.unwrap().unwrap_err();
        assert!(err.is_cancellation());
    }
}
