//! Checkpoint coordination.
//!
//! On every interval tick the coordinator asks the source stage to inject a
//! barrier, unless `checkpoints_in_flight` barriers are already travelling.
//! Stages report their snapshot as the barrier passes them; once the last
//! stage has reported, the checkpoint is persisted and counts as committed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use sluice_core::diagnostic::{Diagnostic, DiagnosticSink};
use sluice_core::hash::Hash256;
use sluice_core::id::{CheckpointSeq, PipelineRunId};
use sluice_io::{Checkpoint, CheckpointStore};

use crate::stage::StageReport;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointSummary {
    pub committed: u64,
    pub last: Option<CheckpointSeq>,
    /// Ticks skipped because too many checkpoints were in flight.
    pub deferred: u64,
}

pub struct CheckpointCoordinator {
    store: CheckpointStore,
    run_id: PipelineRunId,
    pipeline_hash: Hash256,
    stages: usize,
    interval: Duration,
    max_in_flight: usize,
    next_seq: CheckpointSeq,
    requests: mpsc::Sender<CheckpointSeq>,
    /// Per pending sequence: one slot per stage, filled as reports arrive.
    pending: BTreeMap<CheckpointSeq, Vec<Option<Option<Vec<u8>>>>>,
    diagnostics: Arc<dyn DiagnosticSink>,
    summary: CheckpointSummary,
}

impl CheckpointCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: CheckpointStore,
        run_id: PipelineRunId,
        pipeline_hash: Hash256,
        stages: usize,
        interval: Duration,
        max_in_flight: usize,
        requests: mpsc::Sender<CheckpointSeq>,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            store,
            run_id,
            pipeline_hash,
            stages,
            interval,
            max_in_flight,
            next_seq: CheckpointSeq::new(1),
            requests,
            pending: BTreeMap::new(),
            diagnostics,
            summary: CheckpointSummary::default(),
        }
    }

    /// Number new checkpoints after `seq`, so a resumed run never reuses a
    /// sequence number of the run it continues.
    pub fn starting_after(mut self, seq: CheckpointSeq) -> Self {
        self.next_seq = seq.next();
        self
    }

    /// Runs until every stage has dropped its report sender, or the run is
    /// cancelled.
    pub async fn run(
        mut self,
        mut reports: mpsc::UnboundedReceiver<StageReport>,
        cancel: CancellationToken,
    ) -> CheckpointSummary {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut requesting = true;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                report = reports.recv() => match report {
                    Some(report) => self.record(report).await,
                    None => break,
                },
                _ = ticker.tick(), if requesting => requesting = self.request(),
            }
        }
        if !self.pending.is_empty() {
            debug!(pending = self.pending.len(), "run ended with uncommitted checkpoints");
        }
        self.summary
    }

    /// Returns `false` once the source no longer takes requests.
    fn request(&mut self) -> bool {
        if self.pending.len() >= self.max_in_flight {
            self.summary.deferred += 1;
            warn!(
                in_flight = self.pending.len(),
                "checkpoint deferred: too many in flight"
            );
            return true;
        }
        let seq = self.next_seq;
        match self.requests.try_send(seq) {
            Ok(()) => {
                debug!(seq = seq.get(), "checkpoint requested");
                self.pending.insert(seq, vec![None; self.stages]);
                self.next_seq = seq.next();
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.summary.deferred += 1;
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("source finished; no further checkpoints");
                false
            }
        }
    }

    async fn record(&mut self, report: StageReport) {
        let Some(slots) = self.pending.get_mut(&report.seq) else {
            debug!(seq = report.seq.get(), stage = report.stage, "report for unknown checkpoint");
            return;
        };
        if let Some(slot) = slots.get_mut(report.stage) {
            *slot = Some(report.state);
        }
        if report.stage + 1 == self.stages {
            self.commit(report.seq).await;
        }
    }

    async fn commit(&mut self, seq: CheckpointSeq) {
        // Barriers travel in order, so anything older can no longer complete.
        let mut rest = self.pending.split_off(&seq);
        let Some(slots) = rest.remove(&seq) else {
            return;
        };
        self.pending = rest;

        let Some(blobs) = slots.into_iter().collect::<Option<Vec<_>>>() else {
            warn!(seq = seq.get(), "checkpoint incomplete at the terminal stage; dropped");
            return;
        };
        let checkpoint = Checkpoint {
            run_id: self.run_id,
            seq,
            pipeline_hash: self.pipeline_hash,
            created_ms: now_millis(),
            blobs,
        };
        match self.store.commit(&checkpoint).await {
            Ok(()) => {
                self.summary.committed += 1;
                self.summary.last = Some(seq);
            }
            Err(e) => {
                warn!(seq = seq.get(), error = %e, "checkpoint commit failed");
                self.diagnostics.emit(Diagnostic::warning(format!(
                    "checkpoint {} could not be committed: {e}",
                    seq.get()
                )));
            }
        }
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::config::Codec;
    use sluice_core::diagnostic::CollectingSink;
    use sluice_core::hash::hash_str;
    use sluice_io::{FilesystemActor, MemoryStorage};

    fn coordinator(
        stages: usize,
        max_in_flight: usize,
    ) -> (
        CheckpointCoordinator,
        CheckpointStore,
        mpsc::Receiver<CheckpointSeq>,
    ) {
        let (fs, _join) = FilesystemActor::spawn(Box::new(MemoryStorage::new()));
        let store = CheckpointStore::new(fs, "memory://cp", Codec::None);
        let (tx, rx) = mpsc::channel(max_in_flight.max(1));
        let c = CheckpointCoordinator::new(
            store.clone(),
            PipelineRunId::new(),
            hash_str("rows | discard"),
            stages,
            Duration::from_millis(5),
            max_in_flight,
            tx,
            Arc::new(CollectingSink::new()),
        );
        (c, store, rx)
    }

    #[tokio::test]
    async fn commits_once_the_terminal_stage_reports() {
        let (c, store, mut requests) = coordinator(2, 1);
        let run_id = c.run_id;
        let (rep_tx, rep_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(c.run(rep_rx, CancellationToken::new()));

        let seq = requests.recv().await.unwrap();
        assert_eq!(seq, CheckpointSeq::new(1));
        rep_tx
            .send(StageReport { stage: 0, seq, state: Some(vec![7]) })
            .unwrap();
        rep_tx.send(StageReport { stage: 1, seq, state: None }).unwrap();
        drop(rep_tx);

        let summary = task.await.unwrap();
        assert_eq!(summary.committed, 1);
        assert_eq!(summary.last, Some(seq));
        let stored = store.latest(run_id).await.unwrap().unwrap();
        assert_eq!(stored.blobs, vec![Some(vec![7]), None]);
    }

    #[tokio::test]
    async fn defers_while_a_checkpoint_is_in_flight() {
        let (c, _store, mut requests) = coordinator(2, 1);
        let (rep_tx, rep_rx) = mpsc::unbounded_channel::<StageReport>();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(c.run(rep_rx, cancel.clone()));

        assert_eq!(requests.recv().await.unwrap(), CheckpointSeq::new(1));
        // No reports arrive, so later ticks must not issue new requests.
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(requests.try_recv().is_err());

        cancel.cancel();
        let summary = task.await.unwrap();
        assert_eq!(summary.committed, 0);
        assert!(summary.deferred >= 1);
        drop(rep_tx);
    }
}
