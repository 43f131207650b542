//! Stage wiring and supervision.
//!
//! Adjacent stages are connected by one bounded edge each. Every stage runs
//! as its own task; the first stage to fail cancels the rest.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use sluice_core::id::{CheckpointSeq, StageId};
use sluice_operators::Generator;

use crate::channel::edge;
use crate::control::{RunContext, StageControlPlane};
use crate::error::ExecError;
use crate::metrics::EdgeGauge;
use crate::stage::{ExecutionStage, StageReport, StageStatus, StatusCell};

/// An instantiated operator waiting to be wired into a stage.
pub struct StageSpec {
    pub operator: &'static str,
    pub generator: Box<dyn Generator>,
}

/// Stages connected by edges, plus the checkpoint plumbing when enabled.
pub struct Wiring {
    pub stages: Vec<ExecutionStage>,
    pub gauges: Vec<Arc<EdgeGauge>>,
    pub barrier_requests: Option<mpsc::Sender<CheckpointSeq>>,
    pub reports: Option<mpsc::UnboundedReceiver<StageReport>>,
}

pub fn wire(specs: Vec<StageSpec>, run: &RunContext, checkpoint_requests: Option<usize>) -> Wiring {
    let capacity = run.config.channel_capacity;
    let names: Vec<&'static str> = specs.iter().map(|s| s.operator).collect();

    let mut gauges = Vec::with_capacity(names.len().saturating_sub(1));
    let mut senders = Vec::new();
    let mut receivers = Vec::new();
    for (i, pair) in names.windows(2).enumerate() {
        let gauge = EdgeGauge::new(
            format!("{}#{}", pair[0], i),
            format!("{}#{}", pair[1], i + 1),
            capacity,
        );
        let (tx, rx) = edge(Arc::clone(&gauge));
        gauges.push(gauge);
        senders.push(Some(tx));
        receivers.push(Some(rx));
    }

    let (req_tx, mut req_rx) = match checkpoint_requests {
        Some(n) => {
            let (tx, rx) = mpsc::channel(n.max(1));
            (Some(tx), Some(rx))
        }
        None => (None, None),
    };
    let (rep_tx, rep_rx) = match checkpoint_requests {
        Some(_) => {
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(tx), Some(rx))
        }
        None => (None, None),
    };

    let mut stages = Vec::with_capacity(specs.len());
    for (i, spec) in specs.into_iter().enumerate() {
        let ctrl = StageControlPlane::new(StageId::new(i as u64), spec.operator, run.clone());
        let mut stage = ExecutionStage::new(i, spec.generator, ctrl);
        if i > 0 {
            if let Some(rx) = receivers[i - 1].take() {
                stage = stage.with_input(rx);
            }
        }
        if let Some(tx) = senders.get_mut(i).and_then(Option::take) {
            stage = stage.with_output(tx);
        }
        if i == 0 {
            if let Some(rx) = req_rx.take() {
                stage = stage.with_barrier_requests(rx);
            }
        }
        if let Some(tx) = &rep_tx {
            stage = stage.with_reports(tx.clone());
        }
        stages.push(stage);
    }

    Wiring {
        stages,
        gauges,
        barrier_requests: req_tx,
        reports: rep_rx,
    }
}

/// Outcome of running every stage to completion.
pub struct Supervised {
    pub error: Option<ExecError>,
    pub statuses: Vec<(String, StageStatus)>,
}

/// Run all stages concurrently. The first genuine failure wins; errors that
/// are fallout of cancellation only count if nothing else failed.
pub async fn supervise(stages: Vec<ExecutionStage>, cancel: CancellationToken) -> Supervised {
    let cells: Vec<(String, StatusCell)> = stages
        .iter()
        .map(|s| (s.operator().to_string(), s.status()))
        .collect();

    let mut set = JoinSet::new();
    for stage in stages {
        set.spawn(stage.run());
    }

    let mut first: Option<ExecError> = None;
    let mut fallback: Option<ExecError> = None;
    while let Some(joined) = set.join_next().await {
        let result = joined.map_err(|e| ExecError::Join(e.to_string())).and_then(|r| r);
        let Err(e) = result else { continue };
        cancel.cancel();
        if e.is_cancellation() {
            debug!(error = %e, "stage stopped by cancellation");
            fallback.get_or_insert(e);
        } else if first.is_none() {
            warn!(error = %e, "stage failed; cancelling run");
            first = Some(e);
        } else {
            debug!(error = %e, "additional stage failure");
        }
    }

    Supervised {
        error: first.or(fallback),
        statuses: cells
            .into_iter()
            .map(|(name, cell)| (name, cell.get()))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::{Collector, COLLECT};
    use crate::testing::run_context;
    use sluice_core::config::EngineConfig;
    use sluice_core::element::ElementType;
    use sluice_operators::source::Rows;
    use sluice_operators::{InstantiateContext, Operator};

    fn rows(n: usize) -> StageSpec {
        let data = (0..n).map(|i| serde_json::json!({ "i": i })).collect();
        StageSpec {
            operator: "rows",
            generator: Rows::new(data)
                .with_batch_size(1)
                .instantiate(&InstantiateContext {
                    input_type: ElementType::Void,
                    config: &EngineConfig::default(),
                })
                .unwrap(),
        }
    }

    #[tokio::test]
    async fn wires_a_chain_and_runs_it() {
        let ctx = run_context();
        let (collector, mut out) = Collector::new();
        let wiring = wire(
            vec![
                rows(10),
                StageSpec {
                    operator: COLLECT,
                    generator: Box::new(collector),
                },
            ],
            &ctx,
            None,
        );
        assert_eq!(wiring.gauges.len(), 1);
        assert!(wiring.barrier_requests.is_none());

        let supervised = supervise(wiring.stages, ctx.cancel.clone()).await;
        assert!(supervised.error.is_none());
        assert!(supervised
            .statuses
            .iter()
            .all(|(_, s)| *s == StageStatus::Completed));

        let mut n = 0;
        while out.try_recv().is_ok() {
            n += 1;
        }
        assert_eq!(n, 10);
        let stats = wiring.gauges[0].stats();
        assert_eq!(stats.elements, 10);
        assert!(stats.high_water <= stats.capacity);
    }
}
