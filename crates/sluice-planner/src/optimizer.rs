//! Pipeline optimizer.
//!
//! One iteration is a back-to-front pushdown pass followed by a front-to-back
//! fusion pass. Iterations repeat until the spec list stops changing, so the
//! result is a fixpoint: optimizing it again changes nothing.

use std::mem;

use tracing::{debug, warn};

use sluice_core::config::EngineConfig;
use sluice_core::element::EventOrder;
use sluice_core::expr::Expr;
use sluice_operators::basic::Pass;
use sluice_operators::filter::Where;
use sluice_operators::{Operator, Replacement};

use crate::error::Result;
use crate::pipeline::{Pipeline, PipelineState};
use crate::rules::RULES;

#[derive(Debug, Clone)]
pub struct OptimizedPipeline {
    pub pipeline: Pipeline,
    /// Iterations run, including the final one that changed nothing.
    pub iterations: usize,
    /// One line per rewrite, in the order they happened.
    pub trace: Vec<String>,
}

/// Optimize `pipeline` to a fixpoint, bounded by
/// `config.optimizer_max_iterations`.
pub fn optimize(mut pipeline: Pipeline, config: &EngineConfig) -> Result<OptimizedPipeline> {
    if pipeline.state() == PipelineState::Optimized {
        return Ok(OptimizedPipeline {
            pipeline,
            iterations: 0,
            trace: Vec::new(),
        });
    }

    pipeline.set_state(PipelineState::Optimizing);
    let max_iterations = config.optimizer_max_iterations.max(1);
    let mut trace = Vec::new();
    let mut iterations = 0;
    let mut converged = false;

    while iterations < max_iterations {
        iterations += 1;
        let before = pipeline.specs()?;
        let ops = pushdown(pipeline.operators(), pipeline.is_closed(), &mut trace);
        let mut ops = fuse(ops, &mut trace);
        if ops.is_empty() {
            ops.push(Box::new(Pass));
        }
        pipeline.replace_operators(ops)?;
        let after = pipeline.specs()?;
        debug!(iteration = iterations, operators = after.len(), "optimizer pass");
        if before == after {
            converged = true;
            break;
        }
    }
    if !converged {
        warn!(
            iterations,
            "optimizer stopped before reaching a fixpoint; using last rewrite"
        );
    }

    pipeline.set_state(PipelineState::Optimized);
    Ok(OptimizedPipeline {
        pipeline,
        iterations,
        trace,
    })
}

/// Walk back to front carrying the residual filter and the order required
/// by everything downstream.
fn pushdown(
    ops: &[Box<dyn Operator>],
    closed: bool,
    trace: &mut Vec<String>,
) -> Vec<Box<dyn Operator>> {
    let mut filter = Expr::trivially_true();
    let mut order = EventOrder::Ordered;
    let mut reversed: Vec<Box<dyn Operator>> = Vec::with_capacity(ops.len());

    for op in ops.iter().rev() {
        let result = op.optimize(&filter, order);
        match result.filter {
            Some(remaining) => filter = remaining,
            None => {
                let pending = mem::replace(&mut filter, Expr::trivially_true());
                if !pending.is_trivially_true() {
                    trace.push(format!("materialize `where {pending}` after {}", op.name()));
                    reversed.push(Box::new(Where::new(pending)));
                }
            }
        }
        order = result.order;
        match result.replacement {
            Replacement::Keep => reversed.push(op.box_clone()),
            Replacement::Remove => trace.push(format!("remove {}", op.name())),
            Replacement::Replace(replacements) => {
                trace.push(format!(
                    "replace {} with [{}]",
                    op.name(),
                    replacements
                        .iter()
                        .map(|r| r.name())
                        .collect::<Vec<_>>()
                        .join(", ")
                ));
                reversed.extend(replacements.into_iter().rev());
            }
        }
    }

    let mut ops: Vec<Box<dyn Operator>> = reversed.into_iter().rev().collect();
    if !filter.is_trivially_true() {
        // A closed pipeline keeps its source first.
        let at = usize::from(closed && !ops.is_empty());
        trace.push(format!("materialize `where {filter}` at position {at}"));
        ops.insert(at, Box::new(Where::new(filter)));
    }
    ops
}

fn fuse(ops: Vec<Box<dyn Operator>>, trace: &mut Vec<String>) -> Vec<Box<dyn Operator>> {
    let mut out: Vec<Box<dyn Operator>> = Vec::with_capacity(ops.len());
    for op in ops {
        let fused = out.last().and_then(|prev| {
            RULES
                .iter()
                .find_map(|(name, rule)| rule(prev.as_ref(), op.as_ref()).map(|f| (*name, f)))
        });
        match fused {
            Some((name, replacement)) => {
                trace.push(format!("fuse {name}"));
                out.pop();
                out.push(replacement);
            }
            None => out.push(op),
        }
    }
    out
}
