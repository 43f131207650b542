//! Operator trait + the runtime contract between operators and stages.
//!
//! An [`Operator`] is an immutable description. The executor turns it into a
//! [`Generator`] for one run and resumes that generator whenever the stage has
//! room downstream. Progress happens only inside `resume`; the generator pulls
//! input through [`Input::try_next`] and never blocks. When it needs
//! something from the outside world it spawns the request on the
//! [`ControlPlane`], marks itself waiting, and returns [`Resume::Wait`].

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;

use sluice_core::config::EngineConfig;
use sluice_core::diagnostic::Diagnostic;
use sluice_core::element::{Element, ElementType, EventOrder};
use sluice_core::expr::Expr;
use sluice_core::id::{PipelineRunId, StageId};
use sluice_io::FsHandle;

use crate::plan::{OperatorSpec, OptimizeResult};

pub type OpResult<T> = std::result::Result<T, OpError>;

#[derive(Debug, Error)]
pub enum OpError {
    #[error("planning error: {0}")]
    Plan(String),

    #[error("execution error: {0}")]
    Exec(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("io error: {0}")]
    Io(#[from] sluice_io::Error),

    #[error("cancelled")]
    Cancelled,

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error(transparent)]
    Core(#[from] sluice_core::Error),
}

/// Result of a non-blocking pull from upstream.
#[derive(Debug)]
pub enum Pull {
    Item(Element),
    /// Nothing buffered right now; more may arrive.
    Empty,
    /// Upstream finished.
    Closed,
}

pub trait Input {
    fn try_next(&mut self) -> Pull;
}

/// Input of a source: permanently closed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInput;

impl Input for NoInput {
    fn try_next(&mut self) -> Pull {
        Pull::Closed
    }
}

/// Why a generator returned control to its stage.
#[derive(Debug)]
pub enum Resume {
    /// One output element. The stage resumes again once downstream has room.
    Yield(Element),
    /// All input pulled so far is fully processed and its output yielded.
    NeedInput,
    /// Waiting on an external response; the notifier fires when it arrives.
    Wait,
    /// The sequence ended normally.
    Done,
}

/// Handle a running generator uses to talk to its stage and the engine.
pub trait ControlPlane: Send {
    /// Report a diagnostic. Never blocks.
    fn emit(&mut self, diagnostic: Diagnostic);

    /// Mark the stage as waiting on an external response (or clear it).
    fn set_waiting(&mut self, waiting: bool);

    /// Notifier that wakes the stage after [`Resume::Wait`].
    fn notifier(&self) -> Arc<Notify>;

    fn is_cancelled(&self) -> bool;

    /// Run a future on the engine's runtime. Used for external requests.
    fn spawn(&mut self, fut: BoxFuture<'static, ()>);

    /// The filesystem actor, when the engine runs one.
    fn fs(&self) -> Option<FsHandle>;

    fn stage(&self) -> StageId;

    fn run_id(&self) -> PipelineRunId;

    fn config(&self) -> &EngineConfig;
}

/// Pull-based generator produced by [`Operator::instantiate`].
pub trait Generator: Send {
    fn resume(&mut self, input: &mut dyn Input, ctrl: &mut dyn ControlPlane) -> OpResult<Resume>;

    /// Serialize resume state. Only called after `resume` returned
    /// `NeedInput` (or between yields for sources). `None` means stateless.
    fn snapshot(&self) -> OpResult<Option<Vec<u8>>> {
        Ok(None)
    }

    /// Restore from a blob produced by [`snapshot`](Self::snapshot), before
    /// the first `resume`.
    fn restore(&mut self, _state: &[u8]) -> OpResult<()> {
        Err(OpError::Checkpoint(
            "operator has no resumable state".into(),
        ))
    }
}

/// Everything an operator may consult when it is instantiated for a run.
#[derive(Debug, Clone, Copy)]
pub struct InstantiateContext<'a> {
    pub input_type: ElementType,
    pub config: &'a EngineConfig,
}

/// Where an operator has to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Anywhere,
    /// Touches the local filesystem.
    Local,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Anywhere => write!(f, "anywhere"),
            Location::Local => write!(f, "local"),
        }
    }
}

/// Trait that all operators must implement.
///
/// Invariants:
/// - `infer_type` is pure; the planner calls it to type-check pipelines.
/// - `instantiate` produces a fresh generator per call. The operator itself is
///   never mutated.
/// - `to_spec` round-trips through the plugin registered under `name()`.
pub trait Operator: Send + Sync + fmt::Debug {
    /// Stable name; doubles as the registry key for deserialization.
    fn name(&self) -> &'static str;

    /// Output element type for a given input element type.
    fn infer_type(&self, input: ElementType) -> OpResult<ElementType>;

    fn instantiate(&self, ctx: &InstantiateContext<'_>) -> OpResult<Box<dyn Generator>>;

    /// Optimizer hook. `filter` must hold for every row downstream wants;
    /// `order` is what downstream needs. The default treats the operator as
    /// opaque: it accepts no filter and requires ordered input.
    fn optimize(&self, _filter: &Expr, _order: EventOrder) -> OptimizeResult {
        OptimizeResult::barrier()
    }

    fn to_spec(&self) -> OpResult<OperatorSpec>;

    fn box_clone(&self) -> Box<dyn Operator>;

    fn as_any(&self) -> &dyn Any;

    /// Whether pushed filters can be absorbed by this operator itself.
    fn accepts_filters(&self) -> bool {
        false
    }

    fn location(&self) -> Location {
        Location::Anywhere
    }
}

impl Clone for Box<dyn Operator> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// Checkpoint state is plain JSON.
pub fn encode_state<T: Serialize>(state: &T) -> OpResult<Vec<u8>> {
    serde_json::to_vec(state).map_err(|e| OpError::Checkpoint(e.to_string()))
}

pub fn decode_state<T: DeserializeOwned>(bytes: &[u8]) -> OpResult<T> {
    serde_json::from_slice(bytes).map_err(|e| OpError::Checkpoint(e.to_string()))
}

/// Shared check for operators that only accept events.
pub(crate) fn expect_events(op: &str, input: ElementType) -> OpResult<ElementType> {
    match input {
        ElementType::Events => Ok(ElementType::Events),
        other => Err(OpError::Type(format!("'{op}' expects events, got {other}"))),
    }
}

/// Shared check for operators that accept events or bytes and preserve it.
pub(crate) fn expect_stream(op: &str, input: ElementType) -> OpResult<ElementType> {
    match input {
        ElementType::Void => Err(OpError::Type(format!(
            "'{op}' expects events or bytes, got void"
        ))),
        other => Ok(other),
    }
}

/// Current wall clock in milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
