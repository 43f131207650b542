//! Convenient re-exports for downstream crates.

pub use crate::config::{Codec, EngineConfig};
pub use crate::diagnostic::{CollectingSink, Diagnostic, DiagnosticSink, Severity, Span};
pub use crate::element::{Element, ElementType, EventOrder};
pub use crate::error::{Error, Result};
pub use crate::expr::{CmpOp, Expr};
pub use crate::hash::Hash256;
pub use crate::id::{CheckpointSeq, PipelineRunId, StageId};
pub use crate::manifest::{EdgeStats, ManifestId, RunManifest};
pub use crate::schema::Schema;
pub use crate::slice::TableSlice;
pub use crate::types::{DataType, Field, Value};
