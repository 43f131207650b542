#![forbid(unsafe_code)]
//! sluice-operators: the operator contract, the plugin registry, the pipeline
//! text parser, and every built-in operator.
//!
//! Design intent:
//! - Operators are immutable descriptions. `instantiate` turns one into a
//!   resumable [`Generator`] that a stage drives; all per-run state lives there.
//! - Generators never block. External requests are spawned through the
//!   [`ControlPlane`] and answered through the wait protocol.
//! - Every operator serializes to an [`OperatorSpec`] and back through the
//!   plugin registered under its name.

pub mod parser;
pub mod plan;
pub mod registry;
pub mod traits;
pub mod transform;

pub mod aggregate;
pub mod basic;
pub mod dedup;
pub mod file;
pub mod filter;
pub mod format;
pub mod project;
pub mod slice;
pub mod sort;
pub mod source;

#[cfg(test)]
mod testing;

use std::sync::Arc;

pub use parser::{parse_pipeline, ArgParser, Located, ParserInterface};
pub use plan::{OperatorSpec, OptimizeResult, Replacement, Signature};
pub use registry::{
    ConnectorPlugin, FormatParser, FormatPlugin, FormatPrinter, OperatorPlugin, ParsedChunk,
    Registry,
};
pub use traits::{
    ControlPlane, Generator, Input, InstantiateContext, Location, NoInput, OpError, OpResult,
    Operator, Pull, Resume,
};
pub use transform::{Emitter, Transform, Transformer};

/// Fill `registry` with the built-in operators, formats, and connectors.
pub(crate) fn register_builtins(registry: &mut Registry) {
    let operators: Vec<Arc<dyn OperatorPlugin>> = vec![
        Arc::new(source::RowsPlugin),
        Arc::new(file::LoadPlugin),
        Arc::new(file::FromPlugin),
        Arc::new(file::SavePlugin),
        Arc::new(file::ToPlugin),
        Arc::new(format::ReadPlugin),
        Arc::new(format::WritePlugin::write()),
        Arc::new(format::WritePlugin::print()),
        Arc::new(basic::PassPlugin),
        Arc::new(basic::DiscardPlugin),
        Arc::new(basic::UnorderedPlugin),
        Arc::new(basic::BatchPlugin),
        Arc::new(filter::WherePlugin),
        Arc::new(project::SelectPlugin),
        Arc::new(project::DropPlugin),
        Arc::new(slice::SlicePlugin),
        Arc::new(slice::HeadPlugin),
        Arc::new(slice::TailPlugin),
        Arc::new(slice::ReversePlugin),
        Arc::new(dedup::DeduplicatePlugin),
        Arc::new(dedup::UniquePlugin),
        Arc::new(sort::SortPlugin),
        Arc::new(aggregate::CountPlugin),
    ];
    // Built-in names are distinct, so registration cannot fail.
    for plugin in operators {
        let _ = registry.register_operator(plugin);
    }
    let _ = registry.register_format(Arc::new(format::JsonFormat));
    let _ = registry.register_connector(Arc::new(file::FileConnector));
}
