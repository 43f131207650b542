//! Plugin registry: names → operator, format, and connector plugins.
//!
//! The registry is an ordinary value. Build it once (usually with
//! [`Registry::builtin`]), wrap it in an `Arc`, and hand it to whatever parses
//! or deserializes pipelines. Nothing here is global.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;

use sluice_core::diagnostic::Diagnostic;
use sluice_core::slice::TableSlice;

use crate::parser::ParserInterface;
use crate::plan::{OperatorSpec, Signature};
use crate::traits::{OpError, OpResult, Operator};

pub trait OperatorPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn signature(&self) -> Signature;

    /// Build an operator from pipeline text. The operator name has already
    /// been consumed. Malformed arguments produce a located diagnostic.
    fn parse_operator(
        &self,
        parser: &mut dyn ParserInterface,
        registry: &Registry,
    ) -> Result<Box<dyn Operator>, Diagnostic>;

    /// Build an operator from the `args` of its [`OperatorSpec`].
    fn from_spec(&self, args: &serde_json::Value, registry: &Registry)
        -> OpResult<Box<dyn Operator>>;
}

/// Output of one format-parser step.
#[derive(Debug, Default)]
pub struct ParsedChunk {
    pub slices: Vec<TableSlice>,
    pub warnings: Vec<Diagnostic>,
}

/// Incremental bytes → events conversion.
pub trait FormatParser: Send {
    fn push(&mut self, chunk: &[u8]) -> OpResult<ParsedChunk>;

    fn finish(&mut self) -> OpResult<ParsedChunk>;

    fn snapshot(&self) -> OpResult<Vec<u8>>;

    fn restore(&mut self, state: &[u8]) -> OpResult<()>;
}

/// Events → bytes conversion.
pub trait FormatPrinter: Send {
    fn print(&mut self, slice: &TableSlice) -> OpResult<Bytes>;
}

pub trait FormatPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn make_parser(&self, batch_size: usize) -> Box<dyn FormatParser>;

    fn make_printer(&self) -> Box<dyn FormatPrinter>;
}

/// Loader/saver pair for one kind of location (`load <name> ...`,
/// `save <name> ...`).
pub trait ConnectorPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn parse_loader(&self, parser: &mut dyn ParserInterface)
        -> Result<Box<dyn Operator>, Diagnostic>;

    fn parse_saver(&self, parser: &mut dyn ParserInterface)
        -> Result<Box<dyn Operator>, Diagnostic>;

    fn loader_from_spec(&self, args: &serde_json::Value) -> OpResult<Box<dyn Operator>>;

    fn saver_from_spec(&self, args: &serde_json::Value) -> OpResult<Box<dyn Operator>>;
}

#[derive(Default, Clone)]
pub struct Registry {
    operators: BTreeMap<&'static str, Arc<dyn OperatorPlugin>>,
    formats: BTreeMap<&'static str, Arc<dyn FormatPlugin>>,
    connectors: BTreeMap<&'static str, Arc<dyn ConnectorPlugin>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("operators", &self.operators.keys().collect::<Vec<_>>())
            .field("formats", &self.formats.keys().collect::<Vec<_>>())
            .field("connectors", &self.connectors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in plugin.
    pub fn builtin() -> Self {
        let mut r = Self::new();
        crate::register_builtins(&mut r);
        r
    }

    /// Register an operator plugin. Names must be unique.
    pub fn register_operator(&mut self, plugin: Arc<dyn OperatorPlugin>) -> OpResult<()> {
        let name = plugin.name();
        if self.operators.contains_key(name) {
            return Err(OpError::Plan(format!("operator '{name}' registered twice")));
        }
        self.operators.insert(name, plugin);
        Ok(())
    }

    pub fn register_format(&mut self, plugin: Arc<dyn FormatPlugin>) -> OpResult<()> {
        let name = plugin.name();
        if self.formats.contains_key(name) {
            return Err(OpError::Plan(format!("format '{name}' registered twice")));
        }
        self.formats.insert(name, plugin);
        Ok(())
    }

    pub fn register_connector(&mut self, plugin: Arc<dyn ConnectorPlugin>) -> OpResult<()> {
        let name = plugin.name();
        if self.connectors.contains_key(name) {
            return Err(OpError::Plan(format!("connector '{name}' registered twice")));
        }
        self.connectors.insert(name, plugin);
        Ok(())
    }

    pub fn operator(&self, name: &str) -> Option<&dyn OperatorPlugin> {
        self.operators.get(name).map(|p| p.as_ref())
    }

    pub fn format(&self, name: &str) -> Option<Arc<dyn FormatPlugin>> {
        self.formats.get(name).cloned()
    }

    pub fn connector(&self, name: &str) -> Option<Arc<dyn ConnectorPlugin>> {
        self.connectors.get(name).cloned()
    }

    /// Registered operator names, sorted.
    pub fn operator_names(&self) -> Vec<&'static str> {
        self.operators.keys().copied().collect()
    }

    pub fn format_names(&self) -> Vec<&'static str> {
        self.formats.keys().copied().collect()
    }

    pub fn connector_names(&self) -> Vec<&'static str> {
        self.connectors.keys().copied().collect()
    }

    /// Rebuild an operator from its serialized form.
    pub fn from_spec(&self, spec: &OperatorSpec) -> OpResult<Box<dyn Operator>> {
        let plugin = self
            .operator(&spec.name)
            .ok_or_else(|| OpError::Plan(format!("unknown operator '{}'", spec.name)))?;
        plugin.from_spec(&spec.args, self)
    }

    /// Look up a format, reporting unknown names at `parser`'s position.
    pub fn format_or_diagnostic(
        &self,
        name: &crate::parser::Located<String>,
    ) -> Result<Arc<dyn FormatPlugin>, Diagnostic> {
        self.format(&name.inner).ok_or_else(|| {
            Diagnostic::error(format!("unknown format '{}'", name.inner))
                .with_location(name.span)
                .with_note(format!("available formats: {}", self.format_names().join(", ")))
        })
    }

    pub fn connector_or_diagnostic(
        &self,
        name: &crate::parser::Located<String>,
    ) -> Result<Arc<dyn ConnectorPlugin>, Diagnostic> {
        self.connector(&name.inner).ok_or_else(|| {
            Diagnostic::error(format!("unknown connector '{}'", name.inner))
                .with_location(name.span)
                .with_note(format!(
                    "available connectors: {}",
                    self.connector_names().join(", ")
                ))
        })
    }
}
