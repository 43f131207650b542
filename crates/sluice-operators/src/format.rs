//! Formats and the operators that apply them: `read <format>` turns bytes
//! into events, `write <format>` (alias `print`) turns events into bytes.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use sluice_core::diagnostic::Diagnostic;
use sluice_core::element::{Element, ElementType};
use sluice_core::slice::TableSlice;
use sluice_io::json::{JsonLinesParser, JsonLinesPrinter};

use crate::parser::ParserInterface;
use crate::plan::{OperatorSpec, Signature};
use crate::registry::{
    FormatParser, FormatPlugin, FormatPrinter, OperatorPlugin, ParsedChunk, Registry,
};
use crate::traits::{
    decode_state, encode_state, ControlPlane, Generator, InstantiateContext, OpError, OpResult,
    Operator,
};
use crate::transform::{Emitter, Transform, Transformer};

/// Format used when `read`/`write` name none.
pub const DEFAULT_FORMAT: &str = "json";

/// Newline-delimited JSON objects.
pub struct JsonFormat;

impl FormatPlugin for JsonFormat {
    fn name(&self) -> &'static str {
        "json"
    }

    fn make_parser(&self, batch_size: usize) -> Box<dyn FormatParser> {
        Box::new(JsonParser {
            batch_size,
            inner: JsonLinesParser::new(batch_size),
        })
    }

    fn make_printer(&self) -> Box<dyn FormatPrinter> {
        Box::new(JsonPrinter(JsonLinesPrinter))
    }
}

#[derive(Serialize, Deserialize)]
struct JsonParserState {
    line: u64,
    pending: Vec<u8>,
}

struct JsonParser {
    batch_size: usize,
    inner: JsonLinesParser,
}

impl FormatParser for JsonParser {
    fn push(&mut self, chunk: &[u8]) -> OpResult<ParsedChunk> {
        let parsed = self.inner.push(chunk)?;
        Ok(ParsedChunk {
            slices: parsed.slices,
            warnings: parsed.warnings,
        })
    }

    fn finish(&mut self) -> OpResult<ParsedChunk> {
        let parsed = self.inner.finish()?;
        Ok(ParsedChunk {
            slices: parsed.slices,
            warnings: parsed.warnings,
        })
    }

    fn snapshot(&self) -> OpResult<Vec<u8>> {
        encode_state(&JsonParserState {
            line: self.inner.lines(),
            pending: self.inner.pending().to_vec(),
        })
    }

    fn restore(&mut self, state: &[u8]) -> OpResult<()> {
        let state: JsonParserState = decode_state(state)?;
        self.inner = JsonLinesParser::resume(self.batch_size, state.line, state.pending);
        Ok(())
    }
}

struct JsonPrinter(JsonLinesPrinter);

impl FormatPrinter for JsonPrinter {
    fn print(&mut self, slice: &TableSlice) -> OpResult<Bytes> {
        Ok(self.0.print(slice)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FormatArgs {
    format: String,
}

/// Resolve a format argument, falling back to [`DEFAULT_FORMAT`].
fn parse_format(
    parser: &mut dyn ParserInterface,
    registry: &Registry,
) -> Result<Arc<dyn FormatPlugin>, Diagnostic> {
    match parser.accept_word() {
        Some(name) => registry.format_or_diagnostic(&name),
        None => registry
            .format(DEFAULT_FORMAT)
            .ok_or_else(|| parser.error_here("expected a format name")),
    }
}

fn format_from_spec(args: &serde_json::Value, registry: &Registry) -> OpResult<Arc<dyn FormatPlugin>> {
    let args: FormatArgs = if args.is_null() {
        FormatArgs {
            format: DEFAULT_FORMAT.to_string(),
        }
    } else {
        serde_json::from_value(args.clone())
            .map_err(|e| OpError::Plan(format!("invalid format arguments: {e}")))?
    };
    registry
        .format(&args.format)
        .ok_or_else(|| OpError::Plan(format!("unknown format '{}'", args.format)))
}

/// `read <format>`: bytes → events.
#[derive(Clone)]
pub struct Read {
    format: Arc<dyn FormatPlugin>,
}

impl Read {
    pub fn new(format: Arc<dyn FormatPlugin>) -> Self {
        Self { format }
    }

    pub fn format_name(&self) -> &'static str {
        self.format.name()
    }
}

impl fmt::Debug for Read {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Read").field("format", &self.format.name()).finish()
    }
}

impl Operator for Read {
    fn name(&self) -> &'static str {
        "read"
    }

    fn infer_type(&self, input: ElementType) -> OpResult<ElementType> {
        match input {
            ElementType::Bytes => Ok(ElementType::Events),
            other => Err(OpError::Type(format!("'read' expects bytes, got {other}"))),
        }
    }

    fn instantiate(&self, ctx: &InstantiateContext<'_>) -> OpResult<Box<dyn Generator>> {
        Ok(Transformer::boxed(Decoder {
            parser: self.format.make_parser(ctx.config.default_batch_size.max(1)),
        }))
    }

    fn to_spec(&self) -> OpResult<OperatorSpec> {
        OperatorSpec::of(
            self.name(),
            &FormatArgs {
                format: self.format.name().to_string(),
            },
        )
    }

    fn box_clone(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct Decoder {
    parser: Box<dyn FormatParser>,
}

impl Decoder {
    fn emit(parsed: ParsedChunk, out: &mut Emitter<'_>, ctrl: &mut dyn ControlPlane) {
        for warning in parsed.warnings {
            ctrl.emit(warning);
        }
        for slice in parsed.slices {
            out.push(slice);
        }
    }
}

impl Transform for Decoder {
    fn process(
        &mut self,
        element: Element,
        out: &mut Emitter<'_>,
        ctrl: &mut dyn ControlPlane,
    ) -> OpResult<()> {
        let Element::Bytes(chunk) = element else {
            return Err(OpError::Type("'read' received events".into()));
        };
        let parsed = self.parser.push(&chunk)?;
        Self::emit(parsed, out, ctrl);
        Ok(())
    }

    fn finish(&mut self, out: &mut Emitter<'_>, ctrl: &mut dyn ControlPlane) -> OpResult<()> {
        let parsed = self.parser.finish()?;
        Self::emit(parsed, out, ctrl);
        Ok(())
    }

    fn snapshot(&self) -> OpResult<Option<Vec<u8>>> {
        self.parser.snapshot().map(Some)
    }

    fn restore(&mut self, state: &[u8]) -> OpResult<()> {
        self.parser.restore(state)
    }
}

/// `write <format>`: events → bytes.
#[derive(Clone)]
pub struct Write {
    format: Arc<dyn FormatPlugin>,
}

impl Write {
    pub fn new(format: Arc<dyn FormatPlugin>) -> Self {
        Self { format }
    }

    pub fn format_name(&self) -> &'static str {
        self.format.name()
    }
}

impl fmt::Debug for Write {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Write").field("format", &self.format.name()).finish()
    }
}

impl Operator for Write {
    fn name(&self) -> &'static str {
        "write"
    }

    fn infer_type(&self, input: ElementType) -> OpResult<ElementType> {
        match input {
            ElementType::Events => Ok(ElementType::Bytes),
            other => Err(OpError::Type(format!("'write' expects events, got {other}"))),
        }
    }

    fn instantiate(&self, _ctx: &InstantiateContext<'_>) -> OpResult<Box<dyn Generator>> {
        Ok(Transformer::boxed(Encoder {
            printer: self.format.make_printer(),
        }))
    }

    fn to_spec(&self) -> OpResult<OperatorSpec> {
        OperatorSpec::of(
            self.name(),
            &FormatArgs {
                format: self.format.name().to_string(),
            },
        )
    }

    fn box_clone(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct Encoder {
    printer: Box<dyn FormatPrinter>,
}

impl Transform for Encoder {
    fn process(
        &mut self,
        element: Element,
        out: &mut Emitter<'_>,
        _ctrl: &mut dyn ControlPlane,
    ) -> OpResult<()> {
        let Element::Events(slice) = element else {
            return Err(OpError::Type("'write' received bytes".into()));
        };
        out.push(self.printer.print(&slice)?);
        Ok(())
    }
}

pub struct ReadPlugin;

impl OperatorPlugin for ReadPlugin {
    fn name(&self) -> &'static str {
        "read"
    }

    fn signature(&self) -> Signature {
        Signature::TRANSFORMATION
    }

    fn parse_operator(
        &self,
        parser: &mut dyn ParserInterface,
        registry: &Registry,
    ) -> Result<Box<dyn Operator>, Diagnostic> {
        Ok(Box::new(Read::new(parse_format(parser, registry)?)))
    }

    fn from_spec(
        &self,
        args: &serde_json::Value,
        registry: &Registry,
    ) -> OpResult<Box<dyn Operator>> {
        Ok(Box::new(Read::new(format_from_spec(args, registry)?)))
    }
}

/// Handles both `write` and its alias `print`.
pub struct WritePlugin {
    name: &'static str,
}

impl WritePlugin {
    pub fn write() -> Self {
        Self { name: "write" }
    }

    pub fn print() -> Self {
        Self { name: "print" }
    }
}

impl OperatorPlugin for WritePlugin {
    fn name(&self) -> &'static str {
        self.name
    }

    fn signature(&self) -> Signature {
        Signature::TRANSFORMATION
    }

    fn parse_operator(
        &self,
        parser: &mut dyn ParserInterface,
        registry: &Registry,
    ) -> Result<Box<dyn Operator>, Diagnostic> {
        Ok(Box::new(Write::new(parse_format(parser, registry)?)))
    }

    fn from_spec(
        &self,
        args: &serde_json::Value,
        registry: &Registry,
    ) -> OpResult<Box<dyn Operator>> {
        Ok(Box::new(Write::new(format_from_spec(args, registry)?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ArgParser;
    use crate::testing::{events, rows_of, run_op};
    use serde_json::json;
    use sluice_core::diagnostic::Severity;

    fn registry() -> Registry {
        Registry::builtin()
    }

    #[test]
    fn read_parses_chunks_split_mid_line() {
        let read = Read::new(Arc::new(JsonFormat));
        let chunks = vec![
            Element::Bytes(Bytes::from_static(b"{\"a\": 1}\n{\"a\"")),
            Element::Bytes(Bytes::from_static(b": 2}\nnot json\n{\"a\": 3}")),
        ];
        let (out, diags) = run_op(&read, ElementType::Bytes, chunks).unwrap();
        assert_eq!(
            rows_of(&out),
            vec![json!({"a": 1}), json!({"a": 2}), json!({"a": 3})]
        );
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, Severity::Warning);
        assert!(diags[0].message.contains("line 3"));
    }

    #[test]
    fn write_renders_json_lines() {
        let write = Write::new(Arc::new(JsonFormat));
        let (out, _) = run_op(
            &write,
            ElementType::Events,
            vec![events(json!([{"a": 1}, {"a": 2}]))],
        )
        .unwrap();
        assert_eq!(out, vec![Element::Bytes(Bytes::from_static(b"{\"a\":1}\n{\"a\":2}\n"))]);
    }

    #[test]
    fn parser_snapshot_keeps_partial_line() {
        let mut parser = JsonFormat.make_parser(16);
        parser.push(b"{\"a\": 1}\n{\"a\": ").unwrap();
        let state = parser.snapshot().unwrap();

        let mut resumed = JsonFormat.make_parser(16);
        resumed.restore(&state).unwrap();
        let parsed = resumed.push(b"2}\n").unwrap();
        assert_eq!(parsed.slices[0].to_json_rows(), vec![json!({"a": 2})]);
    }

    #[test]
    fn parse_defaults_and_unknown_formats() {
        let r = registry();
        let mut p = ArgParser::new("");
        let op = ReadPlugin.parse_operator(&mut p, &r).unwrap();
        assert_eq!(op.to_spec().unwrap().args, json!({"format": "json"}));

        let mut p = ArgParser::new("csv");
        let diag = WritePlugin::print().parse_operator(&mut p, &r).unwrap_err();
        assert!(diag.message.contains("unknown format 'csv'"));
        assert!(diag.notes[0].contains("json"));
    }
}
