//! JSON-lines parsing and printing.
//!
//! One JSON object per line. Lines that fail to parse, or parse to something
//! other than an object, are reported as warnings and skipped; they never
//! abort the stream.

use bytes::{BufMut, Bytes, BytesMut};

use sluice_core::diagnostic::Diagnostic;
use sluice_core::slice::TableSlice;
use sluice_core::types::Value;

use crate::error::{Error, Result};

/// Schema name given to slices inferred from JSON lines.
pub const JSON_SCHEMA: &str = "json";

/// Output of one parser step.
#[derive(Debug, Default)]
pub struct Parsed {
    pub slices: Vec<TableSlice>,
    pub warnings: Vec<Diagnostic>,
}

/// Incremental parser: accepts arbitrary byte chunks and yields slices for
/// every complete line seen so far.
#[derive(Debug)]
pub struct JsonLinesParser {
    pending: Vec<u8>,
    batch_size: usize,
    line: u64,
}

impl JsonLinesParser {
    pub fn new(batch_size: usize) -> Self {
        Self {
            pending: Vec::new(),
            batch_size: batch_size.max(1),
            line: 0,
        }
    }

    /// Lines consumed so far, including skipped ones.
    pub fn lines(&self) -> u64 {
        self.line
    }

    /// Bytes of an unterminated trailing line.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Restore a parser from a previous [`lines`](Self::lines) count and
    /// pending tail.
    pub fn resume(batch_size: usize, line: u64, pending: Vec<u8>) -> Self {
        Self {
            pending,
            batch_size: batch_size.max(1),
            line,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<Parsed> {
        self.pending.extend_from_slice(chunk);
        let Some(last_newline) = self.pending.iter().rposition(|b| *b == b'\n') else {
            return Ok(Parsed::default());
        };
        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);
        self.parse_lines(&complete)
    }

    /// Flush the trailing line, if it lacks a final newline.
    pub fn finish(&mut self) -> Result<Parsed> {
        let tail = std::mem::take(&mut self.pending);
        self.parse_lines(&tail)
    }

    fn parse_lines(&mut self, buf: &[u8]) -> Result<Parsed> {
        let mut records = Vec::new();
        let mut warnings = Vec::new();

        if buf.is_empty() {
            return Ok(Parsed::default());
        }
        let body = buf.strip_suffix(b"\n").unwrap_or(buf);
        for raw in body.split(|b| *b == b'\n') {
            self.line += 1;
            let line = raw.strip_suffix(b"\r").unwrap_or(raw);
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<serde_json::Value>(line) {
                Ok(serde_json::Value::Object(obj)) => records.push(
                    obj.iter()
                        .map(|(k, v)| (k.clone(), Value::from_json(v)))
                        .collect::<Vec<_>>(),
                ),
                Ok(other) => warnings.push(
                    Diagnostic::warning(format!("line {}: expected a JSON object", self.line))
                        .with_note(format!("found {}", kind_of(&other))),
                ),
                Err(e) => warnings.push(
                    Diagnostic::warning(format!("line {}: malformed JSON", self.line))
                        .with_note(e.to_string()),
                ),
            }
        }

        let mut slices = Vec::new();
        for chunk in records.chunks(self.batch_size) {
            let parsed = TableSlice::from_records(JSON_SCHEMA, chunk.to_vec())
                .map_err(|e| Error::Serde(e.to_string()))?;
            slices.extend(parsed);
        }
        Ok(Parsed { slices, warnings })
    }
}

fn kind_of(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Renders slices as newline-terminated JSON objects.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLinesPrinter;

impl JsonLinesPrinter {
    pub fn print(&self, slice: &TableSlice) -> Result<Bytes> {
        let mut out = BytesMut::new().writer();
        for row in slice.to_json_rows() {
            serde_json::to_writer(&mut out, &row)?;
            out.get_mut().put_u8(b'\n');
        }
        Ok(out.into_inner().freeze())
    }
}
