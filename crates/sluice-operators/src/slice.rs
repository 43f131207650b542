//! `slice [begin]:[end][:stride]` with Python semantics, plus the sugar that
//! rewrites to it: `head [N]`, `tail [N]`, and `reverse`.
//!
//! Works on events (rows) and bytes (octets). Non-negative bounds with a
//! positive stride stream and stop pulling once `end` is reached; anything
//! that needs the total length (negative bounds, negative stride) buffers the
//! whole input first.

use std::any::Any;
use std::fmt;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use sluice_core::diagnostic::Diagnostic;
use sluice_core::element::{Element, ElementType, EventOrder};
use sluice_core::expr::Expr;
use sluice_core::slice::TableSlice;

use crate::parser::{parse_arg, Located, ParserInterface};
use crate::plan::{OperatorSpec, OptimizeResult, Replacement, Signature};
use crate::registry::{OperatorPlugin, Registry};
use crate::traits::{
    decode_state, encode_state, expect_events, expect_stream, ControlPlane, Generator,
    InstantiateContext, OpError, OpResult, Operator,
};
use crate::transform::{Emitter, Transform, Transformer};

/// Rows taken by `head`/`tail` without an argument.
const DEFAULT_COUNT: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Slice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begin: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stride: Option<i64>,
}

impl Slice {
    pub fn new(begin: Option<i64>, end: Option<i64>, stride: Option<i64>) -> Self {
        Self { begin, end, stride }
    }

    pub fn head(n: i64) -> Self {
        Self::new(None, Some(n), None)
    }

    /// `-0:` would select everything, so an empty tail is an empty head.
    pub fn tail(n: i64) -> Self {
        if n == 0 {
            return Self::head(0);
        }
        Self::new(Some(-n), None, None)
    }

    pub fn reverse() -> Self {
        Self::new(None, None, Some(-1))
    }

    fn stride_value(&self) -> i64 {
        self.stride.unwrap_or(1)
    }

    fn is_full_range(&self) -> bool {
        matches!(self.begin, None | Some(0)) && self.end.is_none()
    }

    fn streams(&self) -> bool {
        self.stride_value() > 0
            && self.begin.map_or(true, |b| b >= 0)
            && self.end.map_or(true, |e| e >= 0)
    }

    /// Selected positions of a sequence of length `n`, in output order.
    pub fn indices(&self, n: usize) -> Vec<usize> {
        let n = n as i64;
        let stride = self.stride_value();
        let norm = |x: i64| if x < 0 { x + n } else { x };
        let mut out = Vec::new();
        if stride > 0 {
            let begin = self.begin.map_or(0, norm).clamp(0, n);
            let end = self.end.map_or(n, norm).clamp(0, n);
            let mut i = begin;
            while i < end {
                out.push(i as usize);
                i += stride;
            }
        } else {
            let begin = self.begin.map_or(n - 1, norm).clamp(-1, n - 1);
            let end = self.end.map_or(-1, |e| norm(e).clamp(-1, n - 1));
            let mut i = begin;
            while i > end {
                out.push(i as usize);
                i += stride;
            }
        }
        out
    }
}

impl fmt::Display for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(b) = self.begin {
            write!(f, "{b}")?;
        }
        write!(f, ":")?;
        if let Some(e) = self.end {
            write!(f, "{e}")?;
        }
        if let Some(s) = self.stride {
            write!(f, ":{s}")?;
        }
        Ok(())
    }
}

impl Operator for Slice {
    fn name(&self) -> &'static str {
        "slice"
    }

    fn infer_type(&self, input: ElementType) -> OpResult<ElementType> {
        expect_stream(self.name(), input)
    }

    fn instantiate(&self, _ctx: &InstantiateContext<'_>) -> OpResult<Box<dyn Generator>> {
        if self.stride == Some(0) {
            return Err(OpError::Plan("slice stride must not be zero".into()));
        }
        if self.streams() {
            Ok(Transformer::boxed(StreamingSlice {
                slice: *self,
                seen: 0,
            }))
        } else {
            Ok(Transformer::boxed(BufferedSlice {
                slice: *self,
                buffer: Vec::new(),
            }))
        }
    }

    fn optimize(&self, filter: &Expr, order: EventOrder) -> OptimizeResult {
        let stride = self.stride_value();
        if self.is_full_range() && stride == 1 {
            return OptimizeResult::transparent(filter, order).with_replacement(Replacement::Remove);
        }
        if self.is_full_range() && stride == -1 {
            if order == EventOrder::Unordered {
                return OptimizeResult::transparent(filter, order)
                    .with_replacement(Replacement::Remove);
            }
            return OptimizeResult::transparent(filter, EventOrder::Ordered);
        }
        OptimizeResult::barrier()
    }

    fn to_spec(&self) -> OpResult<OperatorSpec> {
        OperatorSpec::of(self.name(), self)
    }

    fn box_clone(&self) -> Box<dyn Operator> {
        Box::new(*self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn sub_element(element: &Element, begin: usize, end: usize) -> Element {
    match element {
        Element::Events(s) => Element::Events(s.slice_rows(begin, end)),
        Element::Bytes(b) => Element::Bytes(b.slice(begin.min(b.len())..end.min(b.len()))),
    }
}

fn gather(element: &Element, indices: &[usize]) -> Element {
    match element {
        Element::Events(s) => Element::Events(s.take(indices)),
        Element::Bytes(b) => Element::Bytes(Bytes::from(
            indices.iter().filter_map(|&i| b.get(i).copied()).collect::<Vec<u8>>(),
        )),
    }
}

struct StreamingSlice {
    slice: Slice,
    /// Units (rows or bytes) consumed so far.
    seen: u64,
}

impl Transform for StreamingSlice {
    fn process(
        &mut self,
        element: Element,
        out: &mut Emitter<'_>,
        _ctrl: &mut dyn ControlPlane,
    ) -> OpResult<()> {
        let len = element.len() as u64;
        let first = self.seen;
        self.seen += len;

        let begin = self.slice.begin.unwrap_or(0) as u64;
        let end = self.slice.end.map_or(u64::MAX, |e| e as u64);
        let lo = begin.max(first);
        let hi = end.min(first + len);
        if lo >= hi {
            return Ok(());
        }
        let stride = self.slice.stride_value() as u64;
        if stride == 1 {
            out.push(sub_element(&element, (lo - first) as usize, (hi - first) as usize));
            return Ok(());
        }
        // First global position >= lo on the stride grid anchored at begin.
        let offset = (lo - begin) % stride;
        let start = if offset == 0 { lo } else { lo + stride - offset };
        let local: Vec<usize> = (start..hi)
            .step_by(stride as usize)
            .map(|g| (g - first) as usize)
            .collect();
        if !local.is_empty() {
            out.push(gather(&element, &local));
        }
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.slice.end.is_some_and(|e| self.seen >= e as u64)
    }

    fn snapshot(&self) -> OpResult<Option<Vec<u8>>> {
        encode_state(&self.seen).map(Some)
    }

    fn restore(&mut self, state: &[u8]) -> OpResult<()> {
        self.seen = decode_state(state)?;
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
enum Buffered {
    Events(TableSlice),
    Bytes(Vec<u8>),
}

struct BufferedSlice {
    slice: Slice,
    buffer: Vec<Element>,
}

impl Transform for BufferedSlice {
    fn process(
        &mut self,
        element: Element,
        _out: &mut Emitter<'_>,
        _ctrl: &mut dyn ControlPlane,
    ) -> OpResult<()> {
        if !element.is_empty() {
            self.buffer.push(element);
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut Emitter<'_>, _ctrl: &mut dyn ControlPlane) -> OpResult<()> {
        let total: usize = self.buffer.iter().map(Element::len).sum();
        let selected = self.slice.indices(total);

        // Global position → (element, local index).
        let mut starts = Vec::with_capacity(self.buffer.len());
        let mut acc = 0;
        for e in &self.buffer {
            starts.push(acc);
            acc += e.len();
        }
        let locate = |g: usize| {
            let idx = starts.partition_point(|&s| s <= g) - 1;
            (idx, g - starts[idx])
        };

        if matches!(self.buffer.first(), Some(Element::Bytes(_))) {
            let mut bytes = BytesMut::with_capacity(selected.len());
            for g in selected {
                let (idx, local) = locate(g);
                if let Element::Bytes(b) = &self.buffer[idx] {
                    bytes.extend_from_slice(&b[local..=local]);
                }
            }
            if !bytes.is_empty() {
                out.push(Element::Bytes(bytes.freeze()));
            }
        } else {
            // Consecutive picks from one slice become one output slice.
            let mut run: Option<(usize, Vec<usize>)> = None;
            for g in selected {
                let (idx, local) = locate(g);
                match &mut run {
                    Some((current, picks)) if *current == idx => picks.push(local),
                    _ => {
                        if let Some((current, picks)) = run.take() {
                            out.push(gather(&self.buffer[current], &picks));
                        }
                        run = Some((idx, vec![local]));
                    }
                }
            }
            if let Some((current, picks)) = run {
                out.push(gather(&self.buffer[current], &picks));
            }
        }
        self.buffer.clear();
        Ok(())
    }

    fn snapshot(&self) -> OpResult<Option<Vec<u8>>> {
        let state: Vec<Buffered> = self
            .buffer
            .iter()
            .map(|e| match e {
                Element::Events(s) => Buffered::Events(s.clone()),
                Element::Bytes(b) => Buffered::Bytes(b.to_vec()),
            })
            .collect();
        encode_state(&state).map(Some)
    }

    fn restore(&mut self, state: &[u8]) -> OpResult<()> {
        let state: Vec<Buffered> = decode_state(state)?;
        self.buffer = state
            .into_iter()
            .map(|b| match b {
                Buffered::Events(s) => Element::Events(s),
                Buffered::Bytes(b) => Element::Bytes(Bytes::from(b)),
            })
            .collect();
        Ok(())
    }
}

/// `reverse`: rewrites to `slice ::-1`.
#[derive(Debug, Clone, Default)]
pub struct Reverse;

impl Operator for Reverse {
    fn name(&self) -> &'static str {
        "reverse"
    }

    fn infer_type(&self, input: ElementType) -> OpResult<ElementType> {
        expect_events(self.name(), input)
    }

    fn instantiate(&self, ctx: &InstantiateContext<'_>) -> OpResult<Box<dyn Generator>> {
        Slice::reverse().instantiate(ctx)
    }

    fn optimize(&self, filter: &Expr, order: EventOrder) -> OptimizeResult {
        let mut result = Slice::reverse().optimize(filter, order);
        if !matches!(result.replacement, Replacement::Remove) {
            result.replacement = Replacement::Replace(vec![Box::new(Slice::reverse())]);
        }
        result
    }

    fn to_spec(&self) -> OpResult<OperatorSpec> {
        Ok(OperatorSpec::new(self.name(), serde_json::Value::Null))
    }

    fn box_clone(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn parse_bound(text: &str, arg: &Located<String>) -> Result<Option<i64>, Diagnostic> {
    if text.is_empty() {
        return Ok(None);
    }
    text.parse::<i64>().map(Some).map_err(|_| {
        Diagnostic::error(format!("invalid slice bound '{text}'")).with_location(arg.span)
    })
}

/// Parse `begin:end:stride` where every part is optional.
pub fn parse_slice(arg: &Located<String>) -> Result<Slice, Diagnostic> {
    let parts: Vec<&str> = arg.inner.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err(Diagnostic::error(format!(
            "expected [begin]:[end][:stride], got '{}'",
            arg.inner
        ))
        .with_location(arg.span));
    }
    let slice = Slice::new(
        parse_bound(parts[0], arg)?,
        parse_bound(parts[1], arg)?,
        match parts.get(2) {
            Some(s) => parse_bound(s, arg)?,
            None => None,
        },
    );
    if slice.stride == Some(0) {
        return Err(Diagnostic::error("slice stride must not be zero").with_location(arg.span));
    }
    Ok(slice)
}

pub struct SlicePlugin;

impl OperatorPlugin for SlicePlugin {
    fn name(&self) -> &'static str {
        "slice"
    }

    fn signature(&self) -> Signature {
        Signature::TRANSFORMATION
    }

    fn parse_operator(
        &self,
        parser: &mut dyn ParserInterface,
        _registry: &Registry,
    ) -> Result<Box<dyn Operator>, Diagnostic> {
        let Some(arg) = parser.accept_word() else {
            return Err(parser.error_here("'slice' expects [begin]:[end][:stride]"));
        };
        Ok(Box::new(parse_slice(&arg)?))
    }

    fn from_spec(
        &self,
        args: &serde_json::Value,
        _registry: &Registry,
    ) -> OpResult<Box<dyn Operator>> {
        let spec = OperatorSpec::new(self.name(), args.clone());
        let slice = spec.parse_args::<Slice>()?;
        if slice.stride == Some(0) {
            return Err(OpError::Plan("slice stride must not be zero".into()));
        }
        Ok(Box::new(slice))
    }
}

fn parse_count(parser: &mut dyn ParserInterface) -> Result<i64, Diagnostic> {
    match parser.accept_word() {
        Some(word) => {
            let n: i64 = parse_arg(&word, "count")?;
            if n < 0 {
                return Err(Diagnostic::error("count must not be negative").with_location(word.span));
            }
            Ok(n)
        }
        None => Ok(DEFAULT_COUNT),
    }
}

/// Accepts a bare number or `{"count": N}`.
fn count_from_spec(args: &serde_json::Value) -> i64 {
    args.as_i64()
        .or_else(|| args.get("count").and_then(serde_json::Value::as_i64))
        .unwrap_or(DEFAULT_COUNT)
}

/// `head [N]` parses straight to `slice :N`.
pub struct HeadPlugin;

impl OperatorPlugin for HeadPlugin {
    fn name(&self) -> &'static str {
        "head"
    }

    fn signature(&self) -> Signature {
        Signature::TRANSFORMATION
    }

    fn parse_operator(
        &self,
        parser: &mut dyn ParserInterface,
        _registry: &Registry,
    ) -> Result<Box<dyn Operator>, Diagnostic> {
        Ok(Box::new(Slice::head(parse_count(parser)?)))
    }

    fn from_spec(
        &self,
        args: &serde_json::Value,
        _registry: &Registry,
    ) -> OpResult<Box<dyn Operator>> {
        let n = count_from_spec(args);
        Ok(Box::new(Slice::head(n)))
    }
}

/// `tail [N]` parses straight to `slice -N:`.
pub struct TailPlugin;

impl OperatorPlugin for TailPlugin {
    fn name(&self) -> &'static str {
        "tail"
    }

    fn signature(&self) -> Signature {
        Signature::TRANSFORMATION
    }

    fn parse_operator(
        &self,
        parser: &mut dyn ParserInterface,
        _registry: &Registry,
    ) -> Result<Box<dyn Operator>, Diagnostic> {
        Ok(Box::new(Slice::tail(parse_count(parser)?)))
    }

    fn from_spec(
        &self,
        args: &serde_json::Value,
        _registry: &Registry,
    ) -> OpResult<Box<dyn Operator>> {
        let n = count_from_spec(args);
        Ok(Box::new(Slice::tail(n)))
    }
}

pub struct ReversePlugin;

impl OperatorPlugin for ReversePlugin {
    fn name(&self) -> &'static str {
        "reverse"
    }

    fn signature(&self) -> Signature {
        Signature::TRANSFORMATION
    }

    fn parse_operator(
        &self,
        _parser: &mut dyn ParserInterface,
        _registry: &Registry,
    ) -> Result<Box<dyn Operator>, Diagnostic> {
        Ok(Box::new(Reverse))
    }

    fn from_spec(
        &self,
        _args: &serde_json::Value,
        _registry: &Registry,
    ) -> OpResult<Box<dyn Operator>> {
        Ok(Box::new(Reverse))
    }
}
