//! Small structural operators: `pass`, `unordered`, `discard`, `batch`.

use std::any::Any;

use serde::{Deserialize, Serialize};

use sluice_core::diagnostic::Diagnostic;
use sluice_core::element::{Element, ElementType, EventOrder};
use sluice_core::expr::Expr;
use sluice_core::slice::TableSlice;

use crate::parser::{parse_arg, ParserInterface};
use crate::plan::{OperatorSpec, OptimizeResult, Replacement, Signature};
use crate::registry::{OperatorPlugin, Registry};
use crate::traits::{
    decode_state, encode_state, expect_events, expect_stream, ControlPlane, Generator,
    InstantiateContext, OpError, OpResult, Operator,
};
use crate::transform::{Emitter, Transform, Transformer};

/// Forwards every element unchanged.
struct Identity;

impl Transform for Identity {
    fn process(
        &mut self,
        element: Element,
        out: &mut Emitter<'_>,
        _ctrl: &mut dyn ControlPlane,
    ) -> OpResult<()> {
        out.push(element);
        Ok(())
    }
}

/// Identity on events or bytes. The optimizer removes it.
#[derive(Debug, Clone, Default)]
pub struct Pass;

impl Operator for Pass {
    fn name(&self) -> &'static str {
        "pass"
    }

    fn infer_type(&self, input: ElementType) -> OpResult<ElementType> {
        expect_stream(self.name(), input)
    }

    fn instantiate(&self, _ctx: &InstantiateContext<'_>) -> OpResult<Box<dyn Generator>> {
        Ok(Transformer::boxed(Identity))
    }

    fn optimize(&self, filter: &Expr, order: EventOrder) -> OptimizeResult {
        OptimizeResult::transparent(filter, order).with_replacement(Replacement::Remove)
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

/// Declares that nothing downstream depends on row order.
#[derive(Debug, Clone, Default)]
pub struct Unordered;

impl Operator for Unordered {
    fn name(&self) -> &'static str {
        "unordered"
    }

    fn infer_type(&self, input: ElementType) -> OpResult<ElementType> {
        expect_events(self.name(), input)
    }

    fn instantiate(&self, _ctx: &InstantiateContext<'_>) -> OpResult<Box<dyn Generator>> {
        Ok(Transformer::boxed(Identity))
    }

    fn optimize(&self, filter: &Expr, _order: EventOrder) -> OptimizeResult {
        OptimizeResult::transparent(filter, EventOrder::Unordered)
            .with_replacement(Replacement::Remove)
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

struct Swallow;

impl Transform for Swallow {
    fn process(
        &mut self,
        _element: Element,
        _out: &mut Emitter<'_>,
        _ctrl: &mut dyn ControlPlane,
    ) -> OpResult<()> {
        Ok(())
    }
}

/// Sink that consumes and drops everything.
#[derive(Debug, Clone, Default)]
pub struct Discard;

impl Operator for Discard {
    fn name(&self) -> &'static str {
        "discard"
    }

    fn infer_type(&self, input: ElementType) -> OpResult<ElementType> {
        expect_stream(self.name(), input).map(|_| ElementType::Void)
    }

    fn instantiate(&self, _ctx: &InstantiateContext<'_>) -> OpResult<Box<dyn Generator>> {
        Ok(Transformer::boxed(Swallow))
    }

    fn optimize(&self, filter: &Expr, _order: EventOrder) -> OptimizeResult {
        OptimizeResult::transparent(filter, EventOrder::Unordered)
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

/// Re-slices events into batches of `size` rows. A schema change or the end
/// of input flushes a short batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
}

impl Operator for Batch {
    fn name(&self) -> &'static str {
        "batch"
    }

    fn infer_type(&self, input: ElementType) -> OpResult<ElementType> {
        expect_events(self.name(), input)
    }

    fn instantiate(&self, ctx: &InstantiateContext<'_>) -> OpResult<Box<dyn Generator>> {
        let size = self.size.unwrap_or(ctx.config.default_batch_size).max(1);
        Ok(Transformer::boxed(Batcher {
            size,
            buffer: Vec::new(),
            buffered: 0,
        }))
    }

    fn optimize(&self, filter: &Expr, order: EventOrder) -> OptimizeResult {
        OptimizeResult::transparent(filter, order)
    }

    fn to_spec(&self) -> OpResult<OperatorSpec> {
        OperatorSpec::of(self.name(), self)
    }

    fn box_clone(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct Batcher {
    size: usize,
    buffer: Vec<TableSlice>,
    buffered: usize,
}

impl Batcher {
    fn flush(&mut self, out: &mut Emitter<'_>) -> OpResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let merged = TableSlice::concat(&self.buffer)?;
        self.buffer.clear();
        self.buffered = 0;
        for part in merged.split(self.size) {
            if part.rows() == self.size {
                out.push(part);
            } else {
                self.buffered = part.rows();
                self.buffer.push(part);
            }
        }
        Ok(())
    }
}

impl Transform for Batcher {
    fn process(
        &mut self,
        element: Element,
        out: &mut Emitter<'_>,
        _ctrl: &mut dyn ControlPlane,
    ) -> OpResult<()> {
        let Element::Events(slice) = element else {
            return Err(OpError::Type("'batch' received bytes".into()));
        };
        if let Some(first) = self.buffer.first() {
            if first.schema() != slice.schema() {
                let pending = TableSlice::concat(&self.buffer)?;
                self.buffer.clear();
                self.buffered = 0;
                out.push(pending);
            }
        }
        self.buffered += slice.rows();
        self.buffer.push(slice);
        if self.buffered >= self.size {
            self.flush(out)?;
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut Emitter<'_>, _ctrl: &mut dyn ControlPlane) -> OpResult<()> {
        if !self.buffer.is_empty() {
            out.push(TableSlice::concat(&self.buffer)?);
            self.buffer.clear();
            self.buffered = 0;
        }
        Ok(())
    }

    fn snapshot(&self) -> OpResult<Option<Vec<u8>>> {
        encode_state(&self.buffer).map(Some)
    }

    fn restore(&mut self, state: &[u8]) -> OpResult<()> {
        self.buffer = decode_state(state)?;
        self.buffered = self.buffer.iter().map(TableSlice::rows).sum();
        Ok(())
    }
}

macro_rules! unit_plugin {
    ($plugin:ident, $name:literal, $sig:expr, $op:expr) => {
        pub struct $plugin;

        impl OperatorPlugin for $plugin {
            fn name(&self) -> &'static str {
                $name
            }

            fn signature(&self) -> Signature {
                $sig
            }

            fn parse_operator(
                &self,
                _parser: &mut dyn ParserInterface,
                _registry: &Registry,
            ) -> Result<Box<dyn Operator>, Diagnostic> {
                Ok(Box::new($op))
            }

            fn from_spec(
                &self,
                _args: &serde_json::Value,
                _registry: &Registry,
            ) -> OpResult<Box<dyn Operator>> {
                Ok(Box::new($op))
            }
        }
    };
}

unit_plugin!(PassPlugin, "pass", Signature::TRANSFORMATION, Pass);
unit_plugin!(UnorderedPlugin, "unordered", Signature::TRANSFORMATION, Unordered);
unit_plugin!(DiscardPlugin, "discard", Signature::SINK, Discard);

pub struct BatchPlugin;

impl OperatorPlugin for BatchPlugin {
    fn name(&self) -> &'static str {
        "batch"
    }

    fn signature(&self) -> Signature {
        Signature::TRANSFORMATION
    }

    fn parse_operator(
        &self,
        parser: &mut dyn ParserInterface,
        _registry: &Registry,
    ) -> Result<Box<dyn Operator>, Diagnostic> {
        let size = match parser.accept_word() {
            Some(word) => {
                let n: usize = parse_arg(&word, "batch size")?;
                if n == 0 {
                    return Err(
                        Diagnostic::error("batch size must be positive").with_location(word.span)
                    );
                }
                Some(n)
            }
            None => None,
        };
        Ok(Box::new(Batch { size }))
    }

    fn from_spec(
        &self,
        args: &serde_json::Value,
        _registry: &Registry,
    ) -> OpResult<Box<dyn Operator>> {
        let spec = OperatorSpec::new(self.name(), args.clone());
        Ok(Box::new(spec.parse_args::<Batch>()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{events, rows_of, run_op};
    use bytes::Bytes;
    use serde_json::json;

    #[test]
    fn pass_is_identity_for_events_and_bytes() {
        let input = vec![
            events(json!([{"a": 1}, {"a": 2}])),
            events(json!([{"b": "x"}])),
        ];
        let (out, _) = run_op(&Pass, ElementType::Events, input.clone()).unwrap();
        assert_eq!(out, input);

        let chunks = vec![
            Element::Bytes(Bytes::from_static(b"ab")),
            Element::Bytes(Bytes::from_static(b"c")),
        ];
        let (out, _) = run_op(&Pass, ElementType::Bytes, chunks.clone()).unwrap();
        assert_eq!(out, chunks);
    }

    #[test]
    fn pass_and_unordered_are_removed() {
        let f = Expr::trivially_true();
        assert!(matches!(
            Pass.optimize(&f, EventOrder::Ordered).replacement,
            Replacement::Remove
        ));
        let r = Unordered.optimize(&f, EventOrder::Ordered);
        assert!(matches!(r.replacement, Replacement::Remove));
        assert_eq!(r.order, EventOrder::Unordered);
    }

    #[test]
    fn discard_drops_everything() {
        assert_eq!(
            Discard.infer_type(ElementType::Bytes).unwrap(),
            ElementType::Void
        );
        assert!(Discard.infer_type(ElementType::Void).is_err());
        let (out, _) = run_op(&Discard, ElementType::Events, vec![events(json!([{"a": 1}]))])
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn batch_regroups_rows_and_flushes_on_schema_change() {
        let input = vec![
            events(json!([{"a": 1}, {"a": 2}, {"a": 3}])),
            events(json!([{"a": 4}])),
            events(json!([{"b": true}])),
        ];
        let (out, _) = run_op(&Batch { size: Some(2) }, ElementType::Events, input).unwrap();
        let sizes: Vec<usize> = out.iter().map(Element::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(
            rows_of(&out),
            vec![json!({"a": 1}), json!({"a": 2}), json!({"a": 3}), json!({"a": 4}), json!({"b": true})]
        );
    }
}
