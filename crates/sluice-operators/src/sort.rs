//! `sort <field> [--desc]`: stable sort of all input rows by one field.
//!
//! Rows lacking the field sort as null. Ties keep their input order, so an
//! ordered consumer still needs ordered input.

use std::any::Any;

use serde::{Deserialize, Serialize};

use sluice_core::prelude::{Diagnostic, Element, ElementType, EventOrder, Expr, TableSlice, Value};

use crate::parser::ParserInterface;
use crate::plan::{OperatorSpec, OptimizeResult, Replacement, Signature};
use crate::registry::{OperatorPlugin, Registry};
use crate::traits::{
    decode_state, encode_state, expect_events, ControlPlane, Generator, InstantiateContext,
    OpError, OpResult, Operator,
};
use crate::transform::{Emitter, Transform, Transformer};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub descending: bool,
}

impl Operator for Sort {
    fn name(&self) -> &'static str {
        "sort"
    }

    fn infer_type(&self, input: ElementType) -> OpResult<ElementType> {
        expect_events(self.name(), input)
    }

    fn instantiate(&self, _ctx: &InstantiateContext<'_>) -> OpResult<Box<dyn Generator>> {
        Ok(Transformer::boxed(Sorter {
            field: self.field.clone(),
            descending: self.descending,
            buffer: Vec::new(),
        }))
    }

    fn optimize(&self, filter: &Expr, order: EventOrder) -> OptimizeResult {
        let result = OptimizeResult::transparent(filter, order);
        if order == EventOrder::Unordered {
            result.with_replacement(Replacement::Remove)
        } else {
            result
        }
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

struct Sorter {
    field: String,
    descending: bool,
    buffer: Vec<TableSlice>,
}

impl Transform for Sorter {
    fn process(
        &mut self,
        element: Element,
        _out: &mut Emitter<'_>,
        _ctrl: &mut dyn ControlPlane,
    ) -> OpResult<()> {
        let Element::Events(slice) = element else {
            return Err(OpError::Type("'sort' received bytes".into()));
        };
        if !slice.is_empty() {
            self.buffer.push(slice);
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut Emitter<'_>, _ctrl: &mut dyn ControlPlane) -> OpResult<()> {
        let null = Value::Null;
        let columns: Vec<Option<&[Value]>> = self
            .buffer
            .iter()
            .map(|s| s.column_by_name(&self.field))
            .collect();
        let key = |(s, r): (usize, usize)| columns[s].map_or(&null, |c| &c[r]);

        let mut order: Vec<(usize, usize)> = self
            .buffer
            .iter()
            .enumerate()
            .flat_map(|(s, slice)| (0..slice.rows()).map(move |r| (s, r)))
            .collect();
        order.sort_by(|&a, &b| {
            let ord = key(a).total_cmp(key(b));
            if self.descending {
                ord.reverse()
            } else {
                ord
            }
        });

        // Consecutive rows from the same slice leave as one slice.
        let mut start = 0;
        while start < order.len() {
            let source = order[start].0;
            let end = order[start..]
                .iter()
                .position(|&(s, _)| s != source)
                .map_or(order.len(), |n| start + n);
            let rows: Vec<usize> = order[start..end].iter().map(|&(_, r)| r).collect();
            out.push(Element::Events(self.buffer[source].take(&rows)));
            start = end;
        }
        self.buffer.clear();
        Ok(())
    }

    fn snapshot(&self) -> OpResult<Option<Vec<u8>>> {
        encode_state(&self.buffer).map(Some)
    }

    fn restore(&mut self, state: &[u8]) -> OpResult<()> {
        self.buffer = decode_state(state)?;
        Ok(())
    }
}

pub struct SortPlugin;

impl OperatorPlugin for SortPlugin {
    fn name(&self) -> &'static str {
        "sort"
    }

    fn signature(&self) -> Signature {
        Signature::TRANSFORMATION
    }

    fn parse_operator(
        &self,
        parser: &mut dyn ParserInterface,
        _registry: &Registry,
    ) -> Result<Box<dyn Operator>, Diagnostic> {
        let mut descending = parser.accept_flag("--desc");
        let Some(field) = parser.accept_word() else {
            return Err(parser.error_here("'sort' expects a field"));
        };
        descending |= parser.accept_flag("--desc");
        Ok(Box::new(Sort {
            field: field.inner,
            descending,
        }))
    }

    fn from_spec(
        &self,
        args: &serde_json::Value,
        _registry: &Registry,
    ) -> OpResult<Box<dyn Operator>> {
        let spec = OperatorSpec::new(self.name(), args.clone());
        Ok(Box::new(spec.parse_args::<Sort>()?))
    }
}
