//! `count [by f, ...]`: row counts, optionally grouped.
//!
//! Groups appear in the order their first row arrived. Rows missing a group
//! field fall into the group where that field is null.

use std::any::Any;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use sluice_core::diagnostic::Diagnostic;
use sluice_core::element::{Element, ElementType, EventOrder};
use sluice_core::expr::Expr;
use sluice_core::slice::TableSlice;
use sluice_core::types::Value;

use crate::parser::ParserInterface;
use crate::plan::{OperatorSpec, OptimizeResult, Signature};
use crate::registry::{OperatorPlugin, Registry};
use crate::traits::{
    decode_state, encode_state, expect_events, ControlPlane, Generator, InstantiateContext,
    OpError, OpResult, Operator,
};
use crate::transform::{Emitter, Transform, Transformer};

/// Schema name of the emitted rows.
const COUNT_SCHEMA: &str = "count";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Count {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub by: Vec<String>,
}

impl Operator for Count {
    fn name(&self) -> &'static str {
        "count"
    }

    fn infer_type(&self, input: ElementType) -> OpResult<ElementType> {
        expect_events(self.name(), input)
    }

    fn instantiate(&self, _ctx: &InstantiateContext<'_>) -> OpResult<Box<dyn Generator>> {
        Ok(Transformer::boxed(Counter {
            by: self.by.clone(),
            groups: Vec::new(),
            index: HashMap::new(),
        }))
    }

    /// Group order follows input order, so only an unordered consumer
    /// frees upstream operators to reorder.
    fn optimize(&self, _filter: &Expr, order: EventOrder) -> OptimizeResult {
        OptimizeResult::barrier().with_order(order)
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

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Group {
    values: Vec<Value>,
    count: u64,
}

struct Counter {
    by: Vec<String>,
    groups: Vec<Group>,
    index: HashMap<[u8; 32], usize>,
}

impl Counter {
    fn group_key(values: &[Value]) -> [u8; 32] {
        let mut h = blake3::Hasher::new();
        for v in values {
            v.hash_into(&mut h);
        }
        *h.finalize().as_bytes()
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .groups
            .iter()
            .enumerate()
            .map(|(i, g)| (Self::group_key(&g.values), i))
            .collect();
    }

    fn add(&mut self, slice: &TableSlice) {
        if self.by.is_empty() {
            match self.groups.first_mut() {
                Some(g) => g.count += slice.rows() as u64,
                None => self.groups.push(Group {
                    values: Vec::new(),
                    count: slice.rows() as u64,
                }),
            }
            return;
        }
        let columns: Vec<Option<&[Value]>> =
            self.by.iter().map(|f| slice.column_by_name(f)).collect();
        for row in 0..slice.rows() {
            let values: Vec<Value> = columns
                .iter()
                .map(|c| c.map_or(Value::Null, |c| c[row].clone()))
                .collect();
            let key = Self::group_key(&values);
            match self.index.get(&key) {
                Some(&i) => self.groups[i].count += 1,
                None => {
                    self.index.insert(key, self.groups.len());
                    self.groups.push(Group { values, count: 1 });
                }
            }
        }
    }
}

impl Transform for Counter {
    fn process(
        &mut self,
        element: Element,
        _out: &mut Emitter<'_>,
        _ctrl: &mut dyn ControlPlane,
    ) -> OpResult<()> {
        let Element::Events(slice) = element else {
            return Err(OpError::Type("'count' received bytes".into()));
        };
        self.add(&slice);
        Ok(())
    }

    fn finish(&mut self, out: &mut Emitter<'_>, _ctrl: &mut dyn ControlPlane) -> OpResult<()> {
        if self.by.is_empty() && self.groups.is_empty() {
            self.groups.push(Group {
                values: Vec::new(),
                count: 0,
            });
        }
        let records = self.groups.drain(..).map(|g| {
            let mut record: Vec<(String, Value)> = self.by.iter().cloned().zip(g.values).collect();
            record.push(("count".to_string(), Value::UInt64(g.count)));
            record
        });
        for slice in TableSlice::from_records(COUNT_SCHEMA, records.collect::<Vec<_>>())? {
            out.push(slice);
        }
        self.index.clear();
        Ok(())
    }

    fn snapshot(&self) -> OpResult<Option<Vec<u8>>> {
        encode_state(&self.groups).map(Some)
    }

    fn restore(&mut self, state: &[u8]) -> OpResult<()> {
        self.groups = decode_state(state)?;
        self.rebuild_index();
        Ok(())
    }
}

pub struct CountPlugin;

impl OperatorPlugin for CountPlugin {
    fn name(&self) -> &'static str {
        "count"
    }

    fn signature(&self) -> Signature {
        Signature::TRANSFORMATION
    }

    fn parse_operator(
        &self,
        parser: &mut dyn ParserInterface,
        _registry: &Registry,
    ) -> Result<Box<dyn Operator>, Diagnostic> {
        if !parser.accept_keyword("by") {
            return Ok(Box::new(Count::default()));
        }
        let by = parser
            .parse_field_list()?
            .into_iter()
            .map(|f| f.inner)
            .collect();
        Ok(Box::new(Count { by }))
    }

    fn from_spec(
        &self,
        args: &serde_json::Value,
        _registry: &Registry,
    ) -> OpResult<Box<dyn Operator>> {
        if args.is_null() {
            return Ok(Box::new(Count::default()));
        }
        let spec = OperatorSpec::new(self.name(), args.clone());
        Ok(Box::new(spec.parse_args::<Count>()?))
    }
}
