//! `rows`: in-memory event source.
//!
//! `rows [{"a": 1}, {"a": 2}] [--batch-size N]`
//!
//! The only built-in source that absorbs pushed filters: a `where` anywhere
//! downstream of it (with nothing but filter-transparent operators in
//! between) ends up evaluated here, before any slice leaves the stage.

use std::any::Any;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use sluice_core::diagnostic::Diagnostic;
use sluice_core::element::{Element, ElementType, EventOrder};
use sluice_core::expr::Expr;
use sluice_core::slice::TableSlice;

use crate::parser::{expr_text, parse_arg, ParserInterface};
use crate::plan::{OperatorSpec, OptimizeResult, Replacement, Signature};
use crate::registry::{OperatorPlugin, Registry};
use crate::traits::{
    decode_state, encode_state, now_millis, ControlPlane, Generator, Input, InstantiateContext,
    OpError, OpResult, Operator, Resume,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rows {
    pub data: Vec<serde_json::Value>,
    #[serde(default, with = "expr_text")]
    pub filter: Expr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
}

impl Rows {
    pub fn new(data: Vec<serde_json::Value>) -> Self {
        Self {
            data,
            filter: Expr::trivially_true(),
            batch_size: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// The slices this source emits, in order, with offsets and import time
    /// assigned.
    fn materialize(&self, default_batch_size: usize) -> OpResult<Vec<TableSlice>> {
        let batch = self.batch_size.unwrap_or(default_batch_size).max(1);
        let import_time = now_millis();
        let mut offset = 0u64;
        let mut out = Vec::new();
        for slice in TableSlice::from_json_rows("rows", &self.data)? {
            let Some(kept) = self.filter.apply(&slice)? else {
                continue;
            };
            for part in kept.split(batch) {
                let rows = part.rows() as u64;
                out.push(part.with_offset(offset).with_import_time(import_time));
                offset += rows;
            }
        }
        Ok(out)
    }
}

impl Operator for Rows {
    fn name(&self) -> &'static str {
        "rows"
    }

    fn infer_type(&self, input: ElementType) -> OpResult<ElementType> {
        match input {
            ElementType::Void => Ok(ElementType::Events),
            other => Err(OpError::Type(format!(
                "'rows' is a source and cannot consume {other}"
            ))),
        }
    }

    fn instantiate(&self, ctx: &InstantiateContext<'_>) -> OpResult<Box<dyn Generator>> {
        Ok(Box::new(RowsGenerator {
            slices: self.materialize(ctx.config.default_batch_size)?.into(),
            next: 0,
        }))
    }

    fn optimize(&self, filter: &Expr, _order: EventOrder) -> OptimizeResult {
        let replacement = if filter.is_trivially_true() {
            Replacement::Keep
        } else {
            let mut absorbed = self.clone();
            absorbed.filter = self.filter.clone().conjoin(filter.clone());
            Replacement::Replace(vec![Box::new(absorbed)])
        };
        OptimizeResult {
            filter: Some(Expr::trivially_true()),
            order: EventOrder::Ordered,
            replacement,
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

    fn accepts_filters(&self) -> bool {
        true
    }
}

struct RowsGenerator {
    slices: Arc<[TableSlice]>,
    next: usize,
}

impl Generator for RowsGenerator {
    fn resume(&mut self, _input: &mut dyn Input, _ctrl: &mut dyn ControlPlane) -> OpResult<Resume> {
        match self.slices.get(self.next) {
            Some(slice) => {
                self.next += 1;
                Ok(Resume::Yield(Element::Events(slice.clone())))
            }
            None => Ok(Resume::Done),
        }
    }

    fn snapshot(&self) -> OpResult<Option<Vec<u8>>> {
        encode_state(&self.next).map(Some)
    }

    fn restore(&mut self, state: &[u8]) -> OpResult<()> {
        self.next = decode_state(state)?;
        Ok(())
    }
}

pub struct RowsPlugin;

impl OperatorPlugin for RowsPlugin {
    fn name(&self) -> &'static str {
        "rows"
    }

    fn signature(&self) -> Signature {
        Signature::SOURCE
    }

    fn parse_operator(
        &self,
        parser: &mut dyn ParserInterface,
        _registry: &Registry,
    ) -> Result<Box<dyn Operator>, Diagnostic> {
        let json = parser.parse_json()?;
        let serde_json::Value::Array(data) = json.inner else {
            return Err(Diagnostic::error("'rows' expects a JSON array of objects")
                .with_location(json.span));
        };
        if let Some(i) = data.iter().position(|v| !v.is_object()) {
            return Err(
                Diagnostic::error(format!("element {i} of 'rows' is not an object"))
                    .with_location(json.span),
            );
        }
        let mut rows = Rows::new(data);
        if let Some(n) = parser.accept_flag_value("--batch-size")? {
            let size: usize = parse_arg(&n, "batch size")?;
            if size == 0 {
                return Err(Diagnostic::error("batch size must be positive").with_location(n.span));
            }
            rows = rows.with_batch_size(size);
        }
        Ok(Box::new(rows))
    }

    fn from_spec(
        &self,
        args: &serde_json::Value,
        _registry: &Registry,
    ) -> OpResult<Box<dyn Operator>> {
        let spec = OperatorSpec::new(self.name(), args.clone());
        Ok(Box::new(spec.parse_args::<Rows>()?))
    }
}
