//! Projection: `select f, ...` and `drop f, ...`.
//!
//! A pushed filter travels through a projection only for conjuncts that read
//! retained fields. The rest stays behind as a `where` after the projection,
//! where missing fields evaluate to false exactly as before the rewrite.

use std::any::Any;

use serde::{Deserialize, Serialize};

use sluice_core::diagnostic::Diagnostic;
use sluice_core::element::{Element, ElementType, EventOrder};
use sluice_core::expr::Expr;

use crate::filter::Where;
use crate::parser::ParserInterface;
use crate::plan::{OperatorSpec, OptimizeResult, Replacement, Signature};
use crate::registry::{OperatorPlugin, Registry};
use crate::traits::{
    expect_events, ControlPlane, Generator, InstantiateContext, OpError, OpResult, Operator,
};
use crate::transform::{Emitter, Transform, Transformer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Mode {
    Select,
    Drop,
}

fn optimize_projection(
    op: &dyn Operator,
    filter: &Expr,
    order: EventOrder,
    retained: impl Fn(&str) -> bool,
) -> OptimizeResult {
    let (pushable, rest) = filter.split_by_fields(retained);
    let replacement = if rest.is_trivially_true() {
        Replacement::Keep
    } else {
        Replacement::Replace(vec![op.box_clone(), Box::new(Where::new(rest))])
    };
    OptimizeResult {
        filter: Some(pushable),
        order,
        replacement,
    }
}

struct Projector {
    mode: Mode,
    fields: Vec<String>,
}

impl Transform for Projector {
    fn process(
        &mut self,
        element: Element,
        out: &mut Emitter<'_>,
        _ctrl: &mut dyn ControlPlane,
    ) -> OpResult<()> {
        let Element::Events(slice) = element else {
            return Err(OpError::Type("projection received bytes".into()));
        };
        let projected = match self.mode {
            Mode::Select => slice.select_fields(&self.fields),
            Mode::Drop => slice.drop_fields(&self.fields),
        };
        if let Some(projected) = projected {
            out.push(projected);
        }
        Ok(())
    }
}

/// Keep only the listed fields, in list order. Slices without any of them
/// are dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Select {
    pub fields: Vec<String>,
}

impl Operator for Select {
    fn name(&self) -> &'static str {
        "select"
    }

    fn infer_type(&self, input: ElementType) -> OpResult<ElementType> {
        expect_events(self.name(), input)
    }

    fn instantiate(&self, _ctx: &InstantiateContext<'_>) -> OpResult<Box<dyn Generator>> {
        Ok(Transformer::boxed(Projector {
            mode: Mode::Select,
            fields: self.fields.clone(),
        }))
    }

    fn optimize(&self, filter: &Expr, order: EventOrder) -> OptimizeResult {
        optimize_projection(self, filter, order, |f| {
            self.fields.iter().any(|kept| kept == f)
        })
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

/// Remove the listed fields. Slices left without fields are dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropFields {
    pub fields: Vec<String>,
}

impl Operator for DropFields {
    fn name(&self) -> &'static str {
        "drop"
    }

    fn infer_type(&self, input: ElementType) -> OpResult<ElementType> {
        expect_events(self.name(), input)
    }

    fn instantiate(&self, _ctx: &InstantiateContext<'_>) -> OpResult<Box<dyn Generator>> {
        Ok(Transformer::boxed(Projector {
            mode: Mode::Drop,
            fields: self.fields.clone(),
        }))
    }

    fn optimize(&self, filter: &Expr, order: EventOrder) -> OptimizeResult {
        optimize_projection(self, filter, order, |f| {
            !self.fields.iter().any(|dropped| dropped == f)
        })
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

fn parse_fields(parser: &mut dyn ParserInterface, op: &str) -> Result<Vec<String>, Diagnostic> {
    if parser.at_end() {
        return Err(parser.error_here(&format!("'{op}' expects at least one field")));
    }
    Ok(parser
        .parse_field_list()?
        .into_iter()
        .map(|f| f.inner)
        .collect())
}

pub struct SelectPlugin;

impl OperatorPlugin for SelectPlugin {
    fn name(&self) -> &'static str {
        "select"
    }

    fn signature(&self) -> Signature {
        Signature::TRANSFORMATION
    }

    fn parse_operator(
        &self,
        parser: &mut dyn ParserInterface,
        _registry: &Registry,
    ) -> Result<Box<dyn Operator>, Diagnostic> {
        Ok(Box::new(Select {
            fields: parse_fields(parser, "select")?,
        }))
    }

    fn from_spec(
        &self,
        args: &serde_json::Value,
        _registry: &Registry,
    ) -> OpResult<Box<dyn Operator>> {
        let spec = OperatorSpec::new(self.name(), args.clone());
        Ok(Box::new(spec.parse_args::<Select>()?))
    }
}

pub struct DropPlugin;

impl OperatorPlugin for DropPlugin {
    fn name(&self) -> &'static str {
        "drop"
    }

    fn signature(&self) -> Signature {
        Signature::TRANSFORMATION
    }

    fn parse_operator(
        &self,
        parser: &mut dyn ParserInterface,
        _registry: &Registry,
    ) -> Result<Box<dyn Operator>, Diagnostic> {
        Ok(Box::new(DropFields {
            fields: parse_fields(parser, "drop")?,
        }))
    }

    fn from_spec(
        &self,
        args: &serde_json::Value,
        _registry: &Registry,
    ) -> OpResult<Box<dyn Operator>> {
        let spec = OperatorSpec::new(self.name(), args.clone());
        Ok(Box::new(spec.parse_args::<DropFields>()?))
    }
}
