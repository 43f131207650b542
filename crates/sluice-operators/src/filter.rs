//! `where <expr>`: keep rows matching a predicate.
//!
//! At optimization time the operator dissolves into the pushed filter, so a
//! `where` survives only where something upstream blocks the filter; the
//! optimizer then materializes a fresh one right after the barrier.

use std::any::Any;

use serde::{Deserialize, Serialize};

use sluice_core::diagnostic::Diagnostic;
use sluice_core::element::{Element, ElementType, EventOrder};
use sluice_core::expr::Expr;

use crate::parser::{expr_text, ParserInterface};
use crate::plan::{OperatorSpec, OptimizeResult, Replacement, Signature};
use crate::registry::{OperatorPlugin, Registry};
use crate::traits::{
    expect_events, ControlPlane, Generator, InstantiateContext, OpError, OpResult, Operator,
};
use crate::transform::{Emitter, Transform, Transformer};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Where {
    #[serde(with = "expr_text")]
    pub expr: Expr,
}

impl Where {
    pub fn new(expr: Expr) -> Self {
        Self { expr }
    }
}

impl Operator for Where {
    fn name(&self) -> &'static str {
        "where"
    }

    fn infer_type(&self, input: ElementType) -> OpResult<ElementType> {
        expect_events(self.name(), input)
    }

    fn instantiate(&self, _ctx: &InstantiateContext<'_>) -> OpResult<Box<dyn Generator>> {
        Ok(Transformer::boxed(Predicate {
            expr: self.expr.clone(),
        }))
    }

    fn optimize(&self, filter: &Expr, order: EventOrder) -> OptimizeResult {
        OptimizeResult {
            filter: Some(self.expr.clone().conjoin(filter.clone())),
            order,
            replacement: Replacement::Remove,
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

struct Predicate {
    expr: Expr,
}

impl Transform for Predicate {
    fn process(
        &mut self,
        element: Element,
        out: &mut Emitter<'_>,
        _ctrl: &mut dyn ControlPlane,
    ) -> OpResult<()> {
        let Element::Events(slice) = element else {
            return Err(OpError::Type("'where' received bytes".into()));
        };
        if let Some(kept) = self.expr.apply(&slice)? {
            out.push(kept);
        }
        Ok(())
    }
}

pub struct WherePlugin;

impl OperatorPlugin for WherePlugin {
    fn name(&self) -> &'static str {
        "where"
    }

    fn signature(&self) -> Signature {
        Signature::TRANSFORMATION
    }

    fn parse_operator(
        &self,
        parser: &mut dyn ParserInterface,
        _registry: &Registry,
    ) -> Result<Box<dyn Operator>, Diagnostic> {
        if parser.at_end() {
            return Err(parser.error_here("'where' expects an expression"));
        }
        let expr = parser.parse_expression()?;
        Ok(Box::new(Where::new(expr.inner)))
    }

    fn from_spec(
        &self,
        args: &serde_json::Value,
        _registry: &Registry,
    ) -> OpResult<Box<dyn Operator>> {
        let spec = OperatorSpec::new(self.name(), args.clone());
        Ok(Box::new(spec.parse_args::<Where>()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ArgParser;
    use crate::testing::{events, rows_of, run_op};
    use serde_json::json;
    use sluice_core::expr::CmpOp;
    use sluice_core::types::Value;

    #[test]
    fn filters_rows_and_drops_empty_results() {
        let op = Where::new(Expr::compare("a", CmpOp::Gt, Value::Int64(1)));
        let input = vec![
            events(json!([{"a": 1}, {"a": 2}, {"a": 3}])),
            events(json!([{"a": 0}])),
        ];
        let (out, _) = run_op(&op, ElementType::Events, input).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(rows_of(&out), vec![json!({"a": 2}), json!({"a": 3})]);
    }

    #[test]
    fn dissolves_into_pushed_filter() {
        let own = Expr::compare("a", CmpOp::Gt, Value::Int64(1));
        let downstream = Expr::compare("b", CmpOp::Eq, Value::Bool(true));
        let result = Where::new(own.clone()).optimize(&downstream, EventOrder::Unordered);
        assert!(matches!(result.replacement, Replacement::Remove));
        assert_eq!(result.filter, Some(own.conjoin(downstream)));
        assert_eq!(result.order, EventOrder::Unordered);
    }

    #[test]
    fn rejects_bytes_and_missing_expression() {
        let op = Where::new(Expr::trivially_true());
        assert!(matches!(
            op.infer_type(ElementType::Bytes),
            Err(OpError::Type(_))
        ));
        let mut p = ArgParser::new("   ");
        assert!(WherePlugin.parse_operator(&mut p, &Registry::new()).is_err());
    }
}
