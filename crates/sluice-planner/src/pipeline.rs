//! The pipeline: an owned, well-typed chain of operators.

use std::fmt;

use serde::{Deserialize, Serialize};

use sluice_core::element::ElementType;
use sluice_core::hash::{hash_serde, Hash256};
use sluice_operators::{parse_pipeline, Operator, OperatorSpec, Registry};

use crate::error::{PlanError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Unoptimized,
    Optimizing,
    Optimized,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    operators: Vec<Box<dyn Operator>>,
    input: ElementType,
    output: ElementType,
    state: PipelineState,
}

impl Pipeline {
    /// A closed pipeline: the first operator must be a source.
    pub fn new(operators: Vec<Box<dyn Operator>>) -> Result<Self> {
        Self::with_input(operators, ElementType::Void)
    }

    /// An open fragment fed with `input`.
    pub fn fragment(operators: Vec<Box<dyn Operator>>, input: ElementType) -> Result<Self> {
        Self::with_input(operators, input)
    }

    fn with_input(operators: Vec<Box<dyn Operator>>, input: ElementType) -> Result<Self> {
        if operators.is_empty() {
            return Err(PlanError::Empty);
        }
        let output = type_check(&operators, input)?;
        Ok(Self {
            operators,
            input,
            output,
            state: PipelineState::Unoptimized,
        })
    }

    /// Parse pipeline text. A leading source makes it closed; otherwise it
    /// is a fragment over events (or bytes, if that is what it accepts).
    pub fn parse(text: &str, registry: &Registry) -> Result<Self> {
        let operators = parse_pipeline(text, registry).map_err(PlanError::Diagnostics)?;
        let input = infer_input(&operators);
        Self::with_input(operators, input)
    }

    /// Rebuild from a spec list through the registry.
    pub fn from_specs(specs: &[OperatorSpec], registry: &Registry) -> Result<Self> {
        let operators = specs
            .iter()
            .map(|spec| registry.from_spec(spec))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let input = infer_input(&operators);
        Self::with_input(operators, input)
    }

    pub fn specs(&self) -> Result<Vec<OperatorSpec>> {
        Ok(self
            .operators
            .iter()
            .map(|op| op.to_spec())
            .collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Content hash of the spec list. Checkpoints only resume into a
    /// pipeline with the same fingerprint.
    pub fn fingerprint(&self) -> Result<Hash256> {
        Ok(hash_serde(&self.specs()?)?)
    }

    pub fn operators(&self) -> &[Box<dyn Operator>] {
        &self.operators
    }

    pub fn into_operators(self) -> Vec<Box<dyn Operator>> {
        self.operators
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    pub fn input_type(&self) -> ElementType {
        self.input
    }

    pub fn output_type(&self) -> ElementType {
        self.output
    }

    /// Starts at a source.
    pub fn is_closed(&self) -> bool {
        self.input == ElementType::Void
    }

    /// Ends in a sink.
    pub fn is_sealed(&self) -> bool {
        self.output == ElementType::Void
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: PipelineState) {
        self.state = state;
    }

    /// Replace the operator chain, re-checking types against the same input.
    pub(crate) fn replace_operators(&mut self, operators: Vec<Box<dyn Operator>>) -> Result<()> {
        if operators.is_empty() {
            return Err(PlanError::Empty);
        }
        self.output = type_check(&operators, self.input)?;
        self.operators = operators;
        Ok(())
    }
}

impl PartialEq for Pipeline {
    fn eq(&self, other: &Self) -> bool {
        match (self.specs(), other.specs()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, op) in self.operators.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            match op.to_spec() {
                Ok(spec) if !spec.args.is_null() => write!(f, "{} {}", spec.name, spec.args)?,
                _ => write!(f, "{}", op.name())?,
            }
        }
        Ok(())
    }
}

fn infer_input(operators: &[Box<dyn Operator>]) -> ElementType {
    let Some(first) = operators.first() else {
        return ElementType::Void;
    };
    [ElementType::Void, ElementType::Events, ElementType::Bytes]
        .into_iter()
        .find(|&input| first.infer_type(input).is_ok())
        .unwrap_or(ElementType::Void)
}

/// Thread element types through the chain; returns the final output type.
pub fn type_check(operators: &[Box<dyn Operator>], input: ElementType) -> Result<ElementType> {
    let mut current = input;
    for (index, op) in operators.iter().enumerate() {
        if index > 0 && current == ElementType::Void {
            return Err(PlanError::Type {
                index,
                operator: op.name().to_string(),
                message: "follows a sink".to_string(),
            });
        }
        current = op.infer_type(current).map_err(|e| PlanError::Type {
            index,
            operator: op.name().to_string(),
            message: e.to_string(),
        })?;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::builtin()
    }

    #[test]
    fn parse_closed_and_fragment() {
        let r = registry();
        let closed = Pipeline::parse(r#"rows [{"a": 1}] | where a > 0 | discard"#, &r).unwrap();
        assert!(closed.is_closed());
        assert!(closed.is_sealed());
        assert_eq!(closed.len(), 3);

        let fragment = Pipeline::parse("where a > 0 | head 3", &r).unwrap();
        assert!(!fragment.is_closed());
        assert_eq!(fragment.input_type(), ElementType::Events);
        assert_eq!(fragment.output_type(), ElementType::Events);

        let bytes = Pipeline::parse("read json | write json", &r).unwrap();
        assert_eq!(bytes.input_type(), ElementType::Bytes);
        assert_eq!(bytes.output_type(), ElementType::Bytes);
    }

    #[test]
    fn rejects_type_mismatches() {
        let r = registry();
        let err = Pipeline::parse(r#"rows [{"a": 1}] | read json"#, &r).unwrap_err();
        match err {
            PlanError::Type { index, operator, .. } => {
                assert_eq!(index, 1);
                assert_eq!(operator, "read");
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = Pipeline::parse(r#"rows [{"a": 1}] | discard | pass"#, &r).unwrap_err();
        assert!(matches!(err, PlanError::Type { index: 2, .. }));
    }

    #[test]
    fn parse_errors_are_diagnostics() {
        let r = registry();
        let err = Pipeline::parse("rows [1] | frobnicate", &r).unwrap_err();
        let PlanError::Diagnostics(diags) = err else {
            panic!("expected diagnostics");
        };
        assert_eq!(diags.len(), 2);
        assert!(diags.iter().all(|d| d.location.is_some()));
    }

    #[test]
    fn specs_round_trip_and_define_equality() {
        let r = registry();
        let p = Pipeline::parse(r#"rows [{"a": 1}] | select a | head 2"#, &r).unwrap();
        let specs = p.specs().unwrap();
        let back = Pipeline::from_specs(&specs, &r).unwrap();
        assert_eq!(p, back);
        assert_eq!(p.fingerprint().unwrap(), back.fingerprint().unwrap());

        let other = Pipeline::parse(r#"rows [{"a": 1}] | select a | head 3"#, &r).unwrap();
        assert_ne!(p, other);
        assert_ne!(p.fingerprint().unwrap(), other.fingerprint().unwrap());
    }
}
