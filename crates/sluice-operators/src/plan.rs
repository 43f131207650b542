//! Optimization surfaces: what an operator tells the optimizer about itself.

use serde::{Deserialize, Serialize};

use sluice_core::element::EventOrder;
use sluice_core::expr::Expr;

use crate::traits::{OpError, OpResult, Operator};

/// Serializable form of one operator: the plugin name plus its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorSpec {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl OperatorSpec {
    pub fn new(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Spec whose arguments are the serde form of `args`.
    pub fn of<T: Serialize>(name: &str, args: &T) -> OpResult<Self> {
        let args = serde_json::to_value(args)
            .map_err(|e| OpError::Plan(format!("cannot serialize '{name}': {e}")))?;
        Ok(Self::new(name, args))
    }

    /// Inverse of [`OperatorSpec::of`].
    pub fn parse_args<T: serde::de::DeserializeOwned>(&self) -> OpResult<T> {
        serde_json::from_value(self.args.clone())
            .map_err(|e| OpError::Plan(format!("invalid arguments for '{}': {e}", self.name)))
    }
}

/// What replaces an operator after optimization.
#[derive(Debug)]
pub enum Replacement {
    Keep,
    Remove,
    /// Zero, one, or several operators, in pipeline order.
    Replace(Vec<Box<dyn Operator>>),
}

#[derive(Debug)]
pub struct OptimizeResult {
    /// Filter that continues upstream. `None` makes this operator a barrier:
    /// the pending filter is materialized directly after it.
    pub filter: Option<Expr>,
    /// Order required from everything upstream.
    pub order: EventOrder,
    pub replacement: Replacement,
}

impl OptimizeResult {
    /// Opaque operator: no filter passes, ordered input required.
    pub fn barrier() -> Self {
        Self {
            filter: None,
            order: EventOrder::Ordered,
            replacement: Replacement::Keep,
        }
    }

    /// Row-wise operator that commutes with any filter and keeps the order
    /// requirement of its consumer.
    pub fn transparent(filter: &Expr, order: EventOrder) -> Self {
        Self {
            filter: Some(filter.clone()),
            order,
            replacement: Replacement::Keep,
        }
    }

    pub fn with_replacement(mut self, replacement: Replacement) -> Self {
        self.replacement = replacement;
        self
    }

    pub fn with_order(mut self, order: EventOrder) -> Self {
        self.order = order;
        self
    }
}

/// Capability flags a plugin advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Signature {
    pub source: bool,
    pub transformation: bool,
    pub sink: bool,
}

impl Signature {
    pub const SOURCE: Signature = Signature {
        source: true,
        transformation: false,
        sink: false,
    };
    pub const TRANSFORMATION: Signature = Signature {
        source: false,
        transformation: true,
        sink: false,
    };
    pub const SINK: Signature = Signature {
        source: false,
        transformation: false,
        sink: true,
    };
}
