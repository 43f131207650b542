//! Filter expressions pushed through pipelines by the optimizer.
//!
//! Expressions are small boolean trees over field comparisons. The trivially
//! true expression is the neutral element of conjunction; the optimizer starts
//! from it and accumulates predicates while walking upstream.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::slice::TableSlice;
use crate::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }

    fn holds(&self, lhs: &Value, rhs: &Value) -> bool {
        use std::cmp::Ordering::*;
        let ord = lhs.compare(rhs);
        match self {
            CmpOp::Eq => ord == Some(Equal),
            CmpOp::Ne => ord != Some(Equal),
            CmpOp::Lt => ord == Some(Less),
            CmpOp::Le => matches!(ord, Some(Less | Equal)),
            CmpOp::Gt => ord == Some(Greater),
            CmpOp::Ge => matches!(ord, Some(Greater | Equal)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Literal(bool),
    Compare {
        field: String,
        op: CmpOp,
        value: Value,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Default for Expr {
    fn default() -> Self {
        Expr::trivially_true()
    }
}

impl Expr {
    pub fn trivially_true() -> Self {
        Expr::Literal(true)
    }

    pub fn is_trivially_true(&self) -> bool {
        matches!(self, Expr::Literal(true))
    }

    pub fn compare(field: impl Into<String>, op: CmpOp, value: Value) -> Self {
        Expr::Compare {
            field: field.into(),
            op,
            value,
        }
    }

    /// Conjunction that keeps the trivially true expression neutral.
    pub fn conjoin(self, other: Expr) -> Expr {
        match (self.is_trivially_true(), other.is_trivially_true()) {
            (true, _) => other,
            (_, true) => self,
            _ => Expr::And(Box::new(self), Box::new(other)),
        }
    }

    /// Flatten nested conjunctions into their operands.
    pub fn conjuncts(&self) -> Vec<Expr> {
        match self {
            Expr::And(l, r) => {
                let mut out = l.conjuncts();
                out.extend(r.conjuncts());
                out
            }
            e if e.is_trivially_true() => Vec::new(),
            e => vec![e.clone()],
        }
    }

    pub fn from_conjuncts(parts: impl IntoIterator<Item = Expr>) -> Expr {
        parts
            .into_iter()
            .fold(Expr::trivially_true(), Expr::conjoin)
    }

    /// Names of all fields the expression reads.
    pub fn fields(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Compare { field, .. } => {
                out.insert(field.as_str());
            }
            Expr::And(l, r) | Expr::Or(l, r) => {
                l.collect_fields(out);
                r.collect_fields(out);
            }
            Expr::Not(e) => e.collect_fields(out),
        }
    }

    /// Partition the conjuncts by whether every field they read satisfies
    /// `pred`. Returns `(matching, rest)`.
    pub fn split_by_fields(&self, pred: impl Fn(&str) -> bool) -> (Expr, Expr) {
        let (yes, no): (Vec<Expr>, Vec<Expr>) = self
            .conjuncts()
            .into_iter()
            .partition(|c| c.fields().into_iter().all(&pred));
        (Expr::from_conjuncts(yes), Expr::from_conjuncts(no))
    }

    /// Evaluate per row. A comparison against a field the slice does not
    /// have is false.
    pub fn evaluate(&self, slice: &TableSlice) -> Result<Vec<bool>> {
        let rows = slice.rows();
        Ok(match self {
            Expr::Literal(b) => vec![*b; rows],
            Expr::Compare { field, op, value } => match slice.column_by_name(field) {
                Some(col) => col.iter().map(|v| op.holds(v, value)).collect(),
                None => vec![false; rows],
            },
            Expr::And(l, r) => {
                let mut a = l.evaluate(slice)?;
                let b = r.evaluate(slice)?;
                zip_check(&a, &b)?;
                a.iter_mut().zip(b).for_each(|(x, y)| *x = *x && y);
                a
            }
            Expr::Or(l, r) => {
                let mut a = l.evaluate(slice)?;
                let b = r.evaluate(slice)?;
                zip_check(&a, &b)?;
                a.iter_mut().zip(b).for_each(|(x, y)| *x = *x || y);
                a
            }
            Expr::Not(e) => e.evaluate(slice)?.into_iter().map(|b| !b).collect(),
        })
    }

    /// Apply as a filter. Returns `None` when no row survives.
    pub fn apply(&self, slice: &TableSlice) -> Result<Option<TableSlice>> {
        if self.is_trivially_true() {
            return Ok(Some(slice.clone()));
        }
        let mask = self.evaluate(slice)?;
        let out = slice.filter(&mask);
        Ok(if out.is_empty() { None } else { Some(out) })
    }
}

fn zip_check(a: &[bool], b: &[bool]) -> Result<()> {
    if a.len() != b.len() {
        return Err(Error::Expr(format!(
            "operand masks differ in length: {} vs {}",
            a.len(),
            b.len()
        )));
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(b) => write!(f, "{b}"),
            Expr::Compare { field, op, value } => write!(f, "{} {} {}", field, op.as_str(), value),
            Expr::And(l, r) => write!(f, "{l} and {r}"),
            Expr::Or(l, r) => write!(f, "({l} or {r})"),
            Expr::Not(e) => write!(f, "not ({e})"),
        }
    }
}
