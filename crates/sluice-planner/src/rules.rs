//! Fusion rules for adjacent operators.
//!
//! Each rule looks at a pair `(upstream, downstream)` and either returns one
//! operator equivalent to running both, or `None`.

use sluice_operators::filter::Where;
use sluice_operators::project::{DropFields, Select};
use sluice_operators::slice::Slice;
use sluice_operators::Operator;

type Rule = fn(&dyn Operator, &dyn Operator) -> Option<Box<dyn Operator>>;

/// Rules in the order they are tried.
pub(crate) const RULES: &[(&str, Rule)] = &[
    ("select+select", fuse_selects),
    ("select+drop", fuse_select_drop),
    ("drop+drop", fuse_drops),
    ("where+where", fuse_wheres),
    ("slice+slice", fuse_slices),
];

fn downcast<T: 'static>(op: &dyn Operator) -> Option<&T> {
    op.as_any().downcast_ref::<T>()
}

fn fuse_selects(first: &dyn Operator, second: &dyn Operator) -> Option<Box<dyn Operator>> {
    let (a, b) = (downcast::<Select>(first)?, downcast::<Select>(second)?);
    let fields: Vec<String> = b
        .fields
        .iter()
        .filter(|f| a.fields.contains(f))
        .cloned()
        .collect();
    if fields.is_empty() {
        return None;
    }
    Some(Box::new(Select { fields }))
}

fn fuse_select_drop(first: &dyn Operator, second: &dyn Operator) -> Option<Box<dyn Operator>> {
    let (a, b) = (downcast::<Select>(first)?, downcast::<DropFields>(second)?);
    let fields: Vec<String> = a
        .fields
        .iter()
        .filter(|f| !b.fields.contains(f))
        .cloned()
        .collect();
    if fields.is_empty() {
        return None;
    }
    Some(Box::new(Select { fields }))
}

fn fuse_drops(first: &dyn Operator, second: &dyn Operator) -> Option<Box<dyn Operator>> {
    let (a, b) = (
        downcast::<DropFields>(first)?,
        downcast::<DropFields>(second)?,
    );
    let mut fields = a.fields.clone();
    for f in &b.fields {
        if !fields.contains(f) {
            fields.push(f.clone());
        }
    }
    Some(Box::new(DropFields { fields }))
}

fn fuse_wheres(first: &dyn Operator, second: &dyn Operator) -> Option<Box<dyn Operator>> {
    let (a, b) = (downcast::<Where>(first)?, downcast::<Where>(second)?);
    Some(Box::new(Where::new(a.expr.clone().conjoin(b.expr.clone()))))
}

/// Only forward unit-stride slices with non-negative bounds compose without
/// knowing the input length.
fn fuse_slices(first: &dyn Operator, second: &dyn Operator) -> Option<Box<dyn Operator>> {
    let (a, b) = (downcast::<Slice>(first)?, downcast::<Slice>(second)?);
    let forward = |s: &Slice| {
        s.stride.unwrap_or(1) == 1
            && s.begin.map_or(true, |x| x >= 0)
            && s.end.map_or(true, |x| x >= 0)
    };
    if !forward(a) || !forward(b) {
        return None;
    }
    let (b1, b2) = (a.begin.unwrap_or(0), b.begin.unwrap_or(0));
    let begin = b1 + b2;
    let end = match (a.end, b.end) {
        (None, None) => None,
        (Some(e1), None) => Some(e1),
        (None, Some(e2)) => Some(b1 + e2),
        (Some(e1), Some(e2)) => Some(e1.min(b1 + e2)),
    }
    .map(|e| e.max(begin));
    Some(Box::new(Slice::new(
        (begin != 0).then_some(begin),
        end,
        None,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::expr::{CmpOp, Expr};
    use sluice_core::types::Value;

    fn select(fields: &[&str]) -> Select {
        Select {
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    fn drop_fields(fields: &[&str]) -> DropFields {
        DropFields {
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    #[test]
    fn projections_fuse() {
        let fused = fuse_selects(&select(&["a", "b"]), &select(&["b", "c"])).unwrap();
        assert_eq!(fused.as_any().downcast_ref::<Select>(), Some(&select(&["b"])));
        assert!(fuse_selects(&select(&["a"]), &select(&["c"])).is_none());

        let fused = fuse_select_drop(&select(&["a", "b"]), &drop_fields(&["a"])).unwrap();
        assert_eq!(fused.as_any().downcast_ref::<Select>(), Some(&select(&["b"])));

        let fused = fuse_drops(&drop_fields(&["a"]), &drop_fields(&["b", "a"])).unwrap();
        assert_eq!(
            fused.as_any().downcast_ref::<DropFields>(),
            Some(&drop_fields(&["a", "b"]))
        );

        assert!(fuse_selects(&drop_fields(&["a"]), &select(&["a"])).is_none());
    }

    #[test]
    fn wheres_conjoin() {
        let a = Where::new(Expr::compare("a", CmpOp::Gt, Value::Int64(1)));
        let b = Where::new(Expr::compare("b", CmpOp::Eq, Value::Int64(2)));
        let fused = fuse_wheres(&a, &b).unwrap();
        let fused = fused.as_any().downcast_ref::<Where>().unwrap();
        assert_eq!(fused.expr.conjuncts().len(), 2);
    }

    #[test]
    fn slices_compose() {
        let s = |b, e| Slice::new(b, e, None);
        let cases = [
            (s(Some(2), None), s(Some(1), Some(3)), s(Some(3), Some(5))),
            (s(None, Some(10)), s(None, Some(3)), s(None, Some(3))),
            (s(None, Some(3)), s(None, Some(10)), s(None, Some(3))),
            (s(Some(5), Some(6)), s(Some(4), None), s(Some(9), Some(9))),
        ];
        for (a, b, expected) in cases {
            let fused = fuse_slices(&a, &b).unwrap();
            assert_eq!(fused.as_any().downcast_ref::<Slice>(), Some(&expected));
            let input: Vec<usize> = (0..20).collect();
            let stepwise: Vec<usize> = b
                .indices(a.indices(20).len())
                .into_iter()
                .map(|i| input[a.indices(20)[i]])
                .collect();
            let direct: Vec<usize> = expected.indices(20);
            assert_eq!(stepwise, direct);
        }
        assert!(fuse_slices(&Slice::tail(3), &Slice::head(1)).is_none());
        assert!(fuse_slices(&Slice::reverse(), &Slice::head(1)).is_none());
    }
}
