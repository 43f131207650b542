//! `deduplicate [fields] [--distance N] [--limit N]` and `unique`.
//!
//! Rows are keyed by a blake3 digest of the selected field values (missing
//! fields hash as null), or of the whole row, names included, when no fields
//! are given. A key is emitted at most `limit` times. With a distance, a key
//! not seen in the last `distance` rows counts as new again.

use std::any::Any;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use sluice_core::prelude::{Diagnostic, Element, ElementType, EventOrder, Expr, TableSlice, Value};

use crate::filter::Where;
use crate::parser::{parse_arg, ParserInterface};
use crate::plan::{OperatorSpec, OptimizeResult, Replacement, Signature};
use crate::registry::{OperatorPlugin, Registry};
use crate::traits::{
    decode_state, encode_state, expect_events, ControlPlane, Generator, InstantiateContext,
    OpError, OpResult, Operator,
};
use crate::transform::{Emitter, Transform, Transformer};

fn default_limit() -> u64 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deduplicate {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<u64>,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

impl Deduplicate {
    pub fn new(fields: Vec<String>) -> Self {
        Self {
            fields,
            distance: None,
            limit: default_limit(),
        }
    }

    pub fn with_distance(mut self, distance: u64) -> Self {
        self.distance = Some(distance);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    fn validate(&self) -> OpResult<()> {
        if self.limit == 0 {
            return Err(OpError::Plan("deduplicate limit must be positive".into()));
        }
        if self.distance == Some(0) {
            return Err(OpError::Plan("deduplicate distance must be positive".into()));
        }
        Ok(())
    }
}

impl Operator for Deduplicate {
    fn name(&self) -> &'static str {
        "deduplicate"
    }

    fn infer_type(&self, input: ElementType) -> OpResult<ElementType> {
        expect_events(self.name(), input)
    }

    fn instantiate(&self, _ctx: &InstantiateContext<'_>) -> OpResult<Box<dyn Generator>> {
        self.validate()?;
        Ok(Transformer::boxed(Deduplicator {
            fields: self.fields.clone(),
            distance: self.distance,
            limit: self.limit,
            seen: HashMap::new(),
            next_row: 0,
        }))
    }

    fn optimize(&self, filter: &Expr, order: EventOrder) -> OptimizeResult {
        if self.distance.is_some() {
            // Which rows fall within the distance depends on every row seen.
            return OptimizeResult::barrier();
        }
        let (pushable, rest) = if self.fields.is_empty() {
            (filter.clone(), Expr::trivially_true())
        } else {
            filter.split_by_fields(|f| self.fields.iter().any(|k| k == f))
        };
        let replacement = if rest.is_trivially_true() {
            Replacement::Keep
        } else {
            Replacement::Replace(vec![self.box_clone(), Box::new(Where::new(rest))])
        };
        // Whole-row keys keep identical rows, so upstream order is irrelevant.
        let order = if self.fields.is_empty() {
            order
        } else {
            EventOrder::Ordered
        };
        OptimizeResult {
            filter: Some(pushable),
            order,
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
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Seen {
    last_row: u64,
    count: u64,
}

#[derive(Serialize, Deserialize)]
struct DedupState {
    next_row: u64,
    seen: Vec<([u8; 32], Seen)>,
}

struct Deduplicator {
    fields: Vec<String>,
    distance: Option<u64>,
    limit: u64,
    seen: HashMap<[u8; 32], Seen>,
    next_row: u64,
}

impl Deduplicator {
    fn key(&self, slice: &TableSlice, row: usize, columns: &[Option<usize>]) -> [u8; 32] {
        let mut h = blake3::Hasher::new();
        if self.fields.is_empty() {
            for (col, field) in slice.schema().fields.iter().enumerate() {
                h.update(field.name.as_bytes());
                h.update(&[0]);
                slice.value(row, col).unwrap_or(&Value::Null).hash_into(&mut h);
            }
        } else {
            for col in columns {
                let value = col.and_then(|c| slice.value(row, c)).unwrap_or(&Value::Null);
                value.hash_into(&mut h);
            }
        }
        *h.finalize().as_bytes()
    }

    fn admit(&mut self, key: [u8; 32]) -> bool {
        let row = self.next_row;
        self.next_row += 1;
        match self.seen.get_mut(&key) {
            None => {
                self.seen.insert(key, Seen { last_row: row, count: 1 });
                true
            }
            Some(entry) => {
                let expired = self
                    .distance
                    .is_some_and(|d| row - entry.last_row > d);
                entry.last_row = row;
                if expired {
                    entry.count = 1;
                    true
                } else if entry.count < self.limit {
                    entry.count += 1;
                    true
                } else {
                    false
                }
            }
        }
    }
}

impl Transform for Deduplicator {
    fn process(
        &mut self,
        element: Element,
        out: &mut Emitter<'_>,
        _ctrl: &mut dyn ControlPlane,
    ) -> OpResult<()> {
        let Element::Events(slice) = element else {
            return Err(OpError::Type("'deduplicate' received bytes".into()));
        };
        let columns: Vec<Option<usize>> = self
            .fields
            .iter()
            .map(|f| slice.schema().index_of(f))
            .collect();
        let mask: Vec<bool> = (0..slice.rows())
            .map(|row| {
                let key = self.key(&slice, row, &columns);
                self.admit(key)
            })
            .collect();
        if let Some(d) = self.distance {
            let now = self.next_row;
            self.seen.retain(|_, e| now - e.last_row <= d);
        }
        if mask.iter().all(|&keep| keep) {
            out.push(Element::Events(slice));
        } else if mask.iter().any(|&keep| keep) {
            out.push(Element::Events(slice.filter(&mask)));
        }
        Ok(())
    }

    fn snapshot(&self) -> OpResult<Option<Vec<u8>>> {
        let state = DedupState {
            next_row: self.next_row,
            seen: self.seen.iter().map(|(k, v)| (*k, *v)).collect(),
        };
        encode_state(&state).map(Some)
    }

    fn restore(&mut self, state: &[u8]) -> OpResult<()> {
        let state: DedupState = decode_state(state)?;
        self.next_row = state.next_row;
        self.seen = state.seen.into_iter().collect();
        Ok(())
    }
}

/// `unique`: drops rows equal to the row right before them.
#[derive(Debug, Clone, Default)]
pub struct Unique;

impl Unique {
    pub fn expanded() -> Deduplicate {
        Deduplicate::new(Vec::new()).with_distance(1)
    }
}

impl Operator for Unique {
    fn name(&self) -> &'static str {
        "unique"
    }

    fn infer_type(&self, input: ElementType) -> OpResult<ElementType> {
        expect_events(self.name(), input)
    }

    fn instantiate(&self, ctx: &InstantiateContext<'_>) -> OpResult<Box<dyn Generator>> {
        Self::expanded().instantiate(ctx)
    }

    fn optimize(&self, _filter: &Expr, _order: EventOrder) -> OptimizeResult {
        OptimizeResult::barrier()
            .with_replacement(Replacement::Replace(vec![Box::new(Self::expanded())]))
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

fn positive(word: &crate::parser::Located<String>, what: &str) -> Result<u64, Diagnostic> {
    let n: u64 = parse_arg(word, what)?;
    if n == 0 {
        return Err(Diagnostic::error(format!("{what} must be positive")).with_location(word.span));
    }
    Ok(n)
}

pub struct DeduplicatePlugin;

impl OperatorPlugin for DeduplicatePlugin {
    fn name(&self) -> &'static str {
        "deduplicate"
    }

    fn signature(&self) -> Signature {
        Signature::TRANSFORMATION
    }

    fn parse_operator(
        &self,
        parser: &mut dyn ParserInterface,
        _registry: &Registry,
    ) -> Result<Box<dyn Operator>, Diagnostic> {
        let fields = if parser.peek_word().is_some() {
            parser
                .parse_field_list()?
                .into_iter()
                .map(|f| f.inner)
                .collect()
        } else {
            Vec::new()
        };
        let mut op = Deduplicate::new(fields);
        loop {
            if let Some(v) = parser.accept_flag_value("--distance")? {
                op.distance = Some(positive(&v, "distance")?);
            } else if let Some(v) = parser.accept_flag_value("--limit")? {
                op.limit = positive(&v, "limit")?;
            } else {
                break;
            }
        }
        Ok(Box::new(op))
    }

    fn from_spec(
        &self,
        args: &serde_json::Value,
        _registry: &Registry,
    ) -> OpResult<Box<dyn Operator>> {
        let spec = OperatorSpec::new(self.name(), args.clone());
        let op = spec.parse_args::<Deduplicate>()?;
        op.validate()?;
        Ok(Box::new(op))
    }
}

pub struct UniquePlugin;

impl OperatorPlugin for UniquePlugin {
    fn name(&self) -> &'static str {
        "unique"
    }

    fn signature(&self) -> Signature {
        Signature::TRANSFORMATION
    }

    fn parse_operator(
        &self,
        _parser: &mut dyn ParserInterface,
        _registry: &Registry,
    ) -> Result<Box<dyn Operator>, Diagnostic> {
        Ok(Box::new(Unique))
    }

    fn from_spec(
        &self,
        _args: &serde_json::Value,
        _registry: &Registry,
    ) -> OpResult<Box<dyn Operator>> {
        Ok(Box::new(Unique))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ArgParser;
    use crate::testing::{events, rows_of, run_op};
    use serde_json::json;
    use sluice_core::expr::CmpOp;

    #[test]
    fn keeps_first_occurrence_per_key() {
        let op = Deduplicate::new(vec!["k".into()]);
        let input = vec![
            events(json!([{"k": 1, "v": "a"}, {"k": 2, "v": "b"}, {"k": 1, "v": "c"}])),
            events(json!([{"k": 2, "v": "d"}, {"k": 3, "v": "e"}])),
        ];
        let (out, _) = run_op(&op, ElementType::Events, input).unwrap();
        assert_eq!(
            rows_of(&out),
            vec![
                json!({"k": 1, "v": "a"}),
                json!({"k": 2, "v": "b"}),
                json!({"k": 3, "v": "e"})
            ]
        );
    }

    #[test]
    fn limit_and_missing_fields() {
        let op = Deduplicate::new(vec!["k".into()]).with_limit(2);
        let input = vec![
            events(json!([{"k": 1}, {"k": 1}, {"k": 1}])),
            events(json!([{"other": 1}, {"other": 2}, {"other": 3}])),
        ];
        let (out, _) = run_op(&op, ElementType::Events, input).unwrap();
        // Rows without `k` all share the null key.
        assert_eq!(
            rows_of(&out),
            vec![json!({"k": 1}), json!({"k": 1}), json!({"other": 1}), json!({"other": 2})]
        );
    }

    #[test]
    fn distance_resets_stale_keys() {
        let op = Deduplicate::new(vec!["k".into()]).with_distance(2);
        let input = vec![events(
            json!([{"k": "a"}, {"k": "b"}, {"k": "a"}, {"k": "b"}, {"k": "c"}, {"k": "d"}, {"k": "a"}]),
        )];
        let (out, _) = run_op(&op, ElementType::Events, input).unwrap();
        let keys: Vec<String> = rows_of(&out)
            .into_iter()
            .map(|r| r["k"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(keys, vec!["a", "b", "c", "d", "a"]);
    }

    #[test]
    fn unique_matches_expanded_form() {
        let input = vec![
            events(json!([{"x": 1}, {"x": 1}, {"x": 2}])),
            events(json!([{"x": 2}, {"x": 1}, {"x": 1}])),
        ];
        let (a, _) = run_op(&Unique, ElementType::Events, input.clone()).unwrap();
        let (b, _) = run_op(&Unique::expanded(), ElementType::Events, input).unwrap();
        assert_eq!(rows_of(&a), rows_of(&b));
        assert_eq!(
            rows_of(&a),
            vec![json!({"x": 1}), json!({"x": 2}), json!({"x": 1})]
        );
    }

    #[test]
    fn pushes_key_conjuncts_only() {
        let op = Deduplicate::new(vec!["k".into()]);
        let on_k = Expr::compare("k", CmpOp::Gt, Value::Int64(0));
        let on_v = Expr::compare("v", CmpOp::Eq, Value::Int64(1));
        let result = op.optimize(&on_k.clone().conjoin(on_v.clone()), EventOrder::Unordered);
        assert_eq!(result.filter, Some(on_k));
        assert_eq!(result.order, EventOrder::Ordered);
        let Replacement::Replace(ops) = result.replacement else {
            panic!("expected replacement");
        };
        assert_eq!(ops[1].as_any().downcast_ref::<Where>().unwrap().expr, on_v);

        let windowed = op.with_distance(5).optimize(&Expr::trivially_true(), EventOrder::Ordered);
        assert!(windowed.filter.is_none());
    }

    #[test]
    fn snapshot_carries_seen_keys() {
        let op = Deduplicate::new(vec!["k".into()]);
        let config = sluice_core::config::EngineConfig::default();
        let ctx = InstantiateContext {
            input_type: ElementType::Events,
            config: &config,
        };
        let mut ctrl = crate::testing::TestControl::new();
        let mut first = op.instantiate(&ctx).unwrap();
        crate::testing::drive(first.as_mut(), vec![events(json!([{"k": 1}]))], &mut ctrl)
            .unwrap();
        let state = first.snapshot().unwrap().unwrap();

        let mut second = op.instantiate(&ctx).unwrap();
        second.restore(&state).unwrap();
        let out = crate::testing::drive(
            second.as_mut(),
            vec![events(json!([{"k": 1}, {"k": 2}]))],
            &mut ctrl,
        )
        .unwrap();
        assert_eq!(rows_of(&out), vec![json!({"k": 2})]);
    }

    #[test]
    fn parses_fields_and_flags() {
        let mut p = ArgParser::new("a, b --limit 3 --distance 10");
        let op = DeduplicatePlugin.parse_operator(&mut p, &Registry::new()).unwrap();
        let op = op.as_any().downcast_ref::<Deduplicate>().unwrap();
        assert_eq!(op.fields, vec!["a", "b"]);
        assert_eq!(op.limit, 3);
        assert_eq!(op.distance, Some(10));

        let mut p = ArgParser::new("--limit 0");
        assert!(DeduplicatePlugin.parse_operator(&mut p, &Registry::new()).is_err());
    }
}
