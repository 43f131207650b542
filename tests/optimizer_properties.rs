//! Build-time guarantees: type checking, parser diagnostics, and optimizer
//! idempotence over a spread of pipelines.

mod common;

use common::parse;
use sluice::planner::PlanError;
use sluice::{optimize, EngineConfig, Pipeline, Registry};

const PIPELINES: &[&str] = &[
    r#"rows [{"a": 1}] | where a > 0"#,
    r#"rows [{"a": 1, "b": 2}] | select a, b | where a > 0 | drop b"#,
    r#"rows [{"a": 1}] | head 5 | where a != 2 | tail 2 | discard"#,
    r#"rows [{"a": 1}] | reverse | reverse"#,
    r#"rows [{"a": 1}] | unique | sort a --desc | head"#,
    r#"rows [{"a": 1}] | slice 1: | slice :3 | count by a"#,
    r#"rows [{"a": 1}] | write json | save file /tmp/out.jsonl"#,
    r#"load file /tmp/in.jsonl | read json | where a == 1 | select a"#,
    "where a > 1 | pass | select a",
    "pass",
];

#[test]
fn optimizing_twice_changes_nothing() {
    let config = EngineConfig::default();
    let registry = Registry::builtin();
    for text in PIPELINES {
        let once = optimize(parse(text), &config).unwrap().pipeline;

        let again = optimize(once.clone(), &config).unwrap();
        assert_eq!(again.iterations, 0, "{text}");
        assert_eq!(again.pipeline, once, "{text}");

        // A fresh copy of the optimized pipeline is already at its fixpoint.
        let rebuilt = Pipeline::from_specs(&once.specs().unwrap(), &registry).unwrap();
        let fresh = optimize(rebuilt, &config).unwrap();
        assert_eq!(fresh.pipeline, once, "{text}");
        assert_eq!(fresh.iterations, 1, "{text}");
    }
}

#[test]
fn optimization_preserves_types() {
    let config = EngineConfig::default();
    for text in PIPELINES {
        let parsed = parse(text);
        let (input, output) = (parsed.input_type(), parsed.output_type());
        let optimized = optimize(parsed, &config).unwrap().pipeline;
        assert_eq!(optimized.input_type(), input, "{text}");
        assert_eq!(optimized.output_type(), output, "{text}");
    }
}

#[test]
fn ill_typed_pipelines_are_rejected_before_running() {
    let registry = Registry::builtin();
    for (text, index) in [
        (r#"rows [{"a": 1}] | read json"#, 1),
        (r#"rows [{"a": 1}] | save file /tmp/x"#, 1),
        (r#"rows [{"a": 1}] | discard | pass"#, 2),
        ("load file /tmp/x | where a > 1", 1),
        (r#"rows [{"a": 1}] | rows [{"b": 2}]"#, 1),
    ] {
        match Pipeline::parse(text, &registry) {
            Err(PlanError::Type { index: at, .. }) => assert_eq!(at, index, "{text}"),
            other => panic!("expected a type error for `{text}`, got {other:?}"),
        }
    }
}

#[test]
fn parse_errors_are_reported_together_with_locations() {
    let registry = Registry::builtin();
    let text = "rows [1] | frobnicate | head x";
    let Err(PlanError::Diagnostics(diagnostics)) = Pipeline::parse(text, &registry) else {
        panic!("expected diagnostics");
    };
    assert_eq!(diagnostics.len(), 3);
    assert!(diagnostics.iter().all(|d| d.is_error()));
    assert!(diagnostics.iter().all(|d| d.location.is_some()));
    assert!(diagnostics[1].message.contains("frobnicate"));
}

#[test]
fn empty_text_is_not_a_pipeline() {
    assert!(matches!(
        Pipeline::parse("   ", &Registry::builtin()),
        Err(PlanError::Empty)
    ));
}
