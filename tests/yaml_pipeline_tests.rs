//! YAML documents end to end: parse, configure, run.

mod common;

use serde_json::json;

use sluice::planner::to_yaml;
use sluice::{parse_yaml_pipeline, EngineConfig, Registry};

use common::{memory_engine, numbered, parse, rows_of};

#[tokio::test]
async fn step_list_document_runs() {
    let src = format!(
        r#"
config:
  channel_capacity: 4
steps:
  - op: rows
    data: {}
  - op: where
    expr: "k == 1"
  - op: select
    fields: [i]
  - op: head
    args: 3
"#,
        numbered(20, 4)
    );
    let parsed = parse_yaml_pipeline(&src, &Registry::builtin()).unwrap();
    let config = parsed.engine_config(&EngineConfig::default()).unwrap();
    assert_eq!(config.channel_capacity, 4);

    let (engine, _) = memory_engine(config);
    let outcome = engine.run(parsed.pipeline).await.unwrap();
    assert_eq!(
        rows_of(&outcome),
        vec![json!({"i": 1}), json!({"i": 5}), json!({"i": 9})]
    );
    assert!(outcome.manifest.edges.iter().all(|e| e.capacity == 4));
}

#[tokio::test]
async fn pipeline_text_document_runs() {
    let src = "pipeline: 'rows [{\"a\": 3}, {\"a\": 1}, {\"a\": 2}] | sort a'\n";
    let parsed = parse_yaml_pipeline(src, &Registry::builtin()).unwrap();
    let (engine, _) = memory_engine(EngineConfig::default());
    let outcome = engine.run(parsed.pipeline).await.unwrap();
    assert_eq!(
        rows_of(&outcome),
        vec![json!({"a": 1}), json!({"a": 2}), json!({"a": 3})]
    );
}

#[tokio::test]
async fn exported_document_reproduces_the_run() {
    let text = format!("rows {} | where k != 0 | count by k", numbered(30, 3));
    let pipeline = parse(&text);
    let yaml = to_yaml(&pipeline, None).unwrap();
    let parsed = parse_yaml_pipeline(&yaml, &Registry::builtin()).unwrap();
    assert_eq!(parsed.pipeline, pipeline);

    let (engine, _) = memory_engine(EngineConfig::default());
    let direct = engine.run(pipeline).await.unwrap();
    let via_yaml = engine.run(parsed.pipeline).await.unwrap();
    assert_eq!(rows_of(&direct), rows_of(&via_yaml));
    assert_eq!(direct.manifest.pipeline_hash, via_yaml.manifest.pipeline_hash);
}

#[test]
fn unknown_step_is_reported() {
    let src = "steps:\n  - op: rows\n    data: []\n  - op: frobnicate\n";
    assert!(parse_yaml_pipeline(src, &Registry::builtin()).is_err());
}
