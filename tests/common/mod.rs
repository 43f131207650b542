//! Helpers shared by the integration tests.
#![allow(dead_code)]

use sluice::core::element::Element;
use sluice::io::{FilesystemActor, MemoryStorage};
use sluice::{Engine, EngineConfig, Pipeline, Registry, RunOutcome};

pub fn parse(text: &str) -> Pipeline {
    Pipeline::parse(text, &Registry::builtin())
        .unwrap_or_else(|e| panic!("failed to parse `{text}`: {e}"))
}

/// Engine over an in-memory store; the returned storage shares its contents.
pub fn memory_engine(config: EngineConfig) -> (Engine, MemoryStorage) {
    let storage = MemoryStorage::new();
    let (fs, _join) = FilesystemActor::spawn(Box::new(storage.clone()));
    (Engine::new(config).with_fs(fs), storage)
}

/// Every collected row, rendered as JSON.
pub fn rows_of(outcome: &RunOutcome) -> Vec<serde_json::Value> {
    outcome
        .output
        .iter()
        .flat_map(|element| match element {
            Element::Events(slice) => slice.to_json_rows(),
            Element::Bytes(_) => panic!("expected events, got bytes"),
        })
        .collect()
}

pub async fn run_rows(text: &str) -> Vec<serde_json::Value> {
    let (engine, _) = memory_engine(EngineConfig::default());
    let outcome = engine
        .run(parse(text))
        .await
        .unwrap_or_else(|f| panic!("run of `{text}` failed: {f}"));
    rows_of(&outcome)
}

/// JSON array with `n` rows `{"i": 0..n, "k": i % m}`.
pub fn numbered(n: usize, m: usize) -> String {
    let rows: Vec<_> = (0..n)
        .map(|i| serde_json::json!({ "i": i, "k": i % m }))
        .collect();
    serde_json::Value::Array(rows).to_string()
}
