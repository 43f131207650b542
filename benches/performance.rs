use criterion::{criterion_group, criterion_main, Criterion};
use sluice::core::slice::TableSlice;
use sluice::{optimize, Engine, EngineConfig, Pipeline, Registry};

fn numbered(rows: usize) -> String {
    let data: Vec<_> = (0..rows)
        .map(|i| serde_json::json!({ "i": i, "group": format!("group-{}", i % 4), "value": i % 10 }))
        .collect();
    serde_json::Value::Array(data).to_string()
}

fn bench_optimizer(c: &mut Criterion) {
    let registry = Registry::builtin();
    let text = format!(
        "rows {} | select i, group, value | where value > 3 | pass | unordered | sort i | head 100 | where value != 7",
        numbered(64)
    );
    let pipeline = Pipeline::parse(&text, &registry).unwrap();
    c.bench_function("optimize", |b| {
        b.iter(|| optimize(pipeline.clone(), &EngineConfig::default()).unwrap())
    });
}

fn bench_filter_count(c: &mut Criterion) {
    let registry = Registry::builtin();
    let text = format!(
        "rows {} --batch-size 64 | where value >= 5 | count by group",
        numbered(4096)
    );
    let pipeline = Pipeline::parse(&text, &registry).unwrap();
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let engine = Engine::new(EngineConfig::default());
    c.bench_function("run_filter_count", |b| {
        b.iter(|| runtime.block_on(engine.run(pipeline.clone())).unwrap())
    });
}

fn bench_slice_from_rows(c: &mut Criterion) {
    let rows: Vec<serde_json::Value> = serde_json::from_str(&numbered(1024)).unwrap();
    c.bench_function("table_slice_from_json_rows", |b| {
        b.iter(|| TableSlice::from_json_rows("bench", &rows).unwrap())
    });
}

criterion_group!(pipelines, bench_optimizer, bench_filter_count, bench_slice_from_rows);
criterion_main!(pipelines);
