//! sluice CLI: run, validate, and explain dataflow pipelines.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sluice_core::config::{Codec, EngineConfig};
use sluice_core::diagnostic::Diagnostic;
use sluice_core::element::Element;
use sluice_core::id::PipelineRunId;
use sluice_exec::{Engine, RunOutcome};
use sluice_io::json::JsonLinesPrinter;
use sluice_operators::{Location, Registry};
use sluice_planner::{optimize, parse_yaml_pipeline, Pipeline};

#[derive(Parser)]
#[command(name = "sluice")]
#[command(about = "sluice: typed, checkpointed dataflow pipelines", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct PipelineSource {
    /// Path to a pipeline YAML document
    #[arg(short, long)]
    pipeline: Option<PathBuf>,

    /// Pipeline text, e.g. `rows [{"a": 1}] | where a > 0`
    #[arg(short = 'e', long = "expr")]
    expr: Option<String>,
}

#[derive(Args, Debug, Default, Clone)]
struct ConfigOverrides {
    /// Elements buffered between two adjacent stages
    #[arg(long)]
    channel_capacity: Option<usize>,

    /// Period between checkpoints; enables checkpointing
    #[arg(long)]
    checkpoint_interval_ms: Option<u64>,

    /// Maximum uncommitted checkpoints (0 disables checkpointing)
    #[arg(long)]
    checkpoints_in_flight: Option<usize>,

    /// Checkpoint root directory
    #[arg(long)]
    checkpoint_dir: Option<String>,

    /// Checkpoint blob compression: none, zstd, or lz4
    #[arg(long)]
    checkpoint_codec: Option<Codec>,

    /// Keep checkpoints after a successful run
    #[arg(long)]
    retain_checkpoints: bool,

    /// Deadline for a single file read
    #[arg(long)]
    load_timeout_ms: Option<u64>,

    /// Rows per slice for in-memory sources and parsers
    #[arg(long)]
    batch_size: Option<usize>,

    /// Optimizer iteration cap
    #[arg(long)]
    optimizer_max_iterations: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a pipeline
    Run {
        #[command(flatten)]
        source: PipelineSource,

        #[command(flatten)]
        overrides: ConfigOverrides,

        /// Run id; resumes from this run's latest checkpoint when one matches
        #[arg(long)]
        run_id: Option<PipelineRunId>,

        /// Write the run manifest as JSON to this path
        #[arg(long)]
        manifest: Option<PathBuf>,
    },

    /// Parse and type-check a pipeline
    Validate {
        #[command(flatten)]
        source: PipelineSource,
    },

    /// Show a pipeline before and after optimization
    Explain {
        #[command(flatten)]
        source: PipelineSource,

        #[command(flatten)]
        overrides: ConfigOverrides,
    },
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            source,
            overrides,
            run_id,
            manifest,
        } => {
            if let Err(e) = run_pipeline(&source, &overrides, run_id, manifest) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Validate { source } => match validate_pipeline(&source) {
            Ok(pipeline) => {
                println!("✓ Pipeline is valid");
                println!(
                    "  {} operator(s), {} -> {}",
                    pipeline.len(),
                    pipeline.input_type(),
                    pipeline.output_type()
                );
            }
            Err(e) => {
                eprintln!("Validation failed: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Explain { source, overrides } => {
            if let Err(e) = explain_pipeline(&source, &overrides) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

/// Log filter from `SLUICE_LOG`, then `RUST_LOG`, defaulting to warnings.
fn init_tracing() {
    let filter = std::env::var("SLUICE_LOG")
        .ok()
        .map(EnvFilter::new)
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Load the pipeline and resolve its configuration: environment, then the
/// document's `config` block, then command-line flags.
fn load(
    source: &PipelineSource,
    overrides: &ConfigOverrides,
) -> Result<(Pipeline, EngineConfig), Box<dyn std::error::Error>> {
    let registry = Registry::builtin();
    let mut config = EngineConfig::from_env();
    let pipeline = match (&source.pipeline, &source.expr) {
        (Some(path), _) => {
            let yaml_content = fs::read_to_string(path)?;
            let parsed = parse_yaml_pipeline(&yaml_content, &registry)?;
            config = parsed.engine_config(&config)?;
            parsed.pipeline
        }
        (None, Some(text)) => Pipeline::parse(text, &registry)?,
        (None, None) => return Err("give a pipeline file (-p) or pipeline text (-e)".into()),
    };
    apply_overrides(&mut config, overrides);
    config.validate()?;
    Ok((pipeline, config))
}

fn apply_overrides(cfg: &mut EngineConfig, overrides: &ConfigOverrides) {
    if let Some(capacity) = overrides.channel_capacity {
        cfg.channel_capacity = capacity;
    }
    if let Some(interval) = overrides.checkpoint_interval_ms {
        cfg.checkpoint_interval_ms = Some(interval);
    }
    if let Some(n) = overrides.checkpoints_in_flight {
        cfg.checkpoints_in_flight = n;
    }
    if let Some(dir) = &overrides.checkpoint_dir {
        cfg.checkpoint_dir = dir.clone();
    }
    if let Some(codec) = overrides.checkpoint_codec {
        cfg.checkpoint_codec = codec;
    }
    if overrides.retain_checkpoints {
        cfg.retain_checkpoints = true;
    }
    if let Some(timeout) = overrides.load_timeout_ms {
        cfg.load_timeout_ms = Some(timeout);
    }
    if let Some(batch) = overrides.batch_size {
        cfg.default_batch_size = batch;
    }
    if let Some(max) = overrides.optimizer_max_iterations {
        cfg.optimizer_max_iterations = max;
    }
}

fn run_pipeline(
    source: &PipelineSource,
    overrides: &ConfigOverrides,
    run_id: Option<PipelineRunId>,
    manifest_path: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (pipeline, config) = load(source, overrides)?;
    let engine = Engine::new(config);

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(async {
        match run_id {
            Some(id) => engine.run_with_id(pipeline, id).await,
            None => engine.run(pipeline).await,
        }
    });

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(failure) => {
            report(&failure.diagnostics);
            if let (Some(path), Some(manifest)) = (&manifest_path, &failure.manifest) {
                fs::write(path, serde_json::to_vec_pretty(manifest)?)?;
            }
            return Err(failure.into());
        }
    };
    report(&outcome.diagnostics);
    write_output(&outcome.output)?;
    if let Some(path) = &manifest_path {
        fs::write(path, serde_json::to_vec_pretty(&outcome.manifest)?)?;
    }
    print_summary(&outcome);
    Ok(())
}

fn report(diagnostics: &[Diagnostic]) {
    for d in diagnostics {
        eprintln!("{}", d);
    }
}

/// Events are printed as JSON lines, bytes are passed through.
fn write_output(output: &[Element]) -> Result<(), Box<dyn std::error::Error>> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for element in output {
        match element {
            Element::Events(slice) => out.write_all(&JsonLinesPrinter.print(slice)?)?,
            Element::Bytes(bytes) => out.write_all(bytes)?,
        }
    }
    out.flush()?;
    Ok(())
}

fn print_summary(outcome: &RunOutcome) {
    let manifest = &outcome.manifest;
    eprintln!("✓ Pipeline executed successfully");
    eprintln!("  Run id: {}", manifest.run_id);
    eprintln!("  Duration: {}ms", manifest.duration_ms());
    eprintln!("  Pipeline hash: {}", manifest.pipeline_hash.to_hex());
    if let Some(seq) = manifest.resumed_from {
        eprintln!("  Resumed from checkpoint {}", seq.get());
    }
    if manifest.checkpoints_committed > 0 {
        eprintln!("  Checkpoints: {}", manifest.checkpoints_committed);
    }
}

fn validate_pipeline(source: &PipelineSource) -> Result<Pipeline, Box<dyn std::error::Error>> {
    let (pipeline, _) = load(source, &ConfigOverrides::default())?;
    Ok(pipeline)
}

fn explain_pipeline(
    source: &PipelineSource,
    overrides: &ConfigOverrides,
) -> Result<(), Box<dyn std::error::Error>> {
    let (pipeline, config) = load(source, overrides)?;
    let before = pipeline.to_string();
    let optimized = optimize(pipeline, &config)?;

    println!("Pipeline");
    println!("========");
    println!();
    println!("Parsed:    {}", before);
    println!("Optimized: {}", optimized.pipeline);
    println!();
    println!(
        "Types: {} -> {}",
        optimized.pipeline.input_type(),
        optimized.pipeline.output_type()
    );
    println!("Iterations: {}", optimized.iterations);
    if !optimized.trace.is_empty() {
        println!();
        println!("Rewrites:");
        for (i, step) in optimized.trace.iter().enumerate() {
            println!("  {}. {}", i + 1, step);
        }
    }
    println!();
    println!("Stages:");
    for line in stage_lines(&optimized.pipeline) {
        println!("  {}", line);
    }
    Ok(())
}

/// One line per stage, with where it must run and whether it absorbs
/// pushed filters.
fn stage_lines(pipeline: &Pipeline) -> Vec<String> {
    let mut lines: Vec<String> = pipeline
        .operators()
        .iter()
        .enumerate()
        .map(|(i, op)| {
            let mut line = format!("{}. {}", i, op.name());
            if op.location() != Location::Anywhere {
                line.push_str(&format!(" [{}]", op.location()));
            }
            if op.accepts_filters() {
                line.push_str(" (absorbs filters)");
            }
            line
        })
        .collect();
    if !pipeline.is_sealed() {
        lines.push(format!("{}. (collect)", pipeline.len()));
    }
    lines
}
