use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use dfl_client::Engine;
use dfl_client::algorithms::{ConnectedComponents, PageRank, connected_components, pagerank};
use dfl_client::sink::{pretty_format, write_parquet, write_text};
use dfl_common::EngineConfig;
use dfl_distributed::IterationResult;
use dfl_execution::{Record, Value};
use dfl_planner::IterationPlan;
use dfl_storage::{DelimitedTextSource, FieldType, InputCatalog, MemorySource, RecordSource};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Algorithm {
    ConnectedComponents,
    ConnectedComponentsBulk,
    PageRank,
}

impl Algorithm {
    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error>> {
        match s {
            "cc" => Ok(Self::ConnectedComponents),
            "cc-bulk" => Ok(Self::ConnectedComponentsBulk),
            "pagerank" => Ok(Self::PageRank),
            other => Err(format!("unknown algorithm: {other} (expected cc, cc-bulk or pagerank)").into()),
        }
    }

    fn columns(self) -> &'static [&'static str] {
        match self {
            Self::PageRank => &["vertex", "rank"],
            _ => &["vertex", "component"],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Parquet,
}

#[derive(Debug, Clone)]
struct RunOpts {
    algorithm: Algorithm,
    vertices: Option<String>,
    edges: Option<String>,
    catalog: Option<String>,
    parallelism: u32,
    max_rounds: Option<u32>,
    output: Option<PathBuf>,
    format: OutputFormat,
    config: Option<String>,
    explain: bool,
    summary: bool,
}

fn env_u32(key: &str) -> Option<u32> {
    env::var(key).ok().and_then(|v| v.parse::<u32>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env::var(key).ok().and_then(|v| v.parse::<usize>().ok())
}

fn take_value(args: &[String], i: &mut usize, flag: &str) -> Result<String, Box<dyn std::error::Error>> {
    *i += 1;
    args.get(*i)
        .cloned()
        .ok_or_else(|| format!("missing value for {flag}").into())
}

fn parse_run_opts(args: &[String]) -> Result<RunOpts, Box<dyn std::error::Error>> {
    // dfl run <algorithm> [flags]
    let algorithm = Algorithm::parse(args.get(1).ok_or("missing algorithm after 'run'")?)?;
    let mut opts = RunOpts {
        algorithm,
        vertices: None,
        edges: None,
        catalog: None,
        parallelism: env_u32("DFL_PARALLELISM").unwrap_or(1),
        max_rounds: env_u32("DFL_MAX_ROUNDS"),
        output: None,
        format: OutputFormat::Text,
        config: env::var("DFL_CONFIG").ok(),
        explain: false,
        summary: false,
    };
    let mut i = 2usize;
    while i < args.len() {
        match args[i].as_str() {
            "--vertices" => opts.vertices = Some(take_value(args, &mut i, "--vertices")?),
            "--edges" => opts.edges = Some(take_value(args, &mut i, "--edges")?),
            "--catalog" => opts.catalog = Some(take_value(args, &mut i, "--catalog")?),
            "--parallelism" => {
                opts.parallelism = take_value(args, &mut i, "--parallelism")?.parse()?;
            }
            "--max-rounds" => {
                opts.max_rounds = Some(take_value(args, &mut i, "--max-rounds")?.parse()?);
            }
            "--output" => opts.output = Some(take_value(args, &mut i, "--output")?.into()),
            "--format" => {
                opts.format = match take_value(args, &mut i, "--format")?.as_str() {
                    "text" => OutputFormat::Text,
                    "parquet" => OutputFormat::Parquet,
                    other => return Err(format!("unknown output format: {other}").into()),
                };
            }
            "--config" => opts.config = Some(take_value(args, &mut i, "--config")?),
            "--explain" => opts.explain = true,
            "--summary" => opts.summary = true,
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}").into()),
        }
        i += 1;
    }
    Ok(opts)
}

fn load_config(opts: &RunOpts) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let mut config = match &opts.config {
        Some(path) => EngineConfig::load_from_json(path)?,
        None => EngineConfig::default(),
    };
    if let Ok(dir) = env::var("DFL_SPILL_DIR") {
        config.spill_dir = dir;
    }
    if let Some(budget) = env_usize("DFL_MEM_BUDGET_BYTES") {
        config.mem_budget_bytes = budget;
    }
    Ok(config)
}

/// Resolve an input either from the catalog or as a whitespace text file.
fn open_input(
    engine: &Engine,
    opts: &RunOpts,
    name: &str,
    path: Option<&String>,
    fields: Vec<FieldType>,
) -> Result<Arc<dyn RecordSource>, Box<dyn std::error::Error>> {
    match path {
        Some(p) => Ok(Arc::new(DelimitedTextSource::new(name, p, ' ', fields))),
        None if opts.catalog.is_some() => Ok(engine.open_input(name)?),
        None => Err(format!("missing --{name} (or a --catalog declaring '{name}')").into()),
    }
}

fn build_plan(
    engine: &Engine,
    opts: &RunOpts,
) -> Result<IterationPlan, Box<dyn std::error::Error>> {
    let edges = open_input(
        engine,
        opts,
        "edges",
        opts.edges.as_ref(),
        vec![FieldType::Int64, FieldType::Int64],
    )?;
    let vertices = open_input(
        engine,
        opts,
        "vertices",
        opts.vertices.as_ref(),
        vec![FieldType::Int64],
    )?;
    match opts.algorithm {
        Algorithm::ConnectedComponents | Algorithm::ConnectedComponentsBulk => {
            let mut job = ConnectedComponents {
                parallelism: opts.parallelism,
                bulk: opts.algorithm == Algorithm::ConnectedComponentsBulk,
                ..ConnectedComponents::default()
            };
            if let Some(max_rounds) = opts.max_rounds {
                job.max_rounds = max_rounds;
            }
            let labels = connected_components::label_source(vertices.as_ref())?;
            Ok(job.plan(labels, edges)?)
        }
        Algorithm::PageRank => {
            let mut job = PageRank {
                parallelism: opts.parallelism,
                ..PageRank::default()
            };
            if let Some(max_rounds) = opts.max_rounds {
                job.max_rounds = max_rounds;
            }
            let ids = vertices
                .read()?
                .iter()
                .map(|v| v.get_i64(pagerank::VERTEX))
                .collect::<Result<Vec<_>, _>>()?;
            let edges = with_out_degrees(edges.read()?)?;
            let (ranks, deltas) = pagerank::initial_state(&ids, &edges, job.damping)?;
            Ok(job.plan(
                Arc::new(MemorySource::new("ranks", ranks)),
                Arc::new(MemorySource::new("deltas", deltas)),
                Arc::new(MemorySource::new("edges", edges)),
            )?)
        }
    }
}

/// `(source, target)` edges to `(source, target, out_degree)`.
fn with_out_degrees(edges: Vec<Record>) -> Result<Vec<Record>, Box<dyn std::error::Error>> {
    let mut degrees: BTreeMap<i64, i64> = BTreeMap::new();
    for e in &edges {
        *degrees.entry(e.get_i64(pagerank::EDGE_SOURCE)?).or_default() += 1;
    }
    let mut out = Vec::with_capacity(edges.len());
    for e in edges {
        let source = e.get_i64(pagerank::EDGE_SOURCE)?;
        out.push(Record::from_values([
            Value::Int64(source),
            Value::Int64(e.get_i64(pagerank::EDGE_TARGET)?),
            Value::Int64(degrees[&source]),
        ]));
    }
    Ok(out)
}

fn emit(opts: &RunOpts, result: &IterationResult) -> Result<(), Box<dyn std::error::Error>> {
    let mut records = result.records.clone();
    records.sort_by_key(|r| r.get_i64(0).unwrap_or(i64::MAX));
    let columns = opts.algorithm.columns();
    match (&opts.output, opts.format) {
        (Some(path), OutputFormat::Text) => write_text(path, &records, ' ')?,
        (Some(path), OutputFormat::Parquet) => write_parquet(path, &records, columns)?,
        (None, _) => println!("{}", pretty_format(&records, columns)?),
    }
    if opts.summary {
        let summary = serde_json::json!({
            "job": result.job.to_string(),
            "rounds": result.rounds,
            "termination": result.termination.to_string(),
            "records": result.records.len(),
            "aggregates": serde_json::to_value(&result.aggregates)?,
        });
        eprintln!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = env::args().skip(1).collect::<Vec<_>>();
    match args.first().map(|a| a.as_str()) {
        None | Some("--help") | Some("-h") => {
            print_usage();
            return Ok(());
        }
        Some("run") => {}
        Some(other) => return Err(format!("unknown command: {other}").into()),
    }

    let opts = parse_run_opts(&args)?;
    let engine = Engine::new(load_config(&opts)?)?;
    if let Some(catalog_path) = &opts.catalog {
        engine.register_catalog(InputCatalog::load_from_json(catalog_path)?);
    }
    let plan = build_plan(&engine, &opts)?;
    if opts.explain {
        println!("{}", engine.explain(&plan));
        return Ok(());
    }

    let result = engine.run(&plan).await?;
    info!(
        job_id = %result.job,
        rounds = result.rounds,
        termination = %result.termination,
        "run finished"
    );
    emit(&opts, &result)
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  dfl run <cc|cc-bulk|pagerank> [--vertices PATH] [--edges PATH] [--catalog PATH]");
    eprintln!("          [--parallelism N] [--max-rounds N] [--output PATH] [--format text|parquet]");
    eprintln!("          [--config PATH] [--explain] [--summary]");
    eprintln!();
    eprintln!("Inputs without --catalog are whitespace-delimited text:");
    eprintln!("  vertices: one id per line; edges: 'source target' per line.");
    eprintln!();
    eprintln!("Environment: DFL_PARALLELISM, DFL_MAX_ROUNDS, DFL_CONFIG, DFL_SPILL_DIR,");
    eprintln!("             DFL_MEM_BUDGET_BYTES, RUST_LOG");
}
