//! ekb - CLI for the Engine Knowledge Base
//!
//! Builds and queries the knowledge base of a C++ engine checkout.
//!
//! # Usage
//!
//! ```bash
//! # Build everything
//! ekb --root /path/to/UE5 all
//!
//! # Run or rerun one stage
//! ekb --root /path/to/UE5 run symbols --force
//!
//! # Extract one category of units at a time
//! ekb --root /path/to/UE5 run extract --partition Runtime
//! ekb --root /path/to/UE5 run extract --partition 'Plugins.*'
//!
//! # Bring the store up to date after edits
//! ekb --root /path/to/UE5 update
//!
//! # Query
//! ekb --root /path/to/UE5 query lookup AActor
//! ekb --root /path/to/UE5 query --detail details fuzzy_search AddMovIn
//! ekb --root /path/to/UE5 query expand ref_1a2b3c4d
//! ekb --root /path/to/UE5 query callers AActor::Tick
//! ```
//!
//! Query answers are always JSON on stdout. Logs go to stderr (`RUST_LOG`).
//! Exit codes: 0 = success (including query misses), 1 = error.

use anyhow::Result;
use clap::{Parser, Subcommand};
use engine_kb::{
    BuildMode, DetailLevel, KbConfig, Partition, Pipeline, PipelineStatus, QueryCommand,
    QueryEngine, StageSummary,
};
use serde_json::json;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ekb")]
#[command(version)]
#[command(about = "Engine Knowledge Base - incremental C++ indexer with layered queries")]
#[command(long_about = r#"
ekb indexes a unit-structured C++ engine tree and answers queries about it.

It provides:
  - Checkpointed stages: discover, extract, symbols, build
  - Incremental rebuilds driven by content hashes
  - Lookup, fuzzy search and graph queries at three detail levels

Designed for automation: use --json for machine-readable stage output.
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Source root of the engine checkout
    #[arg(short, long, global = true, default_value = ".")]
    root: PathBuf,

    /// Store directory (defaults to <root>/.kb)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Worker threads for per-unit stages (0 = all cores)
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// Build mode: full or incremental
    #[arg(long, global = true)]
    mode: Option<BuildMode>,

    /// Output JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one pipeline stage
    Run {
        /// Stage name: discover, extract, symbols or build
        stage: String,

        /// Run even if completed, and without checking inputs
        #[arg(long)]
        force: bool,

        /// Limit extract or symbols to unit categories (`Runtime`, `Plugins.*`)
        #[arg(short, long)]
        partition: Option<Partition>,
    },

    /// Run every stage in order
    All {
        #[arg(long)]
        force: bool,
    },

    /// Rescan the tree and rebuild what changed
    Update,

    /// Show stage markers and per-category progress
    Status {
        /// Only report these unit categories
        #[arg(short, long)]
        partition: Option<Partition>,
    },

    /// Remove one stage's results, or the whole store
    Clean {
        /// Stage to clear; omit to clear everything but config.json
        #[arg(long)]
        stage: Option<String>,
    },

    /// Query the knowledge base
    Query {
        /// Detail level: summary, details or source
        #[arg(short, long, default_value = "summary")]
        detail: DetailLevel,

        #[command(subcommand)]
        command: QueryArgs,
    },
}

#[derive(Subcommand)]
enum QueryArgs {
    /// Exact name, qualified name or symbol key
    Lookup { name: String },

    /// Substring and camel-case token search
    #[command(name = "fuzzy_search", alias = "fuzzy-search", alias = "search")]
    FuzzySearch {
        query: String,

        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Types deriving from a type
    Subtypes {
        name: String,

        #[arg(long)]
        transitive: bool,
    },

    /// Units depending on a unit
    Dependents {
        unit: String,

        #[arg(long)]
        transitive: bool,
    },

    /// Units a unit depends on
    Dependencies {
        unit: String,

        #[arg(long)]
        transitive: bool,
    },

    /// Declaration to definition
    Resolve { name: String },

    /// Full list behind a reference id, or details of a symbol key
    Expand { id: String },

    /// Source text for a source id
    Source { id: String },

    /// Symbols whose signatures or properties name a type
    References { name: String },

    /// Callables whose bodies call a callable
    Callers { name: String },

    /// Callables a callable's body calls
    Callees { name: String },
}

impl From<&QueryArgs> for QueryCommand {
    fn from(args: &QueryArgs) -> Self {
        match args {
            QueryArgs::Lookup { name } => QueryCommand::Lookup(name.clone()),
            QueryArgs::FuzzySearch { query, limit } => QueryCommand::FuzzySearch {
                query: query.clone(),
                limit: *limit,
            },
            QueryArgs::Subtypes { name, transitive } => QueryCommand::Subtypes {
                name: name.clone(),
                transitive: *transitive,
            },
            QueryArgs::Dependents { unit, transitive } => QueryCommand::Dependents {
                unit: unit.clone(),
                transitive: *transitive,
            },
            QueryArgs::Dependencies { unit, transitive } => QueryCommand::Dependencies {
                unit: unit.clone(),
                transitive: *transitive,
            },
            QueryArgs::Resolve { name } => QueryCommand::Resolve(name.clone()),
            QueryArgs::Expand { id } => QueryCommand::Expand(id.clone()),
            QueryArgs::Source { id } => QueryCommand::Source(id.clone()),
            QueryArgs::References { name } => QueryCommand::References(name.clone()),
            QueryArgs::Callers { name } => QueryCommand::Callers(name.clone()),
            QueryArgs::Callees { name } => QueryCommand::Callees(name.clone()),
        }
    }
}

fn main() -> Result<()> {
    // Initialize logging (only to stderr to keep stdout clean)
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    let root = cli.root.canonicalize().unwrap_or_else(|_| cli.root.clone());

    match run_command(&cli, root) {
        Ok(output) => {
            match output {
                Output::Query(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                other if cli.json => println!("{}", serde_json::to_string_pretty(&other)?),
                other => print_human_readable(&other),
            }
            Ok(())
        }
        Err(e) => {
            if cli.json {
                let err = json!({ "error": format!("{e:#}") });
                eprintln!("{}", serde_json::to_string_pretty(&err)?);
            } else {
                eprintln!("Error: {e:#}");
            }
            std::process::exit(1);
        }
    }
}

fn load_config(cli: &Cli, root: PathBuf) -> Result<KbConfig> {
    let mut config = KbConfig::load(&root, cli.store.as_deref())?;
    if let Some(workers) = cli.workers {
        config = config.with_workers(workers);
    }
    if let Some(mode) = cli.mode {
        config = config.with_build_mode(mode);
    }
    Ok(config)
}

fn run_command(cli: &Cli, root: PathBuf) -> Result<Output> {
    let config = load_config(cli, root)?;

    match &cli.command {
        Commands::Run {
            stage,
            force,
            partition,
        } => {
            let pipeline = Pipeline::new(config)?;
            Ok(Output::Stages {
                summaries: vec![pipeline.run_stage_in(stage, *force, partition.as_ref())?],
            })
        }
        Commands::All { force } => {
            let pipeline = Pipeline::new(config)?;
            Ok(Output::Stages {
                summaries: pipeline.run_all(*force)?,
            })
        }
        Commands::Update => {
            let pipeline = Pipeline::new(config)?;
            Ok(Output::Stages {
                summaries: pipeline.update()?,
            })
        }
        Commands::Status { partition } => {
            let pipeline = Pipeline::new(config)?;
            Ok(Output::Status {
                status: pipeline.status_in(partition.as_ref())?,
            })
        }
        Commands::Clean { stage } => {
            let pipeline = Pipeline::new(config)?;
            match stage {
                Some(stage) => pipeline.clear_stage(stage)?,
                None => pipeline.clean()?,
            }
            Ok(Output::Cleaned {
                store: pipeline.layout().root().display().to_string(),
                stage: stage.clone(),
            })
        }
        Commands::Query { detail, command } => {
            let engine = QueryEngine::open(&config)?;
            let answer = engine.execute(&QueryCommand::from(command), *detail);
            engine.close()?;
            Ok(Output::Query(answer?))
        }
    }
}

#[derive(serde::Serialize)]
#[serde(tag = "type")]
enum Output {
    Stages { summaries: Vec<StageSummary> },
    Status { status: PipelineStatus },
    Cleaned { store: String, stage: Option<String> },
    Query(serde_json::Value),
}

fn print_human_readable(output: &Output) {
    match output {
        Output::Stages { summaries } => {
            for s in summaries {
                let scope = s
                    .partition
                    .as_deref()
                    .map(|p| format!(" [{p}]"))
                    .unwrap_or_default();
                println!(
                    "{}{}: {} units, {} processed, {} reused, {} failed, {} warnings ({} ms)",
                    s.stage,
                    scope,
                    s.total,
                    s.processed,
                    s.skipped,
                    s.failed,
                    s.warnings,
                    s.duration_ms
                );
                for (kind, count) in &s.error_kinds {
                    println!("  {kind}: {count}");
                }
                for sample in &s.samples {
                    println!("  {sample}");
                }
            }
        }
        Output::Status { status } => {
            println!("Store: {}", status.store);
            println!("Units: {}", status.units);
            if let Some(symbols) = status.symbols {
                println!("Symbols: {symbols}");
            }
            for (stage, record) in &status.stages {
                match &record.error {
                    Some(error) => println!("  {stage}: {} ({error})", record.status),
                    None => println!("  {stage}: {}", record.status),
                }
            }
            for (category, progress) in &status.partitions {
                let stages: Vec<String> = progress
                    .completed
                    .iter()
                    .map(|(stage, done)| format!("{stage} {done}"))
                    .collect();
                println!("  [{category}] {} units: {}", progress.units, stages.join(", "));
            }
        }
        Output::Cleaned { store, stage } => match stage {
            Some(stage) => println!("Cleared stage {stage} in {store}"),
            None => println!("Cleared {store}"),
        },
        Output::Query(value) => {
            println!("{value}");
        }
    }
}
