//! feedgraph CLI - load a schedule feed, run a strategy pipeline over it and
//! write the result as NDJSON.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use feedgraph::ingest::FeedDocument;
use feedgraph::pipeline::{PipelineConfig, StrategyRegistry, TransformContext};
use feedgraph::serialization::write_store_to_file;
use feedgraph::store::{EntityStore, StoreConfig};

#[derive(Parser)]
#[command(name = "feedgraph")]
#[command(version, about = "Transform transit schedule feeds through a strategy pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a feed, run the pipeline and write the resulting records
    Run {
        /// Feed document (JSON)
        #[arg(short, long)]
        feed: PathBuf,

        /// Pipeline definition (YAML); without one the feed is passed through
        #[arg(short, long)]
        pipeline: Option<PathBuf>,

        /// Output file (NDJSON)
        #[arg(short, long, default_value = "feed.ndjson")]
        output: PathBuf,

        /// Second feed loaded read-only for strategies that compare against it
        #[arg(short, long)]
        reference: Option<PathBuf>,

        /// Refuse removals that would orphan owned records (overrides the pipeline file)
        #[arg(long)]
        strict: bool,

        /// Keep every trip of a block once one of them is kept (overrides the pipeline file)
        #[arg(long)]
        retain_blocks: bool,
    },

    /// Check a pipeline definition without loading a feed
    Validate {
        #[arg(short, long)]
        pipeline: PathBuf,
    },

    /// List registered strategy names
    Strategies,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            feed,
            pipeline,
            output,
            reference,
            strict,
            retain_blocks,
        } => run(feed, pipeline, output, reference, strict, retain_blocks),
        Commands::Validate { pipeline } => validate(pipeline),
        Commands::Strategies => {
            for name in StrategyRegistry::with_builtins().list_strategies() {
                println!("{}", name);
            }
            Ok(())
        }
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn load_config(pipeline: Option<PathBuf>) -> Result<PipelineConfig, String> {
    match pipeline {
        Some(path) => PipelineConfig::load_from_file(&path).map_err(|e| e.to_string()),
        None => Ok(PipelineConfig::default()),
    }
}

fn load_feed(path: &Path, config: &StoreConfig) -> Result<EntityStore, String> {
    let document = FeedDocument::load_from_file(path).map_err(|e| e.to_string())?;
    let mut store = EntityStore::transit(*config).map_err(|e| e.to_string())?;
    let report = document.load_into(&mut store).map_err(|e| e.to_string())?;
    if report.recoverable() > 0 {
        tracing::warn!(
            "{}: skipped {} malformed row(s), {} reference(s) left unresolved",
            path.display(),
            report.malformed.len(),
            report.unresolved.len()
        );
    }
    Ok(store)
}

fn run(
    feed: PathBuf,
    pipeline: Option<PathBuf>,
    output: PathBuf,
    reference: Option<PathBuf>,
    strict: bool,
    retain_blocks: bool,
) -> Result<(), String> {
    let mut config = load_config(pipeline)?;
    if strict {
        config.store.strict = true;
    }
    if retain_blocks {
        config.retention.retain_blocks = true;
    }

    let mut store = load_feed(&feed, &config.store)?;
    let registry = StrategyRegistry::default();
    let transform = registry.build_pipeline(&config).map_err(|e| e.to_string())?;

    let mut context = TransformContext::new(config.params.clone()).with_retention(config.retention);
    if let Some(path) = &reference {
        let reference_store = load_feed(path, &StoreConfig::default())?;
        context = context.with_reference_store(Arc::new(reference_store));
    }

    let report = transform.run(&mut context, &mut store).map_err(|e| e.to_string())?;
    tracing::info!(
        "ran {} strategy(ies): {} removed, {} recoverable condition(s)",
        report.strategies.len(),
        report.total("removed"),
        report.total("recoverable")
    );

    write_store_to_file(&store, &output).map_err(|e| e.to_string())?;
    Ok(())
}

fn validate(pipeline: PathBuf) -> Result<(), String> {
    let config = PipelineConfig::load_from_file(&pipeline).map_err(|e| e.to_string())?;
    let transform = StrategyRegistry::default()
        .build_pipeline(&config)
        .map_err(|e| e.to_string())?;
    println!("{}: {} strategy(ies)", pipeline.display(), transform.len());
    for name in transform.names() {
        println!("  {}", name);
    }
    Ok(())
}
