use anyhow::{Context, Result};
use clap::Parser;
use kgraph::{Config, ExportFormat, GraphEngine, QueryOutcome, SubgraphQuery};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "export")]
#[command(about = "Export a subgraph as JSON, GraphML or CSV")]
struct Args {
    /// Seed entity; omit for a snapshot of the most recent relations
    #[arg(long)]
    seed: Option<String>,

    /// Traversal depth (clamped to 1..=4)
    #[arg(short, long)]
    depth: Option<i64>,

    /// Only follow relations from this source document
    #[arg(long)]
    source_doc: Option<String>,

    /// Only follow relations with at least this confidence
    #[arg(long)]
    min_confidence: Option<f64>,

    /// json, graphml or csv
    #[arg(short, long, default_value = "json")]
    format: String,

    /// Output file; stdout when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let format: ExportFormat = args.format.parse()?;

    let config = Config::load()?;
    config.init_logging();
    let engine = GraphEngine::from_config(&config);

    let query = SubgraphQuery {
        seed: args.seed,
        depth: args.depth,
        source_doc: args.source_doc,
        min_confidence: args.min_confidence,
    };

    let bytes = match engine.export_subgraph(&query, format).await? {
        QueryOutcome::Ready(bytes) => bytes,
        QueryOutcome::Unavailable(reason) => anyhow::bail!("Graph storage unavailable: {}", reason),
    };

    match &args.output {
        Some(path) => {
            std::fs::write(path, &bytes)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            log::info!("Wrote {} bytes of {} to {}", bytes.len(), format, path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&bytes)?;
            stdout.flush()?;
        }
    }

    Ok(())
}
