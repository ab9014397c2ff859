use anyhow::Result;
use clap::Parser;
use kgraph::payloads::{discover_payload_files, PayloadFile};
use kgraph::{Config, GraphEngine, IngestReport, KgraphError};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "ingest")]
#[command(about = "Merge saved extraction payloads into the knowledge graph")]
struct Args {
    /// Payload file, or directory walked for .json/.txt/.md files
    path: PathBuf,

    /// Use this source_doc for every file instead of the relative path
    #[arg(short, long)]
    source_doc: Option<String>,

    /// Keep self-loop triples (overrides ingest.allow_self_loops)
    #[arg(long)]
    allow_self_loops: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load()?;
    config.init_logging();
    if args.allow_self_loops {
        config.ingest.allow_self_loops = true;
    }
    log::info!("Database path: {}", config.db_path().display());

    let engine = GraphEngine::from_config(&config);
    engine.migrate(config.migrations_dir()).await?;

    let files = discover_payload_files(&args.path)?;
    if files.is_empty() {
        log::warn!("No payload files found under {}", args.path.display());
        return Ok(());
    }

    let start = Instant::now();
    let total = files.len();
    let mut merged = 0usize;
    let mut skipped = 0usize;
    let mut failed = 0usize;
    let mut rejected = 0usize;

    for (idx, file) in files.iter().enumerate() {
        let source_doc = args.source_doc.clone().unwrap_or_else(|| file.relative_path.clone());
        log::info!("[{}/{}] Ingesting: {}", idx + 1, total, file.relative_path);

        match ingest_file(&engine, file, &source_doc).await {
            Ok(report) => {
                merged += report.merged_count;
                skipped += report.skipped_count;
                failed += report.failed_count;
                log::info!(
                    "✓ {} ({} merged, {} skipped, {} failed)",
                    file.relative_path,
                    report.merged_count,
                    report.skipped_count,
                    report.failed_count
                );
            }
            // Unreachable storage stops the run; other files would fail the same way
            Err(e) if e.is_unavailable() => return Err(e.into()),
            Err(e) => {
                rejected += 1;
                log::error!("✗ {}: {}", file.relative_path, e);
            }
        }
    }

    log::info!("=== Ingestion Complete ===");
    log::info!("Files: {} (rejected: {})", total, rejected);
    log::info!("Triples merged: {}", merged);
    log::info!("Items skipped: {}", skipped);
    log::info!("Merge failures: {}", failed);
    log::info!("Time: {:?}", start.elapsed());

    if rejected > 0 || failed > 0 {
        log::warn!("Some payloads were not fully ingested. Check logs above for details.");
    }

    Ok(())
}

async fn ingest_file(
    engine: &GraphEngine,
    file: &PayloadFile,
    source_doc: &str,
) -> std::result::Result<IngestReport, KgraphError> {
    let raw = std::fs::read_to_string(&file.absolute_path)?;
    engine.ingest(&raw, source_doc).await
}
