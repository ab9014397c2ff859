use clap::Parser;
use kgraph::{Config, GraphEngine, QueryOutcome};

#[derive(Parser, Debug)]
#[command(name = "stats")]
#[command(about = "Print knowledge graph statistics")]
struct Args {
    /// Number of top entities to list
    #[arg(short, long, default_value_t = 10)]
    top: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = Config::load()?;
    config.init_logging();
    let engine = GraphEngine::from_config(&config);

    println!("\n=== kgraph Statistics ===\n");

    let stats = match engine.stats().await? {
        QueryOutcome::Ready(stats) => stats,
        QueryOutcome::Unavailable(reason) => {
            println!("Graph storage unavailable: {}", reason);
            std::process::exit(2);
        }
    };

    if stats.entity_count == 0 {
        println!("The graph is empty.");
        println!("\nRun `ingest <path>` to load extraction payloads.");
        return Ok(());
    }

    println!("{:-<50}", "");
    println!("{:<30} {:>15}", "Entities", stats.entity_count);
    println!("{:<30} {:>15}", "Relations", stats.relation_count);
    println!("{:<30} {:>15}", "Source documents", stats.source_count);
    println!("{:<30} {:>15.2}", "Average degree", stats.avg_degree);
    println!("{:-<50}", "");

    if let Some(top) = engine.top_entities(args.top).await?.ready() {
        println!("\nTop {} Entities by Degree:\n", top.len());
        println!("{:-<50}", "");
        println!("{:<40} {:>8}", "Entity", "Degree");
        println!("{:-<50}", "");
        for entity in &top {
            println!("{:<40} {:>8}", truncate(&entity.name, 40), entity.degree);
        }
        println!("{:-<50}", "");
    }

    if let Some(sources) = engine.source_documents().await?.ready() {
        println!("\nSource Documents ({}):\n", sources.len());
        for source in &sources {
            println!("  {}", source);
        }
    }

    println!();
    Ok(())
}

fn truncate(name: &str, width: usize) -> String {
    if name.chars().count() <= width {
        name.to_string()
    } else {
        let head: String = name.chars().take(width.saturating_sub(1)).collect();
        format!("{}…", head)
    }
}
