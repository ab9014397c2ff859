use anyhow::Result;
use kgraph::db::migrate;
use kgraph::http::GraphHttpServer;
use kgraph::{Config, GraphEngine, KgraphError};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    // RUST_LOG overrides kgraph.log_level
    config.init_logging();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("verify");

    match command {
        "serve" => run_http_server(&config).await?,
        "verify" => run_schema_verification(&config).await?,
        other => {
            log::warn!("Unknown command '{}', running verify", other);
            run_schema_verification(&config).await?;
        }
    }

    Ok(())
}

/// Migrate, then serve the graph API
async fn run_http_server(config: &Config) -> Result<()> {
    log::info!("Starting kgraph HTTP server v{}", env!("CARGO_PKG_VERSION"));

    let engine = GraphEngine::from_config(config);
    engine.migrate(config.migrations_dir()).await?;
    log::info!("Database initialized: {}", config.db_path().display());

    let server = GraphHttpServer::new(engine, config);
    server.run(config.http_server.port).await?;

    Ok(())
}

/// Run migrations and check the resulting schema
async fn run_schema_verification(config: &Config) -> Result<()> {
    log::info!("Starting kgraph v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Configuration loaded successfully");
    log::info!("Database path: {}", config.db_path().display());
    log::info!(
        "Query limits: depth {} (max {}), {} results, path depth {}",
        config.query.default_depth,
        kgraph::graph::MAX_DEPTH,
        config.query.max_results,
        config.query.path_max_depth
    );

    let engine = GraphEngine::from_config(config);
    let applied = engine.migrate(config.migrations_dir()).await?;
    log::info!("Database initialized successfully ({} new migrations)", applied.len());

    verify_database_schema(&engine).await?;

    Ok(())
}

/// Verify that all expected database objects exist
async fn verify_database_schema(engine: &GraphEngine) -> Result<()> {
    engine.db().with_connection(|conn| {
        let missing = migrate::missing_tables(conn)?;
        if !missing.is_empty() {
            for table in &missing {
                log::error!("Missing table: {}", table);
            }
            return Err(KgraphError::Config(format!("Missing tables: {}", missing.join(", "))));
        }
        log::debug!("✓ Tables exist: {}", migrate::REQUIRED_TABLES.join(", "));

        let applied = migrate::get_applied_migrations(conn)?;
        log::debug!("✓ {} migrations applied", applied.len());

        let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%' ORDER BY name")?;
        let indexes: Vec<String> = stmt.query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

        for index_name in ["idx_relations_object", "idx_relations_source_doc", "idx_relations_updated_at"] {
            if indexes.iter().any(|i| i == index_name) {
                log::debug!("✓ Index exists: {}", index_name);
            } else {
                log::warn!("Index not found: {} (migration 002 may not be applied)", index_name);
            }
        }

        let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        if journal_mode.to_uppercase() != "WAL" {
            return Err(KgraphError::Config(format!("Journal mode is not WAL: {}", journal_mode)));
        }

        let foreign_keys: i32 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
        if foreign_keys != 1 {
            return Err(KgraphError::Config("Foreign keys not enabled".to_string()));
        }

        let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        if integrity != "ok" {
            return Err(KgraphError::Config(format!("Database integrity check failed: {}", integrity)));
        }
        log::info!("✓ Database integrity: OK");

        Ok(())
    }).await?;

    log::info!("✓ Database schema verification complete");
    Ok(())
}
