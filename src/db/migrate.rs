//! Versioned schema migrations.
//!
//! Migrations are plain `NNN_description.sql` files. Applied versions are
//! recorded in `schema_migrations`; each pending file runs in its own
//! transaction together with its bookkeeping row, so a failed file leaves
//! the schema at the previous version.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};

use crate::error::{KgraphError, Result};

/// Tables the graph engine cannot run without
pub const REQUIRED_TABLES: &[&str] = &["entities", "relations", "schema_migrations"];

/// A migration file found on disk. The SQL is read only when it is applied.
#[derive(Debug, Clone, PartialEq)]
struct MigrationFile {
    version: u32,
    name: String,
    path: PathBuf,
}

fn ensure_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Names of the applied migrations, oldest first.
pub fn get_applied_migrations(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM schema_migrations ORDER BY version")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

fn applied_versions(conn: &Connection) -> Result<BTreeSet<u32>> {
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations")?;
    let versions = stmt
        .query_map([], |row| row.get::<_, u32>(0))?
        .collect::<rusqlite::Result<BTreeSet<_>>>()?;
    Ok(versions)
}

/// Parse `001_graph_tables.sql` into `(1, "001_graph_tables")`.
fn parse_migration_name(filename: &str) -> Result<(u32, String)> {
    let name = filename.trim_end_matches(".sql");
    let prefix = name.split('_').next().unwrap_or_default();
    let version = prefix
        .parse::<u32>()
        .map_err(|_| KgraphError::Config(format!("Migration file without a numeric version: {}", filename)))?;
    Ok((version, name.to_string()))
}

/// List the `.sql` files of `migrations_dir` in version order.
fn scan_migrations(migrations_dir: &Path) -> Result<Vec<MigrationFile>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(migrations_dir)? {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("sql") {
            continue;
        }
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| KgraphError::Config(format!("Invalid migration filename: {}", path.display())))?;
        let (version, name) = parse_migration_name(filename)?;
        found.push(MigrationFile { version, name, path });
    }

    found.sort_by_key(|m| m.version);
    if let Some(pair) = found.windows(2).find(|pair| pair[0].version == pair[1].version) {
        return Err(KgraphError::Config(format!(
            "Migrations {} and {} share version {}",
            pair[0].name, pair[1].name, pair[0].version
        )));
    }
    Ok(found)
}

/// Apply every migration whose version is not yet recorded and return the
/// names of the ones applied by this call.
pub fn run_migrations(conn: &mut Connection, migrations_dir: &Path) -> Result<Vec<String>> {
    ensure_migrations_table(conn)?;

    let applied = applied_versions(conn)?;
    let pending: Vec<MigrationFile> = scan_migrations(migrations_dir)?
        .into_iter()
        .filter(|m| !applied.contains(&m.version))
        .collect();

    if pending.is_empty() {
        log::debug!("Graph schema is up to date ({} migrations)", applied.len());
        return Ok(Vec::new());
    }

    let mut newly_applied = Vec::with_capacity(pending.len());
    for migration in pending {
        let sql = fs::read_to_string(&migration.path)?;

        let tx = conn.transaction()?;
        tx.execute_batch(&sql).map_err(|e| KgraphError::Migration {
            name: migration.name.clone(),
            reason: e.to_string(),
        })?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            params![migration.version, migration.name],
        )?;
        tx.commit()?;

        log::info!("Applied migration {}", migration.name);
        newly_applied.push(migration.name);
    }

    Ok(newly_applied)
}

/// Return the required tables that are missing from the schema
pub fn missing_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type='table'")?;
    let tables = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(REQUIRED_TABLES
        .iter()
        .filter(|t| !tables.iter().any(|existing| existing == *t))
        .map(|t| t.to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_migrations(files: &[(&str, &str)]) -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        for (name, sql) in files {
            fs::write(temp_dir.path().join(name), sql).unwrap();
        }
        temp_dir
    }

    #[test]
    fn test_parse_migration_name() {
        assert_eq!(parse_migration_name("001_graph_tables.sql").unwrap(), (1, "001_graph_tables".to_string()));
        assert_eq!(parse_migration_name("12_x.sql").unwrap().0, 12);
        assert!(parse_migration_name("graph_tables.sql").is_err());
    }

    #[test]
    fn test_scan_orders_by_version_and_skips_other_files() {
        let dir = write_migrations(&[
            ("010_later.sql", "SELECT 1;"),
            ("002_second.sql", "SELECT 1;"),
            ("README.md", "not a migration"),
        ]);

        let found = scan_migrations(dir.path()).unwrap();
        let versions: Vec<u32> = found.iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![2, 10]);
    }

    #[test]
    fn test_duplicate_versions_are_rejected() {
        let dir = write_migrations(&[("003_a.sql", "SELECT 1;"), ("003_b.sql", "SELECT 1;")]);
        let err = scan_migrations(dir.path()).unwrap_err();
        assert!(matches!(err, KgraphError::Config(_)));
    }

    #[test]
    fn test_run_reports_only_new_migrations() {
        let dir = write_migrations(&[("001_first.sql", "CREATE TABLE first (id INTEGER);")]);
        let mut conn = Connection::open_in_memory().unwrap();

        assert_eq!(run_migrations(&mut conn, dir.path()).unwrap(), vec!["001_first"]);
        assert!(run_migrations(&mut conn, dir.path()).unwrap().is_empty());

        fs::write(dir.path().join("002_second.sql"), "CREATE TABLE second (id INTEGER);").unwrap();
        assert_eq!(run_migrations(&mut conn, dir.path()).unwrap(), vec!["002_second"]);
        assert_eq!(get_applied_migrations(&conn).unwrap(), vec!["001_first", "002_second"]);
    }

    #[test]
    fn test_failed_migration_is_not_recorded() {
        let dir = write_migrations(&[
            ("001_ok.sql", "CREATE TABLE ok (id INTEGER);"),
            ("002_broken.sql", "CREATE TABLE broken (id INTEGER); NOT SQL AT ALL;"),
        ]);
        let mut conn = Connection::open_in_memory().unwrap();

        let err = run_migrations(&mut conn, dir.path()).unwrap_err();
        match err {
            KgraphError::Migration { name, .. } => assert_eq!(name, "002_broken"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(get_applied_migrations(&conn).unwrap(), vec!["001_ok"]);
        // The broken file's partial work is rolled back with it
        let broken: i64 = conn
            .query_row("SELECT COUNT(*) FROM sqlite_master WHERE name = 'broken'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(broken, 0);
    }

    #[test]
    fn test_full_migration_schema() {
        let mut conn = Connection::open_in_memory().unwrap();
        let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");

        let applied = run_migrations(&mut conn, &migrations_dir).unwrap();
        assert_eq!(applied, vec!["001_graph_tables", "002_graph_indexes"]);
        assert!(missing_tables(&conn).unwrap().is_empty());

        let indexes: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap();
        assert!(indexes.contains(&"idx_relations_object".to_string()));
        assert!(indexes.contains(&"idx_relations_source_doc".to_string()));
        assert!(indexes.contains(&"idx_relations_updated_at".to_string()));
    }

    #[test]
    fn test_missing_tables_on_empty_db() {
        let conn = Connection::open_in_memory().unwrap();
        let missing = missing_tables(&conn).unwrap();
        assert_eq!(missing.len(), REQUIRED_TABLES.len());
    }
}
