//! Read-only catalog queries: statistics, degree ranking, name search and
//! source document listing.

use rusqlite::params;
use serde::Serialize;

use crate::db::Db;
use crate::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphStats {
    pub entity_count: u64,
    pub relation_count: u64,
    pub source_count: u64,
    /// Mean incident relations per entity, rounded to 2 decimals
    pub avg_degree: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityDegree {
    pub name: String,
    pub degree: u64,
}

pub async fn graph_stats(db: &Db) -> Result<GraphStats> {
    db.with_connection(|conn| {
        let (entity_count, relation_count, source_count): (i64, i64, i64) = conn.query_row(
            "SELECT \
                (SELECT COUNT(*) FROM entities), \
                (SELECT COUNT(*) FROM relations), \
                (SELECT COUNT(DISTINCT source_doc) FROM relations)",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        // Every relation contributes to two endpoint degrees
        let avg_degree = if entity_count > 0 {
            let raw = 2.0 * relation_count as f64 / entity_count as f64;
            (raw * 100.0).round() / 100.0
        } else {
            0.0
        };

        Ok(GraphStats {
            entity_count: entity_count as u64,
            relation_count: relation_count as u64,
            source_count: source_count as u64,
            avg_degree,
        })
    })
    .await
}

/// Entities ranked by incident relation count, ties by name.
pub async fn top_entities(db: &Db, limit: usize) -> Result<Vec<EntityDegree>> {
    let limit = limit.max(1) as i64;
    db.with_connection(move |conn| {
        let mut stmt = conn.prepare_cached(
            "SELECT e.name, \
                (SELECT COUNT(*) FROM relations r WHERE r.subject = e.name) + \
                (SELECT COUNT(*) FROM relations r WHERE r.object = e.name) AS degree \
             FROM entities e \
             ORDER BY degree DESC, e.name ASC \
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(EntityDegree {
                name: row.get(0)?,
                degree: row.get::<_, i64>(1)? as u64,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    })
    .await
}

/// Case-sensitive substring search over entity names.
pub async fn search_entities(db: &Db, needle: &str, limit: usize) -> Result<Vec<String>> {
    let needle = needle.trim().to_string();
    if needle.is_empty() {
        return Ok(Vec::new());
    }
    let limit = limit.max(1) as i64;
    db.with_connection(move |conn| {
        // instr() is case-sensitive and needs no LIKE escaping
        let mut stmt = conn.prepare_cached(
            "SELECT name FROM entities WHERE instr(name, ?1) > 0 ORDER BY name LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![needle, limit], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    })
    .await
}

pub async fn list_source_documents(db: &Db) -> Result<Vec<String>> {
    db.with_connection(|conn| {
        let mut stmt = conn.prepare_cached("SELECT DISTINCT source_doc FROM relations ORDER BY source_doc")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    })
    .await
}
