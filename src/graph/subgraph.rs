//! Bounded subgraph resolution.
//!
//! Traversal is breadth-first and undirected. Edge filters (`source_doc`,
//! `min_confidence`) are applied when neighbours are fetched, so an entity
//! only reachable through a non-matching edge is never reached at all, and
//! every edge on every contributing path satisfies the filter.

use std::collections::{BTreeMap, BTreeSet};

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use super::{
    fetch_entity, relation_from_row, Entity, QueryLimits, Relation, RelationKey, MAX_DEPTH,
    MIN_DEPTH, RELATION_COLUMNS,
};
use crate::db::Db;
use crate::{KgraphError, Result};

/// Parameters of a subgraph request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubgraphQuery {
    /// Start entity; `None` (or blank) asks for a global snapshot
    pub seed: Option<String>,
    /// Requested hop count; `None` uses the configured default
    pub depth: Option<i64>,
    pub source_doc: Option<String>,
    pub min_confidence: Option<f64>,
}

impl SubgraphQuery {
    pub fn seeded(seed: &str, depth: i64) -> Self {
        Self {
            seed: Some(seed.to_string()),
            depth: Some(depth),
            ..Self::default()
        }
    }
}

/// Deduplicated entities and relations of one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Subgraph {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
    /// More relations matched than the result cap allowed
    pub truncated: bool,
}

impl Subgraph {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }
}

/// Clamp a requested depth into `[MIN_DEPTH, MAX_DEPTH]`.
pub fn clamp_depth(depth: i64) -> u32 {
    depth.clamp(MIN_DEPTH as i64, MAX_DEPTH as i64) as u32
}

/// Edge predicate shared by every traversal step.
#[derive(Debug, Clone, Default)]
struct EdgeFilter {
    source_doc: Option<String>,
    min_confidence: Option<f64>,
}

impl EdgeFilter {
    /// A threshold above 1 is kept as is and matches nothing; a non-finite
    /// one is rejected.
    fn from_query(query: &SubgraphQuery) -> Result<Self> {
        if let Some(threshold) = query.min_confidence {
            if !threshold.is_finite() {
                return Err(KgraphError::InvalidInput(format!(
                    "min_confidence must be a finite number, got {}",
                    threshold
                )));
            }
        }
        Ok(Self {
            source_doc: non_blank(query.source_doc.as_deref()),
            min_confidence: query.min_confidence,
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Resolve a subgraph under the given limits.
///
/// A seed that does not name an existing entity yields an empty subgraph,
/// not an error, so UI polling on stale names stays quiet.
pub async fn resolve_subgraph(db: &Db, query: &SubgraphQuery, limits: &QueryLimits) -> Result<Subgraph> {
    let seed = non_blank(query.seed.as_deref());
    let depth = clamp_depth(query.depth.unwrap_or(limits.default_depth as i64));
    let filter = EdgeFilter::from_query(query)?;
    let limit = limits.max_results.max(1);

    if let Some(requested) = query.depth {
        if requested != depth as i64 {
            log::debug!("Clamped subgraph depth {} to {}", requested, depth);
        }
    }

    let subgraph = db
        .with_connection(move |conn| {
            // One read transaction gives the whole traversal a consistent snapshot
            let tx = conn.transaction()?;
            let subgraph = match seed {
                Some(seed) => traverse_from_seed(&tx, &seed, depth, &filter, limit)?,
                None => global_snapshot(&tx, &filter, limit)?,
            };
            tx.commit()?;
            Ok(subgraph)
        })
        .await?;

    if subgraph.truncated {
        log::debug!("Subgraph truncated to {} relations", subgraph.relations.len());
    }

    Ok(subgraph)
}

/// One page of the relations touching `name`, in key order.
fn incident_relations(
    conn: &Connection,
    name: &str,
    filter: &EdgeFilter,
    limit: usize,
    offset: usize,
) -> rusqlite::Result<Vec<Relation>> {
    let sql = format!(
        "SELECT {} FROM relations \
         WHERE (subject = ?1 OR object = ?1) \
           AND (?2 IS NULL OR source_doc = ?2) \
           AND (?3 IS NULL OR confidence >= ?3) \
         ORDER BY subject, predicate, object \
         LIMIT ?4 OFFSET ?5",
        RELATION_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(
        params![name, filter.source_doc, filter.min_confidence, limit as i64, offset as i64],
        relation_from_row,
    )?;
    rows.collect()
}

fn traverse_from_seed(
    conn: &Connection,
    seed: &str,
    depth: u32,
    filter: &EdgeFilter,
    limit: usize,
) -> Result<Subgraph> {
    let Some(seed_entity) = fetch_entity(conn, seed)? else {
        log::debug!("Seed entity not found: {}", seed);
        return Ok(Subgraph::default());
    };

    let mut visited: BTreeSet<String> = BTreeSet::new();
    visited.insert(seed.to_string());
    let mut frontier: Vec<String> = vec![seed.to_string()];

    // key -> (hop at which the edge was first seen, relation)
    let mut found: BTreeMap<RelationKey, (u32, Relation)> = BTreeMap::new();

    // Never load more than limit + 1 distinct relations; the extra one only
    // tells us the result was cut off.
    'levels: for hop in 1..=depth {
        let mut next: BTreeSet<String> = BTreeSet::new();
        for name in &frontier {
            let mut offset = 0;
            loop {
                let budget = limit + 1 - found.len();
                let page = incident_relations(conn, name, filter, budget, offset)?;
                let fetched = page.len();
                for rel in page {
                    let other = rel.other_endpoint(name).to_string();
                    found.entry(rel.key()).or_insert((hop, rel));
                    if !visited.contains(&other) {
                        next.insert(other);
                    }
                }
                if found.len() > limit {
                    break 'levels;
                }
                // A short page is the last one; a full page may have been
                // padded by edges already found from the other endpoint.
                if fetched < budget {
                    break;
                }
                offset += fetched;
            }
        }

        if next.is_empty() {
            break;
        }
        visited.extend(next.iter().cloned());
        frontier = next.into_iter().collect();
    }

    let mut ranked: Vec<(u32, RelationKey, Relation)> = found
        .into_iter()
        .map(|(key, (hop, rel))| (hop, key, rel))
        .collect();
    ranked.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));

    let truncated = ranked.len() > limit;
    ranked.truncate(limit);
    let relations: Vec<Relation> = ranked.into_iter().map(|(_, _, rel)| rel).collect();

    let mut entities = vec![seed_entity];
    entities.extend(endpoint_entities(conn, &relations, Some(seed))?);

    Ok(Subgraph {
        entities,
        relations,
        truncated,
    })
}

fn global_snapshot(conn: &Connection, filter: &EdgeFilter, limit: usize) -> Result<Subgraph> {
    let sql = format!(
        "SELECT {} FROM relations \
         WHERE (?1 IS NULL OR source_doc = ?1) \
           AND (?2 IS NULL OR confidence >= ?2) \
         ORDER BY updated_at DESC, subject, predicate, object \
         LIMIT ?3",
        RELATION_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    // One extra row tells us whether the cap cut anything off
    let mut relations = stmt
        .query_map(
            params![filter.source_doc, filter.min_confidence, (limit + 1) as i64],
            relation_from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let truncated = relations.len() > limit;
    relations.truncate(limit);

    let entities = endpoint_entities(conn, &relations, None)?;
    Ok(Subgraph {
        entities,
        relations,
        truncated,
    })
}

/// Distinct endpoint entities of `relations`, sorted by name, excluding `skip`.
fn endpoint_entities(conn: &Connection, relations: &[Relation], skip: Option<&str>) -> Result<Vec<Entity>> {
    let names: BTreeSet<&str> = relations
        .iter()
        .flat_map(|r| [r.subject.as_str(), r.object.as_str()])
        .filter(|name| Some(*name) != skip)
        .collect();

    let mut entities = Vec::with_capacity(names.len());
    for name in names {
        // Foreign keys guarantee endpoints exist
        if let Some(entity) = fetch_entity(conn, name)? {
            entities.push(entity);
        }
    }
    Ok(entities)
}
