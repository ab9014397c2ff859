//! Knowledge graph module: triple normalization, keyed merge, bounded
//! subgraph/path queries and view serialization.
//!
//! Entities are identified by their trimmed, case-sensitive name. Relations
//! are identified by `(subject, predicate, object)`; provenance fields on a
//! relation are last-writer-wins.

mod catalog;
mod export;
mod merge;
mod normalize;
mod path;
mod subgraph;
mod view;

pub use catalog::{graph_stats, list_source_documents, search_entities, top_entities, EntityDegree, GraphStats};
pub use export::{export_view, ExportFormat};
pub use merge::{merge_triples, MergeFailure, MergeReport};
pub use normalize::{
    normalize_extraction, normalize_items, strip_code_fence, NormalizeOptions, NormalizedBatch,
    SkipReason, ValidationSkip, DEFAULT_CONFIDENCE,
};
pub(crate) use normalize::diagnostic_excerpt;
pub use path::{find_path, PathOutcome, PathQuery, PathResult, PathStep};
pub use subgraph::{clamp_depth, resolve_subgraph, Subgraph, SubgraphQuery};
pub use view::{relation_id, GraphView, EdgeView, NodeView};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Smallest traversal depth a query can ask for.
pub const MIN_DEPTH: u32 = 1;
/// Subgraph depth requests above this are clamped.
pub const MAX_DEPTH: u32 = 4;
/// Path search depth requests above this are clamped.
pub const MAX_PATH_DEPTH: u32 = 6;

/// Per-engine query bounds, usually taken from `[query]` in config.toml.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryLimits {
    pub default_depth: u32,
    pub max_results: usize,
    pub default_path_depth: u32,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            default_depth: 1,
            max_results: 100,
            default_path_depth: 5,
        }
    }
}

/// A uniquely named node in the knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Merge identity of a relation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationKey {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

/// A directed, typed, attributed edge between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub confidence: f64,
    pub source_doc: String,
    pub span: String,
    pub updated_at: DateTime<Utc>,
}

impl Relation {
    pub fn key(&self) -> RelationKey {
        RelationKey {
            subject: self.subject.clone(),
            predicate: self.predicate.clone(),
            object: self.object.clone(),
        }
    }

    /// The endpoint on the other side of `name`, treating the edge as undirected.
    pub fn other_endpoint(&self, name: &str) -> &str {
        if self.subject == name {
            &self.object
        } else {
            &self.subject
        }
    }
}

/// A validated subject–predicate–object assertion ready to merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub confidence: f64,
    pub span: String,
    pub source_doc: String,
}

impl Triple {
    pub fn key(&self) -> RelationKey {
        RelationKey {
            subject: self.subject.clone(),
            predicate: self.predicate.clone(),
            object: self.object.clone(),
        }
    }
}

/// Format a timestamp the way it is stored: fixed-width RFC 3339 UTC,
/// so text ordering matches time ordering.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Read a stored timestamp column.
pub(crate) fn timestamp_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Column list shared by every relation query; pairs with `relation_from_row`.
pub(crate) const RELATION_COLUMNS: &str =
    "subject, predicate, object, confidence, source_doc, span, updated_at";

pub(crate) fn relation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Relation> {
    Ok(Relation {
        subject: row.get(0)?,
        predicate: row.get(1)?,
        object: row.get(2)?,
        confidence: row.get(3)?,
        source_doc: row.get(4)?,
        span: row.get(5)?,
        updated_at: timestamp_column(row, 6)?,
    })
}

/// Look up one entity by canonical name.
pub(crate) fn fetch_entity(
    conn: &rusqlite::Connection,
    name: &str,
) -> rusqlite::Result<Option<Entity>> {
    let mut stmt = conn.prepare_cached("SELECT name, created_at FROM entities WHERE name = ?1")?;
    let mut rows = stmt.query([name])?;
    match rows.next()? {
        Some(row) => Ok(Some(Entity {
            name: row.get(0)?,
            created_at: timestamp_column(row, 1)?,
        })),
        None => Ok(None),
    }
}
