//! Engine facade over the graph store.
//!
//! `GraphEngine` is what routes and binaries talk to. It holds no graph
//! state of its own; every call is an independent request against the shared
//! `Db` handle. Ingestion surfaces storage failures as errors, while queries
//! degrade to [`QueryOutcome::Unavailable`] so callers can tell "no data"
//! apart from "system unavailable".

use std::path::Path;

use serde::Serialize;

use crate::config::Config;
use crate::db::{migrate, Db};
use crate::graph::{
    self, diagnostic_excerpt, export_view, ExportFormat, GraphStats, GraphView, EntityDegree,
    MergeFailure, MergeReport, NormalizeOptions, PathOutcome, PathQuery, QueryLimits, SubgraphQuery,
    Triple, ValidationSkip,
};
use crate::{KgraphError, Result};

/// Result of a read query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum QueryOutcome<T> {
    Ready(T),
    /// Storage could not be reached; carries the reason
    Unavailable(String),
}

impl<T> QueryOutcome<T> {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, QueryOutcome::Unavailable(_))
    }

    pub fn ready(self) -> Option<T> {
        match self {
            QueryOutcome::Ready(value) => Some(value),
            QueryOutcome::Unavailable(_) => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> QueryOutcome<U> {
        match self {
            QueryOutcome::Ready(value) => QueryOutcome::Ready(f(value)),
            QueryOutcome::Unavailable(reason) => QueryOutcome::Unavailable(reason),
        }
    }
}

/// Summary of one ingested extraction payload.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub source_doc: String,
    pub merged_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub affected_entities: Vec<String>,
    pub skipped: Vec<ValidationSkip>,
    pub failures: Vec<MergeFailure>,
}

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub normalize: NormalizeOptions,
    pub limits: QueryLimits,
    pub max_payload_bytes: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            normalize: NormalizeOptions::default(),
            limits: QueryLimits::default(),
            max_payload_bytes: 1024 * 1024,
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            normalize: NormalizeOptions {
                allow_self_loops: config.ingest.allow_self_loops,
            },
            limits: config.query.limits(),
            max_payload_bytes: config.ingest.max_payload_bytes,
        }
    }
}

/// Graph ingestion and query engine.
#[derive(Clone)]
pub struct GraphEngine {
    db: Db,
    options: EngineOptions,
}

impl GraphEngine {
    pub fn new(db: Db, options: EngineOptions) -> Self {
        Self { db, options }
    }

    /// Engine for the configured database. Storage is not touched until the
    /// first call.
    pub fn from_config(config: &Config) -> Self {
        Self::new(Db::new(config.db_path()), EngineOptions::from_config(config))
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Apply pending schema migrations and return the names applied now.
    pub async fn migrate(&self, migrations_dir: &Path) -> Result<Vec<String>> {
        let migrations_dir = migrations_dir.to_path_buf();
        self.db
            .with_connection(move |conn| migrate::run_migrations(conn, &migrations_dir))
            .await
    }

    /// Normalize a raw extraction payload and merge the surviving triples.
    pub async fn ingest(&self, raw_payload: &str, source_doc: &str) -> Result<IngestReport> {
        if raw_payload.len() > self.options.max_payload_bytes {
            log::warn!(
                "Rejecting {} byte payload from {} (limit {})",
                raw_payload.len(),
                source_doc,
                self.options.max_payload_bytes
            );
            return Err(KgraphError::ExtractionFormat {
                reason: format!(
                    "payload of {} bytes exceeds the {} byte limit",
                    raw_payload.len(),
                    self.options.max_payload_bytes
                ),
                raw: diagnostic_excerpt(raw_payload),
            });
        }

        let batch = graph::normalize_extraction(raw_payload, source_doc, &self.options.normalize)?;
        let skipped_count = batch.skipped.len();
        let merge = graph::merge_triples(&self.db, batch.triples).await?;

        Ok(IngestReport {
            source_doc: source_doc.trim().to_string(),
            merged_count: merge.merged,
            failed_count: merge.failed,
            skipped_count,
            affected_entities: merge.affected_entities.into_iter().collect(),
            skipped: batch.skipped,
            failures: merge.failures,
        })
    }

    /// Merge triples that are already in normalized form.
    ///
    /// Key fields are trimmed; a triple with a blank key field or blank
    /// `source_doc` rejects the whole call as `InvalidInput`.
    pub async fn ingest_triples(&self, triples: Vec<Triple>) -> Result<MergeReport> {
        let mut cleaned = Vec::with_capacity(triples.len());
        for (index, mut triple) in triples.into_iter().enumerate() {
            for field in [&mut triple.subject, &mut triple.predicate, &mut triple.object, &mut triple.source_doc] {
                *field = field.trim().to_string();
            }
            if triple.subject.is_empty()
                || triple.predicate.is_empty()
                || triple.object.is_empty()
                || triple.source_doc.is_empty()
            {
                return Err(KgraphError::InvalidInput(format!(
                    "triple {} has an empty subject, predicate, object or source_doc",
                    index
                )));
            }
            if !(0.0..=1.0).contains(&triple.confidence) {
                return Err(KgraphError::InvalidInput(format!(
                    "triple {} has confidence {} outside [0, 1]",
                    index, triple.confidence
                )));
            }
            cleaned.push(triple);
        }
        graph::merge_triples(&self.db, cleaned).await
    }

    pub async fn query_subgraph(&self, query: &SubgraphQuery) -> Result<QueryOutcome<GraphView>> {
        let result = graph::resolve_subgraph(&self.db, query, &self.options.limits).await;
        degrade(result.map(|subgraph| GraphView::from(&subgraph)))
    }

    pub async fn shortest_path(&self, query: &PathQuery) -> Result<QueryOutcome<PathOutcome>> {
        degrade(graph::find_path(&self.db, query, &self.options.limits).await)
    }

    /// Resolve a subgraph exactly like [`query_subgraph`](Self::query_subgraph)
    /// and serialize it.
    pub async fn export_subgraph(
        &self,
        query: &SubgraphQuery,
        format: ExportFormat,
    ) -> Result<QueryOutcome<Vec<u8>>> {
        match self.query_subgraph(query).await? {
            QueryOutcome::Ready(view) => Ok(QueryOutcome::Ready(export_view(&view, format)?)),
            QueryOutcome::Unavailable(reason) => Ok(QueryOutcome::Unavailable(reason)),
        }
    }

    pub async fn stats(&self) -> Result<QueryOutcome<GraphStats>> {
        degrade(graph::graph_stats(&self.db).await)
    }

    pub async fn top_entities(&self, limit: usize) -> Result<QueryOutcome<Vec<EntityDegree>>> {
        let limit = limit.min(self.options.limits.max_results);
        degrade(graph::top_entities(&self.db, limit).await)
    }

    pub async fn search_entities(&self, needle: &str, limit: usize) -> Result<QueryOutcome<Vec<String>>> {
        let limit = limit.min(self.options.limits.max_results);
        degrade(graph::search_entities(&self.db, needle, limit).await)
    }

    pub async fn source_documents(&self) -> Result<QueryOutcome<Vec<String>>> {
        degrade(graph::list_source_documents(&self.db).await)
    }
}

fn degrade<T>(result: Result<T>) -> Result<QueryOutcome<T>> {
    match result {
        Ok(value) => Ok(QueryOutcome::Ready(value)),
        Err(e) if e.is_unavailable() => {
            log::warn!("Graph storage unavailable: {}", e);
            Ok(QueryOutcome::Unavailable(e.to_string()))
        }
        Err(e) => Err(e),
    }
}
