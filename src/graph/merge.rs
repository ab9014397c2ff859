//! Merge engine: keyed upserts of normalized triples into graph storage.
//!
//! Each triple is one `BEGIN IMMEDIATE` transaction that ensures both
//! endpoint entities and then upserts the relation. Existence is never
//! checked separately: `ON CONFLICT` on the identity key does the matching,
//! so concurrent batches cannot create duplicates.

use std::collections::BTreeSet;

use chrono::Utc;
use rusqlite::{params, Connection, TransactionBehavior};
use serde::Serialize;

use super::{format_timestamp, Triple};
use crate::db::Db;
use crate::{KgraphError, Result};

const ENSURE_ENTITY: &str =
    "INSERT INTO entities (name, created_at) VALUES (?1, ?2) ON CONFLICT(name) DO NOTHING";

const UPSERT_RELATION: &str = r#"
    INSERT INTO relations (subject, predicate, object, confidence, source_doc, span, updated_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
    ON CONFLICT(subject, predicate, object) DO UPDATE SET
        confidence = excluded.confidence,
        source_doc = excluded.source_doc,
        span = excluded.span,
        updated_at = excluded.updated_at
"#;

/// One triple that could not be written.
#[derive(Debug, Clone, Serialize)]
pub struct MergeFailure {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub error: String,
}

/// Outcome of merging one batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeReport {
    pub merged: usize,
    pub failed: usize,
    pub failures: Vec<MergeFailure>,
    pub affected_entities: BTreeSet<String>,
}

/// Upsert a batch of normalized triples.
///
/// Triples are applied one by one; a failed triple is recorded in the report
/// and does not roll back the ones before it. The whole call fails only when
/// storage cannot be reached at all.
pub async fn merge_triples(db: &Db, triples: Vec<Triple>) -> Result<MergeReport> {
    if triples.is_empty() {
        return Ok(MergeReport::default());
    }

    let total = triples.len();
    let report = db
        .with_connection(move |conn| {
            let mut report = MergeReport::default();
            for triple in &triples {
                match upsert_triple(conn, triple) {
                    Ok(()) => {
                        report.merged += 1;
                        report.affected_entities.insert(triple.subject.clone());
                        report.affected_entities.insert(triple.object.clone());
                    }
                    Err(e) => {
                        log::warn!(
                            "Failed to merge ({}) -[{}]-> ({}): {}",
                            triple.subject,
                            triple.predicate,
                            triple.object,
                            e
                        );
                        report.failed += 1;
                        report.failures.push(MergeFailure {
                            subject: triple.subject.clone(),
                            predicate: triple.predicate.clone(),
                            object: triple.object.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }
            Ok(report)
        })
        .await?;

    log::info!(
        "Merged {}/{} triple(s), {} failed, {} entities touched",
        report.merged,
        total,
        report.failed,
        report.affected_entities.len()
    );

    Ok(report)
}

/// Ensure both endpoints, then upsert the relation, as one atomic unit.
fn upsert_triple(conn: &mut Connection, triple: &Triple) -> Result<()> {
    let now = format_timestamp(&Utc::now());

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(transient)?;
    {
        let mut ensure = tx.prepare_cached(ENSURE_ENTITY).map_err(transient)?;
        ensure.execute(params![triple.subject, now]).map_err(transient)?;
        ensure.execute(params![triple.object, now]).map_err(transient)?;

        let mut upsert = tx.prepare_cached(UPSERT_RELATION).map_err(transient)?;
        upsert
            .execute(params![
                triple.subject,
                triple.predicate,
                triple.object,
                triple.confidence,
                triple.source_doc,
                triple.span,
                now,
            ])
            .map_err(transient)?;
    }
    tx.commit().map_err(transient)?;
    Ok(())
}

fn transient(e: rusqlite::Error) -> KgraphError {
    KgraphError::MergeTransient(e.to_string())
}
