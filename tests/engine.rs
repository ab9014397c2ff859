//! End-to-end behaviour of the graph engine against a real database.

use std::path::Path;

use kgraph::db::Db;
use kgraph::graph::{PathOutcome, PathQuery, SubgraphQuery};
use kgraph::{EngineOptions, ExportFormat, GraphEngine, GraphView, KgraphError};
use tempfile::TempDir;

async fn setup_engine() -> (GraphEngine, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let engine = GraphEngine::new(Db::new(temp_dir.path().join("graph.db")), EngineOptions::default());
    let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
    engine.migrate(&migrations_dir).await.unwrap();
    (engine, temp_dir)
}

/// Build a payload the way an extraction model would return it.
fn payload(triples: &[(&str, &str, &str, f64)]) -> String {
    let items: Vec<serde_json::Value> = triples
        .iter()
        .map(|(s, p, o, c)| serde_json::json!({"subject": s, "predicate": p, "object": o, "confidence": c}))
        .collect();
    format!("```json\n{}\n```", serde_json::to_string_pretty(&items).unwrap())
}

async fn view(engine: &GraphEngine, query: SubgraphQuery) -> GraphView {
    engine.query_subgraph(&query).await.unwrap().ready().unwrap()
}

fn node_ids(view: &GraphView) -> Vec<&str> {
    view.nodes.iter().map(|n| n.id.as_str()).collect()
}

async fn counts(engine: &GraphEngine) -> (u64, u64) {
    let stats = engine.stats().await.unwrap().ready().unwrap();
    (stats.entity_count, stats.relation_count)
}

#[tokio::test]
async fn test_idempotent_merge() {
    let (engine, _temp) = setup_engine().await;
    let raw = payload(&[
        ("Marie Curie", "discovered", "Polonium", 0.9),
        ("Marie Curie", "discovered", "Radium", 0.9),
        ("Pierre Curie", "married", "Marie Curie", 0.8),
    ]);

    engine.ingest(&raw, "curie.txt").await.unwrap();
    let first = counts(&engine).await;
    let before = view(&engine, SubgraphQuery::default()).await;

    engine.ingest(&raw, "curie.txt").await.unwrap();
    assert_eq!(counts(&engine).await, first);
    assert_eq!(first, (4, 3));

    let after = view(&engine, SubgraphQuery::default()).await;
    let ids = |v: &GraphView| {
        let mut ids: Vec<String> = v.edges.iter().map(|e| e.id.clone()).collect();
        ids.sort();
        ids
    };
    assert_eq!(ids(&before), ids(&after), "edge ids are stable across merges");
}

#[tokio::test]
async fn test_identity_overwrites_confidence() {
    let (engine, _temp) = setup_engine().await;
    engine.ingest(&payload(&[("A", "rel", "B", 0.3)]), "first.txt").await.unwrap();
    engine.ingest(&payload(&[("A", "rel", "B", 0.9)]), "second.txt").await.unwrap();

    let v = view(&engine, SubgraphQuery::seeded("A", 1)).await;
    assert_eq!(v.edges.len(), 1);
    assert_eq!(v.edges[0].confidence, 0.9);
    assert_eq!(v.edges[0].source_doc.as_deref(), Some("second.txt"));
}

#[tokio::test]
async fn test_path_filter_conjunction() {
    let (engine, _temp) = setup_engine().await;
    engine.ingest(&payload(&[("A", "to", "B", 0.9)]), "X").await.unwrap();
    engine.ingest(&payload(&[("B", "to", "C", 0.9)]), "Y").await.unwrap();

    let query = SubgraphQuery {
        source_doc: Some("X".to_string()),
        ..SubgraphQuery::seeded("A", 3)
    };
    let v = view(&engine, query).await;
    assert_eq!(node_ids(&v), vec!["A", "B"]);
    assert!(v.edges.iter().all(|e| e.source_doc.as_deref() == Some("X")));
}

#[tokio::test]
async fn test_confidence_filter_excludes_unreachable_branch() {
    let (engine, _temp) = setup_engine().await;
    engine
        .ingest(&payload(&[("A", "to", "B", 0.2), ("B", "to", "C", 0.95)]), "doc")
        .await
        .unwrap();

    let query = SubgraphQuery {
        min_confidence: Some(0.5),
        ..SubgraphQuery::seeded("A", 4)
    };
    let v = view(&engine, query).await;
    assert_eq!(node_ids(&v), vec!["A"]);
    assert!(v.edges.is_empty());
}

#[tokio::test]
async fn test_dedup_under_multiple_paths() {
    let (engine, _temp) = setup_engine().await;
    engine
        .ingest(
            &payload(&[("A", "to", "B", 0.9), ("B", "to", "D", 0.9), ("A", "to", "C", 0.9), ("C", "to", "D", 0.9)]),
            "diamond",
        )
        .await
        .unwrap();

    let v = view(&engine, SubgraphQuery::seeded("A", 2)).await;
    assert_eq!(node_ids(&v), vec!["A", "B", "C", "D"]);
    assert_eq!(v.nodes.iter().filter(|n| n.id == "D").count(), 1);
    assert_eq!(v.edges.len(), 4);
}

#[tokio::test]
async fn test_shortest_path_determinism() {
    let (engine, _temp) = setup_engine().await;
    engine
        .ingest(
            &payload(&[("X", "to", "P", 0.9), ("P", "to", "Y", 0.9), ("X", "to", "Q", 0.9), ("Q", "to", "Y", 0.9)]),
            "doc",
        )
        .await
        .unwrap();

    let query = PathQuery::new("X", "Y");
    let first = engine.shortest_path(&query).await.unwrap().ready().unwrap();
    for _ in 0..5 {
        let again = engine.shortest_path(&query).await.unwrap().ready().unwrap();
        assert_eq!(again, first);
    }
    match first {
        PathOutcome::Found(path) => {
            assert_eq!(path.nodes.len(), 3);
            assert_eq!(path.nodes[1], "P");
        }
        PathOutcome::NotFound => panic!("expected a path"),
    }
}

#[tokio::test]
async fn test_not_found_is_not_an_error() {
    let (engine, _temp) = setup_engine().await;
    engine.ingest(&payload(&[("A", "to", "B", 0.9)]), "doc").await.unwrap();

    let v = view(&engine, SubgraphQuery::seeded("Nobody", 2)).await;
    assert!(v.is_empty());

    let outcome = engine.shortest_path(&PathQuery::new("A", "Nobody")).await.unwrap();
    assert_eq!(outcome.ready(), Some(PathOutcome::NotFound));
}

#[tokio::test]
async fn test_depth_clamp() {
    let (engine, _temp) = setup_engine().await;
    let chain: Vec<(String, String)> = (0..6).map(|i| (format!("N{}", i), format!("N{}", i + 1))).collect();
    let triples: Vec<(&str, &str, &str, f64)> =
        chain.iter().map(|(s, o)| (s.as_str(), "next", o.as_str(), 0.9)).collect();
    engine.ingest(&payload(&triples), "chain").await.unwrap();

    let v = view(&engine, SubgraphQuery::seeded("N0", 9)).await;
    assert_eq!(node_ids(&v), vec!["N0", "N1", "N2", "N3", "N4"]);
}

#[tokio::test]
async fn test_malformed_payload_rejects_batch_only() {
    let (engine, _temp) = setup_engine().await;

    let err = engine.ingest("I could not find any facts.", "doc").await.unwrap_err();
    match err {
        KgraphError::ExtractionFormat { raw, .. } => assert_eq!(raw, "I could not find any facts."),
        other => panic!("unexpected error: {:?}", other),
    }

    // The engine keeps working after a rejected batch
    let report = engine.ingest(&payload(&[("A", "to", "B", 0.9)]), "doc").await.unwrap();
    assert_eq!(report.merged_count, 1);
}

#[tokio::test]
async fn test_export_reuses_subgraph_query() {
    let (engine, _temp) = setup_engine().await;
    engine
        .ingest(&payload(&[("A", "to", "B", 0.9), ("C", "to", "D", 0.9)]), "doc")
        .await
        .unwrap();

    let query = SubgraphQuery::seeded("A", 1);
    let bytes = engine.export_subgraph(&query, ExportFormat::Json).await.unwrap().ready().unwrap();
    let exported: GraphView = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(exported, view(&engine, query.clone()).await);

    let csv = engine.export_subgraph(&query, ExportFormat::Csv).await.unwrap().ready().unwrap();
    let csv = String::from_utf8(csv).unwrap();
    assert_eq!(csv.lines().count(), 1 + 2 + 1);
    assert!(!csv.contains(",D,"));
}
