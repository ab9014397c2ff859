//! Shortest path search between two named entities.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::{fetch_entity, relation_from_row, QueryLimits, Relation, MAX_PATH_DEPTH, MIN_DEPTH, RELATION_COLUMNS};
use crate::db::Db;
use crate::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathQuery {
    pub start: String,
    pub end: String,
    /// Hop bound; `None` uses the configured default, clamped to [1, 6]
    pub max_depth: Option<i64>,
    /// Follow relations only from subject to object
    #[serde(default)]
    pub directed: bool,
}

impl PathQuery {
    pub fn new(start: &str, end: &str) -> Self {
        Self {
            start: start.to_string(),
            end: end.to_string(),
            ..Self::default()
        }
    }
}

/// One traversed relation, in its stored direction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathStep {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub confidence: f64,
}

impl From<&Relation> for PathStep {
    fn from(rel: &Relation) -> Self {
        Self {
            subject: rel.subject.clone(),
            predicate: rel.predicate.clone(),
            object: rel.object.clone(),
            confidence: rel.confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathResult {
    /// Entity names from start to end
    pub nodes: Vec<String>,
    /// `rels[i]` connects `nodes[i]` and `nodes[i + 1]`
    pub rels: Vec<PathStep>,
}

impl PathResult {
    pub fn hops(&self) -> usize {
        self.rels.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PathOutcome {
    Found(PathResult),
    NotFound,
}

pub(crate) fn clamp_path_depth(depth: i64) -> u32 {
    depth.clamp(MIN_DEPTH as i64, MAX_PATH_DEPTH as i64) as u32
}

/// Find one shortest path by hop count.
///
/// Ties are broken lexicographically: frontier entities are expanded in
/// name order and each entity keeps the first parent that reaches it, so the
/// same graph always yields the same path. Missing endpoints and paths longer
/// than the bound are `NotFound`, never errors.
pub async fn find_path(db: &Db, query: &PathQuery, limits: &QueryLimits) -> Result<PathOutcome> {
    let start = query.start.trim().to_string();
    let end = query.end.trim().to_string();
    if start.is_empty() || end.is_empty() {
        return Ok(PathOutcome::NotFound);
    }

    let max_depth = clamp_path_depth(query.max_depth.unwrap_or(limits.default_path_depth as i64));
    let directed = query.directed;

    let outcome = db
        .with_connection(move |conn| {
            let tx = conn.transaction()?;
            let outcome = search(&tx, &start, &end, max_depth, directed)?;
            tx.commit()?;
            Ok(outcome)
        })
        .await?;

    if outcome == PathOutcome::NotFound {
        log::debug!(
            "No path from {} to {} within {} hop(s)",
            query.start,
            query.end,
            max_depth
        );
    }

    Ok(outcome)
}

fn search(conn: &Connection, start: &str, end: &str, max_depth: u32, directed: bool) -> Result<PathOutcome> {
    if fetch_entity(conn, start)?.is_none() || fetch_entity(conn, end)?.is_none() {
        return Ok(PathOutcome::NotFound);
    }
    if start == end {
        return Ok(PathOutcome::Found(PathResult {
            nodes: vec![start.to_string()],
            rels: Vec::new(),
        }));
    }

    // entity -> (parent entity, relation used to reach it)
    let mut parents: HashMap<String, (String, Relation)> = HashMap::new();
    let mut visited: BTreeSet<String> = BTreeSet::new();
    visited.insert(start.to_string());
    let mut frontier: Vec<String> = vec![start.to_string()];

    for _ in 0..max_depth {
        let mut next: Vec<String> = Vec::new();
        for name in &frontier {
            for (neighbour, rel) in neighbours(conn, name, directed)? {
                if visited.insert(neighbour.clone()) {
                    parents.insert(neighbour.clone(), (name.clone(), rel));
                    next.push(neighbour);
                }
            }
        }

        if visited.contains(end) {
            return Ok(PathOutcome::Found(rebuild(start, end, &parents)));
        }
        if next.is_empty() {
            break;
        }
        next.sort();
        frontier = next;
    }

    Ok(PathOutcome::NotFound)
}

/// Neighbours of `name` in name order; parallel edges collapse to the
/// relation with the smallest key.
fn neighbours(conn: &Connection, name: &str, directed: bool) -> Result<Vec<(String, Relation)>> {
    let sql = if directed {
        format!(
            "SELECT {} FROM relations WHERE subject = ?1 ORDER BY subject, predicate, object",
            RELATION_COLUMNS
        )
    } else {
        format!(
            "SELECT {} FROM relations WHERE subject = ?1 OR object = ?1 \
             ORDER BY subject, predicate, object",
            RELATION_COLUMNS
        )
    };
    let mut stmt = conn.prepare_cached(&sql)?;
    let relations = stmt
        .query_map([name], relation_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut by_neighbour: BTreeMap<String, Relation> = BTreeMap::new();
    for rel in relations {
        let other = rel.other_endpoint(name).to_string();
        by_neighbour.entry(other).or_insert(rel);
    }
    Ok(by_neighbour.into_iter().collect())
}

fn rebuild(start: &str, end: &str, parents: &HashMap<String, (String, Relation)>) -> PathResult {
    let mut nodes = vec![end.to_string()];
    let mut rels = Vec::new();
    let mut current = end;
    while current != start {
        match parents.get(current) {
            Some((parent, rel)) => {
                rels.push(PathStep::from(rel));
                nodes.push(parent.clone());
                current = parent;
            }
            None => break,
        }
    }
    nodes.reverse();
    rels.reverse();
    PathResult { nodes, rels }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_support::{seed, setup_test_db, triple};

    fn limits() -> QueryLimits {
        QueryLimits::default()
    }

    fn found(outcome: PathOutcome) -> PathResult {
        match outcome {
            PathOutcome::Found(path) => path,
            PathOutcome::NotFound => panic!("expected a path"),
        }
    }

    #[tokio::test]
    async fn test_direct_neighbour() {
        let (db, _temp) = setup_test_db().await;
        seed(&db, vec![triple("A", "knows", "B", 0.7, "d")]).await;

        let path = found(find_path(&db, &PathQuery::new("A", "B"), &limits()).await.unwrap());
        assert_eq!(path.nodes, vec!["A", "B"]);
        assert_eq!(path.rels[0].predicate, "knows");
        assert_eq!(path.hops(), 1);
    }

    #[tokio::test]
    async fn test_shortest_path_wins() {
        let (db, _temp) = setup_test_db().await;
        seed(&db, vec![
            triple("A", "to", "B", 0.9, "d"),
            triple("B", "to", "C", 0.9, "d"),
            triple("C", "to", "D", 0.9, "d"),
            triple("A", "shortcut", "D", 0.9, "d"),
        ]).await;

        let path = found(find_path(&db, &PathQuery::new("A", "D"), &limits()).await.unwrap());
        assert_eq!(path.nodes, vec!["A", "D"]);
    }

    #[tokio::test]
    async fn test_tie_break_is_deterministic() {
        let (db, _temp) = setup_test_db().await;
        seed(&db, vec![
            triple("X", "to", "M2", 0.9, "d"),
            triple("X", "to", "M1", 0.9, "d"),
            triple("M2", "to", "Y", 0.9, "d"),
            triple("M1", "to", "Y", 0.9, "d"),
        ]).await;

        let query = PathQuery::new("X", "Y");
        let first = found(find_path(&db, &query, &limits()).await.unwrap());
        for _ in 0..5 {
            let again = found(find_path(&db, &query, &limits()).await.unwrap());
            assert_eq!(again, first);
        }
        assert_eq!(first.nodes, vec!["X", "M1", "Y"]);
    }

    #[tokio::test]
    async fn test_undirected_by_default_directed_on_request() {
        let (db, _temp) = setup_test_db().await;
        seed(&db, vec![
            triple("A", "to", "B", 0.9, "d"),
            triple("C", "to", "B", 0.9, "d"),
        ]).await;

        let path = found(find_path(&db, &PathQuery::new("A", "C"), &limits()).await.unwrap());
        assert_eq!(path.nodes, vec!["A", "B", "C"]);
        // The second step runs against its stored direction
        assert_eq!(path.rels[1].subject, "C");
        assert_eq!(path.rels[1].object, "B");

        let directed = PathQuery { directed: true, ..PathQuery::new("A", "C") };
        assert_eq!(find_path(&db, &directed, &limits()).await.unwrap(), PathOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_depth_bound() {
        let (db, _temp) = setup_test_db().await;
        seed(&db, vec![
            triple("N0", "next", "N1", 0.9, "d"),
            triple("N1", "next", "N2", 0.9, "d"),
            triple("N2", "next", "N3", 0.9, "d"),
        ]).await;

        let short = PathQuery { max_depth: Some(2), ..PathQuery::new("N0", "N3") };
        assert_eq!(find_path(&db, &short, &limits()).await.unwrap(), PathOutcome::NotFound);

        let enough = PathQuery { max_depth: Some(3), ..PathQuery::new("N0", "N3") };
        assert_eq!(found(find_path(&db, &enough, &limits()).await.unwrap()).hops(), 3);
    }

    #[tokio::test]
    async fn test_missing_endpoint_is_not_found() {
        let (db, _temp) = setup_test_db().await;
        seed(&db, vec![triple("A", "to", "B", 0.9, "d")]).await;

        let outcome = find_path(&db, &PathQuery::new("A", "Ghost"), &limits()).await.unwrap();
        assert_eq!(outcome, PathOutcome::NotFound);
        let outcome = find_path(&db, &PathQuery::new("", "B"), &limits()).await.unwrap();
        assert_eq!(outcome, PathOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_disconnected_is_not_found() {
        let (db, _temp) = setup_test_db().await;
        seed(&db, vec![
            triple("A", "to", "B", 0.9, "d"),
            triple("C", "to", "D", 0.9, "d"),
        ]).await;

        let outcome = find_path(&db, &PathQuery::new("A", "D"), &limits()).await.unwrap();
        assert_eq!(outcome, PathOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_start_equals_end() {
        let (db, _temp) = setup_test_db().await;
        seed(&db, vec![triple("A", "to", "B", 0.9, "d")]).await;

        let path = found(find_path(&db, &PathQuery::new("A", "A"), &limits()).await.unwrap());
        assert_eq!(path.nodes, vec!["A"]);
        assert!(path.rels.is_empty());
    }

    #[test]
    fn test_clamp_path_depth() {
        assert_eq!(clamp_path_depth(0), 1);
        assert_eq!(clamp_path_depth(40), MAX_PATH_DEPTH);
    }
}
