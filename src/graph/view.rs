//! Transport envelope (`{nodes, edges}`) for visualization clients.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{format_timestamp, Entity, Relation, Subgraph};

/// Stable edge id for a relation key: `r_` + first 16 hex chars of
/// SHA-256 over the unit-separated key.
pub fn relation_id(subject: &str, predicate: &str, object: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(subject.as_bytes());
    hasher.update([0x1f]);
    hasher.update(predicate.as_bytes());
    hasher.update([0x1f]);
    hasher.update(object.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("r_{}", &digest[..16])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeView {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl From<&Entity> for NodeView {
    fn from(entity: &Entity) -> Self {
        Self {
            id: entity.name.clone(),
            label: entity.name.clone(),
            created_at: Some(format_timestamp(&entity.created_at)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeView {
    pub id: String,
    pub source: String,
    pub target: String,
    pub label: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_doc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl From<&Relation> for EdgeView {
    fn from(rel: &Relation) -> Self {
        Self {
            id: relation_id(&rel.subject, &rel.predicate, &rel.object),
            source: rel.subject.clone(),
            target: rel.object.clone(),
            label: rel.predicate.clone(),
            confidence: rel.confidence,
            source_doc: Some(rel.source_doc.clone()),
            span: Some(rel.span.clone()),
            updated_at: Some(format_timestamp(&rel.updated_at)),
        }
    }
}

/// Nodes and edges ready to hand to a client. Nodes are sorted by id and
/// edges by `(source, label, target)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphView {
    pub nodes: Vec<NodeView>,
    pub edges: Vec<EdgeView>,
    #[serde(default)]
    pub truncated: bool,
}

impl GraphView {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    fn sorted(mut self) -> Self {
        self.nodes.sort_by(|a, b| a.id.cmp(&b.id));
        self.nodes.dedup_by(|a, b| a.id == b.id);
        self.edges.sort_by(|a, b| {
            (&a.source, &a.label, &a.target).cmp(&(&b.source, &b.label, &b.target))
        });
        self
    }
}

impl From<&Subgraph> for GraphView {
    fn from(subgraph: &Subgraph) -> Self {
        GraphView {
            nodes: subgraph.entities.iter().map(NodeView::from).collect(),
            edges: subgraph.relations.iter().map(EdgeView::from).collect(),
            truncated: subgraph.truncated,
        }
        .sorted()
    }
}
