pub mod config;
pub mod error;
pub mod db;
pub mod graph;
pub mod engine;
pub mod http;
pub mod payloads;

pub use config::Config;
pub use engine::{EngineOptions, GraphEngine, IngestReport, QueryOutcome};
pub use error::{KgraphError, Result};
pub use graph::{
    ExportFormat, GraphView, PathOutcome, PathQuery, PathResult, Subgraph, SubgraphQuery, Triple,
};
