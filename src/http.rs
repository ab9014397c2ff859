//! HTTP surface for the graph engine.

use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::engine::{GraphEngine, QueryOutcome};
use crate::error::{KgraphError, Result};
use crate::graph::{ExportFormat, PathQuery, SubgraphQuery};

const DEFAULT_LIST_LIMIT: usize = 20;

/// HTTP server wrapper around a [`GraphEngine`]
pub struct GraphHttpServer {
    engine: GraphEngine,
    allowed_origins: Vec<String>,
}

impl GraphHttpServer {
    pub fn new(engine: GraphEngine, config: &Config) -> Self {
        Self {
            engine,
            allowed_origins: config.http_server.allowed_origins.clone(),
        }
    }

    /// Run the HTTP server
    pub async fn run(&self, port: u16) -> Result<()> {
        let app = router(self.engine.clone(), &self.allowed_origins);

        let addr = format!("127.0.0.1:{}", port);
        log::info!("Starting graph API on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            KgraphError::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to bind to {}: {}. Set http_server.port in config.toml to use another port",
                    addr, e
                ),
            ))
        })?;

        axum::serve(listener, app).await.map_err(|e| {
            KgraphError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("HTTP server error: {}", e),
            ))
        })?;

        Ok(())
    }
}

/// Build the API router.
///
/// An empty `allowed_origins` allows any origin.
pub fn router(engine: GraphEngine, allowed_origins: &[String]) -> Router {
    let cors = if allowed_origins.is_empty() {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = allowed_origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .route("/api/ingest", post(handle_ingest))
        .route("/api/graph", get(handle_graph))
        .route("/api/path", get(handle_path))
        .route("/api/export", get(handle_export))
        .route("/api/stats", get(handle_stats))
        .route("/api/sources", get(handle_sources))
        .route("/api/entities/search", get(handle_search))
        .route("/api/entities/top", get(handle_top))
        .route("/health", get(handle_health))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(engine)
}

#[derive(Debug, Deserialize)]
struct IngestRequest {
    /// Raw extraction output; a JSON string is used verbatim, any other JSON
    /// value is re-serialized first
    payload: Value,
    source_doc: String,
}

#[derive(Debug, Deserialize)]
struct GraphParams {
    seed: Option<String>,
    depth: Option<i64>,
    source_doc: Option<String>,
    min_confidence: Option<f64>,
    format: Option<String>,
}

impl GraphParams {
    fn subgraph_query(&self) -> SubgraphQuery {
        SubgraphQuery {
            seed: self.seed.clone(),
            depth: self.depth,
            source_doc: self.source_doc.clone(),
            min_confidence: self.min_confidence,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PathParams {
    start: String,
    end: String,
    max_depth: Option<i64>,
    #[serde(default)]
    directed: bool,
}

#[derive(Debug, Deserialize)]
struct ListParams {
    q: Option<String>,
    limit: Option<usize>,
}

async fn handle_ingest(State(engine): State<GraphEngine>, Json(request): Json<IngestRequest>) -> Response {
    let raw = match request.payload {
        Value::String(text) => text,
        other => other.to_string(),
    };

    match engine.ingest(&raw, &request.source_doc).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn handle_graph(State(engine): State<GraphEngine>, Query(params): Query<GraphParams>) -> Response {
    outcome_response(engine.query_subgraph(&params.subgraph_query()).await)
}

async fn handle_path(State(engine): State<GraphEngine>, Query(params): Query<PathParams>) -> Response {
    let query = PathQuery {
        start: params.start,
        end: params.end,
        max_depth: params.max_depth,
        directed: params.directed,
    };
    outcome_response(engine.shortest_path(&query).await)
}

async fn handle_export(State(engine): State<GraphEngine>, Query(params): Query<GraphParams>) -> Response {
    let format = match params.format.as_deref() {
        None => ExportFormat::default(),
        Some(raw) => match raw.parse::<ExportFormat>() {
            Ok(format) => format,
            Err(e) => return error_response(e),
        },
    };

    match engine.export_subgraph(&params.subgraph_query(), format).await {
        Ok(QueryOutcome::Ready(bytes)) => {
            let disposition = format!("attachment; filename=\"subgraph.{}\"", format.extension());
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, format.content_type().to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                bytes,
            )
                .into_response()
        }
        Ok(QueryOutcome::Unavailable(reason)) => unavailable_response(&reason),
        Err(e) => error_response(e),
    }
}

async fn handle_stats(State(engine): State<GraphEngine>) -> Response {
    outcome_response(engine.stats().await)
}

async fn handle_sources(State(engine): State<GraphEngine>) -> Response {
    outcome_response(engine.source_documents().await)
}

async fn handle_search(State(engine): State<GraphEngine>, Query(params): Query<ListParams>) -> Response {
    let needle = params.q.unwrap_or_default();
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    outcome_response(engine.search_entities(&needle, limit).await)
}

async fn handle_top(State(engine): State<GraphEngine>, Query(params): Query<ListParams>) -> Response {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    outcome_response(engine.top_entities(limit).await)
}

async fn handle_health(State(engine): State<GraphEngine>) -> Response {
    match engine.db().ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": "kgraph",
                "version": env!("CARGO_PKG_VERSION")
            })),
        )
            .into_response(),
        Err(e) => unavailable_response(&e.to_string()),
    }
}

fn outcome_response<T: Serialize>(result: Result<QueryOutcome<T>>) -> Response {
    match result {
        Ok(QueryOutcome::Ready(value)) => (StatusCode::OK, Json(value)).into_response(),
        Ok(QueryOutcome::Unavailable(reason)) => unavailable_response(&reason),
        Err(e) => error_response(e),
    }
}

fn unavailable_response(reason: &str) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({"status": "unavailable", "error": reason})),
    )
        .into_response()
}

fn error_response(e: KgraphError) -> Response {
    match e {
        KgraphError::ExtractionFormat { reason, raw } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"error": "extraction_format", "reason": reason, "raw": raw})),
        )
            .into_response(),
        KgraphError::InvalidInput(reason) => {
            (StatusCode::BAD_REQUEST, Json(json!({"error": reason}))).into_response()
        }
        KgraphError::StorageUnavailable(reason) => unavailable_response(&reason),
        other => {
            log::error!("Request failed: {}", other);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Internal server error", "message": other.to_string()})),
            )
                .into_response()
        }
    }
}
