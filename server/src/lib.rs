use axum::{extract::{Query, State}, http::StatusCode, routing::{get, post}, Json, Router};
use folio_core::{SearchPage, Searcher, Store};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod crawl_task;

use crawl_task::{CrawlTask, StartError};

#[derive(Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub query: String,
    /// Kept as text: anything that is not a number means page 1.
    #[serde(default)]
    pub page: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct IndexRequest {
    pub path: Option<PathBuf>,
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub crawl: Arc<CrawlTask>,
    /// Directory crawled when `POST /index` names none.
    pub root: PathBuf,
    pub page_size: usize,
}

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, msg: impl ToString) -> ApiError {
    (status, Json(json!({ "error": msg.to_string() })))
}

pub fn build_app(state: AppState) -> Router {
    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(health_handler))
        .route("/search", get(search_handler))
        .route("/index", post(index_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "documents": state.store.total_document_count(),
        "crawl": state.crawl.status(),
    }))
}

pub async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchPage>, ApiError> {
    let query = params.query.trim().to_string();
    if query.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "search query cannot be empty"));
    }
    let page = params.page.as_deref().and_then(|p| p.trim().parse::<i64>().ok()).unwrap_or(1);

    let store = state.store.clone();
    let page_size = state.page_size;
    let ranked = tokio::task::spawn_blocking(move || Searcher::new(&store).with_page_size(page_size).search(&query, page))
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "search task failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "search failed")
        })?;

    match ranked {
        Ok(page) => Ok(Json(page)),
        Err(err) if err.is_input_error() => Err(api_error(StatusCode::BAD_REQUEST, err)),
        Err(err) => {
            tracing::error!(error = %err, "search failed");
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, err))
        }
    }
}

pub async fn index_handler(
    State(state): State<AppState>,
    body: Option<Json<IndexRequest>>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let root = request.path.unwrap_or_else(|| state.root.clone());
    match state.crawl.start(root) {
        Ok(status) => Ok((StatusCode::ACCEPTED, Json(json!({ "crawl": status })))),
        Err(StartError::AlreadyRunning) => Err(api_error(StatusCode::CONFLICT, "a crawl is already running")),
        Err(StartError::RootNotFound(root)) => Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("root directory not found: {}", root.display()),
        )),
    }
}
