use std::any::Any;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{rejection::BytesRejection, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, MethodRouter},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::batch::{BatchOrchestrator, DEFAULT_MAX_KEYWORDS, DEFAULT_MAX_RESULTS};

const ALLOW_METHODS: &str = "POST, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type, X-API-Key";
const API_KEY_HEADER: &str = "x-api-key";

pub struct AppState {
    pub orchestrator: BatchOrchestrator,
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid JSON in request body")]
    InvalidJson,
    #[error("Missing required parameter: query or keywords")]
    MissingParameter,
    #[error("Missing or invalid query parameter")]
    InvalidQuery,
    #[error("keywords must be a list of strings")]
    InvalidKeywords,
    #[error("{0} must be a non-negative integer")]
    InvalidNumber(&'static str),
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("{message}")]
    Body { status: StatusCode, message: String },
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidJson
            | ApiError::MissingParameter
            | ApiError::InvalidQuery
            | ApiError::InvalidKeywords
            | ApiError::InvalidNumber(_) => StatusCode::BAD_REQUEST,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Body { status, .. } => *status,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<BytesRejection> for ApiError {
    fn from(rejection: BytesRejection) -> Self {
        let status = rejection.status();
        ApiError::Body {
            status: if status.is_client_error() {
                status
            } else {
                StatusCode::BAD_REQUEST
            },
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        } else {
            info!(status = status.as_u16(), error = %self, "request rejected");
        }
        let body = json!({"success": false, "error": self.to_string()});
        json_response(status, &body).unwrap_or_else(|e| fallback_error(&e.to_string()))
    }
}

// ── Request shapes ───────────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
enum SearchRequest {
    Single {
        query: String,
        max_results: usize,
    },
    Batch {
        keywords: Vec<String>,
        max_keywords: usize,
        max_results_per_keyword: usize,
    },
}

impl SearchRequest {
    /// The request plus the body's optional `api_key` string.
    fn parse(body: &[u8]) -> Result<(Self, Option<String>), ApiError> {
        let value: Value = serde_json::from_slice(body).map_err(|_| ApiError::InvalidJson)?;
        let Some(object) = value.as_object() else {
            return Err(ApiError::MissingParameter);
        };
        let api_key = object
            .get("api_key")
            .and_then(Value::as_str)
            .and_then(non_blank);

        if let Some(query) = object.get("query") {
            let query = query
                .as_str()
                .filter(|q| !q.trim().is_empty())
                .ok_or(ApiError::InvalidQuery)?;
            let request = SearchRequest::Single {
                query: query.to_string(),
                max_results: count_param(object, "max_results", DEFAULT_MAX_RESULTS)?,
            };
            return Ok((request, api_key));
        }

        if let Some(keywords) = object.get("keywords") {
            let keywords = keywords
                .as_array()
                .ok_or(ApiError::InvalidKeywords)?
                .iter()
                .map(|k| k.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or(ApiError::InvalidKeywords)?;
            let request = SearchRequest::Batch {
                keywords,
                max_keywords: count_param(object, "max_keywords", DEFAULT_MAX_KEYWORDS)?,
                max_results_per_keyword: count_param(
                    object,
                    "max_results_per_keyword",
                    DEFAULT_MAX_RESULTS,
                )?,
            };
            return Ok((request, api_key));
        }

        Err(ApiError::MissingParameter)
    }
}

fn non_blank(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn count_param(
    object: &serde_json::Map<String, Value>,
    name: &'static str,
    default: usize,
) -> Result<usize, ApiError> {
    match object.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or(ApiError::InvalidNumber(name)),
    }
}

// ── Router ───────────────────────────────────────────────────────────────────

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/", search_routes())
        .route("/api/scraper", search_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(panic_response))
}

fn search_routes() -> MethodRouter<Arc<AppState>> {
    post(search_endpoint)
        .options(preflight)
        .fallback(method_not_allowed)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn preflight() -> Response {
    let mut response = StatusCode::OK.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    response
}

async fn method_not_allowed() -> Response {
    ApiError::MethodNotAllowed.into_response()
}

async fn search_endpoint(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let result = match body {
        Ok(body) => handle_search(&state, &headers, &body).await,
        Err(rejection) => Err(rejection.into()),
    };
    match result {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn handle_search(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, ApiError> {
    let (request, body_key) = SearchRequest::parse(body)?;
    // The header wins over the body field.
    let api_key = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(non_blank)
        .or(body_key);

    match request {
        SearchRequest::Single { query, max_results } => {
            info!(query = %query, max_results, "single query request");
            let result = state
                .orchestrator
                .client()
                .search_with_key(&query, max_results, api_key.as_deref())
                .await;
            json_response(StatusCode::OK, &result)
        }
        SearchRequest::Batch {
            keywords,
            max_keywords,
            max_results_per_keyword,
        } => {
            info!(
                keywords = keywords.len(),
                max_keywords, max_results_per_keyword, "multi-keyword request"
            );
            let result = state
                .orchestrator
                .run_with_key(
                    &keywords[..],
                    max_keywords,
                    max_results_per_keyword,
                    api_key.as_deref(),
                )
                .await;
            json_response(StatusCode::OK, &result)
        }
    }
}

// ── Response helpers ─────────────────────────────────────────────────────────

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Result<Response, ApiError> {
    let text = serde_json::to_string_pretty(body).map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok((
        status,
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        text,
    )
        .into_response())
}

fn fallback_error(message: &str) -> Response {
    let body = format!(
        r#"{{"success": false, "error": {}}}"#,
        Value::String(format!("Internal server error: {}", message))
    );
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        body,
    )
        .into_response()
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let message = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unexpected failure".to_string()
    };
    ApiError::Internal(message).into_response()
}
