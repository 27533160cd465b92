use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, header};
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::models::{
    BatchItem, BatchRequest, BatchResponse, ErrorResponse, GenerateRequest, RebakeRequest,
};
use super::state::ServerState;
use crate::data::mime_from_extension;
use crate::error::PipelineError;
use crate::model::ContentItem;
use crate::pipeline::{Pipeline, RunOutcome};
use crate::providers::Provider;
use crate::settings::Settings;
use crate::storage::{ContentStore, LocalObjectStore};

pub async fn run_server(settings: Settings, addr: String) -> Result<()> {
    let state = Arc::new(ServerState {
        pipeline: Pipeline::from_settings(&settings),
        media: Some(LocalObjectStore::from_settings(&settings)),
        batch_concurrency: settings.batch_concurrency,
        run_timeout: Duration::from_secs(settings.generation_timeout_secs),
    });
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| "failed to bind server address")?;
    info!(addr = %addr, "serving overlay pipeline");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

pub(crate) fn router<P: Provider + 'static>(state: Arc<ServerState<P>>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/items/:id", get(get_item::<P>))
        .route("/items/:id/generate", post(generate::<P>))
        .route("/items/:id/rebake", post(rebake::<P>))
        .route("/batch", post(batch::<P>))
        .route("/media/*path", get(media::<P>))
        .with_state(state)
        .layer(axum::middleware::from_fn(cors_middleware))
}

pub(crate) struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn new(status: StatusCode, kind: &str, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                error: error.into(),
                kind: kind.to_string(),
                url: None,
            },
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let status = match &err {
            PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::Generation(_) | PipelineError::Analysis(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            body: error_body(&err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn error_body(err: &PipelineError) -> ErrorResponse {
    ErrorResponse {
        error: err.to_string(),
        kind: err.kind().to_string(),
        url: err.surviving_url().map(str::to_string),
    }
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn cors_middleware(req: Request<Body>, next: Next) -> Result<Response<Body>, StatusCode> {
    if req.method() == Method::OPTIONS {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return Ok(response);
    }
    let mut response = next.run(req).await;
    apply_cors_headers(response.headers_mut());
    Ok(response)
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET,POST,OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("content-type,authorization"),
    );
}

async fn get_item<P: Provider>(
    State(state): State<Arc<ServerState<P>>>,
    Path(id): Path<String>,
) -> Result<Json<ContentItem>, ApiError> {
    let item = state
        .pipeline
        .records()
        .get(&id)
        .await
        .map_err(|err| ApiError::from(PipelineError::persistence(None, err)))?
        .ok_or_else(|| ApiError::from(PipelineError::NotFound(id)))?;
    Ok(Json(item))
}

async fn generate<P: Provider>(
    State(state): State<Arc<ServerState<P>>>,
    Path(id): Path<String>,
    Json(payload): Json<GenerateRequest>,
) -> Result<Json<RunOutcome>, ApiError> {
    if payload.prompt.trim().is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "prompt is required",
        ));
    }
    let request = payload.into_run_request(id);
    let outcome = state
        .pipeline
        .run_with_timeout(request, state.run_timeout)
        .await?;
    Ok(Json(outcome))
}

async fn rebake<P: Provider>(
    State(state): State<Arc<ServerState<P>>>,
    Path(id): Path<String>,
    Json(payload): Json<RebakeRequest>,
) -> Result<Json<RunOutcome>, ApiError> {
    let outcome = state
        .pipeline
        .rebake(&id, &payload.text, &payload.style)
        .await?;
    Ok(Json(outcome))
}

async fn batch<P: Provider>(
    State(state): State<Arc<ServerState<P>>>,
    Json(payload): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, ApiError> {
    if let Some(missing) = payload
        .items
        .iter()
        .position(|item| item.item_id.trim().is_empty() || item.prompt.trim().is_empty())
    {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            format!("items[{}] needs itemId and prompt", missing),
        ));
    }
    let results = state
        .pipeline
        .run_batch(payload.items, state.batch_concurrency)
        .await
        .into_iter()
        .map(|(item_id, result)| match result {
            Ok(outcome) => BatchItem {
                item_id,
                outcome: Some(outcome),
                error: None,
            },
            Err(err) => BatchItem {
                item_id,
                outcome: None,
                error: Some(error_body(&err)),
            },
        })
        .collect();
    Ok(Json(BatchResponse { results }))
}

async fn media<P: Provider>(
    State(state): State<Arc<ServerState<P>>>,
    Path(path): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let not_found = || ApiError::new(StatusCode::NOT_FOUND, "not_found", "object not found");
    let store = state.media.as_ref().ok_or_else(not_found)?;
    let bytes = store.read_media(&path).await.map_err(|_| not_found())?;
    let ext = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    Ok((
        [(header::CONTENT_TYPE, mime_from_extension(ext))],
        bytes,
    ))
}
