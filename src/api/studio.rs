//! Studio endpoints: snapshot, current image, history and uploads

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;

use super::ApiState;
use crate::studio::{ImageArtifact, StudioSnapshot};

/// Build studio router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/studio", get(snapshot))
        .route("/api/images/current", get(current_image))
        .route("/api/images/history", get(history))
        .route("/api/images/history/{index}/select", post(select))
        .route("/api/images/upload", post(upload))
        .with_state(state)
}

async fn snapshot(State(state): State<Arc<ApiState>>) -> Json<StudioSnapshot> {
    Json(state.store.snapshot().await)
}

async fn current_image(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<ImageArtifact>, StudioError> {
    state
        .store
        .current_image()
        .await
        .map(Json)
        .ok_or(StudioError::NotFound("no current image".to_string()))
}

async fn history(State(state): State<Arc<ApiState>>) -> Json<Vec<ImageArtifact>> {
    Json(state.store.history().await)
}

/// Restore a history entry as the current image
async fn select(
    State(state): State<Arc<ApiState>>,
    Path(index): Path<usize>,
) -> Result<Json<ImageArtifact>, StudioError> {
    state
        .service
        .select(index)
        .await
        .map(Json)
        .ok_or_else(|| StudioError::NotFound(format!("no history entry at index {index}")))
}

/// Accept a raw image body as the new current image
///
/// The `Content-Type` header must be an `image/*` type.
async fn upload(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<ImageArtifact>), StudioError> {
    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase())
        .ok_or(StudioError::BadRequest("missing Content-Type".to_string()))?;

    if body.is_empty() {
        return Err(StudioError::BadRequest("empty image body".to_string()));
    }
    if !mime_type.starts_with("image/") {
        return Err(StudioError::BadRequest(format!(
            "expected an image type, got {mime_type}"
        )));
    }

    let artifact = state
        .service
        .upload(&body, &mime_type)
        .await
        .map_err(|e| StudioError::BadRequest(e.to_string()))?;

    tracing::info!(id = %artifact.id, mime = %artifact.mime_type, bytes = body.len(), "image uploaded");
    Ok((StatusCode::CREATED, Json(artifact)))
}

/// Studio API errors
#[derive(Debug)]
pub enum StudioError {
    NotFound(String),
    BadRequest(String),
}

impl IntoResponse for StudioError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
        };

        (status, Json(ErrorResponse::new(code, message))).into_response()
    }
}

/// Error body shared by the API handlers
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl ErrorResponse {
    #[must_use]
    pub const fn new(code: &'static str, message: String) -> Self {
        Self {
            error: ErrorBody { code, message },
        }
    }
}
