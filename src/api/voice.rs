//! Voice session endpoints

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use serde::Serialize;

use super::ApiState;
use super::studio::ErrorResponse;
use crate::controller::{VoiceOutcome, VoicePhase};
use crate::studio::AppStatus;

/// Build voice router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/toggle", post(toggle))
        .route("/stop", post(stop))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct ToggleResponse {
    pub outcome: VoiceOutcome,
    pub status: AppStatus,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub phase: VoicePhase,
    pub status: AppStatus,
}

/// Start the voice session, or stop it if one is running
async fn toggle(State(state): State<Arc<ApiState>>) -> Result<Json<ToggleResponse>, VoiceError> {
    let outcome = state
        .voice
        .toggle()
        .await
        .map_err(|e| VoiceError::StartFailed(e.to_string()))?;

    Ok(Json(ToggleResponse {
        outcome,
        status: state.store.status().await,
    }))
}

async fn stop(State(state): State<Arc<ApiState>>) -> Json<StopResponse> {
    state.voice.stop().await;
    Json(StopResponse {
        phase: state.voice.phase(),
        status: state.store.status().await,
    })
}

/// Voice API errors
#[derive(Debug)]
pub enum VoiceError {
    StartFailed(String),
}

impl IntoResponse for VoiceError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::StartFailed(msg) => (StatusCode::SERVICE_UNAVAILABLE, "voice_start_failed", msg),
        };

        (status, Json(ErrorResponse::new(code, message))).into_response()
    }
}
