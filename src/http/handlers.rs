use super::state::AppState;
use crate::error::{CaptureError, StreamError};
use crate::session::{ConnectionState, RecordedChunk, StreamStatus};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::{error, info, warn};

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct ChunkListResponse {
    pub chunks: Vec<RecordedChunk>,
}

#[derive(Debug, Serialize)]
pub struct ClearChunksResponse {
    pub removed: usize,
}

#[derive(Debug, Serialize)]
pub struct ReplayResponse {
    pub chunk_id: u64,
    pub status: String,
}

fn error_response(err: StreamError) -> Response {
    let status = match &err {
        StreamError::Permission(_) => StatusCode::FORBIDDEN,
        StreamError::InvalidState(_) | StreamError::Capture(CaptureError::AlreadyActive) => {
            StatusCode::CONFLICT
        }
        StreamError::UnknownChunk(_) => StatusCode::NOT_FOUND,
        StreamError::Transport(_) => StatusCode::BAD_GATEWAY,
        StreamError::Decode(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

/// Reply with the latest status, or the controller's error
async fn status_response(state: &AppState) -> Response {
    match state.controller.status().await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /session/status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    status_response(&state).await
}

/// POST /session/connect
/// Acquire the microphone, open the media stream and send the start frame
pub async fn connect(State(state): State<AppState>) -> impl IntoResponse {
    info!("Connect requested");

    match state.controller.connect().await {
        Ok(()) => status_response(&state).await,
        Err(e) => {
            error!("Failed to connect: {}", e);

            // A failed start frame leaves the controller holding its devices
            let status: StreamStatus = state.controller.current_status();
            if status.state == ConnectionState::Error {
                if let Err(e) = state.controller.disconnect().await {
                    warn!("Failed to release after connect error: {}", e);
                }
            }

            error_response(e)
        }
    }
}

/// POST /session/disconnect
pub async fn disconnect(State(state): State<AppState>) -> impl IntoResponse {
    info!("Disconnect requested");

    match state.controller.disconnect().await {
        Ok(()) => status_response(&state).await,
        Err(e) => error_response(e),
    }
}

/// POST /session/capture/start
pub async fn start_capture(State(state): State<AppState>) -> impl IntoResponse {
    match state.controller.start_capture().await {
        Ok(()) => status_response(&state).await,
        Err(e) => error_response(e),
    }
}

/// POST /session/capture/stop
pub async fn stop_capture(State(state): State<AppState>) -> impl IntoResponse {
    match state.controller.stop_capture().await {
        Ok(()) => status_response(&state).await,
        Err(e) => error_response(e),
    }
}

/// POST /session/interrupt
pub async fn interrupt(State(state): State<AppState>) -> impl IntoResponse {
    match state.controller.interrupt().await {
        Ok(()) => status_response(&state).await,
        Err(e) => error_response(e),
    }
}

/// GET /session/chunks
pub async fn list_chunks(State(state): State<AppState>) -> impl IntoResponse {
    match state.controller.history().await {
        Ok(chunks) => (StatusCode::OK, Json(ChunkListResponse { chunks })).into_response(),
        Err(e) => error_response(e),
    }
}

/// DELETE /session/chunks
pub async fn clear_chunks(State(state): State<AppState>) -> impl IntoResponse {
    match state.controller.clear_history().await {
        Ok(removed) => (StatusCode::OK, Json(ClearChunksResponse { removed })).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /session/chunks/:chunk_id/replay
pub async fn replay_chunk(
    State(state): State<AppState>,
    Path(chunk_id): Path<u64>,
) -> impl IntoResponse {
    match state.controller.replay_chunk(chunk_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReplayResponse {
                chunk_id,
                status: "playing".to_string(),
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
