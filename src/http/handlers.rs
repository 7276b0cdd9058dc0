use super::state::AppState;
use crate::session::{LiveTranscript, SessionError, SessionState, SessionStats, StartRequest};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StartConsultResponse {
    pub session_id: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StopConsultResponse {
    pub status: String,
    pub message: String,
    pub stats: SessionStats,
}

#[derive(Debug, Serialize)]
pub struct ConsultStatusResponse {
    pub state: SessionState,
    pub live_transcript: LiveTranscript,
    pub stats: SessionStats,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(err: SessionError) -> axum::response::Response {
    let status = match &err {
        SessionError::Permission(_) => StatusCode::FORBIDDEN,
        SessionError::Link(_) => StatusCode::BAD_GATEWAY,
        SessionError::AlreadyActive => StatusCode::CONFLICT,
        SessionError::NotActive => StatusCode::NOT_FOUND,
        SessionError::Format(_) => StatusCode::UNPROCESSABLE_ENTITY,
    };

    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /consult/start
/// Start a consultation session
pub async fn start_consult(
    State(state): State<AppState>,
    Json(req): Json<StartRequest>,
) -> impl IntoResponse {
    info!("Start requested (context: {:?})", req.context);

    match state.controller.start(req).await {
        Ok(session_id) => (
            StatusCode::OK,
            Json(StartConsultResponse {
                session_id: session_id.clone(),
                status: "active".to_string(),
                message: format!("Consultation session {} started", session_id),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to start consultation: {}", e);
            error_response(e)
        }
    }
}

/// POST /consult/stop
/// Stop the active consultation session
pub async fn stop_consult(State(state): State<AppState>) -> impl IntoResponse {
    match state.controller.stop().await {
        Ok(stats) => (
            StatusCode::OK,
            Json(StopConsultResponse {
                status: "stopped".to_string(),
                message: "Consultation session stopped".to_string(),
                stats,
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to stop consultation: {}", e);
            error_response(e)
        }
    }
}

/// GET /consult/status
/// Lifecycle state, live transcription and session statistics
pub async fn consult_status(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.controller.stats().await;

    (
        StatusCode::OK,
        Json(ConsultStatusResponse {
            state: state.controller.state(),
            live_transcript: state.controller.live_transcript(),
            stats,
        }),
    )
        .into_response()
}

/// GET /consult/transcript
/// Finalized transcript log for the current or most recent session
pub async fn consult_transcript(State(state): State<AppState>) -> impl IntoResponse {
    let transcript = state.controller.transcript().await;
    (StatusCode::OK, Json(transcript)).into_response()
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
