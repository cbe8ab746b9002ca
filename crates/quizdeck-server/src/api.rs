//! Auxiliary REST surface: session creation, public session metadata, quiz
//! seeding, and the bulk-archive unlock path. The game itself runs entirely
//! over the websocket.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use quizdeck_core::quiz::{Quiz, ScoringSettings};

use crate::error::AppError;
use crate::registry::CreatedSession;
use crate::state::AppState;
use crate::store::StoreError;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub quiz_id: Uuid,
    /// Overrides the quiz's scoring settings for this session.
    pub settings: Option<ScoringSettings>,
}

/// `POST /sessions` — create a session from a quiz. Returns the join code
/// and the host owner token.
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<CreatedSession>), AppError> {
    let mut registry = state.registry.write().await;
    let created = registry
        .create_session(request.quiz_id, request.settings)
        .await
        .map_err(|e| match e {
            StoreError::NotFound => AppError::NotFound("quiz not found".to_string()),
            other => AppError::from(other),
        })?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Serialize)]
pub struct SessionMetadata {
    pub session_id: Uuid,
    pub code: String,
    pub quiz_title: String,
    pub phase: quizdeck_core::net::messages::SessionPhase,
    pub player_count: usize,
    pub started_at_ms: u64,
    pub ended_at_ms: Option<u64>,
}

/// `GET /sessions/code/{code}` — public metadata, or `410 Gone` once the
/// session is archived.
pub async fn session_by_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<SessionMetadata>, AppError> {
    if !quizdeck_core::code::is_valid_code(&code) {
        return Err(AppError::BadRequest("malformed join code".to_string()));
    }
    let bundle = state
        .store
        .load_session_by_code(&code)
        .await
        .map_err(|e| match e {
            StoreError::NotFound => AppError::NotFound("session not found".to_string()),
            other => AppError::from(other),
        })?;
    if bundle.session.archived {
        return Err(AppError::Gone("session archived".to_string()));
    }
    Ok(Json(SessionMetadata {
        session_id: bundle.session.id,
        code: bundle.session.code,
        quiz_title: bundle.session.quiz.title,
        phase: bundle.session.phase,
        player_count: bundle.players.len(),
        started_at_ms: bundle.session.started_at_ms,
        ended_at_ms: bundle.session.ended_at_ms,
    }))
}

/// `PUT /quizzes/{id}` — insert or replace a quiz definition. Replacement is
/// refused with `409` while the quiz is structurally locked by live
/// sessions; the host resolves that through the archive route below.
pub async fn put_quiz(
    State(state): State<AppState>,
    Path(quiz_id): Path<Uuid>,
    Json(mut quiz): Json<Quiz>,
) -> Result<StatusCode, AppError> {
    quiz.id = quiz_id;
    state.store.put_quiz(quiz).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct ArchiveResponse {
    pub archived: usize,
}

/// `POST /quizzes/{id}/sessions/archive` — archive every session of a quiz,
/// ending live ones and lifting the structural lock.
pub async fn archive_quiz_sessions(
    State(state): State<AppState>,
    Path(quiz_id): Path<Uuid>,
) -> Result<Json<ArchiveResponse>, AppError> {
    let mut registry = state.registry.write().await;
    let archived = registry.archive_for_quiz(quiz_id).await?;
    Ok(Json(ArchiveResponse { archived }))
}
