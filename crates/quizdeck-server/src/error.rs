use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::store::StoreError;

/// Errors surfaced by the REST routes.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Gone(String),
    QuizLocked,
    Internal(String),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest(m) | Self::NotFound(m) | Self::Gone(m) | Self::Internal(m) => {
                write!(f, "{m}")
            }
            Self::QuizLocked => write!(f, "quiz has non-archived sessions"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            Self::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            Self::Gone(m) => (StatusCode::GONE, m.clone()),
            Self::QuizLocked => (StatusCode::CONFLICT, self.to_string()),
            Self::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound("not found".to_string()),
            StoreError::QuizLocked => Self::QuizLocked,
            StoreError::Conflict => Self::BadRequest("conflict".to_string()),
            StoreError::Transient(m) | StoreError::Fatal(m) => Self::Internal(m),
        }
    }
}
