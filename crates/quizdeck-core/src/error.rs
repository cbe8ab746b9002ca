use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced to clients in response to a command. None of these abort
/// the session; they are reported on the submitting connection and the game
/// continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("malformed payload: {0}")]
    BadRequest(String),
    #[error("invalid or missing token")]
    Unauthorized,
    #[error("session not found, ended, or archived")]
    SessionUnavailable,
    #[error("quiz has non-archived sessions")]
    QuizLocked,
    #[error("display name already taken")]
    NameTaken,
    #[error("answer already submitted for this item")]
    AlreadyAnswered,
    #[error("item is not open for answers")]
    ItemNotOpen,
    #[error("command not valid in the current state")]
    InvalidTransition,
    #[error("unknown player")]
    UnknownPlayer,
}

/// Wire-stable error codes for `ERROR` envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    SessionUnavailable,
    QuizLocked,
    NameTaken,
    AlreadyAnswered,
    ItemNotOpen,
    InvalidTransition,
    UnknownPlayer,
}

impl CommandError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::BadRequest(_) => ErrorCode::BadRequest,
            Self::Unauthorized => ErrorCode::Unauthorized,
            Self::SessionUnavailable => ErrorCode::SessionUnavailable,
            Self::QuizLocked => ErrorCode::QuizLocked,
            Self::NameTaken => ErrorCode::NameTaken,
            Self::AlreadyAnswered => ErrorCode::AlreadyAnswered,
            Self::ItemNotOpen => ErrorCode::ItemNotOpen,
            Self::InvalidTransition => ErrorCode::InvalidTransition,
            Self::UnknownPlayer => ErrorCode::UnknownPlayer,
        }
    }

    /// Whether the connection should be closed after reporting this error.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Unauthorized | Self::SessionUnavailable)
    }
}

/// Errors raised while interpreting a stored quiz definition, e.g. an option
/// list that does not satisfy the encoding its question type requires.
#[derive(Debug, Clone, Error)]
pub enum QuizError {
    #[error("question {question_id}: {reason}")]
    BadOptionEncoding {
        question_id: uuid::Uuid,
        reason: String,
    },
}
