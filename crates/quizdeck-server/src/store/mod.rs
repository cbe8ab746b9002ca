//! Durable mirror of session state. The session actor owns the truth; the
//! store follows it through the per-session persistence queue, and is read
//! back only for crash rehydration and the REST metadata route.

pub mod memory;
pub mod sled_store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use quizdeck_core::grade::{AnswerPayload, Correctness};
use quizdeck_core::net::messages::SessionPhase;
use quizdeck_core::player::PlayerId;
use quizdeck_core::quiz::{ItemCursor, Quiz, ScoringSettings};

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    /// Unique-constraint violation, e.g. a second answer for (player, item).
    #[error("conflicting write")]
    Conflict,
    #[error("quiz has non-archived sessions")]
    QuizLocked,
    /// Worth retrying with backoff.
    #[error("transient store failure: {0}")]
    Transient(String),
    /// Integrity violation or unrecoverable backend state.
    #[error("fatal store failure: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub code: String,
    pub quiz_id: Uuid,
    /// Structure snapshot taken at creation; authoring edits never reach it.
    pub quiz: Quiz,
    pub settings: ScoringSettings,
    pub phase: SessionPhase,
    pub cursor: Option<ItemCursor>,
    pub host_token: String,
    pub started_at_ms: u64,
    pub ended_at_ms: Option<u64>,
    pub archived: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub session_id: Uuid,
    pub name: String,
    pub avatar: String,
    pub score: i64,
    pub streak: u32,
    pub token: String,
    pub joined_at_ms: u64,
    /// Cursor at join time; items before it never have answers from this
    /// player.
    pub joined_cursor: Option<ItemCursor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    pub player_id: PlayerId,
    pub item_id: Uuid,
    pub payload: AnswerPayload,
    pub received_ms: u64,
    pub correctness: Correctness,
    pub fraction: f64,
    pub points: u32,
    /// Set exactly once, at the reveal transition.
    pub finalized: bool,
}

/// Everything needed to respawn a session actor after a crash.
#[derive(Debug, Clone)]
pub struct SessionBundle {
    pub session: SessionRecord,
    pub players: Vec<PlayerRecord>,
    pub answers: Vec<AnswerRecord>,
}

#[async_trait]
pub trait Store: Send + Sync {
    // -- quizzes -----------------------------------------------------------
    async fn get_quiz(&self, id: Uuid) -> Result<Quiz, StoreError>;

    /// Insert or replace a quiz definition. Replacing fails `QuizLocked`
    /// while any non-archived session references the quiz.
    async fn put_quiz(&self, quiz: Quiz) -> Result<(), StoreError>;

    async fn has_active_session_for_quiz(&self, quiz_id: Uuid) -> Result<bool, StoreError>;

    // -- sessions ----------------------------------------------------------
    async fn create_session(&self, record: SessionRecord) -> Result<(), StoreError>;

    async fn update_session_progress(
        &self,
        session_id: Uuid,
        phase: SessionPhase,
        cursor: Option<ItemCursor>,
    ) -> Result<(), StoreError>;

    async fn finalize_session(
        &self,
        session_id: Uuid,
        final_scores: Vec<(PlayerId, i64)>,
    ) -> Result<(), StoreError>;

    async fn archive_sessions_for_quiz(&self, quiz_id: Uuid) -> Result<usize, StoreError>;

    async fn load_session_by_code(&self, code: &str) -> Result<SessionBundle, StoreError>;

    // -- players -----------------------------------------------------------
    async fn upsert_player(&self, record: PlayerRecord) -> Result<(), StoreError>;

    async fn update_player_score(
        &self,
        player_id: PlayerId,
        score: i64,
        streak: u32,
    ) -> Result<(), StoreError>;

    // -- answers -----------------------------------------------------------
    /// Append an answer. Fails `Conflict` when one already exists for the
    /// (player, item) pair; that unique key is the at-most-one-answer
    /// backstop beneath the actor's own check.
    async fn append_answer(&self, record: AnswerRecord) -> Result<(), StoreError>;

    /// Freeze an answer's grade and points. Finalizing twice fails
    /// `Conflict`; points are written exactly once.
    async fn finalize_answer(
        &self,
        player_id: PlayerId,
        item_id: Uuid,
        correctness: Correctness,
        fraction: f64,
        points: u32,
    ) -> Result<(), StoreError>;
}
