//! In-memory store. Backs the test harness and `data_dir = ""` deployments;
//! also the reference semantics the sled backend is tested against.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use quizdeck_core::grade::Correctness;
use quizdeck_core::net::messages::SessionPhase;
use quizdeck_core::player::PlayerId;
use quizdeck_core::quiz::{ItemCursor, Quiz};
use quizdeck_core::time::unix_ms;

use super::{AnswerRecord, PlayerRecord, SessionBundle, SessionRecord, Store, StoreError};

#[derive(Default)]
struct Inner {
    quizzes: HashMap<Uuid, Quiz>,
    sessions: HashMap<Uuid, SessionRecord>,
    players: HashMap<PlayerId, PlayerRecord>,
    answers: HashMap<(PlayerId, Uuid), AnswerRecord>,
    /// Injected failure count for exercising the retry/DEGRADED path.
    fail_next_writes: u32,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` writes fail with a transient error. Test hook for
    /// the persistence retry path.
    pub fn fail_next_writes(&self, n: u32) {
        self.inner.lock().unwrap().fail_next_writes = n;
    }

    fn check_write_failure(inner: &mut Inner) -> Result<(), StoreError> {
        if inner.fail_next_writes > 0 {
            inner.fail_next_writes -= 1;
            return Err(StoreError::Transient("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_quiz(&self, id: Uuid) -> Result<Quiz, StoreError> {
        self.inner
            .lock()
            .unwrap()
            .quizzes
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn put_quiz(&self, quiz: Quiz) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let replacing = inner.quizzes.contains_key(&quiz.id);
        if replacing {
            let locked = inner
                .sessions
                .values()
                .any(|s| s.quiz_id == quiz.id && !s.archived);
            if locked {
                return Err(StoreError::QuizLocked);
            }
        }
        inner.quizzes.insert(quiz.id, quiz);
        Ok(())
    }

    async fn has_active_session_for_quiz(&self, quiz_id: Uuid) -> Result<bool, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .sessions
            .values()
            .any(|s| s.quiz_id == quiz_id && !s.archived))
    }

    async fn create_session(&self, record: SessionRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_write_failure(&mut inner)?;
        if inner.sessions.contains_key(&record.id) {
            return Err(StoreError::Conflict);
        }
        inner.sessions.insert(record.id, record);
        Ok(())
    }

    async fn update_session_progress(
        &self,
        session_id: Uuid,
        phase: SessionPhase,
        cursor: Option<ItemCursor>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_write_failure(&mut inner)?;
        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or(StoreError::NotFound)?;
        session.phase = phase;
        session.cursor = cursor;
        Ok(())
    }

    async fn finalize_session(
        &self,
        session_id: Uuid,
        final_scores: Vec<(PlayerId, i64)>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_write_failure(&mut inner)?;
        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or(StoreError::NotFound)?;
        session.phase = SessionPhase::Ended;
        session.ended_at_ms = Some(unix_ms());
        for (player_id, score) in final_scores {
            if let Some(player) = inner.players.get_mut(&player_id) {
                player.score = score;
            }
        }
        Ok(())
    }

    async fn archive_sessions_for_quiz(&self, quiz_id: Uuid) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let mut archived = 0;
        for session in inner.sessions.values_mut() {
            if session.quiz_id == quiz_id && !session.archived {
                session.archived = true;
                archived += 1;
            }
        }
        Ok(archived)
    }

    async fn load_session_by_code(&self, code: &str) -> Result<SessionBundle, StoreError> {
        let inner = self.inner.lock().unwrap();
        let session = inner
            .sessions
            .values()
            .find(|s| s.code == code)
            .cloned()
            .ok_or(StoreError::NotFound)?;
        let players: Vec<PlayerRecord> = inner
            .players
            .values()
            .filter(|p| p.session_id == session.id)
            .cloned()
            .collect();
        let answers: Vec<AnswerRecord> = inner
            .answers
            .values()
            .filter(|a| a.session_id == session.id)
            .cloned()
            .collect();
        Ok(SessionBundle {
            session,
            players,
            answers,
        })
    }

    async fn upsert_player(&self, record: PlayerRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_write_failure(&mut inner)?;
        inner.players.insert(record.id, record);
        Ok(())
    }

    async fn update_player_score(
        &self,
        player_id: PlayerId,
        score: i64,
        streak: u32,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_write_failure(&mut inner)?;
        let player = inner
            .players
            .get_mut(&player_id)
            .ok_or(StoreError::NotFound)?;
        player.score = score;
        player.streak = streak;
        Ok(())
    }

    async fn append_answer(&self, record: AnswerRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_write_failure(&mut inner)?;
        let key = (record.player_id, record.item_id);
        if inner.answers.contains_key(&key) {
            return Err(StoreError::Conflict);
        }
        inner.answers.insert(key, record);
        Ok(())
    }

    async fn finalize_answer(
        &self,
        player_id: PlayerId,
        item_id: Uuid,
        correctness: Correctness,
        fraction: f64,
        points: u32,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_write_failure(&mut inner)?;
        let answer = inner
            .answers
            .get_mut(&(player_id, item_id))
            .ok_or(StoreError::NotFound)?;
        if answer.finalized {
            return Err(StoreError::Conflict);
        }
        answer.correctness = correctness;
        answer.fraction = fraction;
        answer.points = points;
        answer.finalized = true;
        Ok(())
    }
}
