//! Sled-backed store. Values are rmp-serde records; composite keys are raw
//! UUID bytes so prefix scans give us the per-session secondary indexes.

use async_trait::async_trait;
use uuid::Uuid;

use quizdeck_core::grade::Correctness;
use quizdeck_core::net::messages::SessionPhase;
use quizdeck_core::player::PlayerId;
use quizdeck_core::quiz::{ItemCursor, Quiz};
use quizdeck_core::time::unix_ms;

use super::{AnswerRecord, PlayerRecord, SessionBundle, SessionRecord, Store, StoreError};

pub struct SledStore {
    quizzes: sled::Tree,
    sessions: sled::Tree,
    /// code → session id.
    session_codes: sled::Tree,
    players: sled::Tree,
    /// session id + player id → ().
    players_idx: sled::Tree,
    /// player id + item id → record.
    answers: sled::Tree,
    /// session id + player id + item id → ().
    answers_idx: sled::Tree,
    db: sled::Db,
}

impl SledStore {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(map_sled_err)?;
        Ok(Self {
            quizzes: db.open_tree("quizzes").map_err(map_sled_err)?,
            sessions: db.open_tree("sessions").map_err(map_sled_err)?,
            session_codes: db.open_tree("session_codes").map_err(map_sled_err)?,
            players: db.open_tree("players").map_err(map_sled_err)?,
            players_idx: db.open_tree("players_idx").map_err(map_sled_err)?,
            answers: db.open_tree("answers").map_err(map_sled_err)?,
            answers_idx: db.open_tree("answers_idx").map_err(map_sled_err)?,
            db,
        })
    }

    fn get_session(&self, session_id: Uuid) -> Result<SessionRecord, StoreError> {
        let bytes = self
            .sessions
            .get(session_id.as_bytes())
            .map_err(map_sled_err)?
            .ok_or(StoreError::NotFound)?;
        decode(&bytes)
    }

    fn put_session(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.sessions
            .insert(record.id.as_bytes(), encode(record)?)
            .map_err(map_sled_err)?;
        Ok(())
    }

    fn sessions_for_quiz(&self, quiz_id: Uuid) -> Result<Vec<SessionRecord>, StoreError> {
        let mut records = Vec::new();
        for entry in self.sessions.iter() {
            let (_, value) = entry.map_err(map_sled_err)?;
            let record: SessionRecord = decode(&value)?;
            if record.quiz_id == quiz_id {
                records.push(record);
            }
        }
        Ok(records)
    }
}

fn map_sled_err(err: sled::Error) -> StoreError {
    match err {
        sled::Error::Io(e) => StoreError::Transient(e.to_string()),
        other => StoreError::Fatal(other.to_string()),
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    rmp_serde::to_vec(value).map_err(|e| StoreError::Fatal(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    rmp_serde::from_slice(bytes).map_err(|e| StoreError::Fatal(e.to_string()))
}

fn pair_key(a: Uuid, b: Uuid) -> [u8; 32] {
    let mut key = [0u8; 32];
    key[..16].copy_from_slice(a.as_bytes());
    key[16..].copy_from_slice(b.as_bytes());
    key
}

fn triple_key(a: Uuid, b: Uuid, c: Uuid) -> [u8; 48] {
    let mut key = [0u8; 48];
    key[..16].copy_from_slice(a.as_bytes());
    key[16..32].copy_from_slice(b.as_bytes());
    key[32..].copy_from_slice(c.as_bytes());
    key
}

#[async_trait]
impl Store for SledStore {
    async fn get_quiz(&self, id: Uuid) -> Result<Quiz, StoreError> {
        let bytes = self
            .quizzes
            .get(id.as_bytes())
            .map_err(map_sled_err)?
            .ok_or(StoreError::NotFound)?;
        decode(&bytes)
    }

    async fn put_quiz(&self, quiz: Quiz) -> Result<(), StoreError> {
        let replacing = self
            .quizzes
            .contains_key(quiz.id.as_bytes())
            .map_err(map_sled_err)?;
        if replacing && self.has_active_session_for_quiz(quiz.id).await? {
            return Err(StoreError::QuizLocked);
        }
        self.quizzes
            .insert(quiz.id.as_bytes(), encode(&quiz)?)
            .map_err(map_sled_err)?;
        Ok(())
    }

    async fn has_active_session_for_quiz(&self, quiz_id: Uuid) -> Result<bool, StoreError> {
        Ok(self
            .sessions_for_quiz(quiz_id)?
            .iter()
            .any(|s| !s.archived))
    }

    async fn create_session(&self, record: SessionRecord) -> Result<(), StoreError> {
        if self
            .sessions
            .contains_key(record.id.as_bytes())
            .map_err(map_sled_err)?
        {
            return Err(StoreError::Conflict);
        }
        self.put_session(&record)?;
        self.session_codes
            .insert(record.code.as_bytes(), record.id.as_bytes().to_vec())
            .map_err(map_sled_err)?;
        Ok(())
    }

    async fn update_session_progress(
        &self,
        session_id: Uuid,
        phase: SessionPhase,
        cursor: Option<ItemCursor>,
    ) -> Result<(), StoreError> {
        let mut record = self.get_session(session_id)?;
        record.phase = phase;
        record.cursor = cursor;
        self.put_session(&record)
    }

    async fn finalize_session(
        &self,
        session_id: Uuid,
        final_scores: Vec<(PlayerId, i64)>,
    ) -> Result<(), StoreError> {
        let mut record = self.get_session(session_id)?;
        record.phase = SessionPhase::Ended;
        record.ended_at_ms = Some(unix_ms());
        self.put_session(&record)?;

        for (player_id, score) in final_scores {
            if let Some(bytes) = self.players.get(player_id.as_bytes()).map_err(map_sled_err)? {
                let mut player: PlayerRecord = decode(&bytes)?;
                player.score = score;
                self.players
                    .insert(player_id.as_bytes(), encode(&player)?)
                    .map_err(map_sled_err)?;
            }
        }
        self.db.flush_async().await.map_err(map_sled_err)?;
        Ok(())
    }

    async fn archive_sessions_for_quiz(&self, quiz_id: Uuid) -> Result<usize, StoreError> {
        let mut archived = 0;
        for mut record in self.sessions_for_quiz(quiz_id)? {
            if !record.archived {
                record.archived = true;
                self.put_session(&record)?;
                archived += 1;
            }
        }
        Ok(archived)
    }

    async fn load_session_by_code(&self, code: &str) -> Result<SessionBundle, StoreError> {
        let session_id_bytes = self
            .session_codes
            .get(code.as_bytes())
            .map_err(map_sled_err)?
            .ok_or(StoreError::NotFound)?;
        let session_id = Uuid::from_slice(&session_id_bytes)
            .map_err(|e| StoreError::Fatal(e.to_string()))?;
        let session = self.get_session(session_id)?;

        let mut players = Vec::new();
        for entry in self.players_idx.scan_prefix(session_id.as_bytes()) {
            let (key, _) = entry.map_err(map_sled_err)?;
            let player_id = Uuid::from_slice(&key[16..32])
                .map_err(|e| StoreError::Fatal(e.to_string()))?;
            if let Some(bytes) = self.players.get(player_id.as_bytes()).map_err(map_sled_err)? {
                players.push(decode(&bytes)?);
            }
        }

        let mut answers = Vec::new();
        for entry in self.answers_idx.scan_prefix(session_id.as_bytes()) {
            let (key, _) = entry.map_err(map_sled_err)?;
            let player_id = Uuid::from_slice(&key[16..32])
                .map_err(|e| StoreError::Fatal(e.to_string()))?;
            let item_id = Uuid::from_slice(&key[32..48])
                .map_err(|e| StoreError::Fatal(e.to_string()))?;
            if let Some(bytes) = self
                .answers
                .get(pair_key(player_id, item_id))
                .map_err(map_sled_err)?
            {
                answers.push(decode(&bytes)?);
            }
        }

        Ok(SessionBundle {
            session,
            players,
            answers,
        })
    }

    async fn upsert_player(&self, record: PlayerRecord) -> Result<(), StoreError> {
        self.players
            .insert(record.id.as_bytes(), encode(&record)?)
            .map_err(map_sled_err)?;
        self.players_idx
            .insert(pair_key(record.session_id, record.id), &[])
            .map_err(map_sled_err)?;
        Ok(())
    }

    async fn update_player_score(
        &self,
        player_id: PlayerId,
        score: i64,
        streak: u32,
    ) -> Result<(), StoreError> {
        let bytes = self
            .players
            .get(player_id.as_bytes())
            .map_err(map_sled_err)?
            .ok_or(StoreError::NotFound)?;
        let mut record: PlayerRecord = decode(&bytes)?;
        record.score = score;
        record.streak = streak;
        self.players
            .insert(player_id.as_bytes(), encode(&record)?)
            .map_err(map_sled_err)?;
        Ok(())
    }

    async fn append_answer(&self, record: AnswerRecord) -> Result<(), StoreError> {
        let key = pair_key(record.player_id, record.item_id);
        // compare_and_swap against absence is the unique (player, item) key.
        let swapped = self
            .answers
            .compare_and_swap(key, None::<&[u8]>, Some(encode(&record)?))
            .map_err(map_sled_err)?;
        if swapped.is_err() {
            return Err(StoreError::Conflict);
        }
        self.answers_idx
            .insert(
                triple_key(record.session_id, record.player_id, record.item_id),
                &[],
            )
            .map_err(map_sled_err)?;
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
        let key = pair_key(player_id, item_id);
        let bytes = self
            .answers
            .get(key)
            .map_err(map_sled_err)?
            .ok_or(StoreError::NotFound)?;
        let mut record: AnswerRecord = decode(&bytes)?;
        if record.finalized {
            return Err(StoreError::Conflict);
        }
        record.correctness = correctness;
        record.fraction = fraction;
        record.points = points;
        record.finalized = true;
        self.answers
            .insert(key, encode(&record)?)
            .map_err(map_sled_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quizdeck_core::grade::AnswerPayload;
    use quizdeck_core::test_helpers::mc_quiz;

    fn open_temp() -> (SledStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path().to_str().unwrap()).unwrap();
        (store, dir)
    }

    fn session_record(quiz: Quiz, code: &str) -> SessionRecord {
        SessionRecord {
            id: Uuid::new_v4(),
            code: code.to_string(),
            quiz_id: quiz.id,
            settings: quiz.settings.clone(),
            quiz,
            phase: SessionPhase::Lobby,
            cursor: None,
            host_token: "tok".to_string(),
            started_at_ms: 0,
            ended_at_ms: None,
            archived: false,
        }
    }

    #[tokio::test]
    async fn session_round_trips_through_sled() {
        let (store, _dir) = open_temp();
        let quiz = mc_quiz(10, 10);
        store.put_quiz(quiz.clone()).await.unwrap();
        let record = session_record(quiz, "ABCDEF");
        let session_id = record.id;
        store.create_session(record).await.unwrap();

        let bundle = store.load_session_by_code("ABCDEF").await.unwrap();
        assert_eq!(bundle.session.id, session_id);
        assert_eq!(bundle.session.phase, SessionPhase::Lobby);
    }

    #[tokio::test]
    async fn answer_unique_key_enforced() {
        let (store, _dir) = open_temp();
        let player = Uuid::new_v4();
        let item = Uuid::new_v4();
        let record = AnswerRecord {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            player_id: player,
            item_id: item,
            payload: AnswerPayload::Numeric { value: 5.0 },
            received_ms: 10,
            correctness: Correctness::Unscored,
            fraction: 0.0,
            points: 0,
            finalized: false,
        };
        store.append_answer(record.clone()).await.unwrap();
        assert!(matches!(
            store.append_answer(record).await,
            Err(StoreError::Conflict)
        ));
    }

    #[tokio::test]
    async fn bundle_includes_players_and_answers() {
        let (store, _dir) = open_temp();
        let quiz = mc_quiz(10, 10);
        let record = session_record(quiz, "GGHHJJ");
        let session_id = record.id;
        store.create_session(record).await.unwrap();

        let player_id = Uuid::new_v4();
        let item_id = Uuid::new_v4();
        store
            .upsert_player(PlayerRecord {
                id: player_id,
                session_id,
                name: "Alice".to_string(),
                avatar: "swan".to_string(),
                score: 0,
                streak: 0,
                token: "t".to_string(),
                joined_at_ms: 0,
                joined_cursor: None,
            })
            .await
            .unwrap();
        store
            .append_answer(AnswerRecord {
                id: Uuid::new_v4(),
                session_id,
                player_id,
                item_id,
                payload: AnswerPayload::Text { text: "b".into() },
                received_ms: 2000,
                correctness: Correctness::Unscored,
                fraction: 0.0,
                points: 0,
                finalized: false,
            })
            .await
            .unwrap();

        let bundle = store.load_session_by_code("GGHHJJ").await.unwrap();
        assert_eq!(bundle.players.len(), 1);
        assert_eq!(bundle.answers.len(), 1);
        assert_eq!(bundle.answers[0].received_ms, 2000);
    }

    #[tokio::test]
    async fn archive_unlocks_quiz() {
        let (store, _dir) = open_temp();
        let quiz = mc_quiz(10, 10);
        store.put_quiz(quiz.clone()).await.unwrap();
        store
            .create_session(session_record(quiz.clone(), "KKMMNN"))
            .await
            .unwrap();

        assert!(matches!(
            store.put_quiz(quiz.clone()).await,
            Err(StoreError::QuizLocked)
        ));
        assert_eq!(store.archive_sessions_for_quiz(quiz.id).await.unwrap(), 1);
        store.put_quiz(quiz).await.unwrap();
    }

    #[tokio::test]
    async fn finalize_answer_freezes_points() {
        let (store, _dir) = open_temp();
        let player = Uuid::new_v4();
        let item = Uuid::new_v4();
        store
            .append_answer(AnswerRecord {
                id: Uuid::new_v4(),
                session_id: Uuid::new_v4(),
                player_id: player,
                item_id: item,
                payload: AnswerPayload::Numeric { value: 5.0 },
                received_ms: 10,
                correctness: Correctness::Unscored,
                fraction: 0.0,
                points: 0,
                finalized: false,
            })
            .await
            .unwrap();

        store
            .finalize_answer(player, item, Correctness::Correct, 1.0, 9)
            .await
            .unwrap();
        assert!(matches!(
            store
                .finalize_answer(player, item, Correctness::Incorrect, 0.0, 0)
                .await,
            Err(StoreError::Conflict)
        ));
    }
}
