//! Global session registry: join code → actor handle. Owns code generation
//! (with the ended-code quarantine), crash rehydration, bulk archive, and
//! idle cleanup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use quizdeck_core::code::generate_code;
use quizdeck_core::net::messages::SessionPhase;
use quizdeck_core::quiz::ScoringSettings;
use quizdeck_core::time::unix_ms;

use crate::config::ServerConfig;
use crate::hub::SharedHub;
use crate::session::{Command, SessionHandle, spawn_rehydrated, spawn_session};
use crate::store::{SessionRecord, Store, StoreError};

pub type SharedRegistry = Arc<RwLock<SessionRegistry>>;

/// What `POST /sessions` hands back to the host.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CreatedSession {
    pub session_id: Uuid,
    pub code: String,
    pub host_token: String,
}

pub struct SessionRegistry {
    sessions: HashMap<String, SessionHandle>,
    /// Ended codes under quarantine before they may be reissued.
    recently_ended: HashMap<String, Instant>,
    hub: SharedHub,
    store: Arc<dyn Store>,
    config: Arc<ServerConfig>,
    on_end_tx: mpsc::UnboundedSender<String>,
}

impl SessionRegistry {
    /// Build the registry plus the end-notification receiver the maintenance
    /// task drains.
    pub fn new(
        hub: SharedHub,
        store: Arc<dyn Store>,
        config: Arc<ServerConfig>,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (on_end_tx, on_end_rx) = mpsc::unbounded_channel();
        (
            Self {
                sessions: HashMap::new(),
                recently_ended: HashMap::new(),
                hub,
                store,
                config,
                on_end_tx,
            },
            on_end_rx,
        )
    }

    /// Create a session from a quiz: snapshot the quiz, assign a unique
    /// code, persist the record, and spawn the actor.
    pub async fn create_session(
        &mut self,
        quiz_id: Uuid,
        settings_override: Option<ScoringSettings>,
    ) -> Result<CreatedSession, StoreError> {
        let quiz = self.store.get_quiz(quiz_id).await?;
        let settings = settings_override.unwrap_or_else(|| quiz.settings.clone());
        let code = self.unique_code().await;
        let host_token = Uuid::new_v4().to_string();
        let session_id = Uuid::new_v4();

        let record = SessionRecord {
            id: session_id,
            code: code.clone(),
            quiz_id,
            quiz,
            settings,
            phase: SessionPhase::Lobby,
            cursor: None,
            host_token: host_token.clone(),
            started_at_ms: unix_ms(),
            ended_at_ms: None,
            archived: false,
        };
        self.store.create_session(record.clone()).await?;

        self.hub.write().await.create_room(&code);
        let handle = spawn_session(
            record,
            Arc::clone(&self.hub),
            Arc::clone(&self.store),
            self.config.store.clone(),
            Duration::from_secs(self.config.sessions.reconnect_window_secs),
            self.on_end_tx.clone(),
        );
        self.sessions.insert(code.clone(), handle);

        tracing::info!(session = %code, quiz = %quiz_id, "Session created");
        Ok(CreatedSession {
            session_id,
            code,
            host_token,
        })
    }

    /// A code unused by any live session, any quarantined ended session, and
    /// any non-ended session in the store.
    async fn unique_code(&self) -> String {
        loop {
            let code = generate_code();
            if self.sessions.contains_key(&code) || self.recently_ended.contains_key(&code) {
                continue;
            }
            match self.store.load_session_by_code(&code).await {
                Ok(bundle)
                    if bundle.session.phase != SessionPhase::Ended
                        && !bundle.session.archived =>
                {
                    continue;
                }
                _ => return code,
            }
        }
    }

    pub fn get(&self, code: &str) -> Option<SessionHandle> {
        self.sessions
            .get(code)
            .filter(|h| !h.is_ended())
            .cloned()
    }

    /// Resolve a session, respawning it from the store when this process has
    /// no live actor for it (crash recovery).
    pub async fn lookup_or_rehydrate(&mut self, code: &str) -> Option<SessionHandle> {
        if let Some(handle) = self.get(code) {
            return Some(handle);
        }
        let bundle = self.store.load_session_by_code(code).await.ok()?;
        if bundle.session.archived || bundle.session.phase == SessionPhase::Ended {
            return None;
        }

        tracing::info!(session = %code, "Rehydrating session from store");
        self.hub.write().await.create_room(code);
        let handle = spawn_rehydrated(
            bundle,
            Arc::clone(&self.hub),
            Arc::clone(&self.store),
            self.config.store.clone(),
            Duration::from_secs(self.config.sessions.reconnect_window_secs),
            self.on_end_tx.clone(),
        );
        self.sessions.insert(code.to_string(), handle.clone());
        Some(handle)
    }

    /// Archive every non-archived session of a quiz, ending the live ones.
    /// This is how a host unlocks a structurally locked quiz.
    pub async fn archive_for_quiz(&mut self, quiz_id: Uuid) -> Result<usize, StoreError> {
        let archived = self.store.archive_sessions_for_quiz(quiz_id).await?;
        for handle in self.sessions.values() {
            if handle.quiz_id == quiz_id && !handle.is_ended() {
                handle.send(Command::Archive);
            }
        }
        Ok(archived)
    }

    /// Tear down an ended session: cancel its actor, drop its hub room, and
    /// quarantine the code.
    pub async fn mark_ended(&mut self, code: &str) {
        if let Some(handle) = self.sessions.remove(code) {
            handle.cancel.cancel();
        }
        self.hub.write().await.remove_room(code);
        self.recently_ended.insert(code.to_string(), Instant::now());
        tracing::debug!(session = %code, "Session torn down, code quarantined");
    }

    /// Expire idle sessions and release quarantined codes. Returns the
    /// number of sessions expired.
    pub fn cleanup(&mut self) -> usize {
        let quarantine = Duration::from_secs(self.config.sessions.ended_code_quarantine_secs);
        self.recently_ended
            .retain(|_, ended_at| ended_at.elapsed() < quarantine);

        let idle_timeout = self.config.sessions.idle_timeout_secs;
        let mut expired = 0;
        for handle in self.sessions.values() {
            if !handle.is_ended() && handle.idle_secs() > idle_timeout {
                handle.send(Command::Expire);
                expired += 1;
            }
        }
        expired
    }

    pub fn live_session_count(&self) -> usize {
        self.sessions.values().filter(|h| !h.is_ended()).count()
    }

    /// Cancel every session actor. Process shutdown path; timers, minigame
    /// loops and persistence flushes stop with their session's token.
    pub fn shutdown_all(&mut self) {
        for handle in self.sessions.values() {
            handle.cancel.cancel();
        }
        self.sessions.clear();
    }
}
