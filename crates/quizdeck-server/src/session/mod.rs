//! The session actor. One tokio task owns all mutable state of a live
//! session and processes every command — host actions, player answers, timer
//! fires, presence changes, minigame frames — from a single queue. Nothing
//! else mutates game state, which is what makes the broadcast order total
//! and the at-most-one-answer check race-free.

pub mod minigame_host;
pub mod persist;
pub mod runtime;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use quizdeck_core::error::CommandError;
use quizdeck_core::grade::{AnswerPayload, Correctness};
use quizdeck_core::minigame::{Minigame, MinigameScore, SwanInput, SwanMode, minigame_seed};
use quizdeck_core::net::messages::{
    AnswerCountUpdatedMsg, AnswerReceivedMsg, EmptyMsg, ErrorMsg, ItemCancelledMsg, ItemLockedMsg,
    ItemPublic, ItemPublicKind, ItemStartedMsg, LeaderboardUpdateMsg, LockReason, PlayerJoinedMsg,
    PlayerLeftMsg, PublicOption, RevealAnswersMsg, ScoreboardScope, ServerMessage,
    SessionPausedMsg, SessionPhase, SessionResumedMsg, SessionStateMsg, ShowScoreboardMsg,
    SpeedPodiumResultsMsg, SwanChaseStartedMsg, SwanChaseStateMsg, YouInfo,
};
use quizdeck_core::player::{LeaderboardEntry, PlayerId, fold_name, materialize_leaderboard};
use quizdeck_core::quiz::{Item, ItemCursor, ItemKind, Quiz, ScoringSettings};
use quizdeck_core::time::unix_ms;
use quizdeck_swan_chase::SwanChase;

use crate::config::StoreConfig;
use crate::hub::{ConnId, ConnRole, SharedHub};
use crate::store::{AnswerRecord, PlayerRecord, SessionBundle, SessionRecord, Store};

use minigame_host::{MinigameChannels, spawn_minigame};
use persist::{PersistHandle, PersistOp, spawn_persistence};
use runtime::{ItemRuntime, LiveAnswer, PlayerState, compute_reveal};

/// Host-originated state machine commands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HostAction {
    Start,
    Lock,
    Reveal,
    ShowScoreboard(ScoreboardScope),
    Next,
    CancelItem,
    Pause,
    Resume,
    End,
    StartMinigame(SwanMode),
}

/// Everything a session actor can be asked to do.
#[derive(Debug)]
pub enum Command {
    Host {
        conn: ConnId,
        action: HostAction,
    },
    ResumePlayer {
        token: String,
        reply: oneshot::Sender<Result<PlayerId, CommandError>>,
    },
    PlayerJoin {
        conn: ConnId,
        name: String,
        avatar: String,
        reply: oneshot::Sender<Result<PlayerId, CommandError>>,
    },
    PlayerAnswer {
        conn: ConnId,
        player_id: PlayerId,
        answer: AnswerPayload,
    },
    PlayerLeave {
        player_id: PlayerId,
    },
    SwanInput {
        player_id: PlayerId,
        input: SwanInput,
    },
    GetState {
        conn: ConnId,
        player_id: Option<PlayerId>,
    },
    Connected {
        conn: ConnId,
        role: ConnRole,
    },
    Disconnected {
        conn: ConnId,
        role: ConnRole,
    },
    TimerFired {
        generation: u64,
    },
    MinigameFrame {
        tick: u64,
        diff: serde_json::Value,
    },
    MinigameOver {
        results: Vec<MinigameScore>,
    },
    PersistenceStatus {
        degraded: bool,
    },
    /// Bulk-archive path: the session goes read-only and ends.
    Archive,
    /// Idle-timeout path: the session ends without being archived.
    Expire,
}

/// Cloneable address of a live session actor.
#[derive(Clone)]
pub struct SessionHandle {
    pub session_id: Uuid,
    pub quiz_id: Uuid,
    pub code: String,
    pub host_token: Arc<String>,
    pub tx: mpsc::UnboundedSender<Command>,
    pub cancel: CancellationToken,
    last_activity_secs: Arc<AtomicU64>,
    ended: Arc<AtomicBool>,
}

impl SessionHandle {
    pub fn send(&self, cmd: Command) {
        let _ = self.tx.send(cmd);
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Relaxed)
    }

    pub fn idle_secs(&self) -> u64 {
        let last = self.last_activity_secs.load(Ordering::Relaxed);
        (unix_ms() / 1000).saturating_sub(last)
    }
}

/// Spawn a fresh session actor from its creation record.
pub fn spawn_session(
    record: SessionRecord,
    hub: SharedHub,
    store: Arc<dyn Store>,
    store_config: StoreConfig,
    reconnect_window: Duration,
    on_end: mpsc::UnboundedSender<String>,
) -> SessionHandle {
    spawn_actor(record, Vec::new(), Vec::new(), false, hub, store, store_config, reconnect_window, on_end)
}

/// Respawn a session from its store bundle after a crash. The session
/// resumes at the current item in `ItemLocked` — conservative, the host can
/// re-reveal — and players reconnect with their existing tokens.
pub fn spawn_rehydrated(
    bundle: SessionBundle,
    hub: SharedHub,
    store: Arc<dyn Store>,
    store_config: StoreConfig,
    reconnect_window: Duration,
    on_end: mpsc::UnboundedSender<String>,
) -> SessionHandle {
    let SessionBundle {
        session,
        players,
        answers,
    } = bundle;
    spawn_actor(session, players, answers, true, hub, store, store_config, reconnect_window, on_end)
}

#[allow(clippy::too_many_arguments)]
fn spawn_actor(
    record: SessionRecord,
    player_records: Vec<PlayerRecord>,
    answer_records: Vec<AnswerRecord>,
    rehydrated: bool,
    hub: SharedHub,
    store: Arc<dyn Store>,
    store_config: StoreConfig,
    reconnect_window: Duration,
    on_end: mpsc::UnboundedSender<String>,
) -> SessionHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let last_activity_secs = Arc::new(AtomicU64::new(unix_ms() / 1000));
    let ended_flag = Arc::new(AtomicBool::new(false));

    let handle = SessionHandle {
        session_id: record.id,
        quiz_id: record.quiz_id,
        code: record.code.clone(),
        host_token: Arc::new(record.host_token.clone()),
        tx: tx.clone(),
        cancel: cancel.clone(),
        last_activity_secs: Arc::clone(&last_activity_secs),
        ended: Arc::clone(&ended_flag),
    };

    let (persist, _persist_task) =
        spawn_persistence(store, store_config, tx.clone(), cancel.clone());

    let mut actor = SessionActor {
        session_id: record.id,
        code: record.code,
        quiz: record.quiz,
        settings: record.settings,
        phase: record.phase,
        paused: false,
        degraded: false,
        archived: record.archived,
        cursor: record.cursor,
        runtime: None,
        players: HashMap::new(),
        names: HashMap::new(),
        tokens: HashMap::new(),
        answers: HashMap::new(),
        finalized_items: Default::default(),
        previous_ranks: HashMap::new(),
        timer_generation: 0,
        minigame: None,
        minigame_return: None,
        hub,
        persist,
        cmd_tx: tx,
        cancel: cancel.clone(),
        reconnect_window,
        on_end,
        last_activity_secs,
        ended_flag,
    };

    for player in player_records {
        actor.names.insert(fold_name(&player.name), player.id);
        actor.tokens.insert(player.token.clone(), player.id);
        actor.players.insert(
            player.id,
            PlayerState {
                id: player.id,
                folded: fold_name(&player.name),
                name: player.name,
                avatar: player.avatar,
                token: player.token,
                score: player.score,
                streak: player.streak,
                conns: Default::default(),
                joined_at_ms: player.joined_at_ms,
                joined_cursor: player.joined_cursor,
                offline_since_ms: Some(unix_ms()),
                left: false,
            },
        );
    }
    for answer in answer_records {
        if answer.finalized {
            actor.finalized_items.insert(answer.item_id);
        }
        actor.answers.entry(answer.item_id).or_default().insert(
            answer.player_id,
            LiveAnswer {
                payload: answer.payload,
                received_ms: answer.received_ms,
            },
        );
    }

    if rehydrated {
        actor.resume_conservatively();
    }

    tokio::spawn(async move { actor.run(rx).await });
    handle
}

struct SessionActor {
    session_id: Uuid,
    code: String,
    quiz: Quiz,
    settings: ScoringSettings,
    phase: SessionPhase,
    paused: bool,
    degraded: bool,
    archived: bool,
    cursor: Option<ItemCursor>,
    runtime: Option<ItemRuntime>,
    players: HashMap<PlayerId, PlayerState>,
    /// folded name → player, for the uniqueness check.
    names: HashMap<String, PlayerId>,
    /// reconnect token → player.
    tokens: HashMap<String, PlayerId>,
    /// item id → received answers, current and past.
    answers: HashMap<Uuid, HashMap<PlayerId, LiveAnswer>>,
    /// Items whose answers were already frozen by a reveal. Guards the
    /// reveal-freeze invariant across crash rehydration.
    finalized_items: std::collections::HashSet<Uuid>,
    previous_ranks: HashMap<PlayerId, u32>,
    timer_generation: u64,
    minigame: Option<MinigameChannels>,
    /// `MinigameActive` is orthogonal to the base machine: the phase to
    /// restore once the minigame ends. A minigame item completes into
    /// `ItemRevealed`; an ad-hoc minigame returns to wherever it started.
    minigame_return: Option<SessionPhase>,
    hub: SharedHub,
    persist: PersistHandle,
    cmd_tx: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
    reconnect_window: Duration,
    on_end: mpsc::UnboundedSender<String>,
    last_activity_secs: Arc<AtomicU64>,
    ended_flag: Arc<AtomicBool>,
}

impl SessionActor {
    async fn run(&mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        tracing::info!(session = %self.code, "Session actor started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                cmd = rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    self.touch();
                    if let Command::TimerFired { generation } = cmd {
                        self.timer_fired_with_tiebreak(generation, &mut rx).await;
                    } else {
                        self.handle(cmd).await;
                    }
                }
            }
        }
        tracing::info!(session = %self.code, "Session actor stopped");
    }

    /// A timer fire and a host lock can land in the same serialization step.
    /// Drain what is already queued: a pending host lock wins the lock
    /// reason (manual intent), then the rest replays in order with the stale
    /// timer fire discarded by its generation check.
    async fn timer_fired_with_tiebreak(
        &mut self,
        generation: u64,
        rx: &mut mpsc::UnboundedReceiver<Command>,
    ) {
        let mut deferred = Vec::new();
        let mut host_lock = None;
        while let Ok(queued) = rx.try_recv() {
            match queued {
                Command::Host {
                    conn,
                    action: HostAction::Lock,
                } if host_lock.is_none() => host_lock = Some(conn),
                other => deferred.push(other),
            }
        }

        if let Some(conn) = host_lock {
            self.handle(Command::Host {
                conn,
                action: HostAction::Lock,
            })
            .await;
        } else {
            self.handle_timer_fired(generation).await;
        }
        for cmd in deferred {
            self.handle(cmd).await;
        }
    }

    fn touch(&self) {
        self.last_activity_secs
            .store(unix_ms() / 1000, Ordering::Relaxed);
    }

    fn unavailable(&self) -> bool {
        self.archived || self.phase == SessionPhase::Ended
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Host { conn, action } => {
                if self.unavailable() {
                    self.send_error(conn, &CommandError::SessionUnavailable).await;
                    return;
                }
                if let Err(e) = self.handle_host(action).await {
                    self.send_error(conn, &e).await;
                }
            }
            Command::ResumePlayer { token, reply } => {
                let _ = reply.send(self.resume_player(&token));
            }
            Command::PlayerJoin {
                conn,
                name,
                avatar,
                reply,
            } => {
                let result = self.player_join(conn, name, avatar).await;
                if let Ok(player_id) = &result {
                    let snapshot = self.snapshot(Some(*player_id));
                    self.send_to_conn(conn, &ServerMessage::SessionState(Box::new(snapshot)))
                        .await;
                }
                let _ = reply.send(result);
            }
            Command::PlayerAnswer {
                conn,
                player_id,
                answer,
            } => {
                if let Err(e) = self.player_answer(conn, player_id, answer).await {
                    self.send_error(conn, &e).await;
                }
            }
            Command::PlayerLeave { player_id } => self.player_leave(player_id).await,
            Command::SwanInput { player_id, input } => {
                if self.paused {
                    return;
                }
                if let Some(minigame) = &self.minigame {
                    let _ = minigame.input_tx.send((player_id, input));
                }
            }
            Command::GetState { conn, player_id } => {
                let snapshot = self.snapshot(player_id);
                self.send_to_conn(conn, &ServerMessage::SessionState(Box::new(snapshot)))
                    .await;
            }
            Command::Connected { conn, role } => self.connected(conn, role).await,
            Command::Disconnected { conn, role } => self.disconnected(conn, role).await,
            Command::TimerFired { generation } => self.handle_timer_fired(generation).await,
            Command::MinigameFrame { tick, diff } => {
                if self.phase == SessionPhase::MinigameActive {
                    self.broadcast(&ServerMessage::SwanChaseState(SwanChaseStateMsg {
                        tick,
                        diff,
                    }))
                    .await;
                }
            }
            Command::MinigameOver { results } => self.minigame_over(results).await,
            Command::PersistenceStatus { degraded } => {
                self.degraded = degraded;
            }
            Command::Archive => {
                self.archived = true;
                self.end_session().await;
            }
            Command::Expire => {
                tracing::info!(session = %self.code, "Session expired idle");
                self.end_session().await;
            }
        }
    }

    // -- host actions ------------------------------------------------------

    async fn handle_host(&mut self, action: HostAction) -> Result<(), CommandError> {
        match action {
            HostAction::Start => {
                if self.phase != SessionPhase::Lobby {
                    return Err(CommandError::InvalidTransition);
                }
                let cursor = self
                    .quiz
                    .first_cursor()
                    .ok_or_else(|| CommandError::BadRequest("quiz has no items".into()))?;
                self.open_item(cursor).await;
                Ok(())
            }
            HostAction::Lock => {
                if self.phase != SessionPhase::ItemOpen {
                    return Err(CommandError::InvalidTransition);
                }
                self.lock_item(LockReason::Host).await;
                Ok(())
            }
            HostAction::Reveal => self.reveal_item().await,
            HostAction::ShowScoreboard(scope) => {
                if self.phase != SessionPhase::ItemRevealed {
                    return Err(CommandError::InvalidTransition);
                }
                let entries = self.leaderboard_entries();
                let limited = match scope.limit() {
                    Some(n) => entries.into_iter().take(n).collect(),
                    None => entries,
                };
                self.broadcast(&ServerMessage::ShowScoreboard(ShowScoreboardMsg {
                    scope,
                    entries: limited,
                }))
                .await;
                self.phase = SessionPhase::Scoreboard;
                Ok(())
            }
            HostAction::Next => {
                if !matches!(
                    self.phase,
                    SessionPhase::ItemRevealed | SessionPhase::Scoreboard
                ) {
                    return Err(CommandError::InvalidTransition);
                }
                if self.phase == SessionPhase::Scoreboard {
                    self.broadcast(&ServerMessage::HideScoreboard(EmptyMsg {})).await;
                }
                let next = self.cursor.and_then(|c| self.quiz.next_cursor(c));
                match next {
                    Some(cursor) => self.open_item(cursor).await,
                    None => self.end_session().await,
                }
                Ok(())
            }
            HostAction::CancelItem => {
                if self.phase != SessionPhase::ItemOpen {
                    return Err(CommandError::InvalidTransition);
                }
                self.cancel_item().await;
                Ok(())
            }
            HostAction::Pause => {
                if self.paused {
                    return Ok(());
                }
                self.paused = true;
                let remaining = if let Some(rt) = self.runtime.as_mut() {
                    let remaining = rt.remaining();
                    rt.paused_remaining = Some(remaining);
                    // Invalidate the armed timer; resume re-arms.
                    self.timer_generation += 1;
                    Some(remaining.as_millis() as u64)
                } else {
                    None
                };
                if let Some(minigame) = &self.minigame {
                    minigame.set_paused(true);
                }
                self.broadcast(&ServerMessage::SessionPaused(SessionPausedMsg {
                    remaining_ms: remaining,
                }))
                .await;
                Ok(())
            }
            HostAction::Resume => {
                if !self.paused {
                    return Ok(());
                }
                self.paused = false;
                let mut remaining_ms = None;
                if let Some(rt) = self.runtime.as_mut()
                    && let Some(remaining) = rt.paused_remaining.take()
                {
                    rt.deadline = tokio::time::Instant::now() + remaining;
                    remaining_ms = Some(remaining.as_millis() as u64);
                    self.arm_timer(remaining);
                }
                if let Some(minigame) = &self.minigame {
                    minigame.set_paused(false);
                }
                self.broadcast(&ServerMessage::SessionResumed(SessionResumedMsg {
                    remaining_ms,
                }))
                .await;
                Ok(())
            }
            HostAction::End => {
                self.end_session().await;
                Ok(())
            }
            HostAction::StartMinigame(mode) => {
                if !matches!(
                    self.phase,
                    SessionPhase::Lobby | SessionPhase::ItemRevealed | SessionPhase::Scoreboard
                ) {
                    return Err(CommandError::InvalidTransition);
                }
                self.start_minigame(mode, None).await;
                Ok(())
            }
        }
    }

    async fn open_item(&mut self, cursor: ItemCursor) {
        let Some(item) = self.quiz.item_at(cursor).cloned() else {
            tracing::error!(session = %self.code, ?cursor, "Cursor points at no item");
            return;
        };
        self.cursor = Some(cursor);

        match &item.kind {
            ItemKind::Minigame { mode } => {
                let mode = *mode;
                let item_id = item.id;
                self.broadcast_item_started(&item, cursor, 0).await;
                self.start_minigame(mode, Some(item_id)).await;
            }
            ItemKind::Break | ItemKind::Scoreboard => {
                // No timer, no grading: straight to revealed.
                self.runtime = None;
                self.phase = SessionPhase::ItemRevealed;
                self.broadcast_item_started(&item, cursor, 0).await;
                if matches!(item.kind, ItemKind::Scoreboard) {
                    let entries = self.leaderboard_entries();
                    self.broadcast(&ServerMessage::ShowScoreboard(ShowScoreboardMsg {
                        scope: ScoreboardScope::All,
                        entries,
                    }))
                    .await;
                }
            }
            ItemKind::Question(_) => {
                let timer = Duration::from_secs(item.effective_timer_secs(&self.settings) as u64);
                self.runtime = Some(ItemRuntime::new(item.id, cursor, timer));
                self.phase = SessionPhase::ItemOpen;
                self.arm_timer(timer);
                self.broadcast_item_started(&item, cursor, timer.as_millis() as u64)
                    .await;
            }
        }

        self.persist.enqueue(PersistOp::UpdateProgress {
            session_id: self.session_id,
            phase: self.phase,
            cursor: self.cursor,
        });
    }

    async fn broadcast_item_started(&mut self, item: &Item, cursor: ItemCursor, timer_ms: u64) {
        let round_title = self
            .quiz
            .round_at(cursor)
            .map(|r| r.title.clone())
            .unwrap_or_default();
        let msg = ServerMessage::ItemStarted(ItemStartedMsg {
            round_title,
            item: self.item_public(item, cursor),
            timer_ms,
        });
        self.broadcast(&msg).await;
    }

    fn arm_timer(&mut self, duration: Duration) {
        self.timer_generation += 1;
        let generation = self.timer_generation;
        let tx = self.cmd_tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(duration) => {
                    let _ = tx.send(Command::TimerFired { generation });
                }
            }
        });
    }

    async fn handle_timer_fired(&mut self, generation: u64) {
        // Stale generations are cancelled timers (pause, re-open, lock).
        if generation != self.timer_generation
            || self.phase != SessionPhase::ItemOpen
            || self.paused
        {
            return;
        }
        self.lock_item(LockReason::Timer).await;
    }

    async fn lock_item(&mut self, reason: LockReason) {
        let Some(rt) = self.runtime.as_ref() else {
            return;
        };
        let item_id = rt.item_id;
        // Disarm any outstanding timer.
        self.timer_generation += 1;
        self.phase = SessionPhase::ItemLocked;
        self.broadcast(&ServerMessage::ItemLocked(ItemLockedMsg { item_id, reason }))
            .await;
        self.persist.enqueue(PersistOp::UpdateProgress {
            session_id: self.session_id,
            phase: self.phase,
            cursor: self.cursor,
        });
        tracing::debug!(session = %self.code, ?reason, "Item locked");
    }

    async fn reveal_item(&mut self) -> Result<(), CommandError> {
        if self.phase != SessionPhase::ItemLocked {
            return Err(CommandError::InvalidTransition);
        }
        let cursor = self.cursor.ok_or(CommandError::InvalidTransition)?;
        let item = self
            .quiz
            .item_at(cursor)
            .cloned()
            .ok_or(CommandError::InvalidTransition)?;
        let ItemKind::Question(question) = &item.kind else {
            return Err(CommandError::InvalidTransition);
        };
        if self.finalized_items.contains(&item.id) {
            // Already revealed once (pre-crash); points are frozen.
            self.phase = SessionPhase::ItemRevealed;
            self.broadcast_leaderboard().await;
            return Ok(());
        }

        let timer_ms = self
            .runtime
            .as_ref()
            .map(|rt| rt.timer.as_millis() as u64)
            .unwrap_or(0);
        let base_points = item.effective_base_points(&self.settings);
        let item_answers = self.answers.get(&item.id).cloned().unwrap_or_default();
        let participants: Vec<(PlayerId, u32)> = self
            .players
            .values()
            .filter(|p| !p.left)
            .map(|p| (p.id, p.streak))
            .collect();

        let outcome = compute_reveal(
            question,
            base_points,
            timer_ms,
            &item_answers,
            &participants,
            &self.settings,
        )
        .map_err(|e| CommandError::BadRequest(e.to_string()))?;

        // Freeze answers and apply deltas. Points are written exactly once.
        self.finalized_items.insert(item.id);
        for (player_id, correctness, fraction, points) in &outcome.finalized {
            self.persist.enqueue(PersistOp::FinalizeAnswer {
                player_id: *player_id,
                item_id: item.id,
                correctness: *correctness,
                fraction: *fraction,
                points: *points,
            });
        }
        for (player_id, delta) in &outcome.deltas {
            if let Some(player) = self.players.get_mut(player_id) {
                player.score += delta.score_delta;
                player.streak = delta.new_streak;
                self.persist.enqueue(PersistOp::UpdatePlayerScore {
                    player_id: *player_id,
                    score: player.score,
                    streak: player.streak,
                });
            }
        }

        let show_explanation = item.show_explanation.unwrap_or(true);
        self.broadcast(&ServerMessage::RevealAnswers(RevealAnswersMsg {
            item_id: item.id,
            correct: outcome.correct,
            explanation: if show_explanation {
                question.explanation.clone()
            } else {
                None
            },
            answers: outcome.revealed,
            poll_counts: outcome.poll_counts,
        }))
        .await;

        if !outcome.podium.is_empty() {
            self.broadcast(&ServerMessage::SpeedPodiumResults(SpeedPodiumResultsMsg {
                item_id: item.id,
                podium: outcome.podium,
            }))
            .await;
        }

        self.broadcast_leaderboard().await;
        self.phase = SessionPhase::ItemRevealed;
        self.persist.enqueue(PersistOp::UpdateProgress {
            session_id: self.session_id,
            phase: self.phase,
            cursor: self.cursor,
        });
        Ok(())
    }

    async fn cancel_item(&mut self) {
        let Some(rt) = self.runtime.take() else {
            return;
        };
        self.timer_generation += 1;
        // Answers for the cancelled item are discarded, never graded.
        self.answers.remove(&rt.item_id);
        // Back to where the item was opened from: the first item returns the
        // session to the lobby, anything later to the previous reveal.
        self.phase = if Some(rt.cursor) == self.quiz.first_cursor() {
            SessionPhase::Lobby
        } else {
            SessionPhase::ItemRevealed
        };
        self.broadcast(&ServerMessage::ItemCancelled(ItemCancelledMsg {
            item_id: rt.item_id,
        }))
        .await;
        self.persist.enqueue(PersistOp::UpdateProgress {
            session_id: self.session_id,
            phase: self.phase,
            cursor: self.cursor,
        });
    }

    async fn end_session(&mut self) {
        if self.phase == SessionPhase::Ended {
            return;
        }
        self.timer_generation += 1;
        if let Some(minigame) = self.minigame.take() {
            minigame.stop();
        }
        self.phase = SessionPhase::Ended;
        self.ended_flag.store(true, Ordering::Relaxed);

        let leaderboard = self.leaderboard_entries();
        let final_scores: Vec<(PlayerId, i64)> =
            leaderboard.iter().map(|e| (e.player_id, e.score)).collect();
        self.broadcast(&ServerMessage::SessionEnded(
            quizdeck_core::net::messages::SessionEndedMsg { leaderboard },
        ))
        .await;
        self.persist.enqueue(PersistOp::FinalizeSession {
            session_id: self.session_id,
            final_scores,
        });
        let _ = self.on_end.send(self.code.clone());
        tracing::info!(session = %self.code, "Session ended");
    }

    async fn start_minigame(&mut self, mode: SwanMode, item_id: Option<Uuid>) {
        // A minigame item is consumed by playing it; an ad-hoc minigame
        // suspends the base machine and resumes it afterwards.
        self.minigame_return = Some(if item_id.is_some() {
            SessionPhase::ItemRevealed
        } else {
            self.phase
        });
        let seed_item = item_id.unwrap_or(self.session_id);
        let seed = minigame_seed(&self.code, seed_item);

        let mut player_ids: Vec<PlayerId> = self
            .players
            .values()
            .filter(|p| !p.left)
            .map(|p| p.id)
            .collect();
        player_ids.sort();

        let mut engine = SwanChase::new(mode);
        engine.init(&player_ids, seed);
        let snapshot = engine.snapshot();

        self.broadcast(&ServerMessage::SwanChaseStarted(SwanChaseStartedMsg {
            mode,
            snapshot,
        }))
        .await;

        let channels = spawn_minigame(Box::new(engine), self.cmd_tx.clone(), &self.cancel);
        self.minigame = Some(channels);
        self.phase = SessionPhase::MinigameActive;
        self.persist.enqueue(PersistOp::UpdateProgress {
            session_id: self.session_id,
            phase: self.phase,
            cursor: self.cursor,
        });
        tracing::info!(session = %self.code, ?mode, seed, "Minigame started");
    }

    async fn minigame_over(&mut self, results: Vec<MinigameScore>) {
        if let Some(minigame) = self.minigame.take() {
            minigame.stop();
        }
        if self.phase != SessionPhase::MinigameActive {
            self.minigame_return = None;
            return;
        }

        for result in &results {
            if let Some(player) = self.players.get_mut(&result.player_id) {
                player.score += result.score;
                self.persist.enqueue(PersistOp::UpdatePlayerScore {
                    player_id: player.id,
                    score: player.score,
                    streak: player.streak,
                });
            }
        }

        self.broadcast_leaderboard().await;
        self.phase = self
            .minigame_return
            .take()
            .unwrap_or(SessionPhase::ItemRevealed);
        self.persist.enqueue(PersistOp::UpdateProgress {
            session_id: self.session_id,
            phase: self.phase,
            cursor: self.cursor,
        });
        tracing::info!(session = %self.code, phase = ?self.phase, "Minigame finished, scores applied");
    }

    // -- players -----------------------------------------------------------

    fn resume_player(&mut self, token: &str) -> Result<PlayerId, CommandError> {
        if self.unavailable() {
            return Err(CommandError::SessionUnavailable);
        }
        let player_id = *self.tokens.get(token).ok_or(CommandError::Unauthorized)?;
        let player = self
            .players
            .get(&player_id)
            .ok_or(CommandError::Unauthorized)?;
        if player.left {
            return Err(CommandError::Unauthorized);
        }
        if let Some(offline_since) = player.offline_since_ms {
            let window_ms = self.reconnect_window.as_millis() as u64;
            if unix_ms().saturating_sub(offline_since) > window_ms {
                return Err(CommandError::Unauthorized);
            }
        }
        Ok(player_id)
    }

    async fn player_join(
        &mut self,
        conn: ConnId,
        name: String,
        avatar: String,
    ) -> Result<PlayerId, CommandError> {
        if self.unavailable() {
            return Err(CommandError::SessionUnavailable);
        }
        let trimmed = name.trim().to_string();
        if trimmed.is_empty() || trimmed.chars().count() > 32 {
            return Err(CommandError::BadRequest(
                "name must be 1..=32 characters".into(),
            ));
        }
        let folded = fold_name(&trimmed);
        if self.names.contains_key(&folded) {
            return Err(CommandError::NameTaken);
        }

        let player_id = Uuid::new_v4();
        let token = Uuid::new_v4().to_string();
        let state = PlayerState {
            id: player_id,
            name: trimmed.clone(),
            folded: folded.clone(),
            avatar: avatar.clone(),
            token: token.clone(),
            score: 0,
            streak: 0,
            conns: [conn].into_iter().collect(),
            joined_at_ms: unix_ms(),
            joined_cursor: self.cursor,
            offline_since_ms: None,
            left: false,
        };
        self.names.insert(folded, player_id);
        self.tokens.insert(token.clone(), player_id);

        self.persist.enqueue(PersistOp::UpsertPlayer(PlayerRecord {
            id: player_id,
            session_id: self.session_id,
            name: state.name.clone(),
            avatar: state.avatar.clone(),
            score: 0,
            streak: 0,
            token,
            joined_at_ms: state.joined_at_ms,
            joined_cursor: state.joined_cursor,
        }));

        let info = state.info();
        self.players.insert(player_id, state);
        self.hub
            .write()
            .await
            .bind_player(&self.code, conn, player_id);
        self.broadcast(&ServerMessage::PlayerJoined(PlayerJoinedMsg { player: info }))
            .await;

        tracing::info!(session = %self.code, player = %player_id, "Player joined");
        Ok(player_id)
    }

    async fn player_answer(
        &mut self,
        conn: ConnId,
        player_id: PlayerId,
        answer: AnswerPayload,
    ) -> Result<(), CommandError> {
        if self.unavailable() {
            return Err(CommandError::SessionUnavailable);
        }
        if self.phase != SessionPhase::ItemOpen || self.paused {
            return Err(CommandError::ItemNotOpen);
        }
        if !self.players.contains_key(&player_id) {
            return Err(CommandError::UnknownPlayer);
        }
        let rt = self.runtime.as_mut().ok_or(CommandError::ItemNotOpen)?;
        let item_id = rt.item_id;

        let already = rt.answered.contains(&player_id)
            || self
                .answers
                .get(&item_id)
                .is_some_and(|m| m.contains_key(&player_id));
        if already {
            return Err(CommandError::AlreadyAnswered);
        }

        let received_ms = rt.elapsed_ms();
        rt.answered.insert(player_id);
        self.answers.entry(item_id).or_default().insert(
            player_id,
            LiveAnswer {
                payload: answer.clone(),
                received_ms,
            },
        );

        self.persist.enqueue(PersistOp::AppendAnswer(AnswerRecord {
            id: Uuid::new_v4(),
            session_id: self.session_id,
            player_id,
            item_id,
            payload: answer,
            received_ms,
            correctness: Correctness::Unscored,
            fraction: 0.0,
            points: 0,
            finalized: false,
        }));

        self.send_to_conn(
            conn,
            &ServerMessage::AnswerReceived(AnswerReceivedMsg {
                item_id,
                received_ms,
            }),
        )
        .await;

        let (answered, online) = self.answer_progress(item_id);
        self.broadcast(&ServerMessage::AnswerCountUpdated(AnswerCountUpdatedMsg {
            item_id,
            answered,
            online,
        }))
        .await;

        self.maybe_lock_all_answered().await;
        Ok(())
    }

    fn answer_progress(&self, item_id: Uuid) -> (u32, u32) {
        let answered = self
            .answers
            .get(&item_id)
            .map(|m| m.len() as u32)
            .unwrap_or(0);
        let online = self
            .players
            .values()
            .filter(|p| p.online() && !p.left)
            .count() as u32;
        (answered, online)
    }

    /// Disconnected players never block the all-answered lock: the
    /// denominator is the currently-online player set.
    async fn maybe_lock_all_answered(&mut self) {
        if self.phase != SessionPhase::ItemOpen || self.paused {
            return;
        }
        let Some(rt) = self.runtime.as_ref() else {
            return;
        };
        let online: Vec<PlayerId> = self
            .players
            .values()
            .filter(|p| p.online() && !p.left)
            .map(|p| p.id)
            .collect();
        if !online.is_empty() && online.iter().all(|id| rt.answered.contains(id)) {
            self.lock_item(LockReason::AllAnswered).await;
        }
    }

    async fn player_leave(&mut self, player_id: PlayerId) {
        let Some(player) = self.players.get_mut(&player_id) else {
            return;
        };
        player.left = true;
        player.conns.clear();
        let name = player.name.clone();
        let token = player.token.clone();
        self.tokens.remove(&token);
        self.broadcast(&ServerMessage::PlayerLeft(PlayerLeftMsg {
            player_id,
            name,
            permanent: true,
        }))
        .await;
        self.maybe_lock_all_answered().await;
    }

    async fn connected(&mut self, conn: ConnId, role: ConnRole) {
        if let ConnRole::Player(player_id) = role
            && let Some(player) = self.players.get_mut(&player_id)
        {
            let was_offline = !player.online();
            player.conns.insert(conn);
            player.offline_since_ms = None;
            if was_offline {
                let info = player.info();
                self.broadcast(&ServerMessage::PlayerJoined(PlayerJoinedMsg { player: info }))
                    .await;
            }
        }
    }

    async fn disconnected(&mut self, conn: ConnId, role: ConnRole) {
        if let ConnRole::Player(player_id) = role
            && let Some(player) = self.players.get_mut(&player_id)
        {
            player.conns.remove(&conn);
            if !player.online() && !player.left {
                player.offline_since_ms = Some(unix_ms());
                let name = player.name.clone();
                self.broadcast(&ServerMessage::PlayerLeft(PlayerLeftMsg {
                    player_id,
                    name,
                    permanent: false,
                }))
                .await;
                // The denominator shrank; the remaining online players may
                // all have answered.
                self.maybe_lock_all_answered().await;
            }
        }
    }

    // -- snapshots & broadcast helpers -------------------------------------

    fn leaderboard_entries(&self) -> Vec<LeaderboardEntry> {
        let scored: Vec<(PlayerId, String, i64)> = self
            .players
            .values()
            .map(|p| (p.id, p.name.clone(), p.score))
            .collect();
        materialize_leaderboard(scored, &self.previous_ranks)
    }

    async fn broadcast_leaderboard(&mut self) {
        let entries = self.leaderboard_entries();
        self.previous_ranks = entries.iter().map(|e| (e.player_id, e.rank)).collect();
        self.broadcast(&ServerMessage::LeaderboardUpdate(LeaderboardUpdateMsg {
            entries,
        }))
        .await;
    }

    fn item_public(&self, item: &Item, cursor: ItemCursor) -> ItemPublic {
        let kind = match &item.kind {
            ItemKind::Question(q) => ItemPublicKind::Question {
                question_type: q.question_type,
                prompt: q.prompt.clone(),
                options: q
                    .options
                    .iter()
                    .map(|o| PublicOption {
                        id: o.id,
                        text: o.text.clone(),
                    })
                    .collect(),
                media: q.media.clone(),
            },
            ItemKind::Break => ItemPublicKind::Break,
            ItemKind::Scoreboard => ItemPublicKind::Scoreboard,
            ItemKind::Minigame { mode } => ItemPublicKind::Minigame { mode: *mode },
        };
        ItemPublic {
            id: item.id,
            cursor,
            kind,
            timer_secs: item.effective_timer_secs(&self.settings),
            base_points: item.effective_base_points(&self.settings),
        }
    }

    fn snapshot(&self, player_id: Option<PlayerId>) -> SessionStateMsg {
        let item = self.cursor.and_then(|cursor| {
            self.quiz
                .item_at(cursor)
                .map(|item| self.item_public(item, cursor))
        });
        let remaining_ms = match (&self.runtime, self.phase) {
            (Some(rt), SessionPhase::ItemOpen) => Some(rt.remaining().as_millis() as u64),
            _ => None,
        };
        let you = player_id.and_then(|pid| {
            self.players.get(&pid).map(|p| YouInfo {
                player_id: pid,
                token: p.token.clone(),
                answered: self
                    .runtime
                    .as_ref()
                    .map(|rt| rt.answered.contains(&pid))
                    .unwrap_or(false),
            })
        });
        let mut players: Vec<_> = self.players.values().map(|p| p.info()).collect();
        players.sort_by(|a, b| a.name.cmp(&b.name));

        SessionStateMsg {
            session_id: self.session_id,
            code: self.code.clone(),
            quiz_title: self.quiz.title.clone(),
            phase: self.phase,
            paused: self.paused,
            degraded: self.degraded,
            cursor: self.cursor,
            item,
            remaining_ms,
            players,
            leaderboard: self.leaderboard_entries(),
            you,
        }
    }

    /// Conservative post-crash state: whatever was in flight resumes locked
    /// at the current item, and the host decides whether to re-reveal.
    fn resume_conservatively(&mut self) {
        if self.phase == SessionPhase::Ended || self.archived {
            return;
        }
        if let Some(cursor) = self.cursor
            && self.phase != SessionPhase::Lobby
        {
            // Only an ungraded question resumes locked; break, scoreboard
            // and minigame items (and already-revealed questions) have
            // nothing left to reveal.
            let mut revealed = true;
            if let Some(item) = self.quiz.item_at(cursor) {
                if matches!(item.kind, ItemKind::Question(_)) {
                    revealed = self.finalized_items.contains(&item.id);
                }
                let timer = Duration::from_secs(item.effective_timer_secs(&self.settings) as u64);
                let mut rt = ItemRuntime::new(item.id, cursor, timer);
                rt.paused_remaining = Some(Duration::ZERO);
                if let Some(item_answers) = self.answers.get(&item.id) {
                    rt.answered = item_answers.keys().copied().collect();
                }
                self.runtime = Some(rt);
            }
            self.phase = if revealed {
                SessionPhase::ItemRevealed
            } else {
                SessionPhase::ItemLocked
            };
        } else if self.phase == SessionPhase::MinigameActive {
            // An ad-hoc minigame was running before the first item; the
            // loop did not survive the crash, so the session is back in
            // the lobby.
            self.phase = SessionPhase::Lobby;
        }
        tracing::info!(session = %self.code, phase = ?self.phase, "Session rehydrated from store");
    }

    async fn broadcast(&self, msg: &ServerMessage) {
        self.hub.write().await.broadcast(&self.code, msg);
    }

    async fn send_to_conn(&self, conn: ConnId, msg: &ServerMessage) {
        self.hub.read().await.send_to_conn(&self.code, conn, msg);
    }

    async fn send_error(&self, conn: ConnId, err: &CommandError) {
        self.send_to_conn(
            conn,
            &ServerMessage::Error(ErrorMsg {
                code: err.code(),
                message: err.to_string(),
            }),
        )
        .await;
    }
}
