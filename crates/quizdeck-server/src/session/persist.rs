//! Per-session persistence task. The actor enqueues operations in order;
//! this task applies them to the store with retry and backoff, and flips the
//! session's DEGRADED flag when writes start failing. The session never
//! blocks on a write and never drops a graded answer — failed operations
//! queue for the reconciler.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use quizdeck_core::grade::Correctness;
use quizdeck_core::net::messages::SessionPhase;
use quizdeck_core::player::PlayerId;
use quizdeck_core::quiz::ItemCursor;

use crate::config::StoreConfig;
use crate::store::{AnswerRecord, PlayerRecord, Store, StoreError};

use super::Command;

#[derive(Debug, Clone)]
pub enum PersistOp {
    UpsertPlayer(PlayerRecord),
    AppendAnswer(AnswerRecord),
    FinalizeAnswer {
        player_id: PlayerId,
        item_id: Uuid,
        correctness: Correctness,
        fraction: f64,
        points: u32,
    },
    UpdatePlayerScore {
        player_id: PlayerId,
        score: i64,
        streak: u32,
    },
    UpdateProgress {
        session_id: Uuid,
        phase: SessionPhase,
        cursor: Option<ItemCursor>,
    },
    FinalizeSession {
        session_id: Uuid,
        final_scores: Vec<(PlayerId, i64)>,
    },
}

#[derive(Clone)]
pub struct PersistHandle {
    tx: mpsc::UnboundedSender<PersistOp>,
}

impl PersistHandle {
    pub fn enqueue(&self, op: PersistOp) {
        // Send can only fail after cancellation tore the task down.
        let _ = self.tx.send(op);
    }
}

/// Spawn the persistence task for one session. Degraded-state transitions
/// are reported back to the actor as commands so they serialize with game
/// state like everything else.
pub fn spawn_persistence(
    store: Arc<dyn Store>,
    config: StoreConfig,
    session_tx: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
) -> (PersistHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<PersistOp>();

    let handle = tokio::spawn(async move {
        let mut pending: VecDeque<PersistOp> = VecDeque::new();
        let mut degraded = false;
        let mut reconcile =
            tokio::time::interval(Duration::from_secs(config.reconcile_interval_secs.max(1)));
        reconcile.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Best-effort flush of anything still queued; one attempt
                    // each, bounded so shutdown stays under the cancel budget.
                    while let Ok(op) = rx.try_recv() {
                        pending.push_back(op);
                    }
                    while let Some(op) = pending.pop_front() {
                        if apply(&*store, &op).await.is_err() {
                            tracing::warn!("Dropping unpersisted op on shutdown");
                        }
                    }
                    break;
                }
                op = rx.recv() => {
                    let Some(op) = op else { break };
                    if !pending.is_empty() {
                        // Keep strict per-session write order.
                        pending.push_back(op);
                        continue;
                    }
                    if let Err(op) = write_with_retry(&*store, op, &config).await {
                        pending.push_back(op);
                        if !degraded {
                            degraded = true;
                            tracing::error!("Persistence failing, session entering DEGRADED");
                            let _ = session_tx.send(Command::PersistenceStatus { degraded: true });
                        }
                    }
                }
                _ = reconcile.tick(), if !pending.is_empty() => {
                    while let Some(op) = pending.front() {
                        match apply(&*store, op).await {
                            Ok(()) => {
                                pending.pop_front();
                            }
                            Err(e) => {
                                tracing::debug!(error = %e, queued = pending.len(), "Reconciler still failing");
                                break;
                            }
                        }
                    }
                    if pending.is_empty() && degraded {
                        degraded = false;
                        tracing::info!("Persistence recovered, session leaving DEGRADED");
                        let _ = session_tx.send(Command::PersistenceStatus { degraded: false });
                    }
                }
            }
        }
    });

    (PersistHandle { tx }, handle)
}

/// Try an op with exponential backoff. Returns the op back on failure so the
/// caller can queue it for the reconciler.
async fn write_with_retry(
    store: &dyn Store,
    op: PersistOp,
    config: &StoreConfig,
) -> Result<(), PersistOp> {
    let mut delay = Duration::from_millis(config.retry_base_ms.max(1));
    for attempt in 1..=config.retry_attempts {
        match apply(store, &op).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && attempt < config.retry_attempts => {
                tracing::warn!(attempt, error = %e, "Transient store failure, backing off");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => {
                tracing::error!(attempt, error = %e, "Store write failed");
                return Err(op);
            }
        }
    }
    Err(op)
}

/// Apply one op. `Conflict` is success: the unique keys make replays of an
/// already-applied op idempotent.
async fn apply(store: &dyn Store, op: &PersistOp) -> Result<(), StoreError> {
    let result = match op {
        PersistOp::UpsertPlayer(record) => store.upsert_player(record.clone()).await,
        PersistOp::AppendAnswer(record) => store.append_answer(record.clone()).await,
        PersistOp::FinalizeAnswer {
            player_id,
            item_id,
            correctness,
            fraction,
            points,
        } => {
            store
                .finalize_answer(*player_id, *item_id, *correctness, *fraction, *points)
                .await
        }
        PersistOp::UpdatePlayerScore {
            player_id,
            score,
            streak,
        } => store.update_player_score(*player_id, *score, *streak).await,
        PersistOp::UpdateProgress {
            session_id,
            phase,
            cursor,
        } => {
            store
                .update_session_progress(*session_id, *phase, *cursor)
                .await
        }
        PersistOp::FinalizeSession {
            session_id,
            final_scores,
        } => {
            store
                .finalize_session(*session_id, final_scores.clone())
                .await
        }
    };
    match result {
        Err(StoreError::Conflict) => Ok(()),
        other => other,
    }
}
