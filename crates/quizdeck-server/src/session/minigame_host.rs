//! Hosts the authoritative minigame loop for a session. The engine ticks at
//! 30 Hz on its own task; state diffs and the final results are fed back to
//! the session actor as commands so broadcast order stays total.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use quizdeck_core::minigame::{MINIGAME_TICK_HZ, Minigame, MinigameEvent, STATE_BROADCAST_DIVISOR, SwanInput};
use quizdeck_core::player::PlayerId;

use super::Command;

/// Control surface the session actor keeps for a running minigame.
pub struct MinigameChannels {
    pub input_tx: mpsc::UnboundedSender<(PlayerId, SwanInput)>,
    pub pause_tx: watch::Sender<bool>,
    pub cancel: CancellationToken,
}

impl MinigameChannels {
    pub fn set_paused(&self, paused: bool) {
        let _ = self.pause_tx.send(paused);
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

pub fn spawn_minigame(
    mut engine: Box<dyn Minigame>,
    session_tx: mpsc::UnboundedSender<Command>,
    parent_cancel: &CancellationToken,
) -> MinigameChannels {
    let (input_tx, mut input_rx) = mpsc::unbounded_channel::<(PlayerId, SwanInput)>();
    let (pause_tx, pause_rx) = watch::channel(false);
    let cancel = parent_cancel.child_token();
    let loop_cancel = cancel.clone();

    tokio::spawn(async move {
        let tick_budget = Duration::from_secs_f64(1.0 / MINIGAME_TICK_HZ as f64);
        let mut interval = tokio::time::interval(tick_budget);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let started = tokio::time::Instant::now();
        let mut tick: u64 = 0;
        let mut skip_next = false;

        loop {
            tokio::select! {
                _ = loop_cancel.cancelled() => {
                    tracing::debug!("Minigame loop cancelled");
                    break;
                }
                Some((player_id, input)) = input_rx.recv() => {
                    let now_ms = started.elapsed().as_millis() as u64;
                    engine.apply_input(player_id, input, now_ms);
                }
                _ = interval.tick() => {
                    if *pause_rx.borrow() {
                        continue;
                    }
                    if skip_next {
                        skip_next = false;
                        continue;
                    }

                    tick += 1;
                    let now_ms = started.elapsed().as_millis() as u64;
                    let tick_started = std::time::Instant::now();
                    let events = engine.tick(tick, 1.0 / MINIGAME_TICK_HZ as f32, now_ms);
                    let spent = tick_started.elapsed();

                    if spent > tick_budget {
                        tracing::warn!(
                            tick,
                            spent_ms = spent.as_secs_f64() * 1000.0,
                            budget_ms = tick_budget.as_secs_f64() * 1000.0,
                            "Minigame tick overran its budget"
                        );
                        if spent > tick_budget * 2 {
                            skip_next = true;
                        }
                    }

                    if tick % STATE_BROADCAST_DIVISOR == 0 {
                        let _ = session_tx.send(Command::MinigameFrame {
                            tick,
                            diff: engine.state_diff(),
                        });
                    }

                    let over = events.iter().any(|e| matches!(e, MinigameEvent::Over))
                        || engine.is_over();
                    if over {
                        let _ = session_tx.send(Command::MinigameOver {
                            results: engine.results(),
                        });
                        break;
                    }
                }
            }
        }
    });

    MinigameChannels {
        input_tx,
        pause_tx,
        cancel,
    }
}
