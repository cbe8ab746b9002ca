//! Pure session-runtime pieces: per-item transient state and the reveal
//! computation. Everything here is synchronous and fully unit-testable; the
//! actor in `mod.rs` owns the clocks and channels.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use uuid::Uuid;

use quizdeck_core::error::QuizError;
use quizdeck_core::grade::{AnswerPayload, Correctness, grade};
use quizdeck_core::net::messages::{CorrectAnswer, PollCount, RevealedAnswer};
use quizdeck_core::player::PlayerId;
use quizdeck_core::quiz::{ItemCursor, Question, QuestionVariant, ScoringSettings};
use quizdeck_core::score::{PodiumAward, ScoreInput, score_answer, speed_podium};

use crate::hub::ConnId;

/// Server-side state for one joined player.
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub id: PlayerId,
    pub name: String,
    /// Case-folded name for the uniqueness check.
    pub folded: String,
    pub avatar: String,
    pub token: String,
    pub score: i64,
    pub streak: u32,
    pub conns: HashSet<ConnId>,
    pub joined_at_ms: u64,
    pub joined_cursor: Option<ItemCursor>,
    pub offline_since_ms: Option<u64>,
    /// Set when the player sent `PLAYER_LEAVE`; their token is revoked and
    /// they never count toward the all-answered denominator again.
    pub left: bool,
}

impl PlayerState {
    pub fn online(&self) -> bool {
        !self.conns.is_empty()
    }

    pub fn info(&self) -> quizdeck_core::player::PlayerInfo {
        quizdeck_core::player::PlayerInfo {
            id: self.id,
            name: self.name.clone(),
            avatar: self.avatar.clone(),
            online: self.online(),
            score: self.score,
            streak: self.streak,
        }
    }
}

/// An answer held in memory until the reveal freezes it.
#[derive(Debug, Clone)]
pub struct LiveAnswer {
    pub payload: AnswerPayload,
    pub received_ms: u64,
}

/// Transient state for the currently open item.
#[derive(Debug)]
pub struct ItemRuntime {
    pub item_id: Uuid,
    pub cursor: ItemCursor,
    pub timer: Duration,
    pub deadline: tokio::time::Instant,
    pub answered: HashSet<PlayerId>,
    /// While paused, the frozen remaining duration; the deadline is
    /// recomputed on resume.
    pub paused_remaining: Option<Duration>,
}

impl ItemRuntime {
    pub fn new(item_id: Uuid, cursor: ItemCursor, timer: Duration) -> Self {
        Self {
            item_id,
            cursor,
            timer,
            deadline: tokio::time::Instant::now() + timer,
            answered: HashSet::new(),
            paused_remaining: None,
        }
    }

    pub fn remaining(&self) -> Duration {
        match self.paused_remaining {
            Some(remaining) => remaining,
            None => self
                .deadline
                .saturating_duration_since(tokio::time::Instant::now()),
        }
    }

    /// Milliseconds of *active* item time elapsed. Pause-aware: the deadline
    /// shifts on resume, so `timer - remaining` never counts paused time.
    pub fn elapsed_ms(&self) -> u64 {
        (self.timer.saturating_sub(self.remaining())).as_millis() as u64
    }
}

/// Per-player outcome of one reveal.
#[derive(Debug, Clone, Copy)]
pub struct PlayerDelta {
    pub score_delta: i64,
    pub new_streak: u32,
}

/// Everything the reveal transition needs to apply and broadcast.
#[derive(Debug)]
pub struct RevealOutcome {
    pub correct: CorrectAnswer,
    pub revealed: Vec<RevealedAnswer>,
    pub podium: Vec<PodiumAward>,
    pub deltas: HashMap<PlayerId, PlayerDelta>,
    /// (player, correctness, fraction, points) to freeze in the store.
    pub finalized: Vec<(PlayerId, Correctness, f64, u32)>,
    pub poll_counts: Vec<PollCount>,
}

/// Grade, score and rank one item. Pure: identical inputs produce identical
/// outcomes, which is what makes scoring replayable.
///
/// `participants` lists every current player with their prior streak — a
/// player without an answer is graded incorrect with a streak reset.
pub fn compute_reveal(
    question: &Question,
    base_points: u32,
    timer_ms: u64,
    answers: &HashMap<PlayerId, LiveAnswer>,
    participants: &[(PlayerId, u32)],
    settings: &ScoringSettings,
) -> Result<RevealOutcome, QuizError> {
    let variant = QuestionVariant::from_question(question)?;

    if matches!(variant, QuestionVariant::Poll) {
        return Ok(compute_poll(question, answers, participants));
    }

    let correct = correct_answer(&variant);
    let mut revealed = Vec::new();
    let mut deltas = HashMap::new();
    let mut finalized = Vec::new();
    let mut qualifiers: Vec<(PlayerId, u64)> = Vec::new();

    for &(player_id, prior_streak) in participants {
        match answers.get(&player_id) {
            Some(answer) => {
                let graded = grade(&variant, &answer.payload);
                let outcome = score_answer(
                    ScoreInput {
                        base_points,
                        fraction: graded.fraction,
                        timer_ms,
                        elapsed_ms: answer.received_ms,
                        prior_streak,
                    },
                    settings,
                );
                if graded.fraction >= 1.0 {
                    qualifiers.push((player_id, answer.received_ms));
                }
                revealed.push(RevealedAnswer {
                    player_id,
                    correctness: graded.correctness,
                    fraction: graded.fraction,
                    points: outcome.total(),
                    answer: graded.normalized.clone(),
                });
                finalized.push((
                    player_id,
                    graded.correctness,
                    graded.fraction,
                    outcome.total(),
                ));
                deltas.insert(
                    player_id,
                    PlayerDelta {
                        score_delta: outcome.total() as i64,
                        new_streak: outcome.new_streak,
                    },
                );
            }
            None => {
                // No answer at lock: incorrect, zero points, streak reset.
                deltas.insert(
                    player_id,
                    PlayerDelta {
                        score_delta: 0,
                        new_streak: 0,
                    },
                );
            }
        }
    }

    let podium = speed_podium(base_points, &qualifiers, settings);
    for award in &podium {
        if let Some(delta) = deltas.get_mut(&award.player_id) {
            delta.score_delta += award.bonus as i64;
        }
        if let Some((_, _, _, points)) = finalized
            .iter_mut()
            .find(|(pid, ..)| *pid == award.player_id)
        {
            *points += award.bonus;
        }
        if let Some(entry) = revealed.iter_mut().find(|r| r.player_id == award.player_id) {
            entry.points += award.bonus;
        }
    }

    Ok(RevealOutcome {
        correct,
        revealed,
        podium,
        deltas,
        finalized,
        poll_counts: Vec::new(),
    })
}

fn compute_poll(
    question: &Question,
    answers: &HashMap<PlayerId, LiveAnswer>,
    participants: &[(PlayerId, u32)],
) -> RevealOutcome {
    let mut counts: HashMap<Uuid, u32> = HashMap::new();
    let mut revealed = Vec::new();
    let mut finalized = Vec::new();

    for &(player_id, _) in participants {
        let Some(answer) = answers.get(&player_id) else {
            continue;
        };
        let selected: Vec<Uuid> = match &answer.payload {
            AnswerPayload::Choice { option } => vec![*option],
            AnswerPayload::MultiChoice { options } => options.clone(),
            _ => Vec::new(),
        };
        for option in selected {
            if question.options.iter().any(|o| o.id == option) {
                *counts.entry(option).or_insert(0) += 1;
            }
        }
        revealed.push(RevealedAnswer {
            player_id,
            correctness: Correctness::Unscored,
            fraction: 0.0,
            points: 0,
            answer: answer.payload.clone(),
        });
        finalized.push((player_id, Correctness::Unscored, 0.0, 0));
    }

    // Streaks are untouched by polls; no deltas at all.
    let poll_counts = question
        .options
        .iter()
        .map(|o| PollCount {
            option_id: o.id,
            count: counts.get(&o.id).copied().unwrap_or(0),
        })
        .collect();

    RevealOutcome {
        correct: CorrectAnswer::None,
        revealed,
        podium: Vec::new(),
        deltas: HashMap::new(),
        finalized,
        poll_counts,
    }
}

fn correct_answer(variant: &QuestionVariant) -> CorrectAnswer {
    match variant {
        QuestionVariant::SingleChoice { correct } => CorrectAnswer::Options {
            option_ids: vec![*correct],
        },
        QuestionVariant::MultiChoice { correct, .. } => CorrectAnswer::Options {
            option_ids: correct.iter().copied().collect(),
        },
        QuestionVariant::OrderedList { canonical } => CorrectAnswer::Ordered {
            option_ids: canonical.clone(),
        },
        QuestionVariant::Numeric {
            answer,
            tolerance_pct,
        } => CorrectAnswer::Numeric {
            value: *answer,
            tolerance_pct: *tolerance_pct,
        },
        QuestionVariant::OpenText { accepted } => CorrectAnswer::Text {
            accepted: accepted.clone(),
        },
        QuestionVariant::Poll => CorrectAnswer::None,
    }
}
