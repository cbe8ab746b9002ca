use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::error::QuizError;
use crate::minigame::SwanMode;

/// A quiz definition. Sessions operate on a snapshot taken at creation time;
/// later authoring edits never reach a running session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quiz {
    pub id: Uuid,
    pub title: String,
    pub rounds: Vec<Round>,
    pub settings: ScoringSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub id: Uuid,
    pub title: String,
    pub items: Vec<Item>,
}

/// One entry in a round: a question, a break card, a scoreboard, or a
/// minigame. Per-item overrides fall back to the session's scoring settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub kind: ItemKind,
    pub timer_secs: Option<u32>,
    pub base_points: Option<u32>,
    pub show_explanation: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemKind {
    Question(Question),
    Break,
    Scoreboard,
    Minigame { mode: SwanMode },
}

impl Item {
    pub fn effective_timer_secs(&self, settings: &ScoringSettings) -> u32 {
        self.timer_secs.unwrap_or(settings.default_timer_secs)
    }

    pub fn effective_base_points(&self, settings: &ScoringSettings) -> u32 {
        self.base_points.unwrap_or(settings.default_base_points)
    }

    /// Break and scoreboard items have no timer and no grading; they open
    /// straight into the revealed state.
    pub fn is_instant(&self) -> bool {
        matches!(self.kind, ItemKind::Break | ItemKind::Scoreboard)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    McSingle,
    McMulti,
    TrueFalse,
    Poll,
    OrderedList,
    NumericEstimate,
    OpenText,
    YearGuess,
    TitleGuess,
    ArtistGuess,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    pub question_type: QuestionType,
    pub prompt: String,
    pub explanation: Option<String>,
    #[serde(default)]
    pub media: Vec<MediaRef>,
    pub options: Vec<OptionRow>,
}

/// External media attached to a question. The platform only passes these
/// through to clients; fetching and rendering is a client concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
    pub media_type: String,
}

/// A single stored option row. The fields are reinterpreted per question
/// type (see [`QuestionVariant::from_question`]); this historical encoding is
/// load-bearing — persisted quizzes depend on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionRow {
    pub id: Uuid,
    pub text: String,
    pub is_correct: bool,
    pub order: i32,
}

/// Per-session scoring configuration, copied from the quiz at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSettings {
    pub default_base_points: u32,
    pub default_timer_secs: u32,
    pub streak_enabled: bool,
    pub streak_bonus_points: u32,
    pub speed_podium_enabled: bool,
    pub podium_percentages: [u32; 3],
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            default_base_points: 10,
            default_timer_secs: 4,
            streak_enabled: true,
            streak_bonus_points: 1,
            speed_podium_enabled: true,
            podium_percentages: [30, 20, 10],
        }
    }
}

/// Position of the current item inside the quiz snapshot. Only ever advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemCursor {
    pub round: u32,
    pub item: u32,
}

impl ItemCursor {
    pub const START: ItemCursor = ItemCursor { round: 0, item: 0 };
}

impl Quiz {
    pub fn item_at(&self, cursor: ItemCursor) -> Option<&Item> {
        self.rounds
            .get(cursor.round as usize)?
            .items
            .get(cursor.item as usize)
    }

    pub fn round_at(&self, cursor: ItemCursor) -> Option<&Round> {
        self.rounds.get(cursor.round as usize)
    }

    /// The cursor after `cursor`, skipping empty rounds. `None` at the end of
    /// the quiz.
    pub fn next_cursor(&self, cursor: ItemCursor) -> Option<ItemCursor> {
        let round = self.rounds.get(cursor.round as usize)?;
        if (cursor.item as usize + 1) < round.items.len() {
            return Some(ItemCursor {
                round: cursor.round,
                item: cursor.item + 1,
            });
        }
        let mut next_round = cursor.round as usize + 1;
        while let Some(r) = self.rounds.get(next_round) {
            if !r.items.is_empty() {
                return Some(ItemCursor {
                    round: next_round as u32,
                    item: 0,
                });
            }
            next_round += 1;
        }
        None
    }

    /// The first cursor pointing at a real item, if any.
    pub fn first_cursor(&self) -> Option<ItemCursor> {
        self.rounds
            .iter()
            .position(|r| !r.items.is_empty())
            .map(|round| ItemCursor {
                round: round as u32,
                item: 0,
            })
    }

    pub fn item_count(&self) -> usize {
        self.rounds.iter().map(|r| r.items.len()).sum()
    }
}

/// A question decoded into the shape its type actually means. Grading is
/// written against this, not against raw option rows.
#[derive(Debug, Clone, PartialEq)]
pub enum QuestionVariant {
    /// One correct option id among the listed options.
    SingleChoice { correct: Uuid },
    /// Any subset may be selected; graded against the correct set.
    MultiChoice {
        correct: BTreeSet<Uuid>,
        option_count: usize,
    },
    /// No grading; submissions are tallied per option.
    Poll,
    /// Option ids in canonical order (by the `order` field).
    OrderedList { canonical: Vec<Uuid> },
    /// Canonical value and tolerance percentage.
    Numeric { answer: f64, tolerance_pct: f64 },
    /// All accepted answers, primary first.
    OpenText { accepted: Vec<String> },
}

impl QuestionVariant {
    /// Decode the stored row shape per the historical option encoding:
    ///
    /// | type | encoding |
    /// |---|---|
    /// | mc single/multi, true/false | (text, is_correct, order) per option |
    /// | poll | all `is_correct = false` |
    /// | ordered list | all correct; `order` is the canonical position |
    /// | numeric | one option; `text` = answer, `order` = tolerance % |
    /// | open text / title / artist | correct options are accepted answers |
    /// | year | numeric, tolerance from `order` |
    pub fn from_question(question: &Question) -> Result<QuestionVariant, QuizError> {
        let bad = |reason: &str| QuizError::BadOptionEncoding {
            question_id: question.id,
            reason: reason.to_string(),
        };

        match question.question_type {
            QuestionType::McSingle | QuestionType::TrueFalse => {
                if question.question_type == QuestionType::TrueFalse
                    && question.options.len() != 2
                {
                    return Err(bad("true/false requires exactly two options"));
                }
                let mut correct = question.options.iter().filter(|o| o.is_correct);
                let first = correct.next().ok_or_else(|| bad("no correct option"))?;
                if correct.next().is_some() {
                    return Err(bad("more than one correct option"));
                }
                Ok(QuestionVariant::SingleChoice { correct: first.id })
            }
            QuestionType::McMulti => {
                let correct: BTreeSet<Uuid> = question
                    .options
                    .iter()
                    .filter(|o| o.is_correct)
                    .map(|o| o.id)
                    .collect();
                if correct.is_empty() {
                    return Err(bad("no correct options"));
                }
                Ok(QuestionVariant::MultiChoice {
                    correct,
                    option_count: question.options.len(),
                })
            }
            QuestionType::Poll => {
                if question.options.iter().any(|o| o.is_correct) {
                    return Err(bad("poll options must all be is_correct = false"));
                }
                Ok(QuestionVariant::Poll)
            }
            QuestionType::OrderedList => {
                if question.options.is_empty() {
                    return Err(bad("ordered list requires options"));
                }
                if question.options.iter().any(|o| !o.is_correct) {
                    return Err(bad("ordered list options must all be is_correct = true"));
                }
                let mut rows: Vec<&OptionRow> = question.options.iter().collect();
                rows.sort_by_key(|o| o.order);
                Ok(QuestionVariant::OrderedList {
                    canonical: rows.into_iter().map(|o| o.id).collect(),
                })
            }
            QuestionType::NumericEstimate | QuestionType::YearGuess => {
                let row = match question.options.as_slice() {
                    [row] => row,
                    _ => return Err(bad("numeric estimation requires exactly one option")),
                };
                let answer: f64 = row
                    .text
                    .trim()
                    .parse()
                    .map_err(|_| bad("option text is not a number"))?;
                if !(0..=100).contains(&row.order) {
                    return Err(bad("tolerance must be within 0..=100"));
                }
                Ok(QuestionVariant::Numeric {
                    answer,
                    tolerance_pct: row.order as f64,
                })
            }
            QuestionType::OpenText | QuestionType::TitleGuess | QuestionType::ArtistGuess => {
                let accepted: Vec<String> = question
                    .options
                    .iter()
                    .filter(|o| o.is_correct)
                    .map(|o| o.text.clone())
                    .collect();
                if accepted.is_empty() {
                    return Err(bad("no accepted answers"));
                }
                Ok(QuestionVariant::OpenText { accepted })
            }
        }
    }
}
