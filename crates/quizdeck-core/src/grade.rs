//! Pure per-type answer grading. No I/O, no clocks: the session actor feeds
//! decoded questions and raw payloads in, and gets correctness plus a
//! fractional credit in [0, 1] back. Timing and points are the scorer's job.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;
use uuid::Uuid;

use crate::quiz::QuestionVariant;

/// Similarity at or above which a fuzzy text answer is fully correct.
pub const TEXT_CORRECT_THRESHOLD: f64 = 0.85;
/// Similarity at or above which a fuzzy text answer earns partial credit.
pub const TEXT_PARTIAL_THRESHOLD: f64 = 0.70;
/// Width of the numeric linear-decay zone, in multiples of the tolerance.
const NUMERIC_DECAY_FACTOR: f64 = 3.0;

/// A raw answer as submitted by a player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnswerPayload {
    Choice { option: Uuid },
    MultiChoice { options: Vec<Uuid> },
    Ordered { options: Vec<Uuid> },
    Numeric { value: f64 },
    Text { text: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Correctness {
    Correct,
    Partial,
    Incorrect,
    Unscored,
}

/// Outcome of grading one answer against one question.
#[derive(Debug, Clone, PartialEq)]
pub struct Graded {
    pub correctness: Correctness,
    pub fraction: f64,
    /// Canonicalized payload as persisted: deduplicated selections, trimmed
    /// and case-folded text.
    pub normalized: AnswerPayload,
}

impl Graded {
    fn incorrect(normalized: AnswerPayload) -> Self {
        Self {
            correctness: Correctness::Incorrect,
            fraction: 0.0,
            normalized,
        }
    }

    fn from_fraction(fraction: f64, normalized: AnswerPayload) -> Self {
        let correctness = if fraction >= 1.0 {
            Correctness::Correct
        } else if fraction > 0.0 {
            Correctness::Partial
        } else {
            Correctness::Incorrect
        };
        Self {
            correctness,
            fraction: fraction.clamp(0.0, 1.0),
            normalized,
        }
    }
}

/// Grade a raw answer. A payload whose shape does not match the question type
/// is incorrect, never an error: clients that lie about the answer kind just
/// score zero.
pub fn grade(question: &QuestionVariant, answer: &AnswerPayload) -> Graded {
    match (question, answer) {
        (QuestionVariant::SingleChoice { correct }, AnswerPayload::Choice { option }) => {
            let fraction = if option == correct { 1.0 } else { 0.0 };
            Graded::from_fraction(fraction, answer.clone())
        }
        (
            QuestionVariant::MultiChoice {
                correct,
                option_count,
            },
            AnswerPayload::MultiChoice { options },
        ) => {
            let selected: BTreeSet<Uuid> = options.iter().copied().collect();
            let normalized = AnswerPayload::MultiChoice {
                options: selected.iter().copied().collect(),
            };
            let hit = selected.intersection(correct).count() as f64;
            let miss = selected.difference(correct).count() as f64;
            let wrong_pool = (*option_count).saturating_sub(correct.len()).max(1) as f64;
            let fraction = (hit / correct.len() as f64 - miss / wrong_pool).max(0.0);
            Graded::from_fraction(fraction, normalized)
        }
        (QuestionVariant::OrderedList { canonical }, AnswerPayload::Ordered { options }) => {
            if options.len() != canonical.len() {
                return Graded::incorrect(answer.clone());
            }
            let matched = options
                .iter()
                .zip(canonical)
                .filter(|(a, b)| a == b)
                .count();
            let fraction = matched as f64 / canonical.len() as f64;
            Graded::from_fraction(fraction, answer.clone())
        }
        (
            QuestionVariant::Numeric {
                answer: canonical,
                tolerance_pct,
            },
            AnswerPayload::Numeric { value },
        ) => {
            let fraction = grade_numeric(*canonical, *tolerance_pct, *value);
            Graded::from_fraction(fraction, answer.clone())
        }
        (QuestionVariant::OpenText { accepted }, AnswerPayload::Text { text }) => {
            let normalized_text = normalize_text(text);
            let best = accepted
                .iter()
                .map(|a| strsim::normalized_levenshtein(&normalize_text(a), &normalized_text))
                .fold(0.0f64, f64::max);
            let fraction = if best >= TEXT_CORRECT_THRESHOLD {
                1.0
            } else if best >= TEXT_PARTIAL_THRESHOLD {
                best
            } else {
                0.0
            };
            Graded::from_fraction(
                fraction,
                AnswerPayload::Text {
                    text: normalized_text,
                },
            )
        }
        (QuestionVariant::Poll, _) => Graded {
            correctness: Correctness::Unscored,
            fraction: 0.0,
            normalized: answer.clone(),
        },
        // Payload shape does not match the question type.
        _ => Graded::incorrect(answer.clone()),
    }
}

/// Inside the tolerance band: full credit. Beyond it, credit decays linearly
/// to zero across a zone [`NUMERIC_DECAY_FACTOR`] times the tolerance wide.
fn grade_numeric(canonical: f64, tolerance_pct: f64, submitted: f64) -> f64 {
    let margin = canonical.abs() * tolerance_pct / 100.0;
    let distance = (submitted - canonical).abs();
    if margin == 0.0 {
        return if distance == 0.0 { 1.0 } else { 0.0 };
    }
    if distance <= margin {
        1.0
    } else {
        (1.0 - distance / (margin * NUMERIC_DECAY_FACTOR)).max(0.0)
    }
}

/// Text normalization for fuzzy matching: lowercase, strip diacritics (NFD
/// then drop combining marks), collapse whitespace runs, and trim surrounding
/// punctuation.
pub fn normalize_text(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped: String = lowered.nfd().filter(|c| !is_combining_mark(*c)).collect();
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_matches(|c: char| !c.is_alphanumeric() && !c.is_whitespace())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::QuestionType;
    use crate::quiz::QuestionVariant;
    use crate::test_helpers::{make_question, option};

    fn pid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[test]
    fn normalization_rules() {
        assert_eq!(normalize_text("  Mona   Lisa "), "mona lisa");
        assert_eq!(normalize_text("Café au Lait"), "cafe au lait");
        assert_eq!(normalize_text("\"Bohemian Rhapsody!\""), "bohemian rhapsody");
        assert_eq!(normalize_text("ÀÉÎÕÜ"), "aeiou");
    }

    #[test]
    fn single_choice_exact_match_only() {
        let q = QuestionVariant::SingleChoice { correct: pid(2) };
        let right = grade(&q, &AnswerPayload::Choice { option: pid(2) });
        assert_eq!(right.correctness, Correctness::Correct);
        assert_eq!(right.fraction, 1.0);

        let wrong = grade(&q, &AnswerPayload::Choice { option: pid(3) });
        assert_eq!(wrong.correctness, Correctness::Incorrect);
        assert_eq!(wrong.fraction, 0.0);
    }

    #[test]
    fn multi_choice_partial_credit() {
        // 4 options, 2 correct.
        let q = QuestionVariant::MultiChoice {
            correct: [pid(1), pid(2)].into_iter().collect(),
            option_count: 4,
        };

        // Exact set: full credit.
        let g = grade(
            &q,
            &AnswerPayload::MultiChoice {
                options: vec![pid(2), pid(1)],
            },
        );
        assert_eq!(g.correctness, Correctness::Correct);
        assert_eq!(g.fraction, 1.0);

        // One correct, one wrong: 1/2 - 1/2 = 0.
        let g = grade(
            &q,
            &AnswerPayload::MultiChoice {
                options: vec![pid(1), pid(3)],
            },
        );
        assert_eq!(g.correctness, Correctness::Incorrect);

        // One correct only: 1/2.
        let g = grade(
            &q,
            &AnswerPayload::MultiChoice {
                options: vec![pid(1)],
            },
        );
        assert_eq!(g.correctness, Correctness::Partial);
        assert!((g.fraction - 0.5).abs() < 1e-9);
    }

    #[test]
    fn multi_choice_dedupes_selection() {
        let q = QuestionVariant::MultiChoice {
            correct: [pid(1)].into_iter().collect(),
            option_count: 3,
        };
        let g = grade(
            &q,
            &AnswerPayload::MultiChoice {
                options: vec![pid(1), pid(1), pid(1)],
            },
        );
        assert_eq!(g.fraction, 1.0);
        assert_eq!(
            g.normalized,
            AnswerPayload::MultiChoice {
                options: vec![pid(1)]
            }
        );
    }

    #[test]
    fn ordered_list_is_strictly_positional() {
        // Canonical [X, Y, Z, W]; submitted [X, Z, Y, W] → 2/4.
        let q = QuestionVariant::OrderedList {
            canonical: vec![pid(1), pid(2), pid(3), pid(4)],
        };
        let g = grade(
            &q,
            &AnswerPayload::Ordered {
                options: vec![pid(1), pid(3), pid(2), pid(4)],
            },
        );
        assert_eq!(g.correctness, Correctness::Partial);
        assert!((g.fraction - 0.5).abs() < 1e-9);
    }

    #[test]
    fn ordered_list_wrong_length_is_incorrect() {
        let q = QuestionVariant::OrderedList {
            canonical: vec![pid(1), pid(2)],
        };
        let g = grade(
            &q,
            &AnswerPayload::Ordered {
                options: vec![pid(1)],
            },
        );
        assert_eq!(g.correctness, Correctness::Incorrect);
    }

    #[test]
    fn numeric_margin_scenarios() {
        // Canonical 100, tolerance 10%.
        let q = QuestionVariant::Numeric {
            answer: 100.0,
            tolerance_pct: 10.0,
        };

        let g = grade(&q, &AnswerPayload::Numeric { value: 95.0 });
        assert_eq!(g.fraction, 1.0);

        // |15| beyond margin, inside 3× decay zone: 1 - 15/30 = 0.5.
        let g = grade(&q, &AnswerPayload::Numeric { value: 115.0 });
        assert!((g.fraction - 0.5).abs() < 1e-9);
        assert_eq!(g.correctness, Correctness::Partial);

        let g = grade(&q, &AnswerPayload::Numeric { value: 150.0 });
        assert_eq!(g.fraction, 0.0);
    }

    #[test]
    fn numeric_zero_tolerance_requires_exact() {
        let q = QuestionVariant::Numeric {
            answer: 1969.0,
            tolerance_pct: 0.0,
        };
        assert_eq!(grade(&q, &AnswerPayload::Numeric { value: 1969.0 }).fraction, 1.0);
        assert_eq!(grade(&q, &AnswerPayload::Numeric { value: 1970.0 }).fraction, 0.0);
    }

    #[test]
    fn open_text_fuzzy_match() {
        let q = QuestionVariant::OpenText {
            accepted: vec!["Mona Lisa".into(), "La Gioconda".into()],
        };

        // "mona liza" vs "mona lisa": similarity 8/9 ≈ 0.889 ≥ 0.85.
        let g = grade(
            &q,
            &AnswerPayload::Text {
                text: "mona liza".into(),
            },
        );
        assert_eq!(g.correctness, Correctness::Correct);
        assert_eq!(g.fraction, 1.0);

        let g = grade(
            &q,
            &AnswerPayload::Text {
                text: "gioconda".into(),
            },
        );
        // "gioconda" vs "la gioconda": dist 3, max len 11 → ≈ 0.727 partial.
        assert_eq!(g.correctness, Correctness::Partial);
        assert!(g.fraction > 0.70 && g.fraction < 0.85);

        let g = grade(
            &q,
            &AnswerPayload::Text {
                text: "starry night".into(),
            },
        );
        assert_eq!(g.correctness, Correctness::Incorrect);
    }

    #[test]
    fn poll_is_never_scored() {
        let g = grade(&QuestionVariant::Poll, &AnswerPayload::Choice { option: pid(1) });
        assert_eq!(g.correctness, Correctness::Unscored);
        assert_eq!(g.fraction, 0.0);
    }

    #[test]
    fn mismatched_payload_shape_is_incorrect() {
        let q = QuestionVariant::SingleChoice { correct: pid(1) };
        let g = grade(&q, &AnswerPayload::Text { text: "B".into() });
        assert_eq!(g.correctness, Correctness::Incorrect);
    }

    #[test]
    fn canonical_answer_round_trips_to_full_credit() {
        // For every question type, grading the canonical answer yields 1.0.
        let single = QuestionVariant::SingleChoice { correct: pid(1) };
        assert_eq!(grade(&single, &AnswerPayload::Choice { option: pid(1) }).fraction, 1.0);

        let multi = QuestionVariant::MultiChoice {
            correct: [pid(1), pid(2)].into_iter().collect(),
            option_count: 4,
        };
        assert_eq!(
            grade(
                &multi,
                &AnswerPayload::MultiChoice {
                    options: vec![pid(1), pid(2)]
                }
            )
            .fraction,
            1.0
        );

        let ordered = QuestionVariant::OrderedList {
            canonical: vec![pid(1), pid(2), pid(3)],
        };
        assert_eq!(
            grade(
                &ordered,
                &AnswerPayload::Ordered {
                    options: vec![pid(1), pid(2), pid(3)]
                }
            )
            .fraction,
            1.0
        );

        let numeric = QuestionVariant::Numeric {
            answer: 42.0,
            tolerance_pct: 5.0,
        };
        assert_eq!(grade(&numeric, &AnswerPayload::Numeric { value: 42.0 }).fraction, 1.0);

        let text = QuestionVariant::OpenText {
            accepted: vec!["Ludwig van Beethoven".into()],
        };
        assert_eq!(
            grade(
                &text,
                &AnswerPayload::Text {
                    text: "Ludwig van Beethoven".into()
                }
            )
            .fraction,
            1.0
        );
    }

    #[test]
    fn decoded_question_grades_end_to_end() {
        let q = make_question(
            QuestionType::McSingle,
            vec![
                option("A", false, 0),
                option("B", true, 1),
                option("C", false, 2),
            ],
        );
        let variant = QuestionVariant::from_question(&q).unwrap();
        let g = grade(&variant, &AnswerPayload::Choice { option: q.options[1].id });
        assert_eq!(g.fraction, 1.0);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn fraction_always_in_unit_interval(
                canonical in -1e6f64..1e6,
                tolerance in 0f64..100.0,
                submitted in -1e6f64..1e6,
            ) {
                let q = QuestionVariant::Numeric { answer: canonical, tolerance_pct: tolerance };
                let g = grade(&q, &AnswerPayload::Numeric { value: submitted });
                prop_assert!((0.0..=1.0).contains(&g.fraction));
            }

            #[test]
            fn grading_is_deterministic(text in "\\PC{0,40}") {
                let q = QuestionVariant::OpenText { accepted: vec!["reference answer".into()] };
                let payload = AnswerPayload::Text { text };
                let a = grade(&q, &payload);
                let b = grade(&q, &payload);
                prop_assert_eq!(a, b);
            }

            #[test]
            fn multi_choice_fraction_bounded(selection in proptest::collection::vec(0u128..8, 0..8)) {
                let q = QuestionVariant::MultiChoice {
                    correct: [pid(0), pid(1), pid(2)].into_iter().collect(),
                    option_count: 8,
                };
                let options: Vec<Uuid> = selection.into_iter().map(pid).collect();
                let g = grade(&q, &AnswerPayload::MultiChoice { options });
                prop_assert!((0.0..=1.0).contains(&g.fraction));
            }
        }
    }
}
