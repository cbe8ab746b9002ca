//! Pure scoring. Converts a graded answer plus timing into a point delta,
//! tracks streaks, and pays speed-podium bonuses. The session actor is the
//! only caller; everything here is deterministic given its inputs.

use serde::{Deserialize, Serialize};

use crate::player::PlayerId;
use crate::quiz::ScoringSettings;

/// Inputs for scoring one answer.
#[derive(Debug, Clone, Copy)]
pub struct ScoreInput {
    pub base_points: u32,
    /// Fractional credit from the grader, in [0, 1].
    pub fraction: f64,
    /// Item timer duration in milliseconds.
    pub timer_ms: u64,
    /// Time from `ITEM_STARTED` to the answer, in milliseconds. Clamped to
    /// the timer duration.
    pub elapsed_ms: u64,
    pub prior_streak: u32,
}

/// Result of scoring one answer. `points` excludes the streak bonus so the
/// two can be reported separately; the total delta is their sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreOutcome {
    pub points: u32,
    pub streak_bonus: u32,
    pub new_streak: u32,
}

impl ScoreOutcome {
    pub fn total(&self) -> u32 {
        self.points + self.streak_bonus
    }
}

/// An instant answer earns the full base; an answer at the deadline earns
/// half, rounded; everything between scales linearly, then by the credit
/// fraction. Streaks count consecutive full-credit answers and reset on
/// anything less.
pub fn score_answer(input: ScoreInput, settings: &ScoringSettings) -> ScoreOutcome {
    let points = if input.fraction > 0.0 && input.timer_ms > 0 {
        let t = input.elapsed_ms.min(input.timer_ms) as f64;
        let time_factor = 0.5 + 0.5 * (1.0 - t / input.timer_ms as f64);
        (input.base_points as f64 * input.fraction * time_factor).round() as u32
    } else {
        0
    };

    let full_credit = input.fraction >= 1.0;
    let new_streak = if full_credit { input.prior_streak + 1 } else { 0 };
    let streak_bonus = if full_credit && settings.streak_enabled {
        settings.streak_bonus_points * new_streak
    } else {
        0
    };

    ScoreOutcome {
        points,
        streak_bonus,
        new_streak,
    }
}

/// One paid podium place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodiumAward {
    pub player_id: PlayerId,
    pub elapsed_ms: u64,
    pub bonus: u32,
}

/// Pay the speed podium for one item: the up-to-three fastest players with
/// full credit, ordered by ascending answer time, ties broken by the lower
/// player id. Returns an empty list when the podium is disabled or nobody
/// qualified.
pub fn speed_podium(
    base_points: u32,
    qualifiers: &[(PlayerId, u64)],
    settings: &ScoringSettings,
) -> Vec<PodiumAward> {
    if !settings.speed_podium_enabled || qualifiers.is_empty() {
        return Vec::new();
    }

    let mut ordered: Vec<(PlayerId, u64)> = qualifiers.to_vec();
    ordered.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

    ordered
        .into_iter()
        .take(settings.podium_percentages.len())
        .enumerate()
        .map(|(rank, (player_id, elapsed_ms))| PodiumAward {
            player_id,
            elapsed_ms,
            bonus: (base_points as f64 * settings.podium_percentages[rank] as f64 / 100.0).round()
                as u32,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn pid(n: u128) -> PlayerId {
        Uuid::from_u128(n)
    }

    fn settings() -> ScoringSettings {
        ScoringSettings::default()
    }

    fn input(base: u32, fraction: f64, timer_ms: u64, elapsed_ms: u64, streak: u32) -> ScoreInput {
        ScoreInput {
            base_points: base,
            fraction,
            timer_ms,
            elapsed_ms,
            prior_streak: streak,
        }
    }

    #[test]
    fn happy_mcq_scenario() {
        // base 10, timer 10 s, answered at 2 s: round(10 · 1 · (0.5 + 0.5·0.8)) = 9.
        let outcome = score_answer(input(10, 1.0, 10_000, 2_000, 0), &settings());
        assert_eq!(outcome.points, 9);
    }

    #[test]
    fn fuzzy_text_scenario() {
        // base 10, timer 8 s, answered at 4 s, full credit: round(10 · 0.75) = 8.
        let outcome = score_answer(input(10, 1.0, 8_000, 4_000, 0), &settings());
        assert_eq!(outcome.points, 8);
    }

    #[test]
    fn numeric_partial_scenario() {
        // fraction 0.5 at t = 0: round(10 · 0.5 · 1.0) = 5.
        let outcome = score_answer(input(10, 0.5, 10_000, 0, 0), &settings());
        assert_eq!(outcome.points, 5);
    }

    #[test]
    fn ordered_list_scenario() {
        // fraction 0.5 at t = T/2: round(B · 0.5 · 0.75).
        for base in [10u32, 20, 40] {
            let outcome = score_answer(input(base, 0.5, 10_000, 5_000, 0), &settings());
            assert_eq!(outcome.points, (base as f64 * 0.375).round() as u32);
        }
    }

    #[test]
    fn instant_answer_earns_full_base() {
        let outcome = score_answer(input(10, 1.0, 4_000, 0, 0), &settings());
        assert_eq!(outcome.points, 10);
    }

    #[test]
    fn deadline_answer_earns_half_rounded_up() {
        // ⌈B/2⌉ at t = T.
        let outcome = score_answer(input(5, 1.0, 4_000, 4_000, 0), &settings());
        assert_eq!(outcome.points, 3);
        let outcome = score_answer(input(10, 1.0, 4_000, 4_000, 0), &settings());
        assert_eq!(outcome.points, 5);
    }

    #[test]
    fn elapsed_clamped_to_timer() {
        let late = score_answer(input(10, 1.0, 4_000, 9_999, 0), &settings());
        let at_deadline = score_answer(input(10, 1.0, 4_000, 4_000, 0), &settings());
        assert_eq!(late.points, at_deadline.points);
    }

    #[test]
    fn zero_fraction_scores_zero_and_resets_streak() {
        let outcome = score_answer(input(10, 0.0, 4_000, 1_000, 7), &settings());
        assert_eq!(outcome.points, 0);
        assert_eq!(outcome.new_streak, 0);
        assert_eq!(outcome.streak_bonus, 0);
    }

    #[test]
    fn partial_credit_breaks_streak() {
        let outcome = score_answer(input(10, 0.5, 4_000, 0, 4), &settings());
        assert!(outcome.points > 0);
        assert_eq!(outcome.new_streak, 0);
    }

    #[test]
    fn streak_bonus_scales_with_length() {
        let mut cfg = settings();
        cfg.streak_bonus_points = 2;
        let outcome = score_answer(input(10, 1.0, 4_000, 0, 2), &cfg);
        assert_eq!(outcome.new_streak, 3);
        assert_eq!(outcome.streak_bonus, 6);
    }

    #[test]
    fn streak_tracked_even_when_bonus_disabled() {
        let mut cfg = settings();
        cfg.streak_enabled = false;
        let outcome = score_answer(input(10, 1.0, 4_000, 0, 2), &cfg);
        assert_eq!(outcome.new_streak, 3);
        assert_eq!(outcome.streak_bonus, 0);
    }

    #[test]
    fn podium_pays_three_fastest_with_id_tiebreak() {
        // P1 and P2 tie at 1 s; the lower id wins first place.
        let qualifiers = vec![
            (pid(2), 1_000),
            (pid(1), 1_000),
            (pid(3), 2_000),
            (pid(4), 3_000),
        ];
        let awards = speed_podium(10, &qualifiers, &settings());
        assert_eq!(awards.len(), 3);
        assert_eq!(awards[0].player_id, pid(1));
        assert_eq!(awards[0].bonus, 3);
        assert_eq!(awards[1].player_id, pid(2));
        assert_eq!(awards[1].bonus, 2);
        assert_eq!(awards[2].player_id, pid(3));
        assert_eq!(awards[2].bonus, 1);
    }

    #[test]
    fn podium_pays_fewer_when_fewer_qualify() {
        let awards = speed_podium(10, &[(pid(1), 500)], &settings());
        assert_eq!(awards.len(), 1);
        assert_eq!(awards[0].bonus, 3);
    }

    #[test]
    fn podium_disabled_pays_nothing() {
        let mut cfg = settings();
        cfg.speed_podium_enabled = false;
        assert!(speed_podium(10, &[(pid(1), 500)], &cfg).is_empty());
    }

    #[test]
    fn podium_custom_percentages() {
        let mut cfg = settings();
        cfg.podium_percentages = [50, 25, 5];
        let awards = speed_podium(
            20,
            &[(pid(1), 100), (pid(2), 200), (pid(3), 300)],
            &cfg,
        );
        assert_eq!(
            awards.iter().map(|a| a.bonus).collect::<Vec<_>>(),
            vec![10, 5, 1]
        );
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn identical_inputs_score_identically(
                base in 1u32..1000,
                fraction in 0f64..=1.0,
                timer_ms in 1u64..600_000,
                elapsed_ms in 0u64..700_000,
                streak in 0u32..50,
            ) {
                let i = ScoreInput { base_points: base, fraction, timer_ms, elapsed_ms, prior_streak: streak };
                let cfg = ScoringSettings::default();
                prop_assert_eq!(score_answer(i, &cfg), score_answer(i, &cfg));
            }

            #[test]
            fn points_never_exceed_base(
                base in 1u32..1000,
                fraction in 0f64..=1.0,
                timer_ms in 1u64..600_000,
                elapsed_ms in 0u64..700_000,
            ) {
                let i = ScoreInput { base_points: base, fraction, timer_ms, elapsed_ms, prior_streak: 0 };
                let outcome = score_answer(i, &ScoringSettings::default());
                prop_assert!(outcome.points <= base);
            }

            #[test]
            fn faster_is_never_worse(
                base in 1u32..1000,
                timer_ms in 2u64..600_000,
                a in 0u64..600_000,
                b in 0u64..600_000,
            ) {
                let (fast, slow) = if a <= b { (a, b) } else { (b, a) };
                let cfg = ScoringSettings::default();
                let fast_pts = score_answer(
                    ScoreInput { base_points: base, fraction: 1.0, timer_ms, elapsed_ms: fast, prior_streak: 0 },
                    &cfg,
                ).points;
                let slow_pts = score_answer(
                    ScoreInput { base_points: base, fraction: 1.0, timer_ms, elapsed_ms: slow, prior_streak: 0 },
                    &cfg,
                ).points;
                prop_assert!(fast_pts >= slow_pts);
            }
        }
    }
}
