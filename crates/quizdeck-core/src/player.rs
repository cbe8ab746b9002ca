use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a player within the platform.
pub type PlayerId = Uuid;

/// Roster entry broadcast to clients. The reconnect token is never part of
/// this; it travels only in the point-to-point `SESSION_STATE` snapshot for
/// the owning connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub id: PlayerId,
    pub name: String,
    pub avatar: String,
    pub online: bool,
    pub score: i64,
    pub streak: u32,
}

/// One materialized leaderboard row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub player_id: PlayerId,
    pub name: String,
    pub score: i64,
    pub rank: u32,
    /// Positive = climbed since the previous materialization.
    pub rank_change: i32,
}

/// Case-insensitive display-name key used for the per-session uniqueness
/// check. Unicode-aware lowercasing; whitespace is trimmed first so
/// `" Alice"` and `"alice"` collide.
pub fn fold_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Materialize leaderboard rows from `(player, score)` pairs, assigning dense
/// ranks (ties share a rank) and deltas against `previous_ranks`.
pub fn materialize_leaderboard(
    mut scored: Vec<(PlayerId, String, i64)>,
    previous_ranks: &std::collections::HashMap<PlayerId, u32>,
) -> Vec<LeaderboardEntry> {
    // Sort by score descending, then by id for a stable order.
    scored.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(&b.0)));

    let mut entries = Vec::with_capacity(scored.len());
    let mut rank = 0u32;
    let mut last_score: Option<i64> = None;
    for (i, (player_id, name, score)) in scored.into_iter().enumerate() {
        if last_score != Some(score) {
            rank = i as u32 + 1;
            last_score = Some(score);
        }
        let rank_change = previous_ranks
            .get(&player_id)
            .map(|&prev| prev as i32 - rank as i32)
            .unwrap_or(0);
        entries.push(LeaderboardEntry {
            player_id,
            name,
            score,
            rank,
            rank_change,
        });
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn pid(n: u128) -> PlayerId {
        Uuid::from_u128(n)
    }

    #[test]
    fn name_folding_is_case_insensitive() {
        assert_eq!(fold_name("Alice"), fold_name("aLiCe"));
        assert_eq!(fold_name("  Bob "), fold_name("bob"));
        assert_ne!(fold_name("alice"), fold_name("alicia"));
    }

    #[test]
    fn leaderboard_ranks_descending_with_ties() {
        let rows = materialize_leaderboard(
            vec![
                (pid(1), "a".into(), 10),
                (pid(2), "b".into(), 30),
                (pid(3), "c".into(), 10),
                (pid(4), "d".into(), 20),
            ],
            &HashMap::new(),
        );
        let ranks: Vec<(i64, u32)> = rows.iter().map(|e| (e.score, e.rank)).collect();
        assert_eq!(ranks, vec![(30, 1), (20, 2), (10, 3), (10, 3)]);
    }

    #[test]
    fn rank_change_tracks_previous_materialization() {
        let previous: HashMap<_, _> = [(pid(1), 2), (pid(2), 1)].into_iter().collect();
        let rows = materialize_leaderboard(
            vec![(pid(1), "a".into(), 50), (pid(2), "b".into(), 40)],
            &previous,
        );
        // Player 1 climbed from rank 2 to rank 1.
        assert_eq!(rows[0].player_id, pid(1));
        assert_eq!(rows[0].rank_change, 1);
        assert_eq!(rows[1].rank_change, -1);
    }

    #[test]
    fn unknown_previous_rank_yields_zero_delta() {
        let rows = materialize_leaderboard(vec![(pid(9), "new".into(), 5)], &HashMap::new());
        assert_eq!(rows[0].rank_change, 0);
    }
}
