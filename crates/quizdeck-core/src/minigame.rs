use serde::{Deserialize, Serialize};

use crate::player::PlayerId;

/// Swan Chase game mode, selected by the host when starting the minigame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwanMode {
    /// Boats evade AI swans; survival time scores.
    Classic,
    /// Last boat standing; tagging transfers the crown.
    KingOfLake,
    /// Escalating waves of AI swans.
    SwanSwarm,
}

/// Authoritative ticks per second for minigame simulations.
pub const MINIGAME_TICK_HZ: u32 = 30;

/// State diffs are broadcast every Nth tick (15 Hz at the 30 Hz tick rate).
pub const STATE_BROADCAST_DIVISOR: u64 = 2;

/// Inputs older than this at tick time are treated as released controls.
pub const INPUT_STALE_MS: u64 = 250;

/// A player's control state for their boat. Values outside the documented
/// ranges are clamped by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwanInput {
    /// Forward thrust, 0..=1.
    pub thrust: f32,
    /// Turn rate, -1..=1 (negative = port).
    pub turn: f32,
    pub sprint: bool,
    pub dash: bool,
}

impl Default for SwanInput {
    fn default() -> Self {
        Self {
            thrust: 0.0,
            turn: 0.0,
            sprint: false,
            dash: false,
        }
    }
}

/// Events surfaced by a minigame tick. Score updates flow back into the
/// session's player totals when the game ends.
#[derive(Debug, Clone, PartialEq)]
pub enum MinigameEvent {
    ScoreUpdate { player_id: PlayerId, score: i64 },
    Over,
}

/// Final per-player result of a finished minigame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinigameScore {
    pub player_id: PlayerId,
    pub score: i64,
}

/// An authoritative minigame simulation hosted by the session runtime.
///
/// The runtime owns the 30 Hz loop; implementations only integrate state.
/// `tick` must stay within the tick budget — it runs on the session's
/// schedule and a slow tick degrades every player's stream.
pub trait Minigame: Send {
    /// Reset the simulation for the given players. `seed` derives from the
    /// session code and item id, so layouts replay identically.
    fn init(&mut self, players: &[PlayerId], seed: u64);

    /// Record a player's latest input. Most-recent-wins; the engine applies
    /// it on the next tick and zeroes it once stale.
    fn apply_input(&mut self, player_id: PlayerId, input: SwanInput, received_ms: u64);

    /// Advance one fixed step. `now_ms` is the session-relative clock used
    /// for input staleness.
    fn tick(&mut self, tick: u64, dt: f32, now_ms: u64) -> Vec<MinigameEvent>;

    /// Full state snapshot for late joiners and the start broadcast.
    fn snapshot(&self) -> serde_json::Value;

    /// Compact diff since the previous `state_diff` call.
    fn state_diff(&mut self) -> serde_json::Value;

    fn is_over(&self) -> bool;

    fn results(&self) -> Vec<MinigameScore>;
}

/// Deterministic seed for a minigame instance: session code + item id folded
/// through FNV-1a. Reused with the tick number mixed in wherever per-tick
/// randomness is needed.
pub fn minigame_seed(session_code: &str, item_id: uuid::Uuid) -> u64 {
    fnv1a(session_code.as_bytes(), fnv1a(item_id.as_bytes(), FNV_OFFSET))
}

/// Mix a tick number into a base seed for per-tick randomness.
pub fn tick_seed(base: u64, tick: u64) -> u64 {
    fnv1a(&tick.to_le_bytes(), base)
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8], mut hash: u64) -> u64 {
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
