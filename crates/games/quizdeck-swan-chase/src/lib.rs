//! Swan Chase: a top-down chase between player boats and pursuing swans on a
//! bounded lake. The server hosts the authoritative 30 Hz loop; this crate
//! only integrates state. Determinism matters — every random draw is seeded
//! from the session, so a replay with the same inputs produces byte-identical
//! snapshots.

pub mod lake;
pub mod modes;
pub mod physics;
pub mod swans;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use quizdeck_core::minigame::{
    INPUT_STALE_MS, Minigame, MinigameEvent, MinigameScore, SwanInput, SwanMode, tick_seed,
};
use quizdeck_core::player::PlayerId;

use lake::{Lake, generate_lake};
use modes::{ModeRules, rules_for};
use physics::{
    BOAT_RADIUS, Controls, DASH_COOLDOWN, DASH_IMPULSE, SPRINT_COOLDOWN, SPRINT_DURATION,
    SPRINT_MULTIPLIER, TAG_RADIUS, Vec2, integrate_boat, resolve_collisions, within_tag_range,
};
use swans::{Swan, steer_swan, wave_spawns};

/// Seconds of protection a boat can spend inside safe zones before the grant
/// runs dry; it recharges at half rate outside.
const SAFE_ZONE_BUDGET: f32 = 5.0;
const SAFE_ZONE_REGEN: f32 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Boat {
    pub pos: Vec2,
    pub vel: Vec2,
    pub heading: f32,
    pub ghost_remaining: f32,
    pub eliminated: bool,
    pub sprint_remaining: f32,
    pub sprint_cooldown: f32,
    pub dash_cooldown: f32,
    pub safe_meter: f32,
    pub score: f32,
}

impl Boat {
    fn at(pos: Vec2, heading: f32) -> Self {
        Self {
            pos,
            vel: Vec2::default(),
            heading,
            ghost_remaining: 0.0,
            eliminated: false,
            sprint_remaining: 0.0,
            sprint_cooldown: 0.0,
            dash_cooldown: 0.0,
            safe_meter: SAFE_ZONE_BUDGET,
            score: 0.0,
        }
    }

    pub fn is_ghosted(&self) -> bool {
        self.ghost_remaining > 0.0
    }

    fn active(&self) -> bool {
        !self.eliminated && !self.is_ghosted()
    }
}

/// Full serializable simulation state. `BTreeMap` keeps iteration (and thus
/// every seeded draw and serialized snapshot) in a deterministic order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChaseState {
    pub mode: SwanMode,
    pub lake: Lake,
    pub boats: BTreeMap<PlayerId, Boat>,
    pub swans: Vec<Swan>,
    pub elapsed: f32,
    pub wave: u32,
    pub king: Option<PlayerId>,
    pub over: bool,
}

pub struct SwanChase {
    pub state: ChaseState,
    rules: ModeRules,
    base_seed: u64,
    inputs: HashMap<PlayerId, (SwanInput, u64)>,
}

impl SwanChase {
    pub fn new(mode: SwanMode) -> Self {
        Self {
            state: ChaseState {
                mode,
                lake: generate_lake(0),
                boats: BTreeMap::new(),
                swans: Vec::new(),
                elapsed: 0.0,
                wave: 0,
                king: None,
                over: false,
            },
            rules: rules_for(mode),
            base_seed: 0,
            inputs: HashMap::new(),
        }
    }

    fn controls_for(&self, player_id: PlayerId, now_ms: u64) -> SwanInput {
        match self.inputs.get(&player_id) {
            Some((input, received_ms)) if now_ms.saturating_sub(*received_ms) <= INPUT_STALE_MS => {
                *input
            }
            _ => SwanInput::default(),
        }
    }

    fn step_boats(&mut self, now_ms: u64, dt: f32) {
        let lake = self.state.lake.clone();
        let ids: Vec<PlayerId> = self.state.boats.keys().copied().collect();
        for id in ids {
            let input = self.controls_for(id, now_ms);
            let in_safe_zone = {
                let boat = &self.state.boats[&id];
                lake.safe_zones.iter().any(|z| z.contains(boat.pos))
            };
            let boat = self.state.boats.get_mut(&id).expect("boat exists");
            if boat.eliminated {
                continue;
            }

            boat.ghost_remaining = (boat.ghost_remaining - dt).max(0.0);
            boat.sprint_cooldown = (boat.sprint_cooldown - dt).max(0.0);
            boat.sprint_remaining = (boat.sprint_remaining - dt).max(0.0);
            boat.dash_cooldown = (boat.dash_cooldown - dt).max(0.0);

            if boat.is_ghosted() {
                // Ghosted boats drift; no control, no abilities.
                boat.vel = boat.vel.scale((1.0 - dt).max(0.0));
                boat.pos = boat.pos.add(boat.vel.scale(dt));
                boat.pos = resolve_collisions(boat.pos, BOAT_RADIUS, &lake);
                continue;
            }

            if input.sprint && boat.sprint_cooldown <= 0.0 {
                boat.sprint_remaining = SPRINT_DURATION;
                boat.sprint_cooldown = SPRINT_COOLDOWN;
            }
            if input.dash && boat.dash_cooldown <= 0.0 {
                let dir = Vec2::new(boat.heading.cos(), boat.heading.sin());
                boat.vel = boat.vel.add(dir.scale(DASH_IMPULSE));
                boat.dash_cooldown = DASH_COOLDOWN;
            }

            let multiplier = if boat.sprint_remaining > 0.0 {
                SPRINT_MULTIPLIER
            } else {
                1.0
            };
            let controls = Controls {
                thrust: input.thrust,
                turn: input.turn,
            };
            let (mut pos, mut vel, mut heading) = (boat.pos, boat.vel, boat.heading);
            integrate_boat(&mut pos, &mut vel, &mut heading, controls, multiplier, dt);
            pos = resolve_collisions(pos, BOAT_RADIUS, &lake);
            boat.pos = pos;
            boat.vel = vel;
            boat.heading = heading;

            if in_safe_zone {
                boat.safe_meter = (boat.safe_meter - dt).max(0.0);
            } else {
                boat.safe_meter = (boat.safe_meter + SAFE_ZONE_REGEN * dt).min(SAFE_ZONE_BUDGET);
            }
        }
    }

    fn step_swans(&mut self, tick: u64, dt: f32) {
        let prey: Vec<(Uuid, Vec2)> = self
            .state
            .boats
            .iter()
            .filter(|(_, b)| b.active())
            .filter(|(_, b)| !self.protected_ref(b))
            .map(|(&id, b)| (id, b.pos))
            .collect();

        let seed = tick_seed(self.base_seed, tick);
        let lake = self.state.lake.clone();
        for (index, swan) in self.state.swans.iter_mut().enumerate() {
            steer_swan(swan, &prey, &lake, seed, index, dt);
        }
    }

    fn protected_ref(&self, boat: &Boat) -> bool {
        boat.safe_meter > 0.0
            && self
                .state
                .lake
                .safe_zones
                .iter()
                .any(|z| z.contains(boat.pos))
    }

    fn resolve_tags(&mut self, events: &mut Vec<MinigameEvent>) {
        let swan_positions: Vec<Vec2> = self.state.swans.iter().map(|s| s.pos).collect();
        let tagged: Vec<PlayerId> = self
            .state
            .boats
            .iter()
            .filter(|(_, boat)| boat.active() && !self.protected_ref(boat))
            .filter(|(_, boat)| {
                swan_positions
                    .iter()
                    .any(|&sp| within_tag_range(sp, boat.pos, TAG_RADIUS))
            })
            .map(|(&id, _)| id)
            .collect();

        for id in tagged {
            if self.rules.eliminate_on_tag {
                if let Some(boat) = self.state.boats.get_mut(&id) {
                    boat.eliminated = true;
                    boat.vel = Vec2::default();
                }
            } else if let Some(boat) = self.state.boats.get_mut(&id) {
                boat.ghost_remaining = self.rules.ghost_duration;
            }

            if self.rules.crowned && self.state.king == Some(id) {
                self.transfer_crown(id);
            }

            if let Some(boat) = self.state.boats.get(&id) {
                events.push(MinigameEvent::ScoreUpdate {
                    player_id: id,
                    score: boat.score.floor() as i64,
                });
            }
            tracing::debug!(player = %id, "boat tagged");
        }
    }

    /// Crown passes to the nearest active boat; nobody active means the crown
    /// waits on the tagged boat until it recovers.
    fn transfer_crown(&mut self, from: PlayerId) {
        let from_pos = match self.state.boats.get(&from) {
            Some(b) => b.pos,
            None => return,
        };
        let next = self
            .state
            .boats
            .iter()
            .filter(|&(&id, ref b)| id != from && b.active())
            .min_by(|a, b| {
                from_pos
                    .distance(a.1.pos)
                    .partial_cmp(&from_pos.distance(b.1.pos))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(&id, _)| id);
        if let Some(next) = next {
            self.state.king = Some(next);
        }
    }

    fn accrue_scores(&mut self, dt: f32) {
        let king = self.state.king;
        for (&id, boat) in self.state.boats.iter_mut() {
            if boat.eliminated || boat.is_ghosted() {
                continue;
            }
            boat.score += self.rules.survival_points_per_sec * dt;
            if king == Some(id) {
                boat.score += self.rules.crown_points_per_sec * dt;
            }
        }
    }

    fn maybe_spawn_wave(&mut self, events: &mut Vec<MinigameEvent>) {
        let Some(interval) = self.rules.wave_interval else {
            return;
        };
        if self.state.elapsed < (self.state.wave + 1) as f32 * interval {
            return;
        }

        self.state.wave += 1;
        let count = self.state.wave as usize + 1;
        for pos in wave_spawns(&self.state.lake, count, self.state.wave) {
            self.state.swans.push(Swan::at(pos));
        }

        for (&id, boat) in self.state.boats.iter_mut() {
            if !boat.eliminated {
                boat.score += self.rules.wave_bonus as f32;
                events.push(MinigameEvent::ScoreUpdate {
                    player_id: id,
                    score: boat.score.floor() as i64,
                });
            }
        }
        tracing::debug!(wave = self.state.wave, swans = self.state.swans.len(), "wave spawned");
    }

    fn check_over(&mut self) -> bool {
        if self.state.over {
            return true;
        }
        let duration_hit = self.state.elapsed >= self.rules.duration;
        let all_out = self.rules.eliminate_on_tag
            && !self.state.boats.is_empty()
            && self.state.boats.values().all(|b| b.eliminated);
        if duration_hit || all_out {
            self.state.over = true;
        }
        self.state.over
    }
}

impl Minigame for SwanChase {
    fn init(&mut self, players: &[PlayerId], seed: u64) {
        self.base_seed = seed;
        self.inputs.clear();

        let lake = generate_lake(seed);
        let mut boats = BTreeMap::new();
        for (i, &player_id) in players.iter().enumerate() {
            let spawn = lake.spawn_points[i % lake.spawn_points.len()];
            let center = Vec2::new(lake.width / 2.0, lake.height / 2.0);
            let heading = (center.y - spawn.y).atan2(center.x - spawn.x);
            boats.insert(player_id, Boat::at(spawn, heading));
        }

        let swans = wave_spawns(&lake, self.rules.initial_swans, 0)
            .into_iter()
            .map(Swan::at)
            .collect();

        // King mode: the lowest player id starts with the crown.
        let king = if self.rules.crowned {
            boats.keys().min().copied()
        } else {
            None
        };

        self.state = ChaseState {
            mode: self.state.mode,
            lake,
            boats,
            swans,
            elapsed: 0.0,
            wave: 0,
            king,
            over: false,
        };
    }

    fn apply_input(&mut self, player_id: PlayerId, input: SwanInput, received_ms: u64) {
        if !self.state.boats.contains_key(&player_id) {
            return;
        }
        let clamped = SwanInput {
            thrust: input.thrust.clamp(0.0, 1.0),
            turn: input.turn.clamp(-1.0, 1.0),
            sprint: input.sprint,
            dash: input.dash,
        };
        self.inputs.insert(player_id, (clamped, received_ms));
    }

    fn tick(&mut self, tick: u64, dt: f32, now_ms: u64) -> Vec<MinigameEvent> {
        if self.state.over {
            return Vec::new();
        }

        let mut events = Vec::new();
        self.state.elapsed += dt;

        self.step_boats(now_ms, dt);
        self.step_swans(tick, dt);
        self.resolve_tags(&mut events);
        self.accrue_scores(dt);
        self.maybe_spawn_wave(&mut events);

        if self.check_over() {
            events.push(MinigameEvent::Over);
        }
        events
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(&self.state).unwrap_or_else(|_| serde_json::json!({}))
    }

    fn state_diff(&mut self) -> serde_json::Value {
        // Dynamic fields only; the lake is static after init and travels in
        // the start snapshot.
        let boats: serde_json::Map<String, serde_json::Value> = self
            .state
            .boats
            .iter()
            .map(|(id, b)| {
                (
                    id.to_string(),
                    serde_json::json!({
                        "pos": b.pos,
                        "heading": b.heading,
                        "ghost": b.is_ghosted(),
                        "eliminated": b.eliminated,
                        "score": b.score.floor() as i64,
                    }),
                )
            })
            .collect();
        let swans: Vec<serde_json::Value> = self
            .state
            .swans
            .iter()
            .map(|s| serde_json::json!({ "pos": s.pos, "target": s.target }))
            .collect();
        serde_json::json!({
            "elapsed": self.state.elapsed,
            "wave": self.state.wave,
            "king": self.state.king,
            "boats": boats,
            "swans": swans,
        })
    }

    fn is_over(&self) -> bool {
        self.state.over
    }

    fn results(&self) -> Vec<MinigameScore> {
        let mut results: Vec<MinigameScore> = self
            .state
            .boats
            .iter()
            .map(|(&player_id, boat)| MinigameScore {
                player_id,
                score: boat.score.floor() as i64,
            })
            .collect();
        results.sort_by(|a, b| b.score.cmp(&a.score).then(a.player_id.cmp(&b.player_id)));
        results
    }
}
