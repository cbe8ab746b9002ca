//! Swan steering. Swans are simple pursuers: pick the nearest taggable boat,
//! swim at it, wander a little, and slide around obstacles. All randomness
//! comes from the per-tick seed so replays are identical.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::lake::Lake;
use crate::physics::{SWAN_RADIUS, Vec2, resolve_collisions};

/// Swans are a touch slower than a sprinting boat but faster than a cruising
/// one, so standing still is fatal and sprint timing matters.
pub const SWAN_SPEED: f32 = 5.6;
/// Steering responsiveness (fraction of desired velocity adopted per second).
const STEERING_GAIN: f32 = 3.0;
const WANDER_STRENGTH: f32 = 1.2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Swan {
    pub pos: Vec2,
    pub vel: Vec2,
    pub target: Option<Uuid>,
}

impl Swan {
    pub fn at(pos: Vec2) -> Self {
        Self {
            pos,
            vel: Vec2::default(),
            target: None,
        }
    }
}

/// One steering-and-integration step for a swan. `prey` lists the position of
/// every currently taggable boat.
pub fn steer_swan(
    swan: &mut Swan,
    prey: &[(Uuid, Vec2)],
    lake: &Lake,
    tick_seed: u64,
    index: usize,
    dt: f32,
) {
    let mut rng = StdRng::seed_from_u64(tick_seed.wrapping_add(index as u64));

    let nearest = prey
        .iter()
        .min_by(|a, b| {
            swan.pos
                .distance(a.1)
                .partial_cmp(&swan.pos.distance(b.1))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .copied();

    swan.target = nearest.map(|(id, _)| id);

    let mut desired = match nearest {
        Some((_, pos)) => pos.sub(swan.pos).normalized().scale(SWAN_SPEED),
        // Nothing to chase: drift toward the middle of the lake.
        None => Vec2::new(lake.width / 2.0, lake.height / 2.0)
            .sub(swan.pos)
            .normalized()
            .scale(SWAN_SPEED * 0.4),
    };

    desired.x += rng.random_range(-WANDER_STRENGTH..WANDER_STRENGTH);
    desired.y += rng.random_range(-WANDER_STRENGTH..WANDER_STRENGTH);

    let gain = (STEERING_GAIN * dt).min(1.0);
    swan.vel = swan.vel.add(desired.sub(swan.vel).scale(gain));

    let speed = swan.vel.length();
    if speed > SWAN_SPEED {
        swan.vel = swan.vel.scale(SWAN_SPEED / speed);
    }

    swan.pos = swan.pos.add(swan.vel.scale(dt));
    swan.pos = resolve_collisions(swan.pos, SWAN_RADIUS, lake);
}

/// Spawn positions for a wave of swans: spread along the top shore, offset by
/// the wave number so successive waves enter from different spots.
pub fn wave_spawns(lake: &Lake, count: usize, wave: u32) -> Vec<Vec2> {
    (0..count)
        .map(|i| {
            let t = (i as f32 + 0.5 + wave as f32 * 0.3) / count as f32;
            Vec2::new((t.fract()) * lake.width, SWAN_RADIUS * 2.0)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lake::generate_lake;

    #[test]
    fn swan_closes_on_nearest_boat() {
        let lake = generate_lake(3);
        let mut swan = Swan::at(Vec2::new(30.0, 20.0));
        let prey = vec![
            (Uuid::from_u128(1), Vec2::new(35.0, 20.0)),
            (Uuid::from_u128(2), Vec2::new(5.0, 5.0)),
        ];
        let before = swan.pos.distance(prey[0].1);
        for tick in 0..30 {
            steer_swan(&mut swan, &prey, &lake, tick, 0, 1.0 / 30.0);
        }
        assert!(swan.pos.distance(prey[0].1) < before);
        assert_eq!(swan.target, Some(Uuid::from_u128(1)));
    }

    #[test]
    fn steering_is_deterministic() {
        let lake = generate_lake(3);
        let prey = vec![(Uuid::from_u128(1), Vec2::new(10.0, 10.0))];
        let mut a = Swan::at(Vec2::new(30.0, 20.0));
        let mut b = Swan::at(Vec2::new(30.0, 20.0));
        for tick in 0..60 {
            steer_swan(&mut a, &prey, &lake, tick, 0, 1.0 / 30.0);
            steer_swan(&mut b, &prey, &lake, tick, 0, 1.0 / 30.0);
        }
        assert_eq!(a, b);
    }

    #[test]
    fn swan_without_prey_drifts_to_center() {
        let lake = generate_lake(3);
        let mut swan = Swan::at(Vec2::new(2.0, 2.0));
        let center = Vec2::new(lake.width / 2.0, lake.height / 2.0);
        let before = swan.pos.distance(center);
        for tick in 0..90 {
            steer_swan(&mut swan, &[], &lake, tick, 0, 1.0 / 30.0);
        }
        assert!(swan.pos.distance(center) < before);
        assert!(swan.target.is_none());
    }

    #[test]
    fn wave_spawns_line_the_shore() {
        let lake = generate_lake(3);
        let spawns = wave_spawns(&lake, 4, 2);
        assert_eq!(spawns.len(), 4);
        for p in spawns {
            assert!(p.y < 2.0);
            assert!(p.x >= 0.0 && p.x <= lake.width);
        }
    }
}
