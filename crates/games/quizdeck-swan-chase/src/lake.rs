//! Deterministic lake generation. Everything here derives from the minigame
//! seed so any replay of the same session item lays out identically.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::physics::Vec2;

pub const LAKE_WIDTH: f32 = 60.0;
pub const LAKE_HEIGHT: f32 = 40.0;
const OBSTACLE_COUNT: usize = 5;
const SAFE_ZONE_COUNT: usize = 2;
pub const SAFE_ZONE_RADIUS: f32 = 3.0;
/// Obstacles and safe zones keep this clearance from the shore and from each
/// other's centers.
const PLACEMENT_MARGIN: f32 = 6.0;

/// A static convex obstacle (rock or reed bank) boats collide with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    pub vertices: Vec<Vec2>,
}

/// Circular area where boats cannot be tagged, subject to the dwell budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafeZone {
    pub center: Vec2,
    pub radius: f32,
}

impl SafeZone {
    pub fn contains(&self, point: Vec2) -> bool {
        self.center.distance(point) <= self.radius
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lake {
    pub width: f32,
    pub height: f32,
    pub obstacles: Vec<Obstacle>,
    pub safe_zones: Vec<SafeZone>,
    pub spawn_points: Vec<Vec2>,
}

/// Generate the lake for a given seed: perimeter spawn points, randomly
/// placed convex obstacles, and safe zones in opposite halves.
pub fn generate_lake(seed: u64) -> Lake {
    let mut rng = StdRng::seed_from_u64(seed);

    let mut obstacles = Vec::with_capacity(OBSTACLE_COUNT);
    let mut centers: Vec<Vec2> = Vec::new();
    let mut attempts = 0;
    while obstacles.len() < OBSTACLE_COUNT && attempts < 200 {
        attempts += 1;
        let center = Vec2::new(
            rng.random_range(PLACEMENT_MARGIN..LAKE_WIDTH - PLACEMENT_MARGIN),
            rng.random_range(PLACEMENT_MARGIN..LAKE_HEIGHT - PLACEMENT_MARGIN),
        );
        if centers.iter().any(|c| c.distance(center) < PLACEMENT_MARGIN) {
            continue;
        }
        centers.push(center);
        obstacles.push(convex_blob(&mut rng, center));
    }

    let mut safe_zones = Vec::with_capacity(SAFE_ZONE_COUNT);
    while safe_zones.len() < SAFE_ZONE_COUNT {
        let half = safe_zones.len() as f32;
        // One zone per horizontal half so cornered boats always have an out.
        let center = Vec2::new(
            rng.random_range(
                half * LAKE_WIDTH / 2.0 + PLACEMENT_MARGIN
                    ..(half + 1.0) * LAKE_WIDTH / 2.0 - PLACEMENT_MARGIN,
            ),
            rng.random_range(PLACEMENT_MARGIN..LAKE_HEIGHT - PLACEMENT_MARGIN),
        );
        if centers.iter().any(|c| c.distance(center) < PLACEMENT_MARGIN) {
            continue;
        }
        centers.push(center);
        safe_zones.push(SafeZone {
            center,
            radius: SAFE_ZONE_RADIUS,
        });
    }

    let inset = 2.5;
    let spawn_points = vec![
        Vec2::new(inset, inset),
        Vec2::new(LAKE_WIDTH - inset, inset),
        Vec2::new(LAKE_WIDTH - inset, LAKE_HEIGHT - inset),
        Vec2::new(inset, LAKE_HEIGHT - inset),
        Vec2::new(LAKE_WIDTH / 2.0, inset),
        Vec2::new(LAKE_WIDTH / 2.0, LAKE_HEIGHT - inset),
        Vec2::new(inset, LAKE_HEIGHT / 2.0),
        Vec2::new(LAKE_WIDTH - inset, LAKE_HEIGHT / 2.0),
    ];

    Lake {
        width: LAKE_WIDTH,
        height: LAKE_HEIGHT,
        obstacles,
        safe_zones,
        spawn_points,
    }
}

/// A small convex polygon around a center: 4–6 vertices at jittered radii,
/// generated in angle order so convexity holds for the collision tests.
fn convex_blob(rng: &mut StdRng, center: Vec2) -> Obstacle {
    let vertex_count = rng.random_range(4..=6);
    let base_radius: f32 = rng.random_range(1.5..3.0);
    let vertices = (0..vertex_count)
        .map(|i| {
            let angle = i as f32 / vertex_count as f32 * std::f32::consts::TAU;
            let radius = base_radius * rng.random_range(0.8..1.2);
            Vec2::new(
                center.x + angle.cos() * radius,
                center.y + angle.sin() * radius,
            )
        })
        .collect();
    Obstacle { vertices }
}
