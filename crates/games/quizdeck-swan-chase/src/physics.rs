//! Boat kinematics and collision resolution on the lake.

use serde::{Deserialize, Serialize};

use crate::lake::{Lake, Obstacle};

/// Boat hull radius in world units.
pub const BOAT_RADIUS: f32 = 0.6;
/// Swan body radius.
pub const SWAN_RADIUS: f32 = 0.5;
/// A swan tags a boat when their centers are within this distance.
pub const TAG_RADIUS: f32 = 1.2;

pub const BOAT_ACCEL: f32 = 14.0;
pub const BOAT_MAX_SPEED: f32 = 7.0;
pub const TURN_RATE: f32 = 3.2;
/// Velocity damping per second.
pub const FRICTION: f32 = 1.6;

pub const SPRINT_MULTIPLIER: f32 = 1.6;
pub const SPRINT_DURATION: f32 = 1.5;
pub const SPRINT_COOLDOWN: f32 = 6.0;
pub const DASH_IMPULSE: f32 = 9.0;
pub const DASH_COOLDOWN: f32 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn normalized(self) -> Vec2 {
        let len = self.length();
        if len > f32::EPSILON {
            Vec2::new(self.x / len, self.y / len)
        } else {
            Vec2::default()
        }
    }

    pub fn scale(self, s: f32) -> Vec2 {
        Vec2::new(self.x * s, self.y * s)
    }

    pub fn add(self, other: Vec2) -> Vec2 {
        Vec2::new(self.x + other.x, self.y + other.y)
    }

    pub fn sub(self, other: Vec2) -> Vec2 {
        Vec2::new(self.x - other.x, self.y - other.y)
    }

    pub fn dot(self, other: Vec2) -> f32 {
        self.x * other.x + self.y * other.y
    }

    pub fn distance(self, other: Vec2) -> f32 {
        self.sub(other).length()
    }
}

/// Control inputs already clamped to their documented ranges.
#[derive(Debug, Clone, Copy, Default)]
pub struct Controls {
    pub thrust: f32,
    pub turn: f32,
}

/// One integration step for a boat hull: turn, thrust along the heading,
/// friction, speed clamp, position advance.
pub fn integrate_boat(
    pos: &mut Vec2,
    vel: &mut Vec2,
    heading: &mut f32,
    controls: Controls,
    speed_multiplier: f32,
    dt: f32,
) {
    *heading += controls.turn.clamp(-1.0, 1.0) * TURN_RATE * dt;

    let thrust = controls.thrust.clamp(0.0, 1.0) * BOAT_ACCEL * speed_multiplier;
    vel.x += heading.cos() * thrust * dt;
    vel.y += heading.sin() * thrust * dt;

    let damping = (1.0 - FRICTION * dt).max(0.0);
    *vel = vel.scale(damping);

    let max_speed = BOAT_MAX_SPEED * speed_multiplier;
    let speed = vel.length();
    if speed > max_speed {
        *vel = vel.scale(max_speed / speed);
    }

    *pos = pos.add(vel.scale(dt));
}

/// Minimum translation that pushes a circle out of a convex polygon, or
/// `None` when they do not overlap. Tests the closest point on each edge and
/// each vertex against the circle.
pub fn circle_vs_polygon(center: Vec2, radius: f32, polygon: &[Vec2]) -> Option<Vec2> {
    if polygon.len() < 3 {
        return None;
    }

    let mut closest = polygon[0];
    let mut closest_dist = f32::MAX;

    for i in 0..polygon.len() {
        let a = polygon[i];
        let b = polygon[(i + 1) % polygon.len()];
        let point = closest_point_on_segment(center, a, b);
        let dist = center.distance(point);
        if dist < closest_dist {
            closest_dist = dist;
            closest = point;
        }
    }

    if point_in_convex_polygon(center, polygon) {
        // Center inside: push out through the nearest edge point.
        let normal = closest.sub(center).normalized();
        let depth = closest_dist + radius;
        return Some(normal.scale(depth));
    }

    if closest_dist < radius {
        let normal = center.sub(closest).normalized();
        return Some(normal.scale(radius - closest_dist));
    }

    None
}

fn closest_point_on_segment(p: Vec2, a: Vec2, b: Vec2) -> Vec2 {
    let ab = b.sub(a);
    let len_sq = ab.dot(ab);
    if len_sq <= f32::EPSILON {
        return a;
    }
    let t = (p.sub(a).dot(ab) / len_sq).clamp(0.0, 1.0);
    a.add(ab.scale(t))
}

fn point_in_convex_polygon(p: Vec2, polygon: &[Vec2]) -> bool {
    let mut sign = 0.0f32;
    for i in 0..polygon.len() {
        let a = polygon[i];
        let b = polygon[(i + 1) % polygon.len()];
        let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
        if cross.abs() < f32::EPSILON {
            continue;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    true
}

/// Clamp a hull inside the lake bounds and push it out of every obstacle it
/// overlaps. Returns the corrected position.
pub fn resolve_collisions(mut pos: Vec2, radius: f32, lake: &Lake) -> Vec2 {
    pos.x = pos.x.clamp(radius, lake.width - radius);
    pos.y = pos.y.clamp(radius, lake.height - radius);

    for obstacle in &lake.obstacles {
        if let Some(push) = circle_vs_polygon(pos, radius, &obstacle.vertices) {
            pos = pos.add(push);
        }
    }
    pos
}

/// Whether two circles overlap within `reach`.
pub fn within_tag_range(a: Vec2, b: Vec2, reach: f32) -> bool {
    a.distance(b) <= reach
}

#[allow(dead_code)]
fn obstacle_contains(obstacle: &Obstacle, p: Vec2) -> bool {
    point_in_convex_polygon(p, &obstacle.vertices)
}
