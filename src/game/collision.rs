//! Collision Detection
//!
//! Geometry tests and bounce responses for balls against paddles, walls,
//! polygon sides and corner dead-zones. Stateless; `tick` decides what a
//! contact means for the match.

use crate::core::vec2::Vec2;
use crate::game::config::MAX_DEFLECTION;
use crate::game::state::{Ball, Paddle, PaddleMode};

/// Check if two circles overlap.
#[inline]
pub fn circles_overlap(pos_a: Vec2, radius_a: f64, pos_b: Vec2, radius_b: f64) -> bool {
    let combined = radius_a + radius_b;
    (pos_a - pos_b).length_squared() <= combined * combined
}

// =============================================================================
// BOXES
// =============================================================================

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    /// Minimum corner
    pub min: Vec2,
    /// Maximum corner
    pub max: Vec2,
}

impl Aabb {
    /// Smallest box containing all points.
    pub fn from_points(points: &[Vec2]) -> Self {
        let mut min = Vec2::new(f64::INFINITY, f64::INFINITY);
        let mut max = Vec2::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
        for p in points {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }
        Self { min, max }
    }

    /// Circle/box overlap via the closest point on the box.
    pub fn overlaps_circle(&self, center: Vec2, radius: f64) -> bool {
        let closest = Vec2::new(
            center.x.clamp(self.min.x, self.max.x),
            center.y.clamp(self.min.y, self.max.y),
        );
        (center - closest).length_squared() <= radius * radius
    }
}

/// Circle overlap against a rotated rectangle given by its four corners in order.
pub fn circle_overlaps_rotated_rect(center: Vec2, radius: f64, corners: &[Vec2; 4]) -> bool {
    let edge_u = corners[1] - corners[0];
    let edge_v = corners[3] - corners[0];
    let len_u = edge_u.length();
    let len_v = edge_v.length();
    if len_u == 0.0 || len_v == 0.0 {
        return false;
    }

    let axis_u = edge_u.scale(1.0 / len_u);
    let axis_v = edge_v.scale(1.0 / len_v);
    let rel = center - corners[0];
    let u = rel.dot(axis_u).clamp(0.0, len_u);
    let v = rel.dot(axis_v).clamp(0.0, len_v);
    let closest = corners[0] + axis_u.scale(u) + axis_v.scale(v);

    (center - closest).length_squared() <= radius * radius
}

// =============================================================================
// PADDLES
// =============================================================================

/// Where a ball met a paddle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PaddleContact {
    /// Ball center at the moment of contact.
    pub position: Vec2,
    /// Hit offset along the paddle, -1..1, measured along `normal.perpendicular()`.
    pub offset: f64,
}

/// Test a ball that moved from `previous` to `ball.position` against a paddle.
///
/// The face plane is swept first so fast balls cannot tunnel through; a
/// resting overlap (box test in rectangular mode, rotated-rectangle test in
/// polygon mode) catches balls clipping the paddle from the side. Balls
/// moving away from the face never collide.
pub fn paddle_contact(previous: Vec2, ball: &Ball, paddle: &Paddle) -> Option<PaddleContact> {
    let normal = paddle.normal;
    if ball.velocity.dot(normal) >= 0.0 {
        return None;
    }

    let radius = ball.radius;
    let half = paddle.length / 2.0;
    let face = paddle.face_center();
    let tangent = normal.perpendicular();
    let current = ball.position;

    let depth_prev = (previous - face).dot(normal);
    let depth_now = (current - face).dot(normal);

    // Swept contact with the face plane.
    if depth_prev >= radius && depth_now < radius {
        let t = (depth_prev - radius) / (depth_prev - depth_now);
        let at = previous.lerp(current, t);
        let along = (at - face).dot(tangent);
        if along.abs() <= half + radius {
            return Some(PaddleContact {
                position: at,
                offset: (along / half).clamp(-1.0, 1.0),
            });
        }
    }

    // Resting overlap; ignore balls already behind the paddle body.
    if depth_now < -paddle.width / 2.0 {
        return None;
    }
    let overlapping = match paddle.mode {
        PaddleMode::Rectangular { .. } => {
            Aabb::from_points(&paddle.corners()).overlaps_circle(current, radius)
        }
        PaddleMode::PolygonSide { .. } => {
            circle_overlaps_rotated_rect(current, radius, &paddle.corners())
        }
    };
    if !overlapping {
        return None;
    }

    let along = (current - face).dot(tangent);
    Some(PaddleContact {
        position: current + normal.scale(radius - depth_now),
        offset: (along / half).clamp(-1.0, 1.0),
    })
}

/// Velocity after a paddle bounce.
///
/// The normal component is negated and scaled by `increment`, the
/// tangential component is recomputed from the hit offset, and the result is
/// rescaled to exactly `|velocity| * increment` whatever the offset.
pub fn paddle_bounce(velocity: Vec2, normal: Vec2, offset: f64, increment: f64) -> Vec2 {
    let speed = velocity.length();
    let tangent = normal.perpendicular();

    let mut normal_part = velocity.dot(normal).abs() * increment;
    if normal_part <= f64::EPSILON {
        normal_part = speed * increment;
    }
    let tangential = offset.clamp(-1.0, 1.0) * MAX_DEFLECTION * normal_part;

    (normal.scale(normal_part) + tangent.scale(tangential)).with_length(speed * increment)
}

// =============================================================================
// WALLS, SIDES AND CORNERS
// =============================================================================

/// Reflect across a side if moving into it; otherwise unchanged.
#[inline]
pub fn reflect_off_side(velocity: Vec2, inward_normal: Vec2) -> Vec2 {
    if velocity.dot(inward_normal) < 0.0 {
        velocity.reflect(inward_normal)
    } else {
        velocity
    }
}

/// Top/bottom wall bounce for rectangular arenas.
///
/// Returns the corrected position and velocity if a wall was hit.
pub fn bounce_rect_walls(position: Vec2, velocity: Vec2, radius: f64, height: f64) -> Option<(Vec2, Vec2)> {
    if position.y - radius < 0.0 && velocity.y < 0.0 {
        return Some((Vec2::new(position.x, radius), Vec2::new(velocity.x, -velocity.y)));
    }
    if position.y + radius > height && velocity.y > 0.0 {
        return Some((Vec2::new(position.x, height - radius), Vec2::new(velocity.x, -velocity.y)));
    }
    None
}

/// Point bounce off a polygon vertex's dead-zone.
///
/// The vertex acts as a round obstacle of `zone_radius`; the ball reflects
/// about the line from the vertex to its center.
pub fn corner_bounce(
    position: Vec2,
    velocity: Vec2,
    vertex: Vec2,
    zone_radius: f64,
) -> Option<(Vec2, Vec2)> {
    let offset = position - vertex;
    let distance = offset.length();
    if distance >= zone_radius {
        return None;
    }

    let normal = if distance > 0.0 {
        offset.scale(1.0 / distance)
    } else {
        -velocity.normalize()
    };
    if velocity.dot(normal) >= 0.0 {
        return None;
    }

    Some((vertex + normal.scale(zone_radius), velocity.reflect(normal)))
}

// =============================================================================
// TESTS
// =============================================================================
