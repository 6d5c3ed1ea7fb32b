//! Arena Geometry
//!
//! The playing field is either the implicit canvas rectangle (two
//! participants) or a regular polygon with one side per participant.
//! Computed once at match creation and immutable afterwards.

use std::f64::consts::{PI, TAU};
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::vec2::Vec2;
use crate::game::config::{
    CANVAS_WIDTH, CANVAS_HEIGHT, CORNER_RADIUS, POLYGON_RADIUS,
    MIN_POLYGON_SIDES, MAX_PARTICIPANTS,
};

/// One side of a polygon arena.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Side {
    /// First vertex.
    pub start: Vec2,
    /// Second vertex.
    pub end: Vec2,
    /// Midpoint.
    pub midpoint: Vec2,
    /// Direction angle of `end - start` (radians).
    pub angle: f64,
    /// Side length.
    pub length: f64,
    /// Unit vector from `start` to `end`.
    pub direction: Vec2,
    /// Unit normal pointing into the arena.
    pub inward_normal: Vec2,
}

impl Side {
    fn new(start: Vec2, end: Vec2, center: Vec2) -> Self {
        let delta = end - start;
        let length = delta.length();
        let direction = delta.normalize();
        let midpoint = start.lerp(end, 0.5);

        // Pick the perpendicular that faces the center.
        let mut inward_normal = direction.perpendicular();
        if (center - midpoint).dot(inward_normal) < 0.0 {
            inward_normal = -inward_normal;
        }

        Self {
            start,
            end,
            midpoint,
            angle: delta.angle(),
            length,
            direction,
            inward_normal,
        }
    }

    /// Point at normalized position `t` (0 = start, 1 = end).
    #[inline]
    pub fn point_at(&self, t: f64) -> Vec2 {
        self.start.lerp(self.end, t)
    }

    /// Signed distance of a point from the side line, positive inside the arena.
    #[inline]
    pub fn signed_distance(&self, point: Vec2) -> f64 {
        (point - self.start).dot(self.inward_normal)
    }

    /// Normalized position of a point projected onto the side line.
    #[inline]
    pub fn project(&self, point: Vec2) -> f64 {
        (point - self.start).dot(self.direction) / self.length
    }
}

/// Arena shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Arena {
    /// The canvas rectangle (classic 1v1).
    Rectangle {
        /// Canvas width.
        width: f64,
        /// Canvas height.
        height: f64,
    },
    /// A regular polygon, one side per participant.
    Polygon {
        /// Vertices in order.
        vertices: Vec<Vec2>,
        /// Side `i` runs from vertex `i` to vertex `i + 1`.
        sides: Vec<Side>,
        /// Polygon center.
        center: Vec2,
        /// Circumradius.
        radius: f64,
        /// Corner dead-zone radius.
        corner_radius: f64,
    },
}

/// Invalid arena construction parameters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArenaError {
    /// Participant count not supported.
    #[error("unsupported participant count {0} (expected 2..={max})", max = MAX_PARTICIPANTS)]
    UnsupportedPlayerCount(usize),
    /// A dimension is not finite or not positive.
    #[error("invalid arena dimension: {0}")]
    InvalidDimension(&'static str),
}

impl Arena {
    /// Build the arena for a participant count.
    ///
    /// Two participants play on the canvas rectangle, 3..=16 on a polygon.
    pub fn for_player_count(count: usize) -> Result<Self, ArenaError> {
        match count {
            2 => Self::rectangle(CANVAS_WIDTH, CANVAS_HEIGHT),
            n if (MIN_POLYGON_SIDES..=MAX_PARTICIPANTS).contains(&n) => Self::polygon(
                n,
                Vec2::new(CANVAS_WIDTH / 2.0, CANVAS_HEIGHT / 2.0),
                POLYGON_RADIUS,
                CORNER_RADIUS,
            ),
            n => Err(ArenaError::UnsupportedPlayerCount(n)),
        }
    }

    /// Rectangular arena.
    pub fn rectangle(width: f64, height: f64) -> Result<Self, ArenaError> {
        if !width.is_finite() || width <= 0.0 {
            return Err(ArenaError::InvalidDimension("width"));
        }
        if !height.is_finite() || height <= 0.0 {
            return Err(ArenaError::InvalidDimension("height"));
        }
        Ok(Arena::Rectangle { width, height })
    }

    /// Regular polygon arena.
    ///
    /// The first vertex is rotated so side 0 sits at the bottom of the canvas.
    pub fn polygon(
        sides: usize,
        center: Vec2,
        radius: f64,
        corner_radius: f64,
    ) -> Result<Self, ArenaError> {
        if !(MIN_POLYGON_SIDES..=MAX_PARTICIPANTS).contains(&sides) {
            return Err(ArenaError::UnsupportedPlayerCount(sides));
        }
        if !center.is_finite() {
            return Err(ArenaError::InvalidDimension("center"));
        }
        if !radius.is_finite() || radius <= 0.0 {
            return Err(ArenaError::InvalidDimension("radius"));
        }
        if !corner_radius.is_finite() || corner_radius < 0.0 {
            return Err(ArenaError::InvalidDimension("corner_radius"));
        }

        let step = TAU / sides as f64;
        let offset = PI / 2.0 + step / 2.0;
        let vertices: Vec<Vec2> = (0..sides)
            .map(|i| center + Vec2::from_angle(offset + step * i as f64).scale(radius))
            .collect();

        let sides_vec: Vec<Side> = (0..sides)
            .map(|i| Side::new(vertices[i], vertices[(i + 1) % sides], center))
            .collect();

        // Corner zones must not swallow a whole side.
        if sides_vec.iter().any(|s| s.length <= corner_radius * 2.0) {
            return Err(ArenaError::InvalidDimension("corner_radius"));
        }

        Ok(Arena::Polygon {
            vertices,
            sides: sides_vec,
            center,
            radius,
            corner_radius,
        })
    }

    /// Whether this is a polygon arena.
    pub fn is_polygon(&self) -> bool {
        matches!(self, Arena::Polygon { .. })
    }

    /// Arena center, where the ball is served from.
    pub fn center(&self) -> Vec2 {
        match self {
            Arena::Rectangle { width, height } => Vec2::new(width / 2.0, height / 2.0),
            Arena::Polygon { center, .. } => *center,
        }
    }

    /// Polygon side by index.
    pub fn side(&self, index: usize) -> Option<&Side> {
        match self {
            Arena::Rectangle { .. } => None,
            Arena::Polygon { sides, .. } => sides.get(index),
        }
    }

    /// Polygon sides (empty for rectangles).
    pub fn sides(&self) -> &[Side] {
        match self {
            Arena::Rectangle { .. } => &[],
            Arena::Polygon { sides, .. } => sides,
        }
    }

    /// Whether a point lies inside the arena (with a margin).
    pub fn contains(&self, point: Vec2, margin: f64) -> bool {
        match self {
            Arena::Rectangle { width, height } => {
                point.x >= -margin
                    && point.x <= width + margin
                    && point.y >= -margin
                    && point.y <= height + margin
            }
            Arena::Polygon { sides, .. } => sides
                .iter()
                .all(|side| side.signed_distance(point) >= -margin),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_players_get_rectangle() {
        let arena = Arena::for_player_count(2).unwrap();
        assert!(!arena.is_polygon());
        assert_eq!(arena.center(), Vec2::new(CANVAS_WIDTH / 2.0, CANVAS_HEIGHT / 2.0));
    }

    #[test]
    fn test_polygon_sides_are_regular() {
        for n in 3..=16 {
            let arena = Arena::for_player_count(n).unwrap();
            let sides = arena.sides();
            assert_eq!(sides.len(), n);

            let first = sides[0].length;
            for side in sides {
                assert!((side.length - first).abs() < 1e-6);
                // Inward normal points at the center.
                assert!(side.signed_distance(arena.center()) > 0.0);
                assert!((side.inward_normal.length() - 1.0).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_side_zero_is_bottom() {
        let arena = Arena::for_player_count(4).unwrap();
        let side = arena.side(0).unwrap();
        assert!(side.midpoint.y > arena.center().y);
    }

    #[test]
    fn test_unsupported_counts() {
        assert_eq!(Arena::for_player_count(1), Err(ArenaError::UnsupportedPlayerCount(1)));
        assert_eq!(Arena::for_player_count(17), Err(ArenaError::UnsupportedPlayerCount(17)));
    }

    #[test]
    fn test_non_finite_geometry_rejected() {
        assert!(Arena::rectangle(f64::NAN, 600.0).is_err());
        assert!(Arena::rectangle(800.0, f64::INFINITY).is_err());
        assert!(Arena::polygon(5, Vec2::new(f64::NAN, 0.0), 300.0, 18.0).is_err());
        assert!(Arena::polygon(5, Vec2::ZERO, -1.0, 18.0).is_err());
    }

    #[test]
    fn test_contains() {
        let arena = Arena::for_player_count(6).unwrap();
        assert!(arena.contains(arena.center(), 0.0));
        assert!(!arena.contains(Vec2::new(-500.0, -500.0), 0.0));
    }
}
