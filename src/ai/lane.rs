//! Lane View
//!
//! The AI never reasons in world coordinates. Each bot sees its own lane:
//! a normalized 0..1 axis along its paddle's travel (canvas height in
//! rectangular mode, its side segment in polygon mode) plus a depth axis
//! pointing from its paddle face into the arena.

use crate::game::arena::Arena;
use crate::game::state::{MatchState, PaddleMode};

/// Ball and paddle as seen from one seat.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LaneView {
    /// Paddle center along the lane, 0..1.
    pub paddle: f64,
    /// Lowest reachable paddle center.
    pub paddle_min: f64,
    /// Highest reachable paddle center.
    pub paddle_max: f64,
    /// Ball center along the lane, 0..1.
    pub ball_along: f64,
    /// Ball distance in front of the paddle face (world units).
    pub ball_depth: f64,
    /// Ball speed along the lane (lane units per second).
    pub along_speed: f64,
    /// Ball speed along the depth axis; negative means incoming.
    pub depth_speed: f64,
    /// Lane length in world units.
    pub lane_length: f64,
    /// Lane bounds the ball bounces between, used for fold prediction.
    pub bounce_min: f64,
    /// See `bounce_min`.
    pub bounce_max: f64,
    /// Ball radius.
    pub ball_radius: f64,
}

impl LaneView {
    /// Build the view for a seat, `None` if the seat does not exist.
    pub fn for_seat(state: &MatchState, seat: usize) -> Option<Self> {
        let participant = state.participants.get(seat)?;
        let paddle = &participant.paddle;
        let ball = &state.ball;

        let face = paddle.face_center();
        let ball_depth = (ball.position - face).dot(paddle.normal);
        let depth_speed = ball.velocity.dot(paddle.normal);

        match (&state.arena, paddle.mode) {
            (Arena::Rectangle { height, .. }, PaddleMode::Rectangular { .. }) => {
                let half = paddle.length / 2.0 / height;
                let r = ball.radius / height;
                Some(Self {
                    paddle: paddle.position.y / height,
                    paddle_min: half,
                    paddle_max: 1.0 - half,
                    ball_along: ball.position.y / height,
                    ball_depth,
                    along_speed: ball.velocity.y / height,
                    depth_speed,
                    lane_length: *height,
                    bounce_min: r,
                    bounce_max: 1.0 - r,
                    ball_radius: ball.radius,
                })
            }
            (Arena::Polygon { sides, .. }, PaddleMode::PolygonSide { side, t }) => {
                let geometry = sides.get(side)?;
                let half = paddle.length / 2.0 / geometry.length;
                Some(Self {
                    paddle: t,
                    paddle_min: half,
                    paddle_max: 1.0 - half,
                    ball_along: geometry.project(ball.position),
                    ball_depth,
                    along_speed: ball.velocity.dot(geometry.direction) / geometry.length,
                    depth_speed,
                    lane_length: geometry.length,
                    bounce_min: 0.0,
                    bounce_max: 1.0,
                    ball_radius: ball.radius,
                })
            }
            _ => None,
        }
    }

    /// Ball is heading at this lane.
    #[inline]
    pub fn incoming(&self) -> bool {
        self.depth_speed < 0.0
    }

    /// Seconds until the ball reaches the paddle face, if incoming.
    pub fn time_to_face(&self) -> Option<f64> {
        if !self.incoming() {
            return None;
        }
        Some(((self.ball_depth - self.ball_radius).max(0.0)) / -self.depth_speed)
    }

    /// Straight-line lane position of the ball when it reaches the face.
    pub fn raw_intercept(&self) -> Option<f64> {
        self.time_to_face().map(|t| self.ball_along + self.along_speed * t)
    }

    /// Clamp a lane target to where the paddle center can go.
    #[inline]
    pub fn clamp_paddle(&self, target: f64) -> f64 {
        target.clamp(self.paddle_min, self.paddle_max)
    }
}

/// Fold a position into `[min, max]` as if it bounced between the bounds.
///
/// Works for any number of bounces without stepping: the motion is periodic
/// with period `2 * (max - min)`.
pub fn fold_into(value: f64, min: f64, max: f64) -> f64 {
    let span = max - min;
    if span <= 0.0 || !value.is_finite() {
        return min;
    }
    let phase = (value - min).rem_euclid(2.0 * span);
    if phase <= span {
        min + phase
    } else {
        max - (phase - span)
    }
}
