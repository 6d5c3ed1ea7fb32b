//! Bot Brains
//!
//! Concrete strategies behind [`BotBrain`]. Both share the lane intercept;
//! they differ in how they fold bounces and where they rest.

use crate::ai::lane::{fold_into, LaneView};
use crate::ai::{BotBrain, BotPlan, Difficulty};
use crate::core::rng::DeterministicRng;

/// Apply difficulty-dependent aim error to a target.
fn jitter(target: f64, difficulty: Difficulty, rng: &mut DeterministicRng) -> f64 {
    let error = difficulty.aim_error();
    target + rng.next_range(-error, error)
}

/// Two-paddle predictor: fold the intercept off the lane ends, return to
/// center when the ball is heading away.
///
/// Drives rectangular 1v1 bots, and polygon bots once only two participants
/// remain (every other side is then a wall, so the match plays like a 1v1 on
/// the bot's own segment).
#[derive(Debug, Clone)]
pub struct ClassicPredictor {
    difficulty: Difficulty,
}

impl ClassicPredictor {
    /// Brain name.
    pub const NAME: &'static str = "classic";

    /// New predictor.
    pub fn new(difficulty: Difficulty) -> Self {
        Self { difficulty }
    }
}

impl BotBrain for ClassicPredictor {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn replan(&mut self, view: &LaneView, rng: &mut DeterministicRng) -> BotPlan {
        let target = match view.raw_intercept() {
            Some(raw) => jitter(fold_into(raw, view.bounce_min, view.bounce_max), self.difficulty, rng),
            None => 0.5,
        };
        BotPlan { target, ..BotPlan::default() }
    }
}

/// Battle Royale with three or more alive: intercept incoming balls, and
/// otherwise drift toward the ball's lateral offset so the paddle is already
/// close when the ball turns toward this side.
#[derive(Debug, Clone)]
pub struct PolygonTracker {
    difficulty: Difficulty,
}

impl PolygonTracker {
    /// Brain name.
    pub const NAME: &'static str = "polygon";

    /// New tracker.
    pub fn new(difficulty: Difficulty) -> Self {
        Self { difficulty }
    }
}

impl BotBrain for PolygonTracker {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn replan(&mut self, view: &LaneView, rng: &mut DeterministicRng) -> BotPlan {
        let target = match view.raw_intercept() {
            // Neighbouring sides deflect the ball, so no fold here.
            Some(raw) => jitter(raw, self.difficulty, rng),
            None => 0.5 + (view.ball_along.clamp(0.0, 1.0) - 0.5) * 0.5,
        };
        BotPlan { target, ..BotPlan::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(ball_along: f64, depth: f64, along_speed: f64, depth_speed: f64) -> LaneView {
        LaneView {
            paddle: 0.5,
            paddle_min: 0.1,
            paddle_max: 0.9,
            ball_along,
            ball_depth: depth,
            along_speed,
            depth_speed,
            lane_length: 600.0,
            bounce_min: 0.0,
            bounce_max: 1.0,
            ball_radius: 0.0,
        }
    }

    #[test]
    fn test_classic_folds_multiple_bounces() {
        let mut brain = ClassicPredictor::new(Difficulty::Hard);
        let mut rng = DeterministicRng::new(1);
        // 1 second to the face, drifting 2.3 lanes: folds to 0.8
        let plan = brain.replan(&view(0.5, 400.0, 2.3, -400.0), &mut rng);
        assert!((plan.target - 0.8).abs() <= Difficulty::Hard.aim_error() + 1e-9);
    }

    #[test]
    fn test_classic_recenters_when_ball_leaves() {
        let mut brain = ClassicPredictor::new(Difficulty::Easy);
        let mut rng = DeterministicRng::new(1);
        let plan = brain.replan(&view(0.1, 100.0, 0.3, 200.0), &mut rng);
        assert_eq!(plan.target, 0.5);
    }

    #[test]
    fn test_tracker_drifts_toward_ball() {
        let mut brain = PolygonTracker::new(Difficulty::Medium);
        let mut rng = DeterministicRng::new(1);
        let plan = brain.replan(&view(0.9, 100.0, 0.0, 50.0), &mut rng);
        assert!(plan.target > 0.5);
        let plan = brain.replan(&view(0.1, 100.0, 0.0, 50.0), &mut rng);
        assert!(plan.target < 0.5);
    }

    #[test]
    fn test_classic_on_polygon_lane() {
        let mut brain = ClassicPredictor::new(Difficulty::Hard);
        let mut rng = DeterministicRng::new(4);
        let plan = brain.replan(&view(0.3, 200.0, 0.1, -200.0), &mut rng);
        assert!((plan.target - 0.4).abs() <= Difficulty::Hard.aim_error() + 1e-9);
    }
}
