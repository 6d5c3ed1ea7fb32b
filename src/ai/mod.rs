//! AI Opponents
//!
//! A bot reads the same authoritative [`MatchState`] a client receives and
//! produces an [`InputFrame`] for its seat. Two cadences drive it:
//!
//! - **replan** (about once per second, latency set by difficulty): look at
//!   the ball, pick a lane target and which power-up slots to fire
//! - **steer** (every tick): move toward the target, holding still inside a
//!   small tolerance band
//!
//! Strategy is a [`BotBrain`] chosen when the bot is built. Battle Royale
//! bots swap from polygon tracking to the two-paddle predictor once only two
//! participants remain.

pub mod lane;
pub mod brain;

use serde::{Serialize, Deserialize};
use tracing::{debug, warn};

use crate::core::rng::DeterministicRng;
use crate::game::arena::Arena;
use crate::game::input::InputFrame;
use crate::game::state::MatchState;

pub use brain::{ClassicPredictor, PolygonTracker};
pub use lane::LaneView;

/// Lane distance (world units) inside which the paddle holds still.
pub const STEER_TOLERANCE: f64 = 6.0;

// =============================================================================
// DIFFICULTY
// =============================================================================

/// Bot difficulty. Only replan latency and aim accuracy differ.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    /// Slow to react, sloppy aim.
    Easy,
    /// Replans once per second.
    #[default]
    Medium,
    /// Replans twice per second, near-perfect aim.
    Hard,
}

impl Difficulty {
    /// Ticks between replans at 60 Hz.
    pub fn replan_ticks(self) -> u32 {
        match self {
            Difficulty::Easy => 75,
            Difficulty::Medium => 60,
            Difficulty::Hard => 30,
        }
    }

    /// Maximum aim error in lane units.
    pub fn aim_error(self) -> f64 {
        match self {
            Difficulty::Easy => 0.12,
            Difficulty::Medium => 0.05,
            Difficulty::Hard => 0.01,
        }
    }

    /// Parse a config value.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "easy" => Some(Difficulty::Easy),
            "medium" | "normal" => Some(Difficulty::Medium),
            "hard" => Some(Difficulty::Hard),
            _ => None,
        }
    }
}

// =============================================================================
// BRAIN
// =============================================================================

/// Output of a replan.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BotPlan {
    /// Target paddle center along the lane, 0..1.
    pub target: f64,
    /// Slots to press this replan.
    pub slots: [bool; 3],
}

impl Default for BotPlan {
    fn default() -> Self {
        Self { target: 0.5, slots: [false; 3] }
    }
}

/// A bot strategy.
pub trait BotBrain: Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Inspect the match and choose a target.
    fn replan(&mut self, view: &LaneView, rng: &mut DeterministicRng) -> BotPlan;

    /// Convert current position vs target into movement.
    fn steer(&self, view: &LaneView, plan: &BotPlan) -> InputFrame {
        let tolerance = STEER_TOLERANCE / view.lane_length.max(1.0);
        let delta = plan.target - view.paddle;
        let direction = if delta.abs() <= tolerance {
            0
        } else if delta > 0.0 {
            1
        } else {
            -1
        };
        InputFrame::with_direction(direction)
    }
}

/// Which brain fits the current match shape.
fn brain_for(state: &MatchState, difficulty: Difficulty) -> Box<dyn BotBrain> {
    match state.arena {
        Arena::Polygon { .. } if state.alive_count() > 2 => Box::new(PolygonTracker::new(difficulty)),
        _ => Box::new(ClassicPredictor::new(difficulty)),
    }
}

// =============================================================================
// BOT
// =============================================================================

/// One AI-controlled seat.
pub struct Bot {
    seat: usize,
    difficulty: Difficulty,
    brain: Box<dyn BotBrain>,
    plan: BotPlan,
    ticks_until_replan: u32,
    fire_pending: bool,
    power_ups: bool,
    rng: DeterministicRng,
}

impl Bot {
    /// Create a bot for a seat. The brain is chosen from the match shape.
    pub fn new(state: &MatchState, seat: usize, difficulty: Difficulty, seed: u64) -> Self {
        Self {
            seat,
            difficulty,
            brain: brain_for(state, difficulty),
            plan: BotPlan::default(),
            ticks_until_replan: 0,
            fire_pending: false,
            power_ups: state.settings.power_ups,
            rng: DeterministicRng::new(seed ^ (seat as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)),
        }
    }

    /// Seat this bot drives.
    pub fn seat(&self) -> usize {
        self.seat
    }

    /// Name of the active brain.
    pub fn brain_name(&self) -> &'static str {
        self.brain.name()
    }

    /// Swap to the two-paddle predictor once a polygon match is down to two.
    pub fn adapt(&mut self, state: &MatchState) {
        if state.arena.is_polygon() && state.alive_count() == 2 && self.brain.name() != ClassicPredictor::NAME {
            debug!(seat = self.seat, "bot down-shifting to two-paddle predictor");
            self.brain = Box::new(ClassicPredictor::new(self.difficulty));
            self.ticks_until_replan = 0;
        }
    }

    /// Produce this tick's input. Replans when the cadence elapses.
    pub fn think(&mut self, state: &MatchState) -> InputFrame {
        let Some(participant) = state.participants.get(self.seat) else {
            return InputFrame::new();
        };
        if participant.eliminated {
            return InputFrame::new();
        }
        let Some(view) = LaneView::for_seat(state, self.seat) else {
            return InputFrame::new();
        };

        if self.ticks_until_replan == 0 {
            let mut plan = self.brain.replan(&view, &mut self.rng);
            if !plan.target.is_finite() {
                warn!(seat = self.seat, brain = self.brain.name(), "non-finite bot target, recentering");
                plan.target = 0.5;
            }
            plan.target = view.clamp_paddle(plan.target);

            // Fire held items while the ball is on its way; they apply on our next hit.
            if self.power_ups && view.incoming() {
                for (slot, held) in participant.slots.iter().enumerate() {
                    plan.slots[slot] = held.is_some();
                }
            }

            self.fire_pending = plan.slots.iter().any(|s| *s);
            self.plan = plan;
            self.ticks_until_replan = self.difficulty.replan_ticks();
        }
        self.ticks_until_replan -= 1;

        let mut frame = self.brain.steer(&view, &self.plan);
        if self.fire_pending {
            // Press for one tick only so the room sees a single rising edge.
            for (slot, pressed) in self.plan.slots.iter().enumerate() {
                frame.set_slot(slot, *pressed);
            }
            self.fire_pending = false;
        }
        frame
    }
}

impl std::fmt::Debug for Bot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bot")
            .field("seat", &self.seat)
            .field("difficulty", &self.difficulty)
            .field("brain", &self.brain.name())
            .field("plan", &self.plan)
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vec2::Vec2;
    use crate::game::config::MatchSettings;
    use crate::game::state::{Entrant, PowerUpKind};

    fn bots(n: usize, settings: MatchSettings) -> MatchState {
        let roster = (0..n).map(|i| Entrant::bot(format!("bot{i}"))).collect();
        MatchState::new([2; 16], 11, roster, settings).unwrap()
    }

    #[test]
    fn test_brain_selection() {
        let s = bots(2, MatchSettings::default());
        assert_eq!(Bot::new(&s, 0, Difficulty::Hard, 1).brain_name(), ClassicPredictor::NAME);

        let s = bots(4, MatchSettings::default());
        assert_eq!(Bot::new(&s, 0, Difficulty::Hard, 1).brain_name(), PolygonTracker::NAME);
    }

    #[test]
    fn test_downshift_when_two_remain() {
        let mut s = bots(4, MatchSettings::default());
        let mut bot = Bot::new(&s, 1, Difficulty::Medium, 1);
        s.eliminate(0);
        bot.adapt(&s);
        assert_eq!(bot.brain_name(), PolygonTracker::NAME);
        s.eliminate(3);
        bot.adapt(&s);
        assert_eq!(bot.brain_name(), ClassicPredictor::NAME);
    }

    #[test]
    fn test_bot_moves_toward_incoming_ball() {
        let mut s = bots(2, MatchSettings::default());
        s.ball.position = Vec2::new(400.0, 100.0);
        s.ball.velocity = Vec2::new(-400.0, 0.0);

        let mut bot = Bot::new(&s, 0, Difficulty::Hard, 3);
        let frame = bot.think(&s);
        assert_eq!(frame.direction, -1);
    }

    #[test]
    fn test_bot_holds_inside_tolerance() {
        let mut s = bots(2, MatchSettings::default());
        s.ball.position = Vec2::new(400.0, 300.0);
        s.ball.velocity = Vec2::new(400.0, 0.0);
        let mut bot = Bot::new(&s, 0, Difficulty::Hard, 3);
        // Ball receding, paddle already centered.
        assert_eq!(bot.think(&s).direction, 0);
    }

    #[test]
    fn test_bot_fires_items_once() {
        let mut s = bots(2, MatchSettings::custom());
        s.participants[0].slots[PowerUpKind::Boost.slot()] = Some(PowerUpKind::Boost);
        s.ball.velocity = Vec2::new(-300.0, 10.0);

        let mut bot = Bot::new(&s, 0, Difficulty::Medium, 9);
        let first = bot.think(&s);
        assert!(first.slot_pressed(PowerUpKind::Boost.slot()));
        assert!(!first.slot_pressed(PowerUpKind::Curve.slot()));
        let second = bot.think(&s);
        assert!(!second.slot_pressed(PowerUpKind::Boost.slot()));
    }

    #[test]
    fn test_eliminated_bot_is_idle() {
        let mut s = bots(3, MatchSettings::default());
        let mut bot = Bot::new(&s, 2, Difficulty::Easy, 1);
        s.eliminate(2);
        assert!(bot.think(&s).is_idle());
    }

    #[test]
    fn test_difficulty_parse() {
        assert_eq!(Difficulty::parse("HARD"), Some(Difficulty::Hard));
        assert_eq!(Difficulty::parse("normal"), Some(Difficulty::Medium));
        assert_eq!(Difficulty::parse("brutal"), None);
    }
}
