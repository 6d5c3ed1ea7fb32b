//! Game State Definitions
//!
//! All state types for one match: participants and their paddles, the ball,
//! clone swarms, fruits and power-up inventories. Seats are stored in a `Vec`
//! indexed by side, so iteration order is fixed for a given roster.

use std::collections::VecDeque;
use serde::{Serialize, Deserialize};

use crate::core::rng::DeterministicRng;
use crate::core::vec2::Vec2;
use crate::game::arena::{Arena, ArenaError, Side};
use crate::game::config::{
    MatchSettings, BALL_INITIAL_SPEED, BALL_RADIUS, PADDLE_HEIGHT, PADDLE_OFFSET,
    PADDLE_SPEED, PADDLE_WIDTH, POLYGON_PADDLE_FRACTION, SERVE_SPREAD, SPEED_INCREMENT,
};
use crate::game::events::GameEvent;

// =============================================================================
// PLAYER ID
// =============================================================================

/// Unique player identifier (UUID as bytes).
///
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[derive(Default)]
pub struct PlayerId(pub [u8; 16]);

impl PlayerId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Fresh random id (bots, guests).
    pub fn random() -> Self {
        Self(*uuid::Uuid::new_v4().as_bytes())
    }

    /// Create from UUID string.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s)
            .ok()
            .map(|u| Self(*u.as_bytes()))
    }

    /// Convert to UUID string.
    pub fn to_uuid_string(&self) -> String {
        uuid::Uuid::from_bytes(self.0).to_string()
    }

    /// Short hex prefix for logs.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

// =============================================================================
// POWER-UPS
// =============================================================================

/// Power-up kinds. Inventory slot `k` only ever holds kind `k`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PowerUpKind {
    /// Curl the ball sideways.
    Curve = 0,
    /// Multiply ball speed.
    Boost = 1,
    /// Spawn a fan of clone balls.
    Swarm = 2,
}

impl PowerUpKind {
    /// All kinds in slot order.
    pub const ALL: [PowerUpKind; 3] = [PowerUpKind::Curve, PowerUpKind::Boost, PowerUpKind::Swarm];

    /// Inventory slot of this kind.
    #[inline]
    pub fn slot(self) -> usize {
        self as usize
    }

    /// Kind stored in a slot.
    pub fn from_slot(slot: usize) -> Option<Self> {
        Self::ALL.get(slot).copied()
    }
}

/// A power-up accumulating hits toward being awarded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charging {
    /// Kind being charged.
    pub kind: PowerUpKind,
    /// Hits accumulated so far.
    pub charge: u32,
}

// =============================================================================
// PADDLE
// =============================================================================

/// How a paddle moves.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum PaddleMode {
    /// Fixed X, moves along Y within the canvas.
    Rectangular {
        /// Which canvas edge the paddle guards.
        left: bool,
    },
    /// Bound to a polygon side at normalized position `t`.
    PolygonSide {
        /// Side index.
        side: usize,
        /// Position along the side, 0..1.
        t: f64,
    },
}

/// A participant's paddle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Paddle {
    /// Center of the paddle body.
    pub position: Vec2,
    /// Signed speed along the paddle axis this tick.
    pub velocity: f64,
    /// Rotation of the long axis (radians).
    pub rotation: f64,
    /// Long dimension.
    pub length: f64,
    /// Short dimension.
    pub width: f64,
    /// Travel speed (units per second).
    pub speed: f64,
    /// Movement mode.
    pub mode: PaddleMode,
    /// Unit vector along the paddle.
    pub along: Vec2,
    /// Unit normal of the hitting face, pointing into the arena.
    pub normal: Vec2,
}

impl Paddle {
    /// Paddle on the left or right canvas edge, vertically centered.
    pub fn rectangular(left: bool, canvas_width: f64, canvas_height: f64) -> Self {
        let x = if left {
            PADDLE_OFFSET + PADDLE_WIDTH / 2.0
        } else {
            canvas_width - PADDLE_OFFSET - PADDLE_WIDTH / 2.0
        };
        Self {
            position: Vec2::new(x, canvas_height / 2.0),
            velocity: 0.0,
            rotation: std::f64::consts::FRAC_PI_2,
            length: PADDLE_HEIGHT,
            width: PADDLE_WIDTH,
            speed: PADDLE_SPEED,
            mode: PaddleMode::Rectangular { left },
            along: Vec2::DOWN,
            normal: if left { Vec2::RIGHT } else { Vec2::LEFT },
        }
    }

    /// Paddle centered on a polygon side.
    pub fn on_side(index: usize, side: &Side) -> Self {
        let mut paddle = Self {
            position: side.midpoint,
            velocity: 0.0,
            rotation: side.angle,
            length: side.length * POLYGON_PADDLE_FRACTION,
            width: PADDLE_WIDTH,
            speed: PADDLE_SPEED,
            mode: PaddleMode::PolygonSide { side: index, t: 0.5 },
            along: side.direction,
            normal: side.inward_normal,
        };
        paddle.sync_to_side(side);
        paddle
    }

    /// Recompute position and rotation from `t`.
    pub fn sync_to_side(&mut self, side: &Side) {
        if let PaddleMode::PolygonSide { t, .. } = self.mode {
            self.position = side.point_at(t) + side.inward_normal.scale(self.width / 2.0);
            self.rotation = side.angle;
            self.along = side.direction;
            self.normal = side.inward_normal;
        }
    }

    /// Center of the hitting face.
    #[inline]
    pub fn face_center(&self) -> Vec2 {
        self.position + self.normal.scale(self.width / 2.0)
    }

    /// The four corners of the paddle body, in order around the rectangle.
    pub fn corners(&self) -> [Vec2; 4] {
        let half_along = self.along.scale(self.length / 2.0);
        let half_normal = self.normal.scale(self.width / 2.0);
        [
            self.position - half_along - half_normal,
            self.position + half_along - half_normal,
            self.position + half_along + half_normal,
            self.position - half_along + half_normal,
        ]
    }

    /// Position along the movement axis, 0..1 (used by the AI).
    pub fn lane_position(&self, arena: &Arena) -> f64 {
        match (self.mode, arena) {
            (PaddleMode::PolygonSide { t, .. }, _) => t,
            (PaddleMode::Rectangular { .. }, Arena::Rectangle { height, .. }) => self.position.y / height,
            (PaddleMode::Rectangular { .. }, Arena::Polygon { .. }) => 0.5,
        }
    }

    /// Move by `direction` (-1, 0, 1) for `dt` seconds, clamped to the lane.
    pub fn step(&mut self, direction: i8, dt: f64, arena: &Arena) {
        let direction = direction.signum() as f64;
        self.velocity = direction * self.speed;
        let distance = self.velocity * dt;

        match (&mut self.mode, arena) {
            (PaddleMode::Rectangular { .. }, Arena::Rectangle { height, .. }) => {
                let half = self.length / 2.0;
                self.position.y = (self.position.y + distance).clamp(half, height - half);
            }
            (PaddleMode::PolygonSide { side, t }, Arena::Polygon { sides, .. }) => {
                let Some(geometry) = sides.get(*side) else { return };
                let margin = (self.length / 2.0) / geometry.length;
                *t = (*t + distance / geometry.length).clamp(margin, 1.0 - margin);
                let geometry = *geometry;
                self.sync_to_side(&geometry);
            }
            _ => {}
        }
    }
}

// =============================================================================
// BALLS AND FRUITS
// =============================================================================

/// The primary ball.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ball {
    /// Center position.
    pub position: Vec2,
    /// Velocity (units per second).
    pub velocity: Vec2,
    /// Visual spin angle.
    pub rotation: f64,
    /// Radius.
    pub radius: f64,
    /// Speed multiplier applied on every paddle bounce.
    pub speed_increment: f64,
    /// Signed lateral acceleration while curving.
    pub curve: Option<f64>,
    /// Speed before a boost was applied.
    pub boost: Option<f64>,
}

impl Ball {
    /// Ball at rest at `position`.
    pub fn new(position: Vec2) -> Self {
        Self {
            position,
            velocity: Vec2::ZERO,
            rotation: 0.0,
            radius: BALL_RADIUS,
            speed_increment: SPEED_INCREMENT,
            curve: None,
            boost: None,
        }
    }

    /// Current speed.
    #[inline]
    pub fn speed(&self) -> f64 {
        self.velocity.length()
    }

    /// Drop curve and boost, restoring the pre-boost speed.
    pub fn clear_modifiers(&mut self) {
        if let Some(previous) = self.boost.take() {
            self.velocity = self.velocity.with_length(previous);
        }
        self.curve = None;
    }
}

/// A lightweight copy of the ball spawned by a swarm.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CloneBall {
    /// Center position.
    pub position: Vec2,
    /// Velocity.
    pub velocity: Vec2,
    /// Curve inherited from the source ball.
    pub curve: Option<f64>,
}

/// A pickup on the field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PowerUpFruit {
    /// Monotonic id within the match.
    pub id: u32,
    /// Position.
    pub position: Vec2,
}

// =============================================================================
// PARTICIPANT
// =============================================================================

/// Who fills a seat at match creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entrant {
    /// Stable id.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
    /// Driven by the AI.
    pub is_bot: bool,
}

impl Entrant {
    /// Human entrant.
    pub fn human(id: PlayerId, name: impl Into<String>) -> Self {
        Self { id, name: name.into(), is_bot: false }
    }

    /// Bot entrant with a fresh id.
    pub fn bot(name: impl Into<String>) -> Self {
        Self { id: PlayerId::random(), name: name.into(), is_bot: true }
    }
}

/// One side of a match.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Participant {
    /// Stable id.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
    /// Driven by the AI.
    pub is_bot: bool,
    /// Paddle.
    pub paddle: Paddle,
    /// Remaining lives.
    pub lives: u32,
    /// Out of the match.
    pub eliminated: bool,
    /// Final placement, 1 = winner.
    pub placement: Option<u8>,
    /// Inventory; slot `k` holds kind `k`.
    pub slots: [Option<PowerUpKind>; 3],
    /// Activated items waiting for the next paddle hit.
    pub pending: VecDeque<PowerUpKind>,
    /// Item being earned.
    pub charging: Option<Charging>,
    /// Paddle hits this match.
    pub hits: u32,
}

impl Participant {
    /// Seat an entrant with a paddle.
    pub fn new(entrant: Entrant, paddle: Paddle, lives: u32) -> Self {
        Self {
            id: entrant.id,
            name: entrant.name,
            is_bot: entrant.is_bot,
            paddle,
            lives,
            eliminated: false,
            placement: None,
            slots: [None; 3],
            pending: VecDeque::new(),
            charging: None,
            hits: 0,
        }
    }

    /// Still playing.
    #[inline]
    pub fn is_alive(&self) -> bool {
        !self.eliminated
    }

    /// Whether the slot holds its item.
    #[inline]
    pub fn has_item(&self, kind: PowerUpKind) -> bool {
        self.slots[kind.slot()].is_some()
    }
}

// =============================================================================
// MATCH PHASE
// =============================================================================

/// Current phase of the match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Default)]
pub enum MatchPhase {
    /// Active gameplay
    #[default]
    Playing,
    /// Terminal state reached
    Ended,
}

// =============================================================================
// MATCH STATE
// =============================================================================

/// Complete state of a match.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchState {
    /// Match identifier
    pub match_id: [u8; 16],

    /// Current tick
    pub tick: u32,

    /// Current match phase
    pub phase: MatchPhase,

    /// Settings fixed at creation
    pub settings: MatchSettings,

    /// Arena geometry
    pub arena: Arena,

    /// Seats in side order
    pub participants: Vec<Participant>,

    /// Primary ball
    pub ball: Ball,

    /// Active clone swarm
    pub clones: Vec<CloneBall>,

    /// Fruits on the field
    pub fruits: Vec<PowerUpFruit>,

    /// Next fruit id (monotonic counter)
    pub next_fruit_id: u32,

    /// Seconds since the last fruit spawn
    pub fruit_timer: f64,

    /// Seat that last touched the ball
    pub last_touch: Option<usize>,

    /// Horizontal serve sign in rectangular mode
    pub serve_sign: f64,

    /// RNG seed
    pub rng_seed: u64,

    /// Deterministic RNG state
    #[serde(skip)]
    pub rng: DeterministicRng,

    /// Seat that won, once ended
    pub winner: Option<usize>,

    /// Events generated this tick (cleared each tick)
    #[serde(skip)]
    pub pending_events: Vec<GameEvent>,
}

impl MatchState {
    /// Create a match for the given roster and serve the ball.
    ///
    /// Two entrants play in the canvas rectangle, three or more on a polygon.
    pub fn new(
        match_id: [u8; 16],
        rng_seed: u64,
        entrants: Vec<Entrant>,
        settings: MatchSettings,
    ) -> Result<Self, ArenaError> {
        let arena = Arena::for_player_count(entrants.len())?;
        Self::with_arena(match_id, rng_seed, arena, entrants, settings)
    }

    /// Create a match on an explicit arena.
    pub fn with_arena(
        match_id: [u8; 16],
        rng_seed: u64,
        arena: Arena,
        entrants: Vec<Entrant>,
        settings: MatchSettings,
    ) -> Result<Self, ArenaError> {
        let participants: Vec<Participant> = match &arena {
            Arena::Rectangle { width, height } => {
                if entrants.len() != 2 {
                    return Err(ArenaError::UnsupportedPlayerCount(entrants.len()));
                }
                entrants
                    .into_iter()
                    .enumerate()
                    .map(|(i, e)| {
                        Participant::new(e, Paddle::rectangular(i == 0, *width, *height), settings.lives)
                    })
                    .collect()
            }
            Arena::Polygon { sides, .. } => {
                if entrants.len() != sides.len() {
                    return Err(ArenaError::UnsupportedPlayerCount(entrants.len()));
                }
                entrants
                    .into_iter()
                    .zip(sides.iter())
                    .enumerate()
                    .map(|(i, (e, side))| Participant::new(e, Paddle::on_side(i, side), settings.lives))
                    .collect()
            }
        };

        let mut state = Self {
            match_id,
            tick: 0,
            phase: MatchPhase::Playing,
            settings,
            ball: Ball::new(arena.center()),
            arena,
            participants,
            clones: Vec::new(),
            fruits: Vec::new(),
            next_fruit_id: 0,
            fruit_timer: 0.0,
            last_touch: None,
            serve_sign: 1.0,
            rng_seed,
            rng: DeterministicRng::new(rng_seed),
            winner: None,
            pending_events: Vec::new(),
        };
        state.serve_sign = state.rng.sign();
        state.serve();
        Ok(state)
    }

    /// Reset the ball to the center and launch it.
    ///
    /// Rectangular serves alternate horizontal direction with a random
    /// vertical component. Polygon serves aim at a random live side.
    pub fn serve(&mut self) {
        let center = self.arena.center();
        self.ball = Ball::new(center);
        self.clones.clear();

        let direction = match &self.arena {
            Arena::Rectangle { .. } => {
                let vy = self.rng.next_range(-SERVE_SPREAD, SERVE_SPREAD);
                Vec2::new(self.serve_sign, vy).normalize()
            }
            Arena::Polygon { sides, .. } => {
                let alive: Vec<usize> = self.alive_seats().collect();
                let target = self.rng.choose(&alive).copied().unwrap_or(0);
                let aim = sides
                    .get(target)
                    .map(|s| (s.midpoint - center).normalize())
                    .unwrap_or(Vec2::RIGHT);
                aim.rotate(self.rng.next_range(-0.35, 0.35))
            }
        };
        self.ball.velocity = direction.scale(BALL_INITIAL_SPEED);
    }

    /// Seat index of a player.
    pub fn seat_of(&self, id: &PlayerId) -> Option<usize> {
        self.participants.iter().position(|p| p.id == *id)
    }

    /// Seat indices still in play.
    pub fn alive_seats(&self) -> impl Iterator<Item = usize> + '_ {
        self.participants
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_alive())
            .map(|(i, _)| i)
    }

    /// Number of seats still in play.
    pub fn alive_count(&self) -> usize {
        self.participants.iter().filter(|p| p.is_alive()).count()
    }

    /// Whether every remaining participant is a bot.
    pub fn only_bots_remain(&self) -> bool {
        self.participants
            .iter()
            .filter(|p| p.is_alive())
            .all(|p| p.is_bot)
    }

    /// Eliminate a seat, assigning its placement.
    ///
    /// Returns the placement, or `None` if already eliminated.
    pub fn eliminate(&mut self, seat: usize) -> Option<u8> {
        let placement = self.alive_count() as u8;
        let participant = self.participants.get_mut(seat)?;
        if participant.eliminated {
            return None;
        }
        participant.eliminated = true;
        participant.lives = 0;
        participant.placement = Some(placement);
        participant.pending.clear();
        participant.charging = None;
        if self.last_touch == Some(seat) {
            self.last_touch = None;
        }
        Some(placement)
    }

    /// Mark the match ended if at most one participant remains.
    pub fn check_terminal(&mut self) -> bool {
        if self.phase == MatchPhase::Ended {
            return true;
        }
        if self.alive_count() > 1 {
            return false;
        }
        let winner = self.alive_seats().next();
        self.winner = winner;
        if let Some(seat) = self.winner {
            self.participants[seat].placement = Some(1);
        }
        self.phase = MatchPhase::Ended;
        true
    }

    /// Final placements, best first.
    pub fn placements(&self) -> Vec<(PlayerId, u8)> {
        let mut results: Vec<_> = self
            .participants
            .iter()
            .map(|p| (p.id, p.placement.unwrap_or(u8::MAX)))
            .collect();
        results.sort_by_key(|(_, placement)| *placement);
        results
    }

    /// Check if match has ended.
    pub fn is_ended(&self) -> bool {
        matches!(self.phase, MatchPhase::Ended)
    }

    /// Take pending events (consumes them).
    pub fn take_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.pending_events)
    }

    /// Push a game event.
    pub fn push_event(&mut self, event: GameEvent) {
        self.pending_events.push(event);
    }
}

// =============================================================================
// TESTS
// =============================================================================
