//! Game Events
//!
//! Events generated during a tick. Rooms turn them into logs, records and
//! broadcast decisions; the simulation itself never reads them back.

use serde::{Serialize, Deserialize};
use crate::core::vec2::Vec2;
use crate::game::state::PowerUpKind;

/// Game event data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameEventData {
    /// Ball bounced off a paddle.
    PaddleHit {
        seat: usize,
        speed: f64,
    },

    /// Ball bounced off a wall, an eliminated side or a corner.
    WallBounce {
        position: Vec2,
    },

    /// An inventory item moved into the pending queue.
    PowerUpQueued {
        seat: usize,
        kind: PowerUpKind,
    },

    /// A pending power-up took effect on a hit.
    PowerUpApplied {
        seat: usize,
        kind: PowerUpKind,
    },

    /// A charging power-up was promoted into the inventory.
    ItemAwarded {
        seat: usize,
        kind: PowerUpKind,
    },

    /// A fruit appeared.
    FruitSpawned {
        fruit_id: u32,
        position: Vec2,
    },

    /// A fruit was collected.
    FruitCollected {
        seat: usize,
        fruit_id: u32,
    },

    /// A seat lost a life.
    LifeLost {
        seat: usize,
        lives_remaining: u32,
    },

    /// A seat is out of the match.
    Eliminated {
        seat: usize,
        placement: u8,
    },

    /// Terminal state reached.
    MatchEnded {
        winner: Option<usize>,
        duration_ticks: u32,
    },
}

/// A game event with its tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    /// Tick when event occurred
    pub tick: u32,

    /// Event data
    pub data: GameEventData,
}

impl GameEvent {
    /// Create a new event.
    pub fn new(tick: u32, data: GameEventData) -> Self {
        Self { tick, data }
    }

    /// Seat the event concerns, if any.
    pub fn seat(&self) -> Option<usize> {
        match &self.data {
            GameEventData::PaddleHit { seat, .. }
            | GameEventData::PowerUpQueued { seat, .. }
            | GameEventData::PowerUpApplied { seat, .. }
            | GameEventData::ItemAwarded { seat, .. }
            | GameEventData::FruitCollected { seat, .. }
            | GameEventData::LifeLost { seat, .. }
            | GameEventData::Eliminated { seat, .. } => Some(*seat),
            GameEventData::MatchEnded { winner, .. } => *winner,
            GameEventData::WallBounce { .. } | GameEventData::FruitSpawned { .. } => None,
        }
    }

    /// Whether this event ends a rally.
    pub fn is_score(&self) -> bool {
        matches!(self.data, GameEventData::LifeLost { .. })
    }
}
