//! Game Logic Module
//!
//! Pure simulation of one match. No I/O and no concurrency; rooms advance
//! it one tick at a time.
//!
//! ## Module Structure
//!
//! - `config`: Tuning constants and per-match settings
//! - `arena`: Rectangle and regular-polygon arena geometry
//! - `input`: Input frames and rising-edge latching
//! - `state`: Match state, participants, paddles, balls
//! - `tick`: Authoritative simulation step
//! - `collision`: Contact tests and bounce responses
//! - `powerup`: Power-up earning, queueing and effects; fruits
//! - `events`: Game events produced by a tick

pub mod config;
pub mod arena;
pub mod input;
pub mod state;
pub mod tick;
pub mod collision;
pub mod powerup;
pub mod events;

// Re-export key types
pub use arena::{Arena, ArenaError, Side};
pub use config::{FruitFrequency, MatchSettings, SettingsError};
pub use input::{InputFrame, InputLatch, NetworkInput};
pub use state::{Entrant, MatchPhase, MatchState, Participant, PlayerId, PowerUpKind};
pub use tick::TickResult;
pub use events::{GameEvent, GameEventData};
