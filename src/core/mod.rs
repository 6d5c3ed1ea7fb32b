//! Core primitives.
//!
//! Vector math and the seeded RNG shared by the simulation and the AI.

pub mod vec2;
pub mod rng;

// Re-export core types
pub use vec2::Vec2;
pub use rng::{derive_room_seed, DeterministicRng};
