//! # Paddle Arena Server
//!
//! Authoritative multiplayer paddle-and-ball server: quick 1v1 matches,
//! lobbies, Battle Royale rooms on polygon arenas, AI opponents and
//! single-elimination tournaments.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PADDLE ARENA SERVER                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Math and randomness                       │
//! │  ├── vec2.rs     - 2D vector                                 │
//! │  └── rng.rs      - Seeded Xorshift128+ PRNG                  │
//! │                                                              │
//! │  game/           - Match simulation (pure)                   │
//! │  ├── arena.rs    - Rectangle and polygon geometry            │
//! │  ├── state.rs    - Participants, paddles, balls              │
//! │  ├── tick.rs     - Authoritative simulation step             │
//! │  ├── collision.rs- Contact tests and bounces                 │
//! │  └── powerup.rs  - Power-ups and fruits                      │
//! │                                                              │
//! │  ai/             - Bot opponents                             │
//! │  tournament/     - Single-elimination brackets               │
//! │                                                              │
//! │  network/        - Networking and orchestration              │
//! │  ├── server.rs   - WebSocket server                          │
//! │  ├── router.rs   - Message routing                           │
//! │  ├── session.rs  - Room lifecycle                            │
//! │  ├── lobby.rs    - Pre-match lobbies                         │
//! │  └── director.rs - Tournament progression                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Reproducibility
//!
//! `core/`, `game/` and `ai/` never read the clock or the OS RNG. Given the
//! same seed, roster and inputs a match replays identically; the room seed
//! is derived from the room id.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod ai;
pub mod core;
pub mod game;
pub mod network;
pub mod tournament;

// Re-export commonly used types
pub use self::core::rng::DeterministicRng;
pub use self::core::vec2::Vec2;
pub use game::input::InputFrame;
pub use game::state::{MatchState, PlayerId};
pub use network::{GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Room tick rate (Hz)
pub const TICK_RATE: u32 = 60;
