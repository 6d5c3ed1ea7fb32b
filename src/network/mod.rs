//! Network Layer
//!
//! WebSocket server, registries and room orchestration.
//! This layer is **non-deterministic** - all game logic runs through `game/`.

pub mod auth;
pub mod connection;
pub mod context;
pub mod director;
pub mod lobby;
pub mod matchmaking;
pub mod persistence;
pub mod protocol;
pub mod room;
pub mod router;
pub mod server;
pub mod session;

pub use auth::{
    validate_token, AuthConfig, AuthError, GuestIdentityStore, IdentityStore, JwtIdentityStore, TokenClaims,
};
pub use connection::{ClaimError, ConnectionArena, ConnectionId, DuplicatePolicy, Identity, Location};
pub use context::ServerContext;
pub use director::TournamentDirector;
pub use lobby::{Lobby, LobbyError, LobbyKind, LobbyMember, LobbyTable};
pub use matchmaking::{MatchmakingQueue, QueueEntry, QueueMode};
pub use persistence::{MatchRecord, MemoryResultSink, ResultSink, TracingResultSink};
pub use protocol::{ClientMessage, ServerMessage};
pub use room::{GameRoom, RoomEntrant, RoomError, RoomHandle, RoomOutcome};
pub use server::{GameServer, GameServerError, ServerConfig};
pub use session::{RoomManager, RoomRequest};
