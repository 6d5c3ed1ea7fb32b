//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Text frames carry JSON with a `type` tag. Paddle input may also arrive
//! as a binary frame holding a bincode [`NetworkInput`].

use serde::{Serialize, Deserialize};
use uuid::Uuid;

use crate::ai::Difficulty;
use crate::game::arena::Arena;
use crate::game::config::MatchSettings;
use crate::game::input::{InputFrame, NetworkInput};
use crate::game::state::{MatchState, PowerUpKind};
use crate::network::lobby::LobbyKind;
use crate::network::matchmaking::QueueMode;
use crate::tournament::TournamentView;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Bind this connection to an identity.
    Authenticate {
        /// Session token.
        token: String,
    },

    /// Quick 1v1, classic rules.
    JoinQuick,

    /// Quick 1v1 with power-ups.
    JoinQuickCustom,

    /// 1v1 against a bot.
    JoinVsBot {
        /// Bot difficulty; server default when absent.
        #[serde(default)]
        difficulty: Option<Difficulty>,
        /// Power-ups on.
        #[serde(default)]
        custom: bool,
    },

    /// Open a lobby owned by the sender.
    CreateLobby {
        /// Display name.
        name: String,
        /// Battle Royale or tournament.
        kind: LobbyKind,
        /// Match settings; server default when absent.
        #[serde(default)]
        settings: Option<MatchSettings>,
    },

    /// Join an open lobby.
    JoinLobby {
        /// Lobby id.
        lobby_id: Uuid,
    },

    /// Leave the current lobby.
    LeaveLobby,

    /// Close the owned lobby.
    DeleteLobby,

    /// Add a bot to the owned lobby.
    AddBot {
        /// Bot difficulty; server default when absent.
        #[serde(default)]
        difficulty: Option<Difficulty>,
    },

    /// Remove a bot from the owned lobby.
    RemoveBot {
        /// Bot id as a UUID string.
        bot_id: String,
    },

    /// Start the owned lobby.
    StartLobby,

    /// List open lobbies.
    RequestLobbyList,

    /// Paddle input for the current room.
    PlayerInput(PlayerInput),

    /// Latency probe.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },

    /// Give up the current match.
    Surrender,

    /// Leave the matchmaking queue.
    CancelQueue,

    /// Authenticate and evict any other connection under the same identity.
    ForceDisconnect {
        /// Session token.
        token: String,
    },

    /// Presence of a list of players.
    FriendListRequest {
        /// Player ids as UUID strings.
        friend_ids: Vec<String>,
    },
}

/// Paddle direction plus power-up slot flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInput {
    /// -1, 0 or +1 along the paddle lane.
    pub direction: i8,
    /// Up to three slot flags.
    #[serde(default)]
    pub slots: Vec<bool>,
    /// Client counter.
    #[serde(default)]
    pub sequence: u32,
}

impl PlayerInput {
    /// Convert to InputFrame for the simulation.
    pub fn to_input_frame(&self) -> InputFrame {
        InputFrame::from_parts(self.direction, &self.slots)
    }
}

impl From<NetworkInput> for PlayerInput {
    fn from(input: NetworkInput) -> Self {
        Self {
            direction: input.frame.direction,
            slots: input.frame.slots().to_vec(),
            sequence: input.sequence,
        }
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication accepted.
    Authenticated {
        /// Player id as a UUID string.
        player_id: String,
        /// Display name.
        name: String,
        /// Server version.
        server_version: String,
    },

    /// Queued, waiting for an opponent.
    Waiting {
        /// Queue joined.
        mode: QueueMode,
    },

    /// Queue fill level.
    PlayerJoinedCount {
        /// Players waiting.
        count: usize,
        /// Players needed to start.
        needed: usize,
    },

    /// Left the queue.
    QueueCancelled,

    /// A room started with this player in it.
    MatchStart(MatchStartInfo),

    /// Per-tick state.
    StateSnapshot(StateSnapshot),

    /// Room finished.
    MatchOver(MatchOverInfo),

    /// Lobby opened by this player.
    LobbyCreated {
        /// Lobby state.
        lobby: LobbyView,
    },

    /// Lobby roster or owner changed.
    LobbyUpdated {
        /// Lobby state.
        lobby: LobbyView,
    },

    /// Open lobbies.
    LobbyList {
        /// Summaries.
        lobbies: Vec<LobbyView>,
    },

    /// Lobby was closed.
    LobbyDeleted {
        /// Lobby id.
        lobby_id: Uuid,
    },

    /// Lobby action rejected.
    LobbyError {
        /// Human-readable reason.
        message: String,
    },

    /// Bracket changed.
    TournamentUpdate {
        /// Bracket view.
        tournament: TournamentView,
    },

    /// Tournament finished.
    TournamentComplete {
        /// Tournament id.
        tournament_id: Uuid,
        /// Champion's name.
        champion: Option<String>,
    },

    /// Another connection already holds this identity.
    AlreadyConnected,

    /// Already in a lobby.
    AlreadyInLobby,

    /// Already in a queue or room.
    AlreadyInGame,

    /// Identity is no longer valid.
    SessionExpired {
        /// Reason.
        reason: String,
    },

    /// Ping reply.
    Pong {
        /// Client timestamp.
        timestamp: u64,
        /// Server wall clock in milliseconds.
        server_time: u64,
    },

    /// Presence for requested players.
    FriendList {
        /// Presence entries.
        friends: Vec<FriendPresence>,
    },

    /// Protocol-level rejection.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Reason.
        reason: String,
    },
}

/// Sent once per player when a room starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchStartInfo {
    /// Room id.
    pub room_id: Uuid,
    /// Seat assigned to the receiver (paddle side or polygon side).
    pub side: usize,
    /// Names in seat order.
    pub names: Vec<String>,
    /// Power-ups enabled.
    pub custom: bool,
    /// Lives per participant.
    pub lives: u32,
    /// Tournament this match belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tournament_id: Option<Uuid>,
    /// Last match of the tournament.
    pub is_final: bool,
    /// Arena geometry.
    pub arena: ArenaView,
}

/// Arena outline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum ArenaView {
    /// Canvas rectangle.
    Rectangle {
        /// Width.
        width: f64,
        /// Height.
        height: f64,
    },
    /// Regular polygon.
    Polygon {
        /// Vertices in side order.
        vertices: Vec<[f64; 2]>,
        /// Center.
        center: [f64; 2],
        /// Which sides are solid walls (owner eliminated).
        walls: Vec<bool>,
    },
}

impl ArenaView {
    /// Build from the live match.
    pub fn from_state(state: &MatchState) -> Self {
        match &state.arena {
            Arena::Rectangle { width, height } => ArenaView::Rectangle { width: *width, height: *height },
            Arena::Polygon { vertices, center, .. } => ArenaView::Polygon {
                vertices: vertices.iter().map(|v| v.to_array()).collect(),
                center: center.to_array(),
                walls: state.participants.iter().map(|p| p.eliminated).collect(),
            },
        }
    }
}

/// Full state sent every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Server tick.
    pub tick: u32,
    /// Seats in order.
    pub participants: Vec<ParticipantView>,
    /// Primary ball.
    pub ball: BallView,
    /// Clone swarm positions.
    pub clones: Vec<[f64; 2]>,
    /// Fruits on the field.
    pub fruits: Vec<FruitView>,
    /// Geometry when it changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arena: Option<ArenaView>,
}

impl StateSnapshot {
    /// Build from the live match.
    pub fn from_state(state: &MatchState, include_arena: bool) -> Self {
        Self {
            tick: state.tick,
            participants: state
                .participants
                .iter()
                .enumerate()
                .map(|(side, p)| ParticipantView {
                    side,
                    name: p.name.clone(),
                    paddle: PaddleView {
                        position: p.paddle.position.to_array(),
                        rotation: p.paddle.rotation,
                        length: p.paddle.length,
                        width: p.paddle.width,
                    },
                    lives: p.lives,
                    eliminated: p.eliminated,
                    slots: p.slots,
                    charging: p.charging.map(|c| ChargingView { kind: c.kind, charge: c.charge }),
                })
                .collect(),
            ball: BallView {
                position: state.ball.position.to_array(),
                velocity: state.ball.velocity.to_array(),
                radius: state.ball.radius,
            },
            clones: state.clones.iter().map(|c| c.position.to_array()).collect(),
            fruits: state
                .fruits
                .iter()
                .map(|f| FruitView { id: f.id, position: f.position.to_array() })
                .collect(),
            arena: include_arena.then(|| ArenaView::from_state(state)),
        }
    }
}

/// One seat in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantView {
    /// Seat index.
    pub side: usize,
    /// Display name.
    pub name: String,
    /// Paddle body.
    pub paddle: PaddleView,
    /// Remaining lives.
    pub lives: u32,
    /// Out of the match.
    pub eliminated: bool,
    /// Inventory.
    pub slots: [Option<PowerUpKind>; 3],
    /// Item being earned.
    pub charging: Option<ChargingView>,
}

/// Paddle body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaddleView {
    /// Center.
    pub position: [f64; 2],
    /// Rotation in radians.
    pub rotation: f64,
    /// Length along the lane.
    pub length: f64,
    /// Thickness.
    pub width: f64,
}

/// Charging progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargingView {
    /// Kind.
    pub kind: PowerUpKind,
    /// Hits so far.
    pub charge: u32,
}

/// Ball state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BallView {
    /// Center.
    pub position: [f64; 2],
    /// Velocity.
    pub velocity: [f64; 2],
    /// Radius.
    pub radius: f64,
}

/// Fruit on the field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FruitView {
    /// Fruit id.
    pub id: u32,
    /// Center.
    pub position: [f64; 2],
}

/// Match result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchOverInfo {
    /// Room id.
    pub room_id: Uuid,
    /// Winner's name.
    pub winner: Option<String>,
    /// Winner's seat.
    pub winner_side: Option<usize>,
    /// Lives in seat order.
    pub final_lives: Vec<u32>,
    /// (name, placement) best first.
    pub placements: Vec<(String, u8)>,
    /// Part of a tournament.
    pub tournament: bool,
    /// Decided by disconnect or surrender.
    pub forfeit: bool,
}

/// Lobby as shown to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyView {
    /// Lobby id.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Battle Royale or tournament.
    pub kind: LobbyKind,
    /// Owner's name.
    pub owner: String,
    /// Roster.
    pub members: Vec<LobbyMemberView>,
    /// Settings for the match.
    pub settings: MatchSettings,
}

/// One lobby member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyMemberView {
    /// Player id as a UUID string.
    pub id: String,
    /// Display name.
    pub name: String,
    /// AI-controlled.
    pub is_bot: bool,
}

/// Presence of one player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendPresence {
    /// Player id as given.
    pub id: String,
    /// Presence.
    pub status: PresenceStatus,
}

/// Presence states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    /// No live connection.
    Offline,
    /// Connected, not playing.
    Online,
    /// In a room.
    InGame,
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Authentication failed.
    AuthFailed,
    /// Not authenticated.
    NotAuthenticated,
    /// Message could not be parsed.
    InvalidMessage,
    /// Invalid match settings.
    InvalidSettings,
    /// Server overloaded.
    ServerOverloaded,
    /// Internal error.
    InternalError,
}

impl ServerMessage {
    /// Protocol error shorthand.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError { code, message: message.into() })
    }

    /// Lobby error shorthand.
    pub fn lobby_error(message: impl Into<String>) -> Self {
        ServerMessage::LobbyError { message: message.into() }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Decode a binary frame; only paddle input travels as binary.
    pub fn from_binary(data: &[u8]) -> Result<Self, bincode::Error> {
        NetworkInput::from_bytes(data).map(|input| ClientMessage::PlayerInput(input.into()))
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::Entrant;

    #[test]
    fn test_client_message_tags() {
        let msg = ClientMessage::from_json(r#"{"type":"join_quick_custom"}"#).unwrap();
        assert_eq!(msg, ClientMessage::JoinQuickCustom);

        let msg = ClientMessage::from_json(r#"{"type":"join_vs_bot","difficulty":"hard"}"#).unwrap();
        assert_eq!(msg, ClientMessage::JoinVsBot { difficulty: Some(Difficulty::Hard), custom: false });

        let msg = ClientMessage::from_json(r#"{"type":"ping","timestamp":42}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ping { timestamp: 42 });
    }

    #[test]
    fn test_player_input_json() {
        let msg = ClientMessage::from_json(
            r#"{"type":"player_input","direction":-1,"slots":[false,true,false,true]}"#,
        )
        .unwrap();
        let ClientMessage::PlayerInput(input) = msg else {
            panic!("wrong message type");
        };
        let frame = input.to_input_frame();
        assert_eq!(frame.direction, -1);
        assert_eq!(frame.slots(), [false, true, false]);
    }

    #[test]
    fn test_binary_input_frame() {
        let mut frame = InputFrame::with_direction(1);
        frame.set_slot(2, true);
        let bytes = NetworkInput::new(7, frame).to_bytes().unwrap();

        let ClientMessage::PlayerInput(input) = ClientMessage::from_binary(&bytes).unwrap() else {
            panic!("wrong message type");
        };
        assert_eq!(input.sequence, 7);
        assert_eq!(input.to_input_frame(), frame);
    }

    #[test]
    fn test_unknown_message_rejected() {
        assert!(ClientMessage::from_json(r#"{"type":"teleport"}"#).is_err());
        assert!(ClientMessage::from_binary(&[1]).is_err());
    }

    #[test]
    fn test_snapshot_serializes_geometry_when_asked() {
        let roster = (0..4).map(|i| Entrant::bot(format!("b{i}"))).collect();
        let state = MatchState::new([3; 16], 1, roster, MatchSettings::default()).unwrap();

        let with = StateSnapshot::from_state(&state, true);
        let Some(ArenaView::Polygon { vertices, walls, .. }) = &with.arena else {
            panic!("expected polygon geometry");
        };
        assert_eq!(vertices.len(), 4);
        assert_eq!(walls, &vec![false; 4]);

        let without = ServerMessage::StateSnapshot(StateSnapshot::from_state(&state, false)).to_json().unwrap();
        assert!(without.contains("\"type\":\"state_snapshot\""));
        assert!(!without.contains("\"arena\""));
    }

    #[test]
    fn test_server_message_shapes() {
        let json = ServerMessage::AlreadyInLobby.to_json().unwrap();
        assert_eq!(json, r#"{"type":"already_in_lobby"}"#);

        let json = ServerMessage::error(ErrorCode::NotAuthenticated, "login first").to_json().unwrap();
        assert!(json.contains("not_authenticated"));

        let parsed = ServerMessage::from_json(&ServerMessage::QueueCancelled.to_json().unwrap()).unwrap();
        assert_eq!(parsed, ServerMessage::QueueCancelled);
    }
}
