//! Connection Arena
//!
//! Every live socket gets one [`ConnectionRecord`] keyed by an opaque
//! [`ConnectionId`]. The record knows who the socket is, where it is
//! (idle, queued, in a lobby, in a room) and which tournament it belongs to.
//! Disconnect cleanup removes a single slot.
//!
//! The arena lock is the one serialization point for "already in a lobby or
//! game" checks: claiming a location is a check-and-set under that lock.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, Notify, RwLock};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::game::state::PlayerId;
use crate::network::matchmaking::QueueMode;
use crate::network::protocol::{PresenceStatus, ServerMessage};
use crate::tournament::TournamentId;

/// Opaque handle for a live connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Who a connection is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    /// Stable player id.
    pub player_id: PlayerId,
    /// Display name.
    pub name: String,
    /// Token the identity was resolved from, kept for liveness checks.
    pub token: String,
}

/// Where a connection currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Location {
    /// Nothing in progress.
    #[default]
    Idle,
    /// Waiting in a matchmaking queue.
    Queued(QueueMode),
    /// In a lobby.
    Lobby(Uuid),
    /// Playing in a room.
    Room(Uuid),
}

/// What to do when an identity is already connected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Refuse the new connection.
    #[default]
    Reject,
    /// Evict the old connection.
    ReplacePrevious,
}

impl DuplicatePolicy {
    /// Parse a config value.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "reject" => Some(Self::Reject),
            "replace" | "replace_previous" => Some(Self::ReplacePrevious),
            _ => None,
        }
    }
}

/// State-conflict rejections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ClaimError {
    /// No such connection.
    #[error("unknown connection")]
    UnknownConnection,
    /// Connection has no identity yet.
    #[error("not authenticated")]
    NotAuthenticated,
    /// Identity already bound elsewhere.
    #[error("already connected")]
    AlreadyConnected,
    /// Already in a lobby.
    #[error("already in a lobby")]
    AlreadyInLobby,
    /// Already queued or playing.
    #[error("already in a game")]
    AlreadyInGame,
}

impl ClaimError {
    /// Rejection message for the sender.
    pub fn to_message(self) -> ServerMessage {
        use crate::network::protocol::ErrorCode;
        match self {
            ClaimError::AlreadyConnected => ServerMessage::AlreadyConnected,
            ClaimError::AlreadyInLobby => ServerMessage::AlreadyInLobby,
            ClaimError::AlreadyInGame => ServerMessage::AlreadyInGame,
            ClaimError::NotAuthenticated => ServerMessage::error(ErrorCode::NotAuthenticated, "authenticate first"),
            ClaimError::UnknownConnection => ServerMessage::error(ErrorCode::InternalError, "unknown connection"),
        }
    }
}

/// One live connection.
#[derive(Debug)]
pub struct ConnectionRecord {
    /// Identity once authenticated.
    pub identity: Option<Identity>,
    /// Outbound channel to the socket task.
    pub sender: mpsc::Sender<ServerMessage>,
    /// Current location.
    pub location: Location,
    /// Tournament this player is entered in.
    pub tournament: Option<TournamentId>,
    /// Wakes the socket task when the connection is evicted.
    pub closer: Arc<Notify>,
    /// Connect time.
    pub connected_at: Instant,
}

#[derive(Default)]
struct ArenaInner {
    next_id: u64,
    records: BTreeMap<ConnectionId, ConnectionRecord>,
    by_player: BTreeMap<PlayerId, ConnectionId>,
}

/// All live connections.
#[derive(Default)]
pub struct ConnectionArena {
    inner: RwLock<ArenaInner>,
}

impl ConnectionArena {
    /// Empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a socket. Returns its handle and the eviction signal.
    pub async fn register(&self, sender: mpsc::Sender<ServerMessage>) -> (ConnectionId, Arc<Notify>) {
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let id = ConnectionId(inner.next_id);
        let closer = Arc::new(Notify::new());
        inner.records.insert(id, ConnectionRecord {
            identity: None,
            sender,
            location: Location::Idle,
            tournament: None,
            closer: Arc::clone(&closer),
            connected_at: Instant::now(),
        });
        trace!(%id, "connection registered");
        (id, closer)
    }

    /// Bind an identity. With `ReplacePrevious` the old connection id is
    /// returned so the caller can tear it down.
    pub async fn bind_identity(
        &self,
        id: ConnectionId,
        identity: Identity,
        policy: DuplicatePolicy,
    ) -> Result<Option<ConnectionId>, ClaimError> {
        let mut inner = self.inner.write().await;
        if !inner.records.contains_key(&id) {
            return Err(ClaimError::UnknownConnection);
        }

        let previous = inner.by_player.get(&identity.player_id).copied().filter(|prev| *prev != id);
        if previous.is_some() && policy == DuplicatePolicy::Reject {
            return Err(ClaimError::AlreadyConnected);
        }

        // Rebinding a connection to a new identity drops the old mapping.
        let old_player = inner
            .records
            .get(&id)
            .and_then(|r| r.identity.as_ref())
            .map(|i| i.player_id);
        if let Some(old) = old_player {
            inner.by_player.remove(&old);
        }

        inner.by_player.insert(identity.player_id, id);
        if let Some(record) = inner.records.get_mut(&id) {
            debug!(%id, player = %identity.player_id.short(), "identity bound");
            record.identity = Some(identity);
        }
        Ok(previous)
    }

    /// Identity of a connection.
    pub async fn identity(&self, id: ConnectionId) -> Option<Identity> {
        self.inner.read().await.records.get(&id)?.identity.clone()
    }

    /// Identity, or `NotAuthenticated`.
    pub async fn require_identity(&self, id: ConnectionId) -> Result<Identity, ClaimError> {
        let inner = self.inner.read().await;
        let record = inner.records.get(&id).ok_or(ClaimError::UnknownConnection)?;
        record.identity.clone().ok_or(ClaimError::NotAuthenticated)
    }

    /// Current location.
    pub async fn location(&self, id: ConnectionId) -> Option<Location> {
        self.inner.read().await.records.get(&id).map(|r| r.location)
    }

    /// Move an idle connection to `target`, atomically. Players still alive
    /// in a tournament cannot claim anything else.
    pub async fn try_claim(&self, id: ConnectionId, target: Location) -> Result<Identity, ClaimError> {
        let mut inner = self.inner.write().await;
        let record = inner.records.get_mut(&id).ok_or(ClaimError::UnknownConnection)?;
        let identity = record.identity.clone().ok_or(ClaimError::NotAuthenticated)?;
        if record.tournament.is_some() {
            return Err(ClaimError::AlreadyInGame);
        }
        match record.location {
            Location::Idle => {
                record.location = target;
                Ok(identity)
            }
            Location::Lobby(_) => Err(ClaimError::AlreadyInLobby),
            Location::Queued(_) | Location::Room(_) => Err(ClaimError::AlreadyInGame),
        }
    }

    /// Force a location. Returns false if the connection is gone.
    pub async fn set_location(&self, id: ConnectionId, location: Location) -> bool {
        let mut inner = self.inner.write().await;
        match inner.records.get_mut(&id) {
            Some(record) => {
                record.location = location;
                true
            }
            None => false,
        }
    }

    /// Move a connection from `from` to `to`. No-op if it is elsewhere.
    pub async fn transition(&self, id: ConnectionId, from: Location, to: Location) -> bool {
        let mut inner = self.inner.write().await;
        match inner.records.get_mut(&id) {
            Some(record) if record.location == from => {
                record.location = to;
                true
            }
            _ => false,
        }
    }

    /// Move a player's connection from `from` to `to`.
    pub async fn transition_player(&self, player: &PlayerId, from: Location, to: Location) -> bool {
        let mut inner = self.inner.write().await;
        let Some(id) = inner.by_player.get(player).copied() else {
            return false;
        };
        match inner.records.get_mut(&id) {
            Some(record) if record.location == from => {
                record.location = to;
                true
            }
            _ => false,
        }
    }

    /// Set the tournament a player belongs to.
    pub async fn set_tournament(&self, player: &PlayerId, tournament: Option<TournamentId>) {
        let mut inner = self.inner.write().await;
        if let Some(id) = inner.by_player.get(player).copied() {
            if let Some(record) = inner.records.get_mut(&id) {
                record.tournament = tournament;
            }
        }
    }

    /// Clear a player's tournament if it is still `tournament`.
    pub async fn clear_tournament(&self, player: &PlayerId, tournament: TournamentId) {
        let mut inner = self.inner.write().await;
        if let Some(id) = inner.by_player.get(player).copied() {
            if let Some(record) = inner.records.get_mut(&id) {
                if record.tournament == Some(tournament) {
                    record.tournament = None;
                }
            }
        }
    }

    /// Tournament of a connection.
    pub async fn tournament(&self, id: ConnectionId) -> Option<TournamentId> {
        self.inner.read().await.records.get(&id)?.tournament
    }

    /// Live connection for a player.
    pub async fn connection_of(&self, player: &PlayerId) -> Option<ConnectionId> {
        self.inner.read().await.by_player.get(player).copied()
    }

    /// Outbound channel for a player.
    pub async fn sender_of(&self, player: &PlayerId) -> Option<mpsc::Sender<ServerMessage>> {
        let inner = self.inner.read().await;
        let id = inner.by_player.get(player)?;
        inner.records.get(id).map(|r| r.sender.clone())
    }

    /// Fire-and-forget send to a connection.
    pub async fn send(&self, id: ConnectionId, message: ServerMessage) {
        let inner = self.inner.read().await;
        if let Some(record) = inner.records.get(&id) {
            let _ = record.sender.try_send(message);
        }
    }

    /// Fire-and-forget send to a player.
    pub async fn send_to_player(&self, player: &PlayerId, message: ServerMessage) {
        let inner = self.inner.read().await;
        if let Some(record) = inner.by_player.get(player).and_then(|id| inner.records.get(id)) {
            let _ = record.sender.try_send(message);
        }
    }

    /// Presence for the friend list.
    pub async fn presence(&self, player: &PlayerId) -> PresenceStatus {
        let inner = self.inner.read().await;
        match inner.by_player.get(player).and_then(|id| inner.records.get(id)) {
            None => PresenceStatus::Offline,
            Some(record) => match record.location {
                Location::Room(_) => PresenceStatus::InGame,
                _ => PresenceStatus::Online,
            },
        }
    }

    /// Remove a connection, returning its record.
    pub async fn remove(&self, id: ConnectionId) -> Option<ConnectionRecord> {
        let mut inner = self.inner.write().await;
        let record = inner.records.remove(&id)?;
        if let Some(identity) = &record.identity {
            if inner.by_player.get(&identity.player_id) == Some(&id) {
                inner.by_player.remove(&identity.player_id);
            }
        }
        trace!(%id, "connection removed");
        Some(record)
    }

    /// Live connection count.
    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    /// Whether no connections are live.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.records.is_empty()
    }
}
