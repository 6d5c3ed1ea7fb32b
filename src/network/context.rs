//! Server Context
//!
//! The shared state every connection task works against. Built once at
//! startup and handed to each task behind an `Arc`.

use std::sync::Arc;

use crate::network::auth::IdentityStore;
use crate::network::connection::ConnectionArena;
use crate::network::director::TournamentDirector;
use crate::network::lobby::LobbyTable;
use crate::network::matchmaking::MatchmakingQueue;
use crate::network::persistence::ResultSink;
use crate::network::server::ServerConfig;
use crate::network::session::RoomManager;

/// Registries and services shared by all connections.
pub struct ServerContext {
    /// Runtime configuration.
    pub config: ServerConfig,
    /// Live connections.
    pub connections: Arc<ConnectionArena>,
    /// Token resolution.
    pub identities: Arc<dyn IdentityStore>,
    /// Quick-match queues.
    pub matchmaking: MatchmakingQueue,
    /// Open lobbies.
    pub lobbies: LobbyTable,
    /// Running rooms.
    pub rooms: Arc<RoomManager>,
    /// Running tournaments.
    pub tournaments: Arc<TournamentDirector>,
}

impl ServerContext {
    /// Wire up every registry.
    pub fn new(config: ServerConfig, identities: Arc<dyn IdentityStore>, results: Arc<dyn ResultSink>) -> Self {
        let connections = Arc::new(ConnectionArena::new());
        let rooms = Arc::new(RoomManager::new(Arc::clone(&connections), results, config.tick_rate));
        let tournaments = Arc::new(TournamentDirector::new(Arc::clone(&rooms), Arc::clone(&connections)));
        Self {
            config,
            connections,
            identities,
            matchmaking: MatchmakingQueue::new(),
            lobbies: LobbyTable::new(),
            rooms,
            tournaments,
        }
    }
}
