//! Message Router
//!
//! Turns one decoded [`ClientMessage`] into registry operations. Routing is
//! split by category (player, game, lobby, friend); each category returns
//! `true` when it consumed the message, and [`dispatch`] chains them in that
//! order.
//!
//! Every "already somewhere" check goes through
//! [`ConnectionArena::try_claim`](crate::network::connection::ConnectionArena::try_claim),
//! so two racing requests from one connection cannot both succeed.

use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ai::Difficulty;
use crate::game::config::MatchSettings;
use crate::game::state::{Entrant, PlayerId};
use crate::network::connection::{ConnectionId, ConnectionRecord, DuplicatePolicy, Identity, Location};
use crate::network::context::ServerContext;
use crate::network::lobby::{LeaveOutcome, Lobby, LobbyKind, LobbyMember};
use crate::network::matchmaking::{Enqueued, QueueEntry, QueueMode, QUICK_MATCH_SIZE};
use crate::network::persistence::short_uuid;
use crate::network::protocol::{ClientMessage, ErrorCode, FriendPresence, PresenceStatus, ServerMessage};
use crate::network::room::RoomEntrant;
use crate::network::session::RoomRequest;

/// Route one message from `conn`.
pub async fn dispatch(ctx: &ServerContext, conn: ConnectionId, message: &ClientMessage) {
    let handled = route_player(ctx, conn, message).await
        || route_game(ctx, conn, message).await
        || route_lobby(ctx, conn, message).await
        || route_friend(ctx, conn, message).await;
    if !handled {
        debug!(%conn, ?message, "message not routed");
    }
}

/// Tear down a connection. Safe to call twice; the second call is a no-op.
///
/// Returns the removed record so an evicting caller can wake its socket.
pub async fn disconnect(ctx: &ServerContext, conn: ConnectionId) -> Option<ConnectionRecord> {
    let record = ctx.connections.remove(conn).await?;
    let Some(identity) = &record.identity else {
        return Some(record);
    };
    let player = identity.player_id;

    match record.location {
        Location::Idle => {}
        Location::Queued(_) => {
            ctx.matchmaking.cancel(&player).await;
        }
        Location::Lobby(lobby_id) => {
            if let Ok(LeaveOutcome::Updated(lobby)) = ctx.lobbies.leave(&lobby_id, &player).await {
                lobby.broadcast(&ServerMessage::LobbyUpdated { lobby: lobby.view() });
            }
        }
        Location::Room(room_id) => ctx.rooms.disconnect(&room_id, &player).await,
    }

    if let Some(tournament) = record.tournament {
        ctx.tournaments.withdraw(tournament, player).await;
    }

    info!(%conn, player = %player.short(), location = ?record.location, "player disconnected");
    Some(record)
}

// =============================================================================
// PLAYER
// =============================================================================

async fn route_player(ctx: &ServerContext, conn: ConnectionId, message: &ClientMessage) -> bool {
    match message {
        ClientMessage::Authenticate { token } => {
            authenticate(ctx, conn, token, ctx.config.duplicate_policy).await;
        }
        ClientMessage::ForceDisconnect { token } => {
            authenticate(ctx, conn, token, DuplicatePolicy::ReplacePrevious).await;
        }
        ClientMessage::Ping { timestamp } => ping(ctx, conn, *timestamp).await,
        _ => return false,
    }
    true
}

async fn authenticate(ctx: &ServerContext, conn: ConnectionId, token: &str, policy: DuplicatePolicy) {
    let identity = match ctx.identities.resolve(token) {
        Ok(identity) => identity,
        Err(e) => {
            warn!(%conn, error = %e, "authentication failed");
            ctx.connections.send(conn, e.to_message()).await;
            return;
        }
    };

    let player = identity.player_id;
    let name = identity.name.clone();
    match ctx.connections.bind_identity(conn, identity, policy).await {
        Ok(previous) => {
            if let Some(previous) = previous {
                info!(%conn, %previous, player = %player.short(), "evicting previous connection");
                ctx.connections.send(previous, ServerMessage::AlreadyConnected).await;
                if let Some(record) = disconnect(ctx, previous).await {
                    record.closer.notify_one();
                }
            }
            info!(%conn, player = %player.short(), %name, "authenticated");
            ctx.connections
                .send(conn, ServerMessage::Authenticated {
                    player_id: player.to_uuid_string(),
                    name,
                    server_version: ctx.config.version.clone(),
                })
                .await;
        }
        Err(e) => ctx.connections.send(conn, e.to_message()).await,
    }
}

async fn ping(ctx: &ServerContext, conn: ConnectionId, timestamp: u64) {
    let server_time = unix_millis();
    ctx.connections.send(conn, ServerMessage::Pong { timestamp, server_time }).await;

    if let Some((room, identity)) = current_room(ctx, conn).await {
        ctx.rooms.record_ping(&room, &identity.player_id, server_time.saturating_sub(timestamp)).await;
    }
}

// =============================================================================
// GAME
// =============================================================================

async fn route_game(ctx: &ServerContext, conn: ConnectionId, message: &ClientMessage) -> bool {
    match message {
        ClientMessage::JoinQuick => join_queue(ctx, conn, QueueMode::Quick).await,
        ClientMessage::JoinQuickCustom => join_queue(ctx, conn, QueueMode::QuickCustom).await,
        ClientMessage::JoinVsBot { difficulty, custom } => {
            let difficulty = difficulty.unwrap_or(ctx.config.bot_difficulty);
            join_vs_bot(ctx, conn, difficulty, *custom).await;
        }
        ClientMessage::CancelQueue => cancel_queue(ctx, conn).await,
        ClientMessage::PlayerInput(input) => {
            // Input outside a room is stale and dropped.
            if let Some((room, identity)) = current_room(ctx, conn).await {
                ctx.rooms.input(&room, &identity.player_id, input.to_input_frame()).await;
            }
        }
        ClientMessage::Surrender => surrender(ctx, conn).await,
        _ => return false,
    }
    true
}

async fn join_queue(ctx: &ServerContext, conn: ConnectionId, mode: QueueMode) {
    let Some(identity) = claim(ctx, conn, Location::Queued(mode)).await else {
        return;
    };
    let Some(sender) = ctx.connections.sender_of(&identity.player_id).await else {
        return;
    };

    let entry = QueueEntry::new(identity.player_id, identity.name, conn, sender);
    match ctx.matchmaking.enqueue(mode, entry).await {
        Enqueued::Waiting { count } => {
            debug!(%conn, ?mode, count, "queued");
            ctx.connections.send(conn, ServerMessage::Waiting { mode }).await;
            ctx.connections
                .send(conn, ServerMessage::PlayerJoinedCount { count, needed: QUICK_MATCH_SIZE })
                .await;
        }
        Enqueued::Paired(first, second) => start_quick_match(ctx, mode, first, second).await,
    }
}

async fn start_quick_match(ctx: &ServerContext, mode: QueueMode, first: QueueEntry, second: QueueEntry) {
    let full = ServerMessage::PlayerJoinedCount { count: QUICK_MATCH_SIZE, needed: QUICK_MATCH_SIZE };
    let connections = [first.connection, second.connection];
    let entrants = [first, second]
        .into_iter()
        .map(|e| {
            let _ = e.sender.try_send(full.clone());
            RoomEntrant::human(Entrant::human(e.player_id, e.name), e.connection, e.sender)
        })
        .collect();

    let request = RoomRequest::new(entrants, mode.settings(ctx.config.default_settings));
    if let Err(e) = ctx.rooms.create_room(request).await {
        warn!(?mode, error = %e, "quick match failed to start");
        for conn in connections {
            release(ctx, conn, Location::Queued(mode)).await;
        }
    }
}

async fn join_vs_bot(ctx: &ServerContext, conn: ConnectionId, difficulty: Difficulty, custom: bool) {
    let mode = if custom { QueueMode::QuickCustom } else { QueueMode::Quick };
    // Held until the room takes the connection over.
    let Some(identity) = claim(ctx, conn, Location::Queued(mode)).await else {
        return;
    };
    let Some(sender) = ctx.connections.sender_of(&identity.player_id).await else {
        return;
    };

    let entrants = vec![
        RoomEntrant::human(Entrant::human(identity.player_id, identity.name), conn, sender),
        RoomEntrant::bot(Entrant::bot("Bot"), difficulty),
    ];
    let request = RoomRequest::new(entrants, mode.settings(ctx.config.default_settings));
    if let Err(e) = ctx.rooms.create_room(request).await {
        warn!(%conn, error = %e, "bot match failed to start");
        release(ctx, conn, Location::Queued(mode)).await;
    }
}

async fn cancel_queue(ctx: &ServerContext, conn: ConnectionId) {
    let Some(identity) = identity_or_reject(ctx, conn).await else {
        return;
    };
    if let Some(mode) = ctx.matchmaking.cancel(&identity.player_id).await {
        ctx.connections.transition(conn, Location::Queued(mode), Location::Idle).await;
        ctx.connections.send(conn, ServerMessage::QueueCancelled).await;
        debug!(%conn, ?mode, "queue cancelled");
    }
}

async fn surrender(ctx: &ServerContext, conn: ConnectionId) {
    let Some((room, identity)) = current_room(ctx, conn).await else {
        return;
    };
    ctx.rooms.surrender(&room, &identity.player_id).await;
    ctx.connections.transition(conn, Location::Room(room), Location::Idle).await;
    info!(%conn, room = %short_uuid(&room), "player surrendered");
}

// =============================================================================
// LOBBY
// =============================================================================

async fn route_lobby(ctx: &ServerContext, conn: ConnectionId, message: &ClientMessage) -> bool {
    match message {
        ClientMessage::CreateLobby { name, kind, settings } => {
            let settings = settings.unwrap_or(ctx.config.default_settings);
            create_lobby(ctx, conn, name, *kind, settings).await;
        }
        ClientMessage::JoinLobby { lobby_id } => join_lobby(ctx, conn, *lobby_id).await,
        ClientMessage::LeaveLobby => leave_lobby(ctx, conn).await,
        ClientMessage::DeleteLobby => delete_lobby(ctx, conn).await,
        ClientMessage::AddBot { difficulty } => {
            let difficulty = difficulty.unwrap_or(ctx.config.bot_difficulty);
            add_bot(ctx, conn, difficulty).await;
        }
        ClientMessage::RemoveBot { bot_id } => remove_bot(ctx, conn, bot_id).await,
        ClientMessage::StartLobby => start_lobby(ctx, conn).await,
        ClientMessage::RequestLobbyList => {
            if identity_or_reject(ctx, conn).await.is_some() {
                let lobbies = ctx.lobbies.list().await;
                ctx.connections.send(conn, ServerMessage::LobbyList { lobbies }).await;
            }
        }
        _ => return false,
    }
    true
}

async fn create_lobby(ctx: &ServerContext, conn: ConnectionId, name: &str, kind: LobbyKind, settings: MatchSettings) {
    let Some(identity) = identity_or_reject(ctx, conn).await else {
        return;
    };
    if !ensure_live(ctx, conn, &identity).await {
        return;
    }

    let lobby_id = Uuid::new_v4();
    let Some(identity) = claim(ctx, conn, Location::Lobby(lobby_id)).await else {
        return;
    };
    let Some(owner) = member_for(ctx, conn, identity).await else {
        release(ctx, conn, Location::Lobby(lobby_id)).await;
        return;
    };

    match ctx.lobbies.create(lobby_id, owner, name, kind, settings).await {
        Ok(lobby) => {
            ctx.connections.send(conn, ServerMessage::LobbyCreated { lobby: lobby.view() }).await;
        }
        Err(e) => {
            release(ctx, conn, Location::Lobby(lobby_id)).await;
            ctx.connections.send(conn, ServerMessage::lobby_error(e.to_string())).await;
        }
    }
}

async fn join_lobby(ctx: &ServerContext, conn: ConnectionId, lobby_id: Uuid) {
    let Some(identity) = claim(ctx, conn, Location::Lobby(lobby_id)).await else {
        return;
    };
    let Some(member) = member_for(ctx, conn, identity).await else {
        release(ctx, conn, Location::Lobby(lobby_id)).await;
        return;
    };

    match ctx.lobbies.join(&lobby_id, member).await {
        Ok(lobby) => lobby.broadcast(&ServerMessage::LobbyUpdated { lobby: lobby.view() }),
        Err(e) => {
            release(ctx, conn, Location::Lobby(lobby_id)).await;
            ctx.connections.send(conn, ServerMessage::lobby_error(e.to_string())).await;
        }
    }
}

async fn leave_lobby(ctx: &ServerContext, conn: ConnectionId) {
    let Some((lobby_id, identity)) = current_lobby(ctx, conn).await else {
        return;
    };
    let outcome = ctx.lobbies.leave(&lobby_id, &identity.player_id).await;
    ctx.connections.transition(conn, Location::Lobby(lobby_id), Location::Idle).await;

    match outcome {
        Ok(LeaveOutcome::Updated(lobby)) => {
            let update = ServerMessage::LobbyUpdated { lobby: lobby.view() };
            lobby.broadcast(&update);
            ctx.connections.send(conn, update).await;
        }
        Ok(LeaveOutcome::Deleted(_)) => {
            ctx.connections.send(conn, ServerMessage::LobbyDeleted { lobby_id }).await;
        }
        Err(e) => ctx.connections.send(conn, ServerMessage::lobby_error(e.to_string())).await,
    }
}

async fn delete_lobby(ctx: &ServerContext, conn: ConnectionId) {
    let Some((lobby_id, identity)) = current_lobby(ctx, conn).await else {
        return;
    };
    match ctx.lobbies.delete(&lobby_id, &identity.player_id).await {
        Ok(lobby) => {
            for member in lobby.humans() {
                if let Some(member_conn) = member.connection {
                    release(ctx, member_conn, Location::Lobby(lobby_id)).await;
                }
            }
            lobby.broadcast(&ServerMessage::LobbyDeleted { lobby_id });
            info!(lobby = %short_uuid(&lobby_id), "lobby deleted");
        }
        Err(e) => ctx.connections.send(conn, ServerMessage::lobby_error(e.to_string())).await,
    }
}

async fn add_bot(ctx: &ServerContext, conn: ConnectionId, difficulty: Difficulty) {
    let Some((lobby_id, identity)) = current_lobby(ctx, conn).await else {
        return;
    };
    match ctx.lobbies.add_bot(&lobby_id, &identity.player_id, difficulty).await {
        Ok(lobby) => lobby.broadcast(&ServerMessage::LobbyUpdated { lobby: lobby.view() }),
        Err(e) => ctx.connections.send(conn, ServerMessage::lobby_error(e.to_string())).await,
    }
}

async fn remove_bot(ctx: &ServerContext, conn: ConnectionId, bot_id: &str) {
    let Some((lobby_id, identity)) = current_lobby(ctx, conn).await else {
        return;
    };
    let Some(bot) = PlayerId::from_uuid_str(bot_id) else {
        ctx.connections.send(conn, ServerMessage::lobby_error("invalid bot id")).await;
        return;
    };
    match ctx.lobbies.remove_bot(&lobby_id, &identity.player_id, &bot).await {
        Ok(lobby) => lobby.broadcast(&ServerMessage::LobbyUpdated { lobby: lobby.view() }),
        Err(e) => ctx.connections.send(conn, ServerMessage::lobby_error(e.to_string())).await,
    }
}

async fn start_lobby(ctx: &ServerContext, conn: ConnectionId) {
    let Some((lobby_id, identity)) = current_lobby(ctx, conn).await else {
        return;
    };
    if !ensure_live(ctx, conn, &identity).await {
        return;
    }

    let lobby = match ctx.lobbies.take_for_start(&lobby_id, &identity.player_id, ctx.config.bot_difficulty).await {
        Ok(lobby) => lobby,
        Err(e) => {
            ctx.connections.send(conn, ServerMessage::lobby_error(e.to_string())).await;
            return;
        }
    };

    for member in lobby.humans() {
        if let Some(member_conn) = member.connection {
            release(ctx, member_conn, Location::Lobby(lobby_id)).await;
        }
    }

    match lobby.kind {
        LobbyKind::BattleRoyale => start_battle_royale(ctx, lobby).await,
        LobbyKind::Tournament => {
            let failure = lobby.clone();
            if let Err(e) = ctx.tournaments.start_from_lobby(lobby).await {
                warn!(lobby = %short_uuid(&lobby_id), error = %e, "tournament failed to start");
                failure.broadcast(&ServerMessage::lobby_error(e.to_string()));
            }
        }
    }
}

async fn start_battle_royale(ctx: &ServerContext, lobby: Lobby) {
    let entrants = lobby
        .members
        .iter()
        .map(|m| {
            let entrant = Entrant { id: m.id, name: m.name.clone(), is_bot: m.is_bot };
            if m.is_bot {
                RoomEntrant::bot(entrant, m.difficulty)
            } else {
                RoomEntrant {
                    entrant,
                    connection: m.connection,
                    sender: m.sender.clone(),
                    difficulty: m.difficulty,
                }
            }
        })
        .collect();

    if let Err(e) = ctx.rooms.create_room(RoomRequest::new(entrants, lobby.settings)).await {
        warn!(lobby = %short_uuid(&lobby.id), error = %e, "battle royale failed to start");
        lobby.broadcast(&ServerMessage::lobby_error(e.to_string()));
    }
}

// =============================================================================
// FRIENDS
// =============================================================================

async fn route_friend(ctx: &ServerContext, conn: ConnectionId, message: &ClientMessage) -> bool {
    let ClientMessage::FriendListRequest { friend_ids } = message else {
        return false;
    };
    if identity_or_reject(ctx, conn).await.is_none() {
        return true;
    }

    let mut friends = Vec::with_capacity(friend_ids.len());
    for id in friend_ids {
        let status = match PlayerId::from_uuid_str(id) {
            Some(player) => ctx.connections.presence(&player).await,
            None => PresenceStatus::Offline,
        };
        friends.push(FriendPresence { id: id.clone(), status });
    }
    ctx.connections.send(conn, ServerMessage::FriendList { friends }).await;
    true
}

// =============================================================================
// HELPERS
// =============================================================================

async fn identity_or_reject(ctx: &ServerContext, conn: ConnectionId) -> Option<Identity> {
    match ctx.connections.require_identity(conn).await {
        Ok(identity) => Some(identity),
        Err(e) => {
            ctx.connections.send(conn, e.to_message()).await;
            None
        }
    }
}

async fn claim(ctx: &ServerContext, conn: ConnectionId, target: Location) -> Option<Identity> {
    match ctx.connections.try_claim(conn, target).await {
        Ok(identity) => Some(identity),
        Err(e) => {
            debug!(%conn, ?target, error = %e, "claim rejected");
            ctx.connections.send(conn, e.to_message()).await;
            None
        }
    }
}

/// Return a connection to idle after a failed start.
async fn release(ctx: &ServerContext, conn: ConnectionId, from: Location) {
    ctx.connections.transition(conn, from, Location::Idle).await;
    if matches!(from, Location::Queued(_)) {
        ctx.connections
            .send(conn, ServerMessage::error(ErrorCode::InternalError, "match could not be started"))
            .await;
    }
}

async fn ensure_live(ctx: &ServerContext, conn: ConnectionId, identity: &Identity) -> bool {
    if ctx.identities.is_live(identity) {
        return true;
    }
    ctx.connections
        .send(conn, ServerMessage::SessionExpired { reason: "session is no longer valid".into() })
        .await;
    false
}

async fn current_room(ctx: &ServerContext, conn: ConnectionId) -> Option<(Uuid, Identity)> {
    match ctx.connections.location(conn).await? {
        Location::Room(room) => Some((room, ctx.connections.identity(conn).await?)),
        _ => None,
    }
}

async fn current_lobby(ctx: &ServerContext, conn: ConnectionId) -> Option<(Uuid, Identity)> {
    let identity = identity_or_reject(ctx, conn).await?;
    match ctx.connections.location(conn).await {
        Some(Location::Lobby(lobby)) => Some((lobby, identity)),
        _ => {
            ctx.connections.send(conn, ServerMessage::lobby_error("not in a lobby")).await;
            None
        }
    }
}

async fn member_for(ctx: &ServerContext, conn: ConnectionId, identity: Identity) -> Option<LobbyMember> {
    let sender = ctx.connections.sender_of(&identity.player_id).await?;
    Some(LobbyMember::human(identity.player_id, identity.name, conn, sender))
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::auth::GuestIdentityStore;
    use crate::network::persistence::MemoryResultSink;
    use crate::network::server::ServerConfig;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn context() -> ServerContext {
        let config = ServerConfig { tick_rate: 240, ..ServerConfig::default() };
        ServerContext::new(config, Arc::new(GuestIdentityStore), Arc::new(MemoryResultSink::new()))
    }

    async fn connect(ctx: &ServerContext, token: &str) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        let (tx, mut rx) = mpsc::channel(8192);
        let (conn, _) = ctx.connections.register(tx).await;
        dispatch(ctx, conn, &ClientMessage::Authenticate { token: token.into() }).await;
        assert!(matches!(rx.try_recv(), Ok(ServerMessage::Authenticated { .. })));
        (conn, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message);
        }
        out
    }

    #[tokio::test]
    async fn test_unauthenticated_is_rejected() {
        let ctx = context();
        let (tx, mut rx) = mpsc::channel(8);
        let (conn, _) = ctx.connections.register(tx).await;
        dispatch(&ctx, conn, &ClientMessage::JoinQuick).await;
        assert!(matches!(
            rx.try_recv(),
            Ok(ServerMessage::Error(ref e)) if e.code == ErrorCode::NotAuthenticated
        ));
    }

    #[tokio::test]
    async fn test_quick_match_pairs_two_players() {
        let ctx = context();
        let (a, mut rx_a) = connect(&ctx, "alice:a").await;
        let (b, mut rx_b) = connect(&ctx, "bob:b").await;

        dispatch(&ctx, a, &ClientMessage::JoinQuick).await;
        let first = drain(&mut rx_a);
        assert!(first.contains(&ServerMessage::Waiting { mode: QueueMode::Quick }));
        assert!(first.contains(&ServerMessage::PlayerJoinedCount { count: 1, needed: 2 }));

        // Second join while queued is refused.
        dispatch(&ctx, a, &ClientMessage::JoinQuickCustom).await;
        assert_eq!(drain(&mut rx_a), vec![ServerMessage::AlreadyInGame]);

        dispatch(&ctx, b, &ClientMessage::JoinQuick).await;
        assert!(drain(&mut rx_b).iter().any(|m| matches!(m, ServerMessage::MatchStart(_))));
        assert!(matches!(ctx.connections.location(a).await, Some(Location::Room(_))));
        assert_eq!(ctx.rooms.room_count().await, 1);
        assert_eq!(ctx.matchmaking.total().await, 0);
        ctx.rooms.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_cancel_queue() {
        let ctx = context();
        let (a, mut rx) = connect(&ctx, "a").await;
        dispatch(&ctx, a, &ClientMessage::JoinQuickCustom).await;
        drain(&mut rx);

        dispatch(&ctx, a, &ClientMessage::CancelQueue).await;
        assert_eq!(drain(&mut rx), vec![ServerMessage::QueueCancelled]);
        assert_eq!(ctx.connections.location(a).await, Some(Location::Idle));
        assert_eq!(ctx.matchmaking.total().await, 0);
    }

    #[tokio::test]
    async fn test_vs_bot_and_surrender() {
        let ctx = context();
        let (a, mut rx) = connect(&ctx, "solo").await;
        dispatch(&ctx, a, &ClientMessage::JoinVsBot { difficulty: Some(Difficulty::Easy), custom: true }).await;
        let start = drain(&mut rx)
            .into_iter()
            .find_map(|m| match m {
                ServerMessage::MatchStart(info) => Some(info),
                _ => None,
            })
            .expect("match start");
        assert!(start.custom);
        assert_eq!(start.names[1], "Bot");

        dispatch(&ctx, a, &ClientMessage::Surrender).await;
        assert_eq!(ctx.connections.location(a).await, Some(Location::Idle));

        for _ in 0..200 {
            if ctx.rooms.room_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(ctx.rooms.room_count().await, 0);
        assert!(drain(&mut rx).iter().any(|m| matches!(m, ServerMessage::MatchOver(_))));
    }

    #[tokio::test]
    async fn test_lobby_flow() {
        let ctx = context();
        let (owner, mut rx_owner) = connect(&ctx, "owner:o").await;
        let (guest, mut rx_guest) = connect(&ctx, "guest:g").await;

        dispatch(&ctx, owner, &ClientMessage::CreateLobby {
            name: "arena".into(),
            kind: LobbyKind::BattleRoyale,
            settings: None,
        })
        .await;
        let lobby_id = match drain(&mut rx_owner).pop() {
            Some(ServerMessage::LobbyCreated { lobby }) => lobby.id,
            other => panic!("expected lobby_created, got {other:?}"),
        };

        // Creating a second lobby while in one is refused.
        dispatch(&ctx, owner, &ClientMessage::CreateLobby {
            name: "again".into(),
            kind: LobbyKind::BattleRoyale,
            settings: None,
        })
        .await;
        assert_eq!(drain(&mut rx_owner), vec![ServerMessage::AlreadyInLobby]);

        // Only the owner may start.
        dispatch(&ctx, guest, &ClientMessage::JoinLobby { lobby_id }).await;
        drain(&mut rx_owner);
        dispatch(&ctx, guest, &ClientMessage::StartLobby).await;
        assert!(matches!(drain(&mut rx_guest).pop(), Some(ServerMessage::LobbyError { .. })));

        dispatch(&ctx, owner, &ClientMessage::AddBot { difficulty: None }).await;
        dispatch(&ctx, owner, &ClientMessage::StartLobby).await;
        assert!(drain(&mut rx_guest).iter().any(|m| matches!(m, ServerMessage::MatchStart(_))));
        assert!(matches!(ctx.connections.location(guest).await, Some(Location::Room(_))));
        assert!(ctx.lobbies.is_empty().await);
        ctx.rooms.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_owner_delete_frees_members() {
        let ctx = context();
        let (owner, mut rx_owner) = connect(&ctx, "owner:o").await;
        let (guest, mut rx_guest) = connect(&ctx, "guest:g").await;

        dispatch(&ctx, owner, &ClientMessage::CreateLobby {
            name: "cup".into(),
            kind: LobbyKind::Tournament,
            settings: None,
        })
        .await;
        let Some(ServerMessage::LobbyCreated { lobby }) = drain(&mut rx_owner).pop() else {
            panic!("lobby not created");
        };
        dispatch(&ctx, guest, &ClientMessage::JoinLobby { lobby_id: lobby.id }).await;
        dispatch(&ctx, owner, &ClientMessage::DeleteLobby).await;

        assert!(drain(&mut rx_guest).contains(&ServerMessage::LobbyDeleted { lobby_id: lobby.id }));
        assert_eq!(ctx.connections.location(guest).await, Some(Location::Idle));
        assert_eq!(ctx.connections.location(owner).await, Some(Location::Idle));
    }

    #[tokio::test]
    async fn test_duplicate_identity_and_force_disconnect() {
        let ctx = context();
        let (first, mut rx_first) = connect(&ctx, "same").await;
        dispatch(&ctx, first, &ClientMessage::JoinQuick).await;
        drain(&mut rx_first);

        let (tx, mut rx_second) = mpsc::channel(64);
        let (second, _) = ctx.connections.register(tx).await;
        dispatch(&ctx, second, &ClientMessage::Authenticate { token: "same".into() }).await;
        assert_eq!(drain(&mut rx_second), vec![ServerMessage::AlreadyConnected]);

        dispatch(&ctx, second, &ClientMessage::ForceDisconnect { token: "same".into() }).await;
        assert!(matches!(drain(&mut rx_second).pop(), Some(ServerMessage::Authenticated { .. })));
        assert!(drain(&mut rx_first).contains(&ServerMessage::AlreadyConnected));
        assert_eq!(ctx.matchmaking.total().await, 0);
        assert_eq!(ctx.connections.len().await, 1);
    }

    #[tokio::test]
    async fn test_friend_presence() {
        let ctx = context();
        let (a, mut rx) = connect(&ctx, "a").await;
        let (b, _rx_b) = connect(&ctx, "b").await;
        let b_id = ctx.connections.identity(b).await.map(|i| i.player_id.to_uuid_string()).unwrap_or_default();

        dispatch(&ctx, a, &ClientMessage::FriendListRequest {
            friend_ids: vec![b_id.clone(), Uuid::new_v4().to_string(), "nonsense".into()],
        })
        .await;
        let Some(ServerMessage::FriendList { friends }) = drain(&mut rx).pop() else {
            panic!("no friend list");
        };
        assert_eq!(friends[0], FriendPresence { id: b_id, status: PresenceStatus::Online });
        assert_eq!(friends[1].status, PresenceStatus::Offline);
        assert_eq!(friends[2].status, PresenceStatus::Offline);
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let ctx = context();
        let (a, mut rx) = connect(&ctx, "a").await;
        dispatch(&ctx, a, &ClientMessage::Ping { timestamp: 7 }).await;
        match drain(&mut rx).pop() {
            Some(ServerMessage::Pong { timestamp, server_time }) => {
                assert_eq!(timestamp, 7);
                assert!(server_time > 7);
            }
            other => panic!("expected pong, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_disconnect_leaves_lobby() {
        let ctx = context();
        let (owner, mut rx_owner) = connect(&ctx, "owner:o").await;
        let (guest, _rx_guest) = connect(&ctx, "guest:g").await;
        dispatch(&ctx, owner, &ClientMessage::CreateLobby {
            name: "x".into(),
            kind: LobbyKind::BattleRoyale,
            settings: None,
        })
        .await;
        let Some(ServerMessage::LobbyCreated { lobby }) = drain(&mut rx_owner).pop() else {
            panic!("lobby not created");
        };
        dispatch(&ctx, guest, &ClientMessage::JoinLobby { lobby_id: lobby.id }).await;
        drain(&mut rx_owner);

        assert!(disconnect(&ctx, guest).await.is_some());
        assert!(disconnect(&ctx, guest).await.is_none());
        let remaining = ctx.lobbies.get(&lobby.id).await.expect("lobby kept");
        assert_eq!(remaining.members.len(), 1);
        assert!(matches!(drain(&mut rx_owner).pop(), Some(ServerMessage::LobbyUpdated { .. })));
    }
}
