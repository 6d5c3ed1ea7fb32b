//! Tournament Director
//!
//! Glue between the bracket and the room manager. It turns a started lobby
//! into a tournament, opens a room for every launchable bracket match, and
//! feeds room results back into the bracket. Every bracket mutation happens
//! under that tournament's lock, so only one advancement is ever in flight.

use futures_util::future::{BoxFuture, FutureExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::ai::Difficulty;
use crate::game::config::MatchSettings;
use crate::game::state::{Entrant, PlayerId};
use crate::network::connection::ConnectionArena;
use crate::network::lobby::Lobby;
use crate::network::persistence::short_uuid;
use crate::network::protocol::ServerMessage;
use crate::network::room::{RoomEntrant, RoomOutcome, TournamentLink};
use crate::network::session::{RoomManager, RoomRequest};
use crate::tournament::{
    MatchTicket, Progress, Tournament, TournamentEntrant, TournamentError, TournamentId,
    TournamentRegistry, Withdrawal,
};

/// Per-tournament match parameters.
#[derive(Debug, Clone)]
struct TournamentPlan {
    settings: MatchSettings,
    difficulties: BTreeMap<PlayerId, Difficulty>,
}

/// Runs tournaments on top of the room manager.
pub struct TournamentDirector {
    registry: TournamentRegistry,
    plans: RwLock<BTreeMap<TournamentId, TournamentPlan>>,
    rooms: Arc<RoomManager>,
    connections: Arc<ConnectionArena>,
}

impl TournamentDirector {
    /// Director over the given rooms and connections.
    pub fn new(rooms: Arc<RoomManager>, connections: Arc<ConnectionArena>) -> Self {
        Self {
            registry: TournamentRegistry::new(),
            plans: RwLock::new(BTreeMap::new()),
            rooms,
            connections,
        }
    }

    /// Underlying registry.
    pub fn registry(&self) -> &TournamentRegistry {
        &self.registry
    }

    /// Create, fill and start a tournament from a lobby roster.
    pub async fn start_from_lobby(self: &Arc<Self>, lobby: Lobby) -> Result<TournamentId, TournamentError> {
        let handle = self.registry.create(lobby.name.clone(), lobby.members.len()).await?;
        let mut tournament = handle.lock().await;
        let id = tournament.id();

        let started = Self::fill_and_start(&mut tournament, &lobby);
        let progress = match started {
            Ok(progress) => progress,
            Err(e) => {
                drop(tournament);
                self.forget(id).await;
                return Err(e);
            }
        };

        let plan = TournamentPlan {
            settings: lobby.settings,
            difficulties: lobby
                .members
                .iter()
                .filter(|m| m.is_bot)
                .map(|m| (m.id, m.difficulty))
                .collect(),
        };
        self.plans.write().await.insert(id, plan);

        for human in tournament.humans() {
            self.connections.set_tournament(&human.id, Some(id)).await;
        }

        info!(tournament = %short_uuid(&id), lobby = %short_uuid(&lobby.id), "tournament opened from lobby");
        self.handle_progress(&tournament, progress).await;
        Ok(id)
    }

    fn fill_and_start(tournament: &mut Tournament, lobby: &Lobby) -> Result<Progress, TournamentError> {
        for member in &lobby.members {
            tournament.register(TournamentEntrant {
                id: member.id,
                name: member.name.clone(),
                is_bot: member.is_bot,
            })?;
        }
        tournament.start()
    }

    /// A registered player left the server.
    pub async fn withdraw(self: &Arc<Self>, id: TournamentId, player: PlayerId) {
        let Some(handle) = self.registry.get(&id).await else {
            return;
        };
        let mut tournament = handle.lock().await;
        match tournament.withdraw(player) {
            // The room's forfeit reports the loss through the normal path.
            Withdrawal::InMatch(match_id) => {
                debug!(tournament = %short_uuid(&id), match_id, "withdrawal mid-match");
            }
            Withdrawal::Eliminated => self.broadcast_update(&tournament).await,
            Withdrawal::NotParticipating => {}
        }
    }

    fn on_room_complete(self: Arc<Self>, id: TournamentId, outcome: RoomOutcome) -> BoxFuture<'static, ()> {
        async move {
            let Some(link) = outcome.tournament else {
                return;
            };
            let Some(winner) = outcome.winner.or_else(|| outcome.placements.first().map(|(p, _)| *p)) else {
                warn!(tournament = %short_uuid(&id), match_id = link.match_id, "bracket room ended without a winner");
                return;
            };
            let Some(handle) = self.registry.get(&id).await else {
                return;
            };
            let mut tournament = handle.lock().await;
            match tournament.on_match_complete(link.match_id, winner, outcome.forfeit) {
                Ok(progress) => {
                    // Eliminated humans are free to play elsewhere.
                    for (player, _) in outcome.placements.iter().filter(|(p, _)| *p != winner) {
                        self.connections.clear_tournament(player, id).await;
                    }
                    self.handle_progress(&tournament, progress).await
                }
                Err(e) => warn!(tournament = %short_uuid(&id), match_id = link.match_id, error = %e, "bracket result rejected"),
            }
        }
        .boxed()
    }

    async fn handle_progress(self: &Arc<Self>, tournament: &Tournament, progress: Progress) {
        match progress {
            Progress::Launch(tickets) => {
                self.broadcast_update(tournament).await;
                for ticket in tickets {
                    self.launch(tournament, ticket).await;
                }
            }
            Progress::Waiting => self.broadcast_update(tournament).await,
            Progress::Champion(champion) => {
                let id = tournament.id();
                let message = ServerMessage::TournamentComplete {
                    tournament_id: id,
                    champion: champion.and_then(|c| tournament.entrant(&c)).map(|e| e.name.clone()),
                };
                self.broadcast_update(tournament).await;
                for human in tournament.humans() {
                    self.connections.send_to_player(&human.id, message.clone()).await;
                    self.connections.clear_tournament(&human.id, id).await;
                }
                self.forget(id).await;
            }
        }
    }

    async fn launch(self: &Arc<Self>, tournament: &Tournament, ticket: MatchTicket) {
        let id = tournament.id();
        let plan = self.plans.read().await.get(&id).cloned();
        let Some(plan) = plan else {
            warn!(tournament = %short_uuid(&id), "no plan for tournament");
            return;
        };

        let mut entrants = Vec::with_capacity(2);
        for player in [ticket.player1, ticket.player2] {
            let Some(entrant) = tournament.entrant(&player) else {
                warn!(tournament = %short_uuid(&id), player = %player.short(), "ticket names unknown player");
                return;
            };
            let seat = if entrant.is_bot {
                let difficulty = plan.difficulties.get(&player).copied().unwrap_or_default();
                RoomEntrant::bot(Entrant { id: player, name: entrant.name.clone(), is_bot: true }, difficulty)
            } else {
                RoomEntrant {
                    entrant: Entrant::human(player, entrant.name.clone()),
                    connection: self.connections.connection_of(&player).await,
                    sender: self.connections.sender_of(&player).await,
                    difficulty: Difficulty::default(),
                }
            };
            entrants.push(seat);
        }

        let director = Arc::clone(self);
        let request = RoomRequest {
            entrants,
            settings: plan.settings,
            tournament: Some(TournamentLink { tournament_id: id, match_id: ticket.match_id, is_final: ticket.is_final }),
            on_complete: Some(Box::new(move |outcome| {
                tokio::spawn(director.on_room_complete(id, outcome));
            })),
        };

        match self.rooms.create_room(request).await {
            Ok(room) => debug!(
                tournament = %short_uuid(&id),
                match_id = ticket.match_id,
                round = ticket.round,
                room = %short_uuid(&room),
                "bracket match launched"
            ),
            Err(e) => warn!(tournament = %short_uuid(&id), match_id = ticket.match_id, error = %e, "bracket room failed"),
        }
    }

    async fn broadcast_update(&self, tournament: &Tournament) {
        let message = ServerMessage::TournamentUpdate { tournament: tournament.view() };
        for human in tournament.humans() {
            self.connections.send_to_player(&human.id, message.clone()).await;
        }
    }

    async fn forget(&self, id: TournamentId) {
        self.plans.write().await.remove(&id);
        self.registry.remove(&id).await;
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::connection::{DuplicatePolicy, Identity, Location};
    use crate::network::lobby::{LobbyKind, LobbyMember};
    use crate::network::persistence::MemoryResultSink;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    struct Harness {
        director: Arc<TournamentDirector>,
        connections: Arc<ConnectionArena>,
        sink: Arc<MemoryResultSink>,
    }

    fn harness() -> Harness {
        let connections = Arc::new(ConnectionArena::new());
        let sink = Arc::new(MemoryResultSink::new());
        let rooms = Arc::new(RoomManager::new(Arc::clone(&connections), sink.clone(), 240));
        let director = Arc::new(TournamentDirector::new(rooms, Arc::clone(&connections)));
        Harness { director, connections, sink }
    }

    async fn human(h: &Harness, n: u8) -> (LobbyMember, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(8192);
        let (conn, _) = h.connections.register(tx.clone()).await;
        let id = PlayerId::new([n; 16]);
        let identity = Identity { player_id: id, name: format!("p{n}"), token: String::new() };
        h.connections.bind_identity(conn, identity, DuplicatePolicy::Reject).await.unwrap();
        (LobbyMember::human(id, format!("p{n}"), conn, tx), rx)
    }

    fn lobby(members: Vec<LobbyMember>) -> Lobby {
        Lobby {
            id: Uuid::new_v4(),
            name: "cup".into(),
            kind: LobbyKind::Tournament,
            owner: members[0].id,
            members,
            settings: MatchSettings::default(),
        }
    }

    async fn room_of(h: &Harness, n: u8) -> Option<Uuid> {
        for _ in 0..200 {
            let conn = h.connections.connection_of(&PlayerId::new([n; 16])).await?;
            if let Some(Location::Room(id)) = h.connections.location(conn).await {
                return Some(id);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        None
    }

    async fn wait_for_completion(h: &Harness) {
        for _ in 0..400 {
            if h.director.registry().is_empty().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn champion_in(rx: &mut mpsc::Receiver<ServerMessage>) -> Option<Option<String>> {
        let mut found = None;
        while let Ok(message) = rx.try_recv() {
            if let ServerMessage::TournamentComplete { champion, .. } = message {
                found = Some(champion);
            }
        }
        found
    }

    #[tokio::test]
    async fn test_two_player_tournament_decided_by_disconnect() {
        let h = harness();
        let (a, _rx_a) = human(&h, 1).await;
        let (b, mut rx_b) = human(&h, 2).await;
        let conn_a = a.connection.unwrap();

        let id = h.director.start_from_lobby(lobby(vec![a, b])).await.unwrap();
        assert_eq!(h.connections.tournament(conn_a).await, Some(id));

        let room = room_of(&h, 1).await.expect("final room");
        h.director.rooms.disconnect(&room, &PlayerId::new([1; 16])).await;
        h.director.withdraw(id, PlayerId::new([1; 16])).await;

        wait_for_completion(&h).await;
        assert!(h.director.registry().is_empty().await);
        assert_eq!(champion_in(&mut rx_b), Some(Some("p2".to_string())));

        let records = h.sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tournament_id, Some(id));
        assert!(records[0].forfeit);
    }

    #[tokio::test]
    async fn test_bots_finish_after_human_surrenders() {
        let h = harness();
        let (a, mut rx_a) = human(&h, 1).await;
        let bots = (0..3).map(|i| LobbyMember::bot(format!("Bot {i}"), Difficulty::Easy));
        let members = std::iter::once(a).chain(bots).collect();

        h.director.start_from_lobby(lobby(members)).await.unwrap();
        let room = room_of(&h, 1).await.expect("human match");
        h.director.rooms.surrender(&room, &PlayerId::new([1; 16])).await;

        wait_for_completion(&h).await;
        let champion = champion_in(&mut rx_a).expect("tournament complete").expect("named champion");
        assert!(champion.starts_with("Bot"));
    }

    #[tokio::test]
    async fn test_invalid_capacity_fails_before_rooms() {
        let h = harness();
        let (a, _rx) = human(&h, 1).await;
        let members = vec![a, LobbyMember::bot("Bot 1", Difficulty::Easy), LobbyMember::bot("Bot 2", Difficulty::Easy)];
        let err = h.director.start_from_lobby(lobby(members)).await.unwrap_err();
        assert!(matches!(err, TournamentError::InvalidCapacity(3)));
        assert!(h.director.registry().is_empty().await);
        assert_eq!(h.director.rooms.room_count().await, 0);
    }
}
