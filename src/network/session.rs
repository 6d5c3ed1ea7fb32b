//! Room Orchestration
//!
//! The [`RoomManager`] creates rooms, runs one fixed-interval tick task per
//! room, routes input and disconnects to the right room, and tears rooms
//! down when they finish. Rooms never share a lock; the registry lock is only
//! held for insert, lookup and removal.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::game::config::MatchSettings;
use crate::game::input::InputFrame;
use crate::game::state::PlayerId;
use crate::network::connection::{ConnectionArena, Location};
use crate::network::persistence::{short_uuid, ResultSink};
use crate::network::room::{CompletionHook, GameRoom, RoomEntrant, RoomError, RoomHandle, TournamentLink};

/// Everything needed to open a room.
pub struct RoomRequest {
    /// Seats in side order.
    pub entrants: Vec<RoomEntrant>,
    /// Match settings.
    pub settings: MatchSettings,
    /// Bracket match, if any.
    pub tournament: Option<TournamentLink>,
    /// Called once when the room finishes.
    pub on_complete: Option<CompletionHook>,
}

impl RoomRequest {
    /// Request without tournament or hook.
    pub fn new(entrants: Vec<RoomEntrant>, settings: MatchSettings) -> Self {
        Self { entrants, settings, tournament: None, on_complete: None }
    }
}

/// Registry of running rooms.
pub struct RoomManager {
    rooms: Arc<RwLock<BTreeMap<Uuid, RoomHandle>>>,
    connections: Arc<ConnectionArena>,
    results: Arc<dyn ResultSink>,
    tick_period: Duration,
}

impl RoomManager {
    /// Create a manager ticking rooms at `tick_rate` Hz.
    pub fn new(connections: Arc<ConnectionArena>, results: Arc<dyn ResultSink>, tick_rate: u32) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(BTreeMap::new())),
            connections,
            results,
            tick_period: Duration::from_micros(1_000_000 / u64::from(tick_rate.max(1))),
        }
    }

    /// Open a room, announce it, and start its tick task.
    #[instrument(skip_all, fields(players = request.entrants.len()))]
    pub async fn create_room(&self, request: RoomRequest) -> Result<Uuid, RoomError> {
        let id = Uuid::new_v4();
        let mut room = GameRoom::new(
            id,
            request.entrants,
            request.settings,
            request.tournament,
            Arc::clone(&self.results),
        )?;
        if let Some(hook) = request.on_complete {
            room.set_on_complete(hook);
        }

        room.announce();
        let handle = RoomHandle::new(room);
        self.rooms.write().await.insert(id, handle.clone());

        // Anyone who vanished between pairing and now forfeits at once.
        let humans = handle.lock().await.humans();
        for (player, connection) in humans {
            let present = match connection {
                Some(conn) => self.connections.set_location(conn, Location::Room(id)).await,
                None => false,
            };
            if !present {
                debug!(room = %short_uuid(&id), player = %player.short(), "entrant gone before start");
                handle.lock().await.disconnect(&player);
            }
        }

        info!(room = %short_uuid(&id), "room created");
        spawn_room_loop(handle, Arc::clone(&self.rooms), Arc::clone(&self.connections), self.tick_period);
        Ok(id)
    }

    /// Handle of a running room.
    pub async fn get(&self, id: &Uuid) -> Option<RoomHandle> {
        self.rooms.read().await.get(id).cloned()
    }

    /// Store input for a player. Returns false if the room or seat is gone.
    pub async fn input(&self, id: &Uuid, player: &PlayerId, frame: InputFrame) -> bool {
        match self.get(id).await {
            Some(handle) => handle.lock().await.store_input(player, frame),
            None => false,
        }
    }

    /// Drop a player's connection from a room.
    pub async fn disconnect(&self, id: &Uuid, player: &PlayerId) {
        if let Some(handle) = self.get(id).await {
            handle.lock().await.disconnect(player);
        }
    }

    /// A player gives up.
    pub async fn surrender(&self, id: &Uuid, player: &PlayerId) {
        if let Some(handle) = self.get(id).await {
            handle.lock().await.surrender(player);
        }
    }

    /// Record a ping sample on the player's seat.
    pub async fn record_ping(&self, id: &Uuid, player: &PlayerId, ping_ms: u64) {
        if let Some(handle) = self.get(id).await {
            handle.lock().await.record_ping(player, ping_ms);
        }
    }

    /// Running room count.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Stop every tick task.
    pub async fn shutdown_all(&self) {
        for handle in self.rooms.read().await.values() {
            handle.request_shutdown();
        }
    }
}

/// Spawn the tick task for a room.
pub fn spawn_room_loop(
    handle: RoomHandle,
    rooms: Arc<RwLock<BTreeMap<Uuid, RoomHandle>>>,
    connections: Arc<ConnectionArena>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        run_room_loop(&handle, period).await;
        release_room(&handle, &rooms, &connections).await;
    })
}

/// Tick a room until it finishes or shutdown is requested.
async fn run_room_loop(handle: &RoomHandle, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last = Instant::now();

    loop {
        ticker.tick().await;

        if handle.should_shutdown() {
            break;
        }

        let now = Instant::now();
        let elapsed = now.duration_since(last).as_secs_f64();
        last = now;

        if handle.step(elapsed).await {
            break;
        }
    }
}

/// Remove a room and send its humans back to idle.
async fn release_room(
    handle: &RoomHandle,
    rooms: &RwLock<BTreeMap<Uuid, RoomHandle>>,
    connections: &ConnectionArena,
) {
    let id = handle.id();
    rooms.write().await.remove(&id);
    let humans = handle.lock().await.humans();
    for connection in humans.into_iter().filter_map(|(_, c)| c) {
        // A player already moved into their next room keeps that location.
        connections.transition(connection, Location::Room(id), Location::Idle).await;
    }
    info!(room = %short_uuid(&id), "room torn down");
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::Difficulty;
    use crate::game::state::Entrant;
    use crate::network::connection::{DuplicatePolicy, Identity};
    use crate::network::persistence::MemoryResultSink;
    use crate::network::protocol::ServerMessage;
    use tokio::sync::mpsc;

    struct Harness {
        manager: RoomManager,
        connections: Arc<ConnectionArena>,
        sink: Arc<MemoryResultSink>,
    }

    fn harness() -> Harness {
        let connections = Arc::new(ConnectionArena::new());
        let sink = Arc::new(MemoryResultSink::new());
        let manager = RoomManager::new(Arc::clone(&connections), sink.clone(), 240);
        Harness { manager, connections, sink }
    }

    async fn join(h: &Harness, n: u8) -> (RoomEntrant, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(4096);
        let (conn, _) = h.connections.register(tx.clone()).await;
        let id = PlayerId::new([n; 16]);
        let identity = Identity { player_id: id, name: format!("p{n}"), token: String::new() };
        h.connections.bind_identity(conn, identity, DuplicatePolicy::Reject).await.unwrap();
        (RoomEntrant::human(Entrant::human(id, format!("p{n}")), conn, tx), rx)
    }

    #[tokio::test]
    async fn test_room_lifecycle_with_disconnect() {
        let h = harness();
        let (a, _rx_a) = join(&h, 1).await;
        let (b, mut rx_b) = join(&h, 2).await;
        let conn_b = b.connection.unwrap();

        let id = h
            .manager
            .create_room(RoomRequest::new(vec![a, b], MatchSettings::default()))
            .await
            .unwrap();
        assert_eq!(h.manager.room_count().await, 1);
        assert_eq!(h.connections.location(conn_b).await, Some(Location::Room(id)));
        assert!(h.manager.input(&id, &PlayerId::new([2; 16]), InputFrame::with_direction(-1)).await);

        h.manager.disconnect(&id, &PlayerId::new([1; 16])).await;

        // Tick task notices the finished room and tears it down.
        for _ in 0..100 {
            if h.manager.room_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(h.manager.room_count().await, 0);
        assert_eq!(h.connections.location(conn_b).await, Some(Location::Idle));

        let mut saw_over = false;
        while let Ok(message) = rx_b.try_recv() {
            if let ServerMessage::MatchOver(info) = message {
                assert!(info.forfeit);
                assert_eq!(info.winner.as_deref(), Some("p2"));
                saw_over = true;
            }
        }
        assert!(saw_over);
        assert_eq!(h.sink.records().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_connection_forfeits_at_start() {
        let h = harness();
        let (a, _rx) = join(&h, 1).await;
        let (b, _rx_b) = join(&h, 2).await;
        h.connections.remove(b.connection.unwrap()).await;

        h.manager
            .create_room(RoomRequest::new(vec![a, b], MatchSettings::default()))
            .await
            .unwrap();
        for _ in 0..100 {
            if h.manager.room_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(h.manager.room_count().await, 0);
        let records = h.sink.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].forfeit);
    }

    #[tokio::test]
    async fn test_shutdown_stops_rooms() {
        let h = harness();
        let (a, _rx) = join(&h, 1).await;
        let bot = RoomEntrant::bot(Entrant::bot("bot"), Difficulty::Easy);
        h.manager
            .create_room(RoomRequest::new(vec![a, bot], MatchSettings::default()))
            .await
            .unwrap();
        h.manager.shutdown_all().await;
        for _ in 0..100 {
            if h.manager.room_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(h.manager.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_settings_rejected_before_room_exists() {
        let h = harness();
        let (a, _rx) = join(&h, 1).await;
        let (b, _rx_b) = join(&h, 2).await;
        let settings = MatchSettings { lives: 0, ..MatchSettings::default() };
        let err = h.manager.create_room(RoomRequest::new(vec![a, b], settings)).await.unwrap_err();
        assert!(matches!(err, RoomError::Settings(_)));
        assert_eq!(h.manager.room_count().await, 0);
    }
}
