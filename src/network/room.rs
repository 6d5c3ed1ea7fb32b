//! Game Rooms
//!
//! A room owns one [`MatchState`], an input latch per seat, and a [`Bot`] for
//! each AI seat. The tick loop calls [`GameRoom::step`]; socket handlers call
//! [`GameRoom::store_input`], [`GameRoom::disconnect`] and
//! [`GameRoom::surrender`]. Both paths can end the room, and ending it twice
//! is a no-op.
//!
//! Classic 1v1 and Battle Royale share this type. The arena shape follows the
//! roster size.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use crate::ai::{Bot, Difficulty};
use crate::core::rng::derive_room_seed;
use crate::game::arena::ArenaError;
use crate::game::config::{MatchSettings, SettingsError, MAX_PARTICIPANTS};
use crate::game::events::GameEventData;
use crate::game::input::{InputFrame, InputLatch};
use crate::game::state::{Entrant, MatchState, PlayerId};
use crate::game::tick::{forfeit, tick};
use crate::network::connection::ConnectionId;
use crate::network::persistence::{short_uuid, MatchRecord, RecordEntry, ResultSink};
use crate::network::protocol::{ArenaView, MatchOverInfo, MatchStartInfo, ServerMessage, StateSnapshot};
use crate::tournament::TournamentId;

/// Room construction errors.
#[derive(Debug, Error)]
pub enum RoomError {
    /// Roster size outside 2..=16.
    #[error("a room needs 2 to {max} participants, got {0}", max = MAX_PARTICIPANTS)]
    RosterSize(usize),
    /// Settings rejected.
    #[error("invalid settings: {0}")]
    Settings(#[from] SettingsError),
    /// Arena could not be built.
    #[error("arena: {0}")]
    Arena(#[from] ArenaError),
}

/// One seat at room creation.
#[derive(Debug, Clone)]
pub struct RoomEntrant {
    /// Who sits here.
    pub entrant: Entrant,
    /// Live connection, for humans.
    pub connection: Option<ConnectionId>,
    /// Outbound channel, for humans.
    pub sender: Option<mpsc::Sender<ServerMessage>>,
    /// AI difficulty, for bots.
    pub difficulty: Difficulty,
}

impl RoomEntrant {
    /// Human seat.
    pub fn human(entrant: Entrant, connection: ConnectionId, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self { entrant, connection: Some(connection), sender: Some(sender), difficulty: Difficulty::default() }
    }

    /// Bot seat.
    pub fn bot(entrant: Entrant, difficulty: Difficulty) -> Self {
        Self { entrant, connection: None, sender: None, difficulty }
    }
}

/// Back-reference to the bracket match a room fulfills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TournamentLink {
    /// Tournament.
    pub tournament_id: TournamentId,
    /// Bracket match id.
    pub match_id: u32,
    /// Whether this is the final.
    pub is_final: bool,
}

/// Result handed to the completion hook.
#[derive(Debug, Clone)]
pub struct RoomOutcome {
    /// Room id.
    pub room_id: Uuid,
    /// Winner, if any.
    pub winner: Option<PlayerId>,
    /// Placements, best first.
    pub placements: Vec<(PlayerId, u8)>,
    /// Decided by disconnect or surrender.
    pub forfeit: bool,
    /// Bracket match, if any.
    pub tournament: Option<TournamentLink>,
}

/// Called once when a room finishes.
pub type CompletionHook = Box<dyn FnOnce(RoomOutcome) + Send>;

struct Seat {
    connection: Option<ConnectionId>,
    sender: Option<mpsc::Sender<ServerMessage>>,
    latch: InputLatch,
    bot: Option<Bot>,
    ping_ms: Option<u64>,
}

/// A running match.
pub struct GameRoom {
    id: Uuid,
    state: MatchState,
    seats: Vec<Seat>,
    tournament: Option<TournamentLink>,
    finished: bool,
    geometry_dirty: bool,
    on_complete: Option<CompletionHook>,
    results: Arc<dyn ResultSink>,
}

impl GameRoom {
    /// Build a room. The arena follows the roster size.
    pub fn new(
        id: Uuid,
        entrants: Vec<RoomEntrant>,
        settings: MatchSettings,
        tournament: Option<TournamentLink>,
        results: Arc<dyn ResultSink>,
    ) -> Result<Self, RoomError> {
        if entrants.len() < 2 || entrants.len() > MAX_PARTICIPANTS {
            return Err(RoomError::RosterSize(entrants.len()));
        }
        settings.validate()?;

        let ids: Vec<[u8; 16]> = entrants.iter().map(|e| e.entrant.id.0).collect();
        let seed = derive_room_seed(id.as_bytes(), &ids);
        let roster = entrants.iter().map(|e| e.entrant.clone()).collect();
        let state = MatchState::new(*id.as_bytes(), seed, roster, settings)?;

        let seats = entrants
            .into_iter()
            .enumerate()
            .map(|(seat, e)| Seat {
                connection: e.connection,
                sender: e.sender,
                latch: InputLatch::new(),
                bot: e.entrant.is_bot.then(|| Bot::new(&state, seat, e.difficulty, seed)),
                ping_ms: None,
            })
            .collect();

        Ok(Self {
            id,
            state,
            seats,
            tournament,
            finished: false,
            geometry_dirty: false,
            on_complete: None,
            results,
        })
    }

    /// Install the completion hook.
    pub fn set_on_complete(&mut self, hook: CompletionHook) {
        self.on_complete = Some(hook);
    }

    /// Room id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Simulation state.
    pub fn state(&self) -> &MatchState {
        &self.state
    }

    /// Mutable simulation state, for scripted scenarios.
    pub fn state_mut(&mut self) -> &mut MatchState {
        &mut self.state
    }

    /// Whether the room has ended.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Bracket match this room fulfills.
    pub fn tournament(&self) -> Option<TournamentLink> {
        self.tournament
    }

    /// Human participants with their connections.
    pub fn humans(&self) -> Vec<(PlayerId, Option<ConnectionId>)> {
        self.state
            .participants
            .iter()
            .zip(&self.seats)
            .filter(|(p, _)| !p.is_bot)
            .map(|(p, s)| (p.id, s.connection))
            .collect()
    }

    /// Last ping sample for a player.
    pub fn ping_of(&self, player: &PlayerId) -> Option<u64> {
        let seat = self.state.seat_of(player)?;
        self.seats.get(seat)?.ping_ms
    }

    /// Send `match_start` to every human.
    pub fn announce(&self) {
        let names: Vec<String> = self.state.participants.iter().map(|p| p.name.clone()).collect();
        let arena = ArenaView::from_state(&self.state);
        for (side, seat) in self.seats.iter().enumerate() {
            let Some(sender) = &seat.sender else {
                continue;
            };
            let info = MatchStartInfo {
                room_id: self.id,
                side,
                names: names.clone(),
                custom: self.state.settings.power_ups,
                lives: self.state.settings.lives,
                tournament_id: self.tournament.map(|t| t.tournament_id),
                is_final: self.tournament.map(|t| t.is_final).unwrap_or(false),
                arena: arena.clone(),
            };
            let _ = sender.try_send(ServerMessage::MatchStart(info));
        }
    }

    /// Overwrite a human's input buffer. Returns false if the player has no
    /// live seat here.
    pub fn store_input(&mut self, player: &PlayerId, frame: InputFrame) -> bool {
        let Some(seat) = self.state.seat_of(player) else {
            return false;
        };
        if self.state.participants[seat].eliminated || self.seats[seat].bot.is_some() {
            return false;
        }
        self.seats[seat].latch.store(frame);
        true
    }

    /// Record a ping sample.
    pub fn record_ping(&mut self, player: &PlayerId, ping_ms: u64) {
        if let Some(seat) = self.state.seat_of(player) {
            self.seats[seat].ping_ms = Some(ping_ms);
        }
    }

    /// Advance one tick. Returns true once the room has finished.
    pub fn step(&mut self, elapsed: f64) -> bool {
        if self.finished {
            return true;
        }

        let mut inputs = BTreeMap::new();
        for (seat, slot) in self.seats.iter_mut().enumerate() {
            if let Some(bot) = slot.bot.as_mut() {
                bot.adapt(&self.state);
                slot.latch.store(bot.think(&self.state));
            }
            let participant = &self.state.participants[seat];
            if participant.eliminated {
                continue;
            }
            inputs.insert(participant.id, slot.latch.sample());
        }

        let result = tick(&mut self.state, &inputs, elapsed);
        if result
            .events
            .iter()
            .any(|e| matches!(e.data, GameEventData::Eliminated { .. }))
        {
            self.geometry_dirty = true;
        }

        if !result.match_ended && self.state.only_bots_remain() {
            self.settle_bots();
        }

        if self.state.is_ended() {
            self.finish(false);
        } else {
            self.broadcast_snapshot();
        }
        self.finished
    }

    /// Remove a player's connection. Their seat is eliminated; the room ends
    /// if at most one side (or only bots) remain. Returns whether it ended.
    pub fn disconnect(&mut self, player: &PlayerId) -> bool {
        self.withdraw(player, false)
    }

    /// Give up the match. The player still receives `match_over` if this
    /// ends the room.
    pub fn surrender(&mut self, player: &PlayerId) -> bool {
        self.withdraw(player, true)
    }

    fn withdraw(&mut self, player: &PlayerId, keep_channel: bool) -> bool {
        let Some(seat) = self.state.seat_of(player) else {
            return self.finished;
        };
        if !keep_channel {
            self.seats[seat].sender = None;
            self.seats[seat].connection = None;
        }
        if self.finished {
            return true;
        }

        let result = forfeit(&mut self.state, seat);
        if !result.events.is_empty() {
            self.geometry_dirty = true;
            debug!(room = %short_uuid(&self.id), player = %player.short(), "seat forfeited");
        }
        if !result.match_ended && self.state.only_bots_remain() {
            self.settle_bots();
        }
        if self.state.is_ended() {
            self.finish(true);
        } else if keep_channel {
            // A surrendered player is free to leave; the rest play on.
            self.seats[seat].sender = None;
            self.seats[seat].connection = None;
        }
        self.finished
    }

    /// End a bots-only match: the bot with the most lives wins.
    fn settle_bots(&mut self) {
        while !self.state.check_terminal() {
            let weakest = self
                .state
                .alive_seats()
                .min_by_key(|&seat| (self.state.participants[seat].lives, std::cmp::Reverse(seat)));
            let Some(seat) = weakest else {
                break;
            };
            forfeit(&mut self.state, seat);
        }
        debug!(room = %short_uuid(&self.id), "only bots remain, room settled");
    }

    fn broadcast_snapshot(&mut self) {
        let snapshot = StateSnapshot::from_state(&self.state, self.geometry_dirty);
        self.geometry_dirty = false;
        let message = ServerMessage::StateSnapshot(snapshot);
        for sender in self.seats.iter().filter_map(|s| s.sender.as_ref()) {
            // Full channel means a slow client; it gets the next snapshot.
            let _ = sender.try_send(message.clone());
        }
    }

    /// End the room: `match_over` to everyone, record, completion hook.
    /// A second call does nothing.
    pub fn finish(&mut self, forfeit: bool) {
        if self.finished {
            return;
        }
        self.finished = true;

        let placements = self.state.placements();
        let winner_seat = self.state.winner;
        let winner = winner_seat
            .map(|seat| self.state.participants[seat].id)
            .or_else(|| placements.first().map(|(id, _)| *id));

        let info = MatchOverInfo {
            room_id: self.id,
            winner: winner_seat.map(|seat| self.state.participants[seat].name.clone()),
            winner_side: winner_seat,
            final_lives: self.state.participants.iter().map(|p| p.lives).collect(),
            placements: placements
                .iter()
                .filter_map(|(id, place)| {
                    let seat = self.state.seat_of(id)?;
                    Some((self.state.participants[seat].name.clone(), *place))
                })
                .collect(),
            tournament: self.tournament.is_some(),
            forfeit,
        };
        let message = ServerMessage::MatchOver(info);
        for sender in self.seats.iter().filter_map(|s| s.sender.as_ref()) {
            let _ = sender.try_send(message.clone());
        }

        self.results.record(MatchRecord {
            room_id: self.id,
            participants: self
                .state
                .participants
                .iter()
                .enumerate()
                .map(|(seat, p)| RecordEntry {
                    player_id: p.id.to_uuid_string(),
                    name: p.name.clone(),
                    is_bot: p.is_bot,
                    lives: p.lives,
                    won: winner_seat == Some(seat),
                })
                .collect(),
            tournament_id: self.tournament.map(|t| t.tournament_id),
            forfeit,
            duration_ticks: self.state.tick,
            finished_at: Utc::now(),
        });

        info!(
            room = %short_uuid(&self.id),
            winner = winner.map(|w| w.short()).unwrap_or_default(),
            ticks = self.state.tick,
            forfeit,
            "room finished"
        );

        if let Some(hook) = self.on_complete.take() {
            hook(RoomOutcome {
                room_id: self.id,
                winner,
                placements,
                forfeit,
                tournament: self.tournament,
            });
        }
    }
}

impl std::fmt::Debug for GameRoom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameRoom")
            .field("id", &self.id)
            .field("tick", &self.state.tick)
            .field("participants", &self.state.participants.len())
            .field("finished", &self.finished)
            .finish()
    }
}

// =============================================================================
// ROOM HANDLE
// =============================================================================

/// Shared handle to a running room.
#[derive(Clone)]
pub struct RoomHandle {
    id: Uuid,
    inner: Arc<Mutex<GameRoom>>,
    shutdown: Arc<AtomicBool>,
}

impl RoomHandle {
    /// Wrap a room.
    pub fn new(room: GameRoom) -> Self {
        Self {
            id: room.id(),
            inner: Arc::new(Mutex::new(room)),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Room id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Lock the room.
    pub async fn lock(&self) -> MutexGuard<'_, GameRoom> {
        self.inner.lock().await
    }

    /// Ask the tick loop to stop.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    pub fn should_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Advance one tick. Returns true once the room is done.
    pub async fn step(&self, elapsed: f64) -> bool {
        self.inner.lock().await.step(elapsed)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vec2::Vec2;
    use crate::network::persistence::MemoryResultSink;
    use std::sync::Mutex as StdMutex;

    struct Fixture {
        room: GameRoom,
        sink: Arc<MemoryResultSink>,
        rx: Vec<mpsc::Receiver<ServerMessage>>,
    }

    fn human(n: u8) -> (RoomEntrant, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(1024);
        let entrant = Entrant::human(PlayerId::new([n; 16]), format!("p{n}"));
        (RoomEntrant::human(entrant, ConnectionId(n as u64), tx), rx)
    }

    fn fixture(humans: u8, bots: u8, settings: MatchSettings) -> Fixture {
        let mut entrants = Vec::new();
        let mut rx = Vec::new();
        for n in 1..=humans {
            let (e, r) = human(n);
            entrants.push(e);
            rx.push(r);
        }
        for n in 0..bots {
            entrants.push(RoomEntrant::bot(Entrant::bot(format!("bot{n}")), Difficulty::Hard));
        }
        let sink = Arc::new(MemoryResultSink::new());
        let room = GameRoom::new(Uuid::new_v4(), entrants, settings, None, sink.clone()).unwrap();
        Fixture { room, sink, rx }
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(m) = rx.try_recv() {
            out.push(m);
        }
        out
    }

    fn match_overs(messages: &[ServerMessage]) -> Vec<&MatchOverInfo> {
        messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::MatchOver(info) => Some(info),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_roster_size_validated() {
        let (e, _rx) = human(1);
        let sink = Arc::new(MemoryResultSink::new());
        let err = GameRoom::new(Uuid::new_v4(), vec![e], MatchSettings::default(), None, sink).unwrap_err();
        assert!(matches!(err, RoomError::RosterSize(1)));
    }

    #[test]
    fn test_announce_sends_sides() {
        let mut f = fixture(2, 0, MatchSettings::default());
        f.room.announce();
        for (side, rx) in f.rx.iter_mut().enumerate() {
            match drain(rx).first() {
                Some(ServerMessage::MatchStart(info)) => {
                    assert_eq!(info.side, side);
                    assert_eq!(info.names, vec!["p1".to_string(), "p2".to_string()]);
                }
                other => panic!("expected match_start, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_step_broadcasts_snapshot() {
        let mut f = fixture(2, 0, MatchSettings::default());
        assert!(!f.room.step(0.016));
        let messages = drain(&mut f.rx[0]);
        assert!(matches!(messages.as_slice(), [ServerMessage::StateSnapshot(s)] if s.tick == 1));
    }

    #[test]
    fn test_input_is_latched_for_next_tick() {
        let mut f = fixture(2, 0, MatchSettings::default());
        let p1 = PlayerId::new([1; 16]);
        let before = f.room.state().participants[0].paddle.position;

        assert!(f.room.store_input(&p1, InputFrame::with_direction(1)));
        f.room.step(0.016);
        assert_ne!(f.room.state().participants[0].paddle.position, before);

        assert!(!f.room.store_input(&PlayerId::new([9; 16]), InputFrame::with_direction(1)));
    }

    #[test]
    fn test_disconnect_forfeits_and_finishes_once() {
        let mut f = fixture(2, 0, MatchSettings::default());
        let hits = Arc::new(StdMutex::new(Vec::new()));
        let seen = hits.clone();
        f.room.set_on_complete(Box::new(move |outcome| seen.lock().unwrap().push(outcome)));

        assert!(f.room.disconnect(&PlayerId::new([1; 16])));
        // Racing terminal paths are no-ops.
        f.room.finish(false);
        assert!(f.room.step(0.016));
        assert!(f.room.disconnect(&PlayerId::new([2; 16])));

        let overs = drain(&mut f.rx[1]);
        let overs = match_overs(&overs);
        assert_eq!(overs.len(), 1);
        assert_eq!(overs[0].winner.as_deref(), Some("p2"));
        assert!(overs[0].forfeit);

        // The disconnected player's channel was dropped from the room.
        assert!(match_overs(&drain(&mut f.rx[0])).is_empty());

        assert_eq!(f.sink.records().len(), 1);
        let outcomes = hits.lock().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].winner, Some(PlayerId::new([2; 16])));
        assert!(outcomes[0].forfeit);
    }

    #[test]
    fn test_surrender_keeps_channel() {
        let mut f = fixture(2, 0, MatchSettings::default());
        assert!(f.room.surrender(&PlayerId::new([2; 16])));
        let overs = drain(&mut f.rx[1]);
        assert_eq!(match_overs(&overs).len(), 1);
    }

    #[test]
    fn test_scoring_out_ends_match() {
        let settings = MatchSettings { lives: 2, ..MatchSettings::default() };
        let mut f = fixture(2, 0, settings);
        let mut ended = false;
        for _ in 0..2 {
            let state = f.room.state_mut();
            state.ball.position = Vec2::new(-50.0, 300.0);
            state.ball.velocity = Vec2::new(-360.0, 0.0);
            ended = f.room.step(0.016);
        }
        assert!(ended);
        assert_eq!(f.room.state().participants[0].lives, 0);
        assert_eq!(f.room.state().participants[1].lives, 2);
        let record = &f.sink.records()[0];
        assert!(!record.forfeit);
        assert_eq!(record.winner().map(|w| w.name.as_str()), Some("p2"));
    }

    #[test]
    fn test_only_bots_remaining_ends_battle_royale() {
        let mut f = fixture(1, 3, MatchSettings::default());
        assert!(f.room.state().arena.is_polygon());
        assert!(f.room.disconnect(&PlayerId::new([1; 16])));
        assert!(f.room.state().is_ended());
        assert_eq!(f.room.state().alive_count(), 1);
        let record = &f.sink.records()[0];
        assert!(record.winner().map(|w| w.is_bot).unwrap_or(false));
    }

    #[test]
    fn test_battle_royale_keeps_running_after_one_leaves() {
        let mut f = fixture(3, 1, MatchSettings::default());
        assert!(!f.room.disconnect(&PlayerId::new([1; 16])));
        assert!(!f.room.step(0.016));
        // Elimination changes geometry, so the next snapshot carries the arena.
        let messages = drain(&mut f.rx[1]);
        assert!(messages
            .iter()
            .any(|m| matches!(m, ServerMessage::StateSnapshot(s) if s.arena.is_some())));
    }

    #[test]
    fn test_bot_room_runs() {
        let mut f = fixture(1, 1, MatchSettings::custom());
        for _ in 0..600 {
            if f.room.step(0.016) {
                break;
            }
        }
        assert!(f.room.state().tick > 0);
    }

    #[tokio::test]
    async fn test_handle_shutdown_flag() {
        let f = fixture(2, 0, MatchSettings::default());
        let handle = RoomHandle::new(f.room);
        assert!(!handle.should_shutdown());
        handle.request_shutdown();
        assert!(handle.should_shutdown());
        assert!(!handle.step(0.016).await);
        assert_eq!(handle.lock().await.state().tick, 1);
    }
}
