//! Tournament Registry
//!
//! Owns every tournament and its status machine:
//!
//! ```text
//! created ──register×capacity──▶ full ──start──▶ running ──final──▶ completed
//! ```
//!
//! Each tournament sits behind its own `Mutex`, so completion callbacks for
//! one tournament are serialized while different tournaments advance
//! independently.

use std::collections::BTreeMap;
use std::sync::Arc;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, debug};
use uuid::Uuid;

use crate::core::rng::derive_room_seed;
use crate::game::state::PlayerId;
use crate::tournament::bracket::{Bracket, BracketError, BracketMatchStatus, Progress, Slot};

/// Smallest tournament.
pub const MIN_CAPACITY: usize = 2;

/// Largest tournament.
pub const MAX_CAPACITY: usize = 64;

/// Tournament identifier.
pub type TournamentId = Uuid;

// =============================================================================
// TYPES
// =============================================================================

/// Tournament lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentStatus {
    /// Accepting registrations.
    Created,
    /// Capacity reached, waiting to start.
    Full,
    /// Bracket in play.
    Running,
    /// Champion decided.
    Completed,
}

/// A registered participant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TournamentEntrant {
    /// Player identity.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
    /// AI-controlled.
    pub is_bot: bool,
}

/// What a withdrawal turned into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Withdrawal {
    /// The player is in a running match; end it as a forfeit.
    InMatch(u32),
    /// Eliminated while waiting.
    Eliminated,
    /// Not part of this tournament, or it is over.
    NotParticipating,
}

/// Tournament failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TournamentError {
    /// Capacity must be even and within 2..=64.
    #[error("tournament capacity must be even and between {min} and {max}, got {0}", min = MIN_CAPACITY, max = MAX_CAPACITY)]
    InvalidCapacity(usize),
    /// Registration is closed.
    #[error("tournament is not accepting registrations ({0:?})")]
    RegistrationClosed(TournamentStatus),
    /// Player already registered.
    #[error("player already registered")]
    AlreadyRegistered,
    /// Start requires a full roster.
    #[error("tournament cannot start while {0:?}")]
    NotReady(TournamentStatus),
    /// Results only land while running.
    #[error("tournament is not running")]
    NotRunning,
    /// Unknown tournament.
    #[error("tournament not found")]
    NotFound,
    /// Bracket rejected the operation.
    #[error(transparent)]
    Bracket(#[from] BracketError),
}

/// Serializable bracket match for clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketMatchView {
    /// Bracket match id.
    pub id: u32,
    /// Round number.
    pub round: usize,
    /// First player's name, `None` while TBD.
    pub player1: Option<String>,
    /// Second player's name, `None` while TBD.
    pub player2: Option<String>,
    /// Lifecycle.
    pub status: BracketMatchStatus,
    /// Winner's name.
    pub winner: Option<String>,
    /// Decided without play.
    pub bye: bool,
}

/// Serializable tournament snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TournamentView {
    /// Tournament id.
    pub id: TournamentId,
    /// Display name.
    pub name: String,
    /// Lifecycle.
    pub status: TournamentStatus,
    /// Round currently in play.
    pub current_round: usize,
    /// Matches by round.
    pub rounds: Vec<Vec<BracketMatchView>>,
    /// Champion's name once completed.
    pub champion: Option<String>,
}

// =============================================================================
// TOURNAMENT
// =============================================================================

/// One single-elimination tournament.
#[derive(Debug)]
pub struct Tournament {
    id: TournamentId,
    name: String,
    capacity: usize,
    status: TournamentStatus,
    entrants: Vec<TournamentEntrant>,
    bracket: Option<Bracket>,
}

impl Tournament {
    /// Create an empty tournament. Capacity is checked here, before any room exists.
    pub fn new(id: TournamentId, name: impl Into<String>, capacity: usize) -> Result<Self, TournamentError> {
        if !(MIN_CAPACITY..=MAX_CAPACITY).contains(&capacity) || capacity % 2 != 0 {
            return Err(TournamentError::InvalidCapacity(capacity));
        }
        Ok(Self {
            id,
            name: name.into(),
            capacity,
            status: TournamentStatus::Created,
            entrants: Vec::with_capacity(capacity),
            bracket: None,
        })
    }

    /// Tournament id.
    pub fn id(&self) -> TournamentId {
        self.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current status.
    pub fn status(&self) -> TournamentStatus {
        self.status
    }

    /// Registered players in registration order.
    pub fn entrants(&self) -> &[TournamentEntrant] {
        &self.entrants
    }

    /// Look up a registered player.
    pub fn entrant(&self, id: &PlayerId) -> Option<&TournamentEntrant> {
        self.entrants.iter().find(|e| e.id == *id)
    }

    /// Human participants, for broadcasts.
    pub fn humans(&self) -> impl Iterator<Item = &TournamentEntrant> + '_ {
        self.entrants.iter().filter(|e| !e.is_bot)
    }

    /// The bracket once started.
    pub fn bracket(&self) -> Option<&Bracket> {
        self.bracket.as_ref()
    }

    /// Champion once completed.
    pub fn champion(&self) -> Option<&TournamentEntrant> {
        let id = self.bracket.as_ref()?.champion()?;
        self.entrant(&id)
    }

    /// Register a player. Reaching capacity moves the tournament to `Full`.
    pub fn register(&mut self, entrant: TournamentEntrant) -> Result<TournamentStatus, TournamentError> {
        if self.status != TournamentStatus::Created {
            return Err(TournamentError::RegistrationClosed(self.status));
        }
        if self.entrant(&entrant.id).is_some() {
            return Err(TournamentError::AlreadyRegistered);
        }
        self.entrants.push(entrant);
        if self.entrants.len() == self.capacity {
            self.status = TournamentStatus::Full;
        }
        Ok(self.status)
    }

    /// Generate the bracket and open round 0.
    pub fn start(&mut self) -> Result<Progress, TournamentError> {
        if self.status != TournamentStatus::Full {
            return Err(TournamentError::NotReady(self.status));
        }
        let ids: Vec<PlayerId> = self.entrants.iter().map(|e| e.id).collect();
        let raw: Vec<[u8; 16]> = ids.iter().map(|id| *id.as_bytes()).collect();
        let seed = derive_room_seed(self.id.as_bytes(), &raw);

        let mut bracket = Bracket::generate(&ids, seed)?;
        for e in self.entrants.iter().filter(|e| e.is_bot) {
            bracket.mark_bot(e.id);
        }
        let progress = bracket.start()?;
        self.bracket = Some(bracket);
        self.status = TournamentStatus::Running;

        info!(
            tournament = %self.id,
            players = self.entrants.len(),
            "tournament started"
        );
        Ok(self.settle(progress))
    }

    /// Record a finished bracket match.
    pub fn on_match_complete(
        &mut self,
        match_id: u32,
        winner: PlayerId,
        forfeit: bool,
    ) -> Result<Progress, TournamentError> {
        if self.status != TournamentStatus::Running {
            return Err(TournamentError::NotRunning);
        }
        let bracket = self.bracket.as_mut().ok_or(TournamentError::NotRunning)?;
        let round = bracket.current_round();
        let progress = bracket.record_result(match_id, winner, forfeit)?;
        if bracket.current_round() != round {
            info!(tournament = %self.id, round = bracket.current_round(), "tournament round advanced");
        }
        Ok(self.settle(progress))
    }

    /// A participant left. Mid-match departures are reported back so the room
    /// ends and its normal completion path records the loss.
    pub fn withdraw(&mut self, player: PlayerId) -> Withdrawal {
        if self.entrant(&player).is_none() {
            return Withdrawal::NotParticipating;
        }
        match self.status {
            TournamentStatus::Created | TournamentStatus::Full => {
                self.entrants.retain(|e| e.id != player);
                self.status = TournamentStatus::Created;
                debug!(tournament = %self.id, player = %player.short(), "registration withdrawn");
                Withdrawal::Eliminated
            }
            TournamentStatus::Running => {
                let Some(bracket) = self.bracket.as_mut() else {
                    return Withdrawal::NotParticipating;
                };
                if bracket.is_eliminated(&player) {
                    return Withdrawal::NotParticipating;
                }
                match bracket.withdraw(player) {
                    Some(match_id) => Withdrawal::InMatch(match_id),
                    None => {
                        info!(tournament = %self.id, player = %player.short(), "participant eliminated by disconnect");
                        Withdrawal::Eliminated
                    }
                }
            }
            TournamentStatus::Completed => Withdrawal::NotParticipating,
        }
    }

    fn settle(&mut self, progress: Progress) -> Progress {
        if let Progress::Champion(champion) = &progress {
            self.status = TournamentStatus::Completed;
            info!(
                tournament = %self.id,
                champion = %champion.map(|c| c.short()).unwrap_or_else(|| "none".into()),
                "tournament completed"
            );
        }
        progress
    }

    fn display(&self, slot: Slot) -> Option<String> {
        let id = slot.player()?;
        self.entrant(&id).map(|e| e.name.clone())
    }

    /// Snapshot for clients.
    pub fn view(&self) -> TournamentView {
        let rounds = self
            .bracket
            .as_ref()
            .map(|b| {
                b.rounds()
                    .iter()
                    .map(|round| {
                        round
                            .iter()
                            .map(|m| BracketMatchView {
                                id: m.id,
                                round: m.round,
                                player1: self.display(m.player1),
                                player2: self.display(m.player2),
                                status: m.status,
                                winner: m.winner.and_then(|w| self.display(Slot::Player(w))),
                                bye: m.bye,
                            })
                            .collect()
                    })
                    .collect()
            })
            .unwrap_or_default();

        TournamentView {
            id: self.id,
            name: self.name.clone(),
            status: self.status,
            current_round: self.bracket.as_ref().map_or(0, Bracket::current_round),
            rounds,
            champion: self.champion().map(|e| e.name.clone()),
        }
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// All tournaments on this server.
#[derive(Default)]
pub struct TournamentRegistry {
    tournaments: RwLock<BTreeMap<TournamentId, Arc<Mutex<Tournament>>>>,
}

impl TournamentRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tournament. Invalid capacity fails before anything is stored.
    pub async fn create(
        &self,
        name: impl Into<String>,
        capacity: usize,
    ) -> Result<Arc<Mutex<Tournament>>, TournamentError> {
        let id = Uuid::new_v4();
        let tournament = Arc::new(Mutex::new(Tournament::new(id, name, capacity)?));
        self.tournaments.write().await.insert(id, Arc::clone(&tournament));
        debug!(tournament = %id, capacity, "tournament created");
        Ok(tournament)
    }

    /// Look up a tournament.
    pub async fn get(&self, id: &TournamentId) -> Option<Arc<Mutex<Tournament>>> {
        self.tournaments.read().await.get(id).cloned()
    }

    /// Drop a finished tournament.
    pub async fn remove(&self, id: &TournamentId) -> bool {
        self.tournaments.write().await.remove(id).is_some()
    }

    /// Number of tournaments held.
    pub async fn len(&self) -> usize {
        self.tournaments.read().await.len()
    }

    /// Whether the registry is empty.
    pub async fn is_empty(&self) -> bool {
        self.tournaments.read().await.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================
