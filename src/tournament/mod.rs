//! Tournaments
//!
//! Single-elimination brackets. The bracket itself is pure state; the
//! registry holds tournaments and their lifecycle. Rooms for bracket matches
//! are started by the network layer.

pub mod bracket;
pub mod registry;

pub use bracket::{Bracket, BracketError, BracketMatch, BracketMatchStatus, MatchTicket, Progress, Slot};
pub use registry::{
    Tournament, TournamentEntrant, TournamentError, TournamentId, TournamentRegistry,
    TournamentStatus, TournamentView, Withdrawal,
};
