//! Match Result Sink
//!
//! Finished rooms hand a [`MatchRecord`] to a [`ResultSink`]. The sink is
//! write-only from the server's point of view and never sits on the tick path
//! in a way that can block it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// One participant's line in a match record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEntry {
    /// Player id as a UUID string.
    pub player_id: String,
    /// Display name.
    pub name: String,
    /// Driven by the AI.
    pub is_bot: bool,
    /// Lives left at the end.
    pub lives: u32,
    /// Won the match.
    pub won: bool,
}

/// Final result of a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    /// Room id.
    pub room_id: Uuid,
    /// Participants in seat order.
    pub participants: Vec<RecordEntry>,
    /// Tournament, when the room fulfilled a bracket match.
    pub tournament_id: Option<Uuid>,
    /// Decided by disconnect or surrender.
    pub forfeit: bool,
    /// Simulation ticks played.
    pub duration_ticks: u32,
    /// When the room finished.
    pub finished_at: DateTime<Utc>,
}

impl MatchRecord {
    /// Winner's entry, if any.
    pub fn winner(&self) -> Option<&RecordEntry> {
        self.participants.iter().find(|p| p.won)
    }
}

/// Receives finished match results.
pub trait ResultSink: Send + Sync {
    /// Store one record.
    fn record(&self, record: MatchRecord);
}

/// Writes results to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingResultSink;

impl ResultSink for TracingResultSink {
    fn record(&self, record: MatchRecord) {
        let summary = serde_json::to_string(&record.participants).unwrap_or_default();
        info!(
            room = %short_uuid(&record.room_id),
            winner = record.winner().map(|w| w.name.as_str()).unwrap_or("-"),
            tournament = record.tournament_id.map(|t| short_uuid(&t)).unwrap_or_default(),
            forfeit = record.forfeit,
            ticks = record.duration_ticks,
            participants = %summary,
            "match recorded"
        );
    }
}

/// Keeps results in memory.
#[derive(Debug, Default)]
pub struct MemoryResultSink {
    records: Mutex<Vec<MatchRecord>>,
}

impl MemoryResultSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    pub fn records(&self) -> Vec<MatchRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ResultSink for MemoryResultSink {
    fn record(&self, record: MatchRecord) {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).push(record);
    }
}

/// First 8 hex digits of a uuid, for logs.
pub(crate) fn short_uuid(id: &Uuid) -> String {
    hex::encode(&id.as_bytes()[..4])
}
