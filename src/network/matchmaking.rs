//! Matchmaking Queue
//!
//! FIFO pairing for quick 1v1 matches. One queue per [`QueueMode`]; an entry
//! leaves its queue the moment it is paired, cancelled, or expires.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::game::config::MatchSettings;
use crate::game::state::PlayerId;
use crate::network::connection::ConnectionId;
use crate::network::protocol::ServerMessage;

/// Players needed for a quick match.
pub const QUICK_MATCH_SIZE: usize = 2;

/// Which quick-match queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueMode {
    /// Classic rules.
    Quick,
    /// Power-ups and fruits on.
    QuickCustom,
}

impl QueueMode {
    /// Settings for a match from this queue.
    pub fn settings(self, base: MatchSettings) -> MatchSettings {
        MatchSettings {
            power_ups: matches!(self, QueueMode::QuickCustom),
            ..base
        }
    }
}

/// A waiting player.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    /// Player.
    pub player_id: PlayerId,
    /// Display name.
    pub name: String,
    /// Connection that queued.
    pub connection: ConnectionId,
    /// Outbound channel.
    pub sender: mpsc::Sender<ServerMessage>,
    /// When the player queued.
    pub queued_at: Instant,
}

impl QueueEntry {
    /// Entry stamped now.
    pub fn new(
        player_id: PlayerId,
        name: impl Into<String>,
        connection: ConnectionId,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Self {
        Self { player_id, name: name.into(), connection, sender, queued_at: Instant::now() }
    }
}

/// Result of joining a queue.
#[derive(Debug)]
pub enum Enqueued {
    /// Still waiting; `count` players in this queue.
    Waiting {
        /// Queue length after joining.
        count: usize,
    },
    /// Paired with the longest-waiting player.
    Paired(QueueEntry, QueueEntry),
}

/// All quick-match queues.
#[derive(Debug, Default)]
pub struct MatchmakingQueue {
    queues: Mutex<BTreeMap<QueueMode, VecDeque<QueueEntry>>>,
}

impl MatchmakingQueue {
    /// Empty queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a queue, pairing immediately when someone is waiting.
    pub async fn enqueue(&self, mode: QueueMode, entry: QueueEntry) -> Enqueued {
        let mut queues = self.queues.lock().await;
        let queue = queues.entry(mode).or_default();
        queue.retain(|e| e.player_id != entry.player_id);

        match queue.pop_front() {
            Some(waiting) => {
                debug!(?mode, a = %waiting.player_id.short(), b = %entry.player_id.short(), "paired");
                Enqueued::Paired(waiting, entry)
            }
            None => {
                queue.push_back(entry);
                Enqueued::Waiting { count: queue.len() }
            }
        }
    }

    /// Leave whichever queue the player is in.
    pub async fn cancel(&self, player: &PlayerId) -> Option<QueueMode> {
        let mut queues = self.queues.lock().await;
        for (mode, queue) in queues.iter_mut() {
            if let Some(index) = queue.iter().position(|e| e.player_id == *player) {
                queue.remove(index);
                return Some(*mode);
            }
        }
        None
    }

    /// Remove and return entries older than `max_wait`.
    pub async fn expire(&self, max_wait: Duration) -> Vec<(QueueMode, QueueEntry)> {
        let now = Instant::now();
        let mut expired = Vec::new();
        let mut queues = self.queues.lock().await;
        for (mode, queue) in queues.iter_mut() {
            let (stale, fresh): (VecDeque<_>, VecDeque<_>) = queue
                .drain(..)
                .partition(|e| now.duration_since(e.queued_at) > max_wait);
            *queue = fresh;
            expired.extend(stale.into_iter().map(|e| (*mode, e)));
        }
        expired
    }

    /// Waiting players in one queue.
    pub async fn len(&self, mode: QueueMode) -> usize {
        self.queues.lock().await.get(&mode).map(VecDeque::len).unwrap_or(0)
    }

    /// Waiting players across all queues.
    pub async fn total(&self) -> usize {
        self.queues.lock().await.values().map(VecDeque::len).sum()
    }
}
