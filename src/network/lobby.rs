//! Lobbies
//!
//! A lobby is a pre-match roster owned by the human who opened it. Members
//! join and leave, the owner adds and removes bots, and starting hands the
//! roster to a Battle Royale room or a tournament. The lobby table is one
//! collection behind one lock.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::info;
use uuid::Uuid;

use crate::ai::Difficulty;
use crate::core::rng::DeterministicRng;
use crate::game::config::{MatchSettings, SettingsError, MAX_PARTICIPANTS};
use crate::game::state::PlayerId;
use crate::network::connection::ConnectionId;
use crate::network::persistence::short_uuid;
use crate::network::protocol::{LobbyMemberView, LobbyView, ServerMessage};

/// Fewest participants a lobby can start with.
pub const MIN_LOBBY_START: usize = 2;

/// What a lobby turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LobbyKind {
    /// One free-for-all room.
    BattleRoyale,
    /// Single-elimination bracket.
    Tournament,
}

/// Lobby errors, reported to the sender as `lobby_error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LobbyError {
    /// No such lobby.
    #[error("lobby not found")]
    NotFound,
    /// Only the owner may do this.
    #[error("only the lobby owner can do that")]
    NotOwner,
    /// Lobby is at capacity.
    #[error("lobby is full")]
    Full,
    /// Not enough players to start.
    #[error("need at least {min} players, have {0}", min = MIN_LOBBY_START)]
    TooFewPlayers(usize),
    /// Sender is not in the lobby.
    #[error("not a member of this lobby")]
    NotMember,
    /// No such bot.
    #[error("bot not found")]
    BotNotFound,
    /// Settings rejected.
    #[error("invalid settings: {0}")]
    InvalidSettings(#[from] SettingsError),
}

/// One lobby seat.
#[derive(Debug, Clone)]
pub struct LobbyMember {
    /// Player or bot id.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
    /// Driven by the AI.
    pub is_bot: bool,
    /// Bot difficulty.
    pub difficulty: Difficulty,
    /// Connection, for humans.
    pub connection: Option<ConnectionId>,
    /// Outbound channel, for humans.
    pub sender: Option<mpsc::Sender<ServerMessage>>,
}

impl LobbyMember {
    /// Human member.
    pub fn human(
        id: PlayerId,
        name: impl Into<String>,
        connection: ConnectionId,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            is_bot: false,
            difficulty: Difficulty::default(),
            connection: Some(connection),
            sender: Some(sender),
        }
    }

    /// Bot member with a fresh id.
    pub fn bot(name: impl Into<String>, difficulty: Difficulty) -> Self {
        Self {
            id: PlayerId::random(),
            name: name.into(),
            is_bot: true,
            difficulty,
            connection: None,
            sender: None,
        }
    }
}

/// A pre-match roster.
#[derive(Debug, Clone)]
pub struct Lobby {
    /// Lobby id.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Battle Royale or tournament.
    pub kind: LobbyKind,
    /// Owning player.
    pub owner: PlayerId,
    /// Members in join order.
    pub members: Vec<LobbyMember>,
    /// Settings for the match(es).
    pub settings: MatchSettings,
}

impl Lobby {
    /// Wire view.
    pub fn view(&self) -> LobbyView {
        LobbyView {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind,
            owner: self.owner.to_uuid_string(),
            members: self
                .members
                .iter()
                .map(|m| LobbyMemberView { id: m.id.to_uuid_string(), name: m.name.clone(), is_bot: m.is_bot })
                .collect(),
            settings: self.settings,
        }
    }

    /// Human members.
    pub fn humans(&self) -> impl Iterator<Item = &LobbyMember> + '_ {
        self.members.iter().filter(|m| !m.is_bot)
    }

    /// Send to every human member.
    pub fn broadcast(&self, message: &ServerMessage) {
        for sender in self.members.iter().filter_map(|m| m.sender.as_ref()) {
            let _ = sender.try_send(message.clone());
        }
    }

    fn is_member(&self, player: &PlayerId) -> bool {
        self.members.iter().any(|m| m.id == *player)
    }

    fn require_owner(&self, player: &PlayerId) -> Result<(), LobbyError> {
        if self.owner == *player {
            Ok(())
        } else {
            Err(LobbyError::NotOwner)
        }
    }

    fn next_bot_name(&self) -> String {
        let n = self.members.iter().filter(|m| m.is_bot).count() + 1;
        format!("Bot {n}")
    }
}

/// Result of leaving a lobby.
#[derive(Debug)]
pub enum LeaveOutcome {
    /// Lobby lives on.
    Updated(Lobby),
    /// No humans were left, so the lobby was removed.
    Deleted(Lobby),
}

/// All open lobbies.
#[derive(Debug, Default)]
pub struct LobbyTable {
    lobbies: Mutex<BTreeMap<Uuid, Lobby>>,
}

impl LobbyTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a lobby owned by `owner`.
    pub async fn create(
        &self,
        id: Uuid,
        owner: LobbyMember,
        name: impl Into<String>,
        kind: LobbyKind,
        settings: MatchSettings,
    ) -> Result<Lobby, LobbyError> {
        settings.validate()?;
        let lobby = Lobby {
            id,
            name: name.into(),
            kind,
            owner: owner.id,
            members: vec![owner],
            settings,
        };
        info!(lobby = %short_uuid(&lobby.id), ?kind, "lobby created");
        self.lobbies.lock().await.insert(lobby.id, lobby.clone());
        Ok(lobby)
    }

    /// Add a human.
    pub async fn join(&self, id: &Uuid, member: LobbyMember) -> Result<Lobby, LobbyError> {
        let mut lobbies = self.lobbies.lock().await;
        let lobby = lobbies.get_mut(id).ok_or(LobbyError::NotFound)?;
        if lobby.is_member(&member.id) {
            return Ok(lobby.clone());
        }
        if lobby.members.len() >= MAX_PARTICIPANTS {
            return Err(LobbyError::Full);
        }
        lobby.members.push(member);
        Ok(lobby.clone())
    }

    /// Remove a member. Ownership passes to a random remaining human; with no
    /// humans left the lobby is deleted.
    pub async fn leave(&self, id: &Uuid, player: &PlayerId) -> Result<LeaveOutcome, LobbyError> {
        let mut lobbies = self.lobbies.lock().await;
        let lobby = lobbies.get_mut(id).ok_or(LobbyError::NotFound)?;
        let index = lobby
            .members
            .iter()
            .position(|m| m.id == *player)
            .ok_or(LobbyError::NotMember)?;
        lobby.members.remove(index);

        let humans: Vec<PlayerId> = lobby.humans().map(|m| m.id).collect();
        if humans.is_empty() {
            let removed = lobbies.remove(id).ok_or(LobbyError::NotFound)?;
            info!(lobby = %short_uuid(id), "lobby abandoned");
            return Ok(LeaveOutcome::Deleted(removed));
        }

        if lobby.owner == *player {
            let mut rng = DeterministicRng::new(lobby_seed(id) ^ humans.len() as u64);
            if let Some(next) = rng.choose(&humans) {
                lobby.owner = *next;
                info!(lobby = %short_uuid(id), owner = %next.short(), "lobby ownership transferred");
            }
        }
        Ok(LeaveOutcome::Updated(lobby.clone()))
    }

    /// Close a lobby. Owner only.
    pub async fn delete(&self, id: &Uuid, player: &PlayerId) -> Result<Lobby, LobbyError> {
        let mut lobbies = self.lobbies.lock().await;
        lobbies.get(id).ok_or(LobbyError::NotFound)?.require_owner(player)?;
        let removed = lobbies.remove(id).ok_or(LobbyError::NotFound)?;
        info!(lobby = %short_uuid(id), "lobby deleted");
        Ok(removed)
    }

    /// Add a bot. Owner only.
    pub async fn add_bot(&self, id: &Uuid, player: &PlayerId, difficulty: Difficulty) -> Result<Lobby, LobbyError> {
        let mut lobbies = self.lobbies.lock().await;
        let lobby = lobbies.get_mut(id).ok_or(LobbyError::NotFound)?;
        lobby.require_owner(player)?;
        if lobby.members.len() >= MAX_PARTICIPANTS {
            return Err(LobbyError::Full);
        }
        let name = lobby.next_bot_name();
        lobby.members.push(LobbyMember::bot(name, difficulty));
        Ok(lobby.clone())
    }

    /// Remove a bot. Owner only.
    pub async fn remove_bot(&self, id: &Uuid, player: &PlayerId, bot: &PlayerId) -> Result<Lobby, LobbyError> {
        let mut lobbies = self.lobbies.lock().await;
        let lobby = lobbies.get_mut(id).ok_or(LobbyError::NotFound)?;
        lobby.require_owner(player)?;
        let index = lobby
            .members
            .iter()
            .position(|m| m.is_bot && m.id == *bot)
            .ok_or(LobbyError::BotNotFound)?;
        lobby.members.remove(index);
        Ok(lobby.clone())
    }

    /// Take a lobby out of the table to start it. Owner only.
    ///
    /// A tournament roster with an odd count is padded with one bot.
    pub async fn take_for_start(
        &self,
        id: &Uuid,
        player: &PlayerId,
        pad_difficulty: Difficulty,
    ) -> Result<Lobby, LobbyError> {
        let mut lobbies = self.lobbies.lock().await;
        let lobby = lobbies.get(id).ok_or(LobbyError::NotFound)?;
        lobby.require_owner(player)?;
        let count = lobby.members.len();
        if count < MIN_LOBBY_START {
            return Err(LobbyError::TooFewPlayers(count));
        }

        let mut lobby = lobbies.remove(id).ok_or(LobbyError::NotFound)?;
        if lobby.kind == LobbyKind::Tournament && lobby.members.len() % 2 == 1 {
            let name = lobby.next_bot_name();
            lobby.members.push(LobbyMember::bot(name, pad_difficulty));
        }
        info!(lobby = %short_uuid(id), players = lobby.members.len(), kind = ?lobby.kind, "lobby starting");
        Ok(lobby)
    }

    /// Snapshot of one lobby.
    pub async fn get(&self, id: &Uuid) -> Option<Lobby> {
        self.lobbies.lock().await.get(id).cloned()
    }

    /// Views of all open lobbies.
    pub async fn list(&self) -> Vec<LobbyView> {
        self.lobbies.lock().await.values().map(Lobby::view).collect()
    }

    /// Open lobby count.
    pub async fn len(&self) -> usize {
        self.lobbies.lock().await.len()
    }

    /// Whether no lobbies are open.
    pub async fn is_empty(&self) -> bool {
        self.lobbies.lock().await.is_empty()
    }
}

fn lobby_seed(id: &Uuid) -> u64 {
    let bytes = id.as_bytes();
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(n: u8) -> LobbyMember {
        let (tx, _rx) = mpsc::channel(4);
        LobbyMember::human(PlayerId::new([n; 16]), format!("p{n}"), ConnectionId(n as u64), tx)
    }

    fn pid(n: u8) -> PlayerId {
        PlayerId::new([n; 16])
    }

    async fn lobby_with(table: &LobbyTable, kind: LobbyKind, humans: u8) -> Uuid {
        let lobby = table.create(Uuid::new_v4(), member(1), "test", kind, MatchSettings::default()).await.unwrap();
        for n in 2..=humans {
            table.join(&lobby.id, member(n)).await.unwrap();
        }
        lobby.id
    }

    #[tokio::test]
    async fn test_create_validates_settings() {
        let table = LobbyTable::new();
        let settings = MatchSettings { lives: 0, ..MatchSettings::default() };
        let err = table.create(Uuid::new_v4(), member(1), "x", LobbyKind::BattleRoyale, settings).await.unwrap_err();
        assert!(matches!(err, LobbyError::InvalidSettings(_)));
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn test_owner_only_actions() {
        let table = LobbyTable::new();
        let id = lobby_with(&table, LobbyKind::BattleRoyale, 2).await;

        assert_eq!(table.add_bot(&id, &pid(2), Difficulty::Easy).await.unwrap_err(), LobbyError::NotOwner);
        assert_eq!(table.delete(&id, &pid(2)).await.unwrap_err(), LobbyError::NotOwner);
        assert_eq!(
            table.take_for_start(&id, &pid(2), Difficulty::Easy).await.unwrap_err(),
            LobbyError::NotOwner
        );

        let lobby = table.add_bot(&id, &pid(1), Difficulty::Hard).await.unwrap();
        let bot = lobby.members.iter().find(|m| m.is_bot).map(|m| m.id).unwrap();
        assert_eq!(lobby.members.len(), 3);

        assert_eq!(
            table.remove_bot(&id, &pid(1), &pid(2)).await.unwrap_err(),
            LobbyError::BotNotFound
        );
        let lobby = table.remove_bot(&id, &pid(1), &bot).await.unwrap();
        assert_eq!(lobby.members.len(), 2);
    }

    #[tokio::test]
    async fn test_capacity() {
        let table = LobbyTable::new();
        let id = lobby_with(&table, LobbyKind::BattleRoyale, 1).await;
        for _ in 1..MAX_PARTICIPANTS {
            table.add_bot(&id, &pid(1), Difficulty::Easy).await.unwrap();
        }
        assert_eq!(table.join(&id, member(2)).await.unwrap_err(), LobbyError::Full);
        assert_eq!(table.add_bot(&id, &pid(1), Difficulty::Easy).await.unwrap_err(), LobbyError::Full);
    }

    #[tokio::test]
    async fn test_owner_leaving_transfers_to_human() {
        let table = LobbyTable::new();
        let id = lobby_with(&table, LobbyKind::BattleRoyale, 3).await;
        table.add_bot(&id, &pid(1), Difficulty::Easy).await.unwrap();

        match table.leave(&id, &pid(1)).await.unwrap() {
            LeaveOutcome::Updated(lobby) => {
                assert!(lobby.owner == pid(2) || lobby.owner == pid(3));
                assert_eq!(lobby.members.len(), 3);
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_last_human_leaving_deletes() {
        let table = LobbyTable::new();
        let id = lobby_with(&table, LobbyKind::BattleRoyale, 1).await;
        table.add_bot(&id, &pid(1), Difficulty::Easy).await.unwrap();

        assert!(matches!(table.leave(&id, &pid(1)).await.unwrap(), LeaveOutcome::Deleted(_)));
        assert!(table.get(&id).await.is_none());
        assert_eq!(table.leave(&id, &pid(1)).await.unwrap_err(), LobbyError::NotFound);
    }

    #[tokio::test]
    async fn test_start_requires_two() {
        let table = LobbyTable::new();
        let id = lobby_with(&table, LobbyKind::BattleRoyale, 1).await;
        assert_eq!(
            table.take_for_start(&id, &pid(1), Difficulty::Easy).await.unwrap_err(),
            LobbyError::TooFewPlayers(1)
        );
        assert!(table.get(&id).await.is_some());
    }

    #[tokio::test]
    async fn test_odd_tournament_padded_with_bot() {
        let table = LobbyTable::new();
        let id = lobby_with(&table, LobbyKind::Tournament, 3).await;
        let lobby = table.take_for_start(&id, &pid(1), Difficulty::Medium).await.unwrap();
        assert_eq!(lobby.members.len(), 4);
        assert!(lobby.members[3].is_bot);
        assert!(table.is_empty().await);

        // Battle Royale rosters are not padded.
        let id = lobby_with(&table, LobbyKind::BattleRoyale, 3).await;
        let lobby = table.take_for_start(&id, &pid(1), Difficulty::Medium).await.unwrap();
        assert_eq!(lobby.members.len(), 3);
    }

    #[tokio::test]
    async fn test_list_and_view() {
        let table = LobbyTable::new();
        let id = lobby_with(&table, LobbyKind::Tournament, 2).await;
        let list = table.list().await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, id);
        assert_eq!(list[0].owner, pid(1).to_uuid_string());
        assert_eq!(list[0].members.len(), 2);
    }
}
