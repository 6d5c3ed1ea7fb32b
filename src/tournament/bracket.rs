//! Single-Elimination Bracket
//!
//! Pure bracket state: generation, result recording, round advancement and
//! diversion of odd survivors. No I/O; the registry turns [`Progress`] into
//! rooms and broadcasts.
//!
//! ## Shape
//!
//! With `live₀ = N` and `live_{r+1} = ceil(live_r / 2)`, round `r` holds
//! `floor(live_r / 2)` matches, so every bracket has exactly `N - 1`
//! matches. When a round cannot seat everyone, one player is diverted two
//! rounds ahead (at generation: straight into round 1).

use std::collections::{BTreeMap, BTreeSet};
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::rng::DeterministicRng;
use crate::game::state::PlayerId;

// =============================================================================
// TYPES
// =============================================================================

/// A bracket slot: a player, or a placeholder awaiting a winner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Slot {
    /// Seated player.
    Player(PlayerId),
    /// To be decided.
    Tbd,
}

impl Slot {
    /// Seated player, if any.
    pub fn player(&self) -> Option<PlayerId> {
        match self {
            Slot::Player(id) => Some(*id),
            Slot::Tbd => None,
        }
    }
}

/// Match lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BracketMatchStatus {
    /// Not started.
    Pending,
    /// A room is running it.
    Playing,
    /// Winner decided (or nobody showed up).
    Completed,
}

/// One match in the bracket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketMatch {
    /// Id, unique within the bracket.
    pub id: u32,
    /// Round number.
    pub round: usize,
    /// First slot.
    pub player1: Slot,
    /// Second slot.
    pub player2: Slot,
    /// Lifecycle.
    pub status: BracketMatchStatus,
    /// Winner once decided.
    pub winner: Option<PlayerId>,
    /// Decided without play.
    pub bye: bool,
    /// Decided by disconnect or surrender.
    pub forfeit: bool,
}

impl BracketMatch {
    fn new(id: u32, round: usize) -> Self {
        Self {
            id,
            round,
            player1: Slot::Tbd,
            player2: Slot::Tbd,
            status: BracketMatchStatus::Pending,
            winner: None,
            bye: false,
            forfeit: false,
        }
    }

    /// Whether `player` is seated here.
    pub fn involves(&self, player: &PlayerId) -> bool {
        self.player1.player() == Some(*player) || self.player2.player() == Some(*player)
    }

    /// The other seated player.
    pub fn opponent_of(&self, player: &PlayerId) -> Option<PlayerId> {
        match (self.player1.player(), self.player2.player()) {
            (Some(a), Some(b)) if a == *player => Some(b),
            (Some(a), Some(b)) if b == *player => Some(a),
            _ => None,
        }
    }
}

/// A match that needs a room.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatchTicket {
    /// Bracket match id.
    pub match_id: u32,
    /// Round number.
    pub round: usize,
    /// First player.
    pub player1: PlayerId,
    /// Second player.
    pub player2: PlayerId,
    /// Last match of the bracket.
    pub is_final: bool,
}

/// What the caller must do next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Progress {
    /// Start rooms for these matches.
    Launch(Vec<MatchTicket>),
    /// Other matches of the round are still running.
    Waiting,
    /// Bracket finished.
    Champion(Option<PlayerId>),
}

/// Bracket misuse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BracketError {
    /// Fewer than two players.
    #[error("a bracket needs at least 2 players, got {0}")]
    TooFewPlayers(usize),
    /// The same player registered twice.
    #[error("player {0} registered twice")]
    DuplicatePlayer(String),
    /// No such match.
    #[error("unknown bracket match {0}")]
    UnknownMatch(u32),
    /// Match is not currently being played.
    #[error("bracket match {0} is not in play")]
    NotPlaying(u32),
    /// Winner is not seated in the match.
    #[error("player is not seated in bracket match {0}")]
    NotInMatch(u32),
    /// Already started.
    #[error("bracket already started")]
    AlreadyStarted,
}

// =============================================================================
// BRACKET
// =============================================================================

/// Single-elimination bracket.
#[derive(Clone, Debug)]
pub struct Bracket {
    rounds: Vec<Vec<BracketMatch>>,
    current_round: usize,
    started: bool,
    champion: Option<PlayerId>,
    finished: bool,
    diversions: BTreeMap<PlayerId, u32>,
    eliminated: Vec<PlayerId>,
    bots: BTreeSet<PlayerId>,
    rng: DeterministicRng,
}

/// Number of matches per round for `n` players.
pub fn round_sizes(n: usize) -> Vec<usize> {
    let mut sizes = Vec::new();
    let mut live = n;
    while live > 1 {
        sizes.push(live / 2);
        live = live.div_ceil(2);
    }
    sizes
}

impl Bracket {
    /// Build the bracket. Round 0 pairs players consecutively; with an odd
    /// count one player (chosen by the diversion rule) waits in round 1.
    pub fn generate(players: &[PlayerId], seed: u64) -> Result<Self, BracketError> {
        if players.len() < 2 {
            return Err(BracketError::TooFewPlayers(players.len()));
        }
        let mut seen = BTreeSet::new();
        for p in players {
            if !seen.insert(*p) {
                return Err(BracketError::DuplicatePlayer(p.short()));
            }
        }

        let mut next_id = 0u32;
        let rounds: Vec<Vec<BracketMatch>> = round_sizes(players.len())
            .into_iter()
            .enumerate()
            .map(|(round, count)| {
                (0..count)
                    .map(|_| {
                        next_id += 1;
                        BracketMatch::new(next_id, round)
                    })
                    .collect()
            })
            .collect();

        let mut bracket = Self {
            rounds,
            current_round: 0,
            started: false,
            champion: None,
            finished: false,
            diversions: BTreeMap::new(),
            eliminated: Vec::new(),
            bots: BTreeSet::new(),
            rng: DeterministicRng::new(seed),
        };

        let mut seated: Vec<PlayerId> = players.to_vec();
        if seated.len() % 2 == 1 {
            if let Some(diverted) = bracket.pick_diverted(&seated) {
                seated.retain(|p| *p != diverted);
                bracket.divert(diverted, 1);
            }
        }
        for (i, pair) in seated.chunks(2).enumerate() {
            if let Some(m) = bracket.rounds[0].get_mut(i) {
                m.player1 = Slot::Player(pair[0]);
                m.player2 = pair.get(1).map_or(Slot::Tbd, |p| Slot::Player(*p));
            }
        }

        Ok(bracket)
    }

    /// Mark a participant as a bot. Bot-versus-bot matches resolve by coin flip.
    pub fn mark_bot(&mut self, player: PlayerId) {
        self.bots.insert(player);
    }

    /// All rounds.
    pub fn rounds(&self) -> &[Vec<BracketMatch>] {
        &self.rounds
    }

    /// Round currently in play.
    pub fn current_round(&self) -> usize {
        self.current_round
    }

    /// Total number of matches.
    pub fn match_count(&self) -> usize {
        self.rounds.iter().map(Vec::len).sum()
    }

    /// Champion once finished.
    pub fn champion(&self) -> Option<PlayerId> {
        self.champion
    }

    /// Whether the final has been decided.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Players knocked out, in order.
    pub fn eliminated(&self) -> &[PlayerId] {
        &self.eliminated
    }

    /// Whether a player is out.
    pub fn is_eliminated(&self, player: &PlayerId) -> bool {
        self.eliminated.contains(player)
    }

    /// How often each player has been diverted.
    pub fn diversions(&self) -> &BTreeMap<PlayerId, u32> {
        &self.diversions
    }

    /// Look up a match.
    pub fn find_match(&self, match_id: u32) -> Option<&BracketMatch> {
        self.rounds.iter().flatten().find(|m| m.id == match_id)
    }

    fn find_match_mut(&mut self, match_id: u32) -> Option<&mut BracketMatch> {
        self.rounds.iter_mut().flatten().find(|m| m.id == match_id)
    }

    /// Match a player is currently playing, if any.
    pub fn playing_match_of(&self, player: &PlayerId) -> Option<&BracketMatch> {
        self.rounds
            .get(self.current_round)?
            .iter()
            .find(|m| m.status == BracketMatchStatus::Playing && m.involves(player))
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Open round 0.
    pub fn start(&mut self) -> Result<Progress, BracketError> {
        if self.started {
            return Err(BracketError::AlreadyStarted);
        }
        self.started = true;
        Ok(self.run_from(0))
    }

    /// Record a played match. Advances when the whole round is complete.
    pub fn record_result(
        &mut self,
        match_id: u32,
        winner: PlayerId,
        forfeit: bool,
    ) -> Result<Progress, BracketError> {
        let m = self
            .find_match_mut(match_id)
            .ok_or(BracketError::UnknownMatch(match_id))?;
        if m.status != BracketMatchStatus::Playing {
            return Err(BracketError::NotPlaying(match_id));
        }
        let loser = m.opponent_of(&winner).ok_or(BracketError::NotInMatch(match_id))?;

        m.status = BracketMatchStatus::Completed;
        m.winner = Some(winner);
        m.forfeit = forfeit;
        let round = m.round;
        self.record_elimination(loser);

        Ok(self.after_completion(round))
    }

    /// Eliminate a player outside of a running match (disconnect while waiting).
    ///
    /// Returns the id of the match they are playing instead, so the caller
    /// can end it through the normal completion path.
    pub fn withdraw(&mut self, player: PlayerId) -> Option<u32> {
        if let Some(m) = self.playing_match_of(&player) {
            return Some(m.id);
        }
        if !self.finished {
            self.record_elimination(player);
        }
        None
    }

    fn record_elimination(&mut self, player: PlayerId) {
        if !self.eliminated.contains(&player) {
            self.eliminated.push(player);
        }
    }

    fn after_completion(&mut self, round: usize) -> Progress {
        let complete = self.rounds[round]
            .iter()
            .all(|m| m.status == BracketMatchStatus::Completed);
        if !complete {
            return Progress::Waiting;
        }
        if round + 1 >= self.rounds.len() {
            return self.finish();
        }
        self.advance_from(round);
        self.run_from(round + 1)
    }

    /// Open rounds starting at `round` until one needs rooms or the bracket ends.
    fn run_from(&mut self, mut round: usize) -> Progress {
        loop {
            self.current_round = round;
            let tickets = self.open_round(round);
            if !tickets.is_empty() {
                return Progress::Launch(tickets);
            }
            if round + 1 >= self.rounds.len() {
                return self.finish();
            }
            self.advance_from(round);
            round += 1;
        }
    }

    /// Resolve byes, walkovers and bot-versus-bot matches; ticket the rest.
    fn open_round(&mut self, round: usize) -> Vec<MatchTicket> {
        let is_final = round + 1 == self.rounds.len();
        let mut tickets = Vec::new();
        let mut knocked_out = Vec::new();

        for i in 0..self.rounds[round].len() {
            let m = &self.rounds[round][i];
            if m.status != BracketMatchStatus::Pending {
                continue;
            }
            let present: Vec<PlayerId> = [m.player1, m.player2]
                .iter()
                .filter_map(Slot::player)
                .filter(|p| !self.eliminated.contains(p))
                .collect();

            let (winner, bye, loser) = match present.as_slice() {
                [a, b] if self.bots.contains(a) && self.bots.contains(b) => {
                    let (w, l) = if self.rng.chance(0.5) { (*a, *b) } else { (*b, *a) };
                    (Some(w), false, Some(l))
                }
                [a, b] => {
                    let m = &mut self.rounds[round][i];
                    m.status = BracketMatchStatus::Playing;
                    tickets.push(MatchTicket {
                        match_id: m.id,
                        round,
                        player1: *a,
                        player2: *b,
                        is_final,
                    });
                    continue;
                }
                [only] => (Some(*only), true, None),
                _ => (None, true, None),
            };

            let m = &mut self.rounds[round][i];
            m.status = BracketMatchStatus::Completed;
            m.winner = winner;
            m.bye = bye;
            if let Some(loser) = loser {
                knocked_out.push(loser);
            }
        }

        for loser in knocked_out {
            self.record_elimination(loser);
        }
        tickets
    }

    /// Seat round `round`'s survivors into the next round, diverting one
    /// player two rounds ahead if they do not fit.
    fn advance_from(&mut self, round: usize) {
        let next = round + 1;
        let mut survivors: Vec<PlayerId> = self.rounds[round]
            .iter()
            .filter_map(|m| m.winner)
            .collect();

        // Players already waiting in the next round join the pool.
        for m in self.rounds[next].iter_mut() {
            for slot in [&mut m.player1, &mut m.player2] {
                if let Slot::Player(p) = *slot {
                    survivors.push(p);
                }
                *slot = Slot::Tbd;
            }
        }

        let capacity = self.rounds[next].len() * 2;
        if survivors.len() > capacity && survivors.len() % 2 == 1 {
            if let Some(diverted) = self.pick_diverted(&survivors) {
                survivors.retain(|p| *p != diverted);
                self.divert(diverted, next + 1);
            }
        }

        for player in survivors {
            Self::seat(&mut self.rounds[next], player);
        }
    }

    fn finish(&mut self) -> Progress {
        self.finished = true;
        self.champion = self
            .rounds
            .last()
            .and_then(|r| r.first())
            .and_then(|m| m.winner);
        Progress::Champion(self.champion)
    }

    // =========================================================================
    // DIVERSION
    // =========================================================================

    /// Fairness rule: among candidates with the fewest prior diversions,
    /// pick one at random.
    fn pick_diverted(&mut self, candidates: &[PlayerId]) -> Option<PlayerId> {
        let count = |p: &PlayerId| self.diversions.get(p).copied().unwrap_or(0);
        let fewest = candidates.iter().map(count).min()?;
        let pool: Vec<PlayerId> = candidates.iter().copied().filter(|p| count(p) == fewest).collect();
        self.rng.choose(&pool).copied()
    }

    fn divert(&mut self, player: PlayerId, round: usize) {
        *self.diversions.entry(player).or_insert(0) += 1;
        if let Some(matches) = self.rounds.get_mut(round) {
            Self::seat(matches, player);
        }
    }

    /// First TBD slot in order: player-1 slots across matches, then player-2.
    fn seat(matches: &mut [BracketMatch], player: PlayerId) {
        if let Some(m) = matches.iter_mut().find(|m| m.player1 == Slot::Tbd) {
            m.player1 = Slot::Player(player);
        } else if let Some(m) = matches.iter_mut().find(|m| m.player2 == Slot::Tbd) {
            m.player2 = Slot::Player(player);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn players(n: usize) -> Vec<PlayerId> {
        (0..n)
            .map(|i| {
                let mut bytes = [0u8; 16];
                bytes[..8].copy_from_slice(&(i as u64 + 1).to_le_bytes());
                PlayerId::new(bytes)
            })
            .collect()
    }

    /// Play every launched match with a random winner until the bracket ends.
    fn play_out(bracket: &mut Bracket, seed: u64) -> (Option<PlayerId>, usize) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut progress = bracket.start().unwrap();
        let mut played = 0;
        loop {
            match progress {
                Progress::Launch(tickets) => {
                    let mut last = Progress::Waiting;
                    for t in tickets {
                        let winner = if rng.gen_bool(0.5) { t.player1 } else { t.player2 };
                        last = bracket.record_result(t.match_id, winner, false).unwrap();
                        played += 1;
                    }
                    progress = last;
                }
                Progress::Champion(c) => return (c, played),
                Progress::Waiting => panic!("round left waiting with no matches outstanding"),
            }
        }
    }

    #[test]
    fn test_round_sizes() {
        assert_eq!(round_sizes(2), vec![1]);
        assert_eq!(round_sizes(4), vec![2, 1]);
        assert_eq!(round_sizes(5), vec![2, 1, 1]);
        assert_eq!(round_sizes(8), vec![4, 2, 1]);
        assert_eq!(round_sizes(6), vec![3, 1, 1]);
    }

    #[test]
    fn test_generation_rejects_bad_rosters() {
        assert_eq!(Bracket::generate(&players(1), 0).unwrap_err(), BracketError::TooFewPlayers(1));
        let mut dup = players(3);
        dup[2] = dup[0];
        assert!(matches!(Bracket::generate(&dup, 0), Err(BracketError::DuplicatePlayer(_))));
    }

    #[test]
    fn test_five_player_tournament() {
        let roster = players(5);
        let mut bracket = Bracket::generate(&roster, 42).unwrap();

        let sizes: Vec<usize> = bracket.rounds().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 1, 1]);
        assert_eq!(bracket.match_count(), 4);

        // One player waits in round 1 from the start.
        let waiting: Vec<PlayerId> = bracket.rounds()[1]
            .iter()
            .flat_map(|m| [m.player1.player(), m.player2.player()])
            .flatten()
            .collect();
        assert_eq!(waiting.len(), 1);
        assert_eq!(bracket.diversions().get(&waiting[0]), Some(&1));

        let (champion, played) = play_out(&mut bracket, 7);
        let champion = champion.unwrap();
        assert_eq!(played, 4);

        let wins = bracket
            .rounds()
            .iter()
            .flatten()
            .filter(|m| m.winner == Some(champion))
            .count();
        assert!(wins <= 3);
        assert_eq!(bracket.eliminated().len(), 4);
    }

    #[test]
    fn test_result_waits_for_sibling_match() {
        let roster = players(4);
        let mut bracket = Bracket::generate(&roster, 1).unwrap();
        let Progress::Launch(tickets) = bracket.start().unwrap() else {
            panic!("expected round 0 tickets");
        };
        assert_eq!(tickets.len(), 2);

        let first = tickets[0];
        let progress = bracket.record_result(first.match_id, first.player2, true).unwrap();
        assert_eq!(progress, Progress::Waiting);
        assert!(bracket.is_eliminated(&first.player1));
        assert_eq!(bracket.current_round(), 0);
        assert!(bracket.find_match(first.match_id).unwrap().forfeit);
    }

    #[test]
    fn test_record_result_validation() {
        let mut bracket = Bracket::generate(&players(2), 1).unwrap();
        let Progress::Launch(tickets) = bracket.start().unwrap() else {
            panic!("expected a ticket");
        };
        let t = tickets[0];
        let outsider = PlayerId::new([99; 16]);
        assert_eq!(bracket.record_result(t.match_id, outsider, false), Err(BracketError::NotInMatch(t.match_id)));
        assert_eq!(bracket.record_result(999, t.player1, false), Err(BracketError::UnknownMatch(999)));
        assert!(t.is_final);

        let done = bracket.record_result(t.match_id, t.player1, false).unwrap();
        assert_eq!(done, Progress::Champion(Some(t.player1)));
        assert_eq!(bracket.record_result(t.match_id, t.player1, false), Err(BracketError::NotPlaying(t.match_id)));
    }

    #[test]
    fn test_withdrawn_player_gives_opponent_a_bye() {
        let roster = players(4);
        let mut bracket = Bracket::generate(&roster, 3).unwrap();
        let Progress::Launch(tickets) = bracket.start().unwrap() else {
            panic!("expected tickets");
        };

        // Winner of match 0 disconnects while match 1 is still running.
        let m0 = tickets[0];
        bracket.record_result(m0.match_id, m0.player1, false).unwrap();
        assert_eq!(bracket.withdraw(m0.player1), None);

        // Match 1 player asks: still in play, so withdraw points at the match.
        let m1 = tickets[1];
        assert_eq!(bracket.withdraw(m1.player1), Some(m1.match_id));

        let progress = bracket.record_result(m1.match_id, m1.player2, false).unwrap();
        assert_eq!(progress, Progress::Champion(Some(m1.player2)));
        let final_match = &bracket.rounds()[1][0];
        assert!(final_match.bye);
    }

    #[test]
    fn test_bot_matches_resolve_without_rooms() {
        let roster = players(4);
        let mut bracket = Bracket::generate(&roster, 9).unwrap();
        for p in &roster {
            bracket.mark_bot(*p);
        }
        let progress = bracket.start().unwrap();
        let Progress::Champion(Some(champion)) = progress else {
            panic!("all-bot bracket should finish immediately");
        };
        assert!(roster.contains(&champion));
        assert_eq!(bracket.eliminated().len(), 3);
    }

    #[test]
    fn test_diversion_prefers_fresh_players() {
        // 11 players: 11 -> 6 -> 3 -> 2 -> 1, so odd counts appear twice.
        for seed in 0..50 {
            let mut bracket = Bracket::generate(&players(11), seed).unwrap();
            play_out(&mut bracket, seed);
            let twice = bracket.diversions().values().filter(|c| **c >= 2).count();
            assert_eq!(twice, 0, "seed {seed} diverted someone twice");
        }
    }

    proptest! {
        #[test]
        fn prop_bracket_is_valid(n in 2usize..=64, seed in any::<u64>()) {
            let roster = players(n);
            let mut bracket = Bracket::generate(&roster, seed).unwrap();
            prop_assert_eq!(bracket.match_count(), n - 1);

            let (champion, played) = play_out(&mut bracket, seed);
            let champion = champion.unwrap();
            prop_assert_eq!(played, n - 1);
            prop_assert!(bracket.is_finished());

            let mut knocked: Vec<PlayerId> = bracket.eliminated().to_vec();
            knocked.sort();
            let mut expected: Vec<PlayerId> = roster.iter().copied().filter(|p| *p != champion).collect();
            expected.sort();
            prop_assert_eq!(knocked, expected);
        }

        #[test]
        fn prop_diversion_picks_least_diverted(seed in any::<u64>(), counts in proptest::collection::vec(0u32..4, 3..12)) {
            let roster = players(counts.len());
            let mut bracket = Bracket::generate(&players(2), seed).unwrap();
            for (p, c) in roster.iter().zip(&counts) {
                if *c > 0 {
                    bracket.diversions.insert(*p, *c);
                }
            }
            let fewest = counts.iter().copied().min().unwrap();
            let picked = bracket.pick_diverted(&roster).unwrap();
            let picked_count = bracket.diversions.get(&picked).copied().unwrap_or(0);
            prop_assert_eq!(picked_count, fewest);
        }
    }
}
