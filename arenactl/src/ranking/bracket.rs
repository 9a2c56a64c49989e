//! Final standings of a single-elimination bracket.
//!
//! Places come from where a player was knocked out: the final decides 1st and 2nd, semifinal
//! losers share 3rd and quarterfinal losers share 5th. Players knocked out earlier are not
//! placed.

use std::collections::HashMap;

use crate::db::models::matches::MatchRow;
use crate::types::UserId;

/// Shown for ids that are not in the participant list
pub const UNKNOWN_PLAYER: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoundKind {
    Final,
    Semifinal,
    Quarterfinal,
    Other,
}

impl RoundKind {
    /// Classify a free-text round name such as "Semi Finals" or "Chung kết (Final)"
    pub fn classify(round_name: &str) -> Self {
        let name = round_name.to_lowercase();
        if name.contains("semi") {
            RoundKind::Semifinal
        } else if name.contains("quarter") {
            RoundKind::Quarterfinal
        } else if name.contains("final") {
            RoundKind::Final
        } else {
            RoundKind::Other
        }
    }

    /// Bracket rank awarded to the loser of a match in this round
    fn loser_rank(self) -> Option<u32> {
        match self {
            RoundKind::Final => Some(2),
            RoundKind::Semifinal => Some(3),
            RoundKind::Quarterfinal => Some(5),
            RoundKind::Other => None,
        }
    }
}

/// Wins and losses over completed matches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Record {
    pub wins: u32,
    pub losses: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Standing {
    /// 1-based listing position
    pub position: usize,
    /// Bracket rank, shared by players knocked out in the same round
    pub rank: u32,
    pub user_id: UserId,
    pub name: String,
    pub record: Record,
    pub decided_in: RoundKind,
}

fn is_completed(m: &MatchRow) -> bool {
    m.status.as_deref() == Some("completed")
}

fn round_kind(m: &MatchRow) -> RoundKind {
    m.round_name.as_deref().map(RoundKind::classify).unwrap_or(RoundKind::Other)
}

/// W/L per participant. Only completed matches count.
pub fn records(matches: &[MatchRow], participants: &HashMap<UserId, String>) -> HashMap<UserId, Record> {
    let mut out: HashMap<UserId, Record> = participants.keys().map(|id| (*id, Record::default())).collect();
    for m in matches.iter().filter(|m| is_completed(m)) {
        if let Some(record) = m.winner_id.and_then(|id| out.get_mut(&id)) {
            record.wins += 1;
        }
        if let Some(record) = m.loser_id.and_then(|id| out.get_mut(&id)) {
            record.losses += 1;
        }
    }
    out
}

/// Bracket rank per player, from the final, semifinals and quarterfinals
pub fn bracket_ranks(matches: &[MatchRow]) -> HashMap<UserId, (u32, RoundKind)> {
    let mut placed: HashMap<UserId, (u32, RoundKind)> = HashMap::new();

    if let Some(final_match) = matches
        .iter()
        .find(|m| round_kind(m) == RoundKind::Final && m.winner_id.is_some())
    {
        if let Some(winner) = final_match.winner_id {
            placed.insert(winner, (1, RoundKind::Final));
        }
        if let Some(loser) = final_match.loser_id {
            placed.entry(loser).or_insert((2, RoundKind::Final));
        }
    }

    for kind in [RoundKind::Semifinal, RoundKind::Quarterfinal] {
        let Some(rank) = kind.loser_rank() else { continue };
        for m in matches.iter().filter(|m| round_kind(m) == kind && m.winner_id.is_some()) {
            if let Some(loser) = m.loser_id {
                placed.entry(loser).or_insert((rank, kind));
            }
        }
    }

    placed
}

/// Standings sorted by rank, then wins (most first), then name
pub fn standings(matches: &[MatchRow], participants: &HashMap<UserId, String>) -> Vec<Standing> {
    let records = records(matches, participants);

    let mut rows: Vec<Standing> = bracket_ranks(matches)
        .into_iter()
        .map(|(user_id, (rank, decided_in))| Standing {
            position: 0,
            rank,
            user_id,
            name: participants
                .get(&user_id)
                .cloned()
                .unwrap_or_else(|| UNKNOWN_PLAYER.to_string()),
            record: records.get(&user_id).copied().unwrap_or_default(),
            decided_in,
        })
        .collect();

    rows.sort_by(|a, b| {
        a.rank
            .cmp(&b.rank)
            .then(b.record.wins.cmp(&a.record.wins))
            .then_with(|| a.name.cmp(&b.name))
    });
    for (i, row) in rows.iter_mut().enumerate() {
        row.position = i + 1;
    }
    rows
}

/// Matches grouped by round name, largest round first
pub fn matches_by_round(matches: &[MatchRow]) -> Vec<(String, Vec<&MatchRow>)> {
    let mut rounds: Vec<(String, Vec<&MatchRow>)> = Vec::new();
    for m in matches {
        let name = m.round_name.clone().unwrap_or_else(|| "Unnamed".to_string());
        match rounds.iter_mut().find(|(n, _)| *n == name) {
            Some((_, list)) => list.push(m),
            None => rounds.push((name, vec![m])),
        }
    }
    rounds.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
    rounds
}
