//! Database models for bracket matches.

use crate::types::{MatchId, TournamentId, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MatchRow {
    pub id: MatchId,
    pub tournament_id: TournamentId,
    pub round_number: Option<i32>,
    pub round_name: Option<String>,
    pub match_number: Option<i32>,
    pub player1_id: Option<UserId>,
    pub player2_id: Option<UserId>,
    pub winner_id: Option<UserId>,
    pub loser_id: Option<UserId>,
    pub player1_score: Option<i32>,
    pub player2_score: Option<i32>,
    pub status: Option<String>,
}
