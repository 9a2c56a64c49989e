//! Database models for tournaments and their participants.

use crate::types::{TournamentId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tournament {
    pub id: TournamentId,
    pub title: String,
    pub status: Option<String>,
    pub tournament_type: Option<String>,
    pub prize_distribution: Option<serde_json::Value>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A registered player with their display name resolved from `users`
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Participant {
    pub user_id: UserId,
    pub name: Option<String>,
}

/// Rows removed by a tournament cleanup, per table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TournamentCleanupCounts {
    pub matches: u64,
    pub participants: u64,
    pub results: u64,
    pub tournaments: u64,
}
