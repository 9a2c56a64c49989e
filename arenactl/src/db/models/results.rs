//! Database models for tournament results and reward bookkeeping.

use crate::types::UserId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TournamentResult {
    pub participant_id: Option<UserId>,
    pub participant_name: Option<String>,
    pub position: Option<i32>,
    pub elo_change: Option<i32>,
    pub spa_reward: Option<i32>,
    pub prize_money_vnd: Option<i64>,
}

/// Row counts left behind by reward distribution for one tournament
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RewardCounts {
    pub results: i64,
    pub elo_history: i64,
    pub spa_transactions: i64,
    pub notifications: i64,
}

impl RewardCounts {
    /// Rewards count as distributed once results, ELO history and SPA transactions all exist.
    /// Notifications are informational.
    pub fn is_distributed(&self) -> bool {
        self.results > 0 && self.elo_history > 0 && self.spa_transactions > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distributed_needs_three_tables() {
        let mut counts = RewardCounts {
            results: 8,
            elo_history: 8,
            spa_transactions: 0,
            notifications: 8,
        };
        assert!(!counts.is_distributed());
        counts.spa_transactions = 8;
        assert!(counts.is_distributed());
        counts.notifications = 0;
        assert!(counts.is_distributed());
        assert!(!RewardCounts::default().is_distributed());
    }
}
