//! Database models for player accounts.

use crate::types::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Player account, as previewed before a cleanup
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: UserId,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub rank: Option<String>,
    pub elo_rating: Option<i32>,
    pub spa_points: Option<i32>,
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    /// Best available human-readable name
    pub fn label(&self) -> &str {
        self.full_name
            .as_deref()
            .or(self.display_name.as_deref())
            .or(self.username.as_deref())
            .or(self.email.as_deref())
            .unwrap_or("(unnamed)")
    }
}

/// Rank and rating of a player, as read for the rank consistency check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRank {
    pub id: UserId,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub rank: Option<String>,
    pub elo_rating: i32,
}

impl UserRank {
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.username.as_deref())
            .unwrap_or("(unnamed)")
    }
}

/// Rows removed by a user cleanup, per table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UserCleanupCounts {
    pub tournament_participants: u64,
    pub matches: u64,
    pub club_members: u64,
    pub elo_history: u64,
    pub notifications: u64,
    pub users: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            username: Some("player1".to_string()),
            full_name: None,
            display_name: None,
            email: Some("player1@saboarena.com".to_string()),
            rank: Some("K".to_string()),
            elo_rating: Some(1000),
            spa_points: Some(0),
            created_at: None,
        }
    }

    #[test]
    fn test_label_prefers_full_name() {
        let mut u = user();
        assert_eq!(u.label(), "player1");
        u.full_name = Some("Nguyen Van A".to_string());
        assert_eq!(u.label(), "Nguyen Van A");
        u.full_name = None;
        u.username = None;
        assert_eq!(u.label(), "player1@saboarena.com");
    }
}
