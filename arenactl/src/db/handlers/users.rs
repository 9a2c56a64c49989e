//! Database repository for player accounts.

use crate::{
    db::{
        errors::Result,
        models::users::{User, UserCleanupCounts},
    },
    types::UserId,
};
use sqlx::PgConnection;
use tracing::{debug, instrument};

pub struct Users<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Users<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Users whose email matches an `ILIKE` pattern, minus the excluded addresses
    /// (compared case-insensitively)
    #[instrument(skip(self, excluded), fields(excluded = excluded.len()), err)]
    pub async fn find_by_email_pattern(&mut self, pattern: &str, excluded: &[String]) -> Result<Vec<User>> {
        let excluded: Vec<String> = excluded.iter().map(|e| e.to_lowercase()).collect();
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, full_name, display_name, email, rank, elo_rating, spa_points, created_at
            FROM users
            WHERE email ILIKE $1
              AND lower(email) <> ALL($2)
            ORDER BY created_at ASC NULLS LAST, email ASC
            "#,
        )
        .bind(pattern)
        .bind(&excluded)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(users)
    }

    /// Delete users and every row that references them.
    ///
    /// Run this on a transaction; a failure part-way leaves dangling rows otherwise.
    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    pub async fn delete_with_dependents(&mut self, ids: &[UserId]) -> Result<UserCleanupCounts> {
        let tournament_participants = sqlx::query("DELETE FROM tournament_participants WHERE user_id = ANY($1)")
            .bind(ids)
            .execute(&mut *self.db)
            .await?
            .rows_affected();

        let matches = sqlx::query("DELETE FROM matches WHERE player1_id = ANY($1) OR player2_id = ANY($1)")
            .bind(ids)
            .execute(&mut *self.db)
            .await?
            .rows_affected();

        let club_members = sqlx::query("DELETE FROM club_members WHERE user_id = ANY($1)")
            .bind(ids)
            .execute(&mut *self.db)
            .await?
            .rows_affected();

        let elo_history = sqlx::query("DELETE FROM elo_history WHERE user_id = ANY($1)")
            .bind(ids)
            .execute(&mut *self.db)
            .await?
            .rows_affected();

        let notifications = sqlx::query("DELETE FROM notifications WHERE user_id = ANY($1)")
            .bind(ids)
            .execute(&mut *self.db)
            .await?
            .rows_affected();

        let users = sqlx::query("DELETE FROM users WHERE id = ANY($1)")
            .bind(ids)
            .execute(&mut *self.db)
            .await?
            .rows_affected();

        let counts = UserCleanupCounts {
            tournament_participants,
            matches,
            club_members,
            elo_history,
            notifications,
            users,
        };
        debug!(?counts, "Deleted users with dependents");
        Ok(counts)
    }
}
