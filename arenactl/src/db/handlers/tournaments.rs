//! Database repository for tournaments.

use crate::{
    db::{
        errors::Result,
        models::tournaments::{Participant, Tournament, TournamentCleanupCounts},
    },
    types::TournamentId,
};
use sqlx::PgConnection;
use tracing::{debug, instrument};

const TOURNAMENT_COLUMNS: &str =
    "id, title, status, tournament_type, prize_distribution, completed_at, updated_at";

pub struct Tournaments<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Tournaments<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Tournaments with an exact title. Titles are not unique, so callers decide what to do
    /// with more than one.
    #[instrument(skip(self), err)]
    pub async fn find_by_title(&mut self, title: &str) -> Result<Vec<Tournament>> {
        let tournaments = sqlx::query_as::<_, Tournament>(&format!(
            "SELECT {TOURNAMENT_COLUMNS} FROM tournaments WHERE title = $1 ORDER BY updated_at DESC NULLS LAST"
        ))
        .bind(title)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(tournaments)
    }

    /// Tournaments in one of the given statuses that have a completed match with no winner
    #[instrument(skip(self), err)]
    pub async fn list_with_broken_matches(&mut self, statuses: &[String]) -> Result<Vec<Tournament>> {
        let tournaments = sqlx::query_as::<_, Tournament>(&format!(
            r#"
            SELECT {TOURNAMENT_COLUMNS}
            FROM tournaments t
            WHERE t.status = ANY($1)
              AND EXISTS (
                  SELECT 1 FROM matches m
                  WHERE m.tournament_id = t.id
                    AND m.status = 'completed'
                    AND m.winner_id IS NULL
              )
            ORDER BY t.title
            "#
        ))
        .bind(statuses)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(tournaments)
    }

    /// Registered players with names resolved from `users`
    #[instrument(skip(self), err)]
    pub async fn participants(&mut self, id: TournamentId) -> Result<Vec<Participant>> {
        let participants = sqlx::query_as::<_, Participant>(
            r#"
            SELECT tp.user_id, COALESCE(u.full_name, u.display_name, u.username) AS name
            FROM tournament_participants tp
            LEFT JOIN users u ON u.id = tp.user_id
            WHERE tp.tournament_id = $1
            "#,
        )
        .bind(id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(participants)
    }

    #[instrument(skip(self, distribution), err)]
    pub async fn set_prize_distribution(&mut self, id: TournamentId, distribution: &serde_json::Value) -> Result<bool> {
        let updated = sqlx::query("UPDATE tournaments SET prize_distribution = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(distribution)
            .execute(&mut *self.db)
            .await?
            .rows_affected();

        Ok(updated > 0)
    }

    /// Delete a tournament's matches and, unless `matches_only`, its participants, results and
    /// the tournament row itself
    #[instrument(skip(self), err)]
    pub async fn delete_cascade(&mut self, id: TournamentId, matches_only: bool) -> Result<TournamentCleanupCounts> {
        let mut counts = TournamentCleanupCounts {
            matches: sqlx::query("DELETE FROM matches WHERE tournament_id = $1")
                .bind(id)
                .execute(&mut *self.db)
                .await?
                .rows_affected(),
            ..Default::default()
        };

        if !matches_only {
            counts.participants = sqlx::query("DELETE FROM tournament_participants WHERE tournament_id = $1")
                .bind(id)
                .execute(&mut *self.db)
                .await?
                .rows_affected();
            counts.results = sqlx::query("DELETE FROM tournament_results WHERE tournament_id = $1")
                .bind(id)
                .execute(&mut *self.db)
                .await?
                .rows_affected();
            counts.tournaments = sqlx::query("DELETE FROM tournaments WHERE id = $1")
                .bind(id)
                .execute(&mut *self.db)
                .await?
                .rows_affected();
        }

        debug!(?counts, "Deleted tournament rows");
        Ok(counts)
    }
}
