//! Database repository for tournament results and reward bookkeeping.

use crate::{
    db::{
        errors::Result,
        models::results::{RewardCounts, TournamentResult},
    },
    types::TournamentId,
};
use sqlx::PgConnection;
use tracing::instrument;

pub struct Rewards<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Rewards<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), err)]
    pub async fn results(&mut self, tournament_id: TournamentId) -> Result<Vec<TournamentResult>> {
        let results = sqlx::query_as::<_, TournamentResult>(
            r#"
            SELECT participant_id, participant_name, position, elo_change, spa_reward, prize_money_vnd
            FROM tournament_results
            WHERE tournament_id = $1
            ORDER BY position ASC NULLS LAST
            "#,
        )
        .bind(tournament_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(results)
    }

    /// Rows written by reward distribution. Notifications are matched through the tournament's
    /// participants since they carry no tournament id.
    #[instrument(skip(self), err)]
    pub async fn counts(&mut self, tournament_id: TournamentId) -> Result<RewardCounts> {
        let counts = sqlx::query_as::<_, RewardCounts>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM tournament_results WHERE tournament_id = $1) AS results,
                (SELECT COUNT(*) FROM elo_history WHERE tournament_id = $1) AS elo_history,
                (SELECT COUNT(*) FROM spa_transactions
                 WHERE reference_id = $1 AND transaction_type = 'tournament_reward') AS spa_transactions,
                (SELECT COUNT(*) FROM notifications
                 WHERE type = 'tournament_completed'
                   AND user_id IN (SELECT user_id FROM tournament_participants WHERE tournament_id = $1)) AS notifications
            "#,
        )
        .bind(tournament_id)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(counts)
    }
}
