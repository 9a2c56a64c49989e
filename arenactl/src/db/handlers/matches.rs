//! Database repository for bracket matches.

use crate::{
    db::{errors::Result, models::matches::MatchRow},
    types::{MatchId, TournamentId, UserId},
};
use sqlx::PgConnection;
use tracing::instrument;

const MATCH_COLUMNS: &str = "id, tournament_id, round_number, round_name, match_number, player1_id, player2_id, \
     winner_id, loser_id, player1_score, player2_score, status";

/// Which player column of a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerSlot {
    Player1,
    Player2,
}

impl PlayerSlot {
    fn column(self) -> &'static str {
        match self {
            PlayerSlot::Player1 => "player1_id",
            PlayerSlot::Player2 => "player2_id",
        }
    }
}

pub struct Matches<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Matches<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// All matches of a tournament, by round then match number
    #[instrument(skip(self), err)]
    pub async fn list_for_tournament(&mut self, tournament_id: TournamentId) -> Result<Vec<MatchRow>> {
        let matches = sqlx::query_as::<_, MatchRow>(&format!(
            "SELECT {MATCH_COLUMNS} FROM matches WHERE tournament_id = $1 \
             ORDER BY round_number ASC NULLS LAST, match_number ASC NULLS LAST"
        ))
        .bind(tournament_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(matches)
    }

    /// Set winner and loser on a match that has none yet. Returns false if another writer got
    /// there first.
    #[instrument(skip(self), err)]
    pub async fn record_result(&mut self, id: MatchId, winner: UserId, loser: UserId) -> Result<bool> {
        let updated = sqlx::query("UPDATE matches SET winner_id = $2, loser_id = $3 WHERE id = $1 AND winner_id IS NULL")
            .bind(id)
            .bind(winner)
            .bind(loser)
            .execute(&mut *self.db)
            .await?
            .rows_affected();

        Ok(updated > 0)
    }

    /// Put a player into an empty slot and mark the match pending
    #[instrument(skip(self), err)]
    pub async fn place_player(&mut self, id: MatchId, slot: PlayerSlot, player: UserId) -> Result<bool> {
        let column = slot.column();
        let updated = sqlx::query(&format!(
            "UPDATE matches SET {column} = $2, status = 'pending' WHERE id = $1 AND {column} IS NULL"
        ))
        .bind(id)
        .bind(player)
        .execute(&mut *self.db)
        .await?
        .rows_affected();

        Ok(updated > 0)
    }
}
