//! Destructive cleanup of test accounts and tournaments.
//!
//! Every cleanup previews what it will remove, asks the operator to type a phrase that names
//! the damage (`DELETE 12 USERS`), and deletes inside one transaction so a failure leaves the
//! database untouched. `--yes` skips the prompt for scripted use.

use async_trait::async_trait;
use dialoguer::Input;
use sqlx::PgPool;
use tracing::{info, instrument, warn};

use crate::config::CleanupConfig;
use crate::db::handlers::{Matches, Tournaments, Users};
use crate::db::models::tournaments::{Tournament, TournamentCleanupCounts};
use crate::db::models::users::{User, UserCleanupCounts};
use crate::errors::{Error, Result};
use crate::types::{Operation, TournamentId, UserId, abbrev_uuid};

/// Phrase the operator types to delete `count` users
pub fn users_phrase(count: usize) -> String {
    format!("{} {count} USERS", Operation::Delete)
}

/// Phrase the operator types to delete a tournament
pub fn tournament_phrase(title: &str) -> String {
    format!("{} TOURNAMENT {title}", Operation::Delete)
}

/// Exact match after trimming surrounding whitespace
pub fn phrase_matches(input: &str, expected: &str) -> bool {
    input.trim() == expected
}

/// Ask for the confirmation phrase unless `assume_yes`
pub fn confirm(expected: &str, assume_yes: bool) -> Result<()> {
    if assume_yes {
        info!(phrase = expected, "Confirmation skipped with --yes");
        return Ok(());
    }

    let input = Input::<String>::new()
        .with_prompt(format!("Type '{expected}' to continue"))
        .allow_empty(true)
        .interact_text()
        .map_err(|e| Error::Aborted {
            message: format!("could not read confirmation ({e}); pass --yes to run without a terminal"),
        })?;

    if phrase_matches(&input, expected) {
        Ok(())
    } else {
        Err(Error::Aborted {
            message: "confirmation did not match, nothing was deleted".to_string(),
        })
    }
}

/// Protected addresses plus `--keep` addresses, lowercased and deduplicated
pub fn excluded_emails(config: &CleanupConfig, keep: &[String]) -> Vec<String> {
    let mut emails: Vec<String> = config
        .protected_emails
        .iter()
        .chain(keep)
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .collect();
    emails.sort();
    emails.dedup();
    emails
}

/// Reject patterns that would select every account
pub fn check_pattern(pattern: &str) -> Result<()> {
    if pattern.trim().trim_matches('%').trim_matches('_').is_empty() {
        return Err(Error::BadRequest {
            message: format!("email pattern {pattern:?} would match every user"),
        });
    }
    Ok(())
}

/// Lookups and deletions behind the cleanup commands
#[async_trait]
pub trait CleanupStore: Send + Sync {
    async fn find_users(&self, pattern: &str, excluded: &[String]) -> Result<Vec<User>>;

    /// Delete users and their dependents in one transaction
    async fn delete_users(&self, ids: &[UserId]) -> Result<UserCleanupCounts>;

    /// Tournaments titled `title`, each with its match count
    async fn find_tournaments(&self, title: &str) -> Result<Vec<(Tournament, usize)>>;

    /// Delete a tournament's rows in one transaction
    async fn delete_tournament(&self, id: TournamentId, matches_only: bool) -> Result<TournamentCleanupCounts>;
}

#[async_trait]
impl CleanupStore for PgPool {
    async fn find_users(&self, pattern: &str, excluded: &[String]) -> Result<Vec<User>> {
        let mut conn = self.acquire().await?;
        Ok(Users::new(&mut conn).find_by_email_pattern(pattern, excluded).await?)
    }

    async fn delete_users(&self, ids: &[UserId]) -> Result<UserCleanupCounts> {
        let mut tx = self.begin().await?;
        let counts = Users::new(&mut tx).delete_with_dependents(ids).await?;
        tx.commit().await?;
        Ok(counts)
    }

    async fn find_tournaments(&self, title: &str) -> Result<Vec<(Tournament, usize)>> {
        let mut conn = self.acquire().await?;
        let found = Tournaments::new(&mut conn).find_by_title(title).await?;
        let mut with_counts = Vec::with_capacity(found.len());
        for tournament in found {
            let matches = Matches::new(&mut conn).list_for_tournament(tournament.id).await?.len();
            with_counts.push((tournament, matches));
        }
        Ok(with_counts)
    }

    async fn delete_tournament(&self, id: TournamentId, matches_only: bool) -> Result<TournamentCleanupCounts> {
        let mut tx = self.begin().await?;
        let counts = Tournaments::new(&mut tx).delete_cascade(id, matches_only).await?;
        tx.commit().await?;
        Ok(counts)
    }
}

fn print_users(users: &[User]) {
    println!("{:<10} {:<36} {:<24} {:>5} {:>6}", "ID", "EMAIL", "NAME", "RANK", "ELO");
    for user in users {
        println!(
            "{:<10} {:<36} {:<24} {:>5} {:>6}",
            abbrev_uuid(&user.id),
            user.email.as_deref().unwrap_or("-"),
            user.label(),
            user.rank.as_deref().unwrap_or("-"),
            user.elo_rating.map(|e| e.to_string()).unwrap_or_else(|| "-".to_string()),
        );
    }
}

fn print_user_counts(counts: &UserCleanupCounts) {
    println!("Deleted:");
    println!("  tournament_participants {:>6}", counts.tournament_participants);
    println!("  matches                 {:>6}", counts.matches);
    println!("  club_members            {:>6}", counts.club_members);
    println!("  elo_history             {:>6}", counts.elo_history);
    println!("  notifications           {:>6}", counts.notifications);
    println!("  users                   {:>6}", counts.users);
}

/// Delete users matching an `ILIKE` email pattern along with everything that references them.
///
/// Returns `None` when nothing matched.
#[instrument(skip(store, config, keep), err)]
pub async fn cleanup_users(
    store: &impl CleanupStore,
    config: &CleanupConfig,
    pattern: Option<&str>,
    keep: &[String],
    assume_yes: bool,
) -> Result<Option<UserCleanupCounts>> {
    let pattern = pattern.unwrap_or(&config.test_email_pattern);
    check_pattern(pattern)?;
    let excluded = excluded_emails(config, keep);

    let users = store.find_users(pattern, &excluded).await?;

    if users.is_empty() {
        println!("No users match {pattern:?}. Nothing to do.");
        return Ok(None);
    }

    println!("{} users match {pattern:?} ({} addresses excluded):", users.len(), excluded.len());
    print_users(&users);

    confirm(&users_phrase(users.len()), assume_yes)?;

    let ids: Vec<_> = users.iter().map(|u| u.id).collect();
    let counts = store.delete_users(&ids).await?;

    if counts.users != ids.len() as u64 {
        warn!(expected = ids.len(), deleted = counts.users, "Some users were already gone");
    }
    print_user_counts(&counts);
    Ok(Some(counts))
}

/// Exactly one tournament by title; `None` if there is none
pub fn single_tournament<T>(title: &str, mut found: Vec<T>) -> Result<Option<T>> {
    match found.len() {
        0 => Ok(None),
        1 => Ok(found.pop()),
        n => Err(Error::BadRequest {
            message: format!("{n} tournaments are titled {title:?}; rename the duplicates first"),
        }),
    }
}

/// Delete a tournament's matches, and unless `matches_only` its participants, results and
/// the tournament itself.
///
/// Returns `None` when no tournament has the title.
#[instrument(skip(store), err)]
pub async fn cleanup_tournament(
    store: &impl CleanupStore,
    title: &str,
    matches_only: bool,
    assume_yes: bool,
) -> Result<Option<TournamentCleanupCounts>> {
    let Some((tournament, match_count)) = single_tournament(title, store.find_tournaments(title).await?)? else {
        println!("No tournament titled {title:?}. Nothing to do.");
        return Ok(None);
    };

    println!(
        "Tournament {:?} ({}), status {}, {} matches",
        tournament.title,
        abbrev_uuid(&tournament.id),
        tournament.status.as_deref().unwrap_or("unknown"),
        match_count
    );
    if matches_only {
        println!("Only the matches will be deleted.");
    } else {
        println!("Matches, participants, results and the tournament itself will be deleted.");
    }

    confirm(&tournament_phrase(&tournament.title), assume_yes)?;

    let counts = store.delete_tournament(tournament.id, matches_only).await?;

    println!("Deleted:");
    println!("  matches      {:>6}", counts.matches);
    if !matches_only {
        println!("  participants {:>6}", counts.participants);
        println!("  results      {:>6}", counts.results);
        println!("  tournaments  {:>6}", counts.tournaments);
    }
    Ok(Some(counts))
}
