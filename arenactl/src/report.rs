//! Read-only reports over live data.
//!
//! Each report fetches what it needs, prints a human-readable summary to stdout and returns
//! the data it printed so callers and tests can inspect it.

use sqlx::PgPool;
use std::collections::HashMap;
use tracing::instrument;

use crate::cleanup::single_tournament;
use crate::db::handlers::{Matches, Rewards, Tournaments};
use crate::db::models::handicap::HandicapRuleRow;
use crate::db::models::matches::MatchRow;
use crate::db::models::ranks::RankSystemRow;
use crate::db::models::results::{RewardCounts, TournamentResult};
use crate::db::models::tournaments::Tournament;
use crate::db::models::users::UserRank;
use crate::errors::{Error, Result};
use crate::ranking::bracket::{self, Standing, UNKNOWN_PLAYER};
use crate::ranking::handicap::{HandicapScheme, HandicapTable, HandicapVerification};
use crate::ranking::prizes::PrizeDistribution;
use crate::ranking::ranks::{BandDrift, RankCode, UserRankIssue, band, check_user_rank, compare_bands};
use crate::rest::{Filter, RestClient};
use crate::seed::{fetch_handicap_rules, fetch_ranks};
use crate::types::{UserId, abbrev_uuid};

/// The single tournament with this title
pub async fn find_tournament(pool: &PgPool, title: &str) -> Result<Tournament> {
    let mut conn = pool.acquire().await?;
    let found = Tournaments::new(&mut conn).find_by_title(title).await?;
    single_tournament(title, found)?.ok_or_else(|| Error::NotFound {
        resource: "Tournament".to_string(),
        id: title.to_string(),
    })
}

fn player_name(names: &HashMap<UserId, String>, id: Option<UserId>) -> String {
    match id {
        Some(id) => names.get(&id).cloned().unwrap_or_else(|| UNKNOWN_PLAYER.to_string()),
        None => "TBD".to_string(),
    }
}

fn score(value: Option<i32>) -> String {
    value.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string())
}

/// One line per match: `#3  Anh 7 - 3 Binh  -> Anh  [completed]`
pub fn format_match(m: &MatchRow, names: &HashMap<UserId, String>) -> String {
    let winner = match m.winner_id {
        Some(id) => player_name(names, Some(id)),
        None => "?".to_string(),
    };
    format!(
        "#{:<3} {} {} - {} {}  -> {}  [{}]",
        m.match_number.map(|n| n.to_string()).unwrap_or_else(|| "?".to_string()),
        player_name(names, m.player1_id),
        score(m.player1_score),
        score(m.player2_score),
        player_name(names, m.player2_id),
        winner,
        m.status.as_deref().unwrap_or("unknown"),
    )
}

fn print_standings(rows: &[Standing]) {
    println!("{:>3} {:>4}  {:<24} {:>3} {:>3}  {}", "POS", "RANK", "PLAYER", "W", "L", "OUT IN");
    for row in rows {
        println!(
            "{:>3} {:>4}  {:<24} {:>3} {:>3}  {:?}",
            row.position, row.rank, row.name, row.record.wins, row.record.losses, row.decided_in
        );
    }
}

fn print_results(results: &[TournamentResult]) {
    println!("{:>3}  {:<24} {:>6} {:>6} {:>12}", "POS", "PLAYER", "ELO", "SPA", "PRIZE VND");
    for r in results {
        println!(
            "{:>3}  {:<24} {:>6} {:>6} {:>12}",
            score(r.position),
            r.participant_name.as_deref().unwrap_or(UNKNOWN_PLAYER),
            r.elo_change.map(|e| format!("{e:+}")).unwrap_or_else(|| "-".to_string()),
            score(r.spa_reward),
            r.prize_money_vnd.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
        );
    }
}

/// Matches by round, bracket standings and stored results of one tournament
#[instrument(skip(pool), err)]
pub async fn standings(pool: &PgPool, title: &str) -> Result<Vec<Standing>> {
    let tournament = find_tournament(pool, title).await?;

    let mut conn = pool.acquire().await?;
    let names: HashMap<UserId, String> = Tournaments::new(&mut conn)
        .participants(tournament.id)
        .await?
        .into_iter()
        .map(|p| (p.user_id, p.name.unwrap_or_else(|| UNKNOWN_PLAYER.to_string())))
        .collect();
    let matches = Matches::new(&mut conn).list_for_tournament(tournament.id).await?;
    let results = Rewards::new(&mut conn).results(tournament.id).await?;

    println!(
        "{} ({}) status {}, {} participants, {} matches",
        tournament.title,
        abbrev_uuid(&tournament.id),
        tournament.status.as_deref().unwrap_or("unknown"),
        names.len(),
        matches.len()
    );

    for (round, round_matches) in bracket::matches_by_round(&matches) {
        println!("\n{round} ({} matches)", round_matches.len());
        for m in round_matches {
            println!("  {}", format_match(m, &names));
        }
    }

    let rows = bracket::standings(&matches, &names);
    println!();
    if rows.is_empty() {
        println!("No standings yet: no final, semifinal or quarterfinal has a winner.");
    } else {
        print_standings(&rows);
    }

    println!();
    if results.is_empty() {
        println!("No tournament_results rows.");
    } else {
        println!("tournament_results:");
        print_results(&results);
    }

    Ok(rows)
}

/// "distributed" or what is still missing
pub fn reward_verdict(counts: &RewardCounts) -> String {
    if counts.is_distributed() {
        return "distributed".to_string();
    }
    let missing: Vec<&str> = [
        ("tournament_results", counts.results),
        ("elo_history", counts.elo_history),
        ("spa_transactions", counts.spa_transactions),
    ]
    .into_iter()
    .filter(|(_, n)| *n == 0)
    .map(|(table, _)| table)
    .collect();
    format!("not distributed (no {} rows)", missing.join(", "))
}

/// Check that reward distribution ran for a tournament.
///
/// A tournament without results, ELO history and SPA transactions fails with
/// [`Error::Incomplete`].
#[instrument(skip(pool), err)]
pub async fn verify_rewards(pool: &PgPool, title: &str) -> Result<RewardCounts> {
    let tournament = find_tournament(pool, title).await?;
    let counts = {
        let mut conn = pool.acquire().await?;
        Rewards::new(&mut conn).counts(tournament.id).await?
    };

    println!(
        "{} ({}) status {}",
        tournament.title,
        abbrev_uuid(&tournament.id),
        tournament.status.as_deref().unwrap_or("unknown")
    );
    println!("  tournament_results {:>6}", counts.results);
    println!("  elo_history        {:>6}", counts.elo_history);
    println!("  spa_transactions   {:>6}", counts.spa_transactions);
    println!("  notifications      {:>6}", counts.notifications);
    println!("Rewards: {}", reward_verdict(&counts));

    if counts.is_distributed() {
        Ok(counts)
    } else {
        let succeeded = [counts.results, counts.elo_history, counts.spa_transactions]
            .iter()
            .filter(|n| **n > 0)
            .count();
        Err(Error::Incomplete {
            operation: "reward distribution".to_string(),
            attempted: 3,
            succeeded,
        })
    }
}

/// Table of live rank bands next to the standard ones
pub fn print_ranks(rows: &[RankSystemRow], drift: &[BandDrift]) {
    println!("{:<5} {:>5}  {:<12} {:<12} {}", "CODE", "ORDER", "LIVE", "EXPECTED", "NAME");
    for row in rows {
        let live = match row.elo_max {
            Some(max) => format!("{}-{}", row.elo_min, max),
            None => format!("{}-MAX", row.elo_min),
        };
        let expected = row
            .rank_code
            .parse::<RankCode>()
            .map(|code| band(code).to_string())
            .unwrap_or_else(|_| "-".to_string());
        let mark = if expected == live { "" } else { "  <-- drift" };
        println!(
            "{:<5} {:>5}  {:<12} {:<12} {}{}",
            row.rank_code,
            score(row.rank_order),
            live,
            expected,
            row.display_name.as_deref().unwrap_or(""),
            mark
        );
    }

    if drift.is_empty() {
        println!("\nrank_system matches the standard bands.");
    } else {
        println!("\n{} differences:", drift.len());
        for d in drift {
            println!("  {d}");
        }
    }
}

#[instrument(skip(client), err)]
pub async fn ranks_show(client: &RestClient) -> Result<Vec<BandDrift>> {
    let rows = fetch_ranks(client).await?;
    let drift = compare_bands(&rows);
    print_ranks(&rows, &drift);
    Ok(drift)
}

/// A player whose stored rank does not fit their rating
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankMismatch {
    pub user: UserRank,
    pub issue: UserRankIssue,
}

/// Users whose stored rank is retired, missing, or not the one their ELO implies
pub fn rank_mismatches(users: &[UserRank]) -> Vec<RankMismatch> {
    users
        .iter()
        .filter_map(|user| {
            check_user_rank(user.rank.as_deref(), user.elo_rating).map(|issue| RankMismatch {
                user: user.clone(),
                issue,
            })
        })
        .collect()
}

fn print_rank_mismatches(checked: usize, mismatches: &[RankMismatch]) {
    if mismatches.is_empty() {
        println!("All {checked} rated users hold the rank their ELO implies.");
        return;
    }
    println!("{} of {checked} rated users need a rank update:", mismatches.len());
    println!("{:<10} {:<24} {:>6}  {}", "ID", "PLAYER", "ELO", "PROBLEM");
    for m in mismatches {
        println!(
            "{:<10} {:<24} {:>6}  {}",
            abbrev_uuid(&m.user.id),
            m.user.label(),
            m.user.elo_rating,
            m.issue
        );
    }
}

/// Check every rated user's stored rank against [`crate::ranking::ranks::expected_rank`].
///
/// Any mismatch ends in [`Error::Incomplete`].
#[instrument(skip(client), err)]
pub async fn check_user_ranks(client: &RestClient) -> Result<Vec<UserRank>> {
    let users: Vec<UserRank> = client
        .select(
            "users",
            "id,username,display_name,rank,elo_rating",
            &[Filter::gt("elo_rating", 0)],
            Some("elo_rating.desc"),
        )
        .await?;

    let mismatches = rank_mismatches(&users);
    print_rank_mismatches(users.len(), &mismatches);

    if mismatches.is_empty() {
        Ok(users)
    } else {
        Err(Error::Incomplete {
            operation: "user rank check".to_string(),
            attempted: users.len(),
            succeeded: users.len() - mismatches.len(),
        })
    }
}

/// Table of live handicap rules with the scheme's expected value alongside
pub fn print_handicap(scheme: HandicapScheme, rows: &[HandicapRuleRow], verification: &HandicapVerification) {
    let table = HandicapTable::new(scheme);
    println!("Expected scheme: {scheme} ({} rules)", table.rules().len());
    println!("{:<10} {:>5} {:>6} {:>8} {:>9}", "TYPE", "DIFF", "BET", "LIVE", "EXPECTED");
    for row in rows {
        let bet = row.bet_amount.filter(|b| *b != 0);
        let expected = table
            .rules()
            .iter()
            .find(|r| r.rank_difference_type.to_string() == row.rank_difference_type && r.bet_amount == bet)
            .map(|r| r.handicap_value);
        let mark = match (row.handicap_value, expected) {
            (Some(live), Some(exp)) if (live - exp).abs() < 1e-9 => "",
            _ => "  <-- drift",
        };
        println!(
            "{:<10} {:>5} {:>6} {:>8} {:>9}{}",
            row.rank_difference_type,
            score(row.rank_difference_value),
            bet.map(|b| b.to_string()).unwrap_or_else(|| "-".to_string()),
            row.handicap_value.map(|v| v.to_string()).unwrap_or_else(|| "NULL".to_string()),
            expected.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string()),
            mark
        );
    }

    let problems = verification.problems();
    if problems.is_empty() {
        println!("\nhandicap_rules matches the {scheme} scheme.");
    } else {
        println!("\n{} problems:", problems.len());
        for problem in problems {
            println!("  {problem}");
        }
    }
}

#[instrument(skip(client), err)]
pub async fn handicap_show(client: &RestClient, scheme: HandicapScheme) -> Result<HandicapVerification> {
    let rows = fetch_handicap_rules(client).await?;
    let verification = HandicapTable::new(scheme).verify(&rows);
    print_handicap(scheme, &rows, &verification);
    Ok(verification)
}

/// Slot table of a prize distribution
pub fn print_distribution(distribution: &PrizeDistribution) {
    println!(
        "Template {}, source {}, pool {} VND",
        distribution.template, distribution.source, distribution.total_prize_pool
    );
    println!("{:>3} {:>14} {:>14} {:>7}", "POS", "CASH VND", "VOUCHER VND", "%");
    for slot in &distribution.distribution {
        println!(
            "{:>3} {:>14} {:>14} {:>7.2}",
            slot.position, slot.cash_amount, slot.voucher_amount, slot.percentage
        );
    }
    println!(
        "Total: {} VND cash, {} VND vouchers",
        distribution.total_cash(),
        distribution.total_vouchers()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranking::bracket::tests::completed;
    use crate::rest::tests::client_for;
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_format_match() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let names: HashMap<UserId, String> = [(a, "Anh".to_string())].into_iter().collect();

        let m = completed("Final", 1, a, b);
        assert_eq!(format_match(&m, &names), "#1   Anh 7 - 3 Unknown  -> Anh  [completed]");

        let pending = MatchRow {
            player2_id: None,
            winner_id: None,
            player1_score: None,
            player2_score: None,
            status: Some("pending".to_string()),
            ..m
        };
        assert_eq!(format_match(&pending, &names), "#1   Anh - - - TBD  -> ?  [pending]");
    }

    #[test]
    fn test_reward_verdict() {
        let mut counts = RewardCounts {
            results: 8,
            elo_history: 0,
            spa_transactions: 0,
            notifications: 0,
        };
        assert_eq!(
            reward_verdict(&counts),
            "not distributed (no elo_history, spa_transactions rows)"
        );
        counts.elo_history = 8;
        counts.spa_transactions = 8;
        assert_eq!(reward_verdict(&counts), "distributed");
    }

    #[tokio::test]
    async fn test_ranks_show_reports_drift() {
        let server = MockServer::start().await;
        let mut rows: Vec<serde_json::Value> = crate::ranking::ranks::STANDARD_BANDS
            .iter()
            .map(|b| {
                json!({
                    "rank_code": b.code.as_str(),
                    "rank_order": b.code.order(),
                    "elo_min": b.elo_min,
                    "elo_max": b.elo_max,
                    "display_name": null,
                })
            })
            .collect();
        rows[9]["elo_min"] = json!(2000);
        rows.push(json!({"rank_code": "K+", "rank_order": 2, "elo_min": 1050, "elo_max": 1099, "display_name": "K+"}));
        Mock::given(method("GET"))
            .and(path("/rest/v1/rank_system"))
            .respond_with(ResponseTemplate::new(200).set_body_json(rows))
            .mount(&server)
            .await;

        let drift = ranks_show(&client_for(&server)).await.unwrap();
        assert_eq!(drift.len(), 2);
        assert!(matches!(drift[0], BandDrift::Range { code: RankCode::C, .. }));
        assert_eq!(drift[1], BandDrift::Retired("K+".to_string()));
    }

    #[tokio::test]
    async fn test_handicap_show_flags_null_values() {
        let server = MockServer::start().await;
        let mut rows: Vec<serde_json::Value> = HandicapScheme::Basic
            .rules()
            .iter()
            .map(|r| serde_json::to_value(r).unwrap())
            .collect();
        rows[0]["handicap_value"] = json!(null);
        Mock::given(method("GET"))
            .and(path("/rest/v1/handicap_rules"))
            .respond_with(ResponseTemplate::new(200).set_body_json(rows))
            .mount(&server)
            .await;

        let verification = handicap_show(&client_for(&server), HandicapScheme::Basic)
            .await
            .unwrap();
        assert_eq!(verification.null_values, 1);
        assert!(verification.missing.is_empty());
        assert_eq!(verification.actual_count, 9);
        assert!(!verification.is_clean());
    }

    fn rated(rank: Option<&str>, elo: i32) -> serde_json::Value {
        json!({
            "id": Uuid::new_v4(),
            "username": format!("player_{elo}"),
            "display_name": null,
            "rank": rank,
            "elo_rating": elo,
        })
    }

    #[test_log::test(tokio::test)]
    async fn test_check_user_ranks_flags_retired_and_stale() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/users"))
            .and(query_param("elo_rating", "gt.0"))
            .and(query_param("order", "elo_rating.desc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                rated(Some("C"), 1950),
                rated(Some("I"), 1250),
                rated(Some("K+"), 1120),
                rated(Some("K"), 1010),
            ])))
            .expect(1)
            .mount(&server)
            .await;

        match check_user_ranks(&client_for(&server)).await {
            Err(Error::Incomplete {
                attempted, succeeded, ..
            }) => {
                assert_eq!(attempted, 4);
                assert_eq!(succeeded, 2);
            }
            other => panic!("expected Incomplete, got {other:?}"),
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_check_user_ranks_clean() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/users"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([rated(Some("H+"), 1399), rated(Some("K"), 640)])),
            )
            .mount(&server)
            .await;

        let users = check_user_ranks(&client_for(&server)).await.unwrap();
        assert_eq!(users.len(), 2);
    }

    #[test]
    fn test_rank_mismatches() {
        let users: Vec<UserRank> = serde_json::from_value(json!([
            rated(Some("G"), 1450),
            rated(None, 1450),
            rated(Some("I+"), 1310),
        ]))
        .unwrap();
        let mismatches = rank_mismatches(&users);
        assert_eq!(mismatches.len(), 2);
        assert_eq!(mismatches[0].user.id, users[1].id);
        assert_eq!(mismatches[0].issue, UserRankIssue::Unranked { expected: RankCode::G });
        assert_eq!(mismatches[1].issue.expected(), RankCode::HPlus);
        assert_eq!(mismatches[1].user.label(), "player_1310");
    }

}
