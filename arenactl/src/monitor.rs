//! Repair loop for matches that were completed without a winner.
//!
//! The app occasionally marks a match `completed` with scores but never writes `winner_id`,
//! which stalls the bracket. Each pass finds those matches, decides the winner from the
//! recorded scores, and moves the winner into the next round. Matches whose scores do not
//! decide a winner are left alone and reported.
//!
//! Planning is pure ([`plan_repairs`]); [`run_pass`] applies a plan per tournament inside one
//! transaction.

use sqlx::PgPool;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error as ThisError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::MonitorConfig;
use crate::db::handlers::{Matches, PlayerSlot, Tournaments};
use crate::db::models::matches::MatchRow;
use crate::errors::Result;
use crate::types::{MatchId, UserId, abbrev_uuid};

/// Why a match was not repaired or a winner not advanced
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum SkipReason {
    #[error("match does not have two players")]
    MissingPlayers,
    #[error("match has no score for one or both players")]
    MissingScores,
    #[error("scores are tied at {0}")]
    Tied(i32),
    #[error("match has no round number")]
    NoRoundNumber,
    #[error("round {round} has no match for bracket position {index}")]
    NoTargetMatch { round: i32, index: usize },
    #[error("{slot:?} of match {} already holds another player", abbrev_uuid(match_id))]
    SlotTaken { match_id: MatchId, slot: PlayerSlot },
}

/// Winner and loser to record on a broken match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repair {
    pub match_id: MatchId,
    pub winner: UserId,
    pub loser: UserId,
}

/// A winner moving into a slot of the next round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advancement {
    pub from_match: MatchId,
    pub to_match: MatchId,
    pub slot: PlayerSlot,
    pub player: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skip {
    pub match_id: MatchId,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairPlan {
    pub results: Vec<Repair>,
    pub advancements: Vec<Advancement>,
    pub skipped: Vec<Skip>,
}

impl RepairPlan {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty() && self.advancements.is_empty()
    }

    /// Advancements out of the matches whose result this pass actually wrote
    pub fn advancements_from<'a>(&'a self, recorded: &'a [MatchId]) -> impl Iterator<Item = &'a Advancement> + 'a {
        self.advancements
            .iter()
            .filter(move |a| recorded.contains(&a.from_match))
    }
}

/// True for a match the app closed without recording a winner
pub fn is_broken(m: &MatchRow) -> bool {
    m.status.as_deref() == Some("completed") && m.winner_id.is_none()
}

/// Winner and loser by score. Ties and missing scores decide nothing.
pub fn decide_winner(m: &MatchRow) -> std::result::Result<(UserId, UserId), SkipReason> {
    let (Some(player1), Some(player2)) = (m.player1_id, m.player2_id) else {
        return Err(SkipReason::MissingPlayers);
    };
    let (Some(score1), Some(score2)) = (m.player1_score, m.player2_score) else {
        return Err(SkipReason::MissingScores);
    };

    match score1.cmp(&score2) {
        std::cmp::Ordering::Greater => Ok((player1, player2)),
        std::cmp::Ordering::Less => Ok((player2, player1)),
        std::cmp::Ordering::Equal => Err(SkipReason::Tied(score1)),
    }
}

/// Matches of each round in bracket order
fn rounds(matches: &[MatchRow]) -> BTreeMap<i32, Vec<&MatchRow>> {
    let mut rounds: BTreeMap<i32, Vec<&MatchRow>> = BTreeMap::new();
    for m in matches {
        if let Some(round) = m.round_number {
            rounds.entry(round).or_default().push(m);
        }
    }
    for round in rounds.values_mut() {
        round.sort_by_key(|m| (m.match_number.is_none(), m.match_number));
    }
    rounds
}

/// Where the winner of `m` goes: match `index / 2` of the next round, first slot for even
/// indexes. `Ok(None)` for the last round.
fn advancement_target<'a>(
    m: &MatchRow,
    rounds: &BTreeMap<i32, Vec<&'a MatchRow>>,
) -> std::result::Result<Option<(&'a MatchRow, PlayerSlot)>, SkipReason> {
    let round = m.round_number.ok_or(SkipReason::NoRoundNumber)?;
    let index = rounds
        .get(&round)
        .and_then(|ms| ms.iter().position(|other| other.id == m.id))
        .ok_or(SkipReason::NoRoundNumber)?;

    let Some(next) = rounds.get(&(round + 1)) else {
        return Ok(None);
    };
    let target = next.get(index / 2).ok_or(SkipReason::NoTargetMatch {
        round: round + 1,
        index: index / 2,
    })?;
    let slot = if index % 2 == 0 { PlayerSlot::Player1 } else { PlayerSlot::Player2 };
    Ok(Some((target, slot)))
}

fn occupant(m: &MatchRow, slot: PlayerSlot) -> Option<UserId> {
    match slot {
        PlayerSlot::Player1 => m.player1_id,
        PlayerSlot::Player2 => m.player2_id,
    }
}

/// Decide winners for every broken match of one tournament and where they advance to
pub fn plan_repairs(matches: &[MatchRow]) -> RepairPlan {
    let rounds = rounds(matches);
    let mut plan = RepairPlan::default();

    for m in matches.iter().filter(|m| is_broken(m)) {
        let (winner, loser) = match decide_winner(m) {
            Ok(decided) => decided,
            Err(reason) => {
                plan.skipped.push(Skip { match_id: m.id, reason });
                continue;
            }
        };
        plan.results.push(Repair {
            match_id: m.id,
            winner,
            loser,
        });

        match advancement_target(m, &rounds) {
            Ok(None) => {}
            Ok(Some((target, slot))) => match occupant(target, slot) {
                None => plan.advancements.push(Advancement {
                    from_match: m.id,
                    to_match: target.id,
                    slot,
                    player: winner,
                }),
                Some(current) if current == winner => {}
                Some(_) => plan.skipped.push(Skip {
                    match_id: m.id,
                    reason: SkipReason::SlotTaken {
                        match_id: target.id,
                        slot,
                    },
                }),
            },
            Err(reason) => plan.skipped.push(Skip { match_id: m.id, reason }),
        }
    }

    plan
}

/// Totals for one pass over all tournaments
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub tournaments: usize,
    pub repaired: usize,
    pub advanced: usize,
    pub skipped: usize,
}

impl fmt::Display for PassSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tournaments checked, {} matches repaired, {} winners advanced, {} skipped",
            self.tournaments, self.repaired, self.advanced, self.skipped
        )
    }
}

/// Find and repair broken matches once
#[instrument(skip(pool, config), err)]
pub async fn run_pass(pool: &PgPool, config: &MonitorConfig) -> Result<PassSummary> {
    let tournaments = {
        let mut conn = pool.acquire().await?;
        Tournaments::new(&mut conn)
            .list_with_broken_matches(&config.tournament_statuses)
            .await?
    };

    let mut summary = PassSummary {
        tournaments: tournaments.len(),
        ..Default::default()
    };

    for tournament in &tournaments {
        let mut tx = pool.begin().await?;
        let matches = Matches::new(&mut tx).list_for_tournament(tournament.id).await?;
        let plan = plan_repairs(&matches);

        for skip in &plan.skipped {
            warn!(
                tournament = %tournament.title,
                match_id = %abbrev_uuid(&skip.match_id),
                reason = %skip.reason,
                "Skipping match"
            );
        }
        summary.skipped += plan.skipped.len();
        if plan.is_empty() {
            continue;
        }

        let mut recorded = Vec::with_capacity(plan.results.len());
        for repair in &plan.results {
            if Matches::new(&mut tx)
                .record_result(repair.match_id, repair.winner, repair.loser)
                .await?
            {
                recorded.push(repair.match_id);
                summary.repaired += 1;
                info!(
                    tournament = %tournament.title,
                    match_id = %abbrev_uuid(&repair.match_id),
                    winner = %abbrev_uuid(&repair.winner),
                    "Recorded winner"
                );
            } else {
                debug!(
                    match_id = %abbrev_uuid(&repair.match_id),
                    "Winner was set concurrently, not advancing"
                );
            }
        }

        for advancement in plan.advancements_from(&recorded) {
            if Matches::new(&mut tx)
                .place_player(advancement.to_match, advancement.slot, advancement.player)
                .await?
            {
                summary.advanced += 1;
                info!(
                    tournament = %tournament.title,
                    player = %abbrev_uuid(&advancement.player),
                    to_match = %abbrev_uuid(&advancement.to_match),
                    slot = ?advancement.slot,
                    "Advanced winner"
                );
            } else {
                warn!(
                    to_match = %abbrev_uuid(&advancement.to_match),
                    slot = ?advancement.slot,
                    "Slot was filled concurrently"
                );
            }
        }

        tx.commit().await?;
    }

    Ok(summary)
}

/// Run passes until cancelled, or a single pass with `once`.
///
/// A failed pass is logged and retried after `error_backoff`; only `once` surfaces the error.
pub async fn run(pool: &PgPool, config: &MonitorConfig, once: bool, shutdown: CancellationToken) -> Result<()> {
    if once {
        let summary = run_pass(pool, config).await?;
        println!("{summary}");
        return Ok(());
    }

    info!(
        interval = ?config.interval,
        statuses = ?config.tournament_statuses,
        "Starting broken match monitor"
    );

    loop {
        let wait = match run_pass(pool, config).await {
            Ok(summary) => {
                if summary.tournaments > 0 {
                    info!(%summary, "Monitor pass finished");
                } else {
                    debug!("No broken matches");
                }
                config.interval
            }
            Err(e) => {
                error!(error = %e, backoff = ?config.error_backoff, "Monitor pass failed");
                config.error_backoff
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.cancelled() => {
                info!("Monitor shutting down");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn bracket_match(round: i32, number: i32, p1: Option<Uuid>, p2: Option<Uuid>) -> MatchRow {
        MatchRow {
            id: Uuid::new_v4(),
            tournament_id: Uuid::nil(),
            round_number: Some(round),
            round_name: None,
            match_number: Some(number),
            player1_id: p1,
            player2_id: p2,
            winner_id: None,
            loser_id: None,
            player1_score: None,
            player2_score: None,
            status: Some("pending".to_string()),
        }
    }

    fn broken(round: i32, number: i32, p1: Uuid, p2: Uuid, scores: (Option<i32>, Option<i32>)) -> MatchRow {
        MatchRow {
            player1_score: scores.0,
            player2_score: scores.1,
            status: Some("completed".to_string()),
            ..bracket_match(round, number, Some(p1), Some(p2))
        }
    }

    #[test]
    fn test_decide_winner() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(decide_winner(&broken(1, 1, a, b, (Some(7), Some(4)))), Ok((a, b)));
        assert_eq!(decide_winner(&broken(1, 1, a, b, (Some(2), Some(7)))), Ok((b, a)));
        assert_eq!(
            decide_winner(&broken(1, 1, a, b, (Some(5), Some(5)))),
            Err(SkipReason::Tied(5))
        );
        assert_eq!(
            decide_winner(&broken(1, 1, a, b, (Some(5), None))),
            Err(SkipReason::MissingScores)
        );

        let mut bye = broken(1, 1, a, b, (Some(7), Some(0)));
        bye.player2_id = None;
        assert_eq!(decide_winner(&bye), Err(SkipReason::MissingPlayers));
    }

    #[test]
    fn test_is_broken() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut m = broken(1, 1, a, b, (Some(7), Some(3)));
        assert!(is_broken(&m));
        m.winner_id = Some(a);
        assert!(!is_broken(&m));
        assert!(!is_broken(&bracket_match(1, 1, Some(a), Some(b))));
    }

    #[test]
    fn test_plan_advances_into_next_round_slots() {
        let p: Vec<Uuid> = (0..8).map(|_| Uuid::new_v4()).collect();
        // Listed out of order on purpose; bracket order comes from match_number
        let matches = vec![
            broken(1, 4, p[6], p[7], (Some(3), Some(7))),
            broken(1, 1, p[0], p[1], (Some(7), Some(2))),
            broken(1, 2, p[2], p[3], (Some(1), Some(7))),
            broken(1, 3, p[4], p[5], (Some(4), Some(4))),
            bracket_match(2, 2, None, None),
            bracket_match(2, 1, None, None),
            bracket_match(3, 1, None, None),
        ];
        let semi1 = matches[5].id;
        let semi2 = matches[4].id;

        let plan = plan_repairs(&matches);

        assert_eq!(plan.results.len(), 3);
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].match_id, matches[3].id);
        assert_eq!(plan.skipped[0].reason, SkipReason::Tied(4));

        let placed: Vec<(MatchId, PlayerSlot, UserId)> =
            plan.advancements.iter().map(|a| (a.to_match, a.slot, a.player)).collect();
        assert_eq!(
            placed,
            vec![
                (semi2, PlayerSlot::Player2, p[7]),
                (semi1, PlayerSlot::Player1, p[0]),
                (semi1, PlayerSlot::Player2, p[3]),
            ]
        );
    }

    #[test]
    fn test_plan_respects_occupied_slots() {
        let p: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let matches = vec![
            broken(1, 1, p[0], p[1], (Some(7), Some(5))),
            broken(1, 2, p[2], p[3], (Some(7), Some(5))),
            bracket_match(2, 1, Some(p[0]), Some(p[1])),
        ];

        let plan = plan_repairs(&matches);

        // p[0] already sits in its slot; the second slot holds someone else
        assert_eq!(plan.results.len(), 2);
        assert!(plan.advancements.is_empty());
        assert_eq!(
            plan.skipped,
            vec![Skip {
                match_id: matches[1].id,
                reason: SkipReason::SlotTaken {
                    match_id: matches[2].id,
                    slot: PlayerSlot::Player2,
                },
            }]
        );
    }

    #[test]
    fn test_final_has_no_advancement() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let matches = vec![
            bracket_match(1, 1, Some(a), Some(Uuid::new_v4())),
            broken(2, 1, a, b, (Some(7), Some(6))),
        ];
        let plan = plan_repairs(&matches);
        assert_eq!(
            plan.results,
            vec![Repair {
                match_id: matches[1].id,
                winner: a,
                loser: b,
            }]
        );
        assert!(plan.advancements.is_empty());
        assert!(plan.skipped.is_empty());
    }

    #[test]
    fn test_missing_round_data_is_skipped() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut loose = broken(1, 1, a, b, (Some(7), Some(1)));
        loose.round_number = None;

        let plan = plan_repairs(&[
            loose.clone(),
            broken(1, 3, Uuid::new_v4(), Uuid::new_v4(), (Some(7), Some(1))),
            broken(1, 2, Uuid::new_v4(), Uuid::new_v4(), (Some(7), Some(1))),
            broken(1, 4, Uuid::new_v4(), Uuid::new_v4(), (Some(7), Some(1))),
            broken(1, 5, Uuid::new_v4(), Uuid::new_v4(), (Some(7), Some(1))),
            bracket_match(2, 1, None, None),
        ]);

        // Recorded but not advanced
        assert_eq!(plan.results.len(), 5);
        let reasons: Vec<&SkipReason> = plan.skipped.iter().map(|s| &s.reason).collect();
        assert_eq!(
            reasons,
            vec![
                &SkipReason::NoRoundNumber,
                &SkipReason::NoTargetMatch { round: 2, index: 1 },
                &SkipReason::NoTargetMatch { round: 2, index: 1 },
            ]
        );
        assert_eq!(plan.advancements.len(), 2);
    }

    #[test]
    fn test_summary_display() {
        let summary = PassSummary {
            tournaments: 2,
            repaired: 3,
            advanced: 2,
            skipped: 1,
        };
        assert_eq!(
            summary.to_string(),
            "2 tournaments checked, 3 matches repaired, 2 winners advanced, 1 skipped"
        );
    }

    #[test]
    fn test_only_recorded_results_advance() {
        let p: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let matches = vec![
            broken(1, 1, p[0], p[1], (Some(7), Some(2))),
            broken(1, 2, p[2], p[3], (Some(3), Some(7))),
            bracket_match(2, 1, None, None),
        ];
        let plan = plan_repairs(&matches);
        assert_eq!(plan.advancements.len(), 2);

        // Another writer set the winner of the first match before this pass did
        let recorded = vec![matches[1].id];
        let advancing: Vec<UserId> = plan.advancements_from(&recorded).map(|a| a.player).collect();
        assert_eq!(advancing, vec![p[3]]);

        assert_eq!(plan.advancements_from(&[]).count(), 0);
    }

}
