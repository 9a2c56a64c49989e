//! Handicap rules: how many racks the weaker player receives.
//!
//! Four rule sets have been in use against the same `handicap_rules` table, so the scheme is
//! an explicit choice rather than whatever script ran last:
//!
//! - [`HandicapScheme::Challenge`]: SPA challenge matches, keyed by rank difference (1-4) and
//!   bet amount (100-600). This is the table the app reads.
//! - [`HandicapScheme::Flat`]: same keys, handicap equals the rank difference.
//! - [`HandicapScheme::Vnd`]: cash matches, keyed by rank difference (1-4) and a VND bet tier
//!   (5,000-200,000). First seeded under a `handicap_points` column; written to
//!   `handicap_value` here like the others.
//! - [`HandicapScheme::Basic`]: race to [`BASIC_RACE_TO`] with no bet, one rule per rank
//!   difference from 1 to 9, handicap equals the difference.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::db::models::handicap::HandicapRuleRow;
use crate::ranking::ranks::{RankCode, rank_difference};

/// Race length for the basic scheme
pub const BASIC_RACE_TO: u32 = 7;

/// Bet amounts (SPA) the challenge table is keyed on
pub const CHALLENGE_BETS: [i32; 6] = [100, 200, 300, 400, 500, 600];

/// Bet tiers (VND) of the cash table
pub const VND_BETS: [i32; 6] = [5_000, 10_000, 20_000, 50_000, 100_000, 200_000];

type BetTable = [[f64; 6]; 4];

const CHALLENGE_VALUES: BetTable = [
    [0.5, 1.0, 1.5, 1.5, 2.0, 2.5],
    [1.0, 1.5, 2.0, 2.5, 3.0, 3.5],
    [1.5, 2.5, 3.5, 4.0, 5.0, 6.0],
    [2.0, 3.0, 4.0, 5.0, 6.0, 7.0],
];

const VND_VALUES: BetTable = [
    [0.5, 0.5, 1.0, 1.0, 1.5, 1.5],
    [1.0, 1.0, 1.5, 2.0, 2.5, 3.0],
    [1.5, 2.0, 2.5, 3.0, 3.5, 4.0],
    [2.0, 2.5, 3.0, 4.0, 4.5, 5.0],
];

const EPSILON: f64 = 1e-9;

/// Label stored in `handicap_rules.rank_difference_type`.
///
/// The bet-keyed tables name differences of 1 to 4 ranks `1_sub`, `1_main`, `1.5_main` and
/// `2_main` (a main rank being two steps, e.g. K to H). The basic table uses `N_rank`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum RankDifferenceType {
    OneSub,
    OneMain,
    OneAndHalfMain,
    TwoMain,
    Ranks(u8),
}

impl RankDifferenceType {
    /// Label for a difference in the bet-keyed tables
    pub fn for_difference(difference: u8) -> Option<Self> {
        match difference {
            1 => Some(Self::OneSub),
            2 => Some(Self::OneMain),
            3 => Some(Self::OneAndHalfMain),
            4 => Some(Self::TwoMain),
            _ => None,
        }
    }

    /// Rank steps this label stands for
    pub fn difference(self) -> u8 {
        match self {
            Self::OneSub => 1,
            Self::OneMain => 2,
            Self::OneAndHalfMain => 3,
            Self::TwoMain => 4,
            Self::Ranks(n) => n,
        }
    }
}

impl fmt::Display for RankDifferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OneSub => f.write_str("1_sub"),
            Self::OneMain => f.write_str("1_main"),
            Self::OneAndHalfMain => f.write_str("1.5_main"),
            Self::TwoMain => f.write_str("2_main"),
            Self::Ranks(n) => write!(f, "{n}_rank"),
        }
    }
}

impl FromStr for RankDifferenceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1_sub" => Ok(Self::OneSub),
            "1_main" => Ok(Self::OneMain),
            "1.5_main" => Ok(Self::OneAndHalfMain),
            "2_main" => Ok(Self::TwoMain),
            other => other
                .strip_suffix("_rank")
                .and_then(|n| n.parse::<u8>().ok())
                .filter(|n| *n > 0)
                .map(Self::Ranks)
                .ok_or_else(|| format!("unknown rank difference type {other:?}")),
        }
    }
}

impl From<RankDifferenceType> for String {
    fn from(value: RankDifferenceType) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for RankDifferenceType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One row of `handicap_rules`, as inserted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandicapRule {
    pub rank_difference_type: RankDifferenceType,
    pub rank_difference_value: i32,
    pub bet_amount: Option<i32>,
    pub handicap_value: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandicapScheme {
    #[default]
    Challenge,
    Flat,
    Basic,
    Vnd,
}

impl HandicapScheme {
    /// Whether rules are keyed on a bet amount
    pub fn uses_bets(self) -> bool {
        !self.bets().is_empty()
    }

    /// Bet amounts the scheme has rules for, empty when bets play no part
    pub fn bets(self) -> &'static [i32] {
        match self {
            HandicapScheme::Challenge | HandicapScheme::Flat => &CHALLENGE_BETS,
            HandicapScheme::Vnd => &VND_BETS,
            HandicapScheme::Basic => &[],
        }
    }

    /// Unit of the bet amounts
    pub fn bet_unit(self) -> &'static str {
        match self {
            HandicapScheme::Vnd => "VND",
            _ => "SPA",
        }
    }

    /// Largest rank difference the scheme has a rule for
    pub fn max_difference(self) -> u8 {
        match self {
            HandicapScheme::Challenge | HandicapScheme::Flat | HandicapScheme::Vnd => 4,
            HandicapScheme::Basic => 9,
        }
    }

    pub fn rules(self) -> Vec<HandicapRule> {
        match self {
            HandicapScheme::Challenge => bet_keyed(&CHALLENGE_BETS, |row, bet_index| CHALLENGE_VALUES[row][bet_index]),
            HandicapScheme::Flat => bet_keyed(&CHALLENGE_BETS, |row, _| (row + 1) as f64),
            HandicapScheme::Vnd => bet_keyed(&VND_BETS, |row, bet_index| VND_VALUES[row][bet_index]),
            HandicapScheme::Basic => (1..=self.max_difference())
                .map(|diff| HandicapRule {
                    rank_difference_type: RankDifferenceType::Ranks(diff),
                    rank_difference_value: i32::from(diff),
                    bet_amount: None,
                    handicap_value: f64::from(diff),
                })
                .collect(),
        }
    }
}

impl fmt::Display for HandicapScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandicapScheme::Challenge => f.write_str("challenge"),
            HandicapScheme::Flat => f.write_str("flat"),
            HandicapScheme::Basic => f.write_str("basic"),
            HandicapScheme::Vnd => f.write_str("vnd"),
        }
    }
}

/// Rules for differences 1-4 at each bet
fn bet_keyed(bets: &[i32], value: impl Fn(usize, usize) -> f64) -> Vec<HandicapRule> {
    let mut rules = Vec::with_capacity(4 * bets.len());
    for row in 0..4 {
        let diff = row as u8 + 1;
        let Some(kind) = RankDifferenceType::for_difference(diff) else {
            continue;
        };
        for (bet_index, bet) in bets.iter().enumerate() {
            rules.push(HandicapRule {
                rank_difference_type: kind,
                rank_difference_value: i32::from(diff),
                bet_amount: Some(*bet),
                handicap_value: value(row, bet_index),
            });
        }
    }
    rules
}

/// Which player of a pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    First,
    Second,
}

/// Result of a lookup. `receiver` is `None` when both players hold the same rank.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Handicap {
    pub receiver: Option<Side>,
    pub value: f64,
    pub difference: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandicapError {
    #[error("rank difference {difference} exceeds the {scheme} table maximum of {max}")]
    DifferenceTooLarge { scheme: HandicapScheme, difference: u8, max: u8 },
    #[error("the {scheme} table has no rule for a bet of {bet}")]
    UnknownBet { scheme: HandicapScheme, bet: i32 },
    #[error("the {0} table is keyed on bet amount but no bet was given")]
    MissingBet(HandicapScheme),
}

/// Rules of one scheme, ready for lookups and verification
#[derive(Debug, Clone)]
pub struct HandicapTable {
    scheme: HandicapScheme,
    rules: Vec<HandicapRule>,
}

impl HandicapTable {
    pub fn new(scheme: HandicapScheme) -> Self {
        Self {
            scheme,
            rules: scheme.rules(),
        }
    }

    pub fn scheme(&self) -> HandicapScheme {
        self.scheme
    }

    pub fn rules(&self) -> &[HandicapRule] {
        &self.rules
    }

    /// Handicap for a pairing. The bet is ignored by the basic scheme.
    pub fn lookup(&self, first: RankCode, second: RankCode, bet: Option<i32>) -> Result<Handicap, HandicapError> {
        let difference = rank_difference(first, second);
        if self.scheme.uses_bets() && bet.is_none() {
            return Err(HandicapError::MissingBet(self.scheme));
        }
        if let Some(bet) = bet
            && self.scheme.uses_bets()
            && !self.scheme.bets().contains(&bet)
        {
            return Err(HandicapError::UnknownBet {
                scheme: self.scheme,
                bet,
            });
        }

        if difference == 0 {
            return Ok(Handicap {
                receiver: None,
                value: 0.0,
                difference,
            });
        }

        let max = self.scheme.max_difference();
        if difference > max {
            return Err(HandicapError::DifferenceTooLarge {
                scheme: self.scheme,
                difference,
                max,
            });
        }

        let bet = if self.scheme.uses_bets() { bet } else { None };
        let rule = self
            .rules
            .iter()
            .find(|r| r.rank_difference_value == i32::from(difference) && r.bet_amount == bet)
            .ok_or(HandicapError::DifferenceTooLarge {
                scheme: self.scheme,
                difference,
                max,
            })?;

        // The weaker player receives the handicap
        let receiver = if first < second { Side::First } else { Side::Second };
        Ok(Handicap {
            receiver: Some(receiver),
            value: rule.handicap_value,
            difference,
        })
    }

    /// Compare live `handicap_rules` rows against this scheme
    pub fn verify(&self, rows: &[HandicapRuleRow]) -> HandicapVerification {
        let mut report = HandicapVerification {
            expected_count: self.rules.len(),
            actual_count: rows.len(),
            null_values: 0,
            drift: Vec::new(),
            missing: Vec::new(),
            unexpected: Vec::new(),
        };

        for row in rows {
            let Some(actual) = row.handicap_value else {
                report.null_values += 1;
                continue;
            };
            // Older basic rows used 0 instead of null for "no bet"
            let bet = row.bet_amount.filter(|b| *b != 0);
            let key = RuleKey {
                rank_difference_type: row.rank_difference_type.clone(),
                bet_amount: bet,
            };
            match self
                .rules
                .iter()
                .find(|r| r.rank_difference_type.to_string() == row.rank_difference_type && r.bet_amount == bet)
            {
                Some(rule) if (rule.handicap_value - actual).abs() > EPSILON => report.drift.push(RuleDrift {
                    key,
                    expected: rule.handicap_value,
                    actual,
                }),
                Some(_) => {}
                None => report.unexpected.push(key),
            }
        }

        for rule in &self.rules {
            let label = rule.rank_difference_type.to_string();
            let present = rows
                .iter()
                .any(|r| r.rank_difference_type == label && r.bet_amount.filter(|b| *b != 0) == rule.bet_amount);
            if !present {
                report.missing.push(RuleKey {
                    rank_difference_type: label,
                    bet_amount: rule.bet_amount,
                });
            }
        }

        report
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleKey {
    pub rank_difference_type: String,
    pub bet_amount: Option<i32>,
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bet_amount {
            Some(bet) => write!(f, "{} / bet {}", self.rank_difference_type, bet),
            None => write!(f, "{} / race to {}", self.rank_difference_type, BASIC_RACE_TO),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleDrift {
    pub key: RuleKey,
    pub expected: f64,
    pub actual: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HandicapVerification {
    pub expected_count: usize,
    pub actual_count: usize,
    pub null_values: usize,
    pub drift: Vec<RuleDrift>,
    pub missing: Vec<RuleKey>,
    pub unexpected: Vec<RuleKey>,
}

impl HandicapVerification {
    pub fn is_clean(&self) -> bool {
        self.expected_count == self.actual_count
            && self.null_values == 0
            && self.drift.is_empty()
            && self.missing.is_empty()
            && self.unexpected.is_empty()
    }

    /// One line per problem, empty when clean
    pub fn problems(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.expected_count != self.actual_count {
            out.push(format!("expected {} rules, found {}", self.expected_count, self.actual_count));
        }
        if self.null_values > 0 {
            out.push(format!("{} rules have a null handicap_value", self.null_values));
        }
        out.extend(
            self.drift
                .iter()
                .map(|d| format!("{}: {} (expected {})", d.key, d.actual, d.expected)),
        );
        out.extend(self.missing.iter().map(|k| format!("{k}: missing")));
        out.extend(self.unexpected.iter().map(|k| format!("{k}: not part of the scheme")));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows_for(scheme: HandicapScheme) -> Vec<HandicapRuleRow> {
        scheme
            .rules()
            .into_iter()
            .map(|r| HandicapRuleRow {
                rank_difference_type: r.rank_difference_type.to_string(),
                rank_difference_value: Some(r.rank_difference_value),
                bet_amount: r.bet_amount,
                handicap_value: Some(r.handicap_value),
            })
            .collect()
    }

    #[test]
    fn test_rule_counts() {
        assert_eq!(HandicapScheme::Challenge.rules().len(), 24);
        assert_eq!(HandicapScheme::Flat.rules().len(), 24);
        assert_eq!(HandicapScheme::Basic.rules().len(), 9);
        assert_eq!(HandicapScheme::Vnd.rules().len(), 24);
    }

    #[test]
    fn test_vnd_values() {
        let table = HandicapTable::new(HandicapScheme::Vnd);
        assert_eq!(table.lookup(RankCode::K, RankCode::I, Some(5_000)).unwrap().value, 0.5);
        assert_eq!(table.lookup(RankCode::K, RankCode::I, Some(200_000)).unwrap().value, 1.5);
        assert_eq!(table.lookup(RankCode::H, RankCode::K, Some(50_000)).unwrap().value, 2.0);
        assert_eq!(table.lookup(RankCode::K, RankCode::HPlus, Some(100_000)).unwrap().value, 3.5);

        let h = table.lookup(RankCode::G, RankCode::K, Some(20_000)).unwrap();
        assert_eq!(h.value, 3.0);
        assert_eq!(h.receiver, Some(Side::Second));

        // SPA bets are not VND tiers and the reverse
        assert_eq!(
            table.lookup(RankCode::K, RankCode::I, Some(100)),
            Err(HandicapError::UnknownBet {
                scheme: HandicapScheme::Vnd,
                bet: 100
            })
        );
        assert!(
            HandicapTable::new(HandicapScheme::Challenge)
                .lookup(RankCode::K, RankCode::I, Some(5_000))
                .is_err()
        );
        assert_eq!(HandicapScheme::Vnd.bet_unit(), "VND");
    }

    #[test]
    fn test_vnd_rows_drift_from_challenge() {
        let report = HandicapTable::new(HandicapScheme::Challenge).verify(&rows_for(HandicapScheme::Vnd));
        assert_eq!(report.unexpected.len(), 24);
        assert_eq!(report.missing.len(), 24);
        assert!(
            HandicapTable::new(HandicapScheme::Vnd)
                .verify(&rows_for(HandicapScheme::Vnd))
                .is_clean()
        );
    }

    #[test]
    fn test_challenge_values() {
        let table = HandicapTable::new(HandicapScheme::Challenge);

        let h = table.lookup(RankCode::K, RankCode::I, Some(100)).unwrap();
        assert_eq!(h.value, 0.5);
        assert_eq!(h.receiver, Some(Side::First));
        assert_eq!(h.difference, 1);

        // K vs H+ is three steps: 1.5_main
        let h = table.lookup(RankCode::HPlus, RankCode::K, Some(300)).unwrap();
        assert_eq!(h.value, 3.5);
        assert_eq!(h.receiver, Some(Side::Second));

        assert_eq!(table.lookup(RankCode::I, RankCode::G, Some(400)).unwrap().value, 5.0);
        assert_eq!(table.lookup(RankCode::G, RankCode::K, Some(600)).unwrap().value, 7.0);
        assert_eq!(table.lookup(RankCode::H, RankCode::HPlus, Some(400)).unwrap().value, 1.5);
    }

    #[test]
    fn test_equal_ranks_get_nothing() {
        let table = HandicapTable::new(HandicapScheme::Challenge);
        let h = table.lookup(RankCode::F, RankCode::F, Some(200)).unwrap();
        assert_eq!(h.receiver, None);
        assert_eq!(h.value, 0.0);
    }

    #[test]
    fn test_lookup_errors() {
        let table = HandicapTable::new(HandicapScheme::Challenge);
        assert_eq!(
            table.lookup(RankCode::K, RankCode::GPlus, Some(100)),
            Err(HandicapError::DifferenceTooLarge {
                scheme: HandicapScheme::Challenge,
                difference: 5,
                max: 4
            })
        );
        assert_eq!(
            table.lookup(RankCode::K, RankCode::I, Some(150)),
            Err(HandicapError::UnknownBet {
                scheme: HandicapScheme::Challenge,
                bet: 150
            })
        );
        assert_eq!(
            table.lookup(RankCode::K, RankCode::I, None),
            Err(HandicapError::MissingBet(HandicapScheme::Challenge))
        );
    }

    #[test]
    fn test_flat_and_basic() {
        let flat = HandicapTable::new(HandicapScheme::Flat);
        assert_eq!(flat.lookup(RankCode::K, RankCode::G, Some(500)).unwrap().value, 4.0);

        let basic = HandicapTable::new(HandicapScheme::Basic);
        let h = basic.lookup(RankCode::C, RankCode::K, None).unwrap();
        assert_eq!(h.value, 9.0);
        assert_eq!(h.receiver, Some(Side::Second));
        // Bet is irrelevant for a race to 7
        assert_eq!(basic.lookup(RankCode::K, RankCode::H, Some(999)).unwrap().value, 2.0);
    }

    #[test]
    fn test_difference_type_labels() {
        for label in ["1_sub", "1_main", "1.5_main", "2_main", "7_rank"] {
            let parsed: RankDifferenceType = label.parse().unwrap();
            assert_eq!(parsed.to_string(), label);
        }
        assert_eq!("3_rank".parse::<RankDifferenceType>().unwrap().difference(), 3);
        assert!("0_rank".parse::<RankDifferenceType>().is_err());
        assert!("3_main".parse::<RankDifferenceType>().is_err());
    }

    #[test]
    fn test_rule_serializes_for_insert() {
        let rule = &HandicapScheme::Challenge.rules()[12];
        let json = serde_json::to_value(rule).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "rank_difference_type": "1.5_main",
                "rank_difference_value": 3,
                "bet_amount": 100,
                "handicap_value": 1.5
            })
        );

        let basic = &HandicapScheme::Basic.rules()[0];
        let json = serde_json::to_value(basic).unwrap();
        assert_eq!(json["rank_difference_type"], "1_rank");
        assert!(json["bet_amount"].is_null());
    }

    #[test]
    fn test_verify_clean() {
        let table = HandicapTable::new(HandicapScheme::Challenge);
        let report = table.verify(&rows_for(HandicapScheme::Challenge));
        assert!(report.is_clean(), "{:?}", report.problems());
        assert!(report.problems().is_empty());
    }

    #[test]
    fn test_verify_flat_rows_against_challenge() {
        let table = HandicapTable::new(HandicapScheme::Challenge);
        let report = table.verify(&rows_for(HandicapScheme::Flat));
        assert_eq!(report.actual_count, 24);
        assert!(!report.drift.is_empty());
        assert!(report.missing.is_empty());
        // 1_sub / 100 is 0.5 in challenge but 1.0 in flat
        assert!(report.drift.iter().any(|d| d.key.rank_difference_type == "1_sub"
            && d.key.bet_amount == Some(100)
            && d.expected == 0.5
            && d.actual == 1.0));
    }

    #[test]
    fn test_verify_nulls_and_missing() {
        let table = HandicapTable::new(HandicapScheme::Basic);
        let mut rows = rows_for(HandicapScheme::Basic);
        rows[0].handicap_value = None;
        rows.pop();
        // bet_amount 0 was used as "no bet" by older populators
        rows[1].bet_amount = Some(0);

        let report = table.verify(&rows);
        assert_eq!(report.actual_count, 8);
        assert_eq!(report.null_values, 1);
        assert_eq!(report.missing.len(), 1);
        assert_eq!(report.missing[0].rank_difference_type, "9_rank");
        assert!(report.drift.is_empty());
        assert!(!report.is_clean());
        assert_eq!(report.problems().len(), 3);
    }

    #[test]
    fn test_scheme_deserializes_snake_case() {
        let scheme: HandicapScheme = serde_json::from_str("\"basic\"").unwrap();
        assert_eq!(scheme, HandicapScheme::Basic);
        let scheme: HandicapScheme = serde_json::from_str("\"vnd\"").unwrap();
        assert_eq!(scheme, HandicapScheme::Vnd);
        assert_eq!(HandicapScheme::default(), HandicapScheme::Challenge);
    }
}
