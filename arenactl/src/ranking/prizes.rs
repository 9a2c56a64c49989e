//! Prize distributions stored in `tournaments.prize_distribution`.
//!
//! The app reads a camelCase JSON document: where the money comes from, which template
//! produced it, and one slot per paid position with cash, voucher and percentage of the cash
//! pool. Amounts are whole VND.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use figment::{
    Figment,
    providers::{Format, Yaml},
};

/// Template name recorded for hand-written distributions
pub const CUSTOM_TEMPLATE: &str = "custom";

/// Percentage splits per template, first place first
pub const TEMPLATES: [(&str, &[u32]); 5] = [
    ("standard", &[50, 30, 20]),
    ("top_heavy", &[60, 25, 15]),
    ("flat", &[40, 30, 20, 10]),
    ("top_3", &[60, 25, 15]),
    ("top_4", &[40, 30, 15, 15]),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrizeSlot {
    pub position: u32,
    pub cash_amount: i64,
    pub voucher_amount: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrizeDistribution {
    pub source: String,
    pub template: String,
    pub organizer_fee_percent: f64,
    pub sponsor_contribution: i64,
    pub total_prize_pool: i64,
    pub distribution: Vec<PrizeSlot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrizeError {
    #[error("unknown prize template {0:?}")]
    UnknownTemplate(String),
    #[error("prize amounts cannot be negative (position {0})")]
    NegativeAmount(u32),
    #[error("prize pool cannot be negative")]
    NegativePool,
    #[error("no prize slots or template given")]
    Empty,
    #[error("invalid prize file: {0}")]
    Parse(String),
    #[error("prize amounts add up to more than {} VND", i64::MAX)]
    Overflow,
}

fn checked_total(mut amounts: impl Iterator<Item = i64>) -> Result<i64, PrizeError> {
    amounts.try_fold(0i64, |sum, amount| sum.checked_add(amount).ok_or(PrizeError::Overflow))
}

/// `pct` percent of `pool`, rounded down
fn share_of(pool: i64, pct: u32) -> Result<i64, PrizeError> {
    i64::try_from(i128::from(pool) * i128::from(pct) / 100).map_err(|_| PrizeError::Overflow)
}

fn percentage_of(cash: i64, pool: i64) -> f64 {
    if pool == 0 {
        0.0
    } else {
        cash as f64 / pool as f64 * 100.0
    }
}

impl PrizeDistribution {
    /// Distribution from explicit `(cash, voucher)` amounts per position.
    ///
    /// The pool is the sum of cash. A sponsor-funded distribution records the whole pool as
    /// the sponsor contribution.
    pub fn custom(source: &str, slots: &[(i64, i64)]) -> Result<Self, PrizeError> {
        if slots.is_empty() {
            return Err(PrizeError::Empty);
        }
        if let Some(pos) = slots.iter().position(|(cash, voucher)| *cash < 0 || *voucher < 0) {
            return Err(PrizeError::NegativeAmount(pos as u32 + 1));
        }

        let pool = checked_total(slots.iter().map(|(cash, _)| *cash))?;
        checked_total(slots.iter().map(|(_, voucher)| *voucher))?;
        let distribution = slots
            .iter()
            .enumerate()
            .map(|(i, (cash, voucher))| PrizeSlot {
                position: i as u32 + 1,
                cash_amount: *cash,
                voucher_amount: *voucher,
                percentage: percentage_of(*cash, pool),
            })
            .collect();

        Ok(Self {
            source: source.to_string(),
            template: CUSTOM_TEMPLATE.to_string(),
            organizer_fee_percent: 0.0,
            sponsor_contribution: if source == "sponsor" { pool } else { 0 },
            total_prize_pool: pool,
            distribution,
        })
    }

    /// Split a pool by a named template. Truncated remainders go to first place.
    pub fn from_template(source: &str, template: &str, pool: i64) -> Result<Self, PrizeError> {
        if pool < 0 {
            return Err(PrizeError::NegativePool);
        }
        let (_, percentages) = TEMPLATES
            .iter()
            .find(|(name, _)| *name == template)
            .ok_or_else(|| PrizeError::UnknownTemplate(template.to_string()))?;

        let mut distribution = percentages
            .iter()
            .enumerate()
            .map(|(i, pct)| {
                Ok(PrizeSlot {
                    position: i as u32 + 1,
                    cash_amount: share_of(pool, *pct)?,
                    voucher_amount: 0,
                    percentage: f64::from(*pct),
                })
            })
            .collect::<Result<Vec<_>, PrizeError>>()?;

        let allotted = checked_total(distribution.iter().map(|s| s.cash_amount))?;
        if let Some(first) = distribution.first_mut() {
            first.cash_amount += pool - allotted;
        }

        Ok(Self {
            source: source.to_string(),
            template: template.to_string(),
            organizer_fee_percent: 0.0,
            sponsor_contribution: if source == "sponsor" { pool } else { 0 },
            total_prize_pool: pool,
            distribution,
        })
    }

    pub fn total_cash(&self) -> i64 {
        self.distribution.iter().map(|s| s.cash_amount).sum()
    }

    pub fn total_vouchers(&self) -> i64 {
        self.distribution.iter().map(|s| s.voucher_amount).sum()
    }
}

fn default_source() -> String {
    "sponsor".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrizeInput {
    #[serde(default)]
    pub cash_amount: i64,
    #[serde(default)]
    pub voucher_amount: i64,
}

/// Prize file accepted by `prizes set --file`, YAML or JSON.
///
/// Either lists slots explicitly:
///
/// ```yaml
/// source: sponsor
/// distribution:
///   - cashAmount: 1000000
///     voucherAmount: 500000
///   - cashAmount: 400000
///     voucherAmount: 300000
/// ```
///
/// or names a template and a pool (`template: top_heavy`, `totalPrizePool: 3000000`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PrizeFile {
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub total_prize_pool: Option<i64>,
    #[serde(default)]
    pub distribution: Vec<PrizeInput>,
}

impl PrizeFile {
    pub fn parse(contents: &str) -> Result<Self, PrizeError> {
        Figment::from(Yaml::string(contents))
            .extract()
            .map_err(|e| PrizeError::Parse(e.to_string()))
    }

    pub fn load(path: &Path) -> crate::errors::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| crate::errors::Error::io(path, e))?;
        Ok(Self::parse(&contents)?)
    }

    pub fn resolve(&self) -> Result<PrizeDistribution, PrizeError> {
        if !self.distribution.is_empty() {
            let slots: Vec<(i64, i64)> = self
                .distribution
                .iter()
                .map(|s| (s.cash_amount, s.voucher_amount))
                .collect();
            return PrizeDistribution::custom(&self.source, &slots);
        }
        match (&self.template, self.total_prize_pool) {
            (Some(template), Some(pool)) => PrizeDistribution::from_template(&self.source, template, pool),
            (Some(template), None) => PrizeDistribution::from_template(&self.source, template, 0),
            _ => Err(PrizeError::Empty),
        }
    }
}
