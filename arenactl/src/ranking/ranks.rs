//! Letter ranks and the ELO bands that define them.
//!
//! There are ten ranks, weakest first: K, I, H, H+, G, G+, F, E, D, C. The intermediate
//! ranks K+ and I+ were retired; they still turn up in old `rank_system` rows and are parsed
//! into a distinct error so they can be reported and deleted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::db::models::ranks::RankSystemRow;

/// Rank codes that no longer exist
pub const RETIRED_RANK_CODES: [&str; 2] = ["K+", "I+"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RankCode {
    K,
    I,
    H,
    #[serde(rename = "H+")]
    HPlus,
    G,
    #[serde(rename = "G+")]
    GPlus,
    F,
    E,
    D,
    C,
}

impl RankCode {
    pub const ALL: [RankCode; 10] = [
        RankCode::K,
        RankCode::I,
        RankCode::H,
        RankCode::HPlus,
        RankCode::G,
        RankCode::GPlus,
        RankCode::F,
        RankCode::E,
        RankCode::D,
        RankCode::C,
    ];

    /// 1-based position, matches `rank_system.rank_order`
    pub fn order(self) -> u8 {
        self as u8 + 1
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RankCode::K => "K",
            RankCode::I => "I",
            RankCode::H => "H",
            RankCode::HPlus => "H+",
            RankCode::G => "G",
            RankCode::GPlus => "G+",
            RankCode::F => "F",
            RankCode::E => "E",
            RankCode::D => "D",
            RankCode::C => "C",
        }
    }
}

impl fmt::Display for RankCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RankParseError {
    #[error("rank {0} was retired")]
    Retired(String),
    #[error("unknown rank code {0:?}")]
    Unknown(String),
}

impl FromStr for RankCode {
    type Err = RankParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(code) = RankCode::ALL.iter().find(|c| c.as_str().eq_ignore_ascii_case(trimmed)) {
            return Ok(*code);
        }
        if RETIRED_RANK_CODES.iter().any(|r| r.eq_ignore_ascii_case(trimmed)) {
            return Err(RankParseError::Retired(trimmed.to_uppercase()));
        }
        Err(RankParseError::Unknown(trimmed.to_string()))
    }
}

/// Inclusive ELO range for one rank. `elo_max` is open-ended for the top rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EloBand {
    pub code: RankCode,
    pub elo_min: i32,
    pub elo_max: Option<i32>,
}

impl EloBand {
    const fn new(code: RankCode, elo_min: i32, elo_max: Option<i32>) -> Self {
        Self { code, elo_min, elo_max }
    }

    pub fn contains(&self, elo: i32) -> bool {
        elo >= self.elo_min && self.elo_max.is_none_or(|max| elo <= max)
    }
}

impl fmt::Display for EloBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.elo_max {
            Some(max) => write!(f, "{}-{}", self.elo_min, max),
            None => write!(f, "{}-MAX", self.elo_min),
        }
    }
}

pub const STANDARD_BANDS: [EloBand; 10] = [
    EloBand::new(RankCode::K, 1000, Some(1099)),
    EloBand::new(RankCode::I, 1100, Some(1199)),
    EloBand::new(RankCode::H, 1200, Some(1299)),
    EloBand::new(RankCode::HPlus, 1300, Some(1399)),
    EloBand::new(RankCode::G, 1400, Some(1499)),
    EloBand::new(RankCode::GPlus, 1500, Some(1599)),
    EloBand::new(RankCode::F, 1600, Some(1699)),
    EloBand::new(RankCode::E, 1700, Some(1799)),
    EloBand::new(RankCode::D, 1800, Some(1899)),
    EloBand::new(RankCode::C, 1900, None),
];

/// Standard band for a rank
pub fn band(code: RankCode) -> &'static EloBand {
    &STANDARD_BANDS[code as usize]
}

/// Rank for an ELO rating, `None` below the K floor
pub fn rank_for_elo(elo: i32) -> Option<RankCode> {
    STANDARD_BANDS.iter().find(|b| b.contains(elo)).map(|b| b.code)
}

/// Rank a rating should carry. Ratings under the K floor still rank K.
pub fn expected_rank(elo: i32) -> RankCode {
    rank_for_elo(elo).unwrap_or(RankCode::K)
}

/// What is wrong with the rank stored on a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserRankIssue {
    /// Still holds K+ or I+
    Retired { stored: String, expected: RankCode },
    /// Holds something that is not a rank code
    Unknown { stored: String, expected: RankCode },
    /// No rank stored
    Unranked { expected: RankCode },
    /// A real rank, but not the one the rating implies
    Mismatch { stored: RankCode, expected: RankCode },
}

impl UserRankIssue {
    pub fn expected(&self) -> RankCode {
        match self {
            UserRankIssue::Retired { expected, .. }
            | UserRankIssue::Unknown { expected, .. }
            | UserRankIssue::Unranked { expected }
            | UserRankIssue::Mismatch { expected, .. } => *expected,
        }
    }
}

impl fmt::Display for UserRankIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRankIssue::Retired { stored, expected } => write!(f, "retired rank {stored}, should be {expected}"),
            UserRankIssue::Unknown { stored, expected } => write!(f, "unknown rank {stored:?}, should be {expected}"),
            UserRankIssue::Unranked { expected } => write!(f, "no rank, should be {expected}"),
            UserRankIssue::Mismatch { stored, expected } => write!(f, "{stored}, should be {expected}"),
        }
    }
}

/// Check a stored rank against the rating. `None` when it is right.
pub fn check_user_rank(stored: Option<&str>, elo: i32) -> Option<UserRankIssue> {
    let expected = expected_rank(elo);
    let Some(stored) = stored.map(str::trim).filter(|s| !s.is_empty()) else {
        return Some(UserRankIssue::Unranked { expected });
    };
    match stored.parse::<RankCode>() {
        Ok(code) if code == expected => None,
        Ok(code) => Some(UserRankIssue::Mismatch { stored: code, expected }),
        Err(RankParseError::Retired(code)) => Some(UserRankIssue::Retired { stored: code, expected }),
        Err(RankParseError::Unknown(code)) => Some(UserRankIssue::Unknown { stored: code, expected }),
    }
}

/// Number of rank steps between two players, regardless of order
pub fn rank_difference(a: RankCode, b: RankCode) -> u8 {
    a.order().abs_diff(b.order())
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BandError {
    #[error("no bands")]
    Empty,
    #[error("{0}: elo_max below elo_min")]
    Inverted(RankCode),
    #[error("{0} is open-ended but is not the top band")]
    OpenEndedNotLast(RankCode),
    #[error("{0} is not open-ended but is the top band")]
    TopBandClosed(RankCode),
    #[error("{lower} and {upper} are out of order")]
    OutOfOrder { lower: RankCode, upper: RankCode },
    #[error("gap between {lower} and {upper}")]
    Gap { lower: RankCode, upper: RankCode },
    #[error("{lower} and {upper} overlap")]
    Overlap { lower: RankCode, upper: RankCode },
}

/// Check that bands are ordered weakest first, contiguous, and only the last is open-ended
pub fn validate_bands(bands: &[EloBand]) -> Result<(), BandError> {
    let last = bands.last().ok_or(BandError::Empty)?;

    if let Some(b) = bands.iter().find(|b| b.elo_max.is_some_and(|max| max < b.elo_min)) {
        return Err(BandError::Inverted(b.code));
    }

    for pair in bands.windows(2) {
        let (lower, upper) = (&pair[0], &pair[1]);
        if lower.code >= upper.code {
            return Err(BandError::OutOfOrder {
                lower: lower.code,
                upper: upper.code,
            });
        }
        let Some(max) = lower.elo_max else {
            return Err(BandError::OpenEndedNotLast(lower.code));
        };
        if upper.elo_min <= max {
            return Err(BandError::Overlap {
                lower: lower.code,
                upper: upper.code,
            });
        }
        if upper.elo_min > max + 1 {
            return Err(BandError::Gap {
                lower: lower.code,
                upper: upper.code,
            });
        }
    }

    if last.elo_max.is_some() {
        return Err(BandError::TopBandClosed(last.code));
    }

    Ok(())
}

/// Difference between a live `rank_system` table and the standard bands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BandDrift {
    /// Standard rank with no row
    Missing(RankCode),
    /// Row for a retired rank that should be deleted
    Retired(String),
    /// Row whose code is not a rank at all
    Unknown(String),
    /// Row with the wrong range
    Range {
        code: RankCode,
        expected: EloBand,
        actual_min: i32,
        actual_max: Option<i32>,
    },
}

impl fmt::Display for BandDrift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BandDrift::Missing(code) => write!(f, "{code}: missing"),
            BandDrift::Retired(code) => write!(f, "{code}: retired rank still present"),
            BandDrift::Unknown(code) => write!(f, "{code}: unknown rank code"),
            BandDrift::Range {
                code,
                expected,
                actual_min,
                actual_max,
            } => {
                let actual = EloBand::new(*code, *actual_min, *actual_max);
                write!(f, "{code}: {actual} (expected {expected})")
            }
        }
    }
}

/// Compare live rows against [`STANDARD_BANDS`]
pub fn compare_bands(rows: &[RankSystemRow]) -> Vec<BandDrift> {
    let mut drift = Vec::new();
    let mut seen = Vec::new();

    for row in rows {
        match row.rank_code.parse::<RankCode>() {
            Ok(code) => {
                seen.push(code);
                let expected = *band(code);
                if expected.elo_min != row.elo_min || expected.elo_max != row.elo_max {
                    drift.push(BandDrift::Range {
                        code,
                        expected,
                        actual_min: row.elo_min,
                        actual_max: row.elo_max,
                    });
                }
            }
            Err(RankParseError::Retired(code)) => drift.push(BandDrift::Retired(code)),
            Err(RankParseError::Unknown(code)) => drift.push(BandDrift::Unknown(code)),
        }
    }

    for code in RankCode::ALL {
        if !seen.contains(&code) {
            drift.push(BandDrift::Missing(code));
        }
    }

    drift
}
