//! Database models for the `rank_system` table.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RankSystemRow {
    pub rank_code: String,
    pub rank_order: Option<i32>,
    pub elo_min: i32,
    pub elo_max: Option<i32>,
    pub display_name: Option<String>,
}

/// Body of the per-rank PATCH issued by `ranks sync`. `elo_max` is sent as null for the top
/// rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RankBandUpdate {
    pub rank_order: i32,
    pub elo_min: i32,
    pub elo_max: Option<i32>,
}
