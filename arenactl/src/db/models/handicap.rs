//! Database models for the `handicap_rules` table.

use serde::{Deserialize, Serialize};

/// A live rule as read back for verification. Values may be null after a bad populate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct HandicapRuleRow {
    pub rank_difference_type: String,
    pub rank_difference_value: Option<i32>,
    pub bet_amount: Option<i32>,
    pub handicap_value: Option<f64>,
}
