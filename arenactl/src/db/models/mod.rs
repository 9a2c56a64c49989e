//! Row types for the tables the tool reads and writes.
//!
//! The schema is owned by the app, so these structs only carry the columns a command needs.
//! Most columns are nullable in the live database and are `Option` here even where the app
//! always fills them.
//!
//! Rows derive both `sqlx::FromRow` and serde, so the same type is used whether it was read
//! through a direct Postgres connection or through PostgREST.
//!
//! - [`users`]: player accounts
//! - [`tournaments`]: tournaments and their participants
//! - [`matches`]: bracket matches
//! - [`results`]: final results and reward bookkeeping counts
//! - [`ranks`]: the `rank_system` lookup table
//! - [`handicap`]: the `handicap_rules` lookup table

pub mod handicap;
pub mod matches;
pub mod ranks;
pub mod results;
pub mod tournaments;
pub mod users;
