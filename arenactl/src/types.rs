//! Common type definitions shared across commands.
//!
//! # ID Types
//!
//! Every row the tool touches is keyed by a UUID. The aliases below only exist to make
//! signatures self-describing:
//!
//! - [`UserId`]: `users.id`
//! - [`TournamentId`]: `tournaments.id`
//! - [`MatchId`]: `matches.id`
//!
//! # Utility Functions
//!
//! - [`abbrev_uuid`]: Abbreviate UUIDs to first 8 chars for logging

use std::fmt;
use uuid::Uuid;

pub type UserId = Uuid;
pub type TournamentId = Uuid;
pub type MatchId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and reports
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

/// Write operations, used in confirmation prompts and log fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Delete,
    Update,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Delete => write!(f, "DELETE"),
            Operation::Update => write!(f, "UPDATE"),
        }
    }
}
