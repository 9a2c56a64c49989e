//! Pure arena rules: rank bands, handicaps, bracket standings and prize splits.
//!
//! Nothing in here touches the network or the database. Commands fetch rows, hand them to
//! these functions, and write back what comes out.

pub mod bracket;
pub mod handicap;
pub mod prizes;
pub mod ranks;
