//! Repository implementations for database access.
//!
//! Each repository wraps a `&mut PgConnection`, so the caller decides whether a group of calls
//! runs inside a transaction:
//!
//! ```ignore
//! use arenactl::db::handlers::Users;
//!
//! let mut tx = pool.begin().await?;
//! let counts = Users::new(&mut tx).delete_with_dependents(&ids).await?;
//! tx.commit().await?;
//! ```
//!
//! Queries are checked at runtime. The schema belongs to the app and there is no database to
//! check against when the tool is built.
//!
//! - [`Users`]: cleanup candidates and cascading deletes
//! - [`Tournaments`]: lookup by title, participants, prize distribution, cascading deletes
//! - [`Matches`]: bracket reads and winner/advancement writes
//! - [`Rewards`]: results and reward bookkeeping counts

pub mod matches;
pub mod rewards;
pub mod tournaments;
pub mod users;

pub use matches::{Matches, PlayerSlot};
pub use rewards::Rewards;
pub use tournaments::Tournaments;
pub use users::Users;
