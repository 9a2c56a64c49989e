//! # arenactl: Operator CLI for the SABO Arena database
//!
//! `arenactl` is the one place where operational changes to the SABO Arena Supabase project
//! are made: schema migrations, the rank and handicap lookup tables, bracket and reward
//! checks, test data cleanup, and the repair loop for matches the app closed without a winner.
//!
//! ## Overview
//!
//! The database belongs to the mobile app. This crate only reads and writes the columns it
//! needs, through two channels:
//!
//! - **Postgres** ([`db`]) via `sqlx`, for migrations, cleanups, reports and the monitor. Any of
//!   Supabase's three endpoints can be chosen with `--connection`.
//! - **PostgREST** ([`rest`]) with the service role key, for the small lookup tables
//!   ([`seed`]) that the app reads through the same API.
//!
//! The arena's rules (rank bands, handicap tables, bracket placement, prize splits) live in
//! [`ranking`] as pure functions, so every command and every test works from the same
//! definitions.
//!
//! ## Commands
//!
//! | Command                    | Module      |
//! |----------------------------|-------------|
//! | `migrate`                  | [`migrate`] |
//! | `ranks show`/`sync`/`check-users` | [`report`], [`seed`] |
//! | `handicap show`/`populate`/`lookup` | [`report`], [`seed`], [`ranking::handicap`] |
//! | `standings`, `verify-rewards` | [`report`] |
//! | `cleanup users`/`tournament` | [`cleanup`] |
//! | `audit`                    | [`audit`]   |
//! | `monitor`                  | [`monitor`] |
//! | `prizes set`/`preview`     | [`ranking::prizes`] |
//!
//! ## Configuration
//!
//! See [`config`]. Credentials come only from the config file or the environment.
//!
//! ## Exit codes
//!
//! Failures map to distinct exit codes through [`errors::Error::exit_code`], so a partial seed
//! run (5) can be told apart from a declined confirmation (4) in scripts.

pub mod audit;
pub mod cleanup;
pub mod cli;
pub mod config;
pub mod db;
pub mod errors;
pub mod migrate;
pub mod monitor;
pub mod ranking;
pub mod report;
pub mod rest;
pub mod seed;
pub mod telemetry;
pub mod types;

pub use config::Config;
