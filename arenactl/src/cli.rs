//! Subcommands and their dispatch.

use clap::{Args as ClapArgs, Subcommand};
use sqlx::PgPool;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{Config, ConnectionTarget};
use crate::db::handlers::Tournaments;
use crate::errors::{Error, Result};
use crate::ranking::handicap::{BASIC_RACE_TO, HandicapScheme, HandicapTable, Side};
use crate::ranking::prizes::{PrizeDistribution, PrizeFile};
use crate::ranking::ranks::RankCode;
use crate::rest::RestClient;
use crate::seed::SeedReport;
use crate::types::{Operation, abbrev_uuid};
use crate::{audit, cleanup, db, migrate, monitor, report, seed};

/// Postgres endpoint selection shared by the database commands
#[derive(ClapArgs, Debug, Clone, Copy)]
pub struct ConnectionArgs {
    /// Which Supabase endpoint to connect through
    #[arg(long, value_enum, default_value_t = ConnectionTarget::Direct)]
    pub connection: ConnectionTarget,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run SQL migration files in order
    Migrate {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Run each statement in its own transaction and keep going on failure
        #[arg(long)]
        per_statement: bool,
        /// Print the statements without running them
        #[arg(long)]
        dry_run: bool,
        #[command(flatten)]
        connection: ConnectionArgs,
    },
    /// Inspect or fix the rank_system table
    Ranks {
        #[command(subcommand)]
        command: RanksCommand,
    },
    /// Inspect, fill or query the handicap table
    Handicap {
        #[command(subcommand)]
        command: HandicapCommand,
    },
    /// Print matches, bracket standings and results of a tournament
    Standings {
        title: String,
        #[command(flatten)]
        connection: ConnectionArgs,
    },
    /// Check that rewards were distributed for a tournament
    VerifyRewards {
        title: String,
        #[command(flatten)]
        connection: ConnectionArgs,
    },
    /// Delete test users or a tournament
    Cleanup {
        #[command(subcommand)]
        command: CleanupCommand,
        #[command(flatten)]
        connection: ConnectionArgs,
    },
    /// Compare tables referenced by the app source against the schema snapshot
    Audit {
        /// Source tree to scan (overrides audit.source_dir)
        #[arg(long)]
        source_dir: Option<PathBuf>,
        /// Schema snapshot markdown (overrides audit.snapshot_file)
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Repair matches completed without a winner
    Monitor {
        /// Run a single pass and exit
        #[arg(long)]
        once: bool,
        #[command(flatten)]
        connection: ConnectionArgs,
    },
    /// Set or preview tournament prize distributions
    Prizes {
        #[command(subcommand)]
        command: PrizesCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum RanksCommand {
    /// Show live bands next to the standard ones
    Show,
    /// Delete retired ranks and write the standard bands
    Sync,
    /// List users whose stored rank does not match their ELO
    CheckUsers,
}

#[derive(Subcommand, Debug)]
pub enum HandicapCommand {
    /// Show live rules and their drift from a scheme
    Show {
        #[arg(long, value_enum)]
        scheme: Option<HandicapScheme>,
    },
    /// Replace every rule with a scheme's rules
    Populate {
        #[arg(long, value_enum)]
        scheme: Option<HandicapScheme>,
    },
    /// Handicap for a pairing of two ranks
    Lookup {
        first: RankCode,
        second: RankCode,
        /// Bet amount, SPA points or a VND tier depending on the scheme
        #[arg(long)]
        bet: Option<i32>,
        #[arg(long, value_enum)]
        scheme: Option<HandicapScheme>,
    },
}

#[derive(Subcommand, Debug)]
pub enum CleanupCommand {
    /// Delete users matching an email pattern and everything that references them
    Users {
        /// `ILIKE` pattern (defaults to cleanup.test_email_pattern)
        #[arg(long)]
        email_pattern: Option<String>,
        /// Addresses to keep in addition to cleanup.protected_emails
        #[arg(long)]
        keep: Vec<String>,
        /// Skip the typed confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Delete a tournament with its matches, participants and results
    Tournament {
        title: String,
        /// Delete only the matches
        #[arg(long)]
        matches_only: bool,
        /// Skip the typed confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum PrizesCommand {
    /// Write a prize distribution file into a tournament
    Set {
        title: String,
        /// YAML or JSON prize file
        #[arg(long)]
        file: PathBuf,
        /// Print the distribution without writing it
        #[arg(long)]
        dry_run: bool,
        #[command(flatten)]
        connection: ConnectionArgs,
    },
    /// Print a template split of a pool
    Preview {
        #[arg(long, default_value = "standard")]
        template: String,
        /// Pool in VND
        #[arg(long)]
        pool: i64,
        #[arg(long, default_value = "sponsor")]
        source: String,
    },
}

async fn pool(config: &Config, connection: ConnectionArgs) -> Result<PgPool> {
    db::connect(&config.database, connection.connection).await
}

fn print_seed_report(report: &SeedReport) {
    println!(
        "{}: {}/{} succeeded, {} rows removed first",
        report.operation, report.succeeded, report.attempted, report.removed
    );
    for failure in &report.failures {
        println!("  FAILED {failure}");
    }
}

/// One-line description of a lookup result
pub fn describe_lookup(first: RankCode, second: RankCode, scheme: HandicapScheme, bet: Option<i32>) -> Result<String> {
    let handicap = HandicapTable::new(scheme).lookup(first, second, bet)?;
    let race = if scheme.uses_bets() {
        String::new()
    } else {
        format!(", race to {BASIC_RACE_TO}")
    };
    Ok(match handicap.receiver {
        None => format!("{first} vs {second}: same rank, no handicap{race}"),
        Some(side) => {
            let receiver = match side {
                Side::First => first,
                Side::Second => second,
            };
            format!(
                "{first} vs {second}: {} ranks apart, {receiver} receives {}{race}",
                handicap.difference, handicap.value
            )
        }
    })
}

async fn handicap(config: &Config, command: HandicapCommand) -> Result<()> {
    let default_scheme = config.handicap.scheme;
    match command {
        HandicapCommand::Show { scheme } => {
            let client = RestClient::from_config(config)?;
            report::handicap_show(&client, scheme.unwrap_or(default_scheme)).await?;
        }
        HandicapCommand::Populate { scheme } => {
            let client = RestClient::from_config(config)?;
            let scheme = scheme.unwrap_or(default_scheme);
            let (report, verification) = seed::populate_handicap(&client, scheme).await?;
            print_seed_report(&report);
            report.into_result()?;
            if !verification.is_clean() {
                for problem in verification.problems() {
                    println!("  MISMATCH {problem}");
                }
                return Err(Error::Incomplete {
                    operation: format!("{scheme} handicap verification"),
                    attempted: verification.expected_count,
                    succeeded: verification
                        .expected_count
                        .saturating_sub(verification.missing.len() + verification.drift.len()),
                });
            }
            println!("handicap_rules verified against the {scheme} scheme");
        }
        HandicapCommand::Lookup {
            first,
            second,
            bet,
            scheme,
        } => {
            println!("{}", describe_lookup(first, second, scheme.unwrap_or(default_scheme), bet)?);
        }
    }
    Ok(())
}

async fn prizes(config: &Config, command: PrizesCommand) -> Result<()> {
    match command {
        PrizesCommand::Preview { template, pool, source } => {
            let distribution = PrizeDistribution::from_template(&source, &template, pool)?;
            report::print_distribution(&distribution);
        }
        PrizesCommand::Set {
            title,
            file,
            dry_run,
            connection,
        } => {
            let distribution = PrizeFile::load(&file)?.resolve()?;
            report::print_distribution(&distribution);
            if dry_run {
                println!("Dry run, nothing written.");
                return Ok(());
            }

            let pool = pool(config, connection).await?;
            let tournament = report::find_tournament(&pool, &title).await?;
            let value = serde_json::to_value(&distribution).map_err(|e| Error::Other(e.into()))?;
            let mut conn = pool.acquire().await?;
            if !Tournaments::new(&mut conn)
                .set_prize_distribution(tournament.id, &value)
                .await?
            {
                return Err(Error::NotFound {
                    resource: "Tournament".to_string(),
                    id: title,
                });
            }
            info!(
                operation = %Operation::Update,
                tournament = %abbrev_uuid(&tournament.id),
                slots = distribution.distribution.len(),
                "Prize distribution written"
            );
            println!("Prize distribution written to {:?}", tournament.title);
        }
    }
    Ok(())
}

/// Run one subcommand. `shutdown` stops the monitor loop.
pub async fn run(config: Config, command: Command, shutdown: CancellationToken) -> Result<()> {
    match command {
        Command::Migrate {
            files,
            per_statement,
            dry_run,
            connection,
        } => {
            let options = migrate::MigrationOptions { per_statement, dry_run };
            let files = migrate::load_all(&files)?;
            if dry_run {
                migrate::print_plan(&files, options);
                return Ok(());
            }
            let pool = pool(&config, connection).await?;
            migrate::run(&pool, &files, options).await?;
        }
        Command::Ranks { command } => {
            let client = RestClient::from_config(&config)?;
            match command {
                RanksCommand::Show => {
                    report::ranks_show(&client).await?;
                }
                RanksCommand::Sync => {
                    let report = seed::sync_ranks(&client).await?;
                    print_seed_report(&report);
                    report.into_result()?;
                }
                RanksCommand::CheckUsers => {
                    report::check_user_ranks(&client).await?;
                }
            }
        }
        Command::Handicap { command } => handicap(&config, command).await?,
        Command::Standings { title, connection } => {
            let pool = pool(&config, connection).await?;
            report::standings(&pool, &title).await?;
        }
        Command::VerifyRewards { title, connection } => {
            let pool = pool(&config, connection).await?;
            report::verify_rewards(&pool, &title).await?;
        }
        Command::Cleanup { command, connection } => {
            let pool = pool(&config, connection).await?;
            match command {
                CleanupCommand::Users {
                    email_pattern,
                    keep,
                    yes,
                } => {
                    cleanup::cleanup_users(&pool, &config.cleanup, email_pattern.as_deref(), &keep, yes).await?;
                }
                CleanupCommand::Tournament {
                    title,
                    matches_only,
                    yes,
                } => {
                    cleanup::cleanup_tournament(&pool, &title, matches_only, yes).await?;
                }
            }
        }
        Command::Audit { source_dir, snapshot } => {
            let mut audit_config = config.audit.clone();
            if let Some(dir) = source_dir {
                audit_config.source_dir = dir;
            }
            if let Some(file) = snapshot {
                audit_config.snapshot_file = file;
            }
            audit::run(&audit_config)?;
        }
        Command::Monitor { once, connection } => {
            let pool = pool(&config, connection).await?;
            monitor::run(&pool, &config.monitor, once, shutdown).await?;
        }
        Command::Prizes { command } => prizes(&config, command).await?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Args;
    use clap::Parser;

    fn parse(argv: &[&str]) -> Command {
        let args = Args::try_parse_from(std::iter::once("arenactl").chain(argv.iter().copied())).unwrap();
        args.command.unwrap()
    }

    #[test]
    fn test_parse_migrate() {
        match parse(&["migrate", "a.sql", "b.sql", "--per-statement", "--connection", "transaction-pooler"]) {
            Command::Migrate {
                files,
                per_statement,
                dry_run,
                connection,
            } => {
                assert_eq!(files, vec![PathBuf::from("a.sql"), PathBuf::from("b.sql")]);
                assert!(per_statement);
                assert!(!dry_run);
                assert_eq!(connection.connection, ConnectionTarget::TransactionPooler);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_ranks_check_users() {
        assert!(matches!(
            parse(&["ranks", "check-users"]),
            Command::Ranks {
                command: RanksCommand::CheckUsers
            }
        ));
        assert!(matches!(
            parse(&["handicap", "show", "--scheme", "vnd"]),
            Command::Handicap {
                command: HandicapCommand::Show {
                    scheme: Some(HandicapScheme::Vnd)
                }
            }
        ));
    }

    #[test]
    fn test_migrate_needs_files() {
        assert!(Args::try_parse_from(["arenactl", "migrate"]).is_err());
    }

    #[test]
    fn test_parse_handicap_lookup() {
        match parse(&["handicap", "lookup", "H+", "K", "--bet", "300", "--scheme", "flat"]) {
            Command::Handicap {
                command:
                    HandicapCommand::Lookup {
                        first,
                        second,
                        bet,
                        scheme,
                    },
            } => {
                assert_eq!(first, RankCode::HPlus);
                assert_eq!(second, RankCode::K);
                assert_eq!(bet, Some(300));
                assert_eq!(scheme, Some(HandicapScheme::Flat));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_retired_rank_is_rejected_at_parse_time() {
        assert!(Args::try_parse_from(["arenactl", "handicap", "lookup", "K+", "K"]).is_err());
    }

    #[test]
    fn test_parse_cleanup() {
        match parse(&["cleanup", "users", "--keep", "a@x.com", "--keep", "b@x.com", "-y"]) {
            Command::Cleanup {
                command: CleanupCommand::Users {
                    email_pattern, keep, yes
                },
                connection,
            } => {
                assert!(email_pattern.is_none());
                assert_eq!(keep, vec!["a@x.com".to_string(), "b@x.com".to_string()]);
                assert!(yes);
                assert_eq!(connection.connection, ConnectionTarget::Direct);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_describe_lookup() {
        assert_eq!(
            describe_lookup(RankCode::K, RankCode::H, HandicapScheme::Challenge, Some(100)).unwrap(),
            "K vs H: 2 ranks apart, K receives 1"
        );
        assert_eq!(
            describe_lookup(RankCode::C, RankCode::K, HandicapScheme::Basic, None).unwrap(),
            "C vs K: 9 ranks apart, K receives 9, race to 7"
        );
        assert_eq!(
            describe_lookup(RankCode::G, RankCode::G, HandicapScheme::Basic, None).unwrap(),
            "G vs G: same rank, no handicap, race to 7"
        );

        let err = describe_lookup(RankCode::K, RankCode::C, HandicapScheme::Challenge, Some(100)).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
