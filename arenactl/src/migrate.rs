//! SQL migration runner.
//!
//! By default each file runs as a single transaction owned by the runner: `BEGIN;` and
//! `COMMIT;` lines in the file are dropped, and any failure rolls the whole file back and stops
//! the run. With `--per-statement` the file is split into statements that each get their own
//! transaction, failures are counted, and the run carries on.

use async_trait::async_trait;
use sqlx::PgPool;
use std::path::{Path, PathBuf};
use tracing::{error, info, instrument, warn};

use crate::errors::{Error, Result};

/// How a migration run executes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationOptions {
    pub per_statement: bool,
    pub dry_run: bool,
}

/// A migration file read from disk and prepared for execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    pub path: PathBuf,
    /// File contents with transaction control lines removed
    pub sql: String,
    pub statements: Vec<String>,
}

impl MigrationFile {
    pub fn parse(path: impl Into<PathBuf>, contents: &str) -> Self {
        let sql = strip_transaction_control(contents);
        let statements = split_statements(&sql);
        Self {
            path: path.into(),
            sql,
            statements,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Ok(Self::parse(path, &contents))
    }
}

/// Statements run and failed for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<String>,
}

fn is_transaction_control(statement: &str) -> bool {
    let normalized = statement.trim().trim_end_matches(';').trim().to_ascii_uppercase();
    matches!(
        normalized.as_str(),
        "BEGIN" | "BEGIN TRANSACTION" | "START TRANSACTION" | "COMMIT" | "COMMIT TRANSACTION" | "END TRANSACTION"
    )
}

/// Drop lines that only open or commit a transaction.
///
/// Only lines that start outside quotes, comments and dollar-quoted bodies are candidates, so
/// a `COMMIT;` inside a procedure body stays.
pub fn strip_transaction_control(sql: &str) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;

    while i < chars.len() {
        if i == 0 || chars[i - 1] == '\n' {
            let line_end = chars[i..].iter().position(|&c| c == '\n').map_or(chars.len(), |p| i + p);
            let line: String = chars[i..line_end].iter().collect();
            if line.trim_end().ends_with(';') && is_transaction_control(&line) {
                i = (line_end + 1).min(chars.len());
                continue;
            }
        }

        match opaque_run(&chars, i) {
            Some((end, _)) => {
                out.extend(&chars[i..end]);
                i = end;
            }
            None => {
                out.push(chars[i]);
                i += 1;
            }
        }
    }
    out
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Index just past a quoted run starting at `start`. A doubled quote is an escaped quote.
fn quoted_end(chars: &[char], start: usize, quote: char) -> usize {
    let mut j = start + 1;
    while j < chars.len() {
        if chars[j] == quote {
            if chars.get(j + 1) == Some(&quote) {
                j += 2;
                continue;
            }
            return j + 1;
        }
        j += 1;
    }
    chars.len()
}

/// Index just past a block comment starting at `start`. Postgres block comments nest.
fn block_comment_end(chars: &[char], start: usize) -> usize {
    let mut depth = 1;
    let mut j = start + 2;
    while j < chars.len() {
        match (chars[j], chars.get(j + 1)) {
            ('/', Some('*')) => {
                depth += 1;
                j += 2;
            }
            ('*', Some('/')) => {
                depth -= 1;
                j += 2;
                if depth == 0 {
                    return j;
                }
            }
            _ => j += 1,
        }
    }
    chars.len()
}

/// Dollar-quote opening tag at `start` (`$$` or `$name$`), if there is one
fn dollar_tag(chars: &[char], start: usize) -> Option<&[char]> {
    if start > 0 && is_identifier_char(chars[start - 1]) {
        return None;
    }
    let mut j = start + 1;
    match chars.get(j) {
        Some('$') => return Some(&chars[start..=j]),
        Some(c) if c.is_alphabetic() || *c == '_' => {}
        _ => return None,
    }
    while let Some(c) = chars.get(j) {
        if *c == '$' {
            return Some(&chars[start..=j]);
        }
        if !(c.is_alphanumeric() || *c == '_') {
            return None;
        }
        j += 1;
    }
    None
}

/// Comment, quoted run or dollar-quoted body starting at `i`: the index just past it, and
/// whether it counts as code
fn opaque_run(chars: &[char], i: usize) -> Option<(usize, bool)> {
    let next = chars.get(i + 1).copied();
    match chars[i] {
        '-' if next == Some('-') => Some((
            chars[i..]
                .iter()
                .position(|&ch| ch == '\n')
                .map_or(chars.len(), |p| i + p),
            false,
        )),
        '/' if next == Some('*') => Some((block_comment_end(chars, i), false)),
        quote @ ('\'' | '"') => Some((quoted_end(chars, i, quote), true)),
        '$' => dollar_tag(chars, i).map(|tag| {
            let body = i + tag.len();
            let end = (body..chars.len())
                .find(|&k| chars[k..].starts_with(tag))
                .map_or(chars.len(), |k| k + tag.len());
            (end, true)
        }),
        _ => None,
    }
}

/// Split SQL into statements on `;`, ignoring semicolons inside quotes, comments and
/// dollar-quoted bodies. Statements that are only comments or whitespace are dropped.
pub fn split_statements(sql: &str) -> Vec<String> {
    let chars: Vec<char> = sql.chars().collect();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut has_code = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == ';' {
            if has_code {
                statements.push(current.trim().to_string());
            }
            current.clear();
            has_code = false;
            i += 1;
            continue;
        }

        match opaque_run(&chars, i) {
            Some((end, is_code)) => {
                has_code |= is_code;
                current.extend(&chars[i..end]);
                i = end;
            }
            None => {
                if !c.is_whitespace() {
                    has_code = true;
                }
                current.push(c);
                i += 1;
            }
        }
    }

    if has_code {
        statements.push(current.trim().to_string());
    }
    statements
}

/// Read and prepare every file before anything touches the database
pub fn load_all(paths: &[PathBuf]) -> Result<Vec<MigrationFile>> {
    if paths.is_empty() {
        return Err(Error::BadRequest {
            message: "no migration files given".to_string(),
        });
    }
    paths.iter().map(|p| MigrationFile::load(p)).collect()
}

/// Print what would run
pub fn print_plan(files: &[MigrationFile], options: MigrationOptions) {
    for file in files {
        println!("-- {} ({} statements)", file.path.display(), file.statements.len());
        if options.per_statement {
            for (n, statement) in file.statements.iter().enumerate() {
                println!("-- [{}]\n{};", n + 1, statement);
            }
        } else {
            println!("BEGIN;\n{}\nCOMMIT;", file.sql.trim());
        }
    }
}

/// Runs SQL against the database
#[async_trait]
pub trait MigrationExecutor: Send + Sync {
    /// Run `sql` in a transaction of its own. Nothing persists when it fails.
    async fn execute_atomically(&self, sql: &str) -> Result<()>;
}

#[async_trait]
impl MigrationExecutor for PgPool {
    async fn execute_atomically(&self, sql: &str) -> Result<()> {
        let mut tx = self.begin().await?;
        // Dropping `tx` on error rolls back
        sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(sql)).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[instrument(skip(executor, file), fields(path = %file.path.display()), err)]
async fn run_whole_file(executor: &impl MigrationExecutor, file: &MigrationFile) -> Result<FileOutcome> {
    executor.execute_atomically(&file.sql).await?;

    info!(statements = file.statements.len(), "Migration committed");
    Ok(FileOutcome {
        path: file.path.clone(),
        attempted: file.statements.len(),
        succeeded: file.statements.len(),
        failures: Vec::new(),
    })
}

#[instrument(skip(executor, file), fields(path = %file.path.display()))]
async fn run_per_statement(executor: &impl MigrationExecutor, file: &MigrationFile) -> FileOutcome {
    let mut outcome = FileOutcome {
        path: file.path.clone(),
        attempted: 0,
        succeeded: 0,
        failures: Vec::new(),
    };

    for (n, statement) in file.statements.iter().enumerate() {
        if is_transaction_control(statement) {
            continue;
        }
        outcome.attempted += 1;
        match executor.execute_atomically(statement).await {
            Ok(()) => {
                outcome.succeeded += 1;
                info!(statement = n + 1, "[{}/{}] ok", outcome.succeeded, outcome.attempted);
            }
            Err(e) => {
                let preview: String = statement.chars().take(80).collect();
                warn!(statement = n + 1, error = %e, "Statement failed: {}", preview);
                outcome.failures.push(format!("statement {}: {e}", n + 1));
            }
        }
    }

    outcome
}

/// Run files in order.
///
/// In whole-file mode the first failing file stops the run and its error is returned. In
/// per-statement mode every file runs and a run with failures ends in [`Error::Incomplete`].
pub async fn run(
    executor: &impl MigrationExecutor,
    files: &[MigrationFile],
    options: MigrationOptions,
) -> Result<Vec<FileOutcome>> {
    let mut outcomes = Vec::with_capacity(files.len());

    for file in files {
        println!("Running {}", file.path.display());
        if options.per_statement {
            let outcome = run_per_statement(executor, file).await;
            println!("  {}/{} statements succeeded", outcome.succeeded, outcome.attempted);
            for failure in &outcome.failures {
                println!("  FAILED {failure}");
            }
            outcomes.push(outcome);
        } else {
            match run_whole_file(executor, file).await {
                Ok(outcome) => {
                    println!("  committed ({} statements)", outcome.attempted);
                    outcomes.push(outcome);
                }
                Err(e) => {
                    error!(path = %file.path.display(), "Migration rolled back");
                    println!("  rolled back: {e}");
                    return Err(e);
                }
            }
        }
    }

    let attempted: usize = outcomes.iter().map(|o| o.attempted).sum();
    let succeeded: usize = outcomes.iter().map(|o| o.succeeded).sum();
    if succeeded < attempted {
        return Err(Error::Incomplete {
            operation: "migrate".to_string(),
            attempted,
            succeeded,
        });
    }
    Ok(outcomes)
}
