//! Drift check between the tables the app queries and the tables the database has.
//!
//! The app talks to Supabase with `.from('table')` calls, so a grep of the source tree gives the
//! tables it expects. The live side comes from the markdown schema snapshot that is exported
//! into the app repo.

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, instrument, warn};

use crate::config::AuditConfig;
use crate::errors::{Error, Result};

static SNAPSHOT_TABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\s+([a-zA-Z0-9_]+)").expect("snapshot table regex is valid"));

static FROM_CALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\.from\(\s*['"]([a-zA-Z0-9_]+)['"]\s*\)"#).expect("from() regex is valid"));

/// Table names listed under the snapshot's "Table List" heading
pub fn parse_snapshot(markdown: &str) -> BTreeSet<String> {
    let mut tables = BTreeSet::new();
    let mut in_list = false;

    for line in markdown.lines() {
        if !in_list {
            in_list = line.contains("Table List");
            continue;
        }
        if line.starts_with("## ") {
            break;
        }
        if let Some(caps) = SNAPSHOT_TABLE_RE.captures(line.trim()) {
            tables.insert(caps[1].to_string());
        }
    }
    tables
}

/// Tables referenced by `.from(...)` calls in one file
pub fn referenced_tables(source: &str) -> BTreeSet<String> {
    FROM_CALL_RE
        .captures_iter(source)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// What a source tree scan found
#[derive(Debug, Default)]
pub struct SourceScan {
    /// Table name to the files that reference it
    pub references: BTreeMap<String, Vec<PathBuf>>,
    pub files_scanned: usize,
    /// Files that could not be read
    pub unreadable: Vec<PathBuf>,
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|wanted| wanted.eq_ignore_ascii_case(ext)))
}

fn collect_files(dir: &Path, extensions: &[String], files: &mut Vec<PathBuf>, unreadable: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "Skipping unreadable directory");
            unreadable.push(dir.to_path_buf());
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        match entry.file_type() {
            Ok(kind) if kind.is_dir() => collect_files(&path, extensions, files, unreadable),
            Ok(kind) if kind.is_file() && has_extension(&path, extensions) => files.push(path),
            Ok(_) => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping entry");
                unreadable.push(path);
            }
        }
    }
}

/// Walk `root` and record every `.from(...)` table reference in files with the given extensions
#[instrument(skip(root, extensions), fields(root = %root.display()))]
pub fn scan_source(root: &Path, extensions: &[String]) -> Result<SourceScan> {
    if !root.is_dir() {
        return Err(Error::BadRequest {
            message: format!("source directory {} does not exist", root.display()),
        });
    }

    let mut files = Vec::new();
    let mut scan = SourceScan::default();
    collect_files(root, extensions, &mut files, &mut scan.unreadable);
    files.sort();

    for file in files {
        let source = match fs::read_to_string(&file) {
            Ok(source) => source,
            Err(e) => {
                warn!(path = %file.display(), error = %e, "Skipping unreadable file");
                scan.unreadable.push(file);
                continue;
            }
        };
        scan.files_scanned += 1;
        for table in referenced_tables(&source) {
            scan.references.entry(table).or_default().push(file.clone());
        }
    }

    debug!(files = scan.files_scanned, tables = scan.references.len(), "Source scan finished");
    Ok(scan)
}

/// Comparison of code references against the snapshot
#[derive(Debug)]
pub struct AuditReport {
    /// Referenced in code but absent from the database
    pub missing: BTreeMap<String, Vec<PathBuf>>,
    /// Present in the database but never referenced
    pub unused: Vec<String>,
    pub live_tables: usize,
    pub referenced_tables: usize,
    pub files_scanned: usize,
    pub unreadable: Vec<PathBuf>,
}

impl AuditReport {
    pub fn compare(live: &BTreeSet<String>, scan: SourceScan) -> Self {
        let unused = live
            .iter()
            .filter(|table| !scan.references.contains_key(*table))
            .cloned()
            .collect();
        let referenced_tables = scan.references.len();
        let missing = scan
            .references
            .into_iter()
            .filter(|(table, _)| !live.contains(table))
            .collect();

        Self {
            missing,
            unused,
            live_tables: live.len(),
            referenced_tables,
            files_scanned: scan.files_scanned,
            unreadable: scan.unreadable,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn print(&self, unused_preview: usize) {
        println!(
            "Scanned {} files: {} tables referenced, {} tables in the snapshot",
            self.files_scanned, self.referenced_tables, self.live_tables
        );
        if !self.unreadable.is_empty() {
            println!("{} paths could not be read (see log)", self.unreadable.len());
        }

        if self.missing.is_empty() {
            println!("\nEvery referenced table exists.");
        } else {
            println!("\nCRITICAL: {} tables are referenced but missing:", self.missing.len());
            for (table, files) in &self.missing {
                println!("  {table}");
                for file in files {
                    println!("    {}", file.display());
                }
            }
        }

        if !self.unused.is_empty() {
            println!("\n{} tables are never referenced:", self.unused.len());
            for table in self.unused.iter().take(unused_preview) {
                println!("  {table}");
            }
            if self.unused.len() > unused_preview {
                println!("  ... and {} more", self.unused.len() - unused_preview);
            }
        }
    }
}

/// Run the audit and print the report; missing tables make it an error
pub fn run(config: &AuditConfig) -> Result<AuditReport> {
    let snapshot = fs::read_to_string(&config.snapshot_file).map_err(|e| Error::io(&config.snapshot_file, e))?;
    let live = parse_snapshot(&snapshot);
    if live.is_empty() {
        return Err(Error::BadRequest {
            message: format!("no table list found in {}", config.snapshot_file.display()),
        });
    }

    let scan = scan_source(&config.source_dir, &config.extensions)?;
    let report = AuditReport::compare(&live, scan);
    report.print(config.unused_preview);

    if report.is_clean() {
        info!(unused = report.unused.len(), "Audit passed");
        Ok(report)
    } else {
        Err(Error::BadRequest {
            message: format!(
                "{} referenced tables are missing from the database",
                report.missing.len()
            ),
        })
    }
}
