//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` - Shared utility to open the ledger
//! - `load_engine` / `remote_from_env` / `open_workbook` - per-run collaborators
//! - `cmd_init` - Initialize the ledger

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Datelike, Duration, Local, NaiveDate};
use settle_core::config::load_config;
use settle_core::remote::ExpenseService;
use settle_core::sheets::default_workbook_dir;
use settle_core::{CategoryDef, CategoryEngine, CsvWorkbook, Database, ExpenseClient};
use tracing::{debug, warn};

/// Days covered by `sync` when no start date is given
pub const DEFAULT_SYNC_DAYS: i64 = 30;

/// Open the ledger with encryption by default, or unencrypted if --no-encrypt
pub fn open_db(db_path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .with_context(|| format!("Database path is not valid UTF-8: {}", db_path.display()))?;
    if no_encrypt {
        Database::new_unencrypted(path_str).context("Failed to open database (unencrypted)")
    } else {
        Database::new(path_str).context("Failed to open database")
    }
}

/// Load the category configuration and build the engine for this run
pub fn load_engine(config: Option<&Path>) -> Result<CategoryEngine> {
    let config = load_config(config).context("Failed to load category configuration")?;
    Ok(CategoryEngine::new(config))
}

/// Add the remote service's category ids to the engine
///
/// A failed lookup keeps the configured ids.
pub async fn merge_remote_categories(engine: &mut CategoryEngine, remote: &ExpenseClient) {
    match remote.list_categories().await {
        Ok(categories) => {
            debug!(count = categories.len(), "Merging remote categories");
            engine.merge_categories(categories.into_iter().map(CategoryDef::from).collect());
        }
        Err(e) => warn!(error = %e, "Could not fetch remote categories"),
    }
}

/// Remote expense client from the environment, if configured
pub fn remote_from_env() -> Option<ExpenseClient> {
    ExpenseClient::from_env()
}

/// Remote expense client, failing when the environment does not configure one
pub fn require_remote() -> Result<ExpenseClient> {
    remote_from_env().ok_or_else(|| {
        anyhow::anyhow!(
            "Remote expense service not configured.\n\
             Set SETTLE_REMOTE_URL, SETTLE_REMOTE_TOKEN, SETTLE_REMOTE_USER_ID and \
             SETTLE_REMOTE_SELF_EXPENSE_ID (or REMOTE_BACKEND=mock)"
        )
    })
}

/// Workbook rooted at `dir`, or the default data directory
pub fn open_workbook(dir: Option<PathBuf>) -> Result<CsvWorkbook> {
    let root = dir.unwrap_or_else(default_workbook_dir);
    CsvWorkbook::new(&root).with_context(|| format!("Failed to open workbook at {}", root.display()))
}

pub fn current_year() -> i32 {
    Local::now().year()
}

/// Parse a YYYY-MM-DD command-line date
pub fn parse_date(value: &str, flag: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .with_context(|| format!("Invalid {} date '{}' (use YYYY-MM-DD)", flag, value))
}

/// Resolve `--from`/`--to`, defaulting to the last 30 days
pub fn resolve_range(from: Option<&str>, to: Option<&str>) -> Result<(NaiveDate, NaiveDate)> {
    let end = match to {
        Some(to) => parse_date(to, "--to")?,
        None => Local::now().date_naive(),
    };
    let start = match from {
        Some(from) => parse_date(from, "--from")?,
        None => end - Duration::days(DEFAULT_SYNC_DAYS),
    };
    if start > end {
        anyhow::bail!("--from {} is after --to {}", start, end);
    }
    Ok((start, end))
}

pub fn cmd_init(db_path: &Path, config: Option<&Path>, no_encrypt: bool) -> Result<()> {
    println!("🔧 Initializing ledger at {}...", db_path.display());

    let db = open_db(db_path, no_encrypt)?;
    let engine = load_engine(config)?;
    println!("   Category rules loaded: {}", engine.rule_count());

    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else {
        println!("   🔒 Encryption: ENABLED");
    }

    match remote_from_env() {
        Some(remote) => println!("   🔗 Remote expense service: {}", remote.host()),
        None => println!("   💡 Tip: Set SETTLE_REMOTE_URL to mirror purchases and link refunds"),
    }

    let total = db.count_transactions()?;
    println!("✅ Ledger ready ({} transactions)", total);
    println!();
    println!("Next steps:");
    println!("  1. Import a statement: settle import --file statement.csv");
    println!("  2. Link refunds: settle refunds process");

    Ok(())
}
