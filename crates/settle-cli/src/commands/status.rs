//! Status and history command implementations

use std::path::Path;

use anyhow::Result;
use settle_core::db::DB_KEY_ENV;
use settle_core::models::ImportSourceType;
use settle_core::remote::ExpenseService;
use settle_core::Database;

use super::{open_db, remote_from_env, truncate};

pub fn cmd_status(db_path: &Path, no_encrypt: bool) -> Result<()> {
    use std::fs;

    println!();
    println!("📊 Settle Status");
    println!("   ─────────────────────────────────────────────────────────────");

    println!("   Ledger: {}", db_path.display());

    if db_path.exists() {
        if let Ok(metadata) = fs::metadata(db_path) {
            let size_kb = metadata.len() as f64 / 1024.0;
            if size_kb < 1024.0 {
                println!("   Size: {:.1} KB", size_kb);
            } else {
                println!("   Size: {:.1} MB", size_kb / 1024.0);
            }
        }
    } else {
        println!("   Size: (ledger not initialized)");
    }

    let has_key = std::env::var(DB_KEY_ENV).is_ok();
    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else if has_key {
        println!("   🔒 Encryption: ENABLED ({}=***)", DB_KEY_ENV);
    } else {
        println!("   ❌ Encryption: REQUIRED but {} not set", DB_KEY_ENV);
    }

    match remote_from_env() {
        Some(remote) => println!("   Remote: {}", remote.host()),
        None => println!("   Remote: (not configured)"),
    }

    if db_path.exists() {
        match open_db(db_path, no_encrypt) {
            Ok(db) => print_ledger_stats(&db)?,
            Err(e) => {
                println!();
                println!("   ❌ Error opening ledger: {}", e);
                if !no_encrypt && !has_key {
                    println!("      Set {} or use --no-encrypt", DB_KEY_ENV);
                } else if has_key {
                    println!("      (Check if {} is correct)", DB_KEY_ENV);
                }
            }
        }
    }

    println!();
    Ok(())
}

pub fn print_ledger_stats(db: &Database) -> Result<()> {
    let stats = db.get_stats()?;
    println!();
    println!("   Transactions: {}", stats.total);
    for (source, count) in &stats.by_source {
        println!("     {}: {}", source, count);
    }
    if let (Some(earliest), Some(latest)) = (stats.earliest_date, stats.latest_date) {
        println!("   Date range: {} to {}", earliest, latest);
    }
    println!("   Mirrored remotely: {}", stats.mirrored);
    println!(
        "   Written to sheet: {} ({} pending)",
        stats.written_to_sheet, stats.unwritten
    );
    if stats.deleted_remotely > 0 {
        println!("   Deleted remotely: {}", stats.deleted_remotely);
    }
    if !stats.refunds_by_status.is_empty() {
        println!("   Refunds:");
        for (status, count) in &stats.refunds_by_status {
            println!("     {}: {}", status, count);
        }
    }
    Ok(())
}

pub fn cmd_history(db: &Database, source: Option<&str>, limit: i64) -> Result<()> {
    let source: Option<ImportSourceType> = source
        .map(|s| s.parse().map_err(|e: String| anyhow::anyhow!(e)))
        .transpose()?;
    let runs = db.import_history(source, limit)?;

    if runs.is_empty() {
        println!("No import runs recorded.");
        return Ok(());
    }

    println!();
    println!("🗂️  Import History");
    println!("   ─────────────────────────────────────────────────────────────");
    for run in &runs {
        println!(
            "   #{:<4} {} {:<10} {:<30} {:>4} tried {:>4} added {:>4} skipped {:>4} failed",
            run.id,
            run.timestamp.format("%Y-%m-%d %H:%M"),
            run.source_type.as_str(),
            truncate(run.source_identifier.as_deref().unwrap_or("-"), 30),
            run.records_attempted,
            run.records_imported,
            run.records_skipped,
            run.records_failed
        );
        if let Some(error) = &run.error_message {
            println!("         ❌ {}", error);
        }
    }
    Ok(())
}
