//! Merchant review commands

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use settle_core::config::default_config_path;
use settle_core::review::ReviewAction;
use settle_core::{
    apply_review, export_review, CategoryEngine, CsvWorkbook, Database, ReviewOptions,
};

/// Config file that reviewed merchants are written to
///
/// `--config` when given, otherwise the data-dir override.
pub fn review_config_path(config: Option<&Path>) -> Result<PathBuf> {
    match config {
        Some(path) => Ok(path.to_path_buf()),
        None => default_config_path()
            .context("No data directory for the category config; pass --config"),
    }
}

pub fn cmd_review_export(
    db: &Database,
    engine: &CategoryEngine,
    workbook: &CsvWorkbook,
    options: &ReviewOptions,
) -> Result<()> {
    let summary = export_review(db, engine, workbook, options)?;

    if summary.merchants == 0 {
        println!("No purchases to review");
        return Ok(());
    }

    println!("🧾 {} merchants in range", summary.merchants);
    println!("   Already in the lookup table: {}", summary.already_known);
    if summary.dry_run {
        println!(
            "🔎 {} rows would be written to {}/{}",
            summary.written, options.sheet, options.tab
        );
        return Ok(());
    }

    println!(
        "✅ Wrote {} rows to {}/{}",
        summary.written, options.sheet, options.tab
    );
    if let Ok(path) = workbook.tab_path(&options.sheet, &options.tab) {
        println!("   File: {}", path.display());
    }
    println!("   Mark rows in Approved or fill Corrected Category, then run: settle review apply");
    Ok(())
}

pub fn cmd_review_apply(
    workbook: &CsvWorkbook,
    sheet: &str,
    tab: &str,
    config_path: &Path,
    dry_run: bool,
) -> Result<()> {
    let report = apply_review(workbook, sheet, tab, config_path, dry_run)
        .with_context(|| format!("Failed to apply review from {}/{}", sheet, tab))?;

    for change in &report.changes {
        match change.action {
            ReviewAction::Added => println!("   + {:<28} {}", change.merchant, change.new_path),
            ReviewAction::Updated => println!(
                "   ~ {:<28} {} -> {}",
                change.merchant,
                change.old_path.as_deref().unwrap_or("-"),
                change.new_path
            ),
            ReviewAction::Unchanged => {
                println!("   = {:<28} {}", change.merchant, change.new_path)
            }
        }
    }

    println!();
    let verb = if dry_run { "Would update" } else { "Updated" };
    println!("✅ {} {}", verb, config_path.display());
    println!("   Added: {}", report.added);
    println!("   Updated: {}", report.updated);
    println!("   Unchanged: {}", report.unchanged);
    println!("   Still pending: {}", report.pending);
    Ok(())
}
