//! Spreadsheet import and manual entry commands

use anyhow::{Context, Result};
use settle_core::ingest::SheetRowOutcome;
use settle_core::{
    add_manual, CategoryEngine, CsvWorkbook, Database, ManualEntry, ManualOutcome, SheetImporter,
};

use super::truncate;

pub async fn cmd_import_sheet(
    db: &Database,
    engine: &CategoryEngine,
    workbook: &CsvWorkbook,
    sheet: &str,
    tab: &str,
    dry_run: bool,
) -> Result<()> {
    if dry_run {
        println!("📥 Importing {}/{} (dry run)...", sheet, tab);
    } else {
        println!("📥 Importing {}/{}...", sheet, tab);
    }

    let report = SheetImporter::new(db, engine, workbook)
        .import_tab(sheet, tab, dry_run)
        .await
        .with_context(|| format!("Failed to import {}/{}", sheet, tab))?;

    if report.attempted == 0 {
        println!("   No rows in {}/{}", sheet, tab);
        return Ok(());
    }

    for result in &report.rows {
        let note = match &result.outcome {
            SheetRowOutcome::Added { id } => format!("added #{}", id),
            SheetRowOutcome::WouldAdd => "would add".to_string(),
            SheetRowOutcome::Duplicate { existing_id } => format!("duplicate of #{}", existing_id),
            SheetRowOutcome::Skipped { reason } => format!("skipped: {}", reason),
            SheetRowOutcome::Failed { message } => format!("failed: {}", message),
        };
        println!(
            "   {:>4}  {:<28} {:>10.2}  {}",
            result.row,
            truncate(&result.merchant, 28),
            result.amount,
            note
        );
    }

    println!();
    let verb = if dry_run { "Would import" } else { "Imported" };
    println!("✅ {} {} of {} rows", verb, report.imported, report.attempted);
    println!("   Skipped: {}", report.skipped);
    if report.failed > 0 {
        println!("   ⚠️  Failed: {}", report.failed);
    }
    if let Some(id) = report.import_log_id {
        println!("   Import log: #{}", id);
    }
    Ok(())
}

pub async fn cmd_add(
    db: &Database,
    engine: &CategoryEngine,
    entry: &ManualEntry,
    dry_run: bool,
) -> Result<()> {
    let kind = if entry.amount < 0.0 { "refund" } else { "purchase" };
    match add_manual(db, engine, entry, dry_run).await? {
        ManualOutcome::Added { id, category } => {
            println!(
                "✅ Added {} #{}: {} {:.2} on {}",
                kind,
                id,
                entry.merchant.trim(),
                entry.amount.abs(),
                entry.date
            );
            println!("   Category: {}", category);
            if kind == "refund" {
                println!("   💡 Link it with: settle refunds process");
            }
        }
        ManualOutcome::WouldAdd { category } => {
            println!(
                "🔎 Would add {}: {} {:.2} on {}",
                kind,
                entry.merchant.trim(),
                entry.amount.abs(),
                entry.date
            );
            println!("   Category: {}", category);
        }
        ManualOutcome::Duplicate { existing_id } => {
            println!("⏭️  Already in the ledger as #{}", existing_id);
        }
    }
    Ok(())
}
