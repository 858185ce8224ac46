//! Spreadsheet export and summary commands

use anyhow::Result;
use settle_core::{
    generate_year_summary, CsvWorkbook, Database, ExportOptions, SheetExporter,
    SpreadsheetService,
};

pub fn cmd_export(
    db: &Database,
    workbook: &CsvWorkbook,
    sheet: &str,
    year: i32,
    full: bool,
    dry_run: bool,
) -> Result<()> {
    let options = ExportOptions {
        sheet: sheet.to_string(),
        year,
        full,
        dry_run,
    };
    let summary = SheetExporter::new(db, workbook).export(&options)?;

    if summary.dry_run {
        println!(
            "🔎 {} rows would be written to {}/{}",
            summary.rows, sheet, summary.tab
        );
        return Ok(());
    }

    println!("📊 Exported {} rows to {}/{}", summary.rows, sheet, summary.tab);
    println!("   Marked written: {}", summary.marked_written);
    if let Ok(path) = workbook.tab_path(sheet, &summary.tab) {
        println!("   File: {}", path.display());
    }
    Ok(())
}

pub fn cmd_summary(
    db: &Database,
    sheet: Option<(&CsvWorkbook, &str)>,
    year: i32,
    dry_run: bool,
) -> Result<()> {
    let sheet = sheet.map(|(workbook, name)| (workbook as &dyn SpreadsheetService, name));
    let report = generate_year_summary(db, year, sheet, dry_run)?;

    if report.months.is_empty() {
        println!("No transactions in {}", year);
        return Ok(());
    }

    println!();
    println!("📅 {} Spending Summary", year);
    println!("   ─────────────────────────────────────────────────────────────");
    println!(
        "   {:<8} {:>11} {:>9} {:>6} {:>12} {:>8}",
        "Month", "Net", "Avg", "Count", "Cumulative", "MoM %"
    );
    for month in &report.months {
        println!(
            "   {:<8} {:>11.2} {:>9.2} {:>6} {:>12.2} {:>8.2}",
            month.year_month,
            month.total_spent_net,
            month.avg_transaction,
            month.transaction_count,
            month.cumulative_spending,
            month.mom_change
        );
    }
    if report.written_to_sheet {
        println!();
        println!("   Written to the Summary tab");
    }
    Ok(())
}
