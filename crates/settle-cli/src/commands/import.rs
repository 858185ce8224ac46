//! Statement import and push command implementations

use std::path::Path;

use anyhow::{Context, Result};
use settle_core::{
    statement::AmountConvention, CategoryEngine, Database, ExpenseClient, ImportOptions,
    ImportReport, RowOutcome, StatementImporter,
};

use super::{parse_date, truncate};

/// Flags of the `import` command
#[derive(Debug, Clone, Default)]
pub struct ImportArgs {
    pub convention: String,
    pub mirror: bool,
    pub offset: usize,
    pub limit: Option<usize>,
    pub merchant: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub no_refunds: bool,
    pub dry_run: bool,
}

impl ImportArgs {
    pub fn options(&self) -> Result<ImportOptions> {
        Ok(ImportOptions {
            dry_run: self.dry_run,
            mirror_remote: self.mirror,
            offset: self.offset,
            limit: self.limit,
            merchant_filter: self.merchant.clone(),
            start_date: self.from.as_deref().map(|d| parse_date(d, "--from")).transpose()?,
            end_date: self.to.as_deref().map(|d| parse_date(d, "--to")).transpose()?,
            skip_refunds: self.no_refunds,
        })
    }
}

pub async fn cmd_import(
    db: &Database,
    engine: &CategoryEngine,
    remote: Option<&ExpenseClient>,
    file: &Path,
    args: &ImportArgs,
) -> Result<()> {
    let convention: AmountConvention = args
        .convention
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    let options = args.options()?;

    if options.mirror_remote && remote.is_none() {
        anyhow::bail!("--mirror needs a remote expense service (set SETTLE_REMOTE_URL)");
    }

    if args.dry_run {
        println!("📥 Importing {} (dry run)...", file.display());
    } else {
        println!("📥 Importing {}...", file.display());
    }

    let importer = StatementImporter::new(db, engine, remote);
    let report = importer
        .import_file(file, convention, &options)
        .await
        .with_context(|| format!("Failed to import {}", file.display()))?;

    print_import_report(&report);
    Ok(())
}

fn print_import_report(report: &ImportReport) {
    for row in &report.rows {
        let marker = match &row.outcome {
            RowOutcome::Added { .. } => "+",
            RowOutcome::WouldAdd => "~",
            RowOutcome::Cached { .. } | RowOutcome::RemoteExists { .. } => "=",
            RowOutcome::Error { .. } => "!",
            RowOutcome::Filtered { .. } => "-",
        };
        let date = row
            .date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "??????????".to_string());
        let sign = if row.is_refund { "-" } else { " " };
        let detail = match &row.outcome {
            RowOutcome::Error { message } => message.clone(),
            RowOutcome::Cached { id } => format!("exists_in_ledger ({})", id),
            RowOutcome::RemoteExists { external_id } => format!("exists_remote ({})", external_id),
            RowOutcome::Filtered { reason } => format!("filtered ({:?})", reason),
            _ => row.category.clone().unwrap_or_default(),
        };
        println!(
            "   {} L{:<4} {} {:<28} {}{:>9.2}  {}",
            marker,
            row.line,
            date,
            truncate(&row.merchant, 28),
            sign,
            row.amount,
            detail
        );
    }

    println!();
    println!("✅ Import complete!");
    println!("   Attempted: {}", report.attempted);
    if report.would_add > 0 {
        println!("   Would add: {}", report.would_add);
    } else {
        println!("   Added: {}", report.added);
    }
    println!("   Skipped (duplicates): {}", report.skipped());
    if report.filtered > 0 {
        println!("   Filtered (payments, fees): {}", report.filtered);
    }
    if report.errors > 0 {
        println!("   ❌ Failed: {}", report.errors);
    }
    if report.mirrored > 0 || report.mirror_failed > 0 {
        println!(
            "   Mirrored remotely: {} ({} failed, retry with 'settle push')",
            report.mirrored, report.mirror_failed
        );
    }

    if let Some(refunds) = &report.refunds {
        println!();
        println!("💸 Refunds");
        println!("   Created: {}", refunds.created);
        if refunds.would_create > 0 {
            println!("   Would create: {}", refunds.would_create);
        }
        println!("   Duplicate: {}", refunds.duplicate);
        println!("   Unmatched: {}", refunds.unmatched);
        println!("   Manual review: {}", refunds.manual_review);
        if refunds.errors > 0 {
            println!("   ❌ Errors: {}", refunds.errors);
        }
    }
}

pub async fn cmd_push(
    db: &Database,
    engine: &CategoryEngine,
    remote: &ExpenseClient,
    dry_run: bool,
) -> Result<()> {
    let importer = StatementImporter::new(db, engine, Some(remote));
    let report = importer.push_unmirrored(dry_run).await?;

    if report.dry_run {
        println!("🔎 {} purchases would be pushed", report.candidates);
        return Ok(());
    }

    println!("📤 Push complete");
    println!("   Candidates: {}", report.candidates);
    println!("   Created: {}", report.created);
    println!("   Already remote: {}", report.already_remote);
    if report.errors > 0 {
        println!("   ❌ Failed: {}", report.errors);
    }
    Ok(())
}
