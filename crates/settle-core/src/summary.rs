//! Monthly spending summaries
//!
//! Net spend is the user's owed share with refunds subtracted. Summaries are
//! cached in `monthly_summaries` and can be written to a `Summary` tab.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::export::PersonalShare;
use crate::models::{MonthlySummary, Transaction};
use crate::remote::round_cents;
use crate::sheets::{SheetRecord, SpreadsheetService, WriteMode};

/// Tab the summaries are written to
pub const SUMMARY_TAB: &str = "Summary";

pub const SUMMARY_COLUMNS: &[&str] = &[
    "Month",
    "Total Spent (Net)",
    "Avg Transaction",
    "Transaction Count",
    "Total Paid",
    "Total Owed",
    "Cumulative Spending",
    "MoM Change",
];

#[derive(Default)]
struct MonthTotals {
    net: f64,
    paid: f64,
    owed: f64,
    count: i64,
}

/// Build per-month summaries from transactions, oldest month first
pub fn summarize(transactions: &[Transaction]) -> Vec<MonthlySummary> {
    let mut months: BTreeMap<String, MonthTotals> = BTreeMap::new();
    for txn in transactions.iter().filter(|t| t.is_active()) {
        let share = PersonalShare::for_transaction(txn);
        let totals = months
            .entry(txn.date.format("%Y-%m").to_string())
            .or_default();
        totals.net += share.owed;
        totals.paid += share.paid;
        totals.owed += share.owed;
        totals.count += 1;
    }

    let mut cumulative = 0.0;
    let mut previous: Option<f64> = None;
    let mut summaries = Vec::with_capacity(months.len());

    for (year_month, totals) in months {
        cumulative += totals.net;
        let mom_change = match previous {
            Some(prev) if prev != 0.0 => (totals.net - prev) / prev * 100.0,
            _ => 0.0,
        };
        previous = Some(totals.net);

        summaries.push(MonthlySummary {
            year_month,
            total_spent_net: round_cents(totals.net),
            avg_transaction: round_cents(totals.net / totals.count as f64),
            transaction_count: totals.count,
            total_paid: round_cents(totals.paid),
            total_owed: round_cents(totals.owed),
            cumulative_spending: round_cents(cumulative),
            mom_change: round_cents(mom_change),
        });
    }
    summaries
}

/// Result of a summary run
#[derive(Debug, Clone, Serialize)]
pub struct SummaryReport {
    pub year: i32,
    pub months: Vec<MonthlySummary>,
    pub written_to_sheet: bool,
}

/// Compute and cache summaries for a year, optionally writing the Summary tab
pub fn generate_year_summary(
    db: &Database,
    year: i32,
    sheet: Option<(&dyn SpreadsheetService, &str)>,
    dry_run: bool,
) -> Result<SummaryReport> {
    let start = NaiveDate::from_ymd_opt(year, 1, 1)
        .ok_or_else(|| Error::InvalidData(format!("Invalid year: {}", year)))?;
    let end = NaiveDate::from_ymd_opt(year, 12, 31)
        .ok_or_else(|| Error::InvalidData(format!("Invalid year: {}", year)))?;

    let months = summarize(&db.find_in_date_range(start, end, false)?);
    if dry_run {
        return Ok(SummaryReport {
            year,
            months,
            written_to_sheet: false,
        });
    }

    for month in &months {
        db.upsert_monthly_summary(month)?;
    }

    let mut written = false;
    if let Some((service, sheet_name)) = sheet {
        let records: Vec<SheetRecord> = months.iter().map(summary_record).collect();
        service.write_rows(
            sheet_name,
            SUMMARY_TAB,
            SUMMARY_COLUMNS,
            &records,
            WriteMode::Overwrite,
        )?;
        let keys: Vec<String> = months.iter().map(|m| m.year_month.clone()).collect();
        db.mark_summaries_written(&keys)?;
        written = true;
    }

    info!(year, months = months.len(), written, "Generated monthly summaries");
    Ok(SummaryReport {
        year,
        months,
        written_to_sheet: written,
    })
}

fn summary_record(summary: &MonthlySummary) -> SheetRecord {
    let mut record = SheetRecord::new();
    record.insert("Month".into(), summary.year_month.clone());
    record.insert(
        "Total Spent (Net)".into(),
        format!("{:.2}", summary.total_spent_net),
    );
    record.insert(
        "Avg Transaction".into(),
        format!("{:.2}", summary.avg_transaction),
    );
    record.insert(
        "Transaction Count".into(),
        summary.transaction_count.to_string(),
    );
    record.insert("Total Paid".into(), format!("{:.2}", summary.total_paid));
    record.insert("Total Owed".into(), format!("{:.2}", summary.total_owed));
    record.insert(
        "Cumulative Spending".into(),
        format!("{:.2}", summary.cumulative_spending),
    );
    record.insert("MoM Change".into(), format!("{:.2}", summary.mom_change));
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewTransaction, TransactionSource};
    use crate::sheets::CsvWorkbook;
    use tempfile::TempDir;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn seed(db: &Database) {
        let rows = [
            NewTransaction::new(d(2025, 1, 3), "A", 100.0, TransactionSource::Statement),
            NewTransaction::new(d(2025, 1, 20), "B", 50.0, TransactionSource::Statement),
            NewTransaction::new(d(2025, 1, 25), "A", -30.0, TransactionSource::Statement).refund(),
            NewTransaction::new(d(2025, 2, 2), "C", 240.0, TransactionSource::Statement),
        ];
        db.insert_transactions(&rows).unwrap();
    }

    #[test]
    fn test_summarize_nets_refunds() {
        let db = Database::in_memory().unwrap();
        seed(&db);
        let txns = db
            .find_in_date_range(d(2025, 1, 1), d(2025, 12, 31), false)
            .unwrap();
        let months = summarize(&txns);

        assert_eq!(months.len(), 2);
        assert_eq!(months[0].year_month, "2025-01");
        assert_eq!(months[0].total_spent_net, 120.0);
        assert_eq!(months[0].transaction_count, 3);
        assert_eq!(months[0].avg_transaction, 40.0);
        assert_eq!(months[0].mom_change, 0.0);

        assert_eq!(months[1].cumulative_spending, 360.0);
        assert_eq!(months[1].mom_change, 100.0);
    }

    #[test]
    fn test_generate_caches_and_writes_tab() {
        let db = Database::in_memory().unwrap();
        seed(&db);
        let dir = TempDir::new().unwrap();
        let workbook = CsvWorkbook::new(dir.path()).unwrap();

        let service: &dyn SpreadsheetService = &workbook;
        let report = generate_year_summary(&db, 2025, Some((service, "Expenses")), false).unwrap();
        assert!(report.written_to_sheet);
        assert_eq!(db.monthly_summaries(Some("2025")).unwrap().len(), 2);

        let rows = workbook.read_rows("Expenses", SUMMARY_TAB).unwrap();
        assert_eq!(rows[1]["Month"], "2025-02");
        assert_eq!(rows[1]["Total Spent (Net)"], "240.00");
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let db = Database::in_memory().unwrap();
        seed(&db);
        let report = generate_year_summary(&db, 2025, None, true).unwrap();
        assert_eq!(report.months.len(), 2);
        assert!(db.monthly_summaries(None).unwrap().is_empty());
    }
}
