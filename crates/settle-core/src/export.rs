//! Ledger to spreadsheet export
//!
//! One tab per year. Incremental runs append the rows not yet written and
//! flag them; a full run rewrites the tab from every active row of the year.

use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::Transaction;
use crate::remote::round_cents;
use crate::sheets::{SheetRecord, SpreadsheetService, WriteMode};

/// Column headers, in sheet order
pub const EXPORT_COLUMNS: &[&str] = &[
    "Date",
    "Amount",
    "Category",
    "Description",
    "Details",
    "My Paid",
    "My Owed",
    "My Net",
    "External ID",
];

/// The user's side of a transaction, signed (refunds negative)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PersonalShare {
    pub paid: f64,
    pub owed: f64,
    pub net: f64,
}

impl PersonalShare {
    /// The user paid the full amount and owes all of it, or half when shared
    pub fn for_transaction(txn: &Transaction) -> Self {
        let amount = txn.signed_amount();
        let owed = if txn.is_shared {
            round_cents(amount / 2.0)
        } else {
            amount
        };
        Self {
            paid: amount,
            owed,
            net: round_cents(amount - owed),
        }
    }
}

/// Options for a sheet export run
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub sheet: String,
    pub year: i32,
    /// Rewrite the whole tab instead of appending unwritten rows
    pub full: bool,
    pub dry_run: bool,
}

/// Result of an export run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportSummary {
    pub tab: String,
    pub rows: usize,
    pub marked_written: usize,
    pub dry_run: bool,
}

/// Map a ledger row to a sheet record
pub fn transaction_record(txn: &Transaction) -> SheetRecord {
    let share = PersonalShare::for_transaction(txn);
    let category = match (&txn.category, &txn.subcategory) {
        (Some(c), Some(s)) => format!("{} > {}", c, s),
        (Some(c), None) => c.clone(),
        _ => "Uncategorized".to_string(),
    };
    let details = txn
        .cc_reference_id
        .clone()
        .or_else(|| txn.raw_description.clone())
        .unwrap_or_default();

    let mut record = SheetRecord::new();
    record.insert("Date".into(), txn.date.to_string());
    record.insert("Amount".into(), format!("{:.2}", txn.signed_amount()));
    record.insert("Category".into(), category);
    record.insert(
        "Description".into(),
        txn.description.clone().unwrap_or_else(|| txn.merchant.clone()),
    );
    record.insert("Details".into(), details);
    record.insert("My Paid".into(), format!("{:.2}", share.paid));
    record.insert("My Owed".into(), format!("{:.2}", share.owed));
    record.insert("My Net".into(), format!("{:.2}", share.net));
    record.insert(
        "External ID".into(),
        txn.external_id.clone().unwrap_or_default(),
    );
    record
}

/// Writes ledger rows to a spreadsheet service
pub struct SheetExporter<'a> {
    db: &'a Database,
    sheets: &'a dyn SpreadsheetService,
}

impl<'a> SheetExporter<'a> {
    pub fn new(db: &'a Database, sheets: &'a dyn SpreadsheetService) -> Self {
        Self { db, sheets }
    }

    pub fn export(&self, options: &ExportOptions) -> Result<ExportSummary> {
        let tab = options.year.to_string();

        let (transactions, mode) = if options.full {
            let start = NaiveDate::from_ymd_opt(options.year, 1, 1)
                .ok_or_else(|| Error::InvalidData(format!("Invalid year: {}", options.year)))?;
            let end = NaiveDate::from_ymd_opt(options.year, 12, 31)
                .ok_or_else(|| Error::InvalidData(format!("Invalid year: {}", options.year)))?;
            (
                self.db.find_in_date_range(start, end, false)?,
                WriteMode::Overwrite,
            )
        } else {
            (self.db.unwritten_transactions(options.year)?, WriteMode::Append)
        };

        let records: Vec<SheetRecord> = transactions.iter().map(transaction_record).collect();

        if options.dry_run {
            info!(
                tab = %tab,
                rows = records.len(),
                "Dry run: would export rows"
            );
            return Ok(ExportSummary {
                tab,
                rows: records.len(),
                marked_written: 0,
                dry_run: true,
            });
        }

        let written = self
            .sheets
            .write_rows(&options.sheet, &tab, EXPORT_COLUMNS, &records, mode)?;

        let ids: Vec<i64> = transactions.iter().map(|t| t.id).collect();
        let marked = self.db.mark_written_to_sheet(&ids, options.year)?;

        info!(
            sheet = %options.sheet,
            tab = %tab,
            rows = written,
            backend = self.sheets.name(),
            "Exported transactions"
        );

        Ok(ExportSummary {
            tab,
            rows: written,
            marked_written: marked,
            dry_run: false,
        })
    }
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

    fn options(full: bool, dry_run: bool) -> ExportOptions {
        ExportOptions {
            sheet: "Expenses".to_string(),
            year: 2025,
            full,
            dry_run,
        }
    }

    #[test]
    fn test_personal_share() {
        let db = Database::in_memory().unwrap();
        let mut shared = NewTransaction::new(d(2025, 1, 5), "Dinner", 80.0, TransactionSource::Manual);
        shared.is_shared = true;
        let shared_id = db.insert_transaction(&shared).unwrap();
        let refund_id = db
            .insert_transaction(
                &NewTransaction::new(d(2025, 1, 6), "Shop", -20.0, TransactionSource::Statement)
                    .refund(),
            )
            .unwrap();

        let shared = PersonalShare::for_transaction(&db.get_transaction(shared_id).unwrap().unwrap());
        assert_eq!((shared.paid, shared.owed, shared.net), (80.0, 40.0, 40.0));

        let refund = PersonalShare::for_transaction(&db.get_transaction(refund_id).unwrap().unwrap());
        assert_eq!((refund.paid, refund.owed, refund.net), (-20.0, -20.0, 0.0));
    }

    #[test]
    fn test_incremental_export_marks_rows() {
        let dir = TempDir::new().unwrap();
        let workbook = CsvWorkbook::new(dir.path()).unwrap();
        let db = Database::in_memory().unwrap();
        db.insert_transaction(
            &NewTransaction::new(d(2025, 2, 1), "Cafe", 12.5, TransactionSource::Statement)
                .with_reference("REF12345678"),
        )
        .unwrap();
        db.insert_transaction(
            &NewTransaction::new(d(2024, 12, 31), "Old", 3.0, TransactionSource::Statement),
        )
        .unwrap();

        let exporter = SheetExporter::new(&db, &workbook);

        let dry = exporter.export(&options(false, true)).unwrap();
        assert_eq!(dry.rows, 1);
        assert!(workbook.read_rows("Expenses", "2025").unwrap().is_empty());

        let summary = exporter.export(&options(false, false)).unwrap();
        assert_eq!(summary.rows, 1);
        assert_eq!(summary.marked_written, 1);

        let rows = workbook.read_rows("Expenses", "2025").unwrap();
        assert_eq!(rows[0]["Amount"], "12.50");
        assert_eq!(rows[0]["Details"], "REF12345678");

        // Nothing left to append
        assert_eq!(exporter.export(&options(false, false)).unwrap().rows, 0);
        assert_eq!(workbook.read_rows("Expenses", "2025").unwrap().len(), 1);

        // Full export rewrites instead of duplicating
        assert_eq!(exporter.export(&options(true, false)).unwrap().rows, 1);
        assert_eq!(workbook.read_rows("Expenses", "2025").unwrap().len(), 1);
    }

    #[test]
    fn test_refund_exported_negative() {
        let db = Database::in_memory().unwrap();
        let id = db
            .insert_transaction(
                &NewTransaction::new(d(2025, 3, 1), "Shop", -9.99, TransactionSource::Statement)
                    .refund(),
            )
            .unwrap();
        let record = transaction_record(&db.get_transaction(id).unwrap().unwrap());
        assert_eq!(record["Amount"], "-9.99");
        assert_eq!(record["Category"], "Uncategorized");
    }
}
