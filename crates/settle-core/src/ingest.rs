//! Spreadsheet and manual ingestion
//!
//! Rows kept in a spreadsheet tab (typically one written by `export`) can be
//! loaded back into the ledger, and single transactions can be entered by hand.
//! Both paths go through the same duplicate filter and category engine as
//! statement rows and leave an `import_log` entry.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::categorize::{CategoryEngine, CategoryInput};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::merchant::clean_merchant_name;
use crate::models::{ImportSourceType, NewImportLog, NewTransaction, TransactionSource};
use crate::reconcile::{Classification, DuplicateFilter, RowKey};
use crate::sheets::{SheetRecord, SpreadsheetService};
use crate::statement::{extract_reference_id, parse_amount, parse_date};

/// Note stored on rows loaded from a spreadsheet
pub const SHEET_NOTE: &str = "Imported from spreadsheet";

/// What happened to one spreadsheet row
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SheetRowOutcome {
    Added { id: i64 },
    WouldAdd,
    Duplicate { existing_id: i64 },
    /// No date or a zero amount
    Skipped { reason: String },
    Failed { message: String },
}

/// Per-row report line (rows are numbered from 1, header excluded)
#[derive(Debug, Clone, Serialize)]
pub struct SheetRowResult {
    pub row: usize,
    pub merchant: String,
    pub amount: f64,
    #[serde(flatten)]
    pub outcome: SheetRowOutcome,
}

/// Result of loading one spreadsheet tab
#[derive(Debug, Clone, Default, Serialize)]
pub struct SheetImportReport {
    pub attempted: usize,
    pub imported: usize,
    pub skipped: usize,
    pub failed: usize,
    pub dry_run: bool,
    pub rows: Vec<SheetRowResult>,
    pub import_log_id: Option<i64>,
}

/// First non-empty value among alternative column names
fn field<'r>(record: &'r SheetRecord, names: &[&str]) -> Option<&'r str> {
    names
        .iter()
        .filter_map(|name| record.get(*name))
        .map(|value| value.trim())
        .find(|value| !value.is_empty())
}

/// Map a spreadsheet row to a new ledger transaction
///
/// `Ok(None)` means the row carries no date or a zero amount and is skipped.
/// Rows without a category are categorized by the engine.
pub fn parse_sheet_row(record: &SheetRecord, engine: &CategoryEngine) -> Result<Option<NewTransaction>> {
    let Some(date) = field(record, &["Date", "date"]) else {
        return Ok(None);
    };
    let date = parse_date(date)?;

    let amount = parse_amount(field(record, &["Amount", "amount", "Cost", "cost"]).unwrap_or("0"))?;
    if amount == 0.0 {
        return Ok(None);
    }

    let description = field(record, &["Merchant", "merchant", "Description", "description"])
        .ok_or_else(|| Error::InvalidData("row has no merchant or description".into()))?;
    let merchant = clean_merchant_name(description);

    let mut txn = NewTransaction::new(date, &merchant, amount, TransactionSource::Sheets)
        .with_description(field(record, &["Description", "description"]).unwrap_or(description));
    txn.raw_description = Some(description.to_string());
    if amount < 0.0 {
        txn = txn.refund();
    }

    // Export writes either a reference id or the raw statement text here
    if let Some(details) = field(record, &["Details", "details", "Reference"]) {
        if !details.contains(char::is_whitespace) {
            txn.cc_reference_id = extract_reference_id(details);
        }
    }

    if let Some(external_id) = field(record, &["External ID", "Expense ID", "expense_id"]) {
        txn.external_id = Some(external_id.to_string());
        txn.is_shared = true;
    }
    if let Some(currency) = field(record, &["Currency", "currency"]) {
        txn.currency = currency.to_uppercase();
    }
    txn.notes = Some(match field(record, &["Notes", "notes"]) {
        Some(notes) => format!("{}. Original notes: {}", SHEET_NOTE, notes),
        None => SHEET_NOTE.to_string(),
    });

    match field(record, &["Category", "category"]).filter(|c| *c != "Uncategorized") {
        Some(category) => {
            let (category, subcategory) = match category.split_once(" > ") {
                Some((c, s)) => (c.trim(), Some(s.trim())),
                None => (category, None),
            };
            txn.category = Some(category.to_string());
            txn.subcategory = field(record, &["Subcategory", "subcategory"])
                .or(subcategory)
                .map(str::to_string);
        }
        None => {
            let matched = engine.infer(&CategoryInput {
                merchant: Some(&merchant),
                description,
                amount: txn.amount,
                source_category: None,
            });
            matched.apply_to(&mut txn);
        }
    }

    Ok(Some(txn))
}

/// Loads spreadsheet tabs into the ledger
pub struct SheetImporter<'a> {
    db: &'a Database,
    engine: &'a CategoryEngine,
    sheets: &'a dyn SpreadsheetService,
}

impl<'a> SheetImporter<'a> {
    pub fn new(db: &'a Database, engine: &'a CategoryEngine, sheets: &'a dyn SpreadsheetService) -> Self {
        Self { db, engine, sheets }
    }

    /// Import every row of a tab
    ///
    /// Inserted rows are flagged as already written to the sheet for their year.
    pub async fn import_tab(&self, sheet: &str, tab: &str, dry_run: bool) -> Result<SheetImportReport> {
        let records = self.sheets.read_rows(sheet, tab)?;
        info!(sheet, tab, rows = records.len(), dry_run, "Importing spreadsheet tab");

        let filter = DuplicateFilter::new(self.db, None);
        let mut report = SheetImportReport {
            attempted: records.len(),
            dry_run,
            ..Default::default()
        };

        for (idx, record) in records.iter().enumerate() {
            let row = idx + 1;
            let txn = match parse_sheet_row(record, self.engine) {
                Ok(Some(txn)) => txn,
                Ok(None) => {
                    report.skipped += 1;
                    report.rows.push(SheetRowResult {
                        row,
                        merchant: String::new(),
                        amount: 0.0,
                        outcome: SheetRowOutcome::Skipped {
                            reason: "missing date or zero amount".to_string(),
                        },
                    });
                    continue;
                }
                Err(e) => {
                    warn!(row, error = %e, "Unreadable spreadsheet row");
                    report.failed += 1;
                    report.rows.push(SheetRowResult {
                        row,
                        merchant: String::new(),
                        amount: 0.0,
                        outcome: SheetRowOutcome::Failed {
                            message: e.to_string(),
                        },
                    });
                    continue;
                }
            };

            let outcome = match filter.classify(&RowKey::from(&txn)).await? {
                Classification::ExistsInLedger(existing_id) => {
                    report.skipped += 1;
                    SheetRowOutcome::Duplicate { existing_id }
                }
                // Remote checks are off for this filter
                Classification::ExistsRemote(_) | Classification::New if dry_run => {
                    report.imported += 1;
                    SheetRowOutcome::WouldAdd
                }
                Classification::ExistsRemote(_) | Classification::New => {
                    let id = self.db.insert_transaction(&txn)?;
                    self.db.mark_written_to_sheet(&[id], txn.date.year())?;
                    report.imported += 1;
                    SheetRowOutcome::Added { id }
                }
            };

            debug!(row, merchant = %txn.merchant, ?outcome, "Processed spreadsheet row");
            report.rows.push(SheetRowResult {
                row,
                merchant: txn.merchant.clone(),
                amount: txn.amount,
                outcome,
            });
        }

        if !dry_run {
            let log = NewImportLog {
                source_type: ImportSourceType::Sheets,
                source_identifier: Some(format!("{}/{}", sheet, tab)),
                records_attempted: report.attempted as i64,
                records_imported: report.imported as i64,
                records_skipped: report.skipped as i64,
                records_failed: report.failed as i64,
                error_message: None,
                metadata: Some(json!({ "backend": self.sheets.name() })),
            };
            report.import_log_id = Some(self.db.insert_import_log(&log)?);
        }

        info!(
            imported = report.imported,
            skipped = report.skipped,
            failed = report.failed,
            "Spreadsheet import complete"
        );
        Ok(report)
    }
}

/// A transaction entered by hand
#[derive(Debug, Clone)]
pub struct ManualEntry {
    pub date: NaiveDate,
    pub merchant: String,
    /// Negative for a refund
    pub amount: f64,
    pub description: Option<String>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub shared: bool,
}

/// Result of a manual entry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ManualOutcome {
    Added { id: i64, category: String },
    WouldAdd { category: String },
    Duplicate { existing_id: i64 },
}

/// Add one transaction by hand
///
/// The merchant is cleaned and categorized like a statement row. A refund
/// starts `pending` and is picked up by the next refund run.
pub async fn add_manual(
    db: &Database,
    engine: &CategoryEngine,
    entry: &ManualEntry,
    dry_run: bool,
) -> Result<ManualOutcome> {
    if entry.amount == 0.0 || !entry.amount.is_finite() {
        return Err(Error::InvalidData(format!("Invalid amount: {}", entry.amount)));
    }
    let raw = entry.merchant.trim();
    if raw.is_empty() {
        return Err(Error::InvalidData("Merchant is required".into()));
    }

    let merchant = clean_merchant_name(raw);
    let mut txn = NewTransaction::new(entry.date, &merchant, entry.amount, TransactionSource::Manual);
    txn.raw_description = Some(raw.to_string());
    txn.description = entry.description.clone();
    txn.cc_reference_id = entry.reference.as_deref().and_then(extract_reference_id);
    txn.notes = entry.notes.clone();
    txn.is_shared = entry.shared;
    if entry.amount < 0.0 {
        txn = txn.refund();
    }

    let matched = engine.infer(&CategoryInput {
        merchant: Some(&merchant),
        description: entry.description.as_deref().unwrap_or(raw),
        amount: txn.amount,
        source_category: None,
    });
    matched.apply_to(&mut txn);
    let category = matched.path();

    if let Classification::ExistsInLedger(existing_id) =
        DuplicateFilter::new(db, None).classify(&RowKey::from(&txn)).await?
    {
        info!(existing_id, merchant = %merchant, "Manual entry already in ledger");
        return Ok(ManualOutcome::Duplicate { existing_id });
    }

    if dry_run {
        return Ok(ManualOutcome::WouldAdd { category });
    }

    let id = db.insert_transaction(&txn)?;
    db.insert_import_log(&NewImportLog {
        source_type: ImportSourceType::Manual,
        source_identifier: Some(merchant.clone()),
        records_attempted: 1,
        records_imported: 1,
        records_skipped: 0,
        records_failed: 0,
        error_message: None,
        metadata: Some(json!({ "transaction_id": id, "is_refund": txn.is_refund })),
    })?;
    info!(id, merchant = %merchant, category = %category, "Added manual transaction");

    Ok(ManualOutcome::Added { id, category })
}
