//! Merchant review loop
//!
//! `export_review` writes one row per ledger merchant with the category the
//! engine infers for it, where the inference came from and how confident it
//! is. The operator approves or corrects rows in the tab; `apply_review` then
//! folds the reviewed rows into the merchant lookup table of a TOML category
//! config, so later imports resolve those merchants at the lookup tier.
//!
//! Reviewed rows move to a `<tab> Done` tab; unreviewed rows stay put.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info};

use crate::categorize::{CategoryEngine, CategoryInput};
use crate::config::{load_config, save_merchant_entries, CategoryConfig, MerchantEntry};
use crate::db::Database;
use crate::error::Result;
use crate::merchant::merchant_key;
use crate::sheets::{SheetRecord, SpreadsheetService, WriteMode};

/// Column headers of the review tab, in sheet order
pub const REVIEW_COLUMNS: &[&str] = &[
    "Merchant",
    "Description",
    "Date",
    "Amount",
    "Category",
    "Subcategory",
    "Matched In",
    "Confidence",
    "Approved",
    "Corrected Category",
    "Corrected Subcategory",
];

/// Confidence stored for entries an operator has reviewed
pub const REVIEWED_CONFIDENCE: f64 = 1.0;

/// Options for writing a review tab
#[derive(Debug, Clone)]
pub struct ReviewOptions {
    pub sheet: String,
    pub tab: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Also list merchants already in the lookup table
    pub include_known: bool,
    pub dry_run: bool,
}

/// Result of writing a review tab
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReviewExport {
    pub merchants: usize,
    pub already_known: usize,
    pub written: usize,
    pub dry_run: bool,
}

/// Write the merchant review tab
pub fn export_review(
    db: &Database,
    engine: &CategoryEngine,
    sheets: &dyn SpreadsheetService,
    options: &ReviewOptions,
) -> Result<ReviewExport> {
    let latest = db.latest_purchase_per_merchant(options.start_date, options.end_date)?;
    let mut summary = ReviewExport {
        merchants: latest.len(),
        dry_run: options.dry_run,
        ..Default::default()
    };

    let mut records = Vec::new();
    for txn in &latest {
        if engine.knows_merchant(&txn.merchant) {
            summary.already_known += 1;
            if !options.include_known {
                continue;
            }
        }

        let description = txn.raw_description.as_deref().unwrap_or(&txn.merchant);
        let inferred = engine.infer(&CategoryInput {
            merchant: Some(&txn.merchant),
            description,
            amount: txn.amount,
            source_category: None,
        });

        let mut record = SheetRecord::new();
        record.insert("Merchant".into(), txn.merchant.clone());
        record.insert("Description".into(), description.to_string());
        record.insert("Date".into(), txn.date.to_string());
        record.insert("Amount".into(), format!("{:.2}", txn.amount));
        record.insert("Category".into(), inferred.category_name.clone());
        record.insert(
            "Subcategory".into(),
            inferred.subcategory_name.clone().unwrap_or_default(),
        );
        record.insert("Matched In".into(), inferred.matched_in.to_string());
        record.insert("Confidence".into(), inferred.confidence.clone());
        records.push(record);
    }

    summary.written = records.len();
    if !options.dry_run {
        sheets.write_rows(
            &options.sheet,
            &options.tab,
            REVIEW_COLUMNS,
            &records,
            WriteMode::Overwrite,
        )?;
    }

    info!(
        merchants = summary.merchants,
        already_known = summary.already_known,
        written = summary.written,
        "Merchant review tab ready"
    );
    Ok(summary)
}

/// How a reviewed row changed the lookup table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Added,
    Updated,
    Unchanged,
}

/// One reviewed merchant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MerchantChange {
    pub merchant: String,
    pub action: ReviewAction,
    pub old_path: Option<String>,
    pub new_path: String,
}

/// Result of applying a reviewed tab
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReviewApplyReport {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Rows neither approved nor corrected
    pub pending: usize,
    pub changes: Vec<MerchantChange>,
    pub dry_run: bool,
}

fn is_approved(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "y" | "yes" | "x" | "true" | "1" | "ok"
    )
}

fn cell<'r>(record: &'r SheetRecord, name: &str) -> Option<&'r str> {
    record
        .get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

/// Lookup entry a reviewed row asks for, if the row was reviewed
fn reviewed_entry(record: &SheetRecord) -> Option<(MerchantEntry, bool)> {
    if let Some(category) = cell(record, "Corrected Category") {
        let entry = MerchantEntry {
            category: category.to_string(),
            subcategory: cell(record, "Corrected Subcategory").map(str::to_string),
            confidence: REVIEWED_CONFIDENCE,
        };
        return Some((entry, true));
    }

    if cell(record, "Approved").is_some_and(is_approved) {
        let entry = MerchantEntry {
            category: cell(record, "Category")?.to_string(),
            subcategory: cell(record, "Subcategory").map(str::to_string),
            confidence: REVIEWED_CONFIDENCE,
        };
        return Some((entry, false));
    }

    None
}

/// Apply a reviewed tab to the merchant lookup of the config at `config_path`
///
/// Corrected rows insert or replace their merchant's entry. Approved rows add
/// an entry only for merchants the table does not have yet.
pub fn apply_review(
    sheets: &dyn SpreadsheetService,
    sheet: &str,
    tab: &str,
    config_path: &Path,
    dry_run: bool,
) -> Result<ReviewApplyReport> {
    let current = if config_path.exists() {
        load_config(Some(config_path))?
    } else {
        CategoryConfig::embedded()?
    };

    let rows = sheets.read_rows(sheet, tab)?;
    let mut report = ReviewApplyReport {
        dry_run,
        ..Default::default()
    };
    let mut updates: BTreeMap<String, MerchantEntry> = BTreeMap::new();
    let mut done = Vec::new();
    let mut remaining = Vec::new();

    for record in rows {
        let Some(merchant) = cell(&record, "Merchant").map(str::to_string) else {
            remaining.push(record);
            report.pending += 1;
            continue;
        };
        let Some((entry, corrected)) = reviewed_entry(&record) else {
            remaining.push(record);
            report.pending += 1;
            continue;
        };

        let key = merchant_key(&merchant);
        let existing = updates.get(&key).or_else(|| current.merchants.get(&key));
        let old_path = existing.map(MerchantEntry::path);
        let action = match existing {
            None => ReviewAction::Added,
            Some(old) if corrected && *old != entry => ReviewAction::Updated,
            Some(_) => ReviewAction::Unchanged,
        };
        debug!(merchant = %merchant, ?action, "Reviewed merchant");

        match action {
            ReviewAction::Added => report.added += 1,
            ReviewAction::Updated => report.updated += 1,
            ReviewAction::Unchanged => report.unchanged += 1,
        }
        report.changes.push(MerchantChange {
            merchant,
            action,
            old_path,
            new_path: entry.path(),
        });
        if action != ReviewAction::Unchanged {
            updates.insert(key, entry);
        }
        done.push(record);
    }

    if !dry_run {
        if !updates.is_empty() {
            save_merchant_entries(config_path, &updates)?;
        }
        if !done.is_empty() {
            sheets.write_rows(
                sheet,
                &format!("{} Done", tab),
                REVIEW_COLUMNS,
                &done,
                WriteMode::Append,
            )?;
            sheets.write_rows(sheet, tab, REVIEW_COLUMNS, &remaining, WriteMode::Overwrite)?;
        }
    }

    info!(
        added = report.added,
        updated = report.updated,
        unchanged = report.unchanged,
        pending = report.pending,
        dry_run,
        "Merchant review applied"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categorize::MatchSource;
    use crate::models::{NewTransaction, TransactionSource};
    use crate::sheets::CsvWorkbook;
    use tempfile::TempDir;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn seeded_ledger() -> Database {
        let db = Database::in_memory().unwrap();
        db.insert_transactions(&[
            NewTransaction::new(d(2025, 1, 15), "Trader Joes", 45.20, TransactionSource::Statement),
            NewTransaction::new(d(2025, 1, 20), "Trader Joes", 30.00, TransactionSource::Statement),
            NewTransaction::new(d(2025, 1, 18), "Corner Cafe", 12.50, TransactionSource::Statement),
            NewTransaction::new(d(2025, 1, 19), "Starbucks", 6.75, TransactionSource::Statement),
            NewTransaction::new(d(2024, 6, 1), "Old Hardware", 9.00, TransactionSource::Statement),
        ])
        .unwrap();
        db
    }

    fn options(include_known: bool) -> ReviewOptions {
        ReviewOptions {
            sheet: "Review".to_string(),
            tab: "Merchants".to_string(),
            start_date: Some(d(2025, 1, 1)),
            end_date: None,
            include_known,
            dry_run: false,
        }
    }

    #[test]
    fn test_export_review() {
        let db = seeded_ledger();
        let engine = CategoryEngine::new(CategoryConfig::embedded().unwrap());
        let dir = TempDir::new().unwrap();
        let workbook = CsvWorkbook::new(dir.path()).unwrap();

        let summary = export_review(&db, &engine, &workbook, &options(false)).unwrap();
        assert_eq!(summary.merchants, 3);
        assert_eq!(summary.already_known, 1);
        assert_eq!(summary.written, 2);

        let rows = workbook.read_rows("Review", "Merchants").unwrap();
        let tj = rows.iter().find(|r| r["Merchant"] == "Trader Joes").unwrap();
        // Latest purchase of the merchant
        assert_eq!(tj["Amount"], "30.00");
        assert_eq!(tj["Subcategory"], "Groceries");
        assert_eq!(tj["Matched In"], MatchSource::Description.as_str());
        assert_eq!(tj["Confidence"], "high");
        assert_eq!(tj["Approved"], "");

        let all = export_review(&db, &engine, &workbook, &options(true)).unwrap();
        assert_eq!(all.written, 3);
        let rows = workbook.read_rows("Review", "Merchants").unwrap();
        let starbucks = rows.iter().find(|r| r["Merchant"] == "Starbucks").unwrap();
        assert_eq!(starbucks["Matched In"], "merchant_lookup");
    }

    #[test]
    fn test_apply_review_updates_lookup() {
        let db = seeded_ledger();
        let engine = CategoryEngine::new(CategoryConfig::embedded().unwrap());
        let dir = TempDir::new().unwrap();
        let workbook = CsvWorkbook::new(dir.path().join("book")).unwrap();
        let config_path = dir.path().join("categories.toml");

        export_review(&db, &engine, &workbook, &options(true)).unwrap();
        let mut rows = workbook.read_rows("Review", "Merchants").unwrap();
        for row in rows.iter_mut() {
            match row["Merchant"].as_str() {
                "Trader Joes" => {
                    row.insert("Approved".into(), "yes".into());
                }
                "Corner Cafe" => {
                    row.insert("Corrected Category".into(), "Food and drink".into());
                    row.insert("Corrected Subcategory".into(), "Dining out".into());
                }
                "Starbucks" => {
                    row.insert("Approved".into(), "x".into());
                }
                _ => {}
            }
        }
        workbook
            .write_rows("Review", "Merchants", REVIEW_COLUMNS, &rows, WriteMode::Overwrite)
            .unwrap();

        let preview = apply_review(&workbook, "Review", "Merchants", &config_path, true).unwrap();
        assert_eq!(preview.added, 2);
        assert!(!config_path.exists());

        let report = apply_review(&workbook, "Review", "Merchants", &config_path, false).unwrap();
        assert_eq!(report.added, 2);
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.pending, 0);

        let config = load_config(Some(&config_path)).unwrap();
        let tj = config.merchants.get("trader joes").unwrap();
        assert_eq!(tj.path(), "Food and drink > Groceries");
        assert_eq!(tj.confidence, REVIEWED_CONFIDENCE);
        assert!(config.merchants.contains_key("corner cafe"));
        // Existing entries and other tables survive
        assert!(config.merchants.contains_key("amazon"));
        assert!(!config.patterns.is_empty());

        // Reviewed merchants now resolve at the lookup tier
        let reloaded = CategoryEngine::new(config);
        let found = reloaded.infer(&CategoryInput {
            merchant: Some("Corner Cafe"),
            description: "CORNER CAFE",
            amount: 12.5,
            source_category: None,
        });
        assert_eq!(found.matched_in, MatchSource::MerchantLookup);
        assert_eq!(found.subcategory_name.as_deref(), Some("Dining out"));
        assert_eq!(found.confidence, "high_1.00");

        assert!(workbook.read_rows("Review", "Merchants").unwrap().is_empty());
        assert_eq!(workbook.read_rows("Review", "Merchants Done").unwrap().len(), 3);
    }

    #[test]
    fn test_correction_replaces_entry_and_pending_rows_stay() {
        let dir = TempDir::new().unwrap();
        let workbook = CsvWorkbook::new(dir.path().join("book")).unwrap();
        let config_path = dir.path().join("categories.toml");

        let row = |merchant: &str, corrected: &str| -> SheetRecord {
            let mut record = SheetRecord::new();
            record.insert("Merchant".into(), merchant.into());
            record.insert("Category".into(), "Home".into());
            record.insert("Corrected Category".into(), corrected.into());
            record
        };
        workbook
            .write_rows(
                "Review",
                "Merchants",
                REVIEW_COLUMNS,
                &[row("Amazon", "Entertainment"), row("Mystery Shop", "")],
                WriteMode::Overwrite,
            )
            .unwrap();

        let report = apply_review(&workbook, "Review", "Merchants", &config_path, false).unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.pending, 1);
        assert_eq!(report.changes[0].old_path.as_deref(), Some("Home > Household supplies"));
        assert_eq!(report.changes[0].new_path, "Entertainment");

        let config = load_config(Some(&config_path)).unwrap();
        assert_eq!(config.merchants["amazon"].category, "Entertainment");
        assert_eq!(config.merchants["amazon"].subcategory, None);

        let left = workbook.read_rows("Review", "Merchants").unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0]["Merchant"], "Mystery Shop");
    }
}
