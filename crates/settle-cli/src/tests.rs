//! CLI command tests
//!
//! This module contains all tests for the CLI commands.

use std::io::Write;

use chrono::NaiveDate;
use settle_core::db::Database;
use settle_core::models::{ImportSourceType, NewTransaction, ReconciliationStatus, TransactionSource};
use settle_core::remote::{default_purchase_shares, ExpenseService, NewExpense};
use settle_core::review::REVIEW_COLUMNS;
use settle_core::{
    CategoryConfig, CategoryEngine, CsvWorkbook, ExpenseClient, ManualEntry, MockExpenseBackend,
    SheetRecord, SpreadsheetService, WriteMode,
};
use tempfile::{NamedTempFile, TempDir};

use crate::commands::{self, truncate, ImportArgs};

const STATEMENT: &str = "Date,Description,Amount,Extended Details
01/15/2025,TRADER JOES #552,45.20,REF: TJ552000123456
01/18/2025,CORNER CAFE,12.50,REF: CAFE00001234
01/20/2025,AUTOPAY PAYMENT - THANK YOU,-500.00,
";

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn engine() -> CategoryEngine {
    CategoryEngine::new(CategoryConfig::embedded().unwrap())
}

fn statement_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

fn import_args() -> ImportArgs {
    ImportArgs {
        convention: "credits-negative".to_string(),
        ..Default::default()
    }
}

// ========== Utility Tests ==========

#[test]
fn test_truncate() {
    assert_eq!(truncate("short", 10), "short");
    assert_eq!(truncate("a longer merchant name", 10), "a longe...");
    assert_eq!(truncate("Café Ümlaut Straße", 8), "Café ...");
}

#[test]
fn test_parse_date() {
    assert_eq!(commands::parse_date("2025-03-01", "--from").unwrap(), d(2025, 3, 1));
    let err = commands::parse_date("03/01/2025", "--from").unwrap_err();
    assert!(err.to_string().contains("--from"));
}

#[test]
fn test_resolve_range() {
    let (start, end) = commands::resolve_range(Some("2025-01-01"), Some("2025-01-31")).unwrap();
    assert_eq!((start, end), (d(2025, 1, 1), d(2025, 1, 31)));

    let (start, end) = commands::resolve_range(None, Some("2025-02-28")).unwrap();
    assert_eq!(end, d(2025, 2, 28));
    assert_eq!((end - start).num_days(), commands::DEFAULT_SYNC_DAYS);

    assert!(commands::resolve_range(Some("2025-02-01"), Some("2025-01-01")).is_err());
}

#[test]
fn test_import_args_options() {
    let args = ImportArgs {
        from: Some("2025-01-16".to_string()),
        merchant: Some("cafe".to_string()),
        limit: Some(5),
        ..import_args()
    };
    let options = args.options().unwrap();
    assert_eq!(options.start_date, Some(d(2025, 1, 16)));
    assert_eq!(options.end_date, None);
    assert_eq!(options.merchant_filter.as_deref(), Some("cafe"));
    assert_eq!(options.limit, Some(5));

    let bad = ImportArgs {
        to: Some("yesterday".to_string()),
        ..import_args()
    };
    assert!(bad.options().is_err());
}

// ========== Import Command Tests ==========

#[tokio::test]
async fn test_cmd_import() {
    let db = Database::in_memory().unwrap();
    let engine = engine();
    let file = statement_file(STATEMENT);

    commands::cmd_import(&db, &engine, None, file.path(), &import_args())
        .await
        .unwrap();
    assert_eq!(db.count_transactions().unwrap(), 2);

    // Re-import is a no-op
    commands::cmd_import(&db, &engine, None, file.path(), &import_args())
        .await
        .unwrap();
    assert_eq!(db.count_transactions().unwrap(), 2);

    let history = db.import_history(None, 10).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].records_imported, 0);
}

#[tokio::test]
async fn test_cmd_import_dry_run() {
    let db = Database::in_memory().unwrap();
    let file = statement_file(STATEMENT);
    let args = ImportArgs {
        dry_run: true,
        ..import_args()
    };

    commands::cmd_import(&db, &engine(), None, file.path(), &args)
        .await
        .unwrap();
    assert_eq!(db.count_transactions().unwrap(), 0);
    assert!(db.import_history(None, 10).unwrap().is_empty());
}

#[tokio::test]
async fn test_cmd_import_rejects_mirror_without_remote() {
    let db = Database::in_memory().unwrap();
    let file = statement_file(STATEMENT);
    let args = ImportArgs {
        mirror: true,
        ..import_args()
    };

    let result = commands::cmd_import(&db, &engine(), None, file.path(), &args).await;
    assert!(result.is_err());
    assert_eq!(db.count_transactions().unwrap(), 0);
}

#[tokio::test]
async fn test_cmd_import_unknown_convention() {
    let db = Database::in_memory().unwrap();
    let file = statement_file(STATEMENT);
    let args = ImportArgs {
        convention: "sideways".to_string(),
        ..Default::default()
    };
    assert!(commands::cmd_import(&db, &engine(), None, file.path(), &args)
        .await
        .is_err());
}

#[tokio::test]
async fn test_cmd_push() {
    let db = Database::in_memory().unwrap();
    let engine = engine();
    let file = statement_file(STATEMENT);
    commands::cmd_import(&db, &engine, None, file.path(), &import_args())
        .await
        .unwrap();

    let mock = MockExpenseBackend::new();
    let client = ExpenseClient::Mock(mock.clone());

    commands::cmd_push(&db, &engine, &client, true).await.unwrap();
    assert!(mock.is_empty());

    commands::cmd_push(&db, &engine, &client, false).await.unwrap();
    assert_eq!(mock.len(), 2);
    assert!(db.unmirrored_transactions().unwrap().is_empty());
}

// ========== Refund Command Tests ==========

async fn seed_refund(db: &Database, mock: &MockExpenseBackend) -> (i64, i64) {
    let client = ExpenseClient::Mock(mock.clone());
    let external_id = client
        .create_expense(&NewExpense {
            cost: 60.0,
            description: "Gadget Shop".to_string(),
            details: "GADGET000001".to_string(),
            date: d(2025, 3, 1),
            currency_code: "USD".to_string(),
            category_id: None,
            notes: None,
            users: default_purchase_shares(60.0, 1, 2),
        })
        .await
        .unwrap();
    let original_id = db
        .insert_transaction(
            &NewTransaction::new(d(2025, 3, 1), "Gadget Shop", 60.0, TransactionSource::Statement)
                .with_external_id(&external_id),
        )
        .unwrap();
    let refund_id = db
        .insert_transaction(
            &NewTransaction::new(d(2025, 3, 8), "Gadget Shop", -60.0, TransactionSource::Statement)
                .refund(),
        )
        .unwrap();
    (original_id, refund_id)
}

#[tokio::test]
async fn test_cmd_refunds_process() {
    let db = Database::in_memory().unwrap();
    let mock = MockExpenseBackend::new();
    let (original_id, refund_id) = seed_refund(&db, &mock).await;
    let client = ExpenseClient::Mock(mock.clone());

    commands::cmd_refunds_process(&db, Some(&client), true, 90, true)
        .await
        .unwrap();
    assert_eq!(mock.len(), 1);

    commands::cmd_refunds_process(&db, Some(&client), true, 90, false)
        .await
        .unwrap();
    assert_eq!(mock.len(), 2);

    let refund = db.get_transaction(refund_id).unwrap().unwrap();
    assert_eq!(refund.reconciliation_status, Some(ReconciliationStatus::Matched));
    assert_eq!(refund.refund_for_txn_id, Some(original_id));
}

#[tokio::test]
async fn test_cmd_refunds_process_requires_remote() {
    let db = Database::in_memory().unwrap();
    let mock = MockExpenseBackend::new();
    seed_refund(&db, &mock).await;

    assert!(commands::cmd_refunds_process(&db, None, true, 90, false)
        .await
        .is_err());
    // Dry run works without a remote
    assert!(commands::cmd_refunds_process(&db, None, true, 90, true)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_cmd_refunds_reset_and_list() {
    let db = Database::in_memory().unwrap();
    let mock = MockExpenseBackend::new();
    let (original_id, refund_id) = seed_refund(&db, &mock).await;
    let client = ExpenseClient::Mock(mock);

    commands::cmd_refunds_process(&db, Some(&client), true, 90, false)
        .await
        .unwrap();
    commands::cmd_refunds_list(&db, Some("matched")).unwrap();
    commands::cmd_refunds_list(&db, None).unwrap();
    assert!(commands::cmd_refunds_list(&db, Some("lost")).is_err());

    commands::cmd_refunds_reset(&db, refund_id).unwrap();
    let refund = db.get_transaction(refund_id).unwrap().unwrap();
    assert_eq!(refund.reconciliation_status, Some(ReconciliationStatus::Pending));
    // Resetting a pending refund changes nothing
    commands::cmd_refunds_reset(&db, refund_id).unwrap();

    // Only refunds can be reset
    assert!(commands::cmd_refunds_reset(&db, original_id).is_err());
    assert!(commands::cmd_refunds_reset(&db, 9999).is_err());
}

#[tokio::test]
async fn test_cmd_refunds_link() {
    let db = Database::in_memory().unwrap();
    let original_id = db
        .insert_transaction(&NewTransaction::new(
            d(2025, 4, 1),
            "Old Name",
            30.0,
            TransactionSource::Statement,
        ))
        .unwrap();
    let refund_id = db
        .insert_transaction(
            &NewTransaction::new(d(2025, 4, 5), "New Name", -30.0, TransactionSource::Statement)
                .refund(),
        )
        .unwrap();

    commands::cmd_refunds_link(&db, None, refund_id, original_id)
        .await
        .unwrap();
    let refund = db.get_transaction(refund_id).unwrap().unwrap();
    assert_eq!(refund.reconciliation_status, Some(ReconciliationStatus::Matched));
    assert_eq!(refund.refund_for_txn_id, Some(original_id));
}

// ========== Sync, Export and Summary Tests ==========

#[tokio::test]
async fn test_cmd_sync() {
    let db = Database::in_memory().unwrap();
    let mock = MockExpenseBackend::new();
    let client = ExpenseClient::Mock(mock.clone());
    client
        .create_expense(&NewExpense {
            cost: 18.0,
            description: "Dinner".to_string(),
            details: "DINNER000001".to_string(),
            date: d(2025, 5, 2),
            currency_code: "USD".to_string(),
            category_id: None,
            notes: None,
            users: default_purchase_shares(18.0, 1, 2),
        })
        .await
        .unwrap();

    commands::cmd_sync(&db, &client, d(2025, 5, 1), d(2025, 5, 31), true)
        .await
        .unwrap();
    assert_eq!(db.count_transactions().unwrap(), 0);

    commands::cmd_sync(&db, &client, d(2025, 5, 1), d(2025, 5, 31), false)
        .await
        .unwrap();
    assert_eq!(db.count_transactions().unwrap(), 1);
}

#[test]
fn test_cmd_export_and_summary() {
    let db = Database::in_memory().unwrap();
    db.insert_transactions(&[
        NewTransaction::new(d(2025, 1, 4), "Grocer", 80.0, TransactionSource::Statement),
        NewTransaction::new(d(2025, 2, 9), "Grocer", 40.0, TransactionSource::Statement),
    ])
    .unwrap();

    let dir = TempDir::new().unwrap();
    let workbook = CsvWorkbook::new(dir.path()).unwrap();

    commands::cmd_export(&db, &workbook, "Expenses", 2025, false, true).unwrap();
    assert!(!workbook.tab_path("Expenses", "2025").unwrap().exists());

    commands::cmd_export(&db, &workbook, "Expenses", 2025, false, false).unwrap();
    assert!(workbook.tab_path("Expenses", "2025").unwrap().exists());
    assert!(db.unwritten_transactions(2025).unwrap().is_empty());

    commands::cmd_summary(&db, Some((&workbook, "Expenses")), 2025, false).unwrap();
    assert_eq!(db.monthly_summaries(Some("2025")).unwrap().len(), 2);
    assert!(workbook.tab_path("Expenses", "Summary").unwrap().exists());

    // A year with no rows is not an error
    commands::cmd_summary(&db, None, 2019, false).unwrap();
}

// ========== Sheet Import and Manual Entry Tests ==========

fn sheet_row(date: &str, merchant: &str, amount: &str, category: &str) -> SheetRecord {
    let mut record = SheetRecord::new();
    record.insert("Date".into(), date.into());
    record.insert("Description".into(), merchant.into());
    record.insert("Amount".into(), amount.into());
    record.insert("Category".into(), category.into());
    record
}

#[tokio::test]
async fn test_cmd_import_sheet() {
    let db = Database::in_memory().unwrap();
    let dir = TempDir::new().unwrap();
    let workbook = CsvWorkbook::new(dir.path()).unwrap();
    workbook
        .write_rows(
            "Expenses",
            "2024",
            &["Date", "Description", "Amount", "Category"],
            &[
                sheet_row("2024-03-02", "Hardware Depot", "30.00", "Home > Furniture"),
                sheet_row("2024-03-09", "Corner Cafe", "8.40", ""),
                sheet_row("", "No Date", "1.00", ""),
            ],
            WriteMode::Overwrite,
        )
        .unwrap();

    commands::cmd_import_sheet(&db, &engine(), &workbook, "Expenses", "2024", true)
        .await
        .unwrap();
    assert_eq!(db.count_transactions().unwrap(), 0);

    commands::cmd_import_sheet(&db, &engine(), &workbook, "Expenses", "2024", false)
        .await
        .unwrap();
    assert_eq!(db.count_transactions().unwrap(), 2);
    let logs = db.import_history(Some(ImportSourceType::Sheets), 5).unwrap();
    assert_eq!(logs.len(), 1);

    // Loading the same tab again adds nothing
    commands::cmd_import_sheet(&db, &engine(), &workbook, "Expenses", "2024", false)
        .await
        .unwrap();
    assert_eq!(db.count_transactions().unwrap(), 2);

    // A missing tab reads as empty
    commands::cmd_import_sheet(&db, &engine(), &workbook, "Expenses", "1999", false)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_cmd_add() {
    let db = Database::in_memory().unwrap();
    let entry = ManualEntry {
        date: d(2025, 2, 3),
        merchant: "Corner Cafe".to_string(),
        amount: 9.25,
        description: None,
        reference: None,
        notes: Some("lunch".to_string()),
        shared: false,
    };

    commands::cmd_add(&db, &engine(), &entry, true).await.unwrap();
    assert_eq!(db.count_transactions().unwrap(), 0);

    commands::cmd_add(&db, &engine(), &entry, false).await.unwrap();
    commands::cmd_add(&db, &engine(), &entry, false).await.unwrap();
    assert_eq!(db.count_transactions().unwrap(), 1);
    assert_eq!(db.import_history(Some(ImportSourceType::Manual), 5).unwrap().len(), 1);

    let refund = ManualEntry {
        amount: -9.25,
        date: d(2025, 2, 10),
        ..entry.clone()
    };
    commands::cmd_add(&db, &engine(), &refund, false).await.unwrap();
    let pending = db.pending_refunds().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].source, TransactionSource::Manual);

    let zero = ManualEntry {
        amount: 0.0,
        ..entry
    };
    assert!(commands::cmd_add(&db, &engine(), &zero, false).await.is_err());
}

// ========== Merchant Review Tests ==========

#[test]
fn test_cmd_review_export_and_apply() {
    let db = Database::in_memory().unwrap();
    db.insert_transactions(&[
        NewTransaction::new(d(2025, 1, 4), "Corner Cafe", 12.0, TransactionSource::Statement),
        NewTransaction::new(d(2025, 1, 6), "Starbucks", 5.0, TransactionSource::Statement),
    ])
    .unwrap();
    let dir = TempDir::new().unwrap();
    let workbook = CsvWorkbook::new(dir.path().join("book")).unwrap();
    let config_path = dir.path().join("categories.toml");

    let mut options = settle_core::ReviewOptions {
        sheet: "Merchant Review".to_string(),
        tab: "Merchants".to_string(),
        start_date: None,
        end_date: None,
        include_known: false,
        dry_run: true,
    };
    commands::cmd_review_export(&db, &engine(), &workbook, &options).unwrap();
    assert!(!workbook.tab_path("Merchant Review", "Merchants").unwrap().exists());

    options.dry_run = false;
    commands::cmd_review_export(&db, &engine(), &workbook, &options).unwrap();
    let mut rows = workbook.read_rows("Merchant Review", "Merchants").unwrap();
    assert_eq!(rows.len(), 1);
    rows[0].insert("Corrected Category".into(), "Food and drink".into());
    rows[0].insert("Corrected Subcategory".into(), "Dining out".into());
    workbook
        .write_rows("Merchant Review", "Merchants", REVIEW_COLUMNS, &rows, WriteMode::Overwrite)
        .unwrap();

    commands::cmd_review_apply(&workbook, "Merchant Review", "Merchants", &config_path, false)
        .unwrap();
    let reloaded = commands::load_engine(Some(&config_path)).unwrap();
    assert!(reloaded.knows_merchant("Corner Cafe"));

    // YAML configs are read-only for the review loop
    let yaml = dir.path().join("categories.yaml");
    assert!(
        commands::cmd_review_apply(&workbook, "Merchant Review", "Merchants Done", &yaml, false)
            .is_err()
    );
}

#[test]
fn test_review_config_path() {
    let explicit = std::path::Path::new("/tmp/cats.toml");
    assert_eq!(commands::review_config_path(Some(explicit)).unwrap(), explicit);
}

// ========== Status and History Tests ==========

#[test]
fn test_cmd_status_missing_ledger() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing.db");
    commands::cmd_status(&path, true).unwrap();
    assert!(!path.exists());
}

#[test]
fn test_print_ledger_stats() {
    let db = Database::in_memory().unwrap();
    db.insert_transaction(&NewTransaction::new(
        d(2025, 1, 1),
        "Shop",
        5.0,
        TransactionSource::Manual,
    ))
    .unwrap();
    commands::print_ledger_stats(&db).unwrap();
}

#[tokio::test]
async fn test_cmd_history() {
    let db = Database::in_memory().unwrap();
    commands::cmd_history(&db, None, 10).unwrap();

    let file = statement_file(STATEMENT);
    commands::cmd_import(&db, &engine(), None, file.path(), &import_args())
        .await
        .unwrap();
    commands::cmd_history(&db, Some("csv"), 10).unwrap();
    assert!(commands::cmd_history(&db, Some("fax"), 10).is_err());
}

#[tokio::test]
async fn test_merge_remote_categories() {
    let mut engine = engine();
    let rules = engine.rule_count();
    commands::merge_remote_categories(&mut engine, &ExpenseClient::mock()).await;
    // Remote categories extend the id table, not the pattern rules
    assert_eq!(engine.rule_count(), rules);
}
