//! Settle Core Library
//!
//! Reconciliation and refund-linking engine for personal and shared finances:
//! - Ledger storage and migrations
//! - Statement parsing and merchant name cleaning
//! - Spreadsheet and manual ingestion
//! - Category inference from merchant, source category and patterns, with a
//!   merchant review loop feeding the lookup table
//! - Duplicate detection against the ledger and the remote expense service
//! - Refund linking to original purchases
//! - Remote sync, spreadsheet export and monthly summaries

pub mod categorize;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod ingest;
pub mod merchant;
pub mod models;
pub mod pipeline;
pub mod reconcile;
pub mod refunds;
pub mod remote;
pub mod review;
pub mod sheets;
pub mod statement;
pub mod summary;
pub mod sync;

/// Test utilities including the mock remote expense server
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use categorize::{CategoryEngine, CategoryInput, CategoryMatch, MatchSource};
pub use config::{CategoryConfig, CategoryDef, SubcategoryDef};
pub use db::{Database, RefundCandidate, RefundQuery};
pub use error::{Error, Result};
pub use export::{ExportOptions, ExportSummary, PersonalShare, SheetExporter};
pub use ingest::{add_manual, ManualEntry, ManualOutcome, SheetImportReport, SheetImporter};
pub use merchant::clean_merchant_name;
pub use pipeline::{ImportOptions, ImportReport, PushReport, RowOutcome, StatementImporter};
pub use reconcile::{Classification, DuplicateFilter, RowKey};
pub use refunds::{LinkOptions, RefundLinker, RefundMath, RefundOutcome, RefundSummary};
pub use remote::{ExpenseClient, ExpenseService, HttpExpenseBackend, MockExpenseBackend};
pub use review::{apply_review, export_review, ReviewApplyReport, ReviewExport, ReviewOptions};
pub use sheets::{CsvWorkbook, SheetRecord, SpreadsheetService, WriteMode};
pub use statement::{parse_statement, parse_statement_file, AmountConvention, ParsedStatement};
pub use summary::{generate_year_summary, SummaryReport};
pub use sync::{RemoteSync, SyncStats};
