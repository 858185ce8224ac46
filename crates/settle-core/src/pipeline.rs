//! Statement import pipeline
//!
//! Parsed statement rows flow through the duplicate filter, category inference
//! and insertion. Purchases can be mirrored to the remote service as they are
//! inserted; newly inserted refunds are handed to the refund linker. Every
//! non-dry-run batch leaves one `import_log` entry.

use std::path::Path;

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::categorize::{CategoryEngine, CategoryInput};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::merchant::clean_merchant_name;
use crate::models::{ImportSourceType, NewImportLog, NewTransaction, Transaction, TransactionUpdate};
use crate::reconcile::{Classification, DuplicateFilter, RowKey, REMOTE_LOOKUP_WINDOW_DAYS};
use crate::refunds::{LinkOptions, RefundLinker, RefundSummary};
use crate::remote::{default_purchase_shares, round_cents, ExpenseClient, ExpenseService, NewExpense};
use crate::statement::{parse_statement_file, AmountConvention, FilterReason, ParsedStatement, StatementRow};

/// Options for an import run
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub dry_run: bool,
    /// Create a remote expense for each inserted purchase
    pub mirror_remote: bool,
    /// Rows skipped before processing starts (after date/merchant filters)
    pub offset: usize,
    pub limit: Option<usize>,
    /// Case-insensitive substring of the description or cleaned merchant
    pub merchant_filter: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Skip the refund linker after inserting
    pub skip_refunds: bool,
}

/// What happened to one row
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RowOutcome {
    Added {
        id: i64,
        external_id: Option<String>,
    },
    WouldAdd,
    /// Already in the ledger
    Cached {
        id: i64,
    },
    RemoteExists {
        external_id: String,
    },
    Error {
        message: String,
    },
    Filtered {
        reason: FilterReason,
    },
}

impl RowOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added { .. } => "added",
            Self::WouldAdd => "would_add",
            Self::Cached { .. } => "cached",
            Self::RemoteExists { .. } => "remote_exists",
            Self::Error { .. } => "error",
            Self::Filtered { .. } => "filtered",
        }
    }
}

/// Per-row report line
#[derive(Debug, Clone, Serialize)]
pub struct RowResult {
    pub line: usize,
    pub date: Option<NaiveDate>,
    pub merchant: String,
    pub amount: f64,
    pub is_refund: bool,
    pub category: Option<String>,
    #[serde(flatten)]
    pub outcome: RowOutcome,
}

/// Result of an import run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub attempted: usize,
    pub added: usize,
    pub would_add: usize,
    pub cached: usize,
    pub remote_exists: usize,
    pub errors: usize,
    pub filtered: usize,
    pub mirrored: usize,
    pub mirror_failed: usize,
    pub rows: Vec<RowResult>,
    pub refunds: Option<RefundSummary>,
    pub import_log_id: Option<i64>,
}

impl ImportReport {
    fn record(&mut self, row: RowResult) {
        match &row.outcome {
            RowOutcome::Added { .. } => self.added += 1,
            RowOutcome::WouldAdd => self.would_add += 1,
            RowOutcome::Cached { .. } => self.cached += 1,
            RowOutcome::RemoteExists { .. } => self.remote_exists += 1,
            RowOutcome::Error { .. } => self.errors += 1,
            RowOutcome::Filtered { .. } => self.filtered += 1,
        }
        self.rows.push(row);
    }

    pub fn skipped(&self) -> usize {
        self.cached + self.remote_exists
    }
}

/// Result of pushing unmirrored rows to the remote service
#[derive(Debug, Clone, Default, Serialize)]
pub struct PushReport {
    pub candidates: usize,
    pub created: usize,
    pub already_remote: usize,
    pub errors: usize,
    pub dry_run: bool,
}

/// Imports statements into the ledger
pub struct StatementImporter<'a> {
    db: &'a Database,
    engine: &'a CategoryEngine,
    remote: Option<&'a ExpenseClient>,
}

impl<'a> StatementImporter<'a> {
    pub fn new(db: &'a Database, engine: &'a CategoryEngine, remote: Option<&'a ExpenseClient>) -> Self {
        Self { db, engine, remote }
    }

    /// Parse and import a statement file
    pub async fn import_file(
        &self,
        path: &Path,
        convention: AmountConvention,
        options: &ImportOptions,
    ) -> Result<ImportReport> {
        let parsed = parse_statement_file(path, convention)?;
        let source = path.display().to_string();
        self.import_parsed(parsed, Some(&source), options).await
    }

    /// Import already-parsed statement rows
    pub async fn import_parsed(
        &self,
        parsed: ParsedStatement,
        source: Option<&str>,
        options: &ImportOptions,
    ) -> Result<ImportReport> {
        let mut report = ImportReport::default();

        for rejected in &parsed.rejected {
            report.record(RowResult {
                line: rejected.line,
                date: None,
                merchant: String::new(),
                amount: 0.0,
                is_refund: false,
                category: None,
                outcome: RowOutcome::Error {
                    message: rejected.reason.clone(),
                },
            });
        }
        for filtered in &parsed.filtered {
            report.record(RowResult {
                line: filtered.line,
                date: None,
                merchant: filtered.description.clone(),
                amount: 0.0,
                is_refund: false,
                category: None,
                outcome: RowOutcome::Filtered {
                    reason: filtered.reason,
                },
            });
        }

        let selected: Vec<(StatementRow, String)> = parsed
            .rows
            .into_iter()
            .filter(|row| options.start_date.map_or(true, |start| row.date >= start))
            .filter(|row| options.end_date.map_or(true, |end| row.date <= end))
            .map(|row| {
                let merchant = clean_merchant_name(&row.description);
                (row, merchant)
            })
            .filter(|(row, merchant)| matches_merchant(options.merchant_filter.as_deref(), row, merchant))
            .skip(options.offset)
            .take(options.limit.unwrap_or(usize::MAX))
            .collect();

        info!(
            rows = selected.len(),
            dry_run = options.dry_run,
            "Importing statement rows"
        );

        let filter = DuplicateFilter::new(self.db, self.remote);
        let mut new_refunds = Vec::new();

        for (row, merchant) in selected {
            report.attempted += 1;
            let mut txn = row.to_transaction(&merchant, source);

            let classification = filter.classify(&RowKey::from(&txn)).await;
            let outcome = match classification {
                Ok(Classification::ExistsInLedger(id)) => RowOutcome::Cached { id },
                Ok(Classification::ExistsRemote(external_id)) => {
                    RowOutcome::RemoteExists { external_id }
                }
                Ok(Classification::New) => {
                    let matched = self.engine.infer(&CategoryInput {
                        merchant: Some(&merchant),
                        description: txn.raw_description.as_deref().unwrap_or(&row.description),
                        amount: txn.amount,
                        source_category: row.category.as_deref(),
                    });
                    matched.apply_to(&mut txn);
                    self.add_row(&txn, options, &mut report, &mut new_refunds).await?
                }
                Err(e) if e.is_remote() => {
                    warn!(line = row.line, error = %e, "Remote lookup failed");
                    RowOutcome::Error {
                        message: e.to_string(),
                    }
                }
                Err(e) => return Err(e),
            };

            debug!(line = row.line, merchant = %merchant, outcome = outcome.as_str(), "Processed row");
            report.record(RowResult {
                line: row.line,
                date: Some(txn.date),
                merchant,
                amount: txn.amount,
                is_refund: txn.is_refund,
                category: txn.category.clone(),
                outcome,
            });
        }

        if !options.dry_run && !options.skip_refunds && !new_refunds.is_empty() {
            match self.remote {
                Some(remote) => {
                    let linker = RefundLinker::new(self.db, Some(remote), LinkOptions::default());
                    let mut summary = RefundSummary::default();
                    for id in new_refunds {
                        summary.record(linker.process(id).await?);
                    }
                    report.refunds = Some(summary);
                }
                None => {
                    info!(
                        pending = new_refunds.len(),
                        "No remote service configured; refunds left pending"
                    );
                }
            }
        }

        if !options.dry_run {
            let log = NewImportLog {
                source_type: ImportSourceType::Csv,
                source_identifier: source.map(str::to_string),
                records_attempted: (report.attempted + parsed.rejected.len()) as i64,
                records_imported: report.added as i64,
                records_skipped: report.skipped() as i64,
                records_failed: report.errors as i64,
                error_message: None,
                metadata: Some(json!({
                    "filtered": report.filtered,
                    "mirrored": report.mirrored,
                    "mirror_failed": report.mirror_failed,
                    "refunds_created": report.refunds.as_ref().map_or(0, |r| r.created),
                })),
            };
            report.import_log_id = Some(self.db.insert_import_log(&log)?);
        }

        info!(
            added = report.added,
            cached = report.cached,
            remote_exists = report.remote_exists,
            errors = report.errors,
            filtered = report.filtered,
            "Import complete"
        );
        Ok(report)
    }

    async fn add_row(
        &self,
        txn: &NewTransaction,
        options: &ImportOptions,
        report: &mut ImportReport,
        new_refunds: &mut Vec<i64>,
    ) -> Result<RowOutcome> {
        let mirror = options.mirror_remote && !txn.is_refund && self.remote.is_some();
        if mirror && txn.cc_reference_id.is_none() {
            return Ok(RowOutcome::Error {
                message: "missing reference id required to mirror the row".to_string(),
            });
        }

        if options.dry_run {
            return Ok(RowOutcome::WouldAdd);
        }

        let id = self.db.insert_transaction(txn)?;
        if txn.is_refund {
            new_refunds.push(id);
            return Ok(RowOutcome::Added {
                id,
                external_id: None,
            });
        }

        let mut external_id = None;
        if let (true, Some(remote)) = (mirror, self.remote) {
            match self.mirror(remote, id).await {
                Ok(created) => {
                    report.mirrored += 1;
                    external_id = Some(created);
                }
                Err(e) if e.is_remote() => {
                    warn!(id, error = %e, "Failed to mirror transaction; it stays unmirrored");
                    report.mirror_failed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(RowOutcome::Added { id, external_id })
    }

    /// Create the remote expense for a ledger purchase and record its id
    async fn mirror(&self, remote: &ExpenseClient, id: i64) -> Result<String> {
        let txn = self
            .db
            .get_transaction(id)?
            .ok_or_else(|| Error::NotFound(format!("transaction {}", id)))?;
        let external_id = remote.create_expense(&purchase_expense(&txn, remote)).await?;

        self.db.update_transaction(
            id,
            &TransactionUpdate {
                external_id: Some(external_id.clone()),
                ..Default::default()
            },
        )?;
        Ok(external_id)
    }

    /// Create remote expenses for purchases that have none
    ///
    /// A purchase whose reference id is already on the remote service gets
    /// that expense's id attached instead of a second expense.
    pub async fn push_unmirrored(&self, dry_run: bool) -> Result<PushReport> {
        let remote = self.remote.ok_or_else(|| {
            Error::Config(
                "Pushing needs a remote expense service (set SETTLE_REMOTE_URL)".into(),
            )
        })?;

        let candidates = self.db.unmirrored_transactions()?;
        let mut report = PushReport {
            candidates: candidates.len(),
            dry_run,
            ..Default::default()
        };
        info!(candidates = candidates.len(), dry_run, "Pushing unmirrored transactions");

        if dry_run {
            return Ok(report);
        }

        for txn in candidates {
            let existing = match &txn.cc_reference_id {
                Some(reference) => {
                    let window = Duration::days(REMOTE_LOOKUP_WINDOW_DAYS);
                    remote
                        .find_by_reference(reference, txn.date - window, txn.date + window)
                        .await
                }
                None => Ok(None),
            };

            let result = match existing {
                Ok(Some(expense)) => {
                    report.already_remote += 1;
                    Ok(expense.id)
                }
                Ok(None) => match remote.create_expense(&purchase_expense(&txn, remote)).await {
                    Ok(id) => {
                        report.created += 1;
                        Ok(id)
                    }
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            };

            match result {
                Ok(external_id) => {
                    self.db.update_transaction(
                        txn.id,
                        &TransactionUpdate {
                            external_id: Some(external_id),
                            ..Default::default()
                        },
                    )?;
                }
                Err(e) if e.is_remote() => {
                    warn!(id = txn.id, error = %e, "Failed to push transaction");
                    report.errors += 1;
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            created = report.created,
            already_remote = report.already_remote,
            errors = report.errors,
            "Push complete"
        );
        Ok(report)
    }
}

fn matches_merchant(filter: Option<&str>, row: &StatementRow, merchant: &str) -> bool {
    match filter.map(str::trim).filter(|f| !f.is_empty()) {
        None => true,
        Some(f) => {
            let f = f.to_lowercase();
            row.description.to_lowercase().contains(&f) || merchant.to_lowercase().contains(&f)
        }
    }
}

/// Remote expense for a ledger purchase under the default split
pub fn purchase_expense(txn: &Transaction, remote: &ExpenseClient) -> NewExpense {
    let cost = round_cents(txn.amount);
    NewExpense {
        cost,
        description: txn.merchant.clone(),
        details: txn
            .cc_reference_id
            .clone()
            .unwrap_or_else(|| format!("LEDGER_{}", txn.id)),
        date: txn.date,
        currency_code: txn.currency.clone(),
        category_id: txn.subcategory_id.or(txn.category_id),
        notes: None,
        users: default_purchase_shares(cost, remote.current_user_id(), remote.self_expense_id()),
    }
}
