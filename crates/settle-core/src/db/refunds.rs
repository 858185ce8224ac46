//! Refund candidate queries and reconciliation state transitions
//!
//! Status writes are guarded in SQL (`WHERE reconciliation_status = 'pending'`)
//! so a terminal row is never moved by the automatic linker; only
//! `reset_refund` and manual linking leave a terminal state.

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};

use super::transactions::TRANSACTION_COLUMNS;
use super::Database;
use crate::error::{Error, Result};
use crate::models::{ReconciliationStatus, RefundLink, RefundMatchMethod, Transaction};

/// Amount slack when comparing refunds to originals
pub const REFUND_EPSILON: f64 = 0.01;

/// How far back the merchant/date tier looks for an original
pub const DEFAULT_REFUND_WINDOW_DAYS: i64 = 90;

/// Parameters for finding the original purchase of a refund
#[derive(Debug, Clone)]
pub struct RefundQuery<'a> {
    pub refund_amount: f64,
    pub refund_date: NaiveDate,
    pub merchant: &'a str,
    pub reference_id: Option<&'a str>,
    pub date_window_days: i64,
    /// When false the original amount must equal the refund within epsilon
    pub allow_partial: bool,
}

impl<'a> RefundQuery<'a> {
    /// Query for a refund row with the default window, partial refunds allowed
    pub fn for_refund(refund: &'a Transaction) -> Self {
        Self {
            refund_amount: refund.amount.abs(),
            refund_date: refund.date,
            merchant: &refund.merchant,
            reference_id: refund.cc_reference_id.as_deref(),
            date_window_days: DEFAULT_REFUND_WINDOW_DAYS,
            allow_partial: true,
        }
    }

    fn amount_clause(&self) -> &'static str {
        if self.allow_partial {
            "amount >= ?"
        } else {
            "ABS(amount - ?) <= 0.01"
        }
    }

    fn amount_param(&self) -> f64 {
        if self.allow_partial {
            self.refund_amount.abs() - REFUND_EPSILON
        } else {
            self.refund_amount.abs()
        }
    }
}

/// Candidate original found for a refund
#[derive(Debug, Clone, PartialEq)]
pub struct RefundCandidate {
    pub original: Transaction,
    pub method: RefundMatchMethod,
    /// Other candidates tied with `original` on every sort key
    pub tied_with: Vec<i64>,
}

impl RefundCandidate {
    pub fn is_ambiguous(&self) -> bool {
        !self.tied_with.is_empty()
    }
}

impl Database {
    /// Find the original purchase for a refund
    ///
    /// 1. Same statement reference id (most recent by date)
    /// 2. Same merchant within the date window, ordered by date desc then
    ///    closeness of amount
    ///
    /// In both tiers the original amount must cover the refund. Returns `None`
    /// when neither tier finds a candidate.
    pub fn find_original_for_refund(&self, query: &RefundQuery<'_>) -> Result<Option<RefundCandidate>> {
        let conn = self.conn()?;

        if let Some(reference) = query.reference_id.filter(|r| !r.is_empty()) {
            let sql = format!(
                "SELECT {} FROM transactions
                 WHERE cc_reference_id = ? AND is_refund = 0 AND external_deleted_at IS NULL
                   AND {}
                 ORDER BY date DESC, id DESC
                 LIMIT 1",
                TRANSACTION_COLUMNS,
                query.amount_clause()
            );
            let found = conn
                .query_row(&sql, params![reference, query.amount_param()], |row| {
                    Self::row_to_transaction(row)
                })
                .optional()?;
            if let Some(original) = found {
                return Ok(Some(RefundCandidate {
                    original,
                    method: RefundMatchMethod::ReferenceId,
                    tied_with: Vec::new(),
                }));
            }
        }

        let earliest = query.refund_date - chrono::Duration::days(query.date_window_days);
        let sql = format!(
            "SELECT {} FROM transactions
             WHERE merchant = ? AND is_refund = 0 AND external_deleted_at IS NULL
               AND date <= ? AND date >= ?
               AND {}
             ORDER BY date DESC, ABS(amount - ?) ASC, id DESC",
            TRANSACTION_COLUMNS,
            query.amount_clause()
        );
        let mut stmt = conn.prepare(&sql)?;
        let candidates = stmt
            .query_map(
                params![
                    query.merchant,
                    query.refund_date.to_string(),
                    earliest.to_string(),
                    query.amount_param(),
                    query.refund_amount.abs()
                ],
                |row| Self::row_to_transaction(row),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut iter = candidates.into_iter();
        let Some(original) = iter.next() else {
            return Ok(None);
        };

        let diff = |t: &Transaction| (t.amount - query.refund_amount.abs()).abs();
        let best_diff = diff(&original);
        let tied_with: Vec<i64> = iter
            .take_while(|t| t.date == original.date && (diff(t) - best_diff).abs() < 1e-9)
            .map(|t| t.id)
            .collect();

        Ok(Some(RefundCandidate {
            original,
            method: RefundMatchMethod::MerchantAmountWindow,
            tied_with,
        }))
    }

    /// Refund rows still awaiting a decision or left unmatched (active only)
    pub fn unmatched_refunds(&self) -> Result<Vec<Transaction>> {
        self.query_transactions(
            "WHERE is_refund = 1 AND reconciliation_status IN ('pending', 'unmatched')
               AND external_deleted_at IS NULL
             ORDER BY date, id",
            params![],
        )
    }

    /// Refund rows the linker should process
    pub fn pending_refunds(&self) -> Result<Vec<Transaction>> {
        self.refunds_by_status(ReconciliationStatus::Pending)
    }

    /// Active refund rows in a given state
    pub fn refunds_by_status(&self, status: ReconciliationStatus) -> Result<Vec<Transaction>> {
        self.query_transactions(
            "WHERE is_refund = 1 AND reconciliation_status = ? AND external_deleted_at IS NULL
             ORDER BY date, id",
            params![status.as_str()],
        )
    }

    /// Matched refunds pointing at an original, oldest first
    pub fn refunds_for_original(&self, original_id: i64) -> Result<Vec<Transaction>> {
        self.query_transactions(
            "WHERE is_refund = 1 AND refund_for_txn_id = ? AND reconciliation_status = 'matched'
               AND external_deleted_at IS NULL
             ORDER BY date, id",
            params![original_id],
        )
    }

    /// Whether an original already has a matched refund chain
    pub fn has_existing_refund_for_original(&self, original_id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM transactions
                WHERE is_refund = 1 AND refund_for_txn_id = ?
                  AND reconciliation_status = 'matched' AND external_deleted_at IS NULL
            )",
            params![original_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Sum of the magnitudes of all matched refunds pointing at an original
    pub fn total_refunded_for_original(&self, original_id: i64) -> Result<f64> {
        let conn = self.conn()?;
        let total: f64 = conn.query_row(
            "SELECT COALESCE(SUM(ABS(amount)), 0.0) FROM transactions
             WHERE is_refund = 1 AND refund_for_txn_id = ?
               AND reconciliation_status = 'matched' AND external_deleted_at IS NULL",
            params![original_id],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    /// Record a confirmed link on a pending refund; returns false if the row was not pending
    pub fn link_refund(&self, refund_id: i64, link: &RefundLink) -> Result<bool> {
        self.write_link(refund_id, link, "reconciliation_status = 'pending'")
    }

    /// Operator link: allowed from any state except matched
    pub fn link_refund_manually(&self, refund_id: i64, link: &RefundLink) -> Result<bool> {
        self.write_link(
            refund_id,
            link,
            "reconciliation_status IN ('pending', 'unmatched', 'manual_review')",
        )
    }

    fn write_link(&self, refund_id: i64, link: &RefundLink, guard: &str) -> Result<bool> {
        let conn = self.conn()?;
        let sql = format!(
            "UPDATE transactions SET
                external_id = COALESCE(?, external_id),
                refund_for_txn_id = ?,
                refund_for_external_id = ?,
                refund_match_method = ?,
                reconciliation_status = 'matched',
                reconciliation_note = NULL,
                is_partial_refund = ?,
                refund_percentage = ?,
                refund_created_at = CURRENT_TIMESTAMP,
                updated_at = CURRENT_TIMESTAMP
             WHERE id = ? AND is_refund = 1 AND {}",
            guard
        );
        let affected = conn.execute(
            &sql,
            params![
                link.refund_external_id,
                link.original_id,
                link.original_external_id,
                link.method.as_str(),
                link.is_partial,
                link.percentage,
                refund_id
            ],
        )?;
        Ok(affected > 0)
    }

    /// Move a pending refund to `unmatched` or `manual_review` with a reason
    pub fn mark_refund_status(
        &self,
        refund_id: i64,
        status: ReconciliationStatus,
        reason: &str,
    ) -> Result<bool> {
        if !matches!(
            status,
            ReconciliationStatus::Unmatched | ReconciliationStatus::ManualReview
        ) {
            return Err(Error::InvalidData(format!(
                "Refund status can only be set to unmatched or manual_review, not {}",
                status
            )));
        }

        let conn = self.conn()?;
        let affected = conn.execute(
            "UPDATE transactions
             SET reconciliation_status = ?, reconciliation_note = ?, updated_at = CURRENT_TIMESTAMP
             WHERE id = ? AND is_refund = 1 AND reconciliation_status = 'pending'",
            params![status.as_str(), reason, refund_id],
        )?;
        Ok(affected > 0)
    }

    /// Record the remote expense created for a pending refund before it is linked
    ///
    /// Only a pending refund with no remote id yet is written, so a retry after
    /// a failed link finds and reuses the id instead of creating another expense.
    pub fn record_refund_external_id(&self, refund_id: i64, external_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let affected = conn.execute(
            "UPDATE transactions SET external_id = ?, updated_at = CURRENT_TIMESTAMP
             WHERE id = ? AND is_refund = 1 AND reconciliation_status = 'pending'
               AND external_id IS NULL",
            params![external_id, refund_id],
        )?;
        Ok(affected > 0)
    }

    /// Explicit operator reset back to `pending`, clearing the linkage
    ///
    /// A remote expense already created for the refund is left in place.
    /// Returns false for purchases and for refunds that are already pending.
    pub fn reset_refund(&self, refund_id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let affected = conn.execute(
            "UPDATE transactions SET
                reconciliation_status = 'pending',
                reconciliation_note = NULL,
                refund_for_txn_id = NULL,
                refund_for_external_id = NULL,
                refund_match_method = NULL,
                is_partial_refund = 0,
                refund_percentage = NULL,
                refund_created_at = NULL,
                updated_at = CURRENT_TIMESTAMP
             WHERE id = ? AND is_refund = 1 AND reconciliation_status != 'pending'",
            params![refund_id],
        )?;
        Ok(affected > 0)
    }
}
