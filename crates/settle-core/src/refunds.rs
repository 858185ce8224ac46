//! Refund linking state machine
//!
//! Drives refund rows from `pending` to `matched`, `unmatched` or `manual_review`:
//!
//! 1. Find the original purchase (reference id, then merchant/date window)
//! 2. Idempotency: an original whose matched refunds already cover its
//!    remaining balance yields `Duplicate`
//! 3. The original must already be mirrored remotely
//! 4. Create the refund expense remotely with reversed shares, then link
//!
//! Terminal rows are never re-attempted; `Database::reset_refund` is the
//! explicit way back to `pending`.

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::db::{Database, RefundCandidate, RefundQuery, DEFAULT_REFUND_WINDOW_DAYS, REFUND_EPSILON};
use crate::error::{Error, Result};
use crate::models::{ReconciliationStatus, RefundLink, RefundMatchMethod, Transaction};
use crate::remote::{
    default_purchase_shares, round_cents, ExpenseClient, ExpenseService, NewExpense, SplitShare,
    REFUND_NOTE_PREFIX,
};

/// Refunds below this share of the original are partial
pub const PARTIAL_REFUND_THRESHOLD: f64 = 95.0;

/// Reason recorded when the original has no remote expense
pub const ORIGINAL_NOT_REMOTE: &str = "original not in remote service";

/// Options for a linking run
#[derive(Debug, Clone)]
pub struct LinkOptions {
    pub dry_run: bool,
    pub allow_partial: bool,
    pub date_window_days: i64,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            allow_partial: true,
            date_window_days: DEFAULT_REFUND_WINDOW_DAYS,
        }
    }
}

/// Refund math for a refund against an original
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RefundMath {
    pub percentage: f64,
    pub is_partial: bool,
    /// Original amount less all refunds including this one
    pub net_cost: f64,
}

impl RefundMath {
    pub fn compute(refund_amount: f64, original_amount: f64, already_refunded: f64) -> Self {
        let refund_amount = refund_amount.abs();
        let percentage = if original_amount > 0.0 {
            refund_amount * 100.0 / original_amount
        } else {
            0.0
        };
        Self {
            percentage,
            is_partial: percentage < PARTIAL_REFUND_THRESHOLD,
            net_cost: round_cents(original_amount - already_refunded - refund_amount),
        }
    }
}

/// Result of processing one refund
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefundOutcome {
    Created {
        refund_id: i64,
        original_id: i64,
        external_id: String,
        method: RefundMatchMethod,
        math: RefundMath,
    },
    WouldCreate {
        refund_id: i64,
        original_id: i64,
        method: RefundMatchMethod,
        math: RefundMath,
    },
    /// Original already refunded (or this refund already matched); nothing created
    Duplicate {
        refund_id: i64,
        original_id: Option<i64>,
    },
    Unmatched {
        refund_id: i64,
        reason: String,
    },
    ManualReview {
        refund_id: i64,
        reason: String,
    },
    /// Remote creation failed; the row is left `unmatched` with the message
    Error {
        refund_id: i64,
        message: String,
    },
    /// Row already terminal; not re-attempted
    Skipped {
        refund_id: i64,
        status: ReconciliationStatus,
    },
}

impl RefundOutcome {
    pub fn refund_id(&self) -> i64 {
        match self {
            Self::Created { refund_id, .. }
            | Self::WouldCreate { refund_id, .. }
            | Self::Duplicate { refund_id, .. }
            | Self::Unmatched { refund_id, .. }
            | Self::ManualReview { refund_id, .. }
            | Self::Error { refund_id, .. }
            | Self::Skipped { refund_id, .. } => *refund_id,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::WouldCreate { .. } => "would_create",
            Self::Duplicate { .. } => "duplicate",
            Self::Unmatched { .. } => "unmatched",
            Self::ManualReview { .. } => "manual_review",
            Self::Error { .. } => "error",
            Self::Skipped { .. } => "skipped",
        }
    }
}

/// Counts for a batch of refunds
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefundSummary {
    pub total: usize,
    pub created: usize,
    pub would_create: usize,
    pub duplicate: usize,
    pub unmatched: usize,
    pub manual_review: usize,
    pub errors: usize,
    pub skipped: usize,
    pub outcomes: Vec<RefundOutcome>,
}

impl RefundSummary {
    pub fn record(&mut self, outcome: RefundOutcome) {
        self.total += 1;
        match &outcome {
            RefundOutcome::Created { .. } => self.created += 1,
            RefundOutcome::WouldCreate { .. } => self.would_create += 1,
            RefundOutcome::Duplicate { .. } => self.duplicate += 1,
            RefundOutcome::Unmatched { .. } => self.unmatched += 1,
            RefundOutcome::ManualReview { .. } => self.manual_review += 1,
            RefundOutcome::Error { .. } => self.errors += 1,
            RefundOutcome::Skipped { .. } => self.skipped += 1,
        }
        self.outcomes.push(outcome);
    }
}

/// Reference id for a refund without one: `CREDIT_` + 16 hex chars
pub fn generated_refund_reference(refund: &Transaction) -> String {
    let mut hasher = Sha256::new();
    hasher.update(
        format!(
            "{}|{}|{}|{:.2}",
            refund.id, refund.date, refund.merchant, refund.amount
        )
        .as_bytes(),
    );
    let digest = hex::encode(hasher.finalize());
    format!("CREDIT_{}", &digest[..16])
}

/// Links refunds to their originals and mirrors them to the remote service
pub struct RefundLinker<'a> {
    db: &'a Database,
    remote: Option<&'a ExpenseClient>,
    options: LinkOptions,
}

impl<'a> RefundLinker<'a> {
    pub fn new(db: &'a Database, remote: Option<&'a ExpenseClient>, options: LinkOptions) -> Self {
        Self { db, remote, options }
    }

    /// Process every pending refund, oldest first
    pub async fn process_pending(&self) -> Result<RefundSummary> {
        self.require_remote()?;

        let pending = self.db.pending_refunds()?;
        info!("Processing {} pending refunds", pending.len());

        let mut summary = RefundSummary::default();
        for refund in pending {
            summary.record(self.process(refund.id).await?);
        }

        info!(
            created = summary.created,
            duplicate = summary.duplicate,
            unmatched = summary.unmatched,
            manual_review = summary.manual_review,
            errors = summary.errors,
            "Refund processing complete"
        );
        Ok(summary)
    }

    fn require_remote(&self) -> Result<Option<&'a ExpenseClient>> {
        match self.remote {
            Some(remote) => Ok(Some(remote)),
            None if self.options.dry_run => Ok(None),
            None => Err(Error::Config(
                "Refund linking needs a remote expense service (set SETTLE_REMOTE_URL)".into(),
            )),
        }
    }

    /// Process one refund row
    ///
    /// Storage errors propagate; remote errors are absorbed into the outcome.
    pub async fn process(&self, refund_id: i64) -> Result<RefundOutcome> {
        // Re-read so decisions use the row's current state
        let refund = self.load_refund(refund_id)?;

        match refund.reconciliation_status {
            Some(ReconciliationStatus::Matched) => {
                debug!(refund_id, "Refund already matched");
                return Ok(RefundOutcome::Duplicate {
                    refund_id,
                    original_id: refund.refund_for_txn_id,
                });
            }
            Some(status) if status.is_terminal() => {
                debug!(refund_id, %status, "Refund is terminal, not re-attempted");
                return Ok(RefundOutcome::Skipped { refund_id, status });
            }
            _ => {}
        }

        let query = RefundQuery {
            allow_partial: self.options.allow_partial,
            date_window_days: self.options.date_window_days,
            ..RefundQuery::for_refund(&refund)
        };

        let candidate = match self.db.find_original_for_refund(&query)? {
            Some(candidate) => candidate,
            None => {
                return self.conclude(
                    refund_id,
                    ReconciliationStatus::Unmatched,
                    "no original purchase found".to_string(),
                );
            }
        };

        if candidate.is_ambiguous() {
            let reason = format!(
                "{} candidate originals tied on date and amount (ids {}, {})",
                candidate.tied_with.len() + 1,
                candidate.original.id,
                join_ids(&candidate.tied_with)
            );
            return self.conclude(refund_id, ReconciliationStatus::ManualReview, reason);
        }

        let RefundCandidate {
            original, method, ..
        } = candidate;
        debug!(
            refund_id,
            original_id = original.id,
            %method,
            "Found original for refund"
        );

        let refunded = self.db.total_refunded_for_original(original.id)?;
        if self.db.has_existing_refund_for_original(original.id)? {
            let remaining = original.amount - refunded;
            if remaining + REFUND_EPSILON < refund.amount.abs() {
                info!(
                    refund_id,
                    original_id = original.id,
                    remaining,
                    "Original already refunded, not creating another refund"
                );
                if !self.options.dry_run {
                    self.db.mark_refund_status(
                        refund_id,
                        ReconciliationStatus::ManualReview,
                        &format!("original {} already refunded", original.id),
                    )?;
                }
                return Ok(RefundOutcome::Duplicate {
                    refund_id,
                    original_id: Some(original.id),
                });
            }
        }

        if original.external_id.is_none() {
            return self.conclude(
                refund_id,
                ReconciliationStatus::Unmatched,
                ORIGINAL_NOT_REMOTE.to_string(),
            );
        }

        let math = RefundMath::compute(refund.amount, original.amount, refunded);

        if self.options.dry_run {
            return Ok(RefundOutcome::WouldCreate {
                refund_id,
                original_id: original.id,
                method,
                math,
            });
        }

        let remote = self.require_remote()?.ok_or_else(|| {
            Error::Config("Refund linking needs a remote expense service".into())
        })?;

        // A refund reset after linking keeps the remote expense it already has
        let created = match &refund.external_id {
            Some(existing) => {
                debug!(refund_id, external_id = %existing, "Reusing existing remote refund");
                Ok(existing.clone())
            }
            None => match self
                .create_remote_refund(remote, &refund, &original, &math)
                .await
            {
                Ok(external_id) => {
                    if !self.db.record_refund_external_id(refund_id, &external_id)? {
                        warn!(refund_id, external_id = %external_id, "Refund already carries a remote id");
                    }
                    Ok(external_id)
                }
                Err(e) => Err(e),
            },
        };

        match created {
            Ok(external_id) => {
                let link = RefundLink {
                    original_id: original.id,
                    original_external_id: original.external_id.clone(),
                    refund_external_id: Some(external_id.clone()),
                    method,
                    percentage: math.percentage,
                    is_partial: math.is_partial,
                };
                if !self.db.link_refund(refund_id, &link)? {
                    warn!(refund_id, "Refund left pending state before it could be linked");
                }
                info!(
                    refund_id,
                    original_id = original.id,
                    external_id = %external_id,
                    percentage = format!("{:.1}", math.percentage),
                    "Linked refund"
                );
                Ok(RefundOutcome::Created {
                    refund_id,
                    original_id: original.id,
                    external_id,
                    method,
                    math,
                })
            }
            Err(e) => {
                warn!(refund_id, error = %e, "Failed to create remote refund");
                let message = e.to_string();
                self.db
                    .mark_refund_status(refund_id, ReconciliationStatus::Unmatched, &message)?;
                Ok(RefundOutcome::Error { refund_id, message })
            }
        }
    }

    /// Operator link of a refund to a chosen original
    ///
    /// Allowed from `pending`, `unmatched` or `manual_review`. The refund is
    /// mirrored remotely when the original is; otherwise only the ledger link
    /// is written.
    pub async fn link_refund_manually(&self, refund_id: i64, original_id: i64) -> Result<RefundOutcome> {
        let refund = self.load_refund(refund_id)?;
        if refund.reconciliation_status == Some(ReconciliationStatus::Matched) {
            return Ok(RefundOutcome::Duplicate {
                refund_id,
                original_id: refund.refund_for_txn_id,
            });
        }

        let original = self
            .db
            .get_transaction(original_id)?
            .ok_or_else(|| Error::NotFound(format!("transaction {}", original_id)))?;
        if original.is_refund || !original.is_active() {
            return Err(Error::InvalidData(format!(
                "transaction {} is not an active purchase",
                original_id
            )));
        }

        let refunded = self.db.total_refunded_for_original(original.id)?;
        if original.amount - refunded + REFUND_EPSILON < refund.amount.abs() {
            return Err(Error::InvalidData(format!(
                "refund {:.2} exceeds the {:.2} left unrefunded on transaction {}",
                refund.amount,
                original.amount - refunded,
                original_id
            )));
        }

        let math = RefundMath::compute(refund.amount, original.amount, refunded);
        if self.options.dry_run {
            return Ok(RefundOutcome::WouldCreate {
                refund_id,
                original_id,
                method: RefundMatchMethod::Manual,
                math,
            });
        }

        let refund_external_id = match (self.remote, &original.external_id, &refund.external_id) {
            (_, _, Some(existing)) => Some(existing.clone()),
            (Some(remote), Some(_), None) => {
                match self.create_remote_refund(remote, &refund, &original, &math).await {
                    Ok(id) => Some(id),
                    Err(e) => {
                        return Ok(RefundOutcome::Error {
                            refund_id,
                            message: e.to_string(),
                        })
                    }
                }
            }
            _ => None,
        };

        let link = RefundLink {
            original_id,
            original_external_id: original.external_id.clone(),
            refund_external_id: refund_external_id.clone(),
            method: RefundMatchMethod::Manual,
            percentage: math.percentage,
            is_partial: math.is_partial,
        };
        if !self.db.link_refund_manually(refund_id, &link)? {
            return Err(Error::InvalidData(format!(
                "refund {} could not be linked from its current state",
                refund_id
            )));
        }
        info!(refund_id, original_id, "Manually linked refund");

        Ok(RefundOutcome::Created {
            refund_id,
            original_id,
            external_id: refund_external_id.unwrap_or_default(),
            method: RefundMatchMethod::Manual,
            math,
        })
    }

    fn load_refund(&self, refund_id: i64) -> Result<Transaction> {
        let refund = self
            .db
            .get_transaction(refund_id)?
            .ok_or_else(|| Error::NotFound(format!("transaction {}", refund_id)))?;
        if !refund.is_refund {
            return Err(Error::InvalidData(format!(
                "transaction {} is not a refund",
                refund_id
            )));
        }
        Ok(refund)
    }

    /// Move a pending refund to a terminal non-matched state (skipped in dry run)
    fn conclude(
        &self,
        refund_id: i64,
        status: ReconciliationStatus,
        reason: String,
    ) -> Result<RefundOutcome> {
        debug!(refund_id, %status, reason = %reason, "Refund concluded without a link");
        if !self.options.dry_run {
            self.db.mark_refund_status(refund_id, status, &reason)?;
        }
        Ok(match status {
            ReconciliationStatus::ManualReview => RefundOutcome::ManualReview { refund_id, reason },
            _ => RefundOutcome::Unmatched { refund_id, reason },
        })
    }

    async fn create_remote_refund(
        &self,
        remote: &ExpenseClient,
        refund: &Transaction,
        original: &Transaction,
        math: &RefundMath,
    ) -> Result<String> {
        let amount = round_cents(refund.amount.abs());
        let original_external_id = original.external_id.clone().unwrap_or_default();

        let users = self
            .refund_shares(remote, &original_external_id, amount)
            .await;

        let base = refund
            .description
            .clone()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| refund.merchant.clone());
        let description = if math.is_partial {
            format!("{} (refund {:.1}%)", base, math.percentage)
        } else {
            format!("{} (refund)", base)
        };

        let expense = NewExpense {
            cost: amount,
            description,
            details: refund
                .cc_reference_id
                .clone()
                .unwrap_or_else(|| generated_refund_reference(refund)),
            date: refund.date,
            currency_code: refund.currency.clone(),
            category_id: refund
                .subcategory_id
                .or(refund.category_id)
                .or(original.subcategory_id)
                .or(original.category_id),
            notes: Some(format!("{} {}", REFUND_NOTE_PREFIX, original_external_id)),
            users,
        };

        remote.create_expense(&expense).await
    }

    /// The original expense's shares scaled to the refund and reversed, or the
    /// default purchase split reversed when the original can't be fetched
    async fn refund_shares(
        &self,
        remote: &ExpenseClient,
        original_external_id: &str,
        amount: f64,
    ) -> Vec<SplitShare> {
        match remote.get_expense(original_external_id).await {
            Ok(Some(expense)) if !expense.users.is_empty() && expense.cost.abs() > 0.0 => {
                let factor = amount / expense.cost.abs();
                expense
                    .users
                    .iter()
                    .map(|u| u.scaled(factor).reversed())
                    .collect()
            }
            Ok(_) => {
                debug!(original_external_id, "Original expense unavailable, using default split");
                self.default_refund_shares(remote, amount)
            }
            Err(e) => {
                warn!(original_external_id, error = %e, "Could not fetch original expense, using default split");
                self.default_refund_shares(remote, amount)
            }
        }
    }

    fn default_refund_shares(&self, remote: &ExpenseClient, amount: f64) -> Vec<SplitShare> {
        default_purchase_shares(amount, remote.current_user_id(), remote.self_expense_id())
            .iter()
            .map(SplitShare::reversed)
            .collect()
    }
}

fn join_ids(ids: &[i64]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
