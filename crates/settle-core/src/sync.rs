//! Remote to ledger sync
//!
//! Pulls the remote service's expenses for a date range and reconciles them
//! with the ledger: new expenses are inserted (or attached to a statement row
//! carrying the same reference id), edited ones are updated and deleted ones
//! are marked. Ledger rows are never removed.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::error::Result;
use crate::merchant::clean_merchant_name;
use crate::models::{
    ImportSourceType, NewImportLog, NewTransaction, Transaction, TransactionSource,
    TransactionUpdate,
};
use crate::remote::{round_cents, ExpenseClient, ExpenseService, RemoteExpense};

/// Amount differences at or below this are not an edit
pub const AMOUNT_CHANGE_TOLERANCE: f64 = 0.01;

/// Counts for a sync run
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStats {
    pub checked: usize,
    pub inserted: usize,
    pub updated: usize,
    /// Statement rows that received the remote id
    pub linked: usize,
    pub marked_deleted: usize,
    pub unchanged: usize,
    /// Expenses the user takes no part in
    pub not_participant: usize,
    pub errors: usize,
    pub dry_run: bool,
}

/// Map a remote expense to a new ledger row from the user's point of view
///
/// The amount is the user's owed share, or their paid share for refunds.
/// `None` when the user is not a participant.
pub fn expense_to_transaction(expense: &RemoteExpense, user_id: i64) -> Option<NewTransaction> {
    let share = expense.share_for(user_id)?;
    let is_refund = expense.is_refund();
    let amount = if is_refund {
        share.paid_share
    } else {
        share.owed_share
    };

    let merchant = clean_merchant_name(&expense.description);
    let mut txn = NewTransaction::new(
        expense.date,
        &merchant,
        round_cents(amount),
        TransactionSource::Remote,
    )
    .with_external_id(&expense.id)
    .with_description(&expense.description);
    txn.raw_amount = Some(expense.cost);
    txn.currency = expense.currency_code.clone();
    txn.cc_reference_id = expense.reference_id();
    txn.notes = expense.notes.clone().filter(|n| !n.trim().is_empty());
    txn.is_shared = expense.users.len() > 1
        && expense
            .users
            .iter()
            .any(|u| u.user_id != user_id && u.owed_share.abs() > 0.0);
    if let Some(category) = &expense.category {
        txn.category_id = Some(category.id);
        if !category.name.is_empty() {
            txn.category = Some(category.name.clone());
        }
    }
    if is_refund {
        txn = txn.refund();
    }
    Some(txn)
}

/// Field changes between a ledger row and its remote expense
pub fn diff_update(existing: &Transaction, incoming: &NewTransaction) -> TransactionUpdate {
    let mut update = TransactionUpdate::default();
    if (existing.amount - incoming.amount).abs() > AMOUNT_CHANGE_TOLERANCE {
        update.amount = Some(incoming.amount);
        update.raw_amount = incoming.raw_amount;
    }
    if existing.date != incoming.date {
        update.date = Some(incoming.date);
    }
    if incoming.description.is_some() && existing.description != incoming.description {
        update.description = incoming.description.clone();
        update.merchant = Some(incoming.merchant.clone());
    }
    if incoming.category.is_some() && existing.category != incoming.category {
        update.category = incoming.category.clone();
    }
    if incoming.category_id.is_some() && existing.category_id != incoming.category_id {
        update.category_id = incoming.category_id;
    }
    if incoming.notes.is_some() && existing.notes != incoming.notes {
        update.notes = incoming.notes.clone();
    }
    update
}

/// Reconciles the ledger with the remote service
pub struct RemoteSync<'a> {
    db: &'a Database,
    remote: &'a ExpenseClient,
}

impl<'a> RemoteSync<'a> {
    pub fn new(db: &'a Database, remote: &'a ExpenseClient) -> Self {
        Self { db, remote }
    }

    /// Sync every remote expense dated within `[start, end]`
    pub async fn sync(&self, start: NaiveDate, end: NaiveDate, dry_run: bool) -> Result<SyncStats> {
        let expenses = self.remote.list_expenses(start, end).await?;
        let user_id = self.remote.current_user_id();
        info!(
            count = expenses.len(),
            %start,
            %end,
            host = self.remote.host(),
            dry_run,
            "Syncing remote expenses"
        );

        let mut stats = SyncStats {
            dry_run,
            ..Default::default()
        };
        let mut seen: HashSet<String> = HashSet::new();

        for expense in &expenses {
            stats.checked += 1;
            seen.insert(expense.id.clone());
            if let Err(e) = self.sync_expense(expense, user_id, dry_run, &mut stats) {
                warn!(remote_id = %expense.id, error = %e, "Failed to sync expense");
                stats.errors += 1;
            }
        }

        // Mirrored rows whose expense vanished from the range
        for txn in self.db.find_in_date_range(start, end, false)? {
            let Some(external_id) = txn.external_id.as_deref() else {
                continue;
            };
            if seen.contains(external_id) {
                continue;
            }
            debug!(id = txn.id, external_id, "Remote expense missing, marking deleted");
            if dry_run || self.db.mark_external_deleted(txn.id)? {
                stats.marked_deleted += 1;
            }
        }

        if !dry_run {
            self.db.insert_import_log(&NewImportLog {
                source_type: ImportSourceType::RemoteApi,
                source_identifier: Some(self.remote.host().to_string()),
                records_attempted: stats.checked as i64,
                records_imported: stats.inserted as i64,
                records_skipped: (stats.unchanged + stats.not_participant) as i64,
                records_failed: stats.errors as i64,
                error_message: None,
                metadata: Some(json!({
                    "start": start.to_string(),
                    "end": end.to_string(),
                    "updated": stats.updated,
                    "linked": stats.linked,
                    "marked_deleted": stats.marked_deleted,
                })),
            })?;
        }

        info!(
            checked = stats.checked,
            inserted = stats.inserted,
            updated = stats.updated,
            marked_deleted = stats.marked_deleted,
            unchanged = stats.unchanged,
            errors = stats.errors,
            "Sync complete"
        );
        Ok(stats)
    }

    fn sync_expense(
        &self,
        expense: &RemoteExpense,
        user_id: i64,
        dry_run: bool,
        stats: &mut SyncStats,
    ) -> Result<()> {
        let existing = self.db.get_by_external_id(&expense.id)?;

        if expense.is_deleted() {
            match existing {
                Some(txn) => {
                    if dry_run || self.db.mark_external_deleted(txn.id)? {
                        stats.marked_deleted += 1;
                    }
                }
                None => stats.unchanged += 1,
            }
            return Ok(());
        }

        let Some(incoming) = expense_to_transaction(expense, user_id) else {
            stats.not_participant += 1;
            return Ok(());
        };

        if let Some(txn) = existing {
            let update = diff_update(&txn, &incoming);
            if update.is_empty() {
                stats.unchanged += 1;
            } else {
                debug!(id = txn.id, remote_id = %expense.id, "Remote expense changed");
                if !dry_run {
                    self.db.update_transaction(txn.id, &update)?;
                }
                stats.updated += 1;
            }
            return Ok(());
        }

        // A statement row with the same reference that was never mirrored
        if let Some(reference) = incoming.cc_reference_id.as_deref() {
            if let Some(txn) = self
                .db
                .get_by_reference_id(reference, incoming.is_refund)?
                .filter(|t| t.external_id.is_none())
            {
                debug!(id = txn.id, remote_id = %expense.id, "Attaching remote id to ledger row");
                if !dry_run {
                    self.db.update_transaction(
                        txn.id,
                        &TransactionUpdate {
                            external_id: Some(expense.id.clone()),
                            ..Default::default()
                        },
                    )?;
                }
                stats.linked += 1;
                return Ok(());
            }
        }

        if !dry_run {
            self.db.insert_transaction(&incoming)?;
        }
        stats.inserted += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{default_purchase_shares, MockExpenseBackend, SplitShare};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn expense(id: &str, cost: f64, details: Option<&str>) -> RemoteExpense {
        RemoteExpense {
            id: id.to_string(),
            cost,
            description: "CORNER CAFE".to_string(),
            details: details.map(String::from),
            notes: None,
            date: d(2025, 5, 10),
            currency_code: "USD".to_string(),
            category: None,
            users: default_purchase_shares(cost, 1, 2),
            updated_at: None,
            deleted_at: None,
        }
    }

    #[test]
    fn test_refund_uses_paid_share() {
        let mut refund = expense("9", 20.0, None);
        refund.users = refund.users.iter().map(SplitShare::reversed).collect();
        refund.notes = Some("Refund for expense 8".to_string());

        let txn = expense_to_transaction(&refund, 1).unwrap();
        assert!(txn.is_refund);
        assert_eq!(txn.amount, 20.0);
        assert!(expense_to_transaction(&refund, 99).is_none());
    }

    #[tokio::test]
    async fn test_sync_insert_update_delete() {
        let db = Database::in_memory().unwrap();
        let mock = MockExpenseBackend::new();
        mock.seed(expense("100", 30.0, None));
        mock.seed(expense("101", 12.0, None));
        let client = ExpenseClient::Mock(mock.clone());
        let sync = RemoteSync::new(&db, &client);

        let dry = sync.sync(d(2025, 5, 1), d(2025, 5, 31), true).await.unwrap();
        assert_eq!(dry.inserted, 2);
        assert_eq!(db.count_transactions().unwrap(), 0);

        let first = sync.sync(d(2025, 5, 1), d(2025, 5, 31), false).await.unwrap();
        assert_eq!(first.inserted, 2);

        let again = sync.sync(d(2025, 5, 1), d(2025, 5, 31), false).await.unwrap();
        assert_eq!(again.unchanged, 2);

        mock.seed(expense("100", 35.0, None));
        mock.delete("101");
        let third = sync.sync(d(2025, 5, 1), d(2025, 5, 31), false).await.unwrap();
        assert_eq!(third.updated, 1);
        assert_eq!(third.marked_deleted, 1);

        assert_eq!(db.get_by_external_id("100").unwrap().unwrap().amount, 35.0);
        assert!(db.get_by_external_id("101").unwrap().is_none());
        assert_eq!(db.count_transactions().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_sync_attaches_to_statement_row() {
        let db = Database::in_memory().unwrap();
        let id = db
            .insert_transaction(
                &NewTransaction::new(d(2025, 5, 10), "Corner Cafe", 30.0, TransactionSource::Statement)
                    .with_reference("REF12345678"),
            )
            .unwrap();

        let mock = MockExpenseBackend::new();
        mock.seed(expense("200", 30.0, Some("\"REF12345678\"")));
        let client = ExpenseClient::Mock(mock);

        let stats = RemoteSync::new(&db, &client)
            .sync(d(2025, 5, 1), d(2025, 5, 31), false)
            .await
            .unwrap();
        assert_eq!(stats.linked, 1);
        assert_eq!(stats.inserted, 0);
        assert_eq!(
            db.get_transaction(id).unwrap().unwrap().external_id.as_deref(),
            Some("200")
        );
    }

    #[tokio::test]
    async fn test_missing_remote_expense_marked_deleted() {
        let db = Database::in_memory().unwrap();
        db.insert_transaction(
            &NewTransaction::new(d(2025, 5, 3), "Gone", 5.0, TransactionSource::Remote)
                .with_external_id("300"),
        )
        .unwrap();
        let client = ExpenseClient::mock();

        let stats = RemoteSync::new(&db, &client)
            .sync(d(2025, 5, 1), d(2025, 5, 31), false)
            .await
            .unwrap();
        assert_eq!(stats.marked_deleted, 1);
        assert!(db.get_by_external_id("300").unwrap().is_none());
    }
}
