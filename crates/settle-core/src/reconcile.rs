//! Duplicate / reconciliation filter
//!
//! Decides whether an incoming row is already known, checking the ledger first
//! and then the remote expense service. A statement reference id is the primary
//! key; fuzzy matching on merchant, date and amount is only a fallback for rows
//! that carry no reference.

use chrono::{Duration, NaiveDate};
use tracing::debug;

use crate::db::Database;
use crate::error::Result;
use crate::models::NewTransaction;
use crate::remote::{ExpenseClient, ExpenseService, FuzzyQuery};

/// Days either side of the row date searched for a remote reference match
pub const REMOTE_LOOKUP_WINDOW_DAYS: i64 = 30;

/// Fuzzy ledger tier tolerances
pub const FUZZY_DATE_TOLERANCE_DAYS: i64 = 0;
pub const FUZZY_AMOUNT_TOLERANCE: f64 = 0.01;

/// Outcome of duplicate classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// A live ledger row already carries this record
    ExistsInLedger(i64),
    /// The remote service already has an expense for it
    ExistsRemote(String),
    New,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExistsInLedger(_) => "exists_in_ledger",
            Self::ExistsRemote(_) => "exists_remote",
            Self::New => "new",
        }
    }

    pub fn is_duplicate(&self) -> bool {
        !matches!(self, Self::New)
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExistsInLedger(id) => write!(f, "exists_in_ledger ({})", id),
            Self::ExistsRemote(id) => write!(f, "exists_remote ({})", id),
            Self::New => write!(f, "new"),
        }
    }
}

/// Identifying fields of a row being classified
#[derive(Debug, Clone)]
pub struct RowKey<'a> {
    pub date: NaiveDate,
    pub merchant: &'a str,
    pub amount: f64,
    pub reference_id: Option<&'a str>,
    /// Remote expense id, for records coming from the remote service
    pub external_id: Option<&'a str>,
    pub is_refund: bool,
}

impl<'a> From<&'a NewTransaction> for RowKey<'a> {
    fn from(txn: &'a NewTransaction) -> Self {
        Self {
            date: txn.date,
            merchant: &txn.merchant,
            amount: txn.amount,
            reference_id: txn.cc_reference_id.as_deref(),
            external_id: txn.external_id.as_deref(),
            is_refund: txn.is_refund,
        }
    }
}

/// Classifies rows against the ledger and, when configured, the remote service
pub struct DuplicateFilter<'a> {
    db: &'a Database,
    remote: Option<&'a ExpenseClient>,
}

impl<'a> DuplicateFilter<'a> {
    pub fn new(db: &'a Database, remote: Option<&'a ExpenseClient>) -> Self {
        Self { db, remote }
    }

    /// Classify a row
    ///
    /// Remote checks apply to purchases only: a refund shares its purchase's
    /// reference id remotely, so refunds are deduplicated against the ledger.
    pub async fn classify(&self, row: &RowKey<'_>) -> Result<Classification> {
        if let Some(external_id) = row.external_id.filter(|e| !e.is_empty()) {
            if let Some(existing) = self.db.get_by_external_id(external_id)? {
                debug!(external_id, id = existing.id, "Known remote expense");
                return Ok(Classification::ExistsInLedger(existing.id));
            }
        }

        match row.reference_id.filter(|r| !r.trim().is_empty()) {
            Some(reference) => self.classify_by_reference(row, reference).await,
            None => self.classify_fuzzy(row).await,
        }
    }

    async fn classify_by_reference(
        &self,
        row: &RowKey<'_>,
        reference: &str,
    ) -> Result<Classification> {
        if let Some(existing) = self.db.get_by_reference_id(reference, row.is_refund)? {
            debug!(reference, id = existing.id, "Reference id already in ledger");
            return Ok(Classification::ExistsInLedger(existing.id));
        }

        if let Some(remote) = self.remote.filter(|_| !row.is_refund) {
            let window = Duration::days(REMOTE_LOOKUP_WINDOW_DAYS);
            if let Some(expense) = remote
                .find_by_reference(reference, row.date - window, row.date + window)
                .await?
            {
                debug!(reference, remote_id = %expense.id, "Reference id found remotely");
                return Ok(Classification::ExistsRemote(expense.id));
            }
        }

        Ok(Classification::New)
    }

    async fn classify_fuzzy(&self, row: &RowKey<'_>) -> Result<Classification> {
        let candidates: Vec<_> = self
            .db
            .find_potential_duplicates(
                row.date,
                row.merchant,
                row.amount,
                FUZZY_DATE_TOLERANCE_DAYS,
                FUZZY_AMOUNT_TOLERANCE,
            )?
            .into_iter()
            .filter(|t| t.is_refund == row.is_refund)
            .collect();

        if let Some((winner, others)) = candidates.split_first() {
            for other in others {
                self.db
                    .record_duplicate_check(winner.id, other.id, 1.0, None, "auto")?;
            }
            debug!(
                merchant = row.merchant,
                id = winner.id,
                competing = others.len(),
                "Fuzzy ledger duplicate"
            );
            return Ok(Classification::ExistsInLedger(winner.id));
        }

        if let Some(remote) = self.remote.filter(|_| !row.is_refund) {
            let query = FuzzyQuery {
                amount: row.amount,
                date: row.date,
                merchant: Some(row.merchant.to_string()),
            };
            if let Some(expense) = remote.find_fuzzy(&query).await? {
                debug!(merchant = row.merchant, remote_id = %expense.id, "Fuzzy remote duplicate");
                return Ok(Classification::ExistsRemote(expense.id));
            }
        }

        Ok(Classification::New)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransactionSource;
    use crate::remote::{MockExpenseBackend, RemoteExpense};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn remote_expense(id: &str, details: Option<&str>, description: &str) -> RemoteExpense {
        RemoteExpense {
            id: id.to_string(),
            cost: 12.0,
            description: description.to_string(),
            details: details.map(String::from),
            notes: None,
            date: d(2025, 3, 1),
            currency_code: "USD".to_string(),
            category: None,
            users: Vec::new(),
            updated_at: None,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn test_reference_in_ledger_wins() {
        let db = Database::in_memory().unwrap();
        let txn = NewTransaction::new(d(2025, 3, 1), "Cafe", 12.0, TransactionSource::Statement)
            .with_reference("REF12345678");
        let id = db.insert_transaction(&txn).unwrap();

        let mock = MockExpenseBackend::new();
        mock.seed(remote_expense("77", Some("REF12345678"), "Cafe"));
        let client = ExpenseClient::Mock(mock);

        let filter = DuplicateFilter::new(&db, Some(&client));
        let result = filter.classify(&RowKey::from(&txn)).await.unwrap();
        assert_eq!(result, Classification::ExistsInLedger(id));
    }

    #[tokio::test]
    async fn test_reference_found_remotely() {
        let db = Database::in_memory().unwrap();
        let mock = MockExpenseBackend::new();
        mock.seed(remote_expense("77", Some("\"REF12345678\""), "Cafe"));
        let client = ExpenseClient::Mock(mock);

        let txn = NewTransaction::new(d(2025, 3, 3), "Cafe", 12.0, TransactionSource::Statement)
            .with_reference("REF12345678");
        let filter = DuplicateFilter::new(&db, Some(&client));
        let result = filter.classify(&RowKey::from(&txn)).await.unwrap();
        assert_eq!(result, Classification::ExistsRemote("77".to_string()));
        assert_eq!(result.as_str(), "exists_remote");
    }

    #[tokio::test]
    async fn test_referenced_row_never_fuzzy_rejected() {
        let db = Database::in_memory().unwrap();
        db.insert_transaction(
            &NewTransaction::new(d(2025, 3, 1), "Cafe", 12.0, TransactionSource::Statement)
                .with_reference("REFAAAAAAAA"),
        )
        .unwrap();
        let mock = MockExpenseBackend::new();
        mock.seed(remote_expense("78", None, "Cafe"));
        let client = ExpenseClient::Mock(mock);

        // Same merchant, date and amount, different reference
        let txn = NewTransaction::new(d(2025, 3, 1), "Cafe", 12.0, TransactionSource::Statement)
            .with_reference("REFBBBBBBBB");
        let filter = DuplicateFilter::new(&db, Some(&client));
        assert_eq!(
            filter.classify(&RowKey::from(&txn)).await.unwrap(),
            Classification::New
        );
    }

    #[tokio::test]
    async fn test_fuzzy_ledger_tier_records_competitors() {
        let db = Database::in_memory().unwrap();
        let mk = || NewTransaction::new(d(2025, 3, 1), "Cafe", 12.0, TransactionSource::Manual);
        let first = db.insert_transaction(&mk()).unwrap();
        let second = db.insert_transaction(&mk()).unwrap();

        let filter = DuplicateFilter::new(&db, None);
        let result = filter.classify(&RowKey::from(&mk())).await.unwrap();
        assert_eq!(result, Classification::ExistsInLedger(second));

        let checks = db.duplicate_checks_for(first).unwrap();
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].is_duplicate, None);
    }

    #[tokio::test]
    async fn test_fuzzy_remote_tier() {
        let db = Database::in_memory().unwrap();
        let mock = MockExpenseBackend::new();
        mock.seed(remote_expense("79", None, "Corner Cafe"));
        let client = ExpenseClient::Mock(mock);

        let txn = NewTransaction::new(d(2025, 3, 1), "Corner Cafe", 12.0, TransactionSource::Manual);
        let filter = DuplicateFilter::new(&db, Some(&client));
        assert_eq!(
            filter.classify(&RowKey::from(&txn)).await.unwrap(),
            Classification::ExistsRemote("79".to_string())
        );

        let without_remote = DuplicateFilter::new(&db, None);
        assert_eq!(
            without_remote.classify(&RowKey::from(&txn)).await.unwrap(),
            Classification::New
        );
    }

    #[tokio::test]
    async fn test_refund_not_confused_with_purchase() {
        let db = Database::in_memory().unwrap();
        db.insert_transaction(
            &NewTransaction::new(d(2025, 3, 1), "Cafe", 12.0, TransactionSource::Statement)
                .with_reference("REF12345678"),
        )
        .unwrap();

        let refund = NewTransaction::new(d(2025, 3, 9), "Cafe", -12.0, TransactionSource::Statement)
            .with_reference("REF12345678")
            .refund();
        let filter = DuplicateFilter::new(&db, None);
        assert_eq!(
            filter.classify(&RowKey::from(&refund)).await.unwrap(),
            Classification::New
        );

        let id = db.insert_transaction(&refund).unwrap();
        assert_eq!(
            filter.classify(&RowKey::from(&refund)).await.unwrap(),
            Classification::ExistsInLedger(id)
        );
    }

    #[tokio::test]
    async fn test_external_id_lookup() {
        let db = Database::in_memory().unwrap();
        let txn = NewTransaction::new(d(2025, 3, 1), "Cafe", 12.0, TransactionSource::Remote)
            .with_external_id("4242");
        let id = db.insert_transaction(&txn).unwrap();

        let filter = DuplicateFilter::new(&db, None);
        assert_eq!(
            filter.classify(&RowKey::from(&txn)).await.unwrap(),
            Classification::ExistsInLedger(id)
        );
    }
}
