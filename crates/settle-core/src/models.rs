//! Domain models for settle

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Currency assumed when a statement or remote record does not carry one
pub const DEFAULT_CURRENCY: &str = "USD";

/// Transaction source - how it entered the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransactionSource {
    /// Imported from a credit-card statement file
    #[default]
    Statement,
    /// Pulled from the remote shared-expense service
    Remote,
    /// Manually entered
    Manual,
    /// Loaded back from a spreadsheet tab
    Sheets,
}

impl TransactionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Statement => "statement",
            Self::Remote => "remote",
            Self::Manual => "manual",
            Self::Sheets => "sheets",
        }
    }
}

impl std::str::FromStr for TransactionSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "statement" | "csv" => Ok(Self::Statement),
            "remote" => Ok(Self::Remote),
            "manual" => Ok(Self::Manual),
            "sheets" | "sheets_import" => Ok(Self::Sheets),
            _ => Err(format!("Unknown transaction source: {}", s)),
        }
    }
}

impl std::fmt::Display for TransactionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Refund reconciliation state
///
/// `Pending` is the only non-terminal state. Rows never leave a terminal
/// state except through an explicit operator reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    #[default]
    Pending,
    Matched,
    Unmatched,
    ManualReview,
}

impl ReconciliationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Matched => "matched",
            Self::Unmatched => "unmatched",
            Self::ManualReview => "manual_review",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::str::FromStr for ReconciliationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "matched" => Ok(Self::Matched),
            "unmatched" => Ok(Self::Unmatched),
            "manual_review" | "manual-review" => Ok(Self::ManualReview),
            _ => Err(format!("Unknown reconciliation status: {}", s)),
        }
    }
}

impl std::fmt::Display for ReconciliationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a refund was tied to its original purchase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundMatchMethod {
    /// Same statement reference id as the purchase
    ReferenceId,
    /// Same merchant, within the date window, amount large enough
    MerchantAmountWindow,
    /// Linked by the operator
    Manual,
}

impl RefundMatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReferenceId => "reference_id",
            Self::MerchantAmountWindow => "merchant_amount_window",
            Self::Manual => "manual",
        }
    }
}

impl std::str::FromStr for RefundMatchMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reference_id" => Ok(Self::ReferenceId),
            "merchant_amount_window" => Ok(Self::MerchantAmountWindow),
            "manual" => Ok(Self::Manual),
            _ => Err(format!("Unknown refund match method: {}", s)),
        }
    }
}

impl std::fmt::Display for RefundMatchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A ledger transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    /// Remote shared-expense id (unique among non-deleted rows)
    pub external_id: Option<String>,
    pub date: NaiveDate,
    pub merchant: String,
    /// Always a positive magnitude; refunds are flagged with `is_refund`
    pub amount: f64,
    /// Amount as it appeared before normalization (signed)
    pub raw_amount: Option<f64>,
    pub currency: String,
    pub description: Option<String>,
    pub raw_description: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub category_id: Option<i64>,
    pub subcategory_id: Option<i64>,
    pub source: TransactionSource,
    pub source_file: Option<String>,
    /// Statement line reference, primary dedup key when present
    pub cc_reference_id: Option<String>,
    pub notes: Option<String>,
    pub is_shared: bool,
    pub is_refund: bool,
    pub written_to_sheet: bool,
    pub sheet_year: Option<i32>,
    pub external_deleted_at: Option<DateTime<Utc>>,
    pub refund_for_txn_id: Option<i64>,
    pub refund_for_external_id: Option<String>,
    pub refund_match_method: Option<RefundMatchMethod>,
    /// Only set on refund rows
    pub reconciliation_status: Option<ReconciliationStatus>,
    pub reconciliation_note: Option<String>,
    pub is_partial_refund: bool,
    pub refund_percentage: Option<f64>,
    pub refund_created_at: Option<DateTime<Utc>>,
    pub imported_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Whether the row is still active (not removed from the remote service)
    pub fn is_active(&self) -> bool {
        self.external_deleted_at.is_none()
    }

    /// Amount as shown in exports: negative for refunds
    pub fn signed_amount(&self) -> f64 {
        if self.is_refund {
            -self.amount.abs()
        } else {
            self.amount
        }
    }

    /// Flatten into a JSON record (field names match the ledger columns)
    pub fn to_record(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Rebuild a transaction from a record produced by `to_record`
    pub fn from_record(record: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(record)?)
    }
}

/// A new transaction to be inserted (before the ledger assigns an id)
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub date: NaiveDate,
    pub merchant: String,
    pub amount: f64,
    pub raw_amount: Option<f64>,
    pub currency: String,
    pub description: Option<String>,
    pub raw_description: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub category_id: Option<i64>,
    pub subcategory_id: Option<i64>,
    pub source: TransactionSource,
    pub source_file: Option<String>,
    pub cc_reference_id: Option<String>,
    pub external_id: Option<String>,
    pub notes: Option<String>,
    pub is_shared: bool,
    pub is_refund: bool,
}

impl NewTransaction {
    /// Create a transaction with the required fields; everything else starts empty
    ///
    /// The amount is normalized to its magnitude. Use `refund()` to flag credits.
    pub fn new(date: NaiveDate, merchant: &str, amount: f64, source: TransactionSource) -> Self {
        Self {
            date,
            merchant: merchant.to_string(),
            amount: amount.abs(),
            raw_amount: Some(amount),
            currency: DEFAULT_CURRENCY.to_string(),
            description: None,
            raw_description: None,
            category: None,
            subcategory: None,
            category_id: None,
            subcategory_id: None,
            source,
            source_file: None,
            cc_reference_id: None,
            external_id: None,
            notes: None,
            is_shared: false,
            is_refund: false,
        }
    }

    pub fn with_reference(mut self, reference: &str) -> Self {
        self.cc_reference_id = Some(reference.to_string());
        self
    }

    pub fn with_external_id(mut self, external_id: &str) -> Self {
        self.external_id = Some(external_id.to_string());
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn refund(mut self) -> Self {
        self.is_refund = true;
        self
    }

    /// Reconciliation status a freshly inserted row starts in
    pub fn initial_status(&self) -> Option<ReconciliationStatus> {
        self.is_refund.then_some(ReconciliationStatus::Pending)
    }
}

/// Partial update of a transaction; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionUpdate {
    pub date: Option<NaiveDate>,
    pub merchant: Option<String>,
    pub amount: Option<f64>,
    pub raw_amount: Option<f64>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub category_id: Option<i64>,
    pub subcategory_id: Option<i64>,
    pub external_id: Option<String>,
    pub notes: Option<String>,
    pub is_shared: Option<bool>,
}

impl TransactionUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Linkage written onto a refund row once its original is confirmed
#[derive(Debug, Clone, PartialEq)]
pub struct RefundLink {
    pub original_id: i64,
    pub original_external_id: Option<String>,
    /// Remote expense created for the refund itself
    pub refund_external_id: Option<String>,
    pub method: RefundMatchMethod,
    pub percentage: f64,
    pub is_partial: bool,
}

/// Source of an import batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportSourceType {
    Csv,
    RemoteApi,
    Sheets,
    Manual,
}

impl ImportSourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::RemoteApi => "remote_api",
            Self::Sheets => "sheets",
            Self::Manual => "manual",
        }
    }
}

impl std::str::FromStr for ImportSourceType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "remote_api" | "remote" => Ok(Self::RemoteApi),
            "sheets" => Ok(Self::Sheets),
            "manual" => Ok(Self::Manual),
            _ => Err(format!("Unknown import source type: {}", s)),
        }
    }
}

impl std::fmt::Display for ImportSourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Audit record of one batch ingestion (append-only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportLog {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub source_type: ImportSourceType,
    pub source_identifier: Option<String>,
    pub records_attempted: i64,
    pub records_imported: i64,
    pub records_skipped: i64,
    pub records_failed: i64,
    pub error_message: Option<String>,
    /// Free-form JSON with batch details
    pub metadata: Option<serde_json::Value>,
}

/// A new import log entry
#[derive(Debug, Clone)]
pub struct NewImportLog {
    pub source_type: ImportSourceType,
    pub source_identifier: Option<String>,
    pub records_attempted: i64,
    pub records_imported: i64,
    pub records_skipped: i64,
    pub records_failed: i64,
    pub error_message: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Recorded fuzzy duplicate decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateCheck {
    pub id: i64,
    pub txn_id_1: i64,
    pub txn_id_2: i64,
    pub similarity_score: Option<f64>,
    pub is_duplicate: Option<bool>,
    pub resolved_by: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Ledger-wide counts
#[derive(Debug, Clone, Default, Serialize)]
pub struct LedgerStats {
    pub total: i64,
    pub by_source: Vec<(String, i64)>,
    pub written_to_sheet: i64,
    pub unwritten: i64,
    pub mirrored: i64,
    pub deleted_remotely: i64,
    pub refunds_by_status: Vec<(String, i64)>,
    pub earliest_date: Option<NaiveDate>,
    pub latest_date: Option<NaiveDate>,
}

/// Cached summary of one month of spending
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlySummary {
    /// YYYY-MM
    pub year_month: String,
    pub total_spent_net: f64,
    pub avg_transaction: f64,
    pub transaction_count: i64,
    pub total_paid: f64,
    pub total_owed: f64,
    pub cumulative_spending: f64,
    /// Month-over-month change in percent (0 for the first month)
    pub mom_change: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminality() {
        assert!(!ReconciliationStatus::Pending.is_terminal());
        assert!(ReconciliationStatus::Matched.is_terminal());
        assert!(ReconciliationStatus::Unmatched.is_terminal());
        assert!(ReconciliationStatus::ManualReview.is_terminal());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(
            "manual_review".parse::<ReconciliationStatus>().unwrap(),
            ReconciliationStatus::ManualReview
        );
        assert!("bogus".parse::<ReconciliationStatus>().is_err());
        assert_eq!(ReconciliationStatus::Matched.to_string(), "matched");
    }

    #[test]
    fn test_new_transaction_normalizes_amount() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let tx = NewTransaction::new(date, "Shop", -12.5, TransactionSource::Statement).refund();
        assert_eq!(tx.amount, 12.5);
        assert_eq!(tx.raw_amount, Some(-12.5));
        assert_eq!(tx.initial_status(), Some(ReconciliationStatus::Pending));

        let purchase = NewTransaction::new(date, "Shop", 10.0, TransactionSource::Manual);
        assert_eq!(purchase.initial_status(), None);
    }

    #[test]
    fn test_match_method_serde_names() {
        let json = serde_json::to_string(&RefundMatchMethod::MerchantAmountWindow).unwrap();
        assert_eq!(json, "\"merchant_amount_window\"");
    }
}
