//! Remote shared-expense service abstraction
//!
//! # Architecture
//!
//! - `ExpenseService` trait: the operations the reconciliation engine needs
//! - `ExpenseClient` enum: concrete wrapper providing Clone + compile-time dispatch
//! - Backend implementations: `HttpExpenseBackend`, `MockExpenseBackend`
//!
//! # Configuration
//!
//! Environment variables:
//! - `REMOTE_BACKEND`: Backend to use (http, mock). Default: http
//! - `SETTLE_REMOTE_URL`: Service base URL (required for http backend)
//! - `SETTLE_REMOTE_TOKEN`: Bearer token (required for http backend)
//! - `SETTLE_REMOTE_USER_ID`: The user's id on the service
//! - `SETTLE_REMOTE_SELF_EXPENSE_ID`: Id of the self-expense account

mod http;
mod mock;
pub mod types;

pub use http::HttpExpenseBackend;
pub use mock::MockExpenseBackend;
pub use types::*;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::error::Result;

/// Relative tolerance for fuzzy amount comparison
pub const FUZZY_AMOUNT_RTOL: f64 = 1e-5;
const FUZZY_AMOUNT_ATOL: f64 = 1e-8;

/// Trait defining the interface for remote expense backends
#[async_trait]
pub trait ExpenseService: Send + Sync {
    /// Create an expense, returning its remote id
    async fn create_expense(&self, expense: &NewExpense) -> Result<String>;

    /// Fetch one expense; `None` when absent or deleted
    async fn get_expense(&self, id: &str) -> Result<Option<RemoteExpense>>;

    /// Expenses dated within `[start, end]`, deleted ones included
    async fn list_expenses(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<RemoteExpense>>;

    /// The service's category table
    async fn list_categories(&self) -> Result<Vec<RemoteCategory>>;

    /// The user's participant id
    fn current_user_id(&self) -> i64;

    /// Participant id of the self-expense account
    fn self_expense_id(&self) -> i64;

    /// Get the host URL (for logging)
    fn host(&self) -> &str;

    /// Find a live expense whose `details` equal the reference id
    ///
    /// Several hits resolve to the most recently updated.
    async fn find_by_reference(
        &self,
        reference: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<RemoteExpense>> {
        let wanted = clean_reference(reference);
        if wanted.is_empty() {
            return Ok(None);
        }

        let matches: Vec<RemoteExpense> = self
            .list_expenses(start, end)
            .await?
            .into_iter()
            .filter(|e| !e.is_deleted() && e.reference_id().as_deref() == Some(wanted.as_str()))
            .collect();

        if matches.len() > 1 {
            warn!(
                reference = %wanted,
                count = matches.len(),
                "Multiple remote expenses carry the same reference id"
            );
        }
        Ok(most_recently_updated(matches))
    }

    /// Find a live expense without its own reference id by amount, date and merchant
    async fn find_fuzzy(&self, query: &FuzzyQuery) -> Result<Option<RemoteExpense>> {
        let candidates: Vec<RemoteExpense> = self
            .list_expenses(query.date, query.date)
            .await?
            .into_iter()
            .filter(|e| {
                !e.is_deleted()
                    && e.reference_id().is_none()
                    && e.date == query.date
                    && amounts_close(e.cost.abs(), query.amount.abs())
            })
            .collect();

        let merchant = query
            .merchant
            .as_deref()
            .map(|m| m.trim().to_lowercase())
            .filter(|m| !m.is_empty());

        let candidates = match merchant {
            Some(m) => {
                let by_merchant: Vec<RemoteExpense> = candidates
                    .iter()
                    .filter(|e| e.description.to_lowercase().contains(&m))
                    .cloned()
                    .collect();
                if by_merchant.is_empty() {
                    candidates
                } else {
                    by_merchant
                }
            }
            None => candidates,
        };

        if !candidates.is_empty() {
            debug!(count = candidates.len(), "Fuzzy remote candidates found");
        }
        Ok(most_recently_updated(candidates))
    }
}

/// `|a - b| <= atol + rtol * |b|`
pub fn amounts_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= FUZZY_AMOUNT_ATOL + FUZZY_AMOUNT_RTOL * b.abs()
}

fn most_recently_updated(expenses: Vec<RemoteExpense>) -> Option<RemoteExpense> {
    expenses.into_iter().max_by(|a, b| a.updated_at.cmp(&b.updated_at))
}

/// Concrete expense client enum
///
/// Provides Clone and compile-time dispatch without Box<dyn> overhead.
#[derive(Clone)]
pub enum ExpenseClient {
    /// JSON over HTTP
    Http(HttpExpenseBackend),
    /// In-memory backend for testing
    Mock(MockExpenseBackend),
}

impl ExpenseClient {
    /// Create an expense client from environment variables
    ///
    /// Returns None if the required environment variables are not set.
    pub fn from_env() -> Option<Self> {
        let backend = std::env::var("REMOTE_BACKEND").unwrap_or_else(|_| "http".to_string());

        match backend.to_lowercase().as_str() {
            "http" => HttpExpenseBackend::from_env().map(ExpenseClient::Http),
            "mock" => Some(ExpenseClient::Mock(MockExpenseBackend::new())),
            _ => {
                warn!(backend = %backend, "Unknown REMOTE_BACKEND, falling back to http");
                HttpExpenseBackend::from_env().map(ExpenseClient::Http)
            }
        }
    }

    /// Create an HTTP backend directly
    pub fn http(base_url: &str, token: &str, user_id: i64, self_expense_id: i64) -> Self {
        ExpenseClient::Http(HttpExpenseBackend::new(
            base_url,
            token,
            user_id,
            self_expense_id,
        ))
    }

    /// Create a mock backend for testing
    pub fn mock() -> Self {
        ExpenseClient::Mock(MockExpenseBackend::new())
    }
}

// Implement ExpenseService for ExpenseClient by delegating to the inner backend
#[async_trait]
impl ExpenseService for ExpenseClient {
    async fn create_expense(&self, expense: &NewExpense) -> Result<String> {
        match self {
            ExpenseClient::Http(b) => b.create_expense(expense).await,
            ExpenseClient::Mock(b) => b.create_expense(expense).await,
        }
    }

    async fn get_expense(&self, id: &str) -> Result<Option<RemoteExpense>> {
        match self {
            ExpenseClient::Http(b) => b.get_expense(id).await,
            ExpenseClient::Mock(b) => b.get_expense(id).await,
        }
    }

    async fn list_expenses(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<RemoteExpense>> {
        match self {
            ExpenseClient::Http(b) => b.list_expenses(start, end).await,
            ExpenseClient::Mock(b) => b.list_expenses(start, end).await,
        }
    }

    async fn list_categories(&self) -> Result<Vec<RemoteCategory>> {
        match self {
            ExpenseClient::Http(b) => b.list_categories().await,
            ExpenseClient::Mock(b) => b.list_categories().await,
        }
    }

    fn current_user_id(&self) -> i64 {
        match self {
            ExpenseClient::Http(b) => b.current_user_id(),
            ExpenseClient::Mock(b) => b.current_user_id(),
        }
    }

    fn self_expense_id(&self) -> i64 {
        match self {
            ExpenseClient::Http(b) => b.self_expense_id(),
            ExpenseClient::Mock(b) => b.self_expense_id(),
        }
    }

    fn host(&self) -> &str {
        match self {
            ExpenseClient::Http(b) => b.host(),
            ExpenseClient::Mock(b) => b.host(),
        }
    }
}
