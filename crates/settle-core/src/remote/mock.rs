//! Mock backend for testing
//!
//! Keeps expenses in memory and supports failure injection so the refund
//! and import paths can be exercised without a running service.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use crate::error::{Error, Result};

use super::types::{NewExpense, RemoteCategory, RemoteExpense, RemoteSubcategory};
use super::ExpenseService;

/// Participant ids used when none are configured
pub const MOCK_USER_ID: i64 = 1;
pub const MOCK_SELF_EXPENSE_ID: i64 = 2;

#[derive(Default)]
struct MockState {
    expenses: BTreeMap<String, RemoteExpense>,
    next_id: u64,
    created: Vec<NewExpense>,
    create_error: Option<String>,
    get_error: Option<String>,
}

/// In-memory expense backend
///
/// Clones share state, so a test can keep a handle while the engine owns another.
#[derive(Clone)]
pub struct MockExpenseBackend {
    state: Arc<Mutex<MockState>>,
    user_id: i64,
    self_expense_id: i64,
}

impl Default for MockExpenseBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExpenseBackend {
    pub fn new() -> Self {
        Self::with_ids(MOCK_USER_ID, MOCK_SELF_EXPENSE_ID)
    }

    pub fn with_ids(user_id: i64, self_expense_id: i64) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                next_id: 1000,
                ..Default::default()
            })),
            user_id,
            self_expense_id,
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, MockState>> {
        self.state
            .lock()
            .map_err(|_| Error::Remote("Mock backend state lock poisoned".into()))
    }

    // Test helpers recover a poisoned lock instead of failing
    fn state_unchecked(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store an expense as-is (keeps its id)
    pub fn seed(&self, expense: RemoteExpense) {
        self.state_unchecked()
            .expenses
            .insert(expense.id.clone(), expense);
    }

    /// Mark an expense deleted; returns whether it existed
    pub fn delete(&self, id: &str) -> bool {
        match self.state_unchecked().expenses.get_mut(id) {
            Some(expense) => {
                expense.deleted_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    /// Make subsequent `create_expense` calls fail with `message` (None to clear)
    pub fn fail_creates(&self, message: Option<&str>) {
        self.state_unchecked().create_error = message.map(String::from);
    }

    /// Make subsequent `get_expense` calls fail with `message` (None to clear)
    pub fn fail_gets(&self, message: Option<&str>) {
        self.state_unchecked().get_error = message.map(String::from);
    }

    /// Every expense passed to `create_expense`, in call order
    pub fn created(&self) -> Vec<NewExpense> {
        self.state_unchecked().created.clone()
    }

    /// Raw stored expense, deleted ones included
    pub fn stored(&self, id: &str) -> Option<RemoteExpense> {
        self.state_unchecked().expenses.get(id).cloned()
    }

    /// Number of stored expenses, deleted ones included
    pub fn len(&self) -> usize {
        self.state_unchecked().expenses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ExpenseService for MockExpenseBackend {
    async fn create_expense(&self, expense: &NewExpense) -> Result<String> {
        let mut state = self.state()?;
        if let Some(message) = &state.create_error {
            return Err(Error::Remote(message.clone()));
        }

        let id = state.next_id.to_string();
        state.next_id += 1;
        state.created.push(expense.clone());
        state
            .expenses
            .insert(id.clone(), RemoteExpense::from_new(&id, expense, Utc::now()));
        Ok(id)
    }

    async fn get_expense(&self, id: &str) -> Result<Option<RemoteExpense>> {
        let state = self.state()?;
        if let Some(message) = &state.get_error {
            return Err(Error::Remote(message.clone()));
        }
        Ok(state.expenses.get(id).filter(|e| !e.is_deleted()).cloned())
    }

    async fn list_expenses(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<RemoteExpense>> {
        let state = self.state()?;
        let mut expenses: Vec<RemoteExpense> = state
            .expenses
            .values()
            .filter(|e| e.date >= start && e.date <= end)
            .cloned()
            .collect();
        expenses.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
        Ok(expenses)
    }

    async fn list_categories(&self) -> Result<Vec<RemoteCategory>> {
        let sub = |id: i64, name: &str| RemoteSubcategory {
            id,
            name: name.to_string(),
        };
        Ok(vec![
            RemoteCategory {
                id: 2,
                name: "Uncategorized".to_string(),
                subcategories: vec![sub(18, "General")],
            },
            RemoteCategory {
                id: 25,
                name: "Food and drink".to_string(),
                subcategories: vec![sub(12, "Groceries"), sub(13, "Dining out")],
            },
        ])
    }

    fn current_user_id(&self) -> i64 {
        self.user_id
    }

    fn self_expense_id(&self) -> i64 {
        self.self_expense_id
    }

    fn host(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::default_purchase_shares;

    fn new_expense(cost: f64) -> NewExpense {
        NewExpense {
            cost,
            description: "Shop".to_string(),
            details: "REF12345678".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            currency_code: "USD".to_string(),
            category_id: Some(18),
            notes: None,
            users: default_purchase_shares(cost, MOCK_USER_ID, MOCK_SELF_EXPENSE_ID),
        }
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let mock = MockExpenseBackend::new();
        let id = mock.create_expense(&new_expense(12.0)).await.unwrap();

        let fetched = mock.get_expense(&id).await.unwrap().unwrap();
        assert_eq!(fetched.cost, 12.0);
        assert_eq!(fetched.reference_id().as_deref(), Some("REF12345678"));
        assert_eq!(mock.created().len(), 1);

        assert!(mock.delete(&id));
        assert!(mock.get_expense(&id).await.unwrap().is_none());
        assert!(mock.stored(&id).unwrap().is_deleted());
        assert!(!mock.delete("missing"));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let mock = MockExpenseBackend::new();
        mock.fail_creates(Some("rate limited"));
        let err = mock.create_expense(&new_expense(5.0)).await.unwrap_err();
        assert!(err.to_string().contains("rate limited"));
        assert!(mock.is_empty());

        mock.fail_creates(None);
        assert!(mock.create_expense(&new_expense(5.0)).await.is_ok());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let mock = MockExpenseBackend::new();
        let handle = mock.clone();
        mock.create_expense(&new_expense(1.0)).await.unwrap();
        assert_eq!(handle.len(), 1);
    }
}
