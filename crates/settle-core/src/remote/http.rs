//! HTTP backend implementation
//!
//! JSON API with bearer-token auth:
//! - `POST /create_expense` -> `{"expenses": [...], "errors": {...}}`
//! - `GET /get_expense/{id}` -> `{"expense": {...}}`
//! - `GET /get_expenses?dated_after=..&dated_before=..` -> `{"expenses": [...]}`
//! - `GET /get_categories` -> `{"categories": [...]}`

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::types::{NewExpense, RemoteCategory, RemoteExpense};
use super::ExpenseService;

/// Environment variable names
pub const REMOTE_URL_ENV: &str = "SETTLE_REMOTE_URL";
pub const REMOTE_TOKEN_ENV: &str = "SETTLE_REMOTE_TOKEN";
pub const REMOTE_USER_ID_ENV: &str = "SETTLE_REMOTE_USER_ID";
pub const REMOTE_SELF_EXPENSE_ID_ENV: &str = "SETTLE_REMOTE_SELF_EXPENSE_ID";

/// Expense service reached over HTTP
#[derive(Clone)]
pub struct HttpExpenseBackend {
    http_client: Client,
    base_url: String,
    token: String,
    user_id: i64,
    self_expense_id: i64,
}

impl HttpExpenseBackend {
    pub fn new(base_url: &str, token: &str, user_id: i64, self_expense_id: i64) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            user_id,
            self_expense_id,
        }
    }

    /// Create from environment variables
    ///
    /// Required: `SETTLE_REMOTE_URL`, `SETTLE_REMOTE_TOKEN`, `SETTLE_REMOTE_USER_ID`,
    /// `SETTLE_REMOTE_SELF_EXPENSE_ID`
    pub fn from_env() -> Option<Self> {
        let url = std::env::var(REMOTE_URL_ENV).ok()?;
        let token = std::env::var(REMOTE_TOKEN_ENV).ok()?;
        let user_id = parse_id_env(REMOTE_USER_ID_ENV)?;
        let self_expense_id = parse_id_env(REMOTE_SELF_EXPENSE_ID_ENV)?;
        Some(Self::new(&url, &token, user_id, self_expense_id))
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("Authorization", format!("Bearer {}", self.token))
    }

    async fn checked(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(Error::Remote(format!("Remote API error {}: {}", status, body)))
    }
}

fn parse_id_env(name: &str) -> Option<i64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(id) => Some(id),
        Err(_) => {
            warn!(variable = name, value = %raw, "Ignoring non-numeric remote id");
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExpensesResponse {
    #[serde(default)]
    expenses: Vec<RemoteExpense>,
    #[serde(default)]
    errors: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ExpenseResponse {
    expense: RemoteExpense,
}

#[derive(Debug, Deserialize)]
struct CategoriesResponse {
    #[serde(default)]
    categories: Vec<RemoteCategory>,
}

/// Whether an `errors` payload actually reports something
fn has_errors(errors: &Option<serde_json::Value>) -> bool {
    match errors {
        None | Some(serde_json::Value::Null) => false,
        Some(serde_json::Value::Object(map)) => !map.is_empty(),
        Some(serde_json::Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    }
}

#[async_trait]
impl ExpenseService for HttpExpenseBackend {
    async fn create_expense(&self, expense: &NewExpense) -> Result<String> {
        let response = self
            .authorized(
                self.http_client
                    .post(format!("{}/create_expense", self.base_url))
                    .json(expense),
            )
            .send()
            .await?;
        let body: ExpensesResponse = Self::checked(response).await?.json().await?;

        if has_errors(&body.errors) {
            return Err(Error::Remote(format!(
                "Expense creation rejected: {}",
                body.errors.unwrap_or_default()
            )));
        }

        let created = body
            .expenses
            .into_iter()
            .next()
            .ok_or_else(|| Error::Remote("No expense returned from create".into()))?;
        debug!(id = %created.id, "Created remote expense");
        Ok(created.id)
    }

    async fn get_expense(&self, id: &str) -> Result<Option<RemoteExpense>> {
        let response = self
            .authorized(
                self.http_client
                    .get(format!("{}/get_expense/{}", self.base_url, id)),
            )
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: ExpenseResponse = Self::checked(response).await?.json().await?;
        Ok(Some(body.expense).filter(|e| !e.is_deleted()))
    }

    async fn list_expenses(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<RemoteExpense>> {
        let response = self
            .authorized(
                self.http_client
                    .get(format!("{}/get_expenses", self.base_url))
                    .query(&[
                        ("dated_after", start.to_string()),
                        ("dated_before", end.to_string()),
                        ("limit", "0".to_string()),
                    ]),
            )
            .send()
            .await?;
        let body: ExpensesResponse = Self::checked(response).await?.json().await?;
        debug!(count = body.expenses.len(), %start, %end, "Listed remote expenses");
        Ok(body.expenses)
    }

    async fn list_categories(&self) -> Result<Vec<RemoteCategory>> {
        let response = self
            .authorized(
                self.http_client
                    .get(format!("{}/get_categories", self.base_url)),
            )
            .send()
            .await?;
        let body: CategoriesResponse = Self::checked(response).await?.json().await?;
        Ok(body.categories)
    }

    fn current_user_id(&self) -> i64 {
        self.user_id
    }

    fn self_expense_id(&self) -> i64 {
        self.self_expense_id
    }

    fn host(&self) -> &str {
        &self.base_url
    }
}
