//! Test utilities for settle-core
//!
//! This module provides a mock remote expense server that speaks the same JSON
//! API as `HttpExpenseBackend`, for development and tests.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::remote::{NewExpense, RemoteExpense};

/// Token accepted by `MockRemoteServer::start`
pub const MOCK_TOKEN: &str = "secret";

#[derive(Default)]
struct ServerState {
    token: String,
    expenses: BTreeMap<String, RemoteExpense>,
    next_id: u64,
    reject_creates: bool,
}

type Shared = Arc<Mutex<ServerState>>;

/// Mock remote expense server for testing and development
pub struct MockRemoteServer {
    addr: SocketAddr,
    state: Shared,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockRemoteServer {
    /// Start the mock server on an available port
    pub async fn start() -> Self {
        Self::start_with_token(MOCK_TOKEN).await
    }

    /// Start the mock server accepting a specific bearer token
    pub async fn start_with_token(token: &str) -> Self {
        let state: Shared = Arc::new(Mutex::new(ServerState {
            token: token.to_string(),
            next_id: 5000,
            ..Default::default()
        }));

        let app = Router::new()
            .route("/create_expense", post(handle_create))
            .route("/get_expense/:id", get(handle_get))
            .route("/get_expenses", get(handle_list))
            .route("/get_categories", get(handle_categories))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the base URL for this mock server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Store an expense as-is
    pub fn seed(&self, expense: RemoteExpense) {
        self.state
            .lock()
            .unwrap()
            .expenses
            .insert(expense.id.clone(), expense);
    }

    /// Mark an expense deleted
    pub fn delete(&self, id: &str) {
        if let Some(expense) = self.state.lock().unwrap().expenses.get_mut(id) {
            expense.deleted_at = Some(Utc::now());
        }
    }

    /// Answer creates with an `errors` payload instead of an expense
    pub fn reject_creates(&self, reject: bool) {
        self.state.lock().unwrap().reject_creates = reject;
    }

    /// Number of stored expenses
    pub fn expense_count(&self) -> usize {
        self.state.lock().unwrap().expenses.len()
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockRemoteServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn authorized(state: &Shared, headers: &HeaderMap) -> Result<(), StatusCode> {
    let expected = format!("Bearer {}", state.lock().unwrap().token);
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some(value) if value == expected => Ok(()),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

/// Create endpoint
async fn handle_create(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(expense): Json<NewExpense>,
) -> Result<Json<Value>, StatusCode> {
    authorized(&state, &headers)?;
    let mut guard = state.lock().unwrap();

    if guard.reject_creates {
        return Ok(Json(json!({
            "expenses": [],
            "errors": {"base": ["Expense rejected by mock server"]}
        })));
    }

    let id = guard.next_id.to_string();
    guard.next_id += 1;
    let stored = RemoteExpense::from_new(&id, &expense, Utc::now());
    guard.expenses.insert(id, stored.clone());

    Ok(Json(json!({ "expenses": [stored], "errors": {} })))
}

/// Single expense endpoint
async fn handle_get(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    authorized(&state, &headers)?;
    let guard = state.lock().unwrap();
    match guard.expenses.get(&id) {
        Some(expense) => Ok(Json(json!({ "expense": expense }))),
        None => Err(StatusCode::NOT_FOUND),
    }
}

#[derive(Debug, Deserialize)]
struct ListParams {
    dated_after: Option<NaiveDate>,
    dated_before: Option<NaiveDate>,
}

/// Expense listing endpoint
async fn handle_list(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, StatusCode> {
    authorized(&state, &headers)?;
    let guard = state.lock().unwrap();
    let expenses: Vec<&RemoteExpense> = guard
        .expenses
        .values()
        .filter(|e| params.dated_after.map_or(true, |start| e.date >= start))
        .filter(|e| params.dated_before.map_or(true, |end| e.date <= end))
        .collect();
    Ok(Json(json!({ "expenses": expenses })))
}

/// Category table endpoint
async fn handle_categories(
    State(state): State<Shared>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    authorized(&state, &headers)?;
    Ok(Json(json!({
        "categories": [
            {"id": 2, "name": "Uncategorized", "subcategories": [{"id": 18, "name": "General"}]},
            {"id": 25, "name": "Food and drink", "subcategories": [
                {"id": 12, "name": "Groceries"},
                {"id": 13, "name": "Dining out"}
            ]}
        ]
    })))
}
