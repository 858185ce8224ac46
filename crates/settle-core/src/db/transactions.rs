//! Transaction operations

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};

use super::{parse_datetime, Database};
use crate::error::Result;
use crate::models::{NewTransaction, Transaction, TransactionSource, TransactionUpdate};

/// Column list matching `row_to_transaction`
pub(crate) const TRANSACTION_COLUMNS: &str = "id, external_id, date, merchant, amount, raw_amount, currency,
    description, raw_description, category, subcategory, category_id, subcategory_id,
    source, source_file, cc_reference_id, notes, is_shared, is_refund, written_to_sheet,
    sheet_year, external_deleted_at, refund_for_txn_id, refund_for_external_id,
    refund_match_method, reconciliation_status, reconciliation_note, is_partial_refund,
    refund_percentage, refund_created_at, imported_at, updated_at";

impl Database {
    /// Insert a single transaction, returning its id
    pub fn insert_transaction(&self, txn: &NewTransaction) -> Result<i64> {
        let conn = self.conn()?;
        Self::insert_with(&conn, txn)
    }

    /// Insert a batch of transactions atomically (all or nothing)
    pub fn insert_transactions(&self, txns: &[NewTransaction]) -> Result<Vec<i64>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let mut ids = Vec::with_capacity(txns.len());
        for txn in txns {
            ids.push(Self::insert_with(&tx, txn)?);
        }

        tx.commit()?;
        Ok(ids)
    }

    fn insert_with(conn: &rusqlite::Connection, txn: &NewTransaction) -> Result<i64> {
        conn.execute(
            r#"
            INSERT INTO transactions (
                external_id, date, merchant, amount, raw_amount, currency, description,
                raw_description, category, subcategory, category_id, subcategory_id, source,
                source_file, cc_reference_id, notes, is_shared, is_refund, reconciliation_status
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                txn.external_id,
                txn.date.to_string(),
                txn.merchant,
                txn.amount.abs(),
                txn.raw_amount,
                txn.currency,
                txn.description,
                txn.raw_description,
                txn.category,
                txn.subcategory,
                txn.category_id,
                txn.subcategory_id,
                txn.source.as_str(),
                txn.source_file,
                txn.cc_reference_id,
                txn.notes,
                txn.is_shared,
                txn.is_refund,
                txn.initial_status().map(|s| s.as_str()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Helper to convert a row to Transaction (column order: `TRANSACTION_COLUMNS`)
    pub(crate) fn row_to_transaction(row: &rusqlite::Row) -> rusqlite::Result<Transaction> {
        let date_str: String = row.get(2)?;
        let source_str: String = row.get(13)?;
        let deleted_at: Option<String> = row.get(21)?;
        let method_str: Option<String> = row.get(24)?;
        let status_str: Option<String> = row.get(25)?;
        let refund_created_at: Option<String> = row.get(29)?;
        let imported_at: Option<String> = row.get(30)?;
        let updated_at: Option<String> = row.get(31)?;

        Ok(Transaction {
            id: row.get(0)?,
            external_id: row.get(1)?,
            date: NaiveDate::parse_from_str(&date_str, "%Y-%m-%d").unwrap_or_default(),
            merchant: row.get(3)?,
            amount: row.get(4)?,
            raw_amount: row.get(5)?,
            currency: row.get(6)?,
            description: row.get(7)?,
            raw_description: row.get(8)?,
            category: row.get(9)?,
            subcategory: row.get(10)?,
            category_id: row.get(11)?,
            subcategory_id: row.get(12)?,
            source: source_str.parse().unwrap_or_default(),
            source_file: row.get(14)?,
            cc_reference_id: row.get(15)?,
            notes: row.get(16)?,
            is_shared: row.get(17)?,
            is_refund: row.get(18)?,
            written_to_sheet: row.get(19)?,
            sheet_year: row.get(20)?,
            external_deleted_at: deleted_at.as_deref().map(parse_datetime),
            refund_for_txn_id: row.get(22)?,
            refund_for_external_id: row.get(23)?,
            refund_match_method: method_str.and_then(|s| s.parse().ok()),
            reconciliation_status: status_str.and_then(|s| s.parse().ok()),
            reconciliation_note: row.get(26)?,
            is_partial_refund: row.get(27)?,
            refund_percentage: row.get(28)?,
            refund_created_at: refund_created_at.as_deref().map(parse_datetime),
            imported_at: imported_at
                .as_deref()
                .map(parse_datetime)
                .unwrap_or_else(chrono::Utc::now),
            updated_at: updated_at
                .as_deref()
                .map(parse_datetime)
                .unwrap_or_else(chrono::Utc::now),
        })
    }

    /// Run a query returning transactions
    pub(crate) fn query_transactions(
        &self,
        where_clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM transactions {}", TRANSACTION_COLUMNS, where_clause);
        let mut stmt = conn.prepare(&sql)?;
        let transactions = stmt
            .query_map(params, |row| Self::row_to_transaction(row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(transactions)
    }

    /// Get a single transaction by ID (deleted rows included)
    pub fn get_transaction(&self, id: i64) -> Result<Option<Transaction>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM transactions WHERE id = ?", TRANSACTION_COLUMNS);
        let transaction = conn
            .query_row(&sql, params![id], |row| Self::row_to_transaction(row))
            .optional()?;
        Ok(transaction)
    }

    /// Get the active transaction carrying a remote expense id
    pub fn get_by_external_id(&self, external_id: &str) -> Result<Option<Transaction>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM transactions
             WHERE external_id = ? AND external_deleted_at IS NULL",
            TRANSACTION_COLUMNS
        );
        let transaction = conn
            .query_row(&sql, params![external_id], |row| Self::row_to_transaction(row))
            .optional()?;
        Ok(transaction)
    }

    /// Get the most recent active transaction with a statement reference id
    ///
    /// Refunds share reference ids with their purchases, so the lookup is
    /// restricted to rows of the same kind.
    pub fn get_by_reference_id(&self, reference: &str, is_refund: bool) -> Result<Option<Transaction>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM transactions
             WHERE cc_reference_id = ? AND is_refund = ? AND external_deleted_at IS NULL
             ORDER BY date DESC, id DESC
             LIMIT 1",
            TRANSACTION_COLUMNS
        );
        let transaction = conn
            .query_row(&sql, params![reference, is_refund], |row| {
                Self::row_to_transaction(row)
            })
            .optional()?;
        Ok(transaction)
    }

    /// Partially update a transaction; always stamps `updated_at`
    ///
    /// Returns whether a row was affected.
    pub fn update_transaction(&self, id: i64, update: &TransactionUpdate) -> Result<bool> {
        let conn = self.conn()?;

        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(date) = update.date {
            sets.push("date = ?");
            values.push(Box::new(date.to_string()));
        }
        if let Some(merchant) = &update.merchant {
            sets.push("merchant = ?");
            values.push(Box::new(merchant.clone()));
        }
        if let Some(amount) = update.amount {
            sets.push("amount = ?");
            values.push(Box::new(amount.abs()));
        }
        if let Some(raw_amount) = update.raw_amount {
            sets.push("raw_amount = ?");
            values.push(Box::new(raw_amount));
        }
        if let Some(description) = &update.description {
            sets.push("description = ?");
            values.push(Box::new(description.clone()));
        }
        if let Some(category) = &update.category {
            sets.push("category = ?");
            values.push(Box::new(category.clone()));
        }
        if let Some(subcategory) = &update.subcategory {
            sets.push("subcategory = ?");
            values.push(Box::new(subcategory.clone()));
        }
        if let Some(category_id) = update.category_id {
            sets.push("category_id = ?");
            values.push(Box::new(category_id));
        }
        if let Some(subcategory_id) = update.subcategory_id {
            sets.push("subcategory_id = ?");
            values.push(Box::new(subcategory_id));
        }
        if let Some(external_id) = &update.external_id {
            sets.push("external_id = ?");
            values.push(Box::new(external_id.clone()));
        }
        if let Some(notes) = &update.notes {
            sets.push("notes = ?");
            values.push(Box::new(notes.clone()));
        }
        if let Some(is_shared) = update.is_shared {
            sets.push("is_shared = ?");
            values.push(Box::new(is_shared));
        }
        sets.push("updated_at = CURRENT_TIMESTAMP");
        values.push(Box::new(id));

        let sql = format!("UPDATE transactions SET {} WHERE id = ?", sets.join(", "));
        let params_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let affected = conn.execute(&sql, params_refs.as_slice())?;
        Ok(affected > 0)
    }

    /// Transactions between two dates (inclusive), ordered by date then merchant
    pub fn find_in_date_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        include_deleted: bool,
    ) -> Result<Vec<Transaction>> {
        let deleted_filter = if include_deleted {
            ""
        } else {
            "AND external_deleted_at IS NULL"
        };
        self.query_transactions(
            &format!(
                "WHERE date >= ? AND date <= ? {} ORDER BY date, merchant, id",
                deleted_filter
            ),
            params![start.to_string(), end.to_string()],
        )
    }

    /// Fuzzy duplicate candidates: same merchant, date and amount within tolerance
    ///
    /// Most recently updated first. Only a secondary signal; a reference id
    /// match always takes precedence.
    pub fn find_potential_duplicates(
        &self,
        date: NaiveDate,
        merchant: &str,
        amount: f64,
        date_tolerance_days: i64,
        amount_tolerance: f64,
    ) -> Result<Vec<Transaction>> {
        let start = date - chrono::Duration::days(date_tolerance_days);
        let end = date + chrono::Duration::days(date_tolerance_days);
        // Small slack so a 0.01 tolerance survives float representation
        let tolerance = amount_tolerance + 1e-9;
        self.query_transactions(
            "WHERE merchant = ? AND date >= ? AND date <= ?
               AND ABS(amount - ?) <= ?
               AND external_deleted_at IS NULL
             ORDER BY updated_at DESC, id DESC",
            params![
                merchant,
                start.to_string(),
                end.to_string(),
                amount.abs(),
                tolerance
            ],
        )
    }

    /// Mark a transaction as removed from the remote service (the row is kept)
    pub fn mark_external_deleted(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let affected = conn.execute(
            "UPDATE transactions
             SET external_deleted_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP
             WHERE id = ? AND external_deleted_at IS NULL",
            params![id],
        )?;
        Ok(affected > 0)
    }

    /// Active purchases that have no remote expense yet
    pub fn unmirrored_transactions(&self) -> Result<Vec<Transaction>> {
        self.query_transactions(
            "WHERE external_id IS NULL AND is_refund = 0 AND external_deleted_at IS NULL
             ORDER BY date, id",
            params![],
        )
    }

    /// Active transactions of a year not yet written to the sheet
    pub fn unwritten_transactions(&self, year: i32) -> Result<Vec<Transaction>> {
        self.query_transactions(
            "WHERE written_to_sheet = 0 AND external_deleted_at IS NULL
               AND strftime('%Y', date) = ?
             ORDER BY date, merchant, id",
            params![format!("{:04}", year)],
        )
    }

    /// Flag transactions as exported to the sheet for a year
    pub fn mark_written_to_sheet(&self, ids: &[i64], year: i32) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut updated = 0;
        for id in ids {
            updated += tx.execute(
                "UPDATE transactions
                 SET written_to_sheet = 1, sheet_year = ?, updated_at = CURRENT_TIMESTAMP
                 WHERE id = ?",
                params![year, id],
            )?;
        }
        tx.commit()?;
        Ok(updated)
    }

    /// All transactions from one source, deleted rows included
    pub fn transactions_by_source(&self, source: TransactionSource) -> Result<Vec<Transaction>> {
        self.query_transactions("WHERE source = ? ORDER BY date, id", params![source.as_str()])
    }

    /// Latest active purchase of each merchant, optionally within a date range
    pub fn latest_purchase_per_merchant(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<Transaction>> {
        let start = start.map(|d| d.to_string());
        let end = end.map(|d| d.to_string());
        self.query_transactions(
            "WHERE id IN (
                SELECT MAX(id) FROM transactions
                WHERE is_refund = 0 AND external_deleted_at IS NULL
                  AND (?1 IS NULL OR date >= ?1) AND (?2 IS NULL OR date <= ?2)
                GROUP BY merchant
             )
             ORDER BY merchant",
            params![start, end],
        )
    }

    /// Count total transactions
    pub fn count_transactions(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;
        Ok(count)
    }
}
