//! Ledger access layer with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `transactions` - Transaction CRUD, range and duplicate queries
//! - `refunds` - Refund candidate queries and reconciliation state transitions
//! - `import_log` - Append-only batch audit log and duplicate-check records
//! - `summaries` - Cached monthly summaries and ledger stats

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::{debug, info};

use crate::error::{Error, Result};

mod import_log;
mod refunds;
mod summaries;
mod transactions;

pub use refunds::{RefundCandidate, RefundQuery, DEFAULT_REFUND_WINDOW_DAYS, REFUND_EPSILON};

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Environment variable for database encryption key
pub const DB_KEY_ENV: &str = "SETTLE_DB_KEY";

/// Columns added to `transactions` after the first schema version.
/// Older ledgers get them through `ALTER TABLE` on open.
const REFUND_COLUMNS: &[(&str, &str)] = &[
    ("refund_for_txn_id", "INTEGER REFERENCES transactions(id)"),
    ("refund_for_external_id", "TEXT"),
    ("refund_created_at", "DATETIME"),
    ("reconciliation_status", "TEXT"),
    ("refund_match_method", "TEXT"),
    ("is_partial_refund", "BOOLEAN NOT NULL DEFAULT 0"),
    ("refund_percentage", "REAL"),
    ("reconciliation_note", "TEXT"),
];

/// Derive an encryption key from a passphrase using Argon2
///
/// Uses a fixed application salt so the same passphrase always produces the same key,
/// regardless of database path.
fn derive_key(passphrase: &str) -> Result<String> {
    use argon2::{password_hash::SaltString, Argon2, PasswordHasher};

    // Changing this invalidates every existing encrypted ledger
    const APP_SALT: &[u8; 16] = b"settle-ledger-v1";

    let salt = SaltString::encode_b64(APP_SALT)
        .map_err(|e| Error::Encryption(format!("Failed to create salt: {}", e)))?;

    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(passphrase.as_bytes(), &salt)
        .map_err(|e| Error::Encryption(format!("Failed to derive key: {}", e)))?;

    let hash_str = hash
        .hash
        .ok_or_else(|| Error::Encryption("No hash output".to_string()))?;
    Ok(hex::encode(hash_str.as_bytes()))
}

/// Parse a SQLite datetime string into a DateTime<Utc>
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    // SQLite stores as "YYYY-MM-DD HH:MM:SS" format
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

/// Ledger database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    /// Path to the database file
    db_path: String,
}

impl Database {
    /// Open an encrypted ledger
    ///
    /// Requires `SETTLE_DB_KEY` environment variable to be set. Returns an error
    /// if it is missing; use `new_unencrypted()` for development/testing.
    pub fn new(path: &str) -> Result<Self> {
        let encryption_key = std::env::var(DB_KEY_ENV).ok();
        match encryption_key {
            Some(key) => Self::new_with_key(path, Some(&key)),
            None => Err(Error::Encryption(format!(
                "Ledger encryption required. Set {} environment variable with your passphrase, \
                or use --no-encrypt for an unencrypted ledger.",
                DB_KEY_ENV
            ))),
        }
    }

    /// Open an unencrypted ledger (development and tests)
    pub fn new_unencrypted(path: &str) -> Result<Self> {
        Self::new_with_key(path, None)
    }

    /// Open a ledger with an explicit encryption passphrase
    pub fn new_with_key(path: &str, passphrase: Option<&str>) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);

        let pool = if let Some(pass) = passphrase {
            let key = derive_key(pass)?;
            let key_pragma = format!("PRAGMA key = 'x\"{}\"';", key);

            // Every pooled connection needs the key before first use
            let manager = manager.with_init(move |conn| {
                conn.execute_batch(&key_pragma)?;
                Ok(())
            });

            Pool::builder().max_size(10).build(manager)?
        } else {
            Pool::builder().max_size(10).build(manager)?
        };

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create a throwaway ledger (for testing)
    ///
    /// Note: Uses a temporary file rather than `:memory:` because SQLCipher
    /// has issues with in-memory databases in the connection pool.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "settle_test_{}_{}.db",
            std::process::id(),
            id
        ));
        let path = path.to_string_lossy().to_string();

        let _ = std::fs::remove_file(&path);

        Self::new_unencrypted(&path)
    }

    /// Check if the database is encrypted
    pub fn is_encrypted(&self) -> Result<bool> {
        let conn = self.conn()?;
        // SQLCipher sets cipher_version if encryption is active
        let result: rusqlite::Result<String> =
            conn.query_row("PRAGMA cipher_version;", [], |row| row.get(0));
        Ok(result.is_ok() && std::env::var(DB_KEY_ENV).is_ok())
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- WAL mode: readers don't block the batch writer
            PRAGMA journal_mode = WAL;
            PRAGMA cache_size = 2000;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;

            -- Ledger transactions
            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY,
                external_id TEXT,                          -- remote shared-expense id
                date DATE NOT NULL,
                merchant TEXT NOT NULL,
                amount REAL NOT NULL,                      -- positive magnitude
                raw_amount REAL,                           -- signed, as imported
                currency TEXT NOT NULL DEFAULT 'USD',
                description TEXT,
                raw_description TEXT,
                category TEXT,
                subcategory TEXT,
                category_id INTEGER,
                subcategory_id INTEGER,
                source TEXT NOT NULL DEFAULT 'statement',  -- statement, remote, manual, sheets
                source_file TEXT,
                cc_reference_id TEXT,
                notes TEXT,
                is_shared BOOLEAN NOT NULL DEFAULT 0,
                is_refund BOOLEAN NOT NULL DEFAULT 0,
                written_to_sheet BOOLEAN NOT NULL DEFAULT 0,
                sheet_year INTEGER,
                external_deleted_at DATETIME,              -- set when removed remotely
                imported_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_transactions_date ON transactions(date);
            CREATE INDEX IF NOT EXISTS idx_transactions_merchant ON transactions(merchant);
            CREATE INDEX IF NOT EXISTS idx_transactions_category ON transactions(category);
            CREATE INDEX IF NOT EXISTS idx_transactions_source ON transactions(source);
            CREATE INDEX IF NOT EXISTS idx_transactions_written ON transactions(written_to_sheet);
            CREATE INDEX IF NOT EXISTS idx_transactions_date_merchant ON transactions(date, merchant);
            CREATE INDEX IF NOT EXISTS idx_transactions_cc_reference ON transactions(cc_reference_id);
            CREATE INDEX IF NOT EXISTS idx_transactions_is_refund ON transactions(is_refund);

            -- One live row per remote expense
            CREATE UNIQUE INDEX IF NOT EXISTS idx_transactions_external_id
                ON transactions(external_id)
                WHERE external_id IS NOT NULL AND external_deleted_at IS NULL;

            -- Batch audit log (append-only)
            CREATE TABLE IF NOT EXISTS import_log (
                id INTEGER PRIMARY KEY,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
                source_type TEXT NOT NULL,                 -- csv, remote_api, sheets, manual
                source_identifier TEXT,
                records_attempted INTEGER NOT NULL DEFAULT 0,
                records_imported INTEGER NOT NULL DEFAULT 0,
                records_skipped INTEGER NOT NULL DEFAULT 0,
                records_failed INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                metadata TEXT                              -- JSON
            );

            CREATE INDEX IF NOT EXISTS idx_import_log_timestamp ON import_log(timestamp);
            CREATE INDEX IF NOT EXISTS idx_import_log_source ON import_log(source_type);

            -- Fuzzy duplicate decisions
            CREATE TABLE IF NOT EXISTS duplicate_checks (
                id INTEGER PRIMARY KEY,
                txn_id_1 INTEGER NOT NULL REFERENCES transactions(id),
                txn_id_2 INTEGER NOT NULL REFERENCES transactions(id),
                similarity_score REAL,
                checked_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                is_duplicate BOOLEAN,                      -- NULL = pending review
                resolved_by TEXT,                          -- auto, manual
                UNIQUE(txn_id_1, txn_id_2)
            );

            -- Cached monthly summaries
            CREATE TABLE IF NOT EXISTS monthly_summaries (
                id INTEGER PRIMARY KEY,
                year_month TEXT NOT NULL UNIQUE,           -- YYYY-MM
                total_spent_net REAL NOT NULL,
                avg_transaction REAL NOT NULL,
                transaction_count INTEGER NOT NULL,
                total_paid REAL NOT NULL,
                total_owed REAL NOT NULL,
                cumulative_spending REAL NOT NULL,
                mom_change REAL NOT NULL,
                written_to_sheet BOOLEAN NOT NULL DEFAULT 0,
                calculated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )?;

        let added = Self::add_missing_columns(&conn, "transactions", REFUND_COLUMNS)?;
        if added > 0 {
            info!("Added {} refund tracking columns to transactions", added);
        }

        conn.execute_batch(
            r#"
            CREATE INDEX IF NOT EXISTS idx_refund_for_txn ON transactions(refund_for_txn_id);
            CREATE INDEX IF NOT EXISTS idx_reconciliation_status ON transactions(reconciliation_status);
            "#,
        )?;

        info!("Database schema initialized");
        Ok(())
    }

    /// Add any of `columns` that the table does not have yet; returns how many were added
    fn add_missing_columns(
        conn: &rusqlite::Connection,
        table: &str,
        columns: &[(&str, &str)],
    ) -> Result<usize> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
        let existing: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut added = 0;
        for (name, definition) in columns {
            if existing.iter().any(|c| c == name) {
                continue;
            }
            debug!("Adding column {}.{}", table, name);
            conn.execute(
                &format!("ALTER TABLE {} ADD COLUMN {} {}", table, name, definition),
                [],
            )?;
            added += 1;
        }
        Ok(added)
    }
}
