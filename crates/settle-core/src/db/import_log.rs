//! Import log and duplicate-check operations

use rusqlite::params;

use super::{parse_datetime, Database};
use crate::error::Result;
use crate::models::{DuplicateCheck, ImportLog, ImportSourceType, NewImportLog};

impl Database {
    /// Append a batch record to the import log
    pub fn insert_import_log(&self, log: &NewImportLog) -> Result<i64> {
        let conn = self.conn()?;
        let metadata = log
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        conn.execute(
            r#"
            INSERT INTO import_log (
                source_type, source_identifier, records_attempted, records_imported,
                records_skipped, records_failed, error_message, metadata
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                log.source_type.as_str(),
                log.source_identifier,
                log.records_attempted,
                log.records_imported,
                log.records_skipped,
                log.records_failed,
                log.error_message,
                metadata,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent import log entries, optionally for one source type
    pub fn import_history(
        &self,
        source_type: Option<ImportSourceType>,
        limit: i64,
    ) -> Result<Vec<ImportLog>> {
        let conn = self.conn()?;

        let mut sql = String::from(
            "SELECT id, timestamp, source_type, source_identifier, records_attempted,
                    records_imported, records_skipped, records_failed, error_message, metadata
             FROM import_log",
        );
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(source) = source_type {
            sql.push_str(" WHERE source_type = ?");
            values.push(Box::new(source.as_str()));
        }
        sql.push_str(" ORDER BY timestamp DESC, id DESC LIMIT ?");
        values.push(Box::new(limit));

        let params_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let logs = stmt
            .query_map(params_refs.as_slice(), |row| {
                let timestamp: Option<String> = row.get(1)?;
                let source_str: String = row.get(2)?;
                let metadata: Option<String> = row.get(9)?;
                Ok(ImportLog {
                    id: row.get(0)?,
                    timestamp: timestamp
                        .as_deref()
                        .map(parse_datetime)
                        .unwrap_or_else(chrono::Utc::now),
                    source_type: source_str.parse().unwrap_or(ImportSourceType::Manual),
                    source_identifier: row.get(3)?,
                    records_attempted: row.get(4)?,
                    records_imported: row.get(5)?,
                    records_skipped: row.get(6)?,
                    records_failed: row.get(7)?,
                    error_message: row.get(8)?,
                    metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(logs)
    }

    /// Record a fuzzy duplicate decision between two ledger rows
    ///
    /// The pair is stored in ascending id order; re-recording a pair updates it.
    pub fn record_duplicate_check(
        &self,
        txn_id_1: i64,
        txn_id_2: i64,
        similarity_score: f64,
        is_duplicate: Option<bool>,
        resolved_by: &str,
    ) -> Result<()> {
        let (first, second) = if txn_id_1 <= txn_id_2 {
            (txn_id_1, txn_id_2)
        } else {
            (txn_id_2, txn_id_1)
        };
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO duplicate_checks (txn_id_1, txn_id_2, similarity_score, is_duplicate, resolved_by)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(txn_id_1, txn_id_2) DO UPDATE SET
                similarity_score = excluded.similarity_score,
                is_duplicate = excluded.is_duplicate,
                resolved_by = excluded.resolved_by,
                checked_at = CURRENT_TIMESTAMP
            "#,
            params![first, second, similarity_score, is_duplicate, resolved_by],
        )?;
        Ok(())
    }

    /// Duplicate decisions involving a transaction
    pub fn duplicate_checks_for(&self, txn_id: i64) -> Result<Vec<DuplicateCheck>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, txn_id_1, txn_id_2, similarity_score, is_duplicate, resolved_by, checked_at
             FROM duplicate_checks
             WHERE txn_id_1 = ? OR txn_id_2 = ?
             ORDER BY id",
        )?;
        let checks = stmt
            .query_map(params![txn_id, txn_id], |row| {
                let checked_at: Option<String> = row.get(6)?;
                Ok(DuplicateCheck {
                    id: row.get(0)?,
                    txn_id_1: row.get(1)?,
                    txn_id_2: row.get(2)?,
                    similarity_score: row.get(3)?,
                    is_duplicate: row.get(4)?,
                    resolved_by: row.get(5)?,
                    checked_at: checked_at
                        .as_deref()
                        .map(parse_datetime)
                        .unwrap_or_else(chrono::Utc::now),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(checks)
    }
}
