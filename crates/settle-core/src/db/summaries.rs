//! Monthly summary cache and ledger statistics

use chrono::NaiveDate;
use rusqlite::params;

use super::Database;
use crate::error::Result;
use crate::models::{LedgerStats, MonthlySummary};

impl Database {
    /// Insert or replace the cached summary for a month
    pub fn upsert_monthly_summary(&self, summary: &MonthlySummary) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO monthly_summaries (
                year_month, total_spent_net, avg_transaction, transaction_count,
                total_paid, total_owed, cumulative_spending, mom_change
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(year_month) DO UPDATE SET
                total_spent_net = excluded.total_spent_net,
                avg_transaction = excluded.avg_transaction,
                transaction_count = excluded.transaction_count,
                total_paid = excluded.total_paid,
                total_owed = excluded.total_owed,
                cumulative_spending = excluded.cumulative_spending,
                mom_change = excluded.mom_change,
                written_to_sheet = 0,
                calculated_at = CURRENT_TIMESTAMP
            "#,
            params![
                summary.year_month,
                summary.total_spent_net,
                summary.avg_transaction,
                summary.transaction_count,
                summary.total_paid,
                summary.total_owed,
                summary.cumulative_spending,
                summary.mom_change,
            ],
        )?;
        Ok(())
    }

    /// Cached summaries whose month starts with `prefix` (e.g. "2025"), oldest first
    pub fn monthly_summaries(&self, prefix: Option<&str>) -> Result<Vec<MonthlySummary>> {
        let conn = self.conn()?;
        let pattern = format!("{}%", prefix.unwrap_or(""));
        let mut stmt = conn.prepare(
            "SELECT year_month, total_spent_net, avg_transaction, transaction_count,
                    total_paid, total_owed, cumulative_spending, mom_change
             FROM monthly_summaries
             WHERE year_month LIKE ?
             ORDER BY year_month",
        )?;
        let summaries = stmt
            .query_map(params![pattern], |row| {
                Ok(MonthlySummary {
                    year_month: row.get(0)?,
                    total_spent_net: row.get(1)?,
                    avg_transaction: row.get(2)?,
                    transaction_count: row.get(3)?,
                    total_paid: row.get(4)?,
                    total_owed: row.get(5)?,
                    cumulative_spending: row.get(6)?,
                    mom_change: row.get(7)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(summaries)
    }

    /// Flag cached summaries as written to the spreadsheet
    pub fn mark_summaries_written(&self, year_months: &[String]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut updated = 0;
        for year_month in year_months {
            updated += tx.execute(
                "UPDATE monthly_summaries SET written_to_sheet = 1 WHERE year_month = ?",
                params![year_month],
            )?;
        }
        tx.commit()?;
        Ok(updated)
    }

    /// Ledger-wide counts
    pub fn get_stats(&self) -> Result<LedgerStats> {
        let conn = self.conn()?;

        let (total, written, mirrored, deleted): (i64, i64, i64, i64) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(written_to_sheet), 0),
                    COALESCE(SUM(CASE WHEN external_id IS NOT NULL AND external_deleted_at IS NULL THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN external_deleted_at IS NOT NULL THEN 1 ELSE 0 END), 0)
             FROM transactions",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

        let mut stmt = conn.prepare(
            "SELECT source, COUNT(*) FROM transactions GROUP BY source ORDER BY source",
        )?;
        let by_source = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT reconciliation_status, COUNT(*) FROM transactions
             WHERE is_refund = 1 AND reconciliation_status IS NOT NULL
             GROUP BY reconciliation_status
             ORDER BY reconciliation_status",
        )?;
        let refunds_by_status = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let (earliest, latest): (Option<String>, Option<String>) = conn.query_row(
            "SELECT MIN(date), MAX(date) FROM transactions WHERE external_deleted_at IS NULL",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let parse = |s: Option<String>| {
            s.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok())
        };

        Ok(LedgerStats {
            total,
            by_source,
            written_to_sheet: written,
            unwritten: total - written,
            mirrored,
            deleted_remotely: deleted,
            refunds_by_status,
            earliest_date: parse(earliest),
            latest_date: parse(latest),
        })
    }
}
