//! Spreadsheet collaborator
//!
//! # Architecture
//!
//! - `SpreadsheetService` trait: read and write rows of a named tab
//! - `CsvWorkbook`: local implementation, one directory per sheet and one
//!   CSV file per tab
//!
//! Writes go through a temp file in the tab's directory and are persisted
//! with a rename, so a tab is never left half-written.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, Result};

/// One spreadsheet row keyed by header
pub type SheetRecord = BTreeMap<String, String>;

/// How `write_rows` treats existing rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace the tab's contents
    Overwrite,
    /// Keep existing rows (and their header order), add the new ones after
    Append,
}

/// Trait for spreadsheet backends
pub trait SpreadsheetService: Send + Sync {
    /// Human-readable name for this backend
    fn name(&self) -> &str;

    /// All rows of a tab; an absent tab has no rows
    fn read_rows(&self, sheet: &str, tab: &str) -> Result<Vec<SheetRecord>>;

    /// Write rows to a tab, returning how many were written
    fn write_rows(
        &self,
        sheet: &str,
        tab: &str,
        headers: &[&str],
        records: &[SheetRecord],
        mode: WriteMode,
    ) -> Result<usize>;
}

/// Spreadsheet stored as a directory of CSV files
pub struct CsvWorkbook {
    root: PathBuf,
}

impl CsvWorkbook {
    /// Open a workbook root, creating the directory if needed
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.exists() {
            fs::create_dir_all(&root).map_err(|e| {
                Error::Sheets(format!(
                    "Failed to create workbook directory {}: {}",
                    root.display(),
                    e
                ))
            })?;
            info!("Created workbook directory: {}", root.display());
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the CSV file backing a tab
    pub fn tab_path(&self, sheet: &str, tab: &str) -> Result<PathBuf> {
        Ok(self
            .root
            .join(safe_name(sheet)?)
            .join(format!("{}.csv", safe_name(tab)?)))
    }

    fn read_tab(path: &Path) -> Result<(Vec<String>, Vec<SheetRecord>)> {
        if !path.exists() {
            return Ok((Vec::new(), Vec::new()));
        }

        let mut reader = csv::Reader::from_path(path)?;
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

        let mut records = Vec::new();
        for row in reader.records() {
            let row = row?;
            let record: SheetRecord = headers
                .iter()
                .zip(row.iter())
                .map(|(h, v)| (h.clone(), v.to_string()))
                .collect();
            records.push(record);
        }
        Ok((headers, records))
    }
}

/// Sheet and tab names become path components
fn safe_name(name: &str) -> Result<String> {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return Err(Error::Sheets(format!("Invalid sheet or tab name: {:?}", name)));
    }
    Ok(cleaned)
}

impl SpreadsheetService for CsvWorkbook {
    fn name(&self) -> &str {
        "csv"
    }

    fn read_rows(&self, sheet: &str, tab: &str) -> Result<Vec<SheetRecord>> {
        let (_, records) = Self::read_tab(&self.tab_path(sheet, tab)?)?;
        Ok(records)
    }

    fn write_rows(
        &self,
        sheet: &str,
        tab: &str,
        headers: &[&str],
        records: &[SheetRecord],
        mode: WriteMode,
    ) -> Result<usize> {
        let path = self.tab_path(sheet, tab)?;
        let dir = path
            .parent()
            .ok_or_else(|| Error::Sheets(format!("No parent directory for {}", path.display())))?;
        fs::create_dir_all(dir)?;

        let (columns, existing) = match mode {
            WriteMode::Append => {
                let (existing_headers, existing) = Self::read_tab(&path)?;
                if existing_headers.is_empty() {
                    (headers.iter().map(|h| h.to_string()).collect(), existing)
                } else {
                    (existing_headers, existing)
                }
            }
            WriteMode::Overwrite => (headers.iter().map(|h| h.to_string()).collect(), Vec::new()),
        };

        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut writer = csv::Writer::from_writer(temp.as_file_mut());
            writer.write_record(&columns)?;
            for record in existing.iter().chain(records) {
                writer.write_record(
                    columns
                        .iter()
                        .map(|c| record.get(c).map(String::as_str).unwrap_or("")),
                )?;
            }
            writer.flush()?;
        }
        temp.as_file_mut().flush()?;
        temp.persist(&path)
            .map_err(|e| Error::Sheets(format!("Failed to write {}: {}", path.display(), e)))?;

        debug!(
            sheet,
            tab,
            written = records.len(),
            kept = existing.len(),
            "Wrote workbook tab"
        );
        Ok(records.len())
    }
}

/// Ensure an empty tab exists with the given headers
pub fn ensure_tab(service: &dyn SpreadsheetService, sheet: &str, tab: &str, headers: &[&str]) -> Result<()> {
    service.write_rows(sheet, tab, headers, &[], WriteMode::Append)?;
    Ok(())
}

/// Default workbook directory
pub fn default_workbook_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("settle")
        .join("sheets")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(pairs: &[(&str, &str)]) -> SheetRecord {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn setup() -> (TempDir, CsvWorkbook) {
        let dir = TempDir::new().unwrap();
        let workbook = CsvWorkbook::new(dir.path().join("book")).unwrap();
        (dir, workbook)
    }

    #[test]
    fn test_missing_tab_reads_empty() {
        let (_dir, workbook) = setup();
        assert!(workbook.read_rows("Expenses 2025", "2025").unwrap().is_empty());
    }

    #[test]
    fn test_overwrite_then_append() {
        let (_dir, workbook) = setup();
        let headers = ["Date", "Amount"];

        workbook
            .write_rows(
                "Expenses",
                "2025",
                &headers,
                &[record(&[("Date", "2025-01-02"), ("Amount", "10.00")])],
                WriteMode::Overwrite,
            )
            .unwrap();
        workbook
            .write_rows(
                "Expenses",
                "2025",
                // Header order differs; the existing order is kept
                &["Amount", "Date"],
                &[record(&[("Date", "2025-01-03"), ("Amount", "-4.00")])],
                WriteMode::Append,
            )
            .unwrap();

        let rows = workbook.read_rows("Expenses", "2025").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["Amount"], "-4.00");

        let raw = fs::read_to_string(workbook.tab_path("Expenses", "2025").unwrap()).unwrap();
        assert!(raw.starts_with("Date,Amount"));

        workbook
            .write_rows("Expenses", "2025", &headers, &[], WriteMode::Overwrite)
            .unwrap();
        assert!(workbook.read_rows("Expenses", "2025").unwrap().is_empty());
    }

    #[test]
    fn test_rejects_bad_names() {
        let (_dir, workbook) = setup();
        assert!(workbook.read_rows("..", "tab").is_err());
        assert!(workbook.tab_path("a/b", "c").unwrap().ends_with("a_b/c.csv"));
    }

    #[test]
    fn test_ensure_tab_keeps_rows() {
        let (_dir, workbook) = setup();
        workbook
            .write_rows(
                "S",
                "Summary",
                &["Month"],
                &[record(&[("Month", "2025-01")])],
                WriteMode::Overwrite,
            )
            .unwrap();
        ensure_tab(&workbook, "S", "Summary", &["Month"]).unwrap();
        assert_eq!(workbook.read_rows("S", "Summary").unwrap().len(), 1);
    }
}
