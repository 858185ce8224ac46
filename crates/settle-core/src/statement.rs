//! Credit-card statement parsing
//!
//! Produces normalized rows from a statement CSV. Columns are found by header
//! name (Date, Description, Amount, and optionally Category, Reference or
//! Extended Details); when the required ones cannot be found the first three
//! columns are used. Amounts come out as positive magnitudes with credits
//! flagged, payment rows and fee adjustments are filtered, and reference ids are
//! pulled out of the reference/detail column.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::models::{NewTransaction, TransactionSource};

/// Minimum length of a usable statement reference id
pub const MIN_REFERENCE_LEN: usize = 8;

const REFERENCE_PREFIXES: &[&str] = &["REF:", "REFERENCE:", "TXN:", "TRANS:", "ID:"];
const REFUND_KEYWORDS: &[&str] = &["refund", "credit", "return", "reversal", "chargeback"];
const PAYMENT_KEYWORDS: &[&str] = &["payment", "autopay", "thank you", "settle"];

fn payment_row_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bAUTOPAY\b|\bPAYMENT\s*-\s*THANK\s*YOU\b|\bPOINTS\s+FOR\s+AMEX\b")
            .expect("valid regex")
    })
}

/// Sign convention of the statement's amount column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AmountConvention {
    /// Charges positive, credits negative (Amex style)
    #[default]
    CreditsNegative,
    /// Charges negative, credits positive (checking-account style)
    DebitsNegative,
}

impl std::str::FromStr for AmountConvention {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "credits-negative" | "amex" => Ok(Self::CreditsNegative),
            "debits-negative" | "bofa" => Ok(Self::DebitsNegative),
            _ => Err(format!("Unknown amount convention: {}", s)),
        }
    }
}

/// A normalized statement row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatementRow {
    /// 1-based data line number (header excluded)
    pub line: usize,
    pub date: NaiveDate,
    pub description: String,
    /// Positive magnitude
    pub amount: f64,
    /// As it appeared in the file
    pub raw_amount: f64,
    pub detail: Option<String>,
    pub category: Option<String>,
    pub cc_reference_id: Option<String>,
    pub is_credit: bool,
    pub is_refund: bool,
}

impl StatementRow {
    /// Map onto a new ledger transaction with the given display merchant
    pub fn to_transaction(&self, merchant: &str, source_file: Option<&str>) -> NewTransaction {
        let mut txn = NewTransaction::new(self.date, merchant, self.amount, TransactionSource::Statement);
        txn.raw_amount = Some(self.raw_amount);
        txn.description = Some(self.description.clone());
        txn.raw_description = Some(match &self.detail {
            Some(detail) => format!("{} | {}", self.description, detail),
            None => self.description.clone(),
        });
        txn.cc_reference_id = self.cc_reference_id.clone();
        txn.source_file = source_file.map(str::to_string);
        txn.is_refund = self.is_refund;
        txn
    }
}

/// A row that could not be parsed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedRow {
    pub line: usize,
    pub reason: String,
}

/// Why a parsed row was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterReason {
    /// Card payment / autopay
    Payment,
    /// "Fees & Adjustments" lines
    FeeAdjustment,
    /// A credit that is not a refund
    Credit,
}

/// A row filtered out as not being a spend or refund
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilteredRow {
    pub line: usize,
    pub description: String,
    pub reason: FilterReason,
}

/// Parsed statement
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParsedStatement {
    pub rows: Vec<StatementRow>,
    pub rejected: Vec<RejectedRow>,
    pub filtered: Vec<FilteredRow>,
}

impl ParsedStatement {
    pub fn refund_count(&self) -> usize {
        self.rows.iter().filter(|r| r.is_refund).count()
    }
}

/// Column positions found in the header
#[derive(Debug, Clone, PartialEq)]
struct ColumnMap {
    date: usize,
    description: usize,
    amount: usize,
    category: Option<usize>,
    detail: Option<usize>,
}

impl ColumnMap {
    fn detect(headers: &StringRecord) -> Result<Self> {
        let names: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
        let exact = |name: &str| names.iter().position(|h| h == name);
        let containing = |term: &str| names.iter().position(|h| h.contains(term));

        let date = exact("date").or_else(|| containing("date"));
        let description = exact("description").or_else(|| containing("description"));
        let amount = exact("amount").or_else(|| containing("amount"));
        let category = exact("category");
        let detail = exact("reference")
            .or_else(|| exact("extended details"))
            .or_else(|| containing("reference"));

        match (date, description, amount) {
            (Some(date), Some(description), Some(amount)) => Ok(Self {
                date,
                description,
                amount,
                category,
                detail,
            }),
            _ if names.len() >= 3 => {
                debug!("Statement headers not recognized, using first three columns");
                Ok(Self {
                    date: 0,
                    description: 1,
                    amount: 2,
                    category,
                    detail,
                })
            }
            _ => Err(Error::Import(format!(
                "Statement needs date, description and amount columns (found {} columns)",
                names.len()
            ))),
        }
    }
}

/// Parse a statement file
pub fn parse_statement_file(path: &Path, convention: AmountConvention) -> Result<ParsedStatement> {
    let file = File::open(path)?;
    let parsed = parse_statement(file, convention)?;
    info!(
        "Parsed {} rows from {} ({} refunds, {} filtered, {} rejected)",
        parsed.rows.len(),
        path.display(),
        parsed.refund_count(),
        parsed.filtered.len(),
        parsed.rejected.len()
    );
    Ok(parsed)
}

/// Parse statement CSV data
pub fn parse_statement<R: Read>(reader: R, convention: AmountConvention) -> Result<ParsedStatement> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let columns = ColumnMap::detect(&headers)?;
    let mut parsed = ParsedStatement::default();

    for (idx, result) in rdr.records().enumerate() {
        let line = idx + 1;
        let record = result?;
        let field = |i: usize| record.get(i).map(str::trim).unwrap_or("");
        let optional = |i: Option<usize>| {
            i.map(field)
                .filter(|v| !is_placeholder(v))
                .map(str::to_string)
        };

        let date = match parse_date(field(columns.date)) {
            Ok(d) => d,
            Err(e) => {
                parsed.rejected.push(RejectedRow {
                    line,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let raw_amount = match parse_amount(field(columns.amount)) {
            Ok(a) => a,
            Err(e) => {
                parsed.rejected.push(RejectedRow {
                    line,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let description = field(columns.description).to_string();
        let category = optional(columns.category);
        let detail = optional(columns.detail);

        let is_fee = [Some(description.as_str()), category.as_deref()]
            .into_iter()
            .flatten()
            .any(|text| text.to_lowercase().contains("fees & adjustments"));
        if is_fee {
            parsed.filtered.push(FilteredRow {
                line,
                description,
                reason: FilterReason::FeeAdjustment,
            });
            continue;
        }
        if payment_row_re().is_match(&description) {
            parsed.filtered.push(FilteredRow {
                line,
                description,
                reason: FilterReason::Payment,
            });
            continue;
        }

        let is_credit = match convention {
            AmountConvention::CreditsNegative => raw_amount < 0.0,
            AmountConvention::DebitsNegative => raw_amount > 0.0,
        };
        let is_refund = is_credit && is_likely_refund(&description, category.as_deref());
        if is_credit && !is_refund {
            parsed.filtered.push(FilteredRow {
                line,
                description,
                reason: FilterReason::Credit,
            });
            continue;
        }

        let cc_reference_id = detail.as_deref().and_then(extract_reference_id);

        parsed.rows.push(StatementRow {
            line,
            date,
            description,
            amount: raw_amount.abs(),
            raw_amount,
            detail,
            category,
            cc_reference_id,
            is_credit,
            is_refund,
        });
    }

    debug!(
        "Parsed {} statement rows ({} filtered, {} rejected)",
        parsed.rows.len(),
        parsed.filtered.len(),
        parsed.rejected.len()
    );
    Ok(parsed)
}

/// A credit is a refund when its text carries a refund keyword and no payment keyword
pub fn is_likely_refund(description: &str, category: Option<&str>) -> bool {
    let text = format!("{} {}", description, category.unwrap_or("")).to_lowercase();
    if PAYMENT_KEYWORDS.iter().any(|kw| text.contains(kw)) {
        return false;
    }
    REFUND_KEYWORDS.iter().any(|kw| text.contains(kw))
}

/// Extract a statement reference id from a reference/detail field
///
/// Strips known prefixes, keeps alphanumerics, and requires at least
/// [`MIN_REFERENCE_LEN`] characters.
pub fn extract_reference_id(detail: &str) -> Option<String> {
    let mut detail = detail.trim();
    if is_placeholder(detail) {
        return None;
    }

    for prefix in REFERENCE_PREFIXES {
        if detail.len() >= prefix.len()
            && detail.is_char_boundary(prefix.len())
            && detail[..prefix.len()].eq_ignore_ascii_case(prefix)
        {
            detail = detail[prefix.len()..].trim();
        }
    }

    let reference: String = detail.chars().filter(|c| c.is_alphanumeric()).collect();
    (reference.chars().count() >= MIN_REFERENCE_LEN).then_some(reference)
}

fn is_placeholder(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "" | "none" | "null" | "nan" | "n/a"
    )
}

/// Parse a date in common statement formats
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    let s = s.trim();

    let formats = [
        "%m/%d/%Y", // 01/15/2024
        "%m/%d/%y", // 01/15/24
        "%Y-%m-%d", // 2024-01-15
        "%m-%d-%Y", // 01-15-2024
        "%d/%m/%Y", // 15/01/2024
    ];

    for fmt in formats {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(date);
        }
    }

    Err(Error::Import(format!("Unable to parse date: {}", s)))
}

/// Parse an amount string, handling currency symbols, commas and (negative) parentheses
pub fn parse_amount(s: &str) -> Result<f64> {
    let cleaned: String = s
        .trim()
        .replace(['$', ',', ' '], "")
        .replace('(', "-")
        .replace(')', "");

    cleaned
        .parse::<f64>()
        .ok()
        .filter(|a| a.is_finite())
        .ok_or_else(|| Error::Import(format!("Unable to parse amount: {}", s)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const AMEX: &str = "\
Date,Description,Amount,Extended Details,Category,Reference
03/01/2025,TRADER JOE'S #123 SAN FRANCISCO CA,45.20,,Merchandise & Supplies-Groceries,'320250600123456789'
03/02/2025,AUTOPAY PAYMENT - THANK YOU,-500.00,,,
03/03/2025,BLUE BOTTLE COFFEE REFUND,(4.50),,Restaurant-Restaurant,REF: 3202506009988
03/04/2025,STATEMENT CREDIT OFFER,-25.00,,Fees & Adjustments-Fees & Adjustments,
03/05/2025,Fees & Adjustments,1.00,,,
not-a-date,BROKEN,1.00,,,
03/06/2025,NO AMOUNT,abc,,,
03/07/2025,CAFE CREDIT REVERSAL,-3.00,,,ABC
03/08/2025,BALANCE TRANSFER,-10.00,,,
";

    #[test]
    fn test_parse_amex_statement() {
        let parsed = parse_statement(AMEX.as_bytes(), AmountConvention::CreditsNegative).unwrap();

        assert_eq!(parsed.rows.len(), 3);
        assert_eq!(parsed.rejected.len(), 2);
        assert_eq!(parsed.rejected[0].line, 6);

        let tj = &parsed.rows[0];
        assert_eq!(tj.amount, 45.20);
        assert!(!tj.is_refund);
        assert_eq!(tj.category.as_deref(), Some("Merchandise & Supplies-Groceries"));
        assert_eq!(tj.cc_reference_id.as_deref(), Some("320250600123456789"));

        let refund = &parsed.rows[1];
        assert!(refund.is_credit && refund.is_refund);
        assert_eq!(refund.amount, 4.50);
        assert_eq!(refund.raw_amount, -4.50);
        assert_eq!(refund.cc_reference_id.as_deref(), Some("3202506009988"));

        // Reference shorter than 8 characters is dropped
        let reversal = &parsed.rows[2];
        assert!(reversal.is_refund);
        assert_eq!(reversal.cc_reference_id, None);
    }

    #[test]
    fn test_filtered_rows() {
        let parsed = parse_statement(AMEX.as_bytes(), AmountConvention::CreditsNegative).unwrap();
        let reasons: Vec<FilterReason> = parsed.filtered.iter().map(|f| f.reason).collect();
        assert_eq!(
            reasons,
            vec![
                FilterReason::Payment,
                FilterReason::FeeAdjustment,
                FilterReason::FeeAdjustment,
                FilterReason::Credit,
            ]
        );
    }

    #[test]
    fn test_debits_negative_convention() {
        let csv = "Posted Date,Payee,Amount\n01/15/2024,COFFEE SHOP,-4.25\n01/16/2024,MERCHANT REFUND,10.00\n";
        let parsed = parse_statement(csv.as_bytes(), AmountConvention::DebitsNegative).unwrap();
        assert_eq!(parsed.rows.len(), 2);
        assert!(!parsed.rows[0].is_refund);
        assert_eq!(parsed.rows[0].amount, 4.25);
        assert!(parsed.rows[1].is_refund);
    }

    #[test]
    fn test_headerless_fallback_to_first_columns() {
        let csv = "When,What,HowMuch\n2024-01-15,Shop,12.00\n";
        let parsed = parse_statement(csv.as_bytes(), AmountConvention::CreditsNegative).unwrap();
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0].description, "Shop");
    }

    #[test]
    fn test_too_few_columns() {
        let err = parse_statement("A,B\n1,2\n".as_bytes(), AmountConvention::CreditsNegative);
        assert!(err.is_err());
    }

    #[test]
    fn test_is_likely_refund() {
        assert!(is_likely_refund("AMAZON RETURN", None));
        assert!(is_likely_refund("SHOP", Some("Chargeback")));
        assert!(!is_likely_refund("ONLINE PAYMENT CREDIT", None));
        assert!(!is_likely_refund("SHOP", None));
    }

    #[test]
    fn test_extract_reference_id() {
        assert_eq!(extract_reference_id("REF: 123456789").as_deref(), Some("123456789"));
        assert_eq!(extract_reference_id("txn:TXN123ABC456").as_deref(), Some("TXN123ABC456"));
        assert_eq!(extract_reference_id("'3202-5060-0123'").as_deref(), Some("320250600123"));
        assert_eq!(extract_reference_id("1234567"), None);
        assert_eq!(extract_reference_id("N/A"), None);
        assert_eq!(extract_reference_id(""), None);
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date("01/15/2024").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
        );
        assert_eq!(
            parse_date("2024-01-15").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
        );
        assert!(parse_date("yesterday").is_err());
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("$1,234.56").unwrap(), 1234.56);
        assert_eq!(parse_amount("(50.00)").unwrap(), -50.0);
        assert_eq!(parse_amount("-12.5").unwrap(), -12.5);
        assert!(parse_amount("abc").is_err());
        assert!(parse_amount("").is_err());
    }

    #[test]
    fn test_row_to_transaction() {
        let parsed = parse_statement(AMEX.as_bytes(), AmountConvention::CreditsNegative).unwrap();
        let txn = parsed.rows[1].to_transaction("Blue Bottle Coffee Refund", Some("amex.csv"));
        assert!(txn.is_refund);
        assert_eq!(txn.amount, 4.50);
        assert_eq!(txn.raw_amount, Some(-4.50));
        assert_eq!(txn.source_file.as_deref(), Some("amex.csv"));
        assert_eq!(txn.cc_reference_id.as_deref(), Some("3202506009988"));
    }
}
