//! Remote shared-expense types
//!
//! These types are backend-agnostic and mirror the JSON the HTTP backend exchanges.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{CategoryDef, SubcategoryDef};

/// Notes prefix linking a refund expense to its original
pub const REFUND_NOTE_PREFIX: &str = "Refund for expense";

/// One participant's share of an expense
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitShare {
    pub user_id: i64,
    pub paid_share: f64,
    pub owed_share: f64,
}

impl SplitShare {
    /// Swap paid and owed (a refund reverses the money flow)
    pub fn reversed(&self) -> Self {
        Self {
            user_id: self.user_id,
            paid_share: self.owed_share,
            owed_share: self.paid_share,
        }
    }

    /// Scale both shares by `factor`, rounded to cents
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            user_id: self.user_id,
            paid_share: round_cents(self.paid_share * factor),
            owed_share: round_cents(self.owed_share * factor),
        }
    }
}

pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Default split for a purchase: the self-expense account paid, the user owes it all
pub fn default_purchase_shares(amount: f64, user_id: i64, self_expense_id: i64) -> Vec<SplitShare> {
    let amount = round_cents(amount.abs());
    vec![
        SplitShare {
            user_id: self_expense_id,
            paid_share: amount,
            owed_share: 0.0,
        },
        SplitShare {
            user_id,
            paid_share: 0.0,
            owed_share: amount,
        },
    ]
}

/// Category reference carried on an expense
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseCategory {
    pub id: i64,
    pub name: String,
}

/// Expense to be created remotely
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewExpense {
    pub cost: f64,
    pub description: String,
    /// Statement reference id; the remote side's dedup key
    pub details: String,
    pub date: NaiveDate,
    pub currency_code: String,
    /// Subcategory id when known, else the category id
    pub category_id: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
    pub users: Vec<SplitShare>,
}

/// Expense as returned by the remote service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteExpense {
    pub id: String,
    pub cost: f64,
    pub description: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub date: NaiveDate,
    #[serde(default = "default_currency")]
    pub currency_code: String,
    #[serde(default)]
    pub category: Option<ExpenseCategory>,
    #[serde(default)]
    pub users: Vec<SplitShare>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

fn default_currency() -> String {
    crate::models::DEFAULT_CURRENCY.to_string()
}

impl RemoteExpense {
    /// Build the stored form of a newly created expense
    pub fn from_new(id: &str, expense: &NewExpense, now: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            cost: expense.cost,
            description: expense.description.clone(),
            details: Some(expense.details.clone()),
            notes: expense.notes.clone(),
            date: expense.date,
            currency_code: expense.currency_code.clone(),
            category: expense.category_id.map(|id| ExpenseCategory {
                id,
                name: String::new(),
            }),
            users: expense.users.clone(),
            updated_at: Some(now),
            deleted_at: None,
        }
    }

    /// Reference id stored in `details`, with quotes and whitespace stripped
    pub fn reference_id(&self) -> Option<String> {
        self.details
            .as_deref()
            .map(clean_reference)
            .filter(|r| !r.is_empty())
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Share of a participant
    pub fn share_for(&self, user_id: i64) -> Option<&SplitShare> {
        self.users.iter().find(|u| u.user_id == user_id)
    }

    /// Whether the expense records a refund (negative cost or a refund note)
    pub fn is_refund(&self) -> bool {
        self.cost < 0.0
            || self
                .notes
                .as_deref()
                .is_some_and(|n| n.trim_start().starts_with(REFUND_NOTE_PREFIX))
    }
}

/// Strip surrounding quotes and whitespace (nested up to three layers)
pub fn clean_reference(value: &str) -> String {
    let mut cleaned = value.trim();
    for _ in 0..3 {
        cleaned = cleaned.trim_matches(|c| c == '\'' || c == '"').trim();
    }
    cleaned.to_string()
}

/// Subcategory in the remote category table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSubcategory {
    pub id: i64,
    pub name: String,
}

/// Category in the remote category table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCategory {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub subcategories: Vec<RemoteSubcategory>,
}

impl From<RemoteCategory> for CategoryDef {
    fn from(category: RemoteCategory) -> Self {
        CategoryDef {
            id: category.id,
            name: category.name,
            subcategories: category
                .subcategories
                .into_iter()
                .map(|s| SubcategoryDef { id: s.id, name: s.name })
                .collect(),
        }
    }
}

/// Inputs for fuzzy remote matching of a reference-less row
#[derive(Debug, Clone)]
pub struct FuzzyQuery {
    pub amount: f64,
    pub date: NaiveDate,
    pub merchant: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_reference_strips_nested_quotes() {
        assert_eq!(clean_reference("''320250010012345''"), "320250010012345");
        assert_eq!(clean_reference("  \"ABC12345\" "), "ABC12345");
        assert_eq!(clean_reference("plain"), "plain");
    }

    #[test]
    fn test_default_shares_and_reversal() {
        let shares = default_purchase_shares(-42.5, 7, 99);
        assert_eq!(shares[0].user_id, 99);
        assert_eq!(shares[0].paid_share, 42.5);
        assert_eq!(shares[1].owed_share, 42.5);

        let reversed = shares[1].reversed();
        assert_eq!(reversed.paid_share, 42.5);
        assert_eq!(reversed.owed_share, 0.0);

        let half = shares[1].scaled(0.5);
        assert_eq!(half.owed_share, 21.25);
    }

    #[test]
    fn test_refund_detection() {
        let json = r#"{
            "id": "55",
            "cost": 20.0,
            "description": "Shop",
            "notes": "Refund for expense 12",
            "date": "2025-03-01"
        }"#;
        let expense: RemoteExpense = serde_json::from_str(json).unwrap();
        assert!(expense.is_refund());
        assert_eq!(expense.currency_code, "USD");
        assert!(expense.reference_id().is_none());
    }

    #[test]
    fn test_remote_category_conversion() {
        let category = RemoteCategory {
            id: 25,
            name: "Food and drink".to_string(),
            subcategories: vec![RemoteSubcategory {
                id: 12,
                name: "Groceries".to_string(),
            }],
        };
        let def: CategoryDef = category.into();
        assert_eq!(def.subcategories[0].id, 12);
    }
}
