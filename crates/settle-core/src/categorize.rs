//! Category inference engine
//!
//! Resolution waterfall, first hit wins:
//! 1. Merchant lookup on the cleaned merchant name
//! 2. Category label carried by the statement, mapped through the config table
//! 3. Regex pattern rules against the description, then the merchant
//! 4. Configured default ("Uncategorized > General")
//!
//! The engine compiles its [`CategoryConfig`] once; it holds no other state and
//! can be shared by reference across a whole batch.

use std::collections::HashMap;

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{CategoryConfig, CategoryDef};
use crate::merchant::{clean_merchant_name, merchant_key};
use crate::models::NewTransaction;

/// Which tier of the waterfall produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    MerchantLookup,
    SourceCategory,
    Description,
    Merchant,
    Default,
}

impl MatchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MerchantLookup => "merchant_lookup",
            Self::SourceCategory => "source_category",
            Self::Description => "description",
            Self::Merchant => "merchant",
            Self::Default => "default",
        }
    }
}

impl std::fmt::Display for MatchSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transaction fields the engine looks at
#[derive(Debug, Clone, Default)]
pub struct CategoryInput<'a> {
    /// Merchant name if already known; the description is cleaned otherwise
    pub merchant: Option<&'a str>,
    pub description: &'a str,
    pub amount: f64,
    /// Category label supplied by the statement itself
    pub source_category: Option<&'a str>,
}

/// Result of category inference
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryMatch {
    pub category_id: Option<i64>,
    pub category_name: String,
    pub subcategory_id: Option<i64>,
    pub subcategory_name: Option<String>,
    /// `high_<score>`, `high` or `low`
    pub confidence: String,
    pub matched_pattern: Option<String>,
    pub matched_in: MatchSource,
}

impl CategoryMatch {
    /// Copy the resolved category onto a transaction about to be inserted
    pub fn apply_to(&self, txn: &mut NewTransaction) {
        txn.category = Some(self.category_name.clone());
        txn.subcategory = self.subcategory_name.clone();
        txn.category_id = self.category_id;
        txn.subcategory_id = self.subcategory_id;
    }

    /// "Category > Subcategory" for display
    pub fn path(&self) -> String {
        match &self.subcategory_name {
            Some(sub) => format!("{} > {}", self.category_name, sub),
            None => self.category_name.clone(),
        }
    }
}

/// Category ids resolved from a path
#[derive(Debug, Clone, PartialEq)]
struct ResolvedCategory {
    category_id: Option<i64>,
    category_name: String,
    subcategory_id: Option<i64>,
    subcategory_name: Option<String>,
}

/// Name -> id lookups built from the pattern rules and the category table
#[derive(Debug, Default)]
struct CategoryIndex {
    /// "category > subcategory" (lowercase)
    by_path: HashMap<String, ResolvedCategory>,
    /// category name (lowercase) -> (id, name)
    categories: HashMap<String, (Option<i64>, String)>,
    /// subcategory name (lowercase) -> every category holding it
    subcategories: HashMap<String, Vec<ResolvedCategory>>,
}

impl CategoryIndex {
    fn build(config: &CategoryConfig) -> Self {
        let mut index = Self::default();

        for category in &config.patterns {
            index.add_category(category.id, &category.name);
            for sub in &category.subcategories {
                index.add_subcategory(category.id, &category.name, sub.id, &sub.name);
            }
        }
        for category in &config.categories {
            index.add_category(Some(category.id), &category.name);
            for sub in &category.subcategories {
                index.add_subcategory(Some(category.id), &category.name, Some(sub.id), &sub.name);
            }
        }

        index
    }

    fn add_category(&mut self, id: Option<i64>, name: &str) {
        let entry = self
            .categories
            .entry(name.to_lowercase())
            .or_insert((id, name.to_string()));
        if entry.0.is_none() {
            entry.0 = id;
        }
    }

    fn add_subcategory(&mut self, cat_id: Option<i64>, cat_name: &str, sub_id: Option<i64>, sub_name: &str) {
        let resolved = ResolvedCategory {
            category_id: cat_id,
            category_name: cat_name.to_string(),
            subcategory_id: sub_id,
            subcategory_name: Some(sub_name.to_string()),
        };
        let key = format!("{} > {}", cat_name.to_lowercase(), sub_name.to_lowercase());
        if self.by_path.insert(key, resolved.clone()).is_none() {
            self.subcategories
                .entry(sub_name.to_lowercase())
                .or_default()
                .push(resolved);
        }
    }

    /// Resolve "Category > Subcategory", a bare category, or an unambiguous subcategory name
    fn resolve(&self, path: &str) -> Option<ResolvedCategory> {
        if let Some((cat, sub)) = path.split_once(" > ") {
            let key = format!("{} > {}", cat.trim().to_lowercase(), sub.trim().to_lowercase());
            return self.by_path.get(&key).cloned();
        }

        let key = path.trim().to_lowercase();
        if let Some((id, name)) = self.categories.get(&key) {
            return Some(ResolvedCategory {
                category_id: *id,
                category_name: name.clone(),
                subcategory_id: None,
                subcategory_name: None,
            });
        }

        match self.subcategories.get(&key).map(Vec::as_slice) {
            Some([only]) => Some(only.clone()),
            _ => None,
        }
    }
}

/// A compiled pattern rule
#[derive(Debug)]
struct PatternRule {
    category_id: Option<i64>,
    category_name: String,
    subcategory_id: Option<i64>,
    subcategory_name: String,
    pattern: String,
    regex: Regex,
}

/// Category inference engine over an immutable configuration snapshot
#[derive(Debug)]
pub struct CategoryEngine {
    config: CategoryConfig,
    rules: Vec<PatternRule>,
    index: CategoryIndex,
}

impl CategoryEngine {
    /// Compile the configuration. Invalid patterns are logged and skipped.
    pub fn new(config: CategoryConfig) -> Self {
        let mut rules = Vec::new();
        for category in &config.patterns {
            for sub in &category.subcategories {
                for pattern in &sub.patterns {
                    match RegexBuilder::new(pattern).case_insensitive(true).build() {
                        Ok(regex) => rules.push(PatternRule {
                            category_id: category.id,
                            category_name: category.name.clone(),
                            subcategory_id: sub.id,
                            subcategory_name: sub.name.clone(),
                            pattern: pattern.clone(),
                            regex,
                        }),
                        Err(e) => warn!(
                            "Skipping invalid pattern '{}' for {} > {}: {}",
                            pattern, category.name, sub.name, e
                        ),
                    }
                }
            }
        }

        let index = CategoryIndex::build(&config);
        debug!("Category engine ready with {} pattern rules", rules.len());

        Self {
            config,
            rules,
            index,
        }
    }

    /// Merge categories reported by the remote service into the id table
    pub fn merge_categories(&mut self, categories: Vec<CategoryDef>) {
        self.config.merge_categories(categories);
        self.index = CategoryIndex::build(&self.config);
    }

    /// Whether the merchant lookup table has an entry for this merchant
    pub fn knows_merchant(&self, merchant: &str) -> bool {
        self.config
            .merchants
            .contains_key(&merchant_key(&clean_merchant_name(merchant)))
    }

    /// Number of usable pattern rules
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Infer the category of a transaction
    pub fn infer(&self, input: &CategoryInput<'_>) -> CategoryMatch {
        let raw_merchant = input
            .merchant
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(input.description);
        let merchant = clean_merchant_name(raw_merchant);
        let description = input.description.to_lowercase();

        debug!(
            "Categorizing '{}' (merchant '{}', amount {:.2})",
            input.description, merchant, input.amount
        );

        if let Some(found) = self.from_merchant_lookup(&merchant) {
            return found;
        }
        if let Some(found) = self.from_source_category(input.source_category) {
            return found;
        }
        if let Some(found) = self.from_patterns(&description, &merchant.to_lowercase()) {
            return found;
        }

        let default = &self.config.default_category;
        debug!(
            "No category match for '{}', using {} > {}",
            merchant, default.category_name, default.subcategory_name
        );
        CategoryMatch {
            category_id: default.category_id,
            category_name: default.category_name.clone(),
            subcategory_id: default.subcategory_id,
            subcategory_name: Some(default.subcategory_name.clone()),
            confidence: "low".to_string(),
            matched_pattern: None,
            matched_in: MatchSource::Default,
        }
    }

    fn from_merchant_lookup(&self, merchant: &str) -> Option<CategoryMatch> {
        let entry = self.config.merchants.get(&merchant_key(merchant))?;
        let path = entry.path();
        debug!(
            "Merchant lookup match: '{}' -> {} (confidence {:.2})",
            merchant, path, entry.confidence
        );

        let resolved = self.index.resolve(&path).unwrap_or_else(|| ResolvedCategory {
            category_id: None,
            category_name: entry.category.clone(),
            subcategory_id: None,
            subcategory_name: entry.subcategory.clone(),
        });
        Some(Self::to_match(
            resolved,
            format!("high_{:.2}", entry.confidence),
            None,
            MatchSource::MerchantLookup,
        ))
    }

    fn from_source_category(&self, label: Option<&str>) -> Option<CategoryMatch> {
        let label = label.map(str::trim).filter(|l| !l.is_empty())?;
        let Some(path) = self.config.source_categories.get(label) else {
            warn!("Unknown statement category '{}', add it to source_categories", label);
            return None;
        };
        debug!("Statement category match: '{}' -> {}", label, path);

        let resolved = self.index.resolve(path).unwrap_or_else(|| {
            let (category, subcategory) = match path.split_once(" > ") {
                Some((c, s)) => (c.trim().to_string(), Some(s.trim().to_string())),
                None => (path.clone(), None),
            };
            ResolvedCategory {
                category_id: None,
                category_name: category,
                subcategory_id: None,
                subcategory_name: subcategory,
            }
        });
        Some(Self::to_match(
            resolved,
            "high_0.95".to_string(),
            Some(label.to_string()),
            MatchSource::SourceCategory,
        ))
    }

    fn from_patterns(&self, description: &str, merchant: &str) -> Option<CategoryMatch> {
        for rule in &self.rules {
            let matched_in = if !description.is_empty() && rule.regex.is_match(description) {
                MatchSource::Description
            } else if !merchant.is_empty() && rule.regex.is_match(merchant) {
                MatchSource::Merchant
            } else {
                continue;
            };

            debug!(
                "Pattern '{}' matched in {} -> {} > {}",
                rule.pattern, matched_in, rule.category_name, rule.subcategory_name
            );
            return Some(CategoryMatch {
                category_id: rule.category_id,
                category_name: rule.category_name.clone(),
                subcategory_id: rule.subcategory_id,
                subcategory_name: Some(rule.subcategory_name.clone()),
                confidence: "high".to_string(),
                matched_pattern: Some(rule.pattern.clone()),
                matched_in,
            });
        }
        None
    }

    fn to_match(
        resolved: ResolvedCategory,
        confidence: String,
        matched_pattern: Option<String>,
        matched_in: MatchSource,
    ) -> CategoryMatch {
        CategoryMatch {
            category_id: resolved.category_id,
            category_name: resolved.category_name,
            subcategory_id: resolved.subcategory_id,
            subcategory_name: resolved.subcategory_name,
            confidence,
            matched_pattern,
            matched_in,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CategoryPatterns, MerchantEntry, SubcategoryDef, SubcategoryPatterns};

    fn engine() -> CategoryEngine {
        CategoryEngine::new(CategoryConfig::embedded().unwrap())
    }

    fn input(description: &str) -> CategoryInput<'_> {
        CategoryInput {
            description,
            amount: 10.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_regex_tier_groceries() {
        let found = engine().infer(&CategoryInput {
            merchant: Some("Trader Joes"),
            description: "Trader Joes",
            amount: 45.20,
            source_category: None,
        });
        assert_eq!(found.category_name, "Food and drink");
        assert_eq!(found.subcategory_name.as_deref(), Some("Groceries"));
        assert_eq!(found.category_id, Some(25));
        assert_eq!(found.subcategory_id, Some(12));
        assert_eq!(found.confidence, "high");
        assert_eq!(found.matched_in, MatchSource::Description);
        assert_eq!(found.matched_pattern.as_deref(), Some("trader jo"));
    }

    #[test]
    fn test_merchant_lookup_beats_patterns() {
        // "uber eats" is in the lookup as Dining out; the \buber\b pattern says Taxi
        let found = engine().infer(&input("UBER EATS"));
        assert_eq!(found.matched_in, MatchSource::MerchantLookup);
        assert_eq!(found.path(), "Food and drink > Dining out");
        assert_eq!(found.confidence, "high_0.95");
        assert_eq!(found.subcategory_id, Some(13));
    }

    #[test]
    fn test_merchant_lookup_beats_source_category() {
        let found = engine().infer(&CategoryInput {
            description: "STARBUCKS 0215",
            source_category: Some("Transportation-Fuel"),
            ..Default::default()
        });
        assert_eq!(found.matched_in, MatchSource::MerchantLookup);
        assert_eq!(found.subcategory_name.as_deref(), Some("Dining out"));
    }

    #[test]
    fn test_source_category_tier() {
        let found = engine().infer(&CategoryInput {
            description: "SOME GAS STATION 123",
            source_category: Some("Transportation-Fuel"),
            ..Default::default()
        });
        assert_eq!(found.matched_in, MatchSource::SourceCategory);
        assert_eq!(found.confidence, "high_0.95");
        assert_eq!(found.matched_pattern.as_deref(), Some("Transportation-Fuel"));
        assert_eq!(found.path(), "Transportation > Gas/fuel");
        assert_eq!(found.category_id, Some(31));
    }

    #[test]
    fn test_unknown_source_category_falls_through() {
        let found = engine().infer(&CategoryInput {
            description: "SAFEWAY 0215",
            source_category: Some("Something-New"),
            ..Default::default()
        });
        assert_eq!(found.matched_in, MatchSource::Description);
        assert_eq!(found.subcategory_name.as_deref(), Some("Groceries"));
    }

    #[test]
    fn test_default_category() {
        let found = engine().infer(&input("ZZZ UNKNOWN VENDOR"));
        assert_eq!(found.matched_in, MatchSource::Default);
        assert_eq!(found.confidence, "low");
        assert_eq!(found.category_id, Some(2));
        assert_eq!(found.subcategory_id, Some(18));
        assert_eq!(found.path(), "Uncategorized > General");
    }

    #[test]
    fn test_invalid_pattern_is_skipped() {
        let config = CategoryConfig {
            patterns: vec![CategoryPatterns {
                id: Some(1),
                name: "Home".into(),
                subcategories: vec![SubcategoryPatterns {
                    id: Some(14),
                    name: "Household supplies".into(),
                    patterns: vec!["([unclosed".into(), "hardware".into()],
                }],
            }],
            ..Default::default()
        };
        let engine = CategoryEngine::new(config);
        assert_eq!(engine.rule_count(), 1);
        let found = engine.infer(&input("ACE HARDWARE"));
        assert_eq!(found.subcategory_name.as_deref(), Some("Household supplies"));
    }

    #[test]
    fn test_lookup_resolves_bare_subcategory_name() {
        let mut config = CategoryConfig::embedded().unwrap();
        config.merchants.insert(
            "blue bottle".into(),
            MerchantEntry {
                category: "Dining out".into(),
                subcategory: None,
                confidence: 0.8,
            },
        );
        let found = CategoryEngine::new(config).infer(&input("BLUE BOTTLE"));
        assert_eq!(found.path(), "Food and drink > Dining out");
        assert_eq!(found.confidence, "high_0.80");
    }

    #[test]
    fn test_unresolvable_lookup_keeps_names() {
        let mut config = CategoryConfig::default();
        config.merchants.insert(
            "acme".into(),
            MerchantEntry {
                category: "Gifts".into(),
                subcategory: Some("Flowers".into()),
                confidence: 1.0,
            },
        );
        let found = CategoryEngine::new(config).infer(&input("ACME"));
        assert_eq!(found.category_id, None);
        assert_eq!(found.category_name, "Gifts");
        assert_eq!(found.subcategory_name.as_deref(), Some("Flowers"));
    }

    #[test]
    fn test_merge_categories_adds_ids() {
        let mut config = CategoryConfig::default();
        config.merchants.insert(
            "acme".into(),
            MerchantEntry {
                category: "Gifts".into(),
                subcategory: Some("Flowers".into()),
                confidence: 1.0,
            },
        );
        let mut engine = CategoryEngine::new(config);
        engine.merge_categories(vec![CategoryDef {
            id: 60,
            name: "Gifts".into(),
            subcategories: vec![SubcategoryDef {
                id: 61,
                name: "Flowers".into(),
            }],
        }]);
        let found = engine.infer(&input("ACME"));
        assert_eq!(found.category_id, Some(60));
        assert_eq!(found.subcategory_id, Some(61));
    }

    #[test]
    fn test_apply_to_transaction() {
        use crate::models::TransactionSource;
        let date = chrono::NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let mut txn = NewTransaction::new(date, "Trader Joes", 45.2, TransactionSource::Statement);
        engine().infer(&input("Trader Joes")).apply_to(&mut txn);
        assert_eq!(txn.category.as_deref(), Some("Food and drink"));
        assert_eq!(txn.subcategory.as_deref(), Some("Groceries"));
        assert_eq!(txn.subcategory_id, Some(12));
    }
}
