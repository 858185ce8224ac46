//! Category inference configuration
//!
//! Holds the merchant lookup table, the statement category mapping, the regex
//! pattern rules and the category id table. Loaded once per run and handed to
//! [`crate::categorize::CategoryEngine`] by value.
//!
//! ## Configuration Resolution
//!
//! 1. Explicit path (`--config`), TOML or YAML by extension
//! 2. Override in data dir (~/.local/share/settle/config/categories.toml)
//! 3. Embedded defaults (compiled into binary)

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::merchant::merchant_key;

/// Embedded default config (compiled into binary)
const DEFAULT_CONFIG: &str = include_str!("../../../config/categories.toml");

/// Fallback when nothing else matches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultCategory {
    pub category_id: Option<i64>,
    pub category_name: String,
    pub subcategory_id: Option<i64>,
    pub subcategory_name: String,
}

impl Default for DefaultCategory {
    fn default() -> Self {
        Self {
            category_id: Some(2),
            category_name: "Uncategorized".to_string(),
            subcategory_id: Some(18),
            subcategory_name: "General".to_string(),
        }
    }
}

/// A merchant lookup entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerchantEntry {
    pub category: String,
    pub subcategory: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

impl MerchantEntry {
    /// "Category > Subcategory" path, or just the category
    pub fn path(&self) -> String {
        match &self.subcategory {
            Some(sub) if !self.category.contains(" > ") => format!("{} > {}", self.category, sub),
            _ => self.category.clone(),
        }
    }
}

/// A subcategory with its ordered regex patterns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubcategoryPatterns {
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub patterns: Vec<String>,
}

/// A top-level category with pattern-bearing subcategories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryPatterns {
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub subcategories: Vec<SubcategoryPatterns>,
}

/// Id table entry for a subcategory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubcategoryDef {
    pub id: i64,
    pub name: String,
}

/// Id table entry for a category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryDef {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub subcategories: Vec<SubcategoryDef>,
}

/// Complete category configuration snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryConfig {
    pub default_category: DefaultCategory,
    /// Keyed by lowercased cleaned merchant name
    pub merchants: BTreeMap<String, MerchantEntry>,
    /// Statement category label -> "Category > Subcategory"
    pub source_categories: BTreeMap<String, String>,
    /// Ordered pattern rules
    pub patterns: Vec<CategoryPatterns>,
    /// Extra id table entries (categories without patterns, remote categories)
    pub categories: Vec<CategoryDef>,
}

impl CategoryConfig {
    /// The configuration compiled into the binary
    pub fn embedded() -> Result<Self> {
        parse_config(DEFAULT_CONFIG, ConfigFormat::Toml)
    }

    /// Load with the usual resolution order (explicit path, data dir, embedded)
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        load_config(explicit)
    }

    /// Merge categories into the id table, replacing entries with the same id
    pub fn merge_categories(&mut self, categories: impl IntoIterator<Item = CategoryDef>) {
        for category in categories {
            match self.categories.iter_mut().find(|c| c.id == category.id) {
                Some(existing) => *existing = category,
                None => self.categories.push(category),
            }
        }
    }
}

/// Serialization format of a config file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
}

impl ConfigFormat {
    /// Pick the format from a file extension (TOML unless .yaml/.yml)
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::Yaml,
            _ => Self::Toml,
        }
    }
}

/// Default config override path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("settle").join("config").join("categories.toml"))
}

fn read_config_file(path: &Path) -> Result<CategoryConfig> {
    debug!("Loading category config from {}", path.display());
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
    parse_config(&content, ConfigFormat::from_path(path))
}

/// Load configuration (explicit path, then data-dir override, then embedded)
pub fn load_config(explicit: Option<&Path>) -> Result<CategoryConfig> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        return read_config_file(path);
    }

    if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            return read_config_file(&default_path);
        }
    }

    CategoryConfig::embedded()
}

/// Insert or replace merchant lookup entries in a TOML config file
///
/// A missing file starts from the embedded defaults. Every other table in the
/// file is kept; comments are not.
pub fn save_merchant_entries(path: &Path, entries: &BTreeMap<String, MerchantEntry>) -> Result<()> {
    if ConfigFormat::from_path(path) != ConfigFormat::Toml {
        return Err(Error::Config(format!(
            "Merchant lookup updates need a TOML config file, not {}",
            path.display()
        )));
    }

    let content = if path.exists() {
        fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?
    } else {
        DEFAULT_CONFIG.to_string()
    };
    let mut table: toml::Table = content
        .parse()
        .map_err(|e: toml::de::Error| Error::Config(format!("Invalid config TOML: {}", e)))?;

    let merchants = table
        .entry("merchants")
        .or_insert_with(|| toml::Value::Table(toml::Table::new()))
        .as_table_mut()
        .ok_or_else(|| Error::Config("`merchants` must be a table".into()))?;
    for (key, entry) in entries {
        let value = toml::Value::try_from(entry)
            .map_err(|e| Error::Config(format!("Failed to encode merchant '{}': {}", key, e)))?;
        merchants.insert(merchant_key(key), value);
    }

    let rendered = toml::to_string(&table)
        .map_err(|e| Error::Config(format!("Failed to render config: {}", e)))?;

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;
    let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
    temp.write_all(rendered.as_bytes())?;
    temp.persist(path)
        .map_err(|e| Error::Config(format!("Failed to write {}: {}", path.display(), e)))?;

    debug!("Wrote {} merchant entries to {}", entries.len(), path.display());
    Ok(())
}

/// Raw config structure as it appears on disk
#[derive(Debug, Deserialize)]
struct RawConfig {
    default_category: Option<RawDefaultCategory>,
    merchants: Option<BTreeMap<String, MerchantEntry>>,
    source_categories: Option<BTreeMap<String, String>>,
    patterns: Option<Vec<CategoryPatterns>>,
    categories: Option<Vec<CategoryDef>>,
}

#[derive(Debug, Deserialize)]
struct RawDefaultCategory {
    category_id: Option<i64>,
    category_name: Option<String>,
    subcategory_id: Option<i64>,
    subcategory_name: Option<String>,
}

/// Parse config content in the given format
pub fn parse_config(content: &str, format: ConfigFormat) -> Result<CategoryConfig> {
    let raw: RawConfig = match format {
        ConfigFormat::Toml => toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid config TOML: {}", e)))?,
        ConfigFormat::Yaml => serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid config YAML: {}", e)))?,
    };

    let mut config = CategoryConfig::default();

    if let Some(default) = raw.default_category {
        if default.category_id.is_some() {
            config.default_category.category_id = default.category_id;
        }
        if let Some(name) = default.category_name {
            config.default_category.category_name = name;
        }
        if default.subcategory_id.is_some() {
            config.default_category.subcategory_id = default.subcategory_id;
        }
        if let Some(name) = default.subcategory_name {
            config.default_category.subcategory_name = name;
        }
    }

    // Lookup keys are matched against lowercased merchants
    if let Some(merchants) = raw.merchants {
        config.merchants = merchants
            .into_iter()
            .map(|(k, v)| (merchant_key(&k), v))
            .collect();
    }

    config.source_categories = raw.source_categories.unwrap_or_default();
    config.patterns = raw.patterns.unwrap_or_default();
    config.categories = raw.categories.unwrap_or_default();

    debug!(
        "Category config: {} merchants, {} source labels, {} pattern categories",
        config.merchants.len(),
        config.source_categories.len(),
        config.patterns.len()
    );

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_config_parses() {
        let config = CategoryConfig::embedded().unwrap();
        assert_eq!(config.default_category.category_name, "Uncategorized");
        assert_eq!(config.default_category.subcategory_id, Some(18));
        assert!(config.merchants.contains_key("starbucks"));
        assert!(!config.merchants.contains_key("trader joes"));

        let food = config
            .patterns
            .iter()
            .find(|c| c.name == "Food and drink")
            .unwrap();
        let groceries = food
            .subcategories
            .iter()
            .find(|s| s.name == "Groceries")
            .unwrap();
        assert!(groceries.patterns.iter().any(|p| p == "trader jo"));
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
default_category:
  category_name: Misc
merchants:
  "Blue Bottle":
    category: Food and drink
    subcategory: Dining out
    confidence: 0.8
patterns:
  - id: 25
    name: Food and drink
    subcategories:
      - id: 13
        name: Dining out
        patterns: ["coffee"]
"#;
        let config = parse_config(yaml, ConfigFormat::Yaml).unwrap();
        assert_eq!(config.default_category.category_name, "Misc");
        // Unspecified default fields keep their built-in values
        assert_eq!(config.default_category.subcategory_name, "General");
        let entry = config.merchants.get("blue bottle").unwrap();
        assert_eq!(entry.path(), "Food and drink > Dining out");
        assert_eq!(config.patterns[0].subcategories[0].patterns, vec!["coffee"]);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = parse_config("patterns = 3", ConfigFormat::Toml).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.yml")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.yaml")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.toml")), ConfigFormat::Toml);
    }

    #[test]
    fn test_load_explicit_missing_path() {
        let err = load_config(Some(Path::new("/nonexistent/settle.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_save_merchant_entries() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config").join("categories.toml");

        let mut entries = BTreeMap::new();
        entries.insert(
            "Corner Cafe".to_string(),
            MerchantEntry {
                category: "Food and drink".into(),
                subcategory: Some("Dining out".into()),
                confidence: 1.0,
            },
        );
        // Missing file starts from the embedded defaults
        save_merchant_entries(&path, &entries).unwrap();

        let config = load_config(Some(&path)).unwrap();
        let cafe = config.merchants.get("corner cafe").unwrap();
        assert_eq!(cafe.path(), "Food and drink > Dining out");
        assert!(config.merchants.contains_key("starbucks"));
        assert_eq!(config.patterns, CategoryConfig::embedded().unwrap().patterns);

        entries.insert(
            "starbucks".to_string(),
            MerchantEntry {
                category: "Food and drink".into(),
                subcategory: None,
                confidence: 0.5,
            },
        );
        save_merchant_entries(&path, &entries).unwrap();
        let config = load_config(Some(&path)).unwrap();
        let starbucks = config.merchants.get("starbucks").unwrap();
        assert_eq!(starbucks.subcategory, None);
        assert_eq!(starbucks.confidence, 0.5);

        let yaml = dir.path().join("categories.yaml");
        assert!(matches!(
            save_merchant_entries(&yaml, &entries).unwrap_err(),
            Error::Config(_)
        ));
    }

    #[test]
    fn test_merge_categories_replaces_by_id() {
        let mut config = CategoryConfig::default();
        config.merge_categories(vec![CategoryDef {
            id: 7,
            name: "Old".into(),
            subcategories: vec![],
        }]);
        config.merge_categories(vec![CategoryDef {
            id: 7,
            name: "New".into(),
            subcategories: vec![SubcategoryDef {
                id: 70,
                name: "Child".into(),
            }],
        }]);
        assert_eq!(config.categories.len(), 1);
        assert_eq!(config.categories[0].name, "New");
    }
}
