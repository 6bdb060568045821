//! University catalog and user profile
//!
//! The catalog is the read-only domain-record list shared by every session:
//! the extractor validates recommended identifiers against it and the
//! fallback scorer ranks its records. It is built once at startup and shared
//! behind an `Arc`; nothing mutates it afterwards.

use edu_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Lowest (open admission) selectivity tier
pub const MIN_TIER: u8 = 1;
/// Highest (most selective) selectivity tier
pub const MAX_TIER: u8 = 5;

/// One university record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRecord {
    /// Stable identifier (slug)
    pub id: String,
    pub name: String,
    /// National ranking position, if ranked
    #[serde(default)]
    pub national_rank: Option<u32>,
    /// 1 (open admission) to 5 (most selective)
    pub selectivity_tier: u8,
    /// Estimated annual cost of attendance
    pub annual_cost: f64,
    /// Categorical tags (fields of study, setting, etc.)
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Declared annual budget range (inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetBand {
    pub min: f64,
    pub max: f64,
}

impl BudgetBand {
    pub fn contains(&self, cost: f64) -> bool {
        cost >= self.min && cost <= self.max
    }
}

/// Student profile consumed by fallback scoring and prompts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Overall academic strength, 0 to 100
    #[serde(default)]
    pub strength_score: f64,
    #[serde(default)]
    pub budget: Option<BudgetBand>,
    /// Preferred fields/categories, matched against record tags
    #[serde(default)]
    pub preferred_categories: Vec<String>,
}

impl UserProfile {
    /// Map the 0–100 strength score onto the selectivity tier scale
    ///
    /// 0–19 → 1, 20–39 → 2, 40–59 → 3, 60–79 → 4, 80–100 → 5
    pub fn strength_tier(&self) -> u8 {
        let score = self.strength_score.clamp(0.0, 100.0);
        let tier = 1 + (score / 20.0).floor() as u8;
        tier.clamp(MIN_TIER, MAX_TIER)
    }
}

/// Read-only record catalog with identifier and name lookup
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    records: Vec<DomainRecord>,
    /// lower-cased id → index
    by_id: HashMap<String, usize>,
    /// normalized name → index
    by_name: HashMap<String, usize>,
}

impl Catalog {
    /// Build a catalog, dropping invalid and duplicate records
    ///
    /// Insertion order is preserved; it is the final tie-breaker for
    /// fallback ranking.
    pub fn new(records: Vec<DomainRecord>) -> Self {
        let mut catalog = Catalog::default();

        for record in records {
            if !(MIN_TIER..=MAX_TIER).contains(&record.selectivity_tier) {
                warn!(
                    id = %record.id,
                    tier = record.selectivity_tier,
                    "Dropping catalog record with out-of-range selectivity tier"
                );
                continue;
            }
            if !record.annual_cost.is_finite() || record.annual_cost < 0.0 {
                warn!(id = %record.id, "Dropping catalog record with invalid cost");
                continue;
            }

            let id_key = record.id.trim().to_lowercase();
            if id_key.is_empty() || catalog.by_id.contains_key(&id_key) {
                warn!(id = %record.id, "Dropping catalog record with empty or duplicate id");
                continue;
            }

            let index = catalog.records.len();
            catalog.by_id.insert(id_key, index);
            catalog
                .by_name
                .entry(normalize_name(&record.name))
                .or_insert(index);
            catalog.records.push(record);
        }

        catalog
    }

    pub fn empty() -> Self {
        Catalog::default()
    }

    /// Parse a JSON array of records
    pub fn from_json_str(json: &str) -> Result<Self> {
        let records: Vec<DomainRecord> = serde_json::from_str(json)?;
        Ok(Self::new(records))
    }

    /// Load a JSON catalog file
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Read catalog {} failed: {}", path.display(), e))
        })?;
        let catalog = Self::from_json_str(&content)?;
        info!(
            path = %path.display(),
            records = catalog.len(),
            "University catalog loaded"
        );
        Ok(catalog)
    }

    /// Records in insertion order
    pub fn records(&self) -> &[DomainRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Exact (case-insensitive) identifier lookup
    pub fn get(&self, id: &str) -> Option<&DomainRecord> {
        self.by_id
            .get(&id.trim().to_lowercase())
            .map(|&i| &self.records[i])
    }

    /// Resolve a model-emitted reference by identifier or display name
    ///
    /// Never fabricates: returns `None` for anything not in the catalog.
    pub fn resolve(&self, reference: &str) -> Option<&DomainRecord> {
        let cleaned = reference
            .trim()
            .trim_matches(|c: char| matches!(c, '*' | '`' | '"' | '\'' | '[' | ']'))
            .trim();
        if cleaned.is_empty() {
            return None;
        }

        self.get(cleaned).or_else(|| {
            self.by_name
                .get(&normalize_name(cleaned))
                .map(|&i| &self.records[i])
        })
    }
}

/// Lower-case, single-spaced, punctuation-trimmed name key
fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(|w| w.trim_matches(|c: char| c == ',' || c == '.'))
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
