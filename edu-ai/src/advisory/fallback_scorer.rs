// Deterministic Fallback Scorer
//
// Concept: Rank catalog records against a user profile without the model
// Synchronization: Reads the shared immutable Catalog, outputs scored entries
//
// Algorithm:
// 1. Academic fit: fit_weight × (1 − |profile_tier − record_tier| / 4)
// 2. Budget: budget_weight when annual_cost lies inside the budget band
// 3. Category: category_weight per preferred category found in tags
// 4. Order by score desc, then selectivity tier desc, then cost asc,
//    then catalog order (stable sort)

use crate::catalog::{Catalog, DomainRecord, UserProfile, MAX_TIER, MIN_TIER};
use edu_common::config::AdvisoryConfig;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

/// Score component weights
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub fit: f64,
    pub budget: f64,
    pub category: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            fit: 50.0,
            budget: 25.0,
            category: 10.0,
        }
    }
}

impl From<&AdvisoryConfig> for ScoreWeights {
    fn from(config: &AdvisoryConfig) -> Self {
        Self {
            fit: config.fit_weight,
            budget: config.budget_weight,
            category: config.category_weight,
        }
    }
}

/// One scored catalog record
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub record: DomainRecord,
    pub score: f64,
    /// Human-readable account of each score contribution
    pub rationale: String,
}

/// Pure, side-effect free ranking over the catalog
///
/// Same catalog + profile always yields the same order.
pub struct DeterministicFallbackScorer {
    catalog: Arc<Catalog>,
    weights: ScoreWeights,
}

impl DeterministicFallbackScorer {
    pub fn new(catalog: Arc<Catalog>, weights: ScoreWeights) -> Self {
        Self { catalog, weights }
    }

    pub fn weights(&self) -> ScoreWeights {
        self.weights
    }

    /// Score a single record
    pub fn score(&self, profile: &UserProfile, record: &DomainRecord) -> ScoredRecord {
        let profile_tier = profile.strength_tier();
        let distance = (profile_tier as f64 - record.selectivity_tier as f64).abs();
        let span = (MAX_TIER - MIN_TIER) as f64;
        let fit = self.weights.fit * (1.0 - distance / span);

        let in_budget = profile
            .budget
            .map(|band| band.contains(record.annual_cost))
            .unwrap_or(false);
        let budget = if in_budget { self.weights.budget } else { 0.0 };

        let matched: Vec<&str> = profile
            .preferred_categories
            .iter()
            .filter(|category| {
                record
                    .tags
                    .iter()
                    .any(|tag| tag.eq_ignore_ascii_case(category.trim()))
            })
            .map(String::as_str)
            .collect();
        let category = self.weights.category * matched.len() as f64;

        let mut rationale = format!(
            "fit {:.1} (tier {} vs {})",
            fit, record.selectivity_tier, profile_tier
        );
        if in_budget {
            rationale.push_str(&format!(", within budget +{:.1}", budget));
        }
        if !matched.is_empty() {
            rationale.push_str(&format!(
                ", categories {} +{:.1}",
                matched.join("/"),
                category
            ));
        }

        ScoredRecord {
            record: record.clone(),
            score: fit + budget + category,
            rationale,
        }
    }

    /// Top `n` records for the profile
    ///
    /// Returns fewer than `n` when the catalog is smaller.
    pub fn rank(&self, profile: &UserProfile, n: usize) -> Vec<ScoredRecord> {
        self.rank_excluding(profile, n, &HashSet::new())
    }

    /// Top `n` records whose identifiers are not in `exclude`
    pub fn rank_excluding(
        &self,
        profile: &UserProfile,
        n: usize,
        exclude: &HashSet<String>,
    ) -> Vec<ScoredRecord> {
        let mut scored: Vec<ScoredRecord> = self
            .catalog
            .records()
            .iter()
            .filter(|record| !exclude.contains(&record.id))
            .map(|record| self.score(profile, record))
            .collect();

        // sort_by is stable, so equal keys keep catalog order
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.record.selectivity_tier.cmp(&a.record.selectivity_tier))
                .then_with(|| {
                    a.record
                        .annual_cost
                        .partial_cmp(&b.record.annual_cost)
                        .unwrap_or(Ordering::Equal)
                })
        });
        scored.truncate(n);
        scored
    }
}
