// Recommendation Merger
//
// Concept: Fill a partial model ranking up to the required count with
// deterministic fallback entries
//
// Law:
// - model entries come first, in extraction order
// - fallback entries follow in scorer order, skipping identities present
// - output length is min(required, available); identities are unique
// - ranks are renumbered 1..n

use crate::advisory::fallback_scorer::ScoredRecord;
use crate::advisory::types::{EntryOrigin, RankedRecord, RecommendationEntry};
use std::collections::HashSet;

pub fn merge_recommendations(
    extracted: &[RankedRecord],
    scored: &[ScoredRecord],
    required: usize,
) -> Vec<RecommendationEntry> {
    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(required);

    let model = extracted.iter().map(|r| (r.record_id.as_str(), EntryOrigin::Model, None, None));
    let fallback = scored.iter().map(|s| {
        (
            s.record.id.as_str(),
            EntryOrigin::Fallback,
            Some(s.score),
            Some(s.rationale.clone()),
        )
    });

    for (record_id, origin, score, rationale) in model.chain(fallback) {
        if merged.len() >= required {
            break;
        }
        if !seen.insert(record_id) {
            continue;
        }
        merged.push(RecommendationEntry {
            record_id: record_id.to_string(),
            rank: merged.len() as u32 + 1,
            origin,
            score,
            rationale,
        });
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DomainRecord;

    fn ranked(ids: &[&str]) -> Vec<RankedRecord> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| RankedRecord {
                record_id: id.to_string(),
                rank: i as u32 + 1,
            })
            .collect()
    }

    fn scored(ids: &[&str]) -> Vec<ScoredRecord> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| ScoredRecord {
                record: DomainRecord {
                    id: id.to_string(),
                    name: id.to_uppercase(),
                    national_rank: None,
                    selectivity_tier: 3,
                    annual_cost: 20_000.0,
                    tags: Vec::new(),
                },
                score: 100.0 - i as f64,
                rationale: format!("fit {}", i),
            })
            .collect()
    }

    #[test]
    fn test_model_first_then_fallback_without_duplicates() {
        let merged = merge_recommendations(
            &ranked(&["c", "a"]),
            &scored(&["a", "b", "c", "d"]),
            4,
        );

        let ids: Vec<_> = merged.iter().map(|e| e.record_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b", "d"]);
        let ranks: Vec<_> = merged.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4]);
        assert_eq!(merged[0].origin, EntryOrigin::Model);
        assert_eq!(merged[0].score, None);
        assert_eq!(merged[2].origin, EntryOrigin::Fallback);
        assert_eq!(merged[2].rationale.as_deref(), Some("fit 1"));
    }

    #[test]
    fn test_truncates_model_entries_beyond_required() {
        let merged = merge_recommendations(&ranked(&["a", "b", "c"]), &scored(&["d"]), 2);
        assert_eq!(merged.len(), 2);
        assert!(merged.iter().all(|e| e.origin == EntryOrigin::Model));
    }

    #[test]
    fn test_short_when_nothing_left_to_fill() {
        let merged = merge_recommendations(&ranked(&["a"]), &scored(&["a", "b"]), 5);
        let ids: Vec<_> = merged.iter().map(|e| e.record_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(merge_recommendations(&[], &[], 3).is_empty());
        assert!(merge_recommendations(&ranked(&["a"]), &[], 0).is_empty());
    }
}
