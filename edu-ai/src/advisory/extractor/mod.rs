//! Schema-driven extraction of structured fields from model prose
//!
//! Parsing runs as an ordered pipeline of fallible parsers. The first parser
//! that locates anything wins; later parsers only run when every earlier one
//! failed entirely. Post-processing (catalog validation, card limits,
//! defaults, missing-field bookkeeping) is shared by all parsers.

mod line_heuristic;
mod tagged_block;

pub use line_heuristic::LineHeuristicParser;
pub use tagged_block::TaggedBlockParser;

use crate::advisory::schema::{ExtractionSchema, FieldKind, RECOMMENDATIONS_FIELD};
use crate::advisory::types::{
    AdvisoryError, ExtractionResult, ExtractionStatus, ExtractionStrategy, FieldName, Flashcard,
    RankedRecord, Value,
};
use crate::catalog::Catalog;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Fields located by one parser
///
/// Recommendation entries are raw references (ids or display names) in the
/// order they appeared; the extractor resolves them against the catalog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFields {
    pub fields: BTreeMap<FieldName, Value>,
    /// 0.0 to 1.0
    pub confidence: f64,
}

impl ParsedFields {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// One stage of the extraction pipeline
///
/// Returns `None` when nothing usable was found (total failure).
pub trait StructuredParser: Send + Sync {
    fn strategy(&self) -> ExtractionStrategy;

    fn parse(&self, text: &str, schema: &ExtractionSchema) -> Option<ParsedFields>;
}

/// Turns accumulated model text into a typed [`ExtractionResult`]
pub struct SchemaExtractor {
    catalog: Arc<Catalog>,
    parsers: Vec<Box<dyn StructuredParser>>,
}

impl SchemaExtractor {
    /// Standard pipeline: tagged block, then line heuristics
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self::with_parsers(
            catalog,
            vec![Box::new(TaggedBlockParser), Box::new(LineHeuristicParser)],
        )
    }

    pub fn with_parsers(catalog: Arc<Catalog>, parsers: Vec<Box<dyn StructuredParser>>) -> Self {
        Self { catalog, parsers }
    }

    /// Extract `schema` from the complete accumulated text
    ///
    /// Never fails: absent fields take their schema defaults and are listed
    /// in `missing_fields`. `status` is `Failed` when nothing usable was
    /// located at all.
    pub fn extract(&self, text: &str, schema: &ExtractionSchema) -> ExtractionResult {
        for parser in &self.parsers {
            let Some(parsed) = parser.parse(text, schema) else {
                debug!(
                    schema = schema.name(),
                    strategy = ?parser.strategy(),
                    "Parser located nothing"
                );
                continue;
            };
            if parsed.is_empty() {
                continue;
            }

            debug!(
                schema = schema.name(),
                strategy = ?parser.strategy(),
                confidence = parsed.confidence,
                located = parsed.fields.len(),
                "Parser located fields"
            );
            let located = self.post_process(parsed.fields, schema);
            return assemble(schema, located, Some(parser.strategy()));
        }

        let err = AdvisoryError::ExtractionFailure(format!(
            "no {} content located in {} chars",
            schema.name(),
            text.len()
        ));
        debug!(error = %err, "Falling back to schema defaults");
        assemble(schema, BTreeMap::new(), None)
    }

    /// Validate and normalize located fields; drops values that end up empty
    fn post_process(
        &self,
        mut fields: BTreeMap<FieldName, Value>,
        schema: &ExtractionSchema,
    ) -> BTreeMap<FieldName, Value> {
        match schema {
            ExtractionSchema::RecommendationSet { .. } => {
                if let Some(Value::Ranked(raw)) = fields.remove(RECOMMENDATIONS_FIELD) {
                    let validated = self.validate_records(raw);
                    if !validated.is_empty() {
                        fields.insert(RECOMMENDATIONS_FIELD.to_string(), Value::Ranked(validated));
                    }
                }
            }
            ExtractionSchema::FlashcardSet { max_cards } => {
                for value in fields.values_mut() {
                    if let Value::Cards(cards) = value {
                        if cards.len() > *max_cards {
                            debug!(
                                found = cards.len(),
                                max_cards, "Truncating flashcards to configured maximum"
                            );
                            cards.truncate(*max_cards);
                        }
                    }
                }
            }
            _ => {}
        }

        fields.retain(|_, value| !is_empty_value(value));
        fields
    }

    /// Resolve references against the catalog, drop unknown/duplicate ones,
    /// and renumber ranks 1..k in extraction order
    fn validate_records(&self, raw: Vec<RankedRecord>) -> Vec<RankedRecord> {
        let mut seen = HashSet::new();
        let mut validated = Vec::with_capacity(raw.len());

        for entry in raw {
            let Some(record) = self.catalog.resolve(&entry.record_id) else {
                let err = AdvisoryError::ValidationMismatch(entry.record_id.clone());
                debug!(error = %err, "Dropping recommendation not in catalog");
                continue;
            };
            if !seen.insert(record.id.clone()) {
                debug!(record_id = %record.id, "Dropping duplicate recommendation");
                continue;
            }
            validated.push(RankedRecord {
                record_id: record.id.clone(),
                rank: validated.len() as u32 + 1,
            });
        }

        validated
    }
}

/// Apply defaults, compute missing fields and status
fn assemble(
    schema: &ExtractionSchema,
    mut located: BTreeMap<FieldName, Value>,
    strategy: Option<ExtractionStrategy>,
) -> ExtractionResult {
    let mut fields = BTreeMap::new();
    let mut missing_fields = BTreeSet::new();
    let mut found = 0usize;

    for spec in schema.fields() {
        match located.remove(spec.name) {
            Some(value) => {
                found += 1;
                if spec.kind == FieldKind::Ranked {
                    if let ExtractionSchema::RecommendationSet { required } = schema {
                        let present = match &value {
                            Value::Ranked(records) => records.len(),
                            _ => 0,
                        };
                        missing_fields.extend(missing_slots(present, *required));
                    }
                }
                fields.insert(spec.name.to_string(), value);
            }
            None => {
                if let ExtractionSchema::RecommendationSet { required } = schema {
                    // An absent field is always reported, even when nothing is required
                    missing_fields.extend(missing_slots(0, (*required).max(1)));
                } else {
                    missing_fields.insert(spec.name.to_string());
                }
                fields.insert(spec.name.to_string(), spec.default.clone());
            }
        }
    }

    let status = if found == 0 {
        ExtractionStatus::Failed
    } else if missing_fields.is_empty() {
        ExtractionStatus::Complete
    } else {
        ExtractionStatus::Partial
    };

    ExtractionResult {
        status,
        fields,
        missing_fields,
        strategy: if found == 0 { None } else { strategy },
    }
}

/// `recommendations.N` names for the unfilled positions `present+1..=required`
fn missing_slots(present: usize, required: usize) -> impl Iterator<Item = FieldName> {
    (present + 1..=required).map(|slot| format!("{}.{}", RECOMMENDATIONS_FIELD, slot))
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Number(n) => !n.is_finite(),
        Value::Text(s) => s.trim().is_empty(),
        Value::List(items) => items.is_empty(),
        Value::Ranked(records) => records.is_empty(),
        Value::Cards(cards) => cards.is_empty(),
    }
}

static NUMBER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(-?\d[\d,]*(?:\.\d+)?|-?\.\d+)\s*(k|m)?\b").expect("number pattern is valid")
});

/// Parse the first number in `s`, locale-independently
///
/// Thousands separators are commas, the decimal mark is a period, and a
/// `k`/`m` suffix scales by a thousand/million: `$45,000` → 45000,
/// `12.5k` → 12500.
pub(crate) fn parse_number(s: &str) -> Option<f64> {
    let caps = NUMBER_RE.captures(s)?;
    let digits: String = caps[1].chars().filter(|&c| c != ',').collect();
    let base: f64 = digits.parse().ok()?;
    let scale = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
        Some(ref suffix) if suffix == "k" => 1_000.0,
        Some(ref suffix) if suffix == "m" => 1_000_000.0,
        _ => 1.0,
    };
    let value = base * scale;
    value.is_finite().then_some(value)
}

/// Build a card if both sides carry text
pub(crate) fn card(front: &str, back: &str) -> Option<Flashcard> {
    let front = front.trim();
    let back = back.trim();
    (!front.is_empty() && !back.is_empty()).then(|| Flashcard {
        front: front.to_string(),
        back: back.to_string(),
    })
}
