// Extraction Schemas
//
// Concept: Declarative description of the structured shape each advisory
// feature expects from the model, including per-field defaults.
//
// One enum, dispatched by match; the decode/accumulate machinery is shared.

use crate::advisory::types::Value;
use edu_common::config::AdvisoryConfig;
use edu_common::events::FeatureSlot;
use serde::{Deserialize, Serialize};

/// Field holding the ranked list in a RecommendationSet
pub const RECOMMENDATIONS_FIELD: &str = "recommendations";

/// Field holding the cards in a FlashcardSet
pub const CARDS_FIELD: &str = "cards";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "schema", rename_all = "snake_case")]
pub enum ExtractionSchema {
    /// Strength score, free-text assessment, strength/improvement lists
    ProfileAnalysis,
    /// Ordered `{record_id, rank}` list of catalog records
    RecommendationSet { required: usize },
    /// Nested numeric cost categories
    CostBreakdown,
    /// Question/answer cards
    FlashcardSet { max_cards: usize },
}

/// Shape of a field value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Number,
    Text,
    List,
    Ranked,
    Cards,
}

/// One expected field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    /// Result key (dotted for nested fields)
    pub name: &'static str,
    /// Element path inside the structured block
    pub path: &'static [&'static str],
    pub kind: FieldKind,
    /// Value used when the field cannot be located
    pub default: Value,
    /// Lower-case labels recognized by the line heuristics
    pub labels: &'static [&'static str],
}

impl FieldSpec {
    fn number(
        name: &'static str,
        path: &'static [&'static str],
        default: f64,
        labels: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            path,
            kind: FieldKind::Number,
            default: Value::Number(default),
            labels,
        }
    }

    fn text(
        name: &'static str,
        path: &'static [&'static str],
        labels: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            path,
            kind: FieldKind::Text,
            default: Value::Text(String::new()),
            labels,
        }
    }

    fn list(
        name: &'static str,
        path: &'static [&'static str],
        labels: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            path,
            kind: FieldKind::List,
            default: Value::List(Vec::new()),
            labels,
        }
    }
}

impl ExtractionSchema {
    /// Schema used by a feature slot, sized from configuration
    pub fn for_slot(slot: FeatureSlot, config: &AdvisoryConfig) -> Self {
        match slot {
            FeatureSlot::Analysis => ExtractionSchema::ProfileAnalysis,
            FeatureSlot::Recommendations => ExtractionSchema::RecommendationSet {
                required: config.recommendation_count.max(1),
            },
            FeatureSlot::CostEstimate => ExtractionSchema::CostBreakdown,
            FeatureSlot::Flashcards => ExtractionSchema::FlashcardSet {
                max_cards: config.max_flashcards.max(1),
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExtractionSchema::ProfileAnalysis => "profile_analysis",
            ExtractionSchema::RecommendationSet { .. } => "recommendation_set",
            ExtractionSchema::CostBreakdown => "cost_breakdown",
            ExtractionSchema::FlashcardSet { .. } => "flashcard_set",
        }
    }

    /// Tag of the designated structured block the model is asked to emit
    pub fn block_tag(&self) -> &'static str {
        match self {
            ExtractionSchema::ProfileAnalysis => "profile_analysis",
            ExtractionSchema::RecommendationSet { .. } => "recommendations",
            ExtractionSchema::CostBreakdown => "cost_breakdown",
            ExtractionSchema::FlashcardSet { .. } => "flashcards",
        }
    }

    /// Whether deterministic fallback scoring can stand in for the model
    pub fn has_fallback(&self) -> bool {
        matches!(self, ExtractionSchema::RecommendationSet { .. })
    }

    /// Expected fields, in declaration order
    pub fn fields(&self) -> Vec<FieldSpec> {
        match self {
            ExtractionSchema::ProfileAnalysis => vec![
                FieldSpec::number(
                    "strength_score",
                    &["strength_score"],
                    50.0,
                    &[
                        "strength score",
                        "profile strength",
                        "overall strength",
                        "overall score",
                        "score",
                    ],
                ),
                FieldSpec::text(
                    "summary",
                    &["summary"],
                    &["summary", "overview", "assessment"],
                ),
                FieldSpec::text(
                    "outlook",
                    &["outlook"],
                    &["outlook", "admission outlook", "admissions outlook", "chances"],
                ),
                FieldSpec::list(
                    "strengths",
                    &["strengths"],
                    &["strengths", "key strengths"],
                ),
                FieldSpec::list(
                    "improvement_areas",
                    &["improvement_areas"],
                    &[
                        "improvement areas",
                        "areas for improvement",
                        "areas to improve",
                        "weaknesses",
                        "improvements",
                    ],
                ),
            ],
            ExtractionSchema::RecommendationSet { .. } => vec![FieldSpec {
                name: RECOMMENDATIONS_FIELD,
                path: &[],
                kind: FieldKind::Ranked,
                default: Value::Ranked(Vec::new()),
                labels: &[],
            }],
            ExtractionSchema::CostBreakdown => vec![
                FieldSpec::number(
                    "tuition",
                    &["tuition"],
                    0.0,
                    &["tuition", "tuition and fees", "tuition & fees"],
                ),
                FieldSpec::number(
                    "living.housing",
                    &["living", "housing"],
                    0.0,
                    &["housing", "rent", "accommodation"],
                ),
                FieldSpec::number(
                    "living.food",
                    &["living", "food"],
                    0.0,
                    &["food", "meals", "groceries", "dining"],
                ),
                FieldSpec::number(
                    "living.transport",
                    &["living", "transport"],
                    0.0,
                    &["transport", "transportation", "travel"],
                ),
                FieldSpec::number(
                    "other.insurance",
                    &["other", "insurance"],
                    0.0,
                    &["insurance", "health insurance"],
                ),
                FieldSpec::number(
                    "other.books",
                    &["other", "books"],
                    0.0,
                    &["books", "books and supplies", "supplies"],
                ),
                FieldSpec::number(
                    "total",
                    &["total"],
                    0.0,
                    &["total", "total cost", "estimated total", "total annual cost"],
                ),
            ],
            ExtractionSchema::FlashcardSet { .. } => vec![FieldSpec {
                name: CARDS_FIELD,
                path: &[],
                kind: FieldKind::Cards,
                default: Value::Cards(Vec::new()),
                labels: &[],
            }],
        }
    }

    /// Instruction describing the structured block, appended to every prompt
    pub fn format_instructions(&self) -> String {
        match self {
            ExtractionSchema::ProfileAnalysis => "End your answer with exactly one block:\n\
                <profile_analysis>\n\
                  <strength_score value=\"0-100\"/>\n\
                  <summary>...</summary>\n\
                  <outlook>...</outlook>\n\
                  <strengths><item>...</item></strengths>\n\
                  <improvement_areas><item>...</item></improvement_areas>\n\
                </profile_analysis>"
                .to_string(),
            ExtractionSchema::RecommendationSet { required } => format!(
                "End your answer with exactly one block listing {} universities, \
                 one per line as `rank | university_id`, using only ids from the catalog:\n\
                 <recommendations>\n1 | example-id\n</recommendations>",
                required
            ),
            ExtractionSchema::CostBreakdown => "End your answer with exactly one block \
                (annual amounts, numbers only):\n\
                <cost_breakdown>\n\
                  <tuition amount=\"\"/>\n\
                  <living><housing amount=\"\"/><food amount=\"\"/><transport amount=\"\"/></living>\n\
                  <other><insurance amount=\"\"/><books amount=\"\"/></other>\n\
                  <total amount=\"\"/>\n\
                </cost_breakdown>"
                .to_string(),
            ExtractionSchema::FlashcardSet { max_cards } => format!(
                "End your answer with exactly one block of at most {} cards:\n\
                 <flashcards>\n\
                   <card><front>question</front><back>answer</back></card>\n\
                 </flashcards>",
                max_cards
            ),
        }
    }
}
