// Shared Types and Data Contracts
//
// Contracts between the pipeline stages:
//   ChunkDecoder → StreamFragment → ContentAccumulator → BufferSnapshot
//   SchemaExtractor → ExtractionResult → merger → AdvisoryOutcome

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// Stream Types
// ============================================================================

/// One decoded piece of model output
///
/// Contract: sequence numbers are strictly increasing within a session.
/// The final fragment has `is_final = true` and empty text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFragment {
    pub sequence: u64,
    pub text: String,
    pub is_final: bool,
}

impl StreamFragment {
    pub fn text(sequence: u64, text: impl Into<String>) -> Self {
        Self {
            sequence,
            text: text.into(),
            is_final: false,
        }
    }

    pub fn end(sequence: u64) -> Self {
        Self {
            sequence,
            text: String::new(),
            is_final: true,
        }
    }
}

/// Read-only view of the accumulated buffer
///
/// Always equal to a prefix of the final text (never a torn fragment).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BufferSnapshot {
    pub text: String,
    pub fragment_count: u64,
    pub complete: bool,
}

// ============================================================================
// Extraction Types
// ============================================================================

/// Schema field name (dotted for nested fields, e.g. `living.housing`)
pub type FieldName = String;

/// One recommended record as emitted by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedRecord {
    pub record_id: String,
    pub rank: u32,
}

/// One generated flashcard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flashcard {
    pub front: String,
    pub back: String,
}

/// Typed field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Number(f64),
    Text(String),
    List(Vec<String>),
    Ranked(Vec<RankedRecord>),
    Cards(Vec<Flashcard>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    /// Every schema field located
    Complete,
    /// Some fields located, others defaulted
    Partial,
    /// Nothing usable located
    Failed,
}

/// Which parser in the pipeline produced the located fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// Designated structured block (tag/attribute or delimited list)
    TaggedBlock,
    /// Line-oriented label/value heuristics
    LineHeuristic,
}

/// Result of structured extraction
///
/// Invariant: `status == Complete` iff `missing_fields` is empty and at least
/// one field was located. Ordered collections keep serialization stable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionResult {
    pub status: ExtractionStatus,
    pub fields: BTreeMap<FieldName, Value>,
    pub missing_fields: BTreeSet<FieldName>,
    pub strategy: Option<ExtractionStrategy>,
}

impl ExtractionResult {
    pub fn is_complete(&self) -> bool {
        self.status == ExtractionStatus::Complete
    }

    pub fn number(&self, field: &str) -> Option<f64> {
        match self.fields.get(field) {
            Some(Value::Number(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        match self.fields.get(field) {
            Some(Value::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn list(&self, field: &str) -> Option<&[String]> {
        match self.fields.get(field) {
            Some(Value::List(items)) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// Ranked records stored under `field` (empty if absent)
    pub fn ranked(&self, field: &str) -> &[RankedRecord] {
        match self.fields.get(field) {
            Some(Value::Ranked(records)) => records.as_slice(),
            _ => &[],
        }
    }

    /// Flashcards stored under `field` (empty if absent)
    pub fn cards(&self, field: &str) -> &[Flashcard] {
        match self.fields.get(field) {
            Some(Value::Cards(cards)) => cards.as_slice(),
            _ => &[],
        }
    }
}

// ============================================================================
// Outcome Types
// ============================================================================

/// Provenance of a delivered recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOrigin {
    /// Extracted from model output
    Model,
    /// Supplied by deterministic fallback scoring
    Fallback,
}

/// Final recommendation entry after fallback merge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendationEntry {
    pub record_id: String,
    /// 1-based position in the merged list
    pub rank: u32,
    pub origin: EntryOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

/// Final typed result of a completed session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdvisoryOutcome {
    pub extraction: ExtractionResult,
    /// Merged list (recommendation sessions only)
    pub recommendations: Vec<RecommendationEntry>,
    /// Defaults or fallback entries contributed to this result
    pub degraded: bool,
    /// User-facing message when the quota gate denied the session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota_message: Option<String>,
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum AdvisoryError {
    /// Connection refused or dropped; terminal for the session
    #[error("Transport error: {0}")]
    Transport(String),

    /// Unparseable stream line; skipped
    #[error("Framing error: {0}")]
    Framing(String),

    /// No structured content located
    #[error("Extraction failed: {0}")]
    ExtractionFailure(String),

    /// Extracted identifier not present in the catalog; entry dropped
    #[error("Unknown record identifier: {0}")]
    ValidationMismatch(String),

    /// Out-of-order or post-completion fragment; discarded
    #[error("Fragment rejected: {0}")]
    FragmentRejected(String),

    #[error("Session cancelled")]
    Cancelled,

    #[error("Quota gate error: {0}")]
    Quota(String),
}

impl From<reqwest::Error> for AdvisoryError {
    fn from(err: reqwest::Error) -> Self {
        AdvisoryError::Transport(err.to_string())
    }
}

pub type AdvisoryResult<T> = Result<T, AdvisoryError>;
