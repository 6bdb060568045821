//! Streaming advisory engine
//!
//! Pipeline per session:
//!   LlmTransport → ChunkDecoder → ContentAccumulator → SchemaExtractor
//!   → (DeterministicFallbackScorer + merger) → AdvisoryOutcome
//!
//! AdvisorySession drives the pipeline as a state machine; SlotRegistry keeps
//! one active session per feature slot.

pub mod accumulator;
pub mod chunk_decoder;
pub mod extractor;
pub mod fallback_scorer;
pub mod merger;
pub mod prompt;
pub mod quota;
pub mod schema;
pub mod session;
pub mod slot_registry;
pub mod transport;
pub mod types;

pub use accumulator::ContentAccumulator;
pub use chunk_decoder::ChunkDecoder;
pub use extractor::SchemaExtractor;
pub use fallback_scorer::{DeterministicFallbackScorer, ScoreWeights, ScoredRecord};
pub use merger::merge_recommendations;
pub use quota::{InMemoryQuota, QuotaDecision, QuotaGate};
pub use schema::ExtractionSchema;
pub use session::{AdvisoryEngine, AdvisoryRequest, AdvisorySession, SessionCell};
pub use slot_registry::{SessionHandle, SlotRegistry};
pub use transport::{CompletionRequest, HttpLlmTransport, LlmTransport, ScriptStep, ScriptedTransport};
pub use types::*;
