// Advisory Session
//
// Concept: One streamed model interaction for one feature slot, driven from
// connect to a terminal state
//
// States: Idle → Streaming → Extracting → Done
//                    ↘ Failed  ↘ Failed
//         any non-terminal state → Cancelled
//
// Synchronization:
// - decode → accumulate is sequential inside the read loop
// - cancellation is cooperative (CancellationToken checked at every await)
// - every transition is logged and broadcast as AdvisoryEvent::StateChanged
// - quota is consumed exactly once, only after Done

use crate::advisory::accumulator::ContentAccumulator;
use crate::advisory::chunk_decoder::ChunkDecoder;
use crate::advisory::extractor::SchemaExtractor;
use crate::advisory::fallback_scorer::{DeterministicFallbackScorer, ScoreWeights};
use crate::advisory::merger::merge_recommendations;
use crate::advisory::prompt;
use crate::advisory::quota::{QuotaDecision, QuotaGate};
use crate::advisory::schema::{ExtractionSchema, RECOMMENDATIONS_FIELD};
use crate::advisory::transport::LlmTransport;
use crate::advisory::types::{
    AdvisoryError, AdvisoryOutcome, EntryOrigin, ExtractionResult, ExtractionStatus,
};
use crate::catalog::{Catalog, UserProfile};
use chrono::{DateTime, Utc};
use edu_common::config::AdvisoryConfig;
use edu_common::events::{AdvisoryEvent, EventBus, FeatureSlot, SessionState};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Caller input for one session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdvisoryRequest {
    pub user_id: String,
    #[serde(default)]
    pub profile: UserProfile,
    /// Free-form notes forwarded to the model
    #[serde(default)]
    pub context: String,
}

impl AdvisoryRequest {
    /// Reject requests the engine cannot sensibly score
    pub fn validate(&self) -> edu_common::Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(edu_common::Error::InvalidInput(
                "user_id must not be empty".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.profile.strength_score) {
            return Err(edu_common::Error::InvalidInput(format!(
                "strength_score {} outside 0..=100",
                self.profile.strength_score
            )));
        }
        if let Some(budget) = self.profile.budget {
            if budget.min > budget.max {
                return Err(edu_common::Error::InvalidInput(format!(
                    "budget min {} exceeds max {}",
                    budget.min, budget.max
                )));
            }
        }
        Ok(())
    }
}

/// Session record as seen by observers
#[derive(Debug, Clone, Serialize)]
pub struct AdvisorySession {
    pub session_id: Uuid,
    pub slot: FeatureSlot,
    pub user_id: String,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Fragments accepted into the buffer so far
    pub fragment_count: u64,
    pub outcome: Option<AdvisoryOutcome>,
    pub error: Option<String>,
}

/// Record of one state change
#[derive(Debug, Clone, PartialEq)]
pub struct StateTransition {
    pub session_id: Uuid,
    pub old_state: SessionState,
    pub new_state: SessionState,
    pub transitioned_at: DateTime<Utc>,
}

impl AdvisorySession {
    pub fn new(slot: FeatureSlot, user_id: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            slot,
            user_id: user_id.into(),
            state: SessionState::Idle,
            started_at: Utc::now(),
            ended_at: None,
            fragment_count: 0,
            outcome: None,
            error: None,
        }
    }

    /// Move to `new_state`, stamping the end time for terminal states
    pub fn transition_to(&mut self, new_state: SessionState) -> StateTransition {
        if !is_valid_transition(self.state, new_state) {
            warn!(
                session_id = %self.session_id,
                from = ?self.state,
                to = ?new_state,
                "Unexpected session state transition"
            );
        }

        let transition = StateTransition {
            session_id: self.session_id,
            old_state: self.state,
            new_state,
            transitioned_at: Utc::now(),
        };
        self.state = new_state;
        if new_state.is_terminal() {
            self.ended_at = Some(transition.transitioned_at);
        }
        transition
    }
}

pub fn is_valid_transition(from: SessionState, to: SessionState) -> bool {
    use SessionState::*;
    matches!(
        (from, to),
        (Idle, Streaming)
            | (Streaming, Extracting)
            | (Streaming, Failed)
            | (Extracting, Done)
            | (Extracting, Failed)
            | (Idle | Streaming | Extracting, Cancelled)
    )
}

/// Shared, observable session record
pub struct SessionCell {
    record: RwLock<AdvisorySession>,
    state: watch::Sender<SessionState>,
}

impl SessionCell {
    pub fn new(session: AdvisorySession) -> Arc<Self> {
        let (state, _) = watch::channel(session.state);
        Arc::new(Self {
            record: RwLock::new(session),
            state,
        })
    }

    pub async fn snapshot(&self) -> AdvisorySession {
        self.record.read().await.clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Wait until the session reaches a terminal state
    pub async fn wait_terminal(&self) -> AdvisorySession {
        let mut rx = self.state.subscribe();
        // Sender lives as long as self, so the wait cannot error
        let _ = rx.wait_for(|state| state.is_terminal()).await;
        self.snapshot().await
    }

    async fn transition(&self, new_state: SessionState) -> StateTransition {
        let transition = self.record.write().await.transition_to(new_state);
        self.state.send_replace(new_state);
        transition
    }
}

/// Runs sessions against the shared catalog, transport, and quota gate
pub struct AdvisoryEngine {
    catalog: Arc<Catalog>,
    extractor: SchemaExtractor,
    scorer: DeterministicFallbackScorer,
    transport: Arc<dyn LlmTransport>,
    quota: Arc<dyn QuotaGate>,
    events: EventBus,
    config: AdvisoryConfig,
}

impl AdvisoryEngine {
    pub fn new(
        catalog: Arc<Catalog>,
        transport: Arc<dyn LlmTransport>,
        quota: Arc<dyn QuotaGate>,
        events: EventBus,
        config: AdvisoryConfig,
    ) -> Self {
        Self {
            extractor: SchemaExtractor::new(Arc::clone(&catalog)),
            scorer: DeterministicFallbackScorer::new(
                Arc::clone(&catalog),
                ScoreWeights::from(&config),
            ),
            catalog,
            transport,
            quota,
            events,
            config,
        }
    }

    pub fn config(&self) -> &AdvisoryConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Run one session to completion without a registry
    pub async fn run_once(&self, slot: FeatureSlot, request: AdvisoryRequest) -> AdvisorySession {
        let cell = SessionCell::new(AdvisorySession::new(slot, request.user_id.clone()));
        let accumulator = ContentAccumulator::new(self.config.event_capacity);
        self.run(cell, request, accumulator, CancellationToken::new())
            .await
    }

    /// Drive a session from `Idle` to a terminal state
    ///
    /// Never returns an error: failures end the session in `Failed` with the
    /// reason recorded on the session and broadcast.
    pub async fn run(
        &self,
        cell: Arc<SessionCell>,
        request: AdvisoryRequest,
        mut accumulator: ContentAccumulator,
        cancel: CancellationToken,
    ) -> AdvisorySession {
        let (session_id, slot) = {
            let record = cell.record.read().await;
            (record.session_id, record.slot)
        };
        let schema = ExtractionSchema::for_slot(slot, &self.config);

        info!(
            session_id = %session_id,
            slot = slot.as_str(),
            user_id = %request.user_id,
            schema = schema.name(),
            "Starting advisory session"
        );
        self.events.emit_lossy(AdvisoryEvent::SessionStarted {
            session_id,
            slot,
            timestamp: Utc::now(),
        });

        if cancel.is_cancelled() {
            return self.finish_cancelled(&cell, &mut accumulator).await;
        }

        // Phase 1: Streaming
        self.transition(&cell, SessionState::Streaming).await;

        let completion = prompt::build_request(
            &schema,
            &request.profile,
            &request.context,
            &self.catalog,
        );
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return self.finish_cancelled(&cell, &mut accumulator).await;
            }
            opened = self.transport.open(&completion) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => return self.finish_failed(&cell, &mut accumulator, e).await,
        };

        let mut decoder = ChunkDecoder::new();
        while !accumulator.is_complete() {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return self.finish_cancelled(&cell, &mut accumulator).await;
                }
                next = stream.next() => next,
            };

            let fragments = match next {
                Some(Ok(bytes)) => decoder.decode(&bytes),
                Some(Err(e)) => return self.finish_failed(&cell, &mut accumulator, e).await,
                None => decoder.finish(),
            };

            for fragment in fragments {
                // One chunk can carry many fragments; none is appended after abort
                if cancel.is_cancelled() {
                    return self.finish_cancelled(&cell, &mut accumulator).await;
                }
                match accumulator.append(fragment) {
                    Ok(snapshot) => {
                        let fragment_count = snapshot.fragment_count;
                        // Published before the lock await; cancellation is rechecked on resume
                        self.events.emit_lossy(AdvisoryEvent::Progress {
                            session_id,
                            slot,
                            fragment_count,
                            text: snapshot.text,
                        });
                        cell.record.write().await.fragment_count = fragment_count;
                    }
                    Err(e) => debug!(session_id = %session_id, error = %e, "Fragment discarded"),
                }
            }

            if let Some(e) = decoder.take_failure() {
                return self.finish_failed(&cell, &mut accumulator, e).await;
            }
        }
        drop(stream);

        if decoder.skipped_lines() > 0 {
            warn!(
                session_id = %session_id,
                skipped = decoder.skipped_lines(),
                "Stream contained malformed lines"
            );
        }

        // Phase 2: Extracting
        if cancel.is_cancelled() {
            return self.finish_cancelled(&cell, &mut accumulator).await;
        }
        self.transition(&cell, SessionState::Extracting).await;

        let text = accumulator.final_text().unwrap_or_default().to_string();
        let extraction = self.extractor.extract(&text, &schema);
        info!(
            session_id = %session_id,
            status = ?extraction.status,
            strategy = ?extraction.strategy,
            missing = extraction.missing_fields.len(),
            "Extraction finished"
        );

        let outcome = match self.build_outcome(&schema, extraction, &request.profile) {
            Ok(outcome) => outcome,
            Err(e) => return self.finish_failed(&cell, &mut accumulator, e).await,
        };

        if cancel.is_cancelled() {
            return self.finish_cancelled(&cell, &mut accumulator).await;
        }

        // Phase 3: Done
        accumulator.close();
        let degraded = outcome.degraded;
        cell.record.write().await.outcome = Some(outcome);
        self.transition(&cell, SessionState::Done).await;

        if let Some(message) = self.consume_quota(session_id, slot, &request.user_id).await {
            if let Some(outcome) = cell.record.write().await.outcome.as_mut() {
                outcome.quota_message = Some(message);
            }
        }

        self.events.emit_lossy(AdvisoryEvent::SessionCompleted {
            session_id,
            slot,
            degraded,
            timestamp: Utc::now(),
        });
        info!(session_id = %session_id, degraded, "Advisory session completed");

        cell.snapshot().await
    }

    /// Decide Done vs Failed for the extracted result
    fn build_outcome(
        &self,
        schema: &ExtractionSchema,
        extraction: ExtractionResult,
        profile: &UserProfile,
    ) -> Result<AdvisoryOutcome, AdvisoryError> {
        match schema {
            ExtractionSchema::ProfileAnalysis => Ok(AdvisoryOutcome {
                degraded: !extraction.missing_fields.is_empty(),
                extraction,
                recommendations: Vec::new(),
                quota_message: None,
            }),
            ExtractionSchema::RecommendationSet { required } => {
                let extracted = extraction.ranked(RECOMMENDATIONS_FIELD);
                let present: HashSet<String> =
                    extracted.iter().map(|r| r.record_id.clone()).collect();
                let needed = required.saturating_sub(extracted.len());
                let scored = self.scorer.rank_excluding(profile, needed, &present);
                let recommendations = merge_recommendations(extracted, &scored, *required);

                if recommendations.is_empty() && *required > 0 {
                    return Err(AdvisoryError::ExtractionFailure(
                        "no recommendations from model and catalog is empty".to_string(),
                    ));
                }

                let fallback_used = recommendations
                    .iter()
                    .any(|e| e.origin == EntryOrigin::Fallback);
                if fallback_used {
                    info!(
                        from_model = extracted.len().min(*required),
                        from_fallback = recommendations.len() - extracted.len().min(*required),
                        "Recommendations filled by fallback scoring"
                    );
                }

                Ok(AdvisoryOutcome {
                    degraded: fallback_used || !extraction.missing_fields.is_empty(),
                    extraction,
                    recommendations,
                    quota_message: None,
                })
            }
            ExtractionSchema::CostBreakdown | ExtractionSchema::FlashcardSet { .. } => {
                if extraction.status == ExtractionStatus::Failed {
                    return Err(AdvisoryError::ExtractionFailure(format!(
                        "no {} located in model output",
                        schema.name()
                    )));
                }
                Ok(AdvisoryOutcome {
                    degraded: extraction.status == ExtractionStatus::Partial,
                    extraction,
                    recommendations: Vec::new(),
                    quota_message: None,
                })
            }
        }
    }

    /// Consume quota once; returns the denial message, if any
    async fn consume_quota(
        &self,
        session_id: Uuid,
        slot: FeatureSlot,
        user_id: &str,
    ) -> Option<String> {
        match self.quota.consume(user_id, slot).await {
            Ok(QuotaDecision::Allow) => None,
            Ok(QuotaDecision::Deny { message }) => {
                self.events.emit_lossy(AdvisoryEvent::QuotaDenied {
                    session_id,
                    user_id: user_id.to_string(),
                    message: message.clone(),
                });
                Some(message)
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Quota gate unavailable");
                None
            }
        }
    }

    async fn transition(&self, cell: &SessionCell, new_state: SessionState) -> StateTransition {
        let transition = cell.transition(new_state).await;
        let slot = cell.record.read().await.slot;

        info!(
            session_id = %transition.session_id,
            slot = slot.as_str(),
            from = ?transition.old_state,
            to = ?transition.new_state,
            "Session state changed"
        );
        self.events.emit_lossy(AdvisoryEvent::StateChanged {
            session_id: transition.session_id,
            slot,
            old_state: transition.old_state,
            new_state: transition.new_state,
            timestamp: transition.transitioned_at,
        });
        transition
    }

    async fn finish_failed(
        &self,
        cell: &SessionCell,
        accumulator: &mut ContentAccumulator,
        error: AdvisoryError,
    ) -> AdvisorySession {
        accumulator.close();
        cell.record.write().await.error = Some(error.to_string());
        let transition = self.transition(cell, SessionState::Failed).await;

        warn!(session_id = %transition.session_id, error = %error, "Advisory session failed");
        let slot = cell.record.read().await.slot;
        self.events.emit_lossy(AdvisoryEvent::SessionFailed {
            session_id: transition.session_id,
            slot,
            error: error.to_string(),
            timestamp: transition.transitioned_at,
        });
        cell.snapshot().await
    }

    async fn finish_cancelled(
        &self,
        cell: &SessionCell,
        accumulator: &mut ContentAccumulator,
    ) -> AdvisorySession {
        accumulator.close();
        let transition = self.transition(cell, SessionState::Cancelled).await;

        info!(session_id = %transition.session_id, "Advisory session cancelled");
        let slot = cell.record.read().await.slot;
        self.events.emit_lossy(AdvisoryEvent::SessionCancelled {
            session_id: transition.session_id,
            slot,
            timestamp: transition.transitioned_at,
        });
        cell.snapshot().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_to_stamps_terminal_end() {
        let mut session = AdvisorySession::new(FeatureSlot::Analysis, "u1");
        let t = session.transition_to(SessionState::Streaming);
        assert_eq!(t.old_state, SessionState::Idle);
        assert!(session.ended_at.is_none());

        session.transition_to(SessionState::Failed);
        assert!(session.ended_at.is_some());
    }

    #[test]
    fn test_request_validation() {
        let mut request = AdvisoryRequest {
            user_id: "u1".into(),
            ..Default::default()
        };
        assert!(request.validate().is_ok());

        request.profile.strength_score = 120.0;
        assert!(request.validate().is_err());

        request.profile.strength_score = 60.0;
        request.profile.budget = Some(crate::catalog::BudgetBand {
            min: 50_000.0,
            max: 10_000.0,
        });
        assert!(request.validate().is_err());

        request.profile.budget = None;
        request.user_id = "  ".into();
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_valid_transitions() {
        use SessionState::*;
        assert!(is_valid_transition(Idle, Streaming));
        assert!(is_valid_transition(Extracting, Done));
        assert!(is_valid_transition(Streaming, Cancelled));
        assert!(!is_valid_transition(Done, Cancelled));
        assert!(!is_valid_transition(Idle, Done));
        assert!(!is_valid_transition(Failed, Streaming));
    }

    #[tokio::test]
    async fn test_cell_wait_terminal() {
        let cell = SessionCell::new(AdvisorySession::new(FeatureSlot::Flashcards, "u1"));
        let waiter = {
            let cell = Arc::clone(&cell);
            tokio::spawn(async move { cell.wait_terminal().await })
        };

        cell.transition(SessionState::Streaming).await;
        cell.transition(SessionState::Cancelled).await;

        let finished = waiter.await.unwrap();
        assert_eq!(finished.state, SessionState::Cancelled);
        assert_eq!(cell.state(), SessionState::Cancelled);
    }
}
