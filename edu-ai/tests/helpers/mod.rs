//! Shared fixtures for edu-ai integration tests

#![allow(dead_code)]

use edu_ai::advisory::{
    AdvisoryEngine, AdvisoryRequest, InMemoryQuota, LlmTransport, QuotaGate, ScriptedTransport,
};
use edu_ai::catalog::{BudgetBand, Catalog, UserProfile};
use edu_common::config::AdvisoryConfig;
use edu_common::events::{AdvisoryEvent, EventBus};
use std::sync::Arc;
use tokio::sync::broadcast;

pub const CATALOG_JSON: &str = include_str!("../fixtures/universities.json");

pub fn catalog() -> Arc<Catalog> {
    Arc::new(Catalog::from_json_str(CATALOG_JSON).expect("fixture catalog parses"))
}

/// Strength 85 (tier 5), budget up to 40k, prefers engineering
///
/// Fallback order over the fixture catalog:
/// umich, ucla, mit, stanford, purdue, asu, rit, brooklyn
pub fn strong_profile() -> UserProfile {
    UserProfile {
        strength_score: 85.0,
        budget: Some(BudgetBand {
            min: 0.0,
            max: 40_000.0,
        }),
        preferred_categories: vec!["engineering".to_string()],
    }
}

pub fn request(user_id: &str) -> AdvisoryRequest {
    AdvisoryRequest {
        user_id: user_id.to_string(),
        profile: strong_profile(),
        context: "Wants to study mechanical engineering.".to_string(),
    }
}

pub fn engine_with(
    transport: Arc<dyn LlmTransport>,
    quota: Arc<dyn QuotaGate>,
    catalog: Arc<Catalog>,
) -> (AdvisoryEngine, EventBus) {
    let events = EventBus::new(512);
    let engine = AdvisoryEngine::new(catalog, transport, quota, events.clone(), AdvisoryConfig::default());
    (engine, events)
}

/// Engine over the fixture catalog with a generous quota
pub fn engine(transport: ScriptedTransport) -> (AdvisoryEngine, EventBus) {
    engine_with(Arc::new(transport), Arc::new(InMemoryQuota::new(100)), catalog())
}

/// Drain everything currently queued on an event receiver
pub fn drain(rx: &mut broadcast::Receiver<AdvisoryEvent>) -> Vec<AdvisoryEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
