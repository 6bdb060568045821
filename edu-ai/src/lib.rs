//! edu-ai library interface
//!
//! Exposes the advisory engine and HTTP router for the binary and for
//! integration testing.

pub mod advisory;
pub mod api;
pub mod catalog;
pub mod error;

pub use crate::error::{ApiError, ApiResult};

use crate::advisory::{AdvisoryEngine, LlmTransport, QuotaGate, SlotRegistry};
use crate::catalog::Catalog;
use axum::Router;
use chrono::{DateTime, Utc};
use edu_common::config::AdvisoryConfig;
use edu_common::events::EventBus;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Read-only university catalog shared by all sessions
    pub catalog: Arc<Catalog>,
    /// Active session per feature slot
    pub registry: Arc<SlotRegistry>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        catalog: Arc<Catalog>,
        transport: Arc<dyn LlmTransport>,
        quota: Arc<dyn QuotaGate>,
        event_bus: EventBus,
        config: AdvisoryConfig,
    ) -> Self {
        let engine = AdvisoryEngine::new(
            Arc::clone(&catalog),
            transport,
            quota,
            event_bus.clone(),
            config,
        );
        Self {
            event_bus,
            catalog,
            registry: Arc::new(SlotRegistry::new(Arc::new(engine))),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .route("/advisory/events", get(api::advisory_event_stream))
        .merge(api::advisory_routes())
        .merge(api::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        // Front ends are served from other origins
        .layer(CorsLayer::permissive())
}
