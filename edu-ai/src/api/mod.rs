//! HTTP API handlers for edu-ai
//!
//! REST endpoints to start, inspect, and cancel advisory sessions per slot,
//! plus an SSE stream of advisory events.

pub mod advisory;
pub mod health;
pub mod sse;

pub use advisory::advisory_routes;
pub use health::health_routes;
pub use sse::advisory_event_stream;
