//! # Education Services Common Library
//!
//! Shared code for the advisory services:
//! - Error type and result alias
//! - Configuration loading (TOML bootstrap + environment overrides)
//! - Advisory event types and the EventBus used for SSE fan-out

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
