//! Configuration loading for the advisory services
//!
//! Bootstrap configuration comes from a single TOML file. Resolution order for
//! the file location:
//! 1. Command-line argument (highest priority)
//! 2. `EDU_CONFIG` environment variable
//! 3. Platform config directory (`~/.config/edu/edu-ai.toml` on Linux)
//! 4. Compiled defaults (no file)
//!
//! A missing file is never fatal: a warning is logged and defaults apply.
//! A file that exists but fails to parse is a configuration error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the TOML config file
pub const CONFIG_ENV_VAR: &str = "EDU_CONFIG";

/// Environment variable carrying the LLM backend API key
pub const API_KEY_ENV_VAR: &str = "EDU_LLM_API_KEY";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub advisory: AdvisoryConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` overrides
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// LLM backend connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Streaming chat-completions endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// API key (prefer the `EDU_LLM_API_KEY` environment variable)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Outbound request budget shared by all sessions
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Advisory engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisoryConfig {
    /// Number of recommendations a recommendation session must deliver
    #[serde(default = "default_recommendation_count")]
    pub recommendation_count: usize,

    /// Upper bound on generated flashcards
    #[serde(default = "default_max_flashcards")]
    pub max_flashcards: usize,

    /// JSON file holding the university catalog
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,

    /// Broadcast channel capacity for advisory events
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Completed sessions allowed per user by the in-memory quota gate
    #[serde(default = "default_free_sessions")]
    pub free_sessions_per_user: u32,

    #[serde(default = "default_fit_weight")]
    pub fit_weight: f64,

    #[serde(default = "default_budget_weight")]
    pub budget_weight: f64,

    #[serde(default = "default_category_weight")]
    pub category_weight: f64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5740
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_requests_per_minute() -> u32 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_recommendation_count() -> usize {
    5
}

fn default_max_flashcards() -> usize {
    20
}

fn default_event_capacity() -> usize {
    256
}

fn default_free_sessions() -> u32 {
    10
}

fn default_fit_weight() -> f64 {
    50.0
}

fn default_budget_weight() -> f64 {
    25.0
}

fn default_category_weight() -> f64 {
    10.0
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: None,
            requests_per_minute: default_requests_per_minute(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for AdvisoryConfig {
    fn default() -> Self {
        Self {
            recommendation_count: default_recommendation_count(),
            max_flashcards: default_max_flashcards(),
            catalog_path: None,
            event_capacity: default_event_capacity(),
            free_sessions_per_user: default_free_sessions(),
            fit_weight: default_fit_weight(),
            budget_weight: default_budget_weight(),
            category_weight: default_category_weight(),
        }
    }
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        config.advisory.clamp_counts();
        Ok(config)
    }

    /// Resolve the LLM API key
    ///
    /// **Priority:** ENV → TOML. Blank values are ignored.
    pub fn resolve_llm_api_key(&self) -> Option<String> {
        let env_key = std::env::var(API_KEY_ENV_VAR)
            .ok()
            .filter(|k| is_valid_key(k));
        let toml_key = self.llm.api_key.clone().filter(|k| is_valid_key(k));

        if env_key.is_some() && toml_key.is_some() {
            warn!(
                "LLM API key found in both {} and TOML config. Using environment (highest priority).",
                API_KEY_ENV_VAR
            );
        }

        env_key.or(toml_key)
    }
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Locate the config file following the documented priority order
///
/// Returns `None` when no candidate exists on disk (and none was named
/// explicitly), meaning compiled defaults should be used.
pub fn resolve_config_path(cli_arg: Option<&str>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(PathBuf::from(path));
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    dirs::config_dir()
        .map(|d| d.join("edu").join("edu-ai.toml"))
        .filter(|p| p.exists())
}

/// Load configuration, degrading to defaults when no file is available
pub fn load_config(cli_arg: Option<&str>) -> Result<TomlConfig> {
    match resolve_config_path(cli_arg) {
        Some(path) => load_config_file(&path),
        None => {
            info!("No config file found, using compiled defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Load a specific config file; a missing file yields defaults
pub fn load_config_file(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!(
            "Config file not found: {} (continuing with defaults)",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    let config = TomlConfig::from_toml_str(&content)?;
    info!("Configuration loaded from {}", path.display());
    Ok(config)
}

impl AdvisoryConfig {
    /// Raise zero counts and capacities to 1
    ///
    /// A zero event capacity cannot back a broadcast channel, and a zero
    /// recommendation or card count would make an empty answer look complete.
    pub fn clamp_counts(&mut self) {
        for (name, value) in [
            ("recommendation_count", &mut self.recommendation_count),
            ("max_flashcards", &mut self.max_flashcards),
            ("event_capacity", &mut self.event_capacity),
        ] {
            if *value == 0 {
                warn!("advisory.{} = 0 is not usable, using 1", name);
                *value = 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = TomlConfig::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.advisory.recommendation_count, 5);
        assert_eq!(config.llm.requests_per_minute, 30);
        assert!(config.advisory.catalog_path.is_none());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = TomlConfig::from_toml_str(
            r#"
            [advisory]
            recommendation_count = 8

            [llm]
            model = "local-model"
            "#,
        )
        .unwrap();

        assert_eq!(config.advisory.recommendation_count, 8);
        assert_eq!(config.advisory.fit_weight, 50.0);
        assert_eq!(config.llm.model, "local-model");
        assert_eq!(config.llm.endpoint, default_endpoint());
        assert_eq!(config.server.port, 5740);
    }

    #[test]
    fn test_zero_counts_clamped_on_parse() {
        let config = TomlConfig::from_toml_str(
            r#"
            [advisory]
            recommendation_count = 0
            max_flashcards = 0
            event_capacity = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.advisory.recommendation_count, 1);
        assert_eq!(config.advisory.max_flashcards, 1);
        assert_eq!(config.advisory.event_capacity, 1);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = TomlConfig::from_toml_str("[advisory\nbroken").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_is_valid_key() {
        assert!(is_valid_key("sk-123"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("   "));
    }
}
