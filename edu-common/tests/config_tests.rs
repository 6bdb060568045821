//! Configuration resolution and graceful degradation tests
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Tests that manipulate EDU_CONFIG or EDU_LLM_API_KEY are marked with #[serial]
//! to ensure they run sequentially, not in parallel.

use edu_common::config::{
    load_config, load_config_file, resolve_config_path, TomlConfig, API_KEY_ENV_VAR,
    CONFIG_ENV_VAR,
};
use edu_common::events::EventBus;
use serial_test::serial;
use std::env;
use std::io::Write;
use std::path::PathBuf;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_cli_argument_wins_over_env() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/edu-from-env.toml");

    let path = resolve_config_path(Some("/tmp/edu-from-cli.toml"));
    assert_eq!(path, Some(PathBuf::from("/tmp/edu-from-cli.toml")));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_env_var_used_without_cli_argument() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/edu-from-env.toml");

    let path = resolve_config_path(None);
    assert_eq!(path, Some(PathBuf::from("/tmp/edu-from-env.toml")));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
fn test_missing_file_degrades_to_defaults() {
    let config = load_config_file(&PathBuf::from("/nonexistent/edu/edu-ai.toml")).unwrap();
    assert_eq!(config.advisory.recommendation_count, 5);
    assert_eq!(config.logging.level, "info");
}

#[test]
#[serial]
fn test_load_config_reads_named_file() {
    let file = write_config(
        r#"
        [logging]
        level = "debug"

        [server]
        port = 6001

        [advisory]
        recommendation_count = 3
        catalog_path = "/srv/edu/universities.json"
        "#,
    );

    let config = load_config(Some(file.path().to_str().unwrap())).unwrap();
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.server.port, 6001);
    assert_eq!(config.advisory.recommendation_count, 3);
    assert_eq!(
        config.advisory.catalog_path,
        Some(PathBuf::from("/srv/edu/universities.json"))
    );
}

#[test]
fn test_malformed_file_is_an_error() {
    let file = write_config("[server]\nport = \"not a number\"\n");
    assert!(load_config_file(file.path()).is_err());
}

#[test]
#[serial]
fn test_api_key_env_has_priority_over_toml() {
    let mut config = TomlConfig::default();
    config.llm.api_key = Some("toml-key".to_string());

    env::set_var(API_KEY_ENV_VAR, "env-key");
    assert_eq!(config.resolve_llm_api_key().as_deref(), Some("env-key"));

    env::remove_var(API_KEY_ENV_VAR);
    assert_eq!(config.resolve_llm_api_key().as_deref(), Some("toml-key"));
}

#[test]
#[serial]
fn test_blank_api_keys_are_ignored() {
    env::set_var(API_KEY_ENV_VAR, "   ");
    let mut config = TomlConfig::default();
    config.llm.api_key = Some(String::new());

    assert!(config.resolve_llm_api_key().is_none());

    env::remove_var(API_KEY_ENV_VAR);
}

#[test]
fn test_zero_capacity_config_builds_event_bus() {
    let file = write_config(
        "[advisory]\nevent_capacity = 0\nrecommendation_count = 0\nmax_flashcards = 0\n",
    );
    let config = load_config_file(file.path()).unwrap();

    assert_eq!(config.advisory.event_capacity, 1);
    assert_eq!(config.advisory.recommendation_count, 1);
    assert_eq!(config.advisory.max_flashcards, 1);

    let bus = EventBus::new(config.advisory.event_capacity);
    let _rx = bus.subscribe();
    assert_eq!(EventBus::new(0).capacity(), 1);
}
