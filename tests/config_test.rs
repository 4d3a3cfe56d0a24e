//! Integration tests for configuration loading

use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;
use waitline::infra::Config;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[site]
id = "test-clinic"

[store]
collection = "places"
file = "/tmp/places.json"

[history]
max_visits = 5

[positioning]
high_accuracy = false
timeout_ms = 8000

[geocoder]
url = "http://geocoder.test/search"
enabled = false

[briefing]
url = "http://briefing.test/generate"
api_key = "test-key"
locale = "en-US"

[journal]
file = "/tmp/test-checkins.jsonl"

[metrics]
interval_secs = 15

[logging]
json = true
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "test-clinic");
    assert_eq!(config.store_collection(), "places");
    assert_eq!(config.store_file(), "/tmp/places.json");
    assert_eq!(config.max_visits(), 5);
    assert!(!config.high_accuracy());
    assert_eq!(config.watch_options().timeout, Duration::from_millis(8000));
    assert_eq!(config.geocoder_url(), "http://geocoder.test/search");
    assert!(!config.geocoder_enabled());
    assert_eq!(config.briefing_api_key(), Some("test-key"));
    assert_eq!(config.briefing_locale(), "en-US");
    assert_eq!(config.journal_file(), "/tmp/test-checkins.jsonl");
    assert_eq!(config.metrics_interval_secs(), 15);
    assert!(config.log_json());
}

#[test]
fn test_partial_config_keeps_defaults() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[site]\nid = \"partial\"\n").unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "partial");
    assert_eq!(config.store_collection(), "locations");
    assert_eq!(config.max_visits(), 20);
    assert_eq!(config.briefing_locale(), "he-IL");
    assert!(config.high_accuracy());
}

#[test]
fn test_invalid_toml_is_an_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[history\nmax_visits = ").unwrap();
    temp_file.flush().unwrap();

    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.store_collection(), "locations");
    assert_eq!(config.max_visits(), 20);
    assert_eq!(config.positioning_timeout_ms(), 5000);
    assert_eq!(config.config_file(), "default");
}
