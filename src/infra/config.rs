//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::domain::types::{DEFAULT_INTEL_LOCALE, MAX_VISIT_HISTORY};
use crate::io::positioning::WatchOptions;
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Deployment identifier, stamped on journal lines
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "waitline".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Snapshot file backing the in-process store
    #[serde(default = "default_store_file")]
    pub file: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { collection: default_collection(), file: default_store_file() }
    }
}

fn default_collection() -> String {
    "locations".to_string()
}

fn default_store_file() -> String {
    "locations.json".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    /// Size of the most-recent-first visit window kept per location
    #[serde(default = "default_max_visits")]
    pub max_visits: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_visits: default_max_visits() }
    }
}

fn default_max_visits() -> usize {
    MAX_VISIT_HISTORY
}

#[derive(Debug, Clone, Deserialize)]
pub struct PositioningConfig {
    #[serde(default = "default_high_accuracy")]
    pub high_accuracy: bool,
    #[serde(default = "default_positioning_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for PositioningConfig {
    fn default() -> Self {
        Self { high_accuracy: default_high_accuracy(), timeout_ms: default_positioning_timeout_ms() }
    }
}

fn default_high_accuracy() -> bool {
    true
}

fn default_positioning_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeocoderConfig {
    #[serde(default = "default_geocoder_url")]
    pub url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self { url: default_geocoder_url(), enabled: default_enabled(), timeout_ms: default_http_timeout_ms() }
    }
}

fn default_geocoder_url() -> String {
    "https://nominatim.openstreetmap.org/search".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_http_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct BriefingConfig {
    #[serde(default = "default_briefing_url")]
    pub url: String,
    /// Falls back to the GEMINI_API_KEY environment variable
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_briefing_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for BriefingConfig {
    fn default() -> Self {
        Self {
            url: default_briefing_url(),
            api_key: None,
            locale: default_locale(),
            enabled: default_enabled(),
            timeout_ms: default_briefing_timeout_ms(),
        }
    }
}

fn default_briefing_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent".to_string()
}

fn default_locale() -> String {
    DEFAULT_INTEL_LOCALE.to_string()
}

fn default_briefing_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct JournalConfig {
    /// File path for saved check-ins (JSONL format)
    #[serde(default = "default_journal_file")]
    pub file: String,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self { file: default_journal_file() }
    }
}

fn default_journal_file() -> String {
    "checkins.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub positioning: PositioningConfig,
    #[serde(default)]
    pub geocoder: GeocoderConfig,
    #[serde(default)]
    pub briefing: BriefingConfig,
    #[serde(default)]
    pub journal: JournalConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    store_collection: String,
    store_file: String,
    max_visits: usize,
    high_accuracy: bool,
    positioning_timeout_ms: u64,
    geocoder_url: String,
    geocoder_enabled: bool,
    geocoder_timeout_ms: u64,
    briefing_url: String,
    briefing_api_key: Option<String>,
    briefing_locale: String,
    briefing_enabled: bool,
    briefing_timeout_ms: u64,
    journal_file: String,
    metrics_interval_secs: u64,
    log_json: bool,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: &str) -> Self {
        // zero would make every session hold no history at all
        let max_visits = if toml_config.history.max_visits == 0 {
            warn!("history_max_visits_zero_using_default");
            MAX_VISIT_HISTORY
        } else {
            toml_config.history.max_visits
        };

        Self {
            site_id: toml_config.site.id,
            store_collection: toml_config.store.collection,
            store_file: toml_config.store.file,
            max_visits,
            high_accuracy: toml_config.positioning.high_accuracy,
            positioning_timeout_ms: toml_config.positioning.timeout_ms,
            geocoder_url: toml_config.geocoder.url,
            geocoder_enabled: toml_config.geocoder.enabled,
            geocoder_timeout_ms: toml_config.geocoder.timeout_ms,
            briefing_url: toml_config.briefing.url,
            briefing_api_key: toml_config
                .briefing
                .api_key
                .filter(|k| !k.trim().is_empty())
                .or_else(|| env::var("GEMINI_API_KEY").ok().filter(|k| !k.trim().is_empty())),
            briefing_locale: toml_config.briefing.locale,
            briefing_enabled: toml_config.briefing.enabled,
            briefing_timeout_ms: toml_config.briefing.timeout_ms,
            journal_file: toml_config.journal.file,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            log_json: toml_config.logging.json,
            config_file: config_file.to_string(),
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        // Check for --config argument
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        // Check CONFIG_FILE environment variable
        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        // Default to dev.toml
        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, &path.display().to_string()))
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(&Self::resolve_config_path(args))
    }

    /// Load a specific file, falling back to defaults when unreadable
    pub fn load_from_path(config_path: &str) -> Self {
        match Self::from_file(config_path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Watch options handed to the positioning device
    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            high_accuracy: self.high_accuracy,
            timeout: Duration::from_millis(self.positioning_timeout_ms),
            ..WatchOptions::default()
        }
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn store_collection(&self) -> &str {
        &self.store_collection
    }

    pub fn store_file(&self) -> &str {
        &self.store_file
    }

    pub fn max_visits(&self) -> usize {
        self.max_visits
    }

    pub fn high_accuracy(&self) -> bool {
        self.high_accuracy
    }

    pub fn positioning_timeout_ms(&self) -> u64 {
        self.positioning_timeout_ms
    }

    pub fn geocoder_url(&self) -> &str {
        &self.geocoder_url
    }

    pub fn geocoder_enabled(&self) -> bool {
        self.geocoder_enabled
    }

    pub fn geocoder_timeout_ms(&self) -> u64 {
        self.geocoder_timeout_ms
    }

    pub fn briefing_url(&self) -> &str {
        &self.briefing_url
    }

    pub fn briefing_api_key(&self) -> Option<&str> {
        self.briefing_api_key.as_deref()
    }

    pub fn briefing_locale(&self) -> &str {
        &self.briefing_locale
    }

    pub fn briefing_enabled(&self) -> bool {
        self.briefing_enabled
    }

    pub fn briefing_timeout_ms(&self) -> u64 {
        self.briefing_timeout_ms
    }

    pub fn journal_file(&self) -> &str {
        &self.journal_file
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn log_json(&self) -> bool {
        self.log_json
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the visit window
    pub fn with_max_visits(mut self, max_visits: usize) -> Self {
        self.max_visits = max_visits.max(1);
        self
    }

    /// Builder method for tests to redirect the journal
    pub fn with_journal_file(mut self, file: impl Into<String>) -> Self {
        self.journal_file = file.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.site_id(), "waitline");
        assert_eq!(config.store_collection(), "locations");
        assert_eq!(config.max_visits(), 20);
        assert!(config.high_accuracy());
        assert_eq!(config.positioning_timeout_ms(), 5000);
        assert_eq!(config.briefing_locale(), "he-IL");
        assert_eq!(config.metrics_interval_secs(), 10);
        assert!(!config.log_json());
        assert_eq!(config.config_file(), "default");
    }

    #[test]
    fn test_watch_options_from_config() {
        let options = Config::default().watch_options();
        assert!(options.high_accuracy);
        assert_eq!(options.timeout, Duration::from_millis(5000));
        assert_eq!(options.maximum_age, Duration::ZERO);
    }

    #[test]
    fn test_resolve_config_path_default() {
        let args: Vec<String> = vec!["waitline".to_string()];
        if env::var("CONFIG_FILE").is_err() {
            assert_eq!(Config::resolve_config_path(&args), "config/dev.toml");
        }
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> =
            vec!["waitline".to_string(), "--config".to_string(), "config/clinic.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/clinic.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> = vec!["waitline".to_string(), "--config=config/bank.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/bank.toml");
    }

    #[test]
    fn test_journal_file_default() {
        // Verify that JournalConfig::default() returns proper default, not empty string
        let journal = JournalConfig::default();
        assert_eq!(journal.file, "checkins.jsonl");

        let config = Config::default();
        assert_eq!(config.journal_file(), "checkins.jsonl");
    }

    #[test]
    fn test_zero_max_visits_falls_back() {
        let toml_config: TomlConfig = toml::from_str("[history]\nmax_visits = 0\n").unwrap();
        assert_eq!(Config::from_toml(toml_config, "inline").max_visits(), MAX_VISIT_HISTORY);
    }
}
