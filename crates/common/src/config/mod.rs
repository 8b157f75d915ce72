//! Configuration management for PaperMap
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values
//!
//! Every component receives its own section at construction time; nothing
//! reads configuration from globals.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::MAX_PAGE_SIZE;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Search API configuration
    #[serde(default)]
    pub source: SourceConfig,

    /// Categories and progress tracking
    #[serde(default)]
    pub harvest: HarvestConfig,

    /// Classifier configuration
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Periodic re-run configuration (used by the binary only)
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL (sqlite://... or postgres://...)
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    /// Search endpoint
    #[serde(default = "default_source_url")]
    pub base_url: String,

    /// API key sent as `apikey`
    pub api_key: Option<String>,

    /// Only papers published from this year on
    #[serde(default = "default_start_year")]
    pub start_year: u16,

    /// Records requested per page
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Content type filter
    #[serde(default = "default_content_type")]
    pub content_type: String,

    /// Sort field; must be stable so offsets stay meaningful across runs
    #[serde(default = "default_sort_field")]
    pub sort_field: String,

    /// Request timeout in seconds
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HarvestConfig {
    /// Categories to harvest; each one is also the search query
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,

    /// Catch-all label offered to the classifier but never fetched
    #[serde(default = "default_fallback_category")]
    pub fallback_category: Option<String>,

    /// Progress file location
    #[serde(default = "default_progress_path")]
    pub progress_path: PathBuf,
}

/// How classifier output is turned into stored rows
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMode {
    /// Store every label at or above the confidence floor
    #[default]
    MultiLabel,
    /// Store only the max-confidence label
    SingleLabel,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClassifierConfig {
    /// Inference API base URL
    #[serde(default = "default_classifier_url")]
    pub base_url: String,

    /// Zero-shot model name
    #[serde(default = "default_classifier_model")]
    pub model: String,

    /// Bearer token for the inference API
    pub api_key: Option<String>,

    /// Single or multi label storage
    #[serde(default)]
    pub mode: ClassificationMode,

    /// Labels below this confidence are dropped in multi-label mode
    #[serde(default)]
    pub min_confidence: f64,

    /// Request timeout in seconds
    #[serde(default = "default_classifier_timeout")]
    pub timeout_secs: u64,

    /// Total time budget for retrying transient failures, in seconds
    #[serde(default = "default_classifier_retry_budget")]
    pub retry_budget_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ScheduleConfig {
    /// Re-run interval in hours; absent means run once and exit
    pub interval_hours: Option<u64>,
}

// Default value functions
fn default_max_connections() -> u32 { 5 }
fn default_min_connections() -> u32 { 1 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_source_url() -> String { "https://ieeexploreapi.ieee.org/api/v1/search/articles".to_string() }
fn default_start_year() -> u16 { 2024 }
fn default_page_size() -> u32 { MAX_PAGE_SIZE }
fn default_content_type() -> String { "Journals".to_string() }
fn default_sort_field() -> String { "article_number".to_string() }
fn default_source_timeout() -> u64 { 30 }
fn default_categories() -> Vec<String> {
    vec![
        "machine learning".to_string(),
        "power electronics".to_string(),
        "robotics".to_string(),
    ]
}
fn default_fallback_category() -> Option<String> { Some("others".to_string()) }
fn default_progress_path() -> PathBuf { PathBuf::from("data/progress.json") }
fn default_classifier_url() -> String { "https://api-inference.huggingface.co".to_string() }
fn default_classifier_model() -> String { "MoritzLaurer/deberta-v3-large-zeroshot-v2.0".to_string() }
fn default_classifier_timeout() -> u64 { 60 }
fn default_classifier_retry_budget() -> u64 { 120 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 0 }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("database.url", "sqlite://data/papers.db?mode=rwc")?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__SOURCE__API_KEY=...
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize::<AppConfig>()?.validated()
    }

    /// Reject settings the pipeline cannot run with and clamp the page size
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        if self.harvest.categories.is_empty() {
            return Err(ConfigError::Message(
                "harvest.categories must name at least one category".to_string(),
            ));
        }
        if self.source.page_size == 0 {
            return Err(ConfigError::Message("source.page_size must be positive".to_string()));
        }
        if self.source.page_size > MAX_PAGE_SIZE {
            tracing::warn!(
                requested = self.source.page_size,
                max = MAX_PAGE_SIZE,
                "Page size exceeds API maximum, clamping"
            );
            self.source.page_size = MAX_PAGE_SIZE;
        }
        if !(0.0..=1.0).contains(&self.classifier.min_confidence) {
            return Err(ConfigError::Message(
                "classifier.min_confidence must lie in [0, 1]".to_string(),
            ));
        }
        Ok(self)
    }

    /// Labels offered to the classifier: every category plus the fallback
    pub fn classifier_labels(&self) -> Vec<String> {
        let mut labels = self.harvest.categories.clone();
        if let Some(ref fallback) = self.harvest.fallback_category {
            if !labels.contains(fallback) {
                labels.push(fallback.clone());
            }
        }
        labels
    }

    /// Interval between scheduled runs, if any
    pub fn schedule_interval(&self) -> Option<Duration> {
        self.schedule
            .interval_hours
            .filter(|h| *h > 0)
            .map(|h| Duration::from_secs(h * 3600))
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_source_url(),
            api_key: None,
            start_year: default_start_year(),
            page_size: default_page_size(),
            content_type: default_content_type(),
            sort_field: default_sort_field(),
            timeout_secs: default_source_timeout(),
        }
    }
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            categories: default_categories(),
            fallback_category: default_fallback_category(),
            progress_path: default_progress_path(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            base_url: default_classifier_url(),
            model: default_classifier_model(),
            api_key: None,
            mode: ClassificationMode::default(),
            min_confidence: 0.0,
            timeout_secs: default_classifier_timeout(),
            retry_budget_secs: default_classifier_retry_budget(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            source: SourceConfig::default(),
            harvest: HarvestConfig::default(),
            classifier: ClassifierConfig::default(),
            observability: ObservabilityConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}
