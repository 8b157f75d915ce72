//! Classifier adapter
//!
//! Turns a prompt into `(category, confidence)` labels. The pipeline only
//! sees the [`Classifier`] trait; [`ZeroShotClassifier`] calls a hosted
//! zero-shot inference endpoint.

use crate::errors::{IngestionError, Result};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use papermap_common::config::{ClassificationMode, ClassifierConfig};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// One category with the model's confidence in `[0, 1]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub category: String,
    pub confidence: f64,
}

impl Label {
    pub fn new(category: impl Into<String>, confidence: f64) -> Self {
        Self {
            category: category.into(),
            confidence,
        }
    }
}

/// Trait for prompt classification
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify one prompt; returns at least one label
    async fn classify(&self, text: &str) -> Result<Vec<Label>>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Pick the labels to store for one paper.
///
/// Multi-label keeps every label at or above `min_confidence`, single-label
/// keeps the best one. If the floor removes everything the best label is
/// kept so the paper does not stay unclassified forever.
pub fn select_labels(labels: Vec<Label>, mode: ClassificationMode, min_confidence: f64) -> Vec<Label> {
    let best = labels
        .iter()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        .cloned();

    match mode {
        ClassificationMode::SingleLabel => best.into_iter().collect(),
        ClassificationMode::MultiLabel => {
            let kept: Vec<Label> = labels.into_iter().filter(|l| l.confidence >= min_confidence).collect();
            if kept.is_empty() {
                best.into_iter().collect()
            } else {
                kept
            }
        }
    }
}

/// Hosted zero-shot classification client
pub struct ZeroShotClassifier {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    candidate_labels: Vec<String>,
    multi_label: bool,
    initial_retry_interval: Duration,
    retry_budget: Duration,
}

#[derive(Serialize)]
struct ZeroShotRequest<'a> {
    inputs: &'a str,
    parameters: ZeroShotParameters<'a>,
}

#[derive(Serialize)]
struct ZeroShotParameters<'a> {
    candidate_labels: &'a [String],
    multi_label: bool,
}

#[derive(Deserialize)]
struct ZeroShotResult {
    labels: Vec<String>,
    scores: Vec<f64>,
}

/// Some deployments wrap the result in a one-element list
#[derive(Deserialize)]
#[serde(untagged)]
enum ZeroShotResponse {
    Single(ZeroShotResult),
    Batch(Vec<ZeroShotResult>),
}

impl ZeroShotClassifier {
    /// Create a client scoring prompts against `candidate_labels`
    pub fn new(config: &ClassifierConfig, candidate_labels: Vec<String>) -> Result<Self> {
        if candidate_labels.is_empty() {
            return Err(IngestionError::ConfigError("classifier needs at least one candidate label".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| IngestionError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: format!("{}/models/{}", config.base_url.trim_end_matches('/'), config.model),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            candidate_labels,
            multi_label: config.mode == ClassificationMode::MultiLabel,
            initial_retry_interval: Duration::from_millis(500),
            retry_budget: Duration::from_secs(config.retry_budget_secs),
        })
    }

    /// Override the first retry delay
    pub fn with_initial_retry_interval(mut self, interval: Duration) -> Self {
        self.initial_retry_interval = interval;
        self
    }

    async fn make_request(&self, text: &str) -> std::result::Result<Vec<Label>, backoff::Error<IngestionError>> {
        let request = ZeroShotRequest {
            inputs: text,
            parameters: ZeroShotParameters {
                candidate_labels: &self.candidate_labels,
                multi_label: self.multi_label,
            },
        };

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            backoff::Error::transient(IngestionError::Classifier {
                message: format!("Request failed: {}", e),
            })
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = IngestionError::Classifier {
                message: format!("API error {}: {}", status, body),
            };
            // 503 is returned while the model is loading
            return Err(if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                backoff::Error::transient(err)
            } else {
                backoff::Error::permanent(err)
            });
        }

        let parsed: ZeroShotResponse = response.json().await.map_err(|e| {
            backoff::Error::permanent(IngestionError::Classifier {
                message: format!("Failed to parse response: {}", e),
            })
        })?;

        let result = match parsed {
            ZeroShotResponse::Single(result) => result,
            ZeroShotResponse::Batch(mut results) if !results.is_empty() => results.swap_remove(0),
            ZeroShotResponse::Batch(_) => {
                return Err(backoff::Error::permanent(IngestionError::Classifier {
                    message: "Empty response".to_string(),
                }))
            }
        };

        if result.labels.is_empty() || result.labels.len() != result.scores.len() {
            return Err(backoff::Error::permanent(IngestionError::Classifier {
                message: format!(
                    "Expected matching non-empty labels and scores, got {} and {}",
                    result.labels.len(),
                    result.scores.len()
                ),
            }));
        }

        Ok(result
            .labels
            .into_iter()
            .zip(result.scores)
            .map(|(category, confidence)| Label::new(category, confidence.clamp(0.0, 1.0)))
            .collect())
    }
}

#[async_trait]
impl Classifier for ZeroShotClassifier {
    async fn classify(&self, text: &str) -> Result<Vec<Label>> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_retry_interval)
            .with_max_elapsed_time(Some(self.retry_budget))
            .build();

        let labels = retry(policy, || async move {
            self.make_request(text).await.map_err(|e| {
                if let backoff::Error::Transient { ref err, .. } = e {
                    warn!(model = %self.model, error = %err, "Classifier request failed, retrying");
                }
                e
            })
        })
        .await?;

        debug!(model = %self.model, labels = labels.len(), "Prompt classified");
        Ok(labels)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
