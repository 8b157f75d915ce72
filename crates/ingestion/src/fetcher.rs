//! Search API client
//!
//! One call fetches one page. The outcome is a non-empty page, an empty
//! page (category exhausted) or an error; the client never retries.

use crate::errors::{IngestionError, Result};
use async_trait::async_trait;
use papermap_common::config::SourceConfig;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// One paper record exactly as the search API returned it
pub type RawRecord = Value;

/// Successful fetch result
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// At least one record
    Page(Vec<RawRecord>),
    /// Nothing at this offset
    Empty,
}

impl FetchOutcome {
    pub fn len(&self) -> usize {
        match self {
            FetchOutcome::Page(records) => records.len(),
            FetchOutcome::Empty => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A paginated paper search
#[async_trait]
pub trait PaperSource: Send + Sync {
    /// Fetch `page_size` records for `query` starting at the zero-based
    /// `start_offset`
    async fn fetch(&self, query: &str, start_offset: u64, page_size: u32) -> Result<FetchOutcome>;
}

/// IEEE Xplore search client
pub struct IeeeXploreClient {
    client: reqwest::Client,
    config: SourceConfig,
}

impl IeeeXploreClient {
    pub fn new(config: SourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| IngestionError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn query_params(&self, query: &str, start_offset: u64, page_size: u32) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("format", "json".to_string()),
            ("content_type", self.config.content_type.clone()),
            ("start_year", self.config.start_year.to_string()),
            ("max_records", page_size.to_string()),
            ("sort_field", self.config.sort_field.clone()),
            ("sort_order", "asc".to_string()),
            ("querytext", query.to_string()),
            // The API counts records from 1
            ("start_record", (start_offset + 1).to_string()),
        ];
        if let Some(ref key) = self.config.api_key {
            params.push(("apikey", key.clone()));
        }
        params
    }
}

#[async_trait]
impl PaperSource for IeeeXploreClient {
    #[instrument(skip(self), fields(base_url = %self.config.base_url))]
    async fn fetch(&self, query: &str, start_offset: u64, page_size: u32) -> Result<FetchOutcome> {
        debug!("Requesting page");

        let response = self
            .client
            .get(&self.config.base_url)
            .query(&self.query_params(query, start_offset, page_size))
            .send()
            .await
            .map_err(|source| IngestionError::Transport {
                query: query.to_string(),
                offset: start_offset,
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestionError::HttpStatus {
                query: query.to_string(),
                offset: start_offset,
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response.json().await.map_err(|e| IngestionError::Decode {
            query: query.to_string(),
            offset: start_offset,
            message: e.to_string(),
        })?;

        let articles = match body {
            Value::Object(mut map) => map.remove("articles"),
            _ => None,
        };

        match articles {
            Some(Value::Array(records)) if records.is_empty() => {
                info!("No records at this offset");
                Ok(FetchOutcome::Empty)
            }
            Some(Value::Array(records)) => {
                info!(records = records.len(), "Fetched page");
                Ok(FetchOutcome::Page(records))
            }
            Some(other) => Err(IngestionError::Decode {
                query: query.to_string(),
                offset: start_offset,
                message: format!("'articles' is not a list: {}", other),
            }),
            None => Err(IngestionError::MissingArticles {
                query: query.to_string(),
                offset: start_offset,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> IeeeXploreClient {
        IeeeXploreClient::new(SourceConfig {
            base_url: format!("{}/api/v1/search/articles", server.uri()),
            api_key: Some("test-key".to_string()),
            ..SourceConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_page_sends_one_based_start_record() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/search/articles"))
            .and(query_param("querytext", "machine learning"))
            .and(query_param("start_record", "41"))
            .and(query_param("max_records", "20"))
            .and(query_param("apikey", "test-key"))
            .and(query_param("start_year", "2024"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "total_records": 2,
                "articles": [{ "title": "Paper 1" }, { "title": "Paper 2" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client(&server).fetch("machine learning", 40, 20).await.unwrap();
        assert_eq!(outcome.len(), 2);
        match outcome {
            FetchOutcome::Page(records) => assert_eq!(records[0]["title"], "Paper 1"),
            FetchOutcome::Empty => panic!("expected a page"),
        }
    }

    #[tokio::test]
    async fn test_empty_articles_is_empty_outcome() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "articles": [] })))
            .mount(&server)
            .await;

        let outcome = client(&server).fetch("nonexistent topic", 0, 2).await.unwrap();
        assert_eq!(outcome, FetchOutcome::Empty);
    }

    #[tokio::test]
    async fn test_missing_articles_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "total_records": 0 })))
            .mount(&server)
            .await;

        let err = client(&server).fetch("energy", 0, 2).await.unwrap_err();
        assert!(matches!(err, IngestionError::MissingArticles { offset: 0, .. }));
    }

    #[tokio::test]
    async fn test_http_error_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Developer Inactive"))
            .mount(&server)
            .await;

        let err = client(&server).fetch("energy", 10, 2).await.unwrap_err();
        match err {
            IngestionError::HttpStatus { status, body, offset, .. } => {
                assert_eq!(status, 403);
                assert_eq!(offset, 10);
                assert_eq!(body, "Developer Inactive");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_json_body_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let err = client(&server).fetch("energy", 0, 2).await.unwrap_err();
        assert!(matches!(err, IngestionError::Decode { .. }));
    }
}
