//! Web search service client
//!
//! Second retrieval source for worker agents, alongside the document corpus.
//! A missing API key or disabled flag is a recognized absent state: the
//! factory returns `None`, logs once at initialization, and workers proceed
//! corpus-only.

use crate::config::WebSearchConfig;
use crate::errors::{AppError, Result};
use crate::model::Metadata;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Hard cap on results per search
pub const MAX_WEB_RESULTS: usize = 10;

/// Results shorter than this are dropped as unusable
pub const MIN_CONTENT_LENGTH: usize = 5;

/// One web search result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebHit {
    pub title: String,
    pub url: String,
    pub content: String,
    pub score: f32,
}

impl WebHit {
    /// Source metadata entry for this hit
    pub fn metadata(&self) -> Metadata {
        let mut map = Metadata::new();
        map.insert("source_type".into(), "web".into());
        map.insert("title".into(), self.title.clone().into());
        map.insert("url".into(), self.url.clone().into());
        map
    }
}

/// Trait for the external web search service
#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Search the web, returning at most `max_results` hits
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebHit>>;
}

/// HTTP web search client
pub struct HttpWebSearch {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
    search_depth: &'a str,
}

#[derive(Deserialize)]
struct SearchResponse {
    results: Vec<RawHit>,
}

#[derive(Deserialize)]
struct RawHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: f32,
}

impl HttpWebSearch {
    pub fn new(config: &WebSearchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        })
    }

    /// Collapse whitespace and strip markup remnants from result content
    fn clean_content(content: &str) -> String {
        content
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string()
    }
}

#[async_trait]
impl WebSearch for HttpWebSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebHit>> {
        let query = query.trim();
        if query.len() < 3 {
            tracing::warn!(query = query, "Web search query too short, skipping");
            return Ok(Vec::new());
        }

        let request = SearchRequest {
            api_key: &self.api_key,
            query,
            max_results: max_results.min(MAX_WEB_RESULTS),
            search_depth: "advanced",
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Upstream {
                message: format!("Web search request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(AppError::Upstream {
                message: format!("Web search API error {}", status),
            });
        }

        let parsed: SearchResponse = response.json().await.map_err(|e| AppError::Upstream {
            message: format!("Failed to parse web search response: {}", e),
        })?;

        let hits: Vec<WebHit> = parsed
            .results
            .into_iter()
            .map(|raw| WebHit {
                title: raw.title,
                url: raw.url,
                content: Self::clean_content(&raw.content),
                score: raw.score,
            })
            .filter(|hit| hit.content.len() >= MIN_CONTENT_LENGTH && !hit.url.is_empty())
            .take(max_results.min(MAX_WEB_RESULTS))
            .collect();

        tracing::debug!(query = query, hits = hits.len(), "Web search complete");
        Ok(hits)
    }
}

/// Create a web search client based on configuration.
///
/// Returns `None` (logged, not an error) when search is disabled or no API
/// key is configured; callers treat the absent state as corpus-only mode.
pub fn create_web_search(config: &WebSearchConfig) -> Option<Arc<dyn WebSearch>> {
    if !config.enabled {
        tracing::info!("Web search disabled in configuration");
        return None;
    }
    if config.api_key.is_empty() {
        tracing::warn!("Web search API key not set, web search disabled");
        return None;
    }

    match HttpWebSearch::new(config) {
        Ok(client) => {
            tracing::info!(max_results = MAX_WEB_RESULTS, "Web search initialized");
            Some(Arc::new(client))
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize web search, disabling");
            None
        }
    }
}

/// Mock web search for testing
pub struct MockWebSearch {
    hits_per_query: usize,
}

impl MockWebSearch {
    pub fn new(hits_per_query: usize) -> Self {
        Self { hits_per_query }
    }
}

#[async_trait]
impl WebSearch for MockWebSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebHit>> {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        Ok((0..self.hits_per_query.min(max_results))
            .map(|i| WebHit {
                title: format!("Result {} for {}", i + 1, query),
                url: format!("https://example.org/{}", i + 1),
                content: format!("Mock web content about {}", query),
                score: rng.gen::<f32>(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_content_collapses_whitespace() {
        let cleaned = HttpWebSearch::clean_content("  spaced\n\nout\ttext  ");
        assert_eq!(cleaned, "spaced out text");
    }

    #[test]
    fn test_factory_disabled_without_key() {
        let config = WebSearchConfig {
            enabled: true,
            api_key: String::new(),
            ..WebSearchConfig::default()
        };
        assert!(create_web_search(&config).is_none());
    }

    #[tokio::test]
    async fn test_mock_respects_max_results() {
        let search = MockWebSearch::new(10);
        let hits = search.search("rust async", 3).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits[0].metadata()["source_type"] == "web");
    }
}
