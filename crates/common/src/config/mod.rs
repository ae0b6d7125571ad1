//! Configuration management for Deepquill
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/<env>.toml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Retrieval pipeline configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// LLM completion service configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Web search configuration
    #[serde(default)]
    pub web_search: WebSearchConfig,

    /// Orchestrator configuration
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Candidates pulled from each retrieval method before fusion
    #[serde(default = "default_retrieve_k")]
    pub retrieve_k: usize,

    /// Final result count after reranking
    #[serde(default = "default_final_k")]
    pub final_k: usize,

    /// Fusion weight for keyword scores (0-1)
    #[serde(default = "default_fusion_weight")]
    pub keyword_weight: f32,

    /// Fusion weight for vector scores (0-1)
    #[serde(default = "default_fusion_weight")]
    pub vector_weight: f32,

    /// Minimum similarity for vector hits after distance conversion
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// API endpoint for chat completions
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// API key (empty disables the live client)
    #[serde(default)]
    pub api_key: String,

    /// Model used for planning and synthesis
    #[serde(default = "default_planner_model")]
    pub planner_model: String,

    /// Model used for worker execution
    #[serde(default = "default_worker_model")]
    pub worker_model: String,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries per completion call
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebSearchConfig {
    /// Enable web search as a second retrieval source
    #[serde(default = "default_web_enabled")]
    pub enabled: bool,

    /// API endpoint
    #[serde(default = "default_web_endpoint")]
    pub endpoint: String,

    /// API key (empty disables web search)
    #[serde(default)]
    pub api_key: String,

    /// Maximum results per search
    #[serde(default = "default_web_max_results")]
    pub max_results: usize,

    /// Request timeout in seconds
    #[serde(default = "default_web_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    /// Fixed worker pool size
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Retries for lightweight context-only tasks
    #[serde(default = "default_task_retries")]
    pub task_max_retries: u32,

    /// Web results fetched per subtask
    #[serde(default = "default_subtask_web_results")]
    pub subtask_web_results: usize,

    /// Corpus chunks retrieved per subtask
    #[serde(default = "default_subtask_chunks")]
    pub subtask_chunks: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_retrieve_k() -> usize { 20 }
fn default_final_k() -> usize { 5 }
fn default_fusion_weight() -> f32 { 0.5 }
fn default_similarity_threshold() -> f32 { 0.2 }
fn default_llm_endpoint() -> String { "https://api.anthropic.com/v1/messages".to_string() }
fn default_planner_model() -> String { "claude-opus-4-20250514".to_string() }
fn default_worker_model() -> String { "claude-sonnet-4-20250514".to_string() }
fn default_llm_timeout() -> u64 { 120 }
fn default_llm_retries() -> u32 { 3 }
fn default_temperature() -> f32 { 0.7 }
fn default_web_enabled() -> bool { true }
fn default_web_endpoint() -> String { "https://api.tavily.com/search".to_string() }
fn default_web_max_results() -> usize { 10 }
fn default_web_timeout() -> u64 { 30 }
fn default_worker_count() -> usize { 4 }
fn default_task_retries() -> u32 { 2 }
fn default_subtask_web_results() -> usize { 5 }
fn default_subtask_chunks() -> usize { 10 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_service_name() -> String { "deepquill".to_string() }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        // Pick up .env before reading APP_* variables
        dotenvy::dotenv().ok();

        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__ORCHESTRATOR__WORKER_COUNT=2
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get LLM request timeout as Duration
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.timeout_secs)
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            retrieve_k: default_retrieve_k(),
            final_k: default_final_k(),
            keyword_weight: default_fusion_weight(),
            vector_weight: default_fusion_weight(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            api_key: String::new(),
            planner_model: default_planner_model(),
            worker_model: default_worker_model(),
            timeout_secs: default_llm_timeout(),
            max_retries: default_llm_retries(),
            temperature: default_temperature(),
        }
    }
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            enabled: default_web_enabled(),
            endpoint: default_web_endpoint(),
            api_key: String::new(),
            max_results: default_web_max_results(),
            timeout_secs: default_web_timeout(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            task_max_retries: default_task_retries(),
            subtask_web_results: default_subtask_web_results(),
            subtask_chunks: default_subtask_chunks(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            service_name: default_service_name(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            retrieval: RetrievalConfig::default(),
            llm: LlmConfig::default(),
            web_search: WebSearchConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.orchestrator.worker_count, 4);
        assert_eq!(config.retrieval.retrieve_k, 20);
        assert_eq!(config.retrieval.final_k, 5);
    }

    #[test]
    fn test_fusion_weights_balanced_by_default() {
        let config = AppConfig::default();
        assert_eq!(config.retrieval.keyword_weight, 0.5);
        assert_eq!(config.retrieval.vector_weight, 0.5);
    }
}
