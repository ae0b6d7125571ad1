//! LLM completion service client
//!
//! Provides:
//! - `CompletionModel` trait over the external messages API
//! - HTTP implementation with timeout and bounded retry
//! - Task-kind routing between the planner and worker model tiers
//! - Static per-tier pricing and cost accounting
//!
//! Prices are compile-time constants per model tier, never fetched.

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Context-token ceiling applied before every completion call
pub const MAX_CONTEXT_TOKENS: u64 = 180_000;

/// Output-token ceiling per request
pub const MAX_OUTPUT_TOKENS: u32 = 16_000;

/// Log a warning when a single request is estimated above this cost (USD)
pub const COST_WARNING_THRESHOLD: f64 = 5.0;

/// One message in a completion conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Raw completion returned by the model service
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Cost breakdown for one completion call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostInfo {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
}

impl CostInfo {
    /// Compute cost from token usage using the static price table
    pub fn from_usage(model: &str, input_tokens: u64, output_tokens: u64) -> Self {
        let (input_price, output_price) = price_per_mtok(model);
        let input_cost = (input_tokens as f64 / 1_000_000.0) * input_price;
        let output_cost = (output_tokens as f64 / 1_000_000.0) * output_price;
        Self {
            model: model.to_string(),
            input_tokens,
            output_tokens,
            input_cost,
            output_cost,
            total_cost: input_cost + output_cost,
        }
    }
}

/// Static pricing per 1M tokens (input, output) in USD.
///
/// Unknown models are billed at the worker tier.
pub fn price_per_mtok(model: &str) -> (f64, f64) {
    if model.starts_with("claude-opus") {
        (15.0, 75.0)
    } else if model.starts_with("claude-sonnet") {
        (3.0, 15.0)
    } else {
        (3.0, 15.0)
    }
}

/// Input-token price per single token for a model, used for plan estimates
pub fn input_price_per_token(model: &str) -> f64 {
    price_per_mtok(model).0 / 1_000_000.0
}

/// Approximate token count for prompt text (chars / 4)
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() / 4) as u64
}

/// Trait for the external completion service
#[async_trait]
pub trait CompletionModel: Send + Sync {
    /// Run one completion call
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<Completion>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// HTTP completion client for the messages API
pub struct HttpCompletionModel {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_retries: u32,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: String,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

impl HttpCompletionModel {
    /// Create a new completion client
    pub fn new(
        endpoint: String,
        api_key: String,
        model: String,
        temperature: f32,
        timeout_secs: u64,
        max_retries: u32,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            model,
            temperature,
            max_retries,
        })
    }

    /// Make request with retry
    async fn request_with_retry(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<Completion> {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                // Exponential backoff
                let delay = Duration::from_millis(250 * 2_u64.pow(attempt));
                tokio::time::sleep(delay).await;
            }

            match self.make_request(system_prompt, messages, max_tokens).await {
                Ok(completion) => return Ok(completion),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        error = %e,
                        "Completion request failed, retrying"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(AppError::TransientCallFailure {
            attempts: self.max_retries,
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        })
    }

    async fn make_request(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<Completion> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens,
            system: system_prompt,
            messages,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Upstream {
                message: format!("Completion request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream {
                message: format!("Completion API error {}: {}", status, body),
            });
        }

        let parsed: MessagesResponse = response.json().await.map_err(|e| AppError::Upstream {
            message: format!("Failed to parse completion response: {}", e),
        })?;

        let text = parsed
            .content
            .first()
            .map(|block| block.text.clone())
            .ok_or_else(|| AppError::Upstream {
                message: "Empty completion response".to_string(),
            })?;

        Ok(Completion {
            text,
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
        })
    }
}

#[async_trait]
impl CompletionModel for HttpCompletionModel {
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<Completion> {
        self.request_with_retry(system_prompt, messages, max_tokens)
            .await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Task categories routed to model tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// High-level research planning (planner tier)
    Planning,
    /// Combining findings from multiple workers (planner tier)
    Synthesis,
    /// Information gathering and analysis (worker tier)
    Execution,
}

/// Routed completion with its cost
#[derive(Debug, Clone)]
pub struct RoutedCompletion {
    pub text: String,
    pub cost: CostInfo,
}

/// Routes tasks to the appropriate model tier:
/// planner tier for planning and synthesis, the cheaper worker tier for
/// execution and analysis.
pub struct ModelRouter {
    planner: Arc<dyn CompletionModel>,
    worker: Arc<dyn CompletionModel>,
}

impl ModelRouter {
    pub fn new(planner: Arc<dyn CompletionModel>, worker: Arc<dyn CompletionModel>) -> Self {
        tracing::info!(
            planner = planner.model_name(),
            worker = worker.model_name(),
            "Model router initialized"
        );
        Self { planner, worker }
    }

    /// The model handling a given task kind
    pub fn model_for(&self, kind: TaskKind) -> &Arc<dyn CompletionModel> {
        match kind {
            TaskKind::Planning | TaskKind::Synthesis => &self.planner,
            TaskKind::Execution => &self.worker,
        }
    }

    /// Validate, dispatch, and cost-account one completion call
    pub async fn route_task(
        &self,
        kind: TaskKind,
        system_prompt: &str,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<RoutedCompletion> {
        let model = self.model_for(kind);
        let max_tokens = max_tokens.min(MAX_OUTPUT_TOKENS);

        // Estimate input size before spending anything
        let prompt_chars: usize = messages.iter().map(|m| m.content.len()).sum();
        let estimated_input = estimate_tokens(system_prompt) + (prompt_chars / 4) as u64;

        if estimated_input > MAX_CONTEXT_TOKENS {
            return Err(AppError::InvalidQuery {
                reason: format!(
                    "prompt of ~{} tokens exceeds context limit of {}",
                    estimated_input, MAX_CONTEXT_TOKENS
                ),
            });
        }

        let (input_price, output_price) = price_per_mtok(model.model_name());
        let estimated_cost = (estimated_input as f64 / 1_000_000.0) * input_price
            + (max_tokens as f64 / 1_000_000.0) * output_price;
        if estimated_cost > COST_WARNING_THRESHOLD {
            tracing::warn!(
                estimated_cost = format!("{:.2}", estimated_cost),
                model = model.model_name(),
                "High cost completion request"
            );
        }

        let completion = model.complete(system_prompt, messages, max_tokens).await?;
        let cost = CostInfo::from_usage(
            model.model_name(),
            completion.input_tokens,
            completion.output_tokens,
        );

        tracing::debug!(
            model = %cost.model,
            input_tokens = cost.input_tokens,
            output_tokens = cost.output_tokens,
            cost = format!("{:.4}", cost.total_cost),
            "Completion call finished"
        );

        Ok(RoutedCompletion {
            text: completion.text,
            cost,
        })
    }
}

/// Scripted completion model for testing
pub struct MockCompletionModel {
    model: String,
    replies: std::sync::Mutex<std::collections::VecDeque<Result<String>>>,
    fallback: String,
}

impl MockCompletionModel {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            replies: std::sync::Mutex::new(std::collections::VecDeque::new()),
            fallback: "mock completion".to_string(),
        }
    }

    /// Queue a successful reply
    pub fn push_reply(&self, text: impl Into<String>) {
        self.replies
            .lock()
            .expect("mock replies lock")
            .push_back(Ok(text.into()));
    }

    /// Queue a failure
    pub fn push_failure(&self, message: impl Into<String>) {
        self.replies
            .lock()
            .expect("mock replies lock")
            .push_back(Err(AppError::Upstream {
                message: message.into(),
            }));
    }
}

#[async_trait]
impl CompletionModel for MockCompletionModel {
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        _max_tokens: u32,
    ) -> Result<Completion> {
        let next = self.replies.lock().expect("mock replies lock").pop_front();
        let text = match next {
            Some(Ok(text)) => text,
            Some(Err(e)) => return Err(e),
            None => self.fallback.clone(),
        };

        let prompt_chars: usize = messages.iter().map(|m| m.content.len()).sum();
        Ok(Completion {
            input_tokens: estimate_tokens(system_prompt) + (prompt_chars / 4) as u64,
            output_tokens: estimate_tokens(&text),
            text,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pricing_tiers() {
        assert_eq!(price_per_mtok("claude-opus-4-20250514"), (15.0, 75.0));
        assert_eq!(price_per_mtok("claude-sonnet-4-20250514"), (3.0, 15.0));
        // Unknown models bill at the worker tier
        assert_eq!(price_per_mtok("some-other-model"), (3.0, 15.0));
    }

    #[test]
    fn test_cost_from_usage() {
        let cost = CostInfo::from_usage("claude-sonnet-4-20250514", 1_000_000, 100_000);
        assert!((cost.input_cost - 3.0).abs() < 1e-9);
        assert!((cost.output_cost - 1.5).abs() < 1e-9);
        assert!((cost.total_cost - 4.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_router_sends_planning_to_planner_tier() {
        let planner = Arc::new(MockCompletionModel::new("claude-opus-4-20250514"));
        planner.push_reply("plan text");
        let worker = Arc::new(MockCompletionModel::new("claude-sonnet-4-20250514"));

        let router = ModelRouter::new(planner, worker);
        let routed = router
            .route_task(
                TaskKind::Planning,
                "system",
                &[ChatMessage::user("plan this")],
                1000,
            )
            .await
            .unwrap();

        assert_eq!(routed.text, "plan text");
        assert_eq!(routed.cost.model, "claude-opus-4-20250514");
    }

    #[tokio::test]
    async fn test_router_rejects_oversized_context() {
        let planner = Arc::new(MockCompletionModel::new("claude-opus-4-20250514"));
        let worker = Arc::new(MockCompletionModel::new("claude-sonnet-4-20250514"));
        let router = ModelRouter::new(planner, worker);

        let huge = "x".repeat((MAX_CONTEXT_TOKENS as usize + 10) * 4);
        let err = router
            .route_task(TaskKind::Execution, "", &[ChatMessage::user(huge)], 100)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidQuery { .. }));
    }

    #[tokio::test]
    async fn test_mock_scripted_failure() {
        let model = MockCompletionModel::new("claude-sonnet-4-20250514");
        model.push_failure("boom");
        model.push_reply("recovered");

        let err = model.complete("s", &[], 10).await.unwrap_err();
        assert!(matches!(err, AppError::Upstream { .. }));

        let ok = model.complete("s", &[], 10).await.unwrap();
        assert_eq!(ok.text, "recovered");
    }
}
