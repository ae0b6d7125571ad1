//! Worker agent: subtask execution with multi-source retrieval
//!
//! Each worker gathers context from two independent sources (the hybrid
//! retrieval pipeline over the document corpus, and web search when enabled),
//! then asks the execution-tier model for a deep cross-source analysis.
//! A worker never raises: failures become error-flagged results, and an
//! empty context becomes an explicit zero-cost "no information found" result.

use crate::prompts::EXECUTION_SYSTEM_PROMPT;
use deepquill_common::config::OrchestratorConfig;
use deepquill_common::llm::{ChatMessage, ModelRouter, TaskKind};
use deepquill_common::model::{Metadata, ResearchSubtask, WorkerResult};
use deepquill_common::websearch::WebSearch;
use deepquill_retrieval::HybridRetrievalPipeline;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Candidates pulled before fusion when retrieving subtask context
const SUBTASK_RETRIEVE_K: usize = 20;

/// Web content excerpt length per result in the prompt
const WEB_EXCERPT_CHARS: usize = 1000;

/// Output budget for lightweight context-only tasks
const TASK_MAX_TOKENS: u32 = 2000;

/// Floor for subtask output budgets
const MIN_SUBTASK_TOKENS: u32 = 256;

/// Lightweight context-only task (no retrieval step)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextTask {
    pub task: String,
    pub context: String,
}

/// Result of a lightweight task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task: String,
    pub result: String,
    pub worker_id: u32,
    pub error: bool,
}

/// Execution agent for one subtask at a time
pub struct WorkerAgent {
    id: u32,
    router: Arc<ModelRouter>,
    pipeline: Arc<HybridRetrievalPipeline>,
    web_search: Option<Arc<dyn WebSearch>>,
    subtask_chunks: usize,
    subtask_web_results: usize,
}

impl WorkerAgent {
    pub fn new(
        id: u32,
        router: Arc<ModelRouter>,
        pipeline: Arc<HybridRetrievalPipeline>,
        web_search: Option<Arc<dyn WebSearch>>,
        config: &OrchestratorConfig,
    ) -> Self {
        tracing::debug!(worker_id = id, web = web_search.is_some(), "Worker agent initialized");
        Self {
            id,
            router,
            pipeline,
            web_search,
            subtask_chunks: config.subtask_chunks,
            subtask_web_results: config.subtask_web_results,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Execute a research subtask with multi-source retrieval.
    ///
    /// Infallible by contract: every outcome is a `WorkerResult`, error-flagged
    /// when the completion call ultimately fails.
    pub async fn execute_subtask(&self, subtask: ResearchSubtask) -> WorkerResult {
        tracing::info!(worker_id = self.id, focus = %subtask.focus, "Executing subtask");

        // Source 1: document corpus via the hybrid pipeline
        let corpus_candidates = self
            .pipeline
            .retrieve(&subtask.query, SUBTASK_RETRIEVE_K, self.subtask_chunks)
            .await;

        let corpus_context = corpus_candidates
            .iter()
            .enumerate()
            .map(|(i, candidate)| {
                let source = candidate
                    .metadata
                    .get("source")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Unknown");
                let section = candidate
                    .metadata
                    .get("section")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Unknown Section");
                format!("[Source {}: {}, §{}]\n{}", i + 1, source, section, candidate.text)
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        let corpus_sources: Vec<Metadata> =
            corpus_candidates.iter().map(|c| c.metadata.clone()).collect();

        // Source 2: web search, when enabled
        let mut web_context = String::new();
        let mut web_sources: Vec<Metadata> = Vec::new();

        if let Some(web) = &self.web_search {
            match web.search(&subtask.query, self.subtask_web_results).await {
                Ok(hits) => {
                    web_context = hits
                        .iter()
                        .enumerate()
                        .map(|(i, hit)| {
                            let excerpt: String =
                                hit.content.chars().take(WEB_EXCERPT_CHARS).collect();
                            format!(
                                "[Web Source {}] {}\nURL: {}\nContent: {}",
                                i + 1,
                                hit.title,
                                hit.url,
                                excerpt
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("\n\n");
                    web_sources = hits.iter().map(|h| h.metadata()).collect();
                    tracing::debug!(worker_id = self.id, hits = web_sources.len(), "Web sources found");
                }
                Err(e) => {
                    tracing::warn!(worker_id = self.id, error = %e, "Web search failed");
                }
            }
        }

        // Combine contexts under labeled section headers
        let mut combined_context = String::new();
        if !corpus_context.is_empty() {
            combined_context.push_str("## Document Corpus Sources:\n\n");
            combined_context.push_str(&corpus_context);
        }
        if !web_context.is_empty() {
            if !combined_context.is_empty() {
                combined_context.push_str(&format!("\n\n{}\n\n", "=".repeat(80)));
            }
            combined_context.push_str("## Web Sources:\n\n");
            combined_context.push_str(&web_context);
        }

        if combined_context.is_empty() {
            tracing::warn!(worker_id = self.id, "No relevant context found from any source");
            return WorkerResult {
                worker_id: self.id,
                subtask,
                findings: "No relevant information found for this subtask from corpus or web sources."
                    .to_string(),
                sources: Vec::new(),
                tokens_used: 0,
                cost: 0.0,
                error: false,
            };
        }

        let mut source_types = Vec::new();
        if !corpus_sources.is_empty() {
            source_types.push(format!("{} corpus documents", corpus_sources.len()));
        }
        if !web_sources.is_empty() {
            source_types.push(format!("{} web sources", web_sources.len()));
        }
        let source_summary = source_types.join(" and ");

        let execution_prompt = format!(
            "Execute this research subtask with deep analysis using multi-source information:\n\n\
             Subtask: {}\n\
             Focus Area: {}\n\
             Required Depth: {}\n\n\
             Available Sources: {}\n\n\
             Retrieved Context:\n{}\n\n\
             Analyze this content from BOTH corpus documents and web sources, then create a \
             comprehensive response that:\n\
             1. Thoroughly addresses the subtask question\n\
             2. Explains theoretical concepts in depth\n\
             3. Uses long, flowing paragraphs (5-10 sentences)\n\
             4. Connects ideas and shows relationships across different sources\n\
             5. Includes specific details, data, and examples from the context\n\
             6. Integrates insights from both the document corpus and current web information\n\n\
             Make it detailed and insightful. Explain WHY things work, not just WHAT. \
             Synthesize information across source types when relevant.",
            subtask.query,
            subtask.focus,
            subtask.required_depth.as_str(),
            source_summary,
            combined_context
        );

        let max_tokens = subtask.estimated_tokens.max(MIN_SUBTASK_TOKENS);
        let routed = match self
            .router
            .route_task(
                TaskKind::Execution,
                EXECUTION_SYSTEM_PROMPT,
                &[ChatMessage::user(execution_prompt)],
                max_tokens,
            )
            .await
        {
            Ok(routed) => routed,
            Err(e) => {
                tracing::error!(worker_id = self.id, error = %e, "Subtask execution failed");
                return WorkerResult::failed(
                    self.id,
                    subtask,
                    format!("Subtask failed: {}", e),
                );
            }
        };

        let mut sources = corpus_sources;
        sources.extend(web_sources);

        tracing::info!(
            worker_id = self.id,
            sources = sources.len(),
            tokens = routed.cost.input_tokens + routed.cost.output_tokens,
            "Subtask complete"
        );

        WorkerResult {
            worker_id: self.id,
            subtask,
            findings: routed.text,
            sources,
            tokens_used: routed.cost.input_tokens + routed.cost.output_tokens,
            cost: routed.cost.total_cost,
            error: false,
        }
    }

    /// Execute a lightweight context-only task, retrying the completion call
    /// up to `max_retries` times. Exhausted retries produce an error-flagged
    /// result carrying the last failure's message, never an error return.
    pub async fn execute_task(&self, task: ContextTask, max_retries: u32) -> TaskResult {
        let prompt = format!(
            "Task: {}\n\nContext: {}\n\nPlease complete this task.",
            task.task, task.context
        );

        let mut last_error = String::new();
        for attempt in 0..=max_retries {
            match self
                .router
                .route_task(
                    TaskKind::Execution,
                    EXECUTION_SYSTEM_PROMPT,
                    &[ChatMessage::user(prompt.clone())],
                    TASK_MAX_TOKENS,
                )
                .await
            {
                Ok(routed) => {
                    return TaskResult {
                        task: task.task,
                        result: routed.text,
                        worker_id: self.id,
                        error: false,
                    }
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < max_retries {
                        tracing::warn!(
                            worker_id = self.id,
                            attempt = attempt + 1,
                            "Task attempt failed, retrying"
                        );
                    }
                }
            }
        }

        tracing::error!(
            worker_id = self.id,
            attempts = max_retries + 1,
            error = %last_error,
            "Task failed after all retries"
        );
        TaskResult {
            task: task.task,
            result: format!("Task failed: {}", last_error),
            worker_id: self.id,
            error: true,
        }
    }
}
