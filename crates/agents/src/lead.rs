//! Lead agent: research planning and synthesis
//!
//! Two completion calls per session: one to decompose the query into a
//! structured plan, one to synthesize worker findings into a narrative.
//! Malformed planning output falls back to a deterministic generic plan; the
//! session never aborts on a parse failure.

use crate::prompts::{PLANNING_SYSTEM_PROMPT, SYNTHESIS_SYSTEM_PROMPT};
use deepquill_common::errors::{AppError, Result};
use deepquill_common::llm::{input_price_per_token, ChatMessage, ModelRouter, TaskKind};
use deepquill_common::metrics::METRICS_PREFIX;
use deepquill_common::model::{
    CitationStyle, DepthLevel, Metadata, ResearchPlan, ResearchSubtask, WorkerResult,
};
use metrics::counter;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Default output budget for a subtask when the plan omits one
const DEFAULT_SUBTASK_TOKENS: u32 = 8000;

/// Output budget for the planning call
const PLANNING_MAX_TOKENS: u32 = 4000;

/// Output budget for the synthesis call
const SYNTHESIS_MAX_TOKENS: u32 = 8000;

/// Per-phase cost breakdown for a research session
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct CostBreakdown {
    /// Sum of worker subtask costs
    pub execution: f64,
    /// Synthesis call cost
    pub synthesis: f64,
}

/// Synthesis output with aggregated cost
#[derive(Debug, Clone)]
pub struct SynthesisOutcome {
    pub synthesis: String,
    pub sources: Vec<Metadata>,
    pub total_cost: f64,
    pub cost_breakdown: CostBreakdown,
}

/// Planning output shape expected from the model
#[derive(Deserialize)]
struct PlanJson {
    research_goal: String,
    subtasks: Vec<SubtaskJson>,
    #[serde(default)]
    synthesis_strategy: String,
}

#[derive(Deserialize)]
struct SubtaskJson {
    id: u32,
    query: String,
    focus: String,
    #[serde(default)]
    required_depth: String,
    #[serde(default)]
    estimated_tokens: Option<u32>,
}

/// Orchestrating agent for planning and synthesis
pub struct LeadAgent {
    router: Arc<ModelRouter>,
    citation_style: CitationStyle,
}

impl LeadAgent {
    pub fn new(router: Arc<ModelRouter>) -> Self {
        tracing::info!("Lead agent initialized");
        Self {
            router,
            citation_style: CitationStyle::default(),
        }
    }

    pub fn with_citation_style(mut self, style: CitationStyle) -> Self {
        self.citation_style = style;
        self
    }

    /// Create a research plan by decomposing the query into subtasks.
    ///
    /// Never fails: unparsable planning output degrades to the deterministic
    /// fallback plan.
    pub async fn plan(&self, query: &str, worker_count: usize) -> ResearchPlan {
        tracing::info!(query = query, workers = worker_count, "Planning research");

        let planning_prompt = format!(
            "Analyze this research query and create a detailed execution plan:\n\n\
             Query: \"{}\"\n\n\
             Available worker agents: {}\n\n\
             Create a research plan that:\n\
             1. Breaks down the query into {} focused subtasks\n\
             2. Each subtask should explore a different aspect or perspective\n\
             3. Tasks should be parallelizable (independent of each other)\n\
             4. Plan for comprehensive coverage of the topic\n\n\
             Respond in JSON format as specified in the system prompt.",
            query,
            worker_count,
            worker_count.min(5)
        );

        let routed = match self
            .router
            .route_task(
                TaskKind::Planning,
                PLANNING_SYSTEM_PROMPT,
                &[ChatMessage::user(planning_prompt)],
                PLANNING_MAX_TOKENS,
            )
            .await
        {
            Ok(routed) => routed,
            Err(e) => {
                tracing::error!(error = %e, "Planning call failed, using fallback plan");
                counter!(format!("{}_plan_fallbacks_total", METRICS_PREFIX)).increment(1);
                return self.fallback_plan(query, worker_count);
            }
        };

        match self.parse_plan(&routed.text, query) {
            Ok(mut plan) => {
                // Planning call cost plus estimated worker-side input cost
                let worker_model = self.router.model_for(TaskKind::Execution).model_name();
                let per_token = input_price_per_token(worker_model);
                plan.estimated_cost = routed.cost.total_cost
                    + plan
                        .subtasks
                        .iter()
                        .map(|s| s.estimated_tokens as f64 * per_token)
                        .sum::<f64>();

                tracing::info!(
                    subtasks = plan.subtasks.len(),
                    estimated_cost = format!("{:.4}", plan.estimated_cost),
                    "Research plan created"
                );
                plan
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to parse research plan, using fallback");
                counter!(format!("{}_plan_fallbacks_total", METRICS_PREFIX)).increment(1);
                self.fallback_plan(query, worker_count)
            }
        }
    }

    /// Parse the model's JSON plan, tolerating prose around the object
    fn parse_plan(&self, response: &str, query: &str) -> Result<ResearchPlan> {
        let start = response.find('{').ok_or_else(|| AppError::MalformedOutput {
            message: "no JSON object in planning response".to_string(),
        })?;
        let end = response.rfind('}').ok_or_else(|| AppError::MalformedOutput {
            message: "unterminated JSON object in planning response".to_string(),
        })?;

        let parsed: PlanJson = serde_json::from_str(&response[start..=end])?;

        if parsed.subtasks.is_empty() {
            return Err(AppError::MalformedOutput {
                message: "plan contains no subtasks".to_string(),
            });
        }

        // Subtask ids must be unique within a plan; renumber on collision
        let mut seen: HashSet<u32> = HashSet::new();
        let mut next_id = parsed.subtasks.iter().map(|s| s.id).max().unwrap_or(0);
        let subtasks = parsed
            .subtasks
            .into_iter()
            .map(|s| {
                let id = if seen.insert(s.id) {
                    s.id
                } else {
                    next_id += 1;
                    tracing::warn!(duplicate = s.id, reassigned = next_id, "Duplicate subtask id");
                    seen.insert(next_id);
                    next_id
                };
                ResearchSubtask {
                    id,
                    query: s.query,
                    focus: s.focus,
                    required_depth: DepthLevel::parse(&s.required_depth),
                    estimated_tokens: s.estimated_tokens.unwrap_or(DEFAULT_SUBTASK_TOKENS),
                }
            })
            .collect();

        Ok(ResearchPlan {
            goal: if parsed.research_goal.is_empty() {
                query.to_string()
            } else {
                parsed.research_goal
            },
            subtasks,
            synthesis_strategy: parsed.synthesis_strategy,
            estimated_cost: 0.0,
        })
    }

    /// Deterministic fallback when planning output is unusable:
    /// min(worker_count, 4) generic subtasks at moderate depth.
    pub fn fallback_plan(&self, query: &str, worker_count: usize) -> ResearchPlan {
        tracing::warn!("Using fallback research plan");

        let subtasks = (0..worker_count.min(4))
            .map(|i| ResearchSubtask {
                id: (i + 1) as u32,
                query: format!("Analyze aspect {} of: {}", i + 1, query),
                focus: format!("Perspective {}", i + 1),
                required_depth: DepthLevel::Moderate,
                estimated_tokens: DEFAULT_SUBTASK_TOKENS,
            })
            .collect();

        ResearchPlan {
            goal: query.to_string(),
            subtasks,
            synthesis_strategy: "Combine findings from all perspectives".to_string(),
            estimated_cost: 0.0,
        }
    }

    /// Synthesize worker findings into one connected narrative.
    ///
    /// Aggregates in submission order regardless of completion order; the
    /// caller degrades to concatenated findings if this call fails.
    pub async fn synthesize(
        &self,
        query: &str,
        worker_results: &[WorkerResult],
        synthesis_strategy: &str,
    ) -> Result<SynthesisOutcome> {
        tracing::info!(results = worker_results.len(), "Synthesizing worker findings");

        let findings_text = Self::combined_findings(worker_results);
        let all_sources: Vec<Metadata> = worker_results
            .iter()
            .flat_map(|r| r.sources.iter().cloned())
            .collect();

        let synthesis_prompt = format!(
            "Synthesize these findings from multiple worker agents into a comprehensive analysis:\n\n\
             Original Query: \"{}\"\n\n\
             Synthesis Strategy: {}\n\n\
             Worker Findings:\n{}\n\n\
             Create a comprehensive, flowing narrative that:\n\
             1. Combines insights from all workers into unified analysis\n\
             2. Identifies key themes and patterns\n\
             3. Shows connections between different aspects\n\
             4. Uses long, flowing paragraphs (5-10 sentences)\n\
             5. Preserves source citations\n\
             6. Explains concepts thoroughly with theoretical depth\n\n\
             {}\n\n\
             Write in professional, engaging prose. Make it detailed enough that someone \
             reading it gains deep understanding of the topic.",
            query,
            synthesis_strategy,
            findings_text,
            self.citation_style.instruction()
        );

        let routed = self
            .router
            .route_task(
                TaskKind::Synthesis,
                SYNTHESIS_SYSTEM_PROMPT,
                &[ChatMessage::user(synthesis_prompt)],
                SYNTHESIS_MAX_TOKENS,
            )
            .await?;

        let execution_cost: f64 = worker_results.iter().map(|r| r.cost).sum();
        let total_cost = execution_cost + routed.cost.total_cost;

        tracing::info!(
            total_cost = format!("{:.4}", total_cost),
            "Synthesis complete"
        );

        Ok(SynthesisOutcome {
            synthesis: routed.text,
            sources: all_sources,
            total_cost,
            cost_breakdown: CostBreakdown {
                execution: execution_cost,
                synthesis: routed.cost.total_cost,
            },
        })
    }

    /// Worker findings labeled by worker and focus, for the synthesis prompt
    /// and for the degraded no-synthesis fallback
    pub fn combined_findings(worker_results: &[WorkerResult]) -> String {
        worker_results
            .iter()
            .map(|result| {
                format!(
                    "### Worker Agent {} - {}\n\n{}\n\n**Sources**: {} documents",
                    result.worker_id,
                    result.subtask.focus,
                    result.findings,
                    result.sources.len()
                )
            })
            .collect::<Vec<_>>()
            .join(&format!("\n\n{}\n\n", "=".repeat(80)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepquill_common::llm::MockCompletionModel;
    use deepquill_common::model::DepthLevel;

    fn router_with_plan_reply(reply: &str) -> Arc<ModelRouter> {
        let planner = Arc::new(MockCompletionModel::new("claude-opus-4-20250514"));
        planner.push_reply(reply);
        let worker = Arc::new(MockCompletionModel::new("claude-sonnet-4-20250514"));
        Arc::new(ModelRouter::new(planner, worker))
    }

    #[tokio::test]
    async fn test_plan_parses_structured_output() {
        let reply = r#"Here is the plan:
{
    "research_goal": "Understand attention mechanisms",
    "subtasks": [
        {"id": 1, "query": "Q1", "focus": "Theory", "required_depth": "deep", "estimated_tokens": 6000},
        {"id": 2, "query": "Q2", "focus": "Practice", "required_depth": "surface"}
    ],
    "synthesis_strategy": "Compare and contrast"
}"#;
        let lead = LeadAgent::new(router_with_plan_reply(reply));
        let plan = lead.plan("attention mechanisms", 4).await;

        assert_eq!(plan.goal, "Understand attention mechanisms");
        assert_eq!(plan.subtasks.len(), 2);
        assert_eq!(plan.subtasks[0].required_depth, DepthLevel::Deep);
        assert_eq!(plan.subtasks[1].estimated_tokens, 8000);
        assert_eq!(plan.synthesis_strategy, "Compare and contrast");
        assert!(plan.estimated_cost > 0.0);
    }

    #[tokio::test]
    async fn test_malformed_plan_falls_back() {
        let lead = LeadAgent::new(router_with_plan_reply("I could not produce JSON, sorry."));
        let plan = lead.plan("some query", 3).await;

        assert_eq!(plan.subtasks.len(), 3);
        for (i, subtask) in plan.subtasks.iter().enumerate() {
            assert_eq!(subtask.id, (i + 1) as u32);
            assert_eq!(subtask.required_depth, DepthLevel::Moderate);
            assert!(subtask.query.contains("some query"));
        }
    }

    #[tokio::test]
    async fn test_fallback_caps_at_four_subtasks() {
        let lead = LeadAgent::new(router_with_plan_reply("{broken"));
        let plan = lead.plan("q", 8).await;
        assert_eq!(plan.subtasks.len(), 4);
    }

    #[tokio::test]
    async fn test_duplicate_subtask_ids_renumbered() {
        let reply = r#"{
            "research_goal": "g",
            "subtasks": [
                {"id": 1, "query": "a", "focus": "f1"},
                {"id": 1, "query": "b", "focus": "f2"}
            ],
            "synthesis_strategy": "s"
        }"#;
        let lead = LeadAgent::new(router_with_plan_reply(reply));
        let plan = lead.plan("q", 4).await;

        let ids: HashSet<u32> = plan.subtasks.iter().map(|s| s.id).collect();
        assert_eq!(ids.len(), plan.subtasks.len());
    }

    #[tokio::test]
    async fn test_synthesize_aggregates_costs() {
        let planner = Arc::new(MockCompletionModel::new("claude-opus-4-20250514"));
        planner.push_reply("A unified narrative [1].");
        let worker = Arc::new(MockCompletionModel::new("claude-sonnet-4-20250514"));
        let lead = LeadAgent::new(Arc::new(ModelRouter::new(planner, worker)));

        let subtask = ResearchSubtask {
            id: 1,
            query: "q".into(),
            focus: "f".into(),
            required_depth: DepthLevel::Moderate,
            estimated_tokens: 1000,
        };
        let results = vec![WorkerResult {
            worker_id: 1,
            subtask,
            findings: "Finding text".into(),
            sources: vec![Metadata::new()],
            tokens_used: 500,
            cost: 0.01,
            error: false,
        }];

        let outcome = lead.synthesize("q", &results, "strategy").await.unwrap();
        assert_eq!(outcome.synthesis, "A unified narrative [1].");
        assert_eq!(outcome.sources.len(), 1);
        assert!((outcome.cost_breakdown.execution - 0.01).abs() < 1e-9);
        assert!(outcome.total_cost > outcome.cost_breakdown.execution);
    }

    #[test]
    fn test_combined_findings_labels_workers() {
        let subtask = ResearchSubtask {
            id: 1,
            query: "q".into(),
            focus: "Methodology".into(),
            required_depth: DepthLevel::Moderate,
            estimated_tokens: 1000,
        };
        let results = vec![WorkerResult {
            worker_id: 3,
            subtask,
            findings: "text".into(),
            sources: vec![],
            tokens_used: 0,
            cost: 0.0,
            error: false,
        }];
        let combined = LeadAgent::combined_findings(&results);
        assert!(combined.contains("Worker Agent 3 - Methodology"));
    }
}
