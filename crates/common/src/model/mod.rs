//! Shared data model for the research core
//!
//! Record types that cross the retrieval/orchestration boundary:
//! - Corpus chunks and retrieval candidates
//! - Research plans, subtasks, and worker results
//!
//! Candidates are transient (rebuilt per query). Plans and results are
//! created once and never mutated afterward; the orchestrator relies on that
//! for its one-result-per-subtask invariant.

use serde::{Deserialize, Serialize};

/// Opaque provenance metadata supplied by the document-chunk provider
/// (doc name, page, section). The core passes it through unchanged.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A bounded span of source text plus provenance, the unit of retrieval.
///
/// Immutable once indexed. Identity is positional (index into the corpus)
/// plus the source/page key used for metadata lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Chunk text content
    pub text: String,

    /// Logical source identifier (e.g. document name)
    pub source_id: String,

    /// Page within the source
    pub page: Option<u32>,

    /// Section heading, when known
    pub section: Option<String>,

    /// Reference into the external embedding store
    pub embedding_ref: Option<u64>,
}

impl Chunk {
    /// Provenance map attached to retrieval results for this chunk
    pub fn metadata(&self) -> Metadata {
        let mut map = Metadata::new();
        map.insert("source".into(), self.source_id.clone().into());
        if let Some(page) = self.page {
            map.insert("page".into(), page.into());
        }
        if let Some(section) = &self.section {
            map.insert("section".into(), section.clone().into());
        }
        map
    }
}

/// A scored chunk produced by one retrieval stage.
///
/// The score scale is method-specific until normalized by fusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalCandidate {
    /// Candidate text content
    pub text: String,

    /// Relevance score (method-specific scale before fusion)
    pub score: f32,

    /// Provenance metadata
    pub metadata: Metadata,
}

impl RetrievalCandidate {
    pub fn new(text: impl Into<String>, score: f32, metadata: Metadata) -> Self {
        Self {
            text: text.into(),
            score,
            metadata,
        }
    }
}

/// Required analysis depth for a subtask
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DepthLevel {
    Surface,
    #[default]
    Moderate,
    Deep,
}

impl DepthLevel {
    /// Parse a depth tag from LLM output, defaulting on unknown tags
    pub fn parse(tag: &str) -> Self {
        match tag.trim().to_lowercase().as_str() {
            "surface" => DepthLevel::Surface,
            "deep" => DepthLevel::Deep,
            _ => DepthLevel::Moderate,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DepthLevel::Surface => "surface",
            DepthLevel::Moderate => "moderate",
            DepthLevel::Deep => "deep",
        }
    }
}

/// One independently executable unit of a decomposed research query.
///
/// Created by the lead agent, consumed exactly once by exactly one worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchSubtask {
    /// Identifier, unique within a plan
    pub id: u32,

    /// Focused question for the worker
    pub query: String,

    /// Aspect to emphasize
    pub focus: String,

    /// Required analysis depth
    pub required_depth: DepthLevel,

    /// Output token budget for the worker's completion call
    pub estimated_tokens: u32,
}

/// Research plan created by the lead agent, read-only after creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchPlan {
    /// Clear statement of what the session is trying to learn
    pub goal: String,

    /// Parallelizable subtasks (ids unique within the plan)
    pub subtasks: Vec<ResearchSubtask>,

    /// How the lead agent intends to combine findings
    pub synthesis_strategy: String,

    /// Planning call cost plus estimated worker costs, in USD
    pub estimated_cost: f64,
}

/// Result from one worker agent.
///
/// Exactly one exists per dispatched subtask, even on failure: a failed
/// subtask yields an error-flagged result with empty findings, never a
/// missing entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResult {
    /// Worker that produced this result
    pub worker_id: u32,

    /// Subtask this result answers
    pub subtask: ResearchSubtask,

    /// Narrative findings
    pub findings: String,

    /// Merged source metadata (corpus + web)
    pub sources: Vec<Metadata>,

    /// Input + output tokens consumed
    pub tokens_used: u64,

    /// Cost of this subtask in USD
    pub cost: f64,

    /// Set when the subtask failed and findings are a placeholder
    pub error: bool,
}

impl WorkerResult {
    /// Placeholder result for a failed subtask, preserving fan-in cardinality
    pub fn failed(worker_id: u32, subtask: ResearchSubtask, message: impl Into<String>) -> Self {
        Self {
            worker_id,
            subtask,
            findings: message.into(),
            sources: Vec::new(),
            tokens_used: 0,
            cost: 0.0,
            error: true,
        }
    }
}

/// Citation placement style for synthesized output.
///
/// A closed set: unknown styles are unrepresentable, so the prompt builder
/// never has to reject a tag at runtime.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CitationStyle {
    #[default]
    Inline,
    Footnote,
    Endnote,
}

impl CitationStyle {
    /// Prompt instruction for this style
    pub fn instruction(&self) -> &'static str {
        match self {
            CitationStyle::Inline => {
                "Cite sources inline in the format [1], [2] immediately after the supported claim."
            }
            CitationStyle::Footnote => {
                "Mark citations as numbered footnotes and list them at the bottom of each section."
            }
            CitationStyle::Endnote => {
                "Mark citations as numbered endnotes and list all references at the end of the report."
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_metadata() {
        let chunk = Chunk {
            text: "content".into(),
            source_id: "paper.pdf".into(),
            page: Some(3),
            section: Some("Methods".into()),
            embedding_ref: None,
        };
        let meta = chunk.metadata();
        assert_eq!(meta["source"], "paper.pdf");
        assert_eq!(meta["page"], 3);
        assert_eq!(meta["section"], "Methods");
    }

    #[test]
    fn test_depth_parse_unknown_defaults_to_moderate() {
        assert_eq!(DepthLevel::parse("deep"), DepthLevel::Deep);
        assert_eq!(DepthLevel::parse("SURFACE"), DepthLevel::Surface);
        assert_eq!(DepthLevel::parse("exhaustive"), DepthLevel::Moderate);
    }

    #[test]
    fn test_failed_result_preserves_subtask() {
        let subtask = ResearchSubtask {
            id: 2,
            query: "q".into(),
            focus: "f".into(),
            required_depth: DepthLevel::Moderate,
            estimated_tokens: 8000,
        };
        let result = WorkerResult::failed(1, subtask.clone(), "boom");
        assert!(result.error);
        assert_eq!(result.subtask.id, 2);
        assert_eq!(result.cost, 0.0);
        assert!(result.sources.is_empty());
    }

    #[test]
    fn test_citation_style_serde_tags() {
        let style: CitationStyle = serde_json::from_str("\"footnote\"").unwrap();
        assert_eq!(style, CitationStyle::Footnote);
        assert!(serde_json::from_str::<CitationStyle>("\"margin\"").is_err());
    }
}
