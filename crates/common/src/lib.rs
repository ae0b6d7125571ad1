//! Deepquill Common Library
//!
//! Shared code for the retrieval and orchestration crates including:
//! - Research data model (chunks, candidates, plans, results)
//! - Error types and handling
//! - Configuration management
//! - LLM completion client, model routing, and static pricing
//! - Web search client
//! - Metrics and observability

pub mod config;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod model;
pub mod telemetry;
pub mod websearch;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use llm::{CompletionModel, ModelRouter, TaskKind};
pub use model::{Chunk, Metadata, RetrievalCandidate};
pub use websearch::WebSearch;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
