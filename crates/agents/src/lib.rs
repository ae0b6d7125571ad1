//! Deepquill orchestration core
//!
//! Multi-agent execution of open-ended research queries:
//! - Lead agent plans the decomposition and synthesizes worker findings
//! - Worker agents execute subtasks with multi-source retrieval
//! - The orchestrator drives the session lifecycle over a fixed worker pool
//!
//! The produced interface is a single awaited `Orchestrator::research` call
//! that returns a report with synthesis, sources, and cost accounting. It
//! does not fail for any recognized degraded state: partial worker failures,
//! malformed plans, and unavailable collaborators all reduce quality, not
//! availability.

mod lead;
mod orchestrator;
mod prompts;
mod worker;

pub use lead::{CostBreakdown, LeadAgent, SynthesisOutcome};
pub use orchestrator::{Orchestrator, ResearchReport, SessionState, SourceDiversity};
pub use prompts::{EXECUTION_SYSTEM_PROMPT, PLANNING_SYSTEM_PROMPT, SYNTHESIS_SYSTEM_PROMPT};
pub use worker::{ContextTask, TaskResult, WorkerAgent};
