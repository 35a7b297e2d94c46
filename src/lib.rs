//! PRP orchestration engine
//!
//! Drives a planned project through a hierarchical backlog derived from a
//! Product Requirements Document: research artifacts are generated for each
//! leaf work item in parallel, executed with validation gates, and progress
//! is persisted durably in PRD-hash-keyed session directories.
//!
//! The language-model-backed collaborators stay outside this crate; the
//! engine invokes them through the [`research::ResearchAgent`],
//! [`orchestrator::ImplementationRuntime`], [`orchestrator::CommitCapability`]
//! and [`delta::DeltaAnalyzer`] traits.

// Module declarations
pub mod delta;
pub mod error;
pub mod hierarchy;
pub mod models;
pub mod orchestrator;
pub mod research;
pub mod session;
pub mod storage;

// Re-export the types most drivers need
pub use error::{EngineError, Result};
pub use hierarchy::{find_item, leaf_subtasks, progress_summary, update_status, walk, Scope};
pub use models::{
    Backlog, ContractDefinition, DeltaAnalysis, ItemStatus, ResearchArtifact, Subtask,
    ValidationGate, WorkItem,
};
pub use orchestrator::{
    CommitCapability, ExecutionResult, ImplementationRuntime, TaskOrchestrator,
};
pub use research::{ResearchAgent, ResearchQueue};
pub use session::{SessionManager, SessionState};
pub use storage::{
    find_latest_session, find_session_by_prd, list_session_infos, list_sessions, SessionMetadata,
};
