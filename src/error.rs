use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Error taxonomy for the PRP orchestration engine.
///
/// Session and orchestrator operations raise these; the research queue only
/// logs failures and surfaces them to `wait_for_prp` awaiters.
#[derive(Error, Debug)]
pub enum EngineError {
    /// PRD file is missing or unreadable
    #[error("PRD not found: {}", .path.display())]
    PrdNotFound { path: PathBuf },

    /// PRD exists but fails the validity rules (non-empty, at least 100 bytes)
    #[error("PRD invalid: {reason}")]
    PrdInvalid { reason: String },

    /// tasks.json or prd_snapshot.md missing, unparseable, or failing schema
    #[error("session file error: {0}")]
    SessionFile(String),

    /// Session lookup with no matching directory, or no current session
    #[error("session not found: {0}")]
    NotFound(String),

    /// Dependency wait elapsed before all dependencies completed
    #[error("timed out after {waited_ms}ms waiting for dependencies of {item_id}")]
    Timeout { item_id: String, waited_ms: u64 },

    /// Research generation failed for an item
    #[error("research failed for {item_id}: {message}")]
    Research { item_id: String, message: String },

    /// Implementation runtime reported a non-successful result
    #[error("execution failed for {item_id}: {message}")]
    Execution { item_id: String, message: String },

    /// Underlying filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error outside the session-file path
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Create a session-file error with a path and cause
    pub fn session_file(path: &std::path::Path, cause: impl std::fmt::Display) -> Self {
        Self::SessionFile(format!("{}: {}", path.display(), cause))
    }

    /// True for errors raised by session discovery when nothing matched
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::PrdNotFound { .. })
    }
}
