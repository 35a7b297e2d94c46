//! Session lifecycle management
//!
//! A session is a directory keyed by PRD hash. The manager owns exactly one
//! current session: it either loads the session whose hash matches the PRD
//! or creates a new one, buffers status updates in memory, and flushes them
//! to `tasks.json` in a single atomic write.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::delta::diff_summary;
use crate::error::{EngineError, Result};
use crate::hierarchy;
use crate::models::{Backlog, ItemStatus, ResearchArtifact};
use crate::storage::{
    self, atomic_write, find_session_by_hash, hash_prd_bytes, next_sequence,
    parse_session_dir_name, read_parent_session, session_id, write_json, SessionMetadata,
    SessionPaths,
};

/// Minimum PRD size accepted by the validity rules
const MIN_PRD_BYTES: usize = 100;

/// In-memory state of one loaded session
#[derive(Debug, Clone)]
pub struct SessionState {
    pub metadata: SessionMetadata,
    /// Exact PRD bytes this session was keyed on
    pub prd_snapshot: Vec<u8>,
    /// The backlog as last loaded or updated in memory
    pub task_registry: Backlog,
    /// Item currently being executed, if any
    pub current_item_id: Option<String>,
}

/// View returned by [`SessionManager::create_delta_session`]
#[derive(Debug, Clone)]
pub struct DeltaSessionState {
    pub metadata: SessionMetadata,
    pub old_prd: Vec<u8>,
    pub new_prd: Vec<u8>,
    /// Human-readable summary of the textual differences between the PRDs
    pub diff_summary: String,
}

/// Stateful facade over one session directory.
///
/// Status updates go through [`update_item_status`](Self::update_item_status)
/// and stay in memory until [`flush_updates`](Self::flush_updates) writes
/// them out in one atomic replace.
pub struct SessionManager {
    prd_path: PathBuf,
    plan_dir: PathBuf,
    session: Option<SessionState>,
    dirty: bool,
    pending_updates: usize,
}

impl SessionManager {
    pub fn new(prd_path: impl Into<PathBuf>, plan_dir: impl Into<PathBuf>) -> Self {
        Self {
            prd_path: prd_path.into(),
            plan_dir: plan_dir.into(),
            session: None,
            dirty: false,
            pending_updates: 0,
        }
    }

    /// The currently loaded session, if any
    pub fn session(&self) -> Option<&SessionState> {
        self.session.as_ref()
    }

    /// True when in-memory state has diverged from `tasks.json`
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Number of status updates buffered since the last flush
    pub fn pending_update_count(&self) -> usize {
        self.pending_updates
    }

    /// The plan directory this manager discovers sessions in
    pub fn plan_dir(&self) -> &Path {
        &self.plan_dir
    }

    fn require_session(&self) -> Result<&SessionState> {
        self.session
            .as_ref()
            .ok_or_else(|| EngineError::NotFound("no session loaded".to_string()))
    }

    fn require_session_mut(&mut self) -> Result<&mut SessionState> {
        self.session
            .as_mut()
            .ok_or_else(|| EngineError::NotFound("no session loaded".to_string()))
    }

    /// Idempotent entry point: validate the PRD, then load the session whose
    /// hash matches it, or create a fresh one.
    pub fn initialize(&mut self) -> Result<&SessionState> {
        let prd_bytes = read_valid_prd(&self.prd_path)?;
        let hash = hash_prd_bytes(&prd_bytes);

        if let Some(existing) = find_session_by_hash(&hash, &self.plan_dir)? {
            log::info!("Loading existing session {} for PRD hash {}", existing.id, hash);
            let dir = existing.path.clone();
            return self.load_session(&dir);
        }

        let state = self.create_session_inner(&hash, &prd_bytes, None, Backlog::default())?;
        log::info!("Created session {} in {}", state.metadata.id, state.metadata.path.display());
        self.dirty = false;
        self.pending_updates = 0;
        Ok(self.session.insert(state))
    }

    /// Explicitly load a session from its directory.
    ///
    /// Metadata is reconstructed from the directory name; `tasks.json` is
    /// strictly decoded and the PRD snapshot must be present.
    pub fn load_session(&mut self, session_dir: &Path) -> Result<&SessionState> {
        let name = session_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (seq, hash) = parse_session_dir_name(&name).ok_or_else(|| {
            EngineError::NotFound(format!("'{}' is not a session directory", name))
        })?;

        let paths = SessionPaths::new(session_dir);
        let task_registry: Backlog = storage::read_json(&paths.tasks())?;
        let prd_snapshot = fs::read(paths.prd_snapshot())
            .map_err(|e| EngineError::session_file(&paths.prd_snapshot(), e))?;
        let parent_session = read_parent_session(session_dir)?;

        let created_at = fs::metadata(session_dir)
            .and_then(|m| m.modified())
            .map(chrono::DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        let state = SessionState {
            metadata: SessionMetadata {
                id: session_id(seq, &hash),
                hash,
                path: session_dir.to_path_buf(),
                created_at,
                parent_session,
            },
            prd_snapshot,
            task_registry,
            current_item_id: None,
        };
        self.dirty = false;
        self.pending_updates = 0;
        Ok(self.session.insert(state))
    }

    /// Create a delta session for a changed PRD.
    ///
    /// Always creates a new session (even when the hash matches the current
    /// one), records the current session as parent, carries the current task
    /// registry forward, and makes the delta session current.
    pub fn create_delta_session(&mut self, new_prd_path: &Path) -> Result<DeltaSessionState> {
        let current = self.require_session()?;
        let old_prd = current.prd_snapshot.clone();
        let parent_id = current.metadata.id.clone();
        let registry = current.task_registry.clone();

        let new_prd = read_valid_prd(new_prd_path)?;
        let hash = hash_prd_bytes(&new_prd);
        let state = self.create_session_inner(&hash, &new_prd, Some(parent_id), registry)?;

        let summary = diff_summary(
            &String::from_utf8_lossy(&old_prd),
            &String::from_utf8_lossy(&new_prd),
        );
        log::info!(
            "Created delta session {} (parent {}): {}",
            state.metadata.id,
            state.metadata.parent_session.as_deref().unwrap_or("-"),
            summary.lines().next().unwrap_or("")
        );

        let view = DeltaSessionState {
            metadata: state.metadata.clone(),
            old_prd,
            new_prd,
            diff_summary: summary,
        };

        self.prd_path = new_prd_path.to_path_buf();
        self.session = Some(state);
        self.dirty = false;
        self.pending_updates = 0;
        Ok(view)
    }

    fn create_session_inner(
        &self,
        hash: &str,
        prd_bytes: &[u8],
        parent: Option<String>,
        task_registry: Backlog,
    ) -> Result<SessionState> {
        let seq = next_sequence(&self.plan_dir)?;
        let id = session_id(seq, hash);
        let paths = SessionPaths::new(self.plan_dir.join(&id));
        paths.create_tree()?;

        atomic_write(&paths.prd_snapshot(), prd_bytes)?;
        write_json(&paths.tasks(), &task_registry)?;
        if let Some(parent_id) = &parent {
            atomic_write(&paths.parent_session(), parent_id.as_bytes())?;
        }

        Ok(SessionState {
            metadata: SessionMetadata {
                id,
                hash: hash.to_string(),
                path: paths.root,
                created_at: Utc::now(),
                parent_session: parent,
            },
            prd_snapshot: prd_bytes.to_vec(),
            task_registry,
            current_item_id: None,
        })
    }

    /// Replace the whole task registry, marking the session dirty.
    ///
    /// This is the seam for the upstream planner, which derives the
    /// hierarchy from the PRD and installs it here.
    pub fn set_task_registry(&mut self, backlog: Backlog) -> Result<()> {
        self.require_session_mut()?.task_registry = backlog;
        self.dirty = true;
        self.pending_updates += 1;
        Ok(())
    }

    /// Apply an immutable status update to the in-memory registry and mark
    /// the session dirty. `tasks.json` does not change until the next flush.
    pub fn update_item_status(&mut self, item_id: &str, status: ItemStatus) -> Result<()> {
        let session = self.require_session_mut()?;
        session.task_registry = hierarchy::update_status(&session.task_registry, item_id, status);
        self.dirty = true;
        self.pending_updates += 1;
        log::debug!("Buffered status update: {} -> {}", item_id, status);
        Ok(())
    }

    /// Record which item the orchestrator is currently executing
    pub fn set_current_item(&mut self, item_id: Option<String>) -> Result<()> {
        self.require_session_mut()?.current_item_id = item_id;
        Ok(())
    }

    /// Write the current registry to `tasks.json` in one atomic replace and
    /// clear the dirty flag. Updates buffered since the last flush coalesce
    /// into this single write.
    pub fn flush_updates(&mut self) -> Result<()> {
        let session = self.require_session()?;
        let tasks_path = SessionPaths::new(&session.metadata.path).tasks();
        write_json(&tasks_path, &session.task_registry)?;

        let items = hierarchy::walk(&session.task_registry).count();
        let saved = self.pending_updates.saturating_sub(1);
        log::info!(
            "Flushed {} items to {} in 1 write ({} writes saved)",
            items,
            tasks_path.display(),
            saved
        );

        self.dirty = false;
        self.pending_updates = 0;
        Ok(())
    }

    /// Persist a research artifact under the session's `prps/` directory and
    /// return the file path handed to the implementation runtime.
    pub fn save_prp(&self, artifact: &ResearchArtifact) -> Result<PathBuf> {
        let session = self.require_session()?;
        let paths = SessionPaths::new(&session.metadata.path);
        storage::ensure_dir(&paths.prps())?;
        let prp_path = paths.prps().join(artifact.file_name());
        atomic_write(&prp_path, artifact.to_markdown().as_bytes())?;
        Ok(prp_path)
    }

    /// Persist a per-item execution result under `artifacts/` so a later run
    /// can inspect what the runtime reported.
    pub fn save_execution_report<T: serde::Serialize>(
        &self,
        item_id: &str,
        report: &T,
    ) -> Result<PathBuf> {
        let session = self.require_session()?;
        let paths = SessionPaths::new(&session.metadata.path);
        storage::ensure_dir(&paths.artifacts())?;
        let report_path = paths.artifacts().join(format!("{}.json", item_id));
        write_json(&report_path, report)?;
        Ok(report_path)
    }
}

/// Read PRD bytes, enforcing the validity rules: the file must exist, be
/// readable, non-empty, and at least 100 bytes.
fn read_valid_prd(prd_path: &Path) -> Result<Vec<u8>> {
    let bytes = fs::read(prd_path).map_err(|_| EngineError::PrdNotFound {
        path: prd_path.to_path_buf(),
    })?;
    if bytes.is_empty() {
        return Err(EngineError::PrdInvalid {
            reason: format!("{} is empty", prd_path.display()),
        });
    }
    if bytes.len() < MIN_PRD_BYTES {
        return Err(EngineError::PrdInvalid {
            reason: format!(
                "{} holds {} bytes, minimum is {}",
                prd_path.display(),
                bytes.len(),
                MIN_PRD_BYTES
            ),
        });
    }
    Ok(bytes)
}
