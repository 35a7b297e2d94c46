//! Session directory layout and discovery
//!
//! A plan directory holds one session directory per PRD hash:
//!
//! ```text
//! plan/
//!   001_3f9c2a81d4e0/
//!     prd_snapshot.md        exact PRD bytes behind the hash
//!     tasks.json             serialized backlog
//!     parent_session.txt     optional parent session id
//!     architecture/
//!     prps/
//!     artifacts/
//! ```
//!
//! Directory names are `<seq:03>_<hash12>`; sequence is the 1-based ordinal
//! among sibling sessions, hash the first 12 hex characters of SHA-256 over
//! the PRD bytes.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use super::ensure_dir;
use crate::error::{EngineError, Result};

pub const PRD_SNAPSHOT_FILE: &str = "prd_snapshot.md";
pub const TASKS_FILE: &str = "tasks.json";
pub const PARENT_SESSION_FILE: &str = "parent_session.txt";
pub const ARCHITECTURE_DIR: &str = "architecture";
pub const PRPS_DIR: &str = "prps";
pub const ARTIFACTS_DIR: &str = "artifacts";

/// Hex length of the truncated PRD hash
const HASH_LEN: usize = 12;

/// Metadata describing one session directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    /// `<seq:03>_<hash12>`, equal to the directory name
    pub id: String,
    /// First 12 hex characters of SHA-256 over the PRD bytes
    pub hash: String,
    /// Absolute path of the session directory
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    /// Parent session id when this is a delta session
    pub parent_session: Option<String>,
}

impl SessionMetadata {
    /// 1-based sequence parsed from the id
    pub fn sequence(&self) -> u32 {
        parse_session_dir_name(&self.id).map(|(seq, _)| seq).unwrap_or(0)
    }
}

/// Well-known paths inside one session directory
#[derive(Debug, Clone)]
pub struct SessionPaths {
    pub root: PathBuf,
}

impl SessionPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn prd_snapshot(&self) -> PathBuf {
        self.root.join(PRD_SNAPSHOT_FILE)
    }

    pub fn tasks(&self) -> PathBuf {
        self.root.join(TASKS_FILE)
    }

    pub fn parent_session(&self) -> PathBuf {
        self.root.join(PARENT_SESSION_FILE)
    }

    pub fn architecture(&self) -> PathBuf {
        self.root.join(ARCHITECTURE_DIR)
    }

    pub fn prps(&self) -> PathBuf {
        self.root.join(PRPS_DIR)
    }

    pub fn artifacts(&self) -> PathBuf {
        self.root.join(ARTIFACTS_DIR)
    }

    /// Create the session directory and its three workspace subdirectories
    pub fn create_tree(&self) -> Result<()> {
        ensure_dir(&self.root)?;
        ensure_dir(&self.architecture())?;
        ensure_dir(&self.prps())?;
        ensure_dir(&self.artifacts())?;
        Ok(())
    }
}

/// First 12 hex characters of SHA-256 over the PRD byte stream
pub fn hash_prd_bytes(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..HASH_LEN].to_string()
}

/// Hash a PRD file's bytes. A missing file is `PrdNotFound`.
pub fn hash_prd_file(prd_path: &Path) -> Result<String> {
    let bytes = fs::read(prd_path).map_err(|_| EngineError::PrdNotFound {
        path: prd_path.to_path_buf(),
    })?;
    Ok(hash_prd_bytes(&bytes))
}

/// Parse a session directory name into `(sequence, hash)`.
///
/// Only names matching `^\d{3}_[0-9a-f]{12}$` parse.
pub fn parse_session_dir_name(name: &str) -> Option<(u32, String)> {
    let re = Regex::new(r"^(\d{3})_([0-9a-f]{12})$").ok()?;
    let caps = re.captures(name)?;
    let seq = caps.get(1)?.as_str().parse().ok()?;
    let hash = caps.get(2)?.as_str().to_string();
    Some((seq, hash))
}

/// Format a session id from its parts
pub fn session_id(seq: u32, hash: &str) -> String {
    format!("{:03}_{}", seq, hash)
}

/// Read and validate `parent_session.txt` from a session directory.
///
/// The file is optional; a present file must contain a single session id,
/// optionally terminated by whitespace.
pub fn read_parent_session(session_dir: &Path) -> Result<Option<String>> {
    let path = session_dir.join(PARENT_SESSION_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path).map_err(|e| EngineError::session_file(&path, e))?;
    let id = raw.trim_end().to_string();
    if parse_session_dir_name(&id).is_none() {
        return Err(EngineError::session_file(
            &path,
            format!("'{}' is not a session id", id),
        ));
    }
    Ok(Some(id))
}

fn metadata_for_dir(path: &Path, seq_hash: (u32, String)) -> SessionMetadata {
    let (seq, hash) = seq_hash;
    let created_at = fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    let parent_session = read_parent_session(path).ok().flatten();
    SessionMetadata {
        id: session_id(seq, &hash),
        hash,
        path: path.to_path_buf(),
        created_at,
        parent_session,
    }
}

/// List session directories under a plan directory, sorted by sequence
/// ascending. A missing plan directory is an empty list, not an error.
pub fn list_sessions(plan_dir: &Path) -> Result<Vec<SessionMetadata>> {
    if !plan_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut sessions = Vec::new();
    for entry in fs::read_dir(plan_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name();
        if let Some(parsed) = parse_session_dir_name(&name.to_string_lossy()) {
            sessions.push(metadata_for_dir(&path, parsed));
        }
    }

    sessions.sort_by_key(SessionMetadata::sequence);
    Ok(sessions)
}

/// The session with the highest sequence, or None when the plan is empty
pub fn find_latest_session(plan_dir: &Path) -> Result<Option<SessionMetadata>> {
    Ok(list_sessions(plan_dir)?.into_iter().last())
}

/// Find the session whose hash matches the given PRD file.
///
/// A missing PRD is an error; a plan directory without a matching session is
/// simply None.
pub fn find_session_by_prd(prd_path: &Path, plan_dir: &Path) -> Result<Option<SessionMetadata>> {
    let hash = hash_prd_file(prd_path)?;
    Ok(find_session_by_hash(&hash, plan_dir)?)
}

/// Find the session with a specific hash
pub fn find_session_by_hash(hash: &str, plan_dir: &Path) -> Result<Option<SessionMetadata>> {
    Ok(list_sessions(plan_dir)?
        .into_iter()
        .find(|session| session.hash == hash))
}

/// Next sequence number for a new session: `max(existing) + 1`, or 1
pub fn next_sequence(plan_dir: &Path) -> Result<u32> {
    Ok(list_sessions(plan_dir)?
        .iter()
        .map(SessionMetadata::sequence)
        .max()
        .unwrap_or(0)
        + 1)
}

/// Listing view over one session: its metadata plus backlog progress
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub metadata: SessionMetadata,
    /// Total hierarchy nodes in the session's backlog
    pub item_count: usize,
    pub progress: crate::hierarchy::ProgressSummary,
}

/// Build the listing view for one session by reading its `tasks.json`
pub fn session_info(metadata: &SessionMetadata) -> Result<SessionInfo> {
    let backlog: crate::models::Backlog =
        super::read_json(&SessionPaths::new(&metadata.path).tasks())?;
    Ok(SessionInfo {
        metadata: metadata.clone(),
        item_count: crate::hierarchy::walk(&backlog).count(),
        progress: crate::hierarchy::progress_summary(&backlog),
    })
}

/// Listing views for every session in a plan directory, sequence ascending.
///
/// Sessions whose backlog cannot be read are skipped with a warning rather
/// than failing the whole listing.
pub fn list_session_infos(plan_dir: &Path) -> Result<Vec<SessionInfo>> {
    let mut infos = Vec::new();
    for metadata in list_sessions(plan_dir)? {
        match session_info(&metadata) {
            Ok(info) => infos.push(info),
            Err(error) => {
                log::warn!("Skipping unreadable session {}: {}", metadata.id, error);
            }
        }
    }
    Ok(infos)
}
