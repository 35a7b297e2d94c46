//! Filesystem primitives for session persistence
//!
//! All replacing writes go through [`atomic_write`]: serialize to an
//! adjacent `.tmp` sibling, then rename over the target. A crash mid-write
//! leaves either the old file or the new one, never a torn one.

pub mod sessions;

pub use sessions::{
    find_latest_session, find_session_by_hash, find_session_by_prd, hash_prd_bytes, hash_prd_file,
    list_session_infos, list_sessions, next_sequence, parse_session_dir_name, read_parent_session,
    session_id, session_info, SessionInfo, SessionMetadata, SessionPaths, ARCHITECTURE_DIR,
    ARTIFACTS_DIR, PARENT_SESSION_FILE, PRD_SNAPSHOT_FILE, PRPS_DIR, TASKS_FILE,
};

use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};

/// Mode for session directories
#[cfg(unix)]
const DIR_MODE: u32 = 0o755;
/// Mode for session files
#[cfg(unix)]
const FILE_MODE: u32 = 0o644;

/// Create a directory (and parents) with the session directory mode
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.is_dir() {
        fs::create_dir_all(path)?;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(DIR_MODE))?;
    }
    Ok(())
}

/// The adjacent temp path used by [`atomic_write`]
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".tmp");
    path.with_file_name(name)
}

/// Atomically replace `path` with `contents`.
///
/// Writes to an adjacent `<name>.tmp`, fixes the file mode, then renames
/// over the target. No temp file survives a successful call.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = tmp_path(path);
    fs::write(&tmp, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(FILE_MODE))?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read and strictly decode a JSON file.
///
/// A missing file, unparseable JSON, or schema violation (unknown fields,
/// wrong discriminant) all surface as [`EngineError::SessionFile`].
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        fs::read_to_string(path).map_err(|e| EngineError::session_file(path, e))?;
    serde_json::from_str(&content).map_err(|e| EngineError::session_file(path, e))
}

/// Serialize a value as pretty JSON and write it atomically
pub fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)
        .map_err(|e| EngineError::session_file(path, e))?;
    atomic_write(path, content.as_bytes())
}
