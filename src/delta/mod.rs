//! PRD delta analysis and task patching
//!
//! The analyzer itself is an external, model-backed collaborator; this
//! module owns its interface, a line-based textual diff summary for delta
//! sessions, and the pure patcher that rewrites item statuses from a
//! completed analysis.

use async_trait::async_trait;
use std::collections::HashSet;

use crate::error::Result;
use crate::hierarchy::update_status;
use crate::models::{Backlog, ChangeKind, DeltaAnalysis, ItemStatus};

/// Number of sample lines quoted per direction in a diff summary
const DIFF_SAMPLE_LINES: usize = 5;

/// External collaborator producing a [`DeltaAnalysis`] over two PRD
/// revisions. The engine only depends on this interface.
#[async_trait]
pub trait DeltaAnalyzer: Send + Sync {
    async fn analyze(&self, old_prd: &str, new_prd: &str) -> Result<DeltaAnalysis>;
}

/// Human-readable summary of the textual differences between two PRDs.
///
/// Line-based: counts lines present in only one revision and quotes a few
/// samples from each side.
pub fn diff_summary(old_prd: &str, new_prd: &str) -> String {
    let old_lines: HashSet<&str> = old_prd.lines().collect();
    let new_lines: HashSet<&str> = new_prd.lines().collect();

    let added: Vec<&str> = new_prd
        .lines()
        .filter(|line| !old_lines.contains(line))
        .collect();
    let removed: Vec<&str> = old_prd
        .lines()
        .filter(|line| !new_lines.contains(line))
        .collect();

    if added.is_empty() && removed.is_empty() {
        return "PRDs are textually identical".to_string();
    }

    let mut summary = format!(
        "{} line(s) added, {} line(s) removed",
        added.len(),
        removed.len()
    );
    for line in added.iter().take(DIFF_SAMPLE_LINES) {
        summary.push_str(&format!("\n+ {}", line));
    }
    for line in removed.iter().take(DIFF_SAMPLE_LINES) {
        summary.push_str(&format!("\n- {}", line));
    }
    summary
}

/// Rewrite item statuses from a delta analysis. Pure: the input backlog is
/// untouched and a new backlog is returned.
///
/// Modified items go back to Planned (forcing re-execution); removed items
/// become Obsolete but stay in the hierarchy; added items are the planner's
/// job and get no status rewrite here. Unmentioned items are unchanged.
pub fn patch_backlog(backlog: &Backlog, delta: &DeltaAnalysis) -> Backlog {
    let mut patched = backlog.clone();
    for change in &delta.changes {
        match change.kind {
            ChangeKind::Modified => {
                patched = update_status(&patched, &change.item_id, ItemStatus::Planned);
            }
            ChangeKind::Removed => {
                patched = update_status(&patched, &change.item_id, ItemStatus::Obsolete);
            }
            ChangeKind::Added => {}
        }
    }
    patched
}
