//! Hierarchy utilities
//!
//! Lookup, depth-first traversal, immutable status updates, and scope
//! filtering over a backlog. The DFS pre-order produced by [`walk`] is the
//! single source of truth for execution order.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::models::{is_descendant_of, Backlog, ItemStatus, Subtask, WorkItem};

/// Find a work item by exact ID match. Prefix or partial matches never hit.
pub fn find_item<'a>(backlog: &'a Backlog, id: &str) -> Option<&'a WorkItem> {
    walk(backlog).find(|item| item.id() == id)
}

fn find_item_mut<'a>(items: &'a mut [WorkItem], id: &str) -> Option<&'a mut WorkItem> {
    for item in items {
        if item.id() == id {
            return Some(item);
        }
        if let Some(found) = find_item_mut(item.children_mut(), id) {
            return Some(found);
        }
    }
    None
}

/// Depth-first pre-order traversal: each node strictly before its children,
/// children in declared order, phases in declared order.
pub fn walk(backlog: &Backlog) -> Walk<'_> {
    let mut stack: Vec<&WorkItem> = backlog.backlog.iter().collect();
    stack.reverse();
    Walk { stack }
}

/// Iterator state for [`walk`]
pub struct Walk<'a> {
    stack: Vec<&'a WorkItem>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a WorkItem;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.stack.pop()?;
        for child in item.children().iter().rev() {
            self.stack.push(child);
        }
        Some(item)
    }
}

/// Immutable status update: returns a new backlog where exactly the node
/// matching `id` carries the new status.
///
/// The input backlog is never mutated. An unknown `id` returns the input
/// unchanged (no error). The update never cascades to children and never
/// propagates to ancestors.
pub fn update_status(backlog: &Backlog, id: &str, status: ItemStatus) -> Backlog {
    let mut updated = backlog.clone();
    if let Some(item) = find_item_mut(&mut updated.backlog, id) {
        item.set_status(status);
    }
    updated
}

/// A filter restricting execution to a subtree of the backlog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Scope {
    /// Every leaf subtask
    All,
    /// Subtasks under one phase
    Phase(String),
    /// Subtasks under one milestone
    Milestone(String),
    /// Subtasks under one task
    Task(String),
}

impl Scope {
    /// The path prefix this scope selects under, if any
    pub fn prefix(&self) -> Option<&str> {
        match self {
            Scope::All => None,
            Scope::Phase(id) | Scope::Milestone(id) | Scope::Task(id) => Some(id),
        }
    }

    /// True when the subtask id falls inside this scope
    pub fn contains(&self, id: &str) -> bool {
        match self.prefix() {
            None => true,
            Some(prefix) => is_descendant_of(id, prefix),
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Scope::All
    }
}

/// Leaf subtasks in DFS pre-order, restricted to the scope.
///
/// A scope naming a nonexistent id selects nothing; that is an empty queue,
/// not an error.
pub fn leaf_subtasks<'a>(backlog: &'a Backlog, scope: &Scope) -> Vec<&'a Subtask> {
    walk(backlog)
        .filter_map(WorkItem::as_subtask)
        .filter(|subtask| scope.contains(&subtask.id))
        .collect()
}

/// Per-status subtask counts for progress reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSummary {
    pub planned: usize,
    pub researching: usize,
    pub implementing: usize,
    pub complete: usize,
    pub failed: usize,
    pub obsolete: usize,
    pub total: usize,
}

/// Count leaf subtasks by status
pub fn progress_summary(backlog: &Backlog) -> ProgressSummary {
    let mut summary = ProgressSummary::default();
    for subtask in walk(backlog).filter_map(WorkItem::as_subtask) {
        summary.total += 1;
        match subtask.status {
            ItemStatus::Planned => summary.planned += 1,
            ItemStatus::Researching => summary.researching += 1,
            ItemStatus::Implementing => summary.implementing += 1,
            ItemStatus::Complete => summary.complete += 1,
            ItemStatus::Failed => summary.failed += 1,
            ItemStatus::Obsolete => summary.obsolete += 1,
        }
    }
    summary
}

/// Check structural invariants of a backlog: globally unique IDs,
/// ancestor-path consistency, and dependencies resolving within the backlog.
///
/// Returns the list of violations; an empty list means the backlog is sound.
pub fn verify_integrity(backlog: &Backlog) -> Vec<String> {
    let mut issues = Vec::new();

    let mut ids: HashMap<&str, usize> = HashMap::new();
    for item in walk(backlog) {
        *ids.entry(item.id()).or_insert(0) += 1;
    }
    for (id, count) in &ids {
        if *count > 1 {
            issues.push(format!("duplicate item id '{}' ({} occurrences)", id, count));
        }
    }

    let known: HashSet<&str> = ids.keys().copied().collect();
    for item in walk(backlog) {
        for ancestor in crate::models::ancestor_ids(item.id()) {
            if !known.contains(ancestor.as_str()) {
                issues.push(format!(
                    "item '{}' is missing ancestor '{}'",
                    item.id(),
                    ancestor
                ));
            }
        }
        if let Some(subtask) = item.as_subtask() {
            for dependency in &subtask.dependencies {
                if !known.contains(dependency.as_str()) {
                    issues.push(format!(
                        "subtask '{}' depends on unknown item '{}'",
                        subtask.id, dependency
                    ));
                }
            }
        }
    }

    issues
}
