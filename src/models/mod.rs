//! Data models for the PRP orchestration engine
//!
//! The backlog is an immutable tree of work items derived from a PRD:
//! phases contain milestones, milestones contain tasks, tasks contain
//! subtasks. Subtasks are the only executable kind.

pub mod contract;
pub mod delta;
pub mod prp;

pub use contract::ContractDefinition;
pub use delta::{ChangeImpact, ChangeKind, DeltaAnalysis, PrdChange};
pub use prp::{GateLevel, ResearchArtifact, SuccessCriterion, ValidationGate};

use serde::{Deserialize, Serialize};

/// Execution status of a work item.
///
/// This is a closed set with no runtime transition validation: any status may
/// replace any other. Obsolete is only ever assigned by delta patching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Planned,
    Researching,
    Implementing,
    Complete,
    Failed,
    Obsolete,
}

impl ItemStatus {
    /// String representation matching the wire format
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Planned => "planned",
            ItemStatus::Researching => "researching",
            ItemStatus::Implementing => "implementing",
            ItemStatus::Complete => "complete",
            ItemStatus::Failed => "failed",
            ItemStatus::Obsolete => "obsolete",
        }
    }

    /// True once an item has reached an end state for this run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::Complete | ItemStatus::Failed | ItemStatus::Obsolete
        )
    }
}

impl Default for ItemStatus {
    fn default() -> Self {
        ItemStatus::Planned
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A phase of the plan (`P<n>`), the top-level grouping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Phase {
    pub id: String,
    pub title: String,
    pub status: ItemStatus,
    pub description: String,
    /// Ordered list of milestones; every child must be a Milestone
    pub milestones: Vec<WorkItem>,
}

/// A milestone within a phase (`P<n>.M<n>`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Milestone {
    pub id: String,
    pub title: String,
    pub status: ItemStatus,
    pub description: String,
    /// Ordered list of tasks; every child must be a Task
    pub tasks: Vec<WorkItem>,
}

/// A task within a milestone (`P<n>.M<n>.T<n>`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub status: ItemStatus,
    pub description: String,
    /// Ordered list of subtasks; every child must be a Subtask
    pub subtasks: Vec<WorkItem>,
}

/// A leaf subtask (`P<n>.M<n>.T<n>.S<n>`), the only executable kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Subtask {
    pub id: String,
    pub title: String,
    pub status: ItemStatus,
    pub description: String,
    pub story_points: u32,
    /// IDs of items (within the same backlog) that must be Complete first
    pub dependencies: Vec<String>,
    /// Contract Definition block consumed by research generation
    pub context_scope: String,
}

/// A node in the backlog hierarchy, discriminated by `"type"` on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkItem {
    Phase(Phase),
    Milestone(Milestone),
    Task(Task),
    Subtask(Subtask),
}

impl WorkItem {
    /// Hierarchical dot-separated item ID
    pub fn id(&self) -> &str {
        match self {
            WorkItem::Phase(p) => &p.id,
            WorkItem::Milestone(m) => &m.id,
            WorkItem::Task(t) => &t.id,
            WorkItem::Subtask(s) => &s.id,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            WorkItem::Phase(p) => &p.title,
            WorkItem::Milestone(m) => &m.title,
            WorkItem::Task(t) => &t.title,
            WorkItem::Subtask(s) => &s.title,
        }
    }

    pub fn status(&self) -> ItemStatus {
        match self {
            WorkItem::Phase(p) => p.status,
            WorkItem::Milestone(m) => m.status,
            WorkItem::Task(t) => t.status,
            WorkItem::Subtask(s) => s.status,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            WorkItem::Phase(p) => &p.description,
            WorkItem::Milestone(m) => &m.description,
            WorkItem::Task(t) => &t.description,
            WorkItem::Subtask(s) => &s.description,
        }
    }

    /// The kind discriminant as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            WorkItem::Phase(_) => "Phase",
            WorkItem::Milestone(_) => "Milestone",
            WorkItem::Task(_) => "Task",
            WorkItem::Subtask(_) => "Subtask",
        }
    }

    /// Children in declared order; empty for subtasks
    pub fn children(&self) -> &[WorkItem] {
        match self {
            WorkItem::Phase(p) => &p.milestones,
            WorkItem::Milestone(m) => &m.tasks,
            WorkItem::Task(t) => &t.subtasks,
            WorkItem::Subtask(_) => &[],
        }
    }

    pub(crate) fn children_mut(&mut self) -> &mut [WorkItem] {
        match self {
            WorkItem::Phase(p) => &mut p.milestones,
            WorkItem::Milestone(m) => &mut m.tasks,
            WorkItem::Task(t) => &mut t.subtasks,
            WorkItem::Subtask(_) => &mut [],
        }
    }

    pub(crate) fn set_status(&mut self, status: ItemStatus) {
        match self {
            WorkItem::Phase(p) => p.status = status,
            WorkItem::Milestone(m) => m.status = status,
            WorkItem::Task(t) => t.status = status,
            WorkItem::Subtask(s) => s.status = status,
        }
    }

    pub fn is_subtask(&self) -> bool {
        matches!(self, WorkItem::Subtask(_))
    }

    /// The subtask payload, when this node is a leaf
    pub fn as_subtask(&self) -> Option<&Subtask> {
        match self {
            WorkItem::Subtask(s) => Some(s),
            _ => None,
        }
    }
}

/// The root document: an ordered list of phases.
///
/// Serializes to the exact `tasks.json` shape, `{"backlog": [...]}` with
/// unknown fields rejected on load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Backlog {
    pub backlog: Vec<WorkItem>,
}

impl Backlog {
    pub fn new(phases: Vec<WorkItem>) -> Self {
        Self { backlog: phases }
    }

    pub fn is_empty(&self) -> bool {
        self.backlog.is_empty()
    }
}

/// Ancestor IDs of a dot-separated item ID, shortest first.
///
/// `"P1.M1.T1.S1"` yields `["P1", "P1.M1", "P1.M1.T1"]`; a top-level ID has
/// no ancestors.
pub fn ancestor_ids(id: &str) -> Vec<String> {
    let segments: Vec<&str> = id.split('.').collect();
    (1..segments.len())
        .map(|n| segments[..n].join("."))
        .collect()
}

/// True when `id` sits strictly below `prefix` in the hierarchy path
pub fn is_descendant_of(id: &str, prefix: &str) -> bool {
    id.len() > prefix.len() + 1 && id.starts_with(prefix) && id.as_bytes()[prefix.len()] == b'.'
}
