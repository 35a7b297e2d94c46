//! Delta analysis model
//!
//! Produced by comparing two PRD revisions; consumed by the task patcher to
//! rewrite item statuses.

use serde::{Deserialize, Serialize};

/// What happened to an item between two PRD revisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// How disruptive a change is expected to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeImpact {
    Low,
    Medium,
    High,
}

/// A single item-level change between two PRDs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrdChange {
    pub kind: ChangeKind,
    pub item_id: String,
    pub description: String,
    pub impact: ChangeImpact,
}

impl PrdChange {
    pub fn new(
        kind: ChangeKind,
        item_id: impl Into<String>,
        description: impl Into<String>,
        impact: ChangeImpact,
    ) -> Self {
        Self {
            kind,
            item_id: item_id.into(),
            description: description.into(),
            impact,
        }
    }
}

/// Full analysis of the differences between two PRD revisions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaAnalysis {
    /// Item-level changes, in no particular order
    pub changes: Vec<PrdChange>,
    /// Free-form guidance for the planner applying the delta
    pub patch_instructions: String,
    /// Every item id touched by the analysis
    pub task_ids: Vec<String>,
}

impl DeltaAnalysis {
    /// Changes of one kind
    pub fn changes_of(&self, kind: ChangeKind) -> impl Iterator<Item = &PrdChange> {
        self.changes.iter().filter(move |c| c.kind == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_kind_wire_format() {
        assert_eq!(
            serde_json::to_string(&ChangeKind::Modified).unwrap(),
            "\"modified\""
        );
        assert_eq!(
            serde_json::to_string(&ChangeImpact::High).unwrap(),
            "\"high\""
        );
    }

    #[test]
    fn test_changes_of_filters_by_kind() {
        let delta = DeltaAnalysis {
            changes: vec![
                PrdChange::new(ChangeKind::Modified, "P1.M1.T1.S1", "", ChangeImpact::Low),
                PrdChange::new(ChangeKind::Removed, "P1.M1.T2", "", ChangeImpact::High),
            ],
            patch_instructions: String::new(),
            task_ids: vec!["P1.M1.T1.S1".to_string(), "P1.M1.T2".to_string()],
        };
        assert_eq!(delta.changes_of(ChangeKind::Modified).count(), 1);
        assert_eq!(delta.changes_of(ChangeKind::Added).count(), 0);
    }
}
