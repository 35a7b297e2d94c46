//! Research artifact (PRP) model
//!
//! A PRP is the per-subtask research document handed to the implementation
//! runtime. Gates 1-4 are executed in order; a gate without a command is
//! manual and skipped.

use serde::{Deserialize, Serialize};

/// Validation gate level, 1 through 4
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum GateLevel {
    Syntax,
    Unit,
    Integration,
    Manual,
}

impl GateLevel {
    pub fn all() -> &'static [GateLevel] {
        &[
            GateLevel::Syntax,
            GateLevel::Unit,
            GateLevel::Integration,
            GateLevel::Manual,
        ]
    }

    /// Numeric level as it appears on the wire
    pub fn as_u8(&self) -> u8 {
        match self {
            GateLevel::Syntax => 1,
            GateLevel::Unit => 2,
            GateLevel::Integration => 3,
            GateLevel::Manual => 4,
        }
    }
}

impl TryFrom<u8> for GateLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(GateLevel::Syntax),
            2 => Ok(GateLevel::Unit),
            3 => Ok(GateLevel::Integration),
            4 => Ok(GateLevel::Manual),
            other => Err(format!("validation gate level must be 1-4, got {}", other)),
        }
    }
}

impl From<GateLevel> for u8 {
    fn from(level: GateLevel) -> Self {
        level.as_u8()
    }
}

/// A single validation gate within a PRP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationGate {
    pub level: GateLevel,
    pub description: String,
    /// Shell command for the runtime to execute; absent means a manual gate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub manual: bool,
}

impl ValidationGate {
    /// A gate the runtime must execute and pass
    pub fn executable(&self) -> bool {
        self.command.is_some() && !self.manual
    }
}

/// A success criterion checked off as the runtime progresses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessCriterion {
    pub description: String,
    pub satisfied: bool,
}

/// Product Requirement Prompt: the research artifact for one subtask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchArtifact {
    pub task_id: String,
    pub objective: String,
    pub context: String,
    pub implementation_steps: Vec<String>,
    pub validation_gates: Vec<ValidationGate>,
    pub success_criteria: Vec<SuccessCriterion>,
    pub references: Vec<String>,
}

impl ResearchArtifact {
    /// File name of the persisted artifact under a session's `prps/` directory
    pub fn file_name(&self) -> String {
        format!("{}.md", self.task_id)
    }

    /// Render the artifact as a markdown document
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        md.push_str(&format!("# PRP: {}\n\n", self.task_id));
        md.push_str(&format!("## Objective\n\n{}\n\n", self.objective));
        md.push_str(&format!("## Context\n\n{}\n\n", self.context));

        md.push_str("## Implementation Steps\n\n");
        for (i, step) in self.implementation_steps.iter().enumerate() {
            md.push_str(&format!("{}. {}\n", i + 1, step));
        }
        md.push('\n');

        md.push_str("## Validation Gates\n\n");
        for gate in &self.validation_gates {
            match (&gate.command, gate.manual) {
                (Some(command), false) => md.push_str(&format!(
                    "- Level {}: {}: `{}`\n",
                    gate.level.as_u8(),
                    gate.description,
                    command
                )),
                _ => md.push_str(&format!(
                    "- Level {}: {} (manual)\n",
                    gate.level.as_u8(),
                    gate.description
                )),
            }
        }
        md.push('\n');

        if !self.success_criteria.is_empty() {
            md.push_str("## Success Criteria\n\n");
            for criterion in &self.success_criteria {
                let mark = if criterion.satisfied { "x" } else { " " };
                md.push_str(&format!("- [{}] {}\n", mark, criterion.description));
            }
            md.push('\n');
        }

        if !self.references.is_empty() {
            md.push_str("## References\n\n");
            for reference in &self.references {
                md.push_str(&format!("- {}\n", reference));
            }
            md.push('\n');
        }

        md
    }
}
