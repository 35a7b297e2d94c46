//! Contract Definition block parsing
//!
//! A subtask's `contextScope` must be a Contract Definition block: the
//! literal prefix `CONTRACT DEFINITION:` followed by exactly four numbered
//! sections in order. Empty content after a header is invalid.

use crate::error::{EngineError, Result};

/// Literal prefix every contract block must start with
const CONTRACT_PREFIX: &str = "CONTRACT DEFINITION:";

/// Section headers, in the only order they are allowed to appear
const SECTION_HEADERS: [&str; 4] = ["1. RESEARCH NOTE:", "2. INPUT:", "3. LOGIC:", "4. OUTPUT:"];

/// Parsed Contract Definition block from a subtask's `contextScope`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractDefinition {
    pub research_note: String,
    pub input: String,
    pub logic: String,
    pub output: String,
}

impl ContractDefinition {
    /// Parse a `contextScope` string into its four sections.
    ///
    /// The prefix and all four headers must be present in order, each with
    /// non-empty content.
    pub fn parse(context_scope: &str) -> Result<Self> {
        let trimmed = context_scope.trim_start();
        let body = trimmed.strip_prefix(CONTRACT_PREFIX).ok_or_else(|| invalid(
            format!("context scope must start with '{}'", CONTRACT_PREFIX),
        ))?;

        // Locate each header after the previous one so out-of-order blocks fail
        let mut positions = Vec::with_capacity(SECTION_HEADERS.len());
        let mut search_from = 0;
        for header in SECTION_HEADERS {
            let found = body[search_from..].find(header).ok_or_else(|| {
                invalid(format!("missing or out-of-order section '{}'", header))
            })?;
            let at = search_from + found;
            positions.push(at);
            search_from = at + header.len();
        }

        let mut sections = Vec::with_capacity(SECTION_HEADERS.len());
        for (i, header) in SECTION_HEADERS.iter().enumerate() {
            let content_start = positions[i] + header.len();
            let content_end = if i + 1 < positions.len() {
                positions[i + 1]
            } else {
                body.len()
            };
            let content = body[content_start..content_end].trim();
            if content.is_empty() {
                return Err(invalid(format!("section '{}' has no content", header)));
            }
            sections.push(content.to_string());
        }

        let mut it = sections.into_iter();
        Ok(Self {
            research_note: it.next().unwrap_or_default(),
            input: it.next().unwrap_or_default(),
            logic: it.next().unwrap_or_default(),
            output: it.next().unwrap_or_default(),
        })
    }

    /// Validate without keeping the parsed sections
    pub fn validate(context_scope: &str) -> Result<()> {
        Self::parse(context_scope).map(|_| ())
    }
}

fn invalid(reason: String) -> EngineError {
    EngineError::PrdInvalid {
        reason: format!("contract definition: {}", reason),
    }
}

/// Build a well-formed contract block from its four sections, the inverse of
/// [`ContractDefinition::parse`]. Used by tests and fixture builders.
pub fn format_contract(research_note: &str, input: &str, logic: &str, output: &str) -> String {
    format!(
        "{}\n{} {}\n{} {}\n{} {}\n{} {}",
        CONTRACT_PREFIX,
        SECTION_HEADERS[0],
        research_note,
        SECTION_HEADERS[1],
        input,
        SECTION_HEADERS[2],
        logic,
        SECTION_HEADERS[3],
        output,
    )
}
