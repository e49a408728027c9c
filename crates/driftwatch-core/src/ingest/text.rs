//! Human-readable plan output (`terraform plan` without `-json`).
//!
//! Only resource headers are recognized, so the resulting changes carry no
//! attribute diffs beyond the root diff a replace requires.

use std::sync::OnceLock;

use driftwatch_model::{Action, AttributeDiff, ResourceChange};
use regex::Regex;
use serde_json::Value;

use super::terraform::type_from_address;
use crate::error::{DriftError, Result};

const HEADER_PATTERN: &str = concat!(
    r"^\s*(?:#|\+|~|-/\+|-|<=)\s+(\S+)\s+(?:is tainted, so\s+)?",
    r"(will be created|will be updated in-place|will be updated|will be destroyed",
    r"|must be replaced|will be replaced|will be read during apply)",
);
const ANSI_PATTERN: &str = r"\x1b\[[0-9;]*m";
const NO_CHANGES: &str = "No changes.";

static HEADER: OnceLock<Regex> = OnceLock::new();
static ANSI: OnceLock<Regex> = OnceLock::new();

fn compiled(cell: &'static OnceLock<Regex>, pattern: &str) -> Result<&'static Regex> {
    if let Some(re) = cell.get() {
        return Ok(re);
    }
    let re = Regex::new(pattern)
        .map_err(|e| DriftError::invariant("text plan pattern", e.to_string()))?;
    Ok(cell.get_or_init(|| re))
}

fn action_for(phrase: &str) -> Action {
    match phrase {
        "will be created" => Action::Create,
        "will be updated in-place" | "will be updated" => Action::Update,
        "will be destroyed" => Action::Delete,
        "must be replaced" | "will be replaced" => Action::Replace,
        "will be read during apply" => Action::NoOp,
        _ => Action::Unknown,
    }
}

/// Parse resource headers out of a human-readable plan.
///
/// Text with neither a recognized header nor a `No changes.` line is
/// rejected as malformed, since it is most likely an error transcript.
pub fn parse_text_plan(text: &str) -> Result<Vec<ResourceChange>> {
    let header = compiled(&HEADER, HEADER_PATTERN)?;
    let ansi = compiled(&ANSI, ANSI_PATTERN)?;

    let plain = ansi.replace_all(text, "");
    let mut changes = Vec::new();
    for line in plain.lines() {
        let Some(caps) = header.captures(line) else {
            continue;
        };
        let address = &caps[1];
        let action = action_for(&caps[2]);
        let diffs = if action == Action::Replace {
            vec![AttributeDiff::new("", Value::Null, Value::Null).forcing_replacement()]
        } else {
            Vec::new()
        };
        changes.push(ResourceChange::new(address, type_from_address(address), action, diffs)?);
    }

    if changes.is_empty() && !plain.contains(NO_CHANGES) {
        return Err(DriftError::malformed(
            "text plan contains no resource changes and no 'No changes.' marker",
        ));
    }
    Ok(changes)
}
