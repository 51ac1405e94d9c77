//! Canonical resource names.
//!
//! Names are always derived from the stored key columns; a name found in a
//! stored or caller-supplied document is never trusted as identity.

use crate::error::{ProvenanceError, Result};

const PROJECTS: &str = "projects";
const NOTES: &str = "notes";
const OCCURRENCES: &str = "occurrences";

/// `projects/{project_id}`
pub fn format_project(project_id: &str) -> String {
    format!("{PROJECTS}/{project_id}")
}

/// `projects/{project_id}/notes/{note_id}`
pub fn format_note(project_id: &str, note_id: &str) -> String {
    format!("{PROJECTS}/{project_id}/{NOTES}/{note_id}")
}

/// `projects/{project_id}/occurrences/{occurrence_id}`
pub fn format_occurrence(project_id: &str, occurrence_id: &str) -> String {
    format!("{PROJECTS}/{project_id}/{OCCURRENCES}/{occurrence_id}")
}

/// Parse `projects/{project_id}` into the project id.
pub fn parse_project(name: &str) -> Result<String> {
    match split(name).as_slice() {
        [PROJECTS, project_id] => Ok((*project_id).to_string()),
        _ => Err(invalid("project", name)),
    }
}

/// Parse `projects/{project_id}/notes/{note_id}` into its two ids.
pub fn parse_note(name: &str) -> Result<(String, String)> {
    parse_child(name, NOTES).ok_or_else(|| invalid("note", name))
}

/// Parse `projects/{project_id}/occurrences/{occurrence_id}` into its two ids.
pub fn parse_occurrence(name: &str) -> Result<(String, String)> {
    parse_child(name, OCCURRENCES).ok_or_else(|| invalid("occurrence", name))
}

fn parse_child(name: &str, collection: &str) -> Option<(String, String)> {
    match split(name).as_slice() {
        [PROJECTS, project_id, c, child_id] if *c == collection => {
            Some(((*project_id).to_string(), (*child_id).to_string()))
        }
        _ => None,
    }
}

/// Split on `/`, rejecting empty segments so `projects//notes/x` fails.
fn split(name: &str) -> Vec<&str> {
    let parts: Vec<&str> = name.split('/').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Vec::new();
    }
    parts
}

fn invalid(kind: &str, name: &str) -> ProvenanceError {
    ProvenanceError::InvalidArgument(format!("invalid {} name {:?}", kind, name))
}
