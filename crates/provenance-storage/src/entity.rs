//! Per-kind configuration for the generic [`EntityStore`](crate::store::EntityStore).
//!
//! Projects, notes and occurrences share one CRUD and listing
//! implementation; what differs between them is captured here: the table
//! layout, how identity is assigned, and how the canonical name is formed.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use provenance_core::error::{ProvenanceError, Result};
use provenance_core::names;
use provenance_core::types::{Note, Occurrence, Project};

/// How a new row gets its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityRule {
    /// The caller names the entity.
    CallerSupplied,
    /// The store assigns a random UUID.
    Generated,
}

/// Column layout of an entity table.
///
/// Every table also has the `id` marker column and the `data` payload
/// column.
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub table: &'static str,
    /// Column holding the owning project id, if the kind is project-scoped.
    pub scope_column: Option<&'static str>,
    pub id_column: &'static str,
}

/// Configuration of one entity kind.
pub trait EntityKind: Send + Sync + 'static {
    type Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    /// Human-readable kind, used in messages and logs.
    const LABEL: &'static str;
    const TABLE: TableSpec;
    const IDENTITY: IdentityRule;

    /// Canonical resource name. `scope` is empty for unscoped kinds.
    fn canonical_name(scope: &str, id: &str) -> String;

    fn set_name(entity: &mut Self::Entity, name: String);

    fn stamp_create(_entity: &mut Self::Entity, _at: DateTime<Utc>) {}

    fn stamp_update(_entity: &mut Self::Entity, _at: DateTime<Utc>) {}

    /// Reject a document that would not read back as written.
    fn check_document(_entity: &Self::Entity) -> Result<()> {
        Ok(())
    }

    /// Extra key columns derived from the document on every write.
    fn derived_columns(_entity: &Self::Entity) -> Result<Vec<(&'static str, String)>> {
        Ok(Vec::new())
    }
}

/// Top-level scoping containers. Identity only.
#[derive(Debug)]
pub struct Projects;

impl EntityKind for Projects {
    type Entity = Project;

    const LABEL: &'static str = "Project";
    const TABLE: TableSpec = TableSpec {
        table: "projects",
        scope_column: None,
        id_column: "project_id",
    };
    const IDENTITY: IdentityRule = IdentityRule::CallerSupplied;

    fn canonical_name(_scope: &str, id: &str) -> String {
        names::format_project(id)
    }

    fn set_name(entity: &mut Project, name: String) {
        entity.name = name;
    }
}

/// Descriptive templates, named by the caller within a project.
#[derive(Debug)]
pub struct Notes;

impl EntityKind for Notes {
    type Entity = Note;

    const LABEL: &'static str = "Note";
    const TABLE: TableSpec = TableSpec {
        table: "notes",
        scope_column: Some("project_id"),
        id_column: "note_id",
    };
    const IDENTITY: IdentityRule = IdentityRule::CallerSupplied;

    fn canonical_name(scope: &str, id: &str) -> String {
        names::format_note(scope, id)
    }

    fn set_name(entity: &mut Note, name: String) {
        entity.name = name;
    }

    fn check_document(entity: &Note) -> Result<()> {
        reject_shadowed::<Self>(entity.shadowed_detail())
    }

    fn stamp_create(entity: &mut Note, at: DateTime<Utc>) {
        entity.create_time = Some(at);
    }

    fn stamp_update(entity: &mut Note, at: DateTime<Utc>) {
        entity.update_time = Some(at);
    }
}

/// Note instances, identified by a generated id within a project.
#[derive(Debug)]
pub struct Occurrences;

impl EntityKind for Occurrences {
    type Entity = Occurrence;

    const LABEL: &'static str = "Occurrence";
    const TABLE: TableSpec = TableSpec {
        table: "occurrences",
        scope_column: Some("project_id"),
        id_column: "occurrence_id",
    };
    const IDENTITY: IdentityRule = IdentityRule::Generated;

    fn canonical_name(scope: &str, id: &str) -> String {
        names::format_occurrence(scope, id)
    }

    fn set_name(entity: &mut Occurrence, name: String) {
        entity.name = name;
    }

    fn check_document(entity: &Occurrence) -> Result<()> {
        reject_shadowed::<Self>(entity.shadowed_detail())
    }

    fn stamp_create(entity: &mut Occurrence, at: DateTime<Utc>) {
        entity.create_time = Some(at);
    }

    fn stamp_update(entity: &mut Occurrence, at: DateTime<Utc>) {
        entity.update_time = Some(at);
    }

    /// The referenced note, so its occurrences can be listed by column.
    fn derived_columns(entity: &Occurrence) -> Result<Vec<(&'static str, String)>> {
        let (note_project_id, note_id) = names::parse_note(&entity.note_name)?;
        Ok(vec![("note_project_id", note_project_id), ("note_id", note_id)])
    }
}

fn reject_shadowed<K: EntityKind>(key: Option<&str>) -> Result<()> {
    match key {
        Some(key) => Err(ProvenanceError::InvalidArgument(format!(
            "{} detail {:?} collides with a declared field",
            K::LABEL, key
        ))),
        None => Ok(()),
    }
}
