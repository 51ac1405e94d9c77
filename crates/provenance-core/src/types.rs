use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// Enums
// =============================================================================

/// The kind of metadata a note describes and its occurrences carry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NoteKind {
    #[default]
    NoteKindUnspecified,
    /// A known software vulnerability.
    Vulnerability,
    /// Provenance of a build.
    Build,
    /// An image base layer relationship.
    Image,
    /// A package available for installation.
    Package,
    /// A deployment of a resource.
    Deployment,
    /// A discovered characteristic of a resource.
    Discovery,
    /// An attestation by an authority.
    Attestation,
}

// =============================================================================
// Entities
// =============================================================================

/// A scoping container for notes and occurrences.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Output only: `projects/{project_id}`.
    #[serde(default)]
    pub name: String,
}

/// A descriptive template that occurrences instantiate.
///
/// Fields without a dedicated member (kind-specific content such as a
/// vulnerability's severity) are kept in `details` and stored with the rest
/// of the document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// Output only: `projects/{project_id}/notes/{note_id}`.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub short_description: String,
    #[serde(default)]
    pub long_description: String,
    #[serde(default)]
    pub kind: NoteKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_url: Vec<RelatedUrl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_note_names: Vec<String>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// A link attached to a note.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedUrl {
    pub url: String,
    #[serde(default)]
    pub label: String,
}

/// An instance of a note applied to a concrete resource.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    /// Output only: `projects/{project_id}/occurrences/{occurrence_id}`.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub resource: Resource,
    /// `projects/{project_id}/notes/{note_id}` of the note this instantiates.
    #[serde(default)]
    pub note_name: String,
    #[serde(default)]
    pub kind: NoteKind,
    #[serde(default)]
    pub remediation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl Note {
    /// Serialized names of the declared fields.
    pub const FIELDS: &'static [&'static str] = &[
        "name",
        "short_description",
        "long_description",
        "kind",
        "related_url",
        "expiration_time",
        "create_time",
        "update_time",
        "related_note_names",
    ];

    /// First key in `details` that shadows a declared field.
    pub fn shadowed_detail(&self) -> Option<&str> {
        shadowed_key(&self.details, Self::FIELDS)
    }
}

impl Occurrence {
    /// Serialized names of the declared fields.
    pub const FIELDS: &'static [&'static str] = &[
        "name",
        "resource",
        "note_name",
        "kind",
        "remediation",
        "create_time",
        "update_time",
    ];

    /// First key in `details` that shadows a declared field.
    pub fn shadowed_detail(&self) -> Option<&str> {
        shadowed_key(&self.details, Self::FIELDS)
    }
}

// A shadowing key serializes twice and the document no longer deserializes.
fn shadowed_key<'a>(details: &'a Map<String, Value>, fields: &[&str]) -> Option<&'a str> {
    details
        .keys()
        .map(String::as_str)
        .find(|key| fields.contains(key))
}

/// The resource an occurrence applies to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(default)]
    pub uri: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

/// Paths of the fields a caller intends to change on update.
///
/// Accepted by the update operations but not enforced: updates always
/// replace the whole stored document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMask {
    pub paths: Vec<String>,
}

impl FieldMask {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }
}
