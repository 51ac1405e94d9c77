//! The three entity stores over one database, plus lookups that cross them.

use std::sync::Arc;

use provenance_core::error::Result;
use provenance_core::names;
use provenance_core::types::{Note, Occurrence};

use crate::cancel::Cancellation;
use crate::db::Database;
use crate::entity::{Notes, Occurrences, Projects};
use crate::filter::FilterCompiler;
use crate::pagination::{ListPage, Pagination};
use crate::store::EntityStore;

/// Project, note and occurrence stores sharing a database, pagination
/// policy and filter compiler.
pub struct Catalog {
    pub projects: EntityStore<Projects>,
    pub notes: EntityStore<Notes>,
    pub occurrences: EntityStore<Occurrences>,
}

impl Catalog {
    pub fn new(
        db: Arc<Database>,
        pagination: Arc<Pagination>,
        filters: Arc<dyn FilterCompiler>,
    ) -> Self {
        Self {
            projects: EntityStore::new(Arc::clone(&db), Arc::clone(&pagination), Arc::clone(&filters)),
            notes: EntityStore::new(Arc::clone(&db), Arc::clone(&pagination), Arc::clone(&filters)),
            occurrences: EntityStore::new(db, pagination, filters),
        }
    }

    /// The note an occurrence instantiates.
    ///
    /// Not isolated from concurrent deletes: the note may disappear between
    /// reading the occurrence and reading the note, surfacing as NotFound.
    pub fn get_occurrence_note(
        &self,
        cancel: &Cancellation,
        project_id: &str,
        occurrence_id: &str,
    ) -> Result<Note> {
        let occurrence: Occurrence = self.occurrences.get(cancel, project_id, occurrence_id)?;
        let (note_project_id, note_id) = names::parse_note(&occurrence.note_name)?;
        let mut note = self.notes.get(cancel, &note_project_id, &note_id)?;
        note.name = names::format_note(&note_project_id, &note_id);
        Ok(note)
    }

    /// Occurrences of one note, paged like any other listing.
    ///
    /// The note must exist. Occurrences are found across every project, since
    /// a note is commonly published in one project and instantiated in others.
    pub fn list_note_occurrences(
        &self,
        cancel: &Cancellation,
        project_id: &str,
        note_id: &str,
        filter: &str,
        page_token: &str,
        page_size: u32,
    ) -> Result<ListPage<Occurrence>> {
        self.notes.get(cancel, project_id, note_id)?;
        self.occurrences.list_where(
            cancel,
            None,
            &[("note_project_id", project_id), ("note_id", note_id)],
            filter,
            page_token,
            page_size,
        )
    }
}
