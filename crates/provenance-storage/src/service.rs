//! Async entry point for callers running on a tokio runtime.
//!
//! Each operation runs on the blocking pool. If the caller drops the future
//! before it resolves (a timeout, a disconnected client), the operation's
//! [`Cancellation`] is set and any statement in flight is interrupted.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use provenance_core::config::ProvenanceConfig;
use provenance_core::error::{ProvenanceError, Result};
use provenance_core::types::{FieldMask, Note, Occurrence, Project};

use crate::cancel::Cancellation;
use crate::catalog::Catalog;
use crate::db::Database;
use crate::filter::{FilterCompiler, JsonFilterCompiler};
use crate::pagination::{ListPage, Pagination};
use crate::store::BatchOutcome;

/// Async facade over the [`Catalog`].
#[derive(Clone)]
pub struct MetadataStore {
    catalog: Arc<Catalog>,
}

impl MetadataStore {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog: Arc::new(catalog),
        }
    }

    /// Open the configured database and build the stores with the default
    /// filter compiler.
    ///
    /// Fails on a malformed pagination key rather than serving tokens no
    /// other instance can read.
    pub fn open(config: &ProvenanceConfig) -> Result<Self> {
        config.validate()?;
        let pagination = Arc::new(Pagination::from_config(&config.pagination)?);
        let db = Arc::new(Database::open(
            &config.storage.database_path,
            Duration::from_millis(config.storage.busy_timeout_ms),
        )?);
        let filters: Arc<dyn FilterCompiler> = Arc::new(JsonFilterCompiler);
        info!(
            database = %config.storage.database_path.display(),
            strict_page_tokens = config.pagination.strict_page_tokens,
            "Metadata store ready"
        );
        Ok(Self::new(Catalog::new(db, pagination, filters)))
    }

    /// Synchronous access, for callers not on a runtime.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Catalog, &Cancellation) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let cancel = Cancellation::new();
        let guard = cancel.drop_guard();
        let catalog = Arc::clone(&self.catalog);
        let result = tokio::task::spawn_blocking(move || f(&catalog, &cancel))
            .await
            .map_err(|e| ProvenanceError::Internal(format!("storage task failed: {}", e)))?;
        guard.disarm();
        result
    }

    // -------------------------------------------------------------------------
    // Projects
    // -------------------------------------------------------------------------

    pub async fn create_project(&self, project_id: &str, project: &Project) -> Result<Project> {
        let (project_id, project) = (project_id.to_string(), project.clone());
        self.run(move |c, cx| c.projects.create(cx, "", Some(project_id.as_str()), &project))
            .await
    }

    pub async fn get_project(&self, project_id: &str) -> Result<Project> {
        let project_id = project_id.to_string();
        self.run(move |c, cx| c.projects.get(cx, "", &project_id)).await
    }

    pub async fn delete_project(&self, project_id: &str) -> Result<()> {
        let project_id = project_id.to_string();
        self.run(move |c, cx| c.projects.delete(cx, "", &project_id))
            .await
    }

    pub async fn list_projects(
        &self,
        filter: &str,
        page_token: &str,
        page_size: u32,
    ) -> Result<ListPage<Project>> {
        let (filter, page_token) = (filter.to_string(), page_token.to_string());
        self.run(move |c, cx| c.projects.list(cx, "", &filter, &page_token, page_size))
            .await
    }

    // -------------------------------------------------------------------------
    // Notes
    // -------------------------------------------------------------------------

    pub async fn create_note(&self, project_id: &str, note_id: &str, note: &Note) -> Result<Note> {
        let (project_id, note_id, note) =
            (project_id.to_string(), note_id.to_string(), note.clone());
        self.run(move |c, cx| c.notes.create(cx, &project_id, Some(note_id.as_str()), &note))
            .await
    }

    /// Create notes keyed by note id; see [`BatchOutcome`] for partial
    /// success.
    pub async fn batch_create_notes(
        &self,
        project_id: &str,
        notes: Vec<(String, Note)>,
    ) -> Result<BatchOutcome<Note>> {
        let project_id = project_id.to_string();
        self.run(move |c, cx| {
            Ok(c.notes.batch_create(
                cx,
                &project_id,
                notes.iter().map(|(id, note)| (Some(id.as_str()), note)),
            ))
        })
        .await
    }

    pub async fn get_note(&self, project_id: &str, note_id: &str) -> Result<Note> {
        let (project_id, note_id) = (project_id.to_string(), note_id.to_string());
        self.run(move |c, cx| c.notes.get(cx, &project_id, &note_id))
            .await
    }

    pub async fn update_note(
        &self,
        project_id: &str,
        note_id: &str,
        note: &Note,
        mask: Option<&FieldMask>,
    ) -> Result<Note> {
        let (project_id, note_id, note) =
            (project_id.to_string(), note_id.to_string(), note.clone());
        let mask = mask.cloned();
        self.run(move |c, cx| c.notes.update(cx, &project_id, &note_id, &note, mask.as_ref()))
            .await
    }

    pub async fn delete_note(&self, project_id: &str, note_id: &str) -> Result<()> {
        let (project_id, note_id) = (project_id.to_string(), note_id.to_string());
        self.run(move |c, cx| c.notes.delete(cx, &project_id, &note_id))
            .await
    }

    pub async fn list_notes(
        &self,
        project_id: &str,
        filter: &str,
        page_token: &str,
        page_size: u32,
    ) -> Result<ListPage<Note>> {
        let (project_id, filter, page_token) =
            (project_id.to_string(), filter.to_string(), page_token.to_string());
        self.run(move |c, cx| c.notes.list(cx, &project_id, &filter, &page_token, page_size))
            .await
    }

    // -------------------------------------------------------------------------
    // Occurrences
    // -------------------------------------------------------------------------

    pub async fn create_occurrence(
        &self,
        project_id: &str,
        occurrence: &Occurrence,
    ) -> Result<Occurrence> {
        let (project_id, occurrence) = (project_id.to_string(), occurrence.clone());
        self.run(move |c, cx| c.occurrences.create(cx, &project_id, None, &occurrence))
            .await
    }

    pub async fn batch_create_occurrences(
        &self,
        project_id: &str,
        occurrences: Vec<Occurrence>,
    ) -> Result<BatchOutcome<Occurrence>> {
        let project_id = project_id.to_string();
        self.run(move |c, cx| {
            Ok(c.occurrences.batch_create(
                cx,
                &project_id,
                occurrences.iter().map(|occurrence| (None, occurrence)),
            ))
        })
        .await
    }

    pub async fn get_occurrence(&self, project_id: &str, occurrence_id: &str) -> Result<Occurrence> {
        let (project_id, occurrence_id) = (project_id.to_string(), occurrence_id.to_string());
        self.run(move |c, cx| c.occurrences.get(cx, &project_id, &occurrence_id))
            .await
    }

    pub async fn update_occurrence(
        &self,
        project_id: &str,
        occurrence_id: &str,
        occurrence: &Occurrence,
        mask: Option<&FieldMask>,
    ) -> Result<Occurrence> {
        let (project_id, occurrence_id, occurrence) = (
            project_id.to_string(),
            occurrence_id.to_string(),
            occurrence.clone(),
        );
        let mask = mask.cloned();
        self.run(move |c, cx| {
            c.occurrences
                .update(cx, &project_id, &occurrence_id, &occurrence, mask.as_ref())
        })
        .await
    }

    pub async fn delete_occurrence(&self, project_id: &str, occurrence_id: &str) -> Result<()> {
        let (project_id, occurrence_id) = (project_id.to_string(), occurrence_id.to_string());
        self.run(move |c, cx| c.occurrences.delete(cx, &project_id, &occurrence_id))
            .await
    }

    pub async fn list_occurrences(
        &self,
        project_id: &str,
        filter: &str,
        page_token: &str,
        page_size: u32,
    ) -> Result<ListPage<Occurrence>> {
        let (project_id, filter, page_token) =
            (project_id.to_string(), filter.to_string(), page_token.to_string());
        self.run(move |c, cx| {
            c.occurrences
                .list(cx, &project_id, &filter, &page_token, page_size)
        })
        .await
    }

    // -------------------------------------------------------------------------
    // Derived lookups
    // -------------------------------------------------------------------------

    pub async fn get_occurrence_note(&self, project_id: &str, occurrence_id: &str) -> Result<Note> {
        let (project_id, occurrence_id) = (project_id.to_string(), occurrence_id.to_string());
        self.run(move |c, cx| c.get_occurrence_note(cx, &project_id, &occurrence_id))
            .await
    }

    pub async fn list_note_occurrences(
        &self,
        project_id: &str,
        note_id: &str,
        filter: &str,
        page_token: &str,
        page_size: u32,
    ) -> Result<ListPage<Occurrence>> {
        let (project_id, note_id, filter, page_token) = (
            project_id.to_string(),
            note_id.to_string(),
            filter.to_string(),
            page_token.to_string(),
        );
        self.run(move |c, cx| {
            c.list_note_occurrences(cx, &project_id, &note_id, &filter, &page_token, page_size)
        })
        .await
    }
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore").finish()
    }
}
