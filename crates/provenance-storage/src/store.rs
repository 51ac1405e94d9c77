//! Generic CRUD and listing over one entity table.
//!
//! [`EntityStore`] is instantiated once per [`EntityKind`]. Every write is a
//! single statement; a listing reads its page and its counts inside one
//! read transaction so the exhaustion check sees the same rows as the page.

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, OptionalExtension};
use tracing::{debug, info, warn};
use uuid::Uuid;

use provenance_core::error::{ProvenanceError, Result};
use provenance_core::types::FieldMask;

use crate::cancel::Cancellation;
use crate::db::{classify, Database};
use crate::entity::{EntityKind, IdentityRule};
use crate::filter::FilterCompiler;
use crate::pagination::{ListPage, Pagination};

/// Per-item outcome of a batch create, in input order.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    pub results: Vec<Result<T>>,
}

impl<T> BatchOutcome<T> {
    /// Successfully created entities, in input order.
    pub fn created(&self) -> impl Iterator<Item = &T> {
        self.results.iter().filter_map(|r| r.as_ref().ok())
    }

    /// Failed items as (input position, error).
    pub fn failures(&self) -> impl Iterator<Item = (usize, &ProvenanceError)> {
        self.results
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.as_ref().err().map(|e| (i, e)))
    }

    pub fn into_created(self) -> Vec<T> {
        self.results.into_iter().filter_map(|r| r.ok()).collect()
    }
}

/// CRUD and paginated listing for one entity kind.
pub struct EntityStore<K: EntityKind> {
    db: Arc<Database>,
    pagination: Arc<Pagination>,
    filters: Arc<dyn FilterCompiler>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: EntityKind> EntityStore<K> {
    pub fn new(
        db: Arc<Database>,
        pagination: Arc<Pagination>,
        filters: Arc<dyn FilterCompiler>,
    ) -> Self {
        Self {
            db,
            pagination,
            filters,
            _kind: PhantomData,
        }
    }

    /// Insert a new entity.
    ///
    /// `id` must be given for caller-named kinds and omitted for kinds whose
    /// ids the store generates. The input is cloned; the returned clone
    /// carries the canonical name and creation time.
    pub fn create(
        &self,
        cancel: &Cancellation,
        scope: &str,
        id: Option<&str>,
        entity: &K::Entity,
    ) -> Result<K::Entity> {
        check_scope::<K>(scope)?;
        let id = assign_id::<K>(id)?;
        let name = K::canonical_name(scope, &id);

        let mut created = entity.clone();
        K::set_name(&mut created, name.clone());
        K::stamp_create(&mut created, Utc::now());
        K::check_document(&created)?;
        let derived = K::derived_columns(&created)?;
        let data = serde_json::to_string(&created)?;

        let spec = K::TABLE;
        let mut columns: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if let Some(scope_column) = spec.scope_column {
            columns.push(scope_column);
            values.push(Value::Text(scope.to_string()));
        }
        columns.push(spec.id_column);
        values.push(Value::Text(id));
        for (column, value) in derived {
            columns.push(column);
            values.push(Value::Text(value));
        }
        columns.push("data");
        values.push(Value::Text(data));

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            spec.table,
            columns.join(", "),
            vec!["?"; columns.len()].join(", ")
        );

        self.db.with_conn_cancellable(cancel, |conn| {
            conn.execute(&sql, params_from_iter(values.iter()))
                .map_err(|e| match classify(e, &format!("insert {}", K::LABEL)) {
                    ProvenanceError::AlreadyExists(_) => ProvenanceError::AlreadyExists(
                        format!("{} {:?} already exists", K::LABEL, name),
                    ),
                    other => other,
                })
        })?;

        debug!(kind = K::LABEL, name = %name, "Created entity");
        Ok(created)
    }

    /// Create each item independently.
    ///
    /// A failing item never fails the batch; its error is recorded at its
    /// input position instead.
    pub fn batch_create<'a, I>(
        &self,
        cancel: &Cancellation,
        scope: &str,
        items: I,
    ) -> BatchOutcome<K::Entity>
    where
        I: IntoIterator<Item = (Option<&'a str>, &'a K::Entity)>,
    {
        let results: Vec<Result<K::Entity>> = items
            .into_iter()
            .map(|(id, entity)| self.create(cancel, scope, id, entity))
            .collect();

        let outcome = BatchOutcome { results };
        for (position, error) in outcome.failures() {
            warn!(kind = K::LABEL, position, error = %error, "Batch item not created");
        }
        info!(
            kind = K::LABEL,
            scope,
            created = outcome.created().count(),
            failed = outcome.failures().count(),
            "Batch create finished"
        );
        outcome
    }

    /// Fetch one entity by key.
    pub fn get(&self, cancel: &Cancellation, scope: &str, id: &str) -> Result<K::Entity> {
        check_key::<K>(scope, id)?;
        let name = K::canonical_name(scope, id);
        let (key_sql, key_params) = key_clause::<K>(scope, id);
        let sql = format!("SELECT data FROM {} WHERE {}", K::TABLE.table, key_sql);

        let data: Option<String> = self.db.with_conn_cancellable(cancel, |conn| {
            conn.query_row(&sql, params_from_iter(key_params.iter()), |row| row.get(0))
                .optional()
                .map_err(|e| classify(e, &format!("query {}", K::LABEL)))
        })?;

        let data = data.ok_or_else(|| not_found::<K>(&name))?;
        let mut entity = decode::<K>(&data)?;
        K::set_name(&mut entity, name);
        Ok(entity)
    }

    /// Replace the stored document of an existing entity.
    ///
    /// The field mask is accepted for interface compatibility only: the whole
    /// document is always replaced.
    pub fn update(
        &self,
        cancel: &Cancellation,
        scope: &str,
        id: &str,
        entity: &K::Entity,
        mask: Option<&FieldMask>,
    ) -> Result<K::Entity> {
        check_key::<K>(scope, id)?;
        let name = K::canonical_name(scope, id);
        if let Some(mask) = mask {
            debug!(kind = K::LABEL, name = %name, paths = ?mask.paths, "Field mask ignored; replacing whole document");
        }

        let mut updated = entity.clone();
        K::set_name(&mut updated, name.clone());
        K::stamp_update(&mut updated, Utc::now());
        K::check_document(&updated)?;
        let derived = K::derived_columns(&updated)?;
        let data = serde_json::to_string(&updated)?;

        let mut assignments = vec!["data = ?".to_string()];
        let mut values = vec![Value::Text(data)];
        for (column, value) in derived {
            assignments.push(format!("{} = ?", column));
            values.push(Value::Text(value));
        }
        let (key_sql, key_params) = key_clause::<K>(scope, id);
        values.extend(key_params);
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            K::TABLE.table,
            assignments.join(", "),
            key_sql
        );

        let affected = self.db.with_conn_cancellable(cancel, |conn| {
            conn.execute(&sql, params_from_iter(values.iter()))
                .map_err(|e| classify(e, &format!("update {}", K::LABEL)))
        })?;
        if affected == 0 {
            return Err(not_found::<K>(&name));
        }

        debug!(kind = K::LABEL, name = %name, "Updated entity");
        Ok(updated)
    }

    /// Remove one entity.
    pub fn delete(&self, cancel: &Cancellation, scope: &str, id: &str) -> Result<()> {
        check_key::<K>(scope, id)?;
        let name = K::canonical_name(scope, id);
        let (key_sql, key_params) = key_clause::<K>(scope, id);
        let sql = format!("DELETE FROM {} WHERE {}", K::TABLE.table, key_sql);

        let affected = self.db.with_conn_cancellable(cancel, |conn| {
            conn.execute(&sql, params_from_iter(key_params.iter()))
                .map_err(|e| classify(e, &format!("delete {}", K::LABEL)))
        })?;
        if affected == 0 {
            return Err(not_found::<K>(&name));
        }

        debug!(kind = K::LABEL, name = %name, "Deleted entity");
        Ok(())
    }

    /// List entities in `scope` matching `filter`, resuming after
    /// `page_token`.
    pub fn list(
        &self,
        cancel: &Cancellation,
        scope: &str,
        filter: &str,
        page_token: &str,
        page_size: u32,
    ) -> Result<ListPage<K::Entity>> {
        self.list_where(cancel, Some(scope), &[], filter, page_token, page_size)
    }

    /// [`EntityStore::list`] with extra equality constraints on key columns.
    /// A `scope` of `None` lists across every project.
    pub(crate) fn list_where(
        &self,
        cancel: &Cancellation,
        scope: Option<&str>,
        constraints: &[(&'static str, &str)],
        filter: &str,
        page_token: &str,
        page_size: u32,
    ) -> Result<ListPage<K::Entity>> {
        let after = self.pagination.watermark(page_token)?;
        let limit = self.pagination.page_size(page_size);
        let spec = K::TABLE;

        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<Value> = Vec::new();
        if let (Some(scope_column), Some(scope)) = (spec.scope_column, scope) {
            clauses.push(format!("{} = ?", scope_column));
            params.push(Value::Text(scope.to_string()));
        }
        for (column, value) in constraints {
            clauses.push(format!("{} = ?", column));
            params.push(Value::Text((*value).to_string()));
        }
        if !filter.trim().is_empty() {
            let predicate = self.filters.compile(filter)?;
            clauses.push(format!("({})", predicate.sql));
            params.extend(predicate.params);
        }
        let where_sql = if clauses.is_empty() {
            "1 = 1".to_string()
        } else {
            clauses.join(" AND ")
        };

        let page_sql = format!(
            "SELECT id, {}, {}, data FROM {} WHERE {} AND id > ? ORDER BY id ASC LIMIT ?",
            spec.scope_column.unwrap_or("''"),
            spec.id_column,
            spec.table,
            where_sql
        );
        let count_sql = format!(
            "SELECT COUNT(*), COALESCE(SUM(id > ?), 0) FROM {} WHERE {}",
            spec.table, where_sql
        );

        let mut page_params = params.clone();
        page_params.push(Value::Integer(after));
        page_params.push(Value::Integer(i64::from(limit)));

        let (rows, total, remaining) = self.db.with_conn_cancellable(cancel, |conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| classify(e, &format!("list {}", K::LABEL)))?;

            let rows = {
                let mut stmt = tx
                    .prepare(&page_sql)
                    .map_err(|e| classify(e, &format!("list {}", K::LABEL)))?;
                let mapped = stmt
                    .query_map(params_from_iter(page_params.iter()), |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    })
                    .map_err(|e| classify(e, &format!("list {}", K::LABEL)))?;
                let rows = mapped
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| classify(e, &format!("scan {} row", K::LABEL)))?;
                rows
            };

            let last = rows.last().map(|(marker, ..)| *marker).unwrap_or(after);
            let mut count_params = vec![Value::Integer(last)];
            count_params.extend(params.iter().cloned());
            let (total, remaining): (i64, i64) = tx
                .query_row(&count_sql, params_from_iter(count_params.iter()), |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })
                .map_err(|e| classify(e, &format!("count {}", K::LABEL)))?;

            tx.commit()
                .map_err(|e| classify(e, &format!("list {}", K::LABEL)))?;
            Ok((rows, total, remaining))
        })?;

        let last_marker = rows.last().map(|(marker, ..)| *marker);
        let mut items = Vec::with_capacity(rows.len());
        for (_, row_scope, row_id, data) in rows {
            let mut entity = decode::<K>(&data)?;
            K::set_name(&mut entity, K::canonical_name(&row_scope, &row_id));
            items.push(entity);
        }

        let next_page_token = self.pagination.next_token(last_marker, remaining as u64)?;
        debug!(
            kind = K::LABEL,
            scope = scope.unwrap_or("*"),
            after,
            returned = items.len(),
            total,
            exhausted = next_page_token.is_empty(),
            "Listed entities"
        );
        Ok(ListPage {
            items,
            next_page_token,
            total_size: total as u64,
        })
    }
}

fn check_scope<K: EntityKind>(scope: &str) -> Result<()> {
    if K::TABLE.scope_column.is_some() {
        check_segment("project id", scope)?;
    }
    Ok(())
}

/// Key of an existing entity; rejected under the same rules as on create so a
/// name never resolves to two different keys.
fn check_key<K: EntityKind>(scope: &str, id: &str) -> Result<()> {
    check_scope::<K>(scope)?;
    check_segment(&format!("{} id", K::LABEL), id)
}

fn assign_id<K: EntityKind>(id: Option<&str>) -> Result<String> {
    match (K::IDENTITY, id) {
        (IdentityRule::CallerSupplied, Some(id)) => {
            check_segment(&format!("{} id", K::LABEL), id)?;
            Ok(id.to_string())
        }
        (IdentityRule::CallerSupplied, None) => Err(ProvenanceError::InvalidArgument(format!(
            "{} id is required",
            K::LABEL
        ))),
        (IdentityRule::Generated, None) => Ok(Uuid::new_v4().to_string()),
        (IdentityRule::Generated, Some(_)) => Err(ProvenanceError::InvalidArgument(format!(
            "{} ids are assigned by the store",
            K::LABEL
        ))),
    }
}

/// Ids become name segments, so they must be non-empty and slash-free.
fn check_segment(what: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.contains('/') {
        return Err(ProvenanceError::InvalidArgument(format!(
            "invalid {} {:?}",
            what, value
        )));
    }
    Ok(())
}

fn key_clause<K: EntityKind>(scope: &str, id: &str) -> (String, Vec<Value>) {
    let spec = K::TABLE;
    match spec.scope_column {
        Some(scope_column) => (
            format!("{} = ? AND {} = ?", scope_column, spec.id_column),
            vec![Value::Text(scope.to_string()), Value::Text(id.to_string())],
        ),
        None => (
            format!("{} = ?", spec.id_column),
            vec![Value::Text(id.to_string())],
        ),
    }
}

fn decode<K: EntityKind>(data: &str) -> Result<K::Entity> {
    serde_json::from_str(data).map_err(|e| {
        ProvenanceError::Internal(format!("Failed to unmarshal {} from database: {}", K::LABEL, e))
    })
}

fn not_found<K: EntityKind>(name: &str) -> ProvenanceError {
    ProvenanceError::NotFound(format!("{} {:?} does not exist", K::LABEL, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::{CursorCodec, CursorKey};
    use crate::entity::{Notes, Occurrences, Projects};
    use crate::filter::JsonFilterCompiler;
    use provenance_core::config::PaginationConfig;
    use provenance_core::types::{Note, NoteKind, Occurrence, Project};

    fn store<K: EntityKind>(db: &Arc<Database>) -> EntityStore<K> {
        let pagination = Pagination::new(
            CursorCodec::new(&CursorKey::generate()),
            &PaginationConfig::default(),
        );
        EntityStore::new(Arc::clone(db), Arc::new(pagination), Arc::new(JsonFilterCompiler))
    }

    fn note(description: &str) -> Note {
        Note {
            short_description: description.to_string(),
            kind: NoteKind::Vulnerability,
            ..Default::default()
        }
    }

    fn markers(db: &Database, table: &str) -> Vec<i64> {
        db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!("SELECT id FROM {} ORDER BY id", table))
                .map_err(|e| classify(e, "prepare"))?;
            let rows = stmt
                .query_map([], |row| row.get(0))
                .map_err(|e| classify(e, "query"))?;
            rows.collect::<std::result::Result<Vec<i64>, _>>()
                .map_err(|e| classify(e, "scan"))
        })
        .unwrap()
    }

    #[test]
    fn test_create_assigns_identity_and_leaves_input_alone() {
        let db = Arc::new(Database::in_memory().unwrap());
        let notes = store::<Notes>(&db);
        let cx = Cancellation::new();

        let mut input = note("heap overflow");
        input.name = "projects/evil/notes/spoofed".to_string();
        let before = input.clone();

        let created = notes.create(&cx, "acme", Some("cve-1"), &input).unwrap();
        assert_eq!(input, before);
        assert_eq!(created.name, "projects/acme/notes/cve-1");
        assert!(created.create_time.is_some());
        assert_eq!(created.short_description, "heap overflow");
    }

    #[test]
    fn test_create_duplicate_is_already_exists() {
        let db = Arc::new(Database::in_memory().unwrap());
        let notes = store::<Notes>(&db);
        let cx = Cancellation::new();

        notes.create(&cx, "acme", Some("n"), &note("a")).unwrap();
        let err = notes.create(&cx, "acme", Some("n"), &note("b")).unwrap_err();
        assert!(matches!(err, ProvenanceError::AlreadyExists(_)), "{err}");

        // Same id in another project is a different note.
        notes.create(&cx, "other", Some("n"), &note("c")).unwrap();
    }

    #[test]
    fn test_identity_rules() {
        let db = Arc::new(Database::in_memory().unwrap());
        let notes = store::<Notes>(&db);
        let occurrences = store::<Occurrences>(&db);
        let cx = Cancellation::new();

        assert!(matches!(
            notes.create(&cx, "acme", None, &note("a")),
            Err(ProvenanceError::InvalidArgument(_))
        ));
        assert!(matches!(
            notes.create(&cx, "acme", Some("a/b"), &note("a")),
            Err(ProvenanceError::InvalidArgument(_))
        ));
        assert!(matches!(
            notes.create(&cx, "", Some("a"), &note("a")),
            Err(ProvenanceError::InvalidArgument(_))
        ));

        let occ = Occurrence {
            note_name: "projects/acme/notes/a".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            occurrences.create(&cx, "acme", Some("chosen"), &occ),
            Err(ProvenanceError::InvalidArgument(_))
        ));
        let a = occurrences.create(&cx, "acme", None, &occ).unwrap();
        let b = occurrences.create(&cx, "acme", None, &occ).unwrap();
        assert_ne!(a.name, b.name);
        assert!(a.name.starts_with("projects/acme/occurrences/"));
    }

    #[test]
    fn test_get_overrides_stored_name() {
        let db = Arc::new(Database::in_memory().unwrap());
        let notes = store::<Notes>(&db);
        let cx = Cancellation::new();
        notes.create(&cx, "acme", Some("n"), &note("a")).unwrap();

        db.with_conn(|conn| {
            conn.execute(
                "UPDATE notes SET data = json_set(data, '$.name', 'projects/x/notes/y')",
                [],
            )
            .map_err(|e| classify(e, "tamper"))
        })
        .unwrap();

        let got = notes.get(&cx, "acme", "n").unwrap();
        assert_eq!(got.name, "projects/acme/notes/n");
    }

    #[test]
    fn test_corrupt_payload_is_internal() {
        let db = Arc::new(Database::in_memory().unwrap());
        let notes = store::<Notes>(&db);
        let cx = Cancellation::new();
        notes.create(&cx, "acme", Some("n"), &note("a")).unwrap();
        db.with_conn(|conn| {
            conn.execute("UPDATE notes SET data = 'not json'", [])
                .map_err(|e| classify(e, "corrupt"))
        })
        .unwrap();

        assert!(matches!(
            notes.get(&cx, "acme", "n"),
            Err(ProvenanceError::Internal(_))
        ));
    }

    #[test]
    fn test_update_replaces_document_and_stamps_time() {
        let db = Arc::new(Database::in_memory().unwrap());
        let notes = store::<Notes>(&db);
        let cx = Cancellation::new();
        notes.create(&cx, "acme", Some("n"), &note("before")).unwrap();

        let replacement = Note {
            long_description: "only this".to_string(),
            ..Default::default()
        };
        let mask = FieldMask::new(["long_description"]);
        let updated = notes
            .update(&cx, "acme", "n", &replacement, Some(&mask))
            .unwrap();
        assert!(updated.update_time.is_some());
        assert_eq!(updated.name, "projects/acme/notes/n");

        let got = notes.get(&cx, "acme", "n").unwrap();
        assert_eq!(got.long_description, "only this");
        // Full replace: fields absent from the new document are gone.
        assert_eq!(got.short_description, "");
        assert_eq!(got.kind, NoteKind::NoteKindUnspecified);
    }

    #[test]
    fn test_update_missing_is_not_found_and_creates_nothing() {
        let db = Arc::new(Database::in_memory().unwrap());
        let notes = store::<Notes>(&db);
        let cx = Cancellation::new();

        let err = notes.update(&cx, "acme", "ghost", &note("x"), None).unwrap_err();
        assert!(matches!(err, ProvenanceError::NotFound(_)));
        assert!(markers(&db, "notes").is_empty());
    }

    #[test]
    fn test_update_occurrence_moves_note_reference() {
        let db = Arc::new(Database::in_memory().unwrap());
        let occurrences = store::<Occurrences>(&db);
        let cx = Cancellation::new();

        let occ = Occurrence {
            note_name: "projects/acme/notes/a".to_string(),
            ..Default::default()
        };
        let created = occurrences.create(&cx, "acme", None, &occ).unwrap();
        let (_, id) = provenance_core::names::parse_occurrence(&created.name).unwrap();

        let moved = Occurrence {
            note_name: "projects/acme/notes/b".to_string(),
            ..Default::default()
        };
        occurrences.update(&cx, "acme", &id, &moved, None).unwrap();

        let page = occurrences
            .list_where(&cx, Some("acme"), &[("note_project_id", "acme"), ("note_id", "b")], "", "", 0)
            .unwrap();
        assert_eq!(page.items.len(), 1);
    }

    #[test]
    fn test_delete() {
        let db = Arc::new(Database::in_memory().unwrap());
        let projects = store::<Projects>(&db);
        let cx = Cancellation::new();

        assert!(matches!(
            projects.delete(&cx, "", "ghost"),
            Err(ProvenanceError::NotFound(_))
        ));

        let created = projects.create(&cx, "", Some("acme"), &Project::default()).unwrap();
        assert_eq!(created.name, "projects/acme");
        projects.delete(&cx, "", "acme").unwrap();
        assert!(matches!(
            projects.get(&cx, "", "acme"),
            Err(ProvenanceError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_pages_through_five_rows() {
        let db = Arc::new(Database::in_memory().unwrap());
        let notes = store::<Notes>(&db);
        let cx = Cancellation::new();
        for i in 1..=5 {
            notes
                .create(&cx, "acme", Some(format!("n{}", i).as_str()), &note(&i.to_string()))
                .unwrap();
        }
        assert_eq!(markers(&db, "notes"), vec![1, 2, 3, 4, 5]);

        let page1 = notes.list(&cx, "acme", "", "", 2).unwrap();
        let page2 = notes.list(&cx, "acme", "", &page1.next_page_token, 2).unwrap();
        let page3 = notes.list(&cx, "acme", "", &page2.next_page_token, 2).unwrap();

        let descriptions = |page: &ListPage<Note>| -> Vec<String> {
            page.items.iter().map(|n| n.short_description.clone()).collect()
        };
        assert_eq!(descriptions(&page1), vec!["1", "2"]);
        assert!(!page1.next_page_token.is_empty());
        assert_eq!(descriptions(&page2), vec!["3", "4"]);
        assert!(!page2.next_page_token.is_empty());
        assert_eq!(descriptions(&page3), vec!["5"]);
        assert!(page3.is_last());
        assert_eq!(page3.total_size, 5);
    }

    #[test]
    fn test_list_exhaustion_is_per_scope() {
        let db = Arc::new(Database::in_memory().unwrap());
        let notes = store::<Notes>(&db);
        let cx = Cancellation::new();
        // Interleave two projects so markers are not dense per scope.
        for i in 1..=3 {
            notes.create(&cx, "a", Some(format!("n{}", i).as_str()), &note("a")).unwrap();
            notes.create(&cx, "b", Some(format!("n{}", i).as_str()), &note("b")).unwrap();
        }

        let page = notes.list(&cx, "a", "", "", 3).unwrap();
        assert_eq!(page.items.len(), 3);
        assert!(page.is_last());

        let first = notes.list(&cx, "b", "", "", 2).unwrap();
        assert!(!first.is_last());
        let second = notes.list(&cx, "b", "", &first.next_page_token, 2).unwrap();
        assert_eq!(second.items.len(), 1);
        assert!(second.is_last());
        assert!(second.items.iter().all(|n| n.name.starts_with("projects/b/")));
    }

    #[test]
    fn test_list_empty_and_exact_fit() {
        let db = Arc::new(Database::in_memory().unwrap());
        let notes = store::<Notes>(&db);
        let cx = Cancellation::new();

        let empty = notes.list(&cx, "acme", "", "", 10).unwrap();
        assert!(empty.items.is_empty());
        assert!(empty.is_last());
        assert_eq!(empty.total_size, 0);

        notes.create(&cx, "acme", Some("a"), &note("a")).unwrap();
        notes.create(&cx, "acme", Some("b"), &note("b")).unwrap();
        let page = notes.list(&cx, "acme", "", "", 2).unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(page.is_last(), "no row lies past the page");
    }

    #[test]
    fn test_list_with_filter() {
        let db = Arc::new(Database::in_memory().unwrap());
        let notes = store::<Notes>(&db);
        let cx = Cancellation::new();
        notes.create(&cx, "acme", Some("v1"), &note("v1")).unwrap();
        notes
            .create(
                &cx,
                "acme",
                Some("b1"),
                &Note {
                    kind: NoteKind::Build,
                    ..Default::default()
                },
            )
            .unwrap();
        notes.create(&cx, "acme", Some("v2"), &note("v2")).unwrap();

        let page = notes
            .list(&cx, "acme", r#"kind = "VULNERABILITY""#, "", 1)
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.total_size, 2);
        let next = notes
            .list(&cx, "acme", r#"kind = "VULNERABILITY""#, &page.next_page_token, 1)
            .unwrap();
        assert_eq!(next.items[0].name, "projects/acme/notes/v2");
        assert!(next.is_last());

        assert!(matches!(
            notes.list(&cx, "acme", "kind ==", "", 1),
            Err(ProvenanceError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_list_unreadable_token_restarts() {
        let db = Arc::new(Database::in_memory().unwrap());
        let notes = store::<Notes>(&db);
        let cx = Cancellation::new();
        notes.create(&cx, "acme", Some("a"), &note("a")).unwrap();

        let page = notes.list(&cx, "acme", "", "bogus-token", 10).unwrap();
        assert_eq!(page.items.len(), 1);
    }

    #[test]
    fn test_batch_create_keeps_going_past_duplicates() {
        let db = Arc::new(Database::in_memory().unwrap());
        let notes = store::<Notes>(&db);
        let cx = Cancellation::new();
        notes.create(&cx, "acme", Some("n3"), &note("existing")).unwrap();

        let inputs: Vec<(String, Note)> = (1..=5)
            .map(|i| (format!("n{}", i), note(&format!("new {}", i))))
            .collect();
        let outcome = notes.batch_create(
            &cx,
            "acme",
            inputs.iter().map(|(id, n)| (Some(id.as_str()), n)),
        );

        assert_eq!(outcome.results.len(), 5);
        assert_eq!(outcome.created().count(), 4);
        let failures: Vec<_> = outcome.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, 2);
        assert!(matches!(failures[0].1, ProvenanceError::AlreadyExists(_)));

        let created = outcome.into_created();
        assert_eq!(created.len(), 4);
        assert!(created.iter().all(|n| n.short_description.starts_with("new")));
    }

    #[test]
    fn test_cancelled_operation() {
        let db = Arc::new(Database::in_memory().unwrap());
        let notes = store::<Notes>(&db);
        let cx = Cancellation::new();
        cx.cancel();

        assert!(matches!(
            notes.create(&cx, "acme", Some("n"), &note("a")),
            Err(ProvenanceError::Cancelled)
        ));
        assert!(markers(&db, "notes").is_empty());
    }

    #[test]
    fn test_detail_shadowing_declared_field_is_rejected() {
        let db = Arc::new(Database::in_memory().unwrap());
        let notes = store::<Notes>(&db);
        let occurrences = store::<Occurrences>(&db);
        let cx = Cancellation::new();

        let mut shadowing = note("a");
        shadowing
            .details
            .insert("kind".to_string(), serde_json::json!("BUILD"));
        let err = notes.create(&cx, "acme", Some("n"), &shadowing).unwrap_err();
        assert!(matches!(err, ProvenanceError::InvalidArgument(_)), "{err}");
        assert!(markers(&db, "notes").is_empty());

        notes.create(&cx, "acme", Some("n"), &note("a")).unwrap();
        assert!(matches!(
            notes.update(&cx, "acme", "n", &shadowing, None),
            Err(ProvenanceError::InvalidArgument(_))
        ));
        assert_eq!(notes.get(&cx, "acme", "n").unwrap().kind, NoteKind::Vulnerability);
        assert_eq!(notes.list(&cx, "acme", "", "", 0).unwrap().items.len(), 1);

        let mut occ = Occurrence {
            note_name: "projects/acme/notes/n".to_string(),
            ..Default::default()
        };
        occ.details
            .insert("name".to_string(), serde_json::json!("projects/x/occurrences/y"));
        assert!(matches!(
            occurrences.create(&cx, "acme", None, &occ),
            Err(ProvenanceError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_key_addressed_operations_reject_ambiguous_keys() {
        let db = Arc::new(Database::in_memory().unwrap());
        let notes = store::<Notes>(&db);
        let cx = Cancellation::new();
        notes.create(&cx, "a", Some("x"), &note("a")).unwrap();

        // "a/notes" + "x" would format to the same name as a real note.
        for (scope, id) in [("a/notes", "x"), ("", "x"), ("a", ""), ("a", "x/y")] {
            assert!(matches!(
                notes.get(&cx, scope, id),
                Err(ProvenanceError::InvalidArgument(_))
            ));
            assert!(matches!(
                notes.update(&cx, scope, id, &note("b"), None),
                Err(ProvenanceError::InvalidArgument(_))
            ));
            assert!(matches!(
                notes.delete(&cx, scope, id),
                Err(ProvenanceError::InvalidArgument(_))
            ));
        }
        assert_eq!(notes.get(&cx, "a", "x").unwrap().short_description, "a");
    }
}
