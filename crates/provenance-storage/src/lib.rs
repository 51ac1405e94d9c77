//! Provenance Storage crate - SQLite persistence for projects, notes and occurrences.
//!
//! Provides a WAL-mode SQLite database with migrations, one generic entity
//! store per kind, opaque encrypted page tokens, a JSON field filter
//! language, and an async facade whose calls stop when their caller goes
//! away.

pub mod cancel;
pub mod catalog;
pub mod cursor;
pub mod db;
pub mod entity;
pub mod filter;
pub mod migrations;
pub mod pagination;
pub mod service;
pub mod store;

pub use cancel::{CancelOnDrop, Cancellation};
pub use catalog::Catalog;
pub use cursor::{CursorCodec, CursorKey};
pub use db::Database;
pub use entity::{EntityKind, IdentityRule, Notes, Occurrences, Projects, TableSpec};
pub use filter::{FilterCompiler, FilterError, JsonFilterCompiler, Predicate};
pub use pagination::{ListPage, Pagination, START_MARKER};
pub use service::MetadataStore;
pub use store::{BatchOutcome, EntityStore};
