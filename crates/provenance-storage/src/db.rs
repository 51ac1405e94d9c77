//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex for thread-safe access.
//! Configures WAL mode and recommended PRAGMAs on initialization, and
//! translates raw SQLite failures into the store's error taxonomy.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, ErrorCode};
use tracing::info;

use provenance_core::error::ProvenanceError;

use crate::cancel::Cancellation;
use crate::migrations;

/// Number of SQLite virtual machine instructions between cancellation checks.
const PROGRESS_CHECK_OPS: i32 = 1_000;

/// Thread-safe SQLite database wrapper.
///
/// Uses WAL mode so readers in other processes are not blocked by writers.
/// The connection is wrapped in a Mutex since rusqlite Connection is not Sync.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path.
    ///
    /// Configures WAL mode, synchronous=NORMAL, the busy timeout, and runs
    /// all pending migrations.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, ProvenanceError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| ProvenanceError::Internal(format!("Failed to open database: {}", e)))?;
        conn.busy_timeout(busy_timeout)
            .map_err(|e| ProvenanceError::Internal(format!("Failed to set busy timeout: {}", e)))?;

        configure(&conn)?;
        info!("Database opened at {}", path.display());

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, ProvenanceError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            ProvenanceError::Internal(format!("Failed to open in-memory db: {}", e))
        })?;
        configure(&conn)?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Execute a closure with a reference to the underlying connection.
    ///
    /// The mutex is held for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, ProvenanceError>
    where
        F: FnOnce(&Connection) -> Result<T, ProvenanceError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ProvenanceError::Internal(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Like [`Database::with_conn`], but statements run by the closure are
    /// aborted once `cancel` is set.
    ///
    /// A flag that is already set short-circuits before the lock is taken.
    pub fn with_conn_cancellable<F, T>(
        &self,
        cancel: &Cancellation,
        f: F,
    ) -> Result<T, ProvenanceError>
    where
        F: FnOnce(&Connection) -> Result<T, ProvenanceError>,
    {
        if cancel.is_cancelled() {
            return Err(ProvenanceError::Cancelled);
        }
        self.with_conn(|conn| {
            if cancel.is_cancelled() {
                return Err(ProvenanceError::Cancelled);
            }
            let _handler = ProgressHandler::install(conn, cancel);
            f(conn)
        })
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

/// Installed cancellation check, removed on drop even if the closure
/// running under it panics.
struct ProgressHandler<'a> {
    conn: &'a Connection,
}

impl<'a> ProgressHandler<'a> {
    fn install(conn: &'a Connection, cancel: &Cancellation) -> Self {
        let flag = cancel.clone();
        conn.progress_handler(PROGRESS_CHECK_OPS, Some(move || flag.is_cancelled()));
        Self { conn }
    }
}

impl Drop for ProgressHandler<'_> {
    fn drop(&mut self) {
        self.conn.progress_handler(0, None::<fn() -> bool>);
    }
}

fn configure(conn: &Connection) -> Result<(), ProvenanceError> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;",
    )
    .map_err(|e| ProvenanceError::Internal(format!("Failed to set pragmas: {}", e)))
}

/// Translate a backend error into the store taxonomy.
///
/// `what` names the failed action for the message, e.g. "insert Note".
pub(crate) fn classify(err: rusqlite::Error, what: &str) -> ProvenanceError {
    if let rusqlite::Error::SqliteFailure(ref failure, _) = err {
        match failure.code {
            ErrorCode::ConstraintViolation
                if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                return ProvenanceError::AlreadyExists(format!("Failed to {}: {}", what, err));
            }
            ErrorCode::OperationInterrupted => return ProvenanceError::Cancelled,
            _ => {}
        }
    }
    ProvenanceError::Internal(format!("Failed to {}: {}", what, err))
}
