use thiserror::Error;

/// Top-level error type for the provenance store.
///
/// Every backend-specific failure is translated into one of these variants
/// before it leaves the storage crate, so callers only ever match on this
/// taxonomy.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProvenanceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Page token encoding failed: {0}")]
    Encoding(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable classification of a [`ProvenanceError`], for callers that map
/// failures onto their own status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotFound,
    AlreadyExists,
    InvalidArgument,
    Internal,
    Cancelled,
}

impl ProvenanceError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ProvenanceError::NotFound(_) => ErrorCode::NotFound,
            ProvenanceError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            ProvenanceError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            ProvenanceError::Cancelled => ErrorCode::Cancelled,
            ProvenanceError::Internal(_)
            | ProvenanceError::Encoding(_)
            | ProvenanceError::Config(_)
            | ProvenanceError::Io(_) => ErrorCode::Internal,
        }
    }
}

impl From<toml::de::Error> for ProvenanceError {
    fn from(err: toml::de::Error) -> Self {
        ProvenanceError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for ProvenanceError {
    fn from(err: toml::ser::Error) -> Self {
        ProvenanceError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for ProvenanceError {
    fn from(err: serde_json::Error) -> Self {
        ProvenanceError::Internal(format!("payload serialization failed: {}", err))
    }
}

/// A specialized `Result` type for provenance operations.
pub type Result<T> = std::result::Result<T, ProvenanceError>;
