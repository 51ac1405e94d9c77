//! Provenance core crate - errors, configuration, entity types and names
//! shared by the storage layer and the binary.

pub mod config;
pub mod error;
pub mod names;
pub mod types;

pub use config::ProvenanceConfig;
pub use error::{ErrorCode, ProvenanceError, Result};
pub use types::*;
