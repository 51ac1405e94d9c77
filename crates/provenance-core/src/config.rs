use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ProvenanceError, Result};

/// Top-level configuration for the provenance store.
///
/// Loaded from a TOML file. Every section is optional and falls back to its
/// defaults, so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvenanceConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
}

impl ProvenanceConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or fails
    /// validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ProvenanceConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from `path` if the file exists, or defaults if it
    /// does not.
    ///
    /// A file that exists but cannot be read, parsed or validated is an
    /// error; it never silently turns into defaults.
    pub fn load_if_present(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// The pagination key format is checked separately by the cursor codec
    /// when the store starts.
    pub fn validate(&self) -> Result<()> {
        let p = &self.pagination;
        if p.max_page_size == 0 {
            return Err(ProvenanceError::Config(
                "pagination.max_page_size must be greater than zero".to_string(),
            ));
        }
        if p.default_page_size == 0 || p.default_page_size > p.max_page_size {
            return Err(ProvenanceError::Config(format!(
                "pagination.default_page_size must be in 1..={}, got {}",
                p.max_page_size, p.default_page_size
            )));
        }
        if let Some(key) = &p.key {
            if key.trim().is_empty() {
                return Err(ProvenanceError::Config(
                    "pagination.key is set but empty; remove it to generate a key".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// General process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error. `RUST_LOG` takes precedence.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Relational backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path of the SQLite database file.
    pub database_path: PathBuf,
    /// How long a statement waits on a locked database before failing.
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("provenance.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

/// List pagination settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// URL-safe base64 encoding of a 32-byte page token key. Every instance
    /// serving the same database must share it. Generated at startup when
    /// unset, which only works for a single instance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Reject unreadable page tokens with InvalidArgument instead of
    /// restarting the listing from the beginning.
    pub strict_page_tokens: bool,
    /// Page size used when a caller asks for 0.
    pub default_page_size: u32,
    /// Upper bound applied to every requested page size.
    pub max_page_size: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            key: None,
            strict_page_tokens: false,
            default_page_size: 100,
            max_page_size: 1_000,
        }
    }
}
