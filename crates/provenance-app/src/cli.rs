//! CLI argument definitions for the provenance binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Provenance - a metadata store for notes and their occurrences.
#[derive(Parser, Debug)]
#[command(name = "provenance", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print a fresh page token key for `pagination.key`.
    Keygen,
    /// Validate the configuration and open the database.
    Check,
    /// Create a project.
    CreateProject {
        /// Project id, e.g. "acme".
        project: String,
    },
    /// Print one page of a listing as JSON.
    List {
        #[arg(value_enum)]
        kind: ListKind,
        /// Owning project; required for notes and occurrences.
        #[arg(short = 'p', long = "project")]
        project: Option<String>,
        #[arg(short = 'f', long = "filter", default_value = "")]
        filter: String,
        /// 0 uses the configured default.
        #[arg(short = 'n', long = "page-size", default_value_t = 0)]
        page_size: u32,
        #[arg(short = 't', long = "page-token", default_value = "")]
        page_token: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListKind {
    Projects,
    Notes,
    Occurrences,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > PROVENANCE_CONFIG env var > ./provenance.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("PROVENANCE_CONFIG") {
            return PathBuf::from(p);
        }
        PathBuf::from("provenance.toml")
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}
