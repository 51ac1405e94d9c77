//! Provenance application binary - composition root.
//!
//! 1. Parse the command line and load configuration from TOML
//! 2. Initialize tracing
//! 3. Open the metadata store and run the requested command

mod cli;

use clap::Parser;
use serde::Serialize;

use provenance_core::config::ProvenanceConfig;
use provenance_core::error::{ProvenanceError, Result};
use provenance_core::types::Project;
use provenance_storage::{CursorKey, MetadataStore};

use cli::{CliArgs, Command, ListKind};

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn require_project(project: Option<String>) -> Result<String> {
    project.ok_or_else(|| ProvenanceError::InvalidArgument("--project is required".to_string()))
}

async fn run(args: CliArgs, config: ProvenanceConfig) -> Result<()> {
    match args.command {
        Command::Keygen => {
            println!("{}", CursorKey::generate().encode());
        }
        Command::Check => {
            let store = MetadataStore::open(&config)?;
            let projects = store.list_projects("", "", 1).await?;
            tracing::info!(projects = projects.total_size, "Configuration and database OK");
        }
        Command::CreateProject { project } => {
            let store = MetadataStore::open(&config)?;
            let created = store.create_project(&project, &Project::default()).await?;
            print_json(&created)?;
        }
        Command::List {
            kind,
            project,
            filter,
            page_size,
            page_token,
        } => {
            let store = MetadataStore::open(&config)?;
            match kind {
                ListKind::Projects => {
                    print_json(&store.list_projects(&filter, &page_token, page_size).await?)?
                }
                ListKind::Notes => {
                    let project = require_project(project)?;
                    print_json(
                        &store
                            .list_notes(&project, &filter, &page_token, page_size)
                            .await?,
                    )?
                }
                ListKind::Occurrences => {
                    let project = require_project(project)?;
                    print_json(
                        &store
                            .list_occurrences(&project, &filter, &page_token, page_size)
                            .await?,
                    )?
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config. A file that exists must load cleanly; only a missing file
    // falls back to defaults.
    let config_file = args.resolve_config_path();
    let loaded = ProvenanceConfig::load_if_present(&config_file);

    // Tracing. RUST_LOG wins over --log-level and the config.
    let config_level = loaded
        .as_ref()
        .map(|c| c.general.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    let level = args.resolve_log_level(&config_level);
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level)),
        )
        .init();

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(path = %config_file.display(), error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };
    if !config_file.exists() {
        tracing::info!(path = %config_file.display(), "No configuration file; using defaults");
    }

    tracing::info!(
        path = %config_file.display(),
        "Starting provenance v{}",
        env!("CARGO_PKG_VERSION")
    );

    if let Err(e) = run(args, config).await {
        tracing::error!(code = ?e.code(), error = %e, "Command failed");
        return Err(e.into());
    }
    Ok(())
}
