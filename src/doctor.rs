//! Health checks for the `doctor` command.
//!
//! Reports whether the document store opens and how many documents it holds,
//! whether Ollama is reachable, and whether the configured models are installed.

use std::sync::Arc;

use anyhow::{Context, Result};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::config::{Config, StoreKind};
use crate::ollama::OllamaClient;
use crate::store::{Backend, DocumentStore, SqliteStore};

// ANSI color codes for terminal output
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";

/// Health status for a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Component is healthy
    Ok,
    /// Component has a warning but is functional
    Warning(String),
    /// Component is not functional
    Error(String),
}

impl HealthStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, HealthStatus::Ok)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, HealthStatus::Error(_))
    }
}

#[derive(Debug)]
pub struct StoreHealth {
    pub status: HealthStatus,
    pub location: String,
    pub documents: Option<u64>,
    /// Time of the most recent ingestion; only the SQLite index records it.
    pub last_ingested: Option<OffsetDateTime>,
}

#[derive(Debug)]
pub struct OllamaHealth {
    pub status: HealthStatus,
    pub base_url: String,
    pub models: Vec<String>,
}

/// Whether a configured model is installed.
#[derive(Debug, PartialEq, Eq)]
pub struct ModelCheck {
    pub name: String,
    pub purpose: &'static str,
    pub present: bool,
}

/// Runs every check and prints the report.
///
/// Returns `true` when nothing is in an error state.
pub fn run_health_checks(config: &Config) -> Result<bool> {
    let client = Arc::new(
        config
            .ollama_client()
            .context("Failed to build Ollama client")?,
    );

    let store = check_store(config, Arc::clone(&client));
    let ollama = check_ollama_health(&client);
    let models = if ollama.status.is_error() {
        Vec::new()
    } else {
        check_models(config, &ollama.models)
    };

    print_health_report(&store, &ollama, &models);

    Ok(!store.status.is_error()
        && !ollama.status.is_error()
        && models.iter().all(|m| m.present))
}

fn check_store(config: &Config, client: Arc<OllamaClient>) -> StoreHealth {
    let location = match config.store {
        StoreKind::Sqlite => format!("sqlite {}", config.db_path.display()),
        StoreKind::Qdrant => format!(
            "qdrant {} (collection {})",
            config.qdrant_url, config.qdrant_collection
        ),
    };

    match config.open_store(client) {
        Ok(Backend::Sqlite(store)) => sqlite_store_health(location, &store),
        Ok(backend) => store_health(location, backend.document_store().as_ref()),
        Err(e) => StoreHealth {
            status: HealthStatus::Error(format!("Failed to open: {}", e)),
            location,
            documents: None,
            last_ingested: None,
        },
    }
}

/// Like [`store_health`], plus the time of the last ingestion.
pub fn sqlite_store_health(location: String, store: &SqliteStore) -> StoreHealth {
    let mut health = store_health(location, store);
    if !health.status.is_error() {
        match store.last_ingested_at() {
            Ok(at) => health.last_ingested = at,
            Err(e) => {
                health.status = HealthStatus::Error(format!("Failed to read ingestion time: {}", e))
            }
        }
    }
    health
}

/// Counts documents in an opened store.
pub fn store_health(location: String, store: &dyn DocumentStore) -> StoreHealth {
    match store.count() {
        Ok(0) => StoreHealth {
            status: HealthStatus::Warning("No documents indexed; run `ragchat ingest`".to_string()),
            location,
            documents: Some(0),
            last_ingested: None,
        },
        Ok(n) => StoreHealth {
            status: HealthStatus::Ok,
            location,
            documents: Some(n),
            last_ingested: None,
        },
        Err(e) => StoreHealth {
            status: HealthStatus::Error(format!("Count failed: {}", e)),
            location,
            documents: None,
            last_ingested: None,
        },
    }
}

pub fn check_ollama_health(client: &OllamaClient) -> OllamaHealth {
    let base_url = client.base_url().to_string();

    match client.list_models() {
        Ok(models) => OllamaHealth {
            status: if models.is_empty() {
                HealthStatus::Warning("No models installed".to_string())
            } else {
                HealthStatus::Ok
            },
            base_url,
            models,
        },
        Err(e) => OllamaHealth {
            status: HealthStatus::Error(format!("Connection failed: {}", e)),
            base_url,
            models: Vec::new(),
        },
    }
}

/// Checks the generation model, plus the embedding model when Qdrant is used.
fn check_models(config: &Config, available: &[String]) -> Vec<ModelCheck> {
    let mut wanted = vec![(config.model.as_str(), "generation")];
    if config.store == StoreKind::Qdrant {
        wanted.push((config.embed_model.as_str(), "embedding"));
    }

    wanted
        .into_iter()
        .map(|(name, purpose)| ModelCheck {
            name: name.to_string(),
            purpose,
            present: model_available(name, available),
        })
        .collect()
}

/// Ollama lists untagged models as `name:latest`.
pub fn model_available(configured: &str, available: &[String]) -> bool {
    available.iter().any(|model| {
        model == configured
            || (!configured.contains(':')
                && model
                    .strip_suffix(":latest")
                    .is_some_and(|base| base == configured))
    })
}

// ============================================================================
// Pretty Printing
// ============================================================================

fn status_symbol(status: &HealthStatus) -> &'static str {
    match status {
        HealthStatus::Ok => "\u{2713}",
        HealthStatus::Warning(_) => "!",
        HealthStatus::Error(_) => "\u{2717}",
    }
}

fn status_color(status: &HealthStatus) -> &'static str {
    match status {
        HealthStatus::Ok => GREEN,
        HealthStatus::Warning(_) => YELLOW,
        HealthStatus::Error(_) => RED,
    }
}

fn status_text(status: &HealthStatus, ok_text: &str) -> String {
    match status {
        HealthStatus::Ok => ok_text.to_string(),
        HealthStatus::Warning(w) => w.clone(),
        HealthStatus::Error(e) => e.clone(),
    }
}

fn print_health_report(store: &StoreHealth, ollama: &OllamaHealth, models: &[ModelCheck]) {
    println!("{}ragchat doctor{}", BOLD, RESET);
    println!();

    println!("{}Document store{}", BOLD, RESET);
    println!(
        "  {}{}{} Status: {}",
        status_color(&store.status),
        status_symbol(&store.status),
        RESET,
        status_text(&store.status, "OK")
    );
    println!("    {}Location: {}{}", DIM, store.location, RESET);
    if let Some(n) = store.documents {
        println!("    {}Documents: {}{}", DIM, n, RESET);
    }
    if let Some(at) = store.last_ingested {
        let at = at.format(&Rfc3339).unwrap_or_else(|_| at.to_string());
        println!("    {}Last ingested: {}{}", DIM, at, RESET);
    }
    println!();

    println!("{}Ollama{}", BOLD, RESET);
    println!(
        "  {}{}{} Status: {}",
        status_color(&ollama.status),
        status_symbol(&ollama.status),
        RESET,
        status_text(&ollama.status, "Connected")
    );
    println!("    {}URL: {}{}", DIM, ollama.base_url, RESET);
    if !ollama.models.is_empty() {
        let models_display = if ollama.models.len() > 3 {
            format!(
                "{}, ... ({} more)",
                ollama.models[..3].join(", "),
                ollama.models.len() - 3
            )
        } else {
            ollama.models.join(", ")
        };
        println!("    {}Models: {}{}", DIM, models_display, RESET);
    }

    for check in models {
        let status = if check.present {
            HealthStatus::Ok
        } else {
            HealthStatus::Error(format!("not installed; run `ollama pull {}`", check.name))
        };
        println!(
            "  {}{}{} {} model {}: {}",
            status_color(&status),
            status_symbol(&status),
            RESET,
            check.purpose,
            check.name,
            status_text(&status, "installed")
        );
    }
}
