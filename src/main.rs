use std::io::{self, BufRead, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ragchat::config::{Config, ConfigError, StoreKind};
use ragchat::dataset::{DEFAULT_ARTICLE_LIMIT, DatasetError, load_articles};
use ragchat::server::{self, AppState};
use ragchat::store::Backend;
use ragchat::utils::{ensure_database_directory, format_answer};
use ragchat::{AnswerError, AnswerPipeline, ConversationHistory};
use tracing_subscriber::EnvFilter;

/// ragchat - conversational question answering over an article index
#[derive(Parser)]
#[command(name = "ragchat")]
#[command(about = "Ask questions about indexed articles, with sources")]
#[command(version)]
struct Cli {
    /// Document store backend (overrides RAGCHAT_STORE)
    #[arg(long, global = true, value_name = "sqlite|qdrant")]
    store: Option<StoreKind>,

    /// SQLite database path (overrides RAGCHAT_DB)
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Ollama generation model (overrides OLLAMA_MODEL)
    #[arg(long, global = true, value_name = "MODEL")]
    model: Option<String>,

    /// Documents retrieved per question (overrides RAGCHAT_TOP_K)
    #[arg(long, global = true, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
    top_k: Option<u16>,

    /// Drop the unanswered question from the history when a request fails
    #[arg(long, global = true)]
    rollback_on_failure: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Load articles from a JSON dataset into the document store
    Ingest(IngestCommand),
    /// Answer a single question
    Ask(AskCommand),
    /// Interactive conversation in the terminal
    Chat,
    /// Serve the HTTP API
    Serve(ServeCommand),
    /// Check store and Ollama health
    Doctor,
}

#[derive(Parser)]
struct IngestCommand {
    /// Path to a JSON array of {id, content} articles
    #[arg(value_name = "DATASET")]
    dataset: PathBuf,

    /// Maximum number of articles to index
    #[arg(long, default_value_t = DEFAULT_ARTICLE_LIMIT)]
    limit: usize,
}

#[derive(Parser)]
struct AskCommand {
    /// The question to answer
    #[arg(value_name = "QUESTION")]
    question: String,
}

#[derive(Parser)]
struct ServeCommand {
    /// Address to listen on (overrides RAGCHAT_BIND_ADDR)
    #[arg(long, value_name = "ADDR")]
    bind: Option<SocketAddr>,
}

fn main() {
    if let Err(e) = dotenvy::dotenv()
        && !e.not_found()
    {
        eprintln!("Error: failed to load .env: {e}");
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ragchat=info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let result = load_config(&cli).and_then(|config| match &cli.command {
        Commands::Ingest(cmd) => handle_ingest(&config, cmd),
        Commands::Ask(cmd) => handle_ask(&config, cmd),
        Commands::Chat => handle_chat(&config),
        Commands::Serve(cmd) => handle_serve(&config, cmd),
        Commands::Doctor => handle_doctor(&config),
    });

    if let Err(e) = result {
        // Determine exit code based on error type
        let exit_code = if is_user_error(&e) { 1 } else { 2 };
        eprintln!("Error: {e:#}");
        std::process::exit(exit_code);
    }
}

/// Determines if an error is a user error (vs internal error).
///
/// User errors are bad input: a blank question, invalid configuration, or an
/// unreadable dataset. Everything else (store, network, model) is internal.
fn is_user_error(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        cause
            .downcast_ref::<AnswerError>()
            .is_some_and(AnswerError::is_client_error)
            || cause.is::<ConfigError>()
            || cause.is::<DatasetError>()
    })
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::from_env().context("Invalid configuration")?;
    apply_overrides(&mut config, cli);
    Ok(config)
}

/// Command-line flags win over environment values.
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(store) = cli.store {
        config.store = store;
    }
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    if let Some(top_k) = cli.top_k {
        config.top_k = usize::from(top_k);
    }
    if cli.rollback_on_failure {
        config.rollback_on_failure = true;
    }
}

fn open_backend(config: &Config) -> Result<(Arc<ragchat::OllamaClient>, Backend)> {
    if config.store == StoreKind::Sqlite {
        ensure_database_directory(&config.db_path)?;
    }

    let client = Arc::new(
        config
            .ollama_client()
            .context("Failed to build Ollama client")?,
    );
    let store = config
        .open_store(Arc::clone(&client))
        .context("Failed to open document store")?;

    Ok((client, store))
}

fn open_pipeline(config: &Config) -> Result<AnswerPipeline> {
    let (client, store) = open_backend(config)?;
    Ok(config.pipeline(client, &store))
}

/// Loads the dataset and writes it into the configured store.
fn handle_ingest(config: &Config, cmd: &IngestCommand) -> Result<()> {
    let articles = load_articles(&cmd.dataset, cmd.limit)
        .with_context(|| format!("Failed to load dataset {}", cmd.dataset.display()))?;
    if articles.is_empty() {
        println!("Dataset contains no articles; nothing to index");
        return Ok(());
    }

    let (_client, store) = open_backend(config)?;
    let count = store
        .add_articles(&articles)
        .context("Failed to index articles")?;

    println!("Indexed {count} articles");
    Ok(())
}

fn handle_ask(config: &Config, cmd: &AskCommand) -> Result<()> {
    let pipeline = open_pipeline(config)?;
    let mut history = ConversationHistory::new();

    let result = pipeline
        .answer(&cmd.question, &mut history)
        .context("Failed to answer question")?;

    println!("{}", format_answer(&result));
    Ok(())
}

/// Line-based conversation over one in-memory history.
fn handle_chat(config: &Config) -> Result<()> {
    let pipeline = open_pipeline(config)?;
    let mut history = ConversationHistory::new();

    println!("Ask a question. /history shows the conversation, /quit exits.");
    prompt()?;

    for line in io::stdin().lock().lines() {
        let line = line.context("Failed to read from stdin")?;

        match line.trim() {
            "" => {}
            "/quit" | "/exit" => break,
            "/history" => {
                if history.is_empty() {
                    println!("(no conversation yet)");
                } else {
                    println!("{history}");
                }
            }
            question => match pipeline.answer(question, &mut history) {
                Ok(result) => println!("{}\n", format_answer(&result)),
                Err(e) => eprintln!("{}", e.user_message()),
            },
        }

        prompt()?;
    }

    Ok(())
}

fn prompt() -> Result<()> {
    print!("> ");
    io::stdout().flush().context("Failed to flush stdout")
}

/// Runs the HTTP server on a runtime owned by this function.
///
/// The blocking HTTP clients inside the pipeline must be created and dropped
/// outside async context, so `main` stays synchronous and keeps a handle to the
/// pipeline until the runtime has finished.
fn handle_serve(config: &Config, cmd: &ServeCommand) -> Result<()> {
    let pipeline = Arc::new(open_pipeline(config)?);
    let addr = cmd.bind.unwrap_or(config.bind_addr);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let state = AppState::new(Arc::clone(&pipeline));
    let served = runtime.block_on(server::serve(addr, state));
    drop(runtime);

    served.with_context(|| format!("Server on {addr} failed"))
}

fn handle_doctor(config: &Config) -> Result<()> {
    if config.store == StoreKind::Sqlite {
        ensure_database_directory(&config.db_path)?;
    }

    if !ragchat::doctor::run_health_checks(config)? {
        std::process::exit(2);
    }
    Ok(())
}
