use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tower_http::cors::CorsLayer;

use study_runner::config::StudyConfig;
use study_runner::llm::{LlmConfig, create_provider};
use study_runner::retrieval::PassageIndex;
use study_runner::store::{LibSqlSheet, RecordStore, UpsertRecorder};
use study_runner::study::{
    ChatResponder, StudyManager, StudyRouteState, spawn_session_sweeper, study_routes,
};

const CHUNK_CHARS: usize = 1000;
const CHUNK_OVERLAP: usize = 200;
const SWEEP_EVERY: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "study-runner", version)]
#[command(about = "Survey and persona-chat experiment server", long_about = None)]
struct Cli {
    /// Runs the participant API when omitted
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk the .txt/.md files in a directory into the passage index
    Index {
        /// Directory holding the source documents
        docs_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = StudyConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    match cli.command {
        Some(Command::Index { docs_dir }) => build_index(&docs_dir, &config.index_path).await,
        None => serve(config).await,
    }
}

async fn serve(config: StudyConfig) -> anyhow::Result<()> {
    let llm_config = LlmConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        eprintln!(
            "  Set STUDY_LLM_BACKEND (openai | anthropic) and the matching API key variable"
        );
        std::process::exit(1);
    });

    eprintln!("🧪 Study Runner v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {} ({})", llm_config.model, llm_config.backend);

    // ── Passage index ─────────────────────────────────────────────────────
    let index = PassageIndex::load(&config.index_path)
        .await
        .unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            eprintln!("  study-runner index <documents-dir>");
            std::process::exit(1);
        });
    eprintln!(
        "   Index: {} ({} passages)",
        config.index_path.display(),
        index.len()
    );

    // ── Record sheet ──────────────────────────────────────────────────────
    let sheet: Arc<dyn RecordStore> = Arc::new(
        LibSqlSheet::new_local(&config.db_path, &config.sheet_name)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: Failed to open record sheet at {}: {}",
                    config.db_path.display(),
                    e
                );
                std::process::exit(1);
            }),
    );
    eprintln!(
        "   Sheet: {} in {}",
        config.sheet_name,
        config.db_path.display()
    );
    let recorder = Arc::new(UpsertRecorder::new(sheet, config.store_retry));

    // ── Chat ──────────────────────────────────────────────────────────────
    let llm = create_provider(&llm_config).context("Failed to create LLM provider")?;
    let responder = ChatResponder::new(llm, Arc::new(index), &config);

    let manager = Arc::new(StudyManager::new(recorder, responder, &config));
    let _sweeper = spawn_session_sweeper(Arc::clone(&manager), SWEEP_EVERY);

    eprintln!(
        "   Chat unlocks after {}s, answers: {:?}, records: {:?}",
        config.chat_unlock_after.as_secs(),
        config.answer_policy,
        config.record_policy
    );
    eprintln!("   API: http://0.0.0.0:{}/api/sessions\n", config.port);

    let app = study_routes(StudyRouteState { manager }).layer(CorsLayer::permissive());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    tracing::info!(port = config.port, "Study server started");
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

/// Chunk every `.txt`/`.md` file under `docs_dir` into a passage index.
async fn build_index(docs_dir: &Path, index_path: &Path) -> anyhow::Result<()> {
    let mut paths: Vec<PathBuf> = Vec::new();
    let mut entries = tokio::fs::read_dir(docs_dir)
        .await
        .with_context(|| format!("Failed to read {}", docs_dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_text = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| matches!(e, "txt" | "md"));
        if is_text {
            paths.push(path);
        }
    }
    paths.sort();

    let mut docs = Vec::with_capacity(paths.len());
    for path in &paths {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let source = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        docs.push((source, text));
    }

    let index = PassageIndex::from_documents(&docs, CHUNK_CHARS, CHUNK_OVERLAP)?;
    index.save(index_path).await?;
    eprintln!(
        "Indexed {} documents into {} passages at {}",
        docs.len(),
        index.len(),
        index_path.display()
    );
    Ok(())
}
