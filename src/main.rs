use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use log::{error, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use filing_rag::chat::{ChatClient, ChatConfig};
use filing_rag::config::{env_opt, RagConfig};
use filing_rag::document::Document;
use filing_rag::embeddings::{Embedder, EmbeddingProvider, HashingEmbedder};
use filing_rag::gemini::{GeminiClient, GeminiConfig};
use filing_rag::service::SummaryService;
use filing_rag::store::{DocumentSource, FileDocumentStore, HttpDocumentStore};
use filing_rag::summarizer::CompletionProvider;
use filing_rag::{ErrorKind, RagEngine};

const DEFAULT_STORE_DIR: &str = "./data/docs";

/// Summarize a company's SEC filing text with retrieval-augmented generation
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory of the file-backed document store (overrides DOCUMENT_STORE_DIR)
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate the filing summary for a ticker
    Summarize {
        ticker: String,
        /// Save the summary next to the file-backed documents
        #[arg(long)]
        persist: bool,
    },
    /// Store a text or PDF filing as the document for a ticker
    Ingest {
        ticker: String,
        file_path: PathBuf,
        /// Text file with the multi-year trend preview
        #[arg(long)]
        trend: Option<PathBuf>,
        /// Text file with the per-year figures table
        #[arg(long)]
        table: Option<PathBuf>,
    },
    /// Print the stored trend and table previews for a ticker
    Preview { ticker: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let store_dir = args
        .store_dir
        .or_else(|| env_opt("DOCUMENT_STORE_DIR").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR));

    match args.command {
        Command::Summarize { ticker, persist } => summarize(&ticker, &store_dir, persist).await,
        Command::Ingest {
            ticker,
            file_path,
            trend,
            table,
        } => ingest(&ticker, &file_path, trend.as_deref(), table.as_deref(), &store_dir),
        Command::Preview { ticker } => preview(&ticker, &store_dir),
    }
}

async fn summarize(ticker: &str, store_dir: &Path, persist: bool) -> Result<()> {
    let config = RagConfig::from_env();

    let store = match env_opt("DOCUMENT_STORE_URL") {
        Some(url) => {
            info!("Reading documents from {}", url);
            DocumentSource::Http(
                HttpDocumentStore::new(&url, config.http_timeout)
                    .context("Failed to initialize document store client")?,
            )
        }
        None => {
            info!("Reading documents from {}", store_dir.display());
            DocumentSource::File(
                FileDocumentStore::open(store_dir).context("Failed to open document store")?,
            )
        }
    };

    let gemini_config = GeminiConfig::from_env(config.http_timeout);

    // One embedder for the whole process; the model loads on first use
    let provider = match env_opt("EMBEDDING_BACKEND").as_deref() {
        Some("hashing") => EmbeddingProvider::Hashing(HashingEmbedder::default()),
        _ => EmbeddingProvider::Gemini(gemini_config.clone()),
    };
    let embedder = Arc::new(Embedder::new(provider, config.embed_batch_size));

    let completion = match env_opt("COMPLETION_PROVIDER").as_deref() {
        Some("gemini") => CompletionProvider::Gemini(
            GeminiClient::new(gemini_config).context("Failed to initialize Gemini client")?,
        ),
        _ => CompletionProvider::Chat(
            ChatClient::new(ChatConfig::from_env(config.http_timeout))
                .context("Failed to initialize chat completions client")?,
        ),
    };

    let service = SummaryService::new(RagEngine::new(store, embedder, completion, config));

    match service.summary(ticker).await {
        Ok(served) => {
            println!("{}", served.summary);
            if persist {
                FileDocumentStore::open(store_dir)
                    .and_then(|files| files.save_summary(ticker, &served.summary))
                    .context("Failed to persist summary")?;
                info!("Saved summary for {}", ticker.to_uppercase());
            }
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NoContent => {
            error!("No filing text stored for {}", ticker.to_uppercase());
            Err(e).context("Nothing to summarize")
        }
        Err(e) if e.kind() == ErrorKind::CredentialsMissing => {
            Err(e).context("Set DEEPSEEK_API_KEY or GEMINI_API_KEY for the completion provider")
        }
        Err(e) => Err(e).context("Summary pipeline failed"),
    }
}

fn ingest(
    ticker: &str,
    file_path: &Path,
    trend: Option<&Path>,
    table: Option<&Path>,
    store_dir: &Path,
) -> Result<()> {
    if !file_path.exists() {
        error!("File not found: {}", file_path.display());
        return Err(anyhow::anyhow!("File not found"));
    }

    let mut document =
        Document::from_file(ticker, file_path).context("Failed to process document")?;
    if let Some(path) = trend {
        document.trend_summary = Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
        );
    }
    if let Some(path) = table {
        document.table_summary = Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
        );
    }

    let store = FileDocumentStore::open(store_dir).context("Failed to open document store")?;
    store
        .insert(&document)
        .with_context(|| format!("Failed to store document for {}", document.ticker))?;

    info!(
        "Stored {} words of filing text for {}",
        document.text.split_whitespace().count(),
        document.ticker
    );
    Ok(())
}

fn preview(ticker: &str, store_dir: &Path) -> Result<()> {
    let store = FileDocumentStore::open(store_dir).context("Failed to open document store")?;
    match store.get(ticker)? {
        Some(document) => {
            let preview = document.preview();
            if preview.is_empty() {
                info!("Document for {} has no preview", document.ticker);
            } else {
                println!("{}", preview);
            }
            if let Some(summary) = store.get_summary(ticker)? {
                println!("\n--- Summary ---\n\n{}", summary);
            }
        }
        None => info!("No document stored for {}", ticker.to_uppercase()),
    }
    Ok(())
}
