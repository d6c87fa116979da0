use crate::chunking::split_into_chunks;
use crate::config::RagConfig;
use crate::document::normalize_ticker;
use crate::embeddings::{Embedder, ModelLoader};
use crate::error::{RagError, Result};
use crate::retriever::Retriever;
use crate::store::DocumentStore;
use crate::summarizer::{CompletionService, Summarizer};
use log::{debug, error, info};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// RAG (Retrieval-Augmented Generation) engine: ticker in, filing summary out.
///
/// Each run fetches the ticker's documents, chunks and embeds them, builds a
/// fresh in-memory index, retrieves the chunks closest to a fixed query and
/// summarizes them. Nothing but the embedding model outlives a run.
pub struct RagEngine<S, L, C>
where
    S: DocumentStore,
    L: ModelLoader,
    C: CompletionService,
{
    store: S,
    embedder: Arc<Embedder<L>>,
    summarizer: Summarizer<C>,
    config: RagConfig,
}

impl<S, L, C> RagEngine<S, L, C>
where
    S: DocumentStore,
    L: ModelLoader,
    C: CompletionService,
{
    /// Create a new RAG engine around a shared embedder
    pub fn new(store: S, embedder: Arc<Embedder<L>>, completion: C, config: RagConfig) -> Self {
        RagEngine {
            store,
            embedder,
            summarizer: Summarizer::new(completion),
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn summarizer(&self) -> &Summarizer<C> {
        &self.summarizer
    }

    /// Produce the summary for `ticker`
    pub async fn run_rag_pipeline(&self, ticker: &str) -> Result<String> {
        self.run_with_cancel(ticker, &CancellationToken::new()).await
    }

    /// Produce the summary for `ticker`, stopping at the next step boundary once
    /// `cancel` fires
    pub async fn run_with_cancel(&self, ticker: &str, cancel: &CancellationToken) -> Result<String> {
        let ticker = normalize_ticker(ticker);
        if ticker.is_empty() {
            return Err(RagError::InvalidTicker(ticker));
        }

        let result = self.run_steps(&ticker, cancel).await;
        if let Err(e) = &result {
            match e {
                RagError::NoContent { .. } | RagError::Cancelled(_) => {
                    info!("No summary for {}: {}", ticker, e);
                }
                _ => error!("Summary pipeline for {} failed: {}", ticker, e),
            }
        }
        result
    }

    async fn run_steps(&self, ticker: &str, cancel: &CancellationToken) -> Result<String> {
        checkpoint(cancel, "fetch")?;
        let documents = self.store.get_documents(ticker).await?;
        info!("Fetched {} documents for {}", documents.len(), ticker);

        checkpoint(cancel, "chunk")?;
        let chunks: Vec<String> = documents
            .iter()
            .filter(|doc| doc.has_text())
            .flat_map(|doc| {
                split_into_chunks(
                    &doc.text,
                    &doc.ticker,
                    self.config.chunk_window,
                    self.config.chunk_overlap,
                )
            })
            .map(|chunk| chunk.text)
            .collect();
        info!("Split into {} chunks", chunks.len());

        checkpoint(cancel, "embed")?;
        if chunks.is_empty() {
            return Err(RagError::NoContent {
                ticker: ticker.to_string(),
            });
        }
        let vectors = self.embedder.embed(&chunks).await?;
        debug!("Embedded {} chunks", vectors.len());

        checkpoint(cancel, "index")?;
        let mut retriever = Retriever::new(self.embedder.as_ref());
        let indexed = retriever.index_vectors(vectors, chunks).await?;
        info!("Indexed {} chunks for {}", indexed, ticker);

        checkpoint(cancel, "retrieve")?;
        let query = self.config.query_for(ticker);
        let retrieved = retriever.retrieve(&query, self.config.top_k).await?;
        debug!("Retrieved {} chunks for {:?}", retrieved.len(), query);

        checkpoint(cancel, "summarize")?;
        let summary = self.summarizer.summarize(&retrieved).await?;
        info!("Summary ready for {}", ticker);

        Ok(summary)
    }
}

fn checkpoint(cancel: &CancellationToken, step: &'static str) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(RagError::Cancelled(step));
    }
    Ok(())
}
