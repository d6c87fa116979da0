use crate::embeddings::{Embedder, Embedding, ModelLoader};
use crate::error::{RagError, Result};
use crate::index::{SearchHit, VectorIndex};
use log::debug;

/// Query-side view of one company's index.
///
/// The retriever borrows the embedder that builds its index, so queries are
/// always embedded into the same space as the chunks.
pub struct Retriever<'a, L: ModelLoader> {
    embedder: &'a Embedder<L>,
    index: Option<VectorIndex>,
}

impl<'a, L: ModelLoader> Retriever<'a, L> {
    pub fn new(embedder: &'a Embedder<L>) -> Self {
        Retriever {
            embedder,
            index: None,
        }
    }

    /// Embed `chunks` and build the index over them; returns the index size
    pub async fn index_chunks(&mut self, chunks: Vec<String>) -> Result<usize> {
        let vectors = self.embedder.embed(&chunks).await?;
        self.index_vectors(vectors, chunks).await
    }

    /// Build the index from chunk vectors this retriever's embedder produced
    pub async fn index_vectors(
        &mut self,
        vectors: Vec<Embedding>,
        chunks: Vec<String>,
    ) -> Result<usize> {
        let model_id = self.embedder.model_id().await?;
        let index = VectorIndex::build(vectors, chunks)?.with_model_id(model_id);
        debug!(
            "Built index of {} vectors ({} dims)",
            index.len(),
            index.dimension()
        );
        Ok(self.install(index))
    }

    /// Use an index built elsewhere; returns its size
    pub fn install(&mut self, index: VectorIndex) -> usize {
        let len = index.len();
        self.index = Some(index);
        len
    }

    pub fn index(&self) -> Option<&VectorIndex> {
        self.index.as_ref()
    }

    /// Scored hits for `query`, closest first
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let index = self.index.as_ref().ok_or(RagError::IndexNotBuilt)?;

        let query_model = self.embedder.model_id().await?;
        if let Some(index_model) = index.model_id() {
            if index_model != query_model {
                return Err(RagError::ModelMismatch {
                    index: index_model.to_string(),
                    query: query_model,
                });
            }
        }

        let query_embedding = self.embedder.embed_one(query).await?;
        index.search(&query_embedding, k)
    }

    /// Chunk texts most relevant to `query`, most relevant first
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<String>> {
        Ok(self
            .search(query, k)
            .await?
            .into_iter()
            .map(|hit| hit.payload)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;

    fn chunks() -> Vec<String> {
        vec![
            "Revenue increased 8% to 394 billion driven by iPhone and services".to_string(),
            "The company repurchased shares and paid dividends during the year".to_string(),
            "Gross margin expanded while operating expenses grew modestly".to_string(),
        ]
    }

    #[tokio::test]
    async fn test_retrieve_before_index_fails() {
        let embedder = Embedder::new(HashingEmbedder::default(), 8);
        let retriever = Retriever::new(&embedder);
        let err = retriever.retrieve("anything", 3).await.unwrap_err();
        assert!(matches!(err, RagError::IndexNotBuilt));
    }

    #[tokio::test]
    async fn test_exact_chunk_ranks_first() {
        let embedder = Embedder::new(HashingEmbedder::default(), 2);
        let mut retriever = Retriever::new(&embedder);
        assert_eq!(retriever.index_chunks(chunks()).await.unwrap(), 3);

        let hits = retriever
            .search("Gross margin expanded while operating expenses grew modestly", 2)
            .await
            .unwrap();
        assert_eq!(hits[0].position, 2);
        assert!(hits[0].distance < 1e-5);

        let texts = retriever.retrieve("revenue", 10).await.unwrap();
        assert_eq!(texts.len(), 3);
    }

    #[tokio::test]
    async fn test_index_from_other_model_is_rejected() {
        let embedder = Embedder::new(HashingEmbedder::new(4), 8);
        let mut retriever = Retriever::new(&embedder);
        let foreign = VectorIndex::build(
            vec![Embedding {
                values: vec![1.0, 0.0, 0.0, 0.0],
            }],
            vec!["chunk".to_string()],
        )
        .unwrap()
        .with_model_id("models/text-embedding-004");
        retriever.install(foreign);

        let err = retriever.retrieve("chunk", 1).await.unwrap_err();
        assert!(matches!(err, RagError::ModelMismatch { .. }));
    }

    #[tokio::test]
    async fn test_empty_chunk_list_cannot_be_indexed() {
        let embedder = Embedder::new(HashingEmbedder::default(), 8);
        let mut retriever = Retriever::new(&embedder);
        let err = retriever.index_chunks(Vec::new()).await.unwrap_err();
        assert!(matches!(err, RagError::EmptyInput));
        assert!(retriever.index().is_none());
    }
}
