use crate::error::{RagError, Result};
use crate::gemini::{GeminiConfig, GeminiEmbeddingModel};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tokio::sync::OnceCell;

/// Representation of a vector embedding
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Scale to unit L2 norm; `None` for zero or non-finite vectors
    pub fn normalized(mut self) -> Option<Self> {
        let norm = self.values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if !norm.is_finite() || norm == 0.0 {
            return None;
        }
        self.values.iter_mut().for_each(|v| *v /= norm);
        Some(self)
    }

    pub fn cosine_similarity(&self, other: &Embedding) -> f32 {
        let dot: f32 = self
            .values
            .iter()
            .zip(&other.values)
            .map(|(a, b)| a * b)
            .sum();
        let norm_a = self.values.iter().map(|v| v * v).sum::<f32>().sqrt();
        let norm_b = other.values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        dot / (norm_a * norm_b)
    }
}

/// A loaded embedding model
#[allow(async_fn_in_trait)]
pub trait EmbeddingBackend {
    /// Identifier of the model producing the vectors
    fn model_id(&self) -> &str;

    /// Raw (not necessarily normalized) vectors for one batch, in input order
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;
}

/// Produces an [`EmbeddingBackend`]; called at most once per successful load
#[allow(async_fn_in_trait)]
pub trait ModelLoader {
    type Model: EmbeddingBackend;

    async fn load(&self) -> Result<Self::Model>;
}

/// Batches texts through a lazily loaded model and unit-normalizes the output.
///
/// One embedder is meant to be created at the process root and shared (for
/// example behind an `Arc`) by every pipeline run, so the model is loaded once
/// and queries are embedded by the same model that built the index.
pub struct Embedder<L: ModelLoader> {
    loader: L,
    model: OnceCell<L::Model>,
    batch_size: usize,
}

impl<L: ModelLoader> Embedder<L> {
    pub fn new(loader: L, batch_size: usize) -> Self {
        Embedder {
            loader,
            model: OnceCell::new(),
            batch_size: batch_size.max(1),
        }
    }

    /// The loaded model, loading it on first use. Concurrent first callers wait
    /// on a single load; a failed load leaves the cell empty for a later retry.
    pub async fn model(&self) -> Result<&L::Model> {
        self.model
            .get_or_try_init(|| async {
                info!("Loading embedding model...");
                let model = self.loader.load().await.map_err(|e| match e {
                    RagError::ModelUnavailable(_) => e,
                    other => RagError::ModelUnavailable(other.to_string()),
                })?;
                info!("Embedding model {} ready", model.model_id());
                Ok::<_, RagError>(model)
            })
            .await
    }

    /// Model id, loading the model if necessary
    pub async fn model_id(&self) -> Result<String> {
        Ok(self.model().await?.model_id().to_string())
    }

    pub fn is_loaded(&self) -> bool {
        self.model.initialized()
    }

    /// Embed texts; every returned vector has the same dimension and unit norm
    pub async fn embed<S: AsRef<str>>(&self, texts: &[S]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.model().await?;

        let mut embeddings = Vec::with_capacity(texts.len());
        let mut dimension: Option<usize> = None;

        for batch in texts.chunks(self.batch_size) {
            let refs: Vec<&str> = batch.iter().map(|t| t.as_ref()).collect();
            debug!("Embedding batch of {} texts", refs.len());

            let vectors = model.embed_batch(&refs).await.map_err(|e| match e {
                RagError::Timeout(_) | RagError::Upstream(_) | RagError::ModelUnavailable(_) => e,
                other => RagError::ModelUnavailable(other.to_string()),
            })?;
            if vectors.len() != refs.len() {
                return Err(RagError::ModelUnavailable(format!(
                    "model returned {} embeddings for {} inputs",
                    vectors.len(),
                    refs.len()
                )));
            }

            for values in vectors {
                let expected = *dimension.get_or_insert(values.len());
                if values.len() != expected {
                    return Err(RagError::DimensionMismatch {
                        expected,
                        actual: values.len(),
                    });
                }
                let embedding = Embedding { values }.normalized().ok_or_else(|| {
                    RagError::ModelUnavailable("model returned a zero vector".to_string())
                })?;
                embeddings.push(embedding);
            }
        }

        Ok(embeddings)
    }

    /// Embed a single text
    pub async fn embed_one(&self, text: &str) -> Result<Embedding> {
        self.embed(&[text])
            .await?
            .pop()
            .ok_or_else(|| RagError::ModelUnavailable("embedding output missing".to_string()))
    }
}

pub const DEFAULT_HASHING_DIMENSIONS: usize = 384;

/// Deterministic offline embedder: signed feature hashing of lowercase word tokens
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
    model_id: String,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        HashingEmbedder {
            dimensions,
            model_id: format!("hashing-{}", dimensions),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut values = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric() && c != '%')
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            let hash = hasher.finish();
            let slot = (hash % self.dimensions as u64) as usize;
            let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            values[slot] += sign;
        }
        // keep blank text representable after normalization
        if values.iter().all(|v| *v == 0.0) {
            values[0] = 1.0;
        }
        values
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        HashingEmbedder::new(DEFAULT_HASHING_DIMENSIONS)
    }
}

impl EmbeddingBackend for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

impl ModelLoader for HashingEmbedder {
    type Model = HashingEmbedder;

    async fn load(&self) -> Result<HashingEmbedder> {
        Ok(self.clone())
    }
}

/// Embedding backend chosen at startup
pub enum EmbeddingProvider {
    Gemini(GeminiConfig),
    Hashing(HashingEmbedder),
}

pub enum EmbeddingModel {
    Gemini(GeminiEmbeddingModel),
    Hashing(HashingEmbedder),
}

impl EmbeddingBackend for EmbeddingModel {
    fn model_id(&self) -> &str {
        match self {
            EmbeddingModel::Gemini(model) => model.model_id(),
            EmbeddingModel::Hashing(model) => model.model_id(),
        }
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        match self {
            EmbeddingModel::Gemini(model) => model.embed_batch(texts).await,
            EmbeddingModel::Hashing(model) => model.embed_batch(texts).await,
        }
    }
}

impl ModelLoader for EmbeddingProvider {
    type Model = EmbeddingModel;

    async fn load(&self) -> Result<EmbeddingModel> {
        match self {
            EmbeddingProvider::Gemini(config) => config.load().await.map(EmbeddingModel::Gemini),
            EmbeddingProvider::Hashing(embedder) => {
                embedder.load().await.map(EmbeddingModel::Hashing)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingLoader {
        loads: Arc<AtomicUsize>,
        fail_first: bool,
    }

    impl ModelLoader for CountingLoader {
        type Model = HashingEmbedder;

        async fn load(&self) -> Result<HashingEmbedder> {
            let attempt = self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail_first && attempt == 0 {
                return Err(RagError::Upstream("weights download failed".to_string()));
            }
            Ok(HashingEmbedder::new(16))
        }
    }

    struct RaggedModel;

    impl EmbeddingBackend for RaggedModel {
        fn model_id(&self) -> &str {
            "ragged"
        }

        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![1.0; t.len()]).collect())
        }
    }

    impl ModelLoader for RaggedModel {
        type Model = RaggedModel;

        async fn load(&self) -> Result<RaggedModel> {
            Ok(RaggedModel)
        }
    }

    #[tokio::test]
    async fn test_vectors_are_unit_length() {
        let embedder = Embedder::new(HashingEmbedder::default(), 2);
        let texts = ["revenue grew", "net income fell", "gross margin", ""];
        let embeddings = embedder.embed(&texts).await.unwrap();

        assert_eq!(embeddings.len(), 4);
        for embedding in &embeddings {
            assert_eq!(embedding.dim(), DEFAULT_HASHING_DIMENSIONS);
            let norm: f32 = embedding.values.iter().map(|v| v * v).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5);
        }
    }

    #[tokio::test]
    async fn test_re_embedding_is_identical() {
        let embedder = Embedder::new(HashingEmbedder::default(), 16);
        let first = embedder
            .embed(&["Operating margin expanded to 30%", "other"])
            .await
            .unwrap();
        let second = embedder
            .embed(&["unrelated batch", "Operating margin expanded to 30%"])
            .await
            .unwrap();
        let similarity = first[0].cosine_similarity(&second[1]);
        assert!((similarity - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_model_loads_once_under_concurrency() {
        let loads = Arc::new(AtomicUsize::new(0));
        let embedder = Embedder::new(
            CountingLoader {
                loads: loads.clone(),
                fail_first: false,
            },
            4,
        );
        assert!(!embedder.is_loaded());

        let (a, b, c) = tokio::join!(
            embedder.embed(&["a"]),
            embedder.embed(&["b"]),
            embedder.embed_one("c"),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(embedder.is_loaded());
    }

    #[tokio::test]
    async fn test_failed_load_is_model_unavailable_and_retried() {
        let loads = Arc::new(AtomicUsize::new(0));
        let embedder = Embedder::new(
            CountingLoader {
                loads: loads.clone(),
                fail_first: true,
            },
            4,
        );

        let err = embedder.embed(&["x"]).await.unwrap_err();
        assert!(matches!(err, RagError::ModelUnavailable(msg) if msg.contains("weights")));
        assert!(embedder.embed(&["x"]).await.is_ok());
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_batch_skips_loading() {
        let embedder = Embedder::new(HashingEmbedder::default(), 4);
        let none: [&str; 0] = [];
        assert!(embedder.embed(&none).await.unwrap().is_empty());
        assert!(!embedder.is_loaded());
    }

    #[tokio::test]
    async fn test_dimension_change_is_rejected() {
        let embedder = Embedder::new(RaggedModel, 8);
        let err = embedder.embed(&["abc", "abcd"]).await.unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch {
                expected: 3,
                actual: 4
            }
        ));
    }
}
