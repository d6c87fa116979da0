//! Exact nearest-neighbour index over one company's chunk embeddings.
//!
//! Vectors are stored row-major in a single buffer and every query scans all
//! rows, ranking them by squared Euclidean distance. A filing yields tens to a
//! few hundred chunks, so a flat scan is both exact and fast enough.

use crate::embeddings::Embedding;
use crate::error::{RagError, Result};

/// One search hit
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub payload: String,
    /// Squared Euclidean distance to the query
    pub distance: f32,
    /// Insertion position of the hit
    pub position: usize,
}

/// Write-once flat index of (vector, payload) pairs
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimension: usize,
    data: Vec<f32>,
    payloads: Vec<String>,
    model_id: Option<String>,
}

impl VectorIndex {
    /// Build an index; all vectors must share one non-zero dimension
    pub fn build(vectors: Vec<Embedding>, payloads: Vec<String>) -> Result<Self> {
        if vectors.is_empty() {
            return Err(RagError::EmptyInput);
        }
        if vectors.len() != payloads.len() {
            return Err(RagError::PayloadMismatch {
                vectors: vectors.len(),
                payloads: payloads.len(),
            });
        }

        let dimension = vectors[0].dim();
        if dimension == 0 {
            return Err(RagError::DimensionMismatch {
                expected: 1,
                actual: 0,
            });
        }

        let mut data = Vec::with_capacity(dimension * vectors.len());
        for vector in vectors {
            if vector.dim() != dimension {
                return Err(RagError::DimensionMismatch {
                    expected: dimension,
                    actual: vector.dim(),
                });
            }
            data.extend_from_slice(&vector.values);
        }

        Ok(VectorIndex {
            dimension,
            data,
            payloads,
            model_id: None,
        })
    }

    /// Record which embedding model produced the vectors
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn model_id(&self) -> Option<&str> {
        self.model_id.as_deref()
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn row(&self, position: usize) -> &[f32] {
        let start = position * self.dimension;
        &self.data[start..start + self.dimension]
    }

    /// The `k` nearest payloads, closest first; `k` is clamped to `len()`
    pub fn search(&self, query: &Embedding, k: usize) -> Result<Vec<SearchHit>> {
        if query.dim() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: query.dim(),
            });
        }

        let k = k.min(self.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f32, usize)> = (0..self.len())
            .map(|position| (squared_l2(&query.values, self.row(position)), position))
            .collect();

        // ties resolve to the earlier chunk
        let by_distance =
            |a: &(f32, usize), b: &(f32, usize)| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1));
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_distance);
            scored.truncate(k);
        }
        scored.sort_unstable_by(by_distance);

        Ok(scored
            .into_iter()
            .map(|(distance, position)| SearchHit {
                payload: self.payloads[position].clone(),
                distance,
                position,
            })
            .collect())
    }
}

/// Squared Euclidean distance between two equally sized slices
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}
