//! Fixed-dimension cosine-similarity vector index with session scoping.

use std::collections::HashMap;

use crate::domain::errors::{EngineError, EngineResult};

struct Stored {
    session_id: String,
    vector: Vec<f32>,
    norm: f64,
}

/// Brute-force cosine index. Dimension is fixed at construction; inserts
/// and queries with a different dimension fail with `DimensionMismatch`.
pub struct VectorIndex {
    dimension: usize,
    vectors: HashMap<String, Stored>,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: HashMap::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn check_dimension(&self, vector: &[f32]) -> EngineResult<()> {
        if vector.len() != self.dimension {
            return Err(EngineError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    pub fn insert(&mut self, id: &str, session_id: &str, vector: Vec<f32>) -> EngineResult<()> {
        self.check_dimension(&vector)?;
        let norm = norm(&vector);
        self.vectors.insert(
            id.to_string(),
            Stored {
                session_id: session_id.to_string(),
                vector,
                norm,
            },
        );
        Ok(())
    }

    pub fn remove(&mut self, id: &str) {
        self.vectors.remove(id);
    }

    /// Cosine-similarity search within one session, best first.
    pub fn search(
        &self,
        session_id: &str,
        query: &[f32],
        limit: usize,
    ) -> EngineResult<Vec<(String, f64)>> {
        self.check_dimension(query)?;
        let query_norm = norm(query);
        if query_norm == 0.0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(String, f64)> = self
            .vectors
            .iter()
            .filter(|(_, stored)| stored.session_id == session_id && stored.norm > 0.0)
            .map(|(id, stored)| {
                let dot: f64 = stored
                    .vector
                    .iter()
                    .zip(query.iter())
                    .map(|(a, b)| f64::from(*a) * f64::from(*b))
                    .sum();
                (id.clone(), dot / (stored.norm * query_norm))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(limit);
        Ok(scored)
    }
}

fn norm(vector: &[f32]) -> f64 {
    vector
        .iter()
        .map(|v| f64::from(*v) * f64::from(*v))
        .sum::<f64>()
        .sqrt()
}
