//! Memory domain model.
//!
//! Entries carry a retrieval `strength` that decays exponentially against a
//! per-entry `stability` horizon, spaced-repetition style: successful
//! retrieval resets strength and stretches stability.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single memory entry, namespaced by session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    /// Namespace partition; entries never leak across sessions.
    pub session_id: String,
    pub task_id: Option<String>,
    pub content: String,
    pub vector: Option<Vec<f32>>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Retrieval strength in (0, 1].
    pub strength: f64,
    /// Decay horizon in hours.
    pub stability: f64,
    pub last_review: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn new(session_id: impl Into<String>, content: impl Into<String>, stability: f64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            task_id: None,
            content: content.into(),
            vector: None,
            metadata: HashMap::new(),
            strength: 1.0,
            stability,
            last_review: now,
            created_at: now,
        }
    }

    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = Some(vector);
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Strength after `elapsed_hours` without review:
    /// `strength * exp(-elapsed_hours / stability)`.
    pub fn decayed_strength(&self, now: DateTime<Utc>) -> f64 {
        let elapsed_hours = (now - self.last_review).num_milliseconds() as f64 / 3_600_000.0;
        if elapsed_hours <= 0.0 || self.stability <= 0.0 {
            return self.strength;
        }
        self.strength * (-elapsed_hours / self.stability).exp()
    }

    /// Spaced-repetition boost applied on successful retrieval.
    pub fn boost(&mut self, now: DateTime<Utc>) {
        self.strength = 1.0;
        self.stability *= 1.5;
        self.last_review = now;
    }

    /// AND-semantics metadata match.
    pub fn matches_filters(&self, filters: &HashMap<String, String>) -> bool {
        filters
            .iter()
            .all(|(k, v)| self.metadata.get(k).is_some_and(|mv| mv == v))
    }
}

/// Retrieval mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    Vector,
    Bm25,
    Hybrid,
}

impl Default for RetrievalMode {
    fn default() -> Self {
        Self::Hybrid
    }
}

/// A retrieval request scoped to one session.
#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    pub session_id: String,
    pub text: Option<String>,
    pub vector: Option<Vec<f32>>,
    pub mode: RetrievalMode,
    pub top_k: usize,
    pub filters: HashMap<String, String>,
}

impl MemoryQuery {
    pub fn text(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            text: Some(text.into()),
            mode: RetrievalMode::Bm25,
            top_k: 10,
            ..Default::default()
        }
    }

    pub fn vector(session_id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            session_id: session_id.into(),
            vector: Some(vector),
            mode: RetrievalMode::Vector,
            top_k: 10,
            ..Default::default()
        }
    }

    pub fn hybrid(
        session_id: impl Into<String>,
        text: impl Into<String>,
        vector: Vec<f32>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            text: Some(text.into()),
            vector: Some(vector),
            mode: RetrievalMode::Hybrid,
            top_k: 10,
            ..Default::default()
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    /// An empty query (no text, no vector) is invalid.
    pub fn is_empty(&self) -> bool {
        self.text.as_deref().unwrap_or("").is_empty()
            && self.vector.as_deref().unwrap_or(&[]).is_empty()
    }
}

/// Retrieval result with the fused score.
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub entry: MemoryEntry,
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_decay_halves_over_stability_scale() {
        let mut entry = MemoryEntry::new("s1", "fact", 24.0);
        entry.strength = 1.0;
        let later = entry.last_review + Duration::hours(24);
        let decayed = entry.decayed_strength(later);
        assert!((decayed - (-1.0f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn test_boost_resets_strength_and_stretches_stability() {
        let mut entry = MemoryEntry::new("s1", "fact", 24.0);
        entry.strength = 0.4;
        entry.boost(Utc::now());
        assert!((entry.strength - 1.0).abs() < f64::EPSILON);
        assert!((entry.stability - 36.0).abs() < 1e-9);
    }

    #[test]
    fn test_filter_matching() {
        let entry = MemoryEntry::new("s1", "fact", 24.0).with_metadata("kind", "note");
        let mut filters = HashMap::new();
        filters.insert("kind".to_string(), "note".to_string());
        assert!(entry.matches_filters(&filters));
        filters.insert("missing".to_string(), "x".to_string());
        assert!(!entry.matches_filters(&filters));
    }

    #[test]
    fn test_empty_query_detection() {
        let query = MemoryQuery {
            session_id: "s1".into(),
            top_k: 5,
            ..Default::default()
        };
        assert!(query.is_empty());
        assert!(!MemoryQuery::text("s1", "hello").is_empty());
    }
}
