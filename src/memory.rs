//! Pluggable vector-memory adapter.
//!
//! The engine issues strictly sequential calls to the adapter except across
//! parallel branches, where implementations must be safe for concurrent use.
//! Concrete stores (Redis, Pinecone, sqlite-vec) are external collaborators;
//! [`InMemoryStore`] ships for tests and demos.

use async_trait::async_trait;
use miette::Diagnostic;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::message::Metadata;

/// An entry to persist into memory.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Options applied to a memory search.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchOptions {
    pub limit: Option<usize>,
    pub namespace: Option<String>,
    /// Minimum similarity score for a hit to be returned.
    pub threshold: Option<f64>,
}

/// One search result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryHit {
    pub id: String,
    pub text: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Errors from memory adapters.
#[derive(Debug, Error, Diagnostic)]
pub enum MemoryError {
    #[error("memory backend error: {0}")]
    #[diagnostic(code(loomflow::memory::backend))]
    Backend(String),

    #[error("memory entry not found: {0}")]
    #[diagnostic(code(loomflow::memory::not_found))]
    NotFound(String),
}

/// Pluggable memory store interface.
#[async_trait]
pub trait MemoryAdapter: Send + Sync {
    /// Persist an entry and return its id.
    async fn store(&self, entry: MemoryEntry) -> Result<String, MemoryError>;

    /// Search for entries similar to `query`.
    async fn search(
        &self,
        query: &str,
        options: SearchOptions,
    ) -> Result<Vec<MemoryHit>, MemoryError>;

    /// Delete an entry by id.
    async fn delete(&self, id: &str) -> Result<(), MemoryError>;

    /// Remove every entry.
    async fn clear(&self) -> Result<(), MemoryError>;
}

/// Naive in-memory store scoring hits by token overlap.
///
/// Intended for tests and demos, not production recall quality.
#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<Vec<(String, MemoryEntry)>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn score(query: &str, text: &str) -> f64 {
        let query_lower = query.to_lowercase();
        let text_lower = text.to_lowercase();
        let query_terms: Vec<&str> = query_lower.split_whitespace().collect();
        if query_terms.is_empty() {
            return 0.0;
        }
        let matched = query_terms
            .iter()
            .filter(|term| text_lower.contains(**term))
            .count();
        matched as f64 / query_terms.len() as f64
    }
}

#[async_trait]
impl MemoryAdapter for InMemoryStore {
    async fn store(&self, entry: MemoryEntry) -> Result<String, MemoryError> {
        let id = Uuid::new_v4().to_string();
        self.entries.write().push((id.clone(), entry));
        Ok(id)
    }

    async fn search(
        &self,
        query: &str,
        options: SearchOptions,
    ) -> Result<Vec<MemoryHit>, MemoryError> {
        let threshold = options.threshold.unwrap_or(0.0);
        let mut hits: Vec<MemoryHit> = self
            .entries
            .read()
            .iter()
            .filter(|(_, e)| match (&options.namespace, &e.namespace) {
                (Some(wanted), Some(actual)) => wanted == actual,
                (Some(_), None) => false,
                (None, _) => true,
            })
            .map(|(id, e)| MemoryHit {
                id: id.clone(),
                text: e.text.clone(),
                score: Self::score(query, &e.text),
                metadata: e.metadata.clone(),
            })
            .filter(|hit| hit.score > threshold || (threshold == 0.0 && hit.score > 0.0))
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        if let Some(limit) = options.limit {
            hits.truncate(limit);
        }
        Ok(hits)
    }

    async fn delete(&self, id: &str) -> Result<(), MemoryError> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(eid, _)| eid != id);
        if entries.len() == before {
            return Err(MemoryError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), MemoryError> {
        self.entries.write().clear();
        Ok(())
    }
}
