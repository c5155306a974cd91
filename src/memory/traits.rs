// src/memory/traits.rs

//! Collaborator contracts consumed by the engine: the memory store that holds
//! long-term memories and the provider that turns text into embeddings.
//! The engine never persists anything itself; these are injected by the caller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// One nearest-neighbor result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryHit {
    pub content: String,
    pub similarity_score: f64,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// A memory the caller wants created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMemory {
    pub content: String,
    pub importance: f64,
    pub memory_type: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl NewMemory {
    pub fn new(content: impl Into<String>, importance: f64, memory_type: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            importance,
            memory_type: memory_type.into(),
            metadata: serde_json::Map::new(),
        }
    }
}

/// Identifier returned by `MemoryStore::create`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryId {
    pub id: String,
}

/// Long-term memory backend
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Nearest neighbors of `query` scoring at or above `similarity_threshold`.
    /// Empty or very short queries yield an empty list, not an error.
    async fn search(
        &self,
        query: &str,
        limit: usize,
        similarity_threshold: f64,
    ) -> Result<Vec<MemoryHit>>;

    /// Persist a new memory
    async fn create(&self, memory: NewMemory) -> Result<MemoryId>;
}

/// Text embedding backend. Identical input yields identical output within a
/// session; failures surface as `TriggerError::Embedding`.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}
