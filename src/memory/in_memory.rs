// src/memory/in_memory.rs
// Non-durable memory store scored by token overlap

use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::traits::{MemoryHit, MemoryId, MemoryStore, NewMemory};
use crate::Result;
use crate::features::text::{jaccard, words};

/// Queries shorter than this return no hits
const MIN_QUERY_CHARS: usize = 3;

struct StoredMemory {
    id: String,
    memory: NewMemory,
    tokens: HashSet<String>,
}

/// Process-local store. Similarity is Jaccard overlap of word sets, which is
/// enough to exercise the engine without an embedding backend.
#[derive(Default)]
pub struct InMemoryStore {
    memories: RwLock<Vec<StoredMemory>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.memories.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.memories.read().await.is_empty()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn search(
        &self,
        query: &str,
        limit: usize,
        similarity_threshold: f64,
    ) -> Result<Vec<MemoryHit>> {
        if query.trim().chars().count() < MIN_QUERY_CHARS || limit == 0 {
            return Ok(Vec::new());
        }

        let query_tokens: HashSet<String> = words(query).into_iter().collect();
        let memories = self.memories.read().await;

        let mut hits: Vec<MemoryHit> = memories
            .iter()
            .map(|m| (m, jaccard(&query_tokens, &m.tokens)))
            .filter(|(_, score)| *score > 0.0 && *score >= similarity_threshold)
            .map(|(m, score)| {
                let mut metadata = m.memory.metadata.clone();
                metadata.insert("id".into(), m.id.clone().into());
                metadata.insert("memory_type".into(), m.memory.memory_type.clone().into());
                MemoryHit {
                    content: m.memory.content.clone(),
                    similarity_score: score,
                    metadata,
                }
            })
            .collect();

        hits.sort_by(|a, b| b.similarity_score.total_cmp(&a.similarity_score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn create(&self, memory: NewMemory) -> Result<MemoryId> {
        let id = Uuid::new_v4().to_string();
        let tokens = words(&memory.content).into_iter().collect();
        self.memories.write().await.push(StoredMemory {
            id: id.clone(),
            memory,
            tokens,
        });
        Ok(MemoryId { id })
    }
}
