//! Memory collaborators
//!
//! - `traits`: store and embedding contracts the engine consumes
//! - `in_memory`: non-durable store for the CLI and tests
//! - `embeddings`: OpenAI-compatible HTTP embedding provider

pub mod embeddings;
pub mod in_memory;
pub mod traits;

use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::TriggerError;
use crate::types::{Action, Decision};
use crate::Result;

pub use embeddings::HttpEmbeddingProvider;
pub use in_memory::InMemoryStore;
pub use traits::{EmbeddingProvider, MemoryHit, MemoryId, MemoryStore, NewMemory};

/// Run a collaborator call with a hard deadline. Elapsed deadlines become
/// `TriggerError::Timeout` so callers can fall back like any other failure.
pub(crate) async fn bounded<T, F>(service: &'static str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(TriggerError::Timeout {
            service,
            timeout_ms: limit.as_millis() as u64,
        }),
    }
}

/// What happened when a decision was carried out against a store
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Saved(MemoryId),
    Found(Vec<MemoryHit>),
    Skipped,
}

/// Execute a decision against `store`. The engine never does this itself;
/// integrations that have no executor of their own can use it.
pub async fn apply_decision(
    store: &dyn MemoryStore,
    decision: &Decision,
    search_limit: usize,
) -> Result<Applied> {
    let payload = decision
        .primary_candidate()
        .map(|c| c.payload.clone())
        .unwrap_or_default();

    match decision.action {
        Action::SaveMemory if !payload.trim().is_empty() => {
            let mut memory = NewMemory::new(payload, decision.confidence, "conversation");
            memory
                .metadata
                .insert("decision_id".into(), decision.id.to_string().into());
            memory
                .metadata
                .insert("method".into(), decision.method.as_str().into());
            let id = store.create(memory).await?;
            info!(memory_id = %id.id, "Saved memory");
            Ok(Applied::Saved(id))
        }
        Action::SearchMemory if !payload.trim().is_empty() => {
            let hits = store.search(&payload, search_limit, 0.0).await?;
            debug!(hits = hits.len(), "Searched memory");
            Ok(Applied::Found(hits))
        }
        _ => Ok(Applied::Skipped),
    }
}
