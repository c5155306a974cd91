// src/features/mod.rs
// Feature extraction: message + context -> fixed-shape numeric vector

pub mod lexicon;
pub mod text;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::TimeoutConfig;
use crate::error::TriggerError;
use crate::memory::{EmbeddingProvider, MemoryStore, bounded};
use crate::types::{ConversationWindow, Message, Platform, UserContext};

pub use lexicon::{ContextIndicator, Lexicon, LexiconExtensions};
pub use text::TextProfile;

/// Bump whenever a field is added, removed or reordered. Serialized models
/// carry the version they were trained against.
pub const FEATURE_VERSION: u32 = 1;

/// Number of fields in a `FeatureVector`
pub const FEATURE_COUNT: usize = 19;

/// Field names in vector order
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "message_length",
    "word_count",
    "sentence_count",
    "semantic_density",
    "technical_score",
    "question_score",
    "solution_score",
    "position_in_conversation",
    "recency_minutes",
    "engagement",
    "similarity_to_existing",
    "novelty",
    "importance_indicators",
    "platform_code",
    "session_length",
    "user_save_frequency",
    "user_search_frequency",
    "topic_coherence",
    "contains_code",
];

/// Recency is capped at one day
pub const MAX_RECENCY_MINUTES: f64 = 1440.0;

/// Fixed, ordered numeric encoding of one message in its context
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub message_length: f64,
    pub word_count: f64,
    pub sentence_count: f64,
    pub semantic_density: f64,
    pub technical_score: f64,
    pub question_score: f64,
    pub solution_score: f64,
    pub position_in_conversation: f64,
    pub recency_minutes: f64,
    pub engagement: f64,
    pub similarity_to_existing: f64,
    pub novelty: f64,
    pub importance_indicators: f64,
    pub platform_code: f64,
    pub session_length: f64,
    pub user_save_frequency: f64,
    pub user_search_frequency: f64,
    pub topic_coherence: f64,
    pub contains_code: f64,
}

impl FeatureVector {
    /// Raw values in `FEATURE_NAMES` order
    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.message_length,
            self.word_count,
            self.sentence_count,
            self.semantic_density,
            self.technical_score,
            self.question_score,
            self.solution_score,
            self.position_in_conversation,
            self.recency_minutes,
            self.engagement,
            self.similarity_to_existing,
            self.novelty,
            self.importance_indicators,
            self.platform_code,
            self.session_length,
            self.user_save_frequency,
            self.user_search_frequency,
            self.topic_coherence,
            self.contains_code,
        ]
    }

    /// Every field squashed into [0,1], the input the vector model trains on
    pub fn normalized(&self) -> [f64; FEATURE_COUNT] {
        let scale = |v: f64, max: f64| (v / max).clamp(0.0, 1.0);
        [
            scale(self.message_length, 2000.0),
            scale(self.word_count, 300.0),
            scale(self.sentence_count, 20.0),
            // embedding component variance is tiny; lexical-diversity fallback is already a ratio
            if self.semantic_density > 1.0 { 1.0 } else { self.semantic_density.max(0.0) },
            self.technical_score,
            self.question_score,
            self.solution_score,
            scale(self.position_in_conversation, 50.0),
            scale(self.recency_minutes, MAX_RECENCY_MINUTES),
            self.engagement,
            self.similarity_to_existing,
            self.novelty,
            scale(self.importance_indicators, 5.0),
            self.platform_code,
            scale(self.session_length, 50.0),
            self.user_save_frequency,
            self.user_search_frequency,
            ((self.topic_coherence + 1.0) / 2.0).clamp(0.0, 1.0),
            self.contains_code,
        ]
    }
}

/// Output of one extraction, with any collaborator failures that were absorbed
#[derive(Debug)]
pub struct Extraction {
    pub features: FeatureVector,
    pub errors: Vec<TriggerError>,
}

/// Builds feature vectors. Collaborators are optional; every lookup has a fallback.
pub struct FeatureExtractor {
    lexicon: Arc<Lexicon>,
    store: Option<Arc<dyn MemoryStore>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    memory_timeout: Duration,
    embedding_timeout: Duration,
}

impl FeatureExtractor {
    pub fn new(
        lexicon: Arc<Lexicon>,
        store: Option<Arc<dyn MemoryStore>>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        timeouts: &TimeoutConfig,
    ) -> Self {
        Self {
            lexicon,
            store,
            embedder,
            memory_timeout: timeouts.memory_store(),
            embedding_timeout: timeouts.embedding(),
        }
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    /// Compute the feature vector for `message`. Never fails: collaborator
    /// errors are returned alongside the vector and replaced by fallbacks.
    pub async fn extract(
        &self,
        message: &Message,
        history: &ConversationWindow,
        platform: Platform,
        user: &UserContext,
    ) -> Extraction {
        let profile = TextProfile::new(&message.text);
        let prior = history.prior_to(message);
        let mut errors = Vec::new();

        let history_text = prior
            .iter()
            .rev()
            .take(3)
            .rev()
            .map(|m| m.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let (similarity, current_embedding, history_embedding) = tokio::join!(
            self.top_similarity(&message.text),
            self.embed(&message.text),
            async {
                if history_text.is_empty() {
                    Ok(None)
                } else {
                    self.embed(&history_text).await
                }
            }
        );

        let similarity_to_existing = match similarity {
            Ok(score) => score,
            Err(e) => {
                warn!(error = %e, "Similarity lookup failed, assuming no similar memories");
                errors.push(e);
                0.0
            }
        };

        let current_embedding = current_embedding.unwrap_or_else(|e| {
            warn!(error = %e, "Embedding failed, using lexical fallbacks");
            errors.push(e);
            None
        });
        let history_embedding = history_embedding.unwrap_or_else(|e| {
            debug!(error = %e, "History embedding failed");
            errors.push(e);
            None
        });

        let semantic_density = match &current_embedding {
            Some(embedding) if !embedding.is_empty() => text::variance(embedding),
            _ => profile.lexical_diversity(),
        };

        // 1.0 without history or without both embeddings
        let topic_coherence = match (&current_embedding, &history_embedding) {
            (Some(a), Some(b)) if !prior.is_empty() => text::cosine_similarity(a, b),
            _ => 1.0,
        };

        let recency_minutes = prior
            .last()
            .map(|prev| {
                let minutes = (message.timestamp - prev.timestamp).num_seconds() as f64 / 60.0;
                minutes.clamp(0.0, MAX_RECENCY_MINUTES)
            })
            .unwrap_or(0.0);

        let engagement = {
            let recent: Vec<&&Message> = prior.iter().rev().take(5).collect();
            if recent.is_empty() {
                0.0
            } else {
                let avg = recent.iter().map(|m| m.char_len()).sum::<usize>() as f64
                    / recent.len() as f64;
                (avg / 500.0).min(1.0)
            }
        };

        let features = FeatureVector {
            message_length: message.char_len() as f64,
            word_count: profile.words.len() as f64,
            sentence_count: text::sentences(&message.text).len() as f64,
            semantic_density,
            technical_score: self.lexicon.technical_score(&profile),
            question_score: self.lexicon.question_score(&profile),
            solution_score: self.lexicon.solution_score(&profile),
            position_in_conversation: prior.len() as f64,
            recency_minutes,
            engagement,
            similarity_to_existing,
            novelty: 1.0 - similarity_to_existing,
            importance_indicators: self.lexicon.importance_hits(&profile) as f64,
            platform_code: platform.code(),
            session_length: history.len() as f64,
            user_save_frequency: user.save_frequency,
            user_search_frequency: user.search_frequency,
            topic_coherence,
            contains_code: if text::contains_code(&message.text) { 1.0 } else { 0.0 },
        };

        debug!(
            words = features.word_count,
            similarity = features.similarity_to_existing,
            coherence = features.topic_coherence,
            fallbacks = errors.len(),
            "Extracted features"
        );

        Extraction { features, errors }
    }

    async fn top_similarity(&self, text: &str) -> crate::Result<f64> {
        let Some(store) = &self.store else {
            return Ok(0.0);
        };
        let hits = bounded("memory store", self.memory_timeout, store.search(text, 1, 0.0)).await?;
        Ok(hits
            .first()
            .map(|h| h.similarity_score.clamp(0.0, 1.0))
            .unwrap_or(0.0))
    }

    async fn embed(&self, text: &str) -> crate::Result<Option<Vec<f32>>> {
        let Some(embedder) = &self.embedder else {
            return Ok(None);
        };
        bounded("embedding", self.embedding_timeout, embedder.embed(text))
            .await
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryStore, NewMemory};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};

    struct BrokenEmbedder;

    #[async_trait]
    impl EmbeddingProvider for BrokenEmbedder {
        async fn embed(&self, _text: &str) -> crate::Result<Vec<f32>> {
            Err(TriggerError::Embedding("provider offline".into()))
        }
    }

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, text: &str) -> crate::Result<Vec<f32>> {
            if text.contains("rust") {
                Ok(vec![1.0, 0.0, 0.0, 1.0])
            } else {
                Ok(vec![0.0, 1.0, 0.0, 0.0])
            }
        }
    }

    fn extractor(
        store: Option<Arc<dyn MemoryStore>>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
    ) -> FeatureExtractor {
        FeatureExtractor::new(
            Arc::new(Lexicon::default()),
            store,
            embedder,
            &TimeoutConfig::default(),
        )
    }

    #[test]
    fn test_shape_is_fixed() {
        let v = FeatureVector::default();
        assert_eq!(v.to_array().len(), FEATURE_COUNT);
        assert_eq!(FEATURE_NAMES.len(), FEATURE_COUNT);
        assert!(v.normalized().iter().all(|x| (0.0..=1.0).contains(x)));
    }

    #[tokio::test]
    async fn test_no_collaborators_uses_fallbacks() {
        let message = Message::user("How do I configure the database cache?");
        let window = ConversationWindow::from_messages(vec![message.clone()]);
        let out = extractor(None, None)
            .extract(&message, &window, Platform::Cli, &UserContext::default())
            .await;

        assert!(out.errors.is_empty());
        let f = out.features;
        assert_eq!(f.similarity_to_existing, 0.0);
        assert_eq!(f.novelty, 1.0);
        assert_eq!(f.topic_coherence, 1.0);
        assert_eq!(f.recency_minutes, 0.0);
        assert_eq!(f.position_in_conversation, 0.0);
        assert_eq!(f.session_length, 1.0);
        assert!((f.semantic_density - 1.0).abs() < 1e-9);
        assert!(f.question_score > 0.0);
        assert!(f.technical_score > 0.0);
    }

    #[tokio::test]
    async fn test_embedding_failure_is_absorbed() {
        let message = Message::user("note note note");
        let window = ConversationWindow::from_messages(vec![message.clone()]);
        let out = extractor(None, Some(Arc::new(BrokenEmbedder)))
            .extract(&message, &window, Platform::Cli, &UserContext::default())
            .await;

        assert_eq!(out.errors.len(), 1);
        assert!((out.features.semantic_density - 1.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_similarity_and_novelty() {
        let store = Arc::new(InMemoryStore::new());
        store
            .create(NewMemory::new("deploy uses docker compose on staging", 0.5, "fact"))
            .await
            .unwrap();

        let message = Message::user("deploy uses docker compose on staging");
        let window = ConversationWindow::from_messages(vec![message.clone()]);
        let out = extractor(Some(store), None)
            .extract(&message, &window, Platform::Cli, &UserContext::default())
            .await;

        assert!((out.features.similarity_to_existing - 1.0).abs() < 1e-9);
        assert!(out.features.novelty.abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_history_features() {
        let now = Utc::now();
        let earlier = Message::user("we talked about rust lifetimes")
            .with_timestamp(now - ChronoDuration::minutes(30));
        let current = Message::user("more rust please").with_timestamp(now);
        let window = ConversationWindow::from_messages(vec![earlier, current.clone()]);

        let out = extractor(None, Some(Arc::new(FixedEmbedder)))
            .extract(&current, &window, Platform::ClaudeCode, &UserContext::default())
            .await;

        let f = out.features;
        assert!((f.recency_minutes - 30.0).abs() < 1e-6);
        assert!((f.topic_coherence - 1.0).abs() < 1e-9);
        assert_eq!(f.position_in_conversation, 1.0);
        assert!(f.engagement > 0.0);
        assert_eq!(f.platform_code, 0.0);
    }

    #[tokio::test]
    async fn test_recency_is_capped() {
        let now = Utc::now();
        let old = Message::user("old").with_timestamp(now - ChronoDuration::days(3));
        let current = Message::user("new").with_timestamp(now);
        let window = ConversationWindow::from_messages(vec![old, current.clone()]);
        let out = extractor(None, None)
            .extract(&current, &window, Platform::Cli, &UserContext::default())
            .await;
        assert_eq!(out.features.recency_minutes, MAX_RECENCY_MINUTES);
        // no embedder: coherence is neutral
        assert_eq!(out.features.topic_coherence, 1.0);
    }
}
