// src/rules/types.rs
// Rule definitions as they appear in configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::config::RuleOverride;
use crate::features::ContextIndicator;
use crate::types::Action;

fn default_true() -> bool {
    true
}

fn default_one() -> usize {
    1
}

fn default_action() -> Action {
    Action::SaveMemory
}

fn default_min_length() -> usize {
    20
}

fn default_max_results() -> usize {
    3
}

/// Condition a rule tests, with its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleKind {
    /// At least `min_matches` of the phrases occur in the message
    Keyword {
        keywords: Vec<String>,
        #[serde(default = "default_one")]
        min_matches: usize,
    },
    /// Any regex matches and, when listed, at least one context indicator holds
    Pattern {
        patterns: Vec<String>,
        #[serde(default)]
        required_context: Vec<ContextIndicator>,
    },
    /// The memory store already holds something close to this message
    SemanticSimilarity {
        #[serde(default = "default_min_length")]
        min_length: usize,
        similarity_threshold: f64,
        #[serde(default = "default_max_results")]
        max_results: usize,
    },
    /// Length bonus plus keyword bonus reaches `threshold`
    ImportanceThreshold {
        threshold: f64,
        /// Empty means the lexicon's importance terms
        #[serde(default)]
        keywords: Vec<String>,
        #[serde(default)]
        required_context: Vec<ContextIndicator>,
    },
    /// The window is long and substantive enough to be worth summarizing
    ConversationLength {
        min_messages: usize,
        min_avg_length: usize,
    },
    /// The user signals a new topic
    ContextChange { phrases: Vec<String> },
    /// Periodic recall once `interval_secs` passed since this rule last fired
    TimeBased {
        interval_secs: u64,
        min_messages: usize,
    },
}

impl RuleKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            RuleKind::Keyword { .. } => "keyword",
            RuleKind::Pattern { .. } => "pattern",
            RuleKind::SemanticSimilarity { .. } => "semantic_similarity",
            RuleKind::ImportanceThreshold { .. } => "importance_threshold",
            RuleKind::ConversationLength { .. } => "conversation_length",
            RuleKind::ContextChange { .. } => "context_change",
            RuleKind::TimeBased { .. } => "time_based",
        }
    }

    /// Kinds whose action is dictated by what they detect
    pub fn fixed_action(&self) -> Option<Action> {
        match self {
            RuleKind::SemanticSimilarity { .. }
            | RuleKind::ContextChange { .. }
            | RuleKind::TimeBased { .. } => Some(Action::SearchMemory),
            RuleKind::ImportanceThreshold { .. } => Some(Action::SaveMemory),
            _ => None,
        }
    }
}

/// A deterministic trigger rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub kind: RuleKind,
    #[serde(default = "default_action")]
    pub action: Action,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub cooldown_secs: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl TriggerRule {
    pub fn new(id: &str, name: &str, kind: RuleKind, action: Action) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            action,
            priority: 0,
            cooldown_secs: 0,
            enabled: true,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_cooldown(mut self, secs: u64) -> Self {
        self.cooldown_secs = secs;
        self
    }

    /// Action the rule proposes when it fires
    pub fn effective_action(&self) -> Action {
        self.kind.fixed_action().unwrap_or(self.action)
    }

    /// Cooldown between fires. Time-based rules never fire faster than their interval.
    pub fn cooldown(&self) -> Duration {
        match &self.kind {
            RuleKind::TimeBased { interval_secs, .. } => {
                Duration::from_secs(self.cooldown_secs.max(*interval_secs))
            }
            _ => Duration::from_secs(self.cooldown_secs),
        }
    }

    /// Apply a configuration override. `threshold` lands on whichever knob the
    /// kind uses as its threshold; kinds without one log and ignore it.
    pub fn apply_override(&mut self, ov: &RuleOverride) {
        if let Some(enabled) = ov.enabled {
            self.enabled = enabled;
        }
        if let Some(cooldown) = ov.cooldown_secs {
            self.cooldown_secs = cooldown;
        }
        if let Some(priority) = ov.priority {
            self.priority = priority;
        }
        let Some(threshold) = ov.threshold else {
            return;
        };
        match &mut self.kind {
            RuleKind::Keyword { min_matches, .. } => *min_matches = threshold.round().max(1.0) as usize,
            RuleKind::SemanticSimilarity {
                similarity_threshold,
                ..
            } => *similarity_threshold = threshold,
            RuleKind::ImportanceThreshold { threshold: t, .. } => *t = threshold,
            RuleKind::ConversationLength { min_messages, .. } => {
                *min_messages = threshold.round().max(1.0) as usize
            }
            RuleKind::TimeBased { min_messages, .. } => {
                *min_messages = threshold.round().max(1.0) as usize
            }
            RuleKind::Pattern { .. } | RuleKind::ContextChange { .. } => {
                warn!(rule = %self.id, "Rule kind has no threshold; override ignored");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_actions() {
        let rule = TriggerRule::new(
            "sim",
            "similar",
            RuleKind::SemanticSimilarity {
                min_length: 10,
                similarity_threshold: 0.8,
                max_results: 3,
            },
            Action::SaveMemory,
        );
        assert_eq!(rule.effective_action(), Action::SearchMemory);
    }

    #[test]
    fn test_time_based_cooldown_uses_interval() {
        let rule = TriggerRule::new(
            "tick",
            "tick",
            RuleKind::TimeBased {
                interval_secs: 600,
                min_messages: 2,
            },
            Action::SearchMemory,
        )
        .with_cooldown(30);
        assert_eq!(rule.cooldown(), Duration::from_secs(600));
    }

    #[test]
    fn test_override_threshold_mapping() {
        let mut rule = TriggerRule::new(
            "kw",
            "kw",
            RuleKind::Keyword {
                keywords: vec!["a".into()],
                min_matches: 1,
            },
            Action::SaveMemory,
        );
        rule.apply_override(&RuleOverride {
            enabled: Some(false),
            threshold: Some(2.0),
            cooldown_secs: Some(9),
            priority: Some(3),
        });
        assert!(!rule.enabled);
        assert_eq!(rule.cooldown_secs, 9);
        assert_eq!(rule.priority, 3);
        assert!(matches!(rule.kind, RuleKind::Keyword { min_matches: 2, .. }));
    }

    #[test]
    fn test_deserialize_defaults() {
        let json = r#"{"id":"x","kind":{"type":"context_change","phrases":["new topic"]}}"#;
        let rule: TriggerRule = serde_json::from_str(json).unwrap();
        assert!(rule.enabled);
        assert_eq!(rule.priority, 0);
        assert_eq!(rule.effective_action(), Action::SearchMemory);
    }
}
