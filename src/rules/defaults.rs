// src/rules/defaults.rs
// Built-in rule set used when the configuration does not supply one

use super::types::{RuleKind, TriggerRule};
use crate::features::ContextIndicator;
use crate::types::Action;

fn list(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Default rules, English and Italian
pub fn default_rules() -> Vec<TriggerRule> {
    vec![
        TriggerRule::new(
            "explicit_remember",
            "Explicit request to remember",
            RuleKind::Keyword {
                keywords: list(&[
                    "remember", "ricorda", "ricordati", "importante", "important",
                    "don't forget", "non dimenticare", "save this", "salva questo",
                    "memorize", "memorizza", "note that", "nota che", "keep in mind",
                    "tieni a mente",
                ]),
                min_matches: 1,
            },
            Action::SaveMemory,
        )
        .with_priority(100)
        .with_cooldown(30),
        TriggerRule::new(
            "recall_request",
            "Reference to earlier conversation",
            RuleKind::Keyword {
                keywords: list(&[
                    "do you remember", "ti ricordi", "what did we", "cosa abbiamo",
                    "last time", "l'altra volta", "previously", "earlier we",
                    "as we discussed", "come dicevamo", "we talked about",
                    "ne abbiamo parlato",
                ]),
                min_matches: 1,
            },
            Action::SearchMemory,
        )
        .with_priority(90)
        .with_cooldown(30),
        TriggerRule::new(
            "error_solution",
            "Solved problem",
            RuleKind::Pattern {
                patterns: list(&[
                    r"(?i)\b(fixed|solved|resolved|risolto)\b.{0,80}\b(by|with|using|con|usando)\b",
                    r"(?i)\b(the )?(solution|soluzione|workaround) (is|was|è|era)\b",
                ]),
                required_context: vec![ContextIndicator::Error, ContextIndicator::Solution],
            },
            Action::SaveMemory,
        )
        .with_priority(80)
        .with_cooldown(60),
        TriggerRule::new(
            "decision_made",
            "Decision recorded",
            RuleKind::Pattern {
                patterns: list(&[
                    r"(?i)\b(we|i) (have )?(decided|chose|agreed)\b",
                    r"(?i)\b(abbiamo|ho) (deciso|scelto)\b",
                    r"(?i)\bfrom now on\b|\bd'ora in poi\b",
                ]),
                required_context: Vec::new(),
            },
            Action::SaveMemory,
        )
        .with_priority(75)
        .with_cooldown(60),
        TriggerRule::new(
            "related_memory",
            "Similar memory exists",
            RuleKind::SemanticSimilarity {
                min_length: 30,
                similarity_threshold: 0.75,
                max_results: 3,
            },
            Action::SearchMemory,
        )
        .with_priority(60)
        .with_cooldown(120),
        TriggerRule::new(
            "important_content",
            "Important content",
            RuleKind::ImportanceThreshold {
                threshold: 0.7,
                keywords: Vec::new(),
                required_context: Vec::new(),
            },
            Action::SaveMemory,
        )
        .with_priority(50)
        .with_cooldown(300),
        TriggerRule::new(
            "topic_change",
            "New topic",
            RuleKind::ContextChange {
                phrases: list(&[
                    "new topic", "different question", "switching to", "let's talk about",
                    "by the way", "cambiando argomento", "altra domanda", "parliamo di",
                    "a proposito",
                ]),
            },
            Action::SearchMemory,
        )
        .with_priority(40)
        .with_cooldown(120),
        TriggerRule::new(
            "long_conversation",
            "Long conversation summary",
            RuleKind::ConversationLength {
                min_messages: 20,
                min_avg_length: 80,
            },
            Action::SaveMemory,
        )
        .with_priority(30)
        .with_cooldown(1800),
        TriggerRule::new(
            "periodic_recall",
            "Periodic recall",
            RuleKind::TimeBased {
                interval_secs: 900,
                min_messages: 10,
            },
            Action::SearchMemory,
        )
        .with_priority(10),
    ]
}
