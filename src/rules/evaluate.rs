// src/rules/evaluate.rs
// Condition checks and confidence for each rule kind

use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::types::{RuleKind, TriggerRule};
use crate::features::text::{extractive_summary, sentences_containing};
use crate::features::{ContextIndicator, Lexicon, TextProfile};
use crate::memory::{MemoryStore, bounded};
use crate::types::{ActionCandidate, ConversationWindow, Message};
use crate::Result;

/// Per-call inputs shared by every rule
pub(super) struct Subject<'a> {
    pub message: &'a Message,
    pub window: &'a ConversationWindow,
    pub profile: &'a TextProfile,
    pub lexicon: &'a Lexicon,
    pub store: Option<&'a Arc<dyn MemoryStore>>,
    pub memory_timeout: Duration,
}

fn candidate(rule: &TriggerRule, confidence: f64, payload: String, reasoning: String) -> ActionCandidate {
    ActionCandidate::from_rule(
        &rule.id,
        rule.priority,
        rule.effective_action(),
        confidence,
        payload,
        reasoning,
    )
    .with_meta("rule_type", rule.kind.type_name())
}

fn indicators_hold(subject: &Subject<'_>, required: &[ContextIndicator]) -> (bool, Vec<ContextIndicator>) {
    let present = subject.lexicon.indicators_present(subject.profile, required);
    (required.is_empty() || !present.is_empty(), present)
}

fn indicator_names(present: &[ContextIndicator]) -> Value {
    Value::Array(present.iter().map(|i| Value::from(i.as_str())).collect())
}

/// Importance score: length bonus plus 0.25 per keyword hit, clamped to [0,1]
pub(super) fn importance_score(char_len: usize, keyword_hits: usize) -> f64 {
    let length_bonus = match char_len {
        n if n > 500 => 0.3,
        n if n > 200 => 0.2,
        n if n > 50 => 0.1,
        _ => 0.0,
    };
    (length_bonus + 0.25 * keyword_hits as f64).clamp(0.0, 1.0)
}

/// Test one rule. `Ok(None)` means the condition did not hold.
pub(super) async fn evaluate(
    rule: &TriggerRule,
    patterns: &[Regex],
    subject: &Subject<'_>,
) -> Result<Option<ActionCandidate>> {
    let text = subject.message.text.as_str();

    match &rule.kind {
        RuleKind::Keyword {
            keywords,
            min_matches,
        } => {
            let matched = subject.profile.matching_terms(keywords);
            if matched.len() < *min_matches {
                return Ok(None);
            }
            let payload = sentences_containing(text, &matched).unwrap_or_else(|| text.to_string());
            let confidence = (0.5 + 0.15 * matched.len() as f64).min(0.95);
            let reasoning = format!("{}: matched {}", rule.name, matched.join(", "));
            let names: Vec<Value> = matched.iter().map(|k| Value::from(*k)).collect();
            Ok(Some(
                candidate(rule, confidence, payload, reasoning)
                    .with_meta("match_count", matched.len())
                    .with_meta("matched_keywords", Value::Array(names)),
            ))
        }

        RuleKind::Pattern {
            required_context, ..
        } => {
            let hits: Vec<&Regex> = patterns.iter().filter(|re| re.is_match(text)).collect();
            if hits.is_empty() {
                return Ok(None);
            }
            let (gate, present) = indicators_hold(subject, required_context);
            if !gate {
                return Ok(None);
            }
            let confidence =
                (0.7 + 0.05 * (hits.len() - 1) as f64 + 0.05 * present.len() as f64).min(0.95);
            let reasoning = format!("{}: {} pattern(s) matched", rule.name, hits.len());
            let matched: Vec<Value> = hits.iter().map(|re| Value::from(re.as_str())).collect();
            Ok(Some(
                candidate(rule, confidence, text.to_string(), reasoning)
                    .with_meta("matched_patterns", Value::Array(matched))
                    .with_meta("indicators", indicator_names(&present)),
            ))
        }

        RuleKind::SemanticSimilarity {
            min_length,
            similarity_threshold,
            max_results,
        } => {
            if subject.message.char_len() < *min_length {
                return Ok(None);
            }
            let Some(store) = subject.store else {
                return Ok(None);
            };
            let hits = bounded(
                "memory store",
                subject.memory_timeout,
                store.search(text, *max_results, *similarity_threshold),
            )
            .await?;
            let hits: Vec<_> = hits
                .into_iter()
                .filter(|h| h.similarity_score >= *similarity_threshold)
                .collect();
            let Some(top) = hits.first() else {
                return Ok(None);
            };
            let reasoning = format!(
                "{}: {} related memories (best {:.2})",
                rule.name,
                hits.len(),
                top.similarity_score
            );
            Ok(Some(
                candidate(rule, top.similarity_score, text.to_string(), reasoning)
                    .with_meta("results", hits.len()),
            ))
        }

        RuleKind::ImportanceThreshold {
            threshold,
            keywords,
            required_context,
        } => {
            let hits = if keywords.is_empty() {
                subject.lexicon.importance_hits(subject.profile)
            } else {
                subject.profile.matching_terms(keywords).len()
            };
            let score = importance_score(subject.message.char_len(), hits);
            if score < *threshold {
                return Ok(None);
            }
            let (gate, present) = indicators_hold(subject, required_context);
            if !gate {
                return Ok(None);
            }
            let reasoning = format!("{}: importance {:.2} >= {:.2}", rule.name, score, threshold);
            Ok(Some(
                candidate(rule, score, text.to_string(), reasoning)
                    .with_meta("importance", score)
                    .with_meta("indicators", indicator_names(&present)),
            ))
        }

        RuleKind::ConversationLength {
            min_messages,
            min_avg_length,
        } => {
            let count = subject.window.len();
            if count == 0 || count < *min_messages {
                return Ok(None);
            }
            let avg = subject.window.iter().map(|m| m.char_len()).sum::<usize>() / count;
            if avg < *min_avg_length {
                return Ok(None);
            }
            let fullness = (count as f64 / (2 * (*min_messages).max(1)) as f64).min(1.0);
            let confidence = 0.6 + 0.3 * fullness;
            let reasoning = format!("{}: {} messages, avg {} chars", rule.name, count, avg);
            Ok(Some(
                candidate(
                    rule,
                    confidence,
                    extractive_summary(&subject.window.joined_text()),
                    reasoning,
                )
                .with_meta("message_count", count)
                .with_meta("avg_length", avg),
            ))
        }

        RuleKind::ContextChange { phrases } => {
            let matched = subject.profile.matching_terms(phrases);
            let Some(first) = matched.first() else {
                return Ok(None);
            };
            let confidence = (0.7 + 0.1 * (matched.len() - 1) as f64).min(0.9);
            let reasoning = format!("{}: \"{}\"", rule.name, first);
            Ok(Some(
                candidate(rule, confidence, text.to_string(), reasoning)
                    .with_meta("phrase", *first),
            ))
        }

        RuleKind::TimeBased { min_messages, .. } => {
            // the interval itself is enforced through the rule's cooldown
            let count = subject.window.len();
            if count < *min_messages {
                return Ok(None);
            }
            let payload = subject
                .window
                .recent(3)
                .iter()
                .map(|m| m.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            let reasoning = format!("{}: periodic recall after {} messages", rule.name, count);
            Ok(Some(candidate(rule, 0.5, payload, reasoning)))
        }
    }
}
