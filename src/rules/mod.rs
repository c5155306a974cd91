//! Deterministic trigger rules
//!
//! - `types`: rule definitions as configured
//! - `defaults`: built-in bilingual rule set
//! - `cooldown`: per-(rule, action) cooldown clocks
//! - `evaluate`: condition checks per rule kind
//!
//! Every enabled rule is evaluated on every call, highest priority first.
//! A rule that fails is logged and counted as not fired; it never stops the
//! remaining rules.

pub mod cooldown;
pub mod defaults;
mod evaluate;
pub mod types;

use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::RuleOverride;
use crate::error::TriggerError;
use crate::features::{Lexicon, TextProfile};
use crate::memory::MemoryStore;
use crate::types::{ActionCandidate, ConversationWindow, Message};
use crate::Result;

pub use cooldown::{CooldownKey, CooldownTracker, RuleState};
pub use defaults::default_rules;
pub use types::{RuleKind, TriggerRule};

use evaluate::Subject;

/// A rule validated and ready to evaluate
struct CompiledRule {
    rule: TriggerRule,
    patterns: Vec<Regex>,
    enabled: AtomicBool,
}

impl CompiledRule {
    fn compile(rule: TriggerRule) -> Result<Self> {
        let invalid = |msg: String| TriggerError::Config(format!("rule '{}': {}", rule.id, msg));

        if rule.id.trim().is_empty() {
            return Err(TriggerError::Config("rule with empty id".into()));
        }

        let mut patterns = Vec::new();
        match &rule.kind {
            RuleKind::Keyword {
                keywords,
                min_matches,
            } => {
                if keywords.iter().all(|k| k.trim().is_empty()) {
                    return Err(invalid("keyword list is empty".into()));
                }
                if *min_matches == 0 {
                    return Err(invalid("min_matches must be at least 1".into()));
                }
            }
            RuleKind::Pattern { patterns: raw, .. } => {
                if raw.is_empty() {
                    return Err(invalid("pattern list is empty".into()));
                }
                for p in raw {
                    let re = Regex::new(p).map_err(|e| invalid(format!("invalid regex: {}", e)))?;
                    patterns.push(re);
                }
            }
            RuleKind::SemanticSimilarity {
                similarity_threshold,
                max_results,
                ..
            } => {
                check_unit(*similarity_threshold).map_err(invalid)?;
                if *max_results == 0 {
                    return Err(invalid("max_results must be at least 1".into()));
                }
            }
            RuleKind::ImportanceThreshold { threshold, .. } => {
                check_unit(*threshold).map_err(invalid)?;
            }
            RuleKind::ConversationLength { min_messages, .. } => {
                if *min_messages == 0 {
                    return Err(invalid("min_messages must be at least 1".into()));
                }
            }
            RuleKind::ContextChange { phrases } => {
                if phrases.iter().all(|p| p.trim().is_empty()) {
                    return Err(invalid("phrase list is empty".into()));
                }
            }
            RuleKind::TimeBased { interval_secs, .. } => {
                if *interval_secs == 0 {
                    return Err(invalid("interval_secs must be greater than zero".into()));
                }
            }
        }

        let enabled = AtomicBool::new(rule.enabled);
        Ok(Self {
            rule,
            patterns,
            enabled,
        })
    }

    fn key(&self) -> CooldownKey {
        CooldownKey::new(&self.rule.id, self.rule.effective_action())
    }
}

fn check_unit(value: f64) -> std::result::Result<(), String> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(format!("threshold {} outside [0,1]", value))
    }
}

/// Inputs for one evaluation pass
pub struct RuleContext<'a> {
    pub message: &'a Message,
    pub window: &'a ConversationWindow,
    pub now: Instant,
}

/// Result of one evaluation pass
#[derive(Debug, Default)]
pub struct RuleEvaluation {
    /// Fired candidates in evaluation (priority) order
    pub candidates: Vec<ActionCandidate>,
    pub reasoning: Vec<String>,
    /// Failures absorbed while evaluating
    pub errors: Vec<TriggerError>,
}

impl RuleEvaluation {
    /// Highest-priority candidate; ties go to the higher confidence
    pub fn best(&self) -> Option<&ActionCandidate> {
        self.candidates.iter().reduce(|best, c| {
            let better = c.priority() > best.priority()
                || (c.priority() == best.priority() && c.confidence > best.confidence);
            if better { c } else { best }
        })
    }
}

/// Snapshot of a rule for listings
#[derive(Debug, Clone, Serialize)]
pub struct RuleStatus {
    pub id: String,
    pub name: String,
    pub kind: &'static str,
    pub action: crate::types::Action,
    pub priority: i32,
    pub cooldown_secs: u64,
    pub enabled: bool,
    pub state: RuleState,
}

/// Evaluates the configured rules against each message
pub struct RuleEngine {
    rules: Vec<CompiledRule>,
    cooldowns: CooldownTracker,
    lexicon: Arc<Lexicon>,
    store: Option<Arc<dyn MemoryStore>>,
    memory_timeout: Duration,
}

impl RuleEngine {
    /// Compile `rules` with `overrides` applied. Invalid rules, duplicate ids
    /// and overrides naming unknown rules are configuration errors.
    pub fn new(
        rules: Vec<TriggerRule>,
        overrides: &HashMap<String, RuleOverride>,
        lexicon: Arc<Lexicon>,
        store: Option<Arc<dyn MemoryStore>>,
        memory_timeout: Duration,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut compiled = Vec::with_capacity(rules.len());

        for mut rule in rules {
            if !seen.insert(rule.id.clone()) {
                return Err(TriggerError::Config(format!("duplicate rule id '{}'", rule.id)));
            }
            if let Some(ov) = overrides.get(&rule.id) {
                rule.apply_override(ov);
            }
            compiled.push(CompiledRule::compile(rule)?);
        }

        if let Some(unknown) = overrides.keys().find(|id| !seen.contains(*id)) {
            return Err(TriggerError::Config(format!(
                "rule_overrides names unknown rule '{}'",
                unknown
            )));
        }

        // stable: equal priorities keep configuration order
        compiled.sort_by(|a, b| b.rule.priority.cmp(&a.rule.priority));

        debug!(rules = compiled.len(), "Rule engine ready");
        Ok(Self {
            rules: compiled,
            cooldowns: CooldownTracker::new(),
            lexicon,
            store,
            memory_timeout,
        })
    }

    /// Evaluate every enabled rule. Never fails; rule errors are collected.
    pub async fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleEvaluation {
        let mut out = RuleEvaluation::default();
        let profile = TextProfile::new(&ctx.message.text);
        let subject = Subject {
            message: ctx.message,
            window: ctx.window,
            profile: &profile,
            lexicon: &self.lexicon,
            store: self.store.as_ref(),
            memory_timeout: self.memory_timeout,
        };

        for compiled in &self.rules {
            if !compiled.enabled.load(Ordering::Relaxed) {
                continue;
            }
            let rule = &compiled.rule;
            let key = compiled.key();
            let cooldown = rule.cooldown();

            if let Some(left) = self.cooldowns.remaining(&key, cooldown, ctx.now) {
                debug!(rule = %rule.id, remaining_secs = left.as_secs(), "Rule cooling down");
                continue;
            }

            match evaluate::evaluate(rule, &compiled.patterns, &subject).await {
                Ok(Some(candidate)) => {
                    // a concurrent call may have claimed the clock meanwhile
                    if self.cooldowns.try_fire(&key, cooldown, ctx.now) {
                        debug!(
                            rule = %rule.id,
                            action = %candidate.action,
                            confidence = candidate.confidence,
                            "Rule fired"
                        );
                        out.reasoning.push(candidate.reasoning.clone());
                        out.candidates.push(candidate);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(rule = %rule.id, error = %e, "Rule evaluation failed, treating as not fired");
                    out.reasoning.push(format!("{}: evaluation failed ({})", rule.name, e));
                    out.errors.push(e);
                }
            }
        }

        if out.candidates.is_empty() {
            out.reasoning.push("no rule fired".to_string());
        }
        out
    }

    /// Enable or disable a rule at runtime. Returns false for unknown ids.
    pub fn set_rule_enabled(&self, id: &str, enabled: bool) -> bool {
        match self.rules.iter().find(|r| r.rule.id == id) {
            Some(r) => {
                r.enabled.store(enabled, Ordering::Relaxed);
                debug!(rule = id, enabled, "Rule toggled");
                true
            }
            None => false,
        }
    }

    /// Rules in evaluation order with their current state
    pub fn rules(&self) -> Vec<RuleStatus> {
        let now = Instant::now();
        self.rules
            .iter()
            .map(|c| RuleStatus {
                id: c.rule.id.clone(),
                name: c.rule.name.clone(),
                kind: c.rule.kind.type_name(),
                action: c.rule.effective_action(),
                priority: c.rule.priority,
                cooldown_secs: c.rule.cooldown().as_secs(),
                enabled: c.enabled.load(Ordering::Relaxed),
                state: self.cooldowns.state(&c.key(), c.rule.cooldown(), now),
            })
            .collect()
    }

    pub fn reset_cooldowns(&self) {
        self.cooldowns.reset();
    }
}
