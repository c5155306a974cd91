// src/types.rs
// Core data model shared by the rule engine, classifier, arbiter and feedback loop

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::features::FeatureVector;

/// What the memory subsystem should do with a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    SaveMemory,
    SearchMemory,
    NoAction,
}

impl Action {
    pub const ALL: [Action; 3] = [Action::SaveMemory, Action::SearchMemory, Action::NoAction];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::SaveMemory => "SAVE_MEMORY",
            Action::SearchMemory => "SEARCH_MEMORY",
            Action::NoAction => "NO_ACTION",
        }
    }

    /// Parse a classifier label. Accepts the canonical names plus the short
    /// forms hosted models tend to emit ("save", "search", "none").
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "save_memory" | "save" => Some(Action::SaveMemory),
            "search_memory" | "search" | "retrieve" => Some(Action::SearchMemory),
            "no_action" | "none" | "noop" => Some(Action::NoAction),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Action::NoAction)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::from_label(s).ok_or_else(|| format!("unknown action: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Client integration a message arrived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    ClaudeCode,
    Cursor,
    Windsurf,
    Vscode,
    ChatGpt,
    Api,
    Cli,
    #[default]
    Unknown,
}

impl Platform {
    const ORDERED: [Platform; 8] = [
        Platform::ClaudeCode,
        Platform::Cursor,
        Platform::Windsurf,
        Platform::Vscode,
        Platform::ChatGpt,
        Platform::Api,
        Platform::Cli,
        Platform::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::ClaudeCode => "claude_code",
            Platform::Cursor => "cursor",
            Platform::Windsurf => "windsurf",
            Platform::Vscode => "vscode",
            Platform::ChatGpt => "chat_gpt",
            Platform::Api => "api",
            Platform::Cli => "cli",
            Platform::Unknown => "unknown",
        }
    }

    /// Stable ordinal scaled into [0,1]. Part of the feature vector shape.
    pub fn code(&self) -> f64 {
        let idx = Self::ORDERED.iter().position(|p| p == self).unwrap_or(7);
        idx as f64 / (Self::ORDERED.len() - 1) as f64
    }

    /// Lenient lookup; unrecognized names map to `Unknown`
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "claude_code" | "claude" => Platform::ClaudeCode,
            "cursor" => Platform::Cursor,
            "windsurf" => Platform::Windsurf,
            "vscode" | "vs_code" => Platform::Vscode,
            "chat_gpt" | "chatgpt" => Platform::ChatGpt,
            "api" => Platform::Api,
            "cli" => Platform::Cli,
            _ => Platform::Unknown,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional editor/client context attached to a message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

/// A single conversational message. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub role: Role,
    pub text: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub context: MessageContext,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text: text.into(),
            timestamp: Utc::now(),
            context: MessageContext::default(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_context(mut self, context: MessageContext) -> Self {
        self.context = context;
        self
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Default number of messages a window keeps
pub const DEFAULT_WINDOW_CAPACITY: usize = 50;

/// Bounded, ordered conversation history. The caller owns and appends to it;
/// the engine only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationWindow {
    messages: VecDeque<Message>,
    capacity: usize,
}

impl Default for ConversationWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}

impl ConversationWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            messages: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn from_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        let mut window = Self::default();
        for message in messages {
            window.push(message);
        }
        window
    }

    /// Append a message, evicting the oldest one when full
    pub fn push(&mut self, message: Message) {
        if self.messages.len() == self.capacity {
            self.messages.pop_front();
        }
        self.messages.push_back(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.back()
    }

    /// Messages that precede `message`. If the message is not in the window,
    /// the whole window counts as prior history.
    pub fn prior_to(&self, message: &Message) -> Vec<&Message> {
        match self.messages.iter().position(|m| m.id == message.id) {
            Some(idx) => self.messages.iter().take(idx).collect(),
            None => self.messages.iter().collect(),
        }
    }

    /// Up to `n` most recent messages, oldest first
    pub fn recent(&self, n: usize) -> Vec<&Message> {
        let skip = self.messages.len().saturating_sub(n);
        self.messages.iter().skip(skip).collect()
    }

    /// Whole window joined with newlines
    pub fn joined_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Which classifier strategy produced an output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Vector,
    Text,
    Heuristic,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Vector => "vector",
            StrategyKind::Text => "text",
            StrategyKind::Heuristic => "heuristic",
        }
    }
}

/// Where a candidate came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CandidateSource {
    Rule { rule_id: String, priority: i32 },
    Classifier { strategy: StrategyKind },
}

/// An unarbitrated proposal from a rule or the classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionCandidate {
    pub action: Action,
    pub confidence: f64,
    /// Content to save, or the query to search with
    pub payload: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub reasoning: String,
    pub source: CandidateSource,
}

impl ActionCandidate {
    pub fn from_rule(
        rule_id: &str,
        priority: i32,
        action: Action,
        confidence: f64,
        payload: impl Into<String>,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            action,
            confidence: clamp_unit(confidence),
            payload: payload.into(),
            metadata: serde_json::Map::new(),
            reasoning: reasoning.into(),
            source: CandidateSource::Rule {
                rule_id: rule_id.to_string(),
                priority,
            },
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn rule_id(&self) -> Option<&str> {
        match &self.source {
            CandidateSource::Rule { rule_id, .. } => Some(rule_id),
            CandidateSource::Classifier { .. } => None,
        }
    }

    /// Rule priority; classifier candidates sort last
    pub fn priority(&self) -> i32 {
        match &self.source {
            CandidateSource::Rule { priority, .. } => *priority,
            CandidateSource::Classifier { .. } => i32::MIN,
        }
    }
}

/// Per-class scores reported alongside a classifier output
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionScores {
    pub save: f64,
    pub search: f64,
    pub none: f64,
}

/// Result of one `Classifier::predict` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierOutput {
    pub action: Action,
    pub confidence: f64,
    pub scores: ActionScores,
    pub strategy: StrategyKind,
    /// False for the heuristic fallback: its output must never be used as a label
    pub trainable: bool,
    pub reasoning: String,
    /// Set when the configured strategy failed and a fallback answered instead
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

impl ClassifierOutput {
    pub fn to_candidate(&self, payload: &str) -> ActionCandidate {
        ActionCandidate {
            action: self.action,
            confidence: clamp_unit(self.confidence),
            payload: payload.to_string(),
            metadata: serde_json::Map::new(),
            reasoning: self.reasoning.clone(),
            source: CandidateSource::Classifier {
                strategy: self.strategy,
            },
        }
    }
}

/// Process-wide operating mode of the arbiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperatingMode {
    RulesOnly,
    ModelOnly,
    #[default]
    Hybrid,
    Learning,
}

impl OperatingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingMode::RulesOnly => "RULES_ONLY",
            OperatingMode::ModelOnly => "MODEL_ONLY",
            OperatingMode::Hybrid => "HYBRID",
            OperatingMode::Learning => "LEARNING",
        }
    }

    pub fn runs_rules(&self) -> bool {
        !matches!(self, OperatingMode::ModelOnly)
    }

    pub fn runs_classifier(&self) -> bool {
        !matches!(self, OperatingMode::RulesOnly)
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "rules_only" | "rules" => Ok(OperatingMode::RulesOnly),
            "model_only" | "model" | "ml" => Ok(OperatingMode::ModelOnly),
            "hybrid" => Ok(OperatingMode::Hybrid),
            "learning" => Ok(OperatingMode::Learning),
            other => Err(format!("unknown operating mode: {}", other)),
        }
    }
}

/// How the final action was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionMethod {
    RulesOnly,
    ModelOnly,
    Learning,
    Agreement,
    MlOverride,
    RulesPreferred,
    RulesSingleSource,
    ModelSingleSource,
    NoCandidates,
    EmptyInput,
    EmptyHistory,
    PlatformNotAllowed,
    Cancelled,
}

impl DecisionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionMethod::RulesOnly => "rules_only",
            DecisionMethod::ModelOnly => "model_only",
            DecisionMethod::Learning => "learning",
            DecisionMethod::Agreement => "agreement",
            DecisionMethod::MlOverride => "ml_override",
            DecisionMethod::RulesPreferred => "rules_preferred",
            DecisionMethod::RulesSingleSource => "rules_single_source",
            DecisionMethod::ModelSingleSource => "model_single_source",
            DecisionMethod::NoCandidates => "no_candidates",
            DecisionMethod::EmptyInput => "empty_input",
            DecisionMethod::EmptyHistory => "empty_history",
            DecisionMethod::PlatformNotAllowed => "platform_not_allowed",
            DecisionMethod::Cancelled => "cancelled",
        }
    }

    /// Methods reached when the rule engine and classifier disagreed in HYBRID mode
    pub fn is_hybrid_disagreement(&self) -> bool {
        matches!(self, DecisionMethod::MlOverride | DecisionMethod::RulesPreferred)
    }
}

impl fmt::Display for DecisionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action + confidence reported by the rule engine for one decision
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuleVerdict {
    pub action: Action,
    pub confidence: f64,
}

/// Final arbitrated output of one `decide()` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: Uuid,
    pub action: Action,
    pub confidence: f64,
    pub method: DecisionMethod,
    pub mode: OperatingMode,
    pub candidates: Vec<ActionCandidate>,
    pub reasoning: Vec<String>,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_output: Option<RuleVerdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_output: Option<ClassifierOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<FeatureVector>,
    pub timestamp: DateTime<Utc>,
}

impl Decision {
    /// A NO_ACTION decision with zero confidence
    pub fn none(
        method: DecisionMethod,
        mode: OperatingMode,
        user_id: &str,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action: Action::NoAction,
            confidence: 0.0,
            method,
            mode,
            candidates: Vec::new(),
            reasoning: vec![reason.into()],
            user_id: user_id.to_string(),
            rule_output: None,
            model_output: None,
            features: None,
            timestamp: Utc::now(),
        }
    }

    /// Candidate whose payload should be used when executing the action
    pub fn primary_candidate(&self) -> Option<&ActionCandidate> {
        self.candidates.iter().find(|c| c.action == self.action)
    }
}

/// Optional caller feedback attached to an outcome
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helpful: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Rolling per-user statistics, updated after each decision
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub save_frequency: f64,
    pub search_frequency: f64,
    pub total_interactions: u64,
    #[serde(default)]
    pub preferences: HashMap<String, u64>,
}

impl UserContext {
    /// Fold one decided action into the moving averages
    pub fn observe(&mut self, action: Action, platform: Platform, alpha: f64) {
        let alpha = clamp_unit(alpha);
        let saved = if action == Action::SaveMemory { 1.0 } else { 0.0 };
        let searched = if action == Action::SearchMemory { 1.0 } else { 0.0 };

        self.save_frequency = clamp_unit((1.0 - alpha) * self.save_frequency + alpha * saved);
        self.search_frequency =
            clamp_unit((1.0 - alpha) * self.search_frequency + alpha * searched);
        self.total_interactions += 1;

        *self
            .preferences
            .entry(format!("action:{}", action.as_str()))
            .or_insert(0) += 1;
        *self
            .preferences
            .entry(format!("platform:{}", platform.as_str()))
            .or_insert(0) += 1;
    }
}

/// Clamp into [0,1]; NaN becomes 0
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_labels() {
        assert_eq!(Action::from_label("SAVE_MEMORY"), Some(Action::SaveMemory));
        assert_eq!(Action::from_label("search"), Some(Action::SearchMemory));
        assert_eq!(Action::from_label("no-action"), Some(Action::NoAction));
        assert_eq!(Action::from_label("LABEL_7"), None);
    }

    #[test]
    fn test_action_serde_names() {
        let json = serde_json::to_string(&Action::SearchMemory).unwrap();
        assert_eq!(json, "\"SEARCH_MEMORY\"");
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("rules-only".parse::<OperatingMode>(), Ok(OperatingMode::RulesOnly));
        assert_eq!("HYBRID".parse::<OperatingMode>(), Ok(OperatingMode::Hybrid));
        assert!("sometimes".parse::<OperatingMode>().is_err());
    }

    #[test]
    fn test_platform_codes_in_unit_range() {
        for p in Platform::ORDERED {
            let code = p.code();
            assert!((0.0..=1.0).contains(&code));
        }
        assert_eq!(Platform::ClaudeCode.code(), 0.0);
        assert_eq!(Platform::Unknown.code(), 1.0);
        assert_eq!(Platform::from_name("VS-Code"), Platform::Vscode);
        assert_eq!(Platform::from_name("emacs"), Platform::Unknown);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut window = ConversationWindow::new(2);
        window.push(Message::user("one"));
        window.push(Message::user("two"));
        window.push(Message::user("three"));
        assert_eq!(window.len(), 2);
        assert_eq!(window.iter().next().map(|m| m.text.as_str()), Some("two"));
    }

    #[test]
    fn test_prior_to() {
        let first = Message::user("first");
        let second = Message::assistant("second");
        let third = Message::user("third");
        let window =
            ConversationWindow::from_messages(vec![first.clone(), second.clone(), third.clone()]);

        assert_eq!(window.prior_to(&third).len(), 2);
        assert_eq!(window.prior_to(&first).len(), 0);

        let outside = Message::user("not in window");
        assert_eq!(window.prior_to(&outside).len(), 3);
    }

    #[test]
    fn test_recent() {
        let window = ConversationWindow::from_messages(
            (0..6).map(|i| Message::user(format!("m{}", i))),
        );
        let recent: Vec<_> = window.recent(3).iter().map(|m| m.text.clone()).collect();
        assert_eq!(recent, vec!["m3", "m4", "m5"]);
    }

    #[test]
    fn test_user_context_ema() {
        let mut ctx = UserContext::default();
        ctx.observe(Action::SaveMemory, Platform::Cli, 0.5);
        assert!((ctx.save_frequency - 0.5).abs() < 1e-9);
        ctx.observe(Action::SearchMemory, Platform::Cli, 0.5);
        assert!((ctx.save_frequency - 0.25).abs() < 1e-9);
        assert!((ctx.search_frequency - 0.5).abs() < 1e-9);
        assert_eq!(ctx.total_interactions, 2);
        assert_eq!(ctx.preferences.get("platform:cli"), Some(&2));
    }

    #[test]
    fn test_user_context_stays_clamped() {
        let mut ctx = UserContext::default();
        for _ in 0..100 {
            ctx.observe(Action::SaveMemory, Platform::Api, 5.0);
        }
        assert!(ctx.save_frequency <= 1.0);
        assert!(ctx.search_frequency >= 0.0);
    }

    #[test]
    fn test_clamp_unit_nan() {
        assert_eq!(clamp_unit(f64::NAN), 0.0);
        assert_eq!(clamp_unit(1.7), 1.0);
        assert_eq!(clamp_unit(-0.2), 0.0);
    }

    #[test]
    fn test_decision_none() {
        let d = Decision::none(DecisionMethod::EmptyInput, OperatingMode::Hybrid, "u1", "empty input");
        assert_eq!(d.action, Action::NoAction);
        assert_eq!(d.confidence, 0.0);
        assert_eq!(d.reasoning, vec!["empty input".to_string()]);
        assert!(d.primary_candidate().is_none());
    }
}
