// src/config/mod.rs
// Engine configuration: TOML file, then environment overrides, then validation

mod env;
mod file;

pub use env::{apply_env_overrides, apply_overrides_from};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::features::LexiconExtensions;
use crate::rules::TriggerRule;
use crate::types::{OperatingMode, Platform, StrategyKind};

/// The override threshold can never be configured or optimized below this
pub const HARD_THRESHOLD_FLOOR: f64 = 0.5;

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub mode: OperatingMode,
    pub log_level: String,
    pub arbiter: ArbiterConfig,
    pub classifier: ClassifierConfig,
    pub feedback: FeedbackConfig,
    pub features: FeaturesConfig,
    pub embeddings: EmbeddingsConfig,
    pub timeouts: TimeoutConfig,
    pub user_context: UserContextConfig,
    /// Platforms the engine answers for; empty means all
    pub platforms: Vec<Platform>,
    /// Full rule list; the built-in set is used when absent
    pub rules: Option<Vec<TriggerRule>>,
    /// Per-rule tweaks applied on top of `rules` (or the built-in set)
    pub rule_overrides: HashMap<String, RuleOverride>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: OperatingMode::Hybrid,
            log_level: "info".to_string(),
            arbiter: ArbiterConfig::default(),
            classifier: ClassifierConfig::default(),
            feedback: FeedbackConfig::default(),
            features: FeaturesConfig::default(),
            embeddings: EmbeddingsConfig::default(),
            timeouts: TimeoutConfig::default(),
            user_context: UserContextConfig::default(),
            platforms: Vec::new(),
            rules: None,
            rule_overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    /// Classifier confidence needed to overrule a disagreeing rule engine
    pub override_threshold: f64,
    /// Lowest threshold the optimizer may adopt (never below `HARD_THRESHOLD_FLOOR`)
    pub threshold_floor: f64,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            override_threshold: 0.7,
            threshold_floor: HARD_THRESHOLD_FLOOR,
        }
    }
}

impl ArbiterConfig {
    pub fn effective_floor(&self) -> f64 {
        self.threshold_floor.max(HARD_THRESHOLD_FLOOR)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub strategy: StrategyKind,
    /// Vector strategy: save probability must exceed this to predict SAVE
    pub save_threshold: f64,
    /// Vector strategy: search probability must exceed this to predict SEARCH
    pub search_threshold: f64,
    /// Serialized vector model; loaded at startup, rewritten after retrains
    pub model_path: Option<PathBuf>,
    /// Text strategy: inference endpoint of the hosted 3-class model
    pub host_url: Option<String>,
    pub host_token: Option<String>,
    /// Bound on buffered training examples
    pub buffer_capacity: usize,
    /// Retrain after this many new examples (K)
    pub retrain_batch_size: usize,
    pub learning_rate: f64,
    pub epochs: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Vector,
            save_threshold: 0.7,
            search_threshold: 0.6,
            model_path: None,
            host_url: None,
            host_token: None,
            buffer_capacity: 5000,
            retrain_batch_size: 50,
            learning_rate: 0.5,
            epochs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub history_capacity: usize,
    /// History size needed before the threshold optimizer runs
    pub min_samples: usize,
    /// A grid threshold must be backed by more than this many overrides
    pub min_threshold_support: usize,
    pub threshold_grid: Vec<f64>,
    /// Run the optimizer after this many recorded outcomes; 0 disables the schedule
    pub optimize_every: usize,
    /// Append every feedback record to this JSON Lines file
    pub sink_path: Option<PathBuf>,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            history_capacity: 1000,
            min_samples: 50,
            min_threshold_support: 10,
            threshold_grid: vec![0.5, 0.6, 0.7, 0.8, 0.9],
            optimize_every: 100,
            sink_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    pub lexicon: LexiconExtensions,
}

/// Remote embedding provider; disabled unless `url` is set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingsConfig {
    pub url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
}

/// Deadlines for every collaborator call, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub embedding_ms: u64,
    pub memory_store_ms: u64,
    pub classifier_ms: u64,
    pub feedback_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            embedding_ms: 2000,
            memory_store_ms: 2000,
            classifier_ms: 3000,
            feedback_ms: 2000,
        }
    }
}

impl TimeoutConfig {
    pub fn embedding(&self) -> Duration {
        Duration::from_millis(self.embedding_ms)
    }

    pub fn memory_store(&self) -> Duration {
        Duration::from_millis(self.memory_store_ms)
    }

    pub fn classifier(&self) -> Duration {
        Duration::from_millis(self.classifier_ms)
    }

    pub fn feedback(&self) -> Duration {
        Duration::from_millis(self.feedback_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserContextConfig {
    /// Weight of the newest observation in the moving averages
    pub ema_alpha: f64,
}

impl Default for UserContextConfig {
    fn default() -> Self {
        Self { ema_alpha: 0.1 }
    }
}

/// Per-rule tweaks. `threshold` maps onto the rule kind's own threshold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleOverride {
    pub enabled: Option<bool>,
    pub threshold: Option<f64>,
    pub cooldown_secs: Option<u64>,
    pub priority: Option<i32>,
}

/// Configuration validation result
#[derive(Debug, Default)]
pub struct ConfigValidation {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ConfigValidation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// Format as a human-readable report
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        if !self.errors.is_empty() {
            lines.push("Errors:".to_string());
            for err in &self.errors {
                lines.push(format!("  - {}", err));
            }
        }

        if !self.warnings.is_empty() {
            lines.push("Warnings:".to_string());
            for warn in &self.warnings {
                lines.push(format!("  - {}", warn));
            }
        }

        if lines.is_empty() {
            "Configuration OK".to_string()
        } else {
            lines.join("\n")
        }
    }
}

fn check_unit(validation: &mut ConfigValidation, name: &str, value: f64) {
    if !(0.0..=1.0).contains(&value) {
        validation.add_error(format!("{} must be within [0,1], got {}", name, value));
    }
}

impl EngineConfig {
    /// Check every option; errors here abort engine construction
    pub fn validate(&self) -> ConfigValidation {
        let mut v = ConfigValidation::new();

        check_unit(&mut v, "arbiter.override_threshold", self.arbiter.override_threshold);
        check_unit(&mut v, "arbiter.threshold_floor", self.arbiter.threshold_floor);
        if self.arbiter.override_threshold < self.arbiter.effective_floor() {
            v.add_error(format!(
                "arbiter.override_threshold {} is below the floor {}",
                self.arbiter.override_threshold,
                self.arbiter.effective_floor()
            ));
        }
        if self.arbiter.threshold_floor < HARD_THRESHOLD_FLOOR {
            v.add_warning(format!(
                "arbiter.threshold_floor {} raised to {}",
                self.arbiter.threshold_floor, HARD_THRESHOLD_FLOOR
            ));
        }

        check_unit(&mut v, "classifier.save_threshold", self.classifier.save_threshold);
        check_unit(&mut v, "classifier.search_threshold", self.classifier.search_threshold);
        if self.classifier.retrain_batch_size == 0 {
            v.add_error("classifier.retrain_batch_size must be at least 1");
        }
        if self.classifier.buffer_capacity < self.classifier.retrain_batch_size {
            v.add_error("classifier.buffer_capacity must be >= retrain_batch_size");
        }
        if self.classifier.learning_rate <= 0.0 || self.classifier.epochs == 0 {
            v.add_error("classifier.learning_rate and classifier.epochs must be positive");
        }
        if self.classifier.strategy == StrategyKind::Text && self.classifier.host_url.is_none() {
            v.add_warning("classifier.strategy = text without host_url; heuristic fallback will answer");
        }
        if self.classifier.strategy == StrategyKind::Vector && self.classifier.model_path.is_none() {
            v.add_warning("classifier.model_path not set; heuristic fallback until the first retrain");
        }

        if self.feedback.history_capacity == 0 {
            v.add_error("feedback.history_capacity must be at least 1");
        }
        if self.feedback.min_samples > self.feedback.history_capacity {
            v.add_warning("feedback.min_samples exceeds history_capacity; optimizer will never run");
        }
        if self.feedback.threshold_grid.is_empty() {
            v.add_warning("feedback.threshold_grid is empty; optimizer disabled");
        }
        for t in &self.feedback.threshold_grid {
            check_unit(&mut v, "feedback.threshold_grid value", *t);
        }

        check_unit(&mut v, "user_context.ema_alpha", self.user_context.ema_alpha);

        let t = &self.timeouts;
        if t.embedding_ms == 0 || t.memory_store_ms == 0 || t.classifier_ms == 0 || t.feedback_ms == 0 {
            v.add_error("timeouts must be greater than zero");
        }

        for (id, ov) in &self.rule_overrides {
            if let Some(threshold) = ov.threshold
                && threshold < 0.0
            {
                v.add_error(format!("rule_overrides.{}.threshold must not be negative", id));
            }
        }

        v
    }
}
