//! Trigger engine - the entry point integrations call
//!
//! Runs the rule engine and the classifier for each message according to the
//! operating mode, arbitrates between them, and closes the loop with
//! recorded outcomes.
//!
//! - `user_context`: per-user rolling statistics
//! - `metrics`: counters and the serializable metrics snapshot

pub mod metrics;
pub mod user_context;

pub use metrics::{EngineMetrics, MetricsRecorder, SampleCounts};
pub use user_context::UserContextStore;

use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::arbiter::{self, Arbitration, OverrideThreshold, Winner};
use crate::classifier::{Classifier, ClassifierHost, Prediction};
use crate::config::EngineConfig;
use crate::error::{ErrorKind, TriggerError};
use crate::features::{Extraction, FeatureExtractor, Lexicon};
use crate::feedback::{FeedbackLearner, FeedbackRecord, FeedbackSink, JsonlFeedbackSink, ThresholdOptimization};
use crate::memory::{EmbeddingProvider, HttpEmbeddingProvider, MemoryStore};
use crate::rules::{RuleContext, RuleEngine, RuleEvaluation, RuleStatus, default_rules};
use crate::types::{
    Action, ActionCandidate, ConversationWindow, Decision, DecisionMethod, Feedback, Message,
    OperatingMode, Platform, RuleVerdict,
};
use crate::Result;

/// External services the engine may use. All optional.
#[derive(Default, Clone)]
pub struct Collaborators {
    pub store: Option<Arc<dyn MemoryStore>>,
    pub embedder: Option<Arc<dyn EmbeddingProvider>>,
    /// Overrides the HTTP host built from `classifier.host_url`
    pub classifier_host: Option<Arc<dyn ClassifierHost>>,
    pub feedback_sink: Option<Arc<dyn FeedbackSink>>,
}

impl Collaborators {
    /// HTTP embedding provider and JSONL feedback sink as configured
    pub fn from_config(config: &EngineConfig) -> Self {
        let embedder = config.embeddings.url.as_deref().map(|url| {
            Arc::new(HttpEmbeddingProvider::new(
                url,
                config.embeddings.model.clone(),
                config.embeddings.api_key.clone(),
            )) as Arc<dyn EmbeddingProvider>
        });
        let feedback_sink = config
            .feedback
            .sink_path
            .as_ref()
            .map(|path| Arc::new(JsonlFeedbackSink::new(path.clone())) as Arc<dyn FeedbackSink>);

        Self {
            store: None,
            embedder,
            classifier_host: None,
            feedback_sink,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn MemoryStore>) -> Self {
        self.store = Some(store);
        self
    }
}

/// Output of the classifier branch of one decision
struct ModelRun {
    extraction: Extraction,
    prediction: Option<Prediction>,
}

/// Decides SAVE / SEARCH / NONE for each message
pub struct TriggerEngine {
    mode: RwLock<OperatingMode>,
    platforms: Vec<Platform>,
    ema_alpha: f64,
    rules: RuleEngine,
    extractor: FeatureExtractor,
    classifier: Classifier,
    threshold: Arc<OverrideThreshold>,
    feedback: FeedbackLearner,
    users: UserContextStore,
    metrics: MetricsRecorder,
}

impl TriggerEngine {
    /// Build the engine. Invalid configuration is the only failure.
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Result<Self> {
        let validation = config.validate();
        for warning in &validation.warnings {
            warn!("Config: {}", warning);
        }
        if !validation.is_valid() {
            return Err(TriggerError::Config(validation.errors.join("; ")));
        }

        let lexicon = Arc::new(Lexicon::with_extensions(&config.features.lexicon));
        let rule_set = config.rules.clone().unwrap_or_else(default_rules);
        let rules = RuleEngine::new(
            rule_set,
            &config.rule_overrides,
            lexicon.clone(),
            collaborators.store.clone(),
            config.timeouts.memory_store(),
        )?;

        let extractor = FeatureExtractor::new(
            lexicon,
            collaborators.store.clone(),
            collaborators.embedder.clone(),
            &config.timeouts,
        );
        let classifier = Classifier::new(
            &config.classifier,
            collaborators.classifier_host.clone(),
            config.timeouts.classifier(),
        );
        let threshold = Arc::new(OverrideThreshold::new(
            config.arbiter.override_threshold,
            config.arbiter.effective_floor(),
        ));
        let feedback = FeedbackLearner::new(
            config.feedback.clone(),
            threshold.clone(),
            collaborators.feedback_sink.clone(),
            config.timeouts.feedback(),
        );

        info!(
            mode = %config.mode,
            rules = rules.rules().len(),
            classifier = classifier.active_strategy().as_str(),
            threshold = threshold.get(),
            "Trigger engine initialized"
        );

        Ok(Self {
            mode: RwLock::new(config.mode),
            platforms: config.platforms.clone(),
            ema_alpha: config.user_context.ema_alpha,
            rules,
            extractor,
            classifier,
            threshold,
            feedback,
            users: UserContextStore::new(),
            metrics: MetricsRecorder::new(),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Decisions
    // ═══════════════════════════════════════════════════════════════════════

    /// Decide what the memory subsystem should do with `message`. Never fails;
    /// collaborator errors are absorbed and counted.
    pub async fn decide(
        &self,
        message: &Message,
        window: &ConversationWindow,
        platform: Platform,
        user_id: &str,
    ) -> Decision {
        let decision = self.run_decision(message, window, platform, user_id).await;
        self.metrics.record_decision(&decision);
        debug!(
            decision = %decision.id,
            action = %decision.action,
            confidence = decision.confidence,
            method = %decision.method,
            "Decision made"
        );
        decision
    }

    /// `decide`, abandoned with a NONE decision if `cancel` fires first.
    /// In-flight collaborator calls are dropped with the decision future.
    /// Rules that already fired keep their cooldowns even though the
    /// cancelled decision never uses them.
    pub async fn decide_with_cancel(
        &self,
        message: &Message,
        window: &ConversationWindow,
        platform: Platform,
        user_id: &str,
        cancel: &CancellationToken,
    ) -> Decision {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let decision = Decision::none(DecisionMethod::Cancelled, self.mode(), user_id, "cancelled");
                self.metrics.record_decision(&decision);
                debug!(user = user_id, "Decision cancelled");
                decision
            }
            decision = self.decide(message, window, platform, user_id) => decision,
        }
    }

    async fn run_decision(
        &self,
        message: &Message,
        window: &ConversationWindow,
        platform: Platform,
        user_id: &str,
    ) -> Decision {
        let mode = self.mode();

        if !self.platform_allowed(platform) {
            return Decision::none(
                DecisionMethod::PlatformNotAllowed,
                mode,
                user_id,
                format!("platform {} is not allowed", platform),
            );
        }
        if message.text.trim().is_empty() {
            self.metrics.record_error_kind(ErrorKind::Validation);
            return Decision::none(DecisionMethod::EmptyInput, mode, user_id, "empty input");
        }
        if window.is_empty() {
            self.metrics.record_error_kind(ErrorKind::Validation);
            return Decision::none(DecisionMethod::EmptyHistory, mode, user_id, "empty conversation history");
        }

        let user = self.users.snapshot(user_id).await;
        let ctx = RuleContext {
            message,
            window,
            now: Instant::now(),
        };

        let rules_branch = async {
            if mode.runs_rules() {
                Some(self.rules.evaluate(&ctx).await)
            } else {
                None
            }
        };
        let model_branch = async {
            let extraction = self.extractor.extract(message, window, platform, &user).await;
            let prediction = if mode.runs_classifier() {
                Some(self.classifier.predict(&message.text, Some(&extraction.features)).await)
            } else {
                None
            };
            ModelRun {
                extraction,
                prediction,
            }
        };
        let (rule_eval, model_run) = tokio::join!(rules_branch, model_branch);

        self.count_errors(rule_eval.as_ref(), &model_run);

        let best_rule = rule_eval.as_ref().and_then(|e| e.best());
        let model_output = model_run.prediction.as_ref().map(|p| &p.output);
        let arbitration = arbiter::arbitrate(mode, best_rule, model_output, self.threshold.get());

        let rule_label = best_rule.map(|c| c.action).unwrap_or(Action::NoAction);
        if mode == OperatingMode::Learning {
            if let Some(output) = model_output
                && output.action != rule_label
            {
                info!(
                    rules = %rule_label,
                    model = %output.action,
                    model_confidence = output.confidence,
                    "Classifier diverged from rules"
                );
            }
            self.classifier.learn(model_run.extraction.features, rule_label, None);
        }

        let decision = assemble(
            mode,
            user_id,
            message,
            rule_eval.as_ref(),
            &model_run,
            &arbitration,
        );

        self.users
            .observe(user_id, decision.action, platform, self.ema_alpha)
            .await;
        decision
    }

    fn platform_allowed(&self, platform: Platform) -> bool {
        self.platforms.is_empty() || self.platforms.contains(&platform)
    }

    fn count_errors(&self, rule_eval: Option<&RuleEvaluation>, model_run: &ModelRun) {
        let rule_errors = rule_eval.map(|e| e.errors.iter()).into_iter().flatten();
        let model_error = model_run.prediction.as_ref().and_then(|p| p.error.as_ref());
        for error in rule_errors
            .chain(model_run.extraction.errors.iter())
            .chain(model_error)
        {
            self.metrics.record_error(error);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Feedback
    // ═══════════════════════════════════════════════════════════════════════

    /// Report what should have happened for `decision`. Feeds the threshold
    /// optimizer and, when features were computed, the classifier.
    /// LEARNING decisions were already buffered with the rule label by
    /// `decide`, so their outcome only reaches the optimizer.
    pub fn record_outcome(
        &self,
        decision: &Decision,
        actual: Action,
        feedback: Option<Feedback>,
    ) -> FeedbackRecord {
        self.metrics.record_outcome();
        let record = self.feedback.record(decision, actual, feedback.clone());
        if decision.mode != OperatingMode::Learning
            && let Some(features) = decision.features
        {
            self.classifier.learn(features, actual, feedback);
        }
        record
    }

    /// Run the threshold optimizer now
    pub fn optimize_threshold(&self) -> Result<ThresholdOptimization> {
        self.feedback.optimize_threshold().inspect_err(|e| {
            self.metrics.record_error(e);
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Runtime control
    // ═══════════════════════════════════════════════════════════════════════

    pub fn mode(&self) -> OperatingMode {
        self.mode.read().map(|m| *m).unwrap_or_default()
    }

    pub fn set_mode(&self, mode: OperatingMode) {
        let Ok(mut current) = self.mode.write() else {
            warn!("Mode lock poisoned, mode unchanged");
            return;
        };
        let previous = *current;
        if previous != mode {
            *current = mode;
            info!(from = %previous, to = %mode, "Operating mode switched");
            self.metrics.record_mode_switch();
        }
    }

    pub fn set_rule_enabled(&self, id: &str, enabled: bool) -> bool {
        self.rules.set_rule_enabled(id, enabled)
    }

    pub fn rules(&self) -> Vec<RuleStatus> {
        self.rules.rules()
    }

    pub fn override_threshold(&self) -> f64 {
        self.threshold.get()
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn feedback(&self) -> &FeedbackLearner {
        &self.feedback
    }

    pub fn user_context(&self) -> &UserContextStore {
        &self.users
    }

    pub fn metrics(&self) -> EngineMetrics {
        let classifier = self.classifier.stats();
        let mut error_counts = self.metrics.errors();
        let sink_failures = self.feedback.sink_failures();
        if sink_failures > 0 {
            *error_counts.entry(ErrorKind::ExternalDependency).or_insert(0) += sink_failures;
        }
        if classifier.retrains_failed > 0 {
            *error_counts.entry(ErrorKind::Learning).or_insert(0) += classifier.retrains_failed;
        }

        EngineMetrics {
            mode: self.mode(),
            mode_switch_count: self.metrics.mode_switches(),
            decisions_total: self.metrics.decisions(),
            decisions_by_method: self.metrics.by_method(),
            outcomes_recorded: self.metrics.outcomes(),
            accuracy: self.feedback.accuracy(),
            sample_counts: SampleCounts {
                feedback_history: self.feedback.len(),
                training_buffer: classifier.buffered_examples,
                retrains_completed: classifier.retrains_completed,
                users: self.users.len(),
            },
            error_counts,
            override_threshold: self.threshold.get(),
            threshold_floor: self.threshold.floor(),
            last_threshold_optimization: self.feedback.last_optimization(),
            classifier,
            uptime_secs: self.metrics.uptime_secs(),
        }
    }
}

/// Build the Decision: winning candidate first, reasoning from both
/// subsystems followed by the arbitration rationale.
fn assemble(
    mode: OperatingMode,
    user_id: &str,
    message: &Message,
    rule_eval: Option<&RuleEvaluation>,
    model_run: &ModelRun,
    arbitration: &Arbitration,
) -> Decision {
    let mut rule_candidates: Vec<ActionCandidate> =
        rule_eval.map(|e| e.candidates.clone()).unwrap_or_default();
    rule_candidates.sort_by(|a, b| {
        b.priority()
            .cmp(&a.priority())
            .then(b.confidence.total_cmp(&a.confidence))
    });

    let model_output = model_run.prediction.as_ref().map(|p| p.output.clone());
    let model_candidate = model_output
        .as_ref()
        .filter(|m| !m.action.is_none())
        .map(|m| m.to_candidate(&message.text));

    let mut candidates = Vec::with_capacity(rule_candidates.len() + 1);
    match arbitration.winner {
        Winner::Model => {
            candidates.extend(model_candidate);
            candidates.extend(rule_candidates);
        }
        Winner::Rules | Winner::Neither => {
            candidates.extend(rule_candidates);
            candidates.extend(model_candidate);
        }
    }

    let mut reasoning = Vec::new();
    if let Some(eval) = rule_eval {
        reasoning.extend(eval.reasoning.iter().map(|r| format!("rules: {}", r)));
    }
    for error in &model_run.extraction.errors {
        reasoning.push(format!("features: {} (fallback used)", error));
    }
    if let Some(output) = &model_output {
        reasoning.push(format!("model: {}", output.reasoning));
    }
    reasoning.push(arbitration.rationale.clone());

    let rule_output = rule_eval.map(|eval| match eval.best() {
        Some(best) => RuleVerdict {
            action: best.action,
            confidence: best.confidence,
        },
        None => RuleVerdict {
            action: Action::NoAction,
            confidence: 0.0,
        },
    });

    Decision {
        id: Uuid::new_v4(),
        action: arbitration.action,
        confidence: arbitration.confidence,
        method: arbitration.method,
        mode,
        candidates,
        reasoning,
        user_id: user_id.to_string(),
        rule_output,
        model_output,
        features: Some(model_run.extraction.features),
        timestamp: chrono::Utc::now(),
    }
}
