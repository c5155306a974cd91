//! Feedback loop
//!
//! Keeps a bounded history of decided-vs-actual outcomes, reports how often
//! each subsystem was right, and recalibrates the HYBRID override threshold.

pub mod sink;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::arbiter::OverrideThreshold;
use crate::config::FeedbackConfig;
use crate::error::TriggerError;
use crate::memory::bounded;
use crate::types::{
    Action, Decision, DecisionMethod, Feedback, OperatingMode, RuleVerdict, StrategyKind,
};
use crate::Result;

pub use sink::{FeedbackSink, JsonlFeedbackSink};

/// Classifier output as archived with an outcome
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelVerdict {
    pub action: Action,
    pub confidence: f64,
    pub strategy: StrategyKind,
    pub trainable: bool,
}

/// One decision and what actually should have happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub decision_id: Uuid,
    pub user_id: String,
    pub mode: OperatingMode,
    pub method: DecisionMethod,
    pub decided: Action,
    pub confidence: f64,
    pub actual: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_output: Option<RuleVerdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_output: Option<ModelVerdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
    pub recorded_at: DateTime<Utc>,
}

impl FeedbackRecord {
    pub fn new(decision: &Decision, actual: Action, feedback: Option<Feedback>) -> Self {
        Self {
            decision_id: decision.id,
            user_id: decision.user_id.clone(),
            mode: decision.mode,
            method: decision.method,
            decided: decision.action,
            confidence: decision.confidence,
            actual,
            rule_output: decision.rule_output,
            model_output: decision.model_output.as_ref().map(|m| ModelVerdict {
                action: m.action,
                confidence: m.confidence,
                strategy: m.strategy,
                trainable: m.trainable,
            }),
            feedback,
            recorded_at: Utc::now(),
        }
    }
}

/// Support and accuracy of one grid threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThresholdScore {
    pub threshold: f64,
    pub support: usize,
    pub accuracy: f64,
}

/// Result of one optimizer run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdOptimization {
    pub previous: f64,
    /// Set when a new threshold was adopted
    pub adopted: Option<f64>,
    pub samples: usize,
    pub scores: Vec<ThresholdScore>,
    pub ran_at: DateTime<Utc>,
}

/// How often each subsystem matched the actual action
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubsystemAccuracy {
    pub rules: Option<f64>,
    pub classifier: Option<f64>,
    pub final_decision: Option<f64>,
    pub rule_samples: usize,
    pub classifier_samples: usize,
    pub samples: usize,
}

fn ratio(hits: usize, total: usize) -> Option<f64> {
    (total > 0).then(|| hits as f64 / total as f64)
}

/// Score every grid threshold against HYBRID disagreements.
///
/// At threshold `t` the classifier would have overridden the rules whenever
/// its confidence exceeded both `t` and the rule confidence; accuracy is the
/// share of those overrides whose action matched the actual one.
/// Heuristic fallback outputs are skipped, as in `accuracy`.
pub fn score_thresholds(records: &[&FeedbackRecord], grid: &[f64]) -> Vec<ThresholdScore> {
    let disagreements: Vec<(&RuleVerdict, &ModelVerdict, Action)> = records
        .iter()
        .filter(|r| r.mode == OperatingMode::Hybrid && r.method.is_hybrid_disagreement())
        .filter_map(|r| Some((r.rule_output.as_ref()?, r.model_output.as_ref()?, r.actual)))
        .filter(|(_, model, _)| model.trainable)
        .collect();

    grid.iter()
        .map(|&threshold| {
            let overrides: Vec<_> = disagreements
                .iter()
                .filter(|(rule, model, _)| model.confidence > threshold && model.confidence > rule.confidence)
                .collect();
            let correct = overrides
                .iter()
                .filter(|(_, model, actual)| model.action == *actual)
                .count();
            ThresholdScore {
                threshold,
                support: overrides.len(),
                accuracy: ratio(correct, overrides.len()).unwrap_or(0.0),
            }
        })
        .collect()
}

struct History {
    records: VecDeque<FeedbackRecord>,
    since_optimize: usize,
}

/// Records outcomes and tunes the override threshold
pub struct FeedbackLearner {
    history: Mutex<History>,
    config: FeedbackConfig,
    threshold: Arc<OverrideThreshold>,
    last_optimization: Mutex<Option<ThresholdOptimization>>,
    sink: Option<Arc<dyn FeedbackSink>>,
    sink_timeout: Duration,
    sink_failures: Arc<AtomicU64>,
}

impl FeedbackLearner {
    pub fn new(
        config: FeedbackConfig,
        threshold: Arc<OverrideThreshold>,
        sink: Option<Arc<dyn FeedbackSink>>,
        sink_timeout: Duration,
    ) -> Self {
        Self {
            history: Mutex::new(History {
                records: VecDeque::with_capacity(config.history_capacity.min(4096)),
                since_optimize: 0,
            }),
            config,
            threshold,
            last_optimization: Mutex::new(None),
            sink,
            sink_timeout,
            sink_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Append an outcome. Runs the optimizer when the schedule says so.
    pub fn record(&self, decision: &Decision, actual: Action, feedback: Option<Feedback>) -> FeedbackRecord {
        let record = FeedbackRecord::new(decision, actual, feedback);

        let due = match self.history.lock() {
            Ok(mut history) => {
                if history.records.len() >= self.config.history_capacity.max(1) {
                    history.records.pop_front();
                }
                history.records.push_back(record.clone());
                history.since_optimize += 1;
                let due = self.config.optimize_every > 0
                    && history.since_optimize >= self.config.optimize_every;
                if due {
                    history.since_optimize = 0;
                }
                due
            }
            Err(_) => {
                warn!("Feedback history lock poisoned, outcome dropped");
                false
            }
        };

        self.persist(&record);

        if due {
            match self.optimize_threshold() {
                Ok(run) => debug!(adopted = ?run.adopted, "Scheduled threshold optimization"),
                Err(e) => debug!(error = %e, "Scheduled threshold optimization skipped"),
            }
        }
        record
    }

    /// Hand the record to the sink on a background task
    fn persist(&self, record: &FeedbackRecord) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No async runtime, feedback record not persisted");
            return;
        };
        let record = record.clone();
        let timeout = self.sink_timeout;
        let failures = self.sink_failures.clone();
        handle.spawn(async move {
            if let Err(e) = bounded("feedback sink", timeout, sink.write(&record)).await {
                failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, decision = %record.decision_id, "Feedback sink write failed");
            }
        });
    }

    /// Scan the grid and adopt the best supported threshold if it differs
    /// from the current one. Needs `min_samples` records.
    pub fn optimize_threshold(&self) -> Result<ThresholdOptimization> {
        let history = self
            .history
            .lock()
            .map_err(|_| TriggerError::Learning("feedback history lock poisoned".into()))?;
        let samples = history.records.len();
        if samples < self.config.min_samples {
            return Err(TriggerError::Learning(format!(
                "threshold optimization needs {} samples, have {}",
                self.config.min_samples, samples
            )));
        }

        let records: Vec<&FeedbackRecord> = history.records.iter().collect();
        let scores = score_thresholds(&records, &self.config.threshold_grid);
        drop(history);

        let floor = self.threshold.floor();
        let previous = self.threshold.get();

        let best = scores
            .iter()
            .filter(|s| s.threshold >= floor && s.support > self.config.min_threshold_support)
            .fold(None::<&ThresholdScore>, |best, s| match best {
                // ties go to the higher, more conservative threshold
                Some(b) if b.accuracy > s.accuracy || (b.accuracy == s.accuracy && b.threshold >= s.threshold) => Some(b),
                _ => Some(s),
            });

        let adopted = match best {
            Some(best) if (best.threshold - previous).abs() > 1e-9 => {
                let stored = self.threshold.set(best.threshold);
                info!(
                    previous,
                    adopted = stored,
                    accuracy = best.accuracy,
                    support = best.support,
                    "Override threshold recalibrated"
                );
                Some(stored)
            }
            Some(_) => {
                debug!(threshold = previous, "Current override threshold is already the best");
                None
            }
            None => {
                debug!("No grid threshold has enough support");
                None
            }
        };

        let run = ThresholdOptimization {
            previous,
            adopted,
            samples,
            scores,
            ran_at: Utc::now(),
        };
        if let Ok(mut last) = self.last_optimization.lock() {
            *last = Some(run.clone());
        }
        Ok(run)
    }

    /// Per-subsystem accuracy over the current history. Heuristic classifier
    /// outputs are not counted.
    pub fn accuracy(&self) -> SubsystemAccuracy {
        let Ok(history) = self.history.lock() else {
            return SubsystemAccuracy::default();
        };

        let mut acc = SubsystemAccuracy {
            samples: history.records.len(),
            ..SubsystemAccuracy::default()
        };
        let (mut rule_hits, mut model_hits, mut final_hits) = (0, 0, 0);

        for r in &history.records {
            if let Some(rule) = &r.rule_output {
                acc.rule_samples += 1;
                rule_hits += usize::from(rule.action == r.actual);
            }
            if let Some(model) = &r.model_output
                && model.trainable
            {
                acc.classifier_samples += 1;
                model_hits += usize::from(model.action == r.actual);
            }
            final_hits += usize::from(r.decided == r.actual);
        }

        acc.rules = ratio(rule_hits, acc.rule_samples);
        acc.classifier = ratio(model_hits, acc.classifier_samples);
        acc.final_decision = ratio(final_hits, acc.samples);
        acc
    }

    pub fn len(&self) -> usize {
        self.history.lock().map(|h| h.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last_optimization(&self) -> Option<ThresholdOptimization> {
        self.last_optimization.lock().ok().and_then(|l| l.clone())
    }

    pub fn sink_failures(&self) -> u64 {
        self.sink_failures.load(Ordering::Relaxed)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold.get()
    }
}
