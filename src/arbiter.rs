// src/arbiter.rs
// Reconciles rule-engine and classifier output into one action per mode

use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::HARD_THRESHOLD_FLOOR;
use crate::types::{
    Action, ActionCandidate, ClassifierOutput, DecisionMethod, OperatingMode, clamp_unit,
};

/// Which subsystem's candidate the final action came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    Rules,
    Model,
    Neither,
}

/// Outcome of arbitration
#[derive(Debug, Clone, PartialEq)]
pub struct Arbitration {
    pub action: Action,
    pub confidence: f64,
    pub method: DecisionMethod,
    pub winner: Winner,
    pub rationale: String,
}

impl Arbitration {
    fn none(method: DecisionMethod, rationale: impl Into<String>) -> Self {
        Self {
            action: Action::NoAction,
            confidence: 0.0,
            method,
            winner: Winner::Neither,
            rationale: rationale.into(),
        }
    }

    fn from_rule(c: &ActionCandidate, method: DecisionMethod, rationale: String) -> Self {
        Self {
            action: c.action,
            confidence: clamp_unit(c.confidence),
            method,
            winner: Winner::Rules,
            rationale,
        }
    }

    fn from_model(m: &ClassifierOutput, method: DecisionMethod, rationale: String) -> Self {
        Self {
            action: m.action,
            confidence: clamp_unit(m.confidence),
            method,
            winner: Winner::Model,
            rationale,
        }
    }
}

/// Pick the final action for `mode`.
///
/// `rule` is the rule engine's best candidate and `model` the classifier's
/// output; either is `None` when that subsystem did not run or produced
/// nothing. In HYBRID a classifier NO_ACTION counts as no candidate.
pub fn arbitrate(
    mode: OperatingMode,
    rule: Option<&ActionCandidate>,
    model: Option<&ClassifierOutput>,
    override_threshold: f64,
) -> Arbitration {
    match mode {
        OperatingMode::RulesOnly => match rule {
            Some(r) => Arbitration::from_rule(
                r,
                DecisionMethod::RulesOnly,
                format!("rules only: {} at {:.2}", r.action, r.confidence),
            ),
            None => Arbitration::none(DecisionMethod::RulesOnly, "rules only: no rule fired"),
        },

        OperatingMode::ModelOnly => match model {
            Some(m) => Arbitration::from_model(
                m,
                DecisionMethod::ModelOnly,
                format!("model only: {} at {:.2}", m.action, m.confidence),
            ),
            None => Arbitration::none(DecisionMethod::ModelOnly, "model only: no prediction"),
        },

        // rules are ground truth; the classifier is only observed
        OperatingMode::Learning => match rule {
            Some(r) => Arbitration::from_rule(
                r,
                DecisionMethod::Learning,
                format!("learning: rule label {} at {:.2}", r.action, r.confidence),
            ),
            None => Arbitration::none(DecisionMethod::Learning, "learning: no rule fired, label NO_ACTION"),
        },

        OperatingMode::Hybrid => {
            let model = model.filter(|m| !m.action.is_none());
            match (rule, model) {
                (Some(r), Some(m)) if r.action == m.action => Arbitration {
                    action: r.action,
                    confidence: clamp_unit((r.confidence + m.confidence) / 2.0),
                    method: DecisionMethod::Agreement,
                    winner: Winner::Rules,
                    rationale: format!(
                        "agreement on {}: rules {:.2}, model {:.2}",
                        r.action, r.confidence, m.confidence
                    ),
                },
                (Some(r), Some(m)) => {
                    if m.confidence > override_threshold && m.confidence > r.confidence {
                        Arbitration::from_model(
                            m,
                            DecisionMethod::MlOverride,
                            format!(
                                "model {} at {:.2} overrides rules {} at {:.2} (threshold {:.2})",
                                m.action, m.confidence, r.action, r.confidence, override_threshold
                            ),
                        )
                    } else {
                        Arbitration::from_rule(
                            r,
                            DecisionMethod::RulesPreferred,
                            format!(
                                "rules {} at {:.2} kept over model {} at {:.2} (threshold {:.2})",
                                r.action, r.confidence, m.action, m.confidence, override_threshold
                            ),
                        )
                    }
                }
                (Some(r), None) => Arbitration::from_rule(
                    r,
                    DecisionMethod::RulesSingleSource,
                    format!("only rules proposed {} at {:.2}", r.action, r.confidence),
                ),
                (None, Some(m)) => Arbitration::from_model(
                    m,
                    DecisionMethod::ModelSingleSource,
                    format!("only the model proposed {} at {:.2}", m.action, m.confidence),
                ),
                (None, None) => Arbitration::none(DecisionMethod::NoCandidates, "no candidates"),
            }
        }
    }
}

/// Override threshold shared by the engine and the feedback learner.
/// Stored as f64 bits; never set below the floor.
#[derive(Debug)]
pub struct OverrideThreshold {
    bits: AtomicU64,
    floor: f64,
}

impl OverrideThreshold {
    pub fn new(initial: f64, floor: f64) -> Self {
        let floor = floor.max(HARD_THRESHOLD_FLOOR);
        Self {
            bits: AtomicU64::new(initial.clamp(floor, 1.0).to_bits()),
            floor,
        }
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Store `value`, raised to the floor if needed; returns what was stored
    pub fn set(&self, value: f64) -> f64 {
        let value = value.clamp(self.floor, 1.0);
        self.bits.store(value.to_bits(), Ordering::Release);
        value
    }

    pub fn floor(&self) -> f64 {
        self.floor
    }
}
