// src/classifier/vector.rs
// Trainable vector strategy: two logistic regressions over the normalized feature vector

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::error::TriggerError;
use crate::features::{FEATURE_COUNT, FEATURE_VERSION, FeatureVector};
use crate::types::{Action, ActionScores, ClassifierOutput, StrategyKind};
use crate::Result;

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// One binary logistic-regression estimator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl Default for LogisticModel {
    fn default() -> Self {
        Self {
            weights: vec![0.0; FEATURE_COUNT],
            bias: 0.0,
        }
    }
}

impl LogisticModel {
    pub fn probability(&self, x: &[f64; FEATURE_COUNT]) -> f64 {
        let z: f64 = self.weights.iter().zip(x).map(|(w, v)| w * v).sum::<f64>() + self.bias;
        sigmoid(z)
    }

    /// Full-batch gradient descent, starting from the current weights
    pub fn fit(&mut self, xs: &[[f64; FEATURE_COUNT]], ys: &[f64], learning_rate: f64, epochs: usize) {
        if xs.is_empty() {
            return;
        }
        let n = xs.len() as f64;
        for _ in 0..epochs {
            let mut grad_w = [0.0; FEATURE_COUNT];
            let mut grad_b = 0.0;
            for (x, y) in xs.iter().zip(ys) {
                let err = self.probability(x) - y;
                for (g, v) in grad_w.iter_mut().zip(x) {
                    *g += err * v;
                }
                grad_b += err;
            }
            for (w, g) in self.weights.iter_mut().zip(grad_w) {
                *w -= learning_rate * g / n;
            }
            self.bias -= learning_rate * grad_b / n;
        }
    }
}

/// Serialized vector model, tagged with the feature layout it was trained on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorModel {
    pub feature_version: u32,
    pub save: LogisticModel,
    pub search: LogisticModel,
    pub trained_examples: usize,
    pub trained_at: Option<DateTime<Utc>>,
}

impl Default for VectorModel {
    fn default() -> Self {
        Self {
            feature_version: FEATURE_VERSION,
            save: LogisticModel::default(),
            search: LogisticModel::default(),
            trained_examples: 0,
            trained_at: None,
        }
    }
}

impl VectorModel {
    /// Probabilities (save, search) for a feature vector
    pub fn probabilities(&self, features: &FeatureVector) -> (f64, f64) {
        let x = features.normalized();
        (self.save.probability(&x), self.search.probability(&x))
    }

    /// SAVE above `save_threshold`, else SEARCH above `search_threshold`, else NONE
    pub fn decide(&self, features: &FeatureVector, save_threshold: f64, search_threshold: f64) -> (Action, f64) {
        let (p_save, p_search) = self.probabilities(features);
        if p_save > save_threshold {
            (Action::SaveMemory, p_save)
        } else if p_search > search_threshold {
            (Action::SearchMemory, p_search)
        } else {
            (Action::NoAction, 1.0 - p_save.max(p_search))
        }
    }

    pub fn predict(&self, features: &FeatureVector, save_threshold: f64, search_threshold: f64) -> ClassifierOutput {
        let (p_save, p_search) = self.probabilities(features);
        let (action, confidence) = self.decide(features, save_threshold, search_threshold);
        ClassifierOutput {
            action,
            confidence,
            scores: ActionScores {
                save: p_save,
                search: p_search,
                none: 1.0 - p_save.max(p_search),
            },
            strategy: StrategyKind::Vector,
            trainable: true,
            reasoning: format!(
                "vector model: p(save)={:.2}, p(search)={:.2}",
                p_save, p_search
            ),
            degraded: None,
        }
    }

    /// Load from JSON. A model trained on another feature layout is rejected.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let model: VectorModel = serde_json::from_str(&raw)?;
        if model.feature_version != FEATURE_VERSION {
            return Err(TriggerError::Config(format!(
                "model {} was trained on feature version {}, expected {}",
                path.display(),
                model.feature_version,
                FEATURE_VERSION
            )));
        }
        if model.save.weights.len() != FEATURE_COUNT || model.search.weights.len() != FEATURE_COUNT {
            return Err(TriggerError::Config(format!(
                "model {} has the wrong number of weights",
                path.display()
            )));
        }
        info!(path = %path.display(), examples = model.trained_examples, "Loaded vector model");
        Ok(model)
    }

    /// Write as JSON, replacing the file atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), "Saved vector model");
        Ok(())
    }
}
