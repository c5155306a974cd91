// src/classifier/training.rs
// Online training buffer and the retrain routine for the vector strategy

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::Write;
use std::path::Path;

use super::vector::VectorModel;
use crate::error::TriggerError;
use crate::features::{FEATURE_COUNT, FeatureVector};
use crate::types::{Action, Feedback};
use crate::Result;

/// Fewer examples than this cannot produce a meaningful holdout
pub const MIN_TRAINING_EXAMPLES: usize = 10;

/// Share of examples held out for evaluation
const HOLDOUT_RATIO: f64 = 0.2;

/// Fixed seed so holdout splits are reproducible
const SPLIT_SEED: u64 = 0x5eed_7261;

/// One labeled example
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub features: FeatureVector,
    pub label: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
    pub recorded_at: DateTime<Utc>,
}

impl TrainingExample {
    pub fn new(features: FeatureVector, label: Action, feedback: Option<Feedback>) -> Self {
        Self {
            features,
            label,
            feedback,
            recorded_at: Utc::now(),
        }
    }
}

/// Bounded, append-only example buffer. The oldest examples drop off when full.
#[derive(Debug)]
pub struct TrainingBuffer {
    examples: VecDeque<TrainingExample>,
    capacity: usize,
    since_retrain: usize,
}

impl TrainingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            examples: VecDeque::new(),
            capacity: capacity.max(1),
            since_retrain: 0,
        }
    }

    /// Append and return how many examples arrived since the last retrain
    pub fn push(&mut self, example: TrainingExample) -> usize {
        if self.examples.len() == self.capacity {
            self.examples.pop_front();
        }
        self.examples.push_back(example);
        self.since_retrain += 1;
        self.since_retrain
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn since_retrain(&self) -> usize {
        self.since_retrain
    }

    /// Copy of the buffer, and reset the since-retrain counter
    pub fn snapshot_for_retrain(&mut self) -> Vec<TrainingExample> {
        self.since_retrain = 0;
        self.examples.iter().cloned().collect()
    }

    /// Append every example as one JSON line; returns the number written
    pub fn export_jsonl(&self, path: &Path) -> Result<usize> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let mut writer = std::io::BufWriter::new(file);
        for example in &self.examples {
            serde_json::to_writer(&mut writer, example)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(self.examples.len())
    }
}

/// Deterministic shuffle, then an 80/20 split
pub fn split_holdout(examples: &[TrainingExample]) -> (Vec<TrainingExample>, Vec<TrainingExample>) {
    let mut shuffled = examples.to_vec();
    let mut rng = StdRng::seed_from_u64(SPLIT_SEED);
    shuffled.shuffle(&mut rng);

    let holdout_len = ((shuffled.len() as f64 * HOLDOUT_RATIO).round() as usize).max(1);
    let train = shuffled.split_off(holdout_len);
    (train, shuffled)
}

/// Share of `examples` the model labels correctly
pub fn accuracy(model: &VectorModel, examples: &[TrainingExample], save_t: f64, search_t: f64) -> f64 {
    if examples.is_empty() {
        return 0.0;
    }
    let correct = examples
        .iter()
        .filter(|e| model.decide(&e.features, save_t, search_t).0 == e.label)
        .count();
    correct as f64 / examples.len() as f64
}

/// Knobs for one retrain
#[derive(Debug, Clone, Copy)]
pub struct TrainingParams {
    pub learning_rate: f64,
    pub epochs: usize,
    pub save_threshold: f64,
    pub search_threshold: f64,
}

/// What a retrain did
#[derive(Debug, Clone, Serialize)]
pub struct RetrainReport {
    pub examples: usize,
    pub holdout: usize,
    pub previous_accuracy: f64,
    pub candidate_accuracy: f64,
    pub adopted: bool,
}

/// Train a candidate from `current` (warm start) and evaluate both on the
/// holdout. The candidate is returned only when it does not regress, or
/// unconditionally when `force` is set.
pub fn retrain(
    current: &VectorModel,
    examples: &[TrainingExample],
    params: TrainingParams,
    force: bool,
) -> Result<(RetrainReport, Option<VectorModel>)> {
    if examples.len() < MIN_TRAINING_EXAMPLES {
        return Err(TriggerError::Learning(format!(
            "need at least {} examples to retrain, have {}",
            MIN_TRAINING_EXAMPLES,
            examples.len()
        )));
    }

    let (train, holdout) = split_holdout(examples);
    let xs: Vec<[f64; FEATURE_COUNT]> = train.iter().map(|e| e.features.normalized()).collect();
    let y_save: Vec<f64> = train
        .iter()
        .map(|e| if e.label == Action::SaveMemory { 1.0 } else { 0.0 })
        .collect();
    let y_search: Vec<f64> = train
        .iter()
        .map(|e| if e.label == Action::SearchMemory { 1.0 } else { 0.0 })
        .collect();

    let mut candidate = current.clone();
    candidate.save.fit(&xs, &y_save, params.learning_rate, params.epochs);
    candidate.search.fit(&xs, &y_search, params.learning_rate, params.epochs);
    candidate.trained_examples = examples.len();
    candidate.trained_at = Some(Utc::now());

    let previous_accuracy = accuracy(current, &holdout, params.save_threshold, params.search_threshold);
    let candidate_accuracy = accuracy(&candidate, &holdout, params.save_threshold, params.search_threshold);
    let adopted = force || candidate_accuracy >= previous_accuracy;

    let report = RetrainReport {
        examples: examples.len(),
        holdout: holdout.len(),
        previous_accuracy,
        candidate_accuracy,
        adopted,
    };
    Ok((report, adopted.then_some(candidate)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labeled(n: usize) -> Vec<TrainingExample> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    TrainingExample::new(
                        FeatureVector {
                            importance_indicators: 5.0,
                            solution_score: 1.0,
                            ..FeatureVector::default()
                        },
                        Action::SaveMemory,
                        None,
                    )
                } else {
                    TrainingExample::new(
                        FeatureVector {
                            question_score: 1.0,
                            similarity_to_existing: 1.0,
                            ..FeatureVector::default()
                        },
                        Action::SearchMemory,
                        None,
                    )
                }
            })
            .collect()
    }

    fn params() -> TrainingParams {
        TrainingParams {
            learning_rate: 0.5,
            epochs: 400,
            save_threshold: 0.7,
            search_threshold: 0.6,
        }
    }

    #[test]
    fn test_buffer_is_bounded_and_counts() {
        let mut buffer = TrainingBuffer::new(3);
        for ex in labeled(5) {
            buffer.push(ex);
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.since_retrain(), 5);
        assert_eq!(buffer.snapshot_for_retrain().len(), 3);
        assert_eq!(buffer.since_retrain(), 0);
    }

    #[test]
    fn test_split_is_deterministic() {
        let examples = labeled(20);
        let (train_a, hold_a) = split_holdout(&examples);
        let (train_b, hold_b) = split_holdout(&examples);
        assert_eq!(hold_a.len(), 4);
        assert_eq!(train_a.len(), 16);
        assert_eq!(hold_a, hold_b);
        assert_eq!(train_a, train_b);
    }

    #[test]
    fn test_too_few_examples_is_learning_error() {
        let err = retrain(&VectorModel::default(), &labeled(3), params(), false).unwrap_err();
        assert!(matches!(err, TriggerError::Learning(_)));
    }

    #[test]
    fn test_retrain_improves_and_is_adopted() {
        let (report, model) = retrain(&VectorModel::default(), &labeled(40), params(), false).unwrap();
        assert!(report.adopted);
        assert!(report.candidate_accuracy >= report.previous_accuracy);
        assert!(report.candidate_accuracy > 0.9);
        assert!(model.is_some());
    }

    #[test]
    fn test_export_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buffer.jsonl");
        let mut buffer = TrainingBuffer::new(10);
        for ex in labeled(4) {
            buffer.push(ex);
        }
        assert_eq!(buffer.export_jsonl(&path).unwrap(), 4);
        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 4);
        let first: TrainingExample = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
        assert_eq!(first.label, Action::SaveMemory);
    }
}
