// src/classifier/heuristic.rs
// Fallback scorer used while no model is available. Never trainable.

use crate::features::FeatureVector;
use crate::types::{Action, ActionScores, ClassifierOutput, StrategyKind, clamp_unit};

/// Score needed before the heuristic proposes anything
const MIN_SCORE: f64 = 0.5;

/// Scores built only from feature-vector signals
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicScorer;

impl HeuristicScorer {
    pub fn scores(&self, f: &FeatureVector) -> ActionScores {
        let importance = (f.importance_indicators / 2.0).min(1.0);
        let tech_solution = if f.technical_score > 0.0 && f.solution_score > 0.0 {
            1.0
        } else {
            f.technical_score * f.solution_score
        };
        let save = 0.35 * importance
            + 0.3 * tech_solution
            + 0.15 * f.novelty
            + 0.1 * f.contains_code
            + 0.1 * (f.message_length / 500.0).min(1.0);

        let asks_known = if f.question_score > 0.0 && f.similarity_to_existing > 0.5 {
            1.0
        } else {
            0.0
        };
        let search = 0.45 * f.question_score + 0.3 * f.similarity_to_existing + 0.25 * asks_known;

        let save = clamp_unit(save);
        let search = clamp_unit(search);
        ActionScores {
            save,
            search,
            none: 1.0 - save.max(search),
        }
    }

    pub fn predict(&self, features: &FeatureVector) -> ClassifierOutput {
        let scores = self.scores(features);
        let (action, confidence) = if scores.save >= MIN_SCORE && scores.save >= scores.search {
            (Action::SaveMemory, scores.save)
        } else if scores.search >= MIN_SCORE {
            (Action::SearchMemory, scores.search)
        } else {
            (Action::NoAction, scores.none)
        };

        ClassifierOutput {
            action,
            confidence,
            scores,
            strategy: StrategyKind::Heuristic,
            trainable: false,
            reasoning: format!(
                "heuristic: save={:.2}, search={:.2}",
                scores.save, scores.search
            ),
            degraded: None,
        }
    }
}
