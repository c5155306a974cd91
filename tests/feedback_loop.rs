//! Integration tests for outcome recording, threshold tuning and retraining


use recall_trigger::feedback::FeedbackRecord;
use recall_trigger::types::StrategyKind;
use recall_trigger::{Action, Collaborators, DecisionMethod, Message, OperatingMode, Platform};
use std::time::Duration;
use test_utils::*;

fn tuning_config(grid: Vec<f64>) -> recall_trigger::EngineConfig {
    let mut config = text_config(OperatingMode::Hybrid);
    config.rules = Some(vec![deploy_rule()]);
    config.feedback.min_samples = 20;
    config.feedback.min_threshold_support = 10;
    config.feedback.optimize_every = 0;
    config.feedback.threshold_grid = grid;
    config
}

/// 12 confident overrides that were right, 12 weaker ones that were wrong
async fn run_overrides(engine: &recall_trigger::TriggerEngine, host: &ScriptedHost) {
    let message = Message::user("deploy the worker pool with the new limits");
    let window = window_for(&message);

    for (confidence, actual) in [(0.85, Action::SearchMemory), (0.75, Action::SaveMemory)] {
        host.set(Action::SearchMemory, confidence);
        for _ in 0..12 {
            let d = engine.decide(&message, &window, Platform::Cli, "u").await;
            assert_eq!(d.method, DecisionMethod::MlOverride);
            engine.record_outcome(&d, actual, None);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Threshold optimization
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_optimizer_adopts_better_threshold() {
    let host = ScriptedHost::new(Action::SearchMemory, 0.85);
    let engine = engine(tuning_config(vec![0.5, 0.6, 0.7, 0.8, 0.9]), with_host(host.clone()));
    run_overrides(&engine, &host).await;

    let run = engine.optimize_threshold().unwrap();
    assert_eq!(run.samples, 24);
    assert_eq!(run.adopted, Some(0.8));
    assert_eq!(engine.override_threshold(), 0.8);

    // the weaker model answer no longer overrides
    host.set(Action::SearchMemory, 0.75);
    let message = Message::user("deploy the worker pool again");
    let d = engine.decide(&message, &window_for(&message), Platform::Cli, "u").await;
    assert_eq!(d.method, DecisionMethod::RulesPreferred);
    assert_eq!(d.action, Action::SaveMemory);

    let metrics = engine.metrics();
    assert_eq!(metrics.override_threshold, 0.8);
    assert!(metrics.last_threshold_optimization.is_some());
    assert_eq!(metrics.outcomes_recorded, 24);
}

#[tokio::test]
async fn test_optimizer_ignores_grid_below_floor() {
    let host = ScriptedHost::new(Action::SearchMemory, 0.85);
    let engine = engine(tuning_config(vec![0.3, 0.4]), with_host(host.clone()));
    run_overrides(&engine, &host).await;

    let run = engine.optimize_threshold().unwrap();
    assert_eq!(run.adopted, None);
    assert_eq!(engine.override_threshold(), 0.7);
}

#[tokio::test]
async fn test_optimizer_needs_support() {
    let host = ScriptedHost::new(Action::SearchMemory, 0.85);
    let mut config = tuning_config(vec![0.5, 0.6, 0.7, 0.8, 0.9]);
    config.feedback.min_threshold_support = 12;
    let engine = engine(config, with_host(host.clone()));
    run_overrides(&engine, &host).await;

    // 0.8 is backed by exactly 12 overrides, not more than 12
    let run = engine.optimize_threshold().unwrap();
    assert_eq!(run.adopted, None);
    assert_eq!(engine.override_threshold(), 0.7);
}

#[tokio::test]
async fn test_optimizer_needs_min_samples() {
    let host = ScriptedHost::new(Action::SearchMemory, 0.85);
    let engine = engine(tuning_config(vec![0.8]), with_host(host));
    let message = Message::user("deploy it");
    let d = engine.decide(&message, &window_for(&message), Platform::Cli, "u").await;
    engine.record_outcome(&d, Action::SearchMemory, None);

    let err = engine.optimize_threshold().unwrap_err();
    assert_eq!(err.kind(), recall_trigger::ErrorKind::Learning);
    assert_eq!(
        engine.metrics().errors_of(recall_trigger::ErrorKind::Learning),
        1
    );
}

// ═══════════════════════════════════════════════════════════════════════════
// Accuracy and persistence
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_accuracy_per_subsystem() {
    let host = ScriptedHost::new(Action::SearchMemory, 0.85);
    let engine = engine(tuning_config(vec![0.8]), with_host(host.clone()));
    run_overrides(&engine, &host).await;

    let acc = engine.metrics().accuracy;
    assert_eq!(acc.samples, 24);
    assert_eq!(acc.rule_samples, 24);
    // rules said SAVE: right for the 12 weak overrides
    assert_eq!(acc.rules, Some(0.5));
    assert_eq!(acc.classifier, Some(0.5));
    assert_eq!(acc.final_decision, Some(0.5));
}

#[tokio::test]
async fn test_feedback_sink_writes_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("feedback.jsonl");
    let mut config = text_config(OperatingMode::Hybrid);
    config.feedback.sink_path = Some(path.clone());
    let host = ScriptedHost::new(Action::SaveMemory, 0.6);
    let collaborators = Collaborators {
        classifier_host: Some(host),
        ..Collaborators::from_config(&config)
    };
    let engine = engine(config, collaborators);

    let message = Message::user(REMEMBER_IT);
    let d = engine.decide(&message, &window_for(&message), Platform::Cli, "u").await;
    engine.record_outcome(&d, Action::SaveMemory, None);

    let mut lines = Vec::new();
    for _ in 0..50 {
        if let Ok(raw) = std::fs::read_to_string(&path)
            && !raw.is_empty()
        {
            lines = raw.lines().map(str::to_string).collect();
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(lines.len(), 1);
    let record: FeedbackRecord = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(record.decision_id, d.id);
    assert_eq!(record.method, DecisionMethod::Agreement);
}

// ═══════════════════════════════════════════════════════════════════════════
// Retraining
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_outcomes_train_vector_model() {
    let dir = tempfile::tempdir().unwrap();
    let model_path = dir.path().join("model.json");
    let mut config = config(OperatingMode::Hybrid);
    config.classifier.model_path = Some(model_path.clone());
    config.classifier.retrain_batch_size = 1000;
    let engine = engine(config, Collaborators::default());
    assert_eq!(engine.classifier().active_strategy(), StrategyKind::Heuristic);

    let samples = [
        ("Ricorda: the staging database listens on port 5433", Action::SaveMemory),
        ("What did we decide about the cache eviction policy?", Action::SearchMemory),
        ("ok thanks", Action::NoAction),
    ];
    for i in 0..15 {
        let (text, actual) = samples[i % samples.len()];
        let message = Message::user(format!("{} ({})", text, i));
        let d = engine.decide(&message, &window_for(&message), Platform::Cli, "u").await;
        engine.record_outcome(&d, actual, None);
    }
    assert_eq!(engine.classifier().stats().buffered_examples, 15);

    let report = engine.classifier().retrain_now().await.unwrap();
    assert_eq!(report.examples, 15);
    assert!(report.adopted);
    assert_eq!(engine.classifier().active_strategy(), StrategyKind::Vector);
    assert!(model_path.exists());
    assert_eq!(engine.metrics().sample_counts.retrains_completed, 1);
}

#[tokio::test]
async fn test_text_strategy_does_not_retrain() {
    let host = ScriptedHost::new(Action::SaveMemory, 0.6);
    let engine = engine(text_config(OperatingMode::Hybrid), with_host(host));
    let message = Message::user(REMEMBER_IT);
    let d = engine.decide(&message, &window_for(&message), Platform::Cli, "u").await;
    engine.record_outcome(&d, Action::SaveMemory, None);

    assert_eq!(engine.classifier().stats().buffered_examples, 1);
    assert!(engine.classifier().retrain_now().await.is_err());
    assert_eq!(engine.classifier().active_strategy(), StrategyKind::Text);
}
