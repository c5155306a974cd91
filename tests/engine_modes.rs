//! Integration tests for decisions in each operating mode


use recall_trigger::arbiter::arbitrate;
use recall_trigger::classifier::TrainingExample;
use recall_trigger::rules::RuleState;
use recall_trigger::types::{ActionScores, ClassifierOutput, StrategyKind};
use recall_trigger::{
    Action, ActionCandidate, Collaborators, ConversationWindow, DecisionMethod, ErrorKind,
    Message, OperatingMode, Platform,
};
use std::sync::Arc;
use std::time::Duration;
use test_utils::*;
use tokio_util::sync::CancellationToken;

// ═══════════════════════════════════════════════════════════════════════════
// Mode behavior
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_rules_only_saves_and_model_only_searches() {
    let message = Message::user(REMEMBER_IT);
    let window = window_for(&message);

    let rules = engine(config(OperatingMode::RulesOnly), Collaborators::default());
    let d = rules.decide(&message, &window, Platform::Cli, "u").await;
    assert_eq!(d.action, Action::SaveMemory);
    assert_eq!(d.method, DecisionMethod::RulesOnly);
    assert!(d.model_output.is_none());

    let host = ScriptedHost::new(Action::SearchMemory, 0.8);
    let model = engine(text_config(OperatingMode::ModelOnly), with_host(host.clone()));
    let d = model.decide(&message, &window, Platform::Cli, "u").await;
    assert_eq!(d.action, Action::SearchMemory);
    assert_eq!(d.method, DecisionMethod::ModelOnly);
    assert!((d.confidence - 0.8).abs() < 1e-9);
    assert!(d.rule_output.is_none());
    assert_eq!(host.calls(), 1);
}

#[tokio::test]
async fn test_keyword_rule_records_matches() {
    let message = Message::user(REMEMBER_IT);
    let engine = engine(config(OperatingMode::RulesOnly), Collaborators::default());
    let d = engine.decide(&message, &window_for(&message), Platform::Cli, "u").await;

    let candidate = d.primary_candidate().expect("rule candidate");
    assert_eq!(candidate.rule_id(), Some("explicit_remember"));
    let count = candidate.metadata["match_count"].as_u64().unwrap();
    assert!(count >= 2);
    let matched = candidate.metadata["matched_keywords"].as_array().unwrap();
    assert!(matched.iter().any(|k| k == "ricorda"));
    assert!(matched.iter().any(|k| k == "importante"));
}

#[tokio::test]
async fn test_hybrid_agreement_averages() {
    let message = Message::user(REMEMBER_IT);
    let host = ScriptedHost::new(Action::SaveMemory, 0.6);
    let engine = engine(text_config(OperatingMode::Hybrid), with_host(host));

    let d = engine.decide(&message, &window_for(&message), Platform::Cli, "u").await;
    assert_eq!(d.action, Action::SaveMemory);
    assert_eq!(d.method.as_str(), "agreement");
    assert!((d.confidence - 0.7).abs() < 1e-9);
    assert!(d.reasoning.iter().any(|r| r.starts_with("rules:")));
    assert!(d.reasoning.iter().any(|r| r.starts_with("model:")));
}

#[tokio::test]
async fn test_hybrid_override_by_confident_model() {
    let message = Message::user("please deploy the api tonight");
    let window = window_for(&message);
    let host = ScriptedHost::new(Action::SearchMemory, 0.85);
    let mut config = text_config(OperatingMode::Hybrid);
    config.rules = Some(vec![deploy_rule()]);
    let engine = engine(config, with_host(host.clone()));

    let d = engine.decide(&message, &window, Platform::Cli, "u").await;
    assert_eq!(d.action, Action::SearchMemory);
    assert_eq!(d.method.as_str(), "ml_override");

    host.set(Action::SearchMemory, 0.68);
    let d = engine.decide(&message, &window, Platform::Cli, "u").await;
    assert_eq!(d.action, Action::SaveMemory);
    assert_eq!(d.method, DecisionMethod::RulesPreferred);
}

#[test]
fn test_arbiter_override_numbers() {
    let rule = ActionCandidate::from_rule("r", 1, Action::SaveMemory, 0.5, "", "rule");
    let model = ClassifierOutput {
        action: Action::SearchMemory,
        confidence: 0.85,
        scores: ActionScores::default(),
        strategy: StrategyKind::Text,
        trainable: true,
        reasoning: "model".into(),
        degraded: None,
    };
    let out = arbitrate(OperatingMode::Hybrid, Some(&rule), Some(&model), 0.7);
    assert_eq!(out.action, Action::SearchMemory);
    assert_eq!(out.method, DecisionMethod::MlOverride);
}

#[tokio::test]
async fn test_learning_mode_keeps_rule_label_and_trains() {
    let message = Message::user(REMEMBER_IT);
    let mut config = config(OperatingMode::Learning);
    config.classifier.retrain_batch_size = 1000;
    let engine = engine(config, Collaborators::default());

    let d = engine.decide(&message, &window_for(&message), Platform::Cli, "u").await;
    assert_eq!(d.action, Action::SaveMemory);
    assert_eq!(d.method, DecisionMethod::Learning);
    assert!(d.model_output.is_some());
    assert_eq!(engine.classifier().stats().buffered_examples, 1);
}

#[tokio::test]
async fn test_learning_outcome_does_not_buffer_twice() {
    let message = Message::user(REMEMBER_IT);
    let mut config = config(OperatingMode::Learning);
    config.classifier.retrain_batch_size = 1000;
    let engine = engine(config, Collaborators::default());

    let d = engine.decide(&message, &window_for(&message), Platform::Cli, "u").await;
    engine.record_outcome(&d, Action::NoAction, None);
    assert_eq!(engine.classifier().stats().buffered_examples, 1);
    assert_eq!(engine.metrics().outcomes_recorded, 1);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("buffer.jsonl");
    engine.classifier().export_training_buffer(&path).unwrap();
    let raw = std::fs::read_to_string(&path).unwrap();
    let labels: Vec<Action> = raw
        .lines()
        .map(|l| serde_json::from_str::<TrainingExample>(l).unwrap().label)
        .collect();
    assert_eq!(labels, vec![Action::SaveMemory]);
}

// ═══════════════════════════════════════════════════════════════════════════
// Edge cases
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_empty_history_returns_none() {
    let engine = engine(config(OperatingMode::Hybrid), Collaborators::default());
    let message = Message::user(REMEMBER_IT);
    let d = engine
        .decide(&message, &ConversationWindow::default(), Platform::Cli, "u")
        .await;
    assert_eq!(d.action, Action::NoAction);
    assert_eq!(d.confidence, 0.0);
    assert_eq!(d.method, DecisionMethod::EmptyHistory);
}

#[tokio::test]
async fn test_failing_collaborators_never_escape() {
    let collaborators = Collaborators {
        store: Some(Arc::new(FailingStore)),
        embedder: Some(Arc::new(FailingEmbedder)),
        classifier_host: Some(Arc::new(DownHost)),
        feedback_sink: None,
    };
    let engine = engine(text_config(OperatingMode::Hybrid), collaborators);
    let message = Message::user("Do you remember how we fixed the login timeout error last time?");

    let d = engine.decide(&message, &window_for(&message), Platform::Cli, "u").await;
    assert!((0.0..=1.0).contains(&d.confidence));
    let model = d.model_output.as_ref().expect("fallback output");
    assert_eq!(model.strategy, StrategyKind::Heuristic);
    assert!(model.degraded.is_some());
    assert!(d.reasoning.iter().any(|r| r.contains("fallback used")));

    let metrics = engine.metrics();
    assert!(metrics.errors_of(ErrorKind::ExternalDependency) >= 3);
    assert_eq!(metrics.classifier.fallbacks, 1);
}

#[tokio::test]
async fn test_slow_host_times_out_to_fallback() {
    let mut config = text_config(OperatingMode::ModelOnly);
    config.timeouts.classifier_ms = 20;
    let engine = engine(config, with_host(Arc::new(SlowHost(Duration::from_secs(5)))));
    let message = Message::user("what port does staging use?");

    let d = engine.decide(&message, &window_for(&message), Platform::Cli, "u").await;
    let model = d.model_output.expect("fallback output");
    assert_eq!(model.strategy, StrategyKind::Heuristic);
    assert!(model.degraded.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_cancelled_decision() {
    let engine = engine(
        text_config(OperatingMode::Hybrid),
        with_host(Arc::new(SlowHost(Duration::from_secs(5)))),
    );
    let message = Message::user(REMEMBER_IT);
    let window = window_for(&message);
    let token = CancellationToken::new();

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let d = engine
        .decide_with_cancel(&message, &window, Platform::Cli, "u", &token)
        .await;
    assert_eq!(d.action, Action::NoAction);
    assert_eq!(d.method, DecisionMethod::Cancelled);
    assert_eq!(d.reasoning, vec!["cancelled".to_string()]);

    // the rule pass finished before the slow host, so its cooldown is spent
    let status = engine
        .rules()
        .into_iter()
        .find(|r| r.id == "explicit_remember")
        .unwrap();
    assert!(matches!(status.state, RuleState::CoolingDown { .. }));
}

#[tokio::test]
async fn test_concurrent_users() {
    let engine = Arc::new(engine(config(OperatingMode::Hybrid), Collaborators::default()));

    let tasks = (0..20).map(|i| {
        let engine = engine.clone();
        async move {
            let message = Message::user(format!("message {} about the build cache", i));
            let window = window_for(&message);
            engine
                .decide(&message, &window, Platform::Api, &format!("user-{}", i % 4))
                .await
        }
    });
    let decisions = futures::future::join_all(tasks).await;

    assert_eq!(decisions.len(), 20);
    for d in &decisions {
        assert!((0.0..=1.0).contains(&d.confidence));
    }
    assert_eq!(engine.user_context().len(), 4);
    let total: u64 = {
        let mut sum = 0;
        for i in 0..4 {
            sum += engine.user_context().snapshot(&format!("user-{}", i)).await.total_interactions;
        }
        sum
    };
    assert_eq!(total, 20);
    assert_eq!(engine.metrics().decisions_total, 20);
}
