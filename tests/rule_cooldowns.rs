//! Integration tests for rule cooldowns, overrides and runtime toggles


use recall_trigger::config::RuleOverride;
use recall_trigger::rules::RuleState;
use recall_trigger::{
    Action, Collaborators, EngineConfig, ErrorKind, Message, OperatingMode, Platform,
    TriggerEngine,
};
use test_utils::*;

fn remember() -> (Message, recall_trigger::ConversationWindow) {
    let message = Message::user(REMEMBER_IT);
    let window = window_for(&message);
    (message, window)
}

#[tokio::test]
async fn test_rule_does_not_refire_within_cooldown() {
    let engine = engine(config(OperatingMode::RulesOnly), Collaborators::default());
    let (message, window) = remember();

    let first = engine.decide(&message, &window, Platform::Cli, "u").await;
    assert_eq!(first.action, Action::SaveMemory);

    let second = engine.decide(&message, &window, Platform::Cli, "u").await;
    assert_eq!(second.action, Action::NoAction);
    assert!(second.reasoning.iter().any(|r| r.contains("no rule fired")));

    let status = engine
        .rules()
        .into_iter()
        .find(|r| r.id == "explicit_remember")
        .unwrap();
    assert!(matches!(status.state, RuleState::CoolingDown { .. }));
}

#[tokio::test]
async fn test_cooldown_override_makes_rule_eligible_again() {
    let mut config = config(OperatingMode::RulesOnly);
    config.rule_overrides.insert(
        "explicit_remember".into(),
        RuleOverride {
            cooldown_secs: Some(0),
            ..RuleOverride::default()
        },
    );
    let engine = engine(config, Collaborators::default());
    let (message, window) = remember();

    for _ in 0..3 {
        let d = engine.decide(&message, &window, Platform::Cli, "u").await;
        assert_eq!(d.action, Action::SaveMemory);
    }
}

#[tokio::test]
async fn test_disabled_rule_never_fires() {
    let engine = engine(config(OperatingMode::RulesOnly), Collaborators::default());
    assert!(engine.set_rule_enabled("explicit_remember", false));
    assert!(!engine.set_rule_enabled("no_such_rule", false));

    let (message, window) = remember();
    let d = engine.decide(&message, &window, Platform::Cli, "u").await;
    assert_eq!(d.action, Action::NoAction);

    assert!(engine.set_rule_enabled("explicit_remember", true));
    let d = engine.decide(&message, &window, Platform::Cli, "u").await;
    assert_eq!(d.action, Action::SaveMemory);
}

#[tokio::test]
async fn test_concurrent_decisions_fire_rule_once() {
    let engine = std::sync::Arc::new(engine(config(OperatingMode::RulesOnly), Collaborators::default()));
    let (message, window) = remember();

    let tasks = (0..16).map(|_| {
        let engine = engine.clone();
        let message = message.clone();
        let window = window.clone();
        tokio::spawn(async move { engine.decide(&message, &window, Platform::Cli, "u").await })
    });
    let decisions = futures::future::join_all(tasks).await;

    let saves = decisions
        .into_iter()
        .map(|d| d.unwrap())
        .filter(|d| d.action == Action::SaveMemory)
        .count();
    assert_eq!(saves, 1);
}

#[test]
fn test_override_for_unknown_rule_is_config_error() {
    let mut config = EngineConfig::default();
    config
        .rule_overrides
        .insert("not_a_rule".into(), RuleOverride::default());
    let err = TriggerEngine::new(config, Collaborators::default()).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn test_invalid_pattern_is_config_error() {
    let toml = r#"
[[rules]]
id = "broken"
action = "SAVE_MEMORY"

[rules.kind]
type = "pattern"
patterns = ["(unclosed"]
"#;
    let config = EngineConfig::from_toml_str(toml).unwrap();
    let err = TriggerEngine::new(config, Collaborators::default()).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn test_rules_from_config_replace_defaults() {
    let mut config = config(OperatingMode::RulesOnly);
    config.rules = Some(vec![deploy_rule()]);
    let engine = engine(config, Collaborators::default());

    let ids: Vec<String> = engine.rules().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec!["deploy".to_string()]);

    let (message, window) = remember();
    let d = engine.decide(&message, &window, Platform::Cli, "u").await;
    assert_eq!(d.action, Action::NoAction);
}
