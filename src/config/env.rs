// src/config/env.rs
// Environment overrides layered on top of the file configuration

use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, warn};

use super::EngineConfig;
use crate::types::{OperatingMode, Platform};

pub const ENV_MODE: &str = "RECALL_TRIGGER_MODE";
pub const ENV_OVERRIDE_THRESHOLD: &str = "RECALL_TRIGGER_OVERRIDE_THRESHOLD";
pub const ENV_RETRAIN_BATCH: &str = "RECALL_TRIGGER_RETRAIN_BATCH";
pub const ENV_PLATFORMS: &str = "RECALL_TRIGGER_PLATFORMS";
pub const ENV_MODEL_PATH: &str = "RECALL_TRIGGER_MODEL_PATH";
pub const ENV_CLASSIFIER_URL: &str = "RECALL_TRIGGER_CLASSIFIER_URL";
pub const ENV_CLASSIFIER_TOKEN: &str = "RECALL_TRIGGER_CLASSIFIER_TOKEN";
pub const ENV_EMBEDDINGS_URL: &str = "RECALL_TRIGGER_EMBEDDINGS_URL";
pub const ENV_EMBEDDINGS_KEY: &str = "RECALL_TRIGGER_EMBEDDINGS_KEY";

/// Apply overrides from the process environment
pub fn apply_env_overrides(config: &mut EngineConfig) {
    apply_overrides_from(config, |key| std::env::var(key).ok());
}

/// Unrecognized names are dropped; only an explicit "unknown" allows `Platform::Unknown`
fn parse_platform(name: &str) -> Option<Platform> {
    let platform = Platform::from_name(name);
    if platform == Platform::Unknown && !name.eq_ignore_ascii_case("unknown") {
        warn!(key = ENV_PLATFORMS, platform = name, "Unrecognized platform, ignoring");
        return None;
    }
    Some(platform)
}

/// Parse a value, logging and ignoring anything malformed
fn parse_or_warn<T: FromStr>(key: &str, raw: &str) -> Option<T> {
    let clean = raw.split('#').next().unwrap_or("").trim();
    match clean.parse::<T>() {
        Ok(v) => {
            debug!(key, value = clean, "Config override from environment");
            Some(v)
        }
        Err(_) => {
            warn!(key, value = raw, "Ignoring unparsable environment override");
            None
        }
    }
}

/// Apply overrides using `lookup` to read variables. Blank values are ignored.
pub fn apply_overrides_from<F>(config: &mut EngineConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(raw) = get(ENV_MODE)
        && let Some(mode) = parse_or_warn::<OperatingMode>(ENV_MODE, &raw)
    {
        config.mode = mode;
    }

    if let Some(raw) = get(ENV_OVERRIDE_THRESHOLD)
        && let Some(t) = parse_or_warn::<f64>(ENV_OVERRIDE_THRESHOLD, &raw)
    {
        config.arbiter.override_threshold = t;
    }

    if let Some(raw) = get(ENV_RETRAIN_BATCH)
        && let Some(k) = parse_or_warn::<usize>(ENV_RETRAIN_BATCH, &raw)
    {
        config.classifier.retrain_batch_size = k;
    }

    if let Some(raw) = get(ENV_PLATFORMS) {
        config.platforms = raw
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .filter_map(parse_platform)
            .collect();
    }

    if let Some(raw) = get(ENV_MODEL_PATH) {
        config.classifier.model_path = Some(PathBuf::from(raw.trim()));
    }

    if let Some(raw) = get(ENV_CLASSIFIER_URL) {
        config.classifier.host_url = Some(raw.trim().to_string());
    }

    if let Some(raw) = get(ENV_CLASSIFIER_TOKEN) {
        config.classifier.host_token = Some(raw.trim().to_string());
    }

    if let Some(raw) = get(ENV_EMBEDDINGS_URL) {
        config.embeddings.url = Some(raw.trim().to_string());
    }

    if let Some(raw) = get(ENV_EMBEDDINGS_KEY) {
        config.embeddings.api_key = Some(raw.trim().to_string());
    }
}
