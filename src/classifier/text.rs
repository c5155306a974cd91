// src/classifier/text.rs
// Pretrained 3-class text model behind an injectable host

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::TriggerError;
use crate::types::{Action, ActionScores, ClassifierOutput, StrategyKind};
use crate::Result;

/// One class score as returned by an inference endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f64,
}

impl LabelScore {
    pub fn new(label: &str, score: f64) -> Self {
        Self {
            label: label.to_string(),
            score,
        }
    }
}

/// Hosted pretrained classifier
#[async_trait]
pub trait ClassifierHost: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Vec<LabelScore>>;
}

/// Turn host scores into an output: argmax class, confidence = its probability
pub fn interpret(scores: &[LabelScore]) -> Result<ClassifierOutput> {
    let mut by_action = ActionScores::default();
    let mut recognized = 0;

    for s in scores {
        let Some(action) = Action::from_label(&s.label) else {
            debug!(label = %s.label, "Ignoring unknown classifier label");
            continue;
        };
        recognized += 1;
        let score = s.score.clamp(0.0, 1.0);
        match action {
            Action::SaveMemory => by_action.save = score,
            Action::SearchMemory => by_action.search = score,
            Action::NoAction => by_action.none = score,
        }
    }

    if recognized == 0 {
        return Err(TriggerError::ClassifierHost(
            "response contained none of the action labels".to_string(),
        ));
    }

    let (action, confidence) = [
        (Action::SaveMemory, by_action.save),
        (Action::SearchMemory, by_action.search),
        (Action::NoAction, by_action.none),
    ]
    .into_iter()
    .fold((Action::NoAction, f64::MIN), |best, cur| {
        if cur.1 > best.1 { cur } else { best }
    });

    Ok(ClassifierOutput {
        action,
        confidence,
        scores: by_action,
        strategy: StrategyKind::Text,
        trainable: true,
        reasoning: format!("text model: {} ({:.2})", action, confidence),
        degraded: None,
    })
}

/// Either a flat list or the nested list-per-input shape
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HostResponse {
    Flat(Vec<LabelScore>),
    Nested(Vec<Vec<LabelScore>>),
}

impl HostResponse {
    fn into_scores(self) -> Vec<LabelScore> {
        match self {
            HostResponse::Flat(scores) => scores,
            HostResponse::Nested(batches) => batches.into_iter().next().unwrap_or_default(),
        }
    }
}

/// Client for a Hugging-Face-style inference endpoint: POST `{"inputs": text}`
pub struct HttpClassifierHost {
    url: String,
    token: Option<String>,
    http_client: reqwest::Client,
}

impl HttpClassifierHost {
    pub fn new(url: &str, token: Option<String>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();

        Self {
            url: url.to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
            http_client,
        }
    }
}

#[async_trait]
impl ClassifierHost for HttpClassifierHost {
    async fn classify(&self, text: &str) -> Result<Vec<LabelScore>> {
        let body = serde_json::json!({ "inputs": text });
        let mut request = self.http_client.post(&self.url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TriggerError::ClassifierHost(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(TriggerError::ClassifierHost(format!(
                "HTTP {}: {}",
                status,
                detail.chars().take(200).collect::<String>()
            )));
        }

        let parsed: HostResponse = response
            .json()
            .await
            .map_err(|e| TriggerError::ClassifierHost(format!("invalid response: {}", e)))?;
        Ok(parsed.into_scores())
    }
}
