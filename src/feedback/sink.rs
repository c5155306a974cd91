// src/feedback/sink.rs
// Optional persistence for feedback records

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::FeedbackRecord;
use crate::Result;

/// Somewhere feedback records are archived. Called off the decision path.
#[async_trait]
pub trait FeedbackSink: Send + Sync {
    async fn write(&self, record: &FeedbackRecord) -> Result<()>;
}

/// Appends each record as one JSON line
pub struct JsonlFeedbackSink {
    path: PathBuf,
    // one writer at a time so lines never interleave
    write_lock: Mutex<()>,
}

impl JsonlFeedbackSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl FeedbackSink for JsonlFeedbackSink {
    async fn write(&self, record: &FeedbackRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, DecisionMethod, OperatingMode};
    use chrono::Utc;
    use uuid::Uuid;

    fn record(actual: Action) -> FeedbackRecord {
        FeedbackRecord {
            decision_id: Uuid::new_v4(),
            user_id: "u".into(),
            mode: OperatingMode::Hybrid,
            method: DecisionMethod::Agreement,
            decided: Action::SaveMemory,
            confidence: 0.7,
            actual,
            rule_output: None,
            model_output: None,
            feedback: None,
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlFeedbackSink::new(dir.path().join("nested").join("feedback.jsonl"));
        sink.write(&record(Action::SaveMemory)).await.unwrap();
        sink.write(&record(Action::NoAction)).await.unwrap();

        let raw = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: FeedbackRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.actual, Action::NoAction);
    }
}
