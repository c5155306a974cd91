//! Learned classifier
//!
//! One `predict` contract over interchangeable strategies:
//! - `vector`: trainable logistic models over the feature vector
//! - `text`: pretrained 3-class model behind a `ClassifierHost`, frozen in-process
//! - `heuristic`: fallback scorer while no model is available, never trainable
//!
//! `learn` buffers labeled examples; every `retrain_batch_size` examples a
//! background retrain of the vector strategy runs, at most one at a time.

pub mod heuristic;
pub mod text;
pub mod training;
pub mod vector;

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ClassifierConfig;
use crate::error::TriggerError;
use crate::features::FeatureVector;
use crate::memory::bounded;
use crate::types::{Action, ClassifierOutput, Feedback, StrategyKind};
use crate::Result;

pub use heuristic::HeuristicScorer;
pub use text::{ClassifierHost, HttpClassifierHost, LabelScore};
pub use training::{RetrainReport, TrainingBuffer, TrainingExample, TrainingParams};
pub use vector::VectorModel;

/// The strategy currently answering `predict`
#[derive(Clone)]
pub enum Strategy {
    Vector(Arc<VectorModel>),
    Text(Arc<dyn ClassifierHost>),
    Heuristic,
}

impl Strategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Strategy::Vector(_) => StrategyKind::Vector,
            Strategy::Text(_) => StrategyKind::Text,
            Strategy::Heuristic => StrategyKind::Heuristic,
        }
    }
}

/// A prediction plus the failure that forced a fallback, if any
#[derive(Debug)]
pub struct Prediction {
    pub output: ClassifierOutput,
    pub error: Option<TriggerError>,
}

impl Prediction {
    fn ok(output: ClassifierOutput) -> Self {
        Self {
            output,
            error: None,
        }
    }
}

/// Point-in-time classifier counters
#[derive(Debug, Clone, Serialize)]
pub struct ClassifierStats {
    pub configured_strategy: StrategyKind,
    pub active_strategy: StrategyKind,
    pub predictions: u64,
    pub fallbacks: u64,
    pub buffered_examples: usize,
    pub retrains_completed: u64,
    pub retrains_rejected: u64,
    pub retrains_failed: u64,
    pub retrain_in_progress: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_retrain: Option<RetrainReport>,
}

#[derive(Default)]
struct Counters {
    predictions: AtomicU64,
    fallbacks: AtomicU64,
    retrains_completed: AtomicU64,
    retrains_rejected: AtomicU64,
    retrains_failed: AtomicU64,
}

struct Inner {
    configured: StrategyKind,
    active: RwLock<Strategy>,
    heuristic: HeuristicScorer,
    buffer: Mutex<TrainingBuffer>,
    retraining: AtomicBool,
    last_retrain: Mutex<Option<RetrainReport>>,
    counters: Counters,
    save_threshold: f64,
    search_threshold: f64,
    retrain_batch_size: usize,
    learning_rate: f64,
    epochs: usize,
    model_path: Option<PathBuf>,
    host_timeout: Duration,
}

/// Clears the retrain flag when the retrain finishes or its task is dropped
struct RetrainGuard<'a>(&'a AtomicBool);

impl Drop for RetrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Classifier facade. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Classifier {
    inner: Arc<Inner>,
}

impl Classifier {
    /// Build the configured strategy. Anything that cannot be loaded leaves
    /// the heuristic fallback in charge; this never fails.
    pub fn new(
        config: &ClassifierConfig,
        host: Option<Arc<dyn ClassifierHost>>,
        host_timeout: Duration,
    ) -> Self {
        let active = match config.strategy {
            StrategyKind::Vector => match &config.model_path {
                Some(path) if path.exists() => match VectorModel::load(path) {
                    Ok(model) => Strategy::Vector(Arc::new(model)),
                    Err(e) => {
                        warn!(error = %e, "Vector model not loadable, using heuristic fallback");
                        Strategy::Heuristic
                    }
                },
                _ => {
                    info!("No vector model yet, using heuristic fallback until the first retrain");
                    Strategy::Heuristic
                }
            },
            StrategyKind::Text => {
                let host = host.or_else(|| {
                    config.host_url.as_deref().map(|url| {
                        Arc::new(HttpClassifierHost::new(url, config.host_token.clone()))
                            as Arc<dyn ClassifierHost>
                    })
                });
                match host {
                    Some(host) => Strategy::Text(host),
                    None => {
                        warn!("Text strategy without a classifier host, using heuristic fallback");
                        Strategy::Heuristic
                    }
                }
            }
            StrategyKind::Heuristic => Strategy::Heuristic,
        };

        Self::build(config, config.strategy, active, host_timeout)
    }

    fn build(
        config: &ClassifierConfig,
        configured: StrategyKind,
        active: Strategy,
        host_timeout: Duration,
    ) -> Self {
        debug!(
            configured = configured.as_str(),
            active = active.kind().as_str(),
            "Classifier ready"
        );

        Self {
            inner: Arc::new(Inner {
                configured,
                active: RwLock::new(active),
                heuristic: HeuristicScorer,
                buffer: Mutex::new(TrainingBuffer::new(config.buffer_capacity)),
                retraining: AtomicBool::new(false),
                last_retrain: Mutex::new(None),
                counters: Counters::default(),
                save_threshold: config.save_threshold,
                search_threshold: config.search_threshold,
                retrain_batch_size: config.retrain_batch_size.max(1),
                learning_rate: config.learning_rate,
                epochs: config.epochs,
                model_path: config.model_path.clone(),
                host_timeout,
            }),
        }
    }

    fn current(&self) -> Strategy {
        self.inner
            .active
            .read()
            .map(|s| s.clone())
            .unwrap_or(Strategy::Heuristic)
    }

    pub fn active_strategy(&self) -> StrategyKind {
        self.current().kind()
    }

    pub fn configured_strategy(&self) -> StrategyKind {
        self.inner.configured
    }

    /// Predict an action. Never fails: a host failure answers with the
    /// heuristic and reports the error alongside.
    pub async fn predict(&self, text: &str, features: Option<&FeatureVector>) -> Prediction {
        self.inner.counters.predictions.fetch_add(1, Ordering::Relaxed);
        let features = features.copied().unwrap_or_default();

        match self.current() {
            Strategy::Vector(model) => Prediction::ok(model.predict(
                &features,
                self.inner.save_threshold,
                self.inner.search_threshold,
            )),
            Strategy::Heuristic => Prediction::ok(self.inner.heuristic.predict(&features)),
            Strategy::Text(host) => {
                let result = bounded("classifier host", self.inner.host_timeout, host.classify(text))
                    .await
                    .and_then(|scores| text::interpret(&scores));
                match result {
                    Ok(output) => Prediction::ok(output),
                    Err(e) => {
                        warn!(error = %e, "Classifier host failed, using heuristic for this call");
                        self.inner.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                        let mut output = self.inner.heuristic.predict(&features);
                        output.degraded = Some(e.to_string());
                        output.reasoning = format!("{} (text model unavailable)", output.reasoning);
                        Prediction {
                            output,
                            error: Some(e),
                        }
                    }
                }
            }
        }
    }

    /// Record a labeled example. For the vector strategy this may start a
    /// background retrain; the text strategy only keeps it for export.
    pub fn learn(&self, features: FeatureVector, actual: Action, feedback: Option<Feedback>) {
        let example = TrainingExample::new(features, actual, feedback);
        let pending = match self.inner.buffer.lock() {
            Ok(mut buffer) => buffer.push(example),
            Err(_) => {
                warn!("Training buffer lock poisoned, example dropped");
                return;
            }
        };

        if self.inner.configured == StrategyKind::Text {
            info!(label = %actual, "Feedback logged for offline retraining of the text model");
            return;
        }

        if pending < self.inner.retrain_batch_size {
            return;
        }

        if self
            .inner
            .retraining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Retrain already running, will retry on the next example");
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.inner.retraining.store(false, Ordering::Release);
            warn!("No async runtime, retrain skipped");
            return;
        };

        let inner = self.inner.clone();
        handle.spawn(async move {
            let _guard = RetrainGuard(&inner.retraining);
            if let Err(e) = run_retrain(&inner).await {
                warn!(error = %e, "Background retrain failed, keeping current model");
            }
        });
    }

    /// Retrain now and wait for the result
    pub async fn retrain_now(&self) -> Result<RetrainReport> {
        if self
            .inner
            .retraining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TriggerError::Learning("a retrain is already running".into()));
        }
        let _guard = RetrainGuard(&self.inner.retraining);
        run_retrain(&self.inner).await
    }

    pub fn is_retraining(&self) -> bool {
        self.inner.retraining.load(Ordering::Acquire)
    }

    /// Append the buffered examples to a JSON Lines file for offline training
    pub fn export_training_buffer(&self, path: &Path) -> Result<usize> {
        let buffer = self
            .inner
            .buffer
            .lock()
            .map_err(|_| TriggerError::Learning("training buffer lock poisoned".into()))?;
        let written = buffer.export_jsonl(path)?;
        info!(path = %path.display(), examples = written, "Exported training buffer");
        Ok(written)
    }

    pub fn stats(&self) -> ClassifierStats {
        let c = &self.inner.counters;
        ClassifierStats {
            configured_strategy: self.inner.configured,
            active_strategy: self.active_strategy(),
            predictions: c.predictions.load(Ordering::Relaxed),
            fallbacks: c.fallbacks.load(Ordering::Relaxed),
            buffered_examples: self.inner.buffer.lock().map(|b| b.len()).unwrap_or(0),
            retrains_completed: c.retrains_completed.load(Ordering::Relaxed),
            retrains_rejected: c.retrains_rejected.load(Ordering::Relaxed),
            retrains_failed: c.retrains_failed.load(Ordering::Relaxed),
            retrain_in_progress: self.is_retraining(),
            last_retrain: self.inner.last_retrain.lock().ok().and_then(|r| r.clone()),
        }
    }
}

/// One retrain of the vector strategy. The caller holds the retrain flag.
async fn run_retrain(inner: &Arc<Inner>) -> Result<RetrainReport> {
    if inner.configured == StrategyKind::Text {
        return Err(TriggerError::Learning(
            "text strategy is frozen; export the buffer for offline retraining".into(),
        ));
    }

    let examples = inner
        .buffer
        .lock()
        .map_err(|_| TriggerError::Learning("training buffer lock poisoned".into()))?
        .snapshot_for_retrain();

    // from the heuristic fallback, any trained model replaces it
    let (current, replacing_fallback) = match inner.active.read().map(|s| s.clone()) {
        Ok(Strategy::Vector(model)) => (model, false),
        _ => (Arc::new(VectorModel::default()), true),
    };

    let params = TrainingParams {
        learning_rate: inner.learning_rate,
        epochs: inner.epochs,
        save_threshold: inner.save_threshold,
        search_threshold: inner.search_threshold,
    };

    let outcome = tokio::task::spawn_blocking(move || {
        training::retrain(&current, &examples, params, replacing_fallback)
    })
    .await
    .map_err(TriggerError::from)
    .and_then(|r| r);

    let (report, model) = match outcome {
        Ok(done) => done,
        Err(e) => {
            inner.counters.retrains_failed.fetch_add(1, Ordering::Relaxed);
            return Err(e);
        }
    };

    match model {
        Some(model) => {
            if let Some(path) = &inner.model_path
                && let Err(e) = model.save(path)
            {
                warn!(error = %e, "Could not persist retrained model");
            }
            if let Ok(mut active) = inner.active.write() {
                *active = Strategy::Vector(Arc::new(model));
            }
            inner.counters.retrains_completed.fetch_add(1, Ordering::Relaxed);
            info!(
                examples = report.examples,
                previous = report.previous_accuracy,
                candidate = report.candidate_accuracy,
                "Retrained vector model adopted"
            );
        }
        None => {
            inner.counters.retrains_rejected.fetch_add(1, Ordering::Relaxed);
            info!(
                previous = report.previous_accuracy,
                candidate = report.candidate_accuracy,
                "Retrained model regressed on holdout, keeping current"
            );
        }
    }

    if let Ok(mut last) = inner.last_retrain.lock() {
        *last = Some(report.clone());
    }
    Ok(report)
}
