// src/engine/metrics.rs
// Engine counters and the serializable metrics snapshot

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

use crate::classifier::ClassifierStats;
use crate::error::{ErrorKind, TriggerError};
use crate::feedback::{SubsystemAccuracy, ThresholdOptimization};
use crate::types::{Decision, DecisionMethod, OperatingMode};

/// Live counters updated on the decision path
pub struct MetricsRecorder {
    decisions: AtomicU64,
    by_method: Mutex<HashMap<DecisionMethod, u64>>,
    errors: Mutex<HashMap<ErrorKind, u64>>,
    mode_switches: AtomicU64,
    outcomes: AtomicU64,
    started: Instant,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self {
            decisions: AtomicU64::new(0),
            by_method: Mutex::new(HashMap::new()),
            errors: Mutex::new(HashMap::new()),
            mode_switches: AtomicU64::new(0),
            outcomes: AtomicU64::new(0),
            started: Instant::now(),
        }
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_decision(&self, decision: &Decision) {
        self.decisions.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut map) = self.by_method.lock() {
            *map.entry(decision.method).or_insert(0) += 1;
        }
    }

    pub fn record_error(&self, error: &TriggerError) {
        self.record_error_kind(error.kind());
    }

    pub fn record_error_kind(&self, kind: ErrorKind) {
        if let Ok(mut map) = self.errors.lock() {
            *map.entry(kind).or_insert(0) += 1;
        }
    }

    pub fn record_mode_switch(&self) {
        self.mode_switches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self) {
        self.outcomes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decisions(&self) -> u64 {
        self.decisions.load(Ordering::Relaxed)
    }

    pub fn mode_switches(&self) -> u64 {
        self.mode_switches.load(Ordering::Relaxed)
    }

    pub fn outcomes(&self) -> u64 {
        self.outcomes.load(Ordering::Relaxed)
    }

    pub fn by_method(&self) -> HashMap<DecisionMethod, u64> {
        self.by_method.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn errors(&self) -> HashMap<ErrorKind, u64> {
        self.errors.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

/// Training and feedback sample counts
#[derive(Debug, Clone, Serialize)]
pub struct SampleCounts {
    pub feedback_history: usize,
    pub training_buffer: usize,
    pub retrains_completed: u64,
    pub users: usize,
}

/// Point-in-time view of the engine
#[derive(Debug, Clone, Serialize)]
pub struct EngineMetrics {
    pub mode: OperatingMode,
    pub mode_switch_count: u64,
    pub decisions_total: u64,
    pub decisions_by_method: HashMap<DecisionMethod, u64>,
    pub outcomes_recorded: u64,
    pub accuracy: SubsystemAccuracy,
    pub sample_counts: SampleCounts,
    pub error_counts: HashMap<ErrorKind, u64>,
    pub override_threshold: f64,
    pub threshold_floor: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_threshold_optimization: Option<ThresholdOptimization>,
    pub classifier: ClassifierStats,
    pub uptime_secs: u64,
}

impl EngineMetrics {
    pub fn errors_of(&self, kind: ErrorKind) -> u64 {
        self.error_counts.get(&kind).copied().unwrap_or(0)
    }

    /// Log a one-line summary
    pub fn report(&self) {
        info!(
            mode = %self.mode,
            decisions = self.decisions_total,
            outcomes = self.outcomes_recorded,
            threshold = self.override_threshold,
            external_errors = self.errors_of(ErrorKind::ExternalDependency),
            "Engine metrics"
        );
    }
}
