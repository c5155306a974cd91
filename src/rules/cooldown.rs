// src/rules/cooldown.rs
// Per-(rule, action) cooldown clocks with atomic check-and-set

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::types::Action;

/// One clock per (rule id, action)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CooldownKey {
    pub rule_id: String,
    pub action: Action,
}

impl CooldownKey {
    pub fn new(rule_id: &str, action: Action) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            action,
        }
    }
}

/// Observable state of a rule's clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RuleState {
    Ready,
    CoolingDown { remaining_ms: u64 },
}

/// Thread-safe cooldown tracker. `try_fire` is the only way to start a
/// cooldown, and it checks and sets under one lock, so two concurrent
/// callers can never both see a clock as expired.
#[derive(Debug, Default)]
pub struct CooldownTracker {
    last_fired: Mutex<HashMap<CooldownKey, Instant>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time left before the key may fire again
    pub fn remaining(&self, key: &CooldownKey, cooldown: Duration, now: Instant) -> Option<Duration> {
        let Ok(fired) = self.last_fired.lock() else {
            return None; // poisoned: treat as ready
        };
        fired.get(key).and_then(|last| {
            let elapsed = now.saturating_duration_since(*last);
            (elapsed < cooldown).then(|| cooldown - elapsed)
        })
    }

    pub fn state(&self, key: &CooldownKey, cooldown: Duration, now: Instant) -> RuleState {
        match self.remaining(key, cooldown, now) {
            Some(left) => RuleState::CoolingDown {
                remaining_ms: left.as_millis() as u64,
            },
            None => RuleState::Ready,
        }
    }

    /// Claim the key: returns true and restarts the clock when the cooldown
    /// has expired, false otherwise.
    pub fn try_fire(&self, key: &CooldownKey, cooldown: Duration, now: Instant) -> bool {
        let Ok(mut fired) = self.last_fired.lock() else {
            return false;
        };
        if let Some(last) = fired.get(key)
            && now.saturating_duration_since(*last) < cooldown
        {
            debug!(rule = %key.rule_id, "Cooldown still active");
            return false;
        }
        fired.insert(key.clone(), now);
        true
    }

    /// Forget every clock
    pub fn reset(&self) {
        if let Ok(mut fired) = self.last_fired.lock() {
            fired.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fire_then_cooldown_then_ready() {
        let tracker = CooldownTracker::new();
        let key = CooldownKey::new("r1", Action::SaveMemory);
        let cooldown = Duration::from_secs(60);
        let t0 = Instant::now();

        assert_eq!(tracker.state(&key, cooldown, t0), RuleState::Ready);
        assert!(tracker.try_fire(&key, cooldown, t0));
        assert!(!tracker.try_fire(&key, cooldown, t0 + Duration::from_secs(59)));
        assert!(matches!(
            tracker.state(&key, cooldown, t0 + Duration::from_secs(30)),
            RuleState::CoolingDown { remaining_ms: 30_000 }
        ));
        assert!(tracker.try_fire(&key, cooldown, t0 + Duration::from_secs(60)));
    }

    #[test]
    fn test_keys_are_independent_per_action() {
        let tracker = CooldownTracker::new();
        let cooldown = Duration::from_secs(60);
        let now = Instant::now();
        assert!(tracker.try_fire(&CooldownKey::new("r1", Action::SaveMemory), cooldown, now));
        assert!(tracker.try_fire(&CooldownKey::new("r1", Action::SearchMemory), cooldown, now));
        assert!(tracker.try_fire(&CooldownKey::new("r2", Action::SaveMemory), cooldown, now));
    }

    #[test]
    fn test_zero_cooldown_always_ready() {
        let tracker = CooldownTracker::new();
        let key = CooldownKey::new("r", Action::SaveMemory);
        let now = Instant::now();
        assert!(tracker.try_fire(&key, Duration::ZERO, now));
        assert!(tracker.try_fire(&key, Duration::ZERO, now));
    }

    #[test]
    fn test_concurrent_claims_single_winner() {
        let tracker = Arc::new(CooldownTracker::new());
        let now = Instant::now();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let tracker = tracker.clone();
                std::thread::spawn(move || {
                    tracker.try_fire(
                        &CooldownKey::new("race", Action::SaveMemory),
                        Duration::from_secs(60),
                        now,
                    )
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_reset() {
        let tracker = CooldownTracker::new();
        let key = CooldownKey::new("r", Action::SaveMemory);
        let now = Instant::now();
        tracker.try_fire(&key, Duration::from_secs(60), now);
        tracker.reset();
        assert!(tracker.try_fire(&key, Duration::from_secs(60), now));
    }
}
