// src/lib.rs
// recall-trigger - decides when an assistant should save or recall long-term memory

pub mod arbiter;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod features;
pub mod feedback;
pub mod memory;
pub mod rules;
pub mod types;

pub use config::EngineConfig;
pub use engine::{Collaborators, EngineMetrics, TriggerEngine};
pub use error::{ErrorKind, Result, TriggerError};
pub use types::{
    Action, ActionCandidate, ConversationWindow, Decision, DecisionMethod, Feedback, Message,
    OperatingMode, Platform, Role,
};
