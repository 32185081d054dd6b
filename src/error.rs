//! Error types for the setup wizard.

use crate::provisioning::ProvisioningPhase;

/// Top-level error type for the wizard.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Flow error: {0}")]
    Flow(#[from] FlowError),

    #[error("Provisioning error: {0}")]
    Provisioning(#[from] ProvisioningError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while building a step graph from a declarative script.
///
/// Any of these rejects the whole script.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("Failed to parse script: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to read script: {0}")]
    Io(#[from] std::io::Error),

    #[error("Script defines no steps")]
    Empty,

    #[error("Step at index {index} must define an id")]
    MissingId { index: usize },

    #[error("Step {id} must define an action reference")]
    MissingAction { id: String },

    #[error("Step {id} is defined more than once")]
    DuplicateStep { id: String },

    #[error("Step {from} transitions to unknown step {target}")]
    UnknownTarget { from: String, target: String },

    #[error("Start step {id} is not defined")]
    UnknownStart { id: String },

    #[error("Step {id} uses unknown result code name {name}")]
    UnknownCode { id: String, name: String },
}

/// Settings persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Value for {key} has unexpected type: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Flow controller errors.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("Step {id} is not part of the graph")]
    UnknownStep { id: String },

    #[error("No step is currently running")]
    NotRunning,

    #[error("Step {id} already has a delegation in flight")]
    DelegationInFlight { id: String },

    #[error("Skipped {count} unavailable steps in a row without reaching one that can run (last: {id})")]
    SkipCycle { id: String, count: usize },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),
}

/// Provisioning coordinator errors.
///
/// Unrecoverable enrollment outcomes are not errors; they surface as the
/// coordinator's wipe-required outcome.
#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    #[error("Cannot transition provisioning from {from} to {to}")]
    InvalidTransition {
        from: ProvisioningPhase,
        to: ProvisioningPhase,
    },

    #[error("Event {event} is not expected in phase {phase}")]
    UnexpectedEvent {
        event: String,
        phase: ProvisioningPhase,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),
}

/// Failures reported by black-box platform collaborators.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("No component can handle {action}")]
    ActivityNotFound { action: String },

    #[error("Platform call {call} failed: {reason}")]
    CallFailed { call: String, reason: String },
}

/// Result type alias for the wizard.
pub type Result<T> = std::result::Result<T, Error>;
