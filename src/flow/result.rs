//! Completion codes and the results that flow between steps.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome value a step returns, used to route to the next step.
///
/// The well-known codes mirror the platform's activity result codes; any
/// other value is a step-specific code passed through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompletionCode(pub i32);

impl CompletionCode {
    pub const OK: Self = Self(-1);
    pub const CANCELED: Self = Self(0);
    pub const SKIP: Self = Self(101);
    pub const RETRY: Self = Self(102);
    pub const NOT_FOUND: Self = Self(103);

    /// Look up a well-known code by its script name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ok" => Some(Self::OK),
            "canceled" => Some(Self::CANCELED),
            "skip" => Some(Self::SKIP),
            "retry" => Some(Self::RETRY),
            "not_found" => Some(Self::NOT_FOUND),
            _ => None,
        }
    }
}

impl std::fmt::Display for CompletionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::OK => write!(f, "ok"),
            Self::CANCELED => write!(f, "canceled"),
            Self::SKIP => write!(f, "skip"),
            Self::RETRY => write!(f, "retry"),
            Self::NOT_FOUND => write!(f, "not_found"),
            Self(other) => write!(f, "{other}"),
        }
    }
}

/// What an external component handed back through the result channel.
///
/// A cancellation carrying the back-request marker is its own variant, so
/// the marker cannot be attached to a non-cancel result.
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalResult {
    /// Any non-cancel result code, with optional payload.
    Returned { code: CompletionCode, data: Option<Value> },
    /// Plain cancellation.
    Canceled,
    /// Cancellation asking the flow to go back to the previous step.
    BackRequested,
}

impl ExternalResult {
    /// Normalize a raw result: `back_marker` only counts on a cancel.
    pub fn from_raw(code: CompletionCode, data: Option<Value>, back_marker: bool) -> Self {
        if code != CompletionCode::CANCELED {
            Self::Returned { code, data }
        } else if back_marker {
            Self::BackRequested
        } else {
            Self::Canceled
        }
    }

    pub fn ok() -> Self {
        Self::Returned {
            code: CompletionCode::OK,
            data: None,
        }
    }

    pub fn code(code: CompletionCode) -> Self {
        Self::from_raw(code, None, false)
    }
}

/// What a step reports upward to the flow controller.
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult {
    /// Normal completion, routed through the step's transition table.
    Forward { code: CompletionCode, data: Option<Value> },
    /// The previous step in navigation history should take over.
    BackRequest,
}

impl StepResult {
    pub fn forward(code: CompletionCode) -> Self {
        Self::Forward { code, data: None }
    }
}
