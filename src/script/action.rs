//! Steps and the abstract action references they delegate to.

use serde::{Deserialize, Serialize};

use crate::flow::CompletionCode;

use super::transitions::{NextStep, TransitionTable};

/// Abstract reference to the component that carries out a step.
///
/// Resolved at runtime by the platform to zero or one concrete component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionRef(String);

impl ActionRef {
    pub fn new(action: impl Into<String>) -> Self {
        Self(action.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ActionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One node of the onboarding graph. Immutable once the graph is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    id: String,
    action: ActionRef,
    transitions: TransitionTable,
}

impl Step {
    pub fn new(id: impl Into<String>, action: ActionRef, transitions: TransitionTable) -> Self {
        Self {
            id: id.into(),
            action,
            transitions,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn action(&self) -> &ActionRef {
        &self.action
    }

    pub fn transitions(&self) -> &TransitionTable {
        &self.transitions
    }

    pub fn next(&self, code: CompletionCode) -> NextStep {
        self.transitions.resolve(code)
    }
}
