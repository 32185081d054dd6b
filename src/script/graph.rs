//! The step graph and its declarative definition.
//!
//! A script is parsed once at startup into an immutable [`StepGraph`].
//! The graph may contain cycles; nothing here assumes the flow is acyclic.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{trace, warn};

use crate::error::{FlowError, ScriptError};
use crate::flow::CompletionCode;

use super::action::{ActionRef, Step};
use super::transitions::{NextStep, TransitionTable};

/// Declarative script as read from JSON.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScriptDef {
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepDef>,
}

/// One step entry in a script. Required fields are optional here so that
/// a missing id or action is reported as a [`ScriptError`], not a parse error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepDef {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub transitions: Vec<TransitionDef>,
}

/// One `code → next` entry. No `code` means the default slot; no `next`
/// means the flow ends.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransitionDef {
    #[serde(default)]
    pub code: Option<CodeDef>,
    #[serde(default)]
    pub next: Option<String>,
}

/// A result code written either numerically or by name.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CodeDef {
    Number(i32),
    Name(String),
}

/// The full set of steps, built once per process.
#[derive(Debug, Clone)]
pub struct StepGraph {
    origin: String,
    start: String,
    order: Vec<String>,
    steps: HashMap<String, Step>,
}

impl StepGraph {
    /// Read and build a graph from a JSON script file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ScriptError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let def: ScriptDef = serde_json::from_str(&raw)?;
        Self::from_def(def, path.display().to_string())
    }

    /// Build a graph from a JSON script held in memory.
    pub fn from_json(json: &str) -> Result<Self, ScriptError> {
        let def: ScriptDef = serde_json::from_str(json)?;
        Self::from_def(def, "inline")
    }

    /// Build a graph from a parsed script. `origin` names where it came from
    /// and is passed along to launched components.
    pub fn from_def(def: ScriptDef, origin: impl Into<String>) -> Result<Self, ScriptError> {
        let mut steps = Vec::with_capacity(def.steps.len());

        for (index, step_def) in def.steps.into_iter().enumerate() {
            let id = step_def
                .id
                .filter(|id| !id.trim().is_empty())
                .ok_or(ScriptError::MissingId { index })?;
            let action = step_def
                .action
                .filter(|action| !action.trim().is_empty())
                .ok_or_else(|| ScriptError::MissingAction { id: id.clone() })?;

            trace!(step = %id, action = %action, "Parsing step");

            let mut transitions = TransitionTable::new();
            for transition in step_def.transitions {
                let next = match transition.next {
                    Some(target) => NextStep::Step(target),
                    None => NextStep::End,
                };
                let replaced = match transition.code {
                    None => transitions.set_default(next.clone()),
                    Some(code) => {
                        let code = resolve_code(&id, code)?;
                        transitions.put(code, next.clone())
                    }
                };
                if let Some(previous) = replaced {
                    warn!(
                        step = %id,
                        "Duplicate transition overrides {} with {}",
                        previous, next
                    );
                }
            }

            steps.push(Step::new(id, ActionRef::new(action), transitions));
        }

        Self::from_steps(steps, def.start, origin)
    }

    /// Build a graph from already-constructed steps.
    pub fn from_steps(
        steps: Vec<Step>,
        start: Option<String>,
        origin: impl Into<String>,
    ) -> Result<Self, ScriptError> {
        let first = steps.first().ok_or(ScriptError::Empty)?.id().to_string();

        let mut order = Vec::with_capacity(steps.len());
        let mut by_id = HashMap::with_capacity(steps.len());
        for (index, step) in steps.into_iter().enumerate() {
            let id = step.id().to_string();
            if id.trim().is_empty() {
                return Err(ScriptError::MissingId { index });
            }
            if step.action().as_str().trim().is_empty() {
                return Err(ScriptError::MissingAction { id });
            }
            if by_id.insert(id.clone(), step).is_some() {
                return Err(ScriptError::DuplicateStep { id });
            }
            order.push(id);
        }

        for id in &order {
            let step = &by_id[id];
            if let Some(target) = step.transitions().targets().find(|t| !by_id.contains_key(*t)) {
                return Err(ScriptError::UnknownTarget {
                    from: id.clone(),
                    target: target.to_string(),
                });
            }
        }

        let start = start.unwrap_or(first);
        if !by_id.contains_key(&start) {
            return Err(ScriptError::UnknownStart { id: start });
        }

        Ok(Self {
            origin: origin.into(),
            start,
            order,
            steps: by_id,
        })
    }

    /// Where the flow begins.
    pub fn start(&self) -> &str {
        &self.start
    }

    /// Where the script was loaded from.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn get(&self, id: &str) -> Option<&Step> {
        self.steps.get(id)
    }

    pub fn step(&self, id: &str) -> Result<&Step, FlowError> {
        self.steps
            .get(id)
            .ok_or_else(|| FlowError::UnknownStep { id: id.to_string() })
    }

    /// Deterministic routing: depends only on the step's declared table.
    pub fn resolve_next(&self, id: &str, code: CompletionCode) -> Result<NextStep, FlowError> {
        Ok(self.step(id)?.next(code))
    }

    /// Steps in declaration order.
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.order.iter().filter_map(|id| self.steps.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

fn resolve_code(step: &str, code: CodeDef) -> Result<CompletionCode, ScriptError> {
    match code {
        CodeDef::Number(n) => Ok(CompletionCode(n)),
        CodeDef::Name(name) => {
            CompletionCode::from_name(&name).ok_or_else(|| ScriptError::UnknownCode {
                id: step.to_string(),
                name,
            })
        }
    }
}
