//! Declarative step graph: which step runs next for a given completion code.

pub mod action;
pub mod graph;
pub mod transitions;

pub use action::{ActionRef, Step};
pub use graph::{CodeDef, ScriptDef, StepDef, StepGraph, TransitionDef};
pub use transitions::{NextStep, TransitionTable};
