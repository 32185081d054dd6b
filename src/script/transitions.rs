//! Per-step routing from completion code to the next step.

use std::collections::BTreeMap;

use crate::flow::CompletionCode;

/// Where a transition leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextStep {
    Step(String),
    /// No further step; the flow ends and the completion sequence takes over.
    End,
}

impl NextStep {
    pub fn step(id: impl Into<String>) -> Self {
        Self::Step(id.into())
    }

    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }
}

impl std::fmt::Display for NextStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Step(id) => write!(f, "{id}"),
            Self::End => write!(f, "END"),
        }
    }
}

/// Mapping of completion code to next step, with an optional default slot.
///
/// Lookups never fail: an unmatched code uses the default, and with no
/// default the flow ends. `NOT_FOUND` without its own entry routes as
/// `SKIP` would, so a missing target always proceeds as if skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionTable {
    entries: BTreeMap<CompletionCode, NextStep>,
    default: Option<NextStep>,
}

impl TransitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the route for `code`. Returns the route it replaced, if any.
    pub fn put(&mut self, code: CompletionCode, next: NextStep) -> Option<NextStep> {
        self.entries.insert(code, next)
    }

    /// Set the default route. Returns the default it replaced, if any.
    pub fn set_default(&mut self, next: NextStep) -> Option<NextStep> {
        self.default.replace(next)
    }

    /// Builder form of [`put`](Self::put).
    pub fn with(mut self, code: CompletionCode, next: NextStep) -> Self {
        self.put(code, next);
        self
    }

    /// Builder form of [`set_default`](Self::set_default).
    pub fn with_default(mut self, next: NextStep) -> Self {
        self.set_default(next);
        self
    }

    pub fn resolve(&self, code: CompletionCode) -> NextStep {
        if let Some(next) = self.entries.get(&code) {
            return next.clone();
        }
        if code == CompletionCode::NOT_FOUND
            && let Some(next) = self.entries.get(&CompletionCode::SKIP)
        {
            return next.clone();
        }
        self.default.clone().unwrap_or(NextStep::End)
    }

    /// Every step id this table can route to.
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.entries
            .values()
            .chain(self.default.iter())
            .filter_map(|next| match next {
                NextStep::Step(id) => Some(id.as_str()),
                NextStep::End => None,
            })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.default.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_entry_wins_over_default() {
        let table = TransitionTable::new()
            .with(CompletionCode::OK, NextStep::step("b"))
            .with_default(NextStep::step("z"));
        assert_eq!(table.resolve(CompletionCode::OK), NextStep::step("b"));
        assert_eq!(table.resolve(CompletionCode(42)), NextStep::step("z"));
    }

    #[test]
    fn empty_table_ends() {
        let table = TransitionTable::new();
        assert!(table.is_empty());
        assert_eq!(table.resolve(CompletionCode::OK), NextStep::End);
        assert_eq!(table.resolve(CompletionCode::NOT_FOUND), NextStep::End);
    }

    #[test]
    fn later_put_overwrites() {
        let mut table = TransitionTable::new();
        assert!(table.put(CompletionCode::OK, NextStep::step("first")).is_none());
        let replaced = table.put(CompletionCode::OK, NextStep::step("second"));
        assert_eq!(replaced, Some(NextStep::step("first")));
        assert_eq!(table.resolve(CompletionCode::OK), NextStep::step("second"));
    }

    #[test]
    fn not_found_falls_back_to_skip_then_default() {
        let table = TransitionTable::new()
            .with(CompletionCode::SKIP, NextStep::step("after_skip"))
            .with_default(NextStep::step("fallback"));
        assert_eq!(
            table.resolve(CompletionCode::NOT_FOUND),
            NextStep::step("after_skip")
        );

        let table = TransitionTable::new().with_default(NextStep::step("fallback"));
        assert_eq!(
            table.resolve(CompletionCode::NOT_FOUND),
            NextStep::step("fallback")
        );

        let table = TransitionTable::new()
            .with(CompletionCode::NOT_FOUND, NextStep::End)
            .with(CompletionCode::SKIP, NextStep::step("after_skip"));
        assert_eq!(table.resolve(CompletionCode::NOT_FOUND), NextStep::End);
    }

    #[test]
    fn targets_lists_steps_only() {
        let table = TransitionTable::new()
            .with(CompletionCode::OK, NextStep::step("b"))
            .with(CompletionCode::SKIP, NextStep::End)
            .with_default(NextStep::step("c"));
        let mut targets: Vec<&str> = table.targets().collect();
        targets.sort();
        assert_eq!(targets, vec!["b", "c"]);
    }
}
