//! Flow controller: owns the execution cursor and routes step results.
//!
//! Walks the [`StepGraph`]: starts steps through their relays, routes each
//! completion through the step's transition table, skips steps whose
//! availability predicate no longer holds, and carries back-requests from
//! one step to the step before it in navigation history.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::error::FlowError;
use crate::platform::{ActivityLauncher, EXTRA_MIN_PASSWORD_COMPLEXITY, StepAvailability};
use crate::script::{NextStep, StepGraph};
use crate::store::SettingsStore;

use super::bundle::SettingsBundle;
use super::relay::{DelegationRelay, RelayContext, RelayOutcome};
use super::result::{CompletionCode, ExternalResult, StepResult};

/// The step currently running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionCursor {
    pub step: String,
    /// False once the step's action failed to resolve.
    pub target_found: bool,
}

/// Where the flow stands after handling an input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowStatus {
    /// A delegated component for `step` is running.
    Waiting { step: String },
    /// The graph reached END. Reported exactly once.
    Ended,
    /// The input was not addressed to the running step.
    Ignored,
}

/// Internal routing work, processed iteratively so cycles in the graph
/// never grow the stack.
enum Move {
    /// Enter a step going forward.
    Enter(String),
    /// Route a step's result.
    Complete { step: String, result: StepResult },
    /// `from` asked to go back; deliver the request to its predecessor.
    Back { from: String },
}

pub struct FlowController {
    graph: Arc<StepGraph>,
    launcher: Arc<dyn ActivityLauncher>,
    availability: Arc<dyn StepAvailability>,
    process: Arc<dyn SettingsStore>,
    cursor: Option<ExecutionCursor>,
    /// Steps entered going forward, current last. Skipped steps never appear.
    history: Vec<String>,
    relays: HashMap<String, DelegationRelay>,
    ended: bool,
}

impl FlowController {
    pub fn new(
        graph: Arc<StepGraph>,
        launcher: Arc<dyn ActivityLauncher>,
        availability: Arc<dyn StepAvailability>,
        process: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            graph,
            launcher,
            availability,
            process,
            cursor: None,
            history: Vec::new(),
            relays: HashMap::new(),
            ended: false,
        }
    }

    pub fn cursor(&self) -> Option<&ExecutionCursor> {
        self.cursor.as_ref()
    }

    /// Navigation history, oldest first.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }

    pub fn graph(&self) -> &StepGraph {
        &self.graph
    }

    /// Begin at the graph's start step.
    pub async fn start(&mut self) -> Result<FlowStatus, FlowError> {
        info!(origin = %self.graph.origin(), start = %self.graph.start(), "Starting flow");
        self.cursor = None;
        self.history.clear();
        self.relays.clear();
        self.ended = false;
        let start = self.graph.start().to_string();
        self.drive(Move::Enter(start)).await
    }

    /// Enter `id`, skipping forward through it if it is unavailable.
    pub async fn advance_to(&mut self, id: &str) -> Result<FlowStatus, FlowError> {
        self.graph.step(id)?;
        if self.ended {
            return Err(FlowError::NotRunning);
        }
        self.drive(Move::Enter(id.to_string())).await
    }

    /// The running step completed on its own with `code`.
    pub async fn on_step_completion(
        &mut self,
        code: CompletionCode,
        data: Option<Value>,
    ) -> Result<FlowStatus, FlowError> {
        let step = self.current()?.to_string();
        if let Some(relay) = self.relays.get_mut(&step) {
            relay.reset_in_flight();
        }
        self.drive(Move::Complete {
            step,
            result: StepResult::Forward { code, data },
        })
        .await
    }

    /// A delegated component reported back for `step`.
    pub async fn on_external_result(
        &mut self,
        step: &str,
        result: ExternalResult,
    ) -> Result<FlowStatus, FlowError> {
        match self.cursor.as_ref() {
            Some(cursor) if cursor.step == step => {}
            _ => {
                warn!(step, current = ?self.cursor.as_ref().map(|c| &c.step), "Dropping result for a step that is not running");
                return Ok(FlowStatus::Ignored);
            }
        }

        let graph = Arc::clone(&self.graph);
        let launcher = Arc::clone(&self.launcher);
        let availability = Arc::clone(&self.availability);
        let extras = self.launch_extras().await?;
        let ctx = RelayContext {
            launcher: launcher.as_ref(),
            availability: availability.as_ref(),
            origin: graph.origin(),
            extras: &extras,
        };

        let definition = graph.step(step)?;
        let relay = self
            .relays
            .entry(step.to_string())
            .or_insert_with(|| DelegationRelay::new(step));
        let outcome = relay.on_external_result(definition, result, &ctx).await?;
        let target_found = !relay.is_not_found();
        self.set_cursor(step, target_found);

        match outcome {
            RelayOutcome::Launched | RelayOutcome::Restarted => Ok(FlowStatus::Waiting {
                step: step.to_string(),
            }),
            RelayOutcome::Finished(result) => {
                self.drive(Move::Complete {
                    step: step.to_string(),
                    result,
                })
                .await
            }
        }
    }

    /// Back pressed on the running step: the request goes to the step
    /// before it. With nothing before it, the running step restarts.
    pub async fn on_back_request(&mut self) -> Result<FlowStatus, FlowError> {
        let step = self.current()?.to_string();
        if let Some(relay) = self.relays.get_mut(&step) {
            relay.reset_in_flight();
        }
        self.drive(Move::Back { from: step }).await
    }

    fn current(&self) -> Result<&str, FlowError> {
        match (&self.cursor, self.ended) {
            (Some(cursor), false) => Ok(&cursor.step),
            _ => Err(FlowError::NotRunning),
        }
    }

    fn set_cursor(&mut self, step: &str, target_found: bool) {
        self.cursor = Some(ExecutionCursor {
            step: step.to_string(),
            target_found,
        });
    }

    /// Extras attached to every launch, derived from choices made so far.
    async fn launch_extras(&self) -> Result<Map<String, Value>, FlowError> {
        let bundle = SettingsBundle::load(self.process.as_ref()).await?;
        let mut extras = Map::new();
        let complexity = bundle.security_profile().min_password_complexity();
        if complexity > 0 {
            extras.insert(EXTRA_MIN_PASSWORD_COMPLEXITY.to_string(), json!(complexity));
        }
        Ok(extras)
    }

    async fn remember_settings(&self, data: &Value) -> Result<(), FlowError> {
        let mut bundle = SettingsBundle::load(self.process.as_ref()).await?;
        if bundle.merge_result_data(data) {
            bundle.save(self.process.as_ref()).await?;
            debug!(keys = bundle.as_map().len(), "Deferred settings updated");
        }
        Ok(())
    }

    /// Launch `id` through its relay. Returns the next move if the step
    /// finished without waiting.
    async fn launch(&mut self, id: &str) -> Result<Option<Move>, FlowError> {
        let graph = Arc::clone(&self.graph);
        let launcher = Arc::clone(&self.launcher);
        let availability = Arc::clone(&self.availability);
        let extras = self.launch_extras().await?;
        let ctx = RelayContext {
            launcher: launcher.as_ref(),
            availability: availability.as_ref(),
            origin: graph.origin(),
            extras: &extras,
        };

        let step = graph.step(id)?;
        let relay = self
            .relays
            .entry(id.to_string())
            .or_insert_with(|| DelegationRelay::new(id));
        let outcome = relay.start(step, &ctx).await?;
        let target_found = !relay.is_not_found();
        self.set_cursor(id, target_found);

        Ok(match outcome {
            RelayOutcome::Launched | RelayOutcome::Restarted => None,
            RelayOutcome::Finished(result) => Some(Move::Complete {
                step: id.to_string(),
                result,
            }),
        })
    }

    fn finish(&mut self) -> FlowStatus {
        info!(steps = self.history.len(), "Flow reached END");
        self.ended = true;
        self.cursor = None;
        self.history.clear();
        self.relays.clear();
        FlowStatus::Ended
    }

    async fn drive(&mut self, mut next: Move) -> Result<FlowStatus, FlowError> {
        let mut skipped = 0usize;

        loop {
            next = match next {
                Move::Enter(id) => {
                    if !self.availability.is_available(&id).await {
                        skipped += 1;
                        if skipped > self.graph.len() {
                            return Err(FlowError::SkipCycle { id, count: skipped });
                        }
                        info!(step = %id, "Step unavailable, skipping");
                        Move::Complete {
                            step: id,
                            result: StepResult::forward(CompletionCode::SKIP),
                        }
                    } else {
                        skipped = 0;
                        debug!(step = %id, "Entering step");
                        self.history.push(id.clone());
                        self.relays.insert(id.clone(), DelegationRelay::new(id.clone()));
                        match self.launch(&id).await? {
                            Some(mv) => mv,
                            None => return Ok(FlowStatus::Waiting { step: id }),
                        }
                    }
                }
                Move::Complete {
                    step,
                    result: StepResult::Forward { code, data },
                } => {
                    if let Some(data) = &data {
                        self.remember_settings(data).await?;
                    }
                    match self.graph.resolve_next(&step, code)? {
                        NextStep::End => return Ok(self.finish()),
                        NextStep::Step(target) => {
                            debug!(from = %step, %code, to = %target, "Routing");
                            Move::Enter(target)
                        }
                    }
                }
                Move::Complete {
                    step,
                    result: StepResult::BackRequest,
                } => Move::Back { from: step },
                Move::Back { from } => match self.deliver_back(from).await? {
                    Some(mv) => mv,
                    None => return self.waiting(),
                },
            };
        }
    }

    fn waiting(&self) -> Result<FlowStatus, FlowError> {
        Ok(FlowStatus::Waiting {
            step: self.current()?.to_string(),
        })
    }

    /// Walk history backwards, offering the back-request to each step's
    /// relay until one consumes it. Returns `None` once a step restarted.
    async fn deliver_back(&mut self, from: String) -> Result<Option<Move>, FlowError> {
        if self.history.last() == Some(&from) {
            self.history.pop();
        }

        let graph = Arc::clone(&self.graph);
        let launcher = Arc::clone(&self.launcher);
        let availability = Arc::clone(&self.availability);
        let extras = self.launch_extras().await?;
        let ctx = RelayContext {
            launcher: launcher.as_ref(),
            availability: availability.as_ref(),
            origin: graph.origin(),
            extras: &extras,
        };

        while let Some(previous) = self.history.last().cloned() {
            let step = graph.step(&previous)?;
            let relay = self
                .relays
                .entry(previous.clone())
                .or_insert_with(|| DelegationRelay::new(previous.clone()));
            let outcome = relay.receive_back_request(step, &ctx).await?;
            let target_found = !relay.is_not_found();

            match outcome {
                RelayOutcome::Finished(StepResult::BackRequest) => {
                    self.history.pop();
                }
                RelayOutcome::Launched | RelayOutcome::Restarted => {
                    info!(from = %from, to = %previous, "Back request restarted step");
                    self.set_cursor(&previous, target_found);
                    return Ok(None);
                }
                RelayOutcome::Finished(result) => {
                    self.set_cursor(&previous, target_found);
                    return Ok(Some(Move::Complete {
                        step: previous,
                        result,
                    }));
                }
            }
        }

        warn!(step = %from, "Back request reached the first step, re-entering it");
        Ok(Some(Move::Enter(from)))
    }
}
