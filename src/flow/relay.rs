//! Delegation relay: runs one step by launching an external component and
//! translating its result into a step result.

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{FlowError, PlatformError};
use crate::platform::{ActivityLauncher, LaunchRequest, StepAvailability};
use crate::script::Step;

use super::result::{CompletionCode, ExternalResult, StepResult};

/// Collaborators and launch context borrowed for one relay call.
pub struct RelayContext<'a> {
    pub launcher: &'a dyn ActivityLauncher,
    pub availability: &'a dyn StepAvailability,
    /// Where the running script came from.
    pub origin: &'a str,
    pub extras: &'a Map<String, Value>,
}

/// What the relay did with a start or a result.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayOutcome {
    /// The component is running; its result arrives later.
    Launched,
    /// A back-request was consumed by relaunching this step.
    Restarted,
    /// The step is done; route this result.
    Finished(StepResult),
}

/// Per-step delegation state. At most one delegation is in flight.
#[derive(Debug, Clone)]
pub struct DelegationRelay {
    step_id: String,
    not_found: bool,
    in_flight: bool,
}

impl DelegationRelay {
    pub fn new(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            not_found: false,
            in_flight: false,
        }
    }

    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    /// Set once the action failed to resolve on the last start.
    pub fn is_not_found(&self) -> bool {
        self.not_found
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Resolve the step's action and launch it.
    ///
    /// A missing component is not an error: the relay flags itself and
    /// finishes immediately with `NOT_FOUND`.
    pub async fn start(
        &mut self,
        step: &Step,
        ctx: &RelayContext<'_>,
    ) -> Result<RelayOutcome, FlowError> {
        if self.in_flight {
            return Err(FlowError::DelegationInFlight {
                id: self.step_id.clone(),
            });
        }
        self.not_found = false;

        let Some(component) = ctx.launcher.resolve(step.action()).await else {
            info!(step = %self.step_id, action = %step.action(), "No component handles action");
            return Ok(self.target_not_found());
        };

        let request = LaunchRequest {
            step_id: self.step_id.clone(),
            action: step.action().clone(),
            component,
            script_origin: ctx.origin.to_string(),
            extras: ctx.extras.clone(),
        };

        match ctx.launcher.launch(&request).await {
            Ok(()) => {
                debug!(step = %self.step_id, component = %request.component, "Delegation launched");
                self.in_flight = true;
                Ok(RelayOutcome::Launched)
            }
            Err(PlatformError::ActivityNotFound { action }) => {
                warn!(step = %self.step_id, %action, "Component vanished before launch");
                Ok(self.target_not_found())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Translate the delegated component's result.
    ///
    /// Decision order: a not-found flag wins; any non-cancel result is
    /// forwarded; a back-request restarts this step if it is still
    /// available and is re-emitted upward otherwise; anything else is a
    /// plain cancel.
    pub async fn on_external_result(
        &mut self,
        step: &Step,
        result: ExternalResult,
        ctx: &RelayContext<'_>,
    ) -> Result<RelayOutcome, FlowError> {
        self.in_flight = false;

        if self.not_found {
            return Ok(RelayOutcome::Finished(StepResult::forward(
                CompletionCode::NOT_FOUND,
            )));
        }

        match result {
            ExternalResult::Returned { code, data } => {
                debug!(step = %self.step_id, %code, "Delegation returned");
                Ok(RelayOutcome::Finished(StepResult::Forward { code, data }))
            }
            ExternalResult::BackRequested => self.receive_back_request(step, ctx).await,
            ExternalResult::Canceled => Ok(RelayOutcome::Finished(StepResult::forward(
                CompletionCode::CANCELED,
            ))),
        }
    }

    /// A back-request reached this step. Consume it by restarting if the
    /// step is still available, otherwise pass it on.
    pub async fn receive_back_request(
        &mut self,
        step: &Step,
        ctx: &RelayContext<'_>,
    ) -> Result<RelayOutcome, FlowError> {
        self.in_flight = false;

        if !ctx.availability.is_available(&self.step_id).await {
            debug!(step = %self.step_id, "Unavailable step re-emits back request");
            return Ok(RelayOutcome::Finished(StepResult::BackRequest));
        }

        info!(step = %self.step_id, "Back request restarts step");
        match self.start(step, ctx).await? {
            RelayOutcome::Launched => Ok(RelayOutcome::Restarted),
            other => Ok(other),
        }
    }

    /// The step finished without going through the result channel.
    pub(crate) fn reset_in_flight(&mut self) {
        self.in_flight = false;
    }

    fn target_not_found(&mut self) -> RelayOutcome {
        self.not_found = true;
        RelayOutcome::Finished(StepResult::forward(CompletionCode::NOT_FOUND))
    }
}
