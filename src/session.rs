//! WizardSession: the single-threaded event loop hosting the flow and the
//! exit sequence.
//!
//! Every asynchronous platform answer arrives as a [`WizardEvent`] on one
//! channel and is handled in order, so the flow controller and relays need
//! no locks. The host instance (an id plus a cancellation token) stands in
//! for the platform's recreatable UI host: recreating it cancels pending
//! timers and rebuilds per-instance state, while provisioning progress is
//! re-read from the process store.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::WizardConfig;
use crate::error::Result;
use crate::finish::{CompletionSequencer, SequencerStatus};
use crate::flow::{ExternalResult, FlowController, FlowStatus};
use crate::platform::{
    ActivityLauncher, DeviceControl, DeviceManagement, ExitAnimator, StepAvailability,
};
use crate::provisioning::ProvisioningPhase;
use crate::script::StepGraph;
use crate::store::{Scope, SettingsStore, settings_keys};

/// Inputs to the session loop.
#[derive(Debug, Clone, PartialEq)]
pub enum WizardEvent {
    /// A delegated component reported back for `step`.
    ExternalResult { step: String, result: ExternalResult },
    /// Back pressed on the running step.
    BackRequest,
    EnrollmentReturned,
    FinalizationReturned,
    /// The relaunch timer fired for host `instance`.
    RelaunchCheck { instance: Uuid },
    /// The exit animation ended for host `instance`.
    AnimationEnded { instance: Uuid },
}

/// What the session is doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    /// Waiting on the delegated component of `step`.
    InFlow { step: String },
    /// Enrollment or finalization is running.
    Provisioning,
    /// Waiting for the platform to relaunch the host after finalization.
    AwaitingRelaunch,
    Animating,
    Complete,
    WipeRequired,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::WipeRequired)
    }
}

/// How a launch went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// Setup finished earlier; nothing was entered.
    AlreadyComplete,
    /// A failed enrollment left the device needing a reset.
    WipeRequired,
    /// The flow started from its first step.
    Started(SessionStatus),
    /// Provisioning was under way and resumed.
    Resumed(SessionStatus),
}

/// The platform collaborators a session runs against.
#[derive(Clone)]
pub struct WizardDeps {
    pub launcher: Arc<dyn ActivityLauncher>,
    pub availability: Arc<dyn StepAvailability>,
    pub management: Arc<dyn DeviceManagement>,
    pub device: Arc<dyn DeviceControl>,
    pub animator: Arc<dyn ExitAnimator>,
    /// Survives process death.
    pub durable: Arc<dyn SettingsStore>,
    /// Survives host recreation only.
    pub process: Arc<dyn SettingsStore>,
}

impl WizardDeps {
    /// Wire every collaborator to one platform implementation.
    pub fn from_platform<P>(
        platform: Arc<P>,
        durable: Arc<dyn SettingsStore>,
        process: Arc<dyn SettingsStore>,
    ) -> Self
    where
        P: ActivityLauncher
            + StepAvailability
            + DeviceManagement
            + DeviceControl
            + ExitAnimator
            + 'static,
    {
        Self {
            launcher: platform.clone(),
            availability: platform.clone(),
            management: platform.clone(),
            device: platform.clone(),
            animator: platform,
            durable,
            process,
        }
    }
}

struct HostInstance {
    id: Uuid,
    cancel: CancellationToken,
}

impl HostInstance {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
        }
    }
}

pub struct WizardSession {
    config: WizardConfig,
    deps: WizardDeps,
    flow: FlowController,
    sequencer: CompletionSequencer,
    host: HostInstance,
    status: SessionStatus,
    events_tx: UnboundedSender<WizardEvent>,
    events_rx: UnboundedReceiver<WizardEvent>,
}

impl WizardSession {
    pub fn new(config: WizardConfig, graph: Arc<StepGraph>, deps: WizardDeps) -> Self {
        let (events_tx, events_rx) = unbounded_channel();
        let host = HostInstance::new();
        let flow = FlowController::new(
            graph,
            Arc::clone(&deps.launcher),
            Arc::clone(&deps.availability),
            Arc::clone(&deps.process),
        );
        let sequencer = Self::sequencer_for(&config, &deps, host.id);
        Self {
            config,
            deps,
            flow,
            sequencer,
            host,
            status: SessionStatus::Idle,
            events_tx,
            events_rx,
        }
    }

    fn sequencer_for(config: &WizardConfig, deps: &WizardDeps, instance: Uuid) -> CompletionSequencer {
        CompletionSequencer::new(
            config,
            Arc::clone(&deps.management),
            Arc::clone(&deps.device),
            Arc::clone(&deps.animator),
            Arc::clone(&deps.durable),
            Arc::clone(&deps.process),
            instance,
        )
    }

    /// Sender for platform callbacks.
    pub fn events(&self) -> UnboundedSender<WizardEvent> {
        self.events_tx.clone()
    }

    /// Id of the current host instance.
    pub fn host_id(&self) -> Uuid {
        self.host.id
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn flow(&self) -> &FlowController {
        &self.flow
    }

    pub fn sequencer(&self) -> &CompletionSequencer {
        &self.sequencer
    }

    /// Entry point: decide whether to run, resume, or refuse.
    pub async fn launch(&mut self) -> Result<LaunchOutcome> {
        let phase = self.sequencer.coordinator().phase().await?;

        if phase != ProvisioningPhase::Done && self.setup_complete().await? {
            info!("Setup already complete, not entering the flow");
            self.status = SessionStatus::Complete;
            return Ok(LaunchOutcome::AlreadyComplete);
        }

        if self
            .deps
            .durable
            .get_bool(Scope::App, settings_keys::WIPE_REQUIRED)
            .await?
        {
            warn!("Device reset required, presenting reset dialog");
            self.deps.device.present_reset_dialog().await?;
            self.status = SessionStatus::WipeRequired;
            return Ok(LaunchOutcome::WipeRequired);
        }

        if let Err(e) = self.deps.device.set_status_bar_enabled(false).await {
            warn!("Failed to disable status bar: {}", e);
        }

        if phase > ProvisioningPhase::None {
            info!(%phase, "Resuming provisioning");
            let status = self.sequencer.on_host_created().await?;
            return Ok(LaunchOutcome::Resumed(self.apply_sequencer(status)));
        }

        let status = self.flow.start().await?;
        Ok(LaunchOutcome::Started(self.after_flow(status).await?))
    }

    /// Handle one event.
    pub async fn handle(&mut self, event: WizardEvent) -> Result<SessionStatus> {
        if self.status.is_terminal() {
            debug!(?event, "Session finished, dropping event");
            return Ok(self.status.clone());
        }

        match event {
            WizardEvent::ExternalResult { step, result } => {
                let status = self.flow.on_external_result(&step, result).await?;
                self.after_flow(status).await
            }
            WizardEvent::BackRequest => {
                let status = self.flow.on_back_request().await?;
                self.after_flow(status).await
            }
            WizardEvent::EnrollmentReturned => {
                let status = self.sequencer.on_enrollment_returned().await?;
                Ok(self.apply_sequencer(status))
            }
            WizardEvent::FinalizationReturned => {
                let status = self.sequencer.on_finalization_returned().await?;
                Ok(self.apply_sequencer(status))
            }
            WizardEvent::RelaunchCheck { instance } => {
                if instance != self.host.id {
                    debug!(%instance, "Relaunch check for a stale host");
                    return Ok(self.status.clone());
                }
                let status = self.sequencer.on_relaunch_check().await?;
                Ok(self.apply_sequencer(status))
            }
            WizardEvent::AnimationEnded { instance } => {
                if instance != self.host.id {
                    debug!(%instance, "Animation end for a stale host");
                    return Ok(self.status.clone());
                }
                let status = self.sequencer.on_animation_ended().await?;
                Ok(self.apply_sequencer(status))
            }
        }
    }

    /// Wait for the next event and handle it.
    pub async fn next_event(&mut self) -> Result<SessionStatus> {
        match self.events_rx.recv().await {
            Some(event) => self.handle(event).await,
            None => Ok(self.status.clone()),
        }
    }

    /// Handle events until setup completes or a reset is required.
    pub async fn run(&mut self) -> Result<SessionStatus> {
        while !self.status.is_terminal() {
            self.next_event().await?;
        }
        Ok(self.status.clone())
    }

    /// The platform destroyed and recreated the host. Pending timers die
    /// with the old instance; provisioning resumes from the stored phase.
    pub async fn recreate_host(&mut self) -> Result<SessionStatus> {
        self.host.cancel.cancel();
        self.host = HostInstance::new();
        self.sequencer = Self::sequencer_for(&self.config, &self.deps, self.host.id);
        info!(instance = %self.host.id, "Host recreated");

        match self.sequencer.on_host_created().await? {
            SequencerStatus::Idle => Ok(self.status.clone()),
            status => Ok(self.apply_sequencer(status)),
        }
    }

    async fn setup_complete(&self) -> Result<bool> {
        if self
            .deps
            .durable
            .get_bool(Scope::Device, settings_keys::USER_SETUP_COMPLETE)
            .await?
        {
            return Ok(true);
        }
        Ok(!self.deps.device.is_entry_point_enabled().await)
    }

    async fn after_flow(&mut self, status: FlowStatus) -> Result<SessionStatus> {
        match status {
            FlowStatus::Waiting { step } => {
                self.status = SessionStatus::InFlow { step };
                Ok(self.status.clone())
            }
            FlowStatus::Ended => {
                let status = self.sequencer.begin().await?;
                Ok(self.apply_sequencer(status))
            }
            FlowStatus::Ignored => Ok(self.status.clone()),
        }
    }

    fn apply_sequencer(&mut self, status: SequencerStatus) -> SessionStatus {
        self.status = match status {
            SequencerStatus::Idle => SessionStatus::Idle,
            SequencerStatus::Provisioning => SessionStatus::Provisioning,
            SequencerStatus::ScheduleRelaunchCheck(delay) => {
                self.schedule_relaunch_check(delay);
                SessionStatus::AwaitingRelaunch
            }
            SequencerStatus::Animating => SessionStatus::Animating,
            SequencerStatus::Complete => SessionStatus::Complete,
            SequencerStatus::WipeRequired => SessionStatus::WipeRequired,
            SequencerStatus::Ignored => self.status.clone(),
        };
        self.status.clone()
    }

    /// Single-shot timer bound to the current host instance.
    fn schedule_relaunch_check(&self, delay: Duration) {
        let cancel = self.host.cancel.clone();
        let events = self.events_tx.clone();
        let instance = self.host.id;
        debug!(%instance, delay_ms = delay.as_millis() as u64, "Relaunch check scheduled");

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(%instance, "Relaunch check cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    let _ = events.send(WizardEvent::RelaunchCheck { instance });
                }
            }
        });
    }
}

impl Drop for WizardSession {
    fn drop(&mut self) {
        self.host.cancel.cancel();
    }
}
