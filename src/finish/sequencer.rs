//! CompletionSequencer: the ordered exit sequence run once the flow ends.
//!
//! Order: exit animation, apply deferred settings, grant default
//! permissions, durable commit, disable the entry point and tear down, go
//! home. The durable commit is the point of no return: once the setup
//! complete flag is written, the remaining steps are best-effort.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WizardConfig;
use crate::error::{Error, PlatformError};
use crate::flow::SettingsBundle;
use crate::platform::{DeviceControl, DeviceManagement, ExitAnimator};
use crate::provisioning::{
    CoordinatorOutcome, ProvisioningCoordinator, ProvisioningPhase, ProvisioningQueryResult,
};
use crate::store::{Scope, SettingsStore, settings_keys};

/// Where the exit sequence stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequencerStatus {
    /// Provisioning has nothing to do yet.
    Idle,
    /// An external enrollment or finalization flow is running.
    Provisioning,
    /// Re-check for the platform relaunch after the delay.
    ScheduleRelaunchCheck(std::time::Duration),
    /// The exit animation is running for the current host.
    Animating,
    /// Setup is committed and the wizard has exited.
    Complete,
    /// A reset is required; the reset dialog is showing.
    WipeRequired,
    /// The input did not apply.
    Ignored,
}

/// Per-host exit sequencer. Provisioning progress lives in the process
/// store, so a recreated host gets a fresh sequencer and resumes from it.
pub struct CompletionSequencer {
    coordinator: ProvisioningCoordinator,
    management: Arc<dyn DeviceManagement>,
    device: Arc<dyn DeviceControl>,
    animator: Arc<dyn ExitAnimator>,
    durable: Arc<dyn SettingsStore>,
    process: Arc<dyn SettingsStore>,
    permission_packages: Vec<String>,
    instance: Uuid,
    begun: bool,
}

impl CompletionSequencer {
    pub fn new(
        config: &WizardConfig,
        management: Arc<dyn DeviceManagement>,
        device: Arc<dyn DeviceControl>,
        animator: Arc<dyn ExitAnimator>,
        durable: Arc<dyn SettingsStore>,
        process: Arc<dyn SettingsStore>,
        instance: Uuid,
    ) -> Self {
        let coordinator = ProvisioningCoordinator::new(
            Arc::clone(&management),
            Arc::clone(&process),
            Arc::clone(&durable),
            config.relaunch_check_delay,
            config.max_relaunch_checks,
        );
        Self {
            coordinator,
            management,
            device,
            animator,
            durable,
            process,
            permission_packages: config.permission_packages.clone(),
            instance,
            begun: false,
        }
    }

    pub fn coordinator(&self) -> &ProvisioningCoordinator {
        &self.coordinator
    }

    /// The flow reached END: the user confirmed. Runs at most once per host.
    pub async fn begin(&mut self) -> Result<SequencerStatus, Error> {
        if self.begun {
            warn!("Exit sequence already started, ignoring");
            return Ok(SequencerStatus::Ignored);
        }
        self.begun = true;
        info!(instance = %self.instance, "Flow ended, starting exit sequence");
        let outcome = self.coordinator.on_confirm().await?;
        self.follow(outcome).await
    }

    /// This host instance was created; resume whatever was in progress.
    pub async fn on_host_created(&mut self) -> Result<SequencerStatus, Error> {
        let outcome = self.coordinator.on_host_created().await?;
        if outcome != CoordinatorOutcome::Idle {
            self.begun = true;
        }
        self.follow(outcome).await
    }

    pub async fn on_enrollment_returned(&mut self) -> Result<SequencerStatus, Error> {
        let outcome = self.coordinator.on_enrollment_returned().await?;
        self.follow(outcome).await
    }

    pub async fn on_finalization_returned(&mut self) -> Result<SequencerStatus, Error> {
        let outcome = self.coordinator.on_finalization_returned().await?;
        self.follow(outcome).await
    }

    pub async fn on_relaunch_check(&mut self) -> Result<SequencerStatus, Error> {
        let outcome = self.coordinator.on_relaunch_check().await?;
        self.follow(outcome).await
    }

    /// The exit animation's end callback.
    pub async fn on_animation_ended(&mut self) -> Result<SequencerStatus, Error> {
        let phase = self.coordinator.phase().await?;
        if phase != ProvisioningPhase::Animating {
            debug!(%phase, "Animation end outside the animating phase");
            return Ok(SequencerStatus::Ignored);
        }

        self.apply_settings_once().await?;
        self.grant_permissions().await;
        self.commit().await?;
        self.exit().await;
        Ok(SequencerStatus::Complete)
    }

    async fn follow(&mut self, outcome: CoordinatorOutcome) -> Result<SequencerStatus, Error> {
        match outcome {
            CoordinatorOutcome::Idle => Ok(SequencerStatus::Idle),
            CoordinatorOutcome::Ignored => Ok(SequencerStatus::Ignored),
            CoordinatorOutcome::AwaitingPlatform => Ok(SequencerStatus::Provisioning),
            CoordinatorOutcome::ScheduleRelaunchCheck(delay) => {
                Ok(SequencerStatus::ScheduleRelaunchCheck(delay))
            }
            CoordinatorOutcome::WipeRequired => {
                self.device.present_reset_dialog().await?;
                Ok(SequencerStatus::WipeRequired)
            }
            CoordinatorOutcome::ExitSequence(phase) => self.run_exit(phase).await,
        }
    }

    async fn run_exit(&mut self, phase: ProvisioningPhase) -> Result<SequencerStatus, Error> {
        match phase {
            ProvisioningPhase::Done => {
                // Committed before the last host went away; only teardown remains.
                info!("Setup already committed, finishing exit");
                self.exit().await;
                Ok(SequencerStatus::Complete)
            }
            ProvisioningPhase::ReadyToAnimate | ProvisioningPhase::Animating => {
                self.coordinator.mark_animating().await?;
                self.animator.start(self.instance).await?;
                debug!(instance = %self.instance, "Exit animation started");
                Ok(SequencerStatus::Animating)
            }
            other => {
                error!(phase = %other, "Exit sequence requested before provisioning settled");
                Ok(SequencerStatus::Ignored)
            }
        }
    }

    async fn apply_settings_once(&self) -> Result<(), Error> {
        if self
            .process
            .get_bool(Scope::App, settings_keys::SETTINGS_APPLIED)
            .await?
        {
            debug!("Deferred settings already applied");
            return Ok(());
        }
        let bundle = SettingsBundle::load(self.process.as_ref()).await?;
        self.device.apply_settings(&bundle).await?;
        self.process
            .put_bool(Scope::App, settings_keys::SETTINGS_APPLIED, true)
            .await?;
        info!(keys = bundle.as_map().len(), "Deferred settings applied");
        Ok(())
    }

    async fn grant_permissions(&self) {
        for package in &self.permission_packages {
            if let Err(e) = self.device.grant_default_permissions(package).await {
                warn!(%package, "Failed to grant default permissions: {}", e);
            }
        }
    }

    /// Point of no return: flip the durable flags, then mark the phase done.
    async fn commit(&self) -> Result<(), Error> {
        if self
            .durable
            .get_bool(Scope::Device, settings_keys::USER_SETUP_COMPLETE)
            .await?
        {
            error!("Setup complete flag already set before commit");
        }

        let profile = self.coordinator.profile().await?;
        if profile.requires_provisioning() {
            match self.management.query_state(profile).await {
                Ok(ProvisioningQueryResult::Pending) => {
                    error!(%profile, "Finishing setup while provisioning is still pending");
                }
                Ok(_) => {}
                Err(e) => warn!("Could not query provisioning state before commit: {}", e),
            }
        }

        self.durable
            .put_bool(Scope::Device, settings_keys::DEVICE_PROVISIONED, true)
            .await?;
        self.durable
            .put_bool(Scope::Device, settings_keys::USER_SETUP_COMPLETE, true)
            .await?;
        self.durable
            .put(
                Scope::App,
                settings_keys::SETUP_COMPLETED_AT,
                json!(Utc::now().to_rfc3339()),
            )
            .await?;
        self.coordinator.mark_done().await?;
        info!("Setup committed");
        Ok(())
    }

    /// Best-effort teardown after the commit.
    async fn exit(&self) {
        log_failure("disable_entry_point", self.device.disable_entry_point().await);
        log_failure(
            "set_status_bar_enabled",
            self.device.set_status_bar_enabled(true).await,
        );
        log_failure("finish_all_tasks", self.device.finish_all_tasks().await);
        log_failure("go_home", self.device.go_home().await);
    }
}

fn log_failure(call: &str, result: Result<(), PlatformError>) {
    if let Err(e) = result {
        error!(call, "Exit step failed after commit: {}", e);
    }
}
