//! ProvisioningCoordinator: drives optional device-management enrollment
//! and finalization, and resumes it across host recreation.
//!
//! All progress lives in the process store as a [`ProvisioningRecord`], so
//! a recreated host re-reads it and picks up where the last one left off.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::ProvisioningError;
use crate::flow::SettingsBundle;
use crate::platform::DeviceManagement;
use crate::store::{Scope, SettingsStore, load, save, settings_keys};

use super::state::{
    ProvisioningPhase, ProvisioningQueryResult, ProvisioningRecord, SecurityProfile,
};

/// What the host should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorOutcome {
    /// Nothing under way.
    Idle,
    /// An external enrollment or finalization flow is running.
    AwaitingPlatform,
    /// Check again for the platform's relaunch after this delay.
    ScheduleRelaunchCheck(Duration),
    /// Provisioning is settled; run or resume the exit sequence from this phase.
    ExitSequence(ProvisioningPhase),
    /// Unrecoverable failure; the device must be reset.
    WipeRequired,
    /// Stale input for the current phase.
    Ignored,
}

pub struct ProvisioningCoordinator {
    management: Arc<dyn DeviceManagement>,
    /// Process-wide store: survives host recreation.
    process: Arc<dyn SettingsStore>,
    /// Durable store: survives process death.
    durable: Arc<dyn SettingsStore>,
    relaunch_check_delay: Duration,
    max_relaunch_checks: u32,
}

impl ProvisioningCoordinator {
    pub fn new(
        management: Arc<dyn DeviceManagement>,
        process: Arc<dyn SettingsStore>,
        durable: Arc<dyn SettingsStore>,
        relaunch_check_delay: Duration,
        max_relaunch_checks: u32,
    ) -> Self {
        Self {
            management,
            process,
            durable,
            relaunch_check_delay,
            max_relaunch_checks,
        }
    }

    pub async fn record(&self) -> Result<ProvisioningRecord, ProvisioningError> {
        Ok(load(
            self.process.as_ref(),
            Scope::App,
            settings_keys::PROVISIONING_STATE,
        )
        .await?
        .unwrap_or_default())
    }

    pub async fn phase(&self) -> Result<ProvisioningPhase, ProvisioningError> {
        Ok(self.record().await?.phase)
    }

    pub async fn wipe_required(&self) -> Result<bool, ProvisioningError> {
        Ok(self
            .durable
            .get_bool(Scope::App, settings_keys::WIPE_REQUIRED)
            .await?)
    }

    /// The user confirmed the end of the flow.
    pub async fn on_confirm(&self) -> Result<CoordinatorOutcome, ProvisioningError> {
        if self.wipe_required().await? {
            return Ok(CoordinatorOutcome::WipeRequired);
        }

        let mut record = self.record().await?;
        if record.phase != ProvisioningPhase::None {
            warn!(phase = %record.phase, "Confirm while provisioning already under way");
            return self.resume(record).await;
        }

        let profile = self.profile().await?;
        if !profile.requires_provisioning() {
            debug!(%profile, "No enrollment needed");
            return self.ready(&mut record).await;
        }

        let state = self.management.query_state(profile).await?;
        info!(%profile, ?state, "Provisioning state queried");
        match state {
            ProvisioningQueryResult::Unsupported | ProvisioningQueryResult::Finalized => {
                self.ready(&mut record).await
            }
            ProvisioningQueryResult::Pending => {
                self.management.apply_profile_settings(profile).await?;
                self.advance(&mut record, ProvisioningPhase::Enrolling).await?;
                self.management.start_enrollment(profile).await?;
                Ok(CoordinatorOutcome::AwaitingPlatform)
            }
            ProvisioningQueryResult::Complete => {
                self.advance(&mut record, ProvisioningPhase::PreFinalize)
                    .await?;
                self.install_and_finalize(record, profile).await
            }
        }
    }

    /// The enrollment flow handed control back.
    pub async fn on_enrollment_returned(&self) -> Result<CoordinatorOutcome, ProvisioningError> {
        let mut record = self.record().await?;
        if record.phase != ProvisioningPhase::Enrolling {
            return Err(ProvisioningError::UnexpectedEvent {
                event: "enrollment_returned".to_string(),
                phase: record.phase,
            });
        }

        let profile = self.profile().await?;
        match self.management.query_state(profile).await? {
            ProvisioningQueryResult::Pending => {
                warn!("Enrollment returned without an artifact");
                self.fail(record, "enrollment returned without completing")
                    .await
            }
            state => {
                debug!(?state, "Enrollment returned");
                self.advance(&mut record, ProvisioningPhase::PreFinalize)
                    .await?;
                self.install_and_finalize(record, profile).await
            }
        }
    }

    /// The finalization flow handed control back.
    pub async fn on_finalization_returned(
        &self,
    ) -> Result<CoordinatorOutcome, ProvisioningError> {
        let mut record = self.record().await?;
        if record.phase != ProvisioningPhase::Finalizing {
            return Err(ProvisioningError::UnexpectedEvent {
                event: "finalization_returned".to_string(),
                phase: record.phase,
            });
        }

        let profile = self.profile().await?;
        match self.management.query_state(profile).await? {
            ProvisioningQueryResult::Finalized => {
                self.advance(&mut record, ProvisioningPhase::AwaitingSystemRelaunch)
                    .await?;
                Ok(CoordinatorOutcome::ScheduleRelaunchCheck(
                    self.relaunch_check_delay,
                ))
            }
            state => {
                self.fail(record, &format!("finalization reported {state:?}"))
                    .await
            }
        }
    }

    /// The fixed-delay relaunch timer fired.
    pub async fn on_relaunch_check(&self) -> Result<CoordinatorOutcome, ProvisioningError> {
        let mut record = self.record().await?;
        if record.phase != ProvisioningPhase::AwaitingSystemRelaunch {
            debug!(phase = %record.phase, "Stale relaunch check");
            return Ok(CoordinatorOutcome::Ignored);
        }

        record.relaunch_checks += 1;
        if record.host_recreations >= 1 {
            info!(recreations = record.host_recreations, "Platform relaunch observed");
            return self.ready(&mut record).await;
        }
        if record.relaunch_checks >= self.max_relaunch_checks {
            warn!(
                checks = record.relaunch_checks,
                "No relaunch observed, continuing without it"
            );
            return self.ready(&mut record).await;
        }

        self.save(&record).await?;
        debug!(checks = record.relaunch_checks, "Still waiting for relaunch");
        Ok(CoordinatorOutcome::ScheduleRelaunchCheck(
            self.relaunch_check_delay,
        ))
    }

    /// A host instance was created. Re-reads the stored phase and resumes.
    pub async fn on_host_created(&self) -> Result<CoordinatorOutcome, ProvisioningError> {
        if self.wipe_required().await? {
            return Ok(CoordinatorOutcome::WipeRequired);
        }

        let mut record = self.record().await?;
        if record.phase == ProvisioningPhase::None {
            return Ok(CoordinatorOutcome::Idle);
        }

        record.host_recreations += 1;
        self.save(&record).await?;
        info!(
            phase = %record.phase,
            recreations = record.host_recreations,
            "Host recreated during provisioning"
        );
        self.resume(record).await
    }

    /// The exit animation started.
    pub async fn mark_animating(&self) -> Result<(), ProvisioningError> {
        let mut record = self.record().await?;
        match record.phase {
            ProvisioningPhase::Animating => Ok(()),
            _ => self.advance(&mut record, ProvisioningPhase::Animating).await,
        }
    }

    /// The durable commit happened.
    pub async fn mark_done(&self) -> Result<(), ProvisioningError> {
        let mut record = self.record().await?;
        self.advance(&mut record, ProvisioningPhase::Done).await
    }

    /// The user's chosen profile, from the deferred settings.
    pub async fn profile(&self) -> Result<SecurityProfile, ProvisioningError> {
        Ok(SettingsBundle::load(self.process.as_ref())
            .await?
            .security_profile())
    }

    async fn resume(
        &self,
        record: ProvisioningRecord,
    ) -> Result<CoordinatorOutcome, ProvisioningError> {
        if record.phase.awaits_platform() {
            return Ok(CoordinatorOutcome::AwaitingPlatform);
        }
        match record.phase {
            ProvisioningPhase::None => Ok(CoordinatorOutcome::Idle),
            ProvisioningPhase::PreFinalize => {
                let profile = self.profile().await?;
                self.install_and_finalize(record, profile).await
            }
            ProvisioningPhase::AwaitingSystemRelaunch => Ok(
                CoordinatorOutcome::ScheduleRelaunchCheck(self.relaunch_check_delay),
            ),
            phase => Ok(CoordinatorOutcome::ExitSequence(phase)),
        }
    }

    async fn install_and_finalize(
        &self,
        mut record: ProvisioningRecord,
        profile: SecurityProfile,
    ) -> Result<CoordinatorOutcome, ProvisioningError> {
        if let Err(e) = self.management.install_companion_apps(profile).await {
            return self
                .fail(record, &format!("companion install failed: {e}"))
                .await;
        }
        self.advance(&mut record, ProvisioningPhase::Finalizing)
            .await?;
        self.management.start_finalization().await?;
        Ok(CoordinatorOutcome::AwaitingPlatform)
    }

    async fn ready(
        &self,
        record: &mut ProvisioningRecord,
    ) -> Result<CoordinatorOutcome, ProvisioningError> {
        self.advance(record, ProvisioningPhase::ReadyToAnimate)
            .await?;
        Ok(CoordinatorOutcome::ExitSequence(
            ProvisioningPhase::ReadyToAnimate,
        ))
    }

    /// Fatal path: persist the wipe flag and drop all progress.
    async fn fail(
        &self,
        mut record: ProvisioningRecord,
        reason: &str,
    ) -> Result<CoordinatorOutcome, ProvisioningError> {
        error!(phase = %record.phase, reason, "Provisioning failed, device reset required");
        self.durable
            .put_bool(Scope::App, settings_keys::WIPE_REQUIRED, true)
            .await?;
        record.reset_after_failure();
        self.save(&record).await?;
        Ok(CoordinatorOutcome::WipeRequired)
    }

    async fn advance(
        &self,
        record: &mut ProvisioningRecord,
        target: ProvisioningPhase,
    ) -> Result<(), ProvisioningError> {
        let from = record.phase;
        record.advance(target)?;
        self.save(record).await?;
        info!(%from, to = %target, "Provisioning phase advanced");
        Ok(())
    }

    async fn save(&self, record: &ProvisioningRecord) -> Result<(), ProvisioningError> {
        save(
            self.process.as_ref(),
            Scope::App,
            settings_keys::PROVISIONING_STATE,
            record,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::bundle_keys;
    use crate::platform::SimulatedPlatform;
    use crate::store::MemoryStore;
    use serde_json::json;

    const DELAY: Duration = Duration::from_millis(1000);

    struct Fixture {
        sim: Arc<SimulatedPlatform>,
        process: Arc<MemoryStore>,
        durable: Arc<MemoryStore>,
        coordinator: ProvisioningCoordinator,
    }

    async fn fixture(profile: &str) -> Fixture {
        let sim = Arc::new(SimulatedPlatform::new());
        let process = Arc::new(MemoryStore::new());
        let durable = Arc::new(MemoryStore::new());
        let mut bundle = SettingsBundle::default();
        bundle.insert(bundle_keys::SECURITY_PROFILE, json!(profile));
        bundle.save(process.as_ref()).await.unwrap();

        let coordinator =
            ProvisioningCoordinator::new(sim.clone(), process.clone(), durable.clone(), DELAY, 3);
        Fixture {
            sim,
            process,
            durable,
            coordinator,
        }
    }

    #[tokio::test]
    async fn standard_profile_goes_straight_to_exit() {
        let f = fixture("standard").await;
        assert_eq!(
            f.coordinator.on_confirm().await.unwrap(),
            CoordinatorOutcome::ExitSequence(ProvisioningPhase::ReadyToAnimate)
        );
        assert!(f.sim.calls().is_empty());
    }

    #[tokio::test]
    async fn unsupported_goes_straight_to_exit_without_enrollment() {
        let f = fixture("safer").await;
        f.sim.set_provisioning_state(ProvisioningQueryResult::Unsupported);

        assert_eq!(
            f.coordinator.on_confirm().await.unwrap(),
            CoordinatorOutcome::ExitSequence(ProvisioningPhase::ReadyToAnimate)
        );
        assert_eq!(f.sim.count("query_state"), 1);
        assert_eq!(f.sim.count("start_enrollment"), 0);
        assert_eq!(f.sim.count("start_finalization"), 0);
        assert_eq!(
            f.coordinator.phase().await.unwrap(),
            ProvisioningPhase::ReadyToAnimate
        );
    }

    #[tokio::test]
    async fn full_enrollment_path() {
        let f = fixture("safest").await;
        f.sim.set_provisioning_state(ProvisioningQueryResult::Pending);

        assert_eq!(
            f.coordinator.on_confirm().await.unwrap(),
            CoordinatorOutcome::AwaitingPlatform
        );
        assert_eq!(f.coordinator.phase().await.unwrap(), ProvisioningPhase::Enrolling);
        assert_eq!(f.sim.count("apply_profile_settings:safest"), 1);

        // Enrollment produced an artifact.
        f.sim.set_provisioning_state(ProvisioningQueryResult::Complete);
        assert_eq!(
            f.coordinator.on_enrollment_returned().await.unwrap(),
            CoordinatorOutcome::AwaitingPlatform
        );
        assert_eq!(f.coordinator.phase().await.unwrap(), ProvisioningPhase::Finalizing);
        assert_eq!(f.sim.count("install_companion_apps"), 1);

        f.sim.set_provisioning_state(ProvisioningQueryResult::Finalized);
        assert_eq!(
            f.coordinator.on_finalization_returned().await.unwrap(),
            CoordinatorOutcome::ScheduleRelaunchCheck(DELAY)
        );

        // No relaunch yet.
        assert_eq!(
            f.coordinator.on_relaunch_check().await.unwrap(),
            CoordinatorOutcome::ScheduleRelaunchCheck(DELAY)
        );

        // The platform recreates the host.
        assert_eq!(
            f.coordinator.on_host_created().await.unwrap(),
            CoordinatorOutcome::ScheduleRelaunchCheck(DELAY)
        );
        assert_eq!(
            f.coordinator.on_relaunch_check().await.unwrap(),
            CoordinatorOutcome::ExitSequence(ProvisioningPhase::ReadyToAnimate)
        );
    }

    #[tokio::test]
    async fn recreation_during_enrollment_does_not_count_as_relaunch() {
        let f = fixture("safest").await;
        f.sim.set_provisioning_state(ProvisioningQueryResult::Pending);
        f.coordinator.on_confirm().await.unwrap();
        f.coordinator.on_host_created().await.unwrap();

        f.sim.set_provisioning_state(ProvisioningQueryResult::Complete);
        f.coordinator.on_enrollment_returned().await.unwrap();
        f.sim.set_provisioning_state(ProvisioningQueryResult::Finalized);
        f.coordinator.on_finalization_returned().await.unwrap();
        assert_eq!(f.coordinator.record().await.unwrap().host_recreations, 0);

        assert_eq!(
            f.coordinator.on_relaunch_check().await.unwrap(),
            CoordinatorOutcome::ScheduleRelaunchCheck(DELAY)
        );
        assert_eq!(
            f.coordinator.phase().await.unwrap(),
            ProvisioningPhase::AwaitingSystemRelaunch
        );
    }

    #[tokio::test]
    async fn relaunch_checks_are_bounded() {
        let f = fixture("safer").await;
        f.sim.set_provisioning_state(ProvisioningQueryResult::Complete);
        f.coordinator.on_confirm().await.unwrap();
        f.sim.set_provisioning_state(ProvisioningQueryResult::Finalized);
        f.coordinator.on_finalization_returned().await.unwrap();

        let mut checks = 0;
        loop {
            checks += 1;
            match f.coordinator.on_relaunch_check().await.unwrap() {
                CoordinatorOutcome::ScheduleRelaunchCheck(_) => continue,
                CoordinatorOutcome::ExitSequence(phase) => {
                    assert_eq!(phase, ProvisioningPhase::ReadyToAnimate);
                    break;
                }
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(checks, 3);
    }

    #[tokio::test]
    async fn companion_install_failure_requires_wipe() {
        let f = fixture("safer").await;
        f.sim.set_provisioning_state(ProvisioningQueryResult::Complete);
        f.sim.fail_companion_install(true);

        assert_eq!(
            f.coordinator.on_confirm().await.unwrap(),
            CoordinatorOutcome::WipeRequired
        );
        assert!(f
            .durable
            .get_bool(Scope::App, settings_keys::WIPE_REQUIRED)
            .await
            .unwrap());
        assert_eq!(f.coordinator.phase().await.unwrap(), ProvisioningPhase::None);
        assert_eq!(f.sim.count("start_finalization"), 0);

        // Every later entry point reports the wipe.
        assert_eq!(
            f.coordinator.on_host_created().await.unwrap(),
            CoordinatorOutcome::WipeRequired
        );
        assert_eq!(
            f.coordinator.on_confirm().await.unwrap(),
            CoordinatorOutcome::WipeRequired
        );
    }

    #[tokio::test]
    async fn inconsistent_finalization_requires_wipe() {
        let f = fixture("safer").await;
        f.sim.set_provisioning_state(ProvisioningQueryResult::Complete);
        f.coordinator.on_confirm().await.unwrap();

        // Still only COMPLETE after finalization returned.
        assert_eq!(
            f.coordinator.on_finalization_returned().await.unwrap(),
            CoordinatorOutcome::WipeRequired
        );
    }

    #[tokio::test]
    async fn recreation_resumes_instead_of_restarting() {
        let f = fixture("safer").await;
        f.sim.set_provisioning_state(ProvisioningQueryResult::Pending);
        f.coordinator.on_confirm().await.unwrap();

        assert_eq!(
            f.coordinator.on_host_created().await.unwrap(),
            CoordinatorOutcome::AwaitingPlatform
        );
        assert_eq!(f.sim.count("start_enrollment"), 1);
        let record = f.coordinator.record().await.unwrap();
        assert_eq!(record.phase, ProvisioningPhase::Enrolling);
        assert_eq!(record.host_recreations, 1);
    }

    #[tokio::test]
    async fn pre_finalize_reruns_install_on_recreation() {
        let f = fixture("safer").await;
        let record = ProvisioningRecord {
            phase: ProvisioningPhase::PreFinalize,
            ..Default::default()
        };
        save(f.process.as_ref(), Scope::App, settings_keys::PROVISIONING_STATE, &record)
            .await
            .unwrap();

        assert_eq!(
            f.coordinator.on_host_created().await.unwrap(),
            CoordinatorOutcome::AwaitingPlatform
        );
        assert_eq!(f.sim.count("install_companion_apps"), 1);
        assert_eq!(f.sim.count("start_finalization"), 1);
    }

    #[tokio::test]
    async fn fresh_host_with_no_progress_is_idle() {
        let f = fixture("standard").await;
        assert_eq!(
            f.coordinator.on_host_created().await.unwrap(),
            CoordinatorOutcome::Idle
        );
        assert_eq!(f.coordinator.record().await.unwrap().host_recreations, 0);
    }

    #[tokio::test]
    async fn unexpected_events_are_rejected() {
        let f = fixture("standard").await;
        assert!(matches!(
            f.coordinator.on_enrollment_returned().await,
            Err(ProvisioningError::UnexpectedEvent { .. })
        ));
        assert_eq!(
            f.coordinator.on_relaunch_check().await.unwrap(),
            CoordinatorOutcome::Ignored
        );
    }
}
