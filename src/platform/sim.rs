//! In-process simulated platform.
//!
//! Implements every collaborator trait against in-memory state and records
//! each call in a journal. When connected to a session it also answers
//! asynchronous calls by posting the matching [`WizardEvent`], which is
//! how the demo binary runs end to end.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::PlatformError;
use crate::flow::{ExternalResult, SettingsBundle};
use crate::provisioning::{ProvisioningQueryResult, SecurityProfile};
use crate::script::ActionRef;
use crate::session::WizardEvent;

use super::{
    ActivityLauncher, DeviceControl, DeviceManagement, ExitAnimator, LaunchRequest,
    StepAvailability,
};

struct SimState {
    journal: Vec<String>,
    launched: Vec<LaunchRequest>,
    unresolvable: HashSet<String>,
    unavailable: HashSet<String>,
    replies: HashMap<String, VecDeque<ExternalResult>>,
    provisioning: ProvisioningQueryResult,
    auto_progress: bool,
    companion_install_fails: bool,
    failing_grants: HashSet<String>,
    failing_calls: HashSet<String>,
    entry_point_enabled: bool,
    status_bar_enabled: bool,
    events: Option<UnboundedSender<WizardEvent>>,
}

pub struct SimulatedPlatform {
    state: Mutex<SimState>,
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                journal: Vec::new(),
                launched: Vec::new(),
                unresolvable: HashSet::new(),
                unavailable: HashSet::new(),
                replies: HashMap::new(),
                provisioning: ProvisioningQueryResult::Unsupported,
                auto_progress: false,
                companion_install_fails: false,
                failing_grants: HashSet::new(),
                failing_calls: HashSet::new(),
                entry_point_enabled: true,
                status_bar_enabled: true,
                events: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().expect("simulated platform mutex poisoned")
    }

    /// Answer launches and platform flows by posting events to `events`.
    pub fn connect(&self, events: UnboundedSender<WizardEvent>) {
        self.state().events = Some(events);
    }

    /// Let enrollment and finalization move the query state forward.
    pub fn set_auto_progress(&self, enabled: bool) {
        self.state().auto_progress = enabled;
    }

    pub fn set_unresolvable(&self, action: &str) {
        self.state().unresolvable.insert(action.to_string());
    }

    pub fn set_available(&self, step_id: &str, available: bool) {
        let mut state = self.state();
        if available {
            state.unavailable.remove(step_id);
        } else {
            state.unavailable.insert(step_id.to_string());
        }
    }

    /// Queue the auto-reply for the next launch of `step_id`. Unqueued
    /// launches reply OK.
    pub fn queue_reply(&self, step_id: &str, result: ExternalResult) {
        self.state()
            .replies
            .entry(step_id.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn set_provisioning_state(&self, state: ProvisioningQueryResult) {
        self.state().provisioning = state;
    }

    pub fn fail_companion_install(&self, fail: bool) {
        self.state().companion_install_fails = fail;
    }

    pub fn fail_permission_grant(&self, package: &str) {
        self.state().failing_grants.insert(package.to_string());
    }

    /// Make the named device-control call fail.
    pub fn fail_call(&self, call: &str) {
        self.state().failing_calls.insert(call.to_string());
    }

    pub fn set_entry_point_enabled(&self, enabled: bool) {
        self.state().entry_point_enabled = enabled;
    }

    pub fn status_bar_enabled(&self) -> bool {
        self.state().status_bar_enabled
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state().journal.clone()
    }

    /// Number of journal entries starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.state()
            .journal
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn launched(&self) -> Vec<LaunchRequest> {
        self.state().launched.clone()
    }

    fn record(&self, call: impl Into<String>) {
        let call = call.into();
        debug!(%call, "Simulated platform call");
        self.state().journal.push(call);
    }

    fn control_call(&self, call: &str) -> Result<(), PlatformError> {
        self.record(call);
        if self.state().failing_calls.contains(call) {
            return Err(PlatformError::CallFailed {
                call: call.to_string(),
                reason: "simulated failure".to_string(),
            });
        }
        Ok(())
    }

    fn post(&self, event: WizardEvent) {
        if let Some(events) = self.state().events.as_ref() {
            // A closed channel means the session is gone; nothing to answer.
            let _ = events.send(event);
        }
    }
}

#[async_trait]
impl ActivityLauncher for SimulatedPlatform {
    async fn resolve(&self, action: &ActionRef) -> Option<String> {
        if self.state().unresolvable.contains(action.as_str()) {
            return None;
        }
        Some(format!("sim/{action}"))
    }

    async fn launch(&self, request: &LaunchRequest) -> Result<(), PlatformError> {
        self.record(format!("launch:{}", request.step_id));
        let reply = {
            let mut state = self.state();
            state.launched.push(request.clone());
            state
                .replies
                .get_mut(&request.step_id)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(ExternalResult::ok)
        };
        self.post(WizardEvent::ExternalResult {
            step: request.step_id.clone(),
            result: reply,
        });
        Ok(())
    }
}

#[async_trait]
impl StepAvailability for SimulatedPlatform {
    async fn is_available(&self, step_id: &str) -> bool {
        !self.state().unavailable.contains(step_id)
    }
}

#[async_trait]
impl DeviceManagement for SimulatedPlatform {
    async fn query_state(
        &self,
        profile: SecurityProfile,
    ) -> Result<ProvisioningQueryResult, PlatformError> {
        self.record(format!("query_state:{profile}"));
        Ok(self.state().provisioning)
    }

    async fn apply_profile_settings(&self, profile: SecurityProfile) -> Result<(), PlatformError> {
        self.record(format!("apply_profile_settings:{profile}"));
        Ok(())
    }

    async fn start_enrollment(&self, profile: SecurityProfile) -> Result<(), PlatformError> {
        self.record(format!("start_enrollment:{profile}"));
        {
            let mut state = self.state();
            if state.auto_progress {
                state.provisioning = ProvisioningQueryResult::Complete;
            }
        }
        self.post(WizardEvent::EnrollmentReturned);
        Ok(())
    }

    async fn install_companion_apps(&self, profile: SecurityProfile) -> Result<(), PlatformError> {
        self.record(format!("install_companion_apps:{profile}"));
        if self.state().companion_install_fails {
            return Err(PlatformError::CallFailed {
                call: "install_companion_apps".to_string(),
                reason: "simulated install failure".to_string(),
            });
        }
        Ok(())
    }

    async fn start_finalization(&self) -> Result<(), PlatformError> {
        self.record("start_finalization");
        {
            let mut state = self.state();
            if state.auto_progress {
                state.provisioning = ProvisioningQueryResult::Finalized;
            }
        }
        self.post(WizardEvent::FinalizationReturned);
        Ok(())
    }
}

#[async_trait]
impl DeviceControl for SimulatedPlatform {
    async fn apply_settings(&self, bundle: &SettingsBundle) -> Result<(), PlatformError> {
        self.control_call("apply_settings")?;
        info!(settings = ?bundle.as_map(), "Simulated settings applied");
        Ok(())
    }

    async fn grant_default_permissions(&self, package: &str) -> Result<(), PlatformError> {
        self.record(format!("grant_default_permissions:{package}"));
        if self.state().failing_grants.contains(package) {
            return Err(PlatformError::CallFailed {
                call: "grant_default_permissions".to_string(),
                reason: format!("{package} is not installed"),
            });
        }
        Ok(())
    }

    async fn set_status_bar_enabled(&self, enabled: bool) -> Result<(), PlatformError> {
        self.control_call(&format!("set_status_bar_enabled:{enabled}"))?;
        self.state().status_bar_enabled = enabled;
        Ok(())
    }

    async fn is_entry_point_enabled(&self) -> bool {
        self.state().entry_point_enabled
    }

    async fn disable_entry_point(&self) -> Result<(), PlatformError> {
        self.control_call("disable_entry_point")?;
        self.state().entry_point_enabled = false;
        Ok(())
    }

    async fn finish_all_tasks(&self) -> Result<(), PlatformError> {
        self.control_call("finish_all_tasks")
    }

    async fn go_home(&self) -> Result<(), PlatformError> {
        self.control_call("go_home")
    }

    async fn present_reset_dialog(&self) -> Result<(), PlatformError> {
        self.control_call("present_reset_dialog")
    }
}

#[async_trait]
impl ExitAnimator for SimulatedPlatform {
    async fn start(&self, instance: Uuid) -> Result<(), PlatformError> {
        self.record("animation_start");
        self.post(WizardEvent::AnimationEnded { instance });
        Ok(())
    }
}
