//! Platform collaborators the wizard talks to.
//!
//! Everything here is a black box owned by the host system: the component
//! launcher, the device-management subsystem, device controls and the exit
//! animation. Results of asynchronous calls come back as
//! [`WizardEvent`](crate::session::WizardEvent)s, never as return values.

pub mod sim;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::PlatformError;
use crate::flow::SettingsBundle;
use crate::provisioning::{ProvisioningQueryResult, SecurityProfile};
use crate::script::ActionRef;

pub use sim::SimulatedPlatform;

/// Extras key for the minimum lock-screen complexity.
pub const EXTRA_MIN_PASSWORD_COMPLEXITY: &str = "min_password_complexity";

/// Everything a launched component needs to know about its step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaunchRequest {
    pub step_id: String,
    pub action: ActionRef,
    /// Concrete component the action resolved to.
    pub component: String,
    /// Where the running script was loaded from.
    pub script_origin: String,
    pub extras: Map<String, Value>,
}

/// Resolves abstract actions and launches components for a result.
#[async_trait]
pub trait ActivityLauncher: Send + Sync {
    /// Find a component that handles `action`, if any is installed.
    async fn resolve(&self, action: &ActionRef) -> Option<String>;

    /// Launch for a result. The result arrives later as an event.
    async fn launch(&self, request: &LaunchRequest) -> Result<(), PlatformError>;
}

/// Per-step "is this still needed" predicates.
#[async_trait]
pub trait StepAvailability: Send + Sync {
    async fn is_available(&self, step_id: &str) -> bool;
}

/// The platform's device-management (enrollment) subsystem.
#[async_trait]
pub trait DeviceManagement: Send + Sync {
    async fn query_state(
        &self,
        profile: SecurityProfile,
    ) -> Result<ProvisioningQueryResult, PlatformError>;

    /// Profile-specific settings applied before enrollment starts.
    async fn apply_profile_settings(&self, profile: SecurityProfile) -> Result<(), PlatformError>;

    /// Start the enrollment flow; completion arrives as an event.
    async fn start_enrollment(&self, profile: SecurityProfile) -> Result<(), PlatformError>;

    async fn install_companion_apps(&self, profile: SecurityProfile) -> Result<(), PlatformError>;

    /// Start finalization; completion arrives as an event.
    async fn start_finalization(&self) -> Result<(), PlatformError>;
}

/// System-level controls used while finishing setup.
#[async_trait]
pub trait DeviceControl: Send + Sync {
    async fn apply_settings(&self, bundle: &SettingsBundle) -> Result<(), PlatformError>;

    async fn grant_default_permissions(&self, package: &str) -> Result<(), PlatformError>;

    async fn set_status_bar_enabled(&self, enabled: bool) -> Result<(), PlatformError>;

    /// Whether the wizard's entry point is still registered.
    async fn is_entry_point_enabled(&self) -> bool;

    async fn disable_entry_point(&self) -> Result<(), PlatformError>;

    async fn finish_all_tasks(&self) -> Result<(), PlatformError>;

    async fn go_home(&self) -> Result<(), PlatformError>;

    /// Blocking dialog whose only action is a full device reset.
    async fn present_reset_dialog(&self) -> Result<(), PlatformError>;
}

/// Visual exit animation.
#[async_trait]
pub trait ExitAnimator: Send + Sync {
    /// Start the animation for host `instance`. Its end arrives as an
    /// `AnimationEnded` event carrying the same instance id.
    async fn start(&self, instance: Uuid) -> Result<(), PlatformError>;
}
