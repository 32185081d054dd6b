//! Provisioning state machine: phases, platform query results, profiles.

use serde::{Deserialize, Serialize};

use crate::error::ProvisioningError;

/// The controller's own memory of provisioning intent and progress.
///
/// Totally ordered by intended progress: None → Enrolling → PreFinalize →
/// Finalizing → AwaitingSystemRelaunch → ReadyToAnimate → Animating → Done.
/// Phases are skipped forward when enrollment is not needed, and never go
/// backwards outside the fatal path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningPhase {
    None,
    Enrolling,
    PreFinalize,
    Finalizing,
    AwaitingSystemRelaunch,
    ReadyToAnimate,
    Animating,
    Done,
}

impl ProvisioningPhase {
    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: ProvisioningPhase) -> bool {
        use ProvisioningPhase::*;
        matches!(
            (self, target),
            (None, Enrolling)
                | (None, PreFinalize)
                | (None, ReadyToAnimate)
                | (Enrolling, PreFinalize)
                | (PreFinalize, Finalizing)
                | (Finalizing, AwaitingSystemRelaunch)
                | (AwaitingSystemRelaunch, ReadyToAnimate)
                | (ReadyToAnimate, Animating)
                | (Animating, Done)
        )
    }

    /// Whether the durable setup-complete commit has happened.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Whether an external platform flow is running for this phase.
    pub fn awaits_platform(&self) -> bool {
        matches!(self, Self::Enrolling | Self::Finalizing)
    }
}

impl Default for ProvisioningPhase {
    fn default() -> Self {
        Self::None
    }
}

impl std::fmt::Display for ProvisioningPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Enrolling => "enrolling",
            Self::PreFinalize => "pre_finalize",
            Self::Finalizing => "finalizing",
            Self::AwaitingSystemRelaunch => "awaiting_system_relaunch",
            Self::ReadyToAnimate => "ready_to_animate",
            Self::Animating => "animating",
            Self::Done => "done",
        };
        write!(f, "{s}")
    }
}

/// Ground truth from the platform's device-management subsystem.
///
/// Recomputed on demand, never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningQueryResult {
    /// Not applicable here (not the owner, or already managed).
    Unsupported,
    /// User opted in but no enrollment artifact exists yet.
    Pending,
    /// Artifact exists, awaiting finalization.
    Complete,
    /// Finalization acknowledged by the platform.
    Finalized,
}

/// Password complexity buckets understood by the lock-screen component.
pub mod password_complexity {
    pub const NONE: u32 = 0;
    pub const LOW: u32 = 0x10000;
    pub const MEDIUM: u32 = 0x30000;
}

/// Security level the user picks during the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityProfile {
    Standard,
    /// Work-profile style enrollment.
    Safer,
    /// Fully managed device.
    Safest,
}

impl SecurityProfile {
    /// Anything above baseline opts into device-management enrollment.
    pub fn requires_provisioning(&self) -> bool {
        !matches!(self, Self::Standard)
    }

    /// Minimum lock-screen complexity the profile demands.
    pub fn min_password_complexity(&self) -> u32 {
        match self {
            Self::Standard => password_complexity::NONE,
            Self::Safer => password_complexity::LOW,
            Self::Safest => password_complexity::MEDIUM,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "standard" => Some(Self::Standard),
            "safer" => Some(Self::Safer),
            "safest" => Some(Self::Safest),
            _ => None,
        }
    }
}

impl Default for SecurityProfile {
    fn default() -> Self {
        Self::Standard
    }
}

impl std::fmt::Display for SecurityProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Safer => write!(f, "safer"),
            Self::Safest => write!(f, "safest"),
        }
    }
}

/// Provisioning state kept in process-wide storage.
///
/// Stored in the process store under `"provisioning_state"`, so it
/// survives recreation of the host but not a fresh boot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningRecord {
    pub phase: ProvisioningPhase,
    /// Host creations observed while provisioning was under way.
    pub host_recreations: u32,
    /// Relaunch checks performed in the current wait.
    pub relaunch_checks: u32,
}

impl ProvisioningRecord {
    /// Move forward to `target`, rejecting anything the phase order forbids.
    pub fn advance(&mut self, target: ProvisioningPhase) -> Result<(), ProvisioningError> {
        if !self.phase.can_transition_to(target) {
            return Err(ProvisioningError::InvalidTransition {
                from: self.phase,
                to: target,
            });
        }
        self.phase = target;
        if target == ProvisioningPhase::AwaitingSystemRelaunch {
            // Only recreations after finalization count as the relaunch.
            self.relaunch_checks = 0;
            self.host_recreations = 0;
        }
        Ok(())
    }

    /// The fatal path: the only way back to `None`.
    pub fn reset_after_failure(&mut self) {
        *self = Self::default();
    }
}
