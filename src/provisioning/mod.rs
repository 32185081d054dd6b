//! Optional device-management enrollment and its recreation-safe phase.

pub mod coordinator;
pub mod state;

pub use coordinator::{CoordinatorOutcome, ProvisioningCoordinator};
pub use state::{
    ProvisioningPhase, ProvisioningQueryResult, ProvisioningRecord, SecurityProfile,
    password_complexity,
};
