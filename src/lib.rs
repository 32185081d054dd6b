//! Setup Wizard: first-boot onboarding flow with recreation-safe provisioning.

pub mod config;
pub mod error;
pub mod finish;
pub mod flow;
pub mod platform;
pub mod provisioning;
pub mod script;
pub mod session;
pub mod store;
