//! Flow control: completion codes, delegation relays and the controller
//! that walks the step graph.

pub mod bundle;
pub mod controller;
pub mod relay;
pub mod result;

pub use bundle::{RESULT_SETTINGS_KEY, SettingsBundle, bundle_keys};
pub use controller::{ExecutionCursor, FlowController, FlowStatus};
pub use relay::{DelegationRelay, RelayContext, RelayOutcome};
pub use result::{CompletionCode, ExternalResult, StepResult};
