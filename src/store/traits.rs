//! `SettingsStore` trait: scoped key-value persistence of JSON values.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::StoreError;

/// Which settings namespace a key lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Device-wide settings shared with the rest of the system.
    Device,
    /// This app's private preferences.
    App,
}

impl Scope {
    pub fn file_stem(&self) -> &'static str {
        match self {
            Self::Device => "device",
            Self::App => "app",
        }
    }
}

/// Well-known settings keys.
pub mod settings_keys {
    /// Device scope: the device has been provisioned.
    pub const DEVICE_PROVISIONED: &str = "device_provisioned";
    /// Device scope: the user finished setup.
    pub const USER_SETUP_COMPLETE: &str = "user_setup_complete";
    /// App scope: a fatal provisioning failure requires a factory reset.
    pub const WIPE_REQUIRED: &str = "wipe_required";
    /// App scope: when the setup-complete commit happened.
    pub const SETUP_COMPLETED_AT: &str = "setup_completed_at";
    /// Process store: provisioning phase and host recreation count.
    pub const PROVISIONING_STATE: &str = "provisioning_state";
    /// Process store: user choices gathered during the flow.
    pub const SETTINGS_BUNDLE: &str = "settings_bundle";
    /// Process store: the settings bundle has been applied.
    pub const SETTINGS_APPLIED: &str = "settings_applied";
}

/// Backend-agnostic settings store.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, scope: Scope, key: &str) -> Result<Option<Value>, StoreError>;

    async fn put(&self, scope: Scope, key: &str, value: Value) -> Result<(), StoreError>;

    async fn remove(&self, scope: Scope, key: &str) -> Result<(), StoreError>;

    /// Read a boolean flag. Missing means `false`; integers follow the
    /// platform convention of non-zero meaning `true`.
    async fn get_bool(&self, scope: Scope, key: &str) -> Result<bool, StoreError> {
        match self.get(scope, key).await? {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(b)) => Ok(b),
            Some(Value::Number(n)) => Ok(n.as_i64().is_some_and(|n| n != 0)),
            Some(other) => Err(StoreError::InvalidValue {
                key: key.to_string(),
                reason: format!("expected boolean, got {other}"),
            }),
        }
    }

    async fn put_bool(&self, scope: Scope, key: &str, value: bool) -> Result<(), StoreError> {
        self.put(scope, key, Value::Bool(value)).await
    }
}

/// Load a typed value stored as JSON.
pub async fn load<T: DeserializeOwned>(
    store: &dyn SettingsStore,
    scope: Scope,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(scope, key).await? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
    }
}

/// Store a typed value as JSON.
pub async fn save<T: Serialize + Sync>(
    store: &dyn SettingsStore,
    scope: Scope,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    store.put(scope, key, serde_json::to_value(value)?).await
}
