//! User choices gathered during the flow and applied at the end.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::provisioning::SecurityProfile;
use crate::store::{Scope, SettingsStore, load, save, settings_keys};

/// Key in a step's result data holding choices to defer.
pub const RESULT_SETTINGS_KEY: &str = "settings";

/// Well-known bundle keys.
pub mod bundle_keys {
    pub const NAVIGATION_MODE: &str = "navigation_mode";
    pub const SECURITY_PROFILE: &str = "security_profile";
}

/// Deferred settings, kept in the process store until the exit sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingsBundle(Map<String, Value>);

impl SettingsBundle {
    pub async fn load(store: &dyn SettingsStore) -> Result<Self, StoreError> {
        Ok(load(store, Scope::App, settings_keys::SETTINGS_BUNDLE)
            .await?
            .unwrap_or_default())
    }

    pub async fn save(&self, store: &dyn SettingsStore) -> Result<(), StoreError> {
        save(store, Scope::App, settings_keys::SETTINGS_BUNDLE, self).await
    }

    /// Merge the `settings` object of a result payload; later values win.
    /// Returns whether anything was merged.
    pub fn merge_result_data(&mut self, data: &Value) -> bool {
        match data.get(RESULT_SETTINGS_KEY) {
            Some(Value::Object(settings)) if !settings.is_empty() => {
                for (key, value) in settings {
                    self.0.insert(key.clone(), value.clone());
                }
                true
            }
            _ => false,
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn navigation_mode(&self) -> Option<&str> {
        self.0.get(bundle_keys::NAVIGATION_MODE).and_then(Value::as_str)
    }

    /// The chosen security profile; unknown or missing values mean baseline.
    pub fn security_profile(&self) -> SecurityProfile {
        self.0
            .get(bundle_keys::SECURITY_PROFILE)
            .and_then(Value::as_str)
            .and_then(SecurityProfile::parse)
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[test]
    fn merge_takes_settings_object_only() {
        let mut bundle = SettingsBundle::default();
        assert!(!bundle.merge_result_data(&json!({ "other": 1 })));
        assert!(!bundle.merge_result_data(&json!({ "settings": "nope" })));
        assert!(bundle.merge_result_data(&json!({
            "settings": { "navigation_mode": "gestural" }
        })));
        assert!(bundle.merge_result_data(&json!({
            "settings": { "navigation_mode": "three_button", "security_profile": "safest" }
        })));
        assert_eq!(bundle.navigation_mode(), Some("three_button"));
        assert_eq!(bundle.security_profile(), SecurityProfile::Safest);
    }

    #[test]
    fn unknown_profile_is_standard() {
        let mut bundle = SettingsBundle::default();
        bundle.insert(bundle_keys::SECURITY_PROFILE, json!("tinfoil"));
        assert_eq!(bundle.security_profile(), SecurityProfile::Standard);
    }

    #[tokio::test]
    async fn persists_in_store() {
        let store = MemoryStore::new();
        assert!(SettingsBundle::load(&store).await.unwrap().is_empty());

        let mut bundle = SettingsBundle::default();
        bundle.insert(bundle_keys::NAVIGATION_MODE, json!("gestural"));
        bundle.save(&store).await.unwrap();

        let loaded = SettingsBundle::load(&store).await.unwrap();
        assert_eq!(loaded, bundle);
    }
}
