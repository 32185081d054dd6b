//! In-memory settings store.
//!
//! Used as the process-wide store: it outlives any single host instance
//! but not the process.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::StoreError;

use super::traits::{Scope, SettingsStore};

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<(Scope, String), Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn get(&self, scope: Scope, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.values.read().await.get(&(scope, key.to_string())).cloned())
    }

    async fn put(&self, scope: Scope, key: &str, value: Value) -> Result<(), StoreError> {
        self.values
            .write()
            .await
            .insert((scope, key.to_string()), value);
        Ok(())
    }

    async fn remove(&self, scope: Scope, key: &str) -> Result<(), StoreError> {
        self.values.write().await.remove(&(scope, key.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{load, save};

    #[tokio::test]
    async fn scopes_are_separate() {
        let store = MemoryStore::new();
        store.put_bool(Scope::Device, "flag", true).await.unwrap();
        assert!(store.get_bool(Scope::Device, "flag").await.unwrap());
        assert!(!store.get_bool(Scope::App, "flag").await.unwrap());
    }

    #[tokio::test]
    async fn bool_accepts_platform_integers() {
        let store = MemoryStore::new();
        store
            .put(Scope::Device, "provisioned", serde_json::json!(1))
            .await
            .unwrap();
        assert!(store.get_bool(Scope::Device, "provisioned").await.unwrap());
        store
            .put(Scope::Device, "provisioned", serde_json::json!(0))
            .await
            .unwrap();
        assert!(!store.get_bool(Scope::Device, "provisioned").await.unwrap());
        store
            .put(Scope::Device, "provisioned", serde_json::json!("yes"))
            .await
            .unwrap();
        assert!(matches!(
            store.get_bool(Scope::Device, "provisioned").await,
            Err(StoreError::InvalidValue { .. })
        ));
    }

    #[tokio::test]
    async fn typed_round_trip_and_remove() {
        let store = MemoryStore::new();
        save(&store, Scope::App, "list", &vec![1u32, 2, 3]).await.unwrap();
        let loaded: Option<Vec<u32>> = load(&store, Scope::App, "list").await.unwrap();
        assert_eq!(loaded, Some(vec![1, 2, 3]));

        store.remove(Scope::App, "list").await.unwrap();
        let loaded: Option<Vec<u32>> = load(&store, Scope::App, "list").await.unwrap();
        assert!(loaded.is_none());
    }
}
