//! File-backed settings store: one JSON document per scope.
//!
//! Survives process death. Each write replaces the scope file through a
//! temp file and rename, so a crash never leaves a half-written document.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StoreError;

use super::traits::{Scope, SettingsStore};

pub struct FileStore {
    dir: PathBuf,
    /// Loaded scope documents. Holding the lock across the write serializes
    /// writers to the same file.
    cache: Mutex<HashMap<Scope, Map<String, Value>>>,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        info!(path = %dir.display(), "Settings store opened");
        Ok(Self {
            dir,
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn path_for(&self, scope: Scope) -> PathBuf {
        self.dir.join(format!("{}.json", scope.file_stem()))
    }

    async fn read_scope(&self, scope: Scope) -> Result<Map<String, Value>, StoreError> {
        let path = self.path_for(scope);
        match fs::read_to_string(&path).await {
            Ok(raw) => match serde_json::from_str::<Value>(&raw)? {
                Value::Object(map) => Ok(map),
                other => Err(StoreError::InvalidValue {
                    key: path.display().to_string(),
                    reason: format!("expected object, got {other}"),
                }),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_scope(&self, scope: Scope, map: &Map<String, Value>) -> Result<(), StoreError> {
        let path = self.path_for(scope);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(map)?;
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), "Settings written");
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for FileStore {
    async fn get(&self, scope: Scope, key: &str) -> Result<Option<Value>, StoreError> {
        let mut cache = self.cache.lock().await;
        if !cache.contains_key(&scope) {
            let map = self.read_scope(scope).await?;
            cache.insert(scope, map);
        }
        Ok(cache.get(&scope).and_then(|map| map.get(key)).cloned())
    }

    async fn put(&self, scope: Scope, key: &str, value: Value) -> Result<(), StoreError> {
        let mut cache = self.cache.lock().await;
        let mut map = match cache.get(&scope) {
            Some(map) => map.clone(),
            None => self.read_scope(scope).await?,
        };
        map.insert(key.to_string(), value);
        self.write_scope(scope, &map).await?;
        cache.insert(scope, map);
        Ok(())
    }

    async fn remove(&self, scope: Scope, key: &str) -> Result<(), StoreError> {
        let mut cache = self.cache.lock().await;
        let mut map = match cache.get(&scope) {
            Some(map) => map.clone(),
            None => self.read_scope(scope).await?,
        };
        if map.remove(key).is_some() {
            self.write_scope(scope, &map).await?;
        }
        cache.insert(scope, map);
        Ok(())
    }
}
