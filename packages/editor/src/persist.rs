//! Key-value persistence
//!
//! Small JSON values under fixed keys. [`MemoryStore`] keeps them in memory;
//! [`FileStore`] writes one `<key>.json` file per key in a directory.

use crate::errors::PersistError;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

pub const PROJECTS_KEY: &str = "projects";
pub const SESSION_KEY: &str = "session";
pub const DIFF_KEY: &str = "diff";

pub trait KeyValueStore: Send + Sync {
    fn load(&self, key: &str) -> BoxFuture<'_, Result<Option<Value>, PersistError>>;
    fn save(&self, key: &str, value: Value) -> BoxFuture<'_, Result<(), PersistError>>;
    fn delete(&self, key: &str) -> BoxFuture<'_, Result<(), PersistError>>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = values.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl KeyValueStore for MemoryStore {
    fn load(&self, key: &str) -> BoxFuture<'_, Result<Option<Value>, PersistError>> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        let value = values.get(key).cloned();
        async move { Ok(value) }.boxed()
    }

    fn save(&self, key: &str, value: Value) -> BoxFuture<'_, Result<(), PersistError>> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value);
        async { Ok(()) }.boxed()
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, Result<(), PersistError>> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.remove(key);
        async { Ok(()) }.boxed()
    }
}

#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file(&self, key: &str) -> Result<PathBuf, PersistError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(PersistError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl KeyValueStore for FileStore {
    fn load(&self, key: &str) -> BoxFuture<'_, Result<Option<Value>, PersistError>> {
        let key = key.to_string();
        async move {
            let path = self.file(&key)?;
            let text = match tokio::fs::read_to_string(&path).await {
                Ok(text) => text,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            serde_json::from_str(&text)
                .map(Some)
                .map_err(|source| PersistError::Decode { key, source })
        }
        .boxed()
    }

    fn save(&self, key: &str, value: Value) -> BoxFuture<'_, Result<(), PersistError>> {
        let key = key.to_string();
        async move {
            let path = self.file(&key)?;
            tokio::fs::create_dir_all(&self.dir).await?;
            let text = serde_json::to_string_pretty(&value).map_err(|source| PersistError::Decode { key, source })?;
            tokio::fs::write(&path, text).await?;
            Ok(())
        }
        .boxed()
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, Result<(), PersistError>> {
        let key = key.to_string();
        async move {
            let path = self.file(&key)?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        }
        .boxed()
    }
}
