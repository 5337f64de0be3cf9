//! Plugin configuration persistence.
//!
//! The core only ever loads or saves one plugin's configuration document at
//! a time. Where documents live is up to the [`ConfigStore`]. Both
//! operations are idempotent.

use crate::error::ConfigError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Saved configuration of `plugin`, or `None` if nothing was saved yet.
    async fn load(&self, plugin: &str) -> Result<Option<Value>, ConfigError>;

    async fn save(&self, plugin: &str, config: &Value) -> Result<(), ConfigError>;
}

/// One pretty-printed JSON file per plugin (`<dir>/<plugin>.json`).
pub struct FileConfigStore {
    dir: PathBuf,
}

impl FileConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, plugin: &str) -> PathBuf {
        // Plugin names may contain path separators; keep each file inside `dir`.
        let file: String = plugin
            .chars()
            .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn load(&self, plugin: &str) -> Result<Option<Value>, ConfigError> {
        let path = self.path_for(plugin);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, plugin: &str, config: &Value) -> Result<(), ConfigError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(plugin);
        let text = serde_json::to_vec_pretty(config)?;
        tokio::fs::write(&path, text).await?;
        debug!(plugin, path = %path.display(), "plugin config saved");
        Ok(())
    }
}

/// In-memory store, for tests and ephemeral setups.
#[derive(Default)]
pub struct MemoryConfigStore {
    docs: RwLock<HashMap<String, Value>>,
}

impl MemoryConfigStore {
    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn load(&self, plugin: &str) -> Result<Option<Value>, ConfigError> {
        Ok(self.docs.read().await.get(plugin).cloned())
    }

    async fn save(&self, plugin: &str, config: &Value) -> Result<(), ConfigError> {
        self.docs
            .write()
            .await
            .insert(plugin.to_string(), config.clone());
        Ok(())
    }
}
