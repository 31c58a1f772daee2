//! Durable plugin files
//!
//! Installed plugins live under `<plugin_dir>/<id>/`: `index.js` holds the
//! source, `custom.js` and `custom.css` the optional side files.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::core::error::{ErrorContext, FolioError, Result};

pub const SOURCE_FILE: &str = "index.js";
pub const CUSTOM_JS_FILE: &str = "custom.js";
pub const CUSTOM_CSS_FILE: &str = "custom.css";

/// Storage backend for plugin source and side files.
///
/// Paths are relative to the backend's root and must stay below it.
#[async_trait]
pub trait PluginFileStorage: Send + Sync {
    async fn exists(&self, path: &str) -> bool;

    /// Synchronous read for the cache-miss path of `PluginStore::get`.
    ///
    /// Backends that cannot read synchronously return `None`.
    fn read_blocking(&self, path: &str) -> Option<Result<String>>;

    async fn read(&self, path: &str) -> Result<String>;

    async fn write(&self, path: &str, contents: &str) -> Result<()>;

    /// Remove a file; missing files are not an error
    async fn remove(&self, path: &str) -> Result<()>;

    /// Remove a directory and everything under it; missing directories are not an error
    async fn remove_dir(&self, path: &str) -> Result<()>;

    /// Names of the plugin directories directly under the root
    async fn list_dirs(&self) -> Result<Vec<String>>;
}

pub fn source_path(id: &str) -> String {
    format!("{}/{}", id, SOURCE_FILE)
}

pub fn custom_js_path(id: &str) -> String {
    format!("{}/{}", id, CUSTOM_JS_FILE)
}

pub fn custom_css_path(id: &str) -> String {
    format!("{}/{}", id, CUSTOM_CSS_FILE)
}

/// Local filesystem backend rooted at the configured plugin directory
pub struct FsPluginStorage {
    root: PathBuf,
}

impl FsPluginStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Join `path` onto the root; only plain, non-empty relative paths are accepted
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let confined = relative.components().next().is_some()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !confined {
            return Err(FolioError::StorageError(format!(
                "Path {:?} is outside the plugin directory",
                path
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl PluginFileStorage for FsPluginStorage {
    async fn exists(&self, path: &str) -> bool {
        match self.resolve(path) {
            Ok(full) => tokio::fs::try_exists(full).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    fn read_blocking(&self, path: &str) -> Option<Result<String>> {
        let full = match self.resolve(path) {
            Ok(full) => full,
            Err(e) => return Some(Err(e)),
        };
        Some(
            std::fs::read_to_string(&full)
                .with_context(|| format!("Failed to read {}", full.display())),
        )
    }

    async fn read(&self, path: &str) -> Result<String> {
        let full = self.resolve(path)?;
        tokio::fs::read_to_string(&full)
            .await
            .with_context(|| format!("Failed to read {}", full.display()))
    }

    async fn write(&self, path: &str, contents: &str) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        debug!(path = %full.display(), bytes = contents.len(), "Writing plugin file");
        tokio::fs::write(&full, contents)
            .await
            .with_context(|| format!("Failed to write {}", full.display()))
    }

    async fn remove(&self, path: &str) -> Result<()> {
        match tokio::fs::remove_file(self.resolve(path)?).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn remove_dir(&self, path: &str) -> Result<()> {
        match tokio::fs::remove_dir_all(self.resolve(path)?).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn list_dirs(&self) -> Result<Vec<String>> {
        let mut dirs = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(dirs),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    dirs.push(name.to_string());
                }
            }
        }
        dirs.sort();
        Ok(dirs)
    }
}
