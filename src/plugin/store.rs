//! Plugin store
//!
//! Owns installed plugins: their source and side files on disk, their
//! scoped key/value entries, and the in-memory cache of live instances.
//! Lifecycle operations (install, update, uninstall) go through here.

use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use super::file_store::{custom_css_path, custom_js_path, source_path, PluginFileStorage};
use super::http::HttpFetch;
use super::kv_storage::PluginStorages;
use super::sandbox::PluginEvaluator;
use super::types::{validate_plugin_id, PluginId, PluginManifestEntry, SourcePlugin, LOCAL_PLUGIN_ID};
use super::version::{find_updates, is_newer};
use crate::core::error::{ErrorReport, Result};

type InstanceCache = HashMap<PluginId, Arc<dyn SourcePlugin>>;

/// Result of updating one plugin
#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutcome {
    pub id: PluginId,
    pub from: String,
    pub to: Option<String>,
    pub error: Option<ErrorReport>,
}

pub struct PluginStore {
    evaluator: Arc<dyn PluginEvaluator>,
    files: Arc<dyn PluginFileStorage>,
    storages: PluginStorages,
    http: Arc<dyn HttpFetch>,
    instances: RwLock<InstanceCache>,
}

impl PluginStore {
    pub fn new(
        evaluator: Arc<dyn PluginEvaluator>,
        files: Arc<dyn PluginFileStorage>,
        storages: PluginStorages,
        http: Arc<dyn HttpFetch>,
    ) -> Self {
        Self {
            evaluator,
            files,
            storages,
            http,
            instances: RwLock::new(HashMap::new()),
        }
    }

    fn read_cache(&self) -> RwLockReadGuard<'_, InstanceCache> {
        self.instances.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_cache(&self) -> RwLockWriteGuard<'_, InstanceCache> {
        self.instances.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cached(&self, id: &str) -> Option<Arc<dyn SourcePlugin>> {
        self.read_cache().get(id).cloned()
    }

    /// Cache `instance` unless another instance got there first; returns the cached one
    fn insert_first(&self, id: &str, instance: Arc<dyn SourcePlugin>) -> Arc<dyn SourcePlugin> {
        self.write_cache()
            .entry(id.to_string())
            .or_insert(instance)
            .clone()
    }

    async fn evaluate(&self, id: &str, source: String) -> Option<Arc<dyn SourcePlugin>> {
        let evaluator = self.evaluator.clone();
        let plugin_id = id.to_string();
        match tokio::task::spawn_blocking(move || evaluator.evaluate(&plugin_id, &source)).await {
            Ok(instance) => instance,
            Err(e) => {
                warn!(plugin = %id, "Evaluation task failed: {}", e);
                None
            }
        }
    }

    /// Download, evaluate and persist `entry`.
    ///
    /// `Ok(None)` means the source failed to evaluate and nothing changed.
    /// When an installed version is not older than the downloaded one, the
    /// installed instance is returned and nothing changes either.
    pub async fn install(&self, entry: &PluginManifestEntry) -> Result<Option<Arc<dyn SourcePlugin>>> {
        validate_plugin_id(&entry.id)?;
        info!(plugin = %entry.id, version = %entry.version, url = %entry.url, "Installing plugin");
        let source = self.http.fetch_text(&entry.url).await?;

        let Some(instance) = self.evaluate(&entry.id, source.clone()).await else {
            warn!(plugin = %entry.id, "Downloaded source did not evaluate; nothing installed");
            return Ok(None);
        };

        if let Some(current) = self.load_async(&entry.id).await {
            let installed = current.info().version.clone();
            if !is_newer(&instance.info().version, &installed) {
                info!(
                    plugin = %entry.id,
                    installed = %installed,
                    downloaded = %instance.info().version,
                    "Installed version is current"
                );
                return Ok(Some(current));
            }
        }

        let custom_js = self.download_side_file(entry.custom_js.as_deref()).await?;
        let custom_css = self.download_side_file(entry.custom_css.as_deref()).await?;

        self.files.write(&source_path(&entry.id), &source).await?;
        self.sync_side_file(&custom_js_path(&entry.id), custom_js).await?;
        self.sync_side_file(&custom_css_path(&entry.id), custom_css).await?;

        self.write_cache().insert(entry.id.clone(), instance.clone());
        info!(plugin = %entry.id, version = %instance.info().version, "Plugin installed");
        Ok(Some(instance))
    }

    /// Same as `install`
    pub async fn update(&self, entry: &PluginManifestEntry) -> Result<Option<Arc<dyn SourcePlugin>>> {
        self.install(entry).await
    }

    /// Install every entry of `available` newer than its installed version
    pub async fn update_all(&self, available: &[PluginManifestEntry]) -> Vec<UpdateOutcome> {
        let installed = self.installed_versions().await;
        let mut outcomes = Vec::new();

        for entry in find_updates(&installed, available) {
            let from = installed.get(&entry.id).cloned().unwrap_or_default();
            let outcome = match self.update(&entry).await {
                Ok(instance) => UpdateOutcome {
                    id: entry.id.clone(),
                    from,
                    to: instance.map(|i| i.info().version.clone()),
                    error: None,
                },
                Err(e) => {
                    warn!(plugin = %entry.id, "Update failed: {}", e);
                    UpdateOutcome {
                        id: entry.id.clone(),
                        from,
                        to: None,
                        error: Some(ErrorReport::from_error(&e)),
                    }
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn download_side_file(&self, url: Option<&str>) -> Result<Option<String>> {
        match url {
            Some(url) => Ok(Some(self.http.fetch_text(url).await?)),
            None => Ok(None),
        }
    }

    async fn sync_side_file(&self, path: &str, contents: Option<String>) -> Result<()> {
        match contents {
            Some(contents) => self.files.write(path, &contents).await,
            None => self.files.remove(path).await,
        }
    }

    /// Evict the instance, purge its key/value entries and delete its files
    pub async fn uninstall(&self, id: &str) -> Result<()> {
        validate_plugin_id(id)?;
        self.write_cache().remove(id);
        let purged = self.storages.purge(id)?;
        self.files.remove_dir(id).await?;
        info!(plugin = %id, purged_entries = purged, "Plugin uninstalled");
        Ok(())
    }

    /// Synchronous lookup: cache, else a blocking read and evaluation.
    ///
    /// `None` when the backend cannot read synchronously or anything fails.
    /// Evaluation runs on the calling thread, so async code uses `load_async`.
    pub fn get(&self, id: &str) -> Option<Arc<dyn SourcePlugin>> {
        validate_plugin_id(id).ok()?;
        if let Some(instance) = self.cached(id) {
            return Some(instance);
        }

        let source = match self.files.read_blocking(&source_path(id))? {
            Ok(source) => source,
            Err(e) => {
                debug!(plugin = %id, "Blocking read failed: {}", e);
                return None;
            }
        };
        let instance = self.evaluator.evaluate(id, &source)?;
        Some(self.insert_first(id, instance))
    }

    /// Asynchronous lookup: cache, else read and evaluate the stored source
    pub async fn load_async(&self, id: &str) -> Option<Arc<dyn SourcePlugin>> {
        validate_plugin_id(id).ok()?;
        if let Some(instance) = self.cached(id) {
            return Some(instance);
        }

        let path = source_path(id);
        if !self.files.exists(&path).await {
            return None;
        }
        let source = match self.files.read(&path).await {
            Ok(source) => source,
            Err(e) => {
                warn!(plugin = %id, "Failed to read plugin source: {}", e);
                return None;
            }
        };

        let instance = self.evaluate(id, source).await?;
        Some(self.insert_first(id, instance))
    }

    /// Load every id concurrently; returns how many are live afterwards
    pub async fn preload_all(&self, ids: &[PluginId]) -> usize {
        let loads = ids
            .iter()
            .filter(|id| id.as_str() != LOCAL_PLUGIN_ID)
            .map(|id| self.load_async(id));
        let loaded = join_all(loads).await.into_iter().flatten().count();
        debug!(requested = ids.len(), loaded, "Plugins preloaded");
        loaded
    }

    /// Ids with a stored source file
    pub async fn installed_ids(&self) -> Result<Vec<PluginId>> {
        let mut ids = Vec::new();
        for dir in self.files.list_dirs().await? {
            if validate_plugin_id(&dir).is_ok() && self.files.exists(&source_path(&dir)).await {
                ids.push(dir);
            }
        }
        Ok(ids)
    }

    /// Installed version per loadable plugin
    pub async fn installed_versions(&self) -> HashMap<PluginId, String> {
        let mut versions = HashMap::new();
        for id in self.installed_ids().await.unwrap_or_default() {
            if let Some(instance) = self.load_async(&id).await {
                versions.insert(id, instance.info().version.clone());
            }
        }
        versions
    }

    pub async fn custom_js(&self, id: &str) -> Result<Option<String>> {
        self.read_optional(&custom_js_path(id)).await
    }

    pub async fn custom_css(&self, id: &str) -> Result<Option<String>> {
        self.read_optional(&custom_css_path(id)).await
    }

    async fn read_optional(&self, path: &str) -> Result<Option<String>> {
        if !self.files.exists(path).await {
            return Ok(None);
        }
        Ok(Some(self.files.read(path).await?))
    }
}
