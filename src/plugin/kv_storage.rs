//! Plugin-scoped key/value storage
//!
//! Every plugin gets three storage areas through the sandbox: a durable
//! store, a local store and an in-memory session store. All plugins share
//! the same backing stores; isolation comes from prefixing every key with
//! `<plugin id>:` so a plugin can neither see nor overwrite another plugin's
//! entries, and uninstall can purge a plugin by prefix.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::core::config::StorageConfig;
use crate::core::error::{ErrorContext, FolioError, Result};

const NAMESPACE_SEPARATOR: char = ':';

/// Backing key/value store collaborator
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
    fn keys(&self) -> Result<Vec<String>>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Process-lifetime store
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        lock(&self.entries).insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        lock(&self.entries).remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(lock(&self.entries).keys().cloned().collect())
    }
}

/// JSON-file backed store, rewritten on every mutation
pub struct FileKvStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, Value>>,
}

impl FileKvStore {
    /// Open the store at `path`, starting empty when the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content).map_err(|e| {
                    FolioError::StorageError(format!("Corrupt storage file {}: {}", path.display(), e))
                })?
            }
        } else {
            BTreeMap::new()
        };

        debug!(path = %path.display(), entries = entries.len(), "Opened key/value store");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn persist(&self, entries: &BTreeMap<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string(entries)
            .map_err(|e| FolioError::SerializationError(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileKvStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = lock(&self.entries);
        entries.insert(key.to_string(), value);
        self.persist(&entries)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut entries = lock(&self.entries);
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(lock(&self.entries).keys().cloned().collect())
    }
}

/// The three storage areas a plugin can reach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageArea {
    Storage,
    LocalStorage,
    SessionStorage,
}

impl StorageArea {
    pub const ALL: [StorageArea; 3] = [
        StorageArea::Storage,
        StorageArea::LocalStorage,
        StorageArea::SessionStorage,
    ];
}

/// Stored envelope carrying an optional expiry (epoch milliseconds)
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredItem {
    value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires: Option<i64>,
}

/// Backing stores shared by every plugin
#[derive(Clone)]
pub struct PluginStorages {
    durable: Arc<dyn KeyValueStore>,
    local: Arc<dyn KeyValueStore>,
    session: Arc<dyn KeyValueStore>,
}

impl PluginStorages {
    pub fn new(
        durable: Arc<dyn KeyValueStore>,
        local: Arc<dyn KeyValueStore>,
        session: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            durable,
            local,
            session,
        }
    }

    /// File-backed durable and local stores under the data directory
    pub fn open(config: &StorageConfig) -> Result<Self> {
        Ok(Self::new(
            Arc::new(FileKvStore::open(config.plugin_storage_file())?),
            Arc::new(FileKvStore::open(config.plugin_local_storage_file())?),
            Arc::new(MemoryKvStore::new()),
        ))
    }

    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryKvStore::new()),
            Arc::new(MemoryKvStore::new()),
            Arc::new(MemoryKvStore::new()),
        )
    }

    fn area(&self, area: StorageArea) -> &Arc<dyn KeyValueStore> {
        match area {
            StorageArea::Storage => &self.durable,
            StorageArea::LocalStorage => &self.local,
            StorageArea::SessionStorage => &self.session,
        }
    }

    /// Handle confined to one plugin's namespace
    pub fn scoped(&self, plugin_id: &str) -> ScopedStorage {
        ScopedStorage {
            prefix: format!("{}{}", plugin_id, NAMESPACE_SEPARATOR),
            storages: self.clone(),
        }
    }

    /// Delete every entry of `plugin_id` in all three areas
    pub fn purge(&self, plugin_id: &str) -> Result<usize> {
        let prefix = format!("{}{}", plugin_id, NAMESPACE_SEPARATOR);
        let mut removed = 0;
        for area in StorageArea::ALL {
            let store = self.area(area);
            for key in store.keys()? {
                if key.starts_with(&prefix) {
                    store.delete(&key)?;
                    removed += 1;
                }
            }
        }
        debug!(plugin = %plugin_id, removed, "Purged plugin storage");
        Ok(removed)
    }
}

/// One plugin's view of the storage areas
#[derive(Clone)]
pub struct ScopedStorage {
    prefix: String,
    storages: PluginStorages,
}

impl ScopedStorage {
    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    pub fn get(&self, area: StorageArea, key: &str) -> Result<Option<Value>> {
        let store = self.storages.area(area);
        let full_key = self.full_key(key);
        let Some(raw) = store.get(&full_key)? else {
            return Ok(None);
        };

        let item: StoredItem = match serde_json::from_value(raw) {
            Ok(item) => item,
            Err(e) => {
                warn!(key = %full_key, "Dropping unreadable storage entry: {}", e);
                store.delete(&full_key)?;
                return Ok(None);
            }
        };

        if let Some(expires) = item.expires {
            if expires <= chrono::Utc::now().timestamp_millis() {
                store.delete(&full_key)?;
                return Ok(None);
            }
        }
        Ok(Some(item.value))
    }

    pub fn set(&self, area: StorageArea, key: &str, value: Value, expires: Option<i64>) -> Result<()> {
        let item = serde_json::to_value(StoredItem { value, expires })
            .map_err(|e| FolioError::SerializationError(e.to_string()))?;
        self.storages.area(area).set(&self.full_key(key), item)
    }

    pub fn delete(&self, area: StorageArea, key: &str) -> Result<()> {
        self.storages.area(area).delete(&self.full_key(key))
    }

    /// Keys of this plugin, without the namespace prefix
    pub fn keys(&self, area: StorageArea) -> Result<Vec<String>> {
        Ok(self
            .storages
            .area(area)
            .keys()?
            .into_iter()
            .filter_map(|key| key.strip_prefix(&self.prefix).map(str::to_string))
            .collect())
    }

    pub fn clear(&self, area: StorageArea) -> Result<()> {
        for key in self.keys(area)? {
            self.delete(area, &key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plugins_cannot_see_each_other() {
        let storages = PluginStorages::in_memory();
        let alpha = storages.scoped("alpha");
        let beta = storages.scoped("beta");

        alpha.set(StorageArea::Storage, "token", json!("a-secret"), None).unwrap();
        beta.set(StorageArea::Storage, "token", json!("b-secret"), None).unwrap();

        assert_eq!(alpha.get(StorageArea::Storage, "token").unwrap(), Some(json!("a-secret")));
        assert_eq!(beta.get(StorageArea::Storage, "token").unwrap(), Some(json!("b-secret")));
        assert_eq!(alpha.keys(StorageArea::Storage).unwrap(), vec!["token".to_string()]);
        assert_eq!(alpha.get(StorageArea::SessionStorage, "token").unwrap(), None);
    }

    #[test]
    fn test_purge_only_removes_matching_prefix() {
        let storages = PluginStorages::in_memory();
        storages.scoped("abc").set(StorageArea::Storage, "k", json!(1), None).unwrap();
        storages.scoped("abc").set(StorageArea::LocalStorage, "k", json!(2), None).unwrap();
        storages.scoped("abc").set(StorageArea::SessionStorage, "k", json!(3), None).unwrap();
        storages.scoped("abcd").set(StorageArea::Storage, "k", json!(4), None).unwrap();

        assert_eq!(storages.purge("abc").unwrap(), 3);
        assert_eq!(storages.scoped("abc").keys(StorageArea::Storage).unwrap().len(), 0);
        assert_eq!(storages.scoped("abcd").get(StorageArea::Storage, "k").unwrap(), Some(json!(4)));
    }

    #[test]
    fn test_expired_entries_read_as_absent() {
        let storages = PluginStorages::in_memory();
        let scoped = storages.scoped("alpha");
        let past = chrono::Utc::now().timestamp_millis() - 1_000;
        let future = chrono::Utc::now().timestamp_millis() + 60_000;

        scoped.set(StorageArea::Storage, "old", json!("x"), Some(past)).unwrap();
        scoped.set(StorageArea::Storage, "new", json!("y"), Some(future)).unwrap();

        assert_eq!(scoped.get(StorageArea::Storage, "old").unwrap(), None);
        assert_eq!(scoped.get(StorageArea::Storage, "new").unwrap(), Some(json!("y")));
        assert_eq!(scoped.keys(StorageArea::Storage).unwrap(), vec!["new".to_string()]);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin-storage.json");

        {
            let store = FileKvStore::open(&path).unwrap();
            store.set("alpha:page", json!({ "n": 3 })).unwrap();
            store.set("alpha:gone", json!(true)).unwrap();
            store.delete("alpha:gone").unwrap();
        }

        let reopened = FileKvStore::open(&path).unwrap();
        assert_eq!(reopened.get("alpha:page").unwrap(), Some(json!({ "n": 3 })));
        assert_eq!(reopened.keys().unwrap(), vec!["alpha:page".to_string()]);
    }

    #[test]
    fn test_clear_area() {
        let storages = PluginStorages::in_memory();
        let scoped = storages.scoped("alpha");
        scoped.set(StorageArea::LocalStorage, "a", json!(1), None).unwrap();
        scoped.set(StorageArea::LocalStorage, "b", json!(2), None).unwrap();
        scoped.set(StorageArea::Storage, "c", json!(3), None).unwrap();

        scoped.clear(StorageArea::LocalStorage).unwrap();
        assert!(scoped.keys(StorageArea::LocalStorage).unwrap().is_empty());
        assert_eq!(scoped.keys(StorageArea::Storage).unwrap(), vec!["c".to_string()]);
    }
}
