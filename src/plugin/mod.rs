//! Plugin runtime
//!
//! This module provides the content-source plugin system:
//! - Repository resolution and manifest normalization
//! - The JavaScript sandbox plugins are evaluated in
//! - The plugin store (durable files, scoped key/value storage, instance cache)
//! - Version comparison and the install/update/uninstall lifecycle
//! - The content fetch façade and multi-source search

pub mod facade;
pub mod file_store;
pub mod html;
pub mod http;
pub mod js_bindings;
pub mod js_runtime;
pub mod js_wrapper;
pub mod kv_storage;
pub mod proto;
pub mod repository;
pub mod sandbox;
pub mod search;
pub mod store;
pub mod types;
pub mod urls;
pub mod version;

pub use facade::SourceFacade;
pub use file_store::{FsPluginStorage, PluginFileStorage};
pub use http::{HttpClient, HttpFetch};
pub use js_runtime::JsError;
pub use js_wrapper::JsSourcePlugin;
pub use kv_storage::{KeyValueStore, PluginStorages, ScopedStorage, StorageArea};
pub use repository::{AvailablePlugins, RepositoryResolver, RepositoryWarning};
pub use sandbox::{PluginEvaluator, Sandbox};
pub use search::{SearchOrchestrator, SearchPhase, SearchSnapshot, SearchSource, SourceResult};
pub use store::{PluginStore, UpdateOutcome};
pub use types::{
    ChapterItem, NovelItem, PluginId, PluginInfo, PluginManifestEntry, PopularOptions, Repository, SourceNovel,
    SourcePage, SourcePlugin, LOCAL_PLUGIN_ID,
};
pub use version::{compare_versions, find_updates, is_newer};
