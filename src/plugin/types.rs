//! Plugin type definitions
//!
//! This module defines the data exchanged with content-source plugins and the
//! `SourcePlugin` trait every live plugin instance implements.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::error::{FolioError, Result};

/// Unique identifier for a plugin
pub type PluginId = String;

/// Reserved id for content the user imported directly.
///
/// It never has a plugin instance; façade operations answer it without
/// touching the store or the network.
pub const LOCAL_PLUGIN_ID: &str = "local";

/// Check that `id` can name a plugin directory and a storage namespace.
///
/// Rejects the empty id, `.` and `..`, path separators, the storage
/// namespace separator `:` and the local sentinel.
pub fn validate_plugin_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id != "."
        && id != ".."
        && id != LOCAL_PLUGIN_ID
        && !id.contains(|c: char| matches!(c, '/' | '\\' | ':') || c.is_control());
    if valid {
        Ok(())
    } else {
        Err(FolioError::InvalidPluginId(id.to_string()))
    }
}

/// A configured plugin repository (owned by the database layer, read-only here)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub url: String,
}

/// One plugin advertised by a repository manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifestEntry {
    pub id: PluginId,
    pub name: String,
    pub version: String,
    pub url: String,
    #[serde(default, rename = "customJS", skip_serializing_if = "Option::is_none")]
    pub custom_js: Option<String>,
    #[serde(default, rename = "customCSS", skip_serializing_if = "Option::is_none")]
    pub custom_css: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

/// A novel as listed by search or browse results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NovelItem {
    pub name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
}

/// A chapter reference inside a novel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterItem {
    pub name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_number: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
}

/// Full novel metadata returned by `parseNovel`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceNovel {
    pub path: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genres: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub chapters: Vec<ChapterItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,
}

/// One page of chapters returned by `parsePage`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcePage {
    pub chapters: Vec<ChapterItem>,
}

/// Request options the host uses when loading a plugin's images
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageRequestInit {
    #[serde(default)]
    pub headers: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl ImageRequestInit {
    /// Adds a `User-Agent` header unless one exists under any casing
    pub fn ensure_user_agent(&mut self, user_agent: &str) {
        let present = self
            .headers
            .keys()
            .any(|key| key.eq_ignore_ascii_case("user-agent"));
        if !present {
            self.headers
                .insert("User-Agent".to_string(), Value::String(user_agent.to_string()));
        }
    }
}

/// Options passed to `popularNovels`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopularOptions {
    pub show_latest_novels: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Value>,
}

/// Static description of a loaded plugin, captured once at evaluation time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub id: PluginId,
    pub name: String,
    pub version: String,
    pub site: String,
    pub lang: Option<String>,
    pub icon: Option<String>,
    pub filters: Option<Value>,
    pub image_request_init: ImageRequestInit,
    pub has_parse_page: bool,
    pub has_resolve_url: bool,
    pub has_popular_novels: bool,
}

/// A live content-source plugin instance
///
/// `parse_page`, `resolve_url` and `popular_novels` are optional
/// capabilities; check the matching `PluginInfo` flag before calling them.
#[async_trait]
pub trait SourcePlugin: Send + Sync {
    /// Metadata captured when the plugin was evaluated
    fn info(&self) -> &PluginInfo;

    async fn search_novels(&self, query: &str, page: u32) -> Result<Vec<NovelItem>>;

    async fn parse_novel(&self, path: &str) -> Result<SourceNovel>;

    /// Raw chapter markup
    async fn parse_chapter(&self, path: &str) -> Result<String>;

    async fn parse_page(&self, _path: &str, _page: &str) -> Result<SourcePage> {
        Err(capability_missing(self.info(), "parsePage"))
    }

    async fn resolve_url(&self, _path: &str, _is_novel: bool) -> Result<String> {
        Err(capability_missing(self.info(), "resolveUrl"))
    }

    async fn popular_novels(&self, _page: u32, _options: &PopularOptions) -> Result<Vec<NovelItem>> {
        Err(capability_missing(self.info(), "popularNovels"))
    }
}

pub(crate) fn capability_missing(info: &PluginInfo, capability: &str) -> FolioError {
    FolioError::CapabilityMissing {
        plugin: info.id.clone(),
        capability: capability.to_string(),
    }
}
