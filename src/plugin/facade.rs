//! Content fetch façade
//!
//! The stable fetch API callers use. Resolves the plugin through the store's
//! asynchronous loader and delegates. The local pseudo-source is answered
//! here without a lookup.

use std::sync::Arc;
use tracing::{debug, warn};

use super::store::PluginStore;
use super::types::{ChapterItem, NovelItem, PopularOptions, SourceNovel, SourcePage, SourcePlugin, LOCAL_PLUGIN_ID};
use super::urls::{is_absolute_url, join_site_path};
use crate::core::error::{FolioError, Result};

pub struct SourceFacade {
    store: Arc<PluginStore>,
}

impl SourceFacade {
    pub fn new(store: Arc<PluginStore>) -> Self {
        Self { store }
    }

    async fn resolve(&self, plugin_id: &str) -> Option<Arc<dyn SourcePlugin>> {
        self.store.load_async(plugin_id).await
    }

    async fn require(&self, plugin_id: &str) -> Result<Arc<dyn SourcePlugin>> {
        self.resolve(plugin_id)
            .await
            .ok_or_else(|| FolioError::UnknownPlugin(plugin_id.to_string()))
    }

    /// Novel metadata; `None` for local content
    pub async fn fetch_novel(&self, plugin_id: &str, path: &str) -> Result<Option<SourceNovel>> {
        if plugin_id == LOCAL_PLUGIN_ID {
            return Ok(None);
        }
        let plugin = self.require(plugin_id).await?;
        debug!(plugin = %plugin_id, path = %path, "Fetching novel");
        Ok(Some(plugin.parse_novel(path).await?))
    }

    /// Chapter markup, or a placeholder naming the plugin when it cannot be resolved
    pub async fn fetch_chapter(&self, plugin_id: &str, path: &str) -> Result<String> {
        if plugin_id == LOCAL_PLUGIN_ID {
            return Ok(String::new());
        }
        match self.resolve(plugin_id).await {
            Some(plugin) => plugin.parse_chapter(path).await,
            None => {
                warn!(plugin = %plugin_id, "Chapter requested from unknown plugin");
                Ok(format!("Unknown plugin: {}", plugin_id))
            }
        }
    }

    pub async fn fetch_chapters(&self, plugin_id: &str, path: &str) -> Result<Vec<ChapterItem>> {
        if plugin_id == LOCAL_PLUGIN_ID {
            return Ok(Vec::new());
        }
        let plugin = self.require(plugin_id).await?;
        Ok(plugin.parse_novel(path).await?.chapters)
    }

    pub async fn fetch_page(&self, plugin_id: &str, path: &str, page: &str) -> Result<SourcePage> {
        if plugin_id == LOCAL_PLUGIN_ID {
            return Ok(SourcePage::default());
        }
        let plugin = self.require(plugin_id).await?;
        if !plugin.info().has_parse_page {
            return Err(FolioError::PaginationUnsupported(plugin_id.to_string()));
        }
        plugin.parse_page(path, page).await
    }

    /// Best-effort absolute URL for `path`; falls back to `path` itself
    pub async fn resolve_url(&self, plugin_id: &str, path: &str, is_novel: bool) -> String {
        if is_absolute_url(path) || plugin_id == LOCAL_PLUGIN_ID {
            return path.to_string();
        }
        let Some(plugin) = self.resolve(plugin_id).await else {
            return path.to_string();
        };

        let info = plugin.info();
        if !info.has_resolve_url {
            return join_site_path(&info.site, path);
        }
        match plugin.resolve_url(path, is_novel).await {
            Ok(url) => url,
            Err(e) => {
                debug!(plugin = %plugin_id, "resolveUrl failed: {}", e);
                path.to_string()
            }
        }
    }

    pub async fn fetch_popular(&self, plugin_id: &str, page: u32, options: &PopularOptions) -> Result<Vec<NovelItem>> {
        if plugin_id == LOCAL_PLUGIN_ID {
            return Ok(Vec::new());
        }
        let plugin = self.require(plugin_id).await?;
        plugin.popular_novels(page, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::file_store::FsPluginStorage;
    use crate::plugin::http::testing::FakeHttp;
    use crate::plugin::kv_storage::PluginStorages;
    use crate::plugin::sandbox::testing::FakeEvaluator;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        http: Arc<FakeHttp>,
        evaluator: Arc<FakeEvaluator>,
        facade: SourceFacade,
    }

    /// Facade over a store with the given `(id, source)` plugins on disk
    fn fixture(plugins: &[(&str, &str)]) -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("plugins");
        for (id, source) in plugins {
            std::fs::create_dir_all(root.join(id)).unwrap();
            std::fs::write(root.join(id).join("index.js"), source).unwrap();
        }
        let http = Arc::new(FakeHttp::new());
        let evaluator = Arc::new(FakeEvaluator::new());
        let store = PluginStore::new(
            evaluator.clone(),
            Arc::new(FsPluginStorage::new(&root)),
            PluginStorages::in_memory(),
            http.clone(),
        );
        Fixture {
            _dir: dir,
            http,
            evaluator,
            facade: SourceFacade::new(Arc::new(store)),
        }
    }

    #[tokio::test]
    async fn test_local_source_never_resolves() {
        let f = fixture(&[("local", "1.0.0")]);
        let facade = &f.facade;

        assert_eq!(facade.fetch_novel(LOCAL_PLUGIN_ID, "/any").await.unwrap(), None);
        assert_eq!(facade.fetch_chapter(LOCAL_PLUGIN_ID, "/any").await.unwrap(), "");
        assert!(facade.fetch_chapters(LOCAL_PLUGIN_ID, "/any").await.unwrap().is_empty());
        assert!(facade.fetch_page(LOCAL_PLUGIN_ID, "/any", "2").await.unwrap().chapters.is_empty());
        assert_eq!(facade.resolve_url(LOCAL_PLUGIN_ID, "/any", true).await, "/any");

        assert_eq!(f.evaluator.evaluations(), 0);
        assert_eq!(f.http.request_count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_novel_and_chapters() {
        let f = fixture(&[("alpha", "1.0.0")]);

        let novel = f.facade.fetch_novel("alpha", "/n/1").await.unwrap().unwrap();
        assert_eq!(novel.name, "alpha novel");
        let chapters = f.facade.fetch_chapters("alpha", "/n/1").await.unwrap();
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].path, "/n/1/1");
        assert_eq!(f.facade.fetch_chapter("alpha", "/c/9").await.unwrap(), "<p>/c/9</p>");
        assert_eq!(f.evaluator.evaluations(), 1);
    }

    #[tokio::test]
    async fn test_cold_load_runs_off_the_runtime_thread() {
        let f = fixture(&[("alpha", "1.0.0")]);

        f.facade.fetch_chapter("alpha", "/c/1").await.unwrap();
        f.facade.fetch_chapter("alpha", "/c/2").await.unwrap();

        let threads = f.evaluator.evaluation_threads();
        assert_eq!(threads.len(), 1);
        assert_ne!(threads[0], std::thread::current().id());
    }

    #[tokio::test]
    async fn test_unknown_plugin() {
        let f = fixture(&[]);

        let err = f.facade.fetch_novel("ghost", "/n/1").await.unwrap_err();
        assert!(matches!(err, FolioError::UnknownPlugin(ref id) if id == "ghost"));
        assert!(matches!(
            f.facade.fetch_chapters("ghost", "/n/1").await,
            Err(FolioError::UnknownPlugin(_))
        ));
        assert!(matches!(
            f.facade.fetch_page("ghost", "/n/1", "2").await,
            Err(FolioError::UnknownPlugin(_))
        ));
        assert_eq!(
            f.facade.fetch_chapter("ghost", "/c/1").await.unwrap(),
            "Unknown plugin: ghost"
        );
    }

    #[tokio::test]
    async fn test_fetch_page_requires_capability() {
        let f = fixture(&[("paged", "1.0.0;pages"), ("flat", "1.0.0")]);

        let page = f.facade.fetch_page("paged", "/n/1", "3").await.unwrap();
        assert_eq!(page.chapters[0].name, "Page 3");

        let err = f.facade.fetch_page("flat", "/n/1", "3").await.unwrap_err();
        assert!(matches!(err, FolioError::PaginationUnsupported(ref id) if id == "flat"));
    }

    #[tokio::test]
    async fn test_resolve_url() {
        let f = fixture(&[("resolver", "1.0.0;resolve"), ("plain", "1.0.0")]);

        assert_eq!(
            f.facade.resolve_url("ghost", "https://x.example/n/1", true).await,
            "https://x.example/n/1"
        );
        assert_eq!(f.evaluator.evaluations(), 0);

        assert_eq!(f.facade.resolve_url("resolver", "/n/1", true).await, "resolved:/n/1");
        assert_eq!(f.facade.resolve_url("plain", "/n/1", false).await, "https://plain.example/n/1");
        assert_eq!(f.facade.resolve_url("ghost", "/n/1", true).await, "/n/1");
    }

    #[tokio::test]
    async fn test_fetch_popular_requires_capability() {
        let f = fixture(&[("alpha", "1.0.0")]);
        let err = f
            .facade
            .fetch_popular("alpha", 1, &PopularOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FolioError::CapabilityMissing { ref capability, .. } if capability == "popularNovels"));
    }
}
