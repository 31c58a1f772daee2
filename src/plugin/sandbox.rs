//! Plugin execution sandbox
//!
//! Turns untrusted plugin source into a live `SourcePlugin`, or nothing.
//! Evaluation happens in a fresh runtime on its own worker thread; the only
//! capability handed to the source is `require` over a fixed allow-list.
//! Every failure (syntax error, throw, contract violation, worker failure)
//! is logged and reported as `None`.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::js_bindings::SandboxContext;
use super::js_runtime::PluginDescriptor;
use super::js_wrapper::JsSourcePlugin;
use super::kv_storage::PluginStorages;
use super::types::{validate_plugin_id, ImageRequestInit, PluginInfo, SourcePlugin};
use crate::core::config::PluginConfig;
use crate::core::error::{FolioError, Result};

const REQUIRED_STRINGS: [&str; 4] = ["id", "name", "version", "site"];
const REQUIRED_FUNCTIONS: [&str; 3] = ["searchNovels", "parseNovel", "parseChapter"];

/// Turns plugin source into an instance
pub trait PluginEvaluator: Send + Sync {
    /// Evaluate `source` as plugin `id`. Blocks until evaluation finishes.
    fn evaluate(&self, id: &str, source: &str) -> Option<Arc<dyn SourcePlugin>>;
}

/// The JavaScript sandbox
pub struct Sandbox {
    client: reqwest::Client,
    user_agent: String,
    default_cover: String,
    storages: PluginStorages,
}

impl Sandbox {
    pub fn new(client: reqwest::Client, config: &PluginConfig, storages: PluginStorages) -> Self {
        Self {
            client,
            user_agent: config.user_agent.clone(),
            default_cover: config.default_cover.clone(),
            storages,
        }
    }

    /// Evaluate `source` under `id`, failing closed
    pub fn load_plugin(&self, id: &str, source: &str) -> Option<Arc<dyn SourcePlugin>> {
        if let Err(e) = validate_plugin_id(id) {
            warn!("Refusing to load plugin: {}", e);
            return None;
        }
        let context = SandboxContext {
            plugin_id: id.to_string(),
            user_agent: self.user_agent.clone(),
            default_cover: self.default_cover.clone(),
            client: self.client.clone(),
            storage: self.storages.scoped(id),
        };

        match JsSourcePlugin::spawn(source.to_string(), context) {
            Ok(plugin) => Some(Arc::new(plugin)),
            Err(e) => {
                warn!(plugin = %id, "Plugin failed to load: {}", e);
                None
            }
        }
    }
}

impl PluginEvaluator for Sandbox {
    fn evaluate(&self, id: &str, source: &str) -> Option<Arc<dyn SourcePlugin>> {
        self.load_plugin(id, source)
    }
}

/// Check the exported object against the plugin contract and snapshot it
pub fn validate_descriptor(expected_id: &str, descriptor: PluginDescriptor, user_agent: &str) -> Result<PluginInfo> {
    let violation = |message: String| FolioError::PluginLoadError(format!("{}: {}", expected_id, message));

    let string_member = |name: &str, value: &Value| -> Result<String> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| violation(format!("'{}' must be a string", name)))
    };
    let id = string_member(REQUIRED_STRINGS[0], &descriptor.id)?;
    let name = string_member(REQUIRED_STRINGS[1], &descriptor.name)?;
    let version = string_member(REQUIRED_STRINGS[2], &descriptor.version)?;
    let site = string_member(REQUIRED_STRINGS[3], &descriptor.site)?;

    for function in REQUIRED_FUNCTIONS {
        if !descriptor.is_function(function) {
            return Err(violation(format!("'{}' must be a function", function)));
        }
    }

    if id != expected_id {
        return Err(violation(format!("declares id '{}'", id)));
    }
    validate_plugin_id(&id)?;

    let has_parse_page = descriptor.is_function("parsePage");
    let has_resolve_url = descriptor.is_function("resolveUrl");
    let has_popular_novels = descriptor.is_function("popularNovels");

    let mut image_request_init = match descriptor.image_request_init {
        None | Some(Value::Null) => ImageRequestInit::default(),
        Some(value) => serde_json::from_value(value)
            .map_err(|e| violation(format!("invalid imageRequestInit: {}", e)))?,
    };
    image_request_init.ensure_user_agent(user_agent);

    debug!(plugin = %id, version = %version, "Plugin contract satisfied");
    Ok(PluginInfo {
        id,
        name,
        version,
        site,
        lang: descriptor.lang.as_str().map(str::to_string),
        icon: descriptor.icon.as_str().map(str::to_string),
        filters: descriptor.filters.filter(|f| !f.is_null()),
        image_request_init,
        has_parse_page,
        has_resolve_url,
        has_popular_novels,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::plugin::types::{NovelItem, SourceNovel, SourcePage};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::thread::ThreadId;

    /// Plugin whose behaviour is scripted by its source text.
    ///
    /// Source format: `<version>` optionally followed by `;search=<a>,<b>`,
    /// `;search-error=<message>`, `;pages` or `;resolve`. Every search is
    /// recorded in `log` as `(plugin id, query)`.
    pub struct FakePlugin {
        info: PluginInfo,
        novels: Vec<NovelItem>,
        search_error: Option<String>,
        log: SearchLog,
    }

    pub type SearchLog = Arc<Mutex<Vec<(String, String)>>>;

    impl FakePlugin {
        pub fn new(id: &str, name: &str, source: &str, log: SearchLog) -> Self {
            let mut parts = source.split(';');
            let version = parts.next().unwrap_or("1.0.0").to_string();
            let mut novels = Vec::new();
            let mut search_error = None;
            let mut has_parse_page = false;
            let mut has_resolve_url = false;
            for part in parts {
                if let Some(list) = part.strip_prefix("search=") {
                    novels = list
                        .split(',')
                        .filter(|n| !n.is_empty())
                        .map(|n| NovelItem {
                            name: n.to_string(),
                            path: format!("/novel/{}", n),
                            cover: None,
                        })
                        .collect();
                } else if let Some(message) = part.strip_prefix("search-error=") {
                    search_error = Some(message.to_string());
                } else if part == "pages" {
                    has_parse_page = true;
                } else if part == "resolve" {
                    has_resolve_url = true;
                }
            }

            Self {
                info: PluginInfo {
                    id: id.to_string(),
                    name: name.to_string(),
                    version,
                    site: format!("https://{}.example/", id),
                    lang: None,
                    icon: None,
                    filters: None,
                    image_request_init: ImageRequestInit::default(),
                    has_parse_page,
                    has_resolve_url,
                    has_popular_novels: false,
                },
                novels,
                search_error,
                log,
            }
        }
    }

    #[async_trait]
    impl SourcePlugin for FakePlugin {
        fn info(&self) -> &PluginInfo {
            &self.info
        }

        async fn search_novels(&self, query: &str, _page: u32) -> Result<Vec<NovelItem>> {
            self.log
                .lock()
                .unwrap()
                .push((self.info.id.clone(), query.to_string()));
            match &self.search_error {
                Some(message) => Err(FolioError::PluginExecutionError(message.clone())),
                None => Ok(self.novels.clone()),
            }
        }

        async fn parse_novel(&self, path: &str) -> Result<SourceNovel> {
            Ok(serde_json::from_value(json!({
                "path": path,
                "name": format!("{} novel", self.info.name),
                "chapters": [{ "name": "Chapter 1", "path": format!("{}/1", path) }],
            }))?)
        }

        async fn parse_chapter(&self, path: &str) -> Result<String> {
            Ok(format!("<p>{}</p>", path))
        }

        async fn parse_page(&self, path: &str, page: &str) -> Result<SourcePage> {
            if !self.info.has_parse_page {
                return Err(crate::plugin::types::capability_missing(&self.info, "parsePage"));
            }
            Ok(serde_json::from_value(json!({
                "chapters": [{ "name": format!("Page {}", page), "path": format!("{}/p{}", path, page) }],
            }))?)
        }

        async fn resolve_url(&self, path: &str, _is_novel: bool) -> Result<String> {
            if !self.info.has_resolve_url {
                return Err(crate::plugin::types::capability_missing(&self.info, "resolveUrl"));
            }
            Ok(format!("resolved:{}", path))
        }
    }

    /// Evaluator building `FakePlugin`s; sources starting with `throw` fail
    #[derive(Default)]
    pub struct FakeEvaluator {
        names: Mutex<HashMap<String, String>>,
        evaluations: AtomicUsize,
        threads: Mutex<Vec<ThreadId>>,
        log: SearchLog,
    }

    impl FakeEvaluator {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_name(self, id: &str, name: &str) -> Self {
            self.names.lock().unwrap().insert(id.to_string(), name.to_string());
            self
        }

        pub fn evaluations(&self) -> usize {
            self.evaluations.load(Ordering::SeqCst)
        }

        /// Threads each evaluation ran on, in order
        pub fn evaluation_threads(&self) -> Vec<ThreadId> {
            self.threads.lock().unwrap().clone()
        }

        /// Every `(plugin id, query)` searched so far
        pub fn searches(&self) -> Vec<(String, String)> {
            self.log.lock().unwrap().clone()
        }
    }

    impl PluginEvaluator for FakeEvaluator {
        fn evaluate(&self, id: &str, source: &str) -> Option<Arc<dyn SourcePlugin>> {
            self.evaluations.fetch_add(1, Ordering::SeqCst);
            self.threads.lock().unwrap().push(std::thread::current().id());
            if source.starts_with("throw") {
                return None;
            }
            let name = self
                .names
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .unwrap_or_else(|| id.to_string());
            Some(Arc::new(FakePlugin::new(id, &name, source, self.log.clone())))
        }
    }
}
