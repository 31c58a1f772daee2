//! Multi-source search
//!
//! Fans one query out to every installed plugin under a concurrency budget
//! and publishes progressively sorted results on a `watch` channel.
//!
//! A search is identified by its query text. Issuing a different query makes
//! the previous one stale: its remaining plugins are never started, and
//! responses already in flight are dropped instead of applied. Partial
//! results that were applied before the switch stay in place until the new
//! query's snapshot replaces them.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

use super::store::PluginStore;
use super::types::{NovelItem, PluginId};
use crate::core::config::SearchConfig;
use crate::core::error::{ErrorReport, FolioError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SearchPhase {
    #[default]
    Idle,
    FanningOut,
    Complete,
}

/// Results of one plugin for the current query
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceResult {
    pub plugin_id: PluginId,
    pub plugin_name: String,
    pub is_loading: bool,
    pub novels: Vec<NovelItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

impl SourceResult {
    fn pending(source: &SearchSource) -> Self {
        Self {
            plugin_id: source.id.clone(),
            plugin_name: source.name.clone(),
            is_loading: true,
            novels: Vec::new(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SearchSnapshot {
    pub query: String,
    pub phase: SearchPhase,
    pub results: Vec<SourceResult>,
    /// Settled fraction of plugins, 0.0 to 1.0
    pub progress: f64,
}

/// A plugin to search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSource {
    pub id: PluginId,
    pub name: String,
}

/// Foreground flag polled by searches before starting each plugin
pub struct FocusGate {
    focused: AtomicBool,
    poll_interval: Duration,
}

impl FocusGate {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            focused: AtomicBool::new(true),
            poll_interval,
        }
    }

    pub fn set_focused(&self, focused: bool) {
        self.focused.store(focused, Ordering::SeqCst);
    }

    pub fn is_focused(&self) -> bool {
        self.focused.load(Ordering::SeqCst)
    }

    /// Returns once focused
    pub async fn wait(&self) {
        while !self.is_focused() {
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Sources with novels first, then by name
fn sort_results(results: &mut [SourceResult]) {
    results.sort_by(|a, b| {
        a.novels
            .is_empty()
            .cmp(&b.novels.is_empty())
            .then_with(|| a.plugin_name.cmp(&b.plugin_name))
    });
}

/// The most recent query and the search generation it started
#[derive(Default)]
struct LatestQuery {
    query: String,
    generation: u64,
}

pub struct SearchOrchestrator {
    store: Arc<PluginStore>,
    concurrency: usize,
    focus: FocusGate,
    latest: Mutex<LatestQuery>,
    state: watch::Sender<SearchSnapshot>,
}

impl SearchOrchestrator {
    pub fn new(store: Arc<PluginStore>, config: &SearchConfig) -> Self {
        let (state, _) = watch::channel(SearchSnapshot::default());
        Self {
            store,
            concurrency: config.concurrency.max(1),
            focus: FocusGate::new(config.focus_poll_interval()),
            latest: Mutex::new(LatestQuery::default()),
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SearchSnapshot {
        self.state.borrow().clone()
    }

    pub fn set_focused(&self, focused: bool) {
        debug!(focused, "Search focus changed");
        self.focus.set_focused(focused);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.latest.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).generation == generation
    }

    /// Every installed plugin that loads, as a search source
    pub async fn installed_sources(&self) -> Vec<SearchSource> {
        let ids = self.store.installed_ids().await.unwrap_or_default();
        let mut sources = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(plugin) = self.store.load_async(&id).await {
                sources.push(SearchSource {
                    id,
                    name: plugin.info().name.clone(),
                });
            }
        }
        sources
    }

    /// Search `sources` for `query` and return once dispatch for it ends.
    ///
    /// An empty query resets to idle. Repeating the latest query does nothing.
    pub async fn search(&self, query: &str, mut sources: Vec<SearchSource>) {
        let generation = {
            let mut latest = self.latest.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if latest.query == query {
                return;
            }
            latest.query = query.to_string();
            latest.generation += 1;
            latest.generation
        };

        if query.is_empty() {
            self.state.send_replace(SearchSnapshot::default());
            return;
        }

        sources.sort_by(|a, b| a.name.cmp(&b.name));
        let total = sources.len();
        info!(query = %query, sources = total, concurrency = self.concurrency, "Search started");

        self.state.send_replace(SearchSnapshot {
            query: query.to_string(),
            phase: if total == 0 { SearchPhase::Complete } else { SearchPhase::FanningOut },
            results: sources.iter().map(SourceResult::pending).collect(),
            progress: 0.0,
        });

        stream::iter(sources)
            .map(|source| self.search_source(query, generation, source, total))
            .buffer_unordered(self.concurrency)
            .collect::<Vec<()>>()
            .await;

        let completed = self.state.send_if_modified(|snapshot| {
            if !self.is_current(generation) || snapshot.phase == SearchPhase::Complete {
                return false;
            }
            snapshot.phase = SearchPhase::Complete;
            true
        });
        if completed {
            info!(query = %query, "Search complete");
        }
    }

    async fn search_source(&self, query: &str, generation: u64, source: SearchSource, total: usize) {
        self.focus.wait().await;
        if !self.is_current(generation) {
            debug!(query = %query, plugin = %source.id, "Skipping stale search");
            return;
        }

        let outcome = match self.store.load_async(&source.id).await {
            Some(plugin) => plugin.search_novels(query, 1).await,
            None => Err(FolioError::UnknownPlugin(source.id.clone())),
        };

        let settled = match outcome {
            Ok(novels) => SourceResult {
                is_loading: false,
                novels,
                ..SourceResult::pending(&source)
            },
            Err(e) => {
                debug!(plugin = %source.id, "Search failed: {}", e);
                SourceResult {
                    is_loading: false,
                    error: Some(ErrorReport::from_error(&e)),
                    ..SourceResult::pending(&source)
                }
            }
        };

        let applied = self.state.send_if_modified(|snapshot| {
            if !self.is_current(generation) {
                return false;
            }
            let Some(entry) = snapshot.results.iter_mut().find(|r| r.plugin_id == settled.plugin_id) else {
                return false;
            };
            *entry = settled;
            snapshot.progress = (snapshot.progress + 1.0 / total as f64).min(1.0);
            sort_results(&mut snapshot.results);
            true
        });
        if !applied {
            debug!(query = %query, plugin = %source.id, "Dropping stale search result");
        }
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
        evaluator: Arc<FakeEvaluator>,
        orchestrator: Arc<SearchOrchestrator>,
    }

    /// Orchestrator over `(id, name, source)` plugins stored on disk
    fn fixture(plugins: &[(&str, &str, &str)], concurrency: usize) -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("plugins");
        let mut evaluator = FakeEvaluator::new();
        for (id, name, source) in plugins {
            std::fs::create_dir_all(root.join(id)).unwrap();
            std::fs::write(root.join(id).join("index.js"), source).unwrap();
            evaluator = evaluator.with_name(id, name);
        }
        let evaluator = Arc::new(evaluator);
        let store = Arc::new(PluginStore::new(
            evaluator.clone(),
            Arc::new(FsPluginStorage::new(&root)),
            PluginStorages::in_memory(),
            Arc::new(FakeHttp::new()),
        ));
        let config = SearchConfig {
            concurrency,
            focus_poll_interval_ms: 5,
        };
        Fixture {
            _dir: dir,
            evaluator,
            orchestrator: Arc::new(SearchOrchestrator::new(store, &config)),
        }
    }

    fn names(snapshot: &SearchSnapshot) -> Vec<&str> {
        snapshot.results.iter().map(|r| r.plugin_name.as_str()).collect()
    }

    async fn wait_for_query(rx: &mut watch::Receiver<SearchSnapshot>, query: &str) {
        while rx.borrow_and_update().query != query {
            rx.changed().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_results_sorted_by_content_then_name() {
        let f = fixture(
            &[
                ("c", "Charlie", "1.0.0;search-error=site down"),
                ("a", "Alpha", "1.0.0;search=First,Second"),
                ("b", "Bravo", "1.0.0"),
            ],
            3,
        );
        let sources = f.orchestrator.installed_sources().await;
        f.orchestrator.search("dune", sources).await;

        let snapshot = f.orchestrator.snapshot();
        assert_eq!(snapshot.phase, SearchPhase::Complete);
        assert_eq!(names(&snapshot), vec!["Alpha", "Bravo", "Charlie"]);
        assert_eq!(snapshot.results[0].novels.len(), 2);
        assert!(snapshot.results[1].novels.is_empty());
        assert!(snapshot.results[1].error.is_none());
        assert!(snapshot.results[2].error.is_some());
        assert!(snapshot.results.iter().all(|r| !r.is_loading));
        assert!((snapshot.progress - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_results_with_novels_outrank_names() {
        let f = fixture(
            &[("a", "Alpha", "1.0.0"), ("z", "Zulu", "1.0.0;search=Only")],
            1,
        );
        let sources = f.orchestrator.installed_sources().await;
        f.orchestrator.search("x", sources).await;
        assert_eq!(names(&f.orchestrator.snapshot()), vec!["Zulu", "Alpha"]);
    }

    #[tokio::test]
    async fn test_sequential_dispatch_in_name_order() {
        let f = fixture(
            &[
                ("c", "Charlie", "1.0.0"),
                ("a", "Alpha", "1.0.0"),
                ("b", "Bravo", "1.0.0"),
            ],
            1,
        );
        let sources = f.orchestrator.installed_sources().await;
        f.orchestrator.search("q", sources).await;

        let order: Vec<String> = f.evaluator.searches().into_iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_superseded_query_never_populates() {
        let f = fixture(
            &[("a", "Alpha", "1.0.0;search=One"), ("b", "Bravo", "1.0.0;search=Two")],
            2,
        );
        let sources = f.orchestrator.installed_sources().await;
        let mut rx = f.orchestrator.subscribe();
        f.orchestrator.set_focused(false);

        let first = {
            let orchestrator = f.orchestrator.clone();
            let sources = sources.clone();
            tokio::spawn(async move { orchestrator.search("foo", sources).await })
        };
        wait_for_query(&mut rx, "foo").await;

        let second = {
            let orchestrator = f.orchestrator.clone();
            tokio::spawn(async move { orchestrator.search("bar", sources).await })
        };
        wait_for_query(&mut rx, "bar").await;

        f.orchestrator.set_focused(true);
        first.await.unwrap();
        second.await.unwrap();

        let searches = f.evaluator.searches();
        assert_eq!(searches.len(), 2);
        assert!(searches.iter().all(|(_, query)| query == "bar"));

        let snapshot = f.orchestrator.snapshot();
        assert_eq!(snapshot.query, "bar");
        assert_eq!(snapshot.phase, SearchPhase::Complete);
        assert_eq!(names(&snapshot), vec!["Alpha", "Bravo"]);
    }

    #[tokio::test]
    async fn test_returning_to_earlier_query_drops_its_old_tasks() {
        let f = fixture(
            &[("a", "Alpha", "1.0.0;search=One"), ("b", "Bravo", "1.0.0;search=Two")],
            2,
        );
        let sources = f.orchestrator.installed_sources().await;
        let mut rx = f.orchestrator.subscribe();
        f.orchestrator.set_focused(false);

        let mut tasks = Vec::new();
        for query in ["foo", "bar", "foo"] {
            let orchestrator = f.orchestrator.clone();
            let sources = sources.clone();
            tasks.push(tokio::spawn(async move { orchestrator.search(query, sources).await }));
            wait_for_query(&mut rx, query).await;
        }

        f.orchestrator.set_focused(true);
        for task in tasks {
            task.await.unwrap();
        }

        let searches = f.evaluator.searches();
        assert_eq!(searches.len(), 2);
        assert!(searches.iter().all(|(_, query)| query == "foo"));

        let snapshot = f.orchestrator.snapshot();
        assert_eq!(snapshot.query, "foo");
        assert_eq!(snapshot.phase, SearchPhase::Complete);
        assert_eq!(snapshot.progress, 1.0);
        assert!(snapshot.results.iter().all(|r| r.novels.len() == 1));
    }

    #[tokio::test]
    async fn test_cold_sources_load_off_the_runtime_thread() {
        let f = fixture(&[("a", "Alpha", "1.0.0;search=One")], 1);
        let sources = vec![SearchSource {
            id: "a".into(),
            name: "Alpha".into(),
        }];
        f.orchestrator.search("dune", sources).await;

        assert_eq!(f.orchestrator.snapshot().results[0].novels.len(), 1);
        let threads = f.evaluator.evaluation_threads();
        assert_eq!(threads.len(), 1);
        assert_ne!(threads[0], std::thread::current().id());
    }

    #[tokio::test]
    async fn test_empty_and_repeated_queries() {
        let f = fixture(&[("a", "Alpha", "1.0.0;search=One")], 1);
        let sources = f.orchestrator.installed_sources().await;

        f.orchestrator.search("dune", sources.clone()).await;
        f.orchestrator.search("dune", sources.clone()).await;
        assert_eq!(f.evaluator.searches().len(), 1);

        f.orchestrator.search("", sources).await;
        assert_eq!(f.orchestrator.snapshot(), SearchSnapshot::default());
    }

    #[tokio::test]
    async fn test_unloadable_source_reports_error() {
        let f = fixture(&[("a", "Alpha", "1.0.0")], 1);
        let sources = vec![SearchSource {
            id: "ghost".into(),
            name: "Ghost".into(),
        }];
        f.orchestrator.search("dune", sources).await;

        let snapshot = f.orchestrator.snapshot();
        let error = snapshot.results[0].error.as_ref().unwrap();
        assert_eq!(error.error, "UnknownPlugin");
    }

    #[test]
    fn test_focus_gate_defaults_to_focused() {
        let gate = FocusGate::new(Duration::from_millis(100));
        assert!(gate.is_focused());
        gate.set_focused(false);
        assert!(!gate.is_focused());
    }
}
