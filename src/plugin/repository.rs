//! Repository resolver
//!
//! Fetches every configured repository manifest concurrently and merges the
//! advertised plugins into one list. Manifests come in three shapes (a bare
//! list, `{ "plugins": [...] }` or `{ "data": [...] }`); any other body is a
//! per-repository warning, never a failure of the whole fetch.

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::http::HttpFetch;
use super::types::{PluginManifestEntry, Repository};
use crate::core::error::{ErrorReport, FolioError, Result};

/// A repository that could not be read, identified by its configured position
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepositoryWarning {
    pub index: usize,
    pub url: String,
    pub report: ErrorReport,
}

/// Result of resolving all repositories
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AvailablePlugins {
    pub plugins: Vec<PluginManifestEntry>,
    pub warnings: Vec<RepositoryWarning>,
}

pub struct RepositoryResolver {
    http: Arc<dyn HttpFetch>,
}

impl RepositoryResolver {
    pub fn new(http: Arc<dyn HttpFetch>) -> Self {
        Self { http }
    }

    /// Fetch and merge the manifests of `repositories`.
    ///
    /// Later repositories shadow earlier ones on id collisions.
    pub async fn fetch_available_plugins(&self, repositories: &[Repository]) -> AvailablePlugins {
        if repositories.is_empty() {
            return AvailablePlugins::default();
        }

        let fetches = repositories
            .iter()
            .map(|repository| self.fetch_repository(repository));
        let results = join_all(fetches).await;

        let mut entries = Vec::new();
        let mut warnings = Vec::new();
        for (index, (repository, result)) in repositories.iter().zip(results).enumerate() {
            match result {
                Ok(list) => {
                    debug!(repository = index, count = list.len(), "Repository resolved");
                    entries.extend(list);
                }
                Err(e) => {
                    warn!(repository = index, url = %repository.url, "Repository failed: {}", e);
                    warnings.push(RepositoryWarning {
                        index,
                        url: repository.url.clone(),
                        report: ErrorReport::from_error(&e),
                    });
                }
            }
        }

        let plugins = merge_entries(entries);
        info!(
            plugins = plugins.len(),
            failed_repositories = warnings.len(),
            "Available plugins resolved"
        );

        AvailablePlugins { plugins, warnings }
    }

    async fn fetch_repository(&self, repository: &Repository) -> Result<Vec<PluginManifestEntry>> {
        let body = self.http.fetch_text(&repository.url).await?;
        parse_manifest(&body)
    }
}

/// Normalize one manifest body into a list of entries
pub fn parse_manifest(body: &str) -> Result<Vec<PluginManifestEntry>> {
    if looks_like_html(body) {
        return Err(FolioError::RepositoryError(
            "server returned an error page, not a manifest".to_string(),
        ));
    }

    let value: Value = serde_json::from_str(body)
        .map_err(|e| FolioError::InvalidRepositoryFormat(format!("malformed JSON: {}", e)))?;

    let list = match value {
        Value::Array(items) => items,
        Value::Object(mut object) => match (object.remove("plugins"), object.remove("data")) {
            (Some(Value::Array(items)), _) => items,
            (_, Some(Value::Array(items))) => items,
            _ => {
                return Err(FolioError::InvalidRepositoryFormat(
                    "expected a list, or an object with a plugins or data list".to_string(),
                ))
            }
        },
        _ => {
            return Err(FolioError::InvalidRepositoryFormat(
                "expected a list, or an object with a plugins or data list".to_string(),
            ))
        }
    };

    list.into_iter()
        .map(|item| {
            serde_json::from_value(item)
                .map_err(|e| FolioError::InvalidRepositoryFormat(format!("bad plugin entry: {}", e)))
        })
        .collect()
}

/// Reverse the concatenated lists, then keep the first entry seen per id
pub fn merge_entries(mut entries: Vec<PluginManifestEntry>) -> Vec<PluginManifestEntry> {
    entries.reverse();
    let mut seen = HashSet::new();
    entries.retain(|entry| seen.insert(entry.id.clone()));
    entries
}

fn looks_like_html(body: &str) -> bool {
    let head: String = body
        .trim_start()
        .chars()
        .take(16)
        .collect::<String>()
        .to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::http::testing::FakeHttp;
    use proptest::prelude::*;
    use serde_json::json;

    fn entry(id: &str, version: &str) -> PluginManifestEntry {
        PluginManifestEntry {
            id: id.to_string(),
            name: id.to_uppercase(),
            version: version.to_string(),
            url: format!("https://example.com/{}.js", id),
            custom_js: None,
            custom_css: None,
            icon_url: None,
            site: None,
            lang: None,
        }
    }

    fn repo(id: i64, url: &str) -> Repository {
        Repository {
            id,
            url: url.to_string(),
        }
    }

    #[test]
    fn test_manifest_shapes_normalize_identically() {
        let entries = json!([
            { "id": "a", "name": "A", "version": "1.0.0", "url": "https://x/a.js" },
            { "id": "b", "name": "B", "version": "2.1", "url": "https://x/b.js", "customCSS": "https://x/b.css" }
        ]);
        let list = parse_manifest(&entries.to_string()).unwrap();
        let plugins = parse_manifest(&json!({ "plugins": entries }).to_string()).unwrap();
        let data = parse_manifest(&json!({ "data": entries }).to_string()).unwrap();

        assert_eq!(list.len(), 2);
        assert_eq!(list, plugins);
        assert_eq!(list, data);
    }

    #[test]
    fn test_html_body_is_repository_error() {
        let err = parse_manifest("  <!DOCTYPE html><html><body>502</body></html>").unwrap_err();
        assert!(matches!(err, FolioError::RepositoryError(_)));
        assert!(err.to_string().contains("error page"));

        let err = parse_manifest("<HTML><head></head></HTML>").unwrap_err();
        assert!(matches!(err, FolioError::RepositoryError(_)));
    }

    #[test]
    fn test_unrecognized_shapes_are_invalid_format() {
        for body in [r#"{"items": []}"#, r#"{"plugins": {}}"#, "42", "\"text\"", "{not json"] {
            let err = parse_manifest(body).unwrap_err();
            assert!(
                matches!(err, FolioError::InvalidRepositoryFormat(_)),
                "{} gave {:?}",
                body,
                err
            );
        }
    }

    #[test]
    fn test_merge_reverses_then_keeps_first_per_id() {
        let merged = merge_entries(vec![
            entry("x", "1.0.0"),
            entry("y", "1.0.0"),
            entry("x", "2.0.0"),
            entry("z", "1.0.0"),
        ]);
        let ids: Vec<_> = merged.iter().map(|e| (e.id.as_str(), e.version.as_str())).collect();
        assert_eq!(ids, vec![("z", "1.0.0"), ("x", "2.0.0"), ("y", "1.0.0")]);
    }

    #[tokio::test]
    async fn test_later_repository_wins() {
        let http = Arc::new(FakeHttp::new());
        http.serve(
            "https://a.example/index.json",
            &json!([{ "id": "x", "name": "X", "version": "1.0.0", "url": "https://a/x.js" }]).to_string(),
        );
        http.serve(
            "https://b.example/index.json",
            &json!({ "plugins": [{ "id": "x", "name": "X", "version": "0.9.0", "url": "https://b/x.js" }] })
                .to_string(),
        );

        let resolver = RepositoryResolver::new(http);
        let available = resolver
            .fetch_available_plugins(&[
                repo(1, "https://a.example/index.json"),
                repo(2, "https://b.example/index.json"),
            ])
            .await;

        assert!(available.warnings.is_empty());
        assert_eq!(available.plugins.len(), 1);
        assert_eq!(available.plugins[0].version, "0.9.0");
        assert_eq!(available.plugins[0].url, "https://b/x.js");
    }

    #[tokio::test]
    async fn test_failed_repository_does_not_abort_others() {
        let http = Arc::new(FakeHttp::new());
        http.fail("https://down.example/index.json", "connection refused");
        http.serve("https://html.example/index.json", "<!doctype html><p>Bad gateway</p>");
        http.serve(
            "https://ok.example/index.json",
            &json!({ "data": [{ "id": "ok", "name": "Ok", "version": "1.0.0", "url": "https://ok/ok.js" }] })
                .to_string(),
        );

        let resolver = RepositoryResolver::new(http);
        let available = resolver
            .fetch_available_plugins(&[
                repo(1, "https://down.example/index.json"),
                repo(2, "https://ok.example/index.json"),
                repo(3, "https://html.example/index.json"),
            ])
            .await;

        assert_eq!(available.plugins.len(), 1);
        assert_eq!(available.plugins[0].id, "ok");
        let indices: Vec<_> = available.warnings.iter().map(|w| w.index).collect();
        assert_eq!(indices, vec![0, 2]);
        assert_eq!(available.warnings[0].report.error, "NetworkError");
        assert_eq!(available.warnings[1].report.error, "RepositoryError");
    }

    #[tokio::test]
    async fn test_no_repositories_means_no_requests() {
        let http = Arc::new(FakeHttp::new());
        let resolver = RepositoryResolver::new(http.clone());
        let available = resolver.fetch_available_plugins(&[]).await;

        assert_eq!(available, AvailablePlugins::default());
        assert_eq!(http.request_count(), 0);
    }

    proptest! {
        #[test]
        fn prop_shapes_agree(ids in proptest::collection::vec("[a-z]{1,8}", 0..8)) {
            let entries: Vec<Value> = ids
                .iter()
                .map(|id| json!({ "id": id, "name": id, "version": "1.0.0", "url": format!("https://x/{}.js", id) }))
                .collect();
            let list = parse_manifest(&Value::Array(entries.clone()).to_string()).unwrap();
            let plugins = parse_manifest(&json!({ "plugins": entries.clone() }).to_string()).unwrap();
            let data = parse_manifest(&json!({ "data": entries }).to_string()).unwrap();
            prop_assert_eq!(&list, &plugins);
            prop_assert_eq!(&list, &data);
        }

        #[test]
        fn prop_merge_keeps_one_entry_per_id(ids in proptest::collection::vec("[a-c]", 0..12)) {
            let entries: Vec<_> = ids.iter().enumerate()
                .map(|(i, id)| entry(id, &format!("{}.0.0", i)))
                .collect();
            let merged = merge_entries(entries);
            let unique: HashSet<_> = ids.iter().collect();
            prop_assert_eq!(merged.len(), unique.len());
            // the surviving entry for each id is its last occurrence
            for e in &merged {
                let last = ids.iter().rposition(|id| *id == e.id).unwrap();
                prop_assert_eq!(&e.version, &format!("{}.0.0", last));
            }
        }
    }
}
