use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::thread;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use super::js_bindings::SandboxContext;
use super::js_runtime::PluginRuntime;
use super::sandbox::validate_descriptor;
use super::types::{
    capability_missing, NovelItem, PluginInfo, PopularOptions, SourceNovel, SourcePage, SourcePlugin,
};
use crate::core::error::{FolioError, Result};

/// Command sent to the JS worker thread
enum JsCommand {
    CallFunction {
        name: &'static str,
        args: Value,
        resp: oneshot::Sender<Result<Value>>,
    },
}

/// Send + Sync handle to a plugin evaluated on its own worker thread.
///
/// V8 isolates are single-threaded, so the `PluginRuntime` lives on a
/// dedicated thread running a current-thread Tokio runtime and every call is
/// a message over a channel. Dropping the handle closes the channel and the
/// worker exits.
pub struct JsSourcePlugin {
    info: PluginInfo,
    tx: mpsc::Sender<JsCommand>,
}

impl JsSourcePlugin {
    /// Spawn the worker, evaluate `source` and validate the exported plugin.
    ///
    /// Blocks until evaluation finishes; call from a blocking context.
    pub fn spawn(source: String, context: SandboxContext) -> Result<Self> {
        let plugin_id = context.plugin_id.clone();
        let (tx, mut rx) = mpsc::channel::<JsCommand>(32);
        let (load_tx, load_rx) = std::sync::mpsc::sync_channel::<Result<PluginInfo>>(1);

        let worker_id = plugin_id.clone();
        thread::Builder::new()
            .name(format!("js-plugin-{}", plugin_id))
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = load_tx.send(Err(FolioError::PluginLoadError(format!(
                            "Failed to create Tokio runtime: {}",
                            e
                        ))));
                        return;
                    }
                };

                let local = tokio::task::LocalSet::new();
                local.block_on(&rt, async move {
                    let mut runtime = match load(&source, context) {
                        Ok((runtime, info)) => {
                            let _ = load_tx.send(Ok(info));
                            runtime
                        }
                        Err(e) => {
                            let _ = load_tx.send(Err(e));
                            return;
                        }
                    };

                    debug!(plugin = %worker_id, "JS worker ready");

                    while let Some(cmd) = rx.recv().await {
                        match cmd {
                            JsCommand::CallFunction { name, args, resp } => {
                                let result = runtime
                                    .call(name, args)
                                    .await
                                    .map_err(|e| FolioError::PluginExecutionError(format!("{}: {}", name, e)));
                                let _ = resp.send(result);
                            }
                        }
                    }

                    debug!(plugin = %worker_id, "JS worker exiting");
                });
            })
            .map_err(|e| FolioError::PluginLoadError(format!("Failed to spawn thread: {}", e)))?;

        let info = load_rx.recv().map_err(|_| {
            error!(plugin = %plugin_id, "JS worker exited during evaluation");
            FolioError::PluginLoadError(format!("Worker for {} exited during evaluation", plugin_id))
        })??;

        info!(plugin = %info.id, version = %info.version, "Plugin loaded");
        Ok(Self { info, tx })
    }

    async fn call_function(&self, name: &'static str, args: Value) -> Result<Value> {
        let (resp_tx, resp_rx) = oneshot::channel();

        self.tx
            .send(JsCommand::CallFunction {
                name,
                args,
                resp: resp_tx,
            })
            .await
            .map_err(|e| FolioError::PluginExecutionError(format!("Failed to send call command: {}", e)))?;

        match resp_rx.await {
            Ok(res) => res,
            Err(_) => Err(FolioError::PluginExecutionError("Channel closed".to_string())),
        }
    }

    async fn call_as<T: DeserializeOwned>(&self, name: &'static str, args: Value) -> Result<T> {
        let value = self.call_function(name, args).await?;
        serde_json::from_value(value).map_err(|e| {
            FolioError::DeserializationError(format!("{} of {} returned unexpected data: {}", name, self.info.id, e))
        })
    }
}

fn load(source: &str, context: SandboxContext) -> Result<(PluginRuntime, PluginInfo)> {
    let plugin_id = context.plugin_id.clone();
    let user_agent = context.user_agent.clone();

    let mut runtime = PluginRuntime::new(context)
        .map_err(|e| FolioError::PluginLoadError(format!("Failed to create runtime: {}", e)))?;
    let descriptor = runtime
        .evaluate(source)
        .map_err(|e| FolioError::PluginLoadError(e.to_string()))?
        .ok_or_else(|| FolioError::PluginLoadError("Source does not export a plugin object".to_string()))?;

    let info = validate_descriptor(&plugin_id, descriptor, &user_agent)?;
    Ok((runtime, info))
}

#[async_trait]
impl SourcePlugin for JsSourcePlugin {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    async fn search_novels(&self, query: &str, page: u32) -> Result<Vec<NovelItem>> {
        self.call_as("searchNovels", json!([query, page])).await
    }

    async fn parse_novel(&self, path: &str) -> Result<SourceNovel> {
        self.call_as("parseNovel", json!([path])).await
    }

    async fn parse_chapter(&self, path: &str) -> Result<String> {
        self.call_as("parseChapter", json!([path])).await
    }

    async fn parse_page(&self, path: &str, page: &str) -> Result<SourcePage> {
        if !self.info.has_parse_page {
            return Err(capability_missing(&self.info, "parsePage"));
        }
        self.call_as("parsePage", json!([path, page])).await
    }

    async fn resolve_url(&self, path: &str, is_novel: bool) -> Result<String> {
        if !self.info.has_resolve_url {
            return Err(capability_missing(&self.info, "resolveUrl"));
        }
        self.call_as("resolveUrl", json!([path, is_novel])).await
    }

    async fn popular_novels(&self, page: u32, options: &PopularOptions) -> Result<Vec<NovelItem>> {
        if !self.info.has_popular_novels {
            return Err(capability_missing(&self.info, "popularNovels"));
        }
        self.call_as("popularNovels", json!([page, options])).await
    }
}
