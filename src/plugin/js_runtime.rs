//! JavaScript Runtime Module
//!
//! `PluginRuntime` owns one `JsRuntime` with the sandbox bindings installed.
//! It evaluates a plugin's source as a CommonJS-style unit and calls the
//! resulting plugin object's methods through `_folio_invoke`.

use anyhow::{anyhow, Context, Result};
use deno_core::{v8, JsRuntime};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};

use super::js_bindings::{completion_string, create_plugin_runtime, reset_call_state, SandboxContext};

/// Shape of the exported plugin object, as reported by the prelude
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginDescriptor {
    pub id: Value,
    pub name: Value,
    pub version: Value,
    pub site: Value,
    pub lang: Value,
    pub icon: Value,
    pub filters: Option<Value>,
    pub image_request_init: Option<Value>,
    /// `typeof` of each contract member
    pub kinds: HashMap<String, String>,
}

impl PluginDescriptor {
    pub fn is_function(&self, member: &str) -> bool {
        self.kinds.get(member).map(String::as_str) == Some("function")
    }
}

/// JavaScript runtime for a single plugin
pub struct PluginRuntime {
    runtime: JsRuntime,
    plugin_id: String,
}

impl PluginRuntime {
    pub fn new(context: SandboxContext) -> Result<Self> {
        debug!(plugin = %context.plugin_id, "Creating JavaScript runtime");
        let plugin_id = context.plugin_id.clone();
        let runtime = create_plugin_runtime(context)?;
        Ok(Self { runtime, plugin_id })
    }

    /// Evaluate `source` with `require`, `module` and `exports` in scope.
    ///
    /// Returns `None` when the unit exports nothing object-like.
    pub fn evaluate(&mut self, source: &str) -> Result<Option<PluginDescriptor>> {
        let value = self
            .runtime
            .execute_script("<plugin_source>", wrap_source(source).into())
            .map_err(|e| JsError::EvaluationError(e.to_string()))?;
        let described = completion_string(&mut self.runtime, value)?;

        let descriptor: Option<PluginDescriptor> = serde_json::from_str(&described)
            .with_context(|| format!("Unreadable plugin descriptor: {}", described))?;
        info!(plugin = %self.plugin_id, exported = descriptor.is_some(), "Plugin source evaluated");
        Ok(descriptor)
    }

    /// Call `method` on the evaluated plugin with positional `args`
    pub async fn call(&mut self, method: &str, args: Value) -> Result<Value> {
        debug!(plugin = %self.plugin_id, method = %method, "Calling plugin method");
        reset_call_state(&mut self.runtime);

        let args_json = serde_json::to_string(&args).context("Failed to serialize function arguments")?;

        // Call _folio_invoke through the V8 API instead of compiling a script per call
        {
            let scope = &mut self.runtime.handle_scope();
            let context = scope.get_current_context();
            let global = context.global(scope);

            let invoke_name = v8::String::new(scope, "_folio_invoke")
                .ok_or_else(|| anyhow!("Failed to allocate V8 string"))?;
            let invoke_val = global
                .get(scope, invoke_name.into())
                .ok_or_else(|| anyhow!("_folio_invoke not found"))?;
            let invoke_func = v8::Local::<v8::Function>::try_from(invoke_val)
                .map_err(|_| anyhow!("_folio_invoke is not a function"))?;

            let method_v8 = v8::String::new(scope, method).ok_or_else(|| anyhow!("Failed to allocate V8 string"))?;
            let args_json_v8 =
                v8::String::new(scope, &args_json).ok_or_else(|| anyhow!("Failed to allocate V8 string"))?;
            let args_val = v8::json::parse(scope, args_json_v8)
                .ok_or_else(|| anyhow!("Failed to parse arguments JSON in V8"))?;

            let recv = v8::undefined(scope).into();
            if invoke_func
                .call(scope, recv, &[method_v8.into(), args_val])
                .is_none()
            {
                return Err(anyhow!("Failed to call _folio_invoke"));
            }
        }

        self.runtime
            .run_event_loop(Default::default())
            .await
            .context("Failed to run event loop")?;

        let outcome = {
            let scope = &mut self.runtime.handle_scope();
            let context = scope.get_current_context();
            let global = context.global(scope);

            let get_global_string = |scope: &mut v8::HandleScope, key: &str| -> Option<String> {
                let key_str = v8::String::new(scope, key)?;
                let val = global.get(scope, key_str.into())?;
                if val.is_undefined() || val.is_null() {
                    return None;
                }
                Some(val.to_string(scope)?.to_rust_string_lossy(scope))
            };

            let status = get_global_string(scope, "_folio_status")
                .ok_or_else(|| anyhow!("Failed to retrieve execution status"))?;
            match status.as_str() {
                "success" => get_global_string(scope, "_folio_result")
                    .ok_or_else(|| anyhow!("Function finished successfully but returned no result")),
                "error" => {
                    let message = get_global_string(scope, "_folio_error").unwrap_or_else(|| "Unknown error".to_string());
                    Err(JsError::FunctionCallError(message).into())
                }
                "pending" => Err(anyhow!("Event loop finished but {} is still pending", method)),
                other => Err(anyhow!("Invalid execution status: {}", other)),
            }
        };

        // _folio_result can hold a large JSON string
        let _ = self.runtime.execute_script(
            "<cleanup>",
            r#"
            globalThis._folio_result = undefined;
            globalThis._folio_error = undefined;
            globalThis._folio_status = undefined;
            "#
            .to_string()
            .into(),
        );

        let result_str = outcome?;
        serde_json::from_str(&result_str).with_context(|| format!("Failed to deserialize function result: {}", result_str))
    }
}

fn wrap_source(source: &str) -> String {
    format!(
        "(() => {{\n\
         const module = {{ exports: {{}} }};\n\
         (function (require, module, exports) {{\n{}\n}}).call(module.exports, globalThis.__folio.require, module, module.exports);\n\
         return globalThis.__folio.describe(module.exports);\n\
         }})()",
        source
    )
}

/// JavaScript plugin error wrapper
#[derive(Debug, thiserror::Error)]
pub enum JsError {
    #[error("JavaScript evaluation error: {0}")]
    EvaluationError(String),

    #[error("JavaScript function call error: {0}")]
    FunctionCallError(String),
}
