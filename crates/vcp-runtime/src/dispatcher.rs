//! The tool dispatcher: one entry point for every tool invocation.
//!
//! `process_tool_call` resolves the target name in the store and routes it:
//! stdio types go through the executor, distributed tools through the
//! [`ToolRouter`], service types through an in-process function call. The
//! returned value is always a JSON object carrying a local ISO-8601
//! timestamp (and the caller's `maid` label when supplied); string results
//! from stdio plugins are best-effort JSON-parsed with an
//! `original_plugin_output` fallback wrapper.
//!
//! # File fallback
//!
//! When a plugin fails with the `FILE_NOT_FOUND_LOCALLY` sentinel, the
//! dispatcher retries exactly once: it fetches the file's bytes over the
//! distributed channel of the session matching the request origin, replaces
//! the failed parameter with a base64 data URI, and re-invokes. The retry
//! is never retried; a fetch failure surfaces both the original plugin
//! error and the fetch error.

use std::sync::Arc;

use chrono::{Local, SecondsFormat};
use parking_lot::RwLock;
use serde_json::{Value, json};
use tracing::{info, warn};

use vcp_core::bridge::ToolRouter;
use vcp_core::manifest::{PluginManifest, PluginType};
use vcp_core::protocol::{FileFallback, PluginOutput};
use vcp_executor::StdioExecutor;

use crate::error::{DispatchError, DispatchResult};
use crate::service::ServiceRegistry;
use crate::store::PluginStore;

/// Routes tool calls to the executor, the bridge, or in-process services.
pub struct ToolDispatcher {
    store: Arc<PluginStore>,
    executor: Arc<StdioExecutor>,
    services: Arc<ServiceRegistry>,
    /// Set after construction, once the bridge exists.
    router: RwLock<Option<Arc<dyn ToolRouter>>>,
}

impl ToolDispatcher {
    pub fn new(
        store: Arc<PluginStore>,
        executor: Arc<StdioExecutor>,
        services: Arc<ServiceRegistry>,
    ) -> Self {
        Self {
            store,
            executor,
            services,
            router: RwLock::new(None),
        }
    }

    /// Wires in the distributed router (the bridge half of the contract).
    pub fn set_router(&self, router: Arc<dyn ToolRouter>) {
        *self.router.write() = Some(router);
    }

    fn router(&self) -> Option<Arc<dyn ToolRouter>> {
        self.router.read().clone()
    }

    /// Executes the tool `tool_name` with `args`.
    ///
    /// `request_origin` is the caller's network origin; it feeds the
    /// plugin's environment and selects the session for the file fallback.
    pub async fn process_tool_call(
        &self,
        tool_name: &str,
        args: Value,
        request_origin: Option<&str>,
    ) -> DispatchResult<Value> {
        let manifest = self
            .store
            .resolve(tool_name)
            .ok_or_else(|| DispatchError::UnknownTool {
                name: tool_name.to_string(),
            })?;
        let maid = args
            .get("maid")
            .and_then(Value::as_str)
            .map(str::to_string);

        let raw = if manifest.is_distributed {
            self.execute_distributed(&manifest, args).await?
        } else {
            match manifest.plugin_type {
                PluginType::Synchronous | PluginType::Asynchronous => {
                    self.execute_stdio(&manifest, args, request_origin).await?
                }
                PluginType::Service | PluginType::HybridService => {
                    self.execute_service(&manifest, args).await?
                }
                PluginType::Static | PluginType::MessagePreprocessor => {
                    return Err(DispatchError::NotInvocable {
                        name: tool_name.to_string(),
                    });
                }
            }
        };

        Ok(finalize(raw, maid))
    }

    // ─── Routing targets ─────────────────────────────────────────────────────

    async fn execute_distributed(
        &self,
        manifest: &PluginManifest,
        args: Value,
    ) -> DispatchResult<Value> {
        let server_id = manifest
            .server_id
            .as_deref()
            .ok_or_else(|| DispatchError::NotInvocable {
                name: manifest.name.clone(),
            })?;
        let router = self.router().ok_or_else(|| {
            DispatchError::Bridge(vcp_core::error::BridgeError::SendFailed(
                "no distributed router configured".into(),
            ))
        })?;
        let payload = router
            .execute_remote(server_id, &manifest.name, args, manifest.timeout())
            .await?;
        Ok(payload)
    }

    async fn execute_service(
        &self,
        manifest: &PluginManifest,
        args: Value,
    ) -> DispatchResult<Value> {
        let script = manifest
            .entry_point
            .as_ref()
            .and_then(|ep| ep.script.as_deref())
            .unwrap_or(&manifest.name);
        let service = self
            .services
            .resolve(script)
            .ok_or_else(|| DispatchError::NotInvocable {
                name: manifest.name.clone(),
            })?;
        let config = manifest.effective_config_json();
        service
            .process_tool_call(args, &config)
            .await
            .map_err(|e| DispatchError::PluginReported {
                name: manifest.name.clone(),
                payload: json!({ "status": "error", "error": e.to_string() }),
            })
    }

    async fn execute_stdio(
        &self,
        manifest: &Arc<PluginManifest>,
        args: Value,
        request_origin: Option<&str>,
    ) -> DispatchResult<Value> {
        let output = self.executor.execute(manifest, &args, request_origin).await?;
        match output {
            PluginOutput::Success { result, .. } => Ok(result),
            error_output => {
                if let Some(fallback) = error_output.file_fallback()
                    && let Some(router) = self.router()
                    && let Some(origin) = request_origin
                {
                    return self
                        .retry_with_file(manifest, args, origin, error_output, fallback, router)
                        .await;
                }
                Err(DispatchError::PluginReported {
                    name: manifest.name.clone(),
                    payload: error_output.to_value(),
                })
            }
        }
    }

    /// The one-shot `FILE_NOT_FOUND_LOCALLY` retry.
    async fn retry_with_file(
        &self,
        manifest: &Arc<PluginManifest>,
        mut args: Value,
        origin: &str,
        original: PluginOutput,
        fallback: FileFallback,
        router: Arc<dyn ToolRouter>,
    ) -> DispatchResult<Value> {
        info!(
            plugin = %manifest.name,
            file_url = %fallback.file_url,
            parameter = %fallback.failed_parameter,
            "File not found locally — fetching over the distributed channel and retrying once"
        );

        let data = match router.fetch_file(origin, &fallback.file_url).await {
            Ok(data) => data,
            Err(e) => {
                warn!(plugin = %manifest.name, error = %e, "File fetch failed — surfacing both errors");
                return Err(DispatchError::FileFallbackFailed {
                    name: manifest.name.clone(),
                    original: original.to_value(),
                    fetch: e.to_string(),
                });
            }
        };

        if let Some(object) = args.as_object_mut() {
            object.remove(&fallback.failed_parameter);
            object.insert(
                base64_key(&fallback.failed_parameter),
                Value::String(data_uri(&fallback.file_url, &data)),
            );
        }

        let retry = self.executor.execute(manifest, &args, Some(origin)).await?;
        match retry {
            PluginOutput::Success { result, .. } => Ok(result),
            // One attempt only: a second failure surfaces as-is.
            other => Err(DispatchError::PluginReported {
                name: manifest.name.clone(),
                payload: other.to_value(),
            }),
        }
    }
}

// =============================================================================
// Result normalization
// =============================================================================

/// Normalizes a raw result into the returned JSON object and stamps it.
fn finalize(raw: Value, maid: Option<String>) -> Value {
    let mut object = match raw {
        Value::Object(map) => Value::Object(map),
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(parsed) if parsed.is_object() => parsed,
            Ok(parsed) => json!({ "result": parsed }),
            Err(_) => json!({ "original_plugin_output": text }),
        },
        other => json!({ "result": other }),
    };
    object["timestamp"] = Value::String(Local::now().to_rfc3339_opts(SecondsFormat::Secs, false));
    if let Some(maid) = maid {
        object["maid"] = Value::String(maid);
    }
    object
}

/// Derives the data-URI parameter name from the failed one
/// (`image_url_1` → `image_base64_1`).
fn base64_key(param: &str) -> String {
    match param.rfind("url") {
        Some(i) => format!("{}base64{}", &param[..i], &param[i + 3..]),
        None => format!("{param}_base64"),
    }
}

/// Builds a data URI for the fetched bytes, guessing the MIME type from the
/// URL's extension.
fn data_uri(file_url: &str, base64_data: &str) -> String {
    let path = file_url.split(['?', '#']).next().unwrap_or(file_url);
    let mime = match path.rsplit('.').next().map(str::to_ascii_lowercase) {
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        Some(ext) if ext == "gif" => "image/gif",
        Some(ext) if ext == "webp" => "image/webp",
        _ => "application/octet-stream",
    };
    format!("data:{mime};base64,{base64_data}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::time::Duration;
    use vcp_core::error::{BridgeError, BridgeResult};
    use vcp_core::placeholder::PlaceholderTable;
    use vcp_core::protocol::FILE_NOT_FOUND_CODE;
    use vcp_executor::ExecutorContext;

    use crate::service::{ServiceError, ServicePlugin};

    struct MockRouter {
        fetched: Mutex<Vec<String>>,
        fail_fetch: bool,
        remote_payload: Value,
    }

    impl MockRouter {
        fn new() -> Self {
            Self {
                fetched: Mutex::new(Vec::new()),
                fail_fetch: false,
                remote_payload: Value::Null,
            }
        }
    }

    #[async_trait]
    impl ToolRouter for MockRouter {
        async fn execute_remote(
            &self,
            _server_id: &str,
            _tool_name: &str,
            _args: Value,
            _timeout: Duration,
        ) -> BridgeResult<Value> {
            Ok(self.remote_payload.clone())
        }

        async fn fetch_file(&self, _origin: &str, file_url: &str) -> BridgeResult<String> {
            if self.fail_fetch {
                return Err(BridgeError::FileFetch {
                    reason: "node unreachable".into(),
                });
            }
            self.fetched.lock().push(file_url.to_string());
            Ok("aGVsbG8=".into())
        }
    }

    fn dispatcher() -> (ToolDispatcher, Arc<PluginStore>) {
        let store = Arc::new(PluginStore::new(Arc::new(PlaceholderTable::new())));
        let dispatcher = ToolDispatcher::new(
            Arc::clone(&store),
            Arc::new(StdioExecutor::new(ExecutorContext::default())),
            Arc::new(ServiceRegistry::new()),
        );
        (dispatcher, store)
    }

    fn install(store: &PluginStore, manifest: serde_json::Value) {
        let manifest: PluginManifest = serde_json::from_value(manifest).unwrap();
        let mut map = HashMap::new();
        map.insert(manifest.name.clone(), Arc::new(manifest));
        store.install_local(map);
    }

    #[tokio::test]
    async fn happy_path_synchronous() {
        let (dispatcher, store) = dispatcher();
        install(
            &store,
            json!({
                "name": "P",
                "pluginType": "synchronous",
                "entryPoint": { "command": r#"sh -c "printf '{\"status\":\"success\",\"result\":42}'""# },
                "communication": { "protocol": "stdio", "timeoutMs": 5000 }
            }),
        );

        let out = dispatcher
            .process_tool_call("P", json!({"x": 1, "maid": "Nova"}), None)
            .await
            .unwrap();
        assert_eq!(out["result"], 42);
        assert_eq!(out["maid"], "Nova");
        // Local ISO-8601 with offset, e.g. 2026-08-01T12:00:00+08:00.
        let timestamp = out["timestamp"].as_str().unwrap();
        assert!(timestamp.contains('T'));
        assert!(timestamp.len() >= 19);
    }

    #[tokio::test]
    async fn unknown_tool() {
        let (dispatcher, _store) = dispatcher();
        let err = dispatcher
            .process_tool_call("Ghost", json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownTool { .. }));
    }

    #[tokio::test]
    async fn plugin_error_is_forwarded_verbatim() {
        let (dispatcher, store) = dispatcher();
        install(
            &store,
            json!({
                "name": "E",
                "pluginType": "synchronous",
                "entryPoint": { "command": r#"sh -c "printf '{\"status\":\"error\",\"error\":\"boom\"}'""# },
                "communication": { "protocol": "stdio", "timeoutMs": 5000 }
            }),
        );

        let err = dispatcher
            .process_tool_call("E", json!({}), None)
            .await
            .unwrap_err();
        match err {
            DispatchError::PluginReported { payload, .. } => {
                assert_eq!(payload["error"], "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn string_results_are_json_parsed_with_fallback() {
        let (dispatcher, store) = dispatcher();
        install(
            &store,
            json!({
                "name": "S",
                "pluginType": "synchronous",
                "entryPoint": { "command": r#"sh -c "printf '{\"status\":\"success\",\"result\":\"plain text\"}'""# },
                "communication": { "protocol": "stdio", "timeoutMs": 5000 }
            }),
        );

        let out = dispatcher.process_tool_call("S", json!({}), None).await.unwrap();
        assert_eq!(out["original_plugin_output"], "plain text");
    }

    #[tokio::test]
    async fn service_plugins_are_called_in_process() {
        struct Upper;

        #[async_trait]
        impl ServicePlugin for Upper {
            async fn process_tool_call(
                &self,
                args: Value,
                _config: &Value,
            ) -> Result<Value, ServiceError> {
                let text = args["text"].as_str().unwrap_or_default();
                Ok(json!({ "text": text.to_uppercase() }))
            }
        }

        let (dispatcher, store) = dispatcher();
        dispatcher.services.register("upper", Arc::new(Upper));
        install(
            &store,
            json!({
                "name": "Shout",
                "pluginType": "hybridservice",
                "entryPoint": { "script": "upper" }
            }),
        );

        let out = dispatcher
            .process_tool_call("Shout", json!({"text": "hi"}), None)
            .await
            .unwrap();
        assert_eq!(out["text"], "HI");
        assert!(out["timestamp"].is_string());
    }

    #[tokio::test]
    async fn distributed_tools_route_through_router() {
        let (dispatcher, store) = dispatcher();
        let mut router = MockRouter::new();
        router.remote_payload = json!({"result": "from the node"});
        dispatcher.set_router(Arc::new(router));

        store
            .register_remote(
                "S1",
                serde_json::from_value(json!({
                    "name": "RemoteTool",
                    "pluginType": "synchronous",
                    "entryPoint": { "command": "remote" }
                }))
                .unwrap(),
            )
            .unwrap();

        let out = dispatcher
            .process_tool_call("RemoteTool", json!({}), None)
            .await
            .unwrap();
        assert_eq!(out["result"], "from the node");
    }

    fn file_fallback_plugin() -> serde_json::Value {
        // Succeeds only when the retried input carries the base64 parameter.
        let command = format!(
            r#"sh -c "input=$(cat); case \"$input\" in *image_base64_1*) printf '{{\"status\":\"success\",\"result\":\"got file\"}}';; *) printf '{{\"status\":\"error\",\"error\":\"missing\",\"code\":\"{FILE_NOT_FOUND_CODE}\",\"fileUrl\":\"http://origin/cat.png\",\"failedParameter\":\"image_url_1\"}}';; esac""#
        );
        json!({
            "name": "Vision",
            "pluginType": "synchronous",
            "entryPoint": { "command": command },
            "communication": { "protocol": "stdio", "timeoutMs": 5000 }
        })
    }

    #[tokio::test]
    async fn file_fallback_retries_exactly_once_and_succeeds() {
        let (dispatcher, store) = dispatcher();
        let router = Arc::new(MockRouter::new());
        dispatcher.set_router(router.clone());
        install(&store, file_fallback_plugin());

        let out = dispatcher
            .process_tool_call(
                "Vision",
                json!({"image_url_1": "http://origin/cat.png"}),
                Some("192.168.1.7"),
            )
            .await
            .unwrap();
        assert_eq!(out["result"], "got file");
        assert_eq!(router.fetched.lock().len(), 1);
    }

    #[tokio::test]
    async fn file_fallback_fetch_failure_preserves_both_errors() {
        let (dispatcher, store) = dispatcher();
        let mut router = MockRouter::new();
        router.fail_fetch = true;
        dispatcher.set_router(Arc::new(router));
        install(&store, file_fallback_plugin());

        let err = dispatcher
            .process_tool_call(
                "Vision",
                json!({"image_url_1": "http://origin/cat.png"}),
                Some("192.168.1.7"),
            )
            .await
            .unwrap_err();
        match err {
            DispatchError::FileFallbackFailed { original, fetch, .. } => {
                assert_eq!(original["code"], FILE_NOT_FOUND_CODE);
                assert!(fetch.contains("unreachable"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn static_plugins_are_not_tools() {
        let (dispatcher, store) = dispatcher();
        install(
            &store,
            json!({
                "name": "W",
                "pluginType": "static",
                "entryPoint": { "command": "sh -c true" }
            }),
        );
        let err = dispatcher
            .process_tool_call("W", json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotInvocable { .. }));
    }

    #[test]
    fn base64_key_derivation() {
        assert_eq!(base64_key("image_url_1"), "image_base64_1");
        assert_eq!(base64_key("file_url"), "file_base64");
        assert_eq!(base64_key("attachment"), "attachment_base64");
    }

    #[test]
    fn data_uri_mime_guess() {
        assert!(data_uri("http://x/cat.png?sig=1", "QQ==").starts_with("data:image/png;base64,"));
        assert!(data_uri("http://x/blob", "QQ==").starts_with("data:application/octet-stream;"));
    }
}
