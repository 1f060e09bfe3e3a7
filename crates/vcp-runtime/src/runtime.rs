//! Runtime orchestration: wiring, reload, and the public surface.
//!
//! [`PluginRuntime`] owns the manifest store, the placeholder table, the
//! preprocessor pipeline, the static refresher, and the tool dispatcher,
//! and drives the reload cycle that keeps them consistent:
//!
//! 1. rescan the plugin root and swap the store's local half
//! 2. reconcile and persist the preprocessor order, reinstall the chain
//! 3. rebuild the static refresh jobs (seed, initial refresh, cron)
//! 4. rebuild the prompt-fragment table
//! 5. emit the `plugins-reloaded` event
//!
//! Reloads are single-flight: overlapping triggers serialize on one lock,
//! and the debounced watcher collapses event bursts before they get here.
//!
//! The distributed bridge is wired through the trait pair in
//! [`vcp_core::bridge`]: hand [`remote_registry`](PluginRuntime::remote_registry)
//! to the bridge at construction and pass the bridge back via
//! [`set_tool_router`](PluginRuntime::set_tool_router).

use std::path::PathBuf;
use std::sync::Arc;

use notify::RecursiveMode;
use serde_json::Value;
use tokio::sync::watch;
use tracing::info;

use vcp_core::bridge::{RemoteRegistry, ToolRouter};
use vcp_core::manifest::PluginManifest;
use vcp_core::message::ChatMessage;
use vcp_core::placeholder::PlaceholderTable;
use vcp_executor::{ExecutorContext, StdioExecutor};
use vcp_pipeline::{PreprocessorPipeline, order};

use crate::config::RuntimeConfig;
use crate::dispatcher::ToolDispatcher;
use crate::error::DispatchResult;
use crate::refresher::StaticRefresher;
use crate::service::ServiceRegistry;
use crate::store::{PluginStore, scan_plugin_root};
use crate::watcher::DebouncedWatcher;

/// The top-level owner of the plugin system.
pub struct PluginRuntime {
    config: RuntimeConfig,
    placeholders: Arc<PlaceholderTable>,
    store: Arc<PluginStore>,
    pipeline: Arc<PreprocessorPipeline>,
    refresher: Arc<StaticRefresher>,
    dispatcher: Arc<ToolDispatcher>,
    services: Arc<ServiceRegistry>,
    reload_lock: tokio::sync::Mutex<()>,
    /// Generation counter bumped on every successful reload
    /// (the `plugins-reloaded` event).
    reload_tx: watch::Sender<u64>,
}

impl PluginRuntime {
    /// Builds a runtime from its configuration. No plugins are loaded until
    /// the first [`reload`](Self::reload).
    pub fn new(config: RuntimeConfig) -> Arc<Self> {
        let placeholders = Arc::new(PlaceholderTable::new());
        let store = Arc::new(PluginStore::new(Arc::clone(&placeholders)));
        let executor = Arc::new(StdioExecutor::new(ExecutorContext {
            project_base_path: config.server.project_base_path.clone(),
            server_port: Some(config.server.port),
            image_server_key: config.server.image_server_key.clone(),
            callback_base_url: config.server.callback_base_url.clone(),
        }));
        let services = Arc::new(ServiceRegistry::new());
        let refresher = StaticRefresher::new(Arc::clone(&executor), Arc::clone(&placeholders));
        let dispatcher = Arc::new(ToolDispatcher::new(
            Arc::clone(&store),
            executor,
            Arc::clone(&services),
        ));
        let (reload_tx, _) = watch::channel(0);

        Arc::new(Self {
            config,
            placeholders,
            store,
            pipeline: Arc::new(PreprocessorPipeline::new()),
            refresher,
            dispatcher,
            services,
            reload_lock: tokio::sync::Mutex::new(()),
            reload_tx,
        })
    }

    // ─── Wiring ──────────────────────────────────────────────────────────────

    /// The store's registration surface, handed to the bridge.
    pub fn remote_registry(&self) -> Arc<dyn RemoteRegistry> {
        Arc::clone(&self.store) as Arc<dyn RemoteRegistry>
    }

    /// Wires in the bridge's routing surface for distributed tool calls.
    pub fn set_tool_router(&self, router: Arc<dyn ToolRouter>) {
        self.dispatcher.set_router(router);
    }

    /// The service implementation registry; embedders register their
    /// `service` / `hybridservice` implementations here before loading.
    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Performs a full (re)load of the plugin system.
    ///
    /// Single-flight: concurrent calls serialize, and each call runs the
    /// whole cycle described in the module docs.
    pub async fn reload(self: &Arc<Self>) {
        let _guard = self.reload_lock.lock().await;
        info!(root = %self.config.plugins.root.display(), "Reloading plugins");

        let scanned = scan_plugin_root(&self.config.plugins.root);
        self.store.install_local(scanned);

        let discovered = self.store.preprocessor_names();
        let effective_order = order::load_and_reconcile(
            &self.config.plugins.preprocessor_order_file,
            &discovered,
        );
        self.pipeline
            .install(&effective_order, &self.store.local_manifests());

        self.refresher.on_reload(self.store.static_manifests());
        self.store.rebuild_prompt_fragments();

        self.reload_tx.send_modify(|generation| *generation += 1);
        info!(
            plugins = self.store.all().len(),
            preprocessors = effective_order.len(),
            "Plugin reload complete"
        );
    }

    /// Subscribes to the `plugins-reloaded` event; the value is a
    /// generation counter.
    pub fn subscribe_reloads(&self) -> watch::Receiver<u64> {
        self.reload_tx.subscribe()
    }

    /// Starts the debounced filesystem watcher over the plugin root and the
    /// order file's directory; each settled burst triggers a reload.
    pub fn watch(self: &Arc<Self>) -> notify::Result<DebouncedWatcher> {
        let mut paths = vec![(self.config.plugins.root.clone(), RecursiveMode::Recursive)];
        let order_dir = self
            .config
            .plugins
            .preprocessor_order_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        if order_dir != self.config.plugins.root {
            paths.push((order_dir, RecursiveMode::NonRecursive));
        }

        let runtime = Arc::clone(self);
        DebouncedWatcher::spawn(paths, self.config.plugins.reload_debounce(), move || {
            let runtime = Arc::clone(&runtime);
            async move { runtime.reload().await }
        })
    }

    /// Stops scheduled refresh jobs. Asynchronous plugins past their ack
    /// keep running under their own responsibility.
    pub fn shutdown(&self) {
        self.refresher.abort_jobs();
    }

    // ─── Request-path surface ────────────────────────────────────────────────

    /// Dispatches one tool invocation (§ tool dispatcher).
    pub async fn process_tool_call(
        &self,
        tool_name: &str,
        args: Value,
        request_origin: Option<&str>,
    ) -> DispatchResult<Value> {
        self.dispatcher
            .process_tool_call(tool_name, args, request_origin)
            .await
    }

    /// Runs the preprocessor chain over a chat message array.
    pub async fn preprocess(&self, messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
        self.pipeline.run(messages).await
    }

    /// Current value of a placeholder.
    pub fn placeholder(&self, key: &str) -> Option<String> {
        self.placeholders.get(key)
    }

    /// Runs one refresh of a static plugin immediately (admin surface).
    pub async fn refresh_static(&self, name: &str) -> bool {
        match self.store.resolve(name) {
            Some(manifest) => {
                self.refresher.refresh(&manifest).await;
                true
            }
            None => false,
        }
    }

    // ─── Admin read surface ──────────────────────────────────────────────────

    /// Every known manifest, sorted by name.
    pub fn list_plugins(&self) -> Vec<Arc<PluginManifest>> {
        self.store.all()
    }

    /// One manifest by name.
    pub fn plugin(&self, name: &str) -> Option<Arc<PluginManifest>> {
        self.store.resolve(name)
    }

    /// The currently installed preprocessor order.
    pub fn preprocessor_order(&self) -> Vec<String> {
        self.pipeline.order()
    }

    /// A consistent snapshot of the placeholder table.
    pub fn placeholder_snapshot(&self) -> std::collections::HashMap<String, String> {
        self.placeholders.snapshot()
    }

    /// The runtime configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vcp_core::placeholder;

    fn write_plugin(root: &std::path::Path, dir: &str, manifest: serde_json::Value) {
        let plugin_dir = root.join(dir);
        std::fs::create_dir_all(&plugin_dir).unwrap();
        std::fs::write(
            plugin_dir.join(vcp_core::manifest::MANIFEST_FILE),
            serde_json::to_string_pretty(&manifest).unwrap(),
        )
        .unwrap();
    }

    fn fixture() -> (tempfile::TempDir, RuntimeConfig) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("Plugin");
        std::fs::create_dir_all(&root).unwrap();

        write_plugin(
            &root,
            "echo",
            json!({
                "name": "EchoTool",
                "pluginType": "synchronous",
                "entryPoint": { "command": r#"sh -c "printf '{\"status\":\"success\",\"result\":\"echoed\"}'""# },
                "communication": { "protocol": "stdio", "timeoutMs": 5000 },
                "capabilities": {
                    "invocationCommands": [ { "description": "echoes back" } ]
                }
            }),
        );
        write_plugin(
            &root,
            "trimmer",
            json!({
                "name": "Trimmer",
                "pluginType": "messagePreprocessor",
                "entryPoint": { "script": "context-trimmer" }
            }),
        );
        write_plugin(
            &root,
            "clock",
            json!({
                "name": "Clock",
                "pluginType": "static",
                "entryPoint": { "command": r#"sh -c "printf 'tick'""# },
                "communication": { "protocol": "stdio", "timeoutMs": 5000 },
                "capabilities": {
                    "systemPromptPlaceholders": [ { "placeholder": "ClockNow" } ]
                }
            }),
        );

        let mut config = RuntimeConfig::default();
        config.plugins.root = root;
        config.plugins.preprocessor_order_file = dir.path().join("preprocessor-order.json");
        (dir, config)
    }

    #[tokio::test]
    async fn reload_wires_everything() {
        let (_dir, config) = fixture();
        let order_file = config.plugins.preprocessor_order_file.clone();
        let runtime = PluginRuntime::new(config);

        let mut reloads = runtime.subscribe_reloads();
        runtime.reload().await;

        // Store populated, order persisted, pipeline installed.
        assert!(runtime.plugin("EchoTool").is_some());
        assert_eq!(runtime.preprocessor_order(), vec!["Trimmer"]);
        assert!(order_file.exists());

        // Placeholder seeded (sentinel or already refreshed).
        let clock = runtime.placeholder("ClockNow").unwrap();
        assert!(clock == "tick" || placeholder::is_sentinel(&clock));

        // Prompt fragments rebuilt.
        assert!(runtime.placeholder("VCPEchoTool").is_some());

        // plugins-reloaded observed.
        assert!(reloads.has_changed().unwrap());
        assert_eq!(*reloads.borrow_and_update(), 1);

        // Tool call round-trip through the dispatcher.
        let out = runtime
            .process_tool_call("EchoTool", json!({}), None)
            .await
            .unwrap();
        assert_eq!(out["original_plugin_output"], "echoed");

        runtime.shutdown();
    }

    #[tokio::test]
    async fn reload_is_idempotent() {
        let (_dir, config) = fixture();
        let runtime = PluginRuntime::new(config);

        runtime.reload().await;
        let names_1: Vec<_> = runtime.list_plugins().iter().map(|m| m.name.clone()).collect();
        let order_1 = runtime.preprocessor_order();

        runtime.reload().await;
        let names_2: Vec<_> = runtime.list_plugins().iter().map(|m| m.name.clone()).collect();
        let order_2 = runtime.preprocessor_order();

        assert_eq!(names_1, names_2);
        assert_eq!(order_1, order_2);
        assert_eq!(*runtime.subscribe_reloads().borrow(), 2);

        runtime.shutdown();
    }

    #[tokio::test]
    async fn manual_static_refresh() {
        let (_dir, config) = fixture();
        let runtime = PluginRuntime::new(config);
        runtime.reload().await;

        // Let the initial background refresh from the reload settle so the
        // manual one is not skipped by the per-plugin serial guard.
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;

        assert!(runtime.refresh_static("Clock").await);
        assert_eq!(runtime.placeholder("ClockNow").as_deref(), Some("tick"));
        assert!(!runtime.refresh_static("Nope").await);

        runtime.shutdown();
    }
}
