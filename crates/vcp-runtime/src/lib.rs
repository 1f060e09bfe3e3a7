//! # VCP Runtime
//!
//! Orchestration layer of the VCP plugin system.
//!
//! This crate ties the component crates together and owns everything that
//! is not a single component's concern:
//!
//! - **Manifest store** ([`store`]): discovery of local plugins, the
//!   local/remote split, name uniqueness, prompt-fragment publishing.
//! - **Static refresher** ([`refresher`]): cron-scheduled refreshes turning
//!   static plugins into placeholder values.
//! - **Tool dispatcher** ([`dispatcher`]): the single `process_tool_call`
//!   entry point routing to the stdio executor, the distributed bridge, or
//!   in-process services — including the one-shot file-fallback retry.
//! - **Hot reload** ([`runtime`], [`watcher`]): the debounced filesystem
//!   watcher and the single-flight reload cycle, with the
//!   `plugins-reloaded` event.
//! - **Configuration** ([`config`]) and **logging** ([`logging`]), loaded
//!   with figment and emitted with tracing.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use vcp_runtime::{ConfigLoader, LoggingBuilder, PluginRuntime};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::new().with_current_dir().load()?;
//!     LoggingBuilder::from_config(&config.logging).init();
//!
//!     let runtime = PluginRuntime::new(config);
//!     runtime.reload().await;
//!     let _watcher = runtime.watch()?;
//!
//!     let result = runtime
//!         .process_tool_call("SciCalculator", serde_json::json!({"expression": "1+1"}), None)
//!         .await;
//!     // ...
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod refresher;
pub mod runtime;
pub mod service;
pub mod store;
pub mod watcher;

pub use config::{ConfigLoader, RuntimeConfig};
pub use dispatcher::ToolDispatcher;
pub use error::{ConfigError, ConfigResult, DispatchError, DispatchResult};
pub use logging::LoggingBuilder;
pub use refresher::StaticRefresher;
pub use runtime::PluginRuntime;
pub use service::{ServiceError, ServicePlugin, ServiceRegistry};
pub use store::{PluginStore, scan_plugin_root};
pub use watcher::DebouncedWatcher;
