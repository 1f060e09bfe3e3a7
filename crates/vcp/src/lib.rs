//! # VCP
//!
//! Plugin orchestration runtime for tool-augmented LLM servers.
//!
//! ## Overview
//!
//! VCP discovers heterogeneous extension plugins at startup, keeps them
//! alive through their lifecycles, and executes tool invocations with
//! precise concurrency, failure, and resource semantics. Plugins come in
//! six kinds: one-shot and acknowledged subprocesses (stdio JSON),
//! cron-refreshed placeholder producers, in-process message preprocessors,
//! in-process services, and tools federated from remote worker nodes over
//! a WebSocket control channel.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   register/evict   ┌───────────────┐
//! │  WS bridge   │───────────────────▶│ manifest store │──▶ placeholders
//! │ (vcp-bridge) │◀───────────────────│ (vcp-runtime)  │──▶ prompt fragments
//! └──────┬───────┘    route remote    └──────┬────────┘
//!        │                                   │ resolve
//!        ▼                                   ▼
//!   remote nodes                       ┌───────────┐     ┌──────────────┐
//!                                      │ dispatcher │────▶│ stdio executor│
//!                                      └───────────┘     │ (vcp-executor)│
//!                                                        └──────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use vcp::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::new().with_current_dir().load()?;
//!     LoggingBuilder::from_config(&config.logging).init();
//!
//!     let runtime = PluginRuntime::new(config.clone());
//!     runtime.reload().await;
//!     let _watcher = runtime.watch()?;
//!
//!     // Federate remote tools.
//!     let bridge = Arc::new(DistributedBridge::new(runtime.remote_registry()));
//!     runtime.set_tool_router(bridge.clone());
//!     if config.bridge.enabled {
//!         let _handle = vcp_bridge::serve(
//!             bridge,
//!             BridgeServerConfig {
//!                 addr: config.bridge.addr.clone(),
//!                 path: config.bridge.path.clone(),
//!                 auth_key: config.bridge.auth_key.clone(),
//!                 keepalive: config.bridge.keepalive(),
//!             },
//!         )
//!         .await?;
//!     }
//!
//!     let answer = runtime
//!         .process_tool_call("SciCalculator", serde_json::json!({"expression": "6*7"}), None)
//!         .await;
//!     println!("{answer:?}");
//!     Ok(())
//! }
//! ```

// Core data model and contracts
pub use vcp_core::*;

// Component crates
pub use vcp_bridge;
pub use vcp_executor;
pub use vcp_pipeline;
pub use vcp_runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use vcp::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use vcp_runtime::{ConfigLoader, LoggingBuilder, PluginRuntime, RuntimeConfig};

    // Tool dispatch surface
    pub use vcp_runtime::{DispatchError, DispatchResult};

    // Service and preprocessor extension points
    pub use vcp_pipeline::MessagePreprocessor;
    pub use vcp_runtime::{ServicePlugin, ServiceRegistry};

    // Distributed bridge
    pub use vcp_bridge::{BridgeServerConfig, DistributedBridge};

    // Core data model
    pub use vcp_core::{ChatMessage, PluginManifest, PluginOutput, PluginType};
}
