//! Contracts between the manifest store and the distributed bridge.
//!
//! The bridge needs the store to publish remote tools; the dispatcher needs
//! the bridge to route remote calls. To keep the dependency acyclic, the two
//! sides exchange trait objects at construction and never reach inside each
//! other's state:
//!
//! ```text
//! WS bridge ──Arc<dyn RemoteRegistry>──► manifest store / placeholder table
//! dispatcher ──Arc<dyn ToolRouter>────► WS bridge
//! ```

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::BridgeResult;
use crate::manifest::PluginManifest;

/// Routing surface the bridge exposes to the tool dispatcher.
#[async_trait]
pub trait ToolRouter: Send + Sync {
    /// Invokes `tool_name` on the session `server_id` and waits for the
    /// correlated response, up to `timeout`.
    ///
    /// The returned value is the response payload; an error-status response
    /// surfaces as [`BridgeError::Remote`](crate::error::BridgeError::Remote).
    async fn execute_remote(
        &self,
        server_id: &str,
        tool_name: &str,
        args: Value,
        timeout: Duration,
    ) -> BridgeResult<Value>;

    /// Fetches a file's bytes over the channel of the session whose network
    /// address matches `origin`, returning them base64-encoded.
    ///
    /// Used by the file-fallback retry: the file exists only on the caller's
    /// side, so the request is routed back to where the call came from.
    async fn fetch_file(&self, origin: &str, file_url: &str) -> BridgeResult<String>;
}

/// Registration surface the store exposes to the bridge.
#[async_trait]
pub trait RemoteRegistry: Send + Sync {
    /// Ingests a batch of tool manifests advertised by `server_id`.
    ///
    /// Each manifest is validated and rejected on name collision; rejects
    /// are logged, not fatal. Returns the number of accepted tools. The
    /// implementation rebuilds the prompt-fragment table after the batch.
    async fn register_remote_tools(
        &self,
        server_id: &str,
        manifests: Vec<PluginManifest>,
    ) -> usize;

    /// Merges placeholder values pushed by `server_id` into the table, as if
    /// the remote had performed a local static refresh.
    async fn update_remote_placeholders(&self, server_id: &str, values: HashMap<String, String>);

    /// Removes every tool and placeholder owned by `server_id`.
    ///
    /// Called on session end (clean close, transport drop, keep-alive miss)
    /// and on administrative eviction.
    async fn evict_session(&self, server_id: &str);
}
