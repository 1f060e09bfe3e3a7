//! In-process service plugins.
//!
//! `service` and `hybridservice` plugins run inside the server process and
//! are invoked by direct function call, not stdio. In a compiled runtime
//! their implementations are Rust types registered here by name; the
//! manifest's `entryPoint.script` selects the implementation, mirroring how
//! preprocessor modules are selected.
//!
//! A `service` plugin typically installs its own HTTP or event handlers
//! elsewhere; only its tool-call surface (`process_tool_call`) is routed
//! through the dispatcher, and only for `hybridservice` / `service` types
//! resolved by name.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

/// Error returned by a service plugin's tool-call surface.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ServiceError(pub String);

/// An in-process plugin invocable as a tool.
#[async_trait]
pub trait ServicePlugin: Send + Sync {
    /// Handles one tool invocation with the caller's arguments and the
    /// plugin's effective config.
    async fn process_tool_call(&self, args: Value, config: &Value)
    -> Result<Value, ServiceError>;
}

/// Name → implementation map for service plugins.
///
/// Embedders register implementations at startup; manifests whose script
/// has no registered implementation are skipped by the dispatcher with an
/// error.
#[derive(Default)]
pub struct ServiceRegistry {
    inner: RwLock<HashMap<String, Arc<dyn ServicePlugin>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an implementation under `script` (the manifest selector).
    pub fn register(&self, script: impl Into<String>, service: Arc<dyn ServicePlugin>) {
        let script = script.into();
        info!(script = %script, "Service plugin implementation registered");
        self.inner.write().insert(script, service);
    }

    /// Resolves a selector to its implementation.
    pub fn resolve(&self, script: &str) -> Option<Arc<dyn ServicePlugin>> {
        self.inner.read().get(script).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Upper;

    #[async_trait]
    impl ServicePlugin for Upper {
        async fn process_tool_call(
            &self,
            args: Value,
            _config: &Value,
        ) -> Result<Value, ServiceError> {
            let text = args
                .get("text")
                .and_then(Value::as_str)
                .ok_or_else(|| ServiceError("missing 'text'".into()))?;
            Ok(json!({ "text": text.to_uppercase() }))
        }
    }

    #[tokio::test]
    async fn registry_resolves_and_calls() {
        let registry = ServiceRegistry::new();
        registry.register("upper", Arc::new(Upper));

        let service = registry.resolve("upper").expect("registered");
        let out = service
            .process_tool_call(json!({"text": "hi"}), &json!({}))
            .await
            .unwrap();
        assert_eq!(out, json!({"text": "HI"}));
        assert!(registry.resolve("missing").is_none());
    }
}
