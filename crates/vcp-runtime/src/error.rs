//! Runtime error types.

use serde_json::{Value, json};
use thiserror::Error;

use vcp_core::error::BridgeError;
use vcp_executor::ExecError;

/// Errors that can occur during configuration loading and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File not found at the specified path.
    #[error("configuration file not found: {0}")]
    FileNotFound(std::path::PathBuf),

    /// Failed to read the configuration file.
    #[error("failed to read configuration file: {0}")]
    Read(#[from] std::io::Error),

    /// Extraction / parsing error.
    #[error("configuration parse error: {0}")]
    Parse(String),

    /// A value failed validation.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// Dispatch errors
// =============================================================================

/// Errors surfaced by the tool dispatcher.
///
/// Every variant serializes to a JSON object via
/// [`error_json`](DispatchError::error_json), carrying a machine-usable key
/// (`plugin_error` for failures the plugin itself reported,
/// `plugin_execution_error` for failures of the machinery) plus a
/// human-readable message.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No plugin with this name is registered.
    #[error("unknown tool '{name}'")]
    UnknownTool {
        /// The unresolved tool name.
        name: String,
    },

    /// The plugin exists but its type is not dispatchable as a tool.
    #[error("plugin '{name}' is not invocable as a tool")]
    NotInvocable {
        /// The plugin name.
        name: String,
    },

    /// Subprocess execution failed.
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// Remote routing failed.
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// The plugin emitted a well-formed `{"status":"error",...}` object,
    /// forwarded verbatim.
    #[error("plugin '{name}' reported an error")]
    PluginReported {
        /// The plugin name.
        name: String,
        /// The plugin's structured error output.
        payload: Value,
    },

    /// The one-shot file-fallback retry could not be completed: the fetch
    /// over the distributed channel failed. Preserves both failures.
    #[error("plugin '{name}' file fallback failed: {fetch}")]
    FileFallbackFailed {
        /// The plugin name.
        name: String,
        /// The plugin's original error output.
        original: Value,
        /// Description of the fetch failure.
        fetch: String,
    },
}

impl DispatchError {
    /// Normalizes this error into the JSON object handed to callers.
    pub fn error_json(&self) -> Value {
        match self {
            Self::PluginReported { payload, .. } => json!({ "plugin_error": payload }),
            Self::FileFallbackFailed {
                original, fetch, ..
            } => json!({
                "plugin_execution_error": self.to_string(),
                "original_plugin_error": original,
                "file_fetch_error": fetch,
            }),
            Self::Exec(e) => {
                let mut object = json!({ "plugin_execution_error": e.to_string() });
                if let Some(tail) = e.stderr_tail()
                    && !tail.is_empty()
                {
                    object["stderr"] = Value::String(tail.to_string());
                }
                object
            }
            other => json!({ "plugin_execution_error": other.to_string() }),
        }
    }
}

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_reported_keeps_payload_verbatim() {
        let err = DispatchError::PluginReported {
            name: "P".into(),
            payload: json!({"status": "error", "error": "boom", "detail": 7}),
        };
        let object = err.error_json();
        assert_eq!(object["plugin_error"]["error"], "boom");
        assert_eq!(object["plugin_error"]["detail"], 7);
    }

    #[test]
    fn machinery_errors_use_execution_key() {
        let err = DispatchError::UnknownTool { name: "Ghost".into() };
        let object = err.error_json();
        assert!(
            object["plugin_execution_error"]
                .as_str()
                .unwrap()
                .contains("Ghost")
        );
    }

    #[test]
    fn fallback_failure_preserves_both_errors() {
        let err = DispatchError::FileFallbackFailed {
            name: "P".into(),
            original: json!({"error": "missing file"}),
            fetch: "no session matches origin".into(),
        };
        let object = err.error_json();
        assert_eq!(object["original_plugin_error"]["error"], "missing file");
        assert!(object["file_fetch_error"].as_str().unwrap().contains("session"));
    }
}
