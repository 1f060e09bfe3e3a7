//! Wire protocols: plugin stdio output and bridge control-channel frames.
//!
//! # Stdio protocol
//!
//! A subprocess plugin receives one UTF-8 JSON value on stdin (then stdin is
//! closed) and must emit exactly one JSON object on stdout:
//!
//! ```json
//! { "status": "success", "result": ... }
//! { "status": "error", "error": "what went wrong" }
//! ```
//!
//! For asynchronous plugins the *first* complete top-level JSON object on
//! stdout is the acknowledgement; later bytes are ignored here.
//!
//! # Control-channel protocol
//!
//! A remote worker node and the bridge exchange [`Frame`]s over a framed
//! full-duplex channel. Frames are JSON objects tagged by `type`, delivered
//! in order within a session.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::manifest::PluginManifest;

/// Error `code` a plugin emits when a referenced file exists only on the
/// caller's side; triggers the one-shot fetch-and-retry.
pub const FILE_NOT_FOUND_CODE: &str = "FILE_NOT_FOUND_LOCALLY";

// =============================================================================
// Plugin stdout
// =============================================================================

/// The single JSON object a subprocess plugin emits on stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PluginOutput {
    /// The invocation succeeded.
    Success {
        /// The plugin's result value, forwarded to the caller.
        #[serde(default)]
        result: Value,
        /// Additional top-level keys the plugin chose to emit.
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    /// The invocation failed inside the plugin.
    Error {
        /// Human-readable failure description.
        error: String,
        /// Machine-usable error code, e.g. [`FILE_NOT_FOUND_CODE`].
        #[serde(default)]
        code: Option<String>,
        /// For [`FILE_NOT_FOUND_CODE`]: the URL the plugin could not reach.
        #[serde(default, rename = "fileUrl")]
        file_url: Option<String>,
        /// For [`FILE_NOT_FOUND_CODE`]: the input parameter holding that URL.
        #[serde(default, rename = "failedParameter")]
        failed_parameter: Option<String>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
}

/// The recoverable file-fallback sentinel extracted from an error output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFallback {
    /// URL of the file that was not found locally.
    pub file_url: String,
    /// Name of the input parameter that referenced it.
    pub failed_parameter: String,
}

impl PluginOutput {
    /// Whether this output reports success.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Returns the file-fallback sentinel when this is a
    /// [`FILE_NOT_FOUND_CODE`] error with both pointer fields present.
    pub fn file_fallback(&self) -> Option<FileFallback> {
        match self {
            Self::Error {
                code: Some(code),
                file_url: Some(file_url),
                failed_parameter: Some(failed_parameter),
                ..
            } if code == FILE_NOT_FOUND_CODE => Some(FileFallback {
                file_url: file_url.clone(),
                failed_parameter: failed_parameter.clone(),
            }),
            _ => None,
        }
    }

    /// The full output re-serialized as a JSON value.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// =============================================================================
// Control-channel frames
// =============================================================================

/// Outcome marker on response frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameStatus {
    Success,
    Error,
}

/// One message on the distributed control channel.
///
/// The transport is out of scope; the contract is in-order delivery within a
/// session and an unambiguous close signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Frame {
    /// Node → bridge: advertise tool manifests for registration.
    RegisterTools { tools: Vec<PluginManifest> },
    /// Node → bridge: push placeholder values, as if a local static refresh
    /// had produced them.
    UpdatePlaceholders {
        placeholders: HashMap<String, String>,
    },
    /// Bridge → node: invoke a tool the node registered.
    ToolRequest {
        id: Uuid,
        tool_name: String,
        args: Value,
    },
    /// Node → bridge: the response correlated to a [`Frame::ToolRequest`].
    ToolResponse {
        id: Uuid,
        status: FrameStatus,
        #[serde(default)]
        payload: Value,
    },
    /// Bridge → node: request the bytes of a file only the node can see.
    FileRequest { id: Uuid, file_url: String },
    /// Node → bridge: the response correlated to a [`Frame::FileRequest`].
    FileResponse {
        id: Uuid,
        status: FrameStatus,
        #[serde(default)]
        base64_data: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
    /// Keep-alive probe; either side may send.
    Ping,
    /// Keep-alive answer.
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_output_parses() {
        let out: PluginOutput =
            serde_json::from_str(r#"{"status":"success","result":42,"note":"hi"}"#).unwrap();
        assert!(out.is_success());
        match out {
            PluginOutput::Success { result, extra } => {
                assert_eq!(result, serde_json::json!(42));
                assert_eq!(extra.get("note"), Some(&serde_json::json!("hi")));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn file_fallback_sentinel_detected() {
        let out: PluginOutput = serde_json::from_str(
            r#"{"status":"error","error":"no such file",
                "code":"FILE_NOT_FOUND_LOCALLY",
                "fileUrl":"http://origin/file.png",
                "failedParameter":"image_url_1"}"#,
        )
        .unwrap();
        let fb = out.file_fallback().expect("sentinel");
        assert_eq!(fb.failed_parameter, "image_url_1");
        assert_eq!(fb.file_url, "http://origin/file.png");
    }

    #[test]
    fn plain_error_has_no_fallback() {
        let out: PluginOutput =
            serde_json::from_str(r#"{"status":"error","error":"boom"}"#).unwrap();
        assert!(out.file_fallback().is_none());
    }

    #[test]
    fn frame_round_trip_field_names() {
        let frame = Frame::ToolRequest {
            id: Uuid::nil(),
            tool_name: "SciCalculator".into(),
            args: serde_json::json!({"expression": "1+1"}),
        };
        let text = serde_json::to_string(&frame).unwrap();
        assert!(text.contains(r#""type":"tool_request""#));
        assert!(text.contains(r#""toolName":"SciCalculator""#));

        let back: Frame = serde_json::from_str(&text).unwrap();
        match back {
            Frame::ToolRequest { tool_name, .. } => assert_eq!(tool_name, "SciCalculator"),
            _ => unreachable!(),
        }
    }
}
