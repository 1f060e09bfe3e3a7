//! Unified error types for the VCP core contracts.
//!
//! Errors owned by a single crate live next to their component (the executor
//! and the runtime define their own enums); the types here are the ones that
//! cross crate boundaries through the [`bridge`](crate::bridge) traits and
//! the manifest model.

use thiserror::Error;

// =============================================================================
// Manifest errors
// =============================================================================

/// Errors raised while parsing or validating a plugin manifest.
///
/// Scoped to discovery: the offending plugin is skipped with a warning and
/// the scan proceeds.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest file could not be read.
    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),

    /// The manifest file is not valid JSON or misses a structural field.
    #[error("malformed manifest JSON: {0}")]
    Parse(String),

    /// A required field is absent or empty.
    #[error("manifest is missing required field '{field}'")]
    MissingField {
        /// Dotted path of the missing field.
        field: &'static str,
    },
}

impl From<serde_json::Error> for ManifestError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Result type for manifest operations.
pub type ManifestResult<T> = Result<T, ManifestError>;

// =============================================================================
// Store errors
// =============================================================================

/// Errors raised when inserting a plugin into the manifest store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A plugin with the same name is already registered; the existing entry
    /// stays, the new one is refused.
    #[error("plugin name collision: '{name}' is already registered")]
    NameCollision {
        /// The conflicting plugin name.
        name: String,
    },

    /// The incoming manifest failed validation.
    #[error("invalid manifest: {0}")]
    Invalid(#[from] ManifestError),
}

/// Result type for store insertions.
pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Bridge errors
// =============================================================================

/// Errors crossing the distributed bridge.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// No connected session matches the requested server id.
    #[error("no connected session for server '{server_id}'")]
    SessionNotFound {
        /// The unknown server id.
        server_id: String,
    },

    /// A session with this server id is already connected; first-seen wins.
    #[error("a session for server '{server_id}' is already connected")]
    DuplicateSession {
        /// The already-connected server id.
        server_id: String,
    },

    /// The owning session ended before a response arrived.
    #[error("session '{server_id}' disconnected before responding")]
    Disconnected {
        /// The server id whose session ended.
        server_id: String,
    },

    /// No response frame within the allowed window.
    #[error("remote call '{tool_name}' timed out after {after_ms} ms")]
    Timeout {
        /// The tool being invoked.
        tool_name: String,
        /// The elapsed deadline in milliseconds.
        after_ms: u64,
    },

    /// The remote node answered with an error payload.
    #[error("remote tool reported an error: {message}")]
    Remote {
        /// Human-readable message extracted from the payload.
        message: String,
        /// The raw error payload, forwarded verbatim.
        payload: serde_json::Value,
    },

    /// A frame could not be queued to the session's outbound channel.
    #[error("failed to send frame: {0}")]
    SendFailed(String),

    /// A file requested over the channel could not be produced.
    #[error("remote file fetch failed: {reason}")]
    FileFetch {
        /// Failure description from the remote or the transport.
        reason: String,
    },

    /// Transport-level I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

// =============================================================================
// Preprocessor errors
// =============================================================================

/// Error returned by a message preprocessor step.
///
/// Pipeline failures are caught and swallowed at the chain level — the
/// step's input passes through unchanged — so this type never surfaces to
/// the request caller.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct PreprocessError(pub String);

/// Result type for preprocessor steps.
pub type PreprocessResult<T> = Result<T, PreprocessError>;
