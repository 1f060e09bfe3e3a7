//! Executor error types.

use thiserror::Error;

/// Errors raised while executing a subprocess plugin.
///
/// Well-formed plugin output — including `{"status":"error",...}` — is *not*
/// an `ExecError`; it is returned as a
/// [`PluginOutput`](vcp_core::PluginOutput) and interpreted by the
/// dispatcher. These variants cover failures of the execution machinery
/// itself.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The manifest's type or protocol does not go through this executor.
    #[error("plugin '{name}' is not stdio-invocable ({reason})")]
    NotInvocable {
        /// The plugin name.
        name: String,
        /// Which precondition failed.
        reason: &'static str,
    },

    /// The entry-point command is absent or splits to nothing.
    #[error("plugin '{name}' has an empty entry-point command")]
    EmptyCommand {
        /// The plugin name.
        name: String,
    },

    /// The child process could not start.
    #[error("failed to spawn plugin '{name}': {reason}")]
    SpawnFailed {
        /// The plugin name.
        name: String,
        /// OS-level failure description.
        reason: String,
    },

    /// The deadline expired; the child was force-killed.
    #[error("plugin '{name}' timed out after {after_ms} ms")]
    Timeout {
        /// The plugin name.
        name: String,
        /// The elapsed deadline in milliseconds.
        after_ms: u64,
        /// Tail of captured stderr, for diagnostics.
        stderr_tail: String,
    },

    /// The child exited without emitting one valid JSON object.
    #[error("plugin '{name}' produced no valid JSON output: {detail}")]
    MalformedOutput {
        /// The plugin name.
        name: String,
        /// Parse failure or exit description.
        detail: String,
        /// Tail of captured stderr, for diagnostics.
        stderr_tail: String,
    },

    /// The child exited with a failure status (static refresh runs only —
    /// tool invocations are judged by their JSON output instead).
    #[error("plugin '{name}' exited with {status}")]
    Failed {
        /// The plugin name.
        name: String,
        /// Render of the exit status.
        status: String,
        /// Tail of captured stderr, for diagnostics.
        stderr_tail: String,
    },

    /// A capture buffer exceeded its bound; the child was killed.
    #[error("plugin '{name}' exceeded the {limit}-byte {stream} buffer")]
    OversizedOutput {
        /// The plugin name.
        name: String,
        /// Which stream overflowed.
        stream: &'static str,
        /// The configured bound in bytes.
        limit: usize,
    },

    /// Pipe I/O with the child failed.
    #[error("I/O error talking to plugin '{name}': {reason}")]
    Io {
        /// The plugin name.
        name: String,
        /// Underlying error description.
        reason: String,
    },
}

impl ExecError {
    /// The captured stderr tail, when this variant carries one.
    pub fn stderr_tail(&self) -> Option<&str> {
        match self {
            Self::Timeout { stderr_tail, .. }
            | Self::MalformedOutput { stderr_tail, .. }
            | Self::Failed { stderr_tail, .. } => Some(stderr_tail),
            _ => None,
        }
    }
}

/// Result type for executor operations.
pub type ExecResult<T> = Result<T, ExecError>;
