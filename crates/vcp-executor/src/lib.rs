//! # VCP Executor
//!
//! Spawns and talks to subprocess plugins over the stdio protocol.
//!
//! One invocation is one child process: the executor writes a single JSON
//! payload to the child's stdin, closes it, and interprets the child's
//! stdout as one JSON result object. Two subprocess disciplines exist:
//!
//! - **Synchronous**: the full stdout is parsed once the child exits.
//! - **Asynchronous**: the call resolves as soon as the *first* complete
//!   top-level JSON object appears on stdout; the child then keeps running
//!   unsupervised (it reports later progress through its callback URL,
//!   which is outside this crate).
//!
//! Every invocation carries a deadline. On expiry the child is force-killed
//! and the call fails; an asynchronous child that has already been acked is
//! never killed. stdout/stderr capture buffers are bounded; overflowing one
//! is an error, not silent truncation.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, warn};

use vcp_core::manifest::{PluginManifest, PluginType, Protocol};
use vcp_core::protocol::PluginOutput;

pub mod error;
pub mod scan;

pub use error::{ExecError, ExecResult};
use scan::JsonScanner;

/// Bound on captured stdout per invocation.
pub const MAX_STDOUT_BYTES: usize = 8 * 1024 * 1024;
/// Bound on captured stderr per invocation.
pub const MAX_STDERR_BYTES: usize = 1024 * 1024;
/// How much trailing stderr is attached to error reports.
const STDERR_TAIL_BYTES: usize = 2000;

/// Well-known environment keys injected into every plugin process.
pub const ENV_PROJECT_BASE_PATH: &str = "PROJECT_BASE_PATH";
pub const ENV_SERVER_PORT: &str = "SERVER_PORT";
pub const ENV_IMAGE_SERVER_KEY: &str = "IMAGESERVER_IMAGE_KEY";
pub const ENV_REQUEST_ORIGIN: &str = "VCP_REQUEST_ORIGIN";
pub const ENV_CALLBACK_PLUGIN_NAME: &str = "PLUGIN_NAME_FOR_CALLBACK";
pub const ENV_CALLBACK_BASE_URL: &str = "CALLBACK_BASE_URL";
pub const ENV_DEBUG_MODE: &str = "DebugMode";

// =============================================================================
// Executor context
// =============================================================================

/// Host-side values injected into plugin environments when known.
#[derive(Debug, Clone, Default)]
pub struct ExecutorContext {
    /// Root directory of the server installation.
    pub project_base_path: Option<PathBuf>,
    /// Port the surrounding HTTP layer listens on.
    pub server_port: Option<u16>,
    /// Access key of the image server, for plugins that serve files.
    pub image_server_key: Option<String>,
    /// Base URL asynchronous plugins post completion events to.
    pub callback_base_url: Option<String>,
}

// =============================================================================
// StdioExecutor
// =============================================================================

/// Executes one invocation of one local subprocess plugin.
///
/// The executor is stateless between calls: every invocation spawns a fresh
/// child from the manifest and the current process environment.
#[derive(Debug, Clone, Default)]
pub struct StdioExecutor {
    ctx: ExecutorContext,
}

impl StdioExecutor {
    /// Creates an executor with the given host context.
    pub fn new(ctx: ExecutorContext) -> Self {
        Self { ctx }
    }

    /// Executes a `synchronous` or `asynchronous` plugin with `input` on its
    /// stdin.
    ///
    /// `request_origin` is the caller's network origin, exposed to the
    /// plugin for file-resolution fallback.
    ///
    /// A well-formed `{"status":"error",...}` object is a *successful*
    /// execution from this layer's point of view and is returned as
    /// [`PluginOutput::Error`] for the dispatcher to interpret.
    pub async fn execute(
        &self,
        manifest: &PluginManifest,
        input: &Value,
        request_origin: Option<&str>,
    ) -> ExecResult<PluginOutput> {
        let name = manifest.name.as_str();
        match manifest.plugin_type {
            PluginType::Synchronous | PluginType::Asynchronous => {}
            _ => {
                return Err(ExecError::NotInvocable {
                    name: name.to_string(),
                    reason: "plugin type is not synchronous or asynchronous",
                });
            }
        }
        if manifest.protocol() != Protocol::Stdio {
            return Err(ExecError::NotInvocable {
                name: name.to_string(),
                reason: "communication protocol is not stdio",
            });
        }

        let payload = serde_json::to_vec(input).map_err(|e| ExecError::Io {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        let timeout = manifest.timeout();
        let mut child = self.spawn(manifest, request_origin, true)?;

        // stderr is drained on its own task so a chatty plugin cannot block
        // the stdout path.
        let capture = StderrCapture::attach(&mut child);

        debug!(
            plugin = %name,
            plugin_type = ?manifest.plugin_type,
            timeout_ms = timeout.as_millis() as u64,
            "Invoking plugin"
        );

        match manifest.plugin_type {
            PluginType::Asynchronous => {
                self.execute_async(name, child, payload, timeout, capture)
                    .await
            }
            _ => self.execute_sync(name, child, payload, timeout, capture).await,
        }
    }

    /// Runs a `static` plugin with no stdin input, capturing its entire
    /// stdout as a string (trailing whitespace stripped).
    pub async fn run_static_capture(&self, manifest: &PluginManifest) -> ExecResult<String> {
        let name = manifest.name.as_str();
        if manifest.plugin_type != PluginType::Static {
            return Err(ExecError::NotInvocable {
                name: name.to_string(),
                reason: "plugin type is not static",
            });
        }

        let timeout = manifest.timeout();
        let mut child = self.spawn(manifest, None, false)?;
        let mut capture = StderrCapture::attach(&mut child);

        let drive = async {
            let mut stdout = child.stdout.take().ok_or_else(|| ExecError::Io {
                name: name.to_string(),
                reason: "child stdout not captured".into(),
            })?;
            let mut out = Vec::new();
            let overflowed = read_capped(&mut stdout, MAX_STDOUT_BYTES, &mut out)
                .await
                .map_err(|e| io_error(name, e))?;
            if overflowed {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(ExecError::OversizedOutput {
                    name: name.to_string(),
                    stream: "stdout",
                    limit: MAX_STDOUT_BYTES,
                });
            }
            let status = child.wait().await.map_err(|e| io_error(name, e))?;
            Ok((out, status))
        };

        // Bind before matching so the drive future (borrowing `child`) is
        // dropped and the timeout branch can kill the process.
        let outcome = tokio::time::timeout(timeout, drive).await;
        let (out, status) = match outcome {
            Ok(result) => result?,
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(ExecError::Timeout {
                    name: name.to_string(),
                    after_ms: timeout.as_millis() as u64,
                    stderr_tail: capture.tail().await,
                });
            }
        };

        if !status.success() {
            return Err(ExecError::Failed {
                name: name.to_string(),
                status: status.to_string(),
                stderr_tail: capture.tail().await,
            });
        }
        Ok(String::from_utf8_lossy(&out).trim_end().to_string())
    }

    // ─── Process launch ──────────────────────────────────────────────────────

    fn spawn(
        &self,
        manifest: &PluginManifest,
        request_origin: Option<&str>,
        with_stdin: bool,
    ) -> ExecResult<Child> {
        let name = manifest.name.as_str();
        let command_line = manifest.command().ok_or_else(|| ExecError::EmptyCommand {
            name: name.to_string(),
        })?;
        let argv: Vec<String> =
            shlex::split(command_line).ok_or_else(|| ExecError::EmptyCommand {
                name: name.to_string(),
            })?;
        let Some((program, args)) = argv.split_first() else {
            return Err(ExecError::EmptyCommand {
                name: name.to_string(),
            });
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(if with_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = &manifest.base_path {
            cmd.current_dir(dir);
        }

        // Effective plugin config, flattened to strings, over the inherited
        // process environment.
        for (key, value) in manifest.flattened_config() {
            cmd.env(key, value);
        }
        cmd.env("PYTHONIOENCODING", "utf-8");
        cmd.env(ENV_DEBUG_MODE, manifest.debug_mode().to_string());
        if let Some(root) = &self.ctx.project_base_path {
            cmd.env(ENV_PROJECT_BASE_PATH, root);
        }
        if let Some(port) = self.ctx.server_port {
            cmd.env(ENV_SERVER_PORT, port.to_string());
        }
        if let Some(key) = &self.ctx.image_server_key {
            cmd.env(ENV_IMAGE_SERVER_KEY, key);
        }
        if let Some(origin) = request_origin {
            cmd.env(ENV_REQUEST_ORIGIN, origin);
        }
        if manifest.plugin_type == PluginType::Asynchronous {
            cmd.env(ENV_CALLBACK_PLUGIN_NAME, name);
            if let Some(url) = &self.ctx.callback_base_url {
                cmd.env(ENV_CALLBACK_BASE_URL, url);
            }
        }

        cmd.spawn().map_err(|e| ExecError::SpawnFailed {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    // ─── Synchronous discipline ──────────────────────────────────────────────

    async fn execute_sync(
        &self,
        name: &str,
        mut child: Child,
        payload: Vec<u8>,
        timeout: std::time::Duration,
        mut capture: StderrCapture,
    ) -> ExecResult<PluginOutput> {
        let drive = async {
            write_stdin(&mut child, &payload, name).await;

            let mut stdout = child.stdout.take().ok_or_else(|| ExecError::Io {
                name: name.to_string(),
                reason: "child stdout not captured".into(),
            })?;
            let mut out = Vec::new();
            let overflowed = read_capped(&mut stdout, MAX_STDOUT_BYTES, &mut out)
                .await
                .map_err(|e| io_error(name, e))?;
            if overflowed {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(ExecError::OversizedOutput {
                    name: name.to_string(),
                    stream: "stdout",
                    limit: MAX_STDOUT_BYTES,
                });
            }
            let status = child.wait().await.map_err(|e| io_error(name, e))?;
            Ok((out, status))
        };

        // Bind before matching so the drive future (borrowing `child`) is
        // dropped and the timeout branch can kill the process.
        let outcome = tokio::time::timeout(timeout, drive).await;
        let (out, status) = match outcome {
            Ok(result) => result?,
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(ExecError::Timeout {
                    name: name.to_string(),
                    after_ms: timeout.as_millis() as u64,
                    stderr_tail: capture.tail().await,
                });
            }
        };

        if capture.overflowed() {
            return Err(ExecError::OversizedOutput {
                name: name.to_string(),
                stream: "stderr",
                limit: MAX_STDERR_BYTES,
            });
        }

        let output = match parse_full_stdout(&out) {
            Ok(output) => output,
            Err(detail) => {
                return Err(ExecError::MalformedOutput {
                    name: name.to_string(),
                    detail,
                    stderr_tail: capture.tail().await,
                });
            }
        };
        if !status.success() && output.is_success() {
            warn!(
                plugin = %name,
                %status,
                "Plugin exited non-zero but reported success JSON — trusting the output"
            );
        }
        Ok(output)
    }

    // ─── Asynchronous discipline ─────────────────────────────────────────────

    async fn execute_async(
        &self,
        name: &str,
        mut child: Child,
        payload: Vec<u8>,
        timeout: std::time::Duration,
        mut capture: StderrCapture,
    ) -> ExecResult<PluginOutput> {
        let drive = drive_async_ack(&mut child, payload, name);

        // Bind before matching so the drive future (borrowing `child`) is
        // dropped and the timeout branch can kill the process.
        let outcome = tokio::time::timeout(timeout, drive).await;
        let ack = match outcome {
            Ok(Ok(ack)) => ack,
            Ok(Err(ExecError::MalformedOutput { name, detail, .. })) => {
                // Attach the stderr tail here; the drive has no capture.
                return Err(ExecError::MalformedOutput {
                    name,
                    detail,
                    stderr_tail: capture.tail().await,
                });
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(ExecError::Timeout {
                    name: name.to_string(),
                    after_ms: timeout.as_millis() as u64,
                    stderr_tail: capture.tail().await,
                });
            }
        };

        let output: PluginOutput = match serde_json::from_slice(&ack.json) {
            Ok(output) => output,
            Err(e) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(ExecError::MalformedOutput {
                    name: name.to_string(),
                    detail: format!("acknowledgement object did not parse: {e}"),
                    stderr_tail: capture.tail().await,
                });
            }
        };

        // Ack delivered — the child now runs to natural completion under its
        // own responsibility. Remaining stdout is discarded; the background
        // task only reaps the exit status.
        let bg_name = name.to_string();
        let mut remaining = ack.stdout;
        tokio::spawn(async move {
            let mut sink = tokio::io::sink();
            if let Some(stdout) = remaining.take() {
                let mut stdout = stdout;
                let _ = tokio::io::copy(&mut stdout, &mut sink).await;
            }
            match child.wait().await {
                Ok(status) => {
                    debug!(plugin = %bg_name, %status, "Asynchronous plugin exited after ack")
                }
                Err(e) => {
                    warn!(plugin = %bg_name, error = %e, "Failed to reap asynchronous plugin")
                }
            }
        });

        Ok(output)
    }
}

/// First-ack scan result: the JSON bytes plus the stdout handle for the
/// background drain.
struct AsyncAck {
    json: Vec<u8>,
    stdout: Option<ChildStdout>,
}

async fn drive_async_ack(child: &mut Child, payload: Vec<u8>, name: &str) -> ExecResult<AsyncAck> {
    write_stdin(child, &payload, name).await;

    let mut stdout = child.stdout.take().ok_or_else(|| ExecError::Io {
        name: name.to_string(),
        reason: "child stdout not captured".into(),
    })?;

    let mut scanner = JsonScanner::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = stdout
            .read(&mut chunk)
            .await
            .map_err(|e| io_error(name, e))?;
        if n == 0 {
            // EOF with no complete JSON object.
            let status = child.wait().await.map_err(|e| io_error(name, e))?;
            return Err(ExecError::MalformedOutput {
                name: name.to_string(),
                detail: format!("exited ({status}) before emitting an acknowledgement"),
                stderr_tail: String::new(),
            });
        }
        if let Some(json) = scanner.push(&chunk[..n]) {
            return Ok(AsyncAck {
                json,
                stdout: Some(stdout),
            });
        }
        if scanner.buffered() > MAX_STDOUT_BYTES {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(ExecError::OversizedOutput {
                name: name.to_string(),
                stream: "stdout",
                limit: MAX_STDOUT_BYTES,
            });
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Writes the payload to the child's stdin and closes it.
///
/// Write failures are deliberately non-fatal: a plugin that produces its
/// output without reading stdin closes the pipe early, and the result on
/// stdout is still authoritative.
async fn write_stdin(child: &mut Child, payload: &[u8], name: &str) {
    let Some(mut stdin) = child.stdin.take() else {
        return;
    };
    if let Err(e) = stdin.write_all(payload).await {
        debug!(plugin = %name, error = %e, "Plugin closed stdin before the payload was fully written");
        return;
    }
    if let Err(e) = stdin.shutdown().await {
        debug!(plugin = %name, error = %e, "Failed to close plugin stdin");
    }
}

/// Reads `r` to EOF into `buf`, stopping at `cap` bytes.
///
/// Returns `true` when the cap was hit (the source may have more data).
async fn read_capped<R: AsyncRead + Unpin>(
    r: &mut R,
    cap: usize,
    buf: &mut Vec<u8>,
) -> std::io::Result<bool> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = r.read(&mut chunk).await?;
        if n == 0 {
            return Ok(false);
        }
        if buf.len() + n > cap {
            let room = cap - buf.len();
            buf.extend_from_slice(&chunk[..room]);
            return Ok(true);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Bounded stderr capture running on its own task.
struct StderrCapture {
    buf: Arc<Mutex<Vec<u8>>>,
    overflow: Arc<AtomicBool>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl StderrCapture {
    fn attach(child: &mut Child) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let overflow = Arc::new(AtomicBool::new(false));
        let task = child.stderr.take().map(|stderr| {
            tokio::spawn(drain_stderr(
                stderr,
                Arc::clone(&buf),
                Arc::clone(&overflow),
            ))
        });
        Self {
            buf,
            overflow,
            task,
        }
    }

    fn overflowed(&self) -> bool {
        self.overflow.load(Ordering::Relaxed)
    }

    /// Lossy UTF-8 render of the last [`STDERR_TAIL_BYTES`] of stderr.
    ///
    /// Gives the drain task a short grace period so bytes the child wrote
    /// right before exiting are included.
    async fn tail(&mut self) -> String {
        if let Some(task) = self.task.take() {
            let _ = tokio::time::timeout(std::time::Duration::from_millis(250), task).await;
        }
        let guard = self.buf.lock();
        let start = guard.len().saturating_sub(STDERR_TAIL_BYTES);
        String::from_utf8_lossy(&guard[start..]).into_owned()
    }
}

/// Background drain of a child's stderr into a shared bounded buffer.
async fn drain_stderr(
    mut stderr: tokio::process::ChildStderr,
    buf: Arc<Mutex<Vec<u8>>>,
    overflow: Arc<AtomicBool>,
) {
    let mut chunk = [0u8; 8192];
    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let mut guard = buf.lock();
                if guard.len() + n > MAX_STDERR_BYTES {
                    let room = MAX_STDERR_BYTES - guard.len();
                    guard.extend_from_slice(&chunk[..room]);
                    drop(guard);
                    overflow.store(true, Ordering::Relaxed);
                    // Keep draining so the child is never blocked on a full
                    // pipe; the excess is discarded.
                } else {
                    guard.extend_from_slice(&chunk[..n]);
                }
            }
        }
    }
}

fn io_error(name: &str, e: std::io::Error) -> ExecError {
    ExecError::Io {
        name: name.to_string(),
        reason: e.to_string(),
    }
}

/// Interprets the full accumulated stdout of a synchronous plugin.
///
/// The whole (trimmed) capture is parsed first; if that fails, the first
/// complete top-level JSON object embedded in the stream is tried, so a
/// plugin that prints a banner before its result still resolves. The error
/// value is the parse-failure detail.
fn parse_full_stdout(out: &[u8]) -> Result<PluginOutput, String> {
    let text = String::from_utf8_lossy(out);
    let trimmed = text.trim();
    match serde_json::from_str::<PluginOutput>(trimmed) {
        Ok(output) => Ok(output),
        Err(primary) => {
            let mut scanner = JsonScanner::new();
            if let Some(candidate) = scanner.push(out)
                && let Ok(output) = serde_json::from_slice::<PluginOutput>(&candidate)
            {
                return Ok(output);
            }
            if trimmed.is_empty() {
                Err("stdout was empty".to_string())
            } else {
                Err(primary.to_string())
            }
        }
    }
}
