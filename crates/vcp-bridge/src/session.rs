//! Remote sessions, the correlator, and frame handling.
//!
//! One [`RemoteSession`] exists per connected worker node, keyed by an
//! opaque server id. Tool and file requests sent to the node are tied to
//! their responses by a fresh correlation id; the waiter sits in the
//! session's correlator map until the response frame arrives, the deadline
//! fires, or the session ends.
//!
//! Correlator insertion and completion are atomic with respect to eviction:
//! both run under the session lock, and the lock also carries the `closed`
//! flag, so an eviction racing a late insert or response can never leak a
//! waiter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use vcp_core::bridge::{RemoteRegistry, ToolRouter};
use vcp_core::error::{BridgeError, BridgeResult};
use vcp_core::protocol::{Frame, FrameStatus};

/// Deadline for file fetches over the channel.
const FILE_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

// =============================================================================
// RemoteSession
// =============================================================================

#[derive(Debug)]
struct SessionState {
    closed: bool,
    pending_tools: HashMap<Uuid, oneshot::Sender<BridgeResult<Value>>>,
    pending_files: HashMap<Uuid, oneshot::Sender<BridgeResult<String>>>,
}

/// One connected worker node.
#[derive(Debug)]
pub struct RemoteSession {
    server_id: String,
    remote_addr: String,
    outbound: mpsc::Sender<Frame>,
    state: Mutex<SessionState>,
    last_seen: Mutex<Instant>,
}

impl RemoteSession {
    fn new(server_id: String, remote_addr: String, outbound: mpsc::Sender<Frame>) -> Self {
        Self {
            server_id,
            remote_addr,
            outbound,
            state: Mutex::new(SessionState {
                closed: false,
                pending_tools: HashMap::new(),
                pending_files: HashMap::new(),
            }),
            last_seen: Mutex::new(Instant::now()),
        }
    }

    /// The node's opaque server id.
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// The transport-level peer address.
    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    /// Records liveness; called on every inbound frame.
    pub fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last inbound frame.
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Queues a frame to the node.
    pub async fn send(&self, frame: Frame) -> BridgeResult<()> {
        self.outbound
            .send(frame)
            .await
            .map_err(|e| BridgeError::SendFailed(e.to_string()))
    }

    fn disconnected(&self) -> BridgeError {
        BridgeError::Disconnected {
            server_id: self.server_id.clone(),
        }
    }

    fn register_tool_waiter(
        &self,
        id: Uuid,
        tx: oneshot::Sender<BridgeResult<Value>>,
    ) -> BridgeResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(self.disconnected());
        }
        state.pending_tools.insert(id, tx);
        Ok(())
    }

    fn register_file_waiter(
        &self,
        id: Uuid,
        tx: oneshot::Sender<BridgeResult<String>>,
    ) -> BridgeResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(self.disconnected());
        }
        state.pending_files.insert(id, tx);
        Ok(())
    }

    fn remove_tool_waiter(&self, id: &Uuid) {
        self.state.lock().pending_tools.remove(id);
    }

    fn remove_file_waiter(&self, id: &Uuid) {
        self.state.lock().pending_files.remove(id);
    }

    fn complete_tool(&self, id: Uuid, result: BridgeResult<Value>) -> bool {
        match self.state.lock().pending_tools.remove(&id) {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    fn complete_file(&self, id: Uuid, result: BridgeResult<String>) -> bool {
        match self.state.lock().pending_files.remove(&id) {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    /// Marks the session closed and wakes every outstanding waiter with a
    /// disconnect error.
    fn fail_all_waiters(&self) {
        let (tools, files) = {
            let mut state = self.state.lock();
            state.closed = true;
            (
                std::mem::take(&mut state.pending_tools),
                std::mem::take(&mut state.pending_files),
            )
        };
        for (_, tx) in tools {
            let _ = tx.send(Err(self.disconnected()));
        }
        for (_, tx) in files {
            let _ = tx.send(Err(self.disconnected()));
        }
    }
}

// =============================================================================
// DistributedBridge
// =============================================================================

/// Session registry plus frame routing: the bridge side of the distributed
/// tool federation.
///
/// Constructed with the [`RemoteRegistry`] half of the contract (the
/// manifest store); implements the [`ToolRouter`] half consumed by the
/// dispatcher. Neither side reaches inside the other's state.
pub struct DistributedBridge {
    sessions: RwLock<HashMap<String, Arc<RemoteSession>>>,
    registry: Arc<dyn RemoteRegistry>,
}

impl DistributedBridge {
    pub fn new(registry: Arc<dyn RemoteRegistry>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            registry,
        }
    }

    /// Creates and tracks a session for a newly connected node.
    ///
    /// `outbound` is the transport's frame queue. Fails when the server id
    /// is already connected — the existing session stays.
    pub async fn attach_session(
        &self,
        server_id: &str,
        remote_addr: &str,
        outbound: mpsc::Sender<Frame>,
    ) -> BridgeResult<Arc<RemoteSession>> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(server_id) {
            return Err(BridgeError::DuplicateSession {
                server_id: server_id.to_string(),
            });
        }
        let session = Arc::new(RemoteSession::new(
            server_id.to_string(),
            remote_addr.to_string(),
            outbound,
        ));
        sessions.insert(server_id.to_string(), Arc::clone(&session));
        info!(server_id, remote_addr, "Distributed session attached");
        Ok(session)
    }

    /// Ends a session: removes it, wakes its waiters with a disconnect
    /// error, and evicts every tool and placeholder it owns.
    ///
    /// Idempotent; called on clean close, transport error, keep-alive miss,
    /// and administrative eviction alike.
    pub async fn detach_session(&self, server_id: &str) {
        let removed = self.sessions.write().await.remove(server_id);
        let Some(session) = removed else {
            return;
        };
        session.fail_all_waiters();
        self.registry.evict_session(server_id).await;
        info!(server_id, "Distributed session detached and evicted");
    }

    /// Number of currently connected sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Connected server ids.
    pub async fn session_ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    async fn session(&self, server_id: &str) -> Option<Arc<RemoteSession>> {
        self.sessions.read().await.get(server_id).cloned()
    }

    /// Applies one inbound frame from `session`'s node.
    pub async fn handle_frame(&self, session: &Arc<RemoteSession>, frame: Frame) {
        session.touch();
        match frame {
            Frame::RegisterTools { tools } => {
                let offered = tools.len();
                let accepted = self
                    .registry
                    .register_remote_tools(session.server_id(), tools)
                    .await;
                info!(
                    server_id = %session.server_id(),
                    offered,
                    accepted,
                    "Remote tools registered"
                );
            }
            Frame::UpdatePlaceholders { placeholders } => {
                self.registry
                    .update_remote_placeholders(session.server_id(), placeholders)
                    .await;
            }
            Frame::ToolResponse {
                id,
                status,
                payload,
            } => {
                let result = match status {
                    FrameStatus::Success => Ok(payload),
                    FrameStatus::Error => Err(BridgeError::Remote {
                        message: payload
                            .get("error")
                            .and_then(Value::as_str)
                            .unwrap_or("remote tool failed")
                            .to_string(),
                        payload,
                    }),
                };
                if !session.complete_tool(id, result) {
                    debug!(
                        server_id = %session.server_id(),
                        correlation_id = %id,
                        "Tool response arrived after its waiter was gone — dropped"
                    );
                }
            }
            Frame::FileResponse {
                id,
                status,
                base64_data,
                error,
            } => {
                let result = match (status, base64_data) {
                    (FrameStatus::Success, Some(data)) => Ok(data),
                    (FrameStatus::Success, None) => Err(BridgeError::FileFetch {
                        reason: "success response carried no data".into(),
                    }),
                    (FrameStatus::Error, _) => Err(BridgeError::FileFetch {
                        reason: error.unwrap_or_else(|| "remote fetch failed".into()),
                    }),
                };
                if !session.complete_file(id, result) {
                    debug!(
                        server_id = %session.server_id(),
                        correlation_id = %id,
                        "File response arrived after its waiter was gone — dropped"
                    );
                }
            }
            Frame::Ping => {
                let _ = session.send(Frame::Pong).await;
            }
            Frame::Pong => {}
            Frame::ToolRequest { .. } | Frame::FileRequest { .. } => {
                warn!(
                    server_id = %session.server_id(),
                    "Node sent a request frame in the wrong direction — ignored"
                );
            }
        }
    }
}

fn origin_matches(origin: &str, remote_addr: &str) -> bool {
    if origin == remote_addr {
        return true;
    }
    let host = remote_addr
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(remote_addr);
    !host.is_empty() && origin.contains(host)
}

#[async_trait]
impl ToolRouter for DistributedBridge {
    async fn execute_remote(
        &self,
        server_id: &str,
        tool_name: &str,
        args: Value,
        timeout: Duration,
    ) -> BridgeResult<Value> {
        let session = self
            .session(server_id)
            .await
            .ok_or_else(|| BridgeError::SessionNotFound {
                server_id: server_id.to_string(),
            })?;

        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        session.register_tool_waiter(id, tx)?;

        let request = Frame::ToolRequest {
            id,
            tool_name: tool_name.to_string(),
            args,
        };
        if let Err(e) = session.send(request).await {
            session.remove_tool_waiter(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(session.disconnected()),
            Err(_) => {
                session.remove_tool_waiter(&id);
                warn!(
                    server_id,
                    tool_name,
                    correlation_id = %id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Remote tool call timed out"
                );
                Err(BridgeError::Timeout {
                    tool_name: tool_name.to_string(),
                    after_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn fetch_file(&self, origin: &str, file_url: &str) -> BridgeResult<String> {
        let session = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .find(|s| origin_matches(origin, s.remote_addr()))
                .cloned()
        }
        .ok_or_else(|| BridgeError::FileFetch {
            reason: format!("no connected session matches origin '{origin}'"),
        })?;

        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        session.register_file_waiter(id, tx)?;

        let request = Frame::FileRequest {
            id,
            file_url: file_url.to_string(),
        };
        if let Err(e) = session.send(request).await {
            session.remove_file_waiter(&id);
            return Err(e);
        }

        match tokio::time::timeout(FILE_FETCH_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(session.disconnected()),
            Err(_) => {
                session.remove_file_waiter(&id);
                Err(BridgeError::FileFetch {
                    reason: format!("no response for '{file_url}' within the deadline"),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;
    use vcp_core::manifest::PluginManifest;

    #[derive(Default)]
    struct MockRegistry {
        registered: Mutex<Vec<(String, usize)>>,
        placeholders: Mutex<Vec<(String, StdHashMap<String, String>)>>,
        evicted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RemoteRegistry for MockRegistry {
        async fn register_remote_tools(
            &self,
            server_id: &str,
            manifests: Vec<PluginManifest>,
        ) -> usize {
            let count = manifests.len();
            self.registered
                .lock()
                .push((server_id.to_string(), count));
            count
        }

        async fn update_remote_placeholders(
            &self,
            server_id: &str,
            values: StdHashMap<String, String>,
        ) {
            self.placeholders
                .lock()
                .push((server_id.to_string(), values));
        }

        async fn evict_session(&self, server_id: &str) {
            self.evicted.lock().push(server_id.to_string());
        }
    }

    fn bridge() -> (Arc<DistributedBridge>, Arc<MockRegistry>) {
        let registry = Arc::new(MockRegistry::default());
        (
            Arc::new(DistributedBridge::new(registry.clone())),
            registry,
        )
    }

    fn manifest(name: &str) -> PluginManifest {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "pluginType": "synchronous",
            "entryPoint": { "command": "remote" }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn register_frame_reaches_registry() {
        let (bridge, registry) = bridge();
        let (tx, _rx) = mpsc::channel(8);
        let session = bridge.attach_session("S1", "10.0.0.2:4100", tx).await.unwrap();

        bridge
            .handle_frame(
                &session,
                Frame::RegisterTools {
                    tools: vec![manifest("T1"), manifest("T2")],
                },
            )
            .await;
        assert_eq!(registry.registered.lock().as_slice(), &[("S1".into(), 2)]);
    }

    #[tokio::test]
    async fn duplicate_server_id_rejected() {
        let (bridge, _) = bridge();
        let (tx, _rx) = mpsc::channel(8);
        bridge.attach_session("S1", "a:1", tx.clone()).await.unwrap();
        let err = bridge.attach_session("S1", "b:2", tx).await.unwrap_err();
        assert!(matches!(err, BridgeError::DuplicateSession { .. }));
        assert_eq!(bridge.session_count().await, 1);
    }

    #[tokio::test]
    async fn remote_call_round_trip() {
        let (bridge, _) = bridge();
        let (tx, mut rx) = mpsc::channel(8);
        let session = bridge.attach_session("S1", "a:1", tx).await.unwrap();

        // Echo node: answer every tool request with its args.
        let bridge_clone = Arc::clone(&bridge);
        let session_clone = Arc::clone(&session);
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Frame::ToolRequest { id, args, .. } = frame {
                    bridge_clone
                        .handle_frame(
                            &session_clone,
                            Frame::ToolResponse {
                                id,
                                status: FrameStatus::Success,
                                payload: args,
                            },
                        )
                        .await;
                }
            }
        });

        let result = bridge
            .execute_remote(
                "S1",
                "T1",
                serde_json::json!({"q": 7}),
                Duration::from_secs(2),
            )
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"q": 7}));
    }

    #[tokio::test]
    async fn remote_error_payload_surfaces() {
        let (bridge, _) = bridge();
        let (tx, mut rx) = mpsc::channel(8);
        let session = bridge.attach_session("S1", "a:1", tx).await.unwrap();

        let bridge_clone = Arc::clone(&bridge);
        let session_clone = Arc::clone(&session);
        tokio::spawn(async move {
            if let Some(Frame::ToolRequest { id, .. }) = rx.recv().await {
                bridge_clone
                    .handle_frame(
                        &session_clone,
                        Frame::ToolResponse {
                            id,
                            status: FrameStatus::Error,
                            payload: serde_json::json!({"error": "remote boom"}),
                        },
                    )
                    .await;
            }
        });

        let err = bridge
            .execute_remote("S1", "T1", Value::Null, Duration::from_secs(2))
            .await
            .unwrap_err();
        match err {
            BridgeError::Remote { message, .. } => assert_eq!(message, "remote boom"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn call_times_out_and_late_response_is_dropped() {
        let (bridge, _) = bridge();
        let (tx, mut rx) = mpsc::channel(8);
        let session = bridge.attach_session("S1", "a:1", tx).await.unwrap();

        let err = bridge
            .execute_remote("S1", "T1", Value::Null, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Timeout { .. }));

        // The request frame was sent; answering it now must be a no-op.
        let Some(Frame::ToolRequest { id, .. }) = rx.recv().await else {
            panic!("request frame missing");
        };
        bridge
            .handle_frame(
                &session,
                Frame::ToolResponse {
                    id,
                    status: FrameStatus::Success,
                    payload: Value::Null,
                },
            )
            .await;
    }

    #[tokio::test]
    async fn detach_fails_outstanding_waiters_and_evicts() {
        let (bridge, registry) = bridge();
        let (tx, _rx) = mpsc::channel(8);
        bridge.attach_session("S1", "a:1", tx).await.unwrap();

        let caller = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move {
                bridge
                    .execute_remote("S1", "T1", Value::Null, Duration::from_secs(5))
                    .await
            })
        };
        // Let the waiter register before detaching.
        tokio::time::sleep(Duration::from_millis(50)).await;
        bridge.detach_session("S1").await;

        let err = caller.await.unwrap().unwrap_err();
        assert!(matches!(err, BridgeError::Disconnected { .. }));
        assert_eq!(registry.evicted.lock().as_slice(), &["S1".to_string()]);
        assert_eq!(bridge.session_count().await, 0);

        // Calls after eviction resolve the unknown session immediately.
        let err = bridge
            .execute_remote("S1", "T1", Value::Null, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::SessionNotFound { .. }));
    }

    #[tokio::test]
    async fn fetch_file_matches_session_by_origin() {
        let (bridge, _) = bridge();
        let (tx, mut rx) = mpsc::channel(8);
        let session = bridge
            .attach_session("S1", "192.168.1.7:52001", tx)
            .await
            .unwrap();

        let bridge_clone = Arc::clone(&bridge);
        let session_clone = Arc::clone(&session);
        tokio::spawn(async move {
            if let Some(Frame::FileRequest { id, .. }) = rx.recv().await {
                bridge_clone
                    .handle_frame(
                        &session_clone,
                        Frame::FileResponse {
                            id,
                            status: FrameStatus::Success,
                            base64_data: Some("aGVsbG8=".into()),
                            error: None,
                        },
                    )
                    .await;
            }
        });

        let data = bridge
            .fetch_file("http://192.168.1.7:3210", "file:///tmp/x.png")
            .await
            .unwrap();
        assert_eq!(data, "aGVsbG8=");

        let err = bridge
            .fetch_file("http://10.9.9.9", "file:///tmp/x.png")
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::FileFetch { .. }));
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let (bridge, _) = bridge();
        let (tx, mut rx) = mpsc::channel(8);
        let session = bridge.attach_session("S1", "a:1", tx).await.unwrap();

        bridge.handle_frame(&session, Frame::Ping).await;
        assert!(matches!(rx.recv().await, Some(Frame::Pong)));
    }
}
