//! WebSocket endpoint accepting worker-node control channels.
//!
//! One axum route upgrades each connection, authenticates it, attaches a
//! [`RemoteSession`](crate::session::RemoteSession), and then pumps frames
//! both ways until the socket closes or the keep-alive deadline passes. All
//! protocol behavior lives in [`DistributedBridge`]; this module is only
//! transport.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{
        ConnectInfo, Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use vcp_core::error::BridgeResult;
use vcp_core::protocol::Frame;

use crate::session::DistributedBridge;

/// Configuration of the bridge endpoint.
#[derive(Debug, Clone)]
pub struct BridgeServerConfig {
    /// Bind address, e.g. `0.0.0.0:5890`.
    pub addr: String,
    /// URL path of the WebSocket route.
    pub path: String,
    /// Shared key nodes must present; `None` disables authentication.
    pub auth_key: Option<String>,
    /// Ping interval; a node silent for two intervals is evicted.
    pub keepalive: Duration,
}

impl Default for BridgeServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:5890".into(),
            path: "/vcp".into(),
            auth_key: None,
            keepalive: Duration::from_secs(30),
        }
    }
}

/// Handle to a running bridge endpoint; dropping it does not stop the
/// server, [`shutdown`](Self::shutdown) does.
pub struct BridgeHandle {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
}

impl BridgeHandle {
    /// The actually bound address (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections and tears the server down.
    pub fn shutdown(self) {
        let _ = self.shutdown.send(());
    }
}

struct ServerState {
    bridge: Arc<DistributedBridge>,
    config: BridgeServerConfig,
}

/// Binds the endpoint and serves it on a background task.
pub async fn serve(
    bridge: Arc<DistributedBridge>,
    config: BridgeServerConfig,
) -> BridgeResult<BridgeHandle> {
    let path = if config.path.starts_with('/') {
        config.path.clone()
    } else {
        format!("/{}", config.path)
    };

    let listener = tokio::net::TcpListener::bind(&config.addr).await?;
    let local_addr = listener.local_addr()?;

    let state = Arc::new(ServerState {
        bridge,
        config: config.clone(),
    });
    let router = Router::new()
        .route(&path, get(ws_handler))
        .with_state(state);

    info!(addr = %local_addr, path = %path, "Distributed bridge listening");

    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        let server = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        );
        tokio::select! {
            result = server => {
                if let Err(e) = result {
                    warn!(error = %e, "Bridge server error");
                }
            }
            _ = &mut shutdown_rx => {
                info!("Bridge server shutting down");
            }
        }
    });

    Ok(BridgeHandle {
        local_addr,
        shutdown: shutdown_tx,
    })
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    // Authenticate before the upgrade: no session exists for a bad key.
    if let Some(expected) = &state.config.auth_key {
        let provided = params
            .get("key")
            .map(String::as_str)
            .or_else(|| {
                headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.strip_prefix("Bearer "))
            })
            .unwrap_or_default();
        if provided != expected {
            warn!(remote_addr = %addr, "Bridge connection rejected: invalid auth key");
            return (StatusCode::UNAUTHORIZED, "invalid auth key").into_response();
        }
    }

    let server_id = params
        .get("serverId")
        .cloned()
        .or_else(|| {
            headers
                .get("x-server-id")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    info!(remote_addr = %addr, server_id = %server_id, "Bridge connection accepted");
    ws.on_upgrade(move |socket| handle_socket(socket, addr, state, server_id))
        .into_response()
}

async fn handle_socket(
    socket: WebSocket,
    addr: SocketAddr,
    state: Arc<ServerState>,
    server_id: String,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Frame>(256);

    let session = match state
        .bridge
        .attach_session(&server_id, &addr.to_string(), tx)
        .await
    {
        Ok(session) => session,
        Err(e) => {
            warn!(server_id = %server_id, error = %e, "Closing duplicate bridge connection");
            let _ = ws_tx.send(Message::Close(None)).await;
            return;
        }
    };

    let cancel = CancellationToken::new();

    // Outbound pump: session frame queue → socket.
    let send_task = {
        let cancel = cancel.clone();
        let server_id = server_id.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    frame = rx.recv() => frame,
                    _ = cancel.cancelled() => None,
                };
                let Some(frame) = frame else { break };
                let json = match serde_json::to_string(&frame) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(server_id = %server_id, error = %e, "Failed to serialize frame");
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    debug!(server_id = %server_id, "Socket closed while sending");
                    break;
                }
            }
        })
    };

    // Keep-alive: ping every interval, evict after two silent intervals.
    let keepalive_task = {
        let cancel = cancel.clone();
        let session = Arc::clone(&session);
        let keepalive = state.config.keepalive;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(keepalive);
            ticker.tick().await; // immediate first tick
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = cancel.cancelled() => break,
                }
                if session.idle_for() > keepalive * 2 {
                    warn!(server_id = %session.server_id(), "Keep-alive missed — closing session");
                    cancel.cancel();
                    break;
                }
                if session.send(Frame::Ping).await.is_err() {
                    break;
                }
            }
        })
    };

    // Inbound pump: socket → protocol handler.
    loop {
        let message = tokio::select! {
            message = ws_rx.next() => message,
            _ = cancel.cancelled() => None,
        };
        let Some(message) = message else { break };
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<Frame>(text.as_str()) {
                Ok(frame) => state.bridge.handle_frame(&session, frame).await,
                Err(e) => {
                    warn!(server_id = %server_id, error = %e, "Unparseable frame — ignored")
                }
            },
            Ok(Message::Binary(data)) => match serde_json::from_slice::<Frame>(&data) {
                Ok(frame) => state.bridge.handle_frame(&session, frame).await,
                Err(e) => {
                    warn!(server_id = %server_id, error = %e, "Unparseable binary frame — ignored")
                }
            },
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                trace!(server_id = %server_id, "Transport keep-alive");
                session.touch();
            }
            Ok(Message::Close(_)) => {
                info!(server_id = %server_id, "Bridge connection closed by node");
                break;
            }
            Err(e) => {
                warn!(server_id = %server_id, error = %e, "Bridge socket error");
                break;
            }
        }
    }

    cancel.cancel();
    send_task.abort();
    keepalive_task.abort();
    state.bridge.detach_session(&server_id).await;
}
