//! # VCP Bridge
//!
//! Federates tools contributed by remote worker nodes as first-class
//! plugins routable by name.
//!
//! A node opens a persistent WebSocket control channel, announces its tool
//! manifests and placeholder values, and then answers correlated
//! [`Frame::ToolRequest`](vcp_core::protocol::Frame) /
//! [`Frame::FileRequest`](vcp_core::protocol::Frame) frames. When the
//! session ends — clean close, transport drop, or keep-alive miss — every
//! tool and placeholder the node owns is evicted and outstanding waiters
//! fail with a disconnect error.
//!
//! The bridge and the manifest store are wired through the trait pair in
//! [`vcp_core::bridge`]: the bridge consumes `RemoteRegistry` and provides
//! [`ToolRouter`](vcp_core::bridge::ToolRouter).

pub mod server;
pub mod session;

pub use server::{BridgeHandle, BridgeServerConfig, serve};
pub use session::{DistributedBridge, RemoteSession};
