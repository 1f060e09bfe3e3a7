//! # VCP Core
//!
//! Data model and cross-crate contracts of the VCP plugin orchestration
//! runtime.
//!
//! This crate carries everything more than one component needs to agree on:
//!
//! - **Manifests** ([`manifest`]): the declarative plugin record, its closed
//!   type set, and effective-configuration resolution.
//! - **Protocols** ([`protocol`]): the stdio result object plugins emit and
//!   the control-channel frames exchanged with remote worker nodes.
//! - **Placeholders** ([`placeholder`]): the global placeholder table with
//!   its sentinel and non-regression rules.
//! - **Messages** ([`message`]): the chat message array preprocessors
//!   transform.
//! - **Bridge contracts** ([`bridge`]): the trait pair exchanged between the
//!   manifest store and the distributed bridge at construction, keeping the
//!   two components decoupled.
//! - **Errors** ([`error`]): `thiserror` enums for the failures that cross
//!   crate boundaries.
//!
//! Component implementations live in their own crates: `vcp-executor`
//! (stdio subprocess execution), `vcp-pipeline` (message preprocessing),
//! `vcp-bridge` (distributed registry), `vcp-runtime` (store, refresher,
//! dispatcher, orchestration).

pub mod bridge;
pub mod error;
pub mod manifest;
pub mod message;
pub mod placeholder;
pub mod protocol;

pub use bridge::{RemoteRegistry, ToolRouter};
pub use error::{
    BridgeError, BridgeResult, ManifestError, ManifestResult, PreprocessError, PreprocessResult,
    StoreError, StoreResult,
};
pub use manifest::{
    Capabilities, Communication, ConfigValue, ConfigValueType, EntryPoint, InvocationCommand,
    PluginManifest, PluginType, Protocol, SystemPromptPlaceholder, parse_env_config,
};
pub use message::ChatMessage;
pub use placeholder::PlaceholderTable;
pub use protocol::{FILE_NOT_FOUND_CODE, FileFallback, Frame, FrameStatus, PluginOutput};
