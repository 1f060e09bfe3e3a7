//! Configuration schema definitions.
//!
//! # Configuration Hierarchy
//!
//! ```text
//! RuntimeConfig
//! ├── logging: LoggingConfig     # log level / format
//! ├── server: ServerConfig       # values exposed to plugin processes
//! ├── plugins: PluginDirConfig   # discovery root, order file, debounce
//! └── bridge: BridgeConfig       # distributed bridge endpoint
//! ```
//!
//! # Example (`vcp.yaml`)
//!
//! ```yaml
//! logging:
//!   level: debug
//!
//! server:
//!   port: 6005
//!   callback_base_url: "http://127.0.0.1:6005/plugin-callback"
//!
//! plugins:
//!   root: Plugin
//!   reload_debounce_ms: 500
//!
//! bridge:
//!   enabled: true
//!   addr: "0.0.0.0:5890"
//!   auth_key: "change-me"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration structure for the VCP runtime.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Host values exposed to plugin subprocesses.
    pub server: ServerConfig,

    /// Plugin discovery and hot-reload settings.
    pub plugins: PluginDirConfig,

    /// Distributed bridge endpoint settings.
    pub bridge: BridgeConfig,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Pretty,
    /// Newline-delimited JSON (requires the `json-log` feature).
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::default(),
        }
    }
}

/// Host values surfaced into plugin environments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port of the surrounding HTTP layer.
    pub port: u16,
    /// Root directory of the installation; defaults to the current dir.
    pub project_base_path: Option<PathBuf>,
    /// Base URL asynchronous plugins post completion events to.
    pub callback_base_url: Option<String>,
    /// Access key of the image server.
    pub image_server_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 6005,
            project_base_path: None,
            callback_base_url: None,
            image_server_key: None,
        }
    }
}

/// Plugin discovery and hot-reload settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginDirConfig {
    /// Directory scanned one level deep for plugin directories.
    pub root: PathBuf,
    /// Path of the persisted preprocessor order file.
    pub preprocessor_order_file: PathBuf,
    /// Quiescence window collapsing filesystem event bursts into one reload.
    pub reload_debounce_ms: u64,
}

impl Default for PluginDirConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("Plugin"),
            preprocessor_order_file: PathBuf::from("preprocessor-order.json"),
            reload_debounce_ms: 500,
        }
    }
}

impl PluginDirConfig {
    /// The debounce window as a `Duration`.
    pub fn reload_debounce(&self) -> Duration {
        Duration::from_millis(self.reload_debounce_ms)
    }
}

/// Distributed bridge endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Whether to expose the bridge endpoint at all.
    pub enabled: bool,
    /// Bind address of the WebSocket endpoint.
    pub addr: String,
    /// URL path of the WebSocket route.
    pub path: String,
    /// Shared key worker nodes must present; `None` disables auth.
    pub auth_key: Option<String>,
    /// Ping interval in seconds; two silent intervals evict the node.
    pub keepalive_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: "0.0.0.0:5890".into(),
            path: "/vcp".into(),
            auth_key: None,
            keepalive_secs: 30,
        }
    }
}

impl BridgeConfig {
    /// The keep-alive interval as a `Duration`.
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}
