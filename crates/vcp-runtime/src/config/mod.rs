//! Runtime configuration.
//!
//! Loaded from `vcp.yaml` (file + `VCP_`-prefixed environment variables via
//! figment) and validated before the runtime starts.

mod loader;
mod schema;
mod validation;

pub use loader::ConfigLoader;
pub use schema::{
    BridgeConfig, LogFormat, LoggingConfig, PluginDirConfig, RuntimeConfig, ServerConfig,
};
pub use validation::validate_config;
