//! Configuration file loader.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use tracing::{debug, info};

use super::schema::RuntimeConfig;
use super::validation::validate_config;
use crate::error::{ConfigError, ConfigResult};

/// File names probed in each search path, in order.
const CONFIG_NAMES: &[&str] = &["vcp.yaml", "vcp.yml"];

/// Configuration loader with support for multiple sources.
///
/// Sources are layered: the first YAML file found in the search paths,
/// overridden by `VCP_`-prefixed environment variables
/// (`VCP_SERVER__PORT=7000` sets `server.port`).
pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Creates a new configuration loader with no search paths.
    pub fn new() -> Self {
        Self {
            search_paths: Vec::new(),
        }
    }

    /// Adds a search path for configuration files.
    pub fn add_search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Adds the current directory to search paths.
    pub fn with_current_dir(self) -> Self {
        if let Ok(cwd) = std::env::current_dir() {
            self.add_search_path(cwd)
        } else {
            self
        }
    }

    /// Adds the user config directory (`~/.config/vcp`) to search paths.
    pub fn with_user_config_dir(self) -> Self {
        if let Some(config_dir) = dirs::config_dir() {
            self.add_search_path(config_dir.join("vcp"))
        } else {
            self
        }
    }

    /// Loads configuration from the first available source.
    pub fn load(&self) -> ConfigResult<RuntimeConfig> {
        if let Some(path) = self.find_config_file() {
            return self.load_from_file(&path);
        }
        info!("No configuration file found, using defaults");
        let config = self.extract(Figment::new())?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Loads configuration from a specific file.
    pub fn load_from_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<RuntimeConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let config = self.extract(Figment::new().merge(Yaml::file(path)))?;
        validate_config(&config)?;
        debug!("Configuration loaded successfully");
        Ok(config)
    }

    /// Loads configuration from a YAML string.
    pub fn load_from_str(&self, yaml: &str) -> ConfigResult<RuntimeConfig> {
        let config = self.extract(Figment::new().merge(Yaml::string(yaml)))?;
        validate_config(&config)?;
        Ok(config)
    }

    fn extract(&self, figment: Figment) -> ConfigResult<RuntimeConfig> {
        figment
            .merge(Env::prefixed("VCP_").split("__"))
            .extract()
            .map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Finds the first available configuration file.
    fn find_config_file(&self) -> Option<PathBuf> {
        for dir in &self.search_paths {
            for name in CONFIG_NAMES {
                let candidate = dir.join(name);
                if candidate.exists() {
                    return Some(candidate);
                }
            }
        }
        None
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
