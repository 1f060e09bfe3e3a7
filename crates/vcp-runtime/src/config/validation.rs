//! Configuration validation.

use super::schema::RuntimeConfig;
use crate::error::{ConfigError, ConfigResult};

/// Validates a loaded configuration before the runtime uses it.
pub fn validate_config(config: &RuntimeConfig) -> ConfigResult<()> {
    if config.plugins.root.as_os_str().is_empty() {
        return Err(ConfigError::Invalid(
            "plugins.root must not be empty".into(),
        ));
    }
    if config
        .plugins
        .preprocessor_order_file
        .as_os_str()
        .is_empty()
    {
        return Err(ConfigError::Invalid(
            "plugins.preprocessor_order_file must not be empty".into(),
        ));
    }
    if config.bridge.enabled {
        if config.bridge.addr.is_empty() {
            return Err(ConfigError::Invalid(
                "bridge.addr must not be empty when the bridge is enabled".into(),
            ));
        }
        if config.bridge.keepalive_secs == 0 {
            return Err(ConfigError::Invalid(
                "bridge.keepalive_secs must be greater than zero".into(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        validate_config(&RuntimeConfig::default()).unwrap();
    }

    #[test]
    fn empty_plugin_root_rejected() {
        let mut config = RuntimeConfig::default();
        config.plugins.root = "".into();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn zero_keepalive_rejected_only_when_enabled() {
        let mut config = RuntimeConfig::default();
        config.bridge.keepalive_secs = 0;
        validate_config(&config).unwrap();

        config.bridge.enabled = true;
        assert!(validate_config(&config).is_err());
    }
}
