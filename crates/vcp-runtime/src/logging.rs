//! Logging setup for the VCP runtime.
//!
//! Unified `tracing` subscriber initialization: environment-based filtering
//! via `RUST_LOG`, a configurable default directive, and pretty or JSON
//! output (the latter behind the `json-log` feature).
//!
//! # Example
//!
//! ```rust,ignore
//! use vcp_runtime::logging::LoggingBuilder;
//!
//! LoggingBuilder::new()
//!     .directive("vcp_runtime=debug,vcp_executor=trace")
//!     .init();
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::{LogFormat, LoggingConfig};

/// Guard against double initialization across runtime instances.
static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Builder for the global tracing subscriber.
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    directive: String,
    format: LogFormat,
}

impl LoggingBuilder {
    /// Creates a builder with the default `info` directive.
    pub fn new() -> Self {
        Self {
            directive: "info".into(),
            format: LogFormat::Pretty,
        }
    }

    /// Builder from a [`LoggingConfig`] section.
    pub fn from_config(config: &LoggingConfig) -> Self {
        Self {
            directive: config.level.clone(),
            format: config.format,
        }
    }

    /// Sets the default filter directive used when `RUST_LOG` is unset.
    pub fn directive(mut self, directive: impl Into<String>) -> Self {
        self.directive = directive.into();
        self
    }

    /// Sets the output format.
    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Installs the global subscriber.
    ///
    /// Safe to call more than once: only the first call wins, later calls
    /// are no-ops.
    pub fn init(self) {
        if LOGGING_INITIALIZED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.directive));

        match self.format {
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(fmt::layer())
                    .with(env_filter)
                    .init();
            }
            #[cfg(feature = "json-log")]
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(fmt::layer().json())
                    .with(env_filter)
                    .init();
            }
            #[cfg(not(feature = "json-log"))]
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(fmt::layer())
                    .with(env_filter)
                    .init();
                tracing::warn!(
                    "JSON log format requested but the 'json-log' feature is disabled — using pretty output"
                );
            }
        }
    }
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Initializes logging with default settings (`info`, pretty).
pub fn init() {
    LoggingBuilder::new().init();
}

/// Initializes logging with a custom filter string.
pub fn init_with_filter(filter: &str) {
    LoggingBuilder::new().directive(filter).init();
}
