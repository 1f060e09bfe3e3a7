//! Plugin manifest data model.
//!
//! Every plugin — local or distributed — is described by a [`PluginManifest`],
//! the declarative record parsed from the plugin directory's
//! `plugin-manifest.json` (or received over the bridge for remote tools).
//! The manifest is the *only* source of a plugin's identity, invocation
//! contract, and configuration schema; once inserted into the store it is
//! never mutated in place.
//!
//! # Effective configuration
//!
//! A plugin's configuration is layered at call time, first match wins:
//!
//! 1. `config.env` next to the manifest (parsed into
//!    [`plugin_specific_env_config`](PluginManifest::plugin_specific_env_config))
//! 2. the process environment
//!
//! Raw values are strings; a [`config_schema`](PluginManifest::config_schema)
//! entry coerces them to [`ConfigValue::Integer`] / [`ConfigValue::Boolean`]
//! on read. Resolution is deterministic in the manifest and the current
//! process environment — there is no hidden state between calls.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ManifestError;

/// Default timeout for `synchronous` plugin invocations.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(60);
/// Default timeout for `asynchronous` plugin invocations (initial ack).
pub const DEFAULT_ASYNC_TIMEOUT: Duration = Duration::from_secs(1800);
/// Default timeout for `static` plugin refresh runs.
pub const DEFAULT_STATIC_TIMEOUT: Duration = Duration::from_secs(30);

/// Manifest file name expected inside each plugin directory.
pub const MANIFEST_FILE: &str = "plugin-manifest.json";
/// Optional per-plugin config file, line-oriented `KEY=VALUE`.
pub const CONFIG_ENV_FILE: &str = "config.env";

// =============================================================================
// Plugin type & communication
// =============================================================================

/// The closed set of plugin kinds the runtime knows how to drive.
///
/// The variant decides the invocation path: subprocess stdio
/// ([`Synchronous`](Self::Synchronous) / [`Asynchronous`](Self::Asynchronous)),
/// scheduled refresh ([`Static`](Self::Static)), in-process message
/// transformation ([`MessagePreprocessor`](Self::MessagePreprocessor)), or
/// direct function call ([`Service`](Self::Service) /
/// [`HybridService`](Self::HybridService)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginType {
    /// Runs on a cron schedule; stdout becomes placeholder values.
    #[serde(rename = "static")]
    Static,
    /// One-shot subprocess: stdin in, one JSON object out at exit.
    #[serde(rename = "synchronous")]
    Synchronous,
    /// Subprocess acked by its first stdout JSON object, then backgrounded.
    #[serde(rename = "asynchronous")]
    Asynchronous,
    /// In-process transformer applied to chat message arrays.
    #[serde(rename = "messagePreprocessor")]
    MessagePreprocessor,
    /// In-process module invoked by direct function call.
    #[serde(rename = "service")]
    Service,
    /// Service that is additionally invocable as a tool.
    #[serde(rename = "hybridservice")]
    HybridService,
}

impl PluginType {
    /// Whether invocations of this type go through the stdio executor.
    pub fn is_subprocess(self) -> bool {
        matches!(self, Self::Synchronous | Self::Asynchronous | Self::Static)
    }

    /// Whether this type is dispatchable as a tool by name.
    pub fn is_tool(self) -> bool {
        matches!(
            self,
            Self::Synchronous | Self::Asynchronous | Self::Service | Self::HybridService
        )
    }
}

/// Transport a plugin speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// JSON on stdin/stdout of a spawned child process.
    #[default]
    Stdio,
    /// Direct in-process function call.
    Direct,
}

/// How to start a plugin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryPoint {
    /// Shell-style command line; split into argv on invocation.
    #[serde(default)]
    pub command: Option<String>,
    /// In-process module selector for preprocessor / service plugins.
    #[serde(default)]
    pub script: Option<String>,
}

/// Communication block of a manifest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Communication {
    #[serde(default)]
    pub protocol: Protocol,
    /// Per-invocation timeout override, in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

// =============================================================================
// Capabilities
// =============================================================================

/// One callable command a plugin advertises, used to render its prompt
/// fragment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationCommand {
    /// Sub-command identifier, when the plugin multiplexes several.
    #[serde(default)]
    pub command: Option<String>,
    /// Human description shown to the model.
    pub description: String,
    /// Worked example of a call.
    #[serde(default)]
    pub example: Option<String>,
}

/// A placeholder key the surrounding system substitutes into prompts on the
/// plugin's behalf.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemPromptPlaceholder {
    /// Placeholder key, e.g. `{{TodayWeather}}` stripped to `TodayWeather`.
    pub placeholder: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Structured capability metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    #[serde(default)]
    pub invocation_commands: Vec<InvocationCommand>,
    #[serde(default)]
    pub system_prompt_placeholders: Vec<SystemPromptPlaceholder>,
}

// =============================================================================
// Config schema & values
// =============================================================================

/// Declared type of a config key, used to coerce the raw string value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigValueType {
    String,
    Integer,
    Boolean,
}

/// A coerced configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    String(String),
    Integer(i64),
    Boolean(bool),
}

impl std::fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Boolean(b) => write!(f, "{b}"),
        }
    }
}

// =============================================================================
// PluginManifest
// =============================================================================

/// Declarative record describing one plugin.
///
/// `base_path`, `plugin_specific_env_config`, `is_distributed` and
/// `server_id` are attached by the store after parsing; they never appear in
/// the manifest file itself and are not sent over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    /// Unique plugin name — the primary key of the store.
    pub name: String,
    /// Human label; falls back to `name` when absent.
    #[serde(default)]
    pub display_name: Option<String>,
    pub plugin_type: PluginType,
    #[serde(default)]
    pub entry_point: Option<EntryPoint>,
    #[serde(default)]
    pub communication: Option<Communication>,
    /// Cron expression driving static refreshes.
    #[serde(default)]
    pub refresh_interval_cron: Option<String>,
    #[serde(default)]
    pub capabilities: Option<Capabilities>,
    /// Config key → declared type, used for coercion on read.
    #[serde(default)]
    pub config_schema: HashMap<String, ConfigValueType>,

    /// Filesystem directory of the plugin; absent for remote tools.
    #[serde(skip)]
    pub base_path: Option<PathBuf>,
    /// Key/value pairs parsed from the plugin's `config.env`.
    #[serde(skip)]
    pub plugin_specific_env_config: HashMap<String, String>,
    /// Set for tools contributed by a remote worker node.
    #[serde(skip)]
    pub is_distributed: bool,
    /// Owning session id for distributed tools.
    #[serde(skip)]
    pub server_id: Option<String>,
}

impl PluginManifest {
    /// Human label: `display_name` when set, otherwise `name`.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Command string of the entry point, if any.
    pub fn command(&self) -> Option<&str> {
        self.entry_point
            .as_ref()
            .and_then(|ep| ep.command.as_deref())
            .filter(|c| !c.trim().is_empty())
    }

    /// Declared communication protocol, defaulting to stdio.
    pub fn protocol(&self) -> Protocol {
        self.communication.map(|c| c.protocol).unwrap_or_default()
    }

    /// Invocation deadline: the declared `timeoutMs`, or the per-type default.
    pub fn timeout(&self) -> Duration {
        if let Some(ms) = self.communication.and_then(|c| c.timeout_ms) {
            return Duration::from_millis(ms);
        }
        match self.plugin_type {
            PluginType::Asynchronous => DEFAULT_ASYNC_TIMEOUT,
            PluginType::Static => DEFAULT_STATIC_TIMEOUT,
            _ => DEFAULT_SYNC_TIMEOUT,
        }
    }

    /// Placeholder keys this plugin declares via `systemPromptPlaceholders`.
    pub fn declared_placeholders(&self) -> impl Iterator<Item = &str> {
        self.capabilities
            .iter()
            .flat_map(|c| c.system_prompt_placeholders.iter())
            .map(|p| p.placeholder.as_str())
    }

    /// Structural validation applied at discovery / remote registration.
    ///
    /// Subprocess types must carry a non-empty command; preprocessor and
    /// service types must name either a script or a command.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.name.trim().is_empty() {
            return Err(ManifestError::MissingField { field: "name" });
        }
        let entry = self
            .entry_point
            .as_ref()
            .ok_or(ManifestError::MissingField {
                field: "entryPoint",
            })?;
        match self.plugin_type {
            PluginType::Static | PluginType::Synchronous | PluginType::Asynchronous => {
                if self.command().is_none() {
                    return Err(ManifestError::MissingField {
                        field: "entryPoint.command",
                    });
                }
            }
            PluginType::MessagePreprocessor | PluginType::Service | PluginType::HybridService => {
                if entry.script.is_none() && self.command().is_none() {
                    return Err(ManifestError::MissingField {
                        field: "entryPoint.script",
                    });
                }
            }
        }
        Ok(())
    }

    // ─── Effective configuration ─────────────────────────────────────────────

    /// Raw (uncoerced) effective value of `key`: plugin-local config first,
    /// then the process environment.
    fn raw_config_value(&self, key: &str) -> Option<String> {
        self.plugin_specific_env_config
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
    }

    /// Effective value of `key`, coerced per `config_schema`.
    ///
    /// An `integer` key whose raw value fails to parse resolves to `None`
    /// with a warning. A `boolean` key is true iff the raw value is `"true"`
    /// (case-insensitive).
    pub fn config_value(&self, key: &str) -> Option<ConfigValue> {
        let raw = self.raw_config_value(key)?;
        match self.config_schema.get(key) {
            Some(ConfigValueType::Integer) => match raw.trim().parse::<i64>() {
                Ok(i) => Some(ConfigValue::Integer(i)),
                Err(e) => {
                    warn!(
                        plugin = %self.name,
                        key,
                        raw = %raw,
                        error = %e,
                        "Config value declared integer but failed to parse"
                    );
                    None
                }
            },
            Some(ConfigValueType::Boolean) => {
                Some(ConfigValue::Boolean(raw.trim().eq_ignore_ascii_case("true")))
            }
            _ => Some(ConfigValue::String(raw)),
        }
    }

    /// Whether the plugin runs in debug mode.
    ///
    /// `DebugMode` is always resolvable regardless of the schema, defaulting
    /// to `false`.
    pub fn debug_mode(&self) -> bool {
        self.raw_config_value("DebugMode")
            .is_some_and(|raw| raw.trim().eq_ignore_ascii_case("true"))
    }

    /// The full effective config as a JSON object with coerced value types,
    /// the shape handed to in-process plugins on every call.
    pub fn effective_config_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for key in self
            .config_schema
            .keys()
            .chain(self.plugin_specific_env_config.keys())
        {
            if map.contains_key(key) {
                continue;
            }
            if let Some(value) = self.config_value(key) {
                let json = match value {
                    ConfigValue::String(s) => serde_json::Value::String(s),
                    ConfigValue::Integer(i) => serde_json::Value::from(i),
                    ConfigValue::Boolean(b) => serde_json::Value::Bool(b),
                };
                map.insert(key.clone(), json);
            }
        }
        map.insert(
            "DebugMode".to_string(),
            serde_json::Value::Bool(self.debug_mode()),
        );
        serde_json::Value::Object(map)
    }

    /// The full effective config flattened to strings, for the subprocess
    /// environment overlay.
    ///
    /// Covers every key named by either the schema or the plugin-local
    /// config file; keys that fail coercion are omitted.
    pub fn flattened_config(&self) -> HashMap<String, String> {
        let mut out = HashMap::new();
        for key in self
            .config_schema
            .keys()
            .chain(self.plugin_specific_env_config.keys())
        {
            if let Some(value) = self.config_value(key) {
                out.insert(key.clone(), value.to_string());
            }
        }
        out
    }
}

// =============================================================================
// config.env parsing
// =============================================================================

/// Parses line-oriented `KEY=VALUE` content (the `config.env` format).
///
/// Blank lines and lines starting with `#` are ignored. Values are raw
/// strings with no shell interpolation; a single pair of surrounding double
/// quotes is stripped. Lines without `=` are skipped with a warning.
pub fn parse_env_config(content: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            warn!(line = lineno + 1, "Skipping config.env line without '='");
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let mut value = value.trim();
        if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
            value = &value[1..value.len() - 1];
        }
        out.insert(key.to_string(), value.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(json: &str) -> PluginManifest {
        serde_json::from_str(json).expect("manifest parses")
    }

    #[test]
    fn parses_minimal_manifest() {
        let m = manifest(
            r#"{
                "name": "Weather",
                "displayName": "Weather Reporter",
                "pluginType": "static",
                "entryPoint": { "command": "python weather.py" },
                "communication": { "protocol": "stdio", "timeoutMs": 10000 },
                "refreshIntervalCron": "*/30 * * * *",
                "capabilities": {
                    "systemPromptPlaceholders": [ { "placeholder": "TodayWeather" } ]
                }
            }"#,
        );
        assert_eq!(m.name, "Weather");
        assert_eq!(m.label(), "Weather Reporter");
        assert_eq!(m.plugin_type, PluginType::Static);
        assert_eq!(m.timeout(), Duration::from_millis(10000));
        assert_eq!(
            m.declared_placeholders().collect::<Vec<_>>(),
            vec!["TodayWeather"]
        );
        m.validate().expect("valid");
    }

    #[test]
    fn default_timeouts_by_type() {
        let sync = manifest(
            r#"{"name":"a","pluginType":"synchronous","entryPoint":{"command":"x"}}"#,
        );
        let asynch = manifest(
            r#"{"name":"b","pluginType":"asynchronous","entryPoint":{"command":"x"}}"#,
        );
        assert_eq!(sync.timeout(), DEFAULT_SYNC_TIMEOUT);
        assert_eq!(asynch.timeout(), DEFAULT_ASYNC_TIMEOUT);
    }

    #[test]
    fn validate_rejects_missing_command() {
        let m = manifest(r#"{"name":"a","pluginType":"synchronous","entryPoint":{}}"#);
        assert!(m.validate().is_err());

        let m = manifest(r#"{"name":"a","pluginType":"synchronous"}"#);
        assert!(m.validate().is_err());
    }

    #[test]
    fn config_coercion() {
        let mut m = manifest(
            r#"{
                "name": "c",
                "pluginType": "synchronous",
                "entryPoint": { "command": "x" },
                "configSchema": { "Port": "integer", "Enabled": "boolean", "Label": "string" }
            }"#,
        );
        m.plugin_specific_env_config = HashMap::from([
            ("Port".into(), "8088".into()),
            ("Enabled".into(), "TRUE".into()),
            ("Label".into(), "hello".into()),
            ("Extra".into(), "raw".into()),
        ]);

        assert_eq!(m.config_value("Port"), Some(ConfigValue::Integer(8088)));
        assert_eq!(m.config_value("Enabled"), Some(ConfigValue::Boolean(true)));
        assert_eq!(
            m.config_value("Label"),
            Some(ConfigValue::String("hello".into()))
        );
        // Undeclared keys pass through as strings.
        assert_eq!(
            m.config_value("Extra"),
            Some(ConfigValue::String("raw".into()))
        );

        let flat = m.flattened_config();
        assert_eq!(flat.get("Port").map(String::as_str), Some("8088"));
        assert_eq!(flat.get("Enabled").map(String::as_str), Some("true"));
    }

    #[test]
    fn integer_parse_failure_is_none() {
        let mut m = manifest(
            r#"{
                "name": "c",
                "pluginType": "synchronous",
                "entryPoint": { "command": "x" },
                "configSchema": { "Port": "integer" }
            }"#,
        );
        m.plugin_specific_env_config = HashMap::from([("Port".into(), "eighty".into())]);
        assert_eq!(m.config_value("Port"), None);
        assert!(!m.flattened_config().contains_key("Port"));
    }

    #[test]
    fn debug_mode_defaults_false() {
        let m = manifest(r#"{"name":"d","pluginType":"service","entryPoint":{"script":"s"}}"#);
        assert!(!m.debug_mode());

        let mut m = m;
        m.plugin_specific_env_config
            .insert("DebugMode".into(), "true".into());
        assert!(m.debug_mode());
    }

    #[test]
    fn env_file_parsing() {
        let parsed = parse_env_config(
            "# comment\n\nAPI_KEY=abc123\nQUOTED=\"with spaces\"\nBROKEN LINE\nEMPTY=\n",
        );
        assert_eq!(parsed.get("API_KEY").map(String::as_str), Some("abc123"));
        assert_eq!(parsed.get("QUOTED").map(String::as_str), Some("with spaces"));
        assert_eq!(parsed.get("EMPTY").map(String::as_str), Some(""));
        assert_eq!(parsed.len(), 3);
    }
}
