//! The manifest store: the authoritative map of known plugins.
//!
//! The store owns two halves keyed by plugin name:
//!
//! - the **local** half, discovered from the plugin root directory and
//!   swapped wholesale on every reload (copy-on-write, so concurrent
//!   readers keep a consistent snapshot), and
//! - the **remote** half, mutated one registration or eviction at a time
//!   under its own write lock, preserved across local rescans.
//!
//! Name uniqueness holds across both halves at any observation. Collisions
//! are resolved first-seen-wins: a rescan drops local entries shadowed by
//! an earlier remote registration, and a remote registration is refused
//! when the name is already taken.
//!
//! The store also owns the per-plugin prompt-fragment table: every plugin
//! advertising `invocationCommands` gets a rendered description block
//! published as placeholder `VCP<name>`, with the aggregate under
//! `VCPAllTools`. Fragments are rebuilt after every reload and after every
//! remote registration batch.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use vcp_core::bridge::RemoteRegistry;
use vcp_core::error::{ManifestResult, StoreError, StoreResult};
use vcp_core::manifest::{
    CONFIG_ENV_FILE, MANIFEST_FILE, PluginManifest, PluginType, parse_env_config,
};
use vcp_core::placeholder::PlaceholderTable;

/// Placeholder key of the aggregate tool description list.
pub const ALL_TOOLS_PLACEHOLDER: &str = "VCPAllTools";

// =============================================================================
// Discovery
// =============================================================================

/// Scans `root` one level deep for plugin directories.
///
/// A plugin directory is any subdirectory containing a
/// `plugin-manifest.json`. Invalid manifests and name collisions are
/// skipped with a warning; the scan order is sorted by path so the result
/// is deterministic.
pub fn scan_plugin_root(root: &Path) -> HashMap<String, Arc<PluginManifest>> {
    let mut found: HashMap<String, Arc<PluginManifest>> = HashMap::new();
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(root = %root.display(), error = %e, "Plugin root is not readable");
            return found;
        }
    };

    let mut dirs: Vec<_> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();

    for dir in dirs {
        if !dir.join(MANIFEST_FILE).exists() {
            continue;
        }
        match load_manifest(&dir) {
            Ok(manifest) => {
                if found.contains_key(&manifest.name) {
                    warn!(
                        plugin = %manifest.name,
                        dir = %dir.display(),
                        "Duplicate plugin name in scan — first seen wins, skipping"
                    );
                    continue;
                }
                debug!(plugin = %manifest.name, dir = %dir.display(), "Discovered plugin");
                found.insert(manifest.name.clone(), Arc::new(manifest));
            }
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Skipping plugin with invalid manifest");
            }
        }
    }
    found
}

/// Parses one plugin directory: manifest, `base_path`, optional
/// `config.env`.
fn load_manifest(dir: &Path) -> ManifestResult<PluginManifest> {
    let content = std::fs::read_to_string(dir.join(MANIFEST_FILE))?;
    let mut manifest: PluginManifest = serde_json::from_str(&content)?;
    manifest.validate()?;
    manifest.base_path = Some(dir.to_path_buf());

    let env_path = dir.join(CONFIG_ENV_FILE);
    if env_path.exists() {
        manifest.plugin_specific_env_config = parse_env_config(&std::fs::read_to_string(env_path)?);
    }
    Ok(manifest)
}

// =============================================================================
// PluginStore
// =============================================================================

/// Authoritative map of known plugins, local and remote.
pub struct PluginStore {
    local: RwLock<Arc<HashMap<String, Arc<PluginManifest>>>>,
    remote: RwLock<HashMap<String, Arc<PluginManifest>>>,
    placeholders: Arc<PlaceholderTable>,
    /// Placeholder keys produced by the last fragment rebuild, so stale
    /// fragments can be dropped on the next one.
    fragment_keys: Mutex<BTreeSet<String>>,
}

impl PluginStore {
    pub fn new(placeholders: Arc<PlaceholderTable>) -> Self {
        Self {
            local: RwLock::new(Arc::new(HashMap::new())),
            remote: RwLock::new(HashMap::new()),
            placeholders,
            fragment_keys: Mutex::new(BTreeSet::new()),
        }
    }

    /// The placeholder table this store publishes fragments into.
    pub fn placeholders(&self) -> &Arc<PlaceholderTable> {
        &self.placeholders
    }

    // ─── Lookup ──────────────────────────────────────────────────────────────

    /// Resolves a plugin by name, local entries first.
    pub fn resolve(&self, name: &str) -> Option<Arc<PluginManifest>> {
        if let Some(found) = self.local.read().get(name) {
            return Some(Arc::clone(found));
        }
        self.remote.read().get(name).cloned()
    }

    /// Whether any entry (local or remote) uses `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.local.read().contains_key(name) || self.remote.read().contains_key(name)
    }

    /// Every known manifest, local then remote, sorted by name.
    pub fn all(&self) -> Vec<Arc<PluginManifest>> {
        let mut manifests: Vec<Arc<PluginManifest>> = self
            .local
            .read()
            .values()
            .chain(self.remote.read().values())
            .cloned()
            .collect();
        manifests.sort_by(|a, b| a.name.cmp(&b.name));
        manifests
    }

    /// The current local manifests.
    pub fn local_manifests(&self) -> Vec<Arc<PluginManifest>> {
        self.local.read().values().cloned().collect()
    }

    /// Names of discovered preprocessor plugins.
    pub fn preprocessor_names(&self) -> BTreeSet<String> {
        self.local
            .read()
            .values()
            .filter(|m| m.plugin_type == PluginType::MessagePreprocessor)
            .map(|m| m.name.clone())
            .collect()
    }

    /// The current static plugins.
    pub fn static_manifests(&self) -> Vec<Arc<PluginManifest>> {
        self.local
            .read()
            .values()
            .filter(|m| m.plugin_type == PluginType::Static)
            .cloned()
            .collect()
    }

    // ─── Local half ──────────────────────────────────────────────────────────

    /// Atomically replaces the local half with a fresh scan result.
    ///
    /// Remote entries are preserved; a scanned name already taken by a
    /// remote registration is dropped (first seen wins).
    pub fn install_local(&self, mut scanned: HashMap<String, Arc<PluginManifest>>) {
        {
            let remote = self.remote.read();
            scanned.retain(|name, _| {
                let shadowed = remote.contains_key(name);
                if shadowed {
                    warn!(
                        plugin = %name,
                        "Local plugin shadowed by an earlier remote registration — skipping"
                    );
                }
                !shadowed
            });
        }
        let count = scanned.len();
        *self.local.write() = Arc::new(scanned);
        info!(count, "Local plugin map installed");
    }

    // ─── Remote half ─────────────────────────────────────────────────────────

    /// Registers one tool contributed by the session `server_id`.
    pub fn register_remote(
        &self,
        server_id: &str,
        mut manifest: PluginManifest,
    ) -> StoreResult<()> {
        manifest.validate()?;
        if self.contains(&manifest.name) {
            return Err(StoreError::NameCollision {
                name: manifest.name,
            });
        }
        manifest.display_name = Some(format!("{} (distributed)", manifest.label()));
        manifest.is_distributed = true;
        manifest.server_id = Some(server_id.to_string());
        manifest.base_path = None;

        let mut remote = self.remote.write();
        // Re-check under the write lock; a concurrent registration may have
        // taken the name between `contains` and here.
        if remote.contains_key(&manifest.name) {
            return Err(StoreError::NameCollision {
                name: manifest.name,
            });
        }
        info!(plugin = %manifest.name, server_id, "Distributed tool registered");
        remote.insert(manifest.name.clone(), Arc::new(manifest));
        Ok(())
    }

    /// Removes every remote entry owned by `server_id`, returning the
    /// removed names.
    pub fn evict_remote(&self, server_id: &str) -> Vec<String> {
        let mut remote = self.remote.write();
        let names: Vec<String> = remote
            .values()
            .filter(|m| m.server_id.as_deref() == Some(server_id))
            .map(|m| m.name.clone())
            .collect();
        for name in &names {
            remote.remove(name);
        }
        names
    }

    // ─── Prompt fragments ────────────────────────────────────────────────────

    /// Rebuilds the per-plugin prompt-fragment placeholders and the
    /// aggregate list, dropping fragments of plugins that are gone.
    pub fn rebuild_prompt_fragments(&self) {
        let mut fragments: BTreeMap<String, String> = BTreeMap::new();
        for manifest in self.all() {
            if let Some(text) = render_fragment(&manifest) {
                fragments.insert(manifest.name.clone(), text);
            }
        }

        let mut new_keys: BTreeSet<String> =
            fragments.keys().map(|name| format!("VCP{name}")).collect();
        new_keys.insert(ALL_TOOLS_PLACEHOLDER.to_string());

        let mut prev_keys = self.fragment_keys.lock();
        for stale in prev_keys.difference(&new_keys) {
            self.placeholders.remove(stale);
        }
        for (name, text) in &fragments {
            self.placeholders.set(&format!("VCP{name}"), text.clone());
        }
        let aggregate = if fragments.is_empty() {
            "(no callable tools registered)".to_string()
        } else {
            fragments
                .values()
                .cloned()
                .collect::<Vec<_>>()
                .join("\n\n")
        };
        self.placeholders.set(ALL_TOOLS_PLACEHOLDER, aggregate);
        *prev_keys = new_keys;
        debug!(count = fragments.len(), "Prompt fragments rebuilt");
    }
}

/// Renders the prompt description block of one plugin, when it advertises
/// invocation commands.
fn render_fragment(manifest: &PluginManifest) -> Option<String> {
    let caps = manifest.capabilities.as_ref()?;
    if caps.invocation_commands.is_empty() {
        return None;
    }
    let mut text = format!("### {}\n", manifest.label());
    for command in &caps.invocation_commands {
        match &command.command {
            Some(name) => {
                let _ = writeln!(text, "- `{name}`: {}", command.description);
            }
            None => {
                let _ = writeln!(text, "- {}", command.description);
            }
        }
        if let Some(example) = &command.example {
            let _ = writeln!(text, "  Example: {example}");
        }
    }
    Some(text.trim_end().to_string())
}

// =============================================================================
// RemoteRegistry impl
// =============================================================================

#[async_trait]
impl RemoteRegistry for PluginStore {
    async fn register_remote_tools(
        &self,
        server_id: &str,
        manifests: Vec<PluginManifest>,
    ) -> usize {
        let mut accepted = 0;
        for manifest in manifests {
            let name = manifest.name.clone();
            match self.register_remote(server_id, manifest) {
                Ok(()) => accepted += 1,
                Err(e) => {
                    warn!(plugin = %name, server_id, error = %e, "Remote tool rejected");
                }
            }
        }
        if accepted > 0 {
            self.rebuild_prompt_fragments();
        }
        accepted
    }

    async fn update_remote_placeholders(&self, server_id: &str, values: HashMap<String, String>) {
        let count = values.len();
        for (key, value) in values {
            self.placeholders.set_owned(&key, value, server_id);
        }
        debug!(server_id, count, "Remote placeholders merged");
    }

    async fn evict_session(&self, server_id: &str) {
        let tools = self.evict_remote(server_id);
        let placeholders = self.placeholders.remove_owned_by(server_id);
        if !tools.is_empty() {
            self.rebuild_prompt_fragments();
        }
        info!(
            server_id,
            tools = tools.len(),
            placeholders = placeholders.len(),
            "Session evicted from the store"
        );
    }
}
