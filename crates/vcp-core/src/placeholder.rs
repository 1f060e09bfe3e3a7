//! The global placeholder table.
//!
//! Placeholders are named string slots substituted into prompt templates.
//! Each key has exactly one producer: a static plugin's stdout capture, a
//! remote node's push, or the store's prompt-fragment builder. The table is
//! write-rarely / read-often; reads clone the value out under a short
//! `parking_lot` read lock, so callers never hold references into the table
//! across suspension points and never observe a torn state.
//!
//! # Sentinels
//!
//! Three reserved value shapes, distinguishable from real output by content
//! convention:
//!
//! - `[<label> is loading...]` — seeded before the first refresh completes
//! - `[<key> data currently unavailable]` — refresh produced nothing and no
//!   prior value existed
//! - `[Error updating <label>: <message>]` — refresh failed with no usable
//!   prior value
//!
//! The update rules guarantee non-regression: a non-empty, non-sentinel
//! value is never replaced by the product of a failed or empty refresh.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, warn};

/// Maximum failure-message length embedded in an error sentinel.
const ERROR_SENTINEL_MSG_LIMIT: usize = 100;

/// Builds the loading sentinel for a plugin label.
pub fn loading_sentinel(label: &str) -> String {
    format!("[{label} is loading...]")
}

/// Builds the unavailable sentinel for a placeholder key.
pub fn unavailable_sentinel(key: &str) -> String {
    format!("[{key} data currently unavailable]")
}

/// Builds the error sentinel for a plugin label, truncating the message.
pub fn error_sentinel(label: &str, message: &str) -> String {
    let mut msg: String = message.chars().take(ERROR_SENTINEL_MSG_LIMIT).collect();
    if msg.len() < message.len() {
        msg.push('…');
    }
    format!("[Error updating {label}: {msg}]")
}

/// Whether `value` is one of the reserved sentinel shapes.
pub fn is_sentinel(value: &str) -> bool {
    value.starts_with('[')
        && value.ends_with(']')
        && (value.ends_with(" is loading...]")
            || value.ends_with(" data currently unavailable]")
            || value.starts_with("[Error updating "))
}

/// Whether `value` is specifically an error sentinel.
pub fn is_error_sentinel(value: &str) -> bool {
    value.starts_with("[Error updating ") && value.ends_with(']')
}

#[derive(Debug, Clone)]
struct PlaceholderEntry {
    value: String,
    /// Server id of the remote session that pushed this value; `None` for
    /// locally produced values.
    owner: Option<String>,
}

/// Owner struct for all placeholder state; see the module docs.
#[derive(Debug, Default)]
pub struct PlaceholderTable {
    inner: RwLock<HashMap<String, PlaceholderEntry>>,
}

impl PlaceholderTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `key`, cloned out.
    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.read().get(key).map(|e| e.value.clone())
    }

    /// A consistent copy of the whole table.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.inner
            .read()
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    /// Number of keys currently present.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Seeds `key` with the loading sentinel unless a value already exists.
    ///
    /// Called for every declared placeholder at reload so consumers always
    /// find something substitutable before the first refresh completes.
    pub fn seed_loading(&self, key: &str, label: &str) {
        let mut map = self.inner.write();
        map.entry(key.to_string())
            .or_insert_with(|| PlaceholderEntry {
                value: loading_sentinel(label),
                owner: None,
            });
    }

    /// Installs a locally produced value, replacing any prior.
    pub fn set(&self, key: &str, value: String) {
        self.inner.write().insert(
            key.to_string(),
            PlaceholderEntry { value, owner: None },
        );
    }

    /// Installs a value pushed by a remote session, recording ownership so
    /// eviction can remove it.
    pub fn set_owned(&self, key: &str, value: String, server_id: &str) {
        self.inner.write().insert(
            key.to_string(),
            PlaceholderEntry {
                value,
                owner: Some(server_id.to_string()),
            },
        );
    }

    /// Removes a single key.
    pub fn remove(&self, key: &str) {
        self.inner.write().remove(key);
    }

    /// Removes every key owned by `server_id`, returning the removed keys.
    pub fn remove_owned_by(&self, server_id: &str) -> Vec<String> {
        let mut map = self.inner.write();
        let keys: Vec<String> = map
            .iter()
            .filter(|(_, e)| e.owner.as_deref() == Some(server_id))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            map.remove(key);
        }
        keys
    }

    /// Applies the outcome of one refresh run to `key`, following the
    /// non-regression rules (see module docs).
    ///
    /// `label` is the producing plugin's display label, used in sentinels.
    pub fn apply_refresh(&self, key: &str, label: &str, outcome: Result<String, String>) {
        let mut map = self.inner.write();
        let prior = map.get(key).map(|e| e.value.clone());
        let prior_keepable = prior
            .as_deref()
            .is_some_and(|v| !is_error_sentinel(v) && !v.trim().is_empty());

        let new_value = match outcome {
            Ok(v) if !v.trim().is_empty() => Some(v),
            Ok(_) => {
                if prior_keepable {
                    debug!(key, "Refresh produced empty output; keeping stale value");
                    None
                } else {
                    Some(unavailable_sentinel(key))
                }
            }
            Err(msg) => {
                if prior_keepable {
                    warn!(key, error = %msg, "Refresh failed; keeping stale value");
                    None
                } else {
                    Some(error_sentinel(label, &msg))
                }
            }
        };

        if let Some(value) = new_value {
            map.insert(key.to_string(), PlaceholderEntry { value, owner: None });
        }
    }
}
