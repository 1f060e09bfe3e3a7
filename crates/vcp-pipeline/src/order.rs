//! Preprocessor order persistence.
//!
//! The pipeline order is mirrored to a JSON file (an array of plugin
//! names). At load time the saved order is reconciled against the set of
//! discovered preprocessor plugins:
//!
//! - saved names that are still discovered keep their saved position
//! - saved names that disappeared are dropped
//! - newly discovered names are appended in lexicographic order
//!
//! The file is (re)written whenever reconciliation changes it or it did not
//! exist, so the on-disk order and the in-memory order never diverge.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::{info, warn};

/// Reconciles a saved order against the currently discovered set.
///
/// Deterministic: the same inputs always produce the same order.
pub fn reconcile(saved: &[String], discovered: &BTreeSet<String>) -> Vec<String> {
    let mut order: Vec<String> = saved
        .iter()
        .filter(|name| discovered.contains(*name))
        .cloned()
        .collect();
    // BTreeSet iteration is lexicographic, so appends are too.
    for name in discovered {
        if !order.contains(name) {
            order.push(name.clone());
        }
    }
    order
}

/// Reads the saved order from `path`.
///
/// An absent file yields an empty order; a malformed file is treated the
/// same, with a warning, so one bad edit cannot wedge the reload.
pub fn load(path: &Path) -> Vec<String> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read preprocessor order file");
            return Vec::new();
        }
    };
    match serde_json::from_str::<Vec<String>>(&content) {
        Ok(saved) => saved,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Malformed preprocessor order file — ignoring");
            Vec::new()
        }
    }
}

/// Writes `order` to `path` as pretty JSON.
pub fn save(path: &Path, order: &[String]) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(order).map_err(std::io::Error::other)?;
    std::fs::write(path, json)
}

/// Loads, reconciles, and persists the order in one step.
///
/// Returns the effective order. The file is rewritten when it did not
/// exist or reconciliation changed its content.
pub fn load_and_reconcile(path: &Path, discovered: &BTreeSet<String>) -> Vec<String> {
    let saved = load(path);
    let order = reconcile(&saved, discovered);
    if !path.exists() || saved != order {
        match save(path, &order) {
            Ok(()) => info!(path = %path.display(), count = order.len(), "Preprocessor order persisted"),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to persist preprocessor order")
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn saved(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn keeps_saved_order_drops_unknown_appends_new() {
        // Saved ["B","A","C"], discovered {A,B,D}: C is gone, D is new.
        let order = reconcile(&saved(&["B", "A", "C"]), &set(&["A", "B", "D"]));
        assert_eq!(order, saved(&["B", "A", "D"]));
    }

    #[test]
    fn new_names_append_lexicographically() {
        let order = reconcile(&saved(&[]), &set(&["zeta", "alpha", "mid"]));
        assert_eq!(order, saved(&["alpha", "mid", "zeta"]));
    }

    #[test]
    fn reconcile_is_deterministic() {
        let discovered = set(&["A", "B", "D"]);
        let first = reconcile(&saved(&["B", "A"]), &discovered);
        let second = reconcile(&saved(&["B", "A"]), &discovered);
        assert_eq!(first, second);
    }

    #[test]
    fn absent_file_is_created_with_reconciled_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preprocessor-order.json");

        let order = load_and_reconcile(&path, &set(&["B", "A"]));
        assert_eq!(order, saved(&["A", "B"]));
        assert!(path.exists());
        assert_eq!(load(&path), order);
    }

    #[test]
    fn file_is_rewritten_to_match_reconciliation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preprocessor-order.json");
        save(&path, &saved(&["B", "A", "C"])).unwrap();

        let order = load_and_reconcile(&path, &set(&["A", "B", "D"]));
        assert_eq!(order, saved(&["B", "A", "D"]));
        assert_eq!(load(&path), order);
    }

    #[test]
    fn malformed_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preprocessor-order.json");
        std::fs::write(&path, "{ not json").unwrap();

        let order = load_and_reconcile(&path, &set(&["A"]));
        assert_eq!(order, saved(&["A"]));
    }
}
