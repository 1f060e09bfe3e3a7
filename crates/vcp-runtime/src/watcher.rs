//! Debounced filesystem watcher driving hot reloads.
//!
//! A burst of `create`/`modify`/`remove` events on the watched paths
//! collapses into one callback: every new event restarts the quiescence
//! timer, and the callback fires only after the paths have been quiet for
//! the full debounce window. Exactly one reload is in flight at a time —
//! the callback is awaited before the next window can fire.

use std::future::Future;
use std::path::PathBuf;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A running watcher; dropping it stops both the OS watches and the
/// debounce task.
pub struct DebouncedWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl DebouncedWatcher {
    /// Watches `paths` and invokes `on_quiescent` after each settled burst
    /// of relevant events.
    pub fn spawn<F, Fut>(
        paths: Vec<(PathBuf, RecursiveMode)>,
        debounce: std::time::Duration,
        on_quiescent: F,
    ) -> notify::Result<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) if is_relevant(&event) => {
                    let _ = tx.send(());
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Filesystem watcher error"),
            }
        })?;

        for (path, mode) in &paths {
            if let Err(e) = watcher.watch(path, *mode) {
                warn!(path = %path.display(), error = %e, "Failed to watch path");
            } else {
                debug!(path = %path.display(), "Watching for plugin changes");
            }
        }

        let task = tokio::spawn(async move {
            loop {
                // Block until the first event of a burst.
                if rx.recv().await.is_none() {
                    break;
                }
                // Each further event restarts the quiescence timer.
                loop {
                    match tokio::time::timeout(debounce, rx.recv()).await {
                        Ok(Some(())) => continue,
                        Ok(None) => return,
                        Err(_) => break,
                    }
                }
                debug!("Filesystem quiescent — triggering reload");
                on_quiescent().await;
            }
        });

        Ok(Self {
            _watcher: watcher,
            task,
        })
    }

    /// Stops the watcher.
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for DebouncedWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn is_relevant(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread")]
    async fn burst_collapses_into_one_callback() {
        let dir = tempfile::tempdir().unwrap();
        let count = Arc::new(AtomicUsize::new(0));

        let watcher = {
            let count = Arc::clone(&count);
            DebouncedWatcher::spawn(
                vec![(dir.path().to_path_buf(), RecursiveMode::Recursive)],
                Duration::from_millis(200),
                move || {
                    let count = Arc::clone(&count);
                    async move {
                        count.fetch_add(1, Ordering::SeqCst);
                    }
                },
            )
            .unwrap()
        };

        // A burst of writes inside one debounce window.
        for i in 0..3 {
            std::fs::write(dir.path().join(format!("f{i}.json")), "{}").unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // A second, separate burst fires again.
        std::fs::write(dir.path().join("later.json"), "{}").unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        watcher.stop();
    }
}
