//! Static plugin refresher and cron scheduler.
//!
//! Turns `static`-type plugins into placeholder values: at reload time each
//! static plugin's declared placeholders are seeded with a loading
//! sentinel, an initial refresh is enqueued in the background, and a
//! scheduled job is created when the manifest carries
//! `refreshIntervalCron`. The job set is rebuilt wholesale on every reload.
//!
//! Refreshes of one plugin are serial: a cron fire while the previous
//! refresh of the same plugin is still running is skipped, not queued.
//! Value updates follow the non-regression rules of
//! [`PlaceholderTable::apply_refresh`].

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use cron::Schedule;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use vcp_core::manifest::PluginManifest;
use vcp_core::placeholder::PlaceholderTable;
use vcp_executor::StdioExecutor;

/// Parses a refresh cron expression.
///
/// Manifests use the classic five-field form; the parser wants a seconds
/// column, so five-field expressions get `0` prepended.
pub fn parse_cron(expr: &str) -> Result<Schedule, cron::error::Error> {
    if expr.split_whitespace().count() == 5 {
        Schedule::from_str(&format!("0 {expr}"))
    } else {
        Schedule::from_str(expr)
    }
}

/// Runs static plugins and publishes their stdout as placeholder values.
pub struct StaticRefresher {
    executor: Arc<StdioExecutor>,
    placeholders: Arc<PlaceholderTable>,
    in_flight: Mutex<HashSet<String>>,
    jobs: Mutex<Vec<JoinHandle<()>>>,
}

/// Removes the per-plugin serial marker even when the refresh task is
/// cancelled mid-run.
struct InFlightGuard<'a> {
    refresher: &'a StaticRefresher,
    name: &'a str,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.refresher.in_flight.lock().remove(self.name);
    }
}

impl StaticRefresher {
    pub fn new(executor: Arc<StdioExecutor>, placeholders: Arc<PlaceholderTable>) -> Arc<Self> {
        Arc::new(Self {
            executor,
            placeholders,
            in_flight: Mutex::new(HashSet::new()),
            jobs: Mutex::new(Vec::new()),
        })
    }

    /// Rebuilds seeds, initial refreshes, and scheduled jobs for the
    /// current static plugin set. Jobs from the previous set are aborted.
    pub fn on_reload(self: &Arc<Self>, statics: Vec<Arc<PluginManifest>>) {
        let mut jobs = self.jobs.lock();
        for job in jobs.drain(..) {
            job.abort();
        }

        info!(count = statics.len(), "Rebuilding static refresh jobs");
        for manifest in statics {
            for key in manifest.declared_placeholders() {
                self.placeholders.seed_loading(key, manifest.label());
            }

            let this = Arc::clone(self);
            let initial = Arc::clone(&manifest);
            jobs.push(tokio::spawn(async move {
                this.refresh(&initial).await;
            }));

            if let Some(expr) = manifest.refresh_interval_cron.clone() {
                match parse_cron(&expr) {
                    Ok(schedule) => {
                        let this = Arc::clone(self);
                        jobs.push(tokio::spawn(cron_loop(this, manifest, schedule)));
                    }
                    Err(e) => {
                        warn!(
                            plugin = %manifest.name,
                            cron = %expr,
                            error = %e,
                            "Invalid refresh cron expression — plugin will only refresh on reload"
                        );
                    }
                }
            }
        }
    }

    /// Runs one refresh of `manifest` and applies the outcome to every
    /// placeholder it declares.
    ///
    /// Serial per plugin: returns immediately when a refresh of the same
    /// plugin is still running.
    pub async fn refresh(&self, manifest: &PluginManifest) {
        if !self.in_flight.lock().insert(manifest.name.clone()) {
            debug!(plugin = %manifest.name, "Refresh already running — skipping this fire");
            return;
        }
        let _guard = InFlightGuard {
            refresher: self,
            name: &manifest.name,
        };

        let outcome = self
            .executor
            .run_static_capture(manifest)
            .await
            .map_err(|e| e.to_string());
        match &outcome {
            Ok(value) => {
                debug!(plugin = %manifest.name, bytes = value.len(), "Static refresh completed")
            }
            Err(e) => warn!(plugin = %manifest.name, error = %e, "Static refresh failed"),
        }

        for key in manifest.declared_placeholders() {
            self.placeholders
                .apply_refresh(key, manifest.label(), outcome.clone());
        }
    }

    /// Aborts every scheduled job; used at shutdown.
    pub fn abort_jobs(&self) {
        for job in self.jobs.lock().drain(..) {
            job.abort();
        }
    }
}

async fn cron_loop(
    refresher: Arc<StaticRefresher>,
    manifest: Arc<PluginManifest>,
    schedule: Schedule,
) {
    loop {
        let Some(next) = schedule.upcoming(Local).next() else {
            debug!(plugin = %manifest.name, "Cron schedule has no further fire times");
            break;
        };
        let delay = (next - Local::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        tokio::time::sleep(delay).await;
        refresher.refresh(&manifest).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Instant;
    use vcp_core::placeholder;

    fn static_manifest(name: &str, command: &str, keys: &[&str]) -> Arc<PluginManifest> {
        let placeholders: Vec<_> = keys.iter().map(|k| json!({ "placeholder": k })).collect();
        Arc::new(
            serde_json::from_value(json!({
                "name": name,
                "pluginType": "static",
                "entryPoint": { "command": command },
                "communication": { "protocol": "stdio", "timeoutMs": 5000 },
                "capabilities": { "systemPromptPlaceholders": placeholders }
            }))
            .unwrap(),
        )
    }

    fn refresher() -> (Arc<StaticRefresher>, Arc<PlaceholderTable>) {
        let placeholders = Arc::new(PlaceholderTable::new());
        (
            StaticRefresher::new(Arc::new(StdioExecutor::default()), Arc::clone(&placeholders)),
            placeholders,
        )
    }

    #[test]
    fn five_field_cron_accepted() {
        parse_cron("*/30 * * * *").unwrap();
        parse_cron("0 */5 * * * *").unwrap();
        assert!(parse_cron("not a cron").is_err());
    }

    #[tokio::test]
    async fn refresh_publishes_stdout() {
        let (refresher, placeholders) = refresher();
        let m = static_manifest("Weather", r#"sh -c "printf 'sunny'""#, &["TodayWeather"]);
        refresher.refresh(&m).await;
        assert_eq!(placeholders.get("TodayWeather").as_deref(), Some("sunny"));
    }

    #[tokio::test]
    async fn failure_without_prior_installs_error_sentinel() {
        let (refresher, placeholders) = refresher();
        let m = static_manifest("Bad", r#"sh -c "exit 7""#, &["BadData"]);
        refresher.refresh(&m).await;
        let value = placeholders.get("BadData").unwrap();
        assert!(placeholder::is_error_sentinel(&value));
    }

    #[tokio::test]
    async fn failure_preserves_prior_value() {
        let (refresher, placeholders) = refresher();
        placeholders.set("TodayWeather", "cloudy".into());
        let m = static_manifest("Weather", r#"sh -c "exit 1""#, &["TodayWeather"]);
        refresher.refresh(&m).await;
        assert_eq!(placeholders.get("TodayWeather").as_deref(), Some("cloudy"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn overlapping_refresh_is_skipped() {
        let (refresher, _placeholders) = refresher();
        let m = static_manifest(
            "Slow",
            r#"sh -c "sleep 0.5; printf 'done'""#,
            &["SlowData"],
        );

        let background = {
            let refresher = Arc::clone(&refresher);
            let m = Arc::clone(&m);
            tokio::spawn(async move { refresher.refresh(&m).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        // The overlapping fire returns immediately instead of queueing.
        let started = Instant::now();
        refresher.refresh(&m).await;
        assert!(started.elapsed() < Duration::from_millis(200));

        background.await.unwrap();
    }

    #[tokio::test]
    async fn reload_seeds_loading_sentinels() {
        let (refresher, placeholders) = refresher();
        let m = static_manifest(
            "Slow",
            r#"sh -c "sleep 5; printf 'late'""#,
            &["SlowData"],
        );
        refresher.on_reload(vec![m]);

        // Seeded synchronously, before the background refresh completes.
        let value = placeholders.get("SlowData").unwrap();
        assert!(placeholder::is_sentinel(&value));
        refresher.abort_jobs();
    }
}
