//! Periodic health sweep over all health-checked routes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{stream, StreamExt};
use ninsho_core::{Route, RouteStore};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::classify::{Classification, Classifier, HealthState, ProbeOptions};
use crate::error::HealthResult;

/// Sweep configuration.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Time between sweeps. Zero disables the background loop.
    pub interval: Duration,
    /// Base probe options; each route narrows them.
    pub probe: ProbeOptions,
    /// Maximum probes in flight.
    pub concurrency: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            probe: ProbeOptions::default(),
            concurrency: 8,
        }
    }
}

impl SweepConfig {
    /// Create a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sweep interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the base probe options.
    #[must_use]
    pub fn with_probe(mut self, probe: ProbeOptions) -> Self {
        self.probe = probe;
        self
    }

    /// Set the concurrency limit.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
}

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Routes probed.
    pub checked: usize,
    /// Routes classified `UP`.
    pub up: usize,
    /// Routes classified `DEGRADED`.
    pub degraded: usize,
    /// Routes classified `DOWN` or `UNKNOWN`.
    pub down: usize,
}

impl SweepSummary {
    fn record(&mut self, state: HealthState) {
        self.checked += 1;
        match state {
            HealthState::Up => self.up += 1,
            HealthState::Degraded => self.degraded += 1,
            HealthState::Down | HealthState::Unknown => self.down += 1,
        }
    }
}

struct SweepInner {
    store: Arc<dyn RouteStore>,
    classifier: Classifier,
    config: SweepConfig,
}

impl SweepInner {
    async fn run_once(&self) -> HealthResult<SweepSummary> {
        let routes: Vec<Route> = self
            .store
            .list_routes(true)?
            .into_iter()
            .filter(|r| r.health_check)
            .collect();

        let classifier = &self.classifier;
        let probe = &self.config.probe;

        let results: Vec<(Route, Classification)> = stream::iter(routes)
            .map(move |route| async move {
                let classification = classifier.probe_route(&route, probe).await;
                (route, classification)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut summary = SweepSummary::default();
        for (route, classification) in results {
            summary.record(classification.state);
            let status = classification.legacy_status();

            if status != route.status {
                info!(
                    route = %route.path,
                    from = %route.status.as_str(),
                    to = %status.as_str(),
                    detail = %classification.detail,
                    "route status changed"
                );
            }

            if let Err(e) = self.store.update_status(&route.id, status, Utc::now()) {
                warn!(route = %route.path, error = %e, "failed to record route status");
            }
        }

        Ok(summary)
    }
}

/// Background loop that probes every enabled, health-checked route.
///
/// The loop runs one sweep immediately, then one per interval, and exits
/// promptly once [`stop`](Self::stop) is called even mid-sweep.
pub struct HealthSweep {
    inner: Arc<SweepInner>,
    running: AtomicBool,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HealthSweep {
    /// Create a sweep over `store`.
    pub fn new(store: Arc<dyn RouteStore>, classifier: Classifier, config: SweepConfig) -> Self {
        Self {
            inner: Arc::new(SweepInner {
                store,
                classifier,
                config,
            }),
            running: AtomicBool::new(false),
            stop_tx: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    /// Whether the background loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Sweep configuration.
    pub fn config(&self) -> &SweepConfig {
        &self.inner.config
    }

    /// Run one sweep now and write each route's status back to the store.
    pub async fn run_once(&self) -> HealthResult<SweepSummary> {
        self.inner.run_once().await
    }

    /// Start the background loop.
    ///
    /// Returns `false` without spawning anything when the interval is zero
    /// or the loop is already running.
    pub fn start(&self) -> bool {
        let interval = self.inner.config.interval;
        if interval.is_zero() {
            info!("health sweep disabled (interval is 0)");
            return false;
        }
        if self.running.swap(true, Ordering::AcqRel) {
            debug!("health sweep already running");
            return false;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        *self.stop_tx.lock() = Some(stop_tx);

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "health sweep started");
            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    result = inner.run_once() => match result {
                        Ok(summary) => info!(
                            checked = summary.checked,
                            up = summary.up,
                            degraded = summary.degraded,
                            down = summary.down,
                            "health sweep finished"
                        ),
                        Err(e) => warn!(error = %e, "health sweep failed"),
                    },
                }

                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    () = tokio::time::sleep(interval) => {}
                }
            }
            info!("health sweep stopped");
        });

        *self.handle.lock() = Some(handle);
        true
    }

    /// Signal the loop to stop. Idempotent.
    pub fn stop(&self) {
        if let Some(tx) = self.stop_tx.lock().take() {
            let _ = tx.send(true);
        }
        self.running.store(false, Ordering::Release);
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(&self) {
        self.stop();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "health sweep task ended abnormally");
            }
        }
    }
}

impl std::fmt::Debug for HealthSweep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthSweep")
            .field("config", &self.inner.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
