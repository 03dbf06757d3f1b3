//! Control plane: keeps Caddy and route health in step with the route store.

use std::sync::Arc;

use chrono::Utc;
use ninsho_caddy::{SyncOutcome, Synthesizer};
use ninsho_core::{CoreError, RouteStore};
use ninsho_health::{Classifier, HealthReport, HealthSweep};
use tracing::{info, warn};

use crate::config::{Mode, ServerConfig};
use crate::error::ServerResult;

/// Ties the route store to the Caddy synthesizer and the health sweep.
///
/// The excluded admin surface calls [`ControlPlane::routes_changed`] after
/// every route mutation and [`ControlPlane::test_route`] for manual tests.
pub struct ControlPlane {
    store: Arc<dyn RouteStore>,
    synthesizer: Synthesizer,
    sweep: HealthSweep,
    edge_sync: bool,
    sync_on_startup: bool,
    health_enabled: bool,
}

impl std::fmt::Debug for ControlPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPlane")
            .field("synthesizer", &self.synthesizer)
            .field("sweep", &self.sweep)
            .field("edge_sync", &self.edge_sync)
            .field("sync_on_startup", &self.sync_on_startup)
            .field("health_enabled", &self.health_enabled)
            .finish_non_exhaustive()
    }
}

impl ControlPlane {
    /// Create a control plane over `store`.
    ///
    /// Caddy is only synced in [`Mode::Control`]; in relay mode ninsho owns
    /// the data path itself.
    pub fn new(config: &ServerConfig, store: Arc<dyn RouteStore>) -> ServerResult<Self> {
        let synthesizer = Synthesizer::new(config.synthesizer_config())?;
        let sweep = HealthSweep::new(
            Arc::clone(&store),
            Classifier::new()?,
            config.sweep_config(),
        );

        Ok(Self {
            store,
            synthesizer,
            sweep,
            edge_sync: config.server.mode == Mode::Control,
            sync_on_startup: config.caddy.sync_on_startup,
            health_enabled: config.health.enabled,
        })
    }

    /// The route store.
    pub fn store(&self) -> &Arc<dyn RouteStore> {
        &self.store
    }

    /// The Caddy synthesizer.
    pub fn synthesizer(&self) -> &Synthesizer {
        &self.synthesizer
    }

    /// Whether the periodic sweep is running.
    pub fn is_sweeping(&self) -> bool {
        self.sweep.is_running()
    }

    /// Initial sync and sweep start. A failed sync is logged, not fatal;
    /// Caddy keeps its last good configuration until a later sync succeeds.
    pub async fn startup(&self) {
        if self.edge_sync && self.sync_on_startup {
            match self.routes_changed().await {
                Ok(_) => info!("initial caddy sync done"),
                Err(e) => warn!(error = %e, "initial caddy sync failed"),
            }
        }

        if self.health_enabled {
            if self.sweep.start() {
                info!(
                    interval_secs = self.sweep.config().interval.as_secs(),
                    "health sweep started"
                );
            } else {
                info!("health sweep not started");
            }
        }
    }

    /// Push the current route set to Caddy.
    ///
    /// Returns `None` in relay mode, where there is nothing to push.
    pub async fn routes_changed(&self) -> ServerResult<Option<SyncOutcome>> {
        if !self.edge_sync {
            return Ok(None);
        }
        let routes = self.store.list_routes(false)?;
        Ok(Some(self.synthesizer.sync(&routes).await?))
    }

    /// Probe one route now and record its status.
    pub async fn test_route(&self, id: &str) -> ServerResult<HealthReport> {
        let route = self
            .store
            .get_route(id)?
            .ok_or_else(|| CoreError::not_found(id))?;

        let report = self.synthesizer.test_connection(&route).await;
        self.store.update_status(&route.id, report.status, Utc::now())?;
        info!(
            route = %route.path,
            status = report.status.as_str(),
            detail = %report.detail,
            "manual connection test"
        );
        Ok(report)
    }

    /// Stop the sweep and wait for it to exit.
    pub async fn shutdown(&self) {
        self.sweep.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ninsho_core::{MemoryRouteStore, Route, RouteStatus};

    use super::*;

    fn store_with(route: Route) -> Arc<dyn RouteStore> {
        Arc::new(MemoryRouteStore::from_routes([route]).unwrap())
    }

    fn relay_config() -> ServerConfig {
        ServerConfig::builder()
            .mode(Mode::Relay)
            .health_checks(false)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_relay_mode_skips_sync() {
        let route = Route::builder("/a", "A", "192.168.1.5".parse().unwrap(), 80)
            .build()
            .unwrap();
        let control = ControlPlane::new(&relay_config(), store_with(route)).unwrap();
        assert_eq!(control.routes_changed().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let route = Route::builder("/a", "A", "192.168.1.5".parse().unwrap(), 80)
            .build()
            .unwrap();
        let control = ControlPlane::new(&relay_config(), store_with(route)).unwrap();
        let err = control.test_route("missing").await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_manual_test_records_status() {
        let route = Route::builder("/dead", "Dead", "10.255.255.1".parse().unwrap(), 9)
            .timeout(1)
            .build()
            .unwrap();
        let id = route.id.clone();

        let store = store_with(route);
        let control = ControlPlane::new(&relay_config(), Arc::clone(&store)).unwrap();
        let report = control.test_route(&id).await.unwrap();
        assert!(!report.success);

        let stored = store.get_route(&id).unwrap().unwrap();
        assert_eq!(stored.status, RouteStatus::Offline);
        assert!(stored.last_check.is_some());
    }

    #[tokio::test]
    async fn test_startup_without_health_does_not_sweep() {
        let route = Route::builder("/a", "A", "192.168.1.5".parse().unwrap(), 80)
            .build()
            .unwrap();
        let control = ControlPlane::new(&relay_config(), store_with(route)).unwrap();
        control.startup().await;
        assert!(!control.is_sweeping());
        control.shutdown().await;
    }

    #[tokio::test]
    async fn test_zero_interval_never_sweeps() {
        let config = ServerConfig::builder()
            .mode(Mode::Relay)
            .health_interval(Duration::ZERO)
            .build()
            .unwrap();
        let route = Route::builder("/a", "A", "192.168.1.5".parse().unwrap(), 80)
            .build()
            .unwrap();
        let control = ControlPlane::new(&config, store_with(route)).unwrap();
        control.startup().await;
        assert!(!control.is_sweeping());
    }
}
