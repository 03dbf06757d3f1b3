//! Route store contract and an in-memory implementation.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::{CoreError, CoreResult};
use crate::route::{Route, RouteStatus, RouteUpdate};

/// What the core needs from route persistence.
///
/// The core only ever writes `status`/`last_check` through
/// [`update_status`](Self::update_status); everything else is read-only from
/// its point of view.
pub trait RouteStore: Send + Sync {
    /// List routes, optionally only the enabled ones.
    fn list_routes(&self, enabled_only: bool) -> CoreResult<Vec<Route>>;

    /// Fetch one route by ID.
    fn get_route(&self, id: &str) -> CoreResult<Option<Route>>;

    /// Fetch one route by mount path.
    fn get_route_by_path(&self, path: &str) -> CoreResult<Option<Route>>;

    /// Record the outcome of a health check.
    fn update_status(&self, id: &str, status: RouteStatus, at: DateTime<Utc>) -> CoreResult<()>;
}

/// Route store backed by a `Vec` behind a lock.
///
/// Enforces path uniqueness on insert and applies updates atomically.
#[derive(Debug, Default)]
pub struct MemoryRouteStore {
    routes: RwLock<Vec<Route>>,
}

impl MemoryRouteStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store from routes, validating each and rejecting duplicate paths.
    pub fn from_routes(routes: impl IntoIterator<Item = Route>) -> CoreResult<Self> {
        let store = Self::new();
        for route in routes {
            store.insert(route)?;
        }
        Ok(store)
    }

    /// Load a JSON array of routes.
    pub fn from_json_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let routes: Vec<Route> = serde_json::from_str(&content)?;
        let count = routes.len();
        let store = Self::from_routes(routes)?;
        info!(path = %path.display(), routes = count, "loaded routes file");
        Ok(store)
    }

    /// Add a validated route.
    pub fn insert(&self, route: Route) -> CoreResult<()> {
        route.validate()?;
        let mut routes = self.routes.write();
        if routes.iter().any(|r| r.path == route.path) {
            return Err(CoreError::DuplicatePath { path: route.path });
        }
        debug!(route_id = %route.id, path = %route.path, "route inserted");
        routes.push(route);
        Ok(())
    }

    /// Apply a whole-field update atomically and return the new route.
    pub fn update(&self, id: &str, update: &RouteUpdate) -> CoreResult<Route> {
        let mut routes = self.routes.write();
        let index = routes
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| CoreError::not_found(id))?;

        let next = update.apply(&routes[index], Utc::now())?;
        if routes
            .iter()
            .enumerate()
            .any(|(i, r)| i != index && r.path == next.path)
        {
            return Err(CoreError::DuplicatePath { path: next.path });
        }

        routes[index] = next.clone();
        Ok(next)
    }

    /// Number of stored routes.
    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }
}

impl RouteStore for MemoryRouteStore {
    fn list_routes(&self, enabled_only: bool) -> CoreResult<Vec<Route>> {
        Ok(self
            .routes
            .read()
            .iter()
            .filter(|r| !enabled_only || r.enabled)
            .cloned()
            .collect())
    }

    fn get_route(&self, id: &str) -> CoreResult<Option<Route>> {
        Ok(self.routes.read().iter().find(|r| r.id == id).cloned())
    }

    fn get_route_by_path(&self, path: &str) -> CoreResult<Option<Route>> {
        Ok(self.routes.read().iter().find(|r| r.path == path).cloned())
    }

    fn update_status(&self, id: &str, status: RouteStatus, at: DateTime<Utc>) -> CoreResult<()> {
        let mut routes = self.routes.write();
        let route = routes
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| CoreError::not_found(id))?;
        route.status = status;
        route.last_check = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(path: &str, id: &str) -> Route {
        Route::builder(path, "Test", "192.168.1.100".parse().unwrap(), 8080)
            .id(id)
            .build()
            .unwrap()
    }

    #[test]
    fn test_insert_rejects_duplicate_path() {
        let store = MemoryRouteStore::new();
        store.insert(route("/a", "1")).unwrap();
        let err = store.insert(route("/a", "2")).unwrap_err();
        assert!(matches!(err, CoreError::DuplicatePath { .. }));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_list_enabled_only() {
        let store = MemoryRouteStore::new();
        store.insert(route("/a", "1")).unwrap();
        let mut disabled = route("/b", "2");
        disabled.enabled = false;
        store.insert(disabled).unwrap();

        assert_eq!(store.list_routes(false).unwrap().len(), 2);
        let enabled = store.list_routes(true).unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].path, "/a");
    }

    #[test]
    fn test_update_status() {
        let store = MemoryRouteStore::from_routes([route("/a", "1")]).unwrap();
        let now = Utc::now();
        store.update_status("1", RouteStatus::Slow, now).unwrap();

        let stored = store.get_route("1").unwrap().unwrap();
        assert_eq!(stored.status, RouteStatus::Slow);
        assert_eq!(stored.last_check, Some(now));

        assert!(store.update_status("missing", RouteStatus::Online, now).is_err());
    }

    #[test]
    fn test_update_rejects_path_collision() {
        let store = MemoryRouteStore::from_routes([route("/a", "1"), route("/b", "2")]).unwrap();
        let update = RouteUpdate {
            path: Some("/a".to_string()),
            ..Default::default()
        };
        assert!(store.update("2", &update).is_err());
        assert_eq!(store.get_route("2").unwrap().unwrap().path, "/b");
    }

    #[test]
    fn test_update_invalid_leaves_route_untouched() {
        let store = MemoryRouteStore::from_routes([route("/a", "1")]).unwrap();
        let update = RouteUpdate {
            name: Some("New".to_string()),
            target_ip: Some("8.8.8.8".parse().unwrap()),
            ..Default::default()
        };
        assert!(store.update("1", &update).is_err());
        assert_eq!(store.get_route("1").unwrap().unwrap().name, "Test");
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routes.json");
        std::fs::write(
            &path,
            r#"[{"id":"1","path":"/jellyfin","name":"Jellyfin","target_ip":"192.168.178.168","target_port":8096}]"#,
        )
        .unwrap();

        let store = MemoryRouteStore::from_json_file(&path).unwrap();
        let route = store.get_route_by_path("/jellyfin").unwrap().unwrap();
        assert_eq!(route.target_port, 8096);
    }
}
