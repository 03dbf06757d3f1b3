//! Longest-prefix-first route lookup.

use std::cmp::Reverse;

use crate::route::Route;

/// An ordered snapshot of routes.
///
/// Routes are sorted by mount-path length, longest first; ties keep their
/// original order.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Build a table from a route snapshot.
    pub fn from_routes(routes: Vec<Route>) -> Self {
        Self {
            routes: sort_longest_first(routes),
        }
    }

    /// Find the route mounted at or above `path`, plus the remaining sub-path.
    ///
    /// A mount matches when `path` equals it or continues with `/` after it,
    /// so `/app` matches `/app` and `/app/x` but not `/apple`.
    pub fn match_path<'a, 'p>(&'a self, path: &'p str) -> Option<(&'a Route, &'p str)> {
        self.routes.iter().find_map(|route| {
            let rest = path.strip_prefix(route.path.as_str())?;
            (rest.is_empty() || rest.starts_with('/')).then_some((route, rest))
        })
    }

    /// Routes in match order.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Number of routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Stable sort by mount-path length, descending.
pub fn sort_longest_first(mut routes: Vec<Route>) -> Vec<Route> {
    routes.sort_by_key(|r| Reverse(r.path.len()));
    routes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(path: &str, name: &str) -> Route {
        Route::builder(path, name, "10.0.0.5".parse().unwrap(), 80)
            .build()
            .unwrap()
    }

    #[test]
    fn test_longest_prefix_wins() {
        let table = RouteTable::from_routes(vec![route("/x", "short"), route("/x/y", "long")]);

        let (matched, rest) = table.match_path("/x/y/z").unwrap();
        assert_eq!(matched.name, "long");
        assert_eq!(rest, "/z");

        let (matched, rest) = table.match_path("/x/other").unwrap();
        assert_eq!(matched.name, "short");
        assert_eq!(rest, "/other");
    }

    #[test]
    fn test_segment_boundary() {
        let table = RouteTable::from_routes(vec![route("/app", "app")]);
        assert!(table.match_path("/apple").is_none());
        assert_eq!(table.match_path("/app").unwrap().1, "");
        assert_eq!(table.match_path("/app/").unwrap().1, "/");
    }

    #[test]
    fn test_ties_keep_original_order() {
        let sorted = sort_longest_first(vec![route("/ab", "first"), route("/cd", "second"), route("/e", "third")]);
        let names: Vec<_> = sorted.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["first", "second", "third"]);
    }
}
