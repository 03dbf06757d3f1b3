//! Core data model for the ninsho edge-routing control plane.
//!
//! Every other ninsho crate consumes the types defined here:
//!
//! - [`Route`]: a mount path mapped to a private backend plus forwarding options
//! - [`RouteStore`]: the read/status-write contract of the route persistence layer
//! - [`RouteTable`]: longest-prefix-first lookup over a route snapshot
//! - [`validate`]: the boundary validators that define a well-formed route
//!
//! The core treats a [`Route`] as a value. It never owns storage and only ever
//! writes `status`/`last_check` back through [`RouteStore::update_status`].
//!
//! # Example
//!
//! ```rust
//! use ninsho_core::{MemoryRouteStore, Route, RouteStore, RouteTable};
//!
//! let route = Route::builder("/jellyfin", "Jellyfin", "192.168.178.168".parse().unwrap(), 8096)
//!     .build()
//!     .unwrap();
//!
//! let store = MemoryRouteStore::new();
//! store.insert(route).unwrap();
//!
//! let table = RouteTable::from_routes(store.list_routes(false).unwrap());
//! let (route, sub_path) = table.match_path("/jellyfin/web/index.html").unwrap();
//! assert_eq!(route.name, "Jellyfin");
//! assert_eq!(sub_path, "/web/index.html");
//! ```

#![doc(html_root_url = "https://docs.rs/ninsho-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod route;
pub mod store;
pub mod table;
pub mod validate;

pub use error::{CoreError, CoreResult};
pub use route::{Protocol, Route, RouteBuilder, RouteStatus, RouteUpdate};
pub use store::{MemoryRouteStore, RouteStore};
pub use table::RouteTable;

/// Hard ceiling applied to every control-plane network call.
pub const NETWORK_TIMEOUT_CEILING: std::time::Duration = std::time::Duration::from_secs(10);
