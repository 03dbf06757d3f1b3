//! Backend health classification for ninsho.
//!
//! A probe walks a fixed decision tree and stops at the first failing stage:
//!
//! ```text
//!   parse URL ──✗──► DOWN / misconfig
//!       │
//!   resolve DNS ──✗──► DOWN / offline_dns
//!       │
//!   TCP connect ──✗──► DOWN / offline_conn
//!       │
//!   HTTP GET ──timeout──► DOWN / timeout
//!       │    ──other────► DOWN / error_exc
//!       │
//!   status ≥ 500 ──► DOWN / error_5xx
//!   elapsed > slow ──► DEGRADED / slow
//!   otherwise ──► UP / online
//! ```
//!
//! [`Classifier`] holds no mutable state and is cheap to clone, so one
//! instance can serve every concurrent probe. [`HealthSweep`] runs the
//! classifier periodically for each health-checked route and writes the
//! legacy status back to the [`RouteStore`](ninsho_core::RouteStore).

#![doc(html_root_url = "https://docs.rs/ninsho-health/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod classify;
pub mod error;
pub mod report;
pub mod sweep;

pub use classify::{Classification, Classifier, HealthState, ProbeOptions, Reason};
pub use error::{HealthError, HealthResult};
pub use report::HealthReport;
pub use sweep::{HealthSweep, SweepConfig, SweepSummary};
