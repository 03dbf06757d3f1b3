//! ninsho - edge routing control plane
//!
//! One binary, two ways of putting routes on the wire:
//!
//! ```text
//!                   ┌─────────────────────────────────────────────┐
//!                   │                   ninsho                    │
//!   route store ───►│  ControlPlane                               │
//!                   │    ├─ Synthesizer ──► Caddy admin API       │  (control mode)
//!                   │    └─ HealthSweep ──► route status          │
//!                   │                                             │
//!   clients ───────►│  Server                                     │
//!                   │    ├─ /health, /metrics, /_ninsho/*         │
//!                   │    └─ RouteTable ──► Relay ──► upstream     │  (relay mode)
//!                   └─────────────────────────────────────────────┘
//! ```
//!
//! In control mode Caddy carries the traffic and ninsho keeps its route
//! table in sync. In relay mode ninsho forwards requests itself.
//!
//! # Example Usage
//!
//! ```bash
//! # Run with a configuration file
//! $ ninsho --config /etc/ninsho/ninsho.toml
//!
//! # Relay mode with routes from a JSON file
//! $ NINSHO_MODE=relay NINSHO_ROUTES_FILE=/data/routes.json ninsho
//! ```

#![doc(html_root_url = "https://docs.rs/ninsho-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod control;
pub mod error;
pub mod server;
pub mod shutdown;

pub use config::{Mode, ServerConfig, ServerConfigBuilder};
pub use control::ControlPlane;
pub use error::{ErrorResponse, ServerError, ServerResult};
pub use server::Server;
pub use shutdown::ShutdownSignal;

/// ninsho version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.mode, Mode::Control);
    }
}
