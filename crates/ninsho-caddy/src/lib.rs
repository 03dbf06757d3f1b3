//! Caddy configuration synthesis for ninsho.
//!
//! The whole route set is projected into Caddy's JSON route array on every
//! change and pushed to the admin API in one request:
//!
//! ```text
//!   routes ──► sort longest mount first
//!                 │
//!                 ├─ enabled  ──► reverse_proxy rule (terminal)
//!                 ├─ disabled ──► 302 to the disabled page (terminal)
//!                 └─ always   ──► portal rule (non-terminal, last)
//!                 │
//!   admin API ◄── PATCH, or DELETE + PUT on failure
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use ninsho_caddy::{Synthesizer, SynthesizerConfig};
//!
//! # async fn example(routes: Vec<ninsho_core::Route>) -> ninsho_caddy::SyncResult<()> {
//! let synthesizer = Synthesizer::new(SynthesizerConfig::default())?;
//! synthesizer.sync(&routes).await?;
//! # Ok(())
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/ninsho-caddy/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod admin;
pub mod document;
pub mod error;
pub mod synthesize;

pub use admin::{AdminClient, SyncOutcome};
pub use document::{CaddyDocument, Handler, RouteRule};
pub use error::{SyncError, SyncResult};
pub use synthesize::{disabled_location, Synthesizer, SynthesizerConfig};
