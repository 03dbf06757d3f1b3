//! Transparent streaming HTTP relay for ninsho.
//!
//! [`Relay::forward`] takes a [`Route`](ninsho_core::Route), the request
//! sub-path beyond the mount, and an inbound request, and returns the
//! backend's response with its body streamed through untouched.
//!
//! ```text
//!   client ──► strip hop-by-hop ──► X-Forwarded-* / Forwarded ──► backend
//!                                                                    │
//!   client ◄── X-Accel-Buffering, Via ◄── Location rewrite ◄── strip hop-by-hop
//! ```
//!
//! Transport failures never escape as errors: timeouts become `504`,
//! refused or reset connections `503`, anything else `500`, each with a
//! short generic body. The cause is logged.

#![doc(html_root_url = "https://docs.rs/ninsho-relay/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod headers;
pub mod redirect;
pub mod relay;
pub mod target;

pub use error::{RelayError, RelayResult, TransportFailure};
pub use headers::ClientInfo;
pub use redirect::rewrite_location;
pub use relay::{BoxError, Relay, RelayBody, RelayConfig};
pub use target::build_target_url;
